//! Inferring how to start a project's dev server.
//!
//! Detection is a cascade, first match wins:
//!
//! 1. `package.json` contents (dependencies and scripts)
//! 2. `package.json` present but unreadable: generic `dev` script
//! 3. marker files of non-Node ecosystems (`manage.py`, `Gemfile` + `config.ru`,
//!    `app.py`, `index.html`)
//!
//! `None` means "not a web project" and is an expected outcome.

use crate::error::Result;
use crate::target::CommandTarget;
use openswe_exec::ExecOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Framework or ecosystem of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    /// Next.js
    Nextjs,
    /// Vite
    Vite,
    /// Create React App
    Cra,
    /// Angular CLI
    Angular,
    /// Nuxt
    Nuxt,
    /// SvelteKit
    Sveltekit,
    /// Astro
    Astro,
    /// Remix
    Remix,
    /// Vue CLI
    Vue,
    /// Express
    Express,
    /// Any other Node project with a `dev` or `start` script
    Node,
    /// Django (`manage.py`)
    Django,
    /// Rails (`Gemfile` + `config.ru`)
    Rails,
    /// Flask (`app.py`)
    Flask,
    /// Plain HTML (`index.html`)
    Static,
    /// Caller-supplied command
    Custom,
}

impl ProjectType {
    /// Port the framework listens on out of the box.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Vite | Self::Sveltekit => 5173,
            Self::Angular => 4200,
            Self::Astro => 4321,
            Self::Vue | Self::Static => 8080,
            Self::Django => 8000,
            Self::Flask => 5000,
            Self::Nextjs
            | Self::Cra
            | Self::Nuxt
            | Self::Remix
            | Self::Express
            | Self::Node
            | Self::Rails
            | Self::Custom => 3000,
        }
    }

    /// Whether the dev server takes `--port`/`--host` flags rather than `PORT`.
    pub(crate) fn takes_port_flags(self) -> bool {
        matches!(
            self,
            Self::Vite | Self::Sveltekit | Self::Astro | Self::Angular | Self::Vue
        )
    }

    /// Start command for marker-file ecosystems, bound to `port`.
    pub(crate) fn marker_command(self, port: u16) -> Option<String> {
        match self {
            Self::Django => Some(format!("python3 manage.py runserver 0.0.0.0:{port}")),
            Self::Rails => Some(format!("bundle exec rails server -b 0.0.0.0 -p {port}")),
            Self::Flask => Some(format!(
                "python3 -m flask --app app run --host 0.0.0.0 --port {port}"
            )),
            Self::Static => Some(format!("python3 -m http.server {port} --bind 0.0.0.0")),
            _ => None,
        }
    }
}

/// Package manager, inferred from lockfiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// npm (default)
    Npm,
    /// pnpm
    Pnpm,
    /// Yarn
    Yarn,
    /// Bun
    Bun,
}

impl PackageManager {
    /// Pick the package manager whose lockfile is present.
    pub fn from_files(files: &BTreeSet<String>) -> Self {
        if files.contains("pnpm-lock.yaml") {
            Self::Pnpm
        } else if files.contains("yarn.lock") {
            Self::Yarn
        } else if files.contains("bun.lockb") || files.contains("bun.lock") {
            Self::Bun
        } else {
            Self::Npm
        }
    }

    /// Command running a `package.json` script.
    pub fn run_script(self, script: &str) -> String {
        match self {
            Self::Npm => format!("npm run {script}"),
            Self::Pnpm => format!("pnpm run {script}"),
            Self::Yarn => format!("yarn run {script}"),
            Self::Bun => format!("bun run {script}"),
        }
    }

    /// Command running a binary from `node_modules/.bin`.
    pub fn exec_bin(self, bin: &str) -> String {
        match self {
            Self::Npm => format!("npx {bin}"),
            Self::Pnpm => format!("pnpm exec {bin}"),
            Self::Yarn => format!("yarn {bin}"),
            Self::Bun => format!("bunx {bin}"),
        }
    }
}

/// How to start a project's dev server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerConfig {
    /// Start command, before port binding is applied.
    pub command: String,
    /// Port the server should listen on.
    pub port: u16,
    /// Detected framework.
    pub project_type: ProjectType,
    /// Whether the project serves web content.
    pub is_web_project: bool,
}

impl DevServerConfig {
    /// Config for a caller-supplied command.
    pub fn custom(command: impl Into<String>, port: u16) -> Self {
        Self {
            command: command.into(),
            port,
            project_type: ProjectType::Custom,
            is_web_project: true,
        }
    }

    fn new(command: String, project_type: ProjectType) -> Self {
        Self {
            command,
            port: project_type.default_port(),
            project_type,
            is_web_project: true,
        }
    }
}

/// The part of a working directory detection looks at.
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    /// Top-level entry names.
    pub files: BTreeSet<String>,
    /// Parsed `package.json`, when present and valid.
    pub package_json: Option<Value>,
}

impl ProjectSnapshot {
    /// Build a snapshot from a file listing and raw `package.json` text.
    pub fn new<I, S>(files: I, package_json: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            package_json: package_json.and_then(|raw| serde_json::from_str(raw).ok()),
        }
    }

    /// Read `workdir` through `target`.
    pub async fn load(target: &dyn CommandTarget, workdir: &Path) -> Result<Self> {
        let opts = || {
            ExecOptions::new()
                .cwd(workdir)
                .timeout(SNAPSHOT_TIMEOUT)
        };

        let listing = target.run("ls -1A", opts()).await?;
        if !listing.success() {
            tracing::debug!(
                workdir = %workdir.display(),
                stderr = %listing.stderr.trim(),
                "Cannot list working directory"
            );
            return Ok(Self::default());
        }
        let files: BTreeSet<String> = listing
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        let manifest = if files.contains("package.json") {
            let cat = target.run("cat package.json", opts()).await?;
            cat.success().then_some(cat.stdout)
        } else {
            None
        };

        Ok(Self::new(files, manifest.as_deref()))
    }

    fn has(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    fn has_dependency(&self, name: &str) -> bool {
        self.package_json.as_ref().is_some_and(|pkg| {
            ["dependencies", "devDependencies"]
                .iter()
                .any(|section| pkg.get(section).and_then(|deps| deps.get(name)).is_some())
        })
    }

    fn script(&self, name: &str) -> Option<&str> {
        self.package_json
            .as_ref()?
            .get("scripts")?
            .get(name)?
            .as_str()
    }
}

/// Run the detection cascade on a snapshot.
pub fn detect(snapshot: &ProjectSnapshot) -> Option<DevServerConfig> {
    detect_from_manifest(snapshot)
        .or_else(|| detect_from_manifest_presence(snapshot))
        .or_else(|| detect_from_markers(snapshot))
}

/// Load `workdir` through `target` and run detection.
pub async fn detect_dev_server(
    target: &dyn CommandTarget,
    workdir: &Path,
) -> Result<Option<DevServerConfig>> {
    let snapshot = ProjectSnapshot::load(target, workdir).await?;
    let config = detect(&snapshot);
    match &config {
        Some(c) => tracing::debug!(
            workdir = %workdir.display(),
            project_type = ?c.project_type,
            port = c.port,
            command = %c.command,
            "Detected dev server"
        ),
        None => tracing::debug!(workdir = %workdir.display(), "No web project detected"),
    }
    Ok(config)
}

/// (dependency, type, binary invocation used when no script exists)
const FRAMEWORKS: &[(&str, ProjectType, &str)] = &[
    ("next", ProjectType::Nextjs, "next dev"),
    ("nuxt", ProjectType::Nuxt, "nuxt dev"),
    ("@sveltejs/kit", ProjectType::Sveltekit, "vite dev"),
    ("astro", ProjectType::Astro, "astro dev"),
    ("@remix-run/dev", ProjectType::Remix, "remix dev"),
    ("@angular/core", ProjectType::Angular, "ng serve"),
    ("vite", ProjectType::Vite, "vite"),
    ("react-scripts", ProjectType::Cra, "react-scripts start"),
    ("@vue/cli-service", ProjectType::Vue, "vue-cli-service serve"),
];

fn detect_from_manifest(snapshot: &ProjectSnapshot) -> Option<DevServerConfig> {
    let pkg = snapshot.package_json.as_ref()?;
    let pm = PackageManager::from_files(&snapshot.files);
    let script = ["dev", "start"]
        .into_iter()
        .find(|name| snapshot.script(name).is_some());

    for &(dependency, project_type, bin) in FRAMEWORKS {
        if snapshot.has_dependency(dependency) {
            let command = match script {
                Some(name) => pm.run_script(name),
                None => pm.exec_bin(bin),
            };
            return Some(DevServerConfig::new(command, project_type));
        }
    }

    if snapshot.has_dependency("express") {
        let command = match script {
            Some(name) => pm.run_script(name),
            None => format!(
                "node {}",
                pkg.get("main").and_then(Value::as_str).unwrap_or("index.js")
            ),
        };
        return Some(DevServerConfig::new(command, ProjectType::Express));
    }

    script.map(|name| DevServerConfig::new(pm.run_script(name), ProjectType::Node))
}

fn detect_from_manifest_presence(snapshot: &ProjectSnapshot) -> Option<DevServerConfig> {
    if snapshot.has("package.json") && snapshot.package_json.is_none() {
        let pm = PackageManager::from_files(&snapshot.files);
        return Some(DevServerConfig::new(pm.run_script("dev"), ProjectType::Node));
    }
    None
}

fn detect_from_markers(snapshot: &ProjectSnapshot) -> Option<DevServerConfig> {
    let project_type = if snapshot.has("manage.py") {
        ProjectType::Django
    } else if snapshot.has("Gemfile") && snapshot.has("config.ru") {
        ProjectType::Rails
    } else if snapshot.has("app.py") {
        ProjectType::Flask
    } else if snapshot.has("index.html") {
        ProjectType::Static
    } else {
        return None;
    };
    let command = project_type.marker_command(project_type.default_port())?;
    Some(DevServerConfig::new(command, project_type))
}
