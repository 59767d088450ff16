//! Deciding from log output whether a dev server came up.

use regex::Regex;
use std::sync::LazyLock;

const SUCCESS_PATTERNS: &[&str] = &[
    r"(?i)\bready\b",
    r"(?i)\blistening\b",
    r"(?i)\bcompiled\b",
    r"(?i)started server",
    r"(?i)\blocal:",
    r"(?i)running on",
    r"(?i)server running",
    r"(?i)watching for file changes",
];

const ERROR_PATTERNS: &[&str] = &[
    r"EADDRINUSE",
    r"(?i)address already in use",
    r"(?i)command not found",
    r"Cannot find module",
    r"npm ERR!",
    r"ERR_PNPM",
    r"Traceback \(most recent call last\)",
    r"SyntaxError",
];

static DEFAULT_SUCCESS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| SUCCESS_PATTERNS.iter().map(|p| compile_regex(p)).collect());

static DEFAULT_ERRORS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| ERROR_PATTERNS.iter().map(|p| compile_regex(p)).collect());

/// `localhost:5173`, `http://127.0.0.1:3000/`, `[::]:8080` and similar.
static URL_PORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"(?i)(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})\b")
});

/// `on port 3000`, `port: 3000`
static PHRASE_PORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"(?i)\bport[:\s]+(\d{2,5})\b"));

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Covered by `test_default_patterns_compile`
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Result of inspecting log output once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A success pattern matched; `port` is the effective port.
    Ready {
        /// Port announced in the log, or the requested one.
        port: u16,
    },
    /// An error pattern matched and no success pattern did.
    Failed {
        /// The log line that matched.
        reason: String,
    },
    /// Nothing conclusive yet.
    Pending,
}

/// Pattern sets that classify dev-server log output.
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    success: Vec<Regex>,
    errors: Vec<Regex>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            success: DEFAULT_SUCCESS.clone(),
            errors: DEFAULT_ERRORS.clone(),
        }
    }
}

impl ReadinessPolicy {
    /// Build a policy from custom pattern lists.
    pub fn new(success: &[&str], errors: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            success: success.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
            errors: errors.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?,
        })
    }

    /// Classify `log`. A success match wins over an error match.
    pub fn evaluate(&self, log: &str, requested_port: u16) -> Readiness {
        if self.success.iter().any(|re| re.is_match(log)) {
            return Readiness::Ready {
                port: detect_port(log).unwrap_or(requested_port),
            };
        }
        for line in log.lines() {
            if self.errors.iter().any(|re| re.is_match(line)) {
                return Readiness::Failed {
                    reason: line.trim().to_string(),
                };
            }
        }
        Readiness::Pending
    }
}

/// Last port announced in `log`, preferring `host:port` URLs.
pub fn detect_port(log: &str) -> Option<u16> {
    let last = |re: &Regex| {
        re.captures_iter(log)
            .filter_map(|c| c.get(1)?.as_str().parse::<u16>().ok())
            .filter(|p| *p != 0)
            .last()
    };
    last(&URL_PORT_REGEX).or_else(|| last(&PHRASE_PORT_REGEX))
}
