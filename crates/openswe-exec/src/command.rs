//! Typed command requests.
//!
//! Callers at the HTTP boundary submit one of a closed set of command kinds
//! rather than an arbitrary bag of arguments; each kind is validated and then
//! rendered to a single shell string for the executor.

use crate::error::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Maximum command (or script body) length in bytes (1 MB).
pub const MAX_COMMAND_LENGTH: usize = 1024 * 1024;

/// A command submitted for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandSpec {
    /// A shell command line, run via `<shell> -c`.
    Shell {
        /// Shell command to execute.
        command: String,
    },
    /// Source code run through a language interpreter.
    Script {
        /// Interpreter to use.
        language: ScriptLanguage,
        /// Code to execute.
        code: String,
    },
}

/// Interpreters accepted by [`CommandSpec::Script`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    /// Python 3
    #[serde(alias = "python3")]
    Python,
    /// Node.js
    #[serde(alias = "javascript", alias = "js")]
    Node,
    /// Bash
    Bash,
    /// POSIX sh
    Sh,
}

impl ScriptLanguage {
    fn interpreter(self) -> (&'static str, &'static str) {
        match self {
            Self::Python => ("python3", "-c"),
            Self::Node => ("node", "-e"),
            Self::Bash => ("bash", "-c"),
            Self::Sh => ("sh", "-c"),
        }
    }
}

impl CommandSpec {
    /// Shorthand for a shell command.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell {
            command: command.into(),
        }
    }

    /// Reject empty or oversized input.
    pub fn validate(&self) -> Result<()> {
        let (field, body) = match self {
            Self::Shell { command } => ("command", command),
            Self::Script { code, .. } => ("code", code),
        };
        if body.trim().is_empty() {
            return Err(ExecError::InvalidCommand(format!("{field} must not be empty")));
        }
        if body.len() > MAX_COMMAND_LENGTH {
            return Err(ExecError::InvalidCommand(format!(
                "{field} exceeds maximum size ({} bytes > {} bytes)",
                body.len(),
                MAX_COMMAND_LENGTH
            )));
        }
        Ok(())
    }

    /// Render to a single shell command line.
    pub fn to_shell_command(&self) -> String {
        match self {
            Self::Shell { command } => command.clone(),
            Self::Script { language, code } => {
                let (program, flag) = language.interpreter();
                let quoted = shell_escape::unix::escape(Cow::Borrowed(code.as_str()));
                format!("{program} {flag} {quoted}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandExecutor, ExecOptions};

    #[test]
    fn test_deserialize_tagged_kinds() {
        let shell: CommandSpec =
            serde_json::from_str(r#"{"kind":"shell","command":"ls -la"}"#).unwrap();
        assert_eq!(shell, CommandSpec::shell("ls -la"));

        let script: CommandSpec =
            serde_json::from_str(r#"{"kind":"script","language":"python3","code":"print(1)"}"#)
                .unwrap();
        assert!(matches!(
            script,
            CommandSpec::Script {
                language: ScriptLanguage::Python,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = serde_json::from_str::<CommandSpec>(r#"{"kind":"docker","image":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unsupported_language_rejected() {
        let result = serde_json::from_str::<CommandSpec>(
            r#"{"kind":"script","language":"cobol","code":"DISPLAY 'HELLO'"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_empty_and_oversized() {
        assert!(CommandSpec::shell("   ").validate().is_err());
        assert!(CommandSpec::shell("x".repeat(MAX_COMMAND_LENGTH + 1))
            .validate()
            .is_err());
        assert!(CommandSpec::shell("echo ok").validate().is_ok());
    }

    #[test]
    fn test_script_rendering_quotes_code() {
        let spec = CommandSpec::Script {
            language: ScriptLanguage::Node,
            code: "console.log('hi')".into(),
        };
        assert_eq!(spec.to_shell_command(), r#"node -e 'console.log('\''hi'\'')'"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sh_script_executes() {
        let spec = CommandSpec::Script {
            language: ScriptLanguage::Sh,
            code: "echo \"it's $((1 + 2))\"".into(),
        };
        let result = CommandExecutor::new()
            .execute(&spec.to_shell_command(), ExecOptions::new())
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "it's 3");
    }
}
