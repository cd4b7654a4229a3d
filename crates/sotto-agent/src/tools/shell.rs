//! Shell execution tool.
//!
//! Commands are tokenized with `shlex` and run via direct process
//! execution — never through a shell interpreter, so `;`, `|`, `$( )` and
//! friends have no effect even if they slip past the guard. The guard
//! rejects them anyway so the LM gets a clear error instead of a confusing
//! literal-argument result.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use sotto_core::config::ExecGuardConfig;

use super::base::{optional_string, require_string, Tool};

/// Output truncation limit (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Destructive command patterns, always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// Shell operator patterns. Execution is exec-based so these would not be
/// interpreted, but they signal the LM expected shell semantics.
const SHELL_OPERATOR_PATTERNS: &[&str] = &[
    r";\s*\w",      // command separator
    r"\|\|?\s*\w",  // pipe / OR
    r"&&\s*\w",     // AND chain
    r"\$\(",        // command substitution
    r"`.*`",        // backtick substitution
    r"<\s*[^-\s]",  // input redirection (allows `<-`)
    r">\s*[^-\s]",  // output redirection (allows `>-`)
    r"\{\s*\w",     // brace expansion
];

/// Binaries blocked outright regardless of patterns.
const DANGEROUS_BINARIES: &[&str] = &[
    "chmod", "chown", "iptables", "useradd", "usermod", "userdel", "netcat", "socat", "telnet",
];

// ─────────────────────────────────────────────
// ExecTool
// ─────────────────────────────────────────────

/// Executes a single command in a subprocess.
pub struct ExecTool {
    working_dir: PathBuf,
    timeout: Duration,
    restrict_to_workspace: bool,
    allowed_commands: Option<HashSet<String>>,
    deny_regexes: Vec<Regex>,
    allow_regexes: Vec<Regex>,
    operator_regexes: Vec<Regex>,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf, config: &ExecGuardConfig) -> Self {
        let deny_regexes = DENY_PATTERNS
            .iter()
            .map(|s| *s)
            .chain(config.deny_patterns.iter().map(|s| s.as_str()))
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        let allow_regexes = config
            .allow_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        let operator_regexes = SHELL_OPERATOR_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            working_dir,
            timeout: Duration::from_secs(config.timeout),
            restrict_to_workspace: config.restrict_to_workspace,
            allowed_commands: config
                .allowed_commands
                .as_ref()
                .map(|cmds| cmds.iter().cloned().collect()),
            deny_regexes,
            allow_regexes,
            operator_regexes,
        }
    }

    /// Validate a command. Returns the rejection message when blocked.
    fn guard_command(&self, command: &str, cwd: &str) -> Option<String> {
        let cmd = command.trim();
        let lower = cmd.to_lowercase();
        let binary = cmd.split_whitespace().next().unwrap_or("");

        if let Some(allowed) = &self.allowed_commands {
            if !allowed.contains(binary) {
                let mut listed: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
                listed.sort();
                return Some(format!(
                    "Error: Command '{binary}' is not allowed. Allowed commands: {}",
                    listed.join(", ")
                ));
            }
        }

        for re in &self.operator_regexes {
            if re.is_match(cmd) {
                return Some(
                    "Error: Shell operator not allowed. Only simple commands are supported."
                        .into(),
                );
            }
        }

        for re in &self.deny_regexes {
            if re.is_match(&lower) {
                warn!(command = %cmd, "command blocked by safety guard");
                return Some(
                    "Error: Command blocked by safety guard (dangerous pattern detected)".into(),
                );
            }
        }

        if DANGEROUS_BINARIES.contains(&binary) {
            return Some(format!(
                "Error: Command '{binary}' is blocked for security reasons"
            ));
        }

        if !self.allow_regexes.is_empty() && !self.allow_regexes.iter().any(|re| re.is_match(&lower))
        {
            return Some("Error: Command blocked by safety guard (not in allowlist)".into());
        }

        if self.restrict_to_workspace {
            if cmd.contains("../") || cmd.contains("..\\") {
                return Some(
                    "Error: Command blocked by safety guard (path traversal detected)".into(),
                );
            }
            if let Some(outside) = self.path_outside_workspace(cmd, cwd) {
                return Some(format!(
                    "Error: Command references path '{outside}' outside workspace"
                ));
            }
        }

        None
    }

    /// Find an absolute path argument resolving outside the working dir.
    fn path_outside_workspace(&self, command: &str, cwd: &str) -> Option<String> {
        let cwd_path = Path::new(cwd)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(cwd));

        let abs_path_re = Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#).ok()?;
        for m in abs_path_re.find_iter(command) {
            let p = PathBuf::from(m.as_str());
            let resolved = p.canonicalize().unwrap_or(p);
            if !resolved.starts_with(&cwd_path) {
                return Some(m.as_str().to_string());
            }
        }
        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a single command and return its output. Shell operators \
         (pipes, redirection, chaining) are not supported."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = optional_string(&params, "working_dir")
            .unwrap_or_else(|| self.working_dir.to_string_lossy().to_string());

        if let Some(rejection) = self.guard_command(&command, &cwd) {
            // Guard rejections are tool results, not Rust errors.
            return Ok(rejection);
        }

        let args = match shlex::split(&command) {
            Some(args) if !args.is_empty() => args,
            Some(_) => return Ok("Error: Empty command".into()),
            None => return Ok("Error: Invalid command syntax (unbalanced quotes)".into()),
        };

        info!(command = %command, cwd = %cwd, "executing command");

        let mut child = tokio::process::Command::new(&args[0])
            .args(&args[1..])
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn command: {e}"))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => anyhow::bail!("Command failed: {e}"),
            Err(_) => {
                // kill_on_drop reaps the timed-out child.
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let mut parts: Vec<String> = Vec::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            parts.push(stdout.to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            parts.push(format!("Exit code: {code}"));
        }

        let mut combined = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        if combined.len() > MAX_OUTPUT_LEN {
            let mut cut = MAX_OUTPUT_LEN;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            let remaining = combined.len() - cut;
            combined.truncate(cut);
            combined.push_str(&format!("\n... (truncated, {remaining} more chars)"));
        }

        Ok(combined)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_with(config: ExecGuardConfig) -> ExecTool {
        ExecTool::new(std::env::temp_dir(), &config)
    }

    fn tool() -> ExecTool {
        tool_with(ExecGuardConfig::default())
    }

    fn make_params(command: &str) -> HashMap<String, Value> {
        let mut params = HashMap::new();
        params.insert("command".into(), Value::String(command.into()));
        params
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = tool().execute(make_params("echo hello")).await.unwrap();
        assert!(result.contains("hello"));
    }

    #[tokio::test]
    async fn test_exec_quoted_args() {
        let result = tool()
            .execute(make_params("echo 'hello world'"))
            .await
            .unwrap();
        assert!(result.contains("hello world"));
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let result = tool().execute(make_params("false")).await.unwrap();
        assert!(result.contains("Exit code: 1"));
    }

    #[tokio::test]
    async fn test_exec_timeout_kills() {
        let config = ExecGuardConfig {
            timeout: 1,
            ..Default::default()
        };
        let result = tool_with(config)
            .execute(make_params("sleep 30"))
            .await
            .unwrap();
        assert!(result.contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_exec_unbalanced_quotes() {
        let result = tool().execute(make_params("echo 'oops")).await.unwrap();
        assert!(result.starts_with("Error: Invalid command syntax"));
    }

    #[test]
    fn test_guard_blocks_rm_rf() {
        let guard = tool().guard_command("rm -rf /", "/tmp");
        assert!(guard.unwrap().contains("dangerous pattern"));
    }

    #[test]
    fn test_guard_blocks_fork_bomb() {
        assert!(tool().guard_command(":() { :|:& };:", "/tmp").is_some());
    }

    #[test]
    fn test_guard_blocks_dd() {
        assert!(tool()
            .guard_command("dd if=/dev/zero of=/dev/sda", "/tmp")
            .is_some());
    }

    #[test]
    fn test_guard_blocks_shutdown() {
        assert!(tool().guard_command("sudo shutdown -h now", "/tmp").is_some());
    }

    #[test]
    fn test_guard_blocks_shell_operators() {
        let t = tool();
        for cmd in [
            "echo a; rm b",
            "cat x | grep y",
            "true && false",
            "echo $(whoami)",
            "echo `whoami`",
            "sort < input.txt",
            "echo hi > out.txt",
            "echo {a,b}",
        ] {
            let guard = t.guard_command(cmd, "/tmp");
            assert!(guard.is_some(), "expected rejection for: {cmd}");
            assert!(guard.unwrap().contains("Shell operator"));
        }
    }

    #[test]
    fn test_guard_allows_dash_redirect_forms() {
        // `>-` and `<-` are literal arguments some CLIs use for stdout/stdin.
        let t = tool();
        assert!(t.guard_command("kubectl logs >- ", "/tmp").is_none());
        assert!(t.guard_command("tar xf <- ", "/tmp").is_none());
    }

    #[test]
    fn test_guard_blocks_dangerous_binaries() {
        let guard = tool().guard_command("chmod 777 /etc/passwd", "/tmp");
        assert!(guard.unwrap().contains("blocked for security reasons"));
    }

    #[test]
    fn test_guard_allows_safe_commands() {
        let t = tool();
        for cmd in ["echo hello", "ls -la", "cat file.txt", "cargo test", "git status"] {
            assert!(t.guard_command(cmd, "/tmp").is_none(), "rejected: {cmd}");
        }
    }

    #[test]
    fn test_guard_allowlist_mode() {
        let config = ExecGuardConfig {
            allowed_commands: Some(vec!["echo".into(), "ls".into()]),
            ..Default::default()
        };
        let t = tool_with(config);
        assert!(t.guard_command("echo hi", "/tmp").is_none());
        let guard = t.guard_command("cat file", "/tmp").unwrap();
        assert!(guard.contains("'cat' is not allowed"));
        assert!(guard.contains("echo, ls"));
    }

    #[test]
    fn test_guard_allow_patterns() {
        let config = ExecGuardConfig {
            allow_patterns: vec![r"^git\b".into()],
            ..Default::default()
        };
        let t = tool_with(config);
        assert!(t.guard_command("git status", "/tmp").is_none());
        assert!(t
            .guard_command("ls", "/tmp")
            .unwrap()
            .contains("not in allowlist"));
    }

    #[test]
    fn test_guard_custom_deny_patterns() {
        let config = ExecGuardConfig {
            deny_patterns: vec![r"\bcurl\b".into()],
            ..Default::default()
        };
        let t = tool_with(config);
        assert!(t.guard_command("curl http://example.com", "/tmp").is_some());
    }

    #[test]
    fn test_guard_traversal_in_restricted_mode() {
        let config = ExecGuardConfig {
            restrict_to_workspace: true,
            ..Default::default()
        };
        let t = tool_with(config);
        let guard = t.guard_command("cat ../../../etc/passwd", "/tmp");
        assert!(guard.unwrap().contains("path traversal"));
    }

    #[tokio::test]
    async fn test_guard_outside_path_in_restricted_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExecGuardConfig {
            restrict_to_workspace: true,
            ..Default::default()
        };
        let t = ExecTool::new(dir.path().to_path_buf(), &config);
        let guard = t.guard_command("cat /etc/passwd", &dir.path().to_string_lossy());
        assert!(guard.unwrap().contains("outside workspace"));
    }

    #[tokio::test]
    async fn test_output_truncation() {
        let result = tool()
            .execute(make_params("seq 1 20000"))
            .await
            .unwrap();
        assert!(result.len() <= MAX_OUTPUT_LEN + 100);
        assert!(result.contains("truncated"));
    }

    #[test]
    fn test_tool_definition() {
        let def = tool().to_definition();
        assert_eq!(def.function.name, "exec");
        assert_eq!(def.tool_type, "function");
    }
}
