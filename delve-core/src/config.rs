//! Configuration for interceptors, hooks and the reasoning loop.
//!
//! Every section is a plain struct with a `Default`, `with_*` setters and a
//! `validate()` method. Components take their section by value at
//! construction; nothing reads configuration from ambient state.
//!
//! [`RetryConfig`] deliberately has no `Default`: what happens after the last
//! retry must be spelled out by whoever builds the agent.

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Names of the virtual filesystem tools.
pub const FILESYSTEM_TOOLS: [&str; 4] = ["ls", "read_file", "write_file", "edit_file"];

// ============================================================================
// Large-Result Eviction
// ============================================================================

/// Configuration for [`LargeResultEviction`](crate::interceptor::LargeResultEviction).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct EvictionConfig {
    /// Results above this many tokens are moved to the virtual filesystem.
    ///
    /// Default: 5000
    pub tool_token_limit_before_evict: usize,

    /// Skip eviction for `ls`, `read_file`, `write_file` and `edit_file`.
    ///
    /// Default: true
    pub exclude_filesystem_tools: bool,

    /// Additional tool names whose results are never evicted.
    pub excluded_tools: Vec<String>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            tool_token_limit_before_evict: 5000,
            exclude_filesystem_tools: true,
            excluded_tools: Vec::new(),
        }
    }
}

impl EvictionConfig {
    #[must_use]
    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.tool_token_limit_before_evict = limit;
        self
    }

    #[must_use]
    pub fn with_exclude_filesystem_tools(mut self, exclude: bool) -> Self {
        self.exclude_filesystem_tools = exclude;
        self
    }

    #[must_use]
    pub fn with_excluded_tool(mut self, name: impl Into<String>) -> Self {
        self.excluded_tools.push(name.into());
        self
    }

    /// Whether results of `tool_name` bypass eviction.
    pub fn is_excluded(&self, tool_name: &str) -> bool {
        (self.exclude_filesystem_tools && FILESYSTEM_TOOLS.contains(&tool_name))
            || self.excluded_tools.iter().any(|t| t == tool_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tool_token_limit_before_evict == 0 {
            return Err(ConfigError::invalid(
                "tool_token_limit_before_evict",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Configuration for [`Filesystem`](crate::interceptor::Filesystem).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct FilesystemConfig {
    /// Reject `write_file` and `edit_file` with a policy violation.
    ///
    /// Default: false
    pub read_only: bool,
}

impl FilesystemConfig {
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

// ============================================================================
// Context Editing
// ============================================================================

/// Configuration for [`ContextEditing`](crate::interceptor::ContextEditing).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ContextEditingConfig {
    /// Editing starts once the context holds more than this many tokens.
    ///
    /// Default: 100000
    pub trigger: usize,

    /// Minimum number of tokens to free per edit.
    ///
    /// Default: 10000
    pub clear_at_least: usize,

    /// Most recent messages that are never touched.
    ///
    /// Default: 3
    pub keep: usize,

    /// Tools whose calls and results are never dropped.
    pub exclude_tools: Vec<String>,
}

impl Default for ContextEditingConfig {
    fn default() -> Self {
        Self {
            trigger: 100_000,
            clear_at_least: 10_000,
            keep: 3,
            exclude_tools: Vec::new(),
        }
    }
}

impl ContextEditingConfig {
    #[must_use]
    pub fn with_trigger(mut self, trigger: usize) -> Self {
        self.trigger = trigger;
        self
    }

    #[must_use]
    pub fn with_clear_at_least(mut self, tokens: usize) -> Self {
        self.clear_at_least = tokens;
        self
    }

    #[must_use]
    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    #[must_use]
    pub fn with_excluded_tool(mut self, name: impl Into<String>) -> Self {
        self.exclude_tools.push(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trigger == 0 {
            return Err(ConfigError::invalid("trigger", "must be greater than zero"));
        }
        if self.clear_at_least == 0 {
            return Err(ConfigError::invalid(
                "clear_at_least",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tool Retry
// ============================================================================

/// What [`ToolRetry`](crate::interceptor::ToolRetry) does once retries run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Abort the run with a fatal tool error.
    RaiseError,
    /// Hand the model a synthetic failure result and keep going.
    ReturnMessage,
}

/// Configuration for [`ToolRetry`](crate::interceptor::ToolRetry).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryConfig {
    /// Retries after the first attempt. A deterministic failure is attempted
    /// `max_retries + 1` times.
    pub max_retries: u32,

    pub on_failure: OnFailure,

    /// Delay before the first retry, doubled on each subsequent one.
    ///
    /// Default: 1 second
    pub backoff_base: Duration,

    /// Upper bound for a single backoff delay.
    ///
    /// Default: 60 seconds
    pub max_backoff: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32, on_failure: OnFailure) -> Self {
        Self {
            max_retries,
            on_failure,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        exponential_delay(self.backoff_base, self.max_backoff, retry)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base > self.max_backoff {
            return Err(ConfigError::invalid(
                "backoff_base",
                "must not exceed max_backoff",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Summarization
// ============================================================================

/// Default instructions given to the summarization model.
pub const DEFAULT_SUMMARY_PROMPT: &str = "You are compacting the history of an agent run. \
Summarize the conversation below so the agent can continue its work. Keep every fact, \
file path, open question and decision that later steps may depend on. Reply with the \
summary only.";

/// Configuration for [`SummarizationHook`](crate::hooks::SummarizationHook).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SummarizationConfig {
    /// Summarize once the context holds more than this many tokens.
    ///
    /// Default: 120000
    pub max_tokens_before_summary: usize,

    /// Most recent messages kept verbatim.
    ///
    /// Default: 6
    pub messages_to_keep: usize,

    /// System prompt for the summarization model call.
    pub prompt: String,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            max_tokens_before_summary: 120_000,
            messages_to_keep: 6,
            prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

impl SummarizationConfig {
    #[must_use]
    pub fn with_max_tokens_before_summary(mut self, tokens: usize) -> Self {
        self.max_tokens_before_summary = tokens;
        self
    }

    #[must_use]
    pub fn with_messages_to_keep(mut self, keep: usize) -> Self {
        self.messages_to_keep = keep;
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tokens_before_summary == 0 {
            return Err(ConfigError::invalid(
                "max_tokens_before_summary",
                "must be greater than zero",
            ));
        }
        if self.messages_to_keep == 0 {
            return Err(ConfigError::invalid(
                "messages_to_keep",
                "must keep at least one message",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tool-Call Limit
// ============================================================================

/// Configuration for [`ToolCallLimitHook`](crate::hooks::ToolCallLimitHook).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ToolCallLimitConfig {
    /// Tool calls a single run may execute.
    ///
    /// Default: 25
    pub run_limit: u64,
}

impl Default for ToolCallLimitConfig {
    fn default() -> Self {
        Self { run_limit: 25 }
    }
}

impl ToolCallLimitConfig {
    #[must_use]
    pub fn with_run_limit(mut self, limit: u64) -> Self {
        self.run_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run_limit == 0 {
            return Err(ConfigError::invalid("run_limit", "must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Human-In-The-Loop
// ============================================================================

/// Tools that need operator approval, mapped to the text shown with the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ApprovalConfig {
    pub tools: BTreeMap<String, String>,
}

impl ApprovalConfig {
    #[must_use]
    pub fn approval_on(mut self, tool: impl Into<String>, description: impl Into<String>) -> Self {
        self.tools.insert(tool.into(), description.into());
        self
    }

    pub fn requires_approval(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }
}

// ============================================================================
// Shell Sandbox
// ============================================================================

/// Configuration for [`ShellSandboxHook`](crate::hooks::ShellSandboxHook).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ShellSandboxConfig {
    /// Tools treated as shell execution.
    ///
    /// Default: `["shell"]`
    pub tool_names: Vec<String>,

    /// The only directory shell commands may touch.
    pub workspace: PathBuf,

    /// Programs that are never allowed: network clients, privilege
    /// escalation, and interpreters that could run either. Version suffixes
    /// are ignored when matching, so `python` also denies `python3.12`.
    pub denied_commands: Vec<String>,

    /// Wall-clock limit injected into every sandboxed call.
    ///
    /// Default: 30 seconds
    pub timeout: Duration,
}

const DEFAULT_DENIED_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "ncat", "netcat", "ssh", "scp", "sftp", "ftp", "telnet", "rsync",
    "sudo", "su", "doas", "chroot", "mount", "dd", "python", "perl", "ruby", "node", "deno", "php",
    "lua", "awk", "gawk", "sh", "bash", "zsh", "dash", "ksh", "env", "eval", "exec", "source",
    "xargs", "nohup", "timeout", "busybox",
];

impl Default for ShellSandboxConfig {
    fn default() -> Self {
        Self {
            tool_names: vec!["shell".to_string()],
            workspace: std::env::temp_dir().join("delve-workspace"),
            denied_commands: DEFAULT_DENIED_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ShellSandboxConfig {
    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    #[must_use]
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.tool_names.contains(&name) {
            self.tool_names.push(name);
        }
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_denied_command(mut self, command: impl Into<String>) -> Self {
        self.denied_commands.push(command.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.workspace.is_absolute() {
            return Err(ConfigError::invalid(
                "workspace",
                format!("'{}' is not an absolute path", self.workspace.display()),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Model Retry
// ============================================================================

/// Backoff policy for failed model calls.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ModelRetryConfig {
    /// Default: 2
    pub max_retries: u32,

    /// Default: 1 second
    pub base_delay: Duration,

    /// Default: 60 seconds
    pub max_delay: Duration,
}

impl Default for ModelRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ModelRetryConfig {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-indexed): `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        exponential_delay(self.base_delay, self.max_delay, attempt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay", "must not exceed max_delay"));
        }
        Ok(())
    }
}

fn exponential_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let delay_ms = base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(max_ms);
    Duration::from_millis(delay_ms)
}

// ============================================================================
// Agent Config
// ============================================================================

/// Every configuration section of one agent.
///
/// [`AgentBuilder::with_config`](crate::AgentBuilder::with_config) turns this
/// into the standard interceptor chain and hook set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AgentConfig {
    pub eviction: EvictionConfig,
    pub filesystem: FilesystemConfig,
    /// Context editing is off unless configured.
    pub context_editing: Option<ContextEditingConfig>,
    pub retry: RetryConfig,
    pub summarization: SummarizationConfig,
    pub tool_call_limit: ToolCallLimitConfig,
    pub approvals: ApprovalConfig,
    /// Shell sandboxing is off unless configured.
    pub shell_sandbox: Option<ShellSandboxConfig>,
    pub model_retry: ModelRetryConfig,
}

impl AgentConfig {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            eviction: EvictionConfig::default(),
            filesystem: FilesystemConfig::default(),
            context_editing: None,
            retry,
            summarization: SummarizationConfig::default(),
            tool_call_limit: ToolCallLimitConfig::default(),
            approvals: ApprovalConfig::default(),
            shell_sandbox: None,
            model_retry: ModelRetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    #[must_use]
    pub fn with_filesystem(mut self, filesystem: FilesystemConfig) -> Self {
        self.filesystem = filesystem;
        self
    }

    #[must_use]
    pub fn with_context_editing(mut self, context_editing: ContextEditingConfig) -> Self {
        self.context_editing = Some(context_editing);
        self
    }

    #[must_use]
    pub fn with_summarization(mut self, summarization: SummarizationConfig) -> Self {
        self.summarization = summarization;
        self
    }

    #[must_use]
    pub fn with_tool_call_limit(mut self, limit: ToolCallLimitConfig) -> Self {
        self.tool_call_limit = limit;
        self
    }

    #[must_use]
    pub fn with_approvals(mut self, approvals: ApprovalConfig) -> Self {
        self.approvals = approvals;
        self
    }

    #[must_use]
    pub fn with_shell_sandbox(mut self, sandbox: ShellSandboxConfig) -> Self {
        self.shell_sandbox = Some(sandbox);
        self
    }

    #[must_use]
    pub fn with_model_retry(mut self, model_retry: ModelRetryConfig) -> Self {
        self.model_retry = model_retry;
        self
    }

    /// Validate every section, stopping at the first error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.eviction.validate()?;
        if let Some(context_editing) = &self.context_editing {
            context_editing.validate()?;
        }
        self.retry.validate()?;
        self.summarization.validate()?;
        self.tool_call_limit.validate()?;
        if let Some(sandbox) = &self.shell_sandbox {
            sandbox.validate()?;
        }
        self.model_retry.validate()
    }
}
