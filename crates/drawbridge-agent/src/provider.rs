//! Agent providers: how to launch each supported CLI and how to read it.

use std::sync::Arc;

use drawbridge_config::{AgentConfig, ProviderKind};

use crate::error::AgentError;
use crate::stream::{ClaudeStreamParser, CodexStreamParser, PlainLineParser, StreamParser};

/// A fully resolved process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// An external coding agent the invoker can drive.
pub trait AgentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the command line for one annotation.
    fn command(&self, prompt: &str, annotation_id: &str) -> CommandSpec;

    /// Fresh parser for one run's stdout.
    fn parser(&self) -> Box<dyn StreamParser>;

    /// Whether the agent reports its own `init` event.
    fn emits_init(&self) -> bool {
        false
    }
}

/// Claude Code in headless stream-json mode.
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    program: String,
    extra_args: Vec<String>,
}

impl ClaudeProvider {
    pub fn new(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "claude".to_string()),
            extra_args,
        }
    }
}

impl AgentProvider for ClaudeProvider {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn command(&self, prompt: &str, _annotation_id: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(["-p", prompt])
            .args(["--output-format", "stream-json", "--verbose"])
            .args(["--permission-mode", "acceptEdits"])
            .args(self.extra_args.iter().cloned())
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(ClaudeStreamParser::new())
    }

    fn emits_init(&self) -> bool {
        true
    }
}

/// Codex CLI `exec --json`.
#[derive(Debug, Clone)]
pub struct CodexProvider {
    program: String,
    extra_args: Vec<String>,
}

impl CodexProvider {
    pub fn new(program: Option<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.unwrap_or_else(|| "codex".to_string()),
            extra_args,
        }
    }
}

impl AgentProvider for CodexProvider {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn command(&self, prompt: &str, _annotation_id: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(["exec", "--json", "--full-auto"])
            .args(self.extra_args.iter().cloned())
            .arg(prompt)
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(CodexStreamParser::new())
    }
}

/// Any executable. Receives the prompt on stdin and in `DRAWBRIDGE_PROMPT`.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl AgentProvider for CommandProvider {
    fn name(&self) -> &'static str {
        "command"
    }

    fn command(&self, prompt: &str, annotation_id: &str) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(self.args.iter().cloned())
            .env("DRAWBRIDGE_PROMPT", prompt)
            .env("DRAWBRIDGE_ANNOTATION_ID", annotation_id)
            .stdin(prompt)
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(PlainLineParser::new())
    }
}

/// Build the provider selected in `[agent]`.
pub fn provider_from_config(config: &AgentConfig) -> Result<Arc<dyn AgentProvider>, AgentError> {
    let provider: Arc<dyn AgentProvider> = match config.provider {
        ProviderKind::Claude => Arc::new(ClaudeProvider::new(
            config.command.clone(),
            config.args.clone(),
        )),
        ProviderKind::Codex => Arc::new(CodexProvider::new(
            config.command.clone(),
            config.args.clone(),
        )),
        ProviderKind::Command => {
            let program = config
                .command
                .clone()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    AgentError::Config("agent.command is required for the command provider".into())
                })?;
            Arc::new(CommandProvider::new(program, config.args.clone()))
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_command_line() {
        let provider = ClaudeProvider::new(None, vec!["--model".into(), "sonnet".into()]);
        let spec = provider.command("fix the button", "a1");
        assert_eq!(spec.program, "claude");
        assert_eq!(spec.args[0..2], ["-p".to_string(), "fix the button".to_string()]);
        assert!(spec.args.contains(&"stream-json".to_string()));
        assert_eq!(spec.args[spec.args.len() - 2..], ["--model".to_string(), "sonnet".to_string()]);
        assert!(spec.stdin.is_none());
        assert!(provider.emits_init());
    }

    #[test]
    fn test_codex_prompt_is_last() {
        let spec = CodexProvider::new(Some("/opt/codex".into()), Vec::new()).command("p", "a1");
        assert_eq!(spec.program, "/opt/codex");
        assert_eq!(spec.args, vec!["exec", "--json", "--full-auto", "p"]);
    }

    #[test]
    fn test_command_provider_env_and_stdin() {
        let spec = CommandProvider::new("my-agent", vec!["--fast".into()]).command("prompt", "a9");
        assert_eq!(spec.args, vec!["--fast"]);
        assert_eq!(spec.stdin.as_deref(), Some("prompt"));
        assert!(spec.env.contains(&("DRAWBRIDGE_ANNOTATION_ID".into(), "a9".into())));
        assert!(spec.env.contains(&("DRAWBRIDGE_PROMPT".into(), "prompt".into())));
    }

    #[test]
    fn test_provider_from_config() {
        let mut config = AgentConfig::default();
        assert_eq!(provider_from_config(&config).unwrap().name(), "claude");

        config.provider = ProviderKind::Command;
        assert!(matches!(provider_from_config(&config), Err(AgentError::Config(_))));

        config.command = Some("./agent.sh".into());
        assert_eq!(provider_from_config(&config).unwrap().name(), "command");
    }
}
