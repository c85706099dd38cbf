//! Headless model adapter.
//!
//! `HeadlessModel` implements [`ModelProvider`] by running a Claude-compatible
//! CLI in print mode (`-p`) with JSON output. Messages are flattened into a
//! single prompt; file edits made by the CLI's own tools land on disk and are
//! not reported back as tool calls.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ChatMessage, InvokeOptions, ModelProvider, ModelReply, Role};
use crate::util::with_timeout;
use crate::{mlog_debug, mlog_trace};

/// Tools withheld from the CLI when an invocation has tools disabled.
const EDITING_TOOLS: &str = "Edit Write MultiEdit Bash";

/// Internal struct for deserializing the CLI's JSON result.
#[derive(Debug, Deserialize)]
struct RawResult {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Model provider backed by a headless CLI process.
#[derive(Debug, Clone)]
pub struct HeadlessModel {
    /// Path to the CLI binary.
    binary: PathBuf,
    /// Extra arguments from the configured command.
    base_args: Vec<String>,
    /// Working directory for every invocation.
    cwd: PathBuf,
    timeout: Duration,
}

impl HeadlessModel {
    /// Build the adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelBinaryNotFound`] if the configured binary is not on PATH.
    pub fn from_config(config: &Config, cwd: &Path) -> Result<Self> {
        let mut parts = config.effective_command().split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_else(|| "claude".to_string());
        let binary = which::which(&program).map_err(|_| Error::ModelBinaryNotFound)?;
        Ok(Self {
            binary,
            base_args: parts.collect(),
            cwd: cwd.to_path_buf(),
            timeout: config.model_timeout(),
        })
    }

    /// Create an adapter with a specific binary path.
    pub fn with_binary(binary: PathBuf, cwd: &Path) -> Self {
        Self {
            binary,
            base_args: Vec::new(),
            cwd: cwd.to_path_buf(),
            timeout: Duration::from_secs(crate::config::DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Flatten a conversation into one prompt.
    ///
    /// System messages lead, then each turn is labelled with its role.
    pub fn render_prompt(messages: &[ChatMessage]) -> String {
        let mut sections = Vec::with_capacity(messages.len());
        for message in messages {
            let label = match message.role {
                Role::System => "## Instructions",
                Role::Human => "## Request",
                Role::Assistant => "## Previous answer",
            };
            sections.push(format!("{}\n\n{}", label, message.content.trim()));
        }
        sections.join("\n\n")
    }

    /// Build the argument list for one invocation.
    pub fn args(&self, prompt: &str, options: InvokeOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args.push("--output-format".to_string());
        args.push("json".to_string());
        if !options.tools {
            args.push("--disallowedTools".to_string());
            args.push(EDITING_TOOLS.to_string());
        }
        args
    }

    /// Parse the CLI's JSON result into a reply.
    pub fn parse_result(json_str: &str) -> Result<ModelReply> {
        let raw: RawResult = serde_json::from_str(json_str.trim())?;

        let failed = raw.is_error || raw.subtype.as_deref().is_some_and(|s| s != "success");
        if failed {
            let message = raw
                .error
                .or(raw.result)
                .unwrap_or_else(|| "unknown model error".to_string());
            return Err(Error::Model(message));
        }

        Ok(ModelReply::text(raw.result.unwrap_or_default()))
    }

    async fn run(&self, args: Vec<String>) -> Result<ModelReply> {
        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.cwd)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        mlog_trace!("[model] raw reply: {}", stdout);

        if let Ok(reply) = Self::parse_result(&stdout) {
            return Ok(reply);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!(
                    "model process exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Model(message));
        }

        // Plain-text success output
        Ok(ModelReply::text(stdout.trim()))
    }
}

#[async_trait]
impl ModelProvider for HeadlessModel {
    fn name(&self) -> &str {
        "headless"
    }

    async fn invoke(&self, messages: &[ChatMessage], options: InvokeOptions) -> Result<ModelReply> {
        let prompt = Self::render_prompt(messages);
        mlog_debug!(
            "[model] invoking {} with {} messages (tools={})",
            self.binary.display(),
            messages.len(),
            options.tools
        );
        with_timeout(self.timeout, self.run(self.args(&prompt, options))).await
    }
}
