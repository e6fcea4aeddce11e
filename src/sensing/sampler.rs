use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::models::ContextSnapshot;

/// Exit status a sampler helper uses to say the OS refused access
/// (accessibility / screen recording permission missing).
pub const PERMISSION_DENIED_EXIT_CODE: i32 = 77;

/// Why no context could be read. The recorder treats all of these as
/// "no new information".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SamplingError {
    #[error("permission to read the foreground window was denied")]
    PermissionDenied,
    #[error("foreground context unavailable: {0}")]
    Unavailable(String),
    #[error("context read timed out")]
    Timeout,
}

/// Reads the current foreground app/window/browser context.
#[async_trait]
pub trait ContextSampler: Send + Sync {
    async fn sample(&self) -> Result<ContextSnapshot, SamplingError>;
}

/// Runs an external helper (a small native program per platform) that
/// prints one JSON context object on stdout.
pub struct CommandSampler {
    program: String,
    args: Vec<String>,
}

impl CommandSampler {
    /// `argv[0]` is the program; the rest are passed through.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ContextSampler for CommandSampler {
    /// The helper is killed if this future is dropped, so a read abandoned
    /// by a timeout never keeps running next to the following one.
    async fn sample(&self) -> Result<ContextSnapshot, SamplingError> {
        let program = &self.program;
        let output = Command::new(program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| SamplingError::Unavailable(format!("failed to run {program}: {err}")))?;

        if output.status.code() == Some(PERMISSION_DENIED_EXIT_CODE) {
            return Err(SamplingError::PermissionDenied);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SamplingError::Unavailable(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_context(&output.stdout)
    }
}

/// Parses helper output. Empty output or `null` means "no foreground window".
pub fn parse_context(stdout: &[u8]) -> Result<ContextSnapshot, SamplingError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Err(SamplingError::Unavailable("no foreground window".into()));
    }

    let context: ContextSnapshot = serde_json::from_str(trimmed)
        .map_err(|err| SamplingError::Unavailable(format!("malformed sampler output: {err}")))?;

    if context.app.name.trim().is_empty() {
        return Err(SamplingError::Unavailable("sampler reported an empty app name".into()));
    }
    Ok(context)
}
