use tokio_util::sync::CancellationToken;

use crate::process::ActionProcess;
use crate::{ExecError, Result};

// ─── ExecOutput ───────────────────────────────────────────────────────────

/// Captured output of a successful action run.
#[derive(Debug, Default, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Run `command` once with `input` on stdin, bound to `cancel`.
///
/// Succeeds only when the input was fully written, stdin closed, and the
/// process exited with status 0. Any failure after the process started, and
/// any cancellation, kills the process before returning.
///
/// # Example
///
/// ```rust,ignore
/// let token = CancellationToken::new();
/// let out = action_exec::run("cat", br#"{"id":"..."}"#, &token).await?;
/// assert!(out.stdout.starts_with('{'));
/// ```
pub async fn run(command: &str, input: &[u8], cancel: &CancellationToken) -> Result<ExecOutput> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }

    let mut process = ActionProcess::spawn(command)?;
    tracing::debug!(program = %process.program(), "action process started");

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        res = process.drive(input) => res,
    };

    if outcome.is_err() {
        process.kill().await;
    }
    outcome
}

// ─── Tests ────────────────────────────────────────────────────────────────
