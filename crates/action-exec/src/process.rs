use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::{ExecError, ExecOutput, Result};

// ─── ActionProcess ────────────────────────────────────────────────────────

/// A running action command.
///
/// The work item is written to stdin as a single line, then stdin is closed.
/// Stdout lines are logged at debug level and collected; stderr is drained
/// into a shared buffer by a background task and surfaced on exit errors.
pub(crate) struct ActionProcess {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_task: Option<JoinHandle<String>>,
    stderr_task: Option<JoinHandle<()>>,
    stderr_buf: Arc<Mutex<String>>,
}

impl ActionProcess {
    /// Spawn `command`, split naively on whitespace into program + args.
    ///
    /// No shell quoting is applied: `sh -c 'a b'` becomes four tokens.
    pub(crate) fn spawn(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ExecError::EmptyCommand)?.to_string();

        let mut cmd = Command::new(&program);
        cmd.args(parts);
        Self::from_command(program, cmd)
    }

    fn from_command(program: String, mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();

        let stdout_task = child.stdout.take().map(|stdout| {
            let program = program.clone();
            tokio::spawn(async move {
                let mut collected = String::new();
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(program = %program, "stdout: {line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        Ok(Self {
            program,
            child,
            stdin,
            stdout_task,
            stderr_task,
            stderr_buf,
        })
    }

    pub(crate) fn program(&self) -> &str {
        &self.program
    }

    /// Write `input` as one line and flush.
    pub(crate) async fn send_input(&mut self, input: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ExecError::Stdin(std::io::ErrorKind::BrokenPipe.into()))?;

        stdin.write_all(input).await.map_err(ExecError::Stdin)?;
        if !input.ends_with(b"\n") {
            stdin.write_all(b"\n").await.map_err(ExecError::Stdin)?;
        }
        stdin.flush().await.map_err(ExecError::Stdin)?;
        Ok(())
    }

    /// Close stdin, signalling end of input.
    pub(crate) fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Feed the input, wait for exit and collect both output streams.
    pub(crate) async fn drive(&mut self, input: &[u8]) -> Result<ExecOutput> {
        self.send_input(input).await?;
        self.close_stdin();

        let status = self.child.wait().await?;

        let stdout = match self.stdout_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        let stderr = self.stderr_snapshot();

        match exit_error(status, &stderr) {
            Some(err) => Err(err),
            None => Ok(ExecOutput { stdout, stderr }),
        }
    }

    fn stderr_snapshot(&self) -> String {
        self.stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Kill the process and stop the readers (best-effort).
    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
        if let Some(task) = self.stdout_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

fn exit_error(status: ExitStatus, stderr: &str) -> Option<ExecError> {
    if status.success() {
        return None;
    }
    let stderr = stderr.to_string();
    Some(match status.code() {
        Some(code) => ExecError::Exit { code, stderr },
        None => ExecError::Signal { stderr },
    })
}
