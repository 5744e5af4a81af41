use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("action command is empty")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write action input: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process exited with code {code}{}", stderr_suffix(.stderr))]
    Exit { code: i32, stderr: String },

    #[error("process terminated by signal{}", stderr_suffix(.stderr))]
    Signal { stderr: String },

    #[error("execution cancelled")]
    Cancelled,
}

impl ExecError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nstderr: {stderr}")
    }
}
