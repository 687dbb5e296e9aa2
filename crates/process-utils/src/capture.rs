use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::NoWindowExt;

/// Number of trailing lines kept per pipe.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
        }
    }
}

/// Build a `tokio::process::Command` for `program` with the no-window flag set.
pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Exit status and captured output of a finished child process.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub elapsed: Duration,
    /// The last lines the child wrote to stdout.
    pub stdout_tail: Vec<String>,
    /// The last lines the child wrote to stderr.
    pub stderr_tail: Vec<String>,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stderr tail joined into one diagnostic string.
    pub fn diagnostic(&self) -> String {
        self.stderr_tail.join("\n")
    }
}

/// Spawn `command`, drain both pipes concurrently and wait for it to exit.
///
/// The child is killed if the returned future is dropped before completion.
pub async fn run_captured(command: &mut Command) -> std::io::Result<CapturedOutput> {
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout_lines, stderr_lines, status) = tokio::join!(
        read_lines(stdout, DIAGNOSTIC_TAIL_LINES),
        read_lines(stderr, DIAGNOSTIC_TAIL_LINES),
        child.wait(),
    );

    Ok(CapturedOutput {
        status: status?,
        elapsed: start.elapsed(),
        stdout_tail: stdout_lines,
        stderr_tail: stderr_lines,
    })
}

async fn read_lines<R>(reader: Option<R>, keep_last: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Vec::new();
    };

    let mut kept = std::collections::VecDeque::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::trace!(line = %line, "child output");
        if kept.len() == keep_last {
            kept.pop_front();
        }
        kept.push_back(line);
    }
    kept.into()
}
