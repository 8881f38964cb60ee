use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How to launch a completion CLI.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_prefix: String,
    /// Written to the child's stdin, which is then closed.
    pub stdin_data: Option<String>,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }

    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }
}

/// Kills the child's whole process group if the future owning it is dropped
/// before the child exits (e.g. when a stage deadline fires).
struct GroupGuard {
    pgid: Option<i32>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

/// Read `stream` to EOF, one line at a time.
///
/// Invalid UTF-8 is replaced rather than ending the read early. A read
/// error keeps the lines collected so far.
async fn collect_lines<R, F>(stream: R, mut on_line: F) -> Vec<String>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                on_line(&line);
                lines.push(line);
            }
            Err(e) => {
                warn!(error = %e, "failed to read child output");
                break;
            }
        }
    }
    lines
}

/// Spawn a child process, feed it stdin, and collect its output line by line.
///
/// The child runs in its own process group on Unix. Dropping the returned
/// future kills the group, so callers bound it with `tokio::time::timeout`.
pub async fn spawn_and_stream(config: ProcessConfig) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .current_dir(&config.working_dir)
        .stdin(if config.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Process(format!("failed to spawn '{}': {e}", config.command)))?;

    let pid = child
        .id()
        .ok_or_else(|| Error::Process("child has no pid".into()))?;
    let mut guard = GroupGuard {
        pgid: Some(pid as i32),
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Process("child stderr not captured".into()))?;

    let prefix_out = config.log_prefix.clone();
    let prefix_err = config.log_prefix;

    let stdout_task = tokio::spawn(async move {
        collect_lines(stdout, |line| debug!("[{prefix_out}] {line}")).await
    });

    let stderr_task = tokio::spawn(async move {
        collect_lines(stderr, |line| warn!("[{prefix_err}] {line}")).await
    });

    if let (Some(data), Some(mut stdin)) = (config.stdin_data, child.stdin.take()) {
        // A child that exits without reading stdin closes the pipe early.
        if let Err(e) = stdin.write_all(data.as_bytes()).await {
            warn!(error = %e, "failed to write child stdin");
        }
        drop(stdin);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Process(format!("wait error: {e}")))?;
    guard.disarm();

    let stdout_lines = stdout_task
        .await
        .map_err(|e| Error::Process(format!("stdout reader failed: {e}")))?;
    let stderr_lines = stderr_task
        .await
        .map_err(|e| Error::Process(format!("stderr reader failed: {e}")))?;

    let (exit_code, signal) = extract_exit_info(&status);

    Ok(ProcessOutput {
        exit_code,
        signal,
        stdout_lines,
        stderr_lines,
    })
}

fn extract_exit_info(status: &std::process::ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (128 + sig, Some(sig));
        }
    }
    (-1, None)
}
