//! Local subprocess connector
//!
//! The child runs with piped stdio in its own process group so teardown can
//! take down everything it started. Stdout becomes `received` messages,
//! stderr becomes `error` messages; whichever stream closes first ends the
//! session.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChunkAppender, ConnectContext, Connected, ReadOutcome, TransportError, TransportHandle};
use crate::profile::LocalParams;
use crate::session::MessageKind;

/// Handle to a running child process
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Child>,
}

impl ProcessHandle {
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin, kill the process tree and reap the child
    pub async fn terminate(&self) {
        self.stdin.lock().await.take();

        if let Some(pid) = self.pid {
            kill_process_group(pid).await;
        }

        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!("Child {:?} already gone: {}", self.pid, e);
        }
    }
}

/// Kill the entire process group - Unix version
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    debug!("Killing process group for PID {}", pid);

    // The child was spawned as its own group leader, so PGID == PID
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        debug!("SIGTERM to process group {} failed: {}", pid, e);
        return;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;

    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        // Usually the group already exited after SIGTERM
        debug!("SIGKILL to process group {} (may have already exited): {}", pid, e);
    }
}

/// Kill the process tree - Windows version
#[cfg(windows)]
async fn kill_process_group(pid: u32) {
    debug!("Killing process tree for PID {} (Windows)", pid);

    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn connect_process(
    params: &LocalParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    let mut command = Command::new(&params.executable);
    command
        .args(&params.arguments)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !params.working_directory.is_empty() {
        command.current_dir(&params.working_directory);
    }

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| TransportError::Spawn(format!("{}: {}", params.executable, e)))?;

    let pid = child.id();
    info!("Spawned {} (pid {:?})", params.executable, pid);

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::Spawn("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TransportError::Spawn("stderr not captured".to_string()))?;

    let mut readers = JoinSet::new();
    readers.spawn(pump(
        stdout,
        ChunkAppender::new(ctx.log.clone(), MessageKind::Received),
        ctx.token.clone(),
        ctx.read_buffer_size,
    ));
    readers.spawn(pump(
        stderr,
        ChunkAppender::new(ctx.log.clone(), MessageKind::Error),
        ctx.token.clone(),
        ctx.read_buffer_size,
    ));

    let handle = ProcessHandle {
        pid,
        stdin: Mutex::new(stdin),
        child: Mutex::new(child),
    };
    Ok(Connected::new(TransportHandle::Process(handle), readers))
}

async fn pump<R>(
    mut stream: R,
    mut appender: ChunkAppender,
    token: CancellationToken,
    buffer_size: usize,
) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];

    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => break ReadOutcome::Cancelled,
            result = stream.read(&mut buf) => match result {
                Ok(0) => break ReadOutcome::Eof,
                Ok(n) => appender.push(&buf[..n]),
                Err(e) => {
                    warn!("Process pipe read failed: {}", e);
                    break ReadOutcome::Failed(e.to_string());
                }
            },
        }
    };

    appender.flush();
    outcome
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::MessageLog;
    use std::sync::Arc;

    fn context() -> ConnectContext {
        ConnectContext::new(Arc::new(MessageLog::new("p")), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_cat_echo() {
        let ctx = context();
        let params = LocalParams {
            executable: "/bin/cat".to_string(),
            working_directory: String::new(),
            arguments: Vec::new(),
        };
        let connected = connect_process(&params, &ctx).await.unwrap();
        connected.handle.write(b"hello\n").await.unwrap();

        for _ in 0..100 {
            if ctx.log.text_of(MessageKind::Received).contains("hello") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ctx.log.text_of(MessageKind::Received).contains("hello"));

        ctx.token.cancel();
        connected.handle.teardown().await;
    }

    #[tokio::test]
    async fn test_stderr_is_error_kind() {
        let ctx = context();
        let params = LocalParams {
            executable: "/bin/sh".to_string(),
            working_directory: String::new(),
            arguments: vec!["-c".to_string(), "echo oops 1>&2".to_string()],
        };
        let mut connected = connect_process(&params, &ctx).await.unwrap();

        // Both pipes reach EOF once the shell exits
        while let Some(outcome) = connected.readers.join_next().await {
            assert_eq!(outcome.unwrap(), ReadOutcome::Eof);
        }
        assert_eq!(ctx.log.text_of(MessageKind::Error), "oops\n");
        connected.handle.teardown().await;
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context();
        let params = LocalParams {
            executable: "/bin/sh".to_string(),
            working_directory: dir.path().to_string_lossy().into_owned(),
            arguments: vec!["-c".to_string(), "pwd".to_string()],
        };
        let mut connected = connect_process(&params, &ctx).await.unwrap();
        while connected.readers.join_next().await.is_some() {}

        let output = ctx.log.text_of(MessageKind::Received);
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(output.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let ctx = context();
        let params = LocalParams {
            executable: "/definitely/not/here".to_string(),
            working_directory: String::new(),
            arguments: Vec::new(),
        };
        let result = connect_process(&params, &ctx).await;
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }
}
