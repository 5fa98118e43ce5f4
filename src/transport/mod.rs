//! Transport connectors
//!
//! One connector per transport kind. Every connector returns a
//! [`Connected`]: the write-side [`TransportHandle`] plus the reader tasks
//! that feed the session's message log. Readers stop when the session's
//! cancellation token fires or their stream ends.
//!
//! | kind    | readers                        | teardown                         |
//! |---------|--------------------------------|----------------------------------|
//! | ssh     | channel owner task             | close channel, disconnect client |
//! | telnet  | socket reader + option filter  | shutdown write half, drop socket |
//! | raw     | socket reader                  | shutdown write half, drop socket |
//! | serial  | blocking reader thread         | drop port handles                |
//! | local   | stdout + stderr pumps          | kill process group, reap child   |
//! | monitor | idle until cancelled           | nothing                          |

mod decode;
mod error;
mod monitor;
mod process;
mod serial;
mod tcp;
pub mod telnet;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::profile::{SshParams, TransportParams, UpstreamSource};
use crate::session::{MessageKind, MessageLog};
use crate::ssh::{ShellExit, SshClient, SshShell};

pub use decode::{find_utf8_safe_boundary, Utf8ChunkDecoder};
pub use error::TransportError;
pub use process::ProcessHandle;
pub use serial::SerialSink;
pub use tcp::StreamSink;

/// Default read buffer size per reader
pub const DEFAULT_READ_BUFFER: usize = 8192;

/// How a reader task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Remote side or process closed the stream
    Eof,
    Failed(String),
    /// Stopped by the session's cancellation token
    Cancelled,
}

/// Everything a connector needs from the session being opened
pub struct ConnectContext {
    pub log: Arc<MessageLog>,
    pub token: CancellationToken,
    pub read_buffer_size: usize,
    pub upstreams: Option<Arc<dyn UpstreamSource>>,
    pub cols: u16,
    pub rows: u16,
}

impl ConnectContext {
    pub fn new(log: Arc<MessageLog>, token: CancellationToken) -> Self {
        Self {
            log,
            token,
            read_buffer_size: DEFAULT_READ_BUFFER,
            upstreams: None,
            cols: 80,
            rows: 24,
        }
    }

    pub fn with_upstreams(mut self, upstreams: Arc<dyn UpstreamSource>) -> Self {
        self.upstreams = Some(upstreams);
        self
    }

    pub fn with_geometry(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_read_buffer(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

/// Result of a successful connect
pub struct Connected {
    pub handle: TransportHandle,
    pub readers: JoinSet<ReadOutcome>,
    /// Messages to append once the session is announced
    pub notices: Vec<(MessageKind, String)>,
}

impl Connected {
    pub fn new(handle: TransportHandle, readers: JoinSet<ReadOutcome>) -> Self {
        Self {
            handle,
            readers,
            notices: Vec::new(),
        }
    }

    pub fn with_notices(mut self, notices: Vec<(MessageKind, String)>) -> Self {
        self.notices = notices;
        self
    }
}

/// Write side of an open transport
pub enum TransportHandle {
    Ssh(SshShell),
    /// Raw TCP and telnet
    Stream(StreamSink),
    Serial(SerialSink),
    Process(ProcessHandle),
    Monitor,
}

impl TransportHandle {
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Ssh(shell) => Ok(shell.write(data).await?),
            Self::Stream(sink) => sink.write(data).await,
            Self::Serial(sink) => sink.write(data).await,
            Self::Process(process) => process.write(data).await,
            Self::Monitor => Ok(()),
        }
    }

    /// Window change; only ssh has a PTY to resize
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError> {
        match self {
            Self::Ssh(shell) => Ok(shell.resize(cols, rows).await?),
            _ => Ok(()),
        }
    }

    /// Release transport resources. Readers must already be stopped.
    pub async fn teardown(&self) {
        match self {
            Self::Ssh(shell) => shell.disconnect().await,
            Self::Stream(sink) => sink.shutdown().await,
            Self::Serial(sink) => debug!("Closing serial port {}", sink.port_name()),
            Self::Process(process) => process.terminate().await,
            Self::Monitor => {}
        }
    }
}

/// Open the transport described by `params`
pub async fn connect(
    params: &TransportParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    match params {
        TransportParams::Ssh(p) => connect_ssh(p, ctx).await,
        TransportParams::Telnet(p) => tcp::connect_telnet(p, ctx).await,
        TransportParams::Raw(p) => tcp::connect_raw(p, ctx).await,
        TransportParams::Serial(p) => serial::connect_serial(p, ctx).await,
        TransportParams::Local(p) => process::connect_process(p, ctx).await,
        TransportParams::Monitor(p) => monitor::connect_monitor(p, ctx).await,
    }
}

async fn connect_ssh(params: &SshParams, ctx: &ConnectContext) -> Result<Connected, TransportError> {
    let handle = SshClient::new(params.clone()).connect().await?;
    let (shell, pump) = SshShell::open(handle, ctx.cols, ctx.rows).await?;

    let mut appender = ChunkAppender::new(ctx.log.clone(), MessageKind::Received);
    let token = ctx.token.clone();

    let mut readers = JoinSet::new();
    readers.spawn(async move {
        let exit = pump.run(token, |data| appender.push(data)).await;
        appender.flush();
        match exit {
            ShellExit::Cancelled => ReadOutcome::Cancelled,
            ShellExit::Eof => ReadOutcome::Eof,
            ShellExit::Failed(e) => ReadOutcome::Failed(e.to_string()),
        }
    });

    Ok(Connected::new(TransportHandle::Ssh(shell), readers))
}

/// Decodes byte chunks and appends them to a session log
pub(crate) struct ChunkAppender {
    log: Arc<MessageLog>,
    kind: MessageKind,
    decoder: Utf8ChunkDecoder,
}

impl ChunkAppender {
    pub(crate) fn new(log: Arc<MessageLog>, kind: MessageKind) -> Self {
        Self {
            log,
            kind,
            decoder: Utf8ChunkDecoder::new(),
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        if let Some(text) = self.decoder.decode(bytes) {
            debug!("Read {} bytes ({:?})", bytes.len(), self.kind);
            self.log.append(self.kind, text);
        }
    }

    /// Emit a trailing partial character at end of stream
    pub(crate) fn flush(&mut self) {
        if let Some(text) = self.decoder.finish() {
            self.log.append(self.kind, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appender_keeps_characters_whole() {
        let log = Arc::new(MessageLog::new("t"));
        let mut appender = ChunkAppender::new(log.clone(), MessageKind::Received);
        let bytes = "añb".as_bytes();

        appender.push(&bytes[..2]);
        appender.push(&bytes[2..]);
        appender.flush();

        let messages = log.snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "a");
        assert_eq!(messages[1].content, "ñb");
    }

    #[tokio::test]
    async fn test_monitor_handle_accepts_everything() {
        let handle = TransportHandle::Monitor;
        handle.write(b"ignored").await.unwrap();
        handle.resize(100, 40).await.unwrap();
        handle.teardown().await;
    }
}
