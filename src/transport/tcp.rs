//! Raw TCP and telnet connectors
//!
//! Both kinds share the socket handling. Telnet adds the option filter on
//! the read side and the timed login sequence after connect.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::telnet::TelnetFilter;
use super::{ChunkAppender, ConnectContext, Connected, ReadOutcome, TransportError, TransportHandle};
use crate::profile::{RawParams, TelnetParams};
use crate::session::MessageKind;

/// Write side of a TCP session
pub struct StreamSink {
    peer: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl StreamSink {
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Half-close; the socket is released when the sink drops
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} returned error: {}", self.peer, e);
        }
    }
}

pub async fn connect_raw(
    params: &RawParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    let (sink, readers) = open_stream(&params.host, params.port, ctx, false).await?;
    Ok(Connected::new(TransportHandle::Stream(sink), readers))
}

pub async fn connect_telnet(
    params: &TelnetParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    let (sink, readers) = open_stream(&params.host, params.port, ctx, true).await?;

    if !params.username.is_empty() {
        tokio::time::sleep(Duration::from_millis(params.login_delay_ms)).await;
        sink.write(format!("{}\r\n", params.username).as_bytes()).await?;
        debug!("Sent telnet login name to {}", sink.peer);

        if !params.password.is_empty() {
            tokio::time::sleep(Duration::from_millis(params.login_delay_ms)).await;
            sink.write(format!("{}\r\n", params.password).as_bytes()).await?;
            debug!("Sent telnet password to {}", sink.peer);
        }
    }

    Ok(Connected::new(TransportHandle::Stream(sink), readers))
}

async fn open_stream(
    host: &str,
    port: u16,
    ctx: &ConnectContext,
    telnet: bool,
) -> Result<(StreamSink, JoinSet<ReadOutcome>), TransportError> {
    let peer = format!("{}:{}", host, port);
    info!("Opening TCP connection to {}", peer);

    let stream = TcpStream::connect(&peer).await?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY on {}: {}", peer, e);
    }

    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    let mut readers = JoinSet::new();
    readers.spawn(read_loop(
        read_half,
        writer.clone(),
        telnet.then(TelnetFilter::new),
        ChunkAppender::new(ctx.log.clone(), MessageKind::Received),
        ctx.token.clone(),
        ctx.read_buffer_size,
    ));

    Ok((StreamSink { peer, writer }, readers))
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    mut filter: Option<TelnetFilter>,
    mut appender: ChunkAppender,
    token: CancellationToken,
    buffer_size: usize,
) -> ReadOutcome {
    let mut buf = vec![0u8; buffer_size.max(1)];

    let outcome = loop {
        let n = tokio::select! {
            _ = token.cancelled() => break ReadOutcome::Cancelled,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break ReadOutcome::Eof,
                Ok(n) => n,
                Err(e) => break ReadOutcome::Failed(e.to_string()),
            },
        };

        match filter.as_mut() {
            Some(filter) => {
                let filtered = filter.feed(&buf[..n]);
                if !filtered.replies.is_empty() {
                    let mut writer = writer.lock().await;
                    if let Err(e) = writer.write_all(&filtered.replies).await {
                        warn!("Failed to answer telnet negotiation: {}", e);
                    }
                }
                if !filtered.data.is_empty() {
                    appender.push(&filtered.data);
                }
            }
            None => appender.push(&buf[..n]),
        }
    };

    appender.flush();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageLog;
    use crate::transport::telnet::{DO, DONT, IAC, WILL, WONT};
    use tokio::net::TcpListener;

    fn context() -> ConnectContext {
        ConnectContext::new(Arc::new(MessageLog::new("test")), CancellationToken::new())
    }

    async fn wait_for_text(ctx: &ConnectContext, expected: &str) {
        for _ in 0..100 {
            if ctx.log.text_of(MessageKind::Received).contains(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "timed out waiting for {:?}, got {:?}",
            expected,
            ctx.log.text_of(MessageKind::Received)
        );
    }

    #[tokio::test]
    async fn test_raw_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"ready\n").await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let ctx = context();
        let params = RawParams {
            host: "127.0.0.1".to_string(),
            port,
        };
        let connected = connect_raw(&params, &ctx).await.unwrap();
        wait_for_text(&ctx, "ready").await;

        connected.handle.write(b"hello").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_remote_close_is_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let ctx = context();
        let params = RawParams {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut connected = connect_raw(&params, &ctx).await.unwrap();
        let outcome = connected.readers.join_next().await.unwrap().unwrap();
        assert_eq!(outcome, ReadOutcome::Eof);
    }

    #[tokio::test]
    async fn test_cancel_stops_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let ctx = context();
        let params = RawParams {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut connected = connect_raw(&params, &ctx).await.unwrap();
        ctx.token.cancel();
        let outcome = connected.readers.join_next().await.unwrap().unwrap();
        assert_eq!(outcome, ReadOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_telnet_negotiation_and_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(&[IAC, DO, 24, IAC, WILL, 1])
                .await
                .unwrap();
            socket.write_all(b"login: ").await.unwrap();

            // 6 reply bytes, then "admin\r\n" and "secret\r\n"
            let mut received = Vec::new();
            let mut buf = [0u8; 64];
            while received.len() < 6 + 7 + 8 {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        let ctx = context();
        let params = TelnetParams {
            host: "127.0.0.1".to_string(),
            port,
            username: "admin".to_string(),
            password: "secret".to_string(),
            login_delay_ms: 50,
        };
        let _connected = connect_telnet(&params, &ctx).await.unwrap();
        wait_for_text(&ctx, "login: ").await;

        let received = server.await.unwrap();
        let mut expected = vec![IAC, WONT, 24, IAC, DONT, 1];
        expected.extend_from_slice(b"admin\r\nsecret\r\n");
        assert_eq!(received, expected);
        assert_eq!(ctx.log.text_of(MessageKind::Received), "login: ");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ctx = context();
        let params = RawParams {
            host: "127.0.0.1".to_string(),
            port,
        };
        let result = connect_raw(&params, &ctx).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
