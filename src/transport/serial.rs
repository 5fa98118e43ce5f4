//! Serial port connector
//!
//! serialport is a blocking API. The port is opened on the blocking pool,
//! read on a dedicated blocking task and written through a cloned handle.
//! The read timeout doubles as the cancellation poll interval.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ChunkAppender, ConnectContext, Connected, ReadOutcome, TransportError, TransportHandle};
use crate::profile::{SerialFlowControl, SerialParams, SerialParity};
use crate::session::MessageKind;

/// Write side of a serial session
pub struct SerialSink {
    port_name: String,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl SerialSink {
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))??;
        Ok(())
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

pub async fn connect_serial(
    params: &SerialParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    let params = params.clone();
    let port_name = params.port_name.clone();

    let (reader, writer) = tokio::task::spawn_blocking(move || open_port(&params))
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))??;

    info!("Serial port {} opened", port_name);

    let mut readers = JoinSet::new();
    let appender = ChunkAppender::new(ctx.log.clone(), MessageKind::Received);
    let token = ctx.token.clone();
    let buffer_size = ctx.read_buffer_size;
    readers.spawn_blocking(move || read_loop(reader, appender, token, buffer_size));

    let sink = SerialSink {
        port_name,
        port: Arc::new(Mutex::new(writer)),
    };
    Ok(Connected::new(TransportHandle::Serial(sink), readers))
}

/// Open and configure the device; returns (reader, writer) handles
fn open_port(
    params: &SerialParams,
) -> Result<(Box<dyn SerialPort>, Box<dyn SerialPort>), TransportError> {
    let mut port = serialport::new(&params.port_name, params.baud_rate)
        .data_bits(data_bits(params.data_bits))
        .parity(parity(params.parity))
        .stop_bits(stop_bits(params.stop_bits))
        .flow_control(flow_control(params.flow_control))
        .timeout(Duration::from_millis(params.read_timeout_ms.max(1)))
        .open()?;

    if let Err(e) = port.write_data_terminal_ready(params.dtr) {
        warn!("Failed to set DTR on {}: {}", params.port_name, e);
    }
    if params.flow_control != SerialFlowControl::Hardware {
        if let Err(e) = port.write_request_to_send(params.rts) {
            warn!("Failed to set RTS on {}: {}", params.port_name, e);
        }
    }

    let mut writer = port.try_clone()?;
    writer.set_timeout(Duration::from_millis(params.write_timeout_ms.max(1)))?;

    Ok((port, writer))
}

/// Read until cancelled, end of stream or a hard error. Read timeouts
/// only re-check the token.
fn read_loop<R: Read>(
    mut port: R,
    mut appender: ChunkAppender,
    token: CancellationToken,
    buffer_size: usize,
) -> ReadOutcome {
    let mut buf = vec![0u8; buffer_size.max(1)];

    let outcome = loop {
        if token.is_cancelled() {
            break ReadOutcome::Cancelled;
        }

        match port.read(&mut buf) {
            Ok(0) => break ReadOutcome::Eof,
            Ok(n) => appender.push(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                continue
            }
            Err(e) => break ReadOutcome::Failed(e.to_string()),
        }
    };

    appender.flush();
    outcome
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

fn parity(parity: SerialParity) -> Parity {
    match parity {
        SerialParity::None => Parity::None,
        SerialParity::Odd => Parity::Odd,
        SerialParity::Even => Parity::Even,
    }
}

fn flow_control(flow: SerialFlowControl) -> FlowControl {
    match flow {
        SerialFlowControl::None => FlowControl::None,
        SerialFlowControl::Software => FlowControl::Software,
        SerialFlowControl::Hardware => FlowControl::Hardware,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageLog;
    use std::collections::VecDeque;
    use std::io;

    /// Replays scripted reads; cancels the token once the script runs out
    struct ScriptedPort {
        reads: VecDeque<io::Result<Vec<u8>>>,
        token: CancellationToken,
        timeouts_after_script: usize,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    self.timeouts_after_script += 1;
                    if self.timeouts_after_script == 3 {
                        self.token.cancel();
                    }
                    Err(io::Error::new(ErrorKind::TimedOut, "timed out"))
                }
            }
        }
    }

    fn scripted(reads: Vec<io::Result<Vec<u8>>>) -> (ScriptedPort, CancellationToken) {
        let token = CancellationToken::new();
        let port = ScriptedPort {
            reads: reads.into(),
            token: token.clone(),
            timeouts_after_script: 0,
        };
        (port, token)
    }

    #[test]
    fn test_read_loop_stops_on_cancel_between_timeouts() {
        let log = Arc::new(MessageLog::new("s"));
        let (port, token) = scripted(vec![
            Ok(b"AT".to_vec()),
            Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
            Ok(b"OK".to_vec()),
        ]);
        let appender = ChunkAppender::new(log.clone(), MessageKind::Received);

        let outcome = read_loop(port, appender, token.clone(), 64);

        assert_eq!(outcome, ReadOutcome::Cancelled);
        assert!(token.is_cancelled());
        let text: String = log.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(text, "ATOK");
    }

    #[test]
    fn test_read_loop_eof_and_failure() {
        let log = Arc::new(MessageLog::new("s"));
        let (port, token) = scripted(vec![Ok(b"bye".to_vec()), Ok(Vec::new())]);
        let outcome = read_loop(
            port,
            ChunkAppender::new(log.clone(), MessageKind::Received),
            token,
            64,
        );
        assert_eq!(outcome, ReadOutcome::Eof);
        assert_eq!(log.len(), 1);

        let (port, token) = scripted(vec![Err(io::Error::new(
            ErrorKind::BrokenPipe,
            "device unplugged",
        ))]);
        let outcome = read_loop(
            port,
            ChunkAppender::new(log.clone(), MessageKind::Received),
            token,
            64,
        );
        assert!(matches!(outcome, ReadOutcome::Failed(m) if m.contains("unplugged")));
    }

    #[test]
    fn test_read_loop_cancelled_before_first_read() {
        let log = Arc::new(MessageLog::new("s"));
        let (port, token) = scripted(vec![Ok(b"never".to_vec())]);
        token.cancel();

        let outcome = read_loop(
            port,
            ChunkAppender::new(log.clone(), MessageKind::Received),
            token,
            64,
        );
        assert_eq!(outcome, ReadOutcome::Cancelled);
        assert!(log.is_empty());
    }

    #[test]
    fn test_framing_mapping() {
        assert_eq!(data_bits(7), DataBits::Seven);
        assert_eq!(data_bits(8), DataBits::Eight);
        assert_eq!(stop_bits(2), StopBits::Two);
        assert_eq!(parity(SerialParity::Even), Parity::Even);
        assert_eq!(flow_control(SerialFlowControl::Hardware), FlowControl::Hardware);
    }

    #[tokio::test]
    async fn test_missing_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let params = SerialParams {
            port_name: dir.path().join("ttyNOPE").to_string_lossy().into_owned(),
            ..SerialParams::default()
        };
        let ctx = ConnectContext::new(Arc::new(MessageLog::new("s")), CancellationToken::new());

        let result = connect_serial(&params, &ctx).await;
        assert!(result.is_err());
        assert!(ctx.log.is_empty());
    }
}
