//! SSH interactive shell
//!
//! Once the PTY and shell are granted the channel is moved into a single
//! owner task ([`ShellPump::run`]). Writes and resizes reach it as
//! [`ShellCommand`]s; output leaves it through the `on_data` callback.

use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Commands that can be sent to the channel owner task
#[derive(Debug)]
pub enum ShellCommand {
    /// Data to send to the remote shell, acknowledged once written
    Data(Vec<u8>, oneshot::Sender<Result<(), SshError>>),
    /// Resize the PTY (cols, rows)
    Resize(u16, u16),
    /// Close the channel
    Close,
}

/// How the channel owner task ended
#[derive(Debug)]
pub enum ShellExit {
    /// Stopped through the cancellation token
    Cancelled,
    /// The server sent EOF or closed the channel
    Eof,
    Failed(SshError),
}

/// Write side of an open shell plus the connection handle
pub struct SshShell {
    handle: Handle<ClientHandler>,
    cmd_tx: mpsc::Sender<ShellCommand>,
}

/// Read side: owns the channel until the session ends
pub struct ShellPump {
    channel: Channel<Msg>,
    cmd_rx: mpsc::Receiver<ShellCommand>,
}

impl SshShell {
    /// Request a PTY of the given geometry and start a shell
    pub async fn open(
        handle: Handle<ClientHandler>,
        cols: u16,
        rows: u16,
    ) -> Result<(SshShell, ShellPump), SshError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::ChannelError(format!("Failed to open channel: {}", e)))?;

        debug!("Channel opened, requesting PTY {}x{}", cols, rows);

        channel
            .request_pty(
                false,
                "xterm-256color",
                u32::from(cols),
                u32::from(rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SshError::ChannelError(format!("PTY request failed: {}", e)))?;

        debug!("PTY allocated, requesting shell");

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!("Interactive shell started");

        let (cmd_tx, cmd_rx) = mpsc::channel::<ShellCommand>(1024);

        Ok((SshShell { handle, cmd_tx }, ShellPump { channel, cmd_rx }))
    }

    /// Write bytes to the shell, waiting until the channel accepted them
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ShellCommand::Data(data.to_vec(), reply_tx))
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx.await.map_err(|_| SshError::Disconnected)?
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SshError> {
        self.cmd_tx
            .send(ShellCommand::Resize(cols, rows))
            .await
            .map_err(|_| SshError::Disconnected)
    }

    /// Close the channel (if the owner task still runs) and disconnect
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.try_send(ShellCommand::Close);
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect returned error: {}", e);
        }
    }
}

impl ShellPump {
    /// Channel owner loop
    pub async fn run<F>(mut self, token: CancellationToken, mut on_data: F) -> ShellExit
    where
        F: FnMut(&[u8]) + Send,
    {
        let channel = &mut self.channel;

        let exit = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = channel.eof().await;
                    let _ = channel.close().await;
                    break ShellExit::Cancelled;
                }

                Some(cmd) = self.cmd_rx.recv() => {
                    match cmd {
                        ShellCommand::Data(data, reply) => {
                            match channel.data(&data[..]).await {
                                Ok(()) => {
                                    let _ = reply.send(Ok(()));
                                }
                                Err(e) => {
                                    error!("Failed to send data to SSH channel: {}", e);
                                    let _ = reply.send(Err(SshError::ChannelError(e.to_string())));
                                    break ShellExit::Failed(SshError::ChannelError(e.to_string()));
                                }
                            }
                        }
                        ShellCommand::Resize(cols, rows) => {
                            if let Err(e) = channel
                                .window_change(u32::from(cols), u32::from(rows), 0, 0)
                                .await
                            {
                                warn!("Failed to resize PTY: {}", e);
                            } else {
                                debug!("PTY resized to {}x{}", cols, rows);
                            }
                        }
                        ShellCommand::Close => {
                            let _ = channel.eof().await;
                            let _ = channel.close().await;
                            break ShellExit::Cancelled;
                        }
                    }
                }

                msg = channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { data }) => on_data(&data[..]),
                        Some(ChannelMsg::ExtendedData { data, .. }) => on_data(&data[..]),
                        Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                            info!("SSH channel closed by server");
                            break ShellExit::Eof;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            info!("SSH shell exited with status {}", exit_status);
                        }
                        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                            info!("SSH shell exit signal {:?}", signal_name);
                        }
                        Some(_) => {}
                    }
                }
            }
        };

        debug!("SSH channel owner task terminated");
        exit
    }
}
