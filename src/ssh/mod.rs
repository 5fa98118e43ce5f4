//! SSH module - russh client and interactive shell
//!
//! `client` performs the handshake and authentication, `session` owns the
//! shell channel once a PTY has been allocated.

mod client;
mod error;
mod session;

pub use client::{host_key_fingerprint, load_private_key, ClientHandler, SshClient};
pub use error::SshError;
pub use session::{ShellCommand, ShellExit, ShellPump, SshShell};
