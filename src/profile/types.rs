//! Connection profile types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TerminalError;

/// The closed set of transports a profile can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Ssh,
    Telnet,
    Raw,
    Serial,
    Local,
    Monitor,
}

impl TransportKind {
    pub const ALL: [TransportKind; 6] = [
        TransportKind::Ssh,
        TransportKind::Telnet,
        TransportKind::Raw,
        TransportKind::Serial,
        TransportKind::Local,
        TransportKind::Monitor,
    ];

    /// Tag stored in the profile record
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Telnet => "telnet",
            Self::Raw => "raw",
            Self::Serial => "serial",
            Self::Local => "local",
            Self::Monitor => "monitor",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ssh => "SSH",
            Self::Telnet => "Telnet",
            Self::Raw => "Raw TCP",
            Self::Serial => "Serial",
            Self::Local => "Local Shell",
            Self::Monitor => "Stream Monitor",
        }
    }

    /// Monitor sessions never write to a transport
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Monitor)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for TransportKind {
    type Err = TerminalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "telnet" => Ok(Self::Telnet),
            "raw" | "tcp" => Ok(Self::Raw),
            "serial" => Ok(Self::Serial),
            "local" | "process" => Ok(Self::Local),
            "monitor" => Ok(Self::Monitor),
            other => Err(TerminalError::UnsupportedKind(other.to_string())),
        }
    }
}

/// Profile connection status (never persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ConnectionFailed,
}

/// SSH credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SshAuth {
    Password {
        #[serde(default)]
        password: String,
    },
    /// Private key from a file or pasted inline
    Key {
        #[serde(default)]
        key_path: String,
        #[serde(default)]
        key_content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl Default for SshAuth {
    fn default() -> Self {
        Self::Password {
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshParams {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth: SshAuth,
    #[serde(default = "default_ssh_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    30
}

impl Default for SshParams {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            auth: SshAuth::default(),
            connect_timeout_secs: default_ssh_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelnetParams {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_telnet_port")]
    pub port: u16,
    /// Sent after the login delay when non-empty
    #[serde(default)]
    pub username: String,
    /// Sent after a second delay when non-empty
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_login_delay")]
    pub login_delay_ms: u64,
}

fn default_telnet_port() -> u16 {
    23
}

fn default_login_delay() -> u64 {
    1000
}

impl Default for TelnetParams {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_telnet_port(),
            username: String::new(),
            password: String::new(),
            login_delay_ms: default_login_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParams {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialParity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialParams {
    #[serde(default = "default_serial_port")]
    pub port_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// 5..=8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: SerialParity,
    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub flow_control: SerialFlowControl,
    #[serde(default = "default_serial_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_serial_timeout")]
    pub write_timeout_ms: u64,
    /// Assert Data Terminal Ready after open
    #[serde(default = "default_true")]
    pub dtr: bool,
    /// Assert Request To Send after open
    #[serde(default = "default_true")]
    pub rts: bool,
}

fn default_serial_port() -> String {
    #[cfg(windows)]
    {
        "COM1".to_string()
    }

    #[cfg(not(windows))]
    {
        "/dev/ttyS0".to_string()
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_serial_timeout() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            port_name: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: SerialParity::None,
            stop_bits: default_stop_bits(),
            flow_control: SerialFlowControl::None,
            read_timeout_ms: default_serial_timeout(),
            write_timeout_ms: default_serial_timeout(),
            dtr: true,
            rts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalParams {
    #[serde(default)]
    pub executable: String,
    /// Empty means inherit the current directory
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl Default for LocalParams {
    fn default() -> Self {
        Self {
            executable: default_shell_path(),
            working_directory: String::new(),
            arguments: Vec::new(),
        }
    }
}

/// Platform shell used for new local profiles
pub fn default_shell_path() -> String {
    #[cfg(unix)]
    if let Ok(shell) = std::env::var("SHELL") {
        if std::path::Path::new(&shell).exists() {
            return shell;
        }
    }

    #[cfg(windows)]
    {
        "cmd.exe".to_string()
    }

    #[cfg(not(windows))]
    {
        "/bin/sh".to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorParams {
    /// Id of the upstream data-source connection
    #[serde(default)]
    pub upstream_id: String,
    /// Display name captured when the upstream was picked
    #[serde(default)]
    pub upstream_name: String,
}

/// Kind-specific parameters. The variant is the transport kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum TransportParams {
    Ssh(SshParams),
    Telnet(TelnetParams),
    Raw(RawParams),
    Serial(SerialParams),
    Local(LocalParams),
    Monitor(MonitorParams),
}

impl TransportParams {
    /// Defaults for a new profile of `kind`
    pub fn default_for(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Ssh => Self::Ssh(SshParams::default()),
            TransportKind::Telnet => Self::Telnet(TelnetParams::default()),
            TransportKind::Raw => Self::Raw(RawParams::default()),
            TransportKind::Serial => Self::Serial(SerialParams::default()),
            TransportKind::Local => Self::Local(LocalParams::default()),
            TransportKind::Monitor => Self::Monitor(MonitorParams::default()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Ssh(_) => TransportKind::Ssh,
            Self::Telnet(_) => TransportKind::Telnet,
            Self::Raw(_) => TransportKind::Raw,
            Self::Serial(_) => TransportKind::Serial,
            Self::Local(_) => TransportKind::Local,
            Self::Monitor(_) => TransportKind::Monitor,
        }
    }

    /// Short description of where this profile connects to
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ssh(p) => format!("{}@{}:{}", p.username, p.host, p.port),
            Self::Telnet(p) => format!("{}:{}", p.host, p.port),
            Self::Raw(p) => format!("{}:{}", p.host, p.port),
            Self::Serial(p) => format!("{} @ {} baud", p.port_name, p.baud_rate),
            Self::Local(p) => p.executable.clone(),
            Self::Monitor(p) if p.upstream_name.is_empty() => p.upstream_id.clone(),
            Self::Monitor(p) => p.upstream_name.clone(),
        }
    }

    /// Serialize only the kind-specific object (the `configurationJson` blob)
    pub fn to_configuration_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Ssh(p) => serde_json::to_string(p),
            Self::Telnet(p) => serde_json::to_string(p),
            Self::Raw(p) => serde_json::to_string(p),
            Self::Serial(p) => serde_json::to_string(p),
            Self::Local(p) => serde_json::to_string(p),
            Self::Monitor(p) => serde_json::to_string(p),
        }
    }

    /// Rebuild parameters from a kind tag and its `configurationJson` blob
    pub fn from_configuration_json(
        kind: TransportKind,
        json: &str,
    ) -> Result<Self, serde_json::Error> {
        let json = if json.trim().is_empty() { "{}" } else { json };
        Ok(match kind {
            TransportKind::Ssh => Self::Ssh(serde_json::from_str(json)?),
            TransportKind::Telnet => Self::Telnet(serde_json::from_str(json)?),
            TransportKind::Raw => Self::Raw(serde_json::from_str(json)?),
            TransportKind::Serial => Self::Serial(serde_json::from_str(json)?),
            TransportKind::Local => Self::Local(serde_json::from_str(json)?),
            TransportKind::Monitor => Self::Monitor(serde_json::from_str(json)?),
        })
    }
}

/// A saved terminal endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Empty until the registry assigns one
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub params: TransportParams,
    #[serde(default)]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default = "default_width")]
    pub terminal_width: u16,
    #[serde(default = "default_height")]
    pub terminal_height: u16,
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn default_width() -> u16 {
    80
}

fn default_height() -> u16 {
    24
}

impl ConnectionProfile {
    /// Unsaved draft with defaults for `kind`
    pub fn new(kind: TransportKind) -> Self {
        Self {
            id: String::new(),
            name: format!("New {} Connection", kind.label()),
            description: String::new(),
            params: TransportParams::default_for(kind),
            last_connected: None,
            terminal_width: default_width(),
            terminal_height: default_height(),
            auto_reconnect: false,
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.params.kind()
    }
}
