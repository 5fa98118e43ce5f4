//! Connection profiles
//!
//! Typed profile model, per-kind validation, the persisted record shape and
//! the registry that owns the saved set.

mod record;
mod registry;
pub mod types;
mod upstream;
mod validation;

pub use record::{ProfileRecord, RecordError};
pub use registry::ConnectionRegistry;
pub use types::{
    default_shell_path, ConnectionProfile, ConnectionStatus, LocalParams, MonitorParams,
    RawParams, SerialFlowControl, SerialParams, SerialParity, SshAuth, SshParams, TelnetParams,
    TransportKind, TransportParams,
};
pub use upstream::{StaticUpstreamSource, UpstreamInfo, UpstreamSource};
pub use validation::{ValidationError, MAX_LOGIN_DELAY_MS};
