//! Monitor pseudo-connection
//!
//! No I/O happens here. Connecting resolves the referenced upstream and
//! produces status notices; the reader idles until the session is closed.

use tokio::task::JoinSet;

use super::{ConnectContext, Connected, ReadOutcome, TransportError, TransportHandle};
use crate::profile::MonitorParams;
use crate::session::MessageKind;

pub async fn connect_monitor(
    params: &MonitorParams,
    ctx: &ConnectContext,
) -> Result<Connected, TransportError> {
    let mut notices = Vec::new();

    let display_name = if params.upstream_name.is_empty() {
        params.upstream_id.clone()
    } else {
        params.upstream_name.clone()
    };

    match &ctx.upstreams {
        Some(source) => {
            let upstreams = source.list_upstreams().await;
            match upstreams.iter().find(|u| u.id == params.upstream_id) {
                Some(upstream) if upstream.connected => notices.push((
                    MessageKind::Info,
                    format!("Monitoring {} ({})", upstream.name, upstream.provider_label),
                )),
                Some(upstream) => notices.push((
                    MessageKind::Warning,
                    format!("Upstream {} is not connected", upstream.name),
                )),
                None => notices.push((
                    MessageKind::Warning,
                    format!("Upstream {} not found", display_name),
                )),
            }
        }
        None => notices.push((
            MessageKind::Warning,
            format!("No upstream source available to resolve {}", display_name),
        )),
    }

    notices.push((
        MessageKind::Info,
        "Monitor sessions are read-only; live stream data is not forwarded".to_string(),
    ));

    let token = ctx.token.clone();
    let mut readers = JoinSet::new();
    readers.spawn(async move {
        token.cancelled().await;
        ReadOutcome::Cancelled
    });

    Ok(Connected::new(TransportHandle::Monitor, readers).with_notices(notices))
}
