use tokio::sync::mpsc;

use parley_shared::types::ChannelId;

use crate::error::ClientError;
use crate::state::ViewSnapshot;

/// Events delivered to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    StateChanged(ViewSnapshot),
    Notice(Notice),
}

/// A failure the user should see. `channel` is set when it concerns one
/// channel only.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub channel: Option<ChannelId>,
    pub error: ClientError,
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state-changed",
            Self::Notice(_) => "notice",
        }
    }
}

pub fn emit_event(tx: &mpsc::UnboundedSender<ViewEvent>, event: ViewEvent) {
    let name = event.name();
    if tx.send(event).is_err() {
        tracing::error!(event = name, "Failed to emit event, renderer is gone");
    }
}
