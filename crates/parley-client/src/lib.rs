pub mod config;
pub mod cursor;
pub mod directory;
pub mod error;
pub mod events;
pub mod inflight;
pub mod merge;
pub mod poll;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

pub use crate::config::ClientConfig;
pub use crate::error::{ClientError, Result};
pub use crate::events::{Notice, ViewEvent};
pub use crate::remote::{HttpRemoteLog, RemoteLogClient};
#[cfg(any(test, feature = "test-util"))]
pub use crate::remote::InMemoryRemoteLog;
pub use crate::session::{SessionProvider, StaticSession};
pub use crate::state::ViewSnapshot;
pub use crate::store::{SyncHandle, ViewStateStore};

use crate::scheduler::TokioScheduler;

/// Install the global tracing subscriber. Logs go to stderr; `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_shared=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Spawn a store on the current runtime with real timers and return the
/// handle and event stream that talk to it.
pub fn spawn_store(
    remote: Arc<dyn RemoteLogClient>,
    session: Arc<dyn SessionProvider>,
    config: &ClientConfig,
) -> (SyncHandle, mpsc::UnboundedReceiver<ViewEvent>) {
    let (store, handle, events) =
        ViewStateStore::new(remote, session, Box::new(TokioScheduler::new()), config);
    tokio::spawn(store.run());
    (handle, events)
}
