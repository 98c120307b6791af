//! The view state store: one task that owns every piece of view state.
//!
//! Intents from the renderer arrive through a [`SyncHandle`]. Poll ticks and
//! remote call completions arrive on a second, internal queue. Each remote call
//! runs in its own spawned task and reports back exactly once, so state is
//! only ever touched between two awaits of [`ViewStateStore::run`] and no lock
//! guards it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::error::{RemoteError, ValidationError};
use parley_shared::types::{
    Channel, ChannelId, FriendRequest, FriendRequestId, FriendRequestStatus, Message, Username,
};

use crate::config::ClientConfig;
use crate::directory::ChannelDirectory;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, Notice, ViewEvent};
use crate::inflight::{FetchSequencer, FetchTicket};
use crate::poll::{PollScheduler, PollState, PollTick};
use crate::remote::RemoteLogClient;
use crate::scheduler::Scheduler;
use crate::session::SessionProvider;
use crate::state::{ViewSnapshot, ViewState};

/// User intents accepted by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Activate(ChannelId),
    Send(String),
    CreateChannel {
        name: String,
        members: Vec<Username>,
    },
    /// Add a member to the active channel.
    AddMember(Username),
    OpenDirect(Username),
    SetVisible(bool),
    RefreshChannels,
    SendFriendRequest(Username),
    RespondFriendRequest {
        id: FriendRequestId,
        status: FriendRequestStatus,
    },
    RefreshFriendRequests,
    Shutdown,
}

/// Cloneable sender of intents. Input-only validation happens here, so a
/// rejected intent never reaches the store.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<Intent>,
}

impl SyncHandle {
    fn dispatch(&self, intent: Intent) -> Result<()> {
        self.tx.send(intent).map_err(|_| ClientError::EngineClosed)
    }

    pub fn activate(&self, channel: ChannelId) -> Result<()> {
        self.dispatch(Intent::Activate(channel))
    }

    /// Post `text` to the active channel. Without an active channel this is a
    /// no-op.
    pub fn send(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        self.dispatch(Intent::Send(text.to_string()))
    }

    /// Create a group channel. Blank member names are dropped.
    pub fn create_channel(&self, name: &str, members: &[&str]) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let members = members
            .iter()
            .filter_map(|m| Username::new(m).ok())
            .collect();
        self.dispatch(Intent::CreateChannel {
            name: name.to_string(),
            members,
        })
    }

    pub fn add_member(&self, username: &str) -> Result<()> {
        self.dispatch(Intent::AddMember(Username::new(username)?))
    }

    pub fn open_direct(&self, peer: &str) -> Result<()> {
        self.dispatch(Intent::OpenDirect(Username::new(peer)?))
    }

    pub fn set_visible(&self, visible: bool) -> Result<()> {
        self.dispatch(Intent::SetVisible(visible))
    }

    pub fn refresh_channels(&self) -> Result<()> {
        self.dispatch(Intent::RefreshChannels)
    }

    pub fn send_friend_request(&self, to: &str) -> Result<()> {
        self.dispatch(Intent::SendFriendRequest(Username::new(to)?))
    }

    pub fn accept_friend_request(&self, id: FriendRequestId) -> Result<()> {
        self.dispatch(Intent::RespondFriendRequest {
            id,
            status: FriendRequestStatus::Accepted,
        })
    }

    pub fn decline_friend_request(&self, id: FriendRequestId) -> Result<()> {
        self.dispatch(Intent::RespondFriendRequest {
            id,
            status: FriendRequestStatus::Declined,
        })
    }

    pub fn refresh_friend_requests(&self) -> Result<()> {
        self.dispatch(Intent::RefreshFriendRequests)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.dispatch(Intent::Shutdown)
    }
}

/// Result of one remote call, reported back to the store task.
#[derive(Debug)]
enum Completion {
    Fetched {
        ticket: FetchTicket,
        result: std::result::Result<Vec<Message>, RemoteError>,
    },
    Posted {
        channel: ChannelId,
        result: std::result::Result<Message, RemoteError>,
    },
    Channels(Result<Vec<Channel>>),
    Created(Result<Channel>),
    Members {
        channel: ChannelId,
        seq: u64,
        result: std::result::Result<BTreeSet<Username>, RemoteError>,
    },
    MemberAdded {
        channel: ChannelId,
        result: std::result::Result<(), RemoteError>,
    },
    DirectResolved(Result<ChannelId>),
    FriendRequests(std::result::Result<Vec<FriendRequest>, RemoteError>),
    FriendRequestChanged(std::result::Result<FriendRequest, RemoteError>),
}

#[derive(Debug)]
enum Internal {
    Tick(PollTick),
    Done(Completion),
}

pub struct ViewStateStore {
    remote: Arc<dyn RemoteLogClient>,
    directory: ChannelDirectory,
    session: Arc<dyn SessionProvider>,
    state: ViewState,
    poller: PollScheduler,
    fetches: FetchSequencer<std::result::Result<Vec<Message>, RemoteError>>,
    /// Latest members fetch issued per channel; older answers are dropped.
    members_seq: HashMap<ChannelId, u64>,
    /// Channels whose NotFound/Unauthorized has already been surfaced.
    notified: HashSet<ChannelId>,
    intents: mpsc::UnboundedReceiver<Intent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: mpsc::UnboundedSender<ViewEvent>,
    /// Spawned remote calls that have not reported back.
    pending: usize,
    dirty: bool,
    started: bool,
}

impl ViewStateStore {
    /// Build a store and the handle and event stream that talk to it.
    ///
    /// Nothing happens until the store is driven by [`Self::run`] (or
    /// [`Self::settle`]); the first drive fetches the channel list and friend
    /// requests of the session user.
    pub fn new(
        remote: Arc<dyn RemoteLogClient>,
        session: Arc<dyn SessionProvider>,
        scheduler: Box<dyn Scheduler>,
        config: &ClientConfig,
    ) -> (Self, SyncHandle, mpsc::UnboundedReceiver<ViewEvent>) {
        let (intent_tx, intents) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let visible = !config.start_hidden;
        let tick_tx = internal_tx.clone();
        let poller = PollScheduler::new(
            scheduler,
            config.poll_interval,
            visible,
            Arc::new(move |tick| {
                // The store is gone once the queue is closed.
                let _ = tick_tx.send(Internal::Tick(tick));
            }),
        );

        let store = Self {
            directory: ChannelDirectory::new(remote.clone()),
            remote,
            session,
            state: ViewState::new(visible),
            poller,
            fetches: FetchSequencer::new(),
            members_seq: HashMap::new(),
            notified: HashSet::new(),
            intents,
            internal_tx,
            internal_rx,
            events,
            pending: 0,
            dirty: false,
            started: false,
        };
        (store, SyncHandle { tx: intent_tx }, events_rx)
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.state.snapshot()
    }

    pub fn poll_state(&self, channel: ChannelId) -> PollState {
        self.poller.state(channel)
    }

    /// Drive the store until [`SyncHandle::shutdown`] or until every handle
    /// is dropped.
    pub async fn run(mut self) {
        self.start();
        self.flush();

        loop {
            tokio::select! {
                intent = self.intents.recv() => {
                    match intent {
                        Some(Intent::Shutdown) => {
                            info!("Shutdown requested");
                            break;
                        }
                        Some(intent) => self.handle_intent(intent),
                        None => {
                            info!("All handles dropped, stopping");
                            break;
                        }
                    }
                }
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
            }
            self.flush();
        }

        self.poller.shutdown();
        info!("View state store stopped");
    }

    /// Apply every queued intent and event without waiting for anything.
    /// Returns `false` once a shutdown has been requested.
    pub fn drain(&mut self) -> bool {
        self.start();
        let mut running = true;
        loop {
            if let Ok(intent) = self.intents.try_recv() {
                if intent == Intent::Shutdown {
                    self.poller.shutdown();
                    running = false;
                } else if running {
                    self.handle_intent(intent);
                }
            } else if let Ok(event) = self.internal_rx.try_recv() {
                self.handle_internal(event);
            } else {
                break;
            }
            self.flush();
        }
        running
    }

    /// Like [`Self::drain`], then keep applying completions until no remote
    /// call is outstanding. A call that never completes keeps this waiting.
    pub async fn settle(&mut self) {
        while self.drain() && self.pending > 0 {
            match self.internal_rx.recv().await {
                Some(event) => {
                    self.handle_internal(event);
                    self.flush();
                }
                None => break,
            }
        }
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        match self.session.current_user() {
            Some(user) => info!(user = %user, "Starting view state store"),
            None => info!("Starting view state store without a session"),
        }
        self.refresh_channels();
        self.refresh_friend_requests();
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Activate(channel) => self.activate(channel),
            Intent::Send(text) => self.send(text),
            Intent::CreateChannel { name, members } => self.create_channel(name, members),
            Intent::AddMember(username) => self.add_member(username),
            Intent::OpenDirect(peer) => self.open_direct(peer),
            Intent::SetVisible(visible) => self.set_visible(visible),
            Intent::RefreshChannels => self.refresh_channels(),
            Intent::SendFriendRequest(to) => self.send_friend_request(to),
            Intent::RespondFriendRequest { id, status } => self.respond_friend_request(id, status),
            Intent::RefreshFriendRequests => self.refresh_friend_requests(),
            Intent::Shutdown => {}
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Tick(tick) => self.on_tick(tick),
            Internal::Done(completion) => {
                self.pending = self.pending.saturating_sub(1);
                self.on_completion(completion);
            }
        }
    }

    // --- Intents ---

    fn activate(&mut self, channel: ChannelId) {
        if self.poller.state(channel) == PollState::Halted {
            // Explicit re-activation retries a channel that failed for good.
            self.notified.remove(&channel);
        }

        let (catch_up, suspended) = self.poller.activate(channel);
        if let Some(previous) = suspended {
            self.fetches.invalidate(previous);
        }

        if self.state.set_active(channel) {
            info!(channel = %channel, "Channel activated");
            self.dirty = true;
            self.fetch_members(channel);
        }
        if let Some(channel) = catch_up {
            self.fetch(channel);
        }
    }

    fn set_visible(&mut self, visible: bool) {
        if self.state.set_visible(visible) {
            debug!(visible, "Visibility changed");
            self.dirty = true;
        }
        let (catch_up, suspended) = self.poller.set_visible(visible);
        if let Some(channel) = suspended {
            self.fetches.invalidate(channel);
        }
        if let Some(channel) = catch_up {
            self.fetch(channel);
        }
    }

    fn send(&mut self, text: String) {
        let Some(channel) = self.state.active() else {
            debug!("No active channel, message not sent");
            return;
        };
        let Some(sender) = self.session.current_user() else {
            debug!("No session, message not sent");
            return;
        };

        info!(channel = %channel, len = text.len(), "Sending message");
        let remote = self.remote.clone();
        self.spawn(async move {
            let result = remote.post_message(channel, &sender, &text).await;
            Completion::Posted { channel, result }
        });
    }

    fn create_channel(&mut self, name: String, members: Vec<Username>) {
        let Some(user) = self.session.current_user() else {
            self.notice(None, ValidationError::NoSession.into());
            return;
        };
        let directory = self.directory.clone();
        self.spawn(async move {
            Completion::Created(directory.create_group(&name, &user, members).await)
        });
    }

    fn add_member(&mut self, username: Username) {
        let Some(channel) = self.state.active() else {
            self.notice(None, ValidationError::NoActiveChannel.into());
            return;
        };
        // A direct channel is identified by its two participants.
        let direct = self
            .state
            .channels()
            .iter()
            .any(|c| c.id == channel && c.is_direct());
        if direct {
            self.notice(Some(channel), ValidationError::DirectMembership.into());
            return;
        }
        let remote = self.remote.clone();
        self.spawn(async move {
            let result = remote.add_member(channel, &username).await;
            Completion::MemberAdded { channel, result }
        });
    }

    fn open_direct(&mut self, peer: Username) {
        let Some(user) = self.session.current_user() else {
            self.notice(None, ValidationError::NoSession.into());
            return;
        };
        let directory = self.directory.clone();
        self.spawn(async move {
            Completion::DirectResolved(directory.resolve_direct(&user, &peer).await)
        });
    }

    fn refresh_channels(&mut self) {
        let Some(user) = self.session.current_user() else {
            debug!("No session, channel list not fetched");
            return;
        };
        let directory = self.directory.clone();
        self.spawn(async move { Completion::Channels(directory.list_channels_for(&user).await) });
    }

    fn send_friend_request(&mut self, to: Username) {
        let Some(from) = self.session.current_user() else {
            self.notice(None, ValidationError::NoSession.into());
            return;
        };
        if from == to {
            self.notice(None, ValidationError::SelfRequest.into());
            return;
        }
        let remote = self.remote.clone();
        self.spawn(async move {
            Completion::FriendRequestChanged(remote.send_friend_request(&from, &to).await)
        });
    }

    fn respond_friend_request(&mut self, id: FriendRequestId, status: FriendRequestStatus) {
        let Some(request) = self.state.friend_request(id) else {
            self.notice(None, ValidationError::UnknownRequest.into());
            return;
        };
        if let Err(e) = request.status.resolve(status) {
            self.notice(None, e.into());
            return;
        }
        let remote = self.remote.clone();
        self.spawn(async move {
            Completion::FriendRequestChanged(remote.respond_friend_request(id, status).await)
        });
    }

    fn refresh_friend_requests(&mut self) {
        let Some(user) = self.session.current_user() else {
            debug!("No session, friend requests not fetched");
            return;
        };
        let remote = self.remote.clone();
        self.spawn(async move {
            Completion::FriendRequests(remote.fetch_friend_requests(&user).await)
        });
    }

    // --- Polling ---

    fn on_tick(&mut self, tick: PollTick) {
        if !self.poller.accepts(tick) {
            debug!(channel = %tick.channel, epoch = tick.epoch, "Dropping stale tick");
            return;
        }
        if self.fetches.in_flight(tick.channel) > 0 {
            debug!(channel = %tick.channel, "Previous fetch still in flight, skipping tick");
            return;
        }
        debug!(channel = %tick.channel, "Poll tick");
        self.fetch(tick.channel);
    }

    /// Issue a delta fetch from the channel's cursor.
    fn fetch(&mut self, channel: ChannelId) {
        if self.poller.state(channel) == PollState::Halted {
            debug!(channel = %channel, "Channel halted, fetch skipped");
            return;
        }
        let ticket = self.fetches.issue(channel);
        let since = self.state.cursor(channel);
        debug!(channel = %channel, since = %since, seq = ticket.seq, "Fetching messages");

        let remote = self.remote.clone();
        self.spawn(async move {
            let result = remote.fetch_messages(channel, since).await;
            Completion::Fetched { ticket, result }
        });
    }

    fn fetch_members(&mut self, channel: ChannelId) {
        let seq = self.members_seq.entry(channel).or_default();
        *seq += 1;
        let seq = *seq;

        let remote = self.remote.clone();
        self.spawn(async move {
            let result = remote.fetch_members(channel).await;
            Completion::Members {
                channel,
                seq,
                result,
            }
        });
    }

    // --- Completions ---

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Fetched { ticket, result } => {
                if !self.fetches.is_current(&ticket) {
                    debug!(channel = %ticket.channel, seq = ticket.seq, "Discarding stale fetch");
                    return;
                }
                for (ticket, result) in self.fetches.complete(ticket, result) {
                    self.apply_fetch(ticket.channel, result);
                }
            }
            Completion::Posted { channel, result } => match result {
                Ok(message) => {
                    debug!(channel = %channel, id = %message.id, "Message accepted");
                    // The log is only updated from the authoritative delta.
                    if self.state.active() == Some(channel) {
                        self.fetch(channel);
                    }
                }
                Err(e) => self.intent_failure(Some(channel), e.into()),
            },
            Completion::Channels(result) => match result {
                Ok(channels) => {
                    debug!(count = channels.len(), "Channel list received");
                    let first = channels.first().map(|c| c.id);
                    if self.state.set_channels(channels) {
                        self.dirty = true;
                    }
                    if self.state.active().is_none() {
                        if let Some(first) = first {
                            self.activate(first);
                        }
                    }
                }
                Err(e) => self.sync_failure(None, e),
            },
            Completion::Created(result) => match result {
                Ok(_) => self.refresh_channels(),
                Err(e) => self.intent_failure(None, e),
            },
            Completion::Members {
                channel,
                seq,
                result,
            } => {
                if self.members_seq.get(&channel) != Some(&seq) {
                    debug!(channel = %channel, seq, "Discarding superseded members list");
                    return;
                }
                match result {
                    Ok(members) => {
                        if self.state.set_members(channel, members) {
                            self.dirty = true;
                        }
                    }
                    Err(e) => self.sync_failure(Some(channel), e.into()),
                }
            }
            Completion::MemberAdded { channel, result } => match result {
                Ok(()) => {
                    info!(channel = %channel, "Member added");
                    self.fetch_members(channel);
                }
                Err(e) => self.intent_failure(Some(channel), e.into()),
            },
            Completion::DirectResolved(result) => match result {
                Ok(channel) => {
                    self.refresh_channels();
                    self.activate(channel);
                }
                Err(e) => self.intent_failure(None, e),
            },
            Completion::FriendRequests(result) => match result {
                Ok(requests) => {
                    if self.state.set_friend_requests(requests) {
                        self.dirty = true;
                    }
                }
                Err(e) => self.sync_failure(None, e.into()),
            },
            Completion::FriendRequestChanged(result) => match result {
                Ok(request) => {
                    info!(id = %request.id, status = ?request.status, "Friend request updated");
                    self.refresh_friend_requests();
                }
                Err(e) => self.intent_failure(None, e.into()),
            },
        }
    }

    fn apply_fetch(
        &mut self,
        channel: ChannelId,
        result: std::result::Result<Vec<Message>, RemoteError>,
    ) {
        match result {
            Ok(delta) => {
                let received = delta.len();
                let added = self.state.apply_delta(channel, delta);
                debug!(
                    channel = %channel,
                    received,
                    added,
                    cursor = %self.state.cursor(channel),
                    "Delta merged"
                );
                if added > 0 && self.state.active() == Some(channel) {
                    self.dirty = true;
                }
            }
            Err(e) => self.sync_failure(Some(channel), e.into()),
        }
    }

    // --- Failures ---

    /// Failure of work the store started on its own. Transient errors are
    /// left for the next tick or refresh to retry.
    fn sync_failure(&mut self, channel: Option<ChannelId>, error: ClientError) {
        if let ClientError::Remote(remote) = &error {
            if remote.is_transient() {
                debug!(channel = ?channel, error = %remote, "Transient failure, retrying later");
                return;
            }
        }
        self.intent_failure(channel, error);
    }

    /// Failure of something the user asked for; always surfaced.
    fn intent_failure(&mut self, channel: Option<ChannelId>, error: ClientError) {
        let gone = matches!(&error, ClientError::Remote(remote) if remote.stops_polling());
        if let (Some(channel), true) = (channel, gone) {
            self.halt(channel, error);
            return;
        }
        warn!(channel = ?channel, error = %error, "Request failed");
        self.notice(channel, error);
    }

    /// Stop polling a channel the remote no longer serves. Surfaced once
    /// until the channel is explicitly re-activated.
    fn halt(&mut self, channel: ChannelId, error: ClientError) {
        self.poller.halt(channel);
        self.fetches.invalidate(channel);
        if self.notified.insert(channel) {
            warn!(channel = %channel, error = %error, "Channel unavailable, polling stopped");
            self.notice(Some(channel), error);
        }
    }

    fn notice(&self, channel: Option<ChannelId>, error: ClientError) {
        emit_event(&self.events, ViewEvent::Notice(Notice { channel, error }));
    }

    // --- Plumbing ---

    fn spawn<F>(&mut self, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        self.pending += 1;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let completion = call.await;
            let _ = tx.send(Internal::Done(completion));
        });
    }

    fn flush(&mut self) {
        if self.dirty {
            self.dirty = false;
            emit_event(&self.events, ViewEvent::StateChanged(self.state.snapshot()));
        }
    }
}
