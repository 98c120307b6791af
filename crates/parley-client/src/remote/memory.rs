use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};

use parley_shared::error::RemoteError;
use parley_shared::protocol::{ChannelRecord, MessageRecord, WireChannelKind};
use parley_shared::types::{
    Channel, ChannelId, FriendRequest, FriendRequestId, FriendRequestStatus, Message, MessageId,
    Username,
};

use super::{channels_from_records, NewChannel, RemoteLogClient};

/// A call observed by [`InMemoryRemoteLog`], in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchChannels(Username),
    FetchMessages { channel: ChannelId, since: MessageId },
    PostMessage { channel: ChannelId, text: String },
    CreateChannel { name: String },
    FetchMembers(ChannelId),
    AddMember { channel: ChannelId, username: Username },
    FetchFriendRequests(Username),
    SendFriendRequest { from: Username, to: Username },
    RespondFriendRequest { id: FriendRequestId, status: FriendRequestStatus },
}

impl RemoteCall {
    pub fn is_message_fetch(&self) -> bool {
        matches!(self, Self::FetchMessages { .. })
    }
}

/// Holds one fetch until released.
#[derive(Debug)]
pub struct FetchGate {
    tx: watch::Sender<bool>,
}

impl FetchGate {
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    channels: BTreeMap<ChannelId, ChannelRecord>,
    messages: BTreeMap<ChannelId, Vec<MessageRecord>>,
    friend_requests: BTreeMap<FriendRequestId, FriendRequest>,
    calls: Vec<RemoteCall>,
    gates: HashMap<ChannelId, VecDeque<watch::Receiver<bool>>>,
    member_gates: HashMap<ChannelId, VecDeque<watch::Receiver<bool>>>,
    failures: HashMap<ChannelId, VecDeque<RemoteError>>,
    deleted: HashSet<ChannelId>,
    offline: bool,
    unique_direct_keys: bool,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::NetworkUnavailable("remote is offline".into()));
        }
        Ok(())
    }

    fn check_channel(&self, channel: ChannelId) -> Result<(), RemoteError> {
        if self.deleted.contains(&channel) || !self.channels.contains_key(&channel) {
            return Err(RemoteError::NotFound(format!("channel {channel}")));
        }
        Ok(())
    }

    fn append(&mut self, channel: ChannelId, sender: &Username, text: &str) -> MessageRecord {
        let record = MessageRecord {
            id: MessageId(self.next_id()),
            sender: sender.to_string(),
            text: text.to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
        };
        self.messages.entry(channel).or_default().push(record.clone());
        record
    }
}

/// In-memory [`RemoteLogClient`] for tests and early wiring.
///
/// Ids come from one shared counter, so message ids increase per channel the
/// way the real service's autoincrement does. Every response takes one extra
/// scheduler turn to arrive, which lets concurrent callers interleave between
/// a read and a following write.
#[derive(Default)]
pub struct InMemoryRemoteLog {
    inner: Mutex<Inner>,
}

impl InMemoryRemoteLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject a second direct channel for the same pair with
    /// [`RemoteError::Conflict`], like a store with a uniqueness constraint.
    pub async fn enforce_unique_direct_keys(&self) {
        self.inner.lock().await.unique_direct_keys = true;
    }

    /// Create a channel without recording a call.
    pub async fn seed_channel(&self, channel: NewChannel) -> Result<Channel, RemoteError> {
        let mut inner = self.inner.lock().await;
        insert_channel(&mut inner, &channel).into_channel(&channel.created_by)
    }

    /// Append a message as if another client had posted it.
    pub async fn seed_message(&self, channel: ChannelId, sender: &Username, text: &str) -> MessageId {
        let mut inner = self.inner.lock().await;
        inner.append(channel, sender, text).id
    }

    /// The next message fetch for `channel` waits until the gate is released.
    pub async fn hold_next_fetch(&self, channel: ChannelId) -> FetchGate {
        let (tx, rx) = watch::channel(false);
        self.inner
            .lock()
            .await
            .gates
            .entry(channel)
            .or_default()
            .push_back(rx);
        FetchGate { tx }
    }

    /// The answer to the next members fetch for `channel` is read when the
    /// call is made but held until the gate is released.
    pub async fn hold_next_members(&self, channel: ChannelId) -> FetchGate {
        let (tx, rx) = watch::channel(false);
        self.inner
            .lock()
            .await
            .member_gates
            .entry(channel)
            .or_default()
            .push_back(rx);
        FetchGate { tx }
    }

    /// The next message fetch for `channel` fails with `error`.
    pub async fn fail_next_fetch(&self, channel: ChannelId, error: RemoteError) {
        self.inner
            .lock()
            .await
            .failures
            .entry(channel)
            .or_default()
            .push_back(error);
    }

    pub async fn delete_channel(&self, channel: ChannelId) {
        self.inner.lock().await.deleted.insert(channel);
    }

    pub async fn set_offline(&self, offline: bool) {
        self.inner.lock().await.offline = offline;
    }

    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn message_fetches(&self) -> Vec<RemoteCall> {
        self.calls()
            .await
            .into_iter()
            .filter(RemoteCall::is_message_fetch)
            .collect()
    }

    pub async fn channels_with_key(&self, key: &str) -> Vec<ChannelId> {
        self.inner
            .lock()
            .await
            .channels
            .values()
            .filter(|c| c.canonical_key.as_deref() == Some(key))
            .map(|c| c.id)
            .collect()
    }

    async fn record(&self, call: RemoteCall) {
        self.inner.lock().await.calls.push(call);
    }
}

async fn wait_for(gate: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = gate else {
        return;
    };
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn insert_channel(inner: &mut Inner, channel: &NewChannel) -> ChannelRecord {
    let mut members: BTreeSet<String> = channel.members.iter().map(|m| m.to_string()).collect();
    members.insert(channel.created_by.to_string());

    let id = ChannelId(inner.next_id());
    let record = ChannelRecord {
        id,
        name: channel.name.clone(),
        created_by: channel.created_by.to_string(),
        members: members.into_iter().collect(),
        kind: if channel.direct_key.is_some() {
            WireChannelKind::Direct
        } else {
            WireChannelKind::Group
        },
        canonical_key: channel.direct_key.as_ref().map(|k| k.to_string()),
    };
    inner.channels.insert(id, record.clone());
    record
}

#[async_trait]
impl RemoteLogClient for InMemoryRemoteLog {
    async fn fetch_channels_for(&self, user: &Username) -> Result<Vec<Channel>, RemoteError> {
        self.record(RemoteCall::FetchChannels(user.clone())).await;
        let records: Vec<ChannelRecord> = {
            let inner = self.inner.lock().await;
            inner.check_online()?;
            inner
                .channels
                .values()
                .rev()
                .filter(|c| !inner.deleted.contains(&c.id))
                .filter(|c| {
                    c.created_by == user.as_str() || c.members.iter().any(|m| m == user.as_str())
                })
                .cloned()
                .collect()
        };
        tokio::task::yield_now().await;
        Ok(channels_from_records(records, user))
    }

    async fn fetch_messages(
        &self,
        channel: ChannelId,
        since: MessageId,
    ) -> Result<Vec<Message>, RemoteError> {
        self.record(RemoteCall::FetchMessages { channel, since }).await;

        let gate = self
            .inner
            .lock()
            .await
            .gates
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);
        wait_for(gate).await;

        let records = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            if let Some(err) = inner.failures.get_mut(&channel).and_then(VecDeque::pop_front) {
                return Err(err);
            }
            inner.check_channel(channel)?;
            inner
                .messages
                .get(&channel)
                .map(|all| all.iter().filter(|m| m.id > since).cloned().collect())
                .unwrap_or_else(Vec::new)
        };
        tokio::task::yield_now().await;
        records.into_iter().map(|r| r.into_message(channel)).collect()
    }

    async fn post_message(
        &self,
        channel: ChannelId,
        sender: &Username,
        text: &str,
    ) -> Result<Message, RemoteError> {
        self.record(RemoteCall::PostMessage {
            channel,
            text: text.to_string(),
        })
        .await;
        let record = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            inner.check_channel(channel)?;
            if text.trim().is_empty() {
                return Err(RemoteError::Validation("sender and text required".into()));
            }
            inner.append(channel, sender, text)
        };
        tokio::task::yield_now().await;
        record.into_message(channel)
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel, RemoteError> {
        self.record(RemoteCall::CreateChannel {
            name: channel.name.clone(),
        })
        .await;
        let record = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            if channel.name.trim().is_empty() {
                return Err(RemoteError::Validation("name required".into()));
            }
            if let Some(key) = &channel.direct_key {
                let taken = inner.channels.values().any(|c| {
                    !inner.deleted.contains(&c.id) && c.canonical_key.as_deref() == Some(key.as_str())
                });
                if inner.unique_direct_keys && taken {
                    return Err(RemoteError::Conflict(format!("{key} already exists")));
                }
            }
            insert_channel(&mut inner, &channel)
        };
        tokio::task::yield_now().await;
        record.into_channel(&channel.created_by)
    }

    async fn fetch_members(&self, channel: ChannelId) -> Result<BTreeSet<Username>, RemoteError> {
        self.record(RemoteCall::FetchMembers(channel)).await;
        // Read at request time; a held answer arrives with what was current then.
        let (members, gate) = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            inner.check_channel(channel)?;
            let members: BTreeSet<Username> = inner
                .channels
                .get(&channel)
                .map(|c| c.members.iter().filter_map(|m| Username::new(m).ok()).collect())
                .unwrap_or_default();
            let gate = inner
                .member_gates
                .get_mut(&channel)
                .and_then(VecDeque::pop_front);
            (members, gate)
        };
        wait_for(gate).await;
        tokio::task::yield_now().await;
        Ok(members)
    }

    async fn add_member(&self, channel: ChannelId, username: &Username) -> Result<(), RemoteError> {
        self.record(RemoteCall::AddMember {
            channel,
            username: username.clone(),
        })
        .await;
        {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            inner.check_channel(channel)?;
            if let Some(record) = inner.channels.get_mut(&channel) {
                if !record.members.iter().any(|m| m == username.as_str()) {
                    record.members.push(username.to_string());
                    record.members.sort();
                }
            }
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn fetch_friend_requests(
        &self,
        user: &Username,
    ) -> Result<Vec<FriendRequest>, RemoteError> {
        self.record(RemoteCall::FetchFriendRequests(user.clone())).await;
        let requests = {
            let inner = self.inner.lock().await;
            inner.check_online()?;
            inner
                .friend_requests
                .values()
                .filter(|r| &r.from == user || &r.to == user)
                .cloned()
                .collect()
        };
        tokio::task::yield_now().await;
        Ok(requests)
    }

    async fn send_friend_request(
        &self,
        from: &Username,
        to: &Username,
    ) -> Result<FriendRequest, RemoteError> {
        self.record(RemoteCall::SendFriendRequest {
            from: from.clone(),
            to: to.clone(),
        })
        .await;
        let request = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            if from == to {
                return Err(RemoteError::Validation("cannot befriend yourself".into()));
            }
            let request = FriendRequest {
                id: FriendRequestId(inner.next_id()),
                from: from.clone(),
                to: to.clone(),
                status: FriendRequestStatus::Pending,
            };
            inner.friend_requests.insert(request.id, request.clone());
            request
        };
        tokio::task::yield_now().await;
        Ok(request)
    }

    async fn respond_friend_request(
        &self,
        id: FriendRequestId,
        status: FriendRequestStatus,
    ) -> Result<FriendRequest, RemoteError> {
        self.record(RemoteCall::RespondFriendRequest { id, status }).await;
        let request = {
            let mut inner = self.inner.lock().await;
            inner.check_online()?;
            let request = inner
                .friend_requests
                .get_mut(&id)
                .ok_or_else(|| RemoteError::NotFound(format!("friend request {id}")))?;
            request.status = request
                .status
                .resolve(status)
                .map_err(|e| RemoteError::Validation(e.to_string()))?;
            request.clone()
        };
        tokio::task::yield_now().await;
        Ok(request)
    }
}
