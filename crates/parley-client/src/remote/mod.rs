//! Access to the remote channel/message log.
//!
//! [`RemoteLogClient`] is the only way the engine talks to the service.
//! [`HttpRemoteLog`] speaks the JSON protocol over HTTP. `InMemoryRemoteLog`
//! keeps everything in process for tests and is only built for them or with
//! the `test-util` feature.

mod http;
#[cfg(any(test, feature = "test-util"))]
mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::warn;

use parley_shared::error::RemoteError;
use parley_shared::protocol::ChannelRecord;
use parley_shared::types::{
    CanonicalKey, Channel, ChannelId, FriendRequest, FriendRequestId, FriendRequestStatus,
    Message, MessageId, Username,
};

pub use http::HttpRemoteLog;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{FetchGate, InMemoryRemoteLog, RemoteCall};

/// Parameters of a channel to be created on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub created_by: Username,
    /// Members besides the creator, who is always added by the remote.
    pub members: Vec<Username>,
    pub direct_key: Option<CanonicalKey>,
}

#[async_trait]
pub trait RemoteLogClient: Send + Sync {
    /// Channels `user` created or belongs to, newest first.
    async fn fetch_channels_for(&self, user: &Username) -> Result<Vec<Channel>, RemoteError>;

    /// Messages of `channel` with an id strictly greater than `since`, in
    /// ascending id order.
    async fn fetch_messages(
        &self,
        channel: ChannelId,
        since: MessageId,
    ) -> Result<Vec<Message>, RemoteError>;

    /// Append a message. Local state is not touched; callers re-fetch to
    /// observe the authoritative entry.
    async fn post_message(
        &self,
        channel: ChannelId,
        sender: &Username,
        text: &str,
    ) -> Result<Message, RemoteError>;

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel, RemoteError>;

    async fn fetch_members(&self, channel: ChannelId) -> Result<BTreeSet<Username>, RemoteError>;

    async fn add_member(&self, channel: ChannelId, username: &Username) -> Result<(), RemoteError>;

    /// Friend requests sent by or addressed to `user`.
    async fn fetch_friend_requests(&self, user: &Username)
        -> Result<Vec<FriendRequest>, RemoteError>;

    async fn send_friend_request(
        &self,
        from: &Username,
        to: &Username,
    ) -> Result<FriendRequest, RemoteError>;

    /// Accept or decline a pending request.
    async fn respond_friend_request(
        &self,
        id: FriendRequestId,
        status: FriendRequestStatus,
    ) -> Result<FriendRequest, RemoteError>;
}

/// Decode a channel list as `viewer` sees it. A record that does not decode
/// is skipped so it cannot hide the rest of the list.
pub(crate) fn channels_from_records(
    records: Vec<ChannelRecord>,
    viewer: &Username,
) -> Vec<Channel> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id;
            match record.into_channel(viewer) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(
                        channel = %id,
                        viewer = %viewer,
                        error = %e,
                        "Skipping undecodable channel"
                    );
                    None
                }
            }
        })
        .collect()
}
