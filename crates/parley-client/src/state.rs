//! View state owned by the store task.
//!
//! [`ViewState`] holds everything the renderer can see plus the per-channel
//! cursors. It is mutated only from inside [`crate::store::ViewStateStore`];
//! the renderer receives immutable [`ViewSnapshot`]s.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use parley_shared::types::{
    Channel, ChannelId, FriendRequest, FriendRequestId, Message, MessageId, Username,
};

use crate::cursor::CursorTracker;
use crate::merge::{merge_into, tail_id};

/// What the rendering layer is shown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub channels: Vec<Channel>,
    pub active_channel: Option<ChannelId>,
    /// Messages of the active channel, ascending by id.
    pub messages: Vec<Message>,
    /// Members of the active channel.
    pub members: BTreeSet<Username>,
    pub friend_requests: Vec<FriendRequest>,
    pub visible: bool,
}

#[derive(Debug, Default)]
pub struct ViewState {
    channels: Vec<Channel>,
    active: Option<ChannelId>,
    messages: HashMap<ChannelId, Vec<Message>>,
    members: HashMap<ChannelId, BTreeSet<Username>>,
    friend_requests: Vec<FriendRequest>,
    visible: bool,
    cursors: CursorTracker,
}

impl ViewState {
    pub fn new(visible: bool) -> Self {
        Self {
            visible,
            ..Self::default()
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn active(&self) -> Option<ChannelId> {
        self.active
    }

    pub fn messages(&self, channel: ChannelId) -> &[Message] {
        self.messages.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn members(&self, channel: ChannelId) -> Option<&BTreeSet<Username>> {
        self.members.get(&channel)
    }

    pub fn friend_requests(&self) -> &[FriendRequest] {
        &self.friend_requests
    }

    pub fn friend_request(&self, id: FriendRequestId) -> Option<&FriendRequest> {
        self.friend_requests.iter().find(|r| r.id == id)
    }

    /// `sinceId` for the next delta fetch of `channel`.
    pub fn cursor(&self, channel: ChannelId) -> MessageId {
        self.cursors.get(channel)
    }

    pub fn set_channels(&mut self, channels: Vec<Channel>) -> bool {
        if self.channels == channels {
            return false;
        }
        self.channels = channels;
        true
    }

    pub fn set_active(&mut self, channel: ChannelId) -> bool {
        let changed = self.active != Some(channel);
        self.active = Some(channel);
        changed
    }

    pub fn set_visible(&mut self, visible: bool) -> bool {
        let changed = self.visible != visible;
        self.visible = visible;
        changed
    }

    pub fn set_members(&mut self, channel: ChannelId, members: BTreeSet<Username>) -> bool {
        if self.members.get(&channel) == Some(&members) {
            return false;
        }
        self.members.insert(channel, members);
        true
    }

    pub fn set_friend_requests(&mut self, requests: Vec<FriendRequest>) -> bool {
        if self.friend_requests == requests {
            return false;
        }
        self.friend_requests = requests;
        true
    }

    /// Merge a fetched delta and advance the cursor past it. Returns how many
    /// messages were new.
    pub fn apply_delta(&mut self, channel: ChannelId, delta: Vec<Message>) -> usize {
        let log = self.messages.entry(channel).or_default();
        let added = merge_into(log, delta);
        self.cursors.advance(channel, tail_id(log));
        added
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let (messages, members) = match self.active {
            Some(channel) => (
                self.messages(channel).to_vec(),
                self.members(channel).cloned().unwrap_or_default(),
            ),
            None => (Vec::new(), BTreeSet::new()),
        };
        ViewSnapshot {
            channels: self.channels.clone(),
            active_channel: self.active,
            messages,
            members,
            friend_requests: self.friend_requests.clone(),
            visible: self.visible,
        }
    }
}
