use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DIRECT_KEY_PREFIX, DIRECT_KEY_SEPARATOR};
use crate::error::ValidationError;

// Server-assigned channel identifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned message identifier, strictly increasing within a channel.
///
/// `MessageId::ZERO` is the cursor value of a channel nothing has been seen
/// from yet; no real message carries it.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const ZERO: MessageId = MessageId(0);
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct FriendRequestId(pub u64);

impl std::fmt::Display for FriendRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-empty, trimmed account name.
///
/// The canonical-key separator is reserved, so a key built from two names
/// always splits back into exactly those two names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if trimmed.contains(DIRECT_KEY_SEPARATOR) {
            return Err(ValidationError::ReservedCharacter(DIRECT_KEY_SEPARATOR));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic identity of a two-party channel.
///
/// Built from the participants sorted lexicographically, so both sides of a
/// conversation derive the same key regardless of who asks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn for_pair(a: &Username, b: &Username) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{DIRECT_KEY_PREFIX}{lo}{DIRECT_KEY_SEPARATOR}{hi}"))
    }

    /// Rebuild a key received from the remote. Anything not shaped like a
    /// canonical key is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let (lo, hi) = raw
            .strip_prefix(DIRECT_KEY_PREFIX)?
            .split_once(DIRECT_KEY_SEPARATOR)?;
        let lo = Username::new(lo).ok()?;
        let hi = Username::new(hi).ok()?;
        let key = Self::for_pair(&lo, &hi);
        (key.0 == raw).then_some(key)
    }

    /// The participant that is not `me`, if `me` is one of the two.
    pub fn peer_of(&self, me: &Username) -> Option<Username> {
        let (lo, hi) = self
            .0
            .strip_prefix(DIRECT_KEY_PREFIX)?
            .split_once(DIRECT_KEY_SEPARATOR)?;
        if lo == me.as_str() {
            Username::new(hi).ok()
        } else if hi == me.as_str() {
            Username::new(lo).ok()
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of conversation a channel is, carried as an explicit
/// discriminant rather than inferred from its name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelKind {
    Direct { peer: Username, key: CanonicalKey },
    Group { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub created_by: Username,
    pub members: BTreeSet<Username>,
    pub kind: ChannelKind,
}

impl Channel {
    pub fn is_direct(&self) -> bool {
        matches!(self.kind, ChannelKind::Direct { .. })
    }

    pub fn canonical_key(&self) -> Option<&CanonicalKey> {
        match &self.kind {
            ChannelKind::Direct { key, .. } => Some(key),
            ChannelKind::Group { .. } => None,
        }
    }

    /// A channel is visible to the users who created it or belong to it.
    pub fn is_visible_to(&self, user: &Username) -> bool {
        &self.created_by == user || self.members.contains(user)
    }
}

/// A single chat message. Immutable once the remote has assigned its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub sender: Username,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Last message id acknowledged for a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub channel_id: ChannelId,
    pub last_seen_id: MessageId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl FriendRequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Move a pending request to `target`. Resolved requests never move again.
    pub fn resolve(self, target: FriendRequestStatus) -> Result<Self, ValidationError> {
        match (self, target) {
            (Self::Pending, Self::Accepted | Self::Declined) => Ok(target),
            _ => Err(ValidationError::RequestAlreadyResolved),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRequest {
    pub id: FriendRequestId,
    pub from: Username,
    pub to: Username,
    pub status: FriendRequestStatus,
}
