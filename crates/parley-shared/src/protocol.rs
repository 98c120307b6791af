//! JSON records exchanged with the remote message log service.
//!
//! Field names are camelCase on the wire. Records are converted into the
//! domain types of [`crate::types`] at the client boundary; anything that does
//! not validate becomes [`RemoteError::Decode`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::types::{
    CanonicalKey, Channel, ChannelId, ChannelKind, FriendRequest, FriendRequestId,
    FriendRequestStatus, Message, MessageId, Username,
};

/// Explicit channel discriminant carried on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireChannelKind {
    Direct,
    #[default]
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub kind: WireChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
}

impl ChannelRecord {
    /// Convert into a domain [`Channel`] as seen by `viewer`. The peer of a
    /// direct channel is whichever participant is not the viewer.
    pub fn into_channel(self, viewer: &Username) -> Result<Channel, RemoteError> {
        let created_by = Username::new(&self.created_by)
            .map_err(|_| RemoteError::Decode(format!("channel {} has no creator", self.id)))?;

        let mut members: std::collections::BTreeSet<Username> = self
            .members
            .iter()
            .filter_map(|m| Username::new(m).ok())
            .collect();
        members.insert(created_by.clone());

        let kind = match self.kind {
            WireChannelKind::Group => ChannelKind::Group {
                name: self.name.clone(),
            },
            WireChannelKind::Direct => {
                let raw = self.canonical_key.as_deref().ok_or_else(|| {
                    RemoteError::Decode(format!("direct channel {} has no canonicalKey", self.id))
                })?;
                let key = CanonicalKey::parse(raw).ok_or_else(|| {
                    RemoteError::Decode(format!("invalid canonicalKey {raw:?}"))
                })?;
                let peer = key.peer_of(viewer).ok_or_else(|| {
                    RemoteError::Decode(format!(
                        "direct channel {} does not include {viewer}",
                        self.id
                    ))
                })?;
                ChannelKind::Direct { peer, key }
            }
        };

        Ok(Channel {
            id: self.id,
            name: self.name,
            created_by,
            members,
            kind,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl MessageRecord {
    pub fn into_message(self, channel_id: ChannelId) -> Result<Message, RemoteError> {
        let sender = Username::new(&self.sender)
            .map_err(|_| RemoteError::Decode(format!("message {} has no sender", self.id)))?;
        Ok(Message {
            id: self.id,
            channel_id,
            sender,
            text: self.text,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
        })
    }
}

impl From<&Message> for MessageRecord {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            sender: m.sender.to_string(),
            text: m.text.clone(),
            created_at: m.created_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Accepts RFC 3339 as well as the bare `YYYY-MM-DD HH:MM:SS` (UTC) form
/// SQLite's `datetime('now')` produces.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    pub created_by: String,
    pub members: Vec<String>,
    pub kind: WireChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFriendRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestRecord {
    pub id: FriendRequestId,
    pub from: String,
    pub to: String,
    pub status: FriendRequestStatus,
}

impl TryFrom<FriendRequestRecord> for FriendRequest {
    type Error = RemoteError;

    fn try_from(r: FriendRequestRecord) -> Result<Self, Self::Error> {
        let from = Username::new(&r.from)
            .map_err(|_| RemoteError::Decode(format!("friend request {} has no sender", r.id)))?;
        let to = Username::new(&r.to).map_err(|_| {
            RemoteError::Decode(format!("friend request {} has no recipient", r.id))
        })?;
        Ok(FriendRequest {
            id: r.id,
            from,
            to,
            status: r.status,
        })
    }
}

impl From<&FriendRequest> for FriendRequestRecord {
    fn from(r: &FriendRequest) -> Self {
        Self {
            id: r.id,
            from: r.from.to_string(),
            to: r.to.to_string(),
            status: r.status,
        }
    }
}
