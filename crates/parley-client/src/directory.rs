//! Channel lookup and creation, including two-party channel identity.
//!
//! A direct channel is identified by the [`CanonicalKey`] of its participants.
//! Resolving one is lookup-then-create and is not atomic: two clients
//! resolving the same pair at the same moment can both miss the lookup and
//! both create. Against a remote that enforces key uniqueness the loser gets
//! [`RemoteError::Conflict`] and adopts the winner's channel. Against one that
//! does not, both channels exist; every client then settles on the one with
//! the lowest id, so the conversation converges on the next resolve.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use parley_shared::error::{RemoteError, ValidationError};
use parley_shared::types::{CanonicalKey, Channel, ChannelId, Username};

use crate::error::{ClientError, Result};
use crate::remote::{NewChannel, RemoteLogClient};

#[derive(Clone)]
pub struct ChannelDirectory {
    remote: Arc<dyn RemoteLogClient>,
}

impl ChannelDirectory {
    pub fn new(remote: Arc<dyn RemoteLogClient>) -> Self {
        Self { remote }
    }

    /// Channels `user` created or is a member of.
    pub async fn list_channels_for(&self, user: &Username) -> Result<Vec<Channel>> {
        let mut channels = self.remote.fetch_channels_for(user).await?;
        channels.retain(|c| c.is_visible_to(user));
        Ok(channels)
    }

    /// The direct channel for `key` among `channels`. When a creation race
    /// left several, the oldest (lowest id) wins.
    pub fn find_direct<'a>(channels: &'a [Channel], key: &CanonicalKey) -> Option<&'a Channel> {
        channels
            .iter()
            .filter(|c| c.canonical_key() == Some(key))
            .min_by_key(|c| c.id)
    }

    /// Find or create the direct channel between `me` and `peer`.
    pub async fn resolve_direct(&self, me: &Username, peer: &Username) -> Result<ChannelId> {
        if me == peer {
            return Err(ValidationError::SelfDirect.into());
        }
        let key = CanonicalKey::for_pair(me, peer);

        let channels = self.list_channels_for(me).await?;
        if let Some(existing) = Self::find_direct(&channels, &key) {
            debug!(key = %key, channel = %existing.id, "Direct channel found");
            return Ok(existing.id);
        }

        let request = NewChannel {
            name: key.to_string(),
            created_by: me.clone(),
            members: vec![peer.clone()],
            direct_key: Some(key.clone()),
        };
        match self.remote.create_channel(request).await {
            Ok(created) => {
                info!(key = %key, channel = %created.id, "Direct channel created");
                Ok(created.id)
            }
            Err(RemoteError::Conflict(reason)) => {
                debug!(key = %key, reason = %reason, "Direct channel exists remotely, adopting it");
                let channels = self.list_channels_for(me).await?;
                Self::find_direct(&channels, &key)
                    .map(|c| c.id)
                    .ok_or(ClientError::Remote(RemoteError::Conflict(reason)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a group channel. Members are deduplicated and the creator is
    /// left out, since the remote adds it.
    pub async fn create_group(
        &self,
        name: &str,
        created_by: &Username,
        members: impl IntoIterator<Item = Username>,
    ) -> Result<Channel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let members: BTreeSet<Username> = members
            .into_iter()
            .filter(|m| m != created_by)
            .collect();

        let channel = self
            .remote
            .create_channel(NewChannel {
                name: name.to_string(),
                created_by: created_by.clone(),
                members: members.into_iter().collect(),
                direct_key: None,
            })
            .await?;
        info!(channel = %channel.id, name = %channel.name, "Channel created");
        Ok(channel)
    }
}
