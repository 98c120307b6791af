use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use parley_shared::constants::SINCE_ID_PARAM;
use parley_shared::error::RemoteError;
use parley_shared::protocol::{
    AddMemberRequest, ChannelRecord, CreateChannelRequest, CreateFriendRequest,
    FriendRequestRecord, MessageRecord, PostMessageRequest, WireChannelKind,
};
use parley_shared::types::{
    Channel, ChannelId, FriendRequest, FriendRequestId, FriendRequestStatus, Message, MessageId,
    Username,
};

use super::{channels_from_records, NewChannel, RemoteLogClient};

/// [`RemoteLogClient`] over the service's HTTP/JSON API.
#[derive(Debug, Clone)]
pub struct HttpRemoteLog {
    base: Url,
    http: reqwest::Client,
}

impl HttpRemoteLog {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Validation(format!("invalid server url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Validation(format!(
                "server url {base_url:?} cannot carry a path"
            )));
        }
        Ok(Self { base, http })
    }

    /// Join percent-encoded path segments onto the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl RemoteLogClient for HttpRemoteLog {
    async fn fetch_channels_for(&self, user: &Username) -> Result<Vec<Channel>, RemoteError> {
        let url = self.endpoint(&["channels", user.as_str()]);
        let records: Vec<ChannelRecord> = decode(self.http.get(url).send().await).await?;
        Ok(channels_from_records(records, user))
    }

    async fn fetch_messages(
        &self,
        channel: ChannelId,
        since: MessageId,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut url = self.endpoint(&["channels", &channel.to_string(), "messages"]);
        url.query_pairs_mut()
            .append_pair(SINCE_ID_PARAM, &since.to_string());
        debug!(channel = %channel, since = %since, "GET messages");

        let records: Vec<MessageRecord> = decode(self.http.get(url).send().await).await?;
        let mut messages = records
            .into_iter()
            .map(|r| r.into_message(channel))
            .collect::<Result<Vec<_>, _>>()?;
        // The protocol promises id > since; drop anything that breaks it.
        messages.retain(|m| m.id > since);
        Ok(messages)
    }

    async fn post_message(
        &self,
        channel: ChannelId,
        sender: &Username,
        text: &str,
    ) -> Result<Message, RemoteError> {
        let url = self.endpoint(&["channels", &channel.to_string(), "messages"]);
        let body = PostMessageRequest {
            sender: sender.to_string(),
            text: text.to_string(),
        };
        let record: MessageRecord = decode(self.http.post(url).json(&body).send().await).await?;
        record.into_message(channel)
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<Channel, RemoteError> {
        let url = self.endpoint(&["channels"]);
        let body = CreateChannelRequest {
            name: channel.name,
            created_by: channel.created_by.to_string(),
            members: channel.members.iter().map(|m| m.to_string()).collect(),
            kind: if channel.direct_key.is_some() {
                WireChannelKind::Direct
            } else {
                WireChannelKind::Group
            },
            canonical_key: channel.direct_key.map(|k| k.to_string()),
        };
        let record: ChannelRecord = decode(self.http.post(url).json(&body).send().await).await?;
        record.into_channel(&channel.created_by)
    }

    async fn fetch_members(&self, channel: ChannelId) -> Result<BTreeSet<Username>, RemoteError> {
        let url = self.endpoint(&["channels", &channel.to_string(), "members"]);
        let names: Vec<String> = decode(self.http.get(url).send().await).await?;
        Ok(names.iter().filter_map(|n| Username::new(n).ok()).collect())
    }

    async fn add_member(&self, channel: ChannelId, username: &Username) -> Result<(), RemoteError> {
        let url = self.endpoint(&["channels", &channel.to_string(), "members"]);
        let body = AddMemberRequest {
            username: username.to_string(),
        };
        let _: Vec<String> = decode(self.http.post(url).json(&body).send().await).await?;
        Ok(())
    }

    async fn fetch_friend_requests(
        &self,
        user: &Username,
    ) -> Result<Vec<FriendRequest>, RemoteError> {
        let url = self.endpoint(&["friend-requests", user.as_str()]);
        let records: Vec<FriendRequestRecord> = decode(self.http.get(url).send().await).await?;
        records.into_iter().map(FriendRequest::try_from).collect()
    }

    async fn send_friend_request(
        &self,
        from: &Username,
        to: &Username,
    ) -> Result<FriendRequest, RemoteError> {
        let url = self.endpoint(&["friend-requests"]);
        let body = CreateFriendRequest {
            from: from.to_string(),
            to: to.to_string(),
        };
        let record: FriendRequestRecord =
            decode(self.http.post(url).json(&body).send().await).await?;
        FriendRequest::try_from(record)
    }

    async fn respond_friend_request(
        &self,
        id: FriendRequestId,
        status: FriendRequestStatus,
    ) -> Result<FriendRequest, RemoteError> {
        let action = match status {
            FriendRequestStatus::Accepted => "accept",
            FriendRequestStatus::Declined => "decline",
            FriendRequestStatus::Pending => {
                return Err(RemoteError::Validation(
                    "a request cannot be moved back to pending".into(),
                ))
            }
        };
        let url = self.endpoint(&["friend-requests", &id.to_string(), action]);
        let record: FriendRequestRecord = decode(self.http.post(url).send().await).await?;
        FriendRequest::try_from(record)
    }
}

/// Map the outcome of a request to either its decoded JSON body or the
/// matching [`RemoteError`].
async fn decode<T: DeserializeOwned>(
    sent: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, RemoteError> {
    let resp = sent.map_err(transport_error)?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    resp.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            transport_error(e)
        }
    })
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::NetworkUnavailable(e.to_string())
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    // The service reports failures as {"error": "..."}.
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RemoteError::Validation(message)
        }
        s if s.is_server_error() => RemoteError::NetworkUnavailable(message),
        _ => RemoteError::Decode(format!("unexpected status: {message}")),
    }
}
