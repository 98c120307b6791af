//! `HttpRemoteLog` against an in-process axum service speaking the same JSON
//! protocol as the real one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use parley_client::remote::{HttpRemoteLog, NewChannel, RemoteLogClient};
use parley_shared::error::RemoteError;
use parley_shared::types::{
    CanonicalKey, ChannelId, ChannelKind, FriendRequestId, FriendRequestStatus, MessageId,
    Username,
};

const NOT_FOUND_CHANNEL: u64 = 404;
const FORBIDDEN_CHANNEL: u64 = 403;
const BROKEN_CHANNEL: u64 = 500;
const GARBLED_CHANNEL: u64 = 7;

type Reply = (StatusCode, Json<Value>);

#[derive(Clone, Default)]
struct MockState {
    since_seen: Arc<Mutex<Vec<String>>>,
}

fn error(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "error": message })))
}

async fn list_channels(Path(username): Path<String>) -> Json<Value> {
    Json(json!([
        {
            "id": 2,
            "name": "dm:alice,bob",
            "createdBy": "bob",
            "members": ["alice", "bob"],
            "kind": "direct",
            "canonicalKey": "dm:alice,bob"
        },
        { "id": 9, "name": "dm:bob,carol", "createdBy": "bob", "kind": "direct" },
        { "id": 1, "name": "general", "createdBy": username }
    ]))
}

async fn create_channel(Json(body): Json<Value>) -> Reply {
    if body["name"] == "taken" {
        return error(StatusCode::CONFLICT, "channel already exists");
    }
    let mut members = body["members"].as_array().cloned().unwrap_or_default();
    members.push(body["createdBy"].clone());
    (
        StatusCode::CREATED,
        Json(json!({
            "id": 5,
            "name": body["name"],
            "createdBy": body["createdBy"],
            "members": members,
            "kind": body["kind"],
            "canonicalKey": body["canonicalKey"],
        })),
    )
}

async fn list_messages(
    State(state): State<MockState>,
    Path(channel): Path<u64>,
    Query(query): Query<HashMap<String, String>>,
) -> Reply {
    let since = query.get("sinceId").cloned().unwrap_or_default();
    state.since_seen.lock().unwrap().push(since.clone());

    match channel {
        NOT_FOUND_CHANNEL => error(StatusCode::NOT_FOUND, "channel not found"),
        BROKEN_CHANNEL => error(StatusCode::INTERNAL_SERVER_ERROR, "database is locked"),
        GARBLED_CHANNEL => (StatusCode::OK, Json(json!({ "messages": "soon" }))),
        _ => {
            let since: u64 = since.parse().unwrap_or(0);
            // Deliberately sloppy: one entry at the cursor comes back too.
            let all = json!([
                { "id": 1, "sender": "alice", "text": "one", "createdAt": "2024-05-01 12:00:00" },
                { "id": 2, "sender": "bob", "text": "two", "createdAt": "2024-05-01T12:01:00Z" },
                { "id": 3, "sender": "alice", "text": "three" }
            ]);
            let delta: Vec<Value> = all
                .as_array()
                .unwrap()
                .iter()
                .filter(|m| m["id"].as_u64().unwrap() >= since)
                .cloned()
                .collect();
            (StatusCode::OK, Json(Value::Array(delta)))
        }
    }
}

async fn post_message(Json(body): Json<Value>) -> Reply {
    if body["text"].as_str().unwrap_or_default().is_empty() {
        return error(StatusCode::BAD_REQUEST, "sender and text required");
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "id": 10,
            "sender": body["sender"],
            "text": body["text"],
            "createdAt": "2024-05-01 12:02:00",
        })),
    )
}

async fn list_members(Path(channel): Path<u64>) -> Reply {
    if channel == FORBIDDEN_CHANNEL {
        return error(StatusCode::FORBIDDEN, "not a member");
    }
    (StatusCode::OK, Json(json!(["alice", "bob"])))
}

async fn add_member(Json(body): Json<Value>) -> Json<Value> {
    Json(json!(["alice", "bob", body["username"]]))
}

async fn list_friend_requests(Path(username): Path<String>) -> Json<Value> {
    Json(json!([{ "id": 1, "from": "bob", "to": username, "status": "pending" }]))
}

async fn accept_friend_request(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "id": id, "from": "bob", "to": "alice", "status": "accepted" }))
}

async fn decline_friend_request(Path(id): Path<u64>) -> Reply {
    error(StatusCode::UNPROCESSABLE_ENTITY, &format!("request {id} already resolved"))
}

async fn spawn_service() -> (HttpRemoteLog, MockState) {
    let state = MockState::default();
    let app = Router::new()
        .route("/channels", post(create_channel))
        .route("/channels/:id", get(list_channels))
        .route("/channels/:id/messages", get(list_messages).post(post_message))
        .route("/channels/:id/members", get(list_members).post(add_member))
        .route("/friend-requests/:id", get(list_friend_requests))
        .route("/friend-requests/:id/accept", post(accept_friend_request))
        .route("/friend-requests/:id/decline", post(decline_friend_request))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let remote = HttpRemoteLog::new(&format!("http://{addr}")).unwrap();
    (remote, state)
}

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

#[tokio::test]
async fn test_fetch_messages_passes_since_and_drops_seen_ids() {
    let (remote, state) = spawn_service().await;

    let delta = remote
        .fetch_messages(ChannelId(1), MessageId(1))
        .await
        .unwrap();

    assert_eq!(*state.since_seen.lock().unwrap(), vec!["1".to_string()]);
    let ids: Vec<_> = delta.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![MessageId(2), MessageId(3)]);
    assert!(delta.iter().all(|m| m.channel_id == ChannelId(1)));
    assert!(delta[0].created_at.is_some());
    assert!(delta[1].created_at.is_none());
}

#[tokio::test]
async fn test_channel_list_uses_explicit_kind() {
    let (remote, _) = spawn_service().await;

    // The keyless direct record is skipped; the rest of the list survives.
    let channels = remote.fetch_channels_for(&user("alice")).await.unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(
        channels[0].kind,
        ChannelKind::Direct {
            peer: user("bob"),
            key: CanonicalKey::for_pair(&user("alice"), &user("bob")),
        }
    );
    // The creator is always a member.
    assert!(channels[1].members.contains(&user("alice")));
    assert!(!channels[1].is_direct());
}

#[tokio::test]
async fn test_post_and_create() {
    let (remote, _) = spawn_service().await;

    let posted = remote
        .post_message(ChannelId(1), &user("alice"), "hello")
        .await
        .unwrap();
    assert_eq!(posted.id, MessageId(10));
    assert_eq!(posted.text, "hello");

    let key = CanonicalKey::for_pair(&user("alice"), &user("bob"));
    let created = remote
        .create_channel(NewChannel {
            name: key.to_string(),
            created_by: user("alice"),
            members: vec![user("bob")],
            direct_key: Some(key.clone()),
        })
        .await
        .unwrap();
    assert_eq!(created.canonical_key(), Some(&key));
    assert_eq!(created.members.len(), 2);

    let members = remote.fetch_members(ChannelId(1)).await.unwrap();
    assert_eq!(members.len(), 2);
    remote.add_member(ChannelId(1), &user("carol")).await.unwrap();
}

#[tokio::test]
async fn test_status_codes_map_to_remote_errors() {
    let (remote, _) = spawn_service().await;

    let err = remote
        .fetch_messages(ChannelId(NOT_FOUND_CHANNEL), MessageId::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err, RemoteError::NotFound("channel not found".into()));
    assert!(err.stops_polling());

    let err = remote
        .fetch_messages(ChannelId(BROKEN_CHANNEL), MessageId::ZERO)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let err = remote
        .fetch_messages(ChannelId(GARBLED_CHANNEL), MessageId::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Decode(_)));

    let err = remote
        .fetch_members(ChannelId(FORBIDDEN_CHANNEL))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Unauthorized(_)));

    let err = remote
        .create_channel(NewChannel {
            name: "taken".into(),
            created_by: user("alice"),
            members: Vec::new(),
            direct_key: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Conflict(_)));

    let err = remote
        .post_message(ChannelId(1), &user("alice"), "")
        .await
        .unwrap_err();
    assert_eq!(err, RemoteError::Validation("sender and text required".into()));
}

#[tokio::test]
async fn test_friend_requests() {
    let (remote, _) = spawn_service().await;

    let requests = remote.fetch_friend_requests(&user("alice")).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status, FriendRequestStatus::Pending);

    let accepted = remote
        .respond_friend_request(FriendRequestId(1), FriendRequestStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(accepted.status, FriendRequestStatus::Accepted);

    let err = remote
        .respond_friend_request(FriendRequestId(1), FriendRequestStatus::Declined)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Validation(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpRemoteLog::new(&format!("http://{addr}")).unwrap();
    let err = remote
        .fetch_channels_for(&user("alice"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
