//! REST API tests.
//!
//! Drives the administrative REST surface over real HTTP against a server
//! backed by mock media nodes, checking status codes and response bodies.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use common::types::SessionId;
use serde_json::{json, Value};
use sfu_controller::models::Role;
use sfu_test_utils::{ControlPlaneOptions, TestSfuServer, SDP_OFFER};

async fn create_session(
    client: &reqwest::Client,
    server: &TestSfuServer,
    body: Value,
) -> Result<String, anyhow::Error> {
    let response = client
        .post(format!("{}/api/sessions", server.url()))
        .json(&body)
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    Ok(body["id"].as_str().unwrap().to_string())
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_create_session_with_empty_body() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/sessions", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert!(body["id"].as_str().is_some_and(|id| id.starts_with("ses_")));
    assert!(body["createdAt"].as_i64().unwrap() > 0);
    Ok(())
}

#[tokio::test]
async fn test_create_session_validation() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/sessions", server.url());

    let response = client
        .post(&url)
        .json(&json!({"mediaMode": "BROADCAST"}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = client
        .post(&url)
        .json(&json!({"customSessionId": "has spaces!"}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    // Wrong JSON type reports in the shared error format
    let response = client
        .post(&url)
        .json(&json!({"mediaMode": 5}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn test_custom_session_id_conflict() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();

    let id = create_session(
        &client,
        &server,
        json!({"customSessionId": "daily-standup", "recordingMode": "MANUAL"}),
    )
    .await?;
    assert_eq!(id, "daily-standup");

    let response = client
        .post(format!("{}/api/sessions", server.url()))
        .json(&json!({"customSessionId": "daily-standup"}))
        .send()
        .await?;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn test_get_and_list_sessions() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/sessions/ses_missing", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let id = create_session(&client, &server, json!({"mediaMode": "ROUTED"})).await?;
    server
        .control_plane()
        .join(&SessionId::new(id.as_str()), Role::Publisher)
        .await;
    create_session(&client, &server, json!({})).await?;

    let response = client
        .get(format!("{}/api/sessions/{}", server.url(), id))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["sessionId"], id.as_str());
    assert_eq!(body["mediaMode"], "ROUTED");
    assert_eq!(body["recording"], false);
    assert_eq!(body["connections"]["numberOfElements"], 1);
    assert_eq!(body["connections"]["content"][0]["role"], "PUBLISHER");

    let response = client
        .get(format!("{}/api/sessions", server.url()))
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["numberOfElements"], 2);
    Ok(())
}

#[tokio::test]
async fn test_close_session() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let id = create_session(&client, &server, json!({})).await?;
    let url = format!("{}/api/sessions/{}", server.url(), id);

    let response = client.delete(&url).send().await?;
    assert_eq!(response.status(), 204);

    let response = client.delete(&url).send().await?;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    let response = client.get(&url).send().await?;
    assert_eq!(response.status(), 404);
    Ok(())
}

// ============================================================================
// Connections and streams
// ============================================================================

#[tokio::test]
async fn test_delete_connection() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();

    // Missing session on a sub-resource is a bad request
    let response = client
        .delete(format!(
            "{}/api/sessions/ses_missing/connection/con_x",
            server.url()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let id = create_session(&client, &server, json!({})).await?;
    let session_id = SessionId::new(id.as_str());
    let response = client
        .delete(format!(
            "{}/api/sessions/{}/connection/con_unknown",
            server.url(),
            id
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let session = server.control_plane().manager.session(&session_id)?;
    let participant = server
        .control_plane()
        .join(&session_id, Role::Publisher)
        .await;
    let response = client
        .delete(format!(
            "{}/api/sessions/{}/connection/{}",
            server.url(),
            id,
            participant.public_id()
        ))
        .send()
        .await?;
    assert_eq!(response.status(), 204);
    assert_eq!(session.participant_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_delete_stream() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let id = create_session(&client, &server, json!({})).await?;

    // No participants yet, so nothing can be published
    let response = client
        .delete(format!("{}/api/sessions/{}/stream/str_CAM_x", server.url(), id))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let session_id = SessionId::new(id.as_str());
    let tp = server.control_plane();
    let publisher = tp.join(&session_id, Role::Publisher).await;
    tp.manager
        .publish(&session_id, publisher.private_id(), SDP_OFFER, false)
        .await?;
    let stream = publisher.orchestrator().stream_id().unwrap();

    let url = format!("{}/api/sessions/{}/stream/{}", server.url(), id, stream);
    let response = client.delete(&url).send().await?;
    assert_eq!(response.status(), 204);
    assert!(!publisher.is_streaming());

    let response = client.delete(&url).send().await?;
    assert_eq!(response.status(), 404);
    Ok(())
}

#[tokio::test]
async fn test_publish_external_feed() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/sessions/ses_missing/connection", server.url()))
        .json(&json!({"rtspUri": "rtsp://camera.local/stream"}))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let id = create_session(&client, &server, json!({})).await?;
    let url = format!("{}/api/sessions/{}/connection", server.url(), id);

    let response = client.post(&url).json(&json!({})).send().await?;
    assert_eq!(response.status(), 400);

    let response = client
        .post(&url)
        .json(&json!({"rtspUri": "rtsp://camera.local/stream", "data": "lobby"}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["type"], "IPCAM");
    assert_eq!(body["serverData"], "lobby");
    let stream = body["publishers"][0]["streamId"].as_str().unwrap();
    assert!(stream.starts_with("str_IPC_"));
    assert_eq!(
        body["publishers"][0]["mediaOptions"]["rtspUri"],
        "rtsp://camera.local/stream"
    );

    // External feed streams go away with their connection only
    let response = client
        .delete(format!("{}/api/sessions/{}/stream/{}", server.url(), id, stream))
        .send()
        .await?;
    assert_eq!(response.status(), 405);
    Ok(())
}

// ============================================================================
// Tokens
// ============================================================================

#[tokio::test]
async fn test_issue_token() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/tokens", server.url());

    let response = client.post(&url).json(&json!({})).send().await?;
    assert_eq!(response.status(), 400);

    let response = client
        .post(&url)
        .json(&json!({"session": "ses_missing"}))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let id = create_session(&client, &server, json!({})).await?;
    let response = client
        .post(&url)
        .json(&json!({"session": id, "role": "ADMIN"}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = client
        .post(&url)
        .json(&json!({"session": id, "data": "alice"}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["role"], "PUBLISHER");
    assert_eq!(body["session"], id.as_str());
    assert_eq!(body["data"], "alice");
    assert_eq!(body["id"], body["token"]);
    assert!(body["token"].as_str().unwrap().starts_with("wss://sfu.test:4443"));

    let session = server
        .control_plane()
        .manager
        .session(&SessionId::new(id.as_str()))?;
    assert_eq!(session.token_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_issue_token_with_kurento_options() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/tokens", server.url());
    let id = create_session(&client, &server, json!({})).await?;

    let response = client
        .post(&url)
        .json(&json!({
            "session": id,
            "role": "MODERATOR",
            "kurentoOptions": {"videoMaxRecvBandwidth": 1000, "allowedFilters": ["GStreamerFilter"]}
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["role"], "MODERATOR");
    assert_eq!(body["kurentoOptions"]["videoMaxRecvBandwidth"], 1000);
    assert_eq!(body["kurentoOptions"]["allowedFilters"][0], "GStreamerFilter");

    let response = client
        .post(&url)
        .json(&json!({"session": id, "kurentoOptions": {"bogus": true}}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    Ok(())
}

// ============================================================================
// Signals
// ============================================================================

#[tokio::test]
async fn test_send_signal() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/signal", server.url());

    let response = client
        .post(&url)
        .json(&json!({"session": "ses_missing"}))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    let id = create_session(&client, &server, json!({})).await?;
    let response = client
        .post(&url)
        .json(&json!({"session": id, "type": "chat", "data": "hi"}))
        .send()
        .await?;
    assert_eq!(response.status(), 406);

    let participant = server
        .control_plane()
        .join(&SessionId::new(id.as_str()), Role::Subscriber)
        .await;
    let response = client
        .post(&url)
        .json(&json!({"session": id, "to": ["con_unknown"]}))
        .send()
        .await?;
    assert_eq!(response.status(), 406);

    let response = client
        .post(&url)
        .json(&json!({
            "session": id,
            "to": [participant.public_id().to_string()],
            "type": "chat",
            "data": "hi"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let signals = server.control_plane().signaling.notifications("signal");
    assert_eq!(signals.len(), 1);
    Ok(())
}

// ============================================================================
// Recordings
// ============================================================================

#[tokio::test]
async fn test_recording_disabled() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn_with(ControlPlaneOptions {
        recording_enabled: false,
        ..ControlPlaneOptions::default()
    })
    .await?;
    let client = reqwest::Client::new();
    let id = create_session(&client, &server, json!({})).await?;

    let response = client
        .post(format!("{}/api/recordings/start", server.url()))
        .json(&json!({"session": id}))
        .send()
        .await?;
    assert_eq!(response.status(), 501);

    let response = client
        .post(format!("{}/api/recordings/stop/rec_x", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 501);
    Ok(())
}

#[tokio::test]
async fn test_recording_lifecycle() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn_with(ControlPlaneOptions {
        recording_enabled: true,
        ..ControlPlaneOptions::default()
    })
    .await?;
    let client = reqwest::Client::new();
    let start_url = format!("{}/api/recordings/start", server.url());
    let id = create_session(&client, &server, json!({})).await?;

    let response = client
        .post(&start_url)
        .json(&json!({"session": id}))
        .send()
        .await?;
    assert_eq!(response.status(), 406);

    let response = client
        .post(&start_url)
        .json(&json!({"session": "ses_missing"}))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    server
        .control_plane()
        .join(&SessionId::new(id.as_str()), Role::Publisher)
        .await;

    let response = client
        .post(&start_url)
        .json(&json!({"session": id, "hasAudio": false, "hasVideo": false}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);

    let response = client
        .post(&start_url)
        .json(&json!({"session": id, "name": "standup"}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    let recording_id = body["id"].as_str().unwrap().to_string();

    let response = client
        .post(&start_url)
        .json(&json!({"session": id}))
        .send()
        .await?;
    assert_eq!(response.status(), 409);

    let stop_url = format!("{}/api/recordings/stop/{}", server.url(), recording_id);
    let response = client.post(&stop_url).send().await?;
    assert_eq!(response.status(), 200);

    let response = client.post(&stop_url).send().await?;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "RECORDING_NOT_FOUND");
    Ok(())
}

// ============================================================================
// Media nodes
// ============================================================================

#[tokio::test]
async fn test_list_media_nodes() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn_with(ControlPlaneOptions {
        nodes: 2,
        ..ControlPlaneOptions::default()
    })
    .await?;
    let client = reqwest::Client::new();
    let id = create_session(&client, &server, json!({})).await?;
    server
        .control_plane()
        .join(&SessionId::new(id.as_str()), Role::Publisher)
        .await;

    let response = client
        .get(format!("{}/api/media-nodes", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["numberOfElements"], 2);

    let nodes = body["content"].as_array().unwrap();
    // Ascending load: the node that took the session is last
    assert_eq!(nodes[0]["sessions"], 0);
    assert_eq!(nodes[1]["sessions"], 1);
    assert!(nodes[0]["load"].as_f64().unwrap() <= nodes[1]["load"].as_f64().unwrap());
    assert!(nodes.iter().all(|n| n["connected"] == true));
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_get_config() -> Result<(), anyhow::Error> {
    let server = TestSfuServer::spawn_with(ControlPlaneOptions {
        recording_enabled: false,
        ..ControlPlaneOptions::default()
    })
    .await?;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/api/config", server.url())).send().await?;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["publicUrl"], "wss://sfu.test:4443");
    assert_eq!(body["mediaNodes"], 1);
    assert_eq!(body["recording"], false);
    assert_eq!(body["cdr"], true);
    assert_eq!(body["emptySessionPolicy"], "destroy");
    assert_eq!(body["endpointTimeoutSeconds"], 2);
    assert!(!body.to_string().contains("ws://localhost:8888"));

    let response = client
        .get(format!("{}/api/config/public-url", server.url()))
        .send()
        .await?;
    assert_eq!(response.text().await?, "wss://sfu.test:4443");

    let response = client
        .get(format!("{}/api/config/version", server.url()))
        .send()
        .await?;
    assert_eq!(response.text().await?, env!("CARGO_PKG_VERSION"));

    let recording: bool = client
        .get(format!("{}/api/config/recording", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert!(!recording);

    let cdr: bool = client
        .get(format!("{}/api/config/cdr", server.url()))
        .send()
        .await?
        .json()
        .await?;
    assert!(cdr);
    Ok(())
}
