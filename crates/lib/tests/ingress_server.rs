//! Integration tests: boot the webhook server on a free port and exercise the
//! health endpoint, the Meta verification handshake, and both webhooks.
//! No WhatsApp credentials are configured, so immediate notification attempts
//! fail (logged) without affecting the webhook acknowledgments.

use lib::config::Config;
use lib::ingress;
use std::path::PathBuf;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

struct TestServer {
    base_url: String,
    db_path: PathBuf,
    _dir: PathBuf,
}

/// Boot a server with a temp config/db and wait for the health endpoint.
async fn start_server(mutate: impl FnOnce(&mut Config)) -> TestServer {
    let dir = std::env::temp_dir().join(format!("relance-ingress-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let config_path = dir.join("config.json");
    std::fs::write(&config_path, b"{}").expect("write config.json");
    let db_path = dir.join("relance.db");

    let port = free_port();
    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();
    config.storage.path = Some(db_path.clone());
    mutate(&mut config);

    tokio::spawn(async move {
        let _ = ingress::run_server(config, config_path).await;
    });

    let base_url = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base_url)).send().await {
            if resp.status().is_success() {
                return TestServer {
                    base_url,
                    db_path,
                    _dir: dir,
                };
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not become healthy within 5s on {}", base_url);
}

#[tokio::test]
async fn health_responds_with_running() {
    let server = start_server(|_| {}).await;
    let json: serde_json::Value = reqwest::get(format!("{}/", server.base_url))
        .await
        .expect("health request")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("service").and_then(|v| v.as_str()), Some("relance"));
}

#[tokio::test]
async fn webhook_verification_echoes_challenge_and_refuses_bad_token() {
    let server = start_server(|config| {
        config.whatsapp.verify_token = Some("secret".to_string());
    })
    .await;
    let client = reqwest::Client::new();

    let ok = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=secret&hub.challenge=4242",
            server.base_url
        ))
        .send()
        .await
        .expect("verify request");
    assert!(ok.status().is_success());
    assert_eq!(ok.text().await.expect("body"), "4242");

    let bad = client
        .get(format!(
            "{}/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=4242",
            server.base_url
        ))
        .send()
        .await
        .expect("verify request");
    assert_eq!(bad.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn twilio_voice_answers_twiml_and_opens_a_pending_followup() {
    let server = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/twilio/voice", server.base_url))
        .form(&[("From", "+33612345678"), ("To", "+33100000000"), ("CallSid", "CA123")])
        .send()
        .await
        .expect("voice webhook");
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/xml")
    );
    assert!(resp.text().await.expect("body").contains("<Hangup/>"));

    // The follow-up landed in the store with the normalized caller id.
    let conn = rusqlite::Connection::open(&server.db_path).expect("open db");
    let (from, done): (String, i64) = conn
        .query_row(
            "SELECT from_number, done FROM followups",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("one followup row");
    assert_eq!(from, "33612345678");
    assert_eq!(done, 0);
}

#[tokio::test]
async fn twilio_form_without_caller_still_answers_twiml() {
    // Provider-facing contract: a form missing the From field is dropped but
    // still acknowledged with 200 TwiML, never a 4xx that would make Twilio
    // retry or play an error message.
    let server = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/twilio/voice", server.base_url))
        .form(&[("CallSid", "CA999")])
        .send()
        .await
        .expect("voice webhook");
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/xml")
    );
    assert!(resp.text().await.expect("body").contains("<Hangup/>"));

    // Nothing was recorded for the unidentifiable caller.
    let conn = rusqlite::Connection::open(&server.db_path).expect("open db");
    let followups: i64 = conn
        .query_row("SELECT COUNT(*) FROM followups", [], |row| row.get(0))
        .expect("count followups");
    assert_eq!(followups, 0);
}

#[tokio::test]
async fn whatsapp_message_is_logged_and_trigger_opens_followup() {
    let server = start_server(|_| {}).await;
    let client = reqwest::Client::new();

    let ordinary = serde_json::json!({
        "entry": [{ "changes": [{ "value": { "messages": [
            { "from": "33612345678", "text": { "body": "bonjour" } }
        ] } }] }]
    });
    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .json(&ordinary)
        .send()
        .await
        .expect("webhook post");
    assert!(resp.status().is_success());

    let simulated = serde_json::json!({
        "entry": [{ "changes": [{ "value": { "messages": [
            { "from": "33612345678", "text": { "body": "simulate_missed_call" } }
        ] } }] }]
    });
    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .json(&simulated)
        .send()
        .await
        .expect("webhook post");
    assert!(resp.status().is_success());

    let conn = rusqlite::Connection::open(&server.db_path).expect("open db");
    let messages: i64 = conn
        .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
        .expect("count messages");
    assert_eq!(messages, 2);
    let followups: i64 = conn
        .query_row("SELECT COUNT(*) FROM followups WHERE done = 0", [], |row| row.get(0))
        .expect("count followups");
    assert_eq!(followups, 1);
}

#[tokio::test]
async fn malformed_webhook_payload_is_acknowledged() {
    let server = start_server(|_| {}).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/webhook", server.base_url))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body("not json at all")
        .send()
        .await
        .expect("webhook post");
    assert!(resp.status().is_success());
}
