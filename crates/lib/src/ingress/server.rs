//! Webhook HTTP server: health, Meta verification handshake, WhatsApp Cloud
//! inbound messages, Twilio voice calls.

use crate::channels::{NotificationPayload, Notifier, WhatsAppChannel};
use crate::config::{self, Config};
use crate::ingress::payload::{TwilioVoiceForm, WhatsAppUpdate};
use crate::phone;
use crate::reconcile::Reconciler;
use crate::store::{FollowupStore, MessageLog, SqliteStore, MISSED_CALL_SENTINEL};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Inbound message body that simulates a missed call (test pathway).
const SIMULATE_MISSED_CALL_TRIGGER: &str = "simulate_missed_call";

/// TwiML answer for Twilio voice webhooks: hang up after the webhook fires.
const TWIML_HANGUP: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><Response><Hangup/></Response>"#;

/// Shared state for the webhook handlers (config, store, notifier).
#[derive(Clone)]
pub struct IngressState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub notifier: Arc<dyn Notifier>,
    /// Follow-up notification content, built once from config.
    pub payload: Arc<NotificationPayload>,
    /// Expected hub.verify_token for the Meta handshake. None = handshake
    /// always refused.
    pub verify_token: Option<String>,
}

impl IngressState {
    fn normalize(&self, raw: &str) -> String {
        phone::normalize(raw, &self.config.normalization)
    }

    /// First notification attempt, synchronous at ingress time. Failure is
    /// caught and logged; it never fails the webhook acknowledgment. The
    /// reconciliation tick handles the retry/confirmation path.
    async fn send_immediate(&self, to: &str) {
        match self.notifier.send(to, &self.payload).await {
            Ok(()) => log::info!("ingress: immediate notification sent to {}", to),
            Err(e) if e.is_config() => {
                log::error!("ingress: immediate notification to {} blocked by configuration: {}", to, e)
            }
            Err(e) => log::warn!("ingress: immediate notification to {} failed: {}", to, e),
        }
    }
}

/// Decide the Meta webhook verification handshake: echo the challenge when
/// mode is "subscribe" and the token matches, otherwise refuse.
fn verify_handshake(
    expected_token: Option<&str>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Option<String> {
    let expected = expected_token?;
    if mode? != "subscribe" || token? != expected {
        return None;
    }
    challenge.map(|c| c.to_string())
}

/// Run the webhook server; binds to config.server.bind:config.server.port.
/// Opens the store, starts the reconciliation loop, and blocks until
/// shutdown (SIGINT/SIGTERM). The in-flight tick is drained before exit.
pub async fn run_server(config: Config, config_path: PathBuf) -> Result<()> {
    let db_path = config::resolve_db_path(&config, &config_path);
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );
    log::info!("store opened at {}", db_path.display());

    let token = config::resolve_whatsapp_token(&config);
    let phone_id = config::resolve_whatsapp_phone_id(&config);
    if token.is_none() || phone_id.is_none() {
        log::warn!("whatsapp credentials not configured; notifications will fail until set");
    }
    let notifier: Arc<dyn Notifier> = Arc::new(WhatsAppChannel::new(token, phone_id));
    let payload = Arc::new(NotificationPayload::followup_from_config(&config));

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        store.clone(),
        notifier.clone(),
        Duration::from_secs(config.followup.grace_secs),
        Duration::from_secs(config.followup.tick_secs),
        (*payload).clone(),
    ));
    let reconciler_handle = reconciler.clone().start();

    let verify_token = config::resolve_verify_token(&config);
    let state = IngressState {
        config: Arc::new(config.clone()),
        store,
        notifier,
        payload,
        verify_token,
    };

    let app = Router::new()
        .route("/", get(health_http))
        .route("/webhook", get(whatsapp_verify).post(whatsapp_webhook))
        .route("/twilio/voice", post(twilio_voice))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.server.bind.trim(), config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("ingress listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reconciler, reconciler_handle))
        .await
        .context("ingress server exited")?;
    log::info!("ingress stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or
/// SIGTERM). Stops the reconciliation loop and awaits it so an in-flight
/// tick finishes its batch instead of being abandoned mid-transition.
async fn shutdown_signal(reconciler: Arc<Reconciler>, handle: JoinHandle<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining reconciler");

    reconciler.stop();
    let _ = handle.await;
    log::info!("reconciler drained");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<IngressState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "relance",
        "runtime": "running",
        "port": state.config.server.port,
    }))
}

/// GET /webhook — Meta webhook verification handshake.
async fn whatsapp_verify(
    State(state): State<IngressState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let echoed = verify_handshake(
        state.verify_token.as_deref(),
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    );
    match echoed {
        Some(challenge) => {
            log::info!("whatsapp webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        None => StatusCode::FORBIDDEN.into_response(),
    }
}

/// POST /webhook — WhatsApp Cloud inbound. Appends the message to the log;
/// the trigger keyword additionally opens a follow-up and attempts the
/// immediate notification (simulation pathway). Malformed payloads are
/// dropped with 200 so the provider does not retry indefinitely.
async fn whatsapp_webhook(State(state): State<IngressState>, body: Bytes) -> StatusCode {
    let update: WhatsAppUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::debug!("whatsapp webhook: dropping malformed payload: {}", e);
            return StatusCode::OK;
        }
    };
    let Some((raw_from, message_body)) = update.first_message() else {
        return StatusCode::OK;
    };
    let from = state.normalize(raw_from);
    let message_body = message_body.to_string();
    log::info!("whatsapp message received from {}", from);

    // Append-then-maybe-create, in that order: the trigger message itself
    // lands before missed_at and so never counts as a reply.
    if let Err(e) = MessageLog::append(state.store.as_ref(), &from, &message_body).await {
        log::warn!("whatsapp webhook: appending message from {} failed: {}", from, e);
        return StatusCode::OK;
    }

    if message_body.trim().eq_ignore_ascii_case(SIMULATE_MISSED_CALL_TRIGGER) {
        log::info!("simulated missed call for {}", from);
        match FollowupStore::create(state.store.as_ref(), &from).await {
            Ok(_) => state.send_immediate(&from).await,
            Err(e) => log::warn!("whatsapp webhook: creating follow-up for {} failed: {}", from, e),
        }
    } else if let Some(ref ack) = state.config.notification.ack_text {
        if let Err(e) = state
            .notifier
            .send(&from, &NotificationPayload::Text(ack.clone()))
            .await
        {
            log::warn!("whatsapp webhook: acknowledgement to {} failed: {}", from, e);
        }
    }

    StatusCode::OK
}

/// POST /twilio/voice — missed/forwarded call. Records the event in the
/// message log (sentinel body), opens a follow-up, attempts the immediate
/// notification, and always answers with TwiML so the provider-facing
/// response succeeds regardless of downstream outcome. The body is parsed
/// leniently; malformed forms are dropped, still with a TwiML answer.
async fn twilio_voice(State(state): State<IngressState>, body: Bytes) -> Response {
    let form: TwilioVoiceForm = match serde_urlencoded::from_bytes(&body) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("twilio webhook: dropping malformed payload: {}", e);
            return twiml_response();
        }
    };
    let from = state.normalize(&form.from);
    log::info!(
        "twilio call received from {} (sid {})",
        from,
        form.call_sid.as_deref().unwrap_or("-")
    );

    if from.is_empty() {
        log::debug!("twilio webhook: dropping call with empty caller id");
        return twiml_response();
    }

    if let Err(e) = MessageLog::append(state.store.as_ref(), &from, MISSED_CALL_SENTINEL).await {
        log::warn!("twilio webhook: recording missed call for {} failed: {}", from, e);
    }
    match FollowupStore::create(state.store.as_ref(), &from).await {
        Ok(followup) => {
            log::info!("follow-up {} opened for {}", followup.id, from);
            state.send_immediate(&from).await;
        }
        Err(e) => log::warn!("twilio webhook: creating follow-up for {} failed: {}", from, e),
    }

    twiml_response()
}

fn twiml_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        TWIML_HANGUP,
    )
        .into_response()
}
