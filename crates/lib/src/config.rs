//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relance/config.json`) and
//! environment. Secrets (WhatsApp token, phone id, verify token) can always be
//! supplied via environment variables so they stay out of the config file.

use crate::phone::CountryRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings (webhook ingress).
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Follow-up reconciliation settings (grace window, tick interval).
    #[serde(default)]
    pub followup: FollowupConfig,

    /// Outbound notification settings (scheduling link, text vs template).
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Contact identifier normalization rule.
    #[serde(default)]
    pub normalization: CountryRule,

    /// WhatsApp Cloud API credentials.
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// Webhook server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the webhook endpoints (default 3000).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    3000
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Database file path (default ~/.relance/data/relance.db). The parent
    /// directory is created on open.
    pub path: Option<PathBuf>,
}

/// Reconciliation cadence and eligibility window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupConfig {
    /// Minimum age (seconds) a follow-up must reach before it is processed.
    /// Default 60 is a test value; production deployments should use minutes
    /// to hours.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Interval (seconds) between reconciliation ticks (default 60).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

fn default_grace_secs() -> u64 {
    60
}

fn default_tick_secs() -> u64 {
    60
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            tick_secs: default_tick_secs(),
        }
    }
}

/// Whether the follow-up notification is free text or a provider-side
/// message template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationMode {
    /// Plain text body containing the scheduling link.
    #[default]
    Text,

    /// Named WhatsApp template; the scheduling link is its sole parameter.
    Template,
}

/// Outbound notification content settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Scheduling link included in every follow-up notification.
    #[serde(default = "default_scheduling_link")]
    pub scheduling_link: String,

    /// "text" or "template".
    #[serde(default)]
    pub mode: NotificationMode,

    /// Template name, used when mode is "template".
    #[serde(default = "default_template_name")]
    pub template_name: String,

    /// Template language code, used when mode is "template".
    #[serde(default = "default_template_language")]
    pub template_language: String,

    /// When set, every ordinary inbound message gets this acknowledgement
    /// reply. Unset = no auto-reply.
    pub ack_text: Option<String>,
}

fn default_scheduling_link() -> String {
    "https://calendly.com/votre-lien".to_string()
}

fn default_template_name() -> String {
    "relance_appel_manque".to_string()
}

fn default_template_language() -> String {
    "fr".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            scheduling_link: default_scheduling_link(),
            mode: NotificationMode::default(),
            template_name: default_template_name(),
            template_language: default_template_language(),
            ack_text: None,
        }
    }
}

/// WhatsApp Cloud API credentials. Each field is overridden by its
/// environment variable when set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Bearer token for the Graph API. Overridden by WHATSAPP_TOKEN.
    pub token: Option<String>,

    /// Phone number id the messages are sent from. Overridden by
    /// WHATSAPP_PHONE_ID.
    pub phone_id: Option<String>,

    /// Shared secret for the Meta webhook verification handshake. Overridden
    /// by WHATSAPP_VERIFY_TOKEN.
    pub verify_token: Option<String>,
}

fn env_or(var: &str, fallback: Option<&String>) -> Option<String> {
    std::env::var(var)
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            fallback
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the WhatsApp bearer token: env WHATSAPP_TOKEN overrides config.
pub fn resolve_whatsapp_token(config: &Config) -> Option<String> {
    env_or("WHATSAPP_TOKEN", config.whatsapp.token.as_ref())
}

/// Resolve the WhatsApp phone id: env WHATSAPP_PHONE_ID overrides config.
pub fn resolve_whatsapp_phone_id(config: &Config) -> Option<String> {
    env_or("WHATSAPP_PHONE_ID", config.whatsapp.phone_id.as_ref())
}

/// Resolve the webhook verify token: env WHATSAPP_VERIFY_TOKEN overrides config.
pub fn resolve_verify_token(config: &Config) -> Option<String> {
    env_or("WHATSAPP_VERIFY_TOKEN", config.whatsapp.verify_token.as_ref())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELANCE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".relance").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the database path: config override or the default under the
/// config file's directory.
pub fn resolve_db_path(config: &Config, config_path: &std::path::Path) -> PathBuf {
    config.storage.path.clone().unwrap_or_else(|| {
        config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("data")
            .join("relance.db")
    })
}

/// Load config from the default path (or RELANCE_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
