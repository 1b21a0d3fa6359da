//! Outbound notification channel (WhatsApp Cloud).
//!
//! Notifier trait so the reconciliation engine and the webhook handlers can
//! send without knowing the provider; the WhatsApp connector is the one
//! production implementation.

mod whatsapp;

pub use whatsapp::WhatsAppChannel;

use crate::config::{Config, NotificationMode};
use async_trait::async_trait;

/// Notification delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Network-level failure; transient, retried on a later tick.
    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider rejected the request; transient, retried on a later tick.
    #[error("notification api error: {0}")]
    Api(String),

    /// Missing credentials or identifiers. Permanent until an operator fixes
    /// the configuration; surfaced loudly instead of silently retried.
    #[error("notifier not configured: {0}")]
    Config(String),
}

impl NotifyError {
    /// True for failures that cannot resolve without operator intervention.
    pub fn is_config(&self) -> bool {
        matches!(self, NotifyError::Config(_))
    }
}

/// What to deliver: free text, or a named provider template with ordered
/// substitution parameters (the scheduling link is the sole parameter in the
/// template variant).
#[derive(Debug, Clone)]
pub enum NotificationPayload {
    Text(String),
    Template {
        name: String,
        language: String,
        params: Vec<String>,
    },
}

impl NotificationPayload {
    /// Build the follow-up notification from config: template when configured,
    /// otherwise free text carrying the scheduling link.
    pub fn followup_from_config(config: &Config) -> Self {
        let link = config.notification.scheduling_link.clone();
        match config.notification.mode {
            NotificationMode::Template => NotificationPayload::Template {
                name: config.notification.template_name.clone(),
                language: config.notification.template_language.clone(),
                params: vec![link],
            },
            NotificationMode::Text => NotificationPayload::Text(format!(
                "Bonjour ! Nous avons manqué votre appel.\nRéservez un créneau ici : {}",
                link
            )),
        }
    }
}

/// Sends a single outbound notification to a normalized phone number.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followup_payload_text_carries_link() {
        let mut config = Config::default();
        config.notification.scheduling_link = "https://cal.example/me".to_string();
        match NotificationPayload::followup_from_config(&config) {
            NotificationPayload::Text(body) => assert!(body.contains("https://cal.example/me")),
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[test]
    fn followup_payload_template_has_link_as_sole_param() {
        let mut config = Config::default();
        config.notification.mode = NotificationMode::Template;
        config.notification.scheduling_link = "https://cal.example/me".to_string();
        match NotificationPayload::followup_from_config(&config) {
            NotificationPayload::Template { name, params, .. } => {
                assert_eq!(name, "relance_appel_manque");
                assert_eq!(params, vec!["https://cal.example/me".to_string()]);
            }
            other => panic!("expected template payload, got {:?}", other),
        }
    }
}
