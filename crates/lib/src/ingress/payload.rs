//! Webhook payload types (WhatsApp Cloud JSON, Twilio voice form).

use serde::Deserialize;

/// WhatsApp Cloud webhook POST body. Only the first message of the first
/// change is of interest; everything else (statuses, contacts) is ignored.
#[derive(Debug, Deserialize)]
pub struct WhatsAppUpdate {
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppEntry {
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppChange {
    #[serde(default)]
    pub value: WhatsAppValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsAppValue {
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    pub from: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppText {
    pub body: String,
}

impl WhatsAppUpdate {
    /// First inbound message of the update: (sender, body). Body is empty for
    /// non-text messages.
    pub fn first_message(&self) -> Option<(&str, &str)> {
        let msg = self.entry.first()?.changes.first()?.value.messages.first()?;
        let body = msg.text.as_ref().map(|t| t.body.as_str()).unwrap_or("");
        Some((msg.from.as_str(), body))
    }
}

/// Twilio voice webhook form body (form-urlencoded). `From` is the caller.
#[derive(Debug, Deserialize)]
pub struct TwilioVoiceForm {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "CallSid", default)]
    pub call_sid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whatsapp_text_message() {
        let raw = r#"{
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [
                            { "from": "33612345678", "text": { "body": "hello" } }
                        ]
                    }
                }]
            }]
        }"#;
        let update: WhatsAppUpdate = serde_json::from_str(raw).expect("parse");
        assert_eq!(update.first_message(), Some(("33612345678", "hello")));
    }

    #[test]
    fn status_only_update_has_no_message() {
        let raw = r#"{ "entry": [{ "changes": [{ "value": {} }] }] }"#;
        let update: WhatsAppUpdate = serde_json::from_str(raw).expect("parse");
        assert_eq!(update.first_message(), None);
    }

    #[test]
    fn non_text_message_has_empty_body() {
        let raw = r#"{
            "entry": [{
                "changes": [{
                    "value": { "messages": [{ "from": "33612345678" }] }
                }]
            }]
        }"#;
        let update: WhatsAppUpdate = serde_json::from_str(raw).expect("parse");
        assert_eq!(update.first_message(), Some(("33612345678", "")));
    }

    #[test]
    fn parses_twilio_voice_form() {
        let form: TwilioVoiceForm =
            serde_urlencoded::from_str("From=%2B33612345678&To=%2B33100000000&CallSid=CA123")
                .expect("parse");
        assert_eq!(form.from, "+33612345678");
        assert_eq!(form.call_sid.as_deref(), Some("CA123"));
    }
}
