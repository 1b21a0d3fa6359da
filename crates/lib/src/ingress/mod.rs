//! Event ingress: webhook HTTP server.
//!
//! Translates provider webhooks (WhatsApp Cloud inbound messages, Twilio
//! voice calls) into message-log appends and follow-up records, and answers
//! the Meta webhook verification handshake. The provider-facing response
//! always succeeds quickly regardless of downstream notification outcome.

mod payload;
mod server;

pub use payload::{TwilioVoiceForm, WhatsAppUpdate};
pub use server::run_server;
