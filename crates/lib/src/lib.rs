//! Relance core library — missed-call follow-up engine, durable store,
//! WhatsApp channel, and webhook ingress used by the CLI binary.

pub mod channels;
pub mod config;
pub mod ingress;
pub mod init;
pub mod phone;
pub mod reconcile;
pub mod store;
