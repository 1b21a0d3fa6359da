//! Follow-up reconciliation engine.
//!
//! On a fixed cadence, scans Pending follow-ups past the grace window,
//! consults the message log, and either resolves silently (the contact
//! re-engaged on their own) or sends the WhatsApp follow-up and resolves on
//! success. Failed sends leave the record Pending for the next tick.
//!
//! Known race, accepted: a reply arriving between the log check and the send
//! is only observed on the next tick, so at most one redundant notification
//! can go out per follow-up.

use crate::channels::{NotificationPayload, Notifier, NotifyError};
use crate::store::{FollowUp, FollowupStore, MessageLog};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// After this many failed attempts for one record, every further failure is
/// logged at error level so a permanently-failing number is operator-visible
/// instead of silently retried forever.
const ESCALATE_AFTER_ATTEMPTS: u32 = 10;

/// The reconciliation engine: holds the store, log, and notifier ports and
/// runs the scan-and-decide cycle. Constructed once at startup and shared by
/// reference; there are no ambient globals.
pub struct Reconciler {
    followups: Arc<dyn FollowupStore>,
    messages: Arc<dyn MessageLog>,
    notifier: Arc<dyn Notifier>,
    grace: Duration,
    tick_interval: Duration,
    payload: NotificationPayload,
    running: AtomicBool,
    /// Single-flight guard: a tick never starts while another is in flight.
    ticking: AtomicBool,
    /// Wakes the loop out of its interval wait on `stop()`, so shutdown does
    /// not stall for a full tick interval.
    stopped: Notify,
}

impl Reconciler {
    pub fn new(
        followups: Arc<dyn FollowupStore>,
        messages: Arc<dyn MessageLog>,
        notifier: Arc<dyn Notifier>,
        grace: Duration,
        tick_interval: Duration,
        payload: NotificationPayload,
    ) -> Self {
        Self {
            followups,
            messages,
            notifier,
            grace,
            tick_interval,
            payload,
            running: AtomicBool::new(false),
            ticking: AtomicBool::new(false),
            stopped: Notify::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request the timer loop to stop. The in-flight tick, if any, finishes
    /// its batch; await the handle returned by `start` to drain it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // notify_one leaves a permit behind when the loop is not currently
        // waiting, so a stop() racing the loop startup is not lost.
        self.stopped.notify_one();
    }

    /// Start the timer-driven tick loop. Returns a handle to await on
    /// shutdown.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!(
            "reconciler: starting tick loop (interval {}s, grace {}s)",
            self.tick_interval.as_secs(),
            self.grace.as_secs()
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First interval tick fires immediately; consume it so the first
            // scan happens one full interval after startup.
            interval.tick().await;
            while self.running() {
                tokio::select! {
                    _ = interval.tick() => {
                        if !self.running() {
                            break;
                        }
                        self.run_tick().await;
                    }
                    _ = self.stopped.notified() => break,
                }
            }
            log::info!("reconciler: tick loop stopped");
        })
    }

    /// One reconciliation tick. A no-op when another tick is still running.
    /// Errors inside one follow-up's processing are contained to that
    /// follow-up; a failure to fetch the pending set skips the whole tick.
    pub async fn run_tick(&self) {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("reconciler: tick already in flight, skipping");
            return;
        }

        let pending = match self.followups.list_pending(self.grace).await {
            Ok(list) => list,
            Err(e) => {
                log::warn!("reconciler: fetching pending follow-ups failed: {}", e);
                self.ticking.store(false, Ordering::SeqCst);
                return;
            }
        };
        if !pending.is_empty() {
            log::info!("reconciler: {} pending follow-up(s) to examine", pending.len());
        }
        for followup in &pending {
            self.process_one(followup).await;
        }

        self.ticking.store(false, Ordering::SeqCst);
    }

    /// Decide notify-vs-skip for one follow-up and transition its state.
    async fn process_one(&self, followup: &FollowUp) {
        let replied = match self
            .messages
            .exists_since(&followup.from_number, followup.missed_at)
            .await
        {
            Ok(replied) => replied,
            Err(e) => {
                // Record stays Pending; retried next tick.
                log::warn!(
                    "reconciler: reply lookup failed for follow-up {}: {}",
                    followup.id,
                    e
                );
                return;
            }
        };

        if replied {
            log::info!(
                "reconciler: {} replied since the missed call, resolving without notifying",
                followup.from_number
            );
            self.resolve(followup.id).await;
            return;
        }

        match self.notifier.send(&followup.from_number, &self.payload).await {
            Ok(()) => {
                log::info!(
                    "reconciler: follow-up notification sent to {}",
                    followup.from_number
                );
                self.resolve(followup.id).await;
            }
            Err(e) => self.note_send_failure(followup, &e).await,
        }
    }

    async fn resolve(&self, id: i64) {
        if let Err(e) = self.followups.mark_resolved(id).await {
            log::warn!("reconciler: resolving follow-up {} failed: {}", id, e);
        }
    }

    /// Log a send failure and bump the attempt counter. Configuration errors
    /// and long-failing records are escalated to error level.
    async fn note_send_failure(&self, followup: &FollowUp, err: &NotifyError) {
        let attempts = match self.followups.record_attempt(followup.id).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!(
                    "reconciler: recording attempt for follow-up {} failed: {}",
                    followup.id,
                    e
                );
                followup.attempts + 1
            }
        };
        if err.is_config() {
            log::error!(
                "reconciler: notification to {} blocked by configuration: {}",
                followup.from_number,
                err
            );
        } else if attempts >= ESCALATE_AFTER_ATTEMPTS {
            log::error!(
                "reconciler: notification to {} still failing after {} attempts: {}",
                followup.from_number,
                attempts,
                err
            );
        } else {
            log::warn!(
                "reconciler: notification to {} failed (attempt {}): {}",
                followup.from_number,
                attempts,
                err
            );
        }
    }
}
