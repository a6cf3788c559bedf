//! Once-per-day delivery.
//!
//! The guard is the only state shared across triggers. The check, the send
//! and the record update happen under one async lock, so two concurrent
//! scheduled triggers for the same day produce exactly one send.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Mutex;

use super::digest::DigestDocument;
use crate::sources::{bounded_call, MailTransport};
use crate::types::{DispatchOutcome, ExecutionTrigger};

#[derive(Debug, Default)]
pub struct DeliveryGuard {
    sent_for: Mutex<Option<NaiveDate>>,
}

impl DeliveryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `digest` for `for_date` unless a guarded trigger already
    /// delivered that day. Manual triggers always send; a successful manual
    /// send still marks the day as delivered. A failed send leaves the
    /// record as it was.
    pub async fn attempt_dispatch(
        &self,
        digest: &DigestDocument,
        for_date: NaiveDate,
        trigger: ExecutionTrigger,
        transport: &dyn MailTransport,
        call_timeout: Duration,
    ) -> DispatchOutcome {
        let mut sent_for = self.sent_for.lock().await;

        if trigger.honors_delivery_guard() && *sent_for == Some(for_date) {
            log::info!("Digest for {} already sent, skipping {:?} dispatch", for_date, trigger);
            return DispatchOutcome::AlreadySent;
        }

        let rendering = digest.render();
        match bounded_call("send digest", call_timeout, || transport.send(&rendering)).await {
            Ok(()) => {
                *sent_for = Some(for_date);
                log::info!(
                    "Sent digest for {} ({} meeting(s), {:?})",
                    for_date,
                    digest.meeting_count(),
                    trigger
                );
                DispatchOutcome::Sent
            }
            Err(e) => {
                log::error!("Failed to send digest for {}: {}", for_date, e);
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn is_sent(&self, date: NaiveDate) -> bool {
        *self.sent_for.lock().await == Some(date)
    }

    pub async fn last_sent(&self) -> Option<NaiveDate> {
        *self.sent_for.lock().await
    }

    /// Forget a delivery recorded for a day before `today`.
    /// Returns true if a record was cleared.
    pub async fn roll_over(&self, today: NaiveDate) -> bool {
        let mut sent_for = self.sent_for.lock().await;
        match *sent_for {
            Some(date) if date < today => {
                log::debug!("Delivery record for {} rolled over", date);
                *sent_for = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sources::test_utils::FakeTransport;
    use crate::workflow::digest::assemble_digest;

    const CALL_TIMEOUT: Duration = Duration::from_secs(30);

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn empty_digest(d: u32) -> DigestDocument {
        assemble_digest(day(d), chrono_tz::UTC, Vec::new())
    }

    #[tokio::test]
    async fn test_scheduled_dispatch_is_idempotent() {
        let guard = DeliveryGuard::new();
        let transport = FakeTransport::default();
        let digest = empty_digest(2);

        let first = guard
            .attempt_dispatch(&digest, day(2), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;
        let second = guard
            .attempt_dispatch(&digest, day(2), ExecutionTrigger::Missed, &transport, CALL_TIMEOUT)
            .await;

        assert_eq!(first, DispatchOutcome::Sent);
        assert_eq!(second, DispatchOutcome::AlreadySent);
        assert_eq!(transport.sent_count(), 1);
        assert!(guard.is_sent(day(2)).await);
    }

    #[tokio::test]
    async fn test_manual_always_dispatches() {
        let guard = DeliveryGuard::new();
        let transport = FakeTransport::default();
        let digest = empty_digest(2);

        for _ in 0..2 {
            let outcome = guard
                .attempt_dispatch(&digest, day(2), ExecutionTrigger::Manual, &transport, CALL_TIMEOUT)
                .await;
            assert_eq!(outcome, DispatchOutcome::Sent);
        }
        assert_eq!(transport.sent_count(), 2);

        // The manual send counts as the day's delivery for the scheduler.
        let scheduled = guard
            .attempt_dispatch(&digest, day(2), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;
        assert_eq!(scheduled, DispatchOutcome::AlreadySent);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_record_unset() {
        let guard = DeliveryGuard::new();
        let transport = FakeTransport::default();
        transport.set_failing(true);
        let digest = empty_digest(2);

        let outcome = guard
            .attempt_dispatch(&digest, day(2), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert!(!guard.is_sent(day(2)).await);

        transport.set_failing(false);
        let retry = guard
            .attempt_dispatch(&digest, day(2), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;
        assert_eq!(retry, DispatchOutcome::Sent);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_scheduled_triggers_send_once() {
        let guard = Arc::new(DeliveryGuard::new());
        let transport = Arc::new(FakeTransport::default());
        let digest = Arc::new(empty_digest(2));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let guard = Arc::clone(&guard);
            let transport = Arc::clone(&transport);
            let digest = Arc::clone(&digest);
            handles.push(tokio::spawn(async move {
                guard
                    .attempt_dispatch(
                        &digest,
                        day(2),
                        ExecutionTrigger::Scheduled,
                        transport.as_ref(),
                        CALL_TIMEOUT,
                    )
                    .await
            }));
        }

        let mut sent = 0;
        for handle in handles {
            if handle.await.unwrap() == DispatchOutcome::Sent {
                sent += 1;
            }
        }
        assert_eq!(sent, 1);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_roll_over_clears_previous_day_only() {
        let guard = DeliveryGuard::new();
        let transport = FakeTransport::default();
        guard
            .attempt_dispatch(&empty_digest(2), day(2), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;

        assert!(!guard.roll_over(day(2)).await);
        assert_eq!(guard.last_sent().await, Some(day(2)));

        assert!(guard.roll_over(day(3)).await);
        assert_eq!(guard.last_sent().await, None);

        let next = guard
            .attempt_dispatch(&empty_digest(3), day(3), ExecutionTrigger::Scheduled, &transport, CALL_TIMEOUT)
            .await;
        assert_eq!(next, DispatchOutcome::Sent);
        assert_eq!(transport.sent_count(), 2);
    }
}
