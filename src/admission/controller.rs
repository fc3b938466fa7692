//! Core admission controller.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::bucket::{BucketSnapshot, TokenBucket};
use super::concurrency::ConcurrencySlotLimiter;
use super::history::{OperationCounts, RequestHistory, DEFAULT_HISTORY_CAPACITY};
use super::key::{CellKey, OperationClass};
use super::quota::{ClientTier, QuotaTable};
use crate::error::Result;

/// Window used for the `requests_last_minute` metric by default.
const DEFAULT_HISTORY_WINDOW: Duration = Duration::from_secs(60);

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The client's tier has no quota for this operation class
    NoQuotaConfigured,
    /// Every concurrency slot for the cell is in use
    ConcurrencyExceeded,
    /// The token bucket for the cell is empty
    RateExceeded,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenialReason::NoQuotaConfigured => "no quota configured",
            DenialReason::ConcurrencyExceeded => "concurrency limit exceeded",
            DenialReason::RateExceeded => "rate limit exceeded",
        };
        f.write_str(s)
    }
}

/// Outcome of an admission check.
#[derive(Debug)]
pub enum AdmissionDecision {
    /// The request may proceed. The guard holds its concurrency slot.
    Admitted(SlotGuard),
    /// The request was rejected.
    Denied(DenialReason),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted(_))
    }

    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            AdmissionDecision::Admitted(_) => None,
            AdmissionDecision::Denied(reason) => Some(*reason),
        }
    }
}

/// A held concurrency slot.
///
/// The slot is returned exactly once: either through [`SlotGuard::release`]
/// or when the guard is dropped, whichever comes first. Holding the guard
/// across the forwarded call ties the slot to the call's real completion,
/// including cancellation of the handling task.
#[derive(Debug)]
#[must_use = "dropping the guard releases the concurrency slot immediately"]
pub struct SlotGuard {
    key: CellKey,
    slots: Arc<ConcurrencySlotLimiter>,
    released: bool,
}

impl SlotGuard {
    fn new(key: CellKey, slots: Arc<ConcurrencySlotLimiter>) -> Self {
        Self {
            key,
            slots,
            released: false,
        }
    }

    pub fn key(&self) -> &CellKey {
        &self.key
    }

    /// Return the slot now.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.slots.release(&self.key)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.slots.release(&self.key) {
            error!(key = %self.key, error = %e, "Failed to release concurrency slot");
        }
    }
}

/// In-flight counts per operation class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConcurrencyGauge {
    pub read: u32,
    pub write: u32,
}

/// Bucket state per operation class; absent until the first request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientBuckets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<BucketSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write: Option<BucketSnapshot>,
}

/// Metrics for one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientMetrics {
    pub concurrent: ConcurrencyGauge,
    pub buckets: ClientBuckets,
    pub requests_last_minute: OperationCounts,
}

/// Metrics for every client seen so far.
///
/// Each cell is read consistently on its own; cells are not read at a
/// single common instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub clients: BTreeMap<String, ClientMetrics>,
    pub timestamp: String,
}

/// Composes the concurrency limiter and the token buckets into one
/// admission decision per request.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug)]
pub struct AdmissionController {
    /// Static quota table
    quotas: QuotaTable,
    /// Token buckets indexed by cell key
    buckets: DashMap<CellKey, Arc<TokenBucket>>,
    /// In-flight request counts
    slots: Arc<ConcurrencySlotLimiter>,
    /// Admitted requests, for metrics
    history: RequestHistory,
    history_window: Duration,
}

impl AdmissionController {
    /// Create a new controller with the default history settings.
    pub fn new(quotas: QuotaTable) -> Self {
        Self::with_history(quotas, DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_WINDOW)
    }

    /// Create a new controller with explicit history settings.
    pub fn with_history(quotas: QuotaTable, capacity: usize, window: Duration) -> Self {
        Self {
            quotas,
            buckets: DashMap::new(),
            slots: Arc::new(ConcurrencySlotLimiter::new()),
            history: RequestHistory::new(capacity),
            history_window: window,
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// The concurrency slot is taken before the token: a slot can be handed
    /// back when the bucket is empty, a consumed token cannot.
    pub fn admit(
        &self,
        client_id: &str,
        tier: &ClientTier,
        operation: OperationClass,
        trace_id: &str,
    ) -> AdmissionDecision {
        let key = CellKey::new(client_id, operation);

        trace!(key = %key, tier = %tier, trace_id = %trace_id, "Checking admission");

        let Some(quota) = self.quotas.find_quota(tier, operation) else {
            warn!(
                target: "turnstile::admission",
                client_id = %client_id,
                tier = %tier,
                operation = %operation,
                trace_id = %trace_id,
                "No quota configured"
            );
            return AdmissionDecision::Denied(DenialReason::NoQuotaConfigured);
        };

        if !self.slots.try_acquire(&key, quota.concurrent_limit) {
            info!(
                target: "turnstile::admission",
                key = %key,
                active = self.slots.active(&key),
                limit = quota.concurrent_limit,
                trace_id = %trace_id,
                "Concurrency limit reached"
            );
            return AdmissionDecision::Denied(DenialReason::ConcurrencyExceeded);
        }

        let bucket = self.bucket(&key, quota.refill_rate_per_second(), quota.burst_size);
        if !bucket.try_consume(1) {
            if let Err(e) = self.slots.release(&key) {
                error!(key = %key, error = %e, "Rollback of concurrency slot failed");
            }
            info!(
                target: "turnstile::admission",
                key = %key,
                available_tokens = bucket.peek_available(),
                trace_id = %trace_id,
                "Rate limit reached"
            );
            return AdmissionDecision::Denied(DenialReason::RateExceeded);
        }

        self.history.record(client_id, operation);

        debug!(
            target: "turnstile::admission",
            key = %key,
            tier = %tier,
            trace_id = %trace_id,
            "Request admitted"
        );
        AdmissionDecision::Admitted(SlotGuard::new(key, self.slots.clone()))
    }

    /// Get the bucket for a cell, creating it on first use.
    fn bucket(&self, key: &CellKey, rate: f64, capacity: u32) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.value().clone();
        }
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    rate = rate,
                    capacity = capacity,
                    "Creating new token bucket"
                );
                Arc::new(TokenBucket::new(rate, f64::from(capacity)))
            })
            .value()
            .clone()
    }

    /// Tokens currently available for a cell, if its bucket exists.
    pub fn available_tokens(&self, client_id: &str, operation: OperationClass) -> Option<f64> {
        let key = CellKey::new(client_id, operation);
        self.buckets
            .get(&key)
            .map(|b| b.value().clone())
            .map(|b| b.peek_available())
    }

    /// In-flight requests for a cell.
    pub fn active_requests(&self, client_id: &str, operation: OperationClass) -> u32 {
        self.slots.active(&CellKey::new(client_id, operation))
    }

    /// Get the number of token buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Take a metrics snapshot of every known client.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut client_ids: BTreeSet<String> = self
            .buckets
            .iter()
            .map(|entry| entry.key().client_id.clone())
            .collect();
        client_ids.extend(self.slots.keys().into_iter().map(|key| key.client_id));

        let clients = client_ids
            .into_iter()
            .map(|client_id| {
                let metrics = self.client_metrics(&client_id);
                (client_id, metrics)
            })
            .collect();

        MetricsSnapshot {
            clients,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn client_metrics(&self, client_id: &str) -> ClientMetrics {
        let bucket_snapshot = |operation| {
            self.buckets
                .get(&CellKey::new(client_id, operation))
                .map(|b| b.value().clone())
                .map(|b| b.snapshot())
        };

        ClientMetrics {
            concurrent: ConcurrencyGauge {
                read: self.active_requests(client_id, OperationClass::Read),
                write: self.active_requests(client_id, OperationClass::Write),
            },
            buckets: ClientBuckets {
                read: bucket_snapshot(OperationClass::Read),
                write: bucket_snapshot(OperationClass::Write),
            },
            requests_last_minute: self.history.counts_within(client_id, self.history_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{QuotaSpec, TierQuotas};

    fn test_quotas(spec: QuotaSpec) -> QuotaTable {
        let mut table = QuotaTable::empty();
        table.insert(
            ClientTier::Basic,
            TierQuotas {
                read: Some(spec),
                write: None,
            },
        );
        table
    }

    fn admitted(decision: AdmissionDecision) -> SlotGuard {
        match decision {
            AdmissionDecision::Admitted(guard) => guard,
            AdmissionDecision::Denied(reason) => panic!("expected admission, got {:?}", reason),
        }
    }

    #[test]
    fn test_admission_creates_bucket_and_slot() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(60.0, 2, 5)));
        assert_eq!(controller.bucket_count(), 0);

        let guard = admitted(controller.admit("c1", &ClientTier::Basic, OperationClass::Read, "t1"));
        assert_eq!(guard.key(), &CellKey::new("c1", OperationClass::Read));
        assert_eq!(controller.bucket_count(), 1);
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 1);

        drop(guard);
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 0);
    }

    #[test]
    fn test_no_quota_leaves_state_untouched() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(60.0, 2, 5)));

        let decision = controller.admit("c1", &ClientTier::Basic, OperationClass::Write, "t1");
        assert_eq!(decision.reason(), Some(DenialReason::NoQuotaConfigured));

        let decision = controller.admit("c1", &ClientTier::Premium, OperationClass::Read, "t2");
        assert_eq!(decision.reason(), Some(DenialReason::NoQuotaConfigured));

        assert_eq!(controller.bucket_count(), 0);
        assert_eq!(controller.active_requests("c1", OperationClass::Write), 0);
        assert!(controller.snapshot().clients.is_empty());
    }

    #[test]
    fn test_decisions_logged_under_admission_target() {
        let logs = crate::test_util::CapturedLogs::default();
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(0.0, 1, 1)));
        let tier = ClientTier::Basic;

        tracing::subscriber::with_default(logs.subscriber(), || {
            let _held = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
            let _ = controller.admit("c1", &tier, OperationClass::Read, "t2");
            let _ = controller.admit("c1", &tier, OperationClass::Write, "t3");
        });
        let drained = AdmissionController::new(test_quotas(QuotaSpec::new(0.0, 5, 1)));
        tracing::subscriber::with_default(logs.subscriber(), || {
            let _ = drained.admit("c2", &tier, OperationClass::Read, "t4");
            let _ = drained.admit("c2", &tier, OperationClass::Read, "t5");
        });

        let target = "turnstile::admission";
        let admitted_events = logs.find(target, "Request admitted");
        assert_eq!(admitted_events.len(), 2);
        assert_eq!(admitted_events[0]["fields"]["trace_id"], "t1");
        assert_eq!(logs.find(target, "Concurrency limit reached").len(), 1);
        assert_eq!(logs.find(target, "No quota configured").len(), 1);

        let rate = logs.find(target, "Rate limit reached");
        assert_eq!(rate.len(), 1);
        assert_eq!(rate[0]["fields"]["trace_id"], "t5");
        assert_eq!(rate[0]["level"], "INFO");
    }

    #[test]
    fn test_concurrency_limit_and_release() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(600.0, 2, 100)));
        let tier = ClientTier::Basic;

        let first = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
        let _second = admitted(controller.admit("c1", &tier, OperationClass::Read, "t2"));

        let third = controller.admit("c1", &tier, OperationClass::Read, "t3");
        assert_eq!(third.reason(), Some(DenialReason::ConcurrencyExceeded));

        first.release().unwrap();
        let fourth = controller.admit("c1", &tier, OperationClass::Read, "t4");
        assert!(fourth.is_allowed());
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 2);
    }

    #[test]
    fn test_concurrency_denial_does_not_consume_token() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(0.0, 1, 5)));
        let tier = ClientTier::Basic;

        let _held = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
        let before = controller.available_tokens("c1", OperationClass::Read).unwrap();

        let denied = controller.admit("c1", &tier, OperationClass::Read, "t2");
        assert_eq!(denied.reason(), Some(DenialReason::ConcurrencyExceeded));
        assert_eq!(
            controller.available_tokens("c1", OperationClass::Read),
            Some(before)
        );
    }

    #[test]
    fn test_rate_denial_rolls_back_slot() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(0.0, 10, 2)));
        let tier = ClientTier::Basic;

        let _a = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
        let _b = admitted(controller.admit("c1", &tier, OperationClass::Read, "t2"));
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 2);

        let denied = controller.admit("c1", &tier, OperationClass::Read, "t3");
        assert_eq!(denied.reason(), Some(DenialReason::RateExceeded));
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 2);
    }

    #[test]
    fn test_explicit_release_then_drop_releases_once() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(600.0, 3, 10)));
        let tier = ClientTier::Basic;

        let _other = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
        let guard = admitted(controller.admit("c1", &tier, OperationClass::Read, "t2"));
        guard.release().unwrap();

        // Dropping after release must not take a second slot back.
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 1);
    }

    #[test]
    fn test_clients_do_not_share_cells() {
        let controller = AdmissionController::new(test_quotas(QuotaSpec::new(0.0, 1, 1)));
        let tier = ClientTier::Basic;

        let _a = admitted(controller.admit("c1", &tier, OperationClass::Read, "t1"));
        let _b = admitted(controller.admit("c2", &tier, OperationClass::Read, "t2"));
        assert_eq!(controller.bucket_count(), 2);
    }

    #[test]
    fn test_snapshot_reports_client_state() {
        let controller = AdmissionController::new(QuotaTable::default());

        let _held = admitted(controller.admit(
            "client-001",
            &ClientTier::Premium,
            OperationClass::Write,
            "t1",
        ));
        drop(admitted(controller.admit(
            "client-001",
            &ClientTier::Premium,
            OperationClass::Read,
            "t2",
        )));

        let snapshot = controller.snapshot();
        let metrics = &snapshot.clients["client-001"];
        assert_eq!(metrics.concurrent, ConcurrencyGauge { read: 0, write: 1 });
        assert_eq!(
            metrics.requests_last_minute,
            OperationCounts { read: 1, write: 1 }
        );

        let write = metrics.buckets.write.unwrap();
        assert_eq!(write.capacity, 30.0);
        assert_eq!(write.rate_per_second, 2.0);
        assert!(write.available_tokens < 30.0);
        assert!(metrics.buckets.read.is_some());
    }

    #[test]
    fn test_snapshot_serializes_without_missing_buckets() {
        let controller = AdmissionController::new(QuotaTable::default());
        drop(controller.admit("c1", &ClientTier::Basic, OperationClass::Read, "t1"));

        let json = serde_json::to_value(controller.snapshot()).unwrap();
        let buckets = &json["clients"]["c1"]["buckets"];
        assert!(buckets.get("read").is_some());
        assert!(buckets.get("write").is_none());
        assert_eq!(json["clients"]["c1"]["concurrent"]["read"], 0);
    }

    #[test]
    fn test_concurrent_admission_is_linearizable() {
        let controller = Arc::new(AdmissionController::new(test_quotas(QuotaSpec::new(
            0.0, 1000, 50,
        ))));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let controller = controller.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|j| {
                            let trace = format!("t{}-{}", i, j);
                            controller
                                .admit("c1", &ClientTier::Basic, OperationClass::Read, &trace)
                                .is_allowed()
                        })
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(controller.active_requests("c1", OperationClass::Read), 0);
    }
}
