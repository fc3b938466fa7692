//! Admission control: per-client quotas, token buckets and concurrency slots.

mod bucket;
mod concurrency;
mod controller;
mod history;
mod key;
mod quota;

pub use bucket::{BucketSnapshot, TokenBucket};
pub use concurrency::ConcurrencySlotLimiter;
pub use controller::{
    AdmissionController, AdmissionDecision, ClientBuckets, ClientMetrics, ConcurrencyGauge,
    DenialReason, MetricsSnapshot, SlotGuard,
};
pub use history::{OperationCounts, RequestHistory, DEFAULT_HISTORY_CAPACITY};
pub use key::{CellKey, OperationClass};
pub use quota::{ClientTier, QuotaSpec, QuotaTable, TierQuotas};
