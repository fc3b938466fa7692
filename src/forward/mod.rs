//! Forwarding of admitted requests to the upstream API.

mod executor;
mod outcome;
mod transport;

pub use executor::{tokio_delay, DelayFn, ForwardRequest, Forwarded, ForwardingExecutor};
pub use outcome::{ForwardOutcome, OutcomeSink, OutcomeStatus, TracingSink};
pub use transport::{ReqwestTransport, Transport, TransportError, UpstreamRequest, UpstreamResponse};
