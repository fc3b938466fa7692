//! Turnstile - Admission-Control Gateway
//!
//! This crate implements an HTTP gateway that sits in front of an
//! issue-tracker REST API. Each request is admitted against per-client
//! quotas (a token bucket for rate and a slot limiter for concurrency)
//! and then forwarded upstream with bounded, backed-off retries.

pub mod admission;
pub mod clients;
pub mod config;
pub mod error;
pub mod forward;
pub mod http;

#[cfg(test)]
pub(crate) mod test_util;
