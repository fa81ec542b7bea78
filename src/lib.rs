//! Turnstile - Per-Client Admission Control
//!
//! This crate decides, per client key, whether a request is admitted under an
//! "at most N requests per window" fixed-window policy. Counters live in a
//! swappable backend: an in-process map or a shared Redis instance.

pub mod config;
pub mod error;
pub mod ratelimit;
