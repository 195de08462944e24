//! Gatehouse - Request Admission Service
//!
//! This crate decides whether a request is admitted, triggers a block, or is
//! already blocked. Requests are grouped by resource and by user or client
//! IP, counted in fixed windows, and blocked for a fixed period once a
//! window's limit is reached.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod response;
pub mod store;
pub mod sweeper;
