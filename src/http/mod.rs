//! HTTP entry point for the admission service.

mod client_ip;
mod handler;
mod server;

pub use client_ip::{resolve_client_ip, UNKNOWN_CLIENT};
pub use handler::{AdmissionBody, ApiError, AppState};
pub use server::{router, HttpServer};
