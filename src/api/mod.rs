//! HTTP API
//!
//! axum surface over the settlement coordinator: pool queries, odds, entry
//! lifecycle, admin pool management and Prometheus metrics.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod security;
pub mod server;

pub use server::{build_state, create_app, treasury_from_config, ApiServer};
