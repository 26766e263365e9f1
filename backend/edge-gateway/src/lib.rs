//! Edge gateway admission layer.
//!
//! Resolves who is calling, decides whether the call may proceed, prices
//! GraphQL operations before they run, and meters what was admitted.

pub mod admission;
pub mod auth;
pub mod bridge;
pub mod clients;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod schema;
pub mod upstream;
pub mod usage;
