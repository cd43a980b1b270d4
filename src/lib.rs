//! tierroute - budget-constrained multi-tier request router for hosted LLMs
//!
//! Classifies each request by complexity, maps it to a cost tier
//! (free, cheap, premium), checks it against a daily budget with a safety
//! buffer, and routes it through a ranked fallback chain that respects
//! per-model rate-limit cooldowns. Complex requests are decomposed by one
//! planning call into subtasks that run on the cheapest tier.

pub mod budget;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod router;
pub mod telemetry;
