//! Floodgate - Fixed-Window Admission Control
//!
//! This crate decides, per caller identity, whether a request may proceed or
//! has exceeded its rate. Counters live in a shared store reached through the
//! [`store::CounterStore`] trait; when that store fails, requests are
//! admitted rather than rejected.

pub mod admission;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

#[cfg(test)]
mod test_support;
