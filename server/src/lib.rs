//! ReliQ Agent Library
//!
//! Core modules for the ReliQ agent and its x402 facilitator: vault
//! lifecycle over a pluggable ledger, the AI proof oracle and pay-per-call
//! admission control.

pub mod app_state;
pub mod chain;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod payment;
pub mod routes;
pub mod services;
