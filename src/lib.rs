//! warden: the enforcement pipeline behind an AI pair-programming assistant.
//!
//! The host tool calls into this crate at its hook points. Each event runs a
//! fixed stage pipeline: a health gate that may block, then context budget
//! tracking, session identity, task decision scoring, capability matching,
//! failure-pattern consultation and session-chain bookkeeping, all of which
//! degrade gracefully rather than fail the user's action.

pub mod capability;
pub mod chain;
pub mod cli;
pub mod config;
pub mod context;
pub mod decision;
pub mod failures;
pub mod health;
pub mod hooks;
pub mod lock;
pub mod process;
pub mod session;
pub mod state;
