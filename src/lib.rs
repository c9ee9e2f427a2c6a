//! Approvd — approval-request tracker core.
//!
//! Requests wait in a single global FIFO queue until an authorized approver
//! accepts or rejects them. The store keeps `queue_position` dense (1..N over
//! the pending set, ordered by creation time) across every insert, decision
//! and purge, inside the same transaction as the triggering write.

pub mod auth;
pub mod config;
pub mod errors;
pub mod models;
pub mod notification;
pub mod store;
