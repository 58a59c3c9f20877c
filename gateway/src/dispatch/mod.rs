//! Dispatch and correlation of prediction requests.
//!
//! This module provides:
//! - Bounded-wait dispatch with per-call reply tags
//! - Fire-and-forget dispatch with result lookup in the result cache
//! - The pending-reply registry shared with the reply listener

mod gateway;
mod pending;

pub use gateway::{DispatchGateway, DEFAULT_REPLY_TIMEOUT};
pub use pending::{PendingGuard, PendingRegistry, ReplyBody};
