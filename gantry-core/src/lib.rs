//! Gantry Core
//!
//! Core types shared by the Gantry CI runner and its control-plane client.
//!
//! This crate contains:
//! - Wire types: messages, job requests, timeline records, agent records
//! - Polymorphic value trees: template tokens and pipeline context data

pub mod agent;
pub mod context;
pub mod message;
pub mod template;
pub mod timeline;
