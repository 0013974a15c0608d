//! closeout-core: closed-account reconciliation and post-closure cleanup.
//!
//! Select closed accounts from the core banking database, classify each one
//! against the business rules, run the cleanup action (member notice email or a
//! batched status update), and leave a partitioned CSV audit of every record.

pub mod audit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod notifier;
pub mod record;
pub mod selector;
pub mod transport;
pub mod types;
pub mod updater;
