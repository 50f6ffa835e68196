//! task-warden
//!
//! Task-tree delegation engine for a small fleet of autonomous agent
//! workers: task lifecycle state machine, single-gate dependency blocking,
//! load-aware placement, and idempotent re-delegation of stuck tasks.

pub mod collab;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod tick;
pub mod types;
pub mod worker;
