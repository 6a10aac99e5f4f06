//! Options order-flow signal pipeline: CSV tailing, normalization,
//! conviction scoring, a staged filter cascade, SQLite persistence, and a
//! monitor state machine over an externally managed watch-list.

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod monitor;
pub mod normalize;
pub mod providers;
pub mod replay;
pub mod score;
pub mod tailer;
pub mod types;
