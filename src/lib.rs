#![forbid(unsafe_code)]

//! Comment threads, comment votes and liked videos for NewTube.
//!
//! All state lives in one SQLite database opened through [`db::Store`];
//! [`service::Engagement`] is the entry point used by the HTTP backend.

pub mod aggregator;
pub mod catalog;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod liked;
pub mod model;
pub mod playlists;
pub mod service;
pub mod threads;
pub mod votes;

pub use error::{EngagementError, EngagementResult};
pub use service::Engagement;
