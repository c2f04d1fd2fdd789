//! # Guild Jukebox
//!
//! Per-guild playback orchestration for Discord music bots: a bounded queue
//! per guild, a staged stream resolver, and a session state machine that
//! drives a songbird voice connection and survives late completions,
//! flaky providers and idle guilds.

pub mod audio;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;
