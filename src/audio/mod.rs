//! # Audio Module
//!
//! Per-guild playback orchestration.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::PlaybackSession`] per guild, created on first use
//! - Idle sweep that disconnects sessions nobody is listening to
//!
//! ### [`session`] - Playback Session
//! - State machine `Idle -> Resolving -> Playing <-> Paused -> Stopped`
//! - Epoch guard against late completions and stale resolutions
//! - Bounded queue-wide retry budget on consecutive failures
//!
//! ### [`queue`] - Queue Management
//! - Pointer-based queue with loop mode and shuffle that keeps the current track
//!
//! ### [`transport`] / [`voice`] - Voice Transport
//! - Trait seam for the voice connection, implemented over songbird
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::{registry::SessionRegistry, track::Track};
//! use serenity::all::{ChannelId, GuildId};
//!
//! # async fn example(registry: &SessionRegistry) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//! let session = registry
//!     .get_or_connect(guild_id, ChannelId::new(42), None)
//!     .await?;
//!
//! session.enqueue(Track::from_query("daft punk one more time")?).await?;
//! session.pause().await?;
//! session.resume().await?;
//! session.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;
pub mod transport;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{PlayerEvent, PlayerEventKind, StopReason};
pub use registry::SessionRegistry;
pub use session::{PlaybackSession, PlayerState, SessionSettings, SessionSnapshot};
pub use track::{Track, TrackReference};
