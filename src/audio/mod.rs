//! # Audio Module
//!
//! Queue and playback sequencing for the bot.
//!
//! ### [`queue`] - Track Queue
//! - Strict FIFO of pending tracks, insertion order = playback order
//! - Each entry owns the downloaded file it references
//!
//! ### [`player`] - Playback Controller
//! - Per-guild sessions (queue, volume, resolution epoch)
//! - Starts the next track when idle and chains on `TrackEvent::End`
//! - Deletes a track's file exactly when it finishes or the queue is
//!   force-cleared

pub mod player;
pub mod queue;
