//! Collaborative jukebox core for MPD-style playback daemons.
//!
//! One persistent connection to the line-oriented playback-control protocol
//! is shared by every caller: foreground commands (add a track, query
//! status) interleave with the scheduler's long-lived change wait over the
//! same socket, survive disconnects transparently, and keep the in-process
//! view of playback state consistent with the daemon's.
//!
//! [`MpdClient`] is the protocol client; [`Player`] is the scheduler built
//! on top of it, mixing explicit user requests with an anti-repeat random
//! rotation. The track catalog and the durable state slot are external
//! collaborators reached through the [`Catalog`] and [`StateStore`] traits.
//!
//! # Logging
//!
//! This library uses the `tracing` crate for logging. To enable logs,
//! initialize a tracing subscriber in your application.
//!
//! Example using `tracing_subscriber`:
//! ```no_run
//! use tracing::Level;
//! use tracing_subscriber::FmtSubscriber;
//!
//! let subscriber = FmtSubscriber::builder()
//!     .with_max_level(Level::DEBUG)
//!     .finish();
//!
//! tracing::subscriber::set_global_default(subscriber)
//!     .expect("Failed to set tracing subscriber");
//! ```
//!
//! At DEBUG the full wire traffic is logged (`> command` / `< response`);
//! WARN covers reconnects and swallowed transport faults.

mod catalog;
pub use catalog::{decode_locator, Catalog, Track, TrackId};
mod client;
pub use client::{ConnectionState, MpdClient};
mod codec;
pub use codec::{MpdCodec, ResponseFrame};
mod commands;
pub use commands::{escape_argument, Subsystem};
mod error;
pub use error::{CatalogError, MpdError, PlayerError, StoreError, ACK_ERROR_NO_EXIST};
mod events;
pub use events::{NowPlaying, PlayerEvent};
mod player;
pub use player::Player;
mod response;
pub use response::{Response, Value};
mod settings;
pub use settings::{Settings, SETTINGS};
mod store;
pub use store::{FileStateStore, PersistedState, StateStore};
