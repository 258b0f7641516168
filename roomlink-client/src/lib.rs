/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

//! Client-side connection manager for a multi-party audio/video conference.
//!
//! This crate manages the lifecycle of a conference connection — connect to
//! a server, join a named room, publish local tracks, receive remote
//! participants' tracks, switch rooms, disconnect — while keeping a simple,
//! eventually-consistent view of the target room and the published tracks
//! available at all times. Rendering, device handling, and the wire
//! transport are deliberately out of scope: the transport is consumed
//! through the [`Connection`]/[`Conference`] traits, and remote-track
//! changes are reported to the UI layer via a snapshot callback.
//!
//! All operations are serialized through a single machine task, so no two
//! lifecycle transitions ever overlap; an operation arriving while another
//! is in flight simply waits its turn. The target room is the exception:
//! [`RoomConnection::set_room`] takes effect immediately, and whichever
//! join happens next is made against the latest value.
//!
//! # Outline of usage
//!
//! ```no_run
//! use roomlink_client::{RoomConnection, RoomOptions, ServerAddress, DEFAULT_JOIN_TIMEOUT};
//!
//! # fn transport_factory(_: &ServerAddress) -> Box<dyn roomlink_client::Connection> { unimplemented!() }
//! # async fn example() -> anyhow::Result<()> {
//! let connection = RoomConnection::new(RoomOptions {
//!     server: ServerAddress::new("meet.example.org")?,
//!     room: "room1".into(),
//!     join_timeout: DEFAULT_JOIN_TIMEOUT,
//!     on_remote_tracks_changed: Box::new(|tracks| {
//!         // hand the snapshot to the UI layer
//!         println!("{} remote tracks", tracks.len());
//!     }),
//!     connection_factory: Box::new(transport_factory),
//! });
//!
//! connection.connect().await?;
//! connection.set_room("room2"); // leaves room1, joins room2
//! connection.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod transport;

pub use connection::{RoomConnection, RoomOptions, RoomState, DEFAULT_JOIN_TIMEOUT};
pub use error::{ConnectError, TrackError};
pub use transport::{
    Conference, ConferenceEvent, ConferenceOptions, Connection, EventSink, ServerAddress,
};

pub use roomlink_types as types;
