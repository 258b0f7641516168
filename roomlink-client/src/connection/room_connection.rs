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

//! Public handle to the room connection state machine.
//!
//! [`RoomConnection`] is cheap to construct and owns nothing but channel
//! endpoints; the actual state lives in the machine task spawned by
//! [`RoomConnection::new`]. Every operation is forwarded as a command and
//! completes when the machine has fully resolved the transition, so
//! concurrent callers can never observe a half-finished one.

use log::warn;
use roomlink_types::{RoomId, Track, TrackKind};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use super::machine::{Command, RoomMachine};
use crate::error::{ConnectError, TrackError};
use crate::transport::{Connection, ServerAddress};

/// Join attempts that take longer than this are failed with
/// [`ConnectError::JoinTimeout`] instead of pending forever.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration and callbacks for a [`RoomConnection`].
pub struct RoomOptions {
    /// The signaling endpoint to connect to.
    pub server: ServerAddress,

    /// The room to join on connect. Can be changed at any time with
    /// [`RoomConnection::set_room`].
    pub room: RoomId,

    /// How long to wait for the conference-joined signal before failing
    /// the attempt. [`DEFAULT_JOIN_TIMEOUT`] is a reasonable choice.
    pub join_timeout: Duration,

    /// Invoked with a snapshot of the remote tracks whenever the set
    /// changes. The UI layer groups by participant and renders; the
    /// snapshot is ordered by arrival.
    pub on_remote_tracks_changed: Box<dyn Fn(Vec<Track>) + Send + Sync>,

    /// Creates a fresh signaling connection for each connect attempt.
    pub connection_factory: Box<dyn Fn(&ServerAddress) -> Box<dyn Connection> + Send + Sync>,
}

impl fmt::Debug for RoomOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomOptions")
            .field("server", &self.server)
            .field("room", &self.room)
            .field("join_timeout", &self.join_timeout)
            .finish_non_exhaustive()
    }
}

/// Observable lifecycle of the connection.
///
/// Mirrors the machine's internal state without carrying its handles.
/// `Connecting`, `Switching`, and `Disconnecting` are visible while the
/// corresponding transition is running; between operations the connection
/// rests in `Disconnected` or `InRoom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomState {
    Disconnected,
    Connecting,
    InRoom { room: RoomId },
    Switching,
    Disconnecting,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomState::Disconnected => f.write_str("disconnected"),
            RoomState::Connecting => f.write_str("connecting"),
            RoomState::InRoom { room } => write!(f, "in room {room}"),
            RoomState::Switching => f.write_str("switching"),
            RoomState::Disconnecting => f.write_str("disconnecting"),
        }
    }
}

/// Client-side connection manager for a multi-party conference session.
///
/// Dropping the handle shuts the machine down, leaving the active
/// conference and closing the connection if one is up.
pub struct RoomConnection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    target_tx: watch::Sender<RoomId>,
    state_rx: watch::Receiver<RoomState>,
}

impl RoomConnection {
    /// Create the connection manager and spawn its machine task.
    ///
    /// Must be called within a tokio runtime. The connection starts out
    /// disconnected; call [`connect`](Self::connect) to join
    /// `options.room`.
    pub fn new(options: RoomOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (target_tx, target_rx) = watch::channel(options.room.clone());
        let (state_tx, state_rx) = watch::channel(RoomState::Disconnected);
        let machine = RoomMachine::new(options, cmd_rx, target_rx, state_tx);
        tokio::spawn(machine.run());
        Self {
            cmd_tx,
            target_tx,
            state_rx,
        }
    }

    /// Connect to the server and join the current target room.
    ///
    /// Resolves once the join (including re-publishing any held local
    /// tracks) has completed.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect { done })
            .map_err(|_| ConnectError::Closed)?;
        rx.await.map_err(|_| ConnectError::Closed)?
    }

    /// Leave the active conference and close the connection.
    ///
    /// Resolves once fully disconnected; a no-op if already disconnected.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { done })
            .map_err(|_| ConnectError::Closed)?;
        rx.await.map_err(|_| ConnectError::Closed)
    }

    /// Update the target room.
    ///
    /// Takes effect immediately: if a join is about to happen (first
    /// connect, or a room switch already in flight), it will be made
    /// against the value current at join time. If the connection is
    /// in a room, an asynchronous leave-and-rejoin cycle starts.
    pub fn set_room(&self, room: impl Into<RoomId>) {
        let room = room.into();
        if self.target_tx.send(room).is_err() {
            warn!("set_room ignored: room connection is closed");
            return;
        }
        let _ = self.cmd_tx.send(Command::SyncRoom);
    }

    /// The room the caller currently wants to be in. Not necessarily the
    /// room actually joined while a switch is in flight.
    pub fn target_room(&self) -> RoomId {
        self.target_tx.borrow().clone()
    }

    /// Replace the local video track, re-publishing against the live
    /// conference when in a room (old track withdrawn before the new one
    /// is added, so two video tracks are never published at once).
    pub async fn set_local_video_track(&self, track: Track) -> Result<(), TrackError> {
        self.set_local_track(TrackKind::Video, track).await
    }

    /// Replace the local audio track. Same semantics as
    /// [`set_local_video_track`](Self::set_local_video_track).
    pub async fn set_local_audio_track(&self, track: Track) -> Result<(), TrackError> {
        self.set_local_track(TrackKind::Audio, track).await
    }

    async fn set_local_track(&self, kind: TrackKind, track: Track) -> Result<(), TrackError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SetLocalTrack { kind, track, done })
            .map_err(|_| TrackError::Closed)?;
        rx.await.map_err(|_| TrackError::Closed)?
    }

    /// Snapshot of the current lifecycle state.
    pub fn room_state(&self) -> RoomState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<RoomState> {
        self.state_rx.clone()
    }

    /// `true` while connected and joined to a room.
    pub fn is_connected(&self) -> bool {
        matches!(self.room_state(), RoomState::InRoom { .. })
    }
}

impl fmt::Debug for RoomConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomConnection")
            .field("state", &self.room_state())
            .field("target_room", &self.target_room())
            .finish()
    }
}
