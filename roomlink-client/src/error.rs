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

//! Error types for the room connection core.
//!
//! Failures are local to the call that triggered them: each async operation
//! reports through its own completion, and nothing is retried automatically.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`RoomConnection::connect`](crate::RoomConnection::connect)
/// and [`RoomConnection::disconnect`](crate::RoomConnection::disconnect).
#[derive(Debug, Error)]
pub enum ConnectError {
    /// `connect()` was called while a connection already exists.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport reported a connection failure. The room connection is
    /// back in the disconnected state.
    #[error("connection to the signaling server failed: {0}")]
    ConnectFailed(anyhow::Error),

    /// Creating, joining, or publishing into the target conference failed
    /// for this attempt.
    #[error("conference join failed: {0}")]
    JoinFailed(anyhow::Error),

    /// The conference-joined signal did not arrive within the configured
    /// join timeout.
    #[error("conference join did not complete within {0:?}")]
    JoinTimeout(Duration),

    /// The room connection task has shut down and can no longer accept
    /// operations.
    #[error("room connection is closed")]
    Closed,
}

/// Errors returned by the local-track assignment operations.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Removing the previous track or publishing the new one against the
    /// live conference failed.
    #[error("publishing the local track failed: {0}")]
    PublishFailed(anyhow::Error),

    /// The room connection task has shut down.
    #[error("room connection is closed")]
    Closed,
}
