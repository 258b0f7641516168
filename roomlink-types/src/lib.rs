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

//! Shared value types for the roomlink conferencing client.
//!
//! These types describe media tracks and their owners as reported by the
//! signaling transport. They carry no networking logic of their own; the
//! connection core in `roomlink-client` and the UI layer both depend on
//! this crate so that neither has to depend on the other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Opaque unique track identifier assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of the remote peer that published a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Name of a conference room on the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The two media kinds a track can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Error returned when parsing an unrecognized track kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTrackKind(pub String);

impl fmt::Display for InvalidTrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid track kind: {:?}", self.0)
    }
}

impl std::error::Error for InvalidTrackKind {}

impl FromStr for TrackKind {
    type Err = InvalidTrackKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(TrackKind::Video),
            "audio" => Ok(TrackKind::Audio),
            other => Err(InvalidTrackKind(other.to_string())),
        }
    }
}

/// A rendering destination for a media stream (e.g. a video element or an
/// audio output). Implemented by the UI layer; the core only passes sinks
/// through to [`MediaStreamHandle::attach`]/[`MediaStreamHandle::detach`].
pub trait MediaSink: Send + Sync {
    /// Stable identifier of the sink, for logging and bookkeeping.
    fn id(&self) -> &str;
}

/// Operations on the underlying media stream of a track.
///
/// The handle is produced by the media subsystem (capture for local tracks,
/// the transport for remote ones) and stays valid until [`dispose`]d.
///
/// [`dispose`]: MediaStreamHandle::dispose
pub trait MediaStreamHandle: fmt::Debug + Send + Sync {
    /// `true` if this client published the stream itself.
    fn is_local(&self) -> bool;

    fn mute(&self);

    fn unmute(&self);

    /// Start feeding media into the given sink.
    fn attach(&self, sink: &dyn MediaSink);

    /// Stop feeding media into the given sink.
    fn detach(&self, sink: &dyn MediaSink);

    /// Release the underlying stream. The handle must not be used afterwards.
    fn dispose(&self);
}

/// One published or received media stream and its owning participant.
///
/// Identity is the transport-assigned [`TrackId`]: collections of tracks
/// hold at most one entry per id. `participant_id` is `None` for local
/// tracks, which have no remote owner.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub participant_id: Option<ParticipantId>,
    pub kind: TrackKind,
    pub handle: Arc<dyn MediaStreamHandle>,
}

impl Track {
    /// Whether the underlying stream was published by this client.
    pub fn is_local(&self) -> bool {
        self.handle.is_local()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct StubHandle {
        local: bool,
    }

    impl MediaStreamHandle for StubHandle {
        fn is_local(&self) -> bool {
            self.local
        }
        fn mute(&self) {}
        fn unmute(&self) {}
        fn attach(&self, _sink: &dyn MediaSink) {}
        fn detach(&self, _sink: &dyn MediaSink) {}
        fn dispose(&self) {}
    }

    fn track(id: &str, local: bool) -> Track {
        Track {
            id: TrackId::from(id),
            participant_id: (!local).then(|| ParticipantId::from("p1")),
            kind: TrackKind::Video,
            handle: Arc::new(StubHandle { local }),
        }
    }

    #[test]
    fn track_kind_round_trips_through_display() {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let parsed: TrackKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn track_kind_rejects_unknown_strings() {
        let err = "screen".parse::<TrackKind>().unwrap_err();
        assert_eq!(err, InvalidTrackKind("screen".to_string()));
    }

    #[test]
    fn track_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TrackKind::Video).unwrap(), "\"video\"");
        assert_eq!(serde_json::to_string(&TrackKind::Audio).unwrap(), "\"audio\"");
    }

    #[test]
    fn ids_serialize_transparently() {
        let room = RoomId::from("room1");
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"room1\"");
        let back: RoomId = serde_json::from_str("\"room1\"").unwrap();
        assert_eq!(back, room);
    }

    #[test]
    fn track_equality_is_by_id() {
        let a = track("t1", false);
        let b = track("t1", true);
        let c = track("t2", false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn track_reports_locality_of_its_handle() {
        assert!(track("t1", true).is_local());
        assert!(!track("t1", false).is_local());
    }
}
