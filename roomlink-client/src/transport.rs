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

//! Collaborator interfaces for the external conferencing transport.
//!
//! The connection core never performs network I/O itself: it drives a
//! [`Connection`] (signaling client) and the [`Conference`]s created from
//! it. Real transports implement these traits; tests substitute scripted
//! mocks. Conference events flow back through an [`EventSink`] handed to
//! [`Connection::init_conference`], so listeners are in place before
//! `join()` and no event can be lost racing join completion.

use anyhow::anyhow;
use async_trait::async_trait;
use roomlink_types::{RoomId, Track};
use tokio::sync::mpsc;
use url::Url;

/// Immutable configuration of the signaling endpoint.
///
/// A single host name, validated at construction. The websocket service URL
/// and the conference (MUC) domain are derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
}

impl ServerAddress {
    /// Create a server address from a host name such as `"meet.example.org"`.
    pub fn new(host: impl Into<String>) -> anyhow::Result<Self> {
        let host = host.into();
        let url = format!("wss://{host}/xmpp-websocket");
        Url::parse(&url).map_err(|e| anyhow!("invalid server address {host:?}: {e}"))?;
        Ok(Self { host })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Websocket service URL for joining the given room.
    pub fn service_url(&self, room: &RoomId) -> String {
        format!("wss://{}/xmpp-websocket?room={room}", self.host)
    }

    /// Domain under which conference rooms are addressed.
    pub fn conference_domain(&self) -> String {
        format!("conference.{}", self.host)
    }
}

/// Options passed to [`Connection::init_conference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConferenceOptions {
    /// Enable the data channel used for track signaling.
    pub open_bridge_channel: bool,
}

impl Default for ConferenceOptions {
    fn default() -> Self {
        Self {
            open_bridge_channel: true,
        }
    }
}

/// Events a conference pushes back into the connection core.
#[derive(Debug, Clone)]
pub enum ConferenceEvent {
    /// A track became available in the conference. Includes this client's
    /// own publishes echoed back; the core filters those out.
    TrackAdded(Track),
    /// A track left the conference.
    TrackRemoved(Track),
}

/// Where a [`Conference`] delivers its events.
///
/// The sink is tagged with the epoch of the conference it was created for,
/// so events arriving after the conference has been left are recognized as
/// stale and dropped instead of corrupting the remote-track bookkeeping of
/// a newer conference.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, ConferenceEvent)>,
}

impl EventSink {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, ConferenceEvent)>) -> Self {
        Self { epoch, tx }
    }

    /// Deliver an event. Delivery is best-effort: events emitted after the
    /// room connection has shut down are silently discarded.
    pub fn emit(&self, event: ConferenceEvent) {
        let _ = self.tx.send((self.epoch, event));
    }
}

/// A client connection to the signaling server.
///
/// Created fresh for every connect attempt; owned by the room connection
/// for as long as it is reachable from its current lifecycle state.
#[async_trait]
pub trait Connection: Send {
    /// Establish the connection. Resolves once the server accepted it.
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Close the connection and release its resources.
    async fn disconnect(&mut self) -> anyhow::Result<()>;

    /// Create a conference object for the given room. The returned
    /// conference is not yet joined; its events will flow into `events`
    /// from this point on.
    fn init_conference(
        &mut self,
        room: &RoomId,
        options: ConferenceOptions,
        events: EventSink,
    ) -> anyhow::Result<Box<dyn Conference>>;
}

/// A joined (or joinable) instance of a room on the signaling transport.
#[async_trait]
pub trait Conference: Send {
    /// Join the room. Resolves once the conference-joined signal arrives.
    async fn join(&mut self) -> anyhow::Result<()>;

    /// Leave the room. Resolves once the leave is acknowledged.
    async fn leave(&mut self) -> anyhow::Result<()>;

    /// Publish a local track into the conference.
    async fn add_track(&mut self, track: &Track) -> anyhow::Result<()>;

    /// Withdraw a previously published local track.
    async fn remove_track(&mut self, track: &Track) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_address_accepts_plain_hosts() {
        let addr = ServerAddress::new("meet.example.org").unwrap();
        assert_eq!(addr.host(), "meet.example.org");
        assert_eq!(addr.conference_domain(), "conference.meet.example.org");
    }

    #[test]
    fn server_address_builds_room_service_url() {
        let addr = ServerAddress::new("meet.example.org").unwrap();
        assert_eq!(
            addr.service_url(&RoomId::from("room1")),
            "wss://meet.example.org/xmpp-websocket?room=room1"
        );
    }

    #[test]
    fn server_address_rejects_garbage() {
        assert!(ServerAddress::new("not a host").is_err());
    }
}
