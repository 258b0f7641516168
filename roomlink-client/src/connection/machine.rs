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

//! The room connection state machine.
//!
//! All state lives in a single task that consumes commands from the public
//! [`RoomConnection`](super::RoomConnection) handle and events from the
//! active conference. Commands are processed one at a time to completion,
//! so at most one lifecycle transition is ever in flight: an operation
//! arriving mid-transition waits in the queue and is applied to the settled
//! state. Between commands the machine always rests in `Disconnected` or
//! `InRoom`.
//!
//! The one intentionally "live" input is the target room: the handle writes
//! it into a watch channel synchronously, and the join step reads it at
//! join time. A `set_room` landing while a leave/rejoin cycle is already
//! running therefore takes effect without a second cycle.

use log::{debug, error, info, warn};
use roomlink_types::{RoomId, Track, TrackKind};
use std::mem;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use super::room_connection::{RoomOptions, RoomState};
use crate::error::{ConnectError, TrackError};
use crate::transport::{Conference, ConferenceEvent, ConferenceOptions, Connection, EventSink};

/// Operations the public handle enqueues for the machine.
pub(crate) enum Command {
    Connect {
        done: oneshot::Sender<Result<(), ConnectError>>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    /// The target room changed; leave and rejoin if currently in a room.
    SyncRoom,
    SetLocalTrack {
        kind: TrackKind,
        track: Track,
        done: oneshot::Sender<Result<(), TrackError>>,
    },
}

/// Lifecycle of the connection. Exactly one variant is active at any
/// instant, and each variant carries only the handles valid in that state,
/// so e.g. a conference handle cannot be reached while disconnected.
enum Lifecycle {
    Disconnected,
    Connecting,
    InRoom {
        connection: Box<dyn Connection>,
        conference: Box<dyn Conference>,
        joined_room: RoomId,
    },
    Switching {
        connection: Box<dyn Connection>,
    },
    Disconnecting,
}

impl Lifecycle {
    fn public_state(&self) -> RoomState {
        match self {
            Lifecycle::Disconnected => RoomState::Disconnected,
            Lifecycle::Connecting => RoomState::Connecting,
            Lifecycle::InRoom { joined_room, .. } => RoomState::InRoom {
                room: joined_room.clone(),
            },
            Lifecycle::Switching { .. } => RoomState::Switching,
            Lifecycle::Disconnecting => RoomState::Disconnecting,
        }
    }
}

pub(crate) struct RoomMachine {
    options: RoomOptions,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    target_rx: watch::Receiver<RoomId>,
    state_tx: watch::Sender<RoomState>,
    event_tx: mpsc::UnboundedSender<(u64, ConferenceEvent)>,
    event_rx: mpsc::UnboundedReceiver<(u64, ConferenceEvent)>,
    lifecycle: Lifecycle,
    /// Bumped for every conference created; events tagged with an older
    /// epoch come from a conference that has already been left.
    epoch: u64,
    local_video: Option<Track>,
    local_audio: Option<Track>,
    remote_tracks: Vec<Track>,
}

impl RoomMachine {
    pub(crate) fn new(
        options: RoomOptions,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        target_rx: watch::Receiver<RoomId>,
        state_tx: watch::Sender<RoomState>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            options,
            cmd_rx,
            target_rx,
            state_tx,
            event_tx,
            event_rx,
            lifecycle: Lifecycle::Disconnected,
            epoch: 0,
            local_video: None,
            local_audio: None,
            remote_tracks: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Handle dropped; tear down whatever is still up.
                    None => break,
                },
                Some((epoch, event)) = self.event_rx.recv() => {
                    self.handle_conference_event(epoch, event);
                }
            }
        }
        debug!("room connection handle dropped, shutting down");
        self.disconnect().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { done } => {
                let _ = done.send(self.connect().await);
            }
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::SyncRoom => self.sync_room().await,
            Command::SetLocalTrack { kind, track, done } => {
                let _ = done.send(self.set_local_track(kind, track).await);
            }
        }
    }

    fn transition(&mut self, next: Lifecycle) {
        let _ = self.state_tx.send(next.public_state());
        self.lifecycle = next;
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        if !matches!(self.lifecycle, Lifecycle::Disconnected) {
            return Err(ConnectError::AlreadyConnected);
        }
        info!("connecting to {}", self.options.server.host());
        self.transition(Lifecycle::Connecting);
        let mut connection = (self.options.connection_factory)(&self.options.server);
        if let Err(e) = connection.connect().await {
            warn!("connection to {} failed: {e:#}", self.options.server.host());
            self.transition(Lifecycle::Disconnected);
            return Err(ConnectError::ConnectFailed(e));
        }
        match self.join_target_room(connection.as_mut()).await {
            Ok((conference, joined_room)) => {
                info!("connected and joined room {joined_room}");
                self.transition(Lifecycle::InRoom {
                    connection,
                    conference,
                    joined_room,
                });
                Ok(())
            }
            Err(e) => {
                if let Err(close) = connection.disconnect().await {
                    warn!("error closing connection after failed join: {close:#}");
                }
                self.transition(Lifecycle::Disconnected);
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        let (mut connection, mut conference, joined_room) =
            match mem::replace(&mut self.lifecycle, Lifecycle::Disconnected) {
                Lifecycle::InRoom {
                    connection,
                    conference,
                    joined_room,
                } => (connection, conference, joined_room),
                Lifecycle::Disconnected => {
                    debug!("disconnect: already disconnected");
                    return;
                }
                other => {
                    // Commands are serialized, so the machine cannot rest in
                    // a transitional state when one is dequeued.
                    warn!("disconnect ignored in state {}", other.public_state());
                    self.lifecycle = other;
                    return;
                }
            };
        info!("disconnecting from room {joined_room}");
        self.transition(Lifecycle::Disconnecting);
        if let Err(e) = conference.leave().await {
            warn!("error leaving room {joined_room}: {e:#}");
        }
        if let Err(e) = connection.disconnect().await {
            warn!("error closing connection: {e:#}");
        }
        self.clear_remote_tracks();
        self.transition(Lifecycle::Disconnected);
        info!("disconnected");
    }

    async fn sync_room(&mut self) {
        let (connection, mut conference, joined_room) =
            match mem::replace(&mut self.lifecycle, Lifecycle::Disconnected) {
                Lifecycle::InRoom {
                    connection,
                    conference,
                    joined_room,
                } => (connection, conference, joined_room),
                other => {
                    debug!(
                        "target room is now {}; no active conference, next join picks it up",
                        self.target_rx.borrow().as_str()
                    );
                    self.lifecycle = other;
                    return;
                }
            };
        let target = self.target_rx.borrow().clone();
        if target == joined_room {
            debug!("already joined to {target}");
            self.lifecycle = Lifecycle::InRoom {
                connection,
                conference,
                joined_room,
            };
            return;
        }
        info!("leaving room {joined_room} to join {target}");
        self.transition(Lifecycle::Switching { connection });
        if let Err(e) = conference.leave().await {
            warn!("error leaving room {joined_room}: {e:#}");
        }
        drop(conference);
        self.clear_remote_tracks();
        let mut connection = match mem::replace(&mut self.lifecycle, Lifecycle::Disconnected) {
            Lifecycle::Switching { connection } => connection,
            other => {
                self.lifecycle = other;
                return;
            }
        };
        // The target is re-read inside join_target_room: a set_room that
        // landed during the leave is honored here, without another cycle.
        match self.join_target_room(connection.as_mut()).await {
            Ok((conference, joined_room)) => {
                info!("switched to room {joined_room}");
                self.transition(Lifecycle::InRoom {
                    connection,
                    conference,
                    joined_room,
                });
            }
            Err(e) => {
                // Never rest half-connected: a failed rejoin tears the
                // whole connection down.
                error!("failed to join room after leaving {joined_room}: {e}");
                if let Err(close) = connection.disconnect().await {
                    warn!("error closing connection after failed rejoin: {close:#}");
                }
                self.transition(Lifecycle::Disconnected);
            }
        }
    }

    /// Create, join, and populate a conference for the current target room.
    ///
    /// Reads the target room at call time, registers the event sink before
    /// joining, and publishes any held local tracks (video first, then
    /// audio) before declaring the join finished.
    async fn join_target_room(
        &mut self,
        connection: &mut dyn Connection,
    ) -> Result<(Box<dyn Conference>, RoomId), ConnectError> {
        let room = self.target_rx.borrow().clone();
        self.epoch += 1;
        let sink = EventSink::new(self.epoch, self.event_tx.clone());
        let mut conference = connection
            .init_conference(&room, ConferenceOptions::default(), sink)
            .map_err(ConnectError::JoinFailed)?;
        debug!("joining room {room}");
        match timeout(self.options.join_timeout, conference.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectError::JoinFailed(e)),
            Err(_) => return Err(ConnectError::JoinTimeout(self.options.join_timeout)),
        }
        for track in [self.local_video.clone(), self.local_audio.clone()]
            .into_iter()
            .flatten()
        {
            debug!("publishing held local {} track {}", track.kind, track.id);
            conference
                .add_track(&track)
                .await
                .map_err(ConnectError::JoinFailed)?;
        }
        Ok((conference, room))
    }

    async fn set_local_track(&mut self, kind: TrackKind, track: Track) -> Result<(), TrackError> {
        let slot = match kind {
            TrackKind::Video => &mut self.local_video,
            TrackKind::Audio => &mut self.local_audio,
        };
        let Lifecycle::InRoom { conference, .. } = &mut self.lifecycle else {
            debug!("holding local {kind} track {} until the next join", track.id);
            *slot = Some(track);
            return Ok(());
        };
        // Strict remove-then-add: the transport rejects a second publish of
        // the same kind, so the old track must be fully withdrawn first.
        if let Some(previous) = slot.clone() {
            debug!("removing published local {kind} track {}", previous.id);
            conference
                .remove_track(&previous)
                .await
                .map_err(TrackError::PublishFailed)?;
            *slot = None;
        }
        debug!("publishing local {kind} track {}", track.id);
        conference
            .add_track(&track)
            .await
            .map_err(TrackError::PublishFailed)?;
        *slot = Some(track);
        Ok(())
    }

    fn handle_conference_event(&mut self, epoch: u64, event: ConferenceEvent) {
        if epoch != self.epoch || !matches!(self.lifecycle, Lifecycle::InRoom { .. }) {
            debug!("dropping stale conference event (epoch {epoch}, current {})", self.epoch);
            return;
        }
        match event {
            ConferenceEvent::TrackAdded(track) => self.remote_track_added(track),
            ConferenceEvent::TrackRemoved(track) => self.remote_track_removed(track),
        }
    }

    fn remote_track_added(&mut self, track: Track) {
        if track.is_local() {
            // Our own publish echoed back.
            return;
        }
        if self.remote_tracks.iter().any(|t| t.id == track.id) {
            debug!("duplicate remote track {} ignored", track.id);
            return;
        }
        info!(
            "remote {} track {} added by {}",
            track.kind,
            track.id,
            track
                .participant_id
                .as_ref()
                .map(|p| p.as_str())
                .unwrap_or("<unknown>")
        );
        self.remote_tracks.push(track);
        self.notify_remote_tracks();
    }

    fn remote_track_removed(&mut self, track: Track) {
        if track.is_local() {
            return;
        }
        debug!("remote track {} removed", track.id);
        self.remote_tracks.retain(|t| t.id != track.id);
        // Removal of an absent id is a no-op but still notifies.
        self.notify_remote_tracks();
    }

    fn notify_remote_tracks(&self) {
        (self.options.on_remote_tracks_changed)(self.remote_tracks.clone());
    }

    fn clear_remote_tracks(&mut self) {
        if self.remote_tracks.is_empty() {
            return;
        }
        self.remote_tracks.clear();
        self.notify_remote_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ServerAddress;
    use roomlink_types::{MediaSink, MediaStreamHandle, ParticipantId, TrackId};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

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

    fn remote(id: &str) -> Track {
        Track {
            id: TrackId::from(id),
            participant_id: Some(ParticipantId::from("p1")),
            kind: TrackKind::Video,
            handle: Arc::new(StubHandle { local: false }),
        }
    }

    fn local(id: &str) -> Track {
        Track {
            id: TrackId::from(id),
            participant_id: None,
            kind: TrackKind::Video,
            handle: Arc::new(StubHandle { local: true }),
        }
    }

    struct NullConnection;

    #[async_trait::async_trait]
    impl Connection for NullConnection {
        async fn connect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn init_conference(
            &mut self,
            _room: &RoomId,
            _options: ConferenceOptions,
            _events: EventSink,
        ) -> anyhow::Result<Box<dyn Conference>> {
            anyhow::bail!("not used in unit tests")
        }
    }

    type Snapshots = Arc<Mutex<Vec<Vec<TrackId>>>>;

    fn machine() -> (RoomMachine, Snapshots) {
        let snapshots: Snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        let options = RoomOptions {
            server: ServerAddress::new("meet.example.org").unwrap(),
            room: RoomId::from("room1"),
            join_timeout: Duration::from_secs(5),
            on_remote_tracks_changed: Box::new(move |tracks| {
                sink.lock()
                    .unwrap()
                    .push(tracks.into_iter().map(|t| t.id).collect());
            }),
            connection_factory: Box::new(|_| Box::new(NullConnection)),
        };
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (_target_tx, target_rx) = watch::channel(RoomId::from("room1"));
        let (state_tx, _state_rx) = watch::channel(RoomState::Disconnected);
        (RoomMachine::new(options, cmd_rx, target_rx, state_tx), snapshots)
    }

    #[test]
    fn duplicate_track_ids_collapse_to_one_entry() {
        let (mut m, snapshots) = machine();
        m.remote_track_added(remote("t1"));
        m.remote_track_added(remote("t1"));
        assert_eq!(m.remote_tracks.len(), 1);
        // Only the first add notifies.
        assert_eq!(snapshots.lock().unwrap().len(), 1);
    }

    #[test]
    fn local_tracks_never_enter_the_remote_collection() {
        let (mut m, snapshots) = machine();
        m.remote_track_added(local("mine"));
        assert!(m.remote_tracks.is_empty());
        assert!(snapshots.lock().unwrap().is_empty());

        m.remote_track_removed(local("mine"));
        assert!(snapshots.lock().unwrap().is_empty());
    }

    #[test]
    fn removal_of_absent_id_is_noop_but_notifies() {
        let (mut m, snapshots) = machine();
        m.remote_track_added(remote("t1"));
        m.remote_track_removed(remote("t2"));
        assert_eq!(m.remote_tracks.len(), 1);
        assert_eq!(snapshots.lock().unwrap().len(), 2);
        assert_eq!(
            snapshots.lock().unwrap().last().unwrap(),
            &vec![TrackId::from("t1")]
        );
    }

    #[test]
    fn collection_matches_added_and_not_yet_removed_set() {
        // Mixed interleaving with duplicates; the collection must equal the
        // set of ids added and not yet removed, in arrival order.
        let (mut m, _snapshots) = machine();
        let script: &[(&str, bool)] = &[
            ("a", true),
            ("b", true),
            ("a", true), // duplicate add
            ("c", true),
            ("b", false),
            ("d", false), // remove of an id never added
            ("c", false),
            ("c", true), // re-add after removal
        ];
        let mut model: HashSet<&str> = HashSet::new();
        for (id, add) in script {
            if *add {
                m.remote_track_added(remote(id));
                model.insert(id);
            } else {
                m.remote_track_removed(remote(id));
                model.remove(id);
            }
        }
        let got: HashSet<String> = m
            .remote_tracks
            .iter()
            .map(|t| t.id.as_str().to_string())
            .collect();
        let want: HashSet<String> = model.into_iter().map(str::to_string).collect();
        assert_eq!(got, want);
        assert_eq!(got.len(), m.remote_tracks.len(), "no duplicate ids");
    }

    #[test]
    fn stale_epoch_events_are_dropped() {
        let (mut m, snapshots) = machine();
        m.lifecycle = Lifecycle::InRoom {
            connection: Box::new(NullConnection),
            conference: Box::new(NeverConference),
            joined_room: RoomId::from("room1"),
        };
        m.epoch = 2;
        m.handle_conference_event(1, ConferenceEvent::TrackAdded(remote("t1")));
        assert!(m.remote_tracks.is_empty());
        assert!(snapshots.lock().unwrap().is_empty());

        m.handle_conference_event(2, ConferenceEvent::TrackAdded(remote("t1")));
        assert_eq!(m.remote_tracks.len(), 1);
    }

    #[test]
    fn events_are_dropped_while_disconnected() {
        let (mut m, snapshots) = machine();
        m.handle_conference_event(0, ConferenceEvent::TrackAdded(remote("t1")));
        assert!(m.remote_tracks.is_empty());
        assert!(snapshots.lock().unwrap().is_empty());
    }

    struct NeverConference;

    #[async_trait::async_trait]
    impl Conference for NeverConference {
        async fn join(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn leave(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn add_track(&mut self, _track: &Track) -> anyhow::Result<()> {
            Ok(())
        }
        async fn remove_track(&mut self, _track: &Track) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
