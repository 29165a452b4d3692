//! Race Coordinator
//!
//! Per-tick glue between matchmaking, the room and the race driver:
//!
//! 1. No room yet: take a match response and start joining its room.
//! 2. Room present: drive it, react to its events (race start creates the
//!    driver for the agreed track, race end and disconnect tear it down).
//! 3. Abort a race whose frames stop arriving.
//!
//! The coordinator also implements `SyncStrategy`, so a `RaceSession` can
//! own it and reach the driver through it.

use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::hash::TrackIdentity;
use crate::network::channel::ChannelError;
use crate::network::driver::{SyncConfig, SyncError};
use crate::network::lifecycle::{DriverSlot, LifecycleError};
use crate::network::protocol::{PlayerInput, RaceServerFrame};
use crate::network::room::{
    Matchmaker, RoomConnector, RoomError, RoomEvent, RoomMembership,
};
use crate::race::session::SyncStrategy;
use crate::tracks::catalog::{CatalogError, TrackPackCatalog};
use crate::ROOM_PORT;

/// Client slot used when joining a matched room.
pub const ROOM_SLOT: u32 = 1;

type RoomChannel<N> = <<N as RoomConnector>::Room as RoomMembership>::Channel;

/// Coordinator errors.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The room reported an unrecoverable fault.
    #[error("room fault")]
    RoomFault,

    /// Could not join the room.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Could not open the race channel.
    #[error("failed to open race channel: {0}")]
    Channel(#[from] ChannelError),

    /// Driver could not be created.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Track selection failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Things the UI may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Joining a matched room.
    Connecting {
        /// Room address.
        addr: SocketAddr,
    },
    /// Race driver created.
    RaceStarted {
        /// Local registry id of the agreed track.
        registry_id: u32,
        /// Players in the race.
        player_count: usize,
    },
    /// The room chose a track this client does not have.
    TrackUnavailable(TrackIdentity),
    /// Race finished normally.
    RaceEnded,
    /// No frames for too long; race aborted.
    StallTimeout,
    /// The driver terminated on an error.
    SyncLost,
    /// Left the room.
    Disconnected,
}

/// Drives matchmaking, the room and the race driver.
pub struct RaceCoordinator<N: RoomConnector, M: Matchmaker> {
    connector: N,
    matchmaker: M,
    catalog: TrackPackCatalog,
    config: SyncConfig,

    room: Option<N::Room>,
    slot: DriverSlot<RoomChannel<N>>,

    events: Vec<CoordinatorEvent>,
    last_frame_count: u32,
    stalled_ticks: u32,
}

impl<N: RoomConnector, M: Matchmaker> RaceCoordinator<N, M> {
    /// Create a coordinator with a loaded catalog.
    pub fn new(connector: N, matchmaker: M, catalog: TrackPackCatalog, config: SyncConfig) -> Self {
        Self {
            connector,
            matchmaker,
            catalog,
            config,
            room: None,
            slot: DriverSlot::new(),
            events: Vec::new(),
            last_frame_count: 0,
            stalled_ticks: 0,
        }
    }

    /// Run one tick.
    pub fn calc(&mut self) -> Result<(), CoordinatorError> {
        let Some(room) = self.room.as_mut() else {
            return self.poll_matchmaker();
        };

        let mut room_events: Vec<RoomEvent> = Vec::new();
        if !room.calc(&mut room_events) {
            error!("Room {} faulted", room.connection().addr);
            self.slot.destroy_instance();
            self.room = None;
            return Err(CoordinatorError::RoomFault);
        }

        // Every drained event is handled; the first failure is reported.
        let mut first_error = None;
        for event in room_events {
            if let Err(e) = self.handle_room_event(event) {
                warn!("Room event failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        self.watch_stall();
        first_error.map_or(Ok(()), Err)
    }

    fn poll_matchmaker(&mut self) -> Result<(), CoordinatorError> {
        let Some(found) = self.matchmaker.take_match_response() else {
            return Ok(());
        };

        let addr = SocketAddr::new(found.room_ip, ROOM_PORT);
        info!("Found match, joining room {}", addr);
        let room = self.connector.create_instance(ROOM_SLOT, addr, found.login_info)?;
        self.room = Some(room);
        self.events.push(CoordinatorEvent::Connecting { addr });
        Ok(())
    }

    fn handle_room_event(&mut self, event: RoomEvent) -> Result<(), CoordinatorError> {
        match event {
            RoomEvent::RaceStart { track, player_count, local_player_count } => {
                self.start_race(track, player_count, local_player_count)
            }
            RoomEvent::RaceEnd => {
                self.slot.destroy_instance();
                self.events.push(CoordinatorEvent::RaceEnded);
                Ok(())
            }
            RoomEvent::Disconnected => {
                warn!("Disconnected from room");
                self.slot.destroy_instance();
                self.room = None;
                self.events.push(CoordinatorEvent::Disconnected);
                Ok(())
            }
        }
    }

    /// Create the driver for `track`. The catalog selection only changes
    /// once the driver exists.
    fn start_race(
        &mut self,
        track: TrackIdentity,
        player_count: usize,
        local_player_count: usize,
    ) -> Result<(), CoordinatorError> {
        if self.slot.is_live() {
            warn!("Room started a race on {} while one is running", track);
            return Err(LifecycleError::AlreadyLive.into());
        }
        let Some(registry_id) = self.catalog.resolve_identity(&track) else {
            warn!("Room picked track {} which is not installed", track);
            self.events.push(CoordinatorEvent::TrackUnavailable(track));
            return Ok(());
        };
        let Some(room) = self.room.as_mut() else {
            return Ok(());
        };

        let mut connection = room.connection().clone();
        if connection.player_count != player_count {
            debug!(
                "Room snapshot has {} players, race start says {}",
                connection.player_count, player_count
            );
        }
        connection.player_count = player_count;
        connection.local_player_count = local_player_count;

        let channel = room.open_race_channel()?;
        self.slot.create_instance(&connection, channel, self.config.clone())?;
        self.catalog.select_track_by_identity(&track)?;

        info!(
            "Race starting on track {} ({} players, {} local)",
            registry_id, player_count, local_player_count
        );
        self.last_frame_count = 0;
        self.stalled_ticks = 0;
        self.events.push(CoordinatorEvent::RaceStarted { registry_id, player_count });
        Ok(())
    }

    fn watch_stall(&mut self) {
        if !self.slot.is_live() {
            return;
        }

        let frame_count = self.slot.frame_count();
        if frame_count != self.last_frame_count {
            self.last_frame_count = frame_count;
            self.stalled_ticks = 0;
            return;
        }

        self.stalled_ticks += 1;
        if self.stalled_ticks >= self.config.stall_timeout_ticks {
            warn!("No race frames for {} ticks, aborting race", self.stalled_ticks);
            self.slot.destroy_instance();
            self.stalled_ticks = 0;
            self.events.push(CoordinatorEvent::StallTimeout);
        }
    }

    // ===== ACCESSORS =====

    /// Take events raised since the last call.
    pub fn take_events(&mut self) -> Vec<CoordinatorEvent> {
        std::mem::take(&mut self.events)
    }

    /// The current room, if any.
    pub fn room(&self) -> Option<&N::Room> {
        self.room.as_ref()
    }

    /// The current room, if any.
    pub fn room_mut(&mut self) -> Option<&mut N::Room> {
        self.room.as_mut()
    }

    /// The driver slot.
    pub fn slot(&self) -> &DriverSlot<RoomChannel<N>> {
        &self.slot
    }

    /// The track catalog.
    pub fn catalog(&self) -> &TrackPackCatalog {
        &self.catalog
    }

    /// The track catalog.
    pub fn catalog_mut(&mut self) -> &mut TrackPackCatalog {
        &mut self.catalog
    }

    /// The connector.
    pub fn connector(&self) -> &N {
        &self.connector
    }

    /// The matchmaker.
    pub fn matchmaker_mut(&mut self) -> &mut M {
        &mut self.matchmaker
    }

    fn on_sync_error(&mut self, error: SyncError) -> SyncError {
        if error.is_fatal() {
            self.events.push(CoordinatorEvent::SyncLost);
        }
        error
    }
}

impl<N: RoomConnector, M: Matchmaker> SyncStrategy for RaceCoordinator<N, M> {
    fn write_outgoing(&mut self, inputs: &[PlayerInput]) -> Result<(), SyncError> {
        self.slot.write_outgoing(inputs).map_err(|e| self.on_sync_error(e))
    }

    fn read_incoming(&mut self) -> Result<Option<RaceServerFrame>, SyncError> {
        self.slot.read_incoming().map_err(|e| self.on_sync_error(e))
    }

    fn frame_count(&self) -> u32 {
        self.slot.frame_count()
    }

    fn shutdown(&mut self) {
        self.slot.destroy_instance();
    }
}

// =============================================================================
// TESTS
// =============================================================================
