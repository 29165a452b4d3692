//! Driver Lifecycle
//!
//! At most one race driver exists at a time. `DriverSlot` owns it; an empty
//! slot is the uninitialized state.

use thiserror::Error;
use tracing::{info, warn};

use crate::network::channel::FrameChannel;
use crate::network::driver::{RaceSyncDriver, SyncConfig, SyncError};
use crate::network::protocol::{PlayerInput, RaceServerFrame};
use crate::network::room::RoomConnection;
use crate::race::session::SyncStrategy;

/// Lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// A driver already exists.
    #[error("race driver already live")]
    AlreadyLive,

    /// The room connection is not live.
    #[error("room connection is not live")]
    RoomNotLive,
}

/// Owner of the single race driver.
pub struct DriverSlot<C: FrameChannel> {
    driver: Option<RaceSyncDriver<C>>,
}

impl<C: FrameChannel> Default for DriverSlot<C> {
    fn default() -> Self {
        Self { driver: None }
    }
}

impl<C: FrameChannel> DriverSlot<C> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the driver for a live room.
    ///
    /// Fails without touching an existing driver.
    pub fn create_instance(
        &mut self,
        room: &RoomConnection,
        channel: C,
        config: SyncConfig,
    ) -> Result<&mut RaceSyncDriver<C>, LifecycleError> {
        if self.driver.is_some() {
            warn!("Race driver requested while one is live");
            return Err(LifecycleError::AlreadyLive);
        }
        if !room.is_live() {
            return Err(LifecycleError::RoomNotLive);
        }

        info!(
            "Race driver created for room {} ({} players, {} local)",
            room.id, room.player_count, room.local_player_count
        );
        Ok(self.driver.insert(RaceSyncDriver::new(channel, room.player_count, config)))
    }

    /// Tear down the driver, if any. Its channel closes immediately.
    pub fn destroy_instance(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.destroy();
        }
    }

    /// Whether a driver exists.
    pub fn is_live(&self) -> bool {
        self.driver.is_some()
    }

    /// The driver, if any.
    pub fn instance(&self) -> Option<&RaceSyncDriver<C>> {
        self.driver.as_ref()
    }

    /// The driver, if any.
    pub fn instance_mut(&mut self) -> Option<&mut RaceSyncDriver<C>> {
        self.driver.as_mut()
    }

    fn on_error(&mut self, error: SyncError) -> SyncError {
        if error.is_fatal() {
            self.destroy_instance();
        }
        error
    }
}

impl<C: FrameChannel> SyncStrategy for DriverSlot<C> {
    fn write_outgoing(&mut self, inputs: &[PlayerInput]) -> Result<(), SyncError> {
        let Some(driver) = self.driver.as_mut() else {
            return Ok(());
        };
        match driver.calc_write(inputs) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.on_error(e)),
        }
    }

    fn read_incoming(&mut self) -> Result<Option<RaceServerFrame>, SyncError> {
        let Some(driver) = self.driver.as_mut() else {
            return Ok(None);
        };
        match driver.calc_read() {
            Ok(()) => Ok(driver.take_frame()),
            Err(e) => Err(self.on_error(e)),
        }
    }

    fn frame_count(&self) -> u32 {
        self.driver.as_ref().map_or(0, |d| d.frame_count())
    }

    fn shutdown(&mut self) {
        self.destroy_instance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::{Quat, Vec3};
    use crate::network::channel::{MemoryChannel, OverflowPolicy};
    use crate::network::driver::DriverState;
    use crate::network::protocol::{PlayerFrame, RaceMessage};
    use crate::network::room::RoomState;

    fn live_room(players: usize) -> RoomConnection {
        let mut room = RoomConnection::new(1, "127.0.0.1:21330".parse().unwrap());
        room.state = RoomState::Live;
        room.player_count = players;
        room.local_player_count = 1;
        room
    }

    fn server_frame(id: u32, players: usize) -> Vec<u8> {
        let frame = crate::network::protocol::RaceServerFrame {
            id,
            players: vec![
                PlayerFrame { pos: Vec3::ZERO, main_rot: Quat::IDENTITY, internal_speed: 0.0 };
                players
            ],
        };
        RaceMessage::from(frame).to_bytes().unwrap()
    }

    #[test]
    fn test_create_requires_live_room() {
        let mut slot = DriverSlot::new();
        let (client, _room_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);

        let mut room = live_room(2);
        room.state = RoomState::Connecting;
        assert_eq!(
            slot.create_instance(&room, client, SyncConfig::default()).err(),
            Some(LifecycleError::RoomNotLive)
        );
        assert!(!slot.is_live());
    }

    #[test]
    fn test_second_instance_rejected() {
        let mut slot = DriverSlot::new();
        let room = live_room(2);
        let (first, _first_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);
        let (second, _second_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);

        let driver = slot.create_instance(&room, first, SyncConfig::default()).unwrap();
        assert_eq!(driver.state(), DriverState::AwaitingFirstFrame);
        assert_eq!(driver.player_count(), 2);

        assert_eq!(
            slot.create_instance(&room, second, SyncConfig::default()).err(),
            Some(LifecycleError::AlreadyLive)
        );
        assert_eq!(slot.instance().unwrap().state(), DriverState::AwaitingFirstFrame);
    }

    #[test]
    fn test_destroy_is_always_safe() {
        let mut slot: DriverSlot<MemoryChannel> = DriverSlot::new();
        slot.destroy_instance();
        slot.destroy_instance();

        let (client, mut room_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);
        slot.create_instance(&live_room(1), client, SyncConfig::default()).unwrap();
        slot.destroy_instance();
        assert!(!slot.is_live());
        assert!(room_end.try_send(b"x").is_err());

        let (client, _end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);
        assert!(slot.create_instance(&live_room(1), client, SyncConfig::default()).is_ok());
    }

    #[test]
    fn test_strategy_delegates_to_driver() {
        let mut slot: DriverSlot<MemoryChannel> = DriverSlot::new();
        assert_eq!(slot.read_incoming().unwrap(), None);
        slot.write_outgoing(&[PlayerInput::new()]).unwrap();
        assert_eq!(slot.frame_count(), 0);

        let (client, mut room_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);
        slot.create_instance(&live_room(2), client, SyncConfig::default()).unwrap();

        room_end.try_send(&server_frame(1, 2)).unwrap();
        slot.write_outgoing(&[PlayerInput::new()]).unwrap();
        let frame = slot.read_incoming().unwrap().unwrap();
        assert_eq!(frame.id, 1);
        assert_eq!(slot.frame_count(), 1);
        assert!(room_end.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_fatal_error_empties_slot() {
        let mut slot = DriverSlot::new();
        let config = SyncConfig { fault_threshold: 2, ..Default::default() };
        let (client, mut room_end) = MemoryChannel::pair(4, OverflowPolicy::DropNewest);
        slot.create_instance(&live_room(2), client, config).unwrap();

        room_end.try_send(&server_frame(1, 3)).unwrap();
        room_end.try_send(&server_frame(2, 3)).unwrap();
        assert!(matches!(
            slot.read_incoming(),
            Err(SyncError::CorruptionThreshold { rejections: 2 })
        ));
        assert!(!slot.is_live());
        assert_eq!(slot.read_incoming().unwrap(), None);
    }
}
