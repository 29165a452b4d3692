//! Race Sync Driver
//!
//! Per-tick exchange of race frames with the room.
//!
//! Each tick the owner calls `calc_write` with the local input snapshot and
//! then `calc_read`, which drains the channel, decodes and validates every
//! frame, and exposes the newest accepted one for that tick only. Nothing
//! here blocks: an empty channel is an empty tick.
//!
//! # States
//!
//! ```text
//! AwaitingFirstFrame --first valid frame--> Synchronized
//!        |                                      |
//!        +---- destroy / connection lost / corruption threshold ----> Terminated
//! ```
//!
//! `Terminated` is final. The channel is dropped on entry and every later
//! call is a no-op.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::channel::{ChannelError, FrameChannel, SendOutcome};
use crate::network::protocol::{PlayerInput, RaceClientFrame, RaceMessage, RaceServerFrame};
use crate::network::validation::{validate_frame, FrameRejection, ValidationLimits};

// =============================================================================
// CONFIG
// =============================================================================

/// Driver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Consecutive rejected frames that end the race (30 = 0.5s at 60Hz).
    pub fault_threshold: u32,
    /// Frames drained per `calc_read`.
    pub max_frames_per_tick: usize,
    /// Ticks without a new frame before the owner aborts (300 = 5s at 60Hz).
    pub stall_timeout_ticks: u32,
    /// Bounds for peer-supplied values.
    pub limits: ValidationLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fault_threshold: 30,
            max_frames_per_tick: 8,
            stall_timeout_ticks: 300,
            limits: ValidationLimits::default(),
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            fault_threshold: env_parse("RACE_SYNC_FAULT_THRESHOLD")
                .unwrap_or(defaults.fault_threshold),
            max_frames_per_tick: env_parse("RACE_SYNC_MAX_FRAMES_PER_TICK")
                .unwrap_or(defaults.max_frames_per_tick),
            stall_timeout_ticks: env_parse("RACE_SYNC_STALL_TIMEOUT_TICKS")
                .unwrap_or(defaults.stall_timeout_ticks),
            limits: defaults.limits,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// STATE
// =============================================================================

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    /// Connected, no valid frame yet.
    AwaitingFirstFrame,
    /// Receiving valid frames.
    Synchronized,
    /// Finished; see `TerminationReason`.
    Terminated,
}

/// Why the driver terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    /// Torn down by its owner.
    Destroyed,
    /// The channel closed or failed.
    ConnectionLost,
    /// Too many consecutive invalid frames.
    CorruptionThreshold,
}

/// Driver errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Peer sent too many invalid frames in a row.
    #[error("peer sent {rejections} consecutive invalid frames")]
    CorruptionThreshold {
        /// Consecutive rejections at termination.
        rejections: u32,
    },

    /// Channel closed or failed.
    #[error("connection to room lost: {0}")]
    ConnectionLost(#[source] ChannelError),

    /// Local frame could not be encoded.
    #[error("failed to encode client frame: {0}")]
    Encode(#[from] bincode::Error),
}

impl SyncError {
    /// Whether the driver terminated.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Encode(_))
    }
}

/// Frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Frames accepted.
    pub accepted: u64,
    /// Frames rejected as invalid.
    pub rejected_total: u64,
    /// Rejections since the last accepted frame.
    pub consecutive_rejections: u32,
    /// Valid frames dropped as duplicate or out of order.
    pub stale: u64,
    /// Frame ids skipped by the peer.
    pub gaps: u64,
    /// Client frames handed to the channel.
    pub sent: u64,
    /// Client frames dropped on a full channel.
    pub send_dropped: u64,
}

// =============================================================================
// DRIVER
// =============================================================================

/// Frame exchange with one room for one race.
///
/// Created through `DriverSlot::create_instance`.
pub struct RaceSyncDriver<C: FrameChannel> {
    channel: Option<C>,
    config: SyncConfig,
    player_count: usize,

    state: DriverState,
    termination: Option<TerminationReason>,

    frame: Option<RaceServerFrame>,
    last_frame_id: Option<u32>,
    frame_count: u32,
    outbound_id: u32,

    stats: SyncStats,
}

impl<C: FrameChannel> RaceSyncDriver<C> {
    pub(crate) fn new(channel: C, player_count: usize, config: SyncConfig) -> Self {
        Self {
            channel: Some(channel),
            config,
            player_count,
            state: DriverState::AwaitingFirstFrame,
            termination: None,
            frame: None,
            last_frame_id: None,
            frame_count: 0,
            outbound_id: 0,
            stats: SyncStats::default(),
        }
    }

    // ===== TICK =====

    /// Send the local input snapshot.
    pub fn calc_write(&mut self, inputs: &[PlayerInput]) -> Result<(), SyncError> {
        if self.state == DriverState::Terminated {
            return Ok(());
        }

        let frame = RaceClientFrame {
            id: self.outbound_id,
            server_frame_id: self.last_frame_id,
            players: inputs.to_vec(),
        };
        let bytes = RaceMessage::from(frame).to_bytes()?;
        self.outbound_id = self.outbound_id.wrapping_add(1);

        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        match channel.try_send(&bytes) {
            Ok(SendOutcome::Sent) => self.stats.sent += 1,
            Ok(SendOutcome::Dropped) => {
                self.stats.send_dropped += 1;
                debug!("Send buffer full, dropped client frame {}", self.outbound_id.wrapping_sub(1));
            }
            Err(e) => return Err(self.lose_connection(e)),
        }
        Ok(())
    }

    /// Drain, validate and expose incoming frames.
    ///
    /// Returns an error only on the tick the driver terminates.
    pub fn calc_read(&mut self) -> Result<(), SyncError> {
        self.frame = None;

        for _ in 0..self.config.max_frames_per_tick {
            let Some(channel) = self.channel.as_mut() else {
                break;
            };
            let bytes = match channel.try_recv() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => return Err(self.lose_connection(e)),
            };

            match self.check(&bytes) {
                Ok(frame) => self.accept(frame),
                Err(rejection) => self.reject(rejection)?,
            }
        }

        Ok(())
    }

    fn check(&self, bytes: &[u8]) -> Result<RaceServerFrame, FrameRejection> {
        let frame = match RaceMessage::from_bytes(bytes) {
            Ok(RaceMessage::ServerFrame(frame)) => frame,
            Ok(RaceMessage::ClientFrame(_)) => {
                return Err(FrameRejection::Decode("client frame on server stream".to_string()))
            }
            Err(e) => return Err(FrameRejection::Decode(e.to_string())),
        };
        validate_frame(&frame, self.player_count, &self.config.limits)?;
        Ok(frame)
    }

    fn accept(&mut self, frame: RaceServerFrame) {
        if let Some(last) = self.last_frame_id {
            if frame.id <= last {
                self.stats.stale += 1;
                debug!("Dropped stale frame {} (last accepted {})", frame.id, last);
                return;
            }
            let missing = frame.id - last - 1;
            if missing > 0 {
                self.stats.gaps += u64::from(missing);
                debug!("Frames {}..{} never arrived", last + 1, frame.id);
            }
        }

        #[cfg(feature = "debug-tracing")]
        tracing::trace!("Accepted frame {} ({} players)", frame.id, frame.players.len());

        if self.state == DriverState::AwaitingFirstFrame {
            self.state = DriverState::Synchronized;
            info!("Race sync established at frame {}", frame.id);
        }

        self.stats.accepted += 1;
        self.stats.consecutive_rejections = 0;
        self.frame_count = self.frame_count.saturating_add(1);
        self.last_frame_id = Some(frame.id);
        self.frame = Some(frame);
    }

    fn reject(&mut self, rejection: FrameRejection) -> Result<(), SyncError> {
        self.stats.rejected_total += 1;
        self.stats.consecutive_rejections += 1;
        let rejections = self.stats.consecutive_rejections;
        warn!("Rejected frame: {} ({} in a row)", rejection, rejections);

        if rejections >= self.config.fault_threshold.max(1) {
            self.terminate(TerminationReason::CorruptionThreshold);
            return Err(SyncError::CorruptionThreshold { rejections });
        }
        Ok(())
    }

    fn lose_connection(&mut self, error: ChannelError) -> SyncError {
        warn!("Race channel failed: {}", error);
        self.terminate(TerminationReason::ConnectionLost);
        SyncError::ConnectionLost(error)
    }

    fn terminate(&mut self, reason: TerminationReason) {
        if self.state == DriverState::Terminated {
            return;
        }
        info!(
            "Race sync terminated ({:?}) after {} frames, {} rejected",
            reason, self.frame_count, self.stats.rejected_total
        );
        self.state = DriverState::Terminated;
        self.termination = Some(reason);
        self.channel = None;
        self.frame = None;
    }

    /// Terminate on behalf of the owner.
    pub(crate) fn destroy(&mut self) {
        self.terminate(TerminationReason::Destroyed);
    }

    // ===== ACCESSORS =====

    /// Frame accepted this tick.
    pub fn frame(&self) -> Option<&RaceServerFrame> {
        self.frame.as_ref()
    }

    /// Take the frame accepted this tick.
    pub fn take_frame(&mut self) -> Option<RaceServerFrame> {
        self.frame.take()
    }

    /// Frames accepted since synchronizing.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Id of the newest accepted frame.
    pub fn last_frame_id(&self) -> Option<u32> {
        self.last_frame_id
    }

    /// Current state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Termination reason, once terminated.
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    /// Counters.
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Players expected in every frame.
    pub fn player_count(&self) -> usize {
        self.player_count
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::{Quat, Vec3};
    use crate::network::channel::{MemoryChannel, OverflowPolicy};
    use crate::network::protocol::PlayerFrame;

    const PLAYERS: usize = 2;

    fn setup(config: SyncConfig) -> (RaceSyncDriver<MemoryChannel>, MemoryChannel) {
        let (client, room) = MemoryChannel::pair(64, OverflowPolicy::DropNewest);
        (RaceSyncDriver::new(client, PLAYERS, config), room)
    }

    fn frame(id: u32) -> RaceServerFrame {
        RaceServerFrame {
            id,
            players: vec![
                PlayerFrame {
                    pos: Vec3::new(id as f32, 0.0, 0.0),
                    main_rot: Quat::IDENTITY,
                    internal_speed: 50.0,
                };
                PLAYERS
            ],
        }
    }

    fn send(room: &mut MemoryChannel, frame: RaceServerFrame) {
        let bytes = RaceMessage::from(frame).to_bytes().unwrap();
        assert_eq!(room.try_send(&bytes).unwrap(), SendOutcome::Sent);
    }

    fn send_corrupt(room: &mut MemoryChannel) {
        let mut bad = frame(0);
        bad.players[0].pos.y = f32::NAN;
        send(room, bad);
    }

    #[test]
    fn test_first_valid_frame_synchronizes() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        assert_eq!(driver.state(), DriverState::AwaitingFirstFrame);

        driver.calc_read().unwrap();
        assert!(driver.frame().is_none());
        assert_eq!(driver.state(), DriverState::AwaitingFirstFrame);

        send(&mut room, frame(1));
        driver.calc_read().unwrap();
        assert_eq!(driver.state(), DriverState::Synchronized);
        assert_eq!(driver.frame(), Some(&frame(1)));
        assert_eq!(driver.frame_count(), 1);
    }

    #[test]
    fn test_frame_exposed_for_one_tick() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        send(&mut room, frame(1));

        driver.calc_read().unwrap();
        assert!(driver.frame().is_some());

        driver.calc_read().unwrap();
        assert!(driver.frame().is_none());
        assert_eq!(driver.frame_count(), 1);
    }

    #[test]
    fn test_latest_frame_wins_within_tick() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        for id in 1..=3 {
            send(&mut room, frame(id));
        }

        driver.calc_read().unwrap();
        assert_eq!(driver.take_frame().unwrap().id, 3);
        assert!(driver.frame().is_none());
        assert_eq!(driver.frame_count(), 3);
    }

    #[test]
    fn test_drain_is_capped() {
        let config = SyncConfig { max_frames_per_tick: 2, ..Default::default() };
        let (mut driver, mut room) = setup(config);
        for id in 1..=5 {
            send(&mut room, frame(id));
        }

        driver.calc_read().unwrap();
        assert_eq!(driver.frame().unwrap().id, 2);
        driver.calc_read().unwrap();
        assert_eq!(driver.frame().unwrap().id, 4);
        driver.calc_read().unwrap();
        assert_eq!(driver.frame().unwrap().id, 5);
    }

    #[test]
    fn test_invalid_frame_discarded() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        send(&mut room, frame(1));
        driver.calc_read().unwrap();

        send_corrupt(&mut room);
        driver.calc_read().unwrap();
        assert!(driver.frame().is_none());
        assert_eq!(driver.stats().rejected_total, 1);
        assert_eq!(driver.stats().consecutive_rejections, 1);
        assert_eq!(driver.state(), DriverState::Synchronized);
    }

    #[test]
    fn test_wrong_player_count_and_garbage_rejected() {
        let (mut driver, mut room) = setup(SyncConfig::default());

        let mut short = frame(1);
        short.players.pop();
        send(&mut room, short);
        room.try_send(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let client = RaceMessage::from(RaceClientFrame::default()).to_bytes().unwrap();
        room.try_send(&client).unwrap();

        driver.calc_read().unwrap();
        assert_eq!(driver.stats().rejected_total, 3);
        assert_eq!(driver.state(), DriverState::AwaitingFirstFrame);
    }

    #[test]
    fn test_accepted_frame_resets_consecutive_count() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        for _ in 0..5 {
            send_corrupt(&mut room);
        }
        send(&mut room, frame(1));
        driver.calc_read().unwrap();

        assert_eq!(driver.stats().rejected_total, 5);
        assert_eq!(driver.stats().consecutive_rejections, 0);
        assert_eq!(driver.frame().unwrap().id, 1);
    }

    #[test]
    fn test_corruption_threshold_terminates() {
        let config = SyncConfig { fault_threshold: 3, ..Default::default() };
        let (mut driver, mut room) = setup(config);
        send(&mut room, frame(1));
        for _ in 0..3 {
            send_corrupt(&mut room);
        }

        let err = driver.calc_read().unwrap_err();
        assert!(matches!(err, SyncError::CorruptionThreshold { rejections: 3 }));
        assert!(err.is_fatal());
        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(driver.termination(), Some(TerminationReason::CorruptionThreshold));
        assert!(driver.frame().is_none());

        // Terminal: later calls are no-ops and the channel is gone.
        driver.calc_read().unwrap();
        driver.calc_write(&[PlayerInput::new()]).unwrap();
        assert!(matches!(room.try_recv(), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_threshold_spans_ticks() {
        let config = SyncConfig { fault_threshold: 4, ..Default::default() };
        let (mut driver, mut room) = setup(config);

        for _ in 0..3 {
            send_corrupt(&mut room);
            driver.calc_read().unwrap();
        }
        send_corrupt(&mut room);
        assert!(driver.calc_read().is_err());
    }

    #[test]
    fn test_stale_and_duplicate_frames() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        send(&mut room, frame(5));
        send(&mut room, frame(5));
        send(&mut room, frame(3));
        driver.calc_read().unwrap();

        assert_eq!(driver.frame().unwrap().id, 5);
        assert_eq!(driver.stats().stale, 2);
        assert_eq!(driver.stats().rejected_total, 0);
        assert_eq!(driver.frame_count(), 1);

        // A stale frame alone leaves nothing to expose.
        send(&mut room, frame(4));
        driver.calc_read().unwrap();
        assert!(driver.frame().is_none());
    }

    #[test]
    fn test_gaps_counted_without_waiting() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        send(&mut room, frame(1));
        send(&mut room, frame(2));
        send(&mut room, frame(4));
        driver.calc_read().unwrap();

        assert_eq!(driver.frame().unwrap().id, 4);
        assert_eq!(driver.frame_count(), 3);
        assert_eq!(driver.stats().gaps, 1);
        assert_eq!(driver.last_frame_id(), Some(4));

        // Frame 3 arriving late is stale, not a fill-in.
        send(&mut room, frame(3));
        driver.calc_read().unwrap();
        assert!(driver.frame().is_none());
        assert_eq!(driver.frame_count(), 3);
        assert_eq!(driver.stats().stale, 1);
    }

    #[test]
    fn test_write_sends_client_frame() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        send(&mut room, frame(9));
        driver.calc_read().unwrap();

        let input = PlayerInput::with_stick(10, -10).with_flag(PlayerInput::FLAG_ACCELERATE, true);
        driver.calc_write(&[input]).unwrap();
        driver.calc_write(&[input]).unwrap();

        let first = RaceMessage::from_bytes(&room.try_recv().unwrap().unwrap()).unwrap();
        let second = RaceMessage::from_bytes(&room.try_recv().unwrap().unwrap()).unwrap();
        assert_eq!(
            first,
            RaceMessage::ClientFrame(RaceClientFrame {
                id: 0,
                server_frame_id: Some(9),
                players: vec![input],
            })
        );
        assert!(matches!(second, RaceMessage::ClientFrame(RaceClientFrame { id: 1, .. })));
        assert_eq!(driver.stats().sent, 2);
    }

    #[test]
    fn test_full_send_buffer_drops() {
        let (client, _room) = MemoryChannel::pair(1, OverflowPolicy::DropNewest);
        let mut driver = RaceSyncDriver::new(client, PLAYERS, SyncConfig::default());

        driver.calc_write(&[]).unwrap();
        driver.calc_write(&[]).unwrap();
        assert_eq!(driver.stats().sent, 1);
        assert_eq!(driver.stats().send_dropped, 1);
        assert_eq!(driver.state(), DriverState::AwaitingFirstFrame);
    }

    #[test]
    fn test_connection_loss_terminates() {
        let (mut driver, room) = setup(SyncConfig::default());
        drop(room);

        let err = driver.calc_read().unwrap_err();
        assert!(matches!(err, SyncError::ConnectionLost(ChannelError::Closed)));
        assert_eq!(driver.termination(), Some(TerminationReason::ConnectionLost));
        driver.calc_read().unwrap();
    }

    #[test]
    fn test_connection_loss_on_write() {
        let (mut driver, room) = setup(SyncConfig::default());
        drop(room);

        assert!(driver.calc_write(&[PlayerInput::new()]).is_err());
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn test_destroy() {
        let (mut driver, mut room) = setup(SyncConfig::default());
        driver.destroy();
        assert_eq!(driver.termination(), Some(TerminationReason::Destroyed));
        assert!(matches!(room.try_send(b"late"), Err(ChannelError::Closed)));

        // A second termination keeps the first reason.
        driver.terminate(TerminationReason::ConnectionLost);
        assert_eq!(driver.termination(), Some(TerminationReason::Destroyed));
    }

    #[test]
    fn test_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.fault_threshold, 30);
        assert_eq!(config.stall_timeout_ticks, 300);
        assert_eq!(config.limits, ValidationLimits::default());
    }
}
