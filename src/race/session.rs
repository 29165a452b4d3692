//! Race Session
//!
//! Local race state plus the strategy that keeps it in sync. Offline races
//! use `Offline`; online races use a `DriverSlot` (or anything else that
//! implements `SyncStrategy`).

use std::time::{Duration, Instant};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::vec3::{Quat, Vec3};
use crate::network::driver::SyncError;
use crate::network::protocol::{PlayerFrame, PlayerInput, RaceServerFrame};

// =============================================================================
// STRATEGY
// =============================================================================

/// How a race session exchanges state each tick.
pub trait SyncStrategy {
    /// Publish local input.
    fn write_outgoing(&mut self, inputs: &[PlayerInput]) -> Result<(), SyncError>;

    /// Collect the validated remote frame for this tick, if any.
    fn read_incoming(&mut self) -> Result<Option<RaceServerFrame>, SyncError>;

    /// Remote frames accepted so far.
    fn frame_count(&self) -> u32;

    /// Release resources when the session ends.
    fn shutdown(&mut self) {}
}

impl<S: SyncStrategy + ?Sized> SyncStrategy for &mut S {
    fn write_outgoing(&mut self, inputs: &[PlayerInput]) -> Result<(), SyncError> {
        (**self).write_outgoing(inputs)
    }

    fn read_incoming(&mut self) -> Result<Option<RaceServerFrame>, SyncError> {
        (**self).read_incoming()
    }

    fn frame_count(&self) -> u32 {
        (**self).frame_count()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Single-console race with no remote state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl SyncStrategy for Offline {
    fn write_outgoing(&mut self, _inputs: &[PlayerInput]) -> Result<(), SyncError> {
        Ok(())
    }

    fn read_incoming(&mut self) -> Result<Option<RaceServerFrame>, SyncError> {
        Ok(None)
    }

    fn frame_count(&self) -> u32 {
        0
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Local view of one racer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RacePlayer {
    /// World position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Quat,
    /// Engine speed.
    pub speed: f32,
    /// Most recent controller input (local players only).
    pub last_input: PlayerInput,
}

impl RacePlayer {
    fn apply(&mut self, frame: &PlayerFrame) {
        self.position = frame.pos;
        self.rotation = frame.main_rot;
        self.speed = frame.internal_speed;
    }
}

/// Result of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceSummary {
    /// Ticks run.
    pub ticks: u32,
    /// Remote frames applied to local state.
    pub frames_applied: u32,
    /// Remote frames the strategy accepted.
    pub frames_synced: u32,
    /// Id of the last applied frame.
    pub last_frame_id: Option<u32>,
    /// Final player states.
    pub players: Vec<RacePlayer>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

/// One race, from start to summary.
pub struct RaceSession<S: SyncStrategy> {
    strategy: S,
    players: Vec<RacePlayer>,
    local_player_count: usize,
    ticks: u32,
    frames_applied: u32,
    last_frame_id: Option<u32>,
    started_at: Instant,
}

impl<S: SyncStrategy> RaceSession<S> {
    /// Start a session for `player_count` racers, the first
    /// `local_player_count` of which are on this console.
    pub fn new(strategy: S, player_count: usize, local_player_count: usize) -> Self {
        info!("Race session started: {} players, {} local", player_count, local_player_count);
        Self {
            strategy,
            players: vec![RacePlayer::default(); player_count],
            local_player_count: local_player_count.min(player_count),
            ticks: 0,
            frames_applied: 0,
            last_frame_id: None,
            started_at: Instant::now(),
        }
    }

    /// Run one tick: publish the local players' `inputs`, then apply the
    /// remote frame if one arrived. Returns whether a frame was applied.
    ///
    /// Inputs past `local_player_count` are ignored.
    pub fn tick(&mut self, inputs: &[PlayerInput]) -> Result<bool, SyncError> {
        let local = &inputs[..inputs.len().min(self.local_player_count)];
        for (player, input) in self.players.iter_mut().zip(local) {
            player.last_input = *input;
        }
        self.ticks += 1;

        self.strategy.write_outgoing(local)?;
        match self.strategy.read_incoming()? {
            Some(frame) => {
                self.apply(frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply(&mut self, frame: RaceServerFrame) {
        if frame.players.len() != self.players.len() {
            debug!(
                "Resizing race from {} to {} players",
                self.players.len(),
                frame.players.len()
            );
            self.players.resize(frame.players.len(), RacePlayer::default());
        }
        for (player, state) in self.players.iter_mut().zip(&frame.players) {
            player.apply(state);
        }
        self.frames_applied += 1;
        self.last_frame_id = Some(frame.id);
    }

    /// All racers.
    pub fn players(&self) -> &[RacePlayer] {
        &self.players
    }

    /// One racer.
    pub fn player(&self, index: usize) -> Option<&RacePlayer> {
        self.players.get(index)
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    /// The sync strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// The sync strategy.
    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Finish the race.
    pub fn end(mut self) -> RaceSummary {
        let frames_synced = self.strategy.frame_count();
        self.strategy.shutdown();

        let summary = RaceSummary {
            ticks: self.ticks,
            frames_applied: self.frames_applied,
            frames_synced,
            last_frame_id: self.last_frame_id,
            players: self.players,
            elapsed: self.started_at.elapsed(),
        };
        info!(
            "Race session ended after {} ticks ({} frames applied)",
            summary.ticks, summary.frames_applied
        );
        summary
    }
}
