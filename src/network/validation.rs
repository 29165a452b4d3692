//! Frame Validation
//!
//! Pure checks applied to every server frame before the simulation sees it.
//! A peer may send anything; a frame either passes every check or is
//! rejected whole.

use thiserror::Error;

use crate::core::vec3::{Quat, Vec3};
use crate::network::protocol::RaceServerFrame;

/// Bounds applied to peer-supplied values.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidationLimits {
    /// Largest allowed absolute position component.
    pub world_limit: f32,
    /// Allowed deviation of a rotation's magnitude from one.
    pub quat_tolerance: f32,
    /// Largest allowed absolute speed.
    pub max_speed: f32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            world_limit: 1.0e5,
            quat_tolerance: 0.01,
            max_speed: 1000.0,
        }
    }
}

/// Why a frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameRejection {
    /// Bytes did not decode to a server frame.
    #[error("undecodable frame: {0}")]
    Decode(String),

    /// Player list does not match the room.
    #[error("expected {expected} players, got {actual}")]
    PlayerCount {
        /// Players in the room.
        expected: usize,
        /// Players in the frame.
        actual: usize,
    },

    /// Position out of bounds or not finite.
    #[error("player {player}: invalid position")]
    Position {
        /// Room slot.
        player: usize,
    },

    /// Rotation not finite or not unit length.
    #[error("player {player}: invalid rotation")]
    Rotation {
        /// Room slot.
        player: usize,
    },

    /// Speed out of bounds or not finite.
    #[error("player {player}: invalid speed")]
    Speed {
        /// Room slot.
        player: usize,
    },
}

/// Check a scalar.
#[inline]
pub fn is_f32_valid(value: f32, limit: f32) -> bool {
    value.is_finite() && value.abs() <= limit
}

/// Check a position.
#[inline]
pub fn is_vec3_valid(v: &Vec3, limits: &ValidationLimits) -> bool {
    v.to_array().iter().all(|&c| is_f32_valid(c, limits.world_limit))
}

/// Check a rotation.
#[inline]
pub fn is_quat_valid(q: &Quat, limits: &ValidationLimits) -> bool {
    q.to_array().iter().all(|c| c.is_finite()) && (q.norm() - 1.0).abs() <= limits.quat_tolerance
}

/// Validate a whole frame against the room's player count.
pub fn validate_frame(
    frame: &RaceServerFrame,
    expected_players: usize,
    limits: &ValidationLimits,
) -> Result<(), FrameRejection> {
    if frame.players.len() != expected_players {
        return Err(FrameRejection::PlayerCount {
            expected: expected_players,
            actual: frame.players.len(),
        });
    }

    for (player, state) in frame.players.iter().enumerate() {
        if !is_vec3_valid(&state.pos, limits) {
            return Err(FrameRejection::Position { player });
        }
        if !is_quat_valid(&state.main_rot, limits) {
            return Err(FrameRejection::Rotation { player });
        }
        if !is_f32_valid(state.internal_speed, limits.max_speed) {
            return Err(FrameRejection::Speed { player });
        }
    }

    Ok(())
}
