//! Protocol Messages
//!
//! Wire format for race frames exchanged with the room.
//! Frames are bincode encoded with fixed-width little-endian integers.
//! Decoding is bounded by `MAX_FRAME_BYTES` and rejects trailing bytes, so a
//! hostile peer cannot make the client allocate or misparse.
//!
//! Layout of a server frame: `u32` variant tag, `u32` frame id, `u64` player
//! count, then per player `pos` (3 x `f32`), `main_rot` (4 x `f32`) and
//! `internal_speed` (`f32`).

use bincode::Options;
use serde::{Serialize, Deserialize};

use crate::core::vec3::{Quat, Vec3};

/// Upper bound on an encoded message.
pub const MAX_FRAME_BYTES: usize = 1024;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_FRAME_BYTES as u64)
        .reject_trailing_bytes()
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Authoritative state of one player.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerFrame {
    /// World position.
    pub pos: Vec3,
    /// Orientation of the vehicle body.
    pub main_rot: Quat,
    /// Engine speed.
    pub internal_speed: f32,
}

/// One tick of authoritative race state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceServerFrame {
    /// Sequence number; increases by one per server tick.
    pub id: u32,
    /// One entry per room slot.
    pub players: Vec<PlayerFrame>,
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Controller state of one local player for a frame.
///
/// Same packed layout as a pad read: two stick axes and a button mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    /// Stick X: -127 (left) to +127 (right).
    pub stick_x: i8,
    /// Stick Y: -127 (down) to +127 (up).
    pub stick_y: i8,
    /// Button flags (see `FLAG_*`).
    pub flags: u8,
}

impl PlayerInput {
    /// Accelerate held.
    pub const FLAG_ACCELERATE: u8 = 0x01;
    /// Brake / reverse held.
    pub const FLAG_BRAKE: u8 = 0x02;
    /// Item button held.
    pub const FLAG_ITEM: u8 = 0x04;
    /// Drift held.
    pub const FLAG_DRIFT: u8 = 0x08;
    /// Trick input this frame.
    pub const FLAG_TRICK: u8 = 0x10;

    /// Neutral input (no buttons, stick centred).
    pub const fn new() -> Self {
        Self { stick_x: 0, stick_y: 0, flags: 0 }
    }

    /// Input with the given stick position and no buttons.
    pub const fn with_stick(stick_x: i8, stick_y: i8) -> Self {
        Self { stick_x, stick_y, flags: 0 }
    }

    /// Set or clear a flag (builder style).
    pub fn with_flag(mut self, flag: u8, held: bool) -> Self {
        self.set_flag(flag, held);
        self
    }

    /// Set or clear a flag.
    #[inline]
    pub fn set_flag(&mut self, flag: u8, held: bool) {
        if held {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Check a flag.
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Accelerate held.
    #[inline]
    pub fn accelerate(&self) -> bool {
        self.has_flag(Self::FLAG_ACCELERATE)
    }

    /// Brake held.
    #[inline]
    pub fn brake(&self) -> bool {
        self.has_flag(Self::FLAG_BRAKE)
    }

    /// Drift held.
    #[inline]
    pub fn drift(&self) -> bool {
        self.has_flag(Self::FLAG_DRIFT)
    }
}

/// Local input sent to the room each tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceClientFrame {
    /// Local outbound sequence number.
    pub id: u32,
    /// Last server frame this client accepted.
    pub server_frame_id: Option<u32>,
    /// One entry per local player.
    pub players: Vec<PlayerInput>,
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Every datagram on the race channel is one of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RaceMessage {
    /// Authoritative state from the room.
    ServerFrame(RaceServerFrame),
    /// Input from a client.
    ClientFrame(RaceClientFrame),
}

impl RaceMessage {
    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        wire_options().serialize(self)
    }

    /// Deserialize from the wire format.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        wire_options().deserialize(data)
    }

    /// Serialize to JSON (logs and debugging).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl From<RaceServerFrame> for RaceMessage {
    fn from(frame: RaceServerFrame) -> Self {
        Self::ServerFrame(frame)
    }
}

impl From<RaceClientFrame> for RaceMessage {
    fn from(frame: RaceClientFrame) -> Self {
        Self::ClientFrame(frame)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn server_frame(id: u32, players: usize) -> RaceServerFrame {
        RaceServerFrame {
            id,
            players: (0..players)
                .map(|i| PlayerFrame {
                    pos: Vec3::new(i as f32, 2.0, -3.5),
                    main_rot: Quat::from_yaw(0.25),
                    internal_speed: 80.0,
                })
                .collect(),
        }
    }

    #[test]
    fn test_server_frame_layout() {
        let bytes = RaceMessage::from(server_frame(7, 2)).to_bytes().unwrap();

        // tag + id + count + 2 * (3 + 4 + 1) floats
        assert_eq!(bytes.len(), 4 + 4 + 8 + 2 * 8 * 4);
        assert_eq!(&bytes[0..4], &0u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &7u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &2u64.to_le_bytes());
        assert_eq!(&bytes[16..20], &0.0f32.to_le_bytes());

        let decoded = RaceMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, RaceMessage::ServerFrame(server_frame(7, 2)));
    }

    #[test]
    fn test_full_room_fits_limit() {
        let bytes = RaceMessage::from(server_frame(u32::MAX, crate::MAX_PLAYERS))
            .to_bytes()
            .unwrap();
        assert!(bytes.len() <= MAX_FRAME_BYTES);
        assert!(RaceMessage::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = RaceMessage::from(server_frame(1, 1)).to_bytes().unwrap();
        bytes.push(0);
        assert!(RaceMessage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_and_garbage_rejected() {
        let bytes = RaceMessage::from(server_frame(1, 3)).to_bytes().unwrap();
        assert!(RaceMessage::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(RaceMessage::from_bytes(&[]).is_err());
        assert!(RaceMessage::from_bytes(&[9, 0, 0, 0, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_oversized_player_count_rejected() {
        // Claims u32::MAX players; the byte limit stops the allocation.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(u32::MAX as u64).to_le_bytes());
        assert!(RaceMessage::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_client_frame_binary() {
        let frame = RaceClientFrame {
            id: 3,
            server_frame_id: Some(99),
            players: vec![PlayerInput::with_stick(-20, 127)
                .with_flag(PlayerInput::FLAG_ACCELERATE, true)
                .with_flag(PlayerInput::FLAG_DRIFT, true)],
        };
        let bytes = RaceMessage::from(frame.clone()).to_bytes().unwrap();
        assert_eq!(RaceMessage::from_bytes(&bytes).unwrap(), RaceMessage::ClientFrame(frame));
    }

    #[test]
    fn test_json_debug_form() {
        let msg = RaceMessage::from(RaceServerFrame {
            id: 5,
            players: vec![PlayerFrame {
                pos: Vec3::new(1.5, -2.0, 0.25),
                main_rot: Quat::IDENTITY,
                internal_speed: 64.0,
            }],
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("ServerFrame"));
        assert_eq!(RaceMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_input_flags() {
        let mut input = PlayerInput::new();
        assert!(!input.accelerate());

        input.set_flag(PlayerInput::FLAG_ACCELERATE, true);
        input.set_flag(PlayerInput::FLAG_BRAKE, true);
        assert!(input.accelerate());
        assert!(input.brake());
        assert!(!input.drift());

        input.set_flag(PlayerInput::FLAG_BRAKE, false);
        assert!(!input.brake());
        assert!(input.has_flag(PlayerInput::FLAG_ACCELERATE));
    }
}
