//! Network Layer
//!
//! Race frame exchange with the room: wire format, validation, transport,
//! the per-tick driver and the glue that creates and destroys it.
//! Nothing in here blocks the tick.

pub mod protocol;
pub mod validation;
pub mod channel;
pub mod driver;
pub mod lifecycle;
pub mod room;
pub mod coordinator;

pub use protocol::{
    RaceMessage, RaceServerFrame, RaceClientFrame, PlayerFrame, PlayerInput, MAX_FRAME_BYTES,
};
pub use validation::{validate_frame, FrameRejection, ValidationLimits};
pub use channel::{FrameChannel, MemoryChannel, UdpFrameChannel, ChannelError, SendOutcome, OverflowPolicy};
pub use driver::{RaceSyncDriver, SyncConfig, SyncError, SyncStats, DriverState, TerminationReason};
pub use lifecycle::{DriverSlot, LifecycleError};
pub use room::{
    RoomMembership, RoomConnector, Matchmaker, RoomHandler, RoomEvent, RoomConnection,
    RoomState, RoomError, LoginInfo, MatchFound, LocalRoom, LocalConnector, MatchQueue,
};
pub use coordinator::{RaceCoordinator, CoordinatorEvent, CoordinatorError};
