//! Room Membership
//!
//! Interfaces to the room a client joins after matchmaking. The room owns
//! the login handshake and member list; the race layer only needs to know
//! whether the connection is live, how many players are in it, and when a
//! race starts or ends.
//!
//! `LocalRoom`, `LocalConnector` and `MatchQueue` are in-process
//! implementations used for offline play, demos and tests.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::hash::TrackIdentity;
use crate::network::channel::{ChannelError, FrameChannel, MemoryChannel, OverflowPolicy};

// =============================================================================
// CONNECTION
// =============================================================================

/// Room connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    /// Login handshake in progress.
    Connecting,
    /// Joined; races may start.
    Live,
    /// Connection gone.
    Closed,
}

/// Snapshot of a room connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConnection {
    /// Local identifier for log correlation.
    pub id: Uuid,
    /// Room address.
    pub addr: SocketAddr,
    /// Local client slot.
    pub slot: u32,
    /// Players in the room, local ones included.
    pub player_count: usize,
    /// Players on this console.
    pub local_player_count: usize,
    /// Current state.
    pub state: RoomState,
}

impl RoomConnection {
    /// New connection in the `Connecting` state.
    pub fn new(slot: u32, addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            slot,
            player_count: 0,
            local_player_count: 0,
            state: RoomState::Connecting,
        }
    }

    /// Whether a race driver may be attached.
    pub fn is_live(&self) -> bool {
        self.state == RoomState::Live
    }
}

/// Credentials handed to the room at login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    /// Player identifier issued by the matchmaker.
    pub client_id: u32,
    /// Opaque session token.
    pub token: Vec<u8>,
}

/// A matchmaker response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    /// Room server address (port is fixed).
    pub room_ip: IpAddr,
    /// Credentials for the room.
    pub login_info: LoginInfo,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Notifications raised while driving a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The room picked a track and the race is starting.
    RaceStart {
        /// Content hash of the chosen track.
        track: TrackIdentity,
        /// Players in the race.
        player_count: usize,
        /// Players on this console.
        local_player_count: usize,
    },
    /// The race finished.
    RaceEnd,
    /// The room dropped the connection.
    Disconnected,
}

/// Receives room events.
pub trait RoomHandler {
    /// Handle one event.
    fn on_event(&mut self, event: RoomEvent);
}

impl RoomHandler for Vec<RoomEvent> {
    fn on_event(&mut self, event: RoomEvent) {
        self.push(event);
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Room connection errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Could not reach or log into the room.
    #[error("failed to connect to room {addr}: {reason}")]
    ConnectFailed {
        /// Room address.
        addr: SocketAddr,
        /// Failure description.
        reason: String,
    },
}

/// A joined (or joining) room.
pub trait RoomMembership {
    /// Transport for race frames.
    type Channel: FrameChannel;

    /// Drive the room for one tick. Returns `false` on an unrecoverable
    /// room fault.
    fn calc(&mut self, handler: &mut dyn RoomHandler) -> bool;

    /// Connection snapshot.
    fn connection(&self) -> &RoomConnection;

    /// Open the race frame channel. Only valid while live.
    fn open_race_channel(&mut self) -> Result<Self::Channel, ChannelError>;
}

/// Creates room connections.
pub trait RoomConnector {
    /// Room type produced.
    type Room: RoomMembership;

    /// Start joining the room at `addr`.
    fn create_instance(
        &mut self,
        slot: u32,
        addr: SocketAddr,
        login_info: LoginInfo,
    ) -> Result<Self::Room, RoomError>;
}

/// Source of match responses.
pub trait Matchmaker {
    /// Take the pending match response, if one arrived.
    fn take_match_response(&mut self) -> Option<MatchFound>;
}

// =============================================================================
// IN-PROCESS IMPLEMENTATIONS
// =============================================================================

/// Room simulated in process.
///
/// Events are scripted with `push_event`. The room side of the race
/// channel is kept and can be taken with `take_server_channel`.
pub struct LocalRoom {
    connection: RoomConnection,
    login_info: LoginInfo,
    pending: VecDeque<RoomEvent>,
    server_channel: Option<MemoryChannel>,
    capacity: usize,
    policy: OverflowPolicy,
    faulted: bool,
}

impl LocalRoom {
    /// Create a room connection that goes live on its first `calc`.
    pub fn new(slot: u32, addr: SocketAddr, login_info: LoginInfo) -> Self {
        Self {
            connection: RoomConnection::new(slot, addr),
            login_info,
            pending: VecDeque::new(),
            server_channel: None,
            capacity: 64,
            policy: OverflowPolicy::default(),
            faulted: false,
        }
    }

    /// Buffering for race channels opened from now on.
    pub fn with_channel(mut self, capacity: usize, policy: OverflowPolicy) -> Self {
        self.capacity = capacity;
        self.policy = policy;
        self
    }

    /// Queue an event for the next `calc`.
    pub fn push_event(&mut self, event: RoomEvent) {
        self.pending.push_back(event);
    }

    /// Make the next `calc` report a fault.
    pub fn inject_fault(&mut self) {
        self.faulted = true;
    }

    /// Take the room side of the last opened race channel.
    pub fn take_server_channel(&mut self) -> Option<MemoryChannel> {
        self.server_channel.take()
    }

    /// Credentials used to join.
    pub fn login_info(&self) -> &LoginInfo {
        &self.login_info
    }
}

impl RoomMembership for LocalRoom {
    type Channel = MemoryChannel;

    fn calc(&mut self, handler: &mut dyn RoomHandler) -> bool {
        if self.faulted {
            return false;
        }

        if self.connection.state == RoomState::Connecting {
            self.connection.state = RoomState::Live;
            info!("Joined room {} as slot {}", self.connection.addr, self.connection.slot);
        }

        while let Some(event) = self.pending.pop_front() {
            match &event {
                RoomEvent::RaceStart { player_count, local_player_count, .. } => {
                    self.connection.player_count = *player_count;
                    self.connection.local_player_count = *local_player_count;
                }
                RoomEvent::RaceEnd => {}
                RoomEvent::Disconnected => {
                    self.connection.state = RoomState::Closed;
                    self.server_channel = None;
                }
            }
            debug!("Room event: {:?}", event);
            handler.on_event(event);
        }

        true
    }

    fn connection(&self) -> &RoomConnection {
        &self.connection
    }

    fn open_race_channel(&mut self) -> Result<MemoryChannel, ChannelError> {
        if !self.connection.is_live() {
            return Err(ChannelError::Closed);
        }
        let (client, server) = MemoryChannel::pair(self.capacity, self.policy);
        self.server_channel = Some(server);
        Ok(client)
    }
}

/// Connector producing `LocalRoom`s.
#[derive(Debug, Default)]
pub struct LocalConnector {
    /// Connections created so far.
    pub created: usize,
    /// Fail the next connection attempt.
    pub refuse_next: bool,
}

impl RoomConnector for LocalConnector {
    type Room = LocalRoom;

    fn create_instance(
        &mut self,
        slot: u32,
        addr: SocketAddr,
        login_info: LoginInfo,
    ) -> Result<LocalRoom, RoomError> {
        if std::mem::take(&mut self.refuse_next) {
            return Err(RoomError::ConnectFailed {
                addr,
                reason: "connection refused".to_string(),
            });
        }
        self.created += 1;
        Ok(LocalRoom::new(slot, addr, login_info))
    }
}

/// Matchmaker fed by hand.
#[derive(Debug, Default)]
pub struct MatchQueue {
    responses: VecDeque<MatchFound>,
}

impl MatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response.
    pub fn push(&mut self, found: MatchFound) {
        self.responses.push_back(found);
    }
}

impl Matchmaker for MatchQueue {
    fn take_match_response(&mut self) -> Option<MatchFound> {
        self.responses.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:21330".parse().unwrap()
    }

    #[test]
    fn test_room_goes_live_on_first_calc() {
        let mut room = LocalRoom::new(1, addr(), LoginInfo::default());
        assert!(!room.connection().is_live());
        assert!(room.open_race_channel().is_err());

        let mut events: Vec<RoomEvent> = Vec::new();
        assert!(room.calc(&mut events));
        assert!(room.connection().is_live());
        assert!(events.is_empty());
    }

    #[test]
    fn test_race_start_updates_connection() {
        let mut room = LocalRoom::new(1, addr(), LoginInfo::default());
        let start = RoomEvent::RaceStart {
            track: TrackIdentity::new([3; 20]),
            player_count: 6,
            local_player_count: 2,
        };
        room.push_event(start.clone());

        let mut events: Vec<RoomEvent> = Vec::new();
        room.calc(&mut events);
        assert_eq!(events, vec![start]);
        assert_eq!(room.connection().player_count, 6);
        assert_eq!(room.connection().local_player_count, 2);
    }

    #[test]
    fn test_race_channel_reaches_server_side() {
        let mut room = LocalRoom::new(1, addr(), LoginInfo::default());
        room.calc(&mut Vec::<RoomEvent>::new());

        let mut client = room.open_race_channel().unwrap();
        let mut server = room.take_server_channel().unwrap();
        server.try_send(b"frame").unwrap();
        assert_eq!(client.try_recv().unwrap(), Some(b"frame".to_vec()));
    }

    #[test]
    fn test_disconnect_closes_channel() {
        let mut room = LocalRoom::new(1, addr(), LoginInfo::default());
        room.calc(&mut Vec::<RoomEvent>::new());
        let mut client = room.open_race_channel().unwrap();

        room.push_event(RoomEvent::Disconnected);
        room.calc(&mut Vec::<RoomEvent>::new());
        assert_eq!(room.connection().state, RoomState::Closed);
        assert!(matches!(client.try_recv(), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_fault_reported() {
        let mut room = LocalRoom::new(1, addr(), LoginInfo::default());
        room.inject_fault();
        assert!(!room.calc(&mut Vec::<RoomEvent>::new()));
    }

    #[test]
    fn test_connector_and_queue() {
        let mut queue = MatchQueue::new();
        assert!(queue.take_match_response().is_none());
        queue.push(MatchFound {
            room_ip: "10.0.0.7".parse().unwrap(),
            login_info: LoginInfo { client_id: 9, token: vec![1, 2] },
        });
        let found = queue.take_match_response().unwrap();

        let mut connector = LocalConnector { refuse_next: true, ..Default::default() };
        assert!(connector
            .create_instance(1, SocketAddr::new(found.room_ip, 21330), found.login_info.clone())
            .is_err());

        let room = connector
            .create_instance(1, SocketAddr::new(found.room_ip, 21330), found.login_info)
            .unwrap();
        assert_eq!(connector.created, 1);
        assert_eq!(room.login_info().client_id, 9);
    }
}
