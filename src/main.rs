//! Race Sync Demo
//!
//! Runs one online race against an in-process room: matchmaking, room join,
//! track agreement by content hash, then a few seconds of frame exchange
//! with some corrupt, duplicate and missing frames mixed in.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use race_sync::{
    TICK_RATE, VERSION,
    core::{Quat, TrackIdentity, Vec3},
    network::{
        FrameChannel, LocalConnector, LoginInfo, MatchFound, MatchQueue, MemoryChannel,
        PlayerFrame, RaceCoordinator, RaceMessage, RaceServerFrame, RoomEvent, SyncConfig,
        PlayerInput,
    },
    race::{RaceSession, SyncStrategy},
    tracks::{CatalogConfig, MemoryStorage, TrackPackCatalog, TrackStorage},
};

const PLAYERS: usize = 4;
const RACE_TICKS: u32 = 5 * TICK_RATE;

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Race Sync v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    let catalog = load_catalog()?;
    demo_race(catalog)
}

/// Load from `RACE_SYNC_TRACK_ROOT` if set, otherwise from built-in data.
fn load_catalog() -> Result<TrackPackCatalog> {
    let config = CatalogConfig::from_env();
    let storage: Box<dyn TrackStorage> = match config.storage() {
        Some(dir) => {
            info!("Loading tracks from {}", dir.root().display());
            Box::new(dir)
        }
        None => Box::new(demo_storage()),
    };

    let mut catalog = TrackPackCatalog::new();
    catalog.load_track_db(storage.as_ref()).context("loading track database")?;
    catalog.load_track_packs(storage.as_ref()).context("loading track packs")?;

    for (index, pack) in catalog.selectable_packs() {
        info!(
            "Pack {}: {} by {} ({})",
            index,
            pack.display_name(),
            pack.author_names(),
            hex::encode(&pack.manifest_hash()[..4])
        );
    }
    Ok(catalog)
}

fn demo_storage() -> MemoryStorage {
    let tracks = ["Sunset Loop", "Cliffside Run", "Harbour Sprint", "Block Arena"];
    let records: Vec<_> = tracks
        .iter()
        .enumerate()
        .map(|(i, name)| {
            serde_json::json!({
                "wiimm_id": 1000 + i,
                "sha1": TrackIdentity::of_track_file(name.as_bytes()).to_hex(),
                "name": name,
                "is_arena": name.contains("Arena"),
                "slot_id": 11 + i,
            })
        })
        .collect();

    MemoryStorage::new()
        .with_track_db(serde_json::Value::Array(records).to_string())
        .with_manifest(
            "community.ini",
            "[Pack Info]\nname = Community Pack\nauthor = Demo\nrace = 1000, 1001, 1002\nballoon = 1003\n",
        )
        .with_manifest("broken.ini", "[Pack Info]\nname = Broken\nrace = 1000, 77777\n")
}

/// Demo function to run an online race.
fn demo_race(mut catalog: TrackPackCatalog) -> Result<()> {
    info!("=== Starting Demo Race ===");

    let Some(track) = catalog.registry().iter().next().map(|r| r.identity) else {
        bail!("track database is empty");
    };
    let first_pack = catalog.selectable_packs().next().map(|(index, _)| index);
    if let Some(index) = first_pack {
        catalog.select_pack(index)?;
    }

    let mut matches = MatchQueue::new();
    matches.push(MatchFound {
        room_ip: "127.0.0.1".parse()?,
        login_info: LoginInfo { client_id: 1, token: b"demo".to_vec() },
    });
    let mut coordinator =
        RaceCoordinator::new(LocalConnector::default(), matches, catalog, SyncConfig::from_env());

    // Join the room, then let it start the race on `track`.
    coordinator.calc()?;
    let Some(room) = coordinator.room_mut() else {
        bail!("no room after match response");
    };
    room.push_event(RoomEvent::RaceStart {
        track,
        player_count: PLAYERS,
        local_player_count: 1,
    });
    coordinator.calc()?;
    let Some(mut server) = coordinator.room_mut().and_then(|r| r.take_server_channel()) else {
        bail!("race did not start");
    };
    for event in coordinator.take_events() {
        info!("Coordinator event: {:?}", event);
    }

    let mut session = RaceSession::new(coordinator, PLAYERS, 1);
    info!("Running {} ticks...", RACE_TICKS);

    for t in 0..RACE_TICKS {
        serve_tick(&mut server, t)?;

        session.strategy_mut().calc()?;
        let input = PlayerInput::with_stick(((t % 64) as i8) - 32, 0)
            .with_flag(PlayerInput::FLAG_ACCELERATE, true);
        session.tick(&[input])?;

        if t > 0 && t % TICK_RATE == 0 {
            let lead = session.player(0).map(|p| p.position).unwrap_or_default();
            info!(
                "Tick {}: synced {} frames, leader at {:?}",
                t,
                session.strategy().frame_count(),
                lead
            );
        }
    }

    if let Some(driver) = session.strategy().slot().instance() {
        info!("Sync stats: {}", serde_json::to_string(driver.stats())?);
    }

    if let Some(room) = session.strategy_mut().room_mut() {
        room.push_event(RoomEvent::RaceEnd);
    }
    session.strategy_mut().calc()?;

    let summary = session.end();
    info!("=== Race Complete ===");
    info!(
        "Ticks: {}, frames applied: {}, last frame: {:?}, elapsed: {:?}",
        summary.ticks, summary.frames_applied, summary.last_frame_id, summary.elapsed
    );
    Ok(())
}

/// Play the room's side of one tick.
fn serve_tick(server: &mut MemoryChannel, tick: u32) -> Result<()> {
    let id = tick + 1;
    let frame = RaceServerFrame {
        id,
        players: (0..PLAYERS)
            .map(|slot| {
                let progress = tick as f32 * (1.0 + slot as f32 * 0.05);
                PlayerFrame {
                    pos: Vec3::new(progress, 0.0, slot as f32 * 4.0),
                    main_rot: Quat::from_yaw(progress * 0.01),
                    internal_speed: 60.0 + slot as f32,
                }
            })
            .collect(),
    };

    match tick % 97 {
        // Lost frame.
        13 => {}
        // Corrupt position.
        41 => {
            let mut bad = frame;
            bad.players[1].pos.x = f32::NAN;
            server.try_send(&RaceMessage::from(bad).to_bytes()?)?;
        }
        // Duplicate.
        70 => {
            let bytes = RaceMessage::from(frame).to_bytes()?;
            server.try_send(&bytes)?;
            server.try_send(&bytes)?;
        }
        _ => {
            server.try_send(&RaceMessage::from(frame).to_bytes()?)?;
        }
    }

    // Drain client frames so the room's inbox never fills.
    while server.try_recv()?.is_some() {}
    Ok(())
}
