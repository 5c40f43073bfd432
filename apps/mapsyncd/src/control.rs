use std::net::SocketAddr;
use std::sync::Arc;

use mapcore::{MemoryWorld, PlayerView, Vnum, WorldView};
use mapio::line::LineReader;
use mapsync::Registry;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

// Reveal requests can carry long vnum lists.
const CONTROL_MAX_LINE: usize = 64 * 1024;

/// One line on the control port. Stands in for the game loop.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlReq {
    Move {
        player: String,
        room: Vnum,
    },
    Reveal {
        player: String,
        rooms: Vec<Vnum>,
    },
    AddPlayer {
        name: String,
        room: Vnum,
        #[serde(default)]
        sees_hidden: bool,
    },
    Notify {
        player: String,
    },
    Stats {},
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ControlResp {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<String>>,
}

impl ControlResp {
    fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    fn err(msg: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(msg.to_string()),
            ..Self::default()
        }
    }

    fn notified(n: usize) -> Self {
        Self {
            notified: Some(n),
            ..Self::ok()
        }
    }
}

/// Apply one request. World changes are followed by a notify for that player.
pub async fn apply(req: ControlReq, world: &MemoryWorld, registry: &Registry) -> ControlResp {
    match req {
        ControlReq::Move { player, room } => match world.move_player(&player, room) {
            Ok(()) => ControlResp::notified(registry.notify(&player).await),
            Err(e) => ControlResp::err(e),
        },
        ControlReq::Reveal { player, rooms } => match world.reveal(&player, &rooms) {
            Ok(n) => ControlResp {
                revealed: Some(n),
                ..ControlResp::notified(registry.notify(&player).await)
            },
            Err(e) => ControlResp::err(e),
        },
        ControlReq::AddPlayer {
            name,
            room,
            sees_hidden,
        } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return ControlResp::err("empty name");
            }
            if world.room(room).is_none() {
                return ControlResp::err(format!("unknown room: {room}"));
            }
            world.upsert_player(PlayerView {
                name: name.clone(),
                current_room: room,
                explored: [room].into_iter().collect(),
                sees_hidden,
            });
            ControlResp::notified(registry.notify(&name).await)
        }
        ControlReq::Notify { player } => ControlResp::notified(registry.notify(&player).await),
        ControlReq::Stats {} => ControlResp {
            subscribers: Some(registry.subscriber_count().await),
            sessions: Some(registry.session_count().await),
            players: Some(world.player_names()),
            ..ControlResp::ok()
        },
    }
}

pub async fn control_server_task(
    bind: SocketAddr,
    world: Arc<MemoryWorld>,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(bind = %bind, "control port listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let world = world.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_control_conn(stream, world, registry).await {
                warn!(peer = %peer, err = %e, "control connection failed");
            }
        });
    }
}

async fn handle_control_conn(
    stream: TcpStream,
    world: Arc<MemoryWorld>,
    registry: Arc<Registry>,
) -> anyhow::Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut lr = LineReader::new(rd).max_line_len(CONTROL_MAX_LINE);

    while let Some(line) = lr.read_line().await? {
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<ControlReq>(line) {
            Ok(req) => apply(req, &world, &registry).await,
            Err(e) => ControlResp::err(format!("bad json: {e}")),
        };
        let mut out = serde_json::to_vec(&resp)?;
        out.push(b'\n');
        wr.write_all(&out).await?;
    }
    Ok(())
}
