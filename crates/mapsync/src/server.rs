use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use mapcore::{BuildError, MapMode, Vnum, WorldView};
use mapio::handshake::upgrade_response;
use mapio::http::{Request, Response, read_request};
use mapio::line::LineReader;
use mapio::ws::{CLOSE_NORMAL, Message, WsReader, WsWriter};
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::page::INDEX_HTML;
use crate::registry::{Outbound, Registry, SubscriberId};

// How long a disconnecting writer gets to flush its close frame.
const WRITER_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMsg {
    Subscribe {
        player: String,
        #[serde(default)]
        mode: MapMode,
    },
}

struct Ctx {
    cfg: SyncConfig,
    registry: Arc<Registry>,
}

/// The running map service: one listener for the page, the JSON routes and
/// WebSocket upgrades, plus the liveness ping timer.
pub struct SyncServer {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncServer {
    pub async fn start(cfg: SyncConfig, world: Arc<dyn WorldView>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(cfg.bind).await?;
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(Registry::new(world, cfg.poll_session_ttl));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let ping_interval = cfg.ping_interval;
        let ctx = Arc::new(Ctx {
            cfg,
            registry: registry.clone(),
        });

        let tasks = vec![
            tokio::spawn(accept_loop(listener, ctx, shutdown_rx.clone())),
            tokio::spawn(ping_loop(registry.clone(), ping_interval, shutdown_rx)),
        ];

        info!(addr = %local_addr, "map server listening");
        Ok(Self {
            local_addr,
            registry,
            shutdown,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Entry point for the game loop: `player`'s map changed.
    pub async fn notify(&self, player: &str) -> usize {
        self.registry.notify(player).await
    }

    /// Stop accepting, stop pinging, and close every subscriber.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for t in self.tasks {
            let _ = t.await;
        }
        let n = self.registry.close_all().await;
        info!(addr = %self.local_addr, closed = n, "map server stopped");
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<Ctx>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, peer, ctx).await {
                        debug!(peer = %peer, err = %e, "connection ended with error");
                    }
                });
            }
        }
    }
}

async fn ping_loop(registry: Arc<Registry>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(period.max(Duration::from_millis(10)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval fires immediately; skip that one
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let pruned = registry.ping_all().await;
                if pruned > 0 {
                    info!(pruned, "ping sweep pruned subscribers");
                }
            }
        }
    }
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, ctx: Arc<Ctx>) -> std::io::Result<()> {
    let _ = stream.set_nodelay(true);
    let (rd, mut wr) = stream.into_split();
    let mut lr = LineReader::new(rd);

    let req = match read_request(&mut lr).await {
        Ok(Some(r)) => r,
        Ok(None) => return Ok(()),
        Err(e) => {
            debug!(peer = %peer, err = %e, "bad request");
            if let Some(status) = e.status() {
                Response::error(status, &e.to_string()).write_to(&mut wr).await?;
            }
            return Ok(());
        }
    };

    if req.method != "GET" {
        debug!(peer = %peer, method = %req.method, path = %req.path, "method not allowed");
        return Response::error(405, "only GET is supported")
            .header("Allow", "GET")
            .write_to(&mut wr)
            .await;
    }

    if req.is_websocket_upgrade() {
        let resp = match upgrade_response(&req) {
            Ok(r) => r,
            Err(e) => {
                debug!(peer = %peer, err = %e, "websocket handshake rejected");
                return e.response().write_to(&mut wr).await;
            }
        };
        resp.write_to(&mut wr).await?;
        // Bytes read past the blank line already belong to the frame stream.
        let (rd, leftover) = lr.into_parts();
        serve_ws(rd, leftover, wr, peer, ctx).await;
        return Ok(());
    }

    route(&req, &ctx.registry).await.write_to(&mut wr).await
}

async fn route(req: &Request, registry: &Registry) -> Response {
    match req.path.as_str() {
        "/" | "/index.html" => Response::html(INDEX_HTML),
        "/state" => {
            let Some(player) = player_param(req) else {
                return Response::error(400, "missing player");
            };
            lookup_response(player, registry.poll(player).await)
        }
        "/path" => {
            let Some(player) = player_param(req) else {
                return Response::error(400, "missing player");
            };
            let Some(to) = req.query_param("to").and_then(|v| v.trim().parse::<Vnum>().ok()) else {
                return Response::error(400, "missing or invalid to");
            };
            lookup_response(player, registry.path(player, to).await)
        }
        _ => Response::error(404, "not found"),
    }
}

fn player_param(req: &Request) -> Option<&str> {
    req.query_param("player").filter(|p| !p.trim().is_empty())
}

fn lookup_response(player: &str, res: Result<String, BuildError>) -> Response {
    match res {
        Ok(body) => Response::json(200, body),
        Err(BuildError::UnknownPlayer(_)) => Response::error(404, "unknown player"),
        Err(e) => {
            warn!(player = %player, err = %e, "map build failed");
            Response::error(500, "map build failed")
        }
    }
}

async fn serve_ws(
    rd: OwnedReadHalf,
    leftover: BytesMut,
    wr: OwnedWriteHalf,
    peer: SocketAddr,
    ctx: Arc<Ctx>,
) {
    let (tx, rx) = mpsc::channel::<Outbound>(ctx.cfg.outbound_queue.max(1));
    // The registry owns the only strong sender; removal from it closes the writer.
    let control = tx.downgrade();
    let id = ctx.registry.register(tx, Some(peer)).await;
    info!(peer = %peer, sub = id, "map client connected");

    let mut writer = tokio::spawn(writer_task(WsWriter::new(wr), rx, peer));
    let mut reader = WsReader::with_buffer(rd, leftover).max_frame_len(ctx.cfg.max_frame_len);
    let mut writer_done = false;

    let reason = loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break "writer closed";
            }
            msg = reader.read_message() => match msg {
                Ok(Some(Message::Text(text))) => {
                    if !handle_text(&ctx.registry, id, &text, peer).await {
                        break "dropped by registry";
                    }
                }
                Ok(Some(Message::Binary(b))) => {
                    debug!(peer = %peer, len = b.len(), "ignoring binary message");
                }
                Ok(Some(Message::Ping(payload))) => {
                    send_control(&control, Outbound::Pong(payload));
                }
                Ok(Some(Message::Pong(_))) => {}
                Ok(Some(Message::Close)) => {
                    send_control(&control, Outbound::Close);
                    break "client close";
                }
                Ok(None) => break "eof",
                Err(e) => {
                    debug!(peer = %peer, err = %e, "websocket read failed");
                    break "protocol error";
                }
            }
        }
    };

    ctx.registry.unregister(id).await;
    drop(control);
    if !writer_done && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(peer = %peer, sub = id, reason, "map client disconnected");
}

// Returns false once the subscriber is no longer registered.
async fn handle_text(registry: &Registry, id: SubscriberId, text: &str, peer: SocketAddr) -> bool {
    match serde_json::from_str::<ClientMsg>(text) {
        Ok(ClientMsg::Subscribe { player, mode }) => registry.subscribe(id, &player, mode).await,
        Err(e) => {
            debug!(peer = %peer, err = %e, "ignoring client message");
            true
        }
    }
}

fn send_control(control: &mpsc::WeakSender<Outbound>, out: Outbound) {
    if let Some(tx) = control.upgrade() {
        let _ = tx.try_send(out);
    }
}

async fn writer_task(mut ws: WsWriter<OwnedWriteHalf>, mut rx: mpsc::Receiver<Outbound>, peer: SocketAddr) {
    while let Some(out) = rx.recv().await {
        let res = match out {
            Outbound::Text(t) => ws.write_text(&t).await,
            Outbound::Ping => ws.write_ping(&[]).await,
            Outbound::Pong(p) => ws.write_pong(&p).await,
            Outbound::Close => {
                let _ = ws.write_close(CLOSE_NORMAL).await;
                return;
            }
        };
        if let Err(e) = res {
            debug!(peer = %peer, err = %e, "websocket write failed");
            return;
        }
    }
    // queue closed: pruned, unregistered or server stopping
    let _ = ws.write_close(CLOSE_NORMAL).await;
}
