use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use mapcore::{BuildError, MapMode, MapPayload, Vnum, WorldView, ZoneColors};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

pub type SubscriberId = u64;

/// What a connection's writer task puts on the wire, one frame per item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Pong(Bytes),
    Close,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    peer: Option<SocketAddr>,
    player: Option<String>, // as given by the client
    player_lc: Option<String>,
    mode: MapMode,
}

// Zone colours per player identity, shared by all of that player's tabs and polls.
#[derive(Debug)]
struct PlayerSession {
    colors: ZoneColors,
    last_used: Instant,
}

impl PlayerSession {
    fn new() -> Self {
        Self {
            colors: ZoneColors::new(),
            last_used: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    subs: HashMap<SubscriberId, Subscriber>,
    sessions: HashMap<String, PlayerSession>, // name_lc -> session
}

/// Live subscriber connections, keyed by player identity.
///
/// All mutation goes through one async mutex, so register/subscribe/notify/ping are
/// serialized and a single player's pushes are queued in `notify` call order.
/// Socket writes happen in each connection's own writer task, fed by a bounded
/// queue; the registry only ever `try_send`s, so a stuck peer cannot stall others.
pub struct Registry {
    world: Arc<dyn WorldView>,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    session_ttl: Duration,
}

fn key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl Registry {
    pub fn new(world: Arc<dyn WorldView>, session_ttl: Duration) -> Self {
        Self {
            world,
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU64::new(1),
            session_ttl,
        }
    }

    /// Track a new connection. It receives nothing until it subscribes.
    ///
    /// The registry keeps the only strong sender: once the subscriber is removed, the
    /// writer's queue closes and the connection winds down.
    pub async fn register(&self, tx: mpsc::Sender<Outbound>, peer: Option<SocketAddr>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().await.subs.insert(
            id,
            Subscriber {
                tx,
                peer,
                player: None,
                player_lc: None,
                mode: MapMode::Full,
            },
        );
        id
    }

    pub async fn unregister(&self, id: SubscriberId) -> bool {
        self.inner.lock().await.subs.remove(&id).is_some()
    }

    /// Attach a player identity and push one payload to this subscriber alone.
    ///
    /// Returns false if the subscriber is gone (or was dropped because the push failed).
    pub async fn subscribe(&self, id: SubscriberId, player: &str, mode: MapMode) -> bool {
        let k = key(player);
        if k.is_empty() {
            return self.inner.lock().await.subs.contains_key(&id);
        }

        let mut inner = self.inner.lock().await;
        let Inner { subs, sessions } = &mut *inner;
        let Some(sub) = subs.get_mut(&id) else {
            return false;
        };
        sub.player = Some(player.trim().to_string());
        sub.player_lc = Some(k.clone());
        sub.mode = mode;
        info!(sub = id, player = %player.trim(), mode = ?mode, peer = ?sub.peer, "map subscribe");

        let session = sessions.entry(k.clone()).or_insert_with(PlayerSession::new);
        session.last_used = Instant::now();
        let Some(text) = self.render_push(&k, mode, &mut session.colors) else {
            return true;
        };
        if sub.tx.try_send(Outbound::Text(text)).is_err() {
            subs.remove(&id);
            info!(sub = id, "subscriber dropped on first push");
            return false;
        }
        true
    }

    /// Push a fresh payload to every subscriber of `player` (case-insensitive).
    ///
    /// Returns the number of subscribers the payload was queued for. Subscribers
    /// whose queue is closed or full are removed after the fan-out.
    pub async fn notify(&self, player: &str) -> usize {
        let k = key(player);
        if k.is_empty() {
            return 0;
        }

        let mut inner = self.inner.lock().await;
        let Inner { subs, sessions } = &mut *inner;

        let mut targets = subs
            .iter()
            .filter(|(_, s)| s.player_lc.as_deref() == Some(k.as_str()))
            .map(|(id, s)| (s.mode, *id))
            .collect::<Vec<_>>();
        if targets.is_empty() {
            return 0;
        }
        // Fixed build order keeps colour assignment independent of map iteration order.
        targets.sort_unstable();

        let session = sessions.entry(k.clone()).or_insert_with(PlayerSession::new);
        session.last_used = Instant::now();

        let mut rendered: BTreeMap<MapMode, Option<Arc<str>>> = BTreeMap::new();
        let mut dead = Vec::new();
        let mut sent = 0usize;
        for (mode, id) in targets {
            let text = rendered
                .entry(mode)
                .or_insert_with(|| self.render_push(&k, mode, &mut session.colors))
                .clone();
            let Some(text) = text else {
                continue;
            };
            let Some(sub) = subs.get(&id) else {
                continue;
            };
            match sub.tx.try_send(Outbound::Text(text)) {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!(sub = id, err = %e, "push failed");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            if subs.remove(&id).is_some() {
                info!(sub = id, player = %k, "subscriber pruned after failed push");
            }
        }
        sent
    }

    /// Queue a ping for every connection; any that cannot take it is pruned now.
    ///
    /// Also forgets poll-only sessions idle for longer than the session TTL.
    /// Returns the number of subscribers pruned.
    pub async fn ping_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let Inner { subs, sessions } = &mut *inner;

        let before = subs.len();
        subs.retain(|id, s| match s.tx.try_send(Outbound::Ping) {
            Ok(()) => true,
            Err(e) => {
                info!(sub = *id, player = ?s.player, err = %e, "subscriber pruned after failed ping");
                false
            }
        });
        let pruned = before - subs.len();

        let now = Instant::now();
        let ttl = self.session_ttl;
        sessions.retain(|name, sess| {
            subs.values().any(|s| s.player_lc.as_deref() == Some(name.as_str()))
                || now.duration_since(sess.last_used) <= ttl
        });

        pruned
    }

    /// One-shot payload for the HTTP poll endpoint. Same builder as the push path.
    pub async fn poll(&self, player: &str) -> Result<String, BuildError> {
        let k = key(player);
        let mut inner = self.inner.lock().await;
        let view = self
            .world
            .player(&k)
            .ok_or_else(|| BuildError::UnknownPlayer(player.trim().to_string()))?;
        let session = inner.sessions.entry(k).or_insert_with(PlayerSession::new);
        session.last_used = Instant::now();
        mapcore::payload::build_for(self.world.as_ref(), &view, MapMode::Full, &mut session.colors)?
            .to_json()
    }

    pub async fn path(&self, player: &str, to: Vnum) -> Result<String, BuildError> {
        let reply = mapcore::build_path(self.world.as_ref(), player, to)?;
        serde_json::to_string(&reply).map_err(|e| BuildError::Invariant(format!("encode path: {e}")))
    }

    /// Drop every subscriber. Their writers see a closed queue and send a close frame.
    pub async fn close_all(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let n = inner.subs.len();
        inner.subs.clear();
        n
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.lock().await.subs.len()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn contains(&self, id: SubscriberId) -> bool {
        self.inner.lock().await.subs.contains_key(&id)
    }

    // Payload text for a push. Unknown players get the explicit "location unknown"
    // document; an invariant failure skips this push and is only logged.
    fn render_push(&self, player_lc: &str, mode: MapMode, colors: &mut ZoneColors) -> Option<Arc<str>> {
        let res = match mapcore::build(self.world.as_ref(), player_lc, mode, colors) {
            Ok(p) => p.to_json(),
            Err(BuildError::UnknownPlayer(_)) => MapPayload::location_unknown().to_json(),
            Err(e) => Err(e),
        };
        match res {
            Ok(s) => Some(Arc::from(s)),
            Err(e) => {
                warn!(player = %player_lc, err = %e, "map build failed; skipping push");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapcore::world::{Direction::*, MemoryWorld, PlayerView, Room};

    fn world() -> Arc<MemoryWorld> {
        let w = MemoryWorld::new();
        w.insert_zone(1, "Town");
        w.insert_room(Room::new(1, "Gate", 1).exit(North, 2));
        w.insert_room(Room::new(2, "Road", 1).exit(South, 1).exit(East, 3));
        w.insert_room(Room::new(3, "Inn", 1).exit(West, 2));
        w.upsert_player(PlayerView {
            name: "Alice".to_string(),
            current_room: 1,
            explored: [1, 2].into_iter().collect(),
            sees_hidden: false,
        });
        w.upsert_player(PlayerView {
            name: "Bob".to_string(),
            current_room: 3,
            explored: [3].into_iter().collect(),
            sees_hidden: false,
        });
        Arc::new(w)
    }

    fn registry(w: Arc<MemoryWorld>) -> Registry {
        Registry::new(w, Duration::from_secs(600))
    }

    fn text(o: Outbound) -> Arc<str> {
        match o {
            Outbound::Text(t) => t,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_pushes_once_to_that_subscriber() {
        let reg = registry(world());
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let a = reg.register(tx1, None).await;
        let _b = reg.register(tx2, None).await;

        assert!(reg.subscribe(a, "alice", MapMode::Full).await);
        let v: serde_json::Value = serde_json::from_str(&text(rx1.try_recv().unwrap())).unwrap();
        assert_eq!(v["type"], "map_data");
        assert_eq!(v["rooms"].as_array().unwrap().len(), 2);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn two_tabs_get_identical_bytes() {
        let reg = registry(world());
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let (tx3, mut rx3) = mpsc::channel(8);
        let a = reg.register(tx1, None).await;
        let b = reg.register(tx2, None).await;
        let c = reg.register(tx3, None).await;
        reg.subscribe(a, "Alice", MapMode::Full).await;
        reg.subscribe(b, "ALICE", MapMode::Full).await;
        reg.subscribe(c, "bob", MapMode::Full).await;
        let _ = (rx1.try_recv(), rx2.try_recv(), rx3.try_recv());

        assert_eq!(reg.notify("alice").await, 2);
        let t1 = text(rx1.try_recv().unwrap());
        let t2 = text(rx2.try_recv().unwrap());
        assert_eq!(t1.as_bytes(), t2.as_bytes());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn pushes_arrive_in_notify_order() {
        let w = world();
        let reg = registry(w.clone());
        let (tx, mut rx) = mpsc::channel(8);
        let id = reg.register(tx, None).await;
        reg.subscribe(id, "alice", MapMode::Full).await;
        let _ = rx.try_recv();

        reg.notify("alice").await;
        w.move_player("alice", 2).unwrap();
        w.reveal("alice", &[3]).unwrap();
        reg.notify("alice").await;

        let first: serde_json::Value = serde_json::from_str(&text(rx.try_recv().unwrap())).unwrap();
        let second: serde_json::Value = serde_json::from_str(&text(rx.try_recv().unwrap())).unwrap();
        assert_eq!(first["player"]["vnum"], 1);
        assert_eq!(second["player"]["vnum"], 2);
        assert_eq!(second["rooms"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_ping_prunes_before_next_notify() {
        let reg = registry(world());
        let (tx1, rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let dead = reg.register(tx1, None).await;
        let live = reg.register(tx2, None).await;
        reg.subscribe(dead, "alice", MapMode::Full).await;
        reg.subscribe(live, "alice", MapMode::Full).await;
        drop(rx1); // writer task gone, as after a socket write error

        assert_eq!(reg.ping_all().await, 1);
        assert!(!reg.contains(dead).await);
        assert!(reg.contains(live).await);

        assert_eq!(reg.notify("alice").await, 1);
        let _ = text(rx2.try_recv().unwrap());
        assert_eq!(rx2.try_recv().unwrap(), Outbound::Ping);
        let _ = text(rx2.try_recv().unwrap());
    }

    #[tokio::test]
    async fn full_queue_is_removed_after_fanout() {
        let reg = registry(world());
        let (tx, _rx) = mpsc::channel(1);
        let id = reg.register(tx, None).await;
        assert!(reg.subscribe(id, "alice", MapMode::Full).await); // fills the queue
        assert_eq!(reg.notify("alice").await, 0);
        assert_eq!(reg.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_player_gets_location_unknown_push() {
        let reg = registry(world());
        let (tx, mut rx) = mpsc::channel(8);
        let id = reg.register(tx, None).await;
        assert!(reg.subscribe(id, "nobody", MapMode::Zone).await);
        let v: serde_json::Value = serde_json::from_str(&text(rx.try_recv().unwrap())).unwrap();
        assert!(v["player"].is_null());
        assert!(v["rooms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn poll_matches_push_and_reports_unknown() {
        let reg = registry(world());
        let (tx, mut rx) = mpsc::channel(8);
        let id = reg.register(tx, None).await;
        reg.subscribe(id, "alice", MapMode::Full).await;
        let pushed = text(rx.try_recv().unwrap());

        assert_eq!(reg.poll("Alice").await.unwrap().as_str(), &*pushed);
        assert!(matches!(
            reg.poll("nobody").await,
            Err(BuildError::UnknownPlayer(_))
        ));
    }

    #[tokio::test]
    async fn idle_poll_sessions_expire() {
        let reg = Registry::new(world(), Duration::ZERO);
        reg.poll("bob").await.unwrap();
        assert_eq!(reg.session_count().await, 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.ping_all().await;
        assert_eq!(reg.session_count().await, 0);
    }
}
