use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub type Vnum = i64;
pub type ZoneId = i64;

/// Rooms keyed by vnum. Ordered so every walk over a set is deterministic.
pub type RoomSet = BTreeMap<Vnum, Arc<Room>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const ORIGIN: Coord = Coord { x: 0, y: 0, z: 0 };

    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn step(self, dir: Direction) -> Coord {
        let (dx, dy, dz) = dir.offset();
        Coord {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

/// Exit directions. Declaration order is the fixed traversal order for layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Unit offset; screen convention, so north is -y.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Direction::North => (0, -1, 0),
            Direction::South => (0, 1, 0),
            Direction::East => (1, 0, 0),
            Direction::West => (-1, 0, 0),
            Direction::Up => (0, 0, 1),
            Direction::Down => (0, 0, -1),
        }
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    /// Full names and the usual single-letter aliases.
    pub fn parse(s: &str) -> Option<Direction> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Some(Direction::North),
            "south" | "s" => Some(Direction::South),
            "east" | "e" => Some(Direction::East),
            "west" | "w" => Some(Direction::West),
            "up" | "u" => Some(Direction::Up),
            "down" | "d" => Some(Direction::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorState {
    Open,
    Closed,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exit {
    pub direction: Direction,
    pub target: Vnum,
    pub door: Option<DoorState>,
    /// Secret exits only show up for players that can see hidden things.
    pub hidden: bool,
}

impl Exit {
    pub fn new(direction: Direction, target: Vnum) -> Self {
        Self {
            direction,
            target,
            door: None,
            hidden: false,
        }
    }

    pub fn visible_to(&self, sees_hidden: bool) -> bool {
        !self.hidden || sees_hidden
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub vnum: Vnum,
    pub name: String,
    pub sector: String,
    pub zone: ZoneId,
    pub exits: BTreeMap<Direction, Exit>,
    pub flags: BTreeSet<String>,
}

impl Room {
    pub fn new(vnum: Vnum, name: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            vnum,
            name: name.into(),
            sector: "inside".to_string(),
            zone,
            exits: BTreeMap::new(),
            flags: BTreeSet::new(),
        }
    }

    pub fn sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = sector.into();
        self
    }

    pub fn exit(mut self, direction: Direction, target: Vnum) -> Self {
        self.exits.insert(direction, Exit::new(direction, target));
        self
    }

    pub fn hidden_exit(mut self, direction: Direction, target: Vnum) -> Self {
        let mut e = Exit::new(direction, target);
        e.hidden = true;
        self.exits.insert(direction, e);
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    /// Exits in fixed direction order, filtered by visibility.
    pub fn visible_exits(&self, sees_hidden: bool) -> impl Iterator<Item = &Exit> + '_ {
        self.exits.values().filter(move |e| e.visible_to(sees_hidden))
    }
}

/// Per-player state the map reads at notify time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub name: String,
    pub current_room: Vnum,
    pub explored: BTreeSet<Vnum>,
    pub sees_hidden: bool,
}

/// What the map core needs from the game world. Implementations own all locking.
pub trait WorldView: Send + Sync {
    fn room(&self, vnum: Vnum) -> Option<Arc<Room>>;

    fn zone_name(&self, zone: ZoneId) -> Option<String>;

    /// Look a player up by name, case-insensitively.
    fn player(&self, name: &str) -> Option<PlayerView>;
}

#[derive(Debug)]
pub enum WorldError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
    UnknownPlayer(String),
    UnknownRoom(Vnum),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::Io(e) => write!(f, "read world file: {e}"),
            WorldError::Yaml(e) => write!(f, "parse world yaml: {e}"),
            WorldError::Invalid(s) => write!(f, "invalid world: {s}"),
            WorldError::UnknownPlayer(p) => write!(f, "unknown player: {p}"),
            WorldError::UnknownRoom(v) => write!(f, "unknown room: {v}"),
        }
    }
}

impl std::error::Error for WorldError {}

/// In-memory world: a room table, zone names and player state behind locks.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    rooms: RwLock<HashMap<Vnum, Arc<Room>>>,
    zones: RwLock<HashMap<ZoneId, String>>,
    players: RwLock<HashMap<String, PlayerView>>, // name_lc -> view
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, WorldError> {
        let s = std::fs::read_to_string(path).map_err(WorldError::Io)?;
        Self::from_yaml_str(&s)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, WorldError> {
        let f = serde_yaml::from_str::<WorldFile>(s).map_err(WorldError::Yaml)?;
        let w = Self::new();

        for z in f.zones {
            w.insert_zone(z.id, z.name);
        }

        for r in f.rooms {
            let mut room = Room::new(r.vnum, r.name, r.zone);
            if let Some(sector) = r.sector {
                room.sector = sector.trim().to_ascii_lowercase();
            }
            room.flags = r
                .flags
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            for e in r.exits.unwrap_or_default() {
                let Some(direction) = Direction::parse(&e.dir) else {
                    warn!(vnum = r.vnum, dir = %e.dir, "skipping exit with unknown direction");
                    continue;
                };
                room.exits.insert(
                    direction,
                    Exit {
                        direction,
                        target: e.to,
                        door: e.door,
                        hidden: e.hidden.unwrap_or(false),
                    },
                );
            }
            if w.rooms.read().contains_key(&room.vnum) {
                return Err(WorldError::Invalid(format!("duplicate room vnum {}", room.vnum)));
            }
            w.insert_room(room);
        }

        for p in f.players {
            if !w.rooms.read().contains_key(&p.room) {
                return Err(WorldError::Invalid(format!(
                    "player {} starts in unknown room {}",
                    p.name, p.room
                )));
            }
            let mut explored: BTreeSet<Vnum> = p.explored.unwrap_or_default().into_iter().collect();
            explored.insert(p.room);
            w.upsert_player(PlayerView {
                name: p.name,
                current_room: p.room,
                explored,
                sees_hidden: p.sees_hidden.unwrap_or(false),
            });
        }

        Ok(w)
    }

    pub fn insert_zone(&self, id: ZoneId, name: impl Into<String>) {
        self.zones.write().insert(id, name.into());
    }

    pub fn insert_room(&self, room: Room) {
        self.rooms.write().insert(room.vnum, Arc::new(room));
    }

    pub fn upsert_player(&self, view: PlayerView) {
        let k = view.name.trim().to_ascii_lowercase();
        self.players.write().insert(k, view);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn player_names(&self) -> Vec<String> {
        let mut v = self
            .players
            .read()
            .values()
            .map(|p| p.name.clone())
            .collect::<Vec<_>>();
        v.sort();
        v
    }

    /// Put a player in `room` and mark it explored.
    pub fn move_player(&self, name: &str, room: Vnum) -> Result<(), WorldError> {
        if !self.rooms.read().contains_key(&room) {
            return Err(WorldError::UnknownRoom(room));
        }
        let k = name.trim().to_ascii_lowercase();
        let mut players = self.players.write();
        let p = players
            .get_mut(&k)
            .ok_or_else(|| WorldError::UnknownPlayer(name.to_string()))?;
        p.current_room = room;
        p.explored.insert(room);
        Ok(())
    }

    /// Mark rooms explored. Returns how many were new.
    pub fn reveal(&self, name: &str, rooms: &[Vnum]) -> Result<usize, WorldError> {
        {
            let table = self.rooms.read();
            if let Some(v) = rooms.iter().find(|v| !table.contains_key(*v)) {
                return Err(WorldError::UnknownRoom(*v));
            }
        }
        let k = name.trim().to_ascii_lowercase();
        let mut players = self.players.write();
        let p = players
            .get_mut(&k)
            .ok_or_else(|| WorldError::UnknownPlayer(name.to_string()))?;
        Ok(rooms.iter().filter(|v| p.explored.insert(**v)).count())
    }
}

impl WorldView for MemoryWorld {
    fn room(&self, vnum: Vnum) -> Option<Arc<Room>> {
        self.rooms.read().get(&vnum).cloned()
    }

    fn zone_name(&self, zone: ZoneId) -> Option<String> {
        self.zones.read().get(&zone).cloned()
    }

    fn player(&self, name: &str) -> Option<PlayerView> {
        let k = name.trim().to_ascii_lowercase();
        if k.is_empty() {
            return None;
        }
        self.players.read().get(&k).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct WorldFile {
    #[serde(default)]
    zones: Vec<ZoneEntry>,
    rooms: Vec<RoomEntry>,
    #[serde(default)]
    players: Vec<PlayerEntry>,
}

#[derive(Debug, Deserialize)]
struct ZoneEntry {
    id: ZoneId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RoomEntry {
    vnum: Vnum,
    name: String,
    zone: ZoneId,
    sector: Option<String>,
    flags: Option<Vec<String>>,
    exits: Option<Vec<ExitEntry>>,
}

#[derive(Debug, Deserialize)]
struct ExitEntry {
    dir: String,
    to: Vnum,
    door: Option<DoorState>,
    hidden: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PlayerEntry {
    name: String,
    room: Vnum,
    explored: Option<Vec<Vnum>>,
    sees_hidden: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"
zones:
  - id: 30
    name: Midgaard
rooms:
  - vnum: 3001
    name: Temple
    zone: 30
    sector: Inside
    flags: [temple, " "]
    exits:
      - { dir: n, to: 3002 }
      - { dir: sideways, to: 1 }
  - vnum: 3002
    name: Square
    zone: 30
    sector: city
    exits:
      - { dir: south, to: 3001, door: closed }
      - { dir: down, to: 3003, hidden: true }
  - vnum: 3003
    name: Sewer
    zone: 31
players:
  - name: Alice
    room: 3001
"#;

    #[test]
    fn loads_yaml_world() {
        let w = MemoryWorld::from_yaml_str(WORLD).unwrap();
        assert_eq!(w.room_count(), 3);
        assert_eq!(w.zone_name(30).as_deref(), Some("Midgaard"));

        let temple = w.room(3001).unwrap();
        assert_eq!(temple.sector, "inside");
        assert_eq!(temple.flags.iter().collect::<Vec<_>>(), vec!["temple"]);
        assert_eq!(temple.exits.len(), 1);
        assert_eq!(temple.exits[&Direction::North].target, 3002);

        let square = w.room(3002).unwrap();
        assert_eq!(square.exits[&Direction::South].door, Some(DoorState::Closed));
        assert!(square.exits[&Direction::Down].hidden);
        assert_eq!(square.visible_exits(false).count(), 1);
        assert_eq!(square.visible_exits(true).count(), 2);

        let alice = w.player("ALICE").unwrap();
        assert_eq!(alice.current_room, 3001);
        assert!(alice.explored.contains(&3001));
    }

    #[test]
    fn rejects_player_in_missing_room() {
        let err = MemoryWorld::from_yaml_str(
            "rooms: [{vnum: 1, name: a, zone: 1}]\nplayers: [{name: bob, room: 2}]\n",
        )
        .unwrap_err();
        assert!(matches!(err, WorldError::Invalid(_)));
    }

    #[test]
    fn move_and_reveal_update_explored() {
        let w = MemoryWorld::from_yaml_str(WORLD).unwrap();
        w.move_player("alice", 3002).unwrap();
        assert_eq!(w.player("alice").unwrap().current_room, 3002);

        assert_eq!(w.reveal("Alice", &[3002, 3003]).unwrap(), 1);
        assert!(matches!(
            w.reveal("alice", &[9999]),
            Err(WorldError::UnknownRoom(9999))
        ));
        assert!(matches!(
            w.move_player("nobody", 3001),
            Err(WorldError::UnknownPlayer(_))
        ));
    }

    #[test]
    fn directions_reverse_and_offsets_cancel() {
        for d in Direction::ALL {
            assert_eq!(d.reverse().reverse(), d);
            assert_eq!(Coord::ORIGIN.step(d).step(d.reverse()), Coord::ORIGIN);
            assert_eq!(Direction::parse(d.as_str()), Some(d));
        }
    }
}
