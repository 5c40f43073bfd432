//! The `map_data` wire document.
//!
//! Built fresh on every call from a world snapshot; nothing is diffed or cached
//! except the caller-owned `ZoneColors`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::layout::{Layout, assign_coordinates, compute_frontier, shortest_path};
use crate::style::{ZoneColors, room_glyph};
use crate::world::{Coord, PlayerView, RoomSet, Vnum, WorldView, ZoneId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapMode {
    /// Every explored room.
    #[default]
    Full,
    /// Explored rooms in the player's current zone only.
    Zone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    UnknownPlayer(String),
    /// World data broke an assumption the map relies on.
    Invariant(String),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::UnknownPlayer(p) => write!(f, "unknown player: {p}"),
            BuildError::Invariant(s) => write!(f, "map invariant violated: {s}"),
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub vnum: Vnum,
    pub name: String,
    pub sector: String,
    pub zone: ZoneId,
    pub zone_name: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub symbol: &'static str,
    pub icon: &'static str,
    pub exits: Vec<&'static str>,
    pub one_way_exits: Vec<&'static str>,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneView {
    pub id: ZoneId,
    pub name: String,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossZoneExit {
    pub from_vnum: Vnum,
    pub to_vnum: Vnum,
    pub from_zone: ZoneId,
    pub to_zone: ZoneId,
    pub direction: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerMarker {
    pub name: String,
    pub vnum: Vnum,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub rooms: Vec<RoomView>,
    pub frontier: Vec<Coord>,
    pub zones: Vec<ZoneView>,
    pub cross_zone_exits: Vec<CrossZoneExit>,
    pub player: Option<PlayerMarker>,
}

impl MapPayload {
    pub const KIND: &'static str = "map_data";

    /// Player exists but their position cannot be placed on their map.
    pub fn location_unknown() -> Self {
        Self {
            kind: Self::KIND,
            rooms: Vec::new(),
            frontier: Vec::new(),
            zones: Vec::new(),
            cross_zone_exits: Vec::new(),
            player: None,
        }
    }

    pub fn to_json(&self) -> Result<String, BuildError> {
        serde_json::to_string(self).map_err(|e| BuildError::Invariant(format!("encode payload: {e}")))
    }
}

/// Build the map for `player` as seen through `world`.
pub fn build(
    world: &dyn WorldView,
    player: &str,
    mode: MapMode,
    colors: &mut ZoneColors,
) -> Result<MapPayload, BuildError> {
    let view = world
        .player(player)
        .ok_or_else(|| BuildError::UnknownPlayer(player.to_string()))?;
    build_for(world, &view, mode, colors)
}

pub fn build_for(
    world: &dyn WorldView,
    view: &PlayerView,
    mode: MapMode,
    colors: &mut ZoneColors,
) -> Result<MapPayload, BuildError> {
    let Some(current) = world.room(view.current_room) else {
        return Ok(MapPayload::location_unknown());
    };
    let zone_filter = match mode {
        MapMode::Full => None,
        MapMode::Zone => Some(current.zone),
    };

    let explored = explored_rooms(world, view)?;
    let known: RoomSet = explored
        .iter()
        .filter(|(_, r)| zone_filter.map_or(true, |z| r.zone == z))
        .map(|(v, r)| (*v, r.clone()))
        .collect();
    if !known.contains_key(&view.current_room) {
        return Ok(MapPayload::location_unknown());
    }

    let layout = assign_coordinates(&known, view.current_room, view.sees_hidden);
    check_layout(&layout, &known)?;
    let frontier = compute_frontier(
        &layout.coords,
        &known,
        &view.explored,
        view.sees_hidden,
        |v| world.room(v).is_some(),
    );

    let mut zones = ZoneTable::default();
    let mut cross = Vec::new();
    let mut rooms = Vec::with_capacity(layout.order.len());
    for v in &layout.order {
        let room = &known[v];
        let c = layout.coords[v];
        let zone_name = zones.note(world, room.zone);

        let mut exits = Vec::new();
        let mut one_way_exits = Vec::new();
        for exit in room.visible_exits(view.sees_hidden) {
            // Destination lookup falls back to the full world for rooms outside the set.
            let Some(dest) = known
                .get(&exit.target)
                .cloned()
                .or_else(|| world.room(exit.target))
            else {
                continue;
            };
            exits.push(exit.direction.as_str());
            let reciprocal = dest
                .exits
                .get(&exit.direction.reverse())
                .is_some_and(|back| back.target == room.vnum);
            if !reciprocal {
                one_way_exits.push(exit.direction.as_str());
            }
            if dest.zone != room.zone && explored.contains_key(&dest.vnum) {
                zones.note(world, dest.zone);
                cross.push(CrossZoneExit {
                    from_vnum: room.vnum,
                    to_vnum: dest.vnum,
                    from_zone: room.zone,
                    to_zone: dest.zone,
                    direction: exit.direction.as_str(),
                });
            }
        }

        let (symbol, icon) = room_glyph(room);
        rooms.push(RoomView {
            vnum: room.vnum,
            name: room.name.clone(),
            sector: room.sector.clone(),
            zone: room.zone,
            zone_name,
            x: c.x,
            y: c.y,
            z: c.z,
            symbol,
            icon,
            exits,
            one_way_exits,
            flags: room.flags.iter().cloned().collect(),
        });
    }

    let zones = zones
        .order
        .into_iter()
        .map(|(id, name)| ZoneView {
            id,
            name,
            color: colors.color(id),
        })
        .collect();

    let here = layout.coords[&view.current_room];
    Ok(MapPayload {
        kind: MapPayload::KIND,
        rooms,
        frontier: frontier.into_iter().collect(),
        zones,
        cross_zone_exits: cross,
        player: Some(PlayerMarker {
            name: view.name.clone(),
            vnum: view.current_room,
            x: here.x,
            y: here.y,
            z: here.z,
        }),
    })
}

// Zones in first-seen order for one build.
#[derive(Default)]
struct ZoneTable {
    order: Vec<(ZoneId, String)>,
}

impl ZoneTable {
    fn note(&mut self, world: &dyn WorldView, zone: ZoneId) -> String {
        if let Some((_, name)) = self.order.iter().find(|(z, _)| *z == zone) {
            return name.clone();
        }
        let name = world.zone_name(zone).unwrap_or_else(|| format!("zone {zone}"));
        self.order.push((zone, name.clone()));
        name
    }
}

// Explored rooms that still exist in the world table.
// Every known room placed exactly once, on its own cell.
fn check_layout(layout: &Layout, known: &RoomSet) -> Result<(), BuildError> {
    if layout.order.len() != known.len() || layout.coords.len() != known.len() {
        return Err(BuildError::Invariant(format!(
            "laid out {} rooms ({} placements) for {} known",
            layout.coords.len(),
            layout.order.len(),
            known.len()
        )));
    }
    let cells: BTreeSet<Coord> = layout.coords.values().copied().collect();
    if cells.len() != layout.coords.len() {
        return Err(BuildError::Invariant(format!(
            "{} rooms share {} cells",
            layout.coords.len(),
            cells.len()
        )));
    }
    Ok(())
}

fn explored_rooms(world: &dyn WorldView, view: &PlayerView) -> Result<RoomSet, BuildError> {
    let mut out = RoomSet::new();
    for v in &view.explored {
        let Some(room) = world.room(*v) else {
            continue;
        };
        if room.vnum != *v {
            return Err(BuildError::Invariant(format!(
                "room table maps vnum {v} to room {}",
                room.vnum
            )));
        }
        out.insert(*v, room);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathReply {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub player: String,
    pub from: Vnum,
    pub to: Vnum,
    pub path: Vec<Vnum>,
}

/// Shortest known route from the player's current room to `to`, through explored
/// rooms only. An empty path means no known route.
pub fn build_path(world: &dyn WorldView, player: &str, to: Vnum) -> Result<PathReply, BuildError> {
    let view = world
        .player(player)
        .ok_or_else(|| BuildError::UnknownPlayer(player.to_string()))?;
    let known = explored_rooms(world, &view)?;
    Ok(PathReply {
        kind: "path",
        player: view.name.clone(),
        from: view.current_room,
        to,
        path: shortest_path(&known, view.current_room, to, view.sees_hidden),
    })
}
