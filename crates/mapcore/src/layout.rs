//! Graph layout over a room set.
//!
//! Rooms only ever connect through exits whose target is also in the supplied set,
//! so callers decide what is "known" (usually the player's explored rooms) by what
//! they pass in. Exits to rooms outside the set are ignored here.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::world::{Coord, Direction, RoomSet, Vnum};

/// Gap in x between the bounding boxes of disconnected components.
pub const COMPONENT_GAP: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: Vnum,
    pub to: Vnum,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub coords: BTreeMap<Vnum, Coord>,
    /// Rooms in placement order (BFS order, component by component).
    pub order: Vec<Vnum>,
    /// Exits the BFS walked to place a room. Each satisfies `to == from + offset`.
    pub edges: Vec<Edge>,
    /// Room vnums per connected component, in placement order.
    pub components: Vec<Vec<Vnum>>,
}

impl Layout {
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Assign integer coordinates by BFS from `start` at the origin.
///
/// Rooms not reachable from `start` are laid out component by component, each seeded
/// at the lowest unplaced vnum and shifted so its minimum x sits `COMPONENT_GAP`
/// past the maximum x placed so far. An exit into a room an earlier component already
/// placed is not walked. Neither is an exit whose cell is already taken by another
/// room in the same component; that room gets placed via another exit or starts its
/// own component. Each room is placed once and no two rooms share a coordinate.
pub fn assign_coordinates(rooms: &RoomSet, start: Vnum, sees_hidden: bool) -> Layout {
    let mut out = Layout::default();
    let mut max_x: Option<i32> = None;

    let seeds = std::iter::once(start)
        .filter(|v| rooms.contains_key(v))
        .chain(rooms.keys().copied());

    for seed in seeds {
        if out.coords.contains_key(&seed) {
            continue;
        }
        let (placed, edges) = place_component(rooms, seed, sees_hidden, &out.coords);

        let dx = match max_x {
            None => 0,
            Some(mx) => {
                let min_x = placed.iter().map(|(_, c)| c.x).min().unwrap_or(0);
                mx + COMPONENT_GAP - min_x
            }
        };

        let mut members = Vec::with_capacity(placed.len());
        for (v, c) in placed {
            let c = Coord::new(c.x + dx, c.y, c.z);
            max_x = Some(max_x.map_or(c.x, |m| m.max(c.x)));
            out.coords.insert(v, c);
            out.order.push(v);
            members.push(v);
        }
        out.edges.extend(edges);
        out.components.push(members);
    }

    out
}

// BFS one component with `seed` at the origin, never entering rooms in `done`.
// Returns rooms in visit order.
fn place_component(
    rooms: &RoomSet,
    seed: Vnum,
    sees_hidden: bool,
    done: &BTreeMap<Vnum, Coord>,
) -> (Vec<(Vnum, Coord)>, Vec<Edge>) {
    let mut placed: Vec<(Vnum, Coord)> = vec![(seed, Coord::ORIGIN)];
    let mut at: HashMap<Vnum, Coord> = HashMap::from([(seed, Coord::ORIGIN)]);
    let mut taken: HashMap<Coord, Vnum> = HashMap::from([(Coord::ORIGIN, seed)]);
    let mut edges = Vec::new();
    let mut q = VecDeque::from([seed]);

    while let Some(v) = q.pop_front() {
        let Some(room) = rooms.get(&v) else {
            continue;
        };
        let here = at[&v];
        for exit in room.visible_exits(sees_hidden) {
            let to = exit.target;
            if at.contains_key(&to) || done.contains_key(&to) || !rooms.contains_key(&to) {
                continue;
            }
            let c = here.step(exit.direction);
            if taken.contains_key(&c) {
                continue;
            }
            at.insert(to, c);
            taken.insert(c, to);
            placed.push((to, c));
            edges.push(Edge {
                from: v,
                to,
                direction: exit.direction,
            });
            q.push_back(to);
        }
    }

    (placed, edges)
}

/// Unweighted shortest path through `rooms`, following visible exits only.
///
/// Returns `[start]` when `start == end`, and `[]` if either end is missing from the
/// set or `end` is unreachable.
pub fn shortest_path(rooms: &RoomSet, start: Vnum, end: Vnum, sees_hidden: bool) -> Vec<Vnum> {
    if !rooms.contains_key(&start) || !rooms.contains_key(&end) {
        return Vec::new();
    }
    if start == end {
        return vec![start];
    }

    let mut parent: HashMap<Vnum, Vnum> = HashMap::new();
    let mut q = VecDeque::from([start]);
    while let Some(v) = q.pop_front() {
        let Some(room) = rooms.get(&v) else {
            continue;
        };
        for exit in room.visible_exits(sees_hidden) {
            let to = exit.target;
            if to == start || parent.contains_key(&to) || !rooms.contains_key(&to) {
                continue;
            }
            parent.insert(to, v);
            if to == end {
                let mut path = vec![end];
                let mut cur = end;
                while let Some(p) = parent.get(&cur) {
                    path.push(*p);
                    cur = *p;
                }
                path.reverse();
                return path;
            }
            q.push_back(to);
        }
    }

    Vec::new()
}

/// Cells next to explored rooms that lead somewhere unexplored.
///
/// For each laid-out explored room, each visible exit whose target is not in
/// `explored` yields `coord + offset`. Targets for which `exists` is false (dangling
/// exits) are skipped, as are cells already occupied by a laid-out room.
pub fn compute_frontier(
    coords: &BTreeMap<Vnum, Coord>,
    rooms: &RoomSet,
    explored: &BTreeSet<Vnum>,
    sees_hidden: bool,
    exists: impl Fn(Vnum) -> bool,
) -> BTreeSet<Coord> {
    let occupied: BTreeSet<Coord> = coords.values().copied().collect();
    let mut out = BTreeSet::new();

    for (v, c) in coords {
        if !explored.contains(v) {
            continue;
        }
        let Some(room) = rooms.get(v) else {
            continue;
        };
        for exit in room.visible_exits(sees_hidden) {
            if explored.contains(&exit.target) || !exists(exit.target) {
                continue;
            }
            let cell = c.step(exit.direction);
            if !occupied.contains(&cell) {
                out.insert(cell);
            }
        }
    }

    out
}
