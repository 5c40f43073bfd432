//! `mapcore`: the pure half of the live map service.
//!
//! - `world`: read-only room/exit/zone model, the `WorldView` collaborator trait and an
//!   in-memory implementation loadable from YAML,
//! - `layout`: BFS coordinate assignment, shortest path, frontier,
//! - `style`: sector symbols/icons and the zone colour palette,
//! - `payload`: the `map_data` wire document.
//!
//! Nothing here does network IO or awaits.

pub mod layout;
pub mod payload;
pub mod style;
pub mod world;

pub use layout::{Layout, assign_coordinates, compute_frontier, shortest_path};
pub use payload::{BuildError, MapMode, MapPayload, PathReply, build, build_path};
pub use style::ZoneColors;
pub use world::{
    Coord, Direction, DoorState, Exit, MemoryWorld, PlayerView, Room, RoomSet, Vnum, WorldError,
    WorldView, ZoneId,
};
