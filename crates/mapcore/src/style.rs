use crate::world::{Room, ZoneId};

/// Zone colours, handed out by first-seen order.
pub const ZONE_PALETTE: [&str; 12] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac", "#86bcb6", "#d37295",
];

/// Stable zone -> colour assignment for one player's map session.
///
/// Zones keep their colour once seen, so colours do not shuffle as the player
/// discovers new zones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneColors {
    seen: Vec<ZoneId>,
}

impl ZoneColors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(&mut self, zone: ZoneId) -> &'static str {
        let i = match self.seen.iter().position(|z| *z == zone) {
            Some(i) => i,
            None => {
                self.seen.push(zone);
                self.seen.len() - 1
            }
        };
        ZONE_PALETTE[i % ZONE_PALETTE.len()]
    }
}

// sector -> (symbol, icon)
const SECTORS: &[(&str, &str, &str)] = &[
    ("inside", "#", "building"),
    ("city", "+", "city"),
    ("field", ".", "grass"),
    ("forest", "f", "tree"),
    ("hills", "h", "hill"),
    ("mountain", "^", "mountain"),
    ("water_swim", "~", "water"),
    ("water_noswim", "≈", "deep-water"),
    ("underwater", "u", "bubbles"),
    ("air", "'", "cloud"),
    ("desert", ":", "sun"),
    ("swamp", "&", "reed"),
    ("road", "=", "road"),
    ("cave", "o", "cave"),
];

// Flags that override the sector icon, highest priority first.
const FLAG_ICONS: &[(&str, &str, &str)] = &[
    ("death", "X", "skull"),
    ("shop", "$", "shop"),
    ("bank", "B", "bank"),
    ("temple", "T", "temple"),
    ("inn", "I", "bed"),
];

/// Map symbol and icon name for a room.
pub fn room_glyph(room: &Room) -> (&'static str, &'static str) {
    for (flag, symbol, icon) in FLAG_ICONS {
        if room.flags.contains(*flag) {
            return (*symbol, *icon);
        }
    }
    SECTORS
        .iter()
        .find(|(s, _, _)| s.eq_ignore_ascii_case(&room.sector))
        .map(|(_, symbol, icon)| (*symbol, *icon))
        .unwrap_or(("?", "unknown"))
}
