use chrono::{DateTime, Utc};

/// How much of a sector we have actually seen.
///
/// The level only ever moves towards `Holo`; a density scan never downgrades
/// a sector we have already visited.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[repr(i16)]
pub enum Explored {
    #[default]
    No = 0,
    Calc = 1,
    Density = 2,
    Holo = 3,
}

/// The three commodities every port trades, in the order the game prints
/// them.
pub const COMMODITIES: [&str; 3] = ["Fuel Ore", "Organics", "Equipment"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Port {
    pub name: String,
    pub class_index: i16,
    /// Whether the port is buying (true) or selling (false) each commodity,
    /// indexed in `COMMODITIES` order.
    pub buying: [bool; 3],
    pub amounts: [i64; 3],
    pub percents: [i64; 3],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trader {
    pub name: String,
    pub ship_name: String,
    pub ship_type: String,
    pub figs: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ship {
    pub name: String,
    pub owner: String,
    pub ship_type: String,
    pub figs: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Planet {
    pub name: String,
}

pub const MAX_WARPS: usize = 6;

/// Everything we know about one sector of the game universe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sector {
    pub number: i64,
    pub nav_haz: i64,
    pub constellation: String,
    pub beacon: String,
    pub warps: Vec<i64>,
    pub port: Option<Port>,
    pub traders: Vec<Trader>,
    pub ships: Vec<Ship>,
    pub planets: Vec<Planet>,
    pub density: i64,
    pub anomaly: bool,
    pub explored: Explored,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Sector {
    #[must_use]
    pub fn new(number: i64) -> Self {
        Self {
            number,
            density: -1,
            ..Self::default()
        }
    }

    /// Records an outbound warp. Duplicates are ignored and the list never
    /// grows past the game's six-warp maximum.
    pub fn add_warp(&mut self, target: i64) {
        if target > 0 && self.warps.len() < MAX_WARPS && !self.warps.contains(&target) {
            self.warps.push(target);
        }
    }

    /// Raises the explored level, never lowering it.
    pub fn mark_explored(&mut self, level: Explored) {
        self.explored = self.explored.max(level);
    }
}

/// The player's own scalar state, updated field-wise as the game reveals it.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct PlayerStats {
    pub player_name: String,
    pub current_sector: i64,
    pub turns: i64,
    pub credits: i64,
    pub fighters: i64,
    pub shields: i64,
    pub total_holds: i64,
    pub ore_holds: i64,
    pub org_holds: i64,
    pub equ_holds: i64,
    pub col_holds: i64,
    pub empty_holds: i64,
    pub photons: i64,
    pub armids: i64,
    pub limpets: i64,
    pub gen_torps: i64,
    pub cloaks: i64,
    pub beacons: i64,
    pub atomics: i64,
    pub corbomite: i64,
    pub eprobes: i64,
    pub mine_disr: i64,
    pub alignment: i64,
    pub experience: i64,
    pub corp: i64,
    pub ship_number: i64,
    pub ship_class: String,
    pub psychic_probe: bool,
    pub planet_scanner: bool,
    pub scan_type: String,
}

#[cfg(test)]
mod test {
    use super::{Explored, Sector};

    #[test]
    fn warps_are_bounded_and_unique() {
        let mut sector = Sector::new(1);
        for target in [2, 3, 3, 4, 5, 6, 7, 8, 9] {
            sector.add_warp(target);
        }

        assert_eq!(sector.warps, vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn negative_warps_are_rejected() {
        let mut sector = Sector::new(1);
        sector.add_warp(0);
        sector.add_warp(-4);

        assert!(sector.warps.is_empty());
    }

    #[test]
    fn explored_is_monotone() {
        let mut sector = Sector::new(1);
        sector.mark_explored(Explored::Holo);
        sector.mark_explored(Explored::Density);

        assert_eq!(sector.explored, Explored::Holo);
    }
}
