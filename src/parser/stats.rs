use crate::models::PlayerStats;

use super::sector::parse_number;

/// Applies one line of the game's info display to the stats record,
/// returning whether anything changed.
///
/// Updates are field-wise: a line we don't recognise, or a field we can't
/// parse, leaves the prior value in place.
pub fn apply_line(stats: &mut PlayerStats, line: &str) -> bool {
    let Some((key, value)) = line.split_once(':') else {
        return false;
    };

    let key = key.trim();
    let value = value.trim();

    match key {
        "Trader Name" => assign_text(&mut stats.player_name, value),
        "Rank and Exp" => apply_rank_and_exp(stats, value),
        "Ship Info" => assign_text(&mut stats.ship_class, value),
        "Ship Number" => assign_number(&mut stats.ship_number, value),
        "Turns left" => {
            if value.starts_with("Unlimited") {
                assign(&mut stats.turns, Some(-1))
            } else {
                assign_number(&mut stats.turns, value)
            }
        }
        "Current Sector" => assign_number(&mut stats.current_sector, value),
        "Trade Credits" | "Credits" => assign_number(&mut stats.credits, value),
        "Fighters" => assign_number(&mut stats.fighters, value),
        "Shield Points" | "Shields" => assign_number(&mut stats.shields, value),
        "Total Holds" => apply_holds(stats, value),
        "Ether Probes" => assign_number(&mut stats.eprobes, value),
        "Photon Missiles" => assign_number(&mut stats.photons, value),
        "Armid Mines" => assign_number(&mut stats.armids, value),
        "Limpet Mines" => assign_number(&mut stats.limpets, value),
        "Genesis Torpedoes" => assign_number(&mut stats.gen_torps, value),
        "Cloaking Devices" => assign_number(&mut stats.cloaks, value),
        "Beacons" => assign_number(&mut stats.beacons, value),
        "Atomic Detonators" => assign_number(&mut stats.atomics, value),
        "Corbomite Devices" => assign_number(&mut stats.corbomite, value),
        "Mine Disruptors" => assign_number(&mut stats.mine_disr, value),
        "Alignment" => assign_number(&mut stats.alignment, value),
        "Experience Points" | "Experience" => assign_number(&mut stats.experience, value),
        "Corp" => assign_number(&mut stats.corp, value.trim_start_matches(['#', ' '])),
        "Psychic Probe" => assign_flag(&mut stats.psychic_probe, value),
        "Planet Scanner" => assign_flag(&mut stats.planet_scanner, value),
        "LongRange Scan" => assign_text(&mut stats.scan_type, value),
        _ => false,
    }
}

fn assign<T: PartialEq>(slot: &mut T, value: Option<T>) -> bool {
    match value {
        Some(value) if *slot != value => {
            *slot = value;
            true
        }
        _ => false,
    }
}

fn assign_number(slot: &mut i64, value: &str) -> bool {
    assign(slot, parse_number(value.split_whitespace().next().unwrap_or("")))
}

fn assign_text(slot: &mut String, value: &str) -> bool {
    if value.is_empty() || slot == value {
        return false;
    }

    *slot = value.to_string();
    true
}

fn assign_flag(slot: &mut bool, value: &str) -> bool {
    let parsed = match value.split_whitespace().next() {
        Some("Yes") => Some(true),
        Some("No") => Some(false),
        _ => None,
    };

    assign(slot, parsed)
}

/// `5 points, Alignment=0 Tolerant`
fn apply_rank_and_exp(stats: &mut PlayerStats, value: &str) -> bool {
    let mut changed = false;

    if let Some((points, _)) = value.split_once(" point") {
        changed |= assign(&mut stats.experience, parse_number(points));
    }

    if let Some(alignment) = value
        .split_once("Alignment=")
        .and_then(|(_, rest)| rest.split_whitespace().next())
    {
        changed |= assign(&mut stats.alignment, parse_number(alignment));
    }

    changed
}

/// `40 - Fuel Ore=5 Organics=0 Equipment=10 Colonists=0 Empty=25`
fn apply_holds(stats: &mut PlayerStats, value: &str) -> bool {
    let mut changed = false;

    let (total, rest) = value.split_once('-').unwrap_or((value, ""));
    changed |= assign(&mut stats.total_holds, parse_number(total));

    for (label, slot) in [
        ("Fuel Ore=", &mut stats.ore_holds),
        ("Organics=", &mut stats.org_holds),
        ("Equipment=", &mut stats.equ_holds),
        ("Colonists=", &mut stats.col_holds),
        ("Empty=", &mut stats.empty_holds),
    ] {
        if let Some(field) = rest
            .split_once(label)
            .and_then(|(_, tail)| tail.split_whitespace().next())
        {
            changed |= assign(slot, parse_number(field));
        }
    }

    changed
}

#[cfg(test)]
mod test {
    use crate::models::PlayerStats;

    use super::apply_line;

    #[test]
    fn info_display_updates_fields() {
        let mut stats = PlayerStats::default();

        for line in [
            "Trader Name    : Civilian phil",
            "Rank and Exp   : 5 points, Alignment=0 Tolerant",
            "Ship Info      : Sverdlov Merchant Cruiser",
            "Turns left     : 1000",
            "Total Holds    : 40 - Fuel Ore=5 Organics=0 Equipment=10 Colonists=0 Empty=25",
            "Fighters       : 2,500",
            "Ether Probes   : 10",
            "Trade Credits  : 10,000",
            "Psychic Probe  : Yes",
            "Planet Scanner : No",
            "LongRange Scan : Holographic Scanner",
        ] {
            apply_line(&mut stats, line);
        }

        assert_eq!(stats.player_name, "Civilian phil");
        assert_eq!(stats.experience, 5);
        assert_eq!(stats.alignment, 0);
        assert_eq!(stats.ship_class, "Sverdlov Merchant Cruiser");
        assert_eq!(stats.turns, 1000);
        assert_eq!(stats.total_holds, 40);
        assert_eq!(stats.ore_holds, 5);
        assert_eq!(stats.equ_holds, 10);
        assert_eq!(stats.empty_holds, 25);
        assert_eq!(stats.fighters, 2500);
        assert_eq!(stats.eprobes, 10);
        assert_eq!(stats.credits, 10_000);
        assert!(stats.psychic_probe);
        assert!(!stats.planet_scanner);
        assert_eq!(stats.scan_type, "Holographic Scanner");
    }

    #[test]
    fn malformed_fields_keep_prior_values() {
        let mut stats = PlayerStats {
            credits: 500,
            ..PlayerStats::default()
        };

        assert!(!apply_line(&mut stats, "Trade Credits  : lots"));
        assert_eq!(stats.credits, 500);
    }

    #[test]
    fn updates_are_idempotent() {
        let mut stats = PlayerStats::default();

        assert!(apply_line(&mut stats, "Fighters       : 300"));
        assert!(!apply_line(&mut stats, "Fighters       : 300"));
        assert_eq!(stats.fighters, 300);
    }

    #[test]
    fn unknown_lines_are_ignored() {
        let mut stats = PlayerStats::default();
        assert!(!apply_line(&mut stats, "What do you want to do?"));
        assert_eq!(stats, PlayerStats::default());
    }

    #[test]
    fn unlimited_turns_are_flagged() {
        let mut stats = PlayerStats::default();
        apply_line(&mut stats, "Turns left     : Unlimited");
        assert_eq!(stats.turns, -1);
    }
}
