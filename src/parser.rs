pub mod sector;
pub mod stats;

use tracing::trace;

use crate::models::{Explored, PlayerStats, Port, Sector, Ship, Trader};

/// Upper bound on the partial-line carry; a stream that never sends a
/// newline cannot grow it without bound.
const LINE_CARRY_MAX: usize = 1024;

/// Continuation lines within a sector display are indented under their
/// header.
const CONTINUATION_INDENT: &str = "        ";

/// State discovered by the parser that the session must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    /// A full sector display was assembled. `movement` is true when this was
    /// the player's own ship arriving, false for probe and passive updates.
    SectorComplete { sector: Sector, movement: bool },
    /// The command prompt showed the player in a different sector.
    CursorMoved(i64),
    /// A commerce report completed. `class_index` is negative when the
    /// report did not reveal the port class.
    PortUpdated { sector: i64, port: Port },
    /// One line of a relative density scan.
    DensityReading {
        sector: i64,
        density: i64,
        warp_count: i64,
        nav_haz: i64,
        anomaly: bool,
    },
    /// One hop of a plotted course.
    WarpLink { from: i64, to: i64 },
    /// The player-stat record changed.
    StatsUpdated(PlayerStats),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Display {
    #[default]
    None,
    Sector,
    Density,
    WarpLane,
    PortReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Traders,
    Ships,
    Planets,
}

/// Incremental parser over the ANSI-stripped game transcript.
///
/// Lines route through a small display-mode machine; prompts (which never
/// carry a newline) are recognised on the partial-line carry. Unknown lines
/// are never an error.
#[derive(Default)]
pub struct GameParser {
    line_carry: String,
    last_prompt: String,
    display: Display,
    current_sector: i64,
    building: Option<Sector>,
    list_kind: Option<ListKind>,
    pending_trader: Option<Trader>,
    pending_ship: Option<Ship>,
    probe_mode: bool,
    stats: PlayerStats,
    stats_dirty: bool,
    port_report: Option<(i64, Port, [bool; 3])>,
}

impl GameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The sector the player's ship is currently in (0 before the first
    /// prompt).
    #[must_use]
    pub fn current_sector(&self) -> i64 {
        self.current_sector
    }

    #[must_use]
    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// Feeds a chunk of ANSI-stripped transcript text.
    pub fn feed(&mut self, text: &str) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        self.line_carry.push_str(text);

        while let Some(pos) = self.line_carry.find('\n') {
            let line = self.line_carry[..pos].trim_end_matches('\r').to_string();
            self.line_carry.drain(..=pos);
            self.last_prompt.clear();
            self.process_line(&line, &mut events);
        }

        // the command prompt never terminates in a newline, so it has to be
        // recognised on the partial line
        if self.line_carry != self.last_prompt {
            if let Some(number) = sector::parse_command_prompt(&self.line_carry) {
                self.last_prompt.clone_from(&self.line_carry);
                self.on_prompt(number, &mut events);
            }
        }

        if self.line_carry.len() > LINE_CARRY_MAX {
            let drop = self.line_carry.len() - LINE_CARRY_MAX / 2;
            self.line_carry.drain(..drop);
            self.last_prompt.clear();
        }

        if self.stats_dirty {
            self.stats_dirty = false;
            events.push(ParserEvent::StatsUpdated(self.stats.clone()));
        }

        events
    }

    fn on_prompt(&mut self, number: i64, events: &mut Vec<ParserEvent>) {
        self.finalize_sector(events);
        self.display = Display::None;
        self.probe_mode = false;
        self.port_report = None;

        if number > 0 && number != self.current_sector {
            self.current_sector = number;
            self.stats.current_sector = number;
            events.push(ParserEvent::CursorMoved(number));
        }
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<ParserEvent>) {
        // a sector header opens a new display no matter what came before
        if let Some((number, constellation)) = sector::parse_sector_header(line) {
            self.finalize_sector(events);
            let mut building = Sector::new(number);
            building.constellation = constellation;
            self.building = Some(building);
            self.display = Display::Sector;
            self.list_kind = None;
            return;
        }

        match self.display {
            Display::Sector => {
                if self.process_sector_line(line, events) {
                    return;
                }
            }
            Display::Density => {
                if let Some((number, density, warp_count, nav_haz, anomaly)) =
                    sector::parse_density_line(line)
                {
                    events.push(ParserEvent::DensityReading {
                        sector: number,
                        density,
                        warp_count,
                        nav_haz,
                        anomaly,
                    });
                    return;
                }
            }
            Display::WarpLane => {
                if let Some(chain) = sector::parse_warp_chain(line) {
                    for hop in chain.windows(2) {
                        events.push(ParserEvent::WarpLink {
                            from: hop[0],
                            to: hop[1],
                        });
                    }
                    return;
                }
            }
            Display::PortReport => {
                if self.process_commerce_line(line, events) {
                    return;
                }
            }
            Display::None => {}
        }

        if line.contains("Relative Density Scan") {
            self.display = Display::Density;
            return;
        }

        if line.contains("The shortest path") && line.contains("from sector") {
            self.display = Display::WarpLane;
            return;
        }

        if let Some(rest) = line.strip_prefix("Commerce report for ") {
            let name = rest.split(':').next().unwrap_or(rest).trim();
            self.port_report = Some((
                self.current_sector,
                Port {
                    name: name.to_string(),
                    class_index: -1,
                    ..Port::default()
                },
                [false; 3],
            ));
            self.display = Display::PortReport;
            return;
        }

        if line.starts_with("Probe launched into Sector")
            || line.starts_with("Probe entering sector")
        {
            self.probe_mode = true;
            return;
        }

        if line.starts_with("Probe Self Destructs") {
            self.probe_mode = false;
            return;
        }

        if let Some(number) = sector::parse_command_prompt(line) {
            self.on_prompt(number, events);
            return;
        }

        if stats::apply_line(&mut self.stats, line) {
            self.stats_dirty = true;
            return;
        }

        trace!(line, "ignoring unrecognised line");
    }

    fn process_sector_line(&mut self, line: &str, events: &mut Vec<ParserEvent>) -> bool {
        let Some(building) = &mut self.building else {
            return false;
        };

        if line.trim().is_empty() {
            self.finalize_sector(events);
            return true;
        }

        if let Some(beacon) = line.strip_prefix("Beacon  :") {
            building.beacon = beacon.trim().to_string();
            return true;
        }

        if line.starts_with("Ports   :") {
            if let Some((name, class_index)) = sector::parse_port_header(line) {
                building.port = Some(Port {
                    name,
                    class_index,
                    ..Port::default()
                });
            }
            return true;
        }

        if line.starts_with("Planets :") {
            if let Some(name) = sector::parse_planet(line) {
                building.planets.push(crate::models::Planet { name });
            }
            self.list_kind = Some(ListKind::Planets);
            return true;
        }

        if line.starts_with("Traders :") {
            self.flush_pending();
            self.pending_trader = sector::parse_trader_head(line);
            self.list_kind = Some(ListKind::Traders);
            return true;
        }

        if line.starts_with("Ships   :") {
            self.flush_pending();
            self.pending_ship = sector::parse_ship_head(line);
            self.list_kind = Some(ListKind::Ships);
            return true;
        }

        if line.starts_with("NavHaz  :") {
            if let Some(nav_haz) = sector::parse_nav_haz(line) {
                building.nav_haz = nav_haz;
            }
            return true;
        }

        if line.starts_with("Fighters:") || line.starts_with("Mines   :") {
            self.list_kind = None;
            return true;
        }

        if let Some(warps) = sector::parse_warp_line(line) {
            for target in warps {
                building.add_warp(target);
            }
            self.finalize_sector(events);
            return true;
        }

        if line.starts_with(CONTINUATION_INDENT) {
            return self.process_continuation(line);
        }

        false
    }

    fn process_continuation(&mut self, line: &str) -> bool {
        match self.list_kind {
            Some(ListKind::Traders) => {
                if let Some((ship_name, ship_type)) = sector::parse_trader_ship(line) {
                    if let Some(mut trader) = self.pending_trader.take() {
                        trader.ship_name = ship_name;
                        trader.ship_type = ship_type;
                        if let Some(building) = &mut self.building {
                            building.traders.push(trader);
                        }
                    }
                } else if let Some(trader) = sector::parse_trader_head(line) {
                    self.flush_pending();
                    self.pending_trader = Some(trader);
                }
                true
            }
            Some(ListKind::Ships) => {
                if let Some(ship_type) = sector::parse_ship_type(line) {
                    if let Some(mut ship) = self.pending_ship.take() {
                        ship.ship_type = ship_type;
                        if let Some(building) = &mut self.building {
                            building.ships.push(ship);
                        }
                    }
                } else if let Some(ship) = sector::parse_ship_head(line) {
                    self.flush_pending();
                    self.pending_ship = Some(ship);
                }
                true
            }
            Some(ListKind::Planets) => {
                if let Some(name) = sector::parse_planet(line) {
                    if let Some(building) = &mut self.building {
                        building.planets.push(crate::models::Planet { name });
                    }
                }
                true
            }
            None => false,
        }
    }

    fn flush_pending(&mut self) {
        if let Some(building) = &mut self.building {
            if let Some(trader) = self.pending_trader.take() {
                building.traders.push(trader);
            }
            if let Some(ship) = self.pending_ship.take() {
                building.ships.push(ship);
            }
        } else {
            self.pending_trader = None;
            self.pending_ship = None;
        }
    }

    fn process_commerce_line(&mut self, line: &str, events: &mut Vec<ParserEvent>) -> bool {
        let Some((_, port, seen)) = &mut self.port_report else {
            return false;
        };

        if sector::parse_commerce_line(line).is_none() {
            // headers and separators within the report body
            return line.trim().is_empty()
                || line.contains("Items")
                || line.contains("-----");
        }

        if sector::apply_commerce_line(port, seen, line) {
            let (number, port, _) = self.port_report.take().expect("checked above");
            events.push(ParserEvent::PortUpdated {
                sector: number,
                port,
            });
            self.display = Display::None;
        }

        true
    }

    fn finalize_sector(&mut self, events: &mut Vec<ParserEvent>) {
        self.flush_pending();

        let Some(mut sector) = self.building.take() else {
            return;
        };

        sector.mark_explored(Explored::Holo);

        let movement = !self.probe_mode && sector.number != self.current_sector;
        if !self.probe_mode {
            self.current_sector = sector.number;
            self.stats.current_sector = sector.number;
        }

        events.push(ParserEvent::SectorComplete { sector, movement });
        self.display = Display::None;
        self.list_kind = None;
    }
}

#[cfg(test)]
mod test {
    use crate::models::Explored;

    use super::{GameParser, ParserEvent};

    const SECTOR_DISPLAY: &str = "Sector  : 242 in The Federation.\r\n\
        Beacon  : FedSpace, FedLaw Enforced\r\n\
        Ports   : Stargate Alpha I, Class 9 (Special)\r\n\
        Planets : (M) Terra\r\n\
        Traders : Civilian phil, w/ 30 ftrs,\r\n\
        \x20          in Star Stomper (Sverdlov Merchant Cruiser)\r\n\
        Ships   : Enterprise [Owned by] Kirk, w/ 10 ftrs,\r\n\
        \x20          (Federation Starship)\r\n\
        NavHaz  : 5% (Mines)\r\n\
        Warps to Sector(s) :  (240) - 241 - 243 - 244 - (500) - 572\r\n";

    #[test]
    fn full_sector_display() {
        let mut parser = GameParser::new();
        let events = parser.feed(SECTOR_DISPLAY);

        let [ParserEvent::SectorComplete { sector, movement }] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };

        assert!(*movement);
        assert_eq!(sector.number, 242);
        assert_eq!(sector.constellation, "The Federation");
        assert_eq!(sector.beacon, "FedSpace, FedLaw Enforced");
        assert_eq!(sector.nav_haz, 5);
        assert_eq!(sector.warps, vec![240, 241, 243, 244, 500, 572]);
        assert_eq!(sector.explored, Explored::Holo);

        let port = sector.port.as_ref().unwrap();
        assert_eq!(port.name, "Stargate Alpha I");
        assert_eq!(port.class_index, 9);

        assert_eq!(sector.planets.len(), 1);
        assert_eq!(sector.planets[0].name, "Terra");

        assert_eq!(sector.traders.len(), 1);
        assert_eq!(sector.traders[0].name, "Civilian phil");
        assert_eq!(sector.traders[0].ship_name, "Star Stomper");
        assert_eq!(sector.traders[0].ship_type, "Sverdlov Merchant Cruiser");
        assert_eq!(sector.traders[0].figs, 30);

        assert_eq!(sector.ships.len(), 1);
        assert_eq!(sector.ships[0].owner, "Kirk");
        assert_eq!(sector.ships[0].ship_type, "Federation Starship");

        assert_eq!(parser.current_sector(), 242);
    }

    #[test]
    fn sector_display_survives_chunk_fragmentation() {
        let mut whole = GameParser::new();
        let expected = whole.feed(SECTOR_DISPLAY);

        for size in [1, 3, 7, 16] {
            let mut parser = GameParser::new();
            let mut events = Vec::new();
            let bytes: Vec<char> = SECTOR_DISPLAY.chars().collect();
            for chunk in bytes.chunks(size) {
                events.extend(parser.feed(&chunk.iter().collect::<String>()));
            }

            assert_eq!(events, expected, "chunk size {size}");
        }
    }

    #[test]
    fn probe_updates_do_not_move_the_cursor() {
        let mut parser = GameParser::new();
        parser.feed("Command [TL=00:00:00]:[242] (?=Help)? : ");
        assert_eq!(parser.current_sector(), 242);

        let mut events = parser.feed("\r\nProbe entering sector : 17\r\n");
        events.extend(parser.feed(
            "Sector  : 17 in uncharted space.\r\nWarps to Sector(s) :  16 - 18\r\n",
        ));

        let sector_events: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ParserEvent::SectorComplete { .. }))
            .collect();
        assert_eq!(sector_events.len(), 1);
        let ParserEvent::SectorComplete { sector, movement } = sector_events[0] else {
            unreachable!();
        };
        assert_eq!(sector.number, 17);
        assert!(!movement);

        assert!(!events
            .iter()
            .any(|e| matches!(e, ParserEvent::CursorMoved(_))));
        assert_eq!(parser.current_sector(), 242);
    }

    #[test]
    fn probe_mode_ends_after_self_destruct() {
        let mut parser = GameParser::new();
        parser.feed("Probe entering sector : 17\r\nProbe Self Destructs\r\n");

        let events = parser.feed(
            "Sector  : 55 in uncharted space.\r\nWarps to Sector(s) :  54\r\n",
        );
        assert!(matches!(
            events.as_slice(),
            [ParserEvent::SectorComplete { movement: true, .. }]
        ));
    }

    #[test]
    fn command_prompt_moves_cursor() {
        let mut parser = GameParser::new();

        let events = parser.feed("Command [TL=00:00:00]:[242] (?=Help)? : ");
        assert_eq!(events, vec![ParserEvent::CursorMoved(242)]);

        // same prompt, more input buffered: no duplicate event
        let events = parser.feed("3");
        assert!(events.is_empty());
    }

    #[test]
    fn density_scan_lines() {
        let mut parser = GameParser::new();

        let mut events = parser.feed("                          Relative Density Scan\r\n");
        events.extend(parser.feed(
            "Sector  242  ==>  34,000  Warps : 6    NavHaz :     5%    Anom : No\r\n",
        ));
        events.extend(parser.feed(
            "Sector ( 500) ==>  100     Warps : 3    NavHaz :     0%    Anom : Yes\r\n",
        ));

        assert_eq!(
            events,
            vec![
                ParserEvent::DensityReading {
                    sector: 242,
                    density: 34_000,
                    warp_count: 6,
                    nav_haz: 5,
                    anomaly: false,
                },
                ParserEvent::DensityReading {
                    sector: 500,
                    density: 100,
                    warp_count: 3,
                    nav_haz: 0,
                    anomaly: true,
                },
            ]
        );
    }

    #[test]
    fn commerce_report() {
        let mut parser = GameParser::new();
        parser.feed("Command [TL=00:00:00]:[242] (?=Help)? : ");

        let mut events = parser.feed(
            "\r\nCommerce report for Stargate Alpha I: 12:00:47 PM Sat Oct 12, 2038\r\n",
        );
        events.extend(parser.feed(" Items     Status  Trading % of max OnBoard\r\n"));
        events.extend(parser.feed(" -----     ------  ------- -------- -------\r\n"));
        events.extend(parser.feed("Fuel Ore   Buying    3000    100%       0\r\n"));
        events.extend(parser.feed("Organics   Selling   2500     95%       0\r\n"));
        events.extend(parser.feed("Equipment  Selling   1200     50%       0\r\n"));

        let [ParserEvent::PortUpdated { sector, port }] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };

        assert_eq!(*sector, 242);
        assert_eq!(port.name, "Stargate Alpha I");
        assert_eq!(port.buying, [true, false, false]);
        assert_eq!(port.amounts, [3000, 2500, 1200]);
        assert_eq!(port.percents, [100, 95, 50]);
    }

    #[test]
    fn plotted_course_yields_warp_links() {
        let mut parser = GameParser::new();

        let mut events = parser.feed(
            "The shortest path (3 hops, 6 turns) from sector 2 to sector 50 is:\r\n",
        );
        events.extend(parser.feed("2 > 7 > (49) > (50)\r\n"));

        assert_eq!(
            events,
            vec![
                ParserEvent::WarpLink { from: 2, to: 7 },
                ParserEvent::WarpLink { from: 7, to: 49 },
                ParserEvent::WarpLink { from: 49, to: 50 },
            ]
        );
    }

    #[test]
    fn stats_lines_coalesce_into_one_event() {
        let mut parser = GameParser::new();

        let events = parser.feed(
            "Trader Name    : Civilian phil\r\nTrade Credits  : 10,000\r\nFighters       : 300\r\n",
        );

        let [ParserEvent::StatsUpdated(stats)] = events.as_slice() else {
            panic!("unexpected events: {events:?}");
        };
        assert_eq!(stats.player_name, "Civilian phil");
        assert_eq!(stats.credits, 10_000);
        assert_eq!(stats.fighters, 300);
    }

    #[test]
    fn unknown_lines_are_never_fatal() {
        let mut parser = GameParser::new();
        let events = parser.feed("garbage ::: %% 123 \r\n\r\nmore garbage\r\n");
        assert!(events.is_empty());
    }
}
