pub mod matcher;

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use self::matcher::{AltOptionMatcher, OptionMatcher, PatternMatcher};

pub const DEFAULT_DETECTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    GameMenuVisible,
    GameSelected,
    GameActive,
}

/// Side effects the session must carry out after feeding the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorAction {
    /// A game has started: open the per-game database for `game_name`.
    LoadDatabase { game_name: String },
    /// The game ended (or the session went quiet): close the database.
    UnloadDatabase,
}

/// Streaming lexer over the pre-game server text for one connection.
///
/// Recognises the game server's menu, selection, start and exit patterns and
/// gatekeeps which persistent database is active. Isolated letters are only
/// ever consumed from operator input, so letters scattered through server
/// output can never select a game.
pub struct GameDetector {
    state: DetectorState,
    game_options: HashMap<char, String>,
    selected_game: Option<String>,
    expecting_user_input: bool,
    store_open: bool,
    last_activity: Instant,
    detection_timeout: Duration,

    menu: PatternMatcher,
    start: PatternMatcher,
    exits: Vec<PatternMatcher>,
    main_menu: Vec<PatternMatcher>,
    prompts: Vec<PatternMatcher>,
    option: OptionMatcher,
    alt_option: AltOptionMatcher,
}

impl GameDetector {
    #[must_use]
    pub fn new(detection_timeout: Duration) -> Self {
        Self {
            state: DetectorState::Idle,
            game_options: HashMap::new(),
            selected_game: None,
            expecting_user_input: false,
            store_open: false,
            last_activity: Instant::now(),
            detection_timeout,
            menu: PatternMatcher::new("Select a game :"),
            start: PatternMatcher::new("Show today's log?"),
            exits: [
                "Goodbye",
                "Thank you for playing",
                "Connection terminated",
                "Disconnected",
            ]
            .into_iter()
            .map(PatternMatcher::new)
            .collect(),
            main_menu: ["TWGS v", "TradeWars Game Server"]
                .into_iter()
                .map(PatternMatcher::new)
                .collect(),
            prompts: [
                "Your choice: ",
                "Enter your choice: ",
                "Enter selection: ",
                "Selection: ",
                "Choice: ",
            ]
            .into_iter()
            .map(PatternMatcher::new)
            .collect(),
            option: OptionMatcher::new(),
            alt_option: AltOptionMatcher::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.state
    }

    #[must_use]
    pub fn selected_game(&self) -> Option<&str> {
        self.selected_game.as_deref()
    }

    #[must_use]
    pub fn game_options(&self) -> &HashMap<char, String> {
        &self.game_options
    }

    #[must_use]
    pub fn expecting_user_input(&self) -> bool {
        self.expecting_user_input
    }

    /// Feeds ANSI-stripped server output through the pattern lexers.
    pub fn process_text(&mut self, text: &str) -> Vec<DetectorAction> {
        self.last_activity = Instant::now();

        let mut actions = Vec::new();
        for c in text.chars() {
            self.process_char(c, &mut actions);
        }

        actions
    }

    /// Feeds one chunk of operator input. This is the only path that can
    /// select a game from the menu.
    pub fn process_user_input(&mut self, input: &str) -> Vec<DetectorAction> {
        self.last_activity = Instant::now();

        let trimmed = input.trim_end_matches(['\r', '\n']);
        let mut chars = trimmed.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return Vec::new();
        };

        if self.state != DetectorState::GameMenuVisible || !letter.is_ascii_alphabetic() {
            return Vec::new();
        }

        if let Some(game) = self.game_options.get(&letter.to_ascii_uppercase()) {
            info!(letter = %letter, game = %game, "game selected");
            self.selected_game = Some(game.clone());
            self.state = DetectorState::GameSelected;
            self.expecting_user_input = false;
        }

        Vec::new()
    }

    /// Drops back to `Idle` (closing any open store) once the session has
    /// been quiet for the detection timeout.
    pub fn check_timeout(&mut self, now: Instant) -> Vec<DetectorAction> {
        if self.state == DetectorState::Idle
            || now.duration_since(self.last_activity) < self.detection_timeout
        {
            return Vec::new();
        }

        debug!(
            idle = %humantime::format_duration(self.detection_timeout),
            "detector timed out, returning to idle"
        );
        self.reset_to_idle()
    }

    /// Called on disconnect; closes the store if one is open.
    pub fn shutdown(&mut self) -> Vec<DetectorAction> {
        self.reset_to_idle()
    }

    fn process_char(&mut self, c: char, actions: &mut Vec<DetectorAction>) {
        if self.menu.advance(c) {
            self.on_game_menu();
        }

        if let Some((letter, name)) = self.option.advance(c) {
            self.on_game_option(letter, name);
        }
        if let Some((letter, name)) = self.alt_option.advance(c) {
            self.on_game_option(letter, name);
        }

        if self.prompts.iter_mut().any(|m| m.advance(c)) {
            self.expecting_user_input = true;
        }

        if self.start.advance(c) && self.state == DetectorState::GameSelected {
            let game_name = self
                .selected_game
                .clone()
                .unwrap_or_else(|| "unknown".to_string());

            info!(game = %game_name, "game started");
            self.state = DetectorState::GameActive;
            self.store_open = true;
            actions.push(DetectorAction::LoadDatabase { game_name });
        }

        if self.exits.iter_mut().any(|m| m.advance(c))
            && matches!(
                self.state,
                DetectorState::GameActive | DetectorState::GameSelected
            )
        {
            info!("game exited");
            actions.extend(self.reset_to_idle());
        }

        if self.main_menu.iter_mut().any(|m| m.advance(c))
            && self.state == DetectorState::GameActive
        {
            info!("returned to game server menu");
            actions.extend(self.reset_to_idle());
        }
    }

    fn on_game_menu(&mut self) {
        if self.state == DetectorState::Idle {
            debug!("game menu visible");
            self.state = DetectorState::GameMenuVisible;
            self.game_options.clear();
        }

        if self.state == DetectorState::GameMenuVisible {
            self.expecting_user_input = true;
        }
    }

    fn on_game_option(&mut self, letter: char, name: String) {
        match self.state {
            // an option listing implies the menu even if its banner was
            // missed
            DetectorState::Idle => {
                debug!(letter = %letter, name = %name, "game option implies menu");
                self.state = DetectorState::GameMenuVisible;
                self.game_options.clear();
                self.game_options.insert(letter, name);
            }
            DetectorState::GameMenuVisible => {
                self.game_options.insert(letter, name);
            }
            DetectorState::GameSelected | DetectorState::GameActive => {}
        }
    }

    fn reset_to_idle(&mut self) -> Vec<DetectorAction> {
        let mut actions = Vec::new();
        if self.store_open {
            self.store_open = false;
            actions.push(DetectorAction::UnloadDatabase);
        }

        self.state = DetectorState::Idle;
        self.game_options.clear();
        self.selected_game = None;
        self.expecting_user_input = false;
        self.option.reset();
        self.alt_option.reset();
        self.menu.reset();
        self.start.reset();
        for m in &mut self.exits {
            m.reset();
        }
        for m in &mut self.main_menu {
            m.reset();
        }
        for m in &mut self.prompts {
            m.reset();
        }

        actions
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{DetectorAction, DetectorState, GameDetector, DEFAULT_DETECTION_TIMEOUT};

    fn detector() -> GameDetector {
        GameDetector::new(DEFAULT_DETECTION_TIMEOUT)
    }

    #[test]
    fn menu_selection_start_flow() {
        let mut d = detector();

        let mut actions = Vec::new();
        actions.extend(d.process_text("Select a ga"));
        actions.extend(d.process_text("me :"));
        actions.extend(d.process_text("<A> Trade Wars 2002\n"));
        actions.extend(d.process_text("<B> Another\n"));
        actions.extend(d.process_text("Your choice: "));
        assert_eq!(d.state(), DetectorState::GameMenuVisible);
        assert!(d.expecting_user_input());

        actions.extend(d.process_user_input("A"));
        assert_eq!(d.state(), DetectorState::GameSelected);
        assert_eq!(d.selected_game(), Some("Trade Wars 2002"));

        actions.extend(d.process_text("Show today's log? (Y/N)"));
        assert_eq!(d.state(), DetectorState::GameActive);
        assert_eq!(
            actions,
            vec![DetectorAction::LoadDatabase {
                game_name: "Trade Wars 2002".to_string()
            }]
        );
    }

    #[test]
    fn server_text_never_selects_a_game() {
        let mut d = detector();

        d.process_text("Select a game :\n");
        d.process_text("<A> Alien Retribution\n");
        d.process_text("<E> Stock (9600Baud)\n");
        d.process_text("Some server text with E scattered throughout\n");
        d.process_text("Enter your choice: ");
        assert_eq!(d.state(), DetectorState::GameMenuVisible);
        assert_eq!(d.selected_game(), None);

        d.process_user_input("A");
        assert_eq!(d.state(), DetectorState::GameSelected);
        assert_eq!(d.selected_game(), Some("Alien Retribution"));
    }

    #[test]
    fn lowercase_selection_matches_option() {
        let mut d = detector();

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("a\r\n");

        assert_eq!(d.selected_game(), Some("Trade Wars 2002"));
    }

    #[test]
    fn multi_character_input_is_not_a_selection() {
        let mut d = detector();

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("AB");

        assert_eq!(d.state(), DetectorState::GameMenuVisible);
    }

    #[test]
    fn dashed_options_advance_menu_from_idle() {
        let mut d = detector();

        d.process_text("T - TradeWars Classic\n");
        assert_eq!(d.state(), DetectorState::GameMenuVisible);

        d.process_user_input("T");
        assert_eq!(d.selected_game(), Some("TradeWars Classic"));
    }

    #[test]
    fn active_game_ignores_injected_menu() {
        let mut d = detector();

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("A");
        let actions = d.process_text("Show today's log?");
        assert_eq!(actions.len(), 1);
        assert_eq!(d.state(), DetectorState::GameActive);

        let actions = d.process_text("Select a game :\n<B> Another\n");
        assert!(actions.is_empty());
        d.process_user_input("B");
        assert_eq!(d.state(), DetectorState::GameActive);
        assert_eq!(d.selected_game(), Some("Trade Wars 2002"));

        let actions = d.process_text("Goodbye");
        assert_eq!(actions, vec![DetectorAction::UnloadDatabase]);
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn main_menu_banner_closes_active_game() {
        let mut d = detector();

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("A");
        d.process_text("Show today's log?");

        let actions = d.process_text("TWGS v2.20b www.eisonline.com\n");
        assert_eq!(actions, vec![DetectorAction::UnloadDatabase]);
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn exit_without_open_store_closes_nothing() {
        let mut d = detector();

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("A");
        assert_eq!(d.state(), DetectorState::GameSelected);

        let actions = d.process_text("Goodbye");
        assert!(actions.is_empty());
        assert_eq!(d.state(), DetectorState::Idle);
    }

    #[test]
    fn inactivity_times_the_detector_out() {
        let mut d = GameDetector::new(Duration::from_secs(1));

        d.process_text("<A> Trade Wars 2002\n");
        d.process_user_input("A");
        d.process_text("Show today's log?");

        assert!(d
            .check_timeout(Instant::now() + Duration::from_millis(500))
            .is_empty());

        let actions = d.check_timeout(Instant::now() + Duration::from_secs(2));
        assert_eq!(actions, vec![DetectorAction::UnloadDatabase]);
        assert_eq!(d.state(), DetectorState::Idle);
    }
}
