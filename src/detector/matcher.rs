/// Advances through a fixed pattern one character at a time, resetting to
/// the start on mismatch. Returns true on the character completing the
/// pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: Vec<char>,
    position: usize,
}

impl PatternMatcher {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        assert!(!pattern.is_empty(), "empty detector pattern");

        Self {
            pattern: pattern.chars().collect(),
            position: 0,
        }
    }

    pub fn advance(&mut self, c: char) -> bool {
        if c != self.pattern[self.position] {
            self.position = 0;
            // a mismatched character may still begin a fresh match
            if c != self.pattern[0] {
                return false;
            }
        }

        self.position += 1;
        if self.position == self.pattern.len() {
            self.position = 0;
            return true;
        }

        false
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}

/// Longest option name we will buffer before giving up on a line.
const MAX_OPTION_NAME: usize = 64;

#[derive(Debug, Clone)]
enum OptionState {
    LineStart,
    AwaitLetter,
    AwaitClose { letter: char },
    Name { letter: char, name: String },
    Skip,
}

/// Recognises `<X> Game Name` menu option lines, emitting the option once
/// the line terminates.
#[derive(Debug, Clone)]
pub struct OptionMatcher {
    state: OptionState,
}

impl Default for OptionMatcher {
    fn default() -> Self {
        Self {
            state: OptionState::LineStart,
        }
    }
}

impl OptionMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, c: char) -> Option<(char, String)> {
        if matches!(c, '\r' | '\n') {
            let finished = std::mem::replace(&mut self.state, OptionState::LineStart);
            if let OptionState::Name { letter, name } = finished {
                let name = name.trim().to_string();
                if !name.is_empty() {
                    return Some((letter.to_ascii_uppercase(), name));
                }
            }
            return None;
        }

        self.state = match std::mem::replace(&mut self.state, OptionState::Skip) {
            OptionState::LineStart if c == '<' => OptionState::AwaitLetter,
            OptionState::LineStart if c == ' ' => OptionState::LineStart,
            OptionState::AwaitLetter if c.is_ascii_alphabetic() => {
                OptionState::AwaitClose { letter: c }
            }
            OptionState::AwaitClose { letter } if c == '>' => OptionState::Name {
                letter,
                name: String::new(),
            },
            OptionState::Name { letter, mut name } if name.len() < MAX_OPTION_NAME => {
                name.push(c);
                OptionState::Name { letter, name }
            }
            _ => OptionState::Skip,
        };

        None
    }

    pub fn reset(&mut self) {
        self.state = OptionState::LineStart;
    }
}

#[derive(Debug, Clone)]
enum AltOptionState {
    LineStart,
    AwaitSpace { letter: char },
    AwaitDash { letter: char },
    AwaitName { letter: char },
    Name { letter: char, name: String },
    Skip,
}

/// Recognises the alternative `X - Game Name` option form.
#[derive(Debug, Clone)]
pub struct AltOptionMatcher {
    state: AltOptionState,
}

impl Default for AltOptionMatcher {
    fn default() -> Self {
        Self {
            state: AltOptionState::LineStart,
        }
    }
}

impl AltOptionMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, c: char) -> Option<(char, String)> {
        if matches!(c, '\r' | '\n') {
            let finished = std::mem::replace(&mut self.state, AltOptionState::LineStart);
            if let AltOptionState::Name { letter, name } = finished {
                let name = name.trim().to_string();
                if !name.is_empty() {
                    return Some((letter.to_ascii_uppercase(), name));
                }
            }
            return None;
        }

        self.state = match std::mem::replace(&mut self.state, AltOptionState::Skip) {
            AltOptionState::LineStart if c == ' ' => AltOptionState::LineStart,
            AltOptionState::LineStart if c.is_ascii_alphabetic() => {
                AltOptionState::AwaitSpace { letter: c }
            }
            AltOptionState::AwaitSpace { letter } if c == ' ' => {
                AltOptionState::AwaitDash { letter }
            }
            AltOptionState::AwaitDash { letter } if c == '-' => {
                AltOptionState::AwaitName { letter }
            }
            AltOptionState::AwaitName { letter } if c == ' ' => AltOptionState::Name {
                letter,
                name: String::new(),
            },
            AltOptionState::Name { letter, mut name } if name.len() < MAX_OPTION_NAME => {
                name.push(c);
                AltOptionState::Name { letter, name }
            }
            _ => AltOptionState::Skip,
        };

        None
    }

    pub fn reset(&mut self) {
        self.state = AltOptionState::LineStart;
    }
}

#[cfg(test)]
mod test {
    use super::{AltOptionMatcher, OptionMatcher, PatternMatcher};

    fn feed_line(text: &str) -> Vec<(char, String)> {
        let mut matcher = OptionMatcher::new();
        text.chars().filter_map(|c| matcher.advance(c)).collect()
    }

    #[test]
    fn matches_across_feeds() {
        let mut matcher = PatternMatcher::new("Select a game :");

        let mut matched = false;
        for c in "Select a ga".chars() {
            matched |= matcher.advance(c);
        }
        assert!(!matched);

        for c in "me :".chars() {
            matched |= matcher.advance(c);
        }
        assert!(matched);
    }

    #[test]
    fn mismatch_restarts_from_pattern_head() {
        let mut matcher = PatternMatcher::new("Goodbye");

        let mut fired = 0;
        for c in "GoGoodbye".chars() {
            if matcher.advance(c) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn bracketed_option_line() {
        assert_eq!(
            feed_line("<A> Trade Wars 2002\n"),
            vec![('A', "Trade Wars 2002".to_string())]
        );
    }

    #[test]
    fn indented_option_line() {
        assert_eq!(
            feed_line("   <b> Another Game\r\n"),
            vec![('B', "Another Game".to_string())]
        );
    }

    #[test]
    fn ordinary_text_is_not_an_option() {
        assert!(feed_line("Some <unrelated> text\n").is_empty());
        assert!(feed_line("<A>\n").is_empty());
    }

    #[test]
    fn dashed_option_line() {
        let mut matcher = AltOptionMatcher::new();
        let options: Vec<_> = "E - Stock (9600Baud)\n"
            .chars()
            .filter_map(|c| matcher.advance(c))
            .collect();

        assert_eq!(options, vec![('E', "Stock (9600Baud)".to_string())]);
    }

    #[test]
    fn dashed_text_mid_line_is_ignored() {
        let mut matcher = AltOptionMatcher::new();
        let options: Vec<_> = "turbo - charged\n"
            .chars()
            .filter_map(|c| matcher.advance(c))
            .collect();

        assert!(options.is_empty());
    }
}
