use std::time::Instant;

use tracing::debug;

/// Longest tail of inbound text retained so `Text` patterns split across
/// chunk boundaries still match.
const RECENT_WINDOW: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    /// Fires when the pattern appears anywhere in the inbound stream,
    /// including partial lines (prompts).
    Text,
    /// Fires when the pattern appears in a completed inbound line.
    TextLine,
    /// Fires on outbound operator text.
    TextOut,
    /// Fires once its deadline passes.
    Delay,
    /// `Text` behaviour with an automatic response; the response is carried
    /// in the owning script's label handler.
    AutoText,
    /// Fires on a named proxy event such as `"Connection lost"`.
    Event,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: String,
    pub kind: TriggerKind,
    /// Substring for text kinds, event name for `Event`; unused for `Delay`.
    pub pattern: String,
    /// Label jumped to in the owning script; empty resumes in place.
    pub label: String,
    pub script_id: String,
    pub armed: bool,
    pub once: bool,
    pub created_at: u64,
    pub fire_deadline: Option<Instant>,
}

/// A trigger that matched, telling the scheduler where the owning script
/// resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub script_id: String,
    pub label: String,
    pub trigger_id: String,
}

/// Holds every active trigger, keyed by id, and matches the inbound,
/// outbound, timer and event feeds against them.
///
/// Dispatch order is longest-installed-first so replays are deterministic.
#[derive(Default)]
pub struct TriggerManager {
    triggers: Vec<Trigger>,
    install_seq: u64,
    recent: String,
}

impl TriggerManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a trigger; a duplicate id replaces the existing trigger.
    pub fn install(&mut self, mut trigger: Trigger) {
        self.triggers.retain(|t| t.id != trigger.id);

        trigger.created_at = self.install_seq;
        self.install_seq += 1;

        debug!(id = %trigger.id, kind = ?trigger.kind, script = %trigger.script_id, "trigger installed");
        self.triggers.push(trigger);
    }

    pub fn kill(&mut self, id: &str) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id != id);
        before != self.triggers.len()
    }

    /// Removes every trigger owned by `script_id`.
    pub fn kill_script(&mut self, script_id: &str) {
        self.triggers.retain(|t| t.script_id != script_id);
    }

    #[must_use]
    pub fn owned_by(&self, script_id: &str) -> usize {
        self.triggers
            .iter()
            .filter(|t| t.script_id == script_id)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Matches a completed inbound line against `TextLine` triggers.
    pub fn feed_inbound_line(&mut self, line: &str) -> Vec<Firing> {
        self.fire(|t| t.kind == TriggerKind::TextLine && line.contains(&t.pattern))
    }

    /// Matches the raw inbound text stream against `Text` triggers. A match
    /// must end within the new chunk, so a pattern seen in an earlier chunk
    /// never re-fires.
    pub fn feed_text(&mut self, chunk: &str) -> Vec<Firing> {
        let window = format!("{}{}", self.recent, chunk);
        let new_from = self.recent.len();

        let firings = self.fire(|t| {
            matches!(t.kind, TriggerKind::Text | TriggerKind::AutoText)
                && !t.pattern.is_empty()
                && window
                    .match_indices(&t.pattern)
                    .any(|(at, m)| at + m.len() > new_from)
        });

        self.recent = tail(&window, RECENT_WINDOW).to_string();
        firings
    }

    /// Matches one chunk of outbound operator text against `TextOut`
    /// triggers.
    pub fn feed_outbound(&mut self, text: &str) -> Vec<Firing> {
        self.fire(|t| t.kind == TriggerKind::TextOut && text.contains(&t.pattern))
    }

    /// Fires delay triggers whose deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Vec<Firing> {
        self.fire(|t| {
            t.kind == TriggerKind::Delay && t.fire_deadline.is_some_and(|deadline| deadline <= now)
        })
    }

    /// Fires event triggers registered for `name`.
    pub fn fire_event(&mut self, name: &str) -> Vec<Firing> {
        self.fire(|t| t.kind == TriggerKind::Event && t.pattern == name)
    }

    fn fire(&mut self, matches: impl Fn(&Trigger) -> bool) -> Vec<Firing> {
        let mut fired: Vec<&mut Trigger> = self
            .triggers
            .iter_mut()
            .filter(|t| t.armed && matches(t))
            .collect();
        fired.sort_by_key(|t| t.created_at);

        let firings: Vec<Firing> = fired
            .iter_mut()
            .map(|t| {
                if t.once {
                    t.armed = false;
                }

                Firing {
                    script_id: t.script_id.clone(),
                    label: t.label.clone(),
                    trigger_id: t.id.clone(),
                }
            })
            .collect();

        self.triggers.retain(|t| t.armed);

        firings
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::{Trigger, TriggerKind, TriggerManager};

    fn text_trigger(id: &str, kind: TriggerKind, pattern: &str) -> Trigger {
        Trigger {
            id: id.to_string(),
            kind,
            pattern: pattern.to_string(),
            label: format!(":{id}"),
            script_id: "test".to_string(),
            armed: true,
            once: true,
            created_at: 0,
            fire_deadline: None,
        }
    }

    #[test]
    fn text_line_trigger_fires_on_substring() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::TextLine, "Sector  : "));

        let firings = manager.feed_inbound_line("Sector  : 42");
        assert_eq!(firings.len(), 1);
        assert_eq!(firings[0].trigger_id, "1");

        // one-shot: consumed on fire
        assert!(manager.feed_inbound_line("Sector  : 43").is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn text_trigger_matches_across_chunks() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::Text, "(?=Help)?"));

        assert!(manager.feed_text("Command [TL=00:00:00]:[242] (?=He").is_empty());
        let firings = manager.feed_text("lp)? : ");
        assert_eq!(firings.len(), 1);
    }

    #[test]
    fn stale_window_content_does_not_refire() {
        let mut manager = TriggerManager::new();
        manager.feed_text("the pattern was already here");

        manager.install(text_trigger("1", TriggerKind::Text, "pattern"));
        assert!(manager.feed_text("nothing new").is_empty());
    }

    #[test]
    fn duplicate_id_replaces() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::TextLine, "old"));
        manager.install(text_trigger("1", TriggerKind::TextLine, "new"));

        assert!(manager.feed_inbound_line("old text").is_empty());
        assert_eq!(manager.feed_inbound_line("new text").len(), 1);
    }

    #[test]
    fn dispatch_is_longest_installed_first() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("first", TriggerKind::TextLine, "match"));
        manager.install(text_trigger("second", TriggerKind::TextLine, "match"));

        let firings = manager.feed_inbound_line("match");
        assert_eq!(firings[0].trigger_id, "first");
        assert_eq!(firings[1].trigger_id, "second");
    }

    #[test]
    fn kill_removes_by_id() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::TextLine, "x"));

        assert!(manager.kill("1"));
        assert!(!manager.kill("1"));
        assert!(manager.feed_inbound_line("x").is_empty());
    }

    #[test]
    fn kill_script_releases_all_owned_triggers() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::TextLine, "x"));
        manager.install(text_trigger("2", TriggerKind::Text, "y"));

        manager.kill_script("test");
        assert!(manager.is_empty());
    }

    #[test]
    fn delay_triggers_fire_after_deadline() {
        let mut manager = TriggerManager::new();
        let mut trigger = text_trigger("1", TriggerKind::Delay, "");
        let now = Instant::now();
        trigger.fire_deadline = Some(now + Duration::from_millis(100));
        manager.install(trigger);

        assert!(manager.tick(now).is_empty());
        assert_eq!(manager.tick(now + Duration::from_millis(150)).len(), 1);
    }

    #[test]
    fn events_fire_by_name() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::Event, "Connection lost"));

        assert!(manager.fire_event("Something else").is_empty());
        assert_eq!(manager.fire_event("Connection lost").len(), 1);
    }

    #[test]
    fn outbound_triggers_see_operator_text() {
        let mut manager = TriggerManager::new();
        manager.install(text_trigger("1", TriggerKind::TextOut, "attack"));

        assert!(manager.feed_inbound_line("attack").is_empty());
        assert_eq!(manager.feed_outbound("attack now").len(), 1);
    }
}
