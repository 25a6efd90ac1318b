pub mod compiler;
pub mod trigger;
pub mod value;
pub mod vm;

use std::{collections::HashMap, time::Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use self::{
    trigger::{Firing, TriggerManager},
    value::Value,
    vm::{HostCtx, Script, ScriptState},
};

/// The standard event fired when the upstream connection drops.
pub const EVENT_CONNECTION_LOST: &str = "Connection lost";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to load script: {0}")]
    LoadFailed(String),
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },
    #[error("runtime error: {0}")]
    RuntimeError(String),
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
    #[error("send while disconnected")]
    SendWhileDisconnected,
}

/// Side effects produced by a scheduling slice, applied by the session in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEffect {
    SendToServer(String),
    SendToTui(String),
    /// Write one flattened script-variable row to the active store.
    PersistVariable { name: String, value: String },
    /// A script died with an error; the proxy keeps running.
    Error { script: String, message: String },
    /// The set of running scripts changed.
    StatusChanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptStatus {
    pub active_count: usize,
    pub total_count: usize,
    pub script_names: Vec<String>,
}

/// Owns every running script and their triggers, and schedules them
/// cooperatively as the trigger feeds fire.
#[derive(Default)]
pub struct ScriptManager {
    scripts: Vec<Script>,
    triggers: TriggerManager,
    globals: HashMap<String, Value>,
    var_rows: HashMap<String, String>,
    total_loaded: usize,
}

impl ScriptManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a proxy-maintained constant (current sector, game name, ..)
    /// readable by every script.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_lowercase(), value);
    }

    /// Seeds the persisted-variable cache from the freshly opened store.
    pub fn prime_variables(&mut self, rows: Vec<(String, String)>) {
        self.var_rows = rows.into_iter().collect();
    }

    /// Drops the persisted-variable cache when the store closes.
    pub fn clear_variables(&mut self) {
        self.var_rows.clear();
    }

    #[must_use]
    pub fn status(&self) -> ScriptStatus {
        ScriptStatus {
            active_count: self.scripts.len(),
            total_count: self.total_loaded,
            script_names: self.scripts.iter().map(|s| s.name.clone()).collect(),
        }
    }

    #[must_use]
    pub fn trigger_count_for(&self, script: &str) -> usize {
        self.triggers.owned_by(script)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scripts.is_empty() && self.triggers.is_empty()
    }

    /// Compiles and starts a script. A script with the same name replaces
    /// its previous incarnation.
    pub fn load(&mut self, name: &str, source: &str) -> Result<Vec<ScriptEffect>, ScriptError> {
        let program = compiler::compile(source)?;

        if self.scripts.iter().any(|s| s.name == name) {
            debug!(name, "replacing already-running script");
            self.scripts.retain(|s| s.name != name);
            self.triggers.kill_script(name);
        }

        info!(name, "script loaded");
        self.scripts.push(Script::new(name, program));
        self.total_loaded += 1;

        let mut effects = vec![ScriptEffect::StatusChanged];
        self.run_script(name, None, &mut effects);
        Ok(effects)
    }

    /// Stops every script and releases their triggers.
    pub fn stop_all(&mut self) -> Vec<ScriptEffect> {
        if self.scripts.is_empty() {
            return Vec::new();
        }

        for script in self.scripts.drain(..) {
            self.triggers.kill_script(&script.name);
        }

        info!("all scripts stopped");
        vec![ScriptEffect::StatusChanged]
    }

    /// Feeds one completed, ANSI-stripped inbound line.
    pub fn feed_inbound_line(&mut self, line: &str) -> Vec<ScriptEffect> {
        let firings = self.triggers.feed_inbound_line(line);
        self.deliver(firings)
    }

    /// Feeds the raw inbound text stream (for `Text` triggers, which may
    /// match partial lines such as prompts).
    pub fn feed_text(&mut self, chunk: &str) -> Vec<ScriptEffect> {
        let firings = self.triggers.feed_text(chunk);
        self.deliver(firings)
    }

    /// Feeds one chunk of outbound operator text.
    pub fn feed_outbound(&mut self, text: &str) -> Vec<ScriptEffect> {
        let firings = self.triggers.feed_outbound(text);
        self.deliver(firings)
    }

    /// Fires due delay triggers.
    pub fn tick(&mut self, now: Instant) -> Vec<ScriptEffect> {
        let firings = self.triggers.tick(now);
        self.deliver(firings)
    }

    /// Fires an event by name, e.g. [`EVENT_CONNECTION_LOST`].
    pub fn fire_event(&mut self, name: &str) -> Vec<ScriptEffect> {
        let firings = self.triggers.fire_event(name);
        self.deliver(firings)
    }

    fn deliver(&mut self, firings: Vec<Firing>) -> Vec<ScriptEffect> {
        let mut effects = Vec::new();
        for firing in firings {
            self.run_script(&firing.script_id, Some(&firing.label), &mut effects);
        }
        effects
    }

    fn run_script(&mut self, name: &str, label: Option<&str>, effects: &mut Vec<ScriptEffect>) {
        let Some(position) = self.scripts.iter().position(|s| s.name == name) else {
            // fired after the owning script was already stopped
            return;
        };

        let mut script = self.scripts.remove(position);
        let result = label.map_or(Ok(()), |label| script.resume(label)).and_then(|()| {
            let mut host = HostCtx {
                triggers: &mut self.triggers,
                globals: &self.globals,
                var_rows: &mut self.var_rows,
                effects: &mut *effects,
                now: Instant::now(),
            };
            script.run(&mut host)
        });

        match result {
            Ok(ScriptState::Finished) => {
                info!(name, "script finished");
                self.triggers.kill_script(name);
                effects.push(ScriptEffect::StatusChanged);
            }
            Ok(_) => {
                // keep the original position so scheduling stays fair
                let position = position.min(self.scripts.len());
                self.scripts.insert(position, script);
            }
            Err(error) => {
                warn!(name, %error, "script terminated with error");
                self.triggers.kill_script(name);
                effects.push(ScriptEffect::Error {
                    script: name.to_string(),
                    message: error.to_string(),
                });
                effects.push(ScriptEffect::StatusChanged);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ScriptEffect, ScriptManager, EVENT_CONNECTION_LOST};

    fn sends(effects: &[ScriptEffect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                ScriptEffect::SendToServer(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn trigger_jump_terminates_script() {
        let mut manager = ScriptManager::new();
        manager
            .load(
                "probe",
                "setTextLineTrigger 1 :End \"Sector  : \"\npause\n:End\n",
            )
            .unwrap();
        assert_eq!(manager.status().active_count, 1);

        let effects = manager.feed_inbound_line("Sector  : 42");
        assert!(effects.contains(&ScriptEffect::StatusChanged));
        assert_eq!(manager.status().active_count, 0);
        assert!(manager.is_idle());
    }

    #[test]
    fn killed_trigger_leaves_script_paused() {
        let mut manager = ScriptManager::new();
        manager
            .load(
                "probe",
                "setTextLineTrigger 1 :End \"Sector  : \"\npause\n:End\n",
            )
            .unwrap();

        manager
            .load("killer", "killTrigger 1\n")
            .unwrap();

        let effects = manager.feed_inbound_line("Sector  : 42");
        assert!(effects.is_empty());
        assert_eq!(manager.status().active_count, 1);
        assert_eq!(manager.status().script_names, vec!["probe".to_string()]);
    }

    #[test]
    fn waitfor_send_flow() {
        let mut manager = ScriptManager::new();
        let effects = manager
            .load("login", "waitfor \"Your choice: \"\nsend \"A\"\n")
            .unwrap();
        assert!(sends(&effects).is_empty());

        let effects = manager.feed_inbound_line("Your choice: ");
        assert_eq!(sends(&effects), vec!["A"]);
        assert_eq!(manager.status().active_count, 0);
    }

    #[test]
    fn text_triggers_fire_on_partial_lines() {
        let mut manager = ScriptManager::new();
        manager
            .load(
                "prompt",
                "setTextTrigger 1 :Hit \"(?=Help)?\"\npause\n:Hit\nsend \"d\"\n",
            )
            .unwrap();

        // the prompt never completes a line
        let effects = manager.feed_text("Command [TL=00:00:00]:[242] (?=Help)? : ");
        assert_eq!(sends(&effects), vec!["d"]);
    }

    #[test]
    fn runtime_error_releases_triggers() {
        let mut manager = ScriptManager::new();
        manager
            .load(
                "broken",
                "setTextLineTrigger 1 :Boom \"x\"\npause\n:Boom\nsetVar $a[0] 1\n",
            )
            .unwrap();
        assert_eq!(manager.trigger_count_for("broken"), 1);

        let effects = manager.feed_inbound_line("x");
        assert!(effects
            .iter()
            .any(|e| matches!(e, ScriptEffect::Error { script, .. } if script == "broken")));
        assert!(manager.is_idle());
    }

    #[test]
    fn syntax_error_fails_the_load() {
        let mut manager = ScriptManager::new();
        assert!(manager.load("bad", "frobnicate\n").is_err());
        assert_eq!(manager.status().active_count, 0);
        assert_eq!(manager.status().total_count, 0);
    }

    #[test]
    fn stop_all_releases_everything() {
        let mut manager = ScriptManager::new();
        manager
            .load("a", "setTextLineTrigger 1 :X \"p\"\npause\n:X\n")
            .unwrap();
        manager
            .load("b", "setTextLineTrigger 2 :Y \"q\"\npause\n:Y\n")
            .unwrap();
        assert_eq!(manager.status().active_count, 2);

        let effects = manager.stop_all();
        assert_eq!(effects, vec![ScriptEffect::StatusChanged]);
        assert!(manager.is_idle());
        assert!(manager.feed_inbound_line("p").is_empty());
    }

    #[test]
    fn connection_lost_event_reaches_scripts() {
        let mut manager = ScriptManager::new();
        manager
            .load(
                "watch",
                "setEventTrigger 1 :Lost \"Connection lost\"\npause\n:Lost\necho \"gone\"\n",
            )
            .unwrap();

        let effects = manager.fire_event(EVENT_CONNECTION_LOST);
        assert!(effects.contains(&ScriptEffect::SendToTui("gone".to_string())));
    }

    #[test]
    fn persisted_variables_survive_reload() {
        let mut manager = ScriptManager::new();
        manager
            .load("writer", "setVar $count 7\nsaveVar $count\n")
            .unwrap();

        let rows: Vec<(String, String)> = vec![("count".to_string(), "7".to_string())];
        let mut fresh = ScriptManager::new();
        fresh.prime_variables(rows);

        let effects = fresh
            .load("reader", "loadVar $count\necho $count\n")
            .unwrap();
        assert!(effects.contains(&ScriptEffect::SendToTui("7".to_string())));
    }

    #[test]
    fn delay_triggers_fire_via_tick() {
        use std::time::{Duration, Instant};

        let mut manager = ScriptManager::new();
        manager
            .load(
                "timer",
                "setDelayTrigger 1 :Fire 50\npause\n:Fire\nsend \"late\"\n",
            )
            .unwrap();

        assert!(manager.tick(Instant::now()).is_empty());
        let effects = manager.tick(Instant::now() + Duration::from_millis(100));
        assert_eq!(sends(&effects), vec!["late"]);
    }

    #[test]
    fn status_counts_loads_over_time() {
        let mut manager = ScriptManager::new();
        manager.load("one", "halt\n").unwrap();
        manager
            .load("two", "pause\n")
            .unwrap();

        let status = manager.status();
        assert_eq!(status.active_count, 1);
        assert_eq!(status.total_count, 2);
        assert_eq!(status.script_names, vec!["two".to_string()]);
    }
}
