use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use super::{
    compiler::{Expr, Instr, Program, VarRef},
    trigger::{Trigger, TriggerKind, TriggerManager},
    value::{self, Value},
    ScriptEffect, ScriptError,
};

/// Instructions executed per scheduling slice before a script is declared
/// runaway. Suspension (pause/waitfor) resets the budget.
const MAX_STEPS: usize = 10_000;

/// Call depth cap for `gosub`.
const MAX_CALL_DEPTH: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScriptState {
    Runnable,
    /// Suspended until one of the script's triggers fires.
    Waiting,
    Finished,
}

/// Everything a running script may touch outside itself. Handed to the VM
/// per slice so scripts never hold references to the proxy.
pub struct HostCtx<'a> {
    pub triggers: &'a mut TriggerManager,
    pub globals: &'a HashMap<String, Value>,
    pub var_rows: &'a mut HashMap<String, String>,
    pub effects: &'a mut Vec<ScriptEffect>,
    pub now: Instant,
}

/// One compiled script with its own instruction pointer, locals and call
/// stack. Scripts are cooperatively scheduled: `run` executes until the
/// script suspends, finishes or errors.
pub struct Script {
    pub name: String,
    program: Program,
    ip: usize,
    call_stack: Vec<usize>,
    locals: HashMap<String, Value>,
    pub state: ScriptState,
}

impl Script {
    #[must_use]
    pub fn new(name: impl Into<String>, program: Program) -> Self {
        Self {
            name: name.into(),
            program,
            ip: 0,
            call_stack: Vec::new(),
            locals: HashMap::new(),
            state: ScriptState::Runnable,
        }
    }

    /// Resumes a waiting script. A non-empty label jumps there; an empty
    /// label (inline `waitfor`) continues at the next instruction.
    pub fn resume(&mut self, label: &str) -> Result<(), ScriptError> {
        if !label.is_empty() {
            self.ip = self.lookup_label(label)?;
        }

        self.state = ScriptState::Runnable;
        Ok(())
    }

    fn lookup_label(&self, label: &str) -> Result<usize, ScriptError> {
        let key = label.trim_start_matches(':').to_lowercase();
        self.program
            .labels
            .get(&key)
            .copied()
            .ok_or_else(|| ScriptError::RuntimeError(format!("unknown label :{key}")))
    }

    /// Runs until the script suspends or terminates. Falling off the end of
    /// the instruction list terminates the script.
    pub fn run(&mut self, host: &mut HostCtx<'_>) -> Result<ScriptState, ScriptError> {
        let mut steps = 0;

        while self.state == ScriptState::Runnable {
            if steps >= MAX_STEPS {
                return Err(ScriptError::RuntimeError(
                    "instruction budget exhausted without suspending".to_string(),
                ));
            }
            steps += 1;

            let Some(instr) = self.program.instructions.get(self.ip).cloned() else {
                self.state = ScriptState::Finished;
                break;
            };
            self.ip += 1;

            self.execute(&instr, host)?;
        }

        Ok(self.state)
    }

    fn execute(&mut self, instr: &Instr, host: &mut HostCtx<'_>) -> Result<(), ScriptError> {
        match instr {
            Instr::Send(values) => {
                let text = self.concat(values, host);
                host.effects.push(ScriptEffect::SendToServer(text));
            }
            Instr::Echo(values) => {
                let text = self.concat(values, host);
                host.effects.push(ScriptEffect::SendToTui(text));
            }
            Instr::WaitFor(pattern) => {
                let pattern = self.eval(pattern, host).text();
                host.triggers.install(Trigger {
                    id: format!("_waitfor_{}", self.name),
                    kind: TriggerKind::TextLine,
                    pattern,
                    label: String::new(),
                    script_id: self.name.clone(),
                    armed: true,
                    once: true,
                    created_at: 0,
                    fire_deadline: None,
                });
                self.state = ScriptState::Waiting;
            }
            Instr::Pause => self.state = ScriptState::Waiting,
            Instr::Halt => self.state = ScriptState::Finished,
            Instr::Goto(label) => self.ip = self.lookup_label(label)?,
            Instr::Gosub(label) => {
                if self.call_stack.len() >= MAX_CALL_DEPTH {
                    return Err(ScriptError::RuntimeError("gosub stack overflow".to_string()));
                }
                self.call_stack.push(self.ip);
                self.ip = self.lookup_label(label)?;
            }
            Instr::Return => {
                self.ip = self
                    .call_stack
                    .pop()
                    .ok_or_else(|| ScriptError::RuntimeError("return without gosub".to_string()))?;
            }
            Instr::SetVar { target, values } => {
                let value = if let [single] = values.as_slice() {
                    self.eval(single, host)
                } else {
                    Value::Str(self.concat(values, host))
                };
                self.write_var(target, value, host)?;
            }
            Instr::Add { target, value } => {
                let amount = self.eval(value, host).number();
                let current = self.eval(&Expr::Var(target.clone()), host).number();
                self.write_var(target, Value::Num(current + amount), host)?;
            }
            Instr::LoadVar(target) => {
                let key = self.flat_key(target, host)?;
                let loaded = value::reconstruct(&key, host.var_rows).unwrap_or_default();
                self.write_var(target, loaded, host)?;
            }
            Instr::SaveVar(target) => {
                let key = self.flat_key(target, host)?;
                let current = self.eval(&Expr::Var(target.clone()), host);
                for (name, scalar) in value::flatten(&key, &current) {
                    host.var_rows.insert(name.clone(), scalar.clone());
                    host.effects
                        .push(ScriptEffect::PersistVariable { name, value: scalar });
                }
            }
            Instr::SetTrigger {
                kind,
                id,
                label,
                pattern,
            } => {
                let id = self.eval(id, host).text();
                if id.is_empty() {
                    return Err(ScriptError::InvalidTrigger("empty trigger id".to_string()));
                }

                // label existence is validated up front so a dangling
                // trigger can never fire into nowhere
                self.lookup_label(label)
                    .map_err(|_| ScriptError::InvalidTrigger(format!("unknown label :{label}")))?;

                let pattern_value = self.eval(pattern, host);
                let fire_deadline = (*kind == TriggerKind::Delay).then(|| {
                    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                    let millis = pattern_value.number().max(0.0) as u64;
                    host.now + Duration::from_millis(millis)
                });

                host.triggers.install(Trigger {
                    id,
                    kind: *kind,
                    pattern: if *kind == TriggerKind::Delay {
                        String::new()
                    } else {
                        pattern_value.text()
                    },
                    label: label.clone(),
                    script_id: self.name.clone(),
                    armed: true,
                    once: true,
                    created_at: 0,
                    fire_deadline,
                });
            }
            Instr::KillTrigger(id) => {
                let id = self.eval(id, host).text();
                host.triggers.kill(&id);
            }
            Instr::KillAllTriggers => host.triggers.kill_script(&self.name),
        }

        Ok(())
    }

    fn concat(&self, values: &[Expr], host: &HostCtx<'_>) -> String {
        values
            .iter()
            .map(|v| self.eval(v, host).text())
            .collect::<Vec<_>>()
            .concat()
    }

    fn eval(&self, expr: &Expr, host: &HostCtx<'_>) -> Value {
        match expr {
            Expr::Lit(value) => value.clone(),
            Expr::Var(var) => self.read_var(var, host),
        }
    }

    fn read_var(&self, var: &VarRef, host: &HostCtx<'_>) -> Value {
        let mut current = self
            .locals
            .get(&var.name)
            .or_else(|| host.globals.get(&var.name))
            .cloned()
            .unwrap_or_default();

        for index in &var.indices {
            let Value::Array(items) = current else {
                return Value::default();
            };

            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let i = self.eval(index, host).number() as usize;
            current = if i >= 1 && i <= items.len() {
                items[i - 1].clone()
            } else {
                Value::default()
            };
        }

        current
    }

    fn write_var(
        &mut self,
        target: &VarRef,
        value: Value,
        host: &HostCtx<'_>,
    ) -> Result<(), ScriptError> {
        let indices = self.numeric_indices(target, host)?;

        let mut slot = self.locals.entry(target.name.clone()).or_default();
        for i in indices {
            if !matches!(slot, Value::Array(_)) {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                unreachable!("slot was just made an array");
            };

            if items.len() < i {
                items.resize(i, Value::default());
            }
            slot = &mut items[i - 1];
        }

        *slot = value;
        Ok(())
    }

    /// The flattened persistence key for a variable reference, e.g.
    /// `warps[2]`.
    fn flat_key(&self, var: &VarRef, host: &HostCtx<'_>) -> Result<String, ScriptError> {
        let mut key = var.name.clone();
        for i in self.numeric_indices(var, host)? {
            key.push_str(&format!("[{i}]"));
        }
        Ok(key)
    }

    fn numeric_indices(
        &self,
        var: &VarRef,
        host: &HostCtx<'_>,
    ) -> Result<Vec<usize>, ScriptError> {
        var.indices
            .iter()
            .map(|index| {
                let n = self.eval(index, host).number();
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                if n >= 1.0 && n.fract() == 0.0 {
                    Ok(n as usize)
                } else {
                    Err(ScriptError::RuntimeError(format!(
                        "bad array index `{n}` into ${}",
                        var.name
                    )))
                }
            })
            .collect()
    }
}
