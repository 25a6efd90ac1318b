use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{map, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::{trigger::TriggerKind, value::Value, ScriptError};

/// A variable reference, optionally into nested one-based array elements.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub indices: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Var(VarRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Send(Vec<Expr>),
    Echo(Vec<Expr>),
    WaitFor(Expr),
    Pause,
    Halt,
    Goto(String),
    Gosub(String),
    Return,
    SetVar { target: VarRef, values: Vec<Expr> },
    Add { target: VarRef, value: Expr },
    LoadVar(VarRef),
    SaveVar(VarRef),
    SetTrigger {
        kind: TriggerKind,
        id: Expr,
        label: String,
        pattern: Expr,
    },
    KillTrigger(Expr),
    KillAllTriggers,
}

/// A compiled script: a flat instruction list plus its label table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instr>,
    pub labels: HashMap<String, usize>,
}

/// Compiles script source. Commands and labels are case-insensitive;
/// unknown commands are a compile-time error, never a runtime surprise.
pub fn compile(source: &str) -> Result<Program, ScriptError> {
    let mut program = Program::default();

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(label) = line.strip_prefix(':') {
            let label = label.trim();
            if label.is_empty() || !label.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(ScriptError::SyntaxError {
                    line: index + 1,
                    message: format!("malformed label `{line}`"),
                });
            }

            program
                .labels
                .insert(label.to_lowercase(), program.instructions.len());
            continue;
        }

        let instr = compile_command(line).map_err(|message| ScriptError::SyntaxError {
            line: index + 1,
            message,
        })?;
        program.instructions.push(instr);
    }

    Ok(program)
}

/// One parsed argument: either an expression or a `:label` jump target.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Expr(Expr),
    Label(String),
}

fn compile_command(line: &str) -> Result<Instr, String> {
    let (rest, word) =
        identifier(line).map_err(|_| format!("expected a command, found `{line}`"))?;

    let (rest, mut tokens) =
        arguments(rest).map_err(|_| format!("malformed arguments: `{line}`"))?;
    if !rest.trim().is_empty() {
        return Err(format!("trailing junk after command: `{}`", rest.trim()));
    }

    let command = word.to_ascii_lowercase();
    let instr = match command.as_str() {
        "send" | "echo" => {
            let values = take_all_exprs(&mut tokens)?;
            if values.is_empty() {
                return Err(format!("`{command}` needs at least one value"));
            }
            if command == "send" {
                Instr::Send(values)
            } else {
                Instr::Echo(values)
            }
        }
        "waitfor" => Instr::WaitFor(expect_expr(take_token(&mut tokens, "pattern")?)?),
        "pause" => Instr::Pause,
        "halt" => Instr::Halt,
        "goto" => Instr::Goto(expect_label(take_token(&mut tokens, "label")?)?),
        "gosub" => Instr::Gosub(expect_label(take_token(&mut tokens, "label")?)?),
        "return" => Instr::Return,
        "setvar" => {
            let target = expect_var(take_token(&mut tokens, "target variable")?)?;
            let values = take_all_exprs(&mut tokens)?;
            if values.is_empty() {
                return Err("`setVar` needs a value".to_string());
            }
            Instr::SetVar { target, values }
        }
        "add" => Instr::Add {
            target: expect_var(take_token(&mut tokens, "target variable")?)?,
            value: expect_expr(take_token(&mut tokens, "amount")?)?,
        },
        "loadvar" => Instr::LoadVar(expect_var(take_token(&mut tokens, "variable")?)?),
        "savevar" => Instr::SaveVar(expect_var(take_token(&mut tokens, "variable")?)?),
        "settexttrigger" | "settextlinetrigger" | "settextouttrigger" | "seteventtrigger"
        | "setdelaytrigger" => {
            let kind = match command.as_str() {
                "settexttrigger" => TriggerKind::Text,
                "settextlinetrigger" => TriggerKind::TextLine,
                "settextouttrigger" => TriggerKind::TextOut,
                "seteventtrigger" => TriggerKind::Event,
                _ => TriggerKind::Delay,
            };

            Instr::SetTrigger {
                kind,
                id: expect_expr(take_token(&mut tokens, "trigger id")?)?,
                label: expect_label(take_token(&mut tokens, "label")?)?,
                pattern: expect_expr(take_token(&mut tokens, "pattern")?)?,
            }
        }
        "killtrigger" => Instr::KillTrigger(expect_expr(take_token(&mut tokens, "trigger id")?)?),
        "killalltriggers" => Instr::KillAllTriggers,
        _ => return Err(format!("unknown command `{word}`")),
    };

    if !tokens.is_empty() {
        return Err(format!("too many arguments to `{command}`"));
    }

    Ok(instr)
}

fn take_token(tokens: &mut Vec<Token>, what: &str) -> Result<Token, String> {
    if tokens.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(tokens.remove(0))
    }
}

fn take_all_exprs(tokens: &mut Vec<Token>) -> Result<Vec<Expr>, String> {
    tokens.drain(..).map(expect_expr).collect()
}

fn expect_expr(token: Token) -> Result<Expr, String> {
    match token {
        Token::Expr(expr) => Ok(expr),
        Token::Label(label) => Err(format!("unexpected label :{label}")),
    }
}

fn expect_label(token: Token) -> Result<String, String> {
    match token {
        Token::Label(label) => Ok(label),
        Token::Expr(_) => Err("expected a :label".to_string()),
    }
}

fn expect_var(token: Token) -> Result<VarRef, String> {
    match token {
        Token::Expr(Expr::Var(var)) => Ok(var),
        _ => Err("expected a $variable".to_string()),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn separator(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == ',')(input)
}

fn quoted(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        |s: &str| Expr::Lit(Value::Str(translate_stars(s))),
    )(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |s: &str| Expr::Lit(Value::Num(s.parse().unwrap_or(0.0))),
    )(input)
}

fn variable(input: &str) -> IResult<&str, Expr> {
    map(
        preceded(
            char('$'),
            pair(
                identifier,
                many0(delimited(char('['), index_expr, char(']'))),
            ),
        ),
        |(name, indices)| {
            Expr::Var(VarRef {
                name: name.to_lowercase(),
                indices,
            })
        },
    )(input)
}

fn index_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        variable,
        number,
        quoted,
        map(identifier, |s: &str| Expr::Lit(Value::Str(s.to_string()))),
    ))(input)
}

fn label(input: &str) -> IResult<&str, Token> {
    map(preceded(char(':'), identifier), |s: &str| {
        Token::Label(s.to_lowercase())
    })(input)
}

fn bare_word(input: &str) -> IResult<&str, Expr> {
    map(
        take_while1(|c: char| !c.is_whitespace() && c != ',' && c != '"'),
        |s: &str| Expr::Lit(Value::Str(s.to_string())),
    )(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        label,
        map(alt((quoted, variable, number, bare_word)), Token::Expr),
    ))(input)
}

fn arguments(input: &str) -> IResult<&str, Vec<Token>> {
    many0(preceded(separator, token))(input)
}

/// Translates the game's `*` ENTER shorthand inside string literals: `*`
/// becomes CR/LF, `**` a literal asterisk.
fn translate_stars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                out.push('*');
            } else {
                out.push_str("\r\n");
            }
        } else {
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod test {
    use crate::script::{trigger::TriggerKind, value::Value, ScriptError};

    use super::{compile, Expr, Instr, VarRef};

    #[test]
    fn compiles_the_trigger_wait_pattern() {
        let program = compile(
            "# wait for the next sector display\n\
             setTextLineTrigger 1 :End \"Sector  : \"\n\
             pause\n\
             \n\
             :End\n\
             halt\n",
        )
        .unwrap();

        assert_eq!(program.instructions.len(), 3);
        assert_eq!(program.labels.get("end"), Some(&2));

        let Instr::SetTrigger {
            kind,
            id,
            label,
            pattern,
        } = &program.instructions[0]
        else {
            panic!("expected trigger install");
        };
        assert_eq!(*kind, TriggerKind::TextLine);
        assert_eq!(*id, Expr::Lit(Value::Str("1".to_string())));
        assert_eq!(label, "end");
        assert_eq!(*pattern, Expr::Lit(Value::Str("Sector  : ".to_string())));
        assert_eq!(program.instructions[1], Instr::Pause);
    }

    #[test]
    fn send_concatenates_values_and_translates_enter() {
        let program = compile("send \"move \" $target \"*\"\n").unwrap();

        let Instr::Send(values) = &program.instructions[0] else {
            panic!("expected send");
        };
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], Expr::Lit(Value::Str("\r\n".to_string())));
        assert_eq!(
            values[1],
            Expr::Var(VarRef {
                name: "target".to_string(),
                indices: vec![],
            })
        );
    }

    #[test]
    fn double_star_is_a_literal_asterisk() {
        let program = compile("send \"a**b\"\n").unwrap();
        let Instr::Send(values) = &program.instructions[0] else {
            panic!("expected send");
        };
        assert_eq!(values[0], Expr::Lit(Value::Str("a*b".to_string())));
    }

    #[test]
    fn array_indices_parse() {
        let program = compile("setVar $warps[2] 572\n").unwrap();

        let Instr::SetVar { target, values } = &program.instructions[0] else {
            panic!("expected setVar");
        };
        assert_eq!(target.name, "warps");
        assert_eq!(target.indices, vec![Expr::Lit(Value::Num(2.0))]);
        assert_eq!(values[0], Expr::Lit(Value::Num(572.0)));
    }

    #[test]
    fn labels_are_case_insensitive() {
        let program = compile(":Start\ngoto :START\n").unwrap();
        assert_eq!(program.labels.get("start"), Some(&0));
        assert_eq!(program.instructions[0], Instr::Goto("start".to_string()));
    }

    #[test]
    fn unknown_commands_are_syntax_errors() {
        let err = compile("send \"hi\"\nfrobnicate 1 2\n").unwrap_err();
        let ScriptError::SyntaxError { line, message } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(line, 2);
        assert!(message.contains("frobnicate"), "{message}");
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(compile("waitfor\n").is_err());
        assert!(compile("setTextTrigger 1\n").is_err());
        assert!(compile("goto somewhere\n").is_err());
    }

    #[test]
    fn comma_separated_arguments() {
        let program = compile("send \"a\", \"b\"\n").unwrap();
        let Instr::Send(values) = &program.instructions[0] else {
            panic!("expected send");
        };
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn event_trigger_surface() {
        let program =
            compile("setEventTrigger quit :Bye \"Connection lost\"\nkillTrigger quit\n").unwrap();

        assert!(matches!(
            &program.instructions[0],
            Instr::SetTrigger {
                kind: TriggerKind::Event,
                ..
            }
        ));
        assert!(matches!(
            &program.instructions[1],
            Instr::KillTrigger(Expr::Lit(Value::Str(id))) if id == "quit"
        ));
    }
}
