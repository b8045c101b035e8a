// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Textual traversal syntax
//!
//! ```text
//! g.Context(1700000000000, 60000).V().Has("Type", "bridge").Out().Dedup()
//! g.V("id").Both("Type", Within("veth", "tun"), "State", Ne("DOWN"))
//! ```
//!
//! Step names are case-sensitive. `Has` with a single argument tests for
//! key presence.

use serde_json::Value;
use topograph_core::{Identifier, Result, TopographError};

use crate::step::{Predicate, PredicateValue, Step};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                s.push(escaped);
                            }
                        }
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => s.push(c),
                    }
                }
                if !closed {
                    return Err(TopographError::query(
                        "g",
                        format!("unterminated string starting at offset {}", pos),
                    ));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut s = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '-' || c == '.' || c == 'e' || c == 'E' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = if s.contains(|c: char| c == '.' || c == 'e' || c == 'E') {
                    s.parse::<f64>().map(Token::Float).ok()
                } else {
                    s.parse::<i64>().map(Token::Int).ok()
                };
                match token {
                    Some(t) => tokens.push(t),
                    None => {
                        return Err(TopographError::query(
                            "g",
                            format!("invalid number '{}' at offset {}", s, pos),
                        ))
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        s.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => {
                return Err(TopographError::query(
                    "g",
                    format!("unexpected character '{}' at offset {}", other, pos),
                ))
            }
        }
    }
    Ok(tokens)
}

/// A parsed step argument
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Value(Value),
    Ne(Value),
    Within(Vec<Value>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: Token, step: &str) -> Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(TopographError::query(
                step,
                format!("expected {:?}, found {:?}", expected, t),
            )),
            None => Err(TopographError::query(
                step,
                format!("expected {:?}, found end of input", expected),
            )),
        }
    }

    fn args(&mut self, step: &str) -> Result<Vec<Arg>> {
        self.expect(Token::LParen, step)?;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.arg(step)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(TopographError::query(
                        step,
                        format!("expected ',' or ')', found {:?}", other),
                    ))
                }
            }
        }
        Ok(args)
    }

    fn arg(&mut self, step: &str) -> Result<Arg> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Arg::Value(Value::String(s))),
            Some(Token::Int(i)) => Ok(Arg::Value(Value::from(i))),
            Some(Token::Float(f)) => Ok(Arg::Value(Value::from(f))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Arg::Value(Value::Bool(true))),
                "false" => Ok(Arg::Value(Value::Bool(false))),
                "Ne" | "Within" => {
                    let inner = self.args(&name)?;
                    let values = inner
                        .into_iter()
                        .map(|a| match a {
                            Arg::Value(v) => Ok(v),
                            _ => Err(TopographError::query(
                                step,
                                format!("{} only takes literal values", name),
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    if name == "Ne" {
                        match <[Value; 1]>::try_from(values) {
                            Ok([v]) => Ok(Arg::Ne(v)),
                            Err(_) => Err(TopographError::query(step, "Ne takes one value")),
                        }
                    } else if values.is_empty() {
                        Err(TopographError::query(step, "Within needs at least one value"))
                    } else {
                        Ok(Arg::Within(values))
                    }
                }
                other => Err(TopographError::query(
                    step,
                    format!("unknown predicate '{}'", other),
                )),
            },
            other => Err(TopographError::query(
                step,
                format!("unexpected argument {:?}", other),
            )),
        }
    }
}

fn key_arg(step: &str, arg: Arg) -> Result<String> {
    match arg {
        Arg::Value(Value::String(s)) => Ok(s),
        other => Err(TopographError::query(
            step,
            format!("expected a string key, found {:?}", other),
        )),
    }
}

fn int_arg(step: &str, arg: &Arg) -> Result<u64> {
    match arg {
        Arg::Value(v) => v
            .as_u64()
            .ok_or_else(|| TopographError::query(step, format!("expected a non-negative integer, found {}", v))),
        other => Err(TopographError::query(
            step,
            format!("expected an integer, found {:?}", other),
        )),
    }
}

fn predicates(step: &str, args: Vec<Arg>) -> Result<Vec<Predicate>> {
    if args.len() % 2 != 0 {
        return Err(TopographError::query(
            step,
            "expects key/value pairs",
        ));
    }
    let mut out = Vec::with_capacity(args.len() / 2);
    let mut iter = args.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        let key = key_arg(step, k)?;
        let value = match v {
            Arg::Value(v) => PredicateValue::Literal(v),
            Arg::Ne(v) => PredicateValue::Ne(v),
            Arg::Within(vs) => PredicateValue::Within(vs),
        };
        out.push(Predicate { key, value });
    }
    Ok(out)
}

fn no_args(step: &str, args: &[Arg]) -> Result<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(TopographError::query(step, "takes no arguments"))
    }
}

fn build_step(name: &str, args: Vec<Arg>) -> Result<Step> {
    match name {
        "Context" => match args.as_slice() {
            [t] => Ok(Step::Context {
                time: int_arg(name, t)?,
                duration: None,
            }),
            [t, d] => Ok(Step::Context {
                time: int_arg(name, t)?,
                duration: Some(int_arg(name, d)?),
            }),
            _ => Err(TopographError::query(name, "expects a time and an optional duration")),
        },
        "V" => match args.len() {
            0 => Ok(Step::V(None)),
            1 => {
                let id = args.into_iter().next().map(|a| key_arg(name, a)).transpose()?;
                Ok(Step::V(id.map(Identifier::new)))
            }
            _ => Err(TopographError::query(name, "takes at most one identifier")),
        },
        "Has" => {
            if args.is_empty() {
                return Err(TopographError::query(name, "needs at least a key"));
            }
            if args.len() == 1 {
                let key = args.into_iter().next().map(|a| key_arg(name, a)).transpose()?;
                return key
                    .map(Step::HasKey)
                    .ok_or_else(|| TopographError::query(name, "needs at least a key"));
            }
            Ok(Step::Has(predicates(name, args)?))
        }
        "HasKey" => match args.len() {
            1 => {
                let key = args.into_iter().next().map(|a| key_arg(name, a)).transpose()?;
                key.map(Step::HasKey)
                    .ok_or_else(|| TopographError::query(name, "needs a key"))
            }
            _ => Err(TopographError::query(name, "takes exactly one key")),
        },
        "Out" => Ok(Step::Out(predicates(name, args)?)),
        "In" => Ok(Step::In(predicates(name, args)?)),
        "Both" => Ok(Step::Both(predicates(name, args)?)),
        "Dedup" => match args.len() {
            0 => Ok(Step::Dedup(None)),
            1 => {
                let key = args.into_iter().next().map(|a| key_arg(name, a)).transpose()?;
                Ok(Step::Dedup(key))
            }
            _ => Err(TopographError::query(name, "takes at most one key")),
        },
        "Count" => no_args(name, &args).map(|_| Step::Count),
        "Limit" => match args.as_slice() {
            [n] => Ok(Step::Limit(int_arg(name, n)? as usize)),
            _ => Err(TopographError::query(name, "takes one integer")),
        },
        "Metrics" => no_args(name, &args).map(|_| Step::Metrics),
        "Aggregates" => no_args(name, &args).map(|_| Step::Aggregates),
        other => Err(TopographError::query(other, "unknown step")),
    }
}

/// Parse a textual traversal into steps
pub fn parse(input: &str) -> Result<Vec<Step>> {
    let mut parser = Parser {
        tokens: lex(input)?,
        pos: 0,
    };

    match parser.next() {
        Some(Token::Ident(g)) if g == "g" => {}
        _ => return Err(TopographError::query("g", "traversal must start with 'g'")),
    }

    let mut steps = Vec::new();
    while let Some(token) = parser.next() {
        if token != Token::Dot {
            return Err(TopographError::query(
                steps.last().map_or("g", Step::name),
                format!("expected '.', found {:?}", token),
            ));
        }
        let name = match parser.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(TopographError::query(
                    steps.last().map_or("g", Step::name),
                    format!("expected a step name, found {:?}", other),
                ))
            }
        };
        let args = parser.args(&name)?;
        steps.push(build_step(&name, args)?);
    }
    Ok(steps)
}
