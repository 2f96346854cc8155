// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::value::SqlValue;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$(?:->)?\{([^}]*)\}").unwrap();
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InlineError {
    #[error("syntax error in {0:?}: {1}")]
    Syntax(String, String),

    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("value {0:?} is not numeric")]
    NotNumeric(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&SqlValue> for Value {
    fn from(v: &SqlValue) -> Self {
        match v {
            SqlValue::Int(v) => Value::Int(*v),
            SqlValue::UInt(v) => i64::try_from(*v).map_or(Value::Float(*v as f64), Value::Int),
            SqlValue::Float(v) => Value::Float(*v),
            SqlValue::Bool(v) => Value::Int(*v as i64),
            other => Value::Str(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Var(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, Op, Box<Expr>),
    Range(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

/// A groovy-like inline expression, e.g. `ds${0..1}.t_order_${[0, 2]}` or
/// `t_order_${order_id % 4}`. Variables are bound at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineExpression {
    raw: String,
    segments: Vec<Segment>,
}

impl InlineExpression {
    pub fn parse(raw: &str) -> Result<Self, InlineError> {
        let mut segments = vec![];
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(raw) {
            let (whole, inner) = match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(inner)) => (whole, inner),
                _ => continue,
            };
            if whole.start() > last {
                segments.push(Segment::Text(raw[last..whole.start()].to_string()));
            }
            let expr = Parser::new(raw, inner.as_str())?.parse_top()?;
            segments.push(Segment::Expr(expr));
            last = whole.end();
        }

        if last < raw.len() {
            segments.push(Segment::Text(raw[last..].to_string()));
        }

        Ok(InlineExpression { raw: raw.to_string(), segments })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Evaluates with bound variables. Ranges and lists expand into the
    /// cartesian product of every segment.
    pub fn evaluate(&self, vars: &IndexMap<String, SqlValue>) -> Result<Vec<String>, InlineError> {
        let vars: IndexMap<String, Value> = vars.iter().map(|(k, v)| (k.to_ascii_lowercase(), Value::from(v))).collect();
        let parts = self
            .segments
            .iter()
            .map(|seg| match seg {
                Segment::Text(text) => Ok(vec![text.clone()]),
                Segment::Expr(expr) => {
                    Ok(eval(expr, &vars)?.into_iter().map(|v| v.to_string()).collect())
                }
            })
            .collect::<Result<Vec<Vec<String>>, InlineError>>()?;

        if parts.is_empty() {
            return Ok(vec![String::new()]);
        }

        Ok(parts.into_iter().multi_cartesian_product().map(|p| p.concat()).collect())
    }

    /// Evaluates to exactly one string, as sharding expressions must.
    pub fn evaluate_single(&self, vars: &IndexMap<String, SqlValue>) -> Result<String, InlineError> {
        let mut values = self.evaluate(vars)?;
        match values.len() {
            1 => Ok(values.remove(0)),
            _ => Err(InlineError::Syntax(self.raw.clone(), "expected a single value".to_string())),
        }
    }

    /// Variable names referenced by the expression.
    pub fn variables(&self) -> Vec<String> {
        fn collect(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Var(name) => out.push(name.clone()),
                Expr::Neg(e) => collect(e, out),
                Expr::Binary(a, _, b) | Expr::Range(a, b) => {
                    collect(a, out);
                    collect(b, out);
                }
                Expr::List(items) => items.iter().for_each(|e| collect(e, out)),
                Expr::Lit(_) => {}
            }
        }

        let mut out = vec![];
        for seg in self.segments.iter() {
            if let Segment::Expr(expr) = seg {
                collect(expr, &mut out);
            }
        }
        out.into_iter().unique().collect()
    }
}

/// Expands a comma separated list of inline expressions without variables.
pub fn expand(raw: &str) -> Result<Vec<String>, InlineError> {
    let mut result = vec![];
    for part in split_top_level(raw) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        result.extend(InlineExpression::parse(part)?.evaluate(&IndexMap::new())?);
    }
    Ok(result)
}

fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in raw.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&raw[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn eval(expr: &Expr, vars: &IndexMap<String, Value>) -> Result<Vec<Value>, InlineError> {
    match expr {
        Expr::Range(lo, hi) => {
            let lo = eval_one(lo, vars)?;
            let hi = eval_one(hi, vars)?;
            let (lo, hi) = (as_int(&lo)?, as_int(&hi)?);
            Ok((lo..=hi).map(Value::Int).collect())
        }
        Expr::List(items) => {
            let mut out = vec![];
            for item in items {
                out.extend(eval(item, vars)?);
            }
            Ok(out)
        }
        _ => Ok(vec![eval_one(expr, vars)?]),
    }
}

fn eval_one(expr: &Expr, vars: &IndexMap<String, Value>) -> Result<Value, InlineError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Var(name) => vars
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| InlineError::UnknownVariable(name.clone())),
        Expr::Neg(e) => match eval_one(e, vars)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Str(v) => Err(InlineError::NotNumeric(v)),
        },
        Expr::Binary(a, op, b) => apply(eval_one(a, vars)?, *op, eval_one(b, vars)?),
        Expr::Range(..) | Expr::List(_) => {
            Err(InlineError::Syntax(format!("{:?}", expr), "unexpected range".to_string()))
        }
    }
}

fn as_int(v: &Value) -> Result<i64, InlineError> {
    match v {
        Value::Int(v) => Ok(*v),
        Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        Value::Str(s) => s.trim().parse().map_err(|_| InlineError::NotNumeric(s.clone())),
        other => Err(InlineError::NotNumeric(other.to_string())),
    }
}

fn as_float(v: &Value) -> Result<f64, InlineError> {
    match v {
        Value::Int(v) => Ok(*v as f64),
        Value::Float(v) => Ok(*v),
        Value::Str(s) => s.trim().parse().map_err(|_| InlineError::NotNumeric(s.clone())),
    }
}

fn numeric(v: Value) -> Result<Value, InlineError> {
    match v {
        Value::Str(s) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| InlineError::NotNumeric(s)),
        },
        other => Ok(other),
    }
}

fn apply(a: Value, op: Op, b: Value) -> Result<Value, InlineError> {
    if op == Op::Add {
        match (&a, &b) {
            (Value::Str(x), _) => return Ok(Value::Str(format!("{}{}", x, b))),
            (_, Value::Str(y)) => return Ok(Value::Str(format!("{}{}", a, y))),
            _ => {}
        }
    }

    let (a, b) = (numeric(a)?, numeric(b)?);
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            let v = match op {
                Op::Add => x.wrapping_add(y),
                Op::Sub => x.wrapping_sub(y),
                Op::Mul => x.wrapping_mul(y),
                Op::Div | Op::Rem if y == 0 => return Err(InlineError::DivideByZero),
                Op::Div => x.wrapping_div(y),
                Op::Rem => x.wrapping_rem(y),
            };
            Ok(Value::Int(v))
        }
        _ => {
            let (x, y) = (as_float(&a)?, as_float(&b)?);
            let v = match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div | Op::Rem if y == 0.0 => return Err(InlineError::DivideByZero),
                Op::Div => x / y,
                Op::Rem => x % y,
            };
            Ok(Value::Float(v))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(Op),
    DotDot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

struct Parser<'a> {
    raw: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(raw: &'a str, input: &str) -> Result<Self, InlineError> {
        Ok(Parser { raw, tokens: tokenize(raw, input)?, pos: 0 })
    }

    fn err(&self, msg: &str) -> InlineError {
        InlineError::Syntax(self.raw.to_string(), msg.to_string())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), InlineError> {
        match self.bump() {
            Some(tok) if tok == expected => Ok(()),
            _ => Err(self.err(&format!("expected {:?}", expected))),
        }
    }

    fn parse_top(mut self) -> Result<Expr, InlineError> {
        let expr = self.parse_item()?;
        if self.pos != self.tokens.len() {
            return Err(self.err("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn parse_item(&mut self) -> Result<Expr, InlineError> {
        if self.peek() == Some(&Token::LBracket) {
            self.bump();
            let mut items = vec![];
            if self.peek() != Some(&Token::RBracket) {
                loop {
                    items.push(self.parse_item()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.bump();
                        continue;
                    }
                    break;
                }
            }
            self.expect(Token::RBracket)?;
            return Ok(Expr::List(items));
        }

        let lhs = self.parse_additive()?;
        if self.peek() == Some(&Token::DotDot) {
            self.bump();
            let rhs = self.parse_additive()?;
            return Ok(Expr::Range(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, InlineError> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(Token::Op(op @ (Op::Add | Op::Sub))) = self.peek().cloned() {
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, InlineError> {
        let mut lhs = self.parse_unary()?;
        while let Some(Token::Op(op @ (Op::Mul | Op::Div | Op::Rem))) = self.peek().cloned() {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, InlineError> {
        if self.peek() == Some(&Token::Op(Op::Sub)) {
            self.bump();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, InlineError> {
        match self.bump() {
            Some(Token::Int(v)) => Ok(Expr::Lit(Value::Int(v))),
            Some(Token::Float(v)) => Ok(Expr::Lit(Value::Float(v))),
            Some(Token::Str(v)) => Ok(Expr::Lit(Value::Str(v))),
            Some(Token::Ident(v)) => Ok(Expr::Var(v)),
            Some(Token::LParen) => {
                let expr = self.parse_additive()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => Err(self.err("expected a value")),
        }
    }
}

fn tokenize(raw: &str, input: &str) -> Result<Vec<Token>, InlineError> {
    let err = |msg: &str| InlineError::Syntax(raw.to_string(), msg.to_string());
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = vec![];
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let single = match c {
            '+' => Some(Token::Op(Op::Add)),
            '-' => Some(Token::Op(Op::Sub)),
            '*' => Some(Token::Op(Op::Mul)),
            '/' => Some(Token::Op(Op::Div)),
            '%' => Some(Token::Op(Op::Rem)),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push(tok);
            i += 1;
            continue;
        }

        match c {
            ' ' | '\t' => i += 1,
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| err("unterminated string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = chars.get(i) == Some(&'.')
                    && chars.get(i + 1).map_or(false, |ch| ch.is_ascii_digit());
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::Float(text.parse().map_err(|_| err("bad number"))?));
                } else {
                    let text: String = chars[start..i].iter().collect();
                    tokens.push(Token::Int(text.parse().map_err(|_| err("bad number"))?));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(err(&format!("unexpected character {:?}", c))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod test {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn test_expand_data_nodes() {
        assert_eq!(
            expand("ds${0..1}.t_order_${0..1}").unwrap(),
            vec!["ds0.t_order_0", "ds0.t_order_1", "ds1.t_order_0", "ds1.t_order_1"]
        );
        assert_eq!(
            expand("ds0.t_user, ds${['a', 'b']}.t_user").unwrap(),
            vec!["ds0.t_user", "dsa.t_user", "dsb.t_user"]
        );
        assert_eq!(expand("ds$->{[0, 2]}.t").unwrap(), vec!["ds0.t", "ds2.t"]);
    }

    #[test]
    fn test_evaluate_sharding_expression() {
        let expr = InlineExpression::parse("t_order_${order_id % 4}").unwrap();
        let mut vars = IndexMap::new();
        vars.insert("order_id".to_string(), SqlValue::Int(10));
        assert_eq!(expr.evaluate_single(&vars).unwrap(), "t_order_2");
        assert_eq!(expr.variables(), vec!["order_id"]);

        let expr = InlineExpression::parse("ds${(user_id + 1) * 2 % 3}").unwrap();
        let mut vars = IndexMap::new();
        vars.insert("USER_ID".to_string(), SqlValue::Int(4));
        assert_eq!(expr.evaluate_single(&vars).unwrap(), "ds1");

        let expr = InlineExpression::parse("t_${region + '_' + id}").unwrap();
        let mut vars = IndexMap::new();
        vars.insert("region".to_string(), SqlValue::from("eu"));
        vars.insert("id".to_string(), SqlValue::Int(3));
        assert_eq!(expr.evaluate_single(&vars).unwrap(), "t_eu_3");
    }

    #[test]
    fn test_evaluate_errors() {
        let expr = InlineExpression::parse("t_${id % 0}").unwrap();
        let mut vars = IndexMap::new();
        vars.insert("id".to_string(), SqlValue::Int(1));
        assert_eq!(expr.evaluate(&vars), Err(InlineError::DivideByZero));
        assert_eq!(expr.evaluate(&IndexMap::new()), Err(InlineError::UnknownVariable("id".to_string())));
        assert!(InlineExpression::parse("t_${id %}").is_err());
    }
}
