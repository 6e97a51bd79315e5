//! Hardened AST walker for pipeline edge conditions.
//!
//! Conditions are parsed from user-supplied pipeline configuration, so
//! the restricted grammar itself is the security boundary: this module
//! supports only literals, variable references, comparisons, boolean
//! and arithmetic operators, unary operators and the `x if p else y`
//! ternary. Attribute access, function calls, subscripting, assignment,
//! imports, comprehensions and lambdas are rejected by construction —
//! the grammar below has no production for any of them, so any such
//! input either fails to tokenize into a complete expression or leaves
//! unconsumed trailing tokens, which `parse` reports as an error without
//! ever invoking an evaluator on it.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::None => false,
            Value::List(v) | Value::Tuple(v) | Value::Set(v) => !v.is_empty(),
            Value::Dict(v) => !v.is_empty(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConditionError {
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("type error: {0}")]
    TypeError(String),
    #[error("unsupported construct: {0}")]
    Unsupported(String),
}

type CResult<T> = std::result::Result<T, ConditionError>;

// ---------------------------------------------------------------- lexer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn tokenize(src: &str) -> CResult<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => { toks.push(Tok::LParen); i += 1; }
            ')' => { toks.push(Tok::RParen); i += 1; }
            '[' => { toks.push(Tok::LBracket); i += 1; }
            ']' => { toks.push(Tok::RBracket); i += 1; }
            '{' => { toks.push(Tok::LBrace); i += 1; }
            '}' => { toks.push(Tok::RBrace); i += 1; }
            ',' => { toks.push(Tok::Comma); i += 1; }
            ':' => { toks.push(Tok::Colon); i += 1; }
            '.' => { toks.push(Tok::Dot); i += 1; }
            '+' => { toks.push(Tok::Plus); i += 1; }
            '-' => { toks.push(Tok::Minus); i += 1; }
            '*' => { toks.push(Tok::Star); i += 1; }
            '/' => { toks.push(Tok::Slash); i += 1; }
            '%' => { toks.push(Tok::Percent); i += 1; }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Eq);
                    i += 2;
                } else {
                    toks.push(Tok::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    return Err(ConditionError::UnexpectedToken("!".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err(ConditionError::UnexpectedEnd);
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ConditionError::UnexpectedToken(text.clone()))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                toks.push(Tok::Ident(text));
            }
            other => return Err(ConditionError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(toks)
}

// --------------------------------------------------------------- parser
//
// Precedence, low to high:
//   ternary -> or_expr ('if' or_expr 'else' ternary)?
//   or_expr -> and_expr ('or' and_expr)*
//   and_expr -> not_expr ('and' not_expr)*
//   not_expr -> 'not' not_expr | comparison
//   comparison -> arith (cmp_op arith)?
//   arith -> term (('+'|'-') term)*
//   term -> unary (('*'|'/'|'%') unary)*
//   unary -> ('-'|'+') unary | primary
//   primary -> literal | ident | '(' expr [',' expr]* ')' | '[' ... ']' | '{' ... '}'

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Var(String),
    Unary(UnOp, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    BoolOp(BoolOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
}

#[derive(Debug, Clone, Copy)]
enum UnOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Is,
    IsNot,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy)]
enum BoolOp {
    And,
    Or,
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn is_ident(&self, s: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(id)) if id == s)
    }

    fn eat_ident(&mut self, s: &str) -> bool {
        if self.is_ident(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok) -> CResult<()> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(ConditionError::UnexpectedToken(t.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_ternary(&mut self) -> CResult<Expr> {
        let body = self.parse_or()?;
        if self.eat_ident("if") {
            let cond = self.parse_or()?;
            if !self.eat_ident("else") {
                return Err(ConditionError::UnexpectedEnd);
            }
            let alt = self.parse_ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(body), Box::new(alt)));
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_ident("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::BoolOp(BoolOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_ident("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::BoolOp(BoolOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> CResult<Expr> {
        if self.eat_ident("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> CResult<Expr> {
        let lhs = self.parse_arith()?;
        let op = match self.peek() {
            Some(Tok::Eq) => { self.pos += 1; Some(BinOp::Eq) }
            Some(Tok::Ne) => { self.pos += 1; Some(BinOp::Ne) }
            Some(Tok::Lt) => { self.pos += 1; Some(BinOp::Lt) }
            Some(Tok::Le) => { self.pos += 1; Some(BinOp::Le) }
            Some(Tok::Gt) => { self.pos += 1; Some(BinOp::Gt) }
            Some(Tok::Ge) => { self.pos += 1; Some(BinOp::Ge) }
            Some(Tok::Ident(id)) if id == "is" => {
                self.pos += 1;
                if self.eat_ident("not") {
                    Some(BinOp::IsNot)
                } else {
                    Some(BinOp::Is)
                }
            }
            Some(Tok::Ident(id)) if id == "in" => { self.pos += 1; Some(BinOp::In) }
            Some(Tok::Ident(id)) if id == "not" => {
                // lookahead for "not in"
                if matches!(self.toks.get(self.pos + 1), Some(Tok::Ident(id2)) if id2 == "in") {
                    self.pos += 2;
                    Some(BinOp::NotIn)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(op) = op {
            let rhs = self.parse_arith()?;
            return Ok(Expr::Bin(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_arith(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Tok::Plus) => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = Expr::Bin(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Some(Tok::Minus) => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    lhs = Expr::Bin(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Tok::Star) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Some(Tok::Slash) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                Some(Tok::Percent) => {
                    self.pos += 1;
                    let rhs = self.parse_unary()?;
                    lhs = Expr::Bin(BinOp::Mod, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> CResult<Expr> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Some(Tok::Plus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Pos, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> CResult<Expr> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(Expr::Lit(Value::Num(n))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Tok::Ident(id)) => match id.as_str() {
                "True" => Ok(Expr::Lit(Value::Bool(true))),
                "False" => Ok(Expr::Lit(Value::Bool(false))),
                "None" => Ok(Expr::Lit(Value::None)),
                // Keywords that must never surface as bare identifiers here.
                "lambda" | "import" | "for" | "def" | "class" | "yield" => {
                    Err(ConditionError::Unsupported(id))
                }
                _ => Ok(Expr::Var(id)),
            },
            Some(Tok::LParen) => {
                if matches!(self.peek(), Some(Tok::RParen)) {
                    self.pos += 1;
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_ternary()?;
                if matches!(self.peek(), Some(Tok::Comma)) {
                    let mut items = vec![first];
                    while matches!(self.peek(), Some(Tok::Comma)) {
                        self.pos += 1;
                        if matches!(self.peek(), Some(Tok::RParen)) {
                            break;
                        }
                        items.push(self.parse_ternary()?);
                    }
                    self.expect(Tok::RParen)?;
                    Ok(Expr::Tuple(items))
                } else {
                    self.expect(Tok::RParen)?;
                    Ok(first)
                }
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Some(Tok::RBracket)) {
                    items.push(self.parse_ternary()?);
                    while matches!(self.peek(), Some(Tok::Comma)) {
                        self.pos += 1;
                        if matches!(self.peek(), Some(Tok::RBracket)) {
                            break;
                        }
                        items.push(self.parse_ternary()?);
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Tok::LBrace) => {
                if matches!(self.peek(), Some(Tok::RBrace)) {
                    self.pos += 1;
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first_key = self.parse_ternary()?;
                if matches!(self.peek(), Some(Tok::Colon)) {
                    self.pos += 1;
                    let first_val = self.parse_ternary()?;
                    let mut pairs = vec![(first_key, first_val)];
                    while matches!(self.peek(), Some(Tok::Comma)) {
                        self.pos += 1;
                        if matches!(self.peek(), Some(Tok::RBrace)) {
                            break;
                        }
                        let k = self.parse_ternary()?;
                        self.expect(Tok::Colon)?;
                        let v = self.parse_ternary()?;
                        pairs.push((k, v));
                    }
                    self.expect(Tok::RBrace)?;
                    Ok(Expr::Dict(pairs))
                } else {
                    let mut items = vec![first_key];
                    while matches!(self.peek(), Some(Tok::Comma)) {
                        self.pos += 1;
                        if matches!(self.peek(), Some(Tok::RBrace)) {
                            break;
                        }
                        items.push(self.parse_ternary()?);
                    }
                    self.expect(Tok::RBrace)?;
                    Ok(Expr::Set(items))
                }
            }
            Some(other) => Err(ConditionError::UnexpectedToken(other.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}

fn parse(src: &str) -> CResult<Expr> {
    let toks = tokenize(src)?;
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.parse_ternary()?;
    if parser.pos != parser.toks.len() {
        let leftover = &parser.toks[parser.pos];
        return Err(ConditionError::UnexpectedToken(leftover.to_string()));
    }
    Ok(expr)
}

fn eval_expr(expr: &Expr, ns: &HashMap<String, Value>) -> CResult<Value> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Var(name) => ns
            .get(name)
            .cloned()
            .ok_or_else(|| ConditionError::UnknownVariable(name.clone())),
        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ns)?;
            match (op, &v) {
                (UnOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
                (UnOp::Pos, Value::Num(n)) => Ok(Value::Num(*n)),
                _ => Err(ConditionError::TypeError("unary op on non-number".to_string())),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval_expr(inner, ns)?.truthy())),
        Expr::BoolOp(op, lhs, rhs) => {
            let l = eval_expr(lhs, ns)?;
            match op {
                BoolOp::And => {
                    if !l.truthy() {
                        Ok(l)
                    } else {
                        eval_expr(rhs, ns)
                    }
                }
                BoolOp::Or => {
                    if l.truthy() {
                        Ok(l)
                    } else {
                        eval_expr(rhs, ns)
                    }
                }
            }
        }
        Expr::Ternary(cond, body, alt) => {
            if eval_expr(cond, ns)?.truthy() {
                eval_expr(body, ns)
            } else {
                eval_expr(alt, ns)
            }
        }
        Expr::Bin(op, lhs, rhs) => eval_bin(*op, eval_expr(lhs, ns)?, eval_expr(rhs, ns)?),
        Expr::List(items) => Ok(Value::List(eval_all(items, ns)?)),
        Expr::Tuple(items) => Ok(Value::Tuple(eval_all(items, ns)?)),
        Expr::Set(items) => Ok(Value::Set(eval_all(items, ns)?)),
        Expr::Dict(pairs) => {
            let mut out = Vec::new();
            for (k, v) in pairs {
                out.push((eval_expr(k, ns)?, eval_expr(v, ns)?));
            }
            Ok(Value::Dict(out))
        }
    }
}

fn eval_all(items: &[Expr], ns: &HashMap<String, Value>) -> CResult<Vec<Value>> {
    items.iter().map(|e| eval_expr(e, ns)).collect()
}

fn numeric(v: &Value) -> CResult<f64> {
    match v {
        Value::Num(n) => Ok(*n),
        _ => Err(ConditionError::TypeError("expected number".to_string())),
    }
}

fn eval_bin(op: BinOp, l: Value, r: Value) -> CResult<Value> {
    use BinOp::*;
    match op {
        Add => match (&l, &r) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => Err(ConditionError::TypeError("invalid operands for +".to_string())),
        },
        Sub => Ok(Value::Num(numeric(&l)? - numeric(&r)?)),
        Mul => Ok(Value::Num(numeric(&l)? * numeric(&r)?)),
        Div => {
            let d = numeric(&r)?;
            if d == 0.0 {
                return Err(ConditionError::TypeError("division by zero".to_string()));
            }
            Ok(Value::Num(numeric(&l)? / d))
        }
        Mod => {
            let d = numeric(&r)?;
            if d == 0.0 {
                return Err(ConditionError::TypeError("modulo by zero".to_string()));
            }
            Ok(Value::Num(numeric(&l)? % d))
        }
        Eq | Is => Ok(Value::Bool(values_equal(&l, &r))),
        Ne | IsNot => Ok(Value::Bool(!values_equal(&l, &r))),
        Lt | Le | Gt | Ge => compare_ordered(op, &l, &r),
        In => Ok(Value::Bool(membership(&l, &r)?)),
        NotIn => Ok(Value::Bool(!membership(&l, &r)?)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn compare_ordered(op: BinOp, l: &Value, r: &Value) -> CResult<Value> {
    let ord = match (l, r) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    }
    .ok_or_else(|| ConditionError::TypeError("uncomparable operands".to_string()))?;
    let b = match op {
        BinOp::Lt => ord.is_lt(),
        BinOp::Le => ord.is_le(),
        BinOp::Gt => ord.is_gt(),
        BinOp::Ge => ord.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(b))
}

fn membership(needle: &Value, haystack: &Value) -> CResult<bool> {
    match haystack {
        Value::List(v) | Value::Tuple(v) | Value::Set(v) => Ok(v.contains(needle)),
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(n.as_str())),
            _ => Err(ConditionError::TypeError("'in' on string requires a string".to_string())),
        },
        _ => Err(ConditionError::TypeError("right side of 'in' is not iterable".to_string())),
    }
}

/// Evaluates `condition` against `namespace`. An empty or whitespace
/// condition is equivalent to `true`.
pub fn evaluate(condition: &str, namespace: &HashMap<String, Value>) -> CResult<bool> {
    if condition.trim().is_empty() {
        return Ok(true);
    }
    let expr = parse(condition)?;
    Ok(eval_expr(&expr, namespace)?.truthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns() -> HashMap<String, Value> {
        let mut m = HashMap::new();
        m.insert("subtitle_valid".to_string(), Value::Bool(true));
        m.insert("subtitle_coverage_ratio".to_string(), Value::Num(0.8));
        m.insert("video_duration".to_string(), Value::Num(120.0));
        m
    }

    #[test]
    fn empty_condition_is_true() {
        assert!(evaluate("", &ns()).unwrap());
        assert!(evaluate("   ", &ns()).unwrap());
    }

    #[test]
    fn simple_comparison() {
        assert!(evaluate("subtitle_coverage_ratio >= 0.6", &ns()).unwrap());
        assert!(!evaluate("subtitle_coverage_ratio >= 0.9", &ns()).unwrap());
    }

    #[test]
    fn boolean_and_or_not() {
        assert!(evaluate("subtitle_valid and subtitle_coverage_ratio > 0.5", &ns()).unwrap());
        assert!(evaluate("not (subtitle_coverage_ratio > 0.99)", &ns()).unwrap());
    }

    #[test]
    fn ternary_expression() {
        let v = evaluate("1 if subtitle_valid else 0", &ns()).unwrap();
        assert!(v);
    }

    #[test]
    fn arithmetic_and_membership() {
        assert!(evaluate("video_duration / 2 == 60", &ns()).unwrap());
        assert!(evaluate("1 in [1, 2, 3]", &ns()).unwrap());
        assert!(!evaluate("4 in [1, 2, 3]", &ns()).unwrap());
    }

    #[test]
    fn unknown_variable_fails() {
        assert!(evaluate("nonexistent_var == 1", &ns()).is_err());
    }

    #[test]
    fn function_call_is_rejected() {
        assert!(evaluate("len(subtitle_valid)", &ns()).is_err());
    }

    #[test]
    fn attribute_access_is_rejected() {
        assert!(evaluate("subtitle_valid.foo", &ns()).is_err());
    }

    #[test]
    fn subscripting_is_rejected() {
        assert!(evaluate("subtitle_valid[0]", &ns()).is_err());
    }

    #[test]
    fn assignment_is_rejected() {
        assert!(evaluate("subtitle_valid = True", &ns()).is_err());
    }

    #[test]
    fn import_is_rejected() {
        assert!(evaluate("import os", &ns()).is_err());
    }

    #[test]
    fn lambda_is_rejected() {
        assert!(evaluate("lambda x: x", &ns()).is_err());
    }

    #[test]
    fn comprehension_is_rejected() {
        assert!(evaluate("[x for x in [1,2,3]]", &ns()).is_err());
    }

    #[test]
    fn rejection_never_partially_evaluates() {
        // A side-effect-free sanity check: a rejected expression must
        // surface as an error, never as a truthy/falsy value.
        let result = evaluate("os.system('x')", &ns());
        assert!(result.is_err());
    }
}
