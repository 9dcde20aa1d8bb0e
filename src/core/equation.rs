//! Measurement equations for derived quantities
//!
//! A small expression language: numbers, variables, `+ - * / ^`, unary
//! minus, parentheses, the constants `pi` and `e`, and a fixed set of
//! one-argument functions. Expressions can be evaluated against a scope
//! and differentiated symbolically to obtain sensitivity coefficients.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EquationError {
    #[error("equation syntax error: {message}")]
    #[diagnostic(code(tmt::equation::syntax))]
    Syntax {
        #[source_code]
        src: NamedSource<String>,

        #[label("{message}")]
        span: SourceSpan,

        message: String,
    },

    #[error("equation is empty")]
    #[diagnostic(code(tmt::equation::empty))]
    Empty,

    #[error("variable '{0}' is not mapped to a TMDE input type")]
    #[diagnostic(
        code(tmt::equation::unmapped),
        help("add the symbol under measurement.variables with the TMDE variable type it represents")
    )]
    UnmappedVariable(String),

    #[error("variable '{0}' has no value in scope")]
    #[diagnostic(code(tmt::equation::unbound))]
    UnboundVariable(String),

    #[error("'{expr}' evaluates to a non-finite value")]
    #[diagnostic(code(tmt::equation::non_finite))]
    NonFinite { expr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
            BinOp::Pow => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqrt,
    Abs,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "exp" => Func::Exp,
            "ln" | "log" => Func::Ln,
            "log10" => Func::Log10,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
            Func::Exp => "exp",
            Func::Ln => "ln",
            Func::Log10 => "log10",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
        }
    }

    fn apply(&self, x: f64) -> f64 {
        match self {
            Func::Sqrt => x.sqrt(),
            Func::Abs => x.abs(),
            Func::Exp => x.exp(),
            Func::Ln => x.ln(),
            Func::Log10 => x.log10(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Sinh => x.sinh(),
            Func::Cosh => x.cosh(),
            Func::Tanh => x.tanh(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Pi,
    E,
}

impl Constant {
    fn value(&self) -> f64 {
        match self {
            Constant::Pi => std::f64::consts::PI,
            Constant::E => std::f64::consts::E,
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Const(Constant),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

/// A parsed measurement equation
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    /// Left-hand side symbol, if the source had one (`P = V * I`)
    pub output: Option<String>,
    pub expr: Expr,
}

impl Equation {
    /// Parse `lhs = rhs` or a bare expression
    pub fn parse(source: &str) -> Result<Self, EquationError> {
        let (output, rhs, offset) = match source.split_once('=') {
            Some((lhs, rhs)) => {
                let lhs = lhs.trim();
                let output = (!lhs.is_empty()).then(|| lhs.to_string());
                (output, rhs, source.len() - rhs.len())
            }
            None => (None, source, 0),
        };
        if rhs.trim().is_empty() {
            return Err(EquationError::Empty);
        }
        let expr = Parser::new(source, rhs, offset)?.parse()?;
        Ok(Self { output, expr })
    }

    pub fn variables(&self) -> BTreeSet<String> {
        self.expr.variables()
    }

    pub fn evaluate(&self, scope: &HashMap<String, f64>) -> Result<f64, EquationError> {
        let value = self.expr.eval(scope)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EquationError::NonFinite {
                expr: self.expr.to_string(),
            })
        }
    }

    /// ∂f/∂`symbol` at `scope`
    ///
    /// Evaluates the symbolic derivative and falls back to a central
    /// difference when that is undefined at the point (e.g. `abs` at 0).
    pub fn sensitivity(
        &self,
        symbol: &str,
        scope: &HashMap<String, f64>,
    ) -> Result<f64, EquationError> {
        let symbolic = self.expr.derivative(symbol).eval(scope)?;
        if symbolic.is_finite() {
            return Ok(symbolic);
        }
        tracing::debug!(symbol, "symbolic derivative undefined, using central difference");
        self.central_difference(symbol, scope)
    }

    fn central_difference(
        &self,
        symbol: &str,
        scope: &HashMap<String, f64>,
    ) -> Result<f64, EquationError> {
        let x = *scope
            .get(symbol)
            .ok_or_else(|| EquationError::UnboundVariable(symbol.to_string()))?;
        let h = if x == 0.0 { 1e-5 } else { 1e-5 * x.abs() };
        let mut shifted = scope.clone();
        shifted.insert(symbol.to_string(), x + h);
        let forward = self.expr.eval(&shifted)?;
        shifted.insert(symbol.to_string(), x - h);
        let backward = self.expr.eval(&shifted)?;
        let slope = (forward - backward) / (2.0 * h);
        if slope.is_finite() {
            Ok(slope)
        } else {
            Err(EquationError::NonFinite {
                expr: format!("d/d{} {}", symbol, self.expr),
            })
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.output {
            Some(ref out) => write!(f, "{} = {}", out, self.expr),
            None => write!(f, "{}", self.expr),
        }
    }
}

impl Expr {
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) | Expr::Const(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Neg(a) | Expr::Call(_, a) => a.collect_variables(out),
            Expr::Binary(_, a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
        }
    }

    fn depends_on(&self, symbol: &str) -> bool {
        match self {
            Expr::Num(_) | Expr::Const(_) => false,
            Expr::Var(name) => name == symbol,
            Expr::Neg(a) | Expr::Call(_, a) => a.depends_on(symbol),
            Expr::Binary(_, a, b) => a.depends_on(symbol) || b.depends_on(symbol),
        }
    }

    /// Evaluate; non-finite intermediate values are returned, not rejected
    pub fn eval(&self, scope: &HashMap<String, f64>) -> Result<f64, EquationError> {
        Ok(match self {
            Expr::Num(v) => *v,
            Expr::Const(c) => c.value(),
            Expr::Var(name) => *scope
                .get(name)
                .ok_or_else(|| EquationError::UnboundVariable(name.clone()))?,
            Expr::Neg(a) => -a.eval(scope)?,
            Expr::Call(func, a) => func.apply(a.eval(scope)?),
            Expr::Binary(op, a, b) => {
                let (x, y) = (a.eval(scope)?, b.eval(scope)?);
                match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div => x / y,
                    BinOp::Pow => x.powf(y),
                }
            }
        })
    }

    /// Symbolic derivative with respect to `symbol`
    pub fn derivative(&self, symbol: &str) -> Expr {
        match self {
            Expr::Num(_) | Expr::Const(_) => Expr::Num(0.0),
            Expr::Var(name) => Expr::Num(if name == symbol { 1.0 } else { 0.0 }),
            Expr::Neg(a) => neg(a.derivative(symbol)),
            Expr::Binary(op, a, b) => {
                let (da, db) = (a.derivative(symbol), b.derivative(symbol));
                let (a, b) = (a.as_ref().clone(), b.as_ref().clone());
                match op {
                    BinOp::Add => add(da, db),
                    BinOp::Sub => sub(da, db),
                    BinOp::Mul => add(mul(da, b), mul(a, db)),
                    BinOp::Div => div(
                        sub(mul(da, b.clone()), mul(a, db)),
                        pow(b, Expr::Num(2.0)),
                    ),
                    BinOp::Pow => {
                        if !b.depends_on(symbol) {
                            mul(mul(b.clone(), pow(a, sub(b, Expr::Num(1.0)))), da)
                        } else if !a.depends_on(symbol) {
                            mul(mul(pow(a.clone(), b), call(Func::Ln, a)), db)
                        } else {
                            mul(
                                pow(a.clone(), b.clone()),
                                add(
                                    mul(db, call(Func::Ln, a.clone())),
                                    div(mul(b, da), a),
                                ),
                            )
                        }
                    }
                }
            }
            Expr::Call(func, inner) => {
                let du = inner.derivative(symbol);
                let u = inner.as_ref().clone();
                let outer = match func {
                    Func::Sqrt => div(Expr::Num(0.5), call(Func::Sqrt, u)),
                    Func::Abs => div(u.clone(), call(Func::Abs, u)),
                    Func::Exp => call(Func::Exp, u),
                    Func::Ln => div(Expr::Num(1.0), u),
                    Func::Log10 => div(
                        Expr::Num(1.0),
                        mul(u, Expr::Num(std::f64::consts::LN_10)),
                    ),
                    Func::Sin => call(Func::Cos, u),
                    Func::Cos => neg(call(Func::Sin, u)),
                    Func::Tan => div(Expr::Num(1.0), pow(call(Func::Cos, u), Expr::Num(2.0))),
                    Func::Asin => div(
                        Expr::Num(1.0),
                        call(Func::Sqrt, sub(Expr::Num(1.0), pow(u, Expr::Num(2.0)))),
                    ),
                    Func::Acos => neg(div(
                        Expr::Num(1.0),
                        call(Func::Sqrt, sub(Expr::Num(1.0), pow(u, Expr::Num(2.0)))),
                    )),
                    Func::Atan => div(Expr::Num(1.0), add(Expr::Num(1.0), pow(u, Expr::Num(2.0)))),
                    Func::Sinh => call(Func::Cosh, u),
                    Func::Cosh => call(Func::Sinh, u),
                    Func::Tanh => sub(Expr::Num(1.0), pow(call(Func::Tanh, u), Expr::Num(2.0))),
                };
                mul(outer, du)
            }
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Neg(_) => 3,
            Expr::Num(v) if *v < 0.0 => 3,
            _ => 5,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{}", v),
            Expr::Const(Constant::Pi) => write!(f, "pi"),
            Expr::Const(Constant::E) => write!(f, "e"),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Call(func, a) => write!(f, "{}({})", func.name(), a),
            Expr::Neg(a) => {
                if a.precedence() <= 3 {
                    write!(f, "-({})", a)
                } else {
                    write!(f, "-{}", a)
                }
            }
            Expr::Binary(op, a, b) => {
                let p = op.precedence();
                // Pow is right-associative, the others left-associative
                let (wrap_a, wrap_b) = match op {
                    BinOp::Pow => (a.precedence() <= p, b.precedence() < p),
                    BinOp::Sub | BinOp::Div => (a.precedence() < p, b.precedence() <= p),
                    _ => (a.precedence() < p, b.precedence() < p),
                };
                if wrap_a {
                    write!(f, "({})", a)?;
                } else {
                    write!(f, "{}", a)?;
                }
                write!(f, " {} ", op.symbol())?;
                if wrap_b {
                    write!(f, "({})", b)
                } else {
                    write!(f, "{}", b)
                }
            }
        }
    }
}

fn is_num(e: &Expr, v: f64) -> bool {
    matches!(e, Expr::Num(x) if *x == v)
}

fn neg(a: Expr) -> Expr {
    match a {
        Expr::Num(v) => Expr::Num(-v),
        Expr::Neg(inner) => *inner,
        other => Expr::Neg(Box::new(other)),
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x + y),
        (a, b) if is_num(&a, 0.0) => b,
        (a, b) if is_num(&b, 0.0) => a,
        (a, b) => Expr::Binary(BinOp::Add, Box::new(a), Box::new(b)),
    }
}

fn sub(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x - y),
        (a, b) if is_num(&b, 0.0) => a,
        (a, b) if is_num(&a, 0.0) => neg(b),
        (a, b) => Expr::Binary(BinOp::Sub, Box::new(a), Box::new(b)),
    }
}

fn mul(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => Expr::Num(x * y),
        (a, b) if is_num(&a, 0.0) || is_num(&b, 0.0) => Expr::Num(0.0),
        (a, b) if is_num(&a, 1.0) => b,
        (a, b) if is_num(&b, 1.0) => a,
        (a, b) => Expr::Binary(BinOp::Mul, Box::new(a), Box::new(b)),
    }
}

fn div(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (a, b) if is_num(&a, 0.0) && !is_num(&b, 0.0) => Expr::Num(0.0),
        (a, b) if is_num(&b, 1.0) => a,
        (a, b) => Expr::Binary(BinOp::Div, Box::new(a), Box::new(b)),
    }
}

fn pow(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (_, b) if is_num(&b, 0.0) => Expr::Num(1.0),
        (a, b) if is_num(&b, 1.0) => a,
        (a, b) => Expr::Binary(BinOp::Pow, Box::new(a), Box::new(b)),
    }
}

fn call(func: Func, a: Expr) -> Expr {
    Expr::Call(func, Box::new(a))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, usize, usize)>,
    pos: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    /// Tokenize `text`, which starts at byte `offset` of `source`
    fn new(source: &'a str, text: &str, offset: usize) -> Result<Self, EquationError> {
        let mut tokens = Vec::new();
        let mut chars = text.char_indices().peekable();

        while let Some(&(i, c)) = chars.peek() {
            let start = offset + i;
            if c.is_whitespace() {
                chars.next();
            } else if c.is_ascii_digit() || c == '.' {
                let mut end = i;
                let mut prev = ' ';
                while let Some(&(j, d)) = chars.peek() {
                    let exponent_sign = (d == '-' || d == '+') && (prev == 'e' || prev == 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        end = j + d.len_utf8();
                        prev = d;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &text[i..end];
                let value: f64 = literal.parse().map_err(|_| {
                    syntax(source, start, end - i, format!("invalid number '{}'", literal))
                })?;
                tokens.push((Token::Num(value), start, end - i));
            } else if c.is_alphabetic() || c == '_' {
                let mut end = i;
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(text[i..end].to_string()), start, end - i));
            } else {
                chars.next();
                let token = match c {
                    '+' | '-' | '/' | '^' => Token::Op(c),
                    '*' | '×' | '·' => {
                        if c == '*' && matches!(chars.peek(), Some(&(_, '*'))) {
                            chars.next();
                            Token::Op('^')
                        } else {
                            Token::Op('*')
                        }
                    }
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => {
                        return Err(syntax(
                            source,
                            start,
                            other.len_utf8(),
                            format!("unexpected character '{}'", other),
                        ))
                    }
                };
                tokens.push((token, start, c.len_utf8()));
            }
        }

        Ok(Self {
            source,
            tokens,
            pos: 0,
            end: source.len(),
        })
    }

    fn parse(mut self) -> Result<Expr, EquationError> {
        let expr = self.expression()?;
        if let Some((_, at, len)) = self.tokens.get(self.pos) {
            return Err(syntax(self.source, *at, *len, "unexpected token"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _, _)| t)
    }

    fn error_here(&self, message: &str) -> EquationError {
        match self.tokens.get(self.pos) {
            Some((_, at, len)) => syntax(self.source, *at, *len, message),
            None => syntax(self.source, self.end, 0, message),
        }
    }

    fn expression(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            let op = if op == '+' { BinOp::Add } else { BinOp::Sub };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EquationError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            let op = if op == '*' { BinOp::Mul } else { BinOp::Div };
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EquationError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, EquationError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, EquationError> {
        let Some((token, at, len)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error_here("expected a value"));
        };
        self.pos += 1;
        match token {
            Token::Num(v) => Ok(Expr::Num(v)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if let Some(Token::LParen) = self.peek() {
                    let func = Func::from_name(&name).ok_or_else(|| {
                        syntax(self.source, at, len, format!("unknown function '{}'", name))
                    })?;
                    self.pos += 1;
                    let arg = self.expression()?;
                    self.expect_rparen()?;
                    return Ok(Expr::Call(func, Box::new(arg)));
                }
                Ok(match name.as_str() {
                    "pi" => Expr::Const(Constant::Pi),
                    "e" => Expr::Const(Constant::E),
                    _ => Expr::Var(name),
                })
            }
            Token::RParen | Token::Op(_) => {
                self.pos -= 1;
                Err(self.error_here("expected a value"))
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<(), EquationError> {
        match self.peek() {
            Some(Token::RParen) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error_here("expected ')'")),
        }
    }
}

fn syntax(source: &str, at: usize, len: usize, message: impl Into<String>) -> EquationError {
    EquationError::Syntax {
        src: NamedSource::new("equation", source.to_string()),
        span: SourceSpan::from((at, len)),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_and_evaluate() {
        let eq = Equation::parse("P = V * I").unwrap();
        assert_eq!(eq.output.as_deref(), Some("P"));
        let vars: Vec<_> = eq.variables().into_iter().collect();
        assert_eq!(vars, vec!["I", "V"]);
        assert_eq!(eq.evaluate(&scope(&[("V", 10.0), ("I", 0.5)])).unwrap(), 5.0);
    }

    #[test]
    fn test_precedence_and_associativity() {
        let s = HashMap::new();
        assert_eq!(Equation::parse("2 + 3 * 4").unwrap().evaluate(&s).unwrap(), 14.0);
        assert_eq!(Equation::parse("2 ^ 3 ^ 2").unwrap().evaluate(&s).unwrap(), 512.0);
        assert_eq!(Equation::parse("-2 ^ 2").unwrap().evaluate(&s).unwrap(), -4.0);
        assert_eq!(Equation::parse("2 ^ -1").unwrap().evaluate(&s).unwrap(), 0.5);
        assert_eq!(Equation::parse("8 / 4 / 2").unwrap().evaluate(&s).unwrap(), 1.0);
        assert_eq!(Equation::parse("10 - 4 - 3").unwrap().evaluate(&s).unwrap(), 3.0);
        assert_eq!(Equation::parse("3 ** 2").unwrap().evaluate(&s).unwrap(), 9.0);
        assert!((Equation::parse("1.5e-3 * 2").unwrap().evaluate(&s).unwrap() - 3e-3).abs() < 1e-18);
    }

    #[test]
    fn test_functions_and_constants() {
        let s = HashMap::new();
        let v = Equation::parse("sqrt(16) + ln(e) + cos(pi)").unwrap().evaluate(&s).unwrap();
        assert!((v - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let err = Equation::parse("V * (I + 2").unwrap_err();
        assert!(matches!(err, EquationError::Syntax { .. }));

        match Equation::parse("R = V $ I").unwrap_err() {
            EquationError::Syntax { span, message, .. } => {
                assert_eq!(span.offset(), 6);
                assert!(message.contains('$'));
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(matches!(
            Equation::parse("foo(2)").unwrap_err(),
            EquationError::Syntax { .. }
        ));
        assert!(matches!(Equation::parse("P = ").unwrap_err(), EquationError::Empty));
    }

    #[test]
    fn test_unbound_variable() {
        let eq = Equation::parse("V / R").unwrap();
        assert!(matches!(
            eq.evaluate(&scope(&[("V", 1.0)])),
            Err(EquationError::UnboundVariable(_))
        ));
    }

    #[test]
    fn test_product_rule_sensitivities() {
        let eq = Equation::parse("V * I").unwrap();
        let s = scope(&[("V", 10.0), ("I", 0.5)]);
        assert_eq!(eq.sensitivity("V", &s).unwrap(), 0.5);
        assert_eq!(eq.sensitivity("I", &s).unwrap(), 10.0);
    }

    #[test]
    fn test_quotient_and_power_sensitivities() {
        let eq = Equation::parse("P = V^2 / R").unwrap();
        let s = scope(&[("V", 10.0), ("R", 50.0)]);
        assert!((eq.sensitivity("V", &s).unwrap() - 0.4).abs() < 1e-12);
        assert!((eq.sensitivity("R", &s).unwrap() + 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_symbolic_matches_central_difference() {
        let eq = Equation::parse("exp(a) * sin(b) + a ^ b + log10(a * b)").unwrap();
        let s = scope(&[("a", 1.3), ("b", 0.7)]);
        for symbol in ["a", "b"] {
            let symbolic = eq.sensitivity(symbol, &s).unwrap();
            let numeric = eq.central_difference(symbol, &s).unwrap();
            assert!((symbolic - numeric).abs() < 1e-6, "{}: {} vs {}", symbol, symbolic, numeric);
        }
    }

    #[test]
    fn test_abs_at_zero_falls_back_to_difference() {
        let eq = Equation::parse("abs(x) + 2 * x").unwrap();
        let slope = eq.sensitivity("x", &scope(&[("x", 0.0)])).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_derivative_simplifies() {
        let eq = Equation::parse("3 * x + y").unwrap();
        assert_eq!(eq.expr.derivative("x"), Expr::Num(3.0));
        assert_eq!(eq.expr.derivative("z"), Expr::Num(0.0));
    }

    #[test]
    fn test_display_round_trips_structure() {
        let eq = Equation::parse("(a - b) / (c * d) ^ 2").unwrap();
        let reparsed = Equation::parse(&eq.expr.to_string()).unwrap();
        assert_eq!(eq.expr, reparsed.expr);
    }
}
