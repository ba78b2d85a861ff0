//! Scalar expressions of one variable, compiled to bytecode.
//!
//! Hosts that cannot hand the integrator a native closure describe boundary
//! and forcing functions as text instead, e.g. `t + 10` or `5 * (abs(x) < 5)`.
//! The text is parsed into an [`Expr`] tree, compiled to [`Bytecode`] and run
//! on a small stack [`VM`]. Comparisons evaluate to `1` or `0` so indicator
//! functions can be written as products.

use crate::traits::ScalarFn;
use std::cell::RefCell;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("expected ')'")]
    MissingParen,
    #[error("unknown variable '{name}' (expected '{expected}')")]
    UnknownVariable { name: String, expected: String },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("empty expression")]
    Empty,
    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("expression has more than {limit} tokens")]
    TooLong { limit: usize },
}

/// Deepest nesting of parentheses, calls, unary minus and exponents accepted.
pub const MAX_DEPTH: usize = 64;
/// Longest token stream accepted. Also bounds the depth of left-associative chains.
pub const MAX_TOKENS: usize = 1024;

/// Built-in functions of one argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func {
    Sin,
    Cos,
    Exp,
    Abs,
    Sqrt,
    Ln,
    Tanh,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "exp" => Func::Exp,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "ln" => Func::Ln,
            "tanh" => Func::Tanh,
            _ => return None,
        })
    }

    fn apply(self, a: f64) -> f64 {
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Exp => a.exp(),
            Func::Abs => a.abs(),
            Func::Sqrt => a.sqrt(),
            Func::Ln => a.ln(),
            Func::Tanh => a.tanh(),
        }
    }
}

/// OpCodes for the stack VM. Binary ops pop `b` then `a` and push `a op b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// Pushes the bound variable.
    LoadVar,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Neg,
    Call(Func),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

pub struct VM;

impl VM {
    /// Runs `bytecode` with the bound variable set to `var`.
    ///
    /// Bytecode produced by [`Compiler`] never underflows the stack; a
    /// malformed hand-built program yields NaN rather than panicking.
    pub fn execute(bytecode: &Bytecode, var: f64, stack: &mut Vec<f64>) -> f64 {
        stack.clear();

        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(val) => val,
                OpCode::LoadVar => var,
                OpCode::Neg => -pop(stack),
                OpCode::Call(func) => func.apply(pop(stack)),
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        OpCode::Pow => a.powf(b),
                        OpCode::Lt => indicator(a < b),
                        OpCode::Le => indicator(a <= b),
                        OpCode::Gt => indicator(a > b),
                        OpCode::Ge => indicator(a >= b),
                        _ => f64::NAN,
                    }
                }
            };
            stack.push(value);
        }

        pop(stack)
    }
}

fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

fn indicator(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    fn opcode(self) -> OpCode {
        match self {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
            BinOp::Pow => OpCode::Pow,
            BinOp::Lt => OpCode::Lt,
            BinOp::Le => OpCode::Le,
            BinOp::Gt => OpCode::Gt,
            BinOp::Ge => OpCode::Ge,
        }
    }
}

/// Resolves names against the single bound variable and compiles to bytecode.
pub struct Compiler {
    var_name: String,
}

impl Compiler {
    pub fn new(var_name: &str) -> Self {
        Self {
            var_name: var_name.to_string(),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ExpressionError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) if *name == self.var_name => ops.push(OpCode::LoadVar),
            Expr::Variable(name) if name == "pi" => {
                ops.push(OpCode::LoadConst(std::f64::consts::PI))
            }
            Expr::Variable(name) => {
                return Err(ExpressionError::UnknownVariable {
                    name: name.clone(),
                    expected: self.var_name.clone(),
                })
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(op.opcode());
            }
            Expr::Neg(operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let func = Func::from_name(name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(func));
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(ExpressionError::TooLong { limit: MAX_TOKENS });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_comparison()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(format!("{token:?}"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // exponent: 1e-3, 2.5E4
            if matches!(chars.peek(), Some('e') | Some('E')) {
                let mut lookahead = chars.clone();
                lookahead.next();
                let signed = matches!(lookahead.peek(), Some('+') | Some('-'));
                if signed {
                    lookahead.next();
                }
                if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                    num_str.push('e');
                    chars.next();
                    if signed {
                        num_str.extend(chars.next());
                    }
                    while let Some(&d) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        num_str.push(d);
                        chars.next();
                    }
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '<' | '>' => {
                    let or_equal = chars.next_if_eq(&'=').is_some();
                    match (c, or_equal) {
                        ('<', false) => Token::Less,
                        ('<', true) => Token::LessEq,
                        ('>', false) => Token::Greater,
                        _ => Token::GreaterEq,
                    }
                }
                other => return Err(ExpressionError::UnexpectedChar(other)),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // comparison := additive (cmp additive)?
    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Less) => BinOp::Lt,
            Some(Token::LessEq) => BinOp::Le,
            Some(Token::Greater) => BinOp::Gt,
            Some(Token::GreaterEq) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.consume();
        let right = self.parse_additive()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Every recursive descent passes through here.
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExpressionError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let result = self.parse_unary_inner();
        self.depth -= 1;
        result
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(expr)));
        }
        self.parse_power()
    }

    // Right associative: 2^3^2 == 2^(3^2). Binds tighter than unary minus.
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_comparison()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_comparison()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ExpressionError::UnexpectedToken("end of input".to_string())),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ExpressionError::MissingParen),
        }
    }
}

/// A compiled expression usable wherever a [`ScalarFn`] is expected.
pub struct ExpressionFn {
    source: String,
    code: Bytecode,
    // Reused across calls so evaluation does not allocate. Makes the type !Sync.
    stack: RefCell<Vec<f64>>,
}

impl ExpressionFn {
    /// Parses and compiles `source` with `var_name` as the bound variable.
    pub fn compile(source: &str, var_name: &str) -> Result<Self, ExpressionError> {
        let expr = parse(source)?;
        let code = Compiler::new(var_name).compile(&expr)?;
        Ok(Self {
            source: source.to_string(),
            code,
            stack: RefCell::new(Vec::with_capacity(16)),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.code
    }
}

impl std::fmt::Debug for ExpressionFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionFn")
            .field("source", &self.source)
            .finish()
    }
}

impl ScalarFn for ExpressionFn {
    fn eval(&self, x: f64) -> f64 {
        VM::execute(&self.code, x, &mut self.stack.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn eval(source: &str, var: &str, at: f64) -> f64 {
        ExpressionFn::compile(source, var).unwrap().eval(at)
    }

    #[test]
    fn boundary_style_expressions() {
        assert_relative_eq!(eval("t", "t", 0.7), 0.7);
        assert_relative_eq!(eval("t + 10", "t", 0.7), 10.7);
        assert_relative_eq!(eval("2 * sin(pi * t)", "t", 0.5), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn indicator_forcing_expression() {
        let forcing = ExpressionFn::compile("5 * (abs(x) < 5)", "x").unwrap();
        assert_relative_eq!(forcing.eval(0.0), 5.0);
        assert_relative_eq!(forcing.eval(-4.5), 5.0);
        assert_relative_eq!(forcing.eval(5.0), 0.0);
        assert_relative_eq!(forcing.eval(-49.5), 0.0);
        assert_eq!(forcing.source(), "5 * (abs(x) < 5)");
    }

    #[test]
    fn precedence_and_associativity() {
        assert_relative_eq!(eval("1 + 2 * 3", "x", 0.0), 7.0);
        assert_relative_eq!(eval("(1 + 2) * 3", "x", 0.0), 9.0);
        assert_relative_eq!(eval("10 - 4 - 3", "x", 0.0), 3.0);
        assert_relative_eq!(eval("2 ^ 3 ^ 2", "x", 0.0), 512.0);
        assert_relative_eq!(eval("-x ^ 2", "x", 3.0), -9.0);
        assert_relative_eq!(eval("x < 1 + 1", "x", 1.5), 1.0);
        assert_relative_eq!(eval("x >= 2", "x", 2.0), 1.0);
        assert_relative_eq!(eval("x > 2", "x", 2.0), 0.0);
        assert_relative_eq!(eval("x <= -1", "x", -1.0), 1.0);
    }

    #[test]
    fn scientific_literals() {
        assert_relative_eq!(eval("1e-3", "x", 0.0), 0.001);
        assert_relative_eq!(eval("2.5E2 + x", "x", 1.0), 251.0);
        assert_relative_eq!(eval("2*exp(x)", "x", 0.0), 2.0);
    }

    #[test]
    fn compile_errors_are_reported() {
        assert!(matches!(parse("1 +"), Err(ExpressionError::UnexpectedToken(_))));
        assert_eq!(parse("(1 + 2"), Err(ExpressionError::MissingParen));
        assert_eq!(parse("   "), Err(ExpressionError::Empty));
        assert_eq!(parse("2 $ 3"), Err(ExpressionError::UnexpectedChar('$')));
        assert!(matches!(parse("1 2"), Err(ExpressionError::UnexpectedToken(_))));
        assert_eq!(parse("1..2"), Err(ExpressionError::InvalidNumber("1..2".to_string())));

        let err = ExpressionFn::compile("y + 1", "t").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::UnknownVariable {
                name: "y".to_string(),
                expected: "t".to_string()
            }
        );
        let err = ExpressionFn::compile("gamma(t)", "t").unwrap_err();
        assert_eq!(err, ExpressionError::UnknownFunction("gamma".to_string()));
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let nested = |depth: usize| format!("{}t{}", "(".repeat(depth), ")".repeat(depth));
        assert_relative_eq!(eval(&nested(40), "t", 2.0), 2.0);

        for source in [nested(65), nested(500), format!("{}1", "-".repeat(500))] {
            assert_eq!(
                ExpressionFn::compile(&source, "t").unwrap_err(),
                ExpressionError::TooDeep { limit: MAX_DEPTH }
            );
        }
        for source in [nested(1000), nested(20000)] {
            assert!(matches!(
                ExpressionFn::compile(&source, "t"),
                Err(ExpressionError::TooDeep { .. } | ExpressionError::TooLong { .. })
            ));
        }
        let towers = format!("2{}", "^2".repeat(200));
        assert_eq!(parse(&towers), Err(ExpressionError::TooDeep { limit: MAX_DEPTH }));
    }

    #[test]
    fn long_chains_are_bounded() {
        let chain = format!("1{}", " + 1".repeat(500));
        assert_relative_eq!(eval(&chain, "x", 0.0), 501.0);

        let too_long = format!("1{}", " + 1".repeat(5000));
        assert_eq!(
            parse(&too_long),
            Err(ExpressionError::TooLong { limit: MAX_TOKENS })
        );
    }

    #[test]
    fn compiled_bytecode_is_postfix() {
        let f = ExpressionFn::compile("-(t + 1)", "t").unwrap();
        assert_eq!(
            f.bytecode().ops,
            vec![OpCode::LoadVar, OpCode::LoadConst(1.0), OpCode::Add, OpCode::Neg]
        );
    }

    #[test]
    fn malformed_bytecode_yields_nan() {
        let code = Bytecode {
            ops: vec![OpCode::Add],
        };
        let mut stack = Vec::new();
        assert!(VM::execute(&code, 1.0, &mut stack).is_nan());
    }
}
