//! Formula targets: a small parser and stack VM that turn strings such as
//! `"x^2 + sin(y)"` into callable objects.

use crate::callable::Sample;
use crate::traits::{Evaluate, Scalar};
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("expression expects {expected} variables, got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("a scalar target takes exactly one formula, got {0}")]
    ScalarOutputs(usize),
}

/// Built-in single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Func::Sin),
            "cos" => Some(Func::Cos),
            "tan" => Some(Func::Tan),
            "exp" => Some(Func::Exp),
            "ln" | "log" => Some(Func::Ln),
            "sqrt" => Some(Func::Sqrt),
            "abs" => Some(Func::Abs),
            _ => None,
        }
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            Func::Sqrt => a.sqrt(),
            Func::Abs => a.abs(),
        }
    }
}

/// Instructions of the stack machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// Pushes `x[idx]`.
    LoadVar(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Func),
}

/// A compiled expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub ops: Vec<OpCode>,
}

/// Stack-based evaluator. Stateless; the caller owns the stack buffer.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(program: &Program, vars: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &program.ops {
            let value = match *op {
                OpCode::LoadConst(c) => T::constant(c),
                OpCode::LoadVar(idx) => vars.get(idx).copied().unwrap_or_else(T::nan),
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
                        _ => a.powf(b),
                    }
                }
            };
            stack.push(value);
        }

        pop(stack)
    }
}

// Compiled programs never underflow; NaN surfaces as a non-finite sample if one does.
fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(String, Box<Expr>),
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
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign =
                    (d == '-' || d == '+') && literal.ends_with(|e| e == 'e' || e == 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
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
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ExpressionError::UnexpectedCharacter(other)),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

/// Parses a formula. `^` is right-associative and binds tighter than unary minus.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
    }
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
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(Token::Minus) = self.peek() {
            self.next();
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.next();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.next();
                    let arg = self.parse_sum()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// Resolves variable names to indices and emits bytecode.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Program, ExpressionError> {
        let mut ops = Vec::new();
        self.emit(expr, &mut ops)?;
        Ok(Program { ops })
    }

    fn emit(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let idx = self
                    .var_map
                    .get(name)
                    .ok_or_else(|| ExpressionError::UnknownVariable(name.clone()))?;
                ops.push(OpCode::LoadVar(*idx));
            }
            Expr::Binary(left, op, right) => {
                self.emit(left, ops)?;
                self.emit(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Neg(operand) => {
                self.emit(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, arg) => {
                let func = Func::from_name(name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                self.emit(arg, ops)?;
                ops.push(OpCode::Call(func));
            }
        }
        Ok(())
    }
}

/// What an [`ExpressionTarget`] returns per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// One formula, `Sample::Scalar` (gradient and gradient-free Hessian targets).
    Scalar,
    /// Any number of formulas, `Sample::Vector` (Jacobian targets, gradient functions).
    Vector,
}

/// A target defined by formulas over named variables.
pub struct ExpressionTarget<T: Scalar> {
    programs: Vec<Program>,
    output: Output,
    dimension: usize,
    // Reused between evaluations; makes the target !Sync.
    stack: RefCell<Vec<T>>,
}

impl<T: Scalar> ExpressionTarget<T> {
    /// A scalar-valued target.
    pub fn scalar(expression: &str, var_names: &[String]) -> Result<Self, ExpressionError> {
        Self::compile(&[expression], var_names, Output::Scalar)
    }

    /// A vector-valued target with one component per formula, even if there is only one.
    pub fn vector<S: AsRef<str>>(
        expressions: &[S],
        var_names: &[String],
    ) -> Result<Self, ExpressionError> {
        Self::compile(expressions, var_names, Output::Vector)
    }

    pub fn compile<S: AsRef<str>>(
        expressions: &[S],
        var_names: &[String],
        output: Output,
    ) -> Result<Self, ExpressionError> {
        if output == Output::Scalar && expressions.len() != 1 {
            return Err(ExpressionError::ScalarOutputs(expressions.len()));
        }
        let compiler = Compiler::new(var_names);
        let programs = expressions
            .iter()
            .map(|source| compiler.compile(&parse(source.as_ref())?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            programs,
            output,
            dimension: var_names.len(),
            stack: RefCell::new(Vec::with_capacity(32)),
        })
    }

    /// Number of input variables.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn outputs(&self) -> usize {
        self.programs.len()
    }

    pub fn output(&self) -> Output {
        self.output
    }
}

impl<T: Scalar> Evaluate<T> for ExpressionTarget<T> {
    fn evaluate(&self, x: &[T]) -> anyhow::Result<Sample<T>> {
        if x.len() != self.dimension {
            return Err(ExpressionError::Arity {
                expected: self.dimension,
                actual: x.len(),
            }
            .into());
        }
        let mut stack = self.stack.borrow_mut();
        let mut values: Vec<T> = self
            .programs
            .iter()
            .map(|program| VM::execute(program, x, &mut stack))
            .collect();
        Ok(match self.output {
            Output::Scalar => Sample::Scalar(values.remove(0)),
            Output::Vector => Sample::Vector(values),
        })
    }
}
