//! Expression AST and recursive-descent parser.
//!
//! Precedence, lowest first:
//!
//! ```text
//! arrow      x => e | (x, y) => e
//! ternary    c ? a : b
//! nullish    a ?? b
//! or         a || b
//! and        a && b
//! equality   == != === !==
//! relational < <= > >=
//! additive   + -
//! mult       * / %
//! unary      ! - + typeof
//! postfix    a.b a?.b a[b] f(x)
//! primary    literals, identifiers, this, [..], (..)
//! ```

use std::rc::Rc;

use super::lexer::{Spanned, Token, tokenize};
use crate::error::EvalError;

/// Maximum syntactic nesting accepted before giving up.
const MAX_NESTING: usize = 128;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Expr>),
    Ident(String),
    This,
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Arrow {
        params: Rc<[String]>,
        body: Rc<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a complete expression. Trailing tokens are a syntax error.
pub(crate) fn parse(source: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    if parser.at_eof() {
        return Err(EvalError::syntax("Unexpected end of input"));
    }
    let expr = parser.expression()?;
    if !parser.at_eof() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .map_or(&Token::Eof, |spanned| &spanned.token)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> EvalError {
        let offset = self.tokens.get(self.pos).map_or(0, |s| s.offset);
        match self.peek() {
            Token::Eof => EvalError::syntax("Unexpected end of input"),
            Token::Number(n) => EvalError::syntax(format!("Unexpected number {n} at position {offset}")),
            Token::Str(_) => EvalError::syntax(format!("Unexpected string at position {offset}")),
            Token::Ident(name) => {
                EvalError::syntax(format!("Unexpected identifier '{name}' at position {offset}"))
            }
            Token::Punct(p) => EvalError::syntax(format!("Unexpected token '{p}' at position {offset}")),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(EvalError::range("Expression is nested too deeply"));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.nested(|p| {
            if let Some(arrow) = p.try_arrow()? {
                return Ok(arrow);
            }
            p.conditional()
        })
    }

    /// Parse an arrow function if one starts here.
    fn try_arrow(&mut self) -> Result<Option<Expr>, EvalError> {
        let params = match (self.peek(), self.peek_at(1)) {
            (Token::Ident(name), Token::Punct("=>")) => {
                let params = vec![name.clone()];
                self.pos += 2;
                params
            }
            (Token::Punct("("), _) => {
                let Some((params, consumed)) = self.arrow_params() else {
                    return Ok(None);
                };
                self.pos += consumed;
                params
            }
            _ => return Ok(None),
        };

        let body = self.expression()?;
        Ok(Some(Expr::Arrow {
            params: params.into(),
            body: Rc::new(body),
        }))
    }

    /// Look ahead for `( a, b ) =>`; returns the names and tokens consumed.
    fn arrow_params(&self) -> Option<(Vec<String>, usize)> {
        let mut ahead = 1;
        let mut params = Vec::new();
        if matches!(self.peek_at(ahead), Token::Punct(")")) {
            ahead += 1;
        } else {
            loop {
                let Token::Ident(name) = self.peek_at(ahead) else {
                    return None;
                };
                params.push(name.clone());
                ahead += 1;
                match self.peek_at(ahead) {
                    Token::Punct(",") => ahead += 1,
                    Token::Punct(")") => {
                        ahead += 1;
                        break;
                    }
                    _ => return None,
                }
            }
        }
        matches!(self.peek_at(ahead), Token::Punct("=>")).then_some((params, ahead + 1))
    }

    fn conditional(&mut self) -> Result<Expr, EvalError> {
        let test = self.nullish()?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn nullish(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.or()?;
        while self.eat("??") {
            let right = self.or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::LooseEq),
                ("!=", BinaryOp::LooseNe),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("+", BinaryOp::Add), ("-", BinaryOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
            Self::unary,
        )
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat(punct) {
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Token::Punct("!") => UnaryOp::Not,
            Token::Punct("-") => UnaryOp::Neg,
            Token::Punct("+") => UnaryOp::Plus,
            Token::Ident(name) if name == "typeof" => UnaryOp::TypeOf,
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            let member = if self.eat("?.") {
                Some(true)
            } else if self.eat(".") {
                Some(false)
            } else {
                None
            };
            if let Some(optional) = member {
                match self.advance() {
                    Token::Ident(property) => {
                        expr = Expr::Member {
                            object: Box::new(expr),
                            property,
                            optional,
                        };
                    }
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected());
                    }
                }
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn list(&mut self, close: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                "this" => Expr::This,
                _ => Expr::Ident(name),
            }),
            Token::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => Ok(Expr::Array(self.nested(|p| p.list("]"))?)),
            Token::Punct(_) | Token::Eof => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected())
            }
        }
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
