//! Recursive-descent parser producing the expression AST.

use super::lexer::{Token, tokenize};
use crate::error::{MetadataError, MetadataResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CmpOp {
    /// SQL operator text for plain column comparisons.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In | Self::NotIn => unreachable!("membership has no direct SQL operator"),
        }
    }

    /// The operator selecting the complementary rows.
    pub fn negated(&self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Gt => Self::Le,
            Self::Ge => Self::Lt,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(Number),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    Attr {
        value: Box<Expr>,
        name: String,
    },
    Subscript {
        value: Box<Expr>,
        key: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    /// A (possibly chained) comparison: `left op1 e1 op2 e2 ...`.
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

/// Parse a complete expression.
pub fn parse(input: &str) -> MetadataResult<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> MetadataResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {token:?}")))
        }
    }

    fn error(&self, message: &str) -> MetadataError {
        MetadataError::InvalidQuery(format!(
            "syntax error near token {} in query '{}': {message}",
            self.pos, self.input
        ))
    }

    fn or_expr(&mut self) -> MetadataResult<Expr> {
        let mut values = vec![self.and_expr()?];
        while self.eat(&Token::Or) {
            values.push(self.and_expr()?);
        }
        Ok(if values.len() == 1 {
            values.pop().unwrap()
        } else {
            Expr::Or(values)
        })
    }

    fn and_expr(&mut self) -> MetadataResult<Expr> {
        let mut values = vec![self.not_expr()?];
        while self.eat(&Token::And) {
            values.push(self.not_expr()?);
        }
        Ok(if values.len() == 1 {
            values.pop().unwrap()
        } else {
            Expr::And(values)
        })
    }

    fn not_expr(&mut self) -> MetadataResult<Expr> {
        if self.eat(&Token::Not) {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> MetadataResult<Expr> {
        let left = self.unary()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().cloned() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                Some(Token::In) => CmpOp::In,
                // `not in` is the only place `not` binds tighter than a
                // comparison operand
                Some(Token::Not) if self.tokens.get(self.pos + 1) == Some(&Token::In) => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.unary()?));
        }
        Ok(if rest.is_empty() {
            left
        } else {
            Expr::Compare {
                left: Box::new(left),
                rest,
            }
        })
    }

    fn unary(&mut self) -> MetadataResult<Expr> {
        if self.eat(&Token::Minus) {
            // unary minus folds into numeric literals, preserving the type
            let operand = self.unary()?;
            return match operand {
                Expr::Num(Number::Int(v)) => Ok(Expr::Num(Number::Int(-v))),
                Expr::Num(Number::Float(v)) => Ok(Expr::Num(Number::Float(-v))),
                _ => Err(self.error("unary minus applies to numeric literals only")),
            };
        }
        self.postfix()
    }

    fn postfix(&mut self) -> MetadataResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(name)) => {
                        expr = Expr::Attr {
                            value: Box::new(expr),
                            name,
                        };
                    }
                    _ => return Err(self.error("expected attribute name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let key = match self.next() {
                    Some(Token::Str(key)) => key,
                    _ => return Err(self.error("expected string subscript")),
                };
                self.expect(Token::RBracket)?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    key,
                };
            } else if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.or_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn atom(&mut self) -> MetadataResult<Expr> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Expr::Num(Number::Int(v))),
            Some(Token::Float(v)) => Ok(Expr::Num(Number::Float(v))),
            Some(Token::Str(v)) => Ok(Expr::Str(v)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::None) => Ok(Expr::None),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            _ => Err(self.error("expected expression")),
        }
    }
}
