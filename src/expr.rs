//! Minimal arithmetic evaluator for `port` expressions.
//!
//! Supports integer literals, `+ - * /`, unary minus, parentheses and the
//! single bound name `basePort`. Anything else is rejected, so configuration
//! files cannot smuggle arbitrary code into port computation.

use thiserror::Error;

/// Errors raised while evaluating a port expression.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ExprError {
    /// The expression contains a character outside the grammar.
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    /// The expression references a name other than `basePort`.
    #[error("unknown name '{0}'")]
    UnknownName(String),

    /// The expression ended while more input was expected.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// A token appeared where it is not allowed.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    BasePort,
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' => {
                let mut value = 0i64;
                while let Some(&d) = chars.peek() {
                    if let Some(digit) = d.to_digit(10) {
                        value = value * 10 + digit as i64;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&a) = chars.peek() {
                    if a.is_ascii_alphanumeric() || a == '_' {
                        name.push(a);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name == "basePort" {
                    tokens.push(Token::BasePort);
                } else {
                    return Err(ExprError::UnknownName(name));
                }
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    base_port: i64,
}

impl<'a> Parser<'a> {
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

    fn expr(&mut self) -> Result<i64, ExprError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.next();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64, ExprError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.next();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::BasePort) => Ok(self.base_port),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    Some(other) => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ExprError::UnexpectedToken(format!("{other:?}"))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// Evaluates a port expression with `basePort` bound to the given value.
pub fn evaluate(input: &str, base_port: i64) -> Result<i64, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        base_port,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(ExprError::UnexpectedToken(format!(
            "{:?}",
            tokens[parser.pos]
        )));
    }
    Ok(value)
}
