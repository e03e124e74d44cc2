//! Textual filter grammar.
//!
//! ```text
//! expr      := and_expr ( OR and_expr )*
//! and_expr  := unary ( AND unary )*
//! unary     := NOT unary | '(' expr ')' | condition
//! condition := ident cmp literal
//!            | ident [NOT] IN '(' literal ( ',' literal )* ')'
//!            | ident [NOT] LIKE string | ident [NOT] ILIKE string
//!            | ident IS [NOT] NULL
//! cmp       := '>' | '>=' | '<' | '<=' | '=' | '!=' | '<>'
//! literal   := 'text' | number | TRUE | FALSE | NULL
//! ```
//!
//! Keywords are case-insensitive; quotes inside strings are doubled (`''`).
//! The parser only builds a [`FilterExpr`]; column and type checks happen
//! when that tree is compiled against a schema.

use rowvault_core::config::FilterLimits;
use rowvault_core::error::{Error, Result};

use crate::filter::{FilterExpr, Operator};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(serde_json::Number),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

/// Parse a textual filter
pub fn parse_filter(text: &str, limits: &FilterLimits) -> Result<FilterExpr> {
    if text.chars().count() > limits.max_expression_len {
        return Err(Error::validation(format!(
            "filter expression exceeds {} characters",
            limits.max_expression_len
        )));
    }
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(Error::validation("filter expression is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        limits,
    };
    let expr = parser.expr()?;
    if let Some((pos, token)) = parser.peek_at() {
        return Err(syntax(pos, format!("unexpected {:?}", token)));
    }
    Ok(expr)
}

fn syntax(pos: usize, message: impl Into<String>) -> Error {
    Error::validation(format!("filter syntax error at token {}: {}", pos + 1, message.into()))
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(Error::validation("unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            s.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '>' | '<' | '=' | '!' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('>', Some('=')) => (">=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('<', Some('>')) => ("!=", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('>', _) => (">", 1),
                    ('<', _) => ("<", 1),
                    ('=', _) => ("=", 1),
                    _ => return Err(Error::validation("'!' must be followed by '='")),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || matches!(chars[i], '.' | 'e' | 'E')
                        || (matches!(chars[i], '+' | '-') && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_number(&literal)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::validation(format!(
                    "unexpected character '{}' in filter",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

fn parse_number(literal: &str) -> Result<serde_json::Number> {
    if let Ok(i) = literal.parse::<i64>() {
        return Ok(i.into());
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .ok_or_else(|| Error::validation(format!("bad number '{}'", literal)))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    limits: &'a FilterLimits,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self) -> Option<(usize, &Token)> {
        self.peek().map(|t| (self.pos, t))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax(self.pos, format!("expected {}", keyword)))
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(syntax(
                self.pos.saturating_sub(1),
                format!("expected {:?}, found {:?}", token, other),
            )),
        }
    }

    /// Guard recursion before it can outgrow the compile-time depth check
    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(Error::validation(format!(
                "filter nesting depth exceeds the limit of {}",
                self.limits.max_depth
            )));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.and_expr()?];
        while self.eat_keyword("OR") {
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::Or(terms)
        })
    }

    fn and_expr(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.unary()?];
        while self.eat_keyword("AND") {
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::And(terms)
        })
    }

    fn unary(&mut self) -> Result<FilterExpr> {
        if self.eat_keyword("NOT") {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            self.descend()?;
            let inner = self.expr()?;
            self.depth -= 1;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        self.condition()
    }

    fn condition(&mut self) -> Result<FilterExpr> {
        let column = match self.next() {
            Some(Token::Ident(name)) if !is_reserved(&name) => name,
            other => {
                return Err(syntax(
                    self.pos.saturating_sub(1),
                    format!("expected a column name, found {:?}", other),
                ))
            }
        };

        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let op = match op {
                ">" => Operator::Gt,
                ">=" => Operator::Gte,
                "<" => Operator::Lt,
                "<=" => Operator::Lte,
                "=" => Operator::Eq,
                _ => Operator::Ne,
            };
            let value = self.literal()?;
            return Ok(FilterExpr::condition(column, op, value));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            let op = if negated {
                Operator::IsNotNull
            } else {
                Operator::IsNull
            };
            return Ok(FilterExpr::condition(column, op, serde_json::Value::Null));
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("IN") {
            let values = self.list()?;
            let op = if negated { Operator::NotIn } else { Operator::In };
            return Ok(FilterExpr::condition(column, op, serde_json::Value::Array(values)));
        }
        let like = if self.eat_keyword("LIKE") {
            Some(Operator::Like)
        } else if self.eat_keyword("ILIKE") {
            Some(Operator::Ilike)
        } else {
            None
        };
        if let Some(op) = like {
            let pattern = match self.next() {
                Some(Token::Str(s)) => s,
                other => {
                    return Err(syntax(
                        self.pos.saturating_sub(1),
                        format!("{} needs a quoted pattern, found {:?}", op, other),
                    ))
                }
            };
            let cond = FilterExpr::condition(column, op, serde_json::Value::String(pattern));
            return Ok(if negated {
                FilterExpr::Not(Box::new(cond))
            } else {
                cond
            });
        }

        Err(syntax(self.pos, format!("expected an operator after '{}'", column)))
    }

    fn list(&mut self) -> Result<Vec<serde_json::Value>> {
        self.expect(Token::LParen)?;
        let mut values = vec![self.literal()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            values.push(self.literal()?);
            if values.len() > self.limits.max_in_list {
                return Err(Error::validation(format!(
                    "IN list exceeds {} values",
                    self.limits.max_in_list
                )));
            }
        }
        self.expect(Token::RParen)?;
        Ok(values)
    }

    fn literal(&mut self) -> Result<serde_json::Value> {
        match self.next() {
            Some(Token::Str(s)) => Ok(serde_json::Value::String(s)),
            Some(Token::Number(n)) => Ok(serde_json::Value::Number(n)),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("TRUE") => Ok(true.into()),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("FALSE") => Ok(false.into()),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NULL") => {
                Ok(serde_json::Value::Null)
            }
            other => Err(syntax(
                self.pos.saturating_sub(1),
                format!("expected a literal, found {:?}", other),
            )),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    const RESERVED: &[&str] = &[
        "AND", "OR", "NOT", "IN", "LIKE", "ILIKE", "IS", "NULL", "TRUE", "FALSE",
    ];
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}
