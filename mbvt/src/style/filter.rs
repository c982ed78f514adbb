//! Parser for the bracketed expression syntax shared by symbolizer documents and style-language
//! sources, e.g. `[class] = 'park' and [nuti::lang] != 'en'`. The result is an expression
//! understood by [`super::expression::evaluate`].

use serde_json::{Value as Json, json};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset} in '{text}'")]
pub struct FilterError {
    pub message: String,
    pub offset: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Str(String),
    Number(f64, bool),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 16] = [
    "==", "!=", "<>", "<=", ">=", "&&", "||", "=", "<", ">", "!", "+", "-", "*", "/", "%",
];

/// Parse a filter or value expression.
pub fn parse_expression(text: &str) -> Result<Json, FilterError> {
    let (offsets, tokens) = tokenize(text)?.into_iter().unzip();
    let mut parser = Parser {
        text,
        tokens,
        offsets,
        position: 0,
    };
    let expression = parser.or()?;
    if parser.position < parser.tokens.len() {
        return Err(parser.error("Unexpected trailing input"));
    }
    Ok(expression)
}

/// Parse a symbolizer property value. Text containing bracketed references is an expression,
/// anything else a literal.
pub fn parse_property(text: &str) -> Result<Json, FilterError> {
    let trimmed = text.trim();
    if trimmed.contains('[') {
        parse_expression(trimmed)
    } else {
        Ok(crate::value::Value::from_literal(trimmed).to_json())
    }
}

/// Expression referencing a `[field]`. `nuti::` fields are style parameters, `zoom` and
/// `view::zoom` the current zoom.
fn field_expression(name: &str) -> Json {
    if let Some(parameter) = name.strip_prefix("nuti::") {
        json!(["param", parameter])
    } else if name == "zoom" || name == "view::zoom" {
        json!(["zoom"])
    } else {
        json!(["get", name])
    }
}

/// Split the text into tokens, each paired with its byte offset.
fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, FilterError> {
    let error = |message: &str, offset: usize| FilterError {
        message: message.to_owned(),
        offset,
        text: text.to_owned(),
    };

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&(offset, c)) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            '[' => {
                let end = chars[i..]
                    .iter()
                    .position(|(_, c)| *c == ']')
                    .ok_or_else(|| error("Unterminated field reference", offset))?;
                let name: String = chars[i + 1..i + end].iter().map(|(_, c)| c).collect();
                tokens.push((offset, Token::Field(name.trim().to_owned())));
                i += end + 1;
            }
            '\'' | '"' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(error("Unterminated string", offset)),
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.get(j + 1) {
                                value.push(*escaped);
                            }
                            j += 2;
                        }
                        Some((_, q)) if *q == c => break,
                        Some((_, other)) => {
                            value.push(*other);
                            j += 1;
                        }
                    }
                }
                tokens.push((offset, Token::Str(value)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let literal: String = chars[i..]
                    .iter()
                    .map(|(_, c)| *c)
                    .take_while(|c| c.is_ascii_digit() || *c == '.')
                    .collect();
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| error("Invalid number", offset))?;
                tokens.push((offset, Token::Number(number, !literal.contains('.'))));
                i += literal.chars().count();
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident: String = chars[i..]
                    .iter()
                    .map(|(_, c)| *c)
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                i += ident.chars().count();
                tokens.push((offset, Token::Ident(ident)));
            }
            _ => {
                let rest = &text[offset..];
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(*op))
                    .ok_or_else(|| error("Unexpected character", offset))?;
                tokens.push((offset, Token::Op(*op)));
                i += op.len();
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    offsets: Vec<usize>,
    position: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> FilterError {
        self.error_at(self.position, message)
    }

    /// Error pointing at the token with the given index, or at the end of the text.
    fn error_at(&self, position: usize, message: &str) -> FilterError {
        FilterError {
            message: message.to_owned(),
            offset: self.offsets.get(position).copied().unwrap_or(self.text.len()),
            text: self.text.to_owned(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    /// Consume the keyword or operator if it is next.
    fn accept(&mut self, keyword: &str, op: &str) -> bool {
        let found = match self.peek() {
            Some(Token::Ident(ident)) => ident.eq_ignore_ascii_case(keyword),
            Some(Token::Op(o)) => *o == op,
            _ => false,
        };
        if found {
            self.position += 1;
        }
        found
    }

    fn or(&mut self) -> Result<Json, FilterError> {
        let mut operands = vec![self.and()?];
        while self.accept("or", "||") {
            operands.push(self.and()?);
        }
        Ok(combine("any", operands))
    }

    fn and(&mut self) -> Result<Json, FilterError> {
        let mut operands = vec![self.not()?];
        while self.accept("and", "&&") {
            operands.push(self.not()?);
        }
        Ok(combine("all", operands))
    }

    fn not(&mut self) -> Result<Json, FilterError> {
        if self.accept("not", "!") {
            Ok(json!(["!", self.not()?]))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Json, FilterError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Op(op @ ("=" | "==" | "!=" | "<>" | "<" | "<=" | ">" | ">="))) => *op,
            _ => return Ok(left),
        };
        self.position += 1;
        let right = self.additive()?;

        let op = match op {
            "=" => "==",
            "<>" => "!=",
            other => other,
        };
        // Plain strings on the left would be read as property names, so keep them on the right.
        if left.is_string() && !right.is_string() {
            let mirrored = match op {
                "<" => ">",
                "<=" => ">=",
                ">" => "<",
                ">=" => "<=",
                other => other,
            };
            return Ok(json!([mirrored, right, left]));
        }
        Ok(json!([op, left, right]))
    }

    fn additive(&mut self) -> Result<Json, FilterError> {
        let mut left = self.multiplicative()?;
        while let Some(Token::Op(op @ ("+" | "-"))) = self.peek() {
            let op = *op;
            self.position += 1;
            let right = self.multiplicative()?;
            left = json!([op, left, right]);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Json, FilterError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ("*" | "/" | "%"))) = self.peek() {
            let op = *op;
            self.position += 1;
            let right = self.unary()?;
            left = json!([op, left, right]);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Json, FilterError> {
        if let Some(Token::Op("-")) = self.peek() {
            self.position += 1;
            return Ok(match self.unary()? {
                Json::Number(n) => match n.as_i64() {
                    Some(i) => json!(-i),
                    None => json!(-n.as_f64().unwrap_or_default()),
                },
                other => json!(["-", 0, other]),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Json, FilterError> {
        let start = self.position;
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or()?;
                let close = self.position;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error_at(close, "Expected ')'")),
                }
            }
            Some(Token::Field(name)) => Ok(field_expression(&name)),
            Some(Token::Str(s)) => Ok(Json::String(s)),
            Some(Token::Number(n, true)) if n.abs() < i64::MAX as f64 => Ok(json!(n as i64)),
            Some(Token::Number(n, _)) => Ok(json!(n)),
            Some(Token::Ident(ident)) => match ident.to_ascii_lowercase().as_str() {
                "true" => Ok(Json::Bool(true)),
                "false" => Ok(Json::Bool(false)),
                "null" => Ok(Json::Null),
                _ => Err(self.error_at(start, "Unknown identifier")),
            },
            _ => Err(self.error_at(start, "Expected a value")),
        }
    }
}

fn combine(operator: &str, mut operands: Vec<Json>) -> Json {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        let mut expression = vec![Json::String(operator.to_owned())];
        expression.extend(operands);
        Json::Array(expression)
    }
}
