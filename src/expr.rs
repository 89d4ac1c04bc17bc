//! Restricted expression evaluator for inline template expressions.
//!
//! The grammar covers field access, numeric and string literals,
//! arithmetic, and a handful of string functions. Expressions evaluate
//! against a single record; there is no assignment, no control flow, and
//! no access to anything outside the record.

use std::fmt;

use crate::{
    error::{Result, SprocketError},
    record::{value_to_string, Record},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Number(f64),
    Text(String),
}

impl ExprValue {
    fn as_number(&self, context: &str) -> Result<f64> {
        match self {
            ExprValue::Number(value) => Ok(*value),
            ExprValue::Text(text) => text.trim().parse().map_err(|_| {
                SprocketError::OutputFormat(format!(
                    "'{text}' is not a number in {context}"
                ))
            }),
        }
    }

    fn into_text(self) -> String {
        match self {
            ExprValue::Number(value) => ExprValue::Number(value).to_string(),
            ExprValue::Text(text) => text,
        }
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Number(value) => {
                if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{value}")
                }
            }
            ExprValue::Text(text) => write!(f, "{text}"),
        }
    }
}

pub fn evaluate(input: &str, record: &Record) -> Result<ExprValue> {
    let tokens = Lexer::new(input).collect::<Result<Vec<_>>>()?;
    if tokens.is_empty() {
        return Err(SprocketError::OutputFormat("empty expression".into()));
    }
    let mut parser = Parser::new(tokens, record);
    let value = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn next_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        Some(ch)
    }

    fn consume_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() {
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn consume_identifier(&mut self) -> Token {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.next_char();
            } else {
                break;
            }
        }
        Token::Identifier(self.input[start..self.position].to_string())
    }

    fn consume_number(&mut self) -> Result<Token> {
        let start = self.position;
        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() || ch == '.' {
                self.next_char();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.position];
        text.parse()
            .map(Token::Number)
            .map_err(|_| SprocketError::OutputFormat(format!("malformed number '{text}'")))
    }

    fn consume_string(&mut self, quote: char) -> Result<Token> {
        self.next_char();
        let mut value = String::new();
        while let Some(ch) = self.next_char() {
            if ch == quote {
                return Ok(Token::Text(value));
            }
            if ch == '\\' {
                match self.next_char() {
                    Some(escaped) => value.push(escaped),
                    None => {
                        return Err(SprocketError::OutputFormat(
                            "unterminated escape sequence".into(),
                        ));
                    }
                }
            } else {
                value.push(ch);
            }
        }
        Err(SprocketError::OutputFormat(
            "unterminated string literal".into(),
        ))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.consume_whitespace();
        let ch = self.peek_char()?;

        let token = if ch.is_ascii_alphabetic() || ch == '_' {
            Ok(self.consume_identifier())
        } else if ch.is_ascii_digit() {
            self.consume_number()
        } else if ch == '"' || ch == '\'' {
            self.consume_string(ch)
        } else {
            self.next_char();
            match ch {
                '+' => Ok(Token::Plus),
                '-' => Ok(Token::Minus),
                '*' => Ok(Token::Star),
                '/' => Ok(Token::Slash),
                '%' => Ok(Token::Percent),
                '(' => Ok(Token::LParen),
                ')' => Ok(Token::RParen),
                ',' => Ok(Token::Comma),
                other => Err(SprocketError::OutputFormat(format!(
                    "unexpected character '{other}' in expression"
                ))),
            }
        };

        Some(token)
    }
}

struct Parser<'r> {
    tokens: Vec<Token>,
    position: usize,
    record: &'r Record,
}

impl<'r> Parser<'r> {
    fn new(tokens: Vec<Token>, record: &'r Record) -> Self {
        Self {
            tokens,
            position: 0,
            record,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(SprocketError::OutputFormat(format!(
                "unexpected trailing {token:?} in expression"
            ))),
        }
    }

    fn parse_expression(&mut self) -> Result<ExprValue> {
        let mut value = self.parse_term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = add(value, rhs)?;
                }
                Token::Minus => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = ExprValue::Number(
                        value.as_number("subtraction")? - rhs.as_number("subtraction")?,
                    );
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<ExprValue> {
        let mut value = self.parse_factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.advance();
                    let rhs = self.parse_factor()?;
                    value = ExprValue::Number(
                        value.as_number("multiplication")? * rhs.as_number("multiplication")?,
                    );
                }
                Token::Slash => {
                    self.advance();
                    let rhs = self.parse_factor()?.as_number("division")?;
                    if rhs == 0.0 {
                        return Err(SprocketError::OutputFormat(
                            "division by zero in expression".into(),
                        ));
                    }
                    value = ExprValue::Number(value.as_number("division")? / rhs);
                }
                Token::Percent => {
                    self.advance();
                    let rhs = self.parse_factor()?.as_number("remainder")?;
                    if rhs == 0.0 {
                        return Err(SprocketError::OutputFormat(
                            "division by zero in expression".into(),
                        ));
                    }
                    value = ExprValue::Number(value.as_number("remainder")? % rhs);
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<ExprValue> {
        match self.advance() {
            Some(Token::Minus) => {
                let value = self.parse_factor()?.as_number("negation")?;
                Ok(ExprValue::Number(-value))
            }
            Some(Token::Number(value)) => Ok(ExprValue::Number(value)),
            Some(Token::Text(value)) => Ok(ExprValue::Text(value)),
            Some(Token::LParen) => {
                let value = self.parse_expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(SprocketError::OutputFormat(
                        "expected ')' in expression".into(),
                    )),
                }
            }
            Some(Token::Identifier(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let arguments = self.parse_arguments()?;
                    self.apply_function(&name, arguments)
                } else {
                    self.lookup_field(&name)
                }
            }
            Some(token) => Err(SprocketError::OutputFormat(format!(
                "unexpected {token:?} in expression"
            ))),
            None => Err(SprocketError::OutputFormat(
                "expression ends unexpectedly".into(),
            )),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<ExprValue>> {
        let mut arguments = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.advance();
            return Ok(arguments);
        }
        loop {
            arguments.push(self.parse_expression()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(arguments),
                _ => {
                    return Err(SprocketError::OutputFormat(
                        "expected ',' or ')' in function call".into(),
                    ));
                }
            }
        }
    }

    /// Identifiers resolve against the record; underscores fall back to
    /// the dashed field spelling (`rate_download` finds `rate-download`).
    fn lookup_field(&self, name: &str) -> Result<ExprValue> {
        let value = self
            .record
            .get(name)
            .or_else(|| self.record.get(&name.replace('_', "-")))
            .ok_or_else(|| {
                SprocketError::OutputFormat(format!("unknown field '{name}' in expression"))
            })?;
        Ok(match value {
            serde_json::Value::Number(number) => match number.as_f64() {
                Some(value) => ExprValue::Number(value),
                None => ExprValue::Text(number.to_string()),
            },
            other => ExprValue::Text(value_to_string(other)),
        })
    }

    fn apply_function(&self, name: &str, arguments: Vec<ExprValue>) -> Result<ExprValue> {
        match name {
            "upper" => {
                let value = single(name, arguments)?;
                Ok(ExprValue::Text(value.into_text().to_uppercase()))
            }
            "lower" => {
                let value = single(name, arguments)?;
                Ok(ExprValue::Text(value.into_text().to_lowercase()))
            }
            "len" => {
                let value = single(name, arguments)?;
                Ok(ExprValue::Number(value.into_text().chars().count() as f64))
            }
            "round" => match arguments.len() {
                1 => {
                    let value = arguments[0].as_number("round")?;
                    Ok(ExprValue::Number(value.round()))
                }
                2 => {
                    let value = arguments[0].as_number("round")?;
                    let digits = arguments[1].as_number("round")? as i32;
                    let factor = 10f64.powi(digits);
                    Ok(ExprValue::Number((value * factor).round() / factor))
                }
                count => Err(SprocketError::OutputFormat(format!(
                    "round takes 1 or 2 arguments, got {count}"
                ))),
            },
            "field" => {
                let value = single(name, arguments)?;
                self.lookup_field(&value.into_text())
            }
            other => Err(SprocketError::OutputFormat(format!(
                "unknown function '{other}'"
            ))),
        }
    }
}

fn single(name: &str, mut arguments: Vec<ExprValue>) -> Result<ExprValue> {
    if arguments.len() != 1 {
        return Err(SprocketError::OutputFormat(format!(
            "{name} takes exactly one argument, got {}",
            arguments.len()
        )));
    }
    Ok(arguments.remove(0))
}

/// `+` adds numbers and concatenates as soon as either side is text.
fn add(lhs: ExprValue, rhs: ExprValue) -> Result<ExprValue> {
    match (&lhs, &rhs) {
        (ExprValue::Number(a), ExprValue::Number(b)) => Ok(ExprValue::Number(a + b)),
        _ => Ok(ExprValue::Text(format!(
            "{}{}",
            lhs.into_text(),
            rhs.into_text()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use serde_json::json;

    fn record() -> Record {
        let fields: BTreeMap<String, serde_json::Value> = [
            ("name".to_string(), json!("ubuntu.iso")),
            ("size".to_string(), json!(1000)),
            ("uploaded".to_string(), json!(250)),
            ("rate-download".to_string(), json!(2048)),
        ]
        .into_iter()
        .collect();
        Record::from_fields(fields)
    }

    fn eval(input: &str) -> ExprValue {
        evaluate(input, &record()).expect("expression evaluates")
    }

    #[test]
    fn arithmetic_over_fields() {
        assert_eq!(eval("uploaded / size"), ExprValue::Number(0.25));
        assert_eq!(eval("size - uploaded * 2"), ExprValue::Number(500.0));
        assert_eq!(eval("(size - uploaded) * 2"), ExprValue::Number(1500.0));
        assert_eq!(eval("-uploaded + 300"), ExprValue::Number(50.0));
        assert_eq!(eval("size % 300"), ExprValue::Number(100.0));
    }

    #[test]
    fn dashed_fields_resolve_via_underscores() {
        assert_eq!(eval("rate_download / 1024"), ExprValue::Number(2.0));
        assert_eq!(eval("field(\"rate-download\")"), ExprValue::Number(2048.0));
    }

    #[test]
    fn string_functions_and_concatenation() {
        assert_eq!(
            eval("upper(name)"),
            ExprValue::Text("UBUNTU.ISO".to_string())
        );
        assert_eq!(eval("len(name)"), ExprValue::Number(10.0));
        assert_eq!(
            eval("name + ' @ ' + size"),
            ExprValue::Text("ubuntu.iso @ 1000".to_string())
        );
        assert_eq!(eval("round(uploaded / size * 100, 1)"), ExprValue::Number(25.0));
    }

    #[test]
    fn display_drops_trailing_zero_fraction() {
        assert_eq!(eval("size / 10").to_string(), "100");
        assert_eq!(eval("uploaded / size").to_string(), "0.25");
    }

    #[test]
    fn unknown_fields_and_functions_are_fatal() {
        let record = record();
        assert!(matches!(
            evaluate("bogus + 1", &record),
            Err(SprocketError::OutputFormat(_))
        ));
        assert!(matches!(
            evaluate("explode(name)", &record),
            Err(SprocketError::OutputFormat(_))
        ));
        assert!(matches!(
            evaluate("size /", &record),
            Err(SprocketError::OutputFormat(_))
        ));
        assert!(matches!(
            evaluate("size / 0", &record),
            Err(SprocketError::OutputFormat(_))
        ));
    }
}
