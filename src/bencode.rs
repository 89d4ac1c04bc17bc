//! Canonical binary encoding for RPC payloads.
//!
//! The daemon speaks bencoded values: integers, length-prefixed byte
//! strings, lists, and dictionaries with sorted byte-string keys. The
//! encoding is canonical, so `decode(encode(x)) == x` for every
//! representable value and vice versa.

use std::collections::BTreeMap;

use crate::error::{Result, SprocketError};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn str(value: &str) -> Value {
        Value::Bytes(value.as_bytes().to_vec())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(number) => {
            out.push(b'i');
            out.extend_from_slice(number.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, item) in entries {
                out.extend_from_slice(key.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(key);
                encode_into(item, out);
            }
            out.push(b'e');
        }
    }
}

pub fn decode(input: &[u8]) -> Result<Value> {
    let mut decoder = Decoder { input, position: 0 };
    let value = decoder.parse_value(0)?;
    if decoder.position != input.len() {
        return Err(SprocketError::Protocol(format!(
            "trailing bytes after payload at offset {}",
            decoder.position
        )));
    }
    Ok(value)
}

struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    fn parse_value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(SprocketError::Protocol("payload nesting too deep".into()));
        }
        match self.peek()? {
            b'i' => self.parse_int(),
            b'l' => self.parse_list(depth),
            b'd' => self.parse_dict(depth),
            b'0'..=b'9' => self.parse_bytes().map(Value::Bytes),
            other => Err(self.fault(format!("unexpected byte 0x{other:02x}"))),
        }
    }

    fn parse_int(&mut self) -> Result<Value> {
        self.advance();
        let start = self.position;
        if self.peek()? == b'-' {
            self.advance();
        }
        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(self.fault("malformed integer".into()));
            }
            self.advance();
        }
        let digits = &self.input[start..self.position];
        self.advance();
        let text = std::str::from_utf8(digits)
            .map_err(|_| self.fault("malformed integer".into()))?;
        if text.is_empty() || text == "-" || text == "-0" {
            return Err(self.fault("malformed integer".into()));
        }
        // canonical form forbids leading zeros (other than zero itself)
        let unsigned = text.strip_prefix('-').unwrap_or(text);
        if unsigned.len() > 1 && unsigned.starts_with('0') {
            return Err(self.fault("non-canonical integer".into()));
        }
        let number: i64 = text
            .parse()
            .map_err(|_| self.fault(format!("integer out of range: {text}")))?;
        Ok(Value::Int(number))
    }

    fn parse_bytes(&mut self) -> Result<Vec<u8>> {
        let start = self.position;
        while self.peek()? != b':' {
            if !self.peek()?.is_ascii_digit() {
                return Err(self.fault("malformed string length".into()));
            }
            self.advance();
        }
        let digits = std::str::from_utf8(&self.input[start..self.position])
            .map_err(|_| self.fault("malformed string length".into()))?;
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return Err(self.fault("malformed string length".into()));
        }
        let length: usize = digits
            .parse()
            .map_err(|_| self.fault(format!("string length out of range: {digits}")))?;
        self.advance();
        if self.input.len() - self.position < length {
            return Err(self.fault(format!(
                "string of {length} bytes exceeds remaining payload"
            )));
        }
        let bytes = self.input[self.position..self.position + length].to_vec();
        self.position += length;
        Ok(bytes)
    }

    fn parse_list(&mut self, depth: usize) -> Result<Value> {
        self.advance();
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value(depth + 1)?);
        }
        self.advance();
        Ok(Value::List(items))
    }

    fn parse_dict(&mut self, depth: usize) -> Result<Value> {
        self.advance();
        let mut entries = BTreeMap::new();
        let mut previous: Option<Vec<u8>> = None;
        while self.peek()? != b'e' {
            let key = self.parse_bytes()?;
            if let Some(previous) = &previous {
                if *previous >= key {
                    return Err(self.fault("dictionary keys out of order".into()));
                }
            }
            let value = self.parse_value(depth + 1)?;
            previous = Some(key.clone());
            entries.insert(key, value);
        }
        self.advance();
        Ok(Value::Dict(entries))
    }

    fn peek(&self) -> Result<u8> {
        self.input
            .get(self.position)
            .copied()
            .ok_or_else(|| SprocketError::Protocol("payload ends mid-value".into()))
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn fault(&self, message: String) -> SprocketError {
        SprocketError::Protocol(format!("{message} at offset {}", self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(key, value)| (key.as_bytes().to_vec(), value))
                .collect(),
        )
    }

    #[test]
    fn round_trips_nested_values() {
        let message = Value::List(vec![
            Value::str("get-info-all"),
            dict(vec![
                ("fields", Value::List(vec![Value::str("id"), Value::str("name")])),
                ("tag", Value::Int(-7)),
                ("raw", Value::Bytes(vec![0x00, 0xff, 0x7f])),
            ]),
        ]);

        let encoded = encode(&message);
        let decoded = decode(&encoded).expect("decode succeeds");
        assert_eq!(decoded, message);
        assert_eq!(encode(&decoded), encoded);
    }

    #[test]
    fn decodes_known_encodings() {
        assert_eq!(decode(b"i0e").expect("zero"), Value::Int(0));
        assert_eq!(decode(b"i-42e").expect("negative"), Value::Int(-42));
        assert_eq!(decode(b"0:").expect("empty string"), Value::Bytes(vec![]));
        assert_eq!(decode(b"le").expect("empty list"), Value::List(vec![]));
        assert_eq!(
            decode(b"4:spam").expect("string"),
            Value::str("spam")
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode(b"").is_err());
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"iabce").is_err());
        assert!(decode(b"5:spam").is_err());
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"d1:bi1e1:ai2ee").is_err());
        assert!(decode(b"i1ei2e").is_err());
        assert!(decode(b"di1e4:spame").is_err());
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut input = Vec::new();
        input.extend(std::iter::repeat(b'l').take(MAX_DEPTH + 2));
        input.extend(std::iter::repeat(b'e').take(MAX_DEPTH + 2));
        assert!(decode(&input).is_err());
    }

    #[test]
    fn accessors_expose_scalars() {
        let message = dict(vec![("eta", Value::Int(120)), ("name", Value::str("a"))]);
        assert_eq!(message.dict_get("eta").and_then(Value::as_int), Some(120));
        assert_eq!(message.dict_get("name").and_then(Value::as_str), Some("a"));
        assert!(message.dict_get("missing").is_none());
    }
}
