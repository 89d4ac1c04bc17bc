//! The filter DSL: `key[!]op value` tokens compiled into per-field
//! predicates, ANDed together at apply time.

use std::{collections::BTreeMap, sync::OnceLock};

use regex::{Regex, RegexBuilder};

use crate::{
    error::{Result, SprocketError},
    record::Record,
};

/// Bare tokens fall back to filtering on this field.
const DEFAULT_FIELD: &str = "name";

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z-]+)(!)?([=~<>])(.+)$").expect("token pattern compiles")
    })
}

#[derive(Debug)]
pub struct FilterSet {
    filters: BTreeMap<String, Filter>,
}

#[derive(Debug)]
struct Filter {
    field: String,
    negated: bool,
    predicate: Predicate,
}

/// Operand captured by value at compile time; nothing here is shared or
/// mutated once built.
#[derive(Debug)]
enum Predicate {
    Exact(String),
    Glob(Regex),
    Matches(Regex),
    Greater(f64),
    Less(f64),
}

pub fn compile<S: AsRef<str>>(tokens: &[S]) -> Result<FilterSet> {
    let mut filters = BTreeMap::new();
    for token in tokens {
        let token = token.as_ref();
        let filter = match parse_token(token)? {
            Some(filter) => filter,
            None => {
                let fallback = format!("{DEFAULT_FIELD}={token}");
                parse_token(&fallback)?.ok_or_else(|| {
                    SprocketError::Query(format!("unrecognized filter '{token}'"))
                })?
            }
        };
        // one predicate per field; later tokens win
        filters.insert(filter.field.clone(), filter);
    }
    Ok(FilterSet { filters })
}

fn parse_token(token: &str) -> Result<Option<Filter>> {
    let Some(captures) = token_re().captures(token) else {
        return Ok(None);
    };
    let field = captures[1].to_string();
    let negated = captures.get(2).is_some();
    let operator = captures[3]
        .chars()
        .next()
        .ok_or_else(|| SprocketError::Query(format!("unrecognized filter '{token}'")))?;
    let value = &captures[4];

    let predicate = match operator {
        '=' => {
            if value.chars().any(|c| matches!(c, '*' | '?' | '[')) {
                Predicate::Glob(glob_regex(value)?)
            } else {
                Predicate::Exact(value.to_string())
            }
        }
        '~' => Predicate::Matches(compile_pattern(value)?),
        '>' => Predicate::Greater(parse_operand(value)?),
        '<' => Predicate::Less(parse_operand(value)?),
        other => {
            return Err(SprocketError::Query(format!(
                "unknown operator '{other}' in '{token}'"
            )));
        }
    };

    Ok(Some(Filter {
        field,
        negated,
        predicate,
    }))
}

fn parse_operand(value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| SprocketError::Query(format!("invalid filter value '{value}'")))
}

/// Translates a shell glob into an anchored regex. `*` requires at least
/// one character; `[...]` classes pass through with `!` negation.
fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => translated.push_str(".+"),
            '?' => translated.push('.'),
            '[' => {
                let mut members = String::new();
                let mut negation = None;
                let mut closed = false;
                if let Some(&next) = chars.peek() {
                    if next == '!' || next == '^' {
                        chars.next();
                        negation = Some(next);
                    }
                }
                for member in chars.by_ref() {
                    if member == ']' && !members.is_empty() {
                        closed = true;
                        break;
                    }
                    members.push(member);
                }
                if closed {
                    translated.push('[');
                    if negation.is_some() {
                        translated.push('^');
                    }
                    for member in members.chars() {
                        match member {
                            '\\' => translated.push_str("\\\\"),
                            ']' => translated.push_str("\\]"),
                            other => translated.push(other),
                        }
                    }
                    translated.push(']');
                } else {
                    // unclosed class: everything from the bracket is literal
                    translated.push_str(&regex::escape("["));
                    if let Some(negation) = negation {
                        translated.push_str(&regex::escape(&negation.to_string()));
                    }
                    translated.push_str(&regex::escape(&members));
                }
            }
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
        .map_err(|err| SprocketError::Query(format!("invalid glob '{pattern}': {err}")))
}

/// Compiles a `~` pattern, honoring a trailing `/flags` suffix (not
/// preceded by a backslash) drawn from `ilmsux`.
fn compile_pattern(value: &str) -> Result<Regex> {
    let (pattern, flags) = split_flags(value);
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag.to_ascii_lowercase() {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' => {
                builder.unicode(true);
            }
            // locale-dependent matching has no equivalent here
            'l' => {}
            other => {
                return Err(SprocketError::Query(format!(
                    "unknown regex flag '{other}'"
                )));
            }
        }
    }
    builder
        .build()
        .map_err(|err| SprocketError::Query(format!("invalid regex '{pattern}': {err}")))
}

fn split_flags(value: &str) -> (&str, &str) {
    if let Some(position) = value.rfind('/') {
        let flags = &value[position + 1..];
        if !flags.is_empty()
            && flags
                .chars()
                .all(|c| "ilmsux".contains(c.to_ascii_lowercase()))
            && !value[..position].ends_with('\\')
        {
            return (&value[..position], flags);
        }
    }
    (value, "")
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Applies every predicate to every record, preserving record order.
    /// An empty filter set matches everything.
    pub fn apply<'r>(&self, records: &'r [Record]) -> Result<Vec<&'r Record>> {
        let mut matches = Vec::new();
        for record in records {
            if self.matches(record)? {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    /// A record matches iff every predicate holds for its field. A
    /// predicate naming a field the record does not carry is fatal, not
    /// a silent non-match.
    pub fn matches(&self, record: &Record) -> Result<bool> {
        for filter in self.filters.values() {
            if record.get(&filter.field).is_none() {
                return Err(SprocketError::Query(format!(
                    "invalid filter key '{}'",
                    filter.field
                )));
            }
            if !filter.matches(record) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Filter {
    fn matches(&self, record: &Record) -> bool {
        let outcome = match &self.predicate {
            Predicate::Exact(operand) => record
                .string_form(&self.field)
                .is_some_and(|value| value == *operand),
            Predicate::Glob(pattern) | Predicate::Matches(pattern) => record
                .string_form(&self.field)
                .is_some_and(|value| pattern.is_match(&value)),
            Predicate::Greater(operand) => record
                .numeric_form(&self.field)
                .is_some_and(|value| value > *operand),
            Predicate::Less(operand) => record
                .numeric_form(&self.field)
                .is_some_and(|value| value < *operand),
        };
        if self.negated {
            !outcome
        } else {
            outcome
        }
    }
}
