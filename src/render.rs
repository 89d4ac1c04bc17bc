//! Output templating: `%field` placeholders plus `@{expr}` / `${expr}`
//! inline expressions.
//!
//! Expressions are expanded first, then field placeholders, so values
//! coming back from the daemon are never re-interpreted as template
//! syntax.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    error::{Result, SprocketError},
    expr,
    record::Record,
};

pub const DEFAULT_TEMPLATE: &str = "%name";
pub const HASH_TEMPLATE: &str = "%hash";

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
static EXPRESSION_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE
        .get_or_init(|| Regex::new(r"%([A-Za-z-]+)").expect("placeholder pattern compiles"))
}

fn expression_re() -> &'static Regex {
    EXPRESSION_RE
        .get_or_init(|| Regex::new(r"[@$]\{([^}]+)\}").expect("expression pattern compiles"))
}

pub fn render(template: &str, record: &Record) -> Result<String> {
    let expanded = expand(expression_re(), template, |expression| {
        expr::evaluate(expression, record).map(|value| value.to_string())
    })?;
    expand(placeholder_re(), &expanded, |field| {
        record
            .string_form(field)
            .ok_or_else(|| SprocketError::OutputFormat(format!("unknown field '%{field}'")))
    })
}

pub fn render_all(template: &str, records: &[&Record], separator: &str) -> Result<String> {
    let mut lines = Vec::with_capacity(records.len());
    for record in records {
        lines.push(render(template, record)?);
    }
    Ok(lines.join(separator))
}

fn expand<F>(pattern: &Regex, input: &str, mut substitute: F) -> Result<String>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for captures in pattern.captures_iter(input) {
        let whole = captures.get(0).ok_or_else(|| {
            SprocketError::OutputFormat("placeholder match vanished".into())
        })?;
        let inner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        output.push_str(&input[last..whole.start()]);
        output.push_str(&substitute(inner)?);
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use serde_json::json;

    fn record(name: &str, ratio: f64) -> Record {
        let fields: BTreeMap<String, serde_json::Value> = [
            ("id".to_string(), json!(3)),
            ("name".to_string(), json!(name)),
            ("hash".to_string(), json!("deadbeef")),
            ("ratio".to_string(), json!(ratio)),
        ]
        .into_iter()
        .collect();
        Record::from_fields(fields)
    }

    #[test]
    fn substitutes_placeholders() {
        let record = record("ubuntu.iso", 0.25);
        let output = render("%id %name (%hash)", &record).expect("render succeeds");
        assert_eq!(output, "3 ubuntu.iso (deadbeef)");
    }

    #[test]
    fn unknown_placeholder_is_fatal() {
        let record = record("ubuntu.iso", 0.25);
        let err = render("%bogus", &record).expect_err("unknown field must fail");
        assert!(matches!(err, SprocketError::OutputFormat(_)), "got {err:?}");
    }

    #[test]
    fn evaluates_inline_expressions() {
        let record = record("ubuntu.iso", 0.25);
        let output = render("%name @{ratio * 100}%", &record).expect("render succeeds");
        assert_eq!(output, "ubuntu.iso 25%");

        let output = render("${upper(name)}", &record).expect("render succeeds");
        assert_eq!(output, "UBUNTU.ISO");
    }

    #[test]
    fn expressions_expand_before_placeholders() {
        // a record value that looks like template syntax stays inert
        let record = record("@{1/0}", 0.25);
        let output = render("%name", &record).expect("render succeeds");
        assert_eq!(output, "@{1/0}");
    }

    #[test]
    fn joins_records_with_the_separator() {
        let first = record("a", 0.1);
        let second = record("b", 0.2);
        let output =
            render_all("%name", &[&first, &second], "\0").expect("render succeeds");
        assert_eq!(output, "a\0b");
    }
}
