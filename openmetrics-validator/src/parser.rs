//! Line-oriented parser for the OpenMetrics text format.
//!
//! [`Parser`] turns an exposition's bytes into a stream of [`Entry`] values:
//! metadata directives (`# TYPE`, `# HELP`, `# UNIT`), comments, sample
//! lines, and the mandatory `# EOF` terminator.  It enforces the grammar
//! only; semantic rules such as label uniqueness or counter monotonicity are
//! the validator's concern, so e.g. duplicate label names within one label
//! set are preserved rather than rejected here.

use thiserror::Error;

use crate::kind::MetricKind;
use crate::label::{Label, LabelSet};
use crate::model::Exemplar;

/// One entry of an exposition.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    /// A `# TYPE <name> <kind>` directive.
    Type {
        /// The metric family name.
        name: String,
        /// The declared kind.
        kind: MetricKind,
    },
    /// A `# HELP <name> <text>` directive.
    Help {
        /// The metric family name.
        name: String,
        /// The help text, with escape sequences resolved.
        text: String,
    },
    /// A `# UNIT <name> <text>` directive.
    Unit {
        /// The metric family name.
        name: String,
        /// The unit string.
        text: String,
    },
    /// A comment line carrying no directive.
    Comment,
    /// A sample line.
    Series(Series),
    /// The `# EOF` terminator.
    Eof,
}

/// A parsed sample line.
#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    /// The sample's metric name.
    pub name: String,
    /// Labels in exposition order, duplicates preserved.
    pub labels: LabelSet,
    /// The sample value.
    pub value: f64,
    /// Timestamp in milliseconds since the epoch, if the line carried one.
    pub timestamp: Option<i64>,
    /// Trailing exemplar, if the line carried one.
    pub exemplar: Option<Exemplar>,
}

/// Errors produced while parsing an exposition.
///
/// Parsing stops at the first error; the validator treats any of these as
/// fatal for the current exposition.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    /// The input was not valid UTF-8.
    #[error("exposition is not valid UTF-8")]
    InvalidUtf8,

    /// The input ended without the mandatory `# EOF` terminator.
    #[error("expected `# EOF` at the end of the exposition")]
    MissingEof,

    /// A line did not match the grammar.
    #[error("line {line}: {message}")]
    Syntax {
        /// 1-based line number of the offending line.
        line: usize,
        /// Description of the grammar violation.
        message: String,
    },
}

/// Pull parser over one exposition.
///
/// Create one per exposition and call [`next_entry`](Parser::next_entry)
/// until it yields [`Entry::Eof`] or an error.
pub struct Parser<'a> {
    rest: &'a str,
    line: usize,
    done: bool,
}

impl<'a> Parser<'a> {
    /// Creates a parser over the given exposition bytes.
    pub fn new(input: &'a [u8]) -> Result<Parser<'a>, ParseError> {
        let rest = std::str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)?;
        Ok(Parser { rest, line: 0, done: false })
    }

    /// Returns the next entry, or an error describing why the exposition is
    /// malformed.  After the terminator has been reached, keeps returning
    /// [`Entry::Eof`].
    pub fn next_entry(&mut self) -> Result<Entry, ParseError> {
        if self.done {
            return Ok(Entry::Eof);
        }
        let Some(line) = self.take_line() else {
            return Err(ParseError::MissingEof);
        };
        if line == "# EOF" {
            self.done = true;
            if !self.rest.is_empty() {
                return Err(ParseError::Syntax {
                    line: self.line + 1,
                    message: "unexpected data after `# EOF`".to_string(),
                });
            }
            return Ok(Entry::Eof);
        }
        if line.is_empty() {
            return Err(self.syntax("unexpected blank line"));
        }
        if line.starts_with('#') {
            return self.parse_directive(line);
        }
        self.parse_series(line)
    }

    fn take_line(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        self.line += 1;
        match self.rest.find('\n') {
            Some(idx) => {
                let line = &self.rest[..idx];
                self.rest = &self.rest[idx + 1..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = "";
                Some(line)
            }
        }
    }

    fn syntax(&self, message: &str) -> ParseError {
        ParseError::Syntax { line: self.line, message: message.to_string() }
    }

    fn parse_directive(&self, line: &str) -> Result<Entry, ParseError> {
        let Some(body) = line.strip_prefix("# ") else {
            return Err(self.syntax("expected space after `#`"));
        };
        if let Some(rest) = body.strip_prefix("TYPE ") {
            let Some((name, kind_str)) = rest.split_once(' ') else {
                return Err(self.syntax("expected metric name and type"));
            };
            self.validate_metric_name(name)?;
            let Some(kind) = MetricKind::parse(kind_str) else {
                return Err(self.syntax(&format!("invalid metric type {:?}", kind_str)));
            };
            return Ok(Entry::Type { name: name.to_string(), kind });
        }
        if let Some(rest) = body.strip_prefix("HELP ") {
            let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
            self.validate_metric_name(name)?;
            return Ok(Entry::Help { name: name.to_string(), text: unescape_text(text) });
        }
        if let Some(rest) = body.strip_prefix("UNIT ") {
            let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
            self.validate_metric_name(name)?;
            return Ok(Entry::Unit { name: name.to_string(), text: text.to_string() });
        }
        match body {
            "TYPE" => Err(self.syntax("expected metric name and type")),
            "HELP" | "UNIT" => Err(self.syntax("expected metric name")),
            _ => Ok(Entry::Comment),
        }
    }

    fn validate_metric_name(&self, name: &str) -> Result<(), ParseError> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            None => false,
            Some(first) => valid_name_start_char(first) && chars.all(valid_name_char),
        };
        if valid {
            Ok(())
        } else {
            Err(self.syntax(&format!("invalid metric name {:?}", name)))
        }
    }

    fn parse_series(&self, line: &str) -> Result<Entry, ParseError> {
        let mut cursor = Cursor { rest: line, line: self.line };
        let name = take_metric_name(&mut cursor)?;
        let labels = if cursor.peek() == Some('{') {
            parse_label_set(&mut cursor)?
        } else {
            LabelSet::new()
        };
        cursor.expect(' ')?;
        let value = take_float(&mut cursor, "invalid value")?;

        let mut timestamp = None;
        let mut exemplar = None;
        if !cursor.at_end() {
            cursor.expect(' ')?;
            if cursor.peek() == Some('#') {
                exemplar = Some(parse_exemplar(&mut cursor)?);
            } else {
                let ts = take_float(&mut cursor, "invalid timestamp")?;
                if !ts.is_finite() {
                    return Err(cursor.syntax("invalid timestamp"));
                }
                timestamp = Some((ts * 1000.0) as i64);
                if !cursor.at_end() {
                    cursor.expect(' ')?;
                    if cursor.peek() == Some('#') {
                        exemplar = Some(parse_exemplar(&mut cursor)?);
                    } else {
                        return Err(cursor.syntax("unexpected trailing data"));
                    }
                }
            }
        }
        if !cursor.at_end() {
            return Err(cursor.syntax("unexpected trailing data"));
        }

        Ok(Entry::Series(Series {
            name: name.to_string(),
            labels,
            value,
            timestamp,
            exemplar,
        }))
    }
}

struct Cursor<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let mut chars = self.rest.chars();
        let c = chars.next()?;
        self.rest = chars.as_str();
        Some(c)
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(self.syntax(&format!("expected {:?}", want)))
        }
    }

    fn take_until_space(&mut self) -> &'a str {
        match self.rest.find(' ') {
            Some(idx) => {
                let token = &self.rest[..idx];
                self.rest = &self.rest[idx..];
                token
            }
            None => {
                let token = self.rest;
                self.rest = "";
                token
            }
        }
    }

    fn syntax(&self, message: &str) -> ParseError {
        ParseError::Syntax { line: self.line, message: message.to_string() }
    }
}

fn take_metric_name<'a>(cursor: &mut Cursor<'a>) -> Result<&'a str, ParseError> {
    let s = cursor.rest;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let valid = if idx == 0 { valid_name_start_char(c) } else { valid_name_char(c) };
        if !valid {
            break;
        }
        end = idx + c.len_utf8();
    }
    if end == 0 {
        return Err(cursor.syntax("expected metric name"));
    }
    cursor.rest = &s[end..];
    Ok(&s[..end])
}

fn take_label_name<'a>(cursor: &mut Cursor<'a>) -> Result<&'a str, ParseError> {
    let s = cursor.rest;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let valid = if idx == 0 { valid_label_start_char(c) } else { valid_label_char(c) };
        if !valid {
            break;
        }
        end = idx + c.len_utf8();
    }
    if end == 0 {
        return Err(cursor.syntax("expected label name"));
    }
    cursor.rest = &s[end..];
    Ok(&s[..end])
}

fn parse_label_set(cursor: &mut Cursor<'_>) -> Result<LabelSet, ParseError> {
    cursor.expect('{')?;
    let mut labels = LabelSet::new();
    if cursor.eat('}') {
        return Ok(labels);
    }
    loop {
        let name = take_label_name(cursor)?;
        cursor.expect('=')?;
        let value = take_quoted_string(cursor)?;
        labels.push(Label::new(name, value));
        if cursor.eat(',') {
            continue;
        }
        cursor.expect('}')?;
        return Ok(labels);
    }
}

fn take_quoted_string(cursor: &mut Cursor<'_>) -> Result<String, ParseError> {
    cursor.expect('"')?;
    let mut out = String::new();
    loop {
        match cursor.bump() {
            None => return Err(cursor.syntax("unterminated label value")),
            Some('"') => return Ok(out),
            Some('\\') => match cursor.bump() {
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some('n') => out.push('\n'),
                Some(c) => {
                    return Err(cursor.syntax(&format!("invalid escape sequence \\{}", c)))
                }
                None => return Err(cursor.syntax("unterminated label value")),
            },
            Some(c) => out.push(c),
        }
    }
}

fn take_float(cursor: &mut Cursor<'_>, what: &str) -> Result<f64, ParseError> {
    let token = cursor.take_until_space();
    token
        .parse::<f64>()
        .map_err(|_| cursor.syntax(&format!("{} {:?}", what, token)))
}

fn parse_exemplar(cursor: &mut Cursor<'_>) -> Result<Exemplar, ParseError> {
    cursor.expect('#')?;
    cursor.expect(' ')?;
    let labels = parse_label_set(cursor)?;
    cursor.expect(' ')?;
    let value = take_float(cursor, "invalid exemplar value")?;
    let mut timestamp = None;
    if !cursor.at_end() {
        cursor.expect(' ')?;
        let ts = take_float(cursor, "invalid exemplar timestamp")?;
        if ts.is_nan() {
            return Err(cursor.syntax("invalid exemplar timestamp"));
        }
        timestamp = Some((ts * 1000.0) as i64);
    }
    Ok(Exemplar { labels, value, timestamp })
}

#[inline]
fn valid_name_start_char(c: char) -> bool {
    // Metric names match [a-zA-Z_:][a-zA-Z0-9_:]*.
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
fn valid_label_start_char(c: char) -> bool {
    // Label names match [a-zA-Z_][a-zA-Z0-9_]*.
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn valid_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Resolves `\\` and `\n` escape sequences in HELP text.  Unknown escape
/// sequences pass through verbatim.
fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{Entry, ParseError, Parser, Series};
    use crate::kind::MetricKind;
    use crate::label::LabelSet;
    use crate::model::Exemplar;
    use proptest::prelude::*;

    fn parse_all(input: &str) -> Result<Vec<Entry>, ParseError> {
        let mut parser = Parser::new(input.as_bytes())?;
        let mut entries = Vec::new();
        loop {
            match parser.next_entry()? {
                Entry::Eof => {
                    entries.push(Entry::Eof);
                    return Ok(entries);
                }
                entry => entries.push(entry),
            }
        }
    }

    fn parse_one_series(line: &str) -> Series {
        let input = format!("{}\n# EOF", line);
        let entries = parse_all(&input).expect("series should parse");
        match entries.into_iter().next() {
            Some(Entry::Series(series)) => series,
            other => panic!("expected series entry, got {:?}", other),
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_bare_series() {
        let series = parse_one_series("a 1");
        assert_eq!(series.name, "a");
        assert!(series.labels.is_empty());
        assert_eq!(series.value, 1.0);
        assert_eq!(series.timestamp, None);
        assert_eq!(series.exemplar, None);
    }

    #[test]
    fn test_series_with_labels_and_timestamp() {
        let series = parse_one_series("http_requests_total{code=\"200\",path=\"/\"} 1027 123.5");
        assert_eq!(series.name, "http_requests_total");
        assert_eq!(series.labels, labels(&[("code", "200"), ("path", "/")]));
        assert_eq!(series.value, 1027.0);
        assert_eq!(series.timestamp, Some(123_500));
    }

    #[test]
    fn test_series_special_values() {
        assert!(parse_one_series("a NaN").value.is_nan());
        assert_eq!(parse_one_series("a +Inf").value, f64::INFINITY);
        assert_eq!(parse_one_series("a -Inf").value, f64::NEG_INFINITY);
        assert_eq!(parse_one_series("a -1.5e3").value, -1500.0);
    }

    #[test]
    fn test_series_escapes() {
        let series = parse_one_series(r#"a{b="q\"u\"x",c="back\\slash",d="new\nline"} 1"#);
        assert_eq!(
            series.labels,
            labels(&[("b", "q\"u\"x"), ("c", "back\\slash"), ("d", "new\nline")])
        );
    }

    #[test]
    fn test_series_duplicate_label_names_preserved() {
        let series = parse_one_series(r#"a{a="1",a="1"} 1"#);
        assert_eq!(series.labels.len(), 2);
    }

    #[test]
    fn test_empty_label_set() {
        let series = parse_one_series("a{} 1");
        assert!(series.labels.is_empty());
    }

    #[test]
    fn test_exemplar_without_timestamp() {
        let series = parse_one_series(r#"a_total 1 # {trace_id="abc"} 0.5"#);
        assert_eq!(
            series.exemplar,
            Some(Exemplar { labels: labels(&[("trace_id", "abc")]), value: 0.5, timestamp: None })
        );
        assert_eq!(series.timestamp, None);
    }

    #[test]
    fn test_exemplar_after_timestamp() {
        let series = parse_one_series(r#"a_total 1 2 # {trace_id="abc"} 0.5 3.25"#);
        assert_eq!(series.timestamp, Some(2000));
        assert_eq!(
            series.exemplar,
            Some(Exemplar {
                labels: labels(&[("trace_id", "abc")]),
                value: 0.5,
                timestamp: Some(3250),
            })
        );
    }

    #[test]
    fn test_invalid_exemplar_timestamp() {
        let input = "# TYPE a counter\na_total 1 # {a=\"b\"} 0.5 NaN\n# EOF";
        let err = parse_all(input).unwrap_err();
        assert!(err.to_string().contains("invalid exemplar timestamp"), "got {err}");
    }

    #[test]
    fn test_directives() {
        let input = "# TYPE a counter\n# HELP a some help\n# UNIT a_seconds seconds\n# just a comment\n# EOF";
        let entries = parse_all(input).unwrap();
        assert_eq!(
            entries,
            vec![
                Entry::Type { name: "a".to_string(), kind: MetricKind::Counter },
                Entry::Help { name: "a".to_string(), text: "some help".to_string() },
                Entry::Unit { name: "a_seconds".to_string(), text: "seconds".to_string() },
                Entry::Comment,
                Entry::Eof,
            ]
        );
    }

    #[test]
    fn test_help_escapes() {
        let input = "# HELP a first\\nsecond \\\\ third\n# EOF";
        let entries = parse_all(input).unwrap();
        assert_eq!(
            entries[0],
            Entry::Help { name: "a".to_string(), text: "first\nsecond \\ third".to_string() },
        );
    }

    #[test]
    fn test_invalid_metric_type() {
        let err = parse_all("# TYPE a untyped\n# EOF").unwrap_err();
        assert!(err.to_string().contains("invalid metric type"), "got {err}");
    }

    #[test]
    fn test_missing_eof() {
        assert_eq!(parse_all("a 1\n").unwrap_err(), ParseError::MissingEof);
        assert_eq!(parse_all("").unwrap_err(), ParseError::MissingEof);
    }

    #[test]
    fn test_data_after_eof() {
        let err = parse_all("# EOF\na 1").unwrap_err();
        assert!(err.to_string().contains("unexpected data after `# EOF`"), "got {err}");
    }

    #[test]
    fn test_blank_line_rejected() {
        let err = parse_all("a 1\n\n# EOF").unwrap_err();
        assert!(err.to_string().contains("unexpected blank line"), "got {err}");
    }

    #[test]
    fn test_invalid_utf8() {
        assert_eq!(Parser::new(&[0xff, 0xfe]).err(), Some(ParseError::InvalidUtf8));
    }

    #[test]
    fn test_syntax_errors_carry_line_numbers() {
        let err = parse_all("a 1\nb oops\n# EOF").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_series_lines() {
        let cases = &[
            "{a=\"b\"} 1",
            "a",
            "a{a=\"b\" 1",
            "a{a=b} 1",
            "a{a=\"b\"}1",
            "a 1 2 3",
            "a 1 NaN",
            "a{0bad=\"b\"} 1",
            "a{a=\"b\\x\"} 1",
        ];
        for case in cases {
            let input = format!("{}\n# EOF", case);
            assert!(parse_all(&input).is_err(), "expected {:?} to be rejected", case);
        }
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut parser = Parser::new(b"# EOF").unwrap();
        assert_eq!(parser.next_entry().unwrap(), Entry::Eof);
        assert_eq!(parser.next_entry().unwrap(), Entry::Eof);
    }

    proptest! {
        #[test]
        fn test_label_value_escape_round_trip(value in "[ -~]*") {
            let escaped = crate::label::escape_label_value(&value);
            let line = format!("a{{x=\"{}\"}} 1", escaped);
            let series = parse_one_series(&line);
            prop_assert_eq!(series.labels.get("x"), Some(value.as_str()));
        }
    }
}
