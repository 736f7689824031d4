//! Reference grammar: splitting, classification, and query building.
//!
//! References use dot notation (`companyId.municipalId.name`). A hop is
//! either a plain field name or a reverse-reference expression:
//!
//! ```text
//! addresses(personId=id, address="Alphabet st. 1")
//! ^a        ^b       ^c  ^d
//! ```
//!
//! a) collection holding the records we want
//! b) field in that collection to query on
//! c) field on the current record supplying the query value
//! d) literal filter (quoted string or number), AND-combined into the query
//!
//! The first filter's operator fixes cardinality: `=` is one-to-many
//! (deduplicated ordered list), `==` is one-to-one (scalar). A segment that
//! does not match the grammar is not an error; the resolver treats it as a
//! plain forward field name.

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

/// One hop of a parsed reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Hop {
    /// Plain field name, resolved by reading the field off the current record.
    Forward(String),
    /// Reverse-reference expression, resolved by querying a collection.
    Reverse(ReverseReference),
}

/// Parsed form of a reverse-reference segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReverseReference {
    /// Collection to query.
    pub collection: String,
    /// Query field -> field on the current record supplying the value.
    pub references: IndexMap<String, String>,
    /// Query field -> literal value (quoted strings and numbers).
    pub filters: JsonMap<String, Value>,
    /// `false` only when the first filter used `==`.
    pub one_to_many: bool,
}

impl ReverseReference {
    /// Builds the fetch query for this reverse reference against a record.
    pub fn query(&self, record: &Value) -> JsonMap<String, Value> {
        build_query(record, &self.references, &self.filters)
    }
}

/// Splits a reference into hop segments.
///
/// Splits on `.` at depth zero only: a parenthesized reverse-reference
/// segment stays atomic, including quoted literals containing dots. Empty
/// segments are dropped, so the empty string yields an empty vec.
pub fn split_reference(reference: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;

    for ch in reference.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_quotes => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '.' if !in_quotes && depth == 0 => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Splits a reference and classifies every segment.
pub fn parse_hops(reference: &str) -> Vec<Hop> {
    split_reference(reference).into_iter().map(classify_segment).collect()
}

/// Classifies a single segment as a reverse or forward hop.
pub fn classify_segment(segment: String) -> Hop {
    match parse_reverse_reference(&segment) {
        Some(reverse) => Hop::Reverse(reverse),
        None => Hop::Forward(segment),
    }
}

/// Returns the cardinality of a reference's first hop.
///
/// `true` for one-to-many reverse references; `false` for one-to-one
/// reverse references and for anything that is not a reverse reference.
pub fn is_one_to_many(reference: &str) -> bool {
    split_reference(reference)
        .first()
        .and_then(|segment| parse_reverse_reference(segment))
        .map(|reverse| reverse.one_to_many)
        .unwrap_or(false)
}

/// Parses a reverse-reference segment, returning `None` on any mismatch.
///
/// Grammar: `Collection "(" Filter ("," Filter)* ")"` with
/// `Filter := Field ("="|"==") (Field | QuotedString | Number)`. Only the
/// first filter may use `==`. Unquoted non-numeric values are field
/// references; quoted strings and numeric literals are filters.
pub fn parse_reverse_reference(segment: &str) -> Option<ReverseReference> {
    let mut scanner = Scanner::new(segment);

    let collection = scanner.ident()?;
    scanner.expect('(')?;

    let mut references = IndexMap::new();
    let mut filters = JsonMap::new();
    let mut one_to_many = true;
    let mut index = 0usize;

    loop {
        scanner.skip_whitespace();
        let field = scanner.ident()?;
        scanner.expect('=')?;
        let exact = scanner.eat('=');
        if exact {
            // Cardinality is a property of the whole expression; only the
            // first filter may fix it.
            if index > 0 {
                return None;
            }
            one_to_many = false;
        }
        scanner.skip_whitespace();

        match scanner.value()? {
            FilterValue::FieldReference(source_field) => {
                references.insert(field, source_field);
            }
            FilterValue::Literal(literal) => {
                filters.insert(field, literal);
            }
        }

        scanner.skip_whitespace();
        if scanner.eat(',') {
            index += 1;
            continue;
        }
        scanner.expect(')')?;
        break;
    }

    if !scanner.at_end() {
        return None;
    }

    Some(ReverseReference {
        collection,
        references,
        filters,
        one_to_many,
    })
}

/// Resolves `references` against a record and merges `filters` over the
/// result. Filters win on key collisions; missing source fields resolve to
/// `null`.
pub fn build_query(record: &Value, references: &IndexMap<String, String>, filters: &JsonMap<String, Value>) -> JsonMap<String, Value> {
    let mut query = JsonMap::new();
    for (query_field, source_field) in references {
        let value = record.get(source_field).cloned().unwrap_or(Value::Null);
        query.insert(query_field.clone(), value);
    }
    for (query_field, literal) in filters {
        query.insert(query_field.clone(), literal.clone());
    }
    query
}

/// Deterministic memo key for a fetch call.
///
/// Always prefixed with the reference, so the same key against two
/// different references never shares a memo slot. Structured keys
/// (reverse-reference queries) hash to their canonical JSON
/// serialization; `serde_json` object keys are sorted, so semantically
/// equal queries hash identically.
pub fn hash_fetch_call(key: &Value, reference: &str) -> String {
    match key {
        Value::Object(_) | Value::Array(_) => format!("{}:{}", reference, key),
        scalar => format!("{}:{}", reference, format_key_id(scalar)),
    }
}

/// Renders a resolved id for use in a composite `collection::id` key.
pub fn format_key_id(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

enum FilterValue {
    FieldReference(String),
    Literal(Value),
}

/// Minimal cursor over a reverse-reference segment.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Consumes `expected` or fails the parse.
    fn expect(&mut self, expected: char) -> Option<()> {
        self.eat(expected).then_some(())
    }

    fn eat(&mut self, expected: char) -> bool {
        match self.rest.strip_prefix(expected) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    /// Consumes a non-empty identifier (`[A-Za-z0-9_-]+`).
    fn ident(&mut self) -> Option<String> {
        let end = self
            .rest
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (ident, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(ident.to_string())
    }

    /// Consumes a filter value: quoted string, number, or field reference.
    fn value(&mut self) -> Option<FilterValue> {
        if self.eat('"') {
            let end = self.rest.find('"')?;
            let (literal, rest) = self.rest.split_at(end);
            self.rest = &rest[1..];
            return Some(FilterValue::Literal(Value::String(literal.to_string())));
        }

        // Unquoted token: identifier characters plus '.' so numeric
        // literals like 123.435 stay whole.
        let end = self
            .rest
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return None;
        }
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;

        if let Ok(integer) = token.parse::<i64>() {
            return Some(FilterValue::Literal(Value::from(integer)));
        }
        if let Ok(float) = token.parse::<f64>() {
            return Some(FilterValue::Literal(serde_json::Number::from_f64(float).map(Value::Number)?));
        }
        Some(FilterValue::FieldReference(token.to_string()))
    }
}
