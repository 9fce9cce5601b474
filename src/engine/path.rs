//! Path extractor
//!
//! Evaluates JSONPath-style expressions (`$.a.b[0]`, `$.items[*].id`)
//! against a structured value. Single-result paths yield the value or
//! `PathNotFound`; wildcard paths yield the ordered sequence of matches.

use serde_json::Value;

use crate::common::{Error, Result};

/// One step of a parsed path expression
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Result of a path extraction
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// A non-wildcard path matched exactly one value
    Single(Value),
    /// A wildcard path matched an ordered sequence (possibly empty)
    Many(Vec<Value>),
}

impl Extracted {
    /// Collapse into one value; wildcard matches become an array
    pub fn into_value(self) -> Value {
        match self {
            Extracted::Single(v) => v,
            Extracted::Many(items) => Value::Array(items),
        }
    }
}

/// Evaluate a path expression against a value
///
/// The input is never mutated. A non-wildcard path that fails to match
/// returns `PathNotFound`; wildcard paths skip elements missing the
/// remainder of the path.
pub fn extract(path: &str, root: &Value) -> Result<Extracted> {
    let segments = parse(path)?;

    if segments.iter().any(|s| *s == Segment::Wildcard) {
        let mut matches = Vec::new();
        collect(&segments, root, &mut matches);
        Ok(Extracted::Many(matches))
    } else {
        let mut current = root;
        for segment in &segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map
                    .get(key)
                    .ok_or_else(|| Error::PathNotFound(path.to_string()))?,
                (Segment::Index(idx), Value::Array(items)) => items
                    .get(*idx)
                    .ok_or_else(|| Error::PathNotFound(path.to_string()))?,
                _ => return Err(Error::PathNotFound(path.to_string())),
            };
        }
        Ok(Extracted::Single(current.clone()))
    }
}

/// `exists`-style check: `PathNotFound` maps to `false`
///
/// Syntax errors in the path expression still propagate.
pub fn exists(path: &str, root: &Value) -> Result<bool> {
    parse(path)?;
    match extract(path, root) {
        Ok(Extracted::Single(_)) => Ok(true),
        Ok(Extracted::Many(items)) => Ok(!items.is_empty()),
        Err(Error::PathNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

fn collect(segments: &[Segment], current: &Value, out: &mut Vec<Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(current.clone());
        return;
    };

    match (segment, current) {
        (Segment::Key(key), Value::Object(map)) => {
            if let Some(next) = map.get(key) {
                collect(rest, next, out);
            }
        }
        (Segment::Index(idx), Value::Array(items)) => {
            if let Some(next) = items.get(*idx) {
                collect(rest, next, out);
            }
        }
        (Segment::Wildcard, Value::Array(items)) => {
            for item in items {
                collect(rest, item, out);
            }
        }
        _ => {}
    }
}

fn parse(path: &str) -> Result<Vec<Segment>> {
    let invalid = |reason: &str| Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let rest = path
        .strip_prefix('$')
        .ok_or_else(|| invalid("must start with '$'"))?;

    let mut segments = Vec::new();
    let mut chars = rest.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                let start = i + 1;
                let mut end = rest.len();
                for (j, c) in rest[start..].char_indices() {
                    if c == '.' || c == '[' {
                        end = start + j;
                        break;
                    }
                }
                if start == end {
                    return Err(invalid("empty key segment"));
                }
                segments.push(Segment::Key(rest[start..end].to_string()));
                while chars.peek().map_or(false, |(j, _)| *j < end) {
                    chars.next();
                }
            }
            '[' => {
                let start = i + 1;
                let end = rest[start..]
                    .find(']')
                    .map(|j| start + j)
                    .ok_or_else(|| invalid("unterminated '['"))?;
                let token = &rest[start..end];
                if token == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    let idx: usize = token
                        .parse()
                        .map_err(|_| invalid("index must be a number or '*'"))?;
                    segments.push(Segment::Index(idx));
                }
                while chars.peek().map_or(false, |(j, _)| *j <= end) {
                    chars.next();
                }
            }
            _ => return Err(invalid("expected '.' or '['")),
        }
    }

    Ok(segments)
}
