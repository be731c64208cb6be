//! Minimal JSONPath evaluator covering the dialect used by chaos plans:
//! `$.a.b`, `$.a[*].b` and `$[*]`. Richer expressions are rejected so that
//! strict replay mode can fail fast instead of silently skipping targets.

use serde_json::Value;
use thiserror::Error;

/// JSONPath parse failure.
#[derive(Debug, Error)]
pub enum JsonPathError {
    /// Expression uses syntax outside the supported subset.
    #[error("unsupported JSONPath expression `{0}`")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Wildcard,
}

/// A parsed JSONPath expression.
#[derive(Debug, Clone)]
pub struct JsonPath {
    expr: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse an expression. Only `$`, `.name` and `[*]` segments are accepted.
    pub fn parse(expr: &str) -> Result<Self, JsonPathError> {
        let rest = expr
            .strip_prefix('$')
            .ok_or_else(|| JsonPathError::Unsupported(expr.to_string()))?;

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        name.push(next);
                        chars.next();
                    }
                    if name.is_empty() {
                        return Err(JsonPathError::Unsupported(expr.to_string()));
                    }
                    segments.push(Segment::Key(name));
                }
                '[' => {
                    if chars.next() != Some('*') || chars.next() != Some(']') {
                        return Err(JsonPathError::Unsupported(expr.to_string()));
                    }
                    segments.push(Segment::Wildcard);
                }
                _ => return Err(JsonPathError::Unsupported(expr.to_string())),
            }
        }

        if segments.is_empty() {
            return Err(JsonPathError::Unsupported(expr.to_string()));
        }

        Ok(Self { expr: expr.to_string(), segments })
    }

    /// The original expression text.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Visit every value matched by the path, in document order.
    pub fn for_each_mut(&self, root: &mut Value, f: &mut dyn FnMut(&mut Value)) {
        walk(&self.segments, root, f);
    }

    /// Count matches without mutating.
    pub fn count_matches(&self, root: &Value) -> usize {
        let mut root = root.clone();
        let mut n = 0;
        self.for_each_mut(&mut root, &mut |_| n += 1);
        n
    }
}

fn walk(segments: &[Segment], value: &mut Value, f: &mut dyn FnMut(&mut Value)) {
    let Some((head, rest)) = segments.split_first() else {
        f(value);
        return;
    };
    match head {
        Segment::Key(key) => {
            if let Some(child) = value.as_object_mut().and_then(|obj| obj.get_mut(key)) {
                walk(rest, child, f);
            }
        }
        Segment::Wildcard => {
            if let Some(items) = value.as_array_mut() {
                for item in items {
                    walk(rest, item, f);
                }
            }
        }
    }
}
