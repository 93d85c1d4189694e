//! Typed values and the comparison semantics shared by WHERE evaluation,
//! ORDER BY, and index keys.
//!
//! Storage coerces every SQL data type down to three physical classes
//! (`INT`, `DOUBLE`, `STRING`); `NULL` is a value of its own.

use std::cmp::Ordering;
use std::fmt;

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Str(String),
    Null,
}

/// Comparison operators understood by WHERE clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    /// Substring containment.
    Like,
}

impl CompareOp {
    /// Parse the operator symbol as rendered by `Display`.
    pub fn parse(s: &str) -> Option<CompareOp> {
        Some(match s.trim() {
            "=" => CompareOp::Eq,
            "<>" | "!=" => CompareOp::NotEq,
            "<" => CompareOp::Lt,
            ">" => CompareOp::Gt,
            "<=" => CompareOp::Le,
            ">=" => CompareOp::Ge,
            "LIKE" | "like" => CompareOp::Like,
            _ => return None,
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        };
        f.write_str(s)
    }
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it has one. Strings participate when
    /// they parse as a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    /// Integer view, without going through f64 for `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) => Some(*d as i64),
            Value::Str(s) => s.trim().parse::<i64>().ok(),
            Value::Null => None,
        }
    }

    /// Render the value the way it compares and displays. NULL renders
    /// as the literal string `NULL`.
    pub fn render(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    format!("{:.1}", d)
                } else {
                    d.to_string()
                }
            }
            Value::Str(s) => s.clone(),
            Value::Null => "NULL".to_string(),
        }
    }

    /// Evaluate `self op other` under WHERE semantics.
    ///
    /// NULL in either operand yields a non-match: three-valued logic is
    /// collapsed to `false`.
    pub fn matches(&self, op: CompareOp, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match op {
            CompareOp::Eq => self.loose_eq(other),
            CompareOp::NotEq => !self.loose_eq(other),
            CompareOp::Like => self.render().contains(&other.render()),
            CompareOp::Lt | CompareOp::Gt | CompareOp::Le | CompareOp::Ge => {
                let ord = self.loose_cmp(other);
                match op {
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                    _ => unreachable!(),
                }
            }
        }
    }

    /// Equality: string-identical, or equal as numbers when both sides
    /// parse as numbers.
    fn loose_eq(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a == b;
        }
        self.render() == other.render()
    }

    /// Ordering: numeric when both sides parse as numbers, else
    /// lexicographic on the rendered form.
    fn loose_cmp(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        self.render().cmp(&other.render())
    }

    /// Total order for sorting result rows. NULLs sort first; otherwise
    /// the WHERE ordering applies.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.loose_cmp(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(Value::Int(2).matches(CompareOp::Eq, &Value::Double(2.0)));
        assert!(Value::Str("2".into()).matches(CompareOp::Eq, &Value::Int(2)));
        assert!(Value::Int(2).matches(CompareOp::NotEq, &Value::Int(3)));
    }

    #[test]
    fn test_string_equality_when_not_numeric() {
        assert!(Value::Str("abc".into()).matches(CompareOp::Eq, &Value::Str("abc".into())));
        assert!(!Value::Str("abc".into()).matches(CompareOp::Eq, &Value::Str("abd".into())));
    }

    #[test]
    fn test_ordering_numeric_vs_lexicographic() {
        // Numeric: 9 < 10
        assert!(Value::Int(9).matches(CompareOp::Lt, &Value::Int(10)));
        assert!(Value::Str("9".into()).matches(CompareOp::Lt, &Value::Str("10".into())));
        // Lexicographic: "9" > "10" would hold as strings, but both parse
        // as numbers so numeric wins above; pure strings fall back:
        assert!(Value::Str("apple".into()).matches(CompareOp::Lt, &Value::Str("banana".into())));
    }

    #[test]
    fn test_like_is_substring() {
        assert!(Value::Str("Alice".into()).matches(CompareOp::Like, &Value::Str("lic".into())));
        assert!(!Value::Str("Alice".into()).matches(CompareOp::Like, &Value::Str("bob".into())));
    }

    #[test]
    fn test_null_never_matches() {
        for op in [
            CompareOp::Eq,
            CompareOp::NotEq,
            CompareOp::Lt,
            CompareOp::Gt,
            CompareOp::Le,
            CompareOp::Ge,
            CompareOp::Like,
        ] {
            assert!(!Value::Null.matches(op, &Value::Int(1)));
            assert!(!Value::Int(1).matches(op, &Value::Null));
        }
    }

    #[test]
    fn test_sort_cmp_nulls_first() {
        assert_eq!(Value::Null.sort_cmp(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Int(2)), Ordering::Less);
    }
}
