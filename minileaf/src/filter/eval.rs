use std::cmp::Ordering;

use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::MinileafResult;
use crate::filter::{FieldOp, Filter};

/// Resolves a dotted field path against a document. Shared by the filter
/// evaluator and the index key extractors so both agree on path semantics.
#[inline]
pub fn resolve_path(document: &Document, path: &str) -> Option<Value> {
    document.get_path(path)
}

impl Filter {
    /// Evaluates this filter against a document.
    pub fn matches(&self, document: &Document) -> MinileafResult<bool> {
        match self {
            Filter::And(clauses) => {
                for clause in clauses {
                    if !clause.matches(document)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(clauses) => {
                for clause in clauses {
                    if clause.matches(document)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Filter::Not(clause) => Ok(!clause.matches(document)?),
            Filter::Field { path, ops } => {
                let resolved = resolve_path(document, path);
                for op in ops {
                    if !apply_op(op, resolved.as_ref())? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

fn apply_op(op: &FieldOp, resolved: Option<&Value>) -> MinileafResult<bool> {
    match op {
        FieldOp::Eq(operand) => Ok(values_equal(resolved, operand)),
        FieldOp::Ne(operand) => Ok(!values_equal(resolved, operand)),
        FieldOp::Gt(operand) => Ok(compare(resolved, operand) == Some(Ordering::Greater)),
        FieldOp::Gte(operand) => Ok(matches!(
            compare(resolved, operand),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )),
        FieldOp::Lt(operand) => Ok(compare(resolved, operand) == Some(Ordering::Less)),
        FieldOp::Lte(operand) => Ok(matches!(
            compare(resolved, operand),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )),
        FieldOp::In(operands) => Ok(operands.iter().any(|v| values_equal(resolved, v))),
        FieldOp::Nin(operands) => Ok(!operands.iter().any(|v| values_equal(resolved, v))),
        FieldOp::Exists(expected) => Ok(resolved.is_some() == *expected),
        FieldOp::Regex(regex) => Ok(match resolved {
            Some(Value::Text(text)) => regex.is_match(text),
            _ => false,
        }),
        FieldOp::ElemMatch(sub_filter) => {
            let items = match resolved {
                Some(Value::Array(items)) => items,
                _ => return Ok(false),
            };
            for item in items {
                if let Value::Object(element) = item {
                    if sub_filter.matches(element)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
    }
}

/// Equality between a resolved field value and a filter operand.
///
/// A missing path compares equal only to an explicit null operand. A
/// timestamp operand triggers temporal coercion of the stored value, so a
/// document storing `"2024-01-01T12:00:00Z"` and one storing the epoch-ms
/// integer both match the same timestamp operand.
fn values_equal(resolved: Option<&Value>, operand: &Value) -> bool {
    let stored = match resolved {
        None => return operand.is_null(),
        Some(value) => value,
    };
    if let Value::Timestamp(operand_ms) = operand {
        return match stored.to_epoch_millis() {
            Some(stored_ms) => stored_ms == *operand_ms,
            None => false,
        };
    }
    stored == operand
}

/// Ordering between a resolved field value and a filter operand; `None`
/// means the pair is not comparable (missing path, class mismatch), which
/// never satisfies a range operator.
fn compare(resolved: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let stored = resolved?;
    if let Value::Timestamp(operand_ms) = operand {
        return stored.to_epoch_millis().map(|stored_ms| stored_ms.cmp(operand_ms));
    }
    if stored.is_number() && operand.is_number() {
        return Some(stored.cmp(operand));
    }
    match (stored, operand) {
        (Value::Text(_), Value::Text(_))
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Timestamp(_), Value::Timestamp(_)) => Some(stored.cmp(operand)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn matches(filter: &Document, document: &Document) -> bool {
        Filter::parse(filter).unwrap().matches(document).unwrap()
    }

    #[test]
    fn test_literal_equality() {
        let doc = doc! { "name": "Alice", "age": 30i64 };
        assert!(matches(&doc! { "name": "Alice" }, &doc));
        assert!(!matches(&doc! { "name": "Bob" }, &doc));
    }

    #[test]
    fn test_numeric_equality_normalizes() {
        let doc = doc! { "n": 3i64 };
        assert!(matches(&doc! { "n": 3.0f64 }, &doc));
        let doc = doc! { "n": 3.0f64 };
        assert!(matches(&doc! { "n": 3i64 }, &doc));
    }

    #[test]
    fn test_missing_path_equals_only_explicit_null() {
        let doc = doc! { "a": 1i64 };
        assert!(matches(&doc! { "b": Value::Null }, &doc));
        assert!(!matches(&doc! { "b": 0i64 }, &doc));
        assert!(!matches(&doc! { "b": "" }, &doc));
    }

    #[test]
    fn test_explicit_null_field_matches_null() {
        let doc = doc! { "a": Value::Null };
        assert!(matches(&doc! { "a": Value::Null }, &doc));
    }

    #[test]
    fn test_nested_path_resolution() {
        let doc = doc! { "user": doc! { "scores": vec![5i64, 9] } };
        assert!(matches(&doc! { "user.scores.1": 9i64 }, &doc));
        assert!(!matches(&doc! { "user.scores.0": 9i64 }, &doc));
    }

    #[test]
    fn test_comparison_operators() {
        let doc = doc! { "age": 30i64 };
        assert!(matches(&doc! { "age": doc! { "$gt": 29i64 } }, &doc));
        assert!(matches(&doc! { "age": doc! { "$gte": 30i64 } }, &doc));
        assert!(matches(&doc! { "age": doc! { "$lt": 31i64 } }, &doc));
        assert!(matches(&doc! { "age": doc! { "$lte": 30i64 } }, &doc));
        assert!(!matches(&doc! { "age": doc! { "$gt": 30i64 } }, &doc));
        assert!(matches(&doc! { "age": doc! { "$ne": 29i64 } }, &doc));
        assert!(!matches(&doc! { "age": doc! { "$ne": 30i64 } }, &doc));
    }

    #[test]
    fn test_comparison_bounds_combine() {
        let filter = doc! { "age": doc! { "$gte": 21i64, "$lt": 30i64 } };
        assert!(matches(&filter, &doc! { "age": 21i64 }));
        assert!(matches(&filter, &doc! { "age": 29i64 }));
        assert!(!matches(&filter, &doc! { "age": 30i64 }));
        assert!(!matches(&filter, &doc! { "age": 20i64 }));
    }

    #[test]
    fn test_comparison_on_missing_path_never_matches() {
        let doc = doc! { "a": 1i64 };
        assert!(!matches(&doc! { "b": doc! { "$gt": 0i64 } }, &doc));
        assert!(!matches(&doc! { "b": doc! { "$lt": 0i64 } }, &doc));
    }

    #[test]
    fn test_comparison_across_classes_never_matches() {
        let doc = doc! { "a": "text" };
        assert!(!matches(&doc! { "a": doc! { "$gt": 0i64 } }, &doc));
    }

    #[test]
    fn test_text_comparison_is_lexicographic() {
        let doc = doc! { "name": "mango" };
        assert!(matches(&doc! { "name": doc! { "$gt": "apple" } }, &doc));
        assert!(!matches(&doc! { "name": doc! { "$gt": "zebra" } }, &doc));
    }

    #[test]
    fn test_in_and_nin() {
        let doc = doc! { "color": "red" };
        assert!(matches(
            &doc! { "color": doc! { "$in": vec!["red", "blue"] } },
            &doc
        ));
        assert!(!matches(
            &doc! { "color": doc! { "$in": vec!["green", "blue"] } },
            &doc
        ));
        assert!(matches(
            &doc! { "color": doc! { "$nin": vec!["green", "blue"] } },
            &doc
        ));
    }

    #[test]
    fn test_in_with_null_matches_missing() {
        let doc = doc! { "a": 1i64 };
        assert!(matches(
            &doc! { "b": doc! { "$in": vec![Value::Null, Value::Int(1)] } },
            &doc
        ));
    }

    #[test]
    fn test_exists() {
        let doc = doc! { "a": Value::Null };
        assert!(matches(&doc! { "a": doc! { "$exists": true } }, &doc));
        assert!(!matches(&doc! { "a": doc! { "$exists": false } }, &doc));
        assert!(matches(&doc! { "b": doc! { "$exists": false } }, &doc));
    }

    #[test]
    fn test_regex() {
        let doc = doc! { "email": "alice@example.com" };
        assert!(matches(
            &doc! { "email": doc! { "$regex": "@example\\.com$" } },
            &doc
        ));
        assert!(!matches(&doc! { "email": doc! { "$regex": "^bob" } }, &doc));
    }

    #[test]
    fn test_regex_case_insensitive_option() {
        let doc = doc! { "name": "ALICE" };
        assert!(!matches(&doc! { "name": doc! { "$regex": "^alice$" } }, &doc));
        assert!(matches(
            &doc! { "name": doc! { "$regex": "^alice$", "$options": "i" } },
            &doc
        ));
    }

    #[test]
    fn test_regex_on_non_text_is_false() {
        let doc = doc! { "n": 42i64 };
        assert!(!matches(&doc! { "n": doc! { "$regex": "4" } }, &doc));
    }

    #[test]
    fn test_elem_match() {
        let doc = doc! { "items": vec![
            Value::Object(doc! { "sku": "a", "qty": 1i64 }),
            Value::Object(doc! { "sku": "b", "qty": 5i64 }),
        ] };
        assert!(matches(
            &doc! { "items": doc! { "$elemMatch": doc! { "qty": doc! { "$gte": 5i64 } } } },
            &doc
        ));
        assert!(!matches(
            &doc! { "items": doc! { "$elemMatch": doc! { "qty": doc! { "$gt": 5i64 } } } },
            &doc
        ));
    }

    #[test]
    fn test_elem_match_skips_non_object_elements() {
        let doc = doc! { "items": vec![1i64, 2, 3] };
        assert!(!matches(
            &doc! { "items": doc! { "$elemMatch": doc! { "x": 1i64 } } },
            &doc
        ));
    }

    #[test]
    fn test_logical_operators() {
        let doc = doc! { "tier": "gold", "banned": false };
        assert!(matches(
            &doc! { "$and": vec![
                Value::Object(doc! { "tier": "gold" }),
                Value::Object(doc! { "banned": false }),
            ] },
            &doc
        ));
        assert!(matches(
            &doc! { "$or": vec![
                Value::Object(doc! { "tier": "silver" }),
                Value::Object(doc! { "banned": false }),
            ] },
            &doc
        ));
        assert!(matches(&doc! { "$not": doc! { "tier": "silver" } }, &doc));
        assert!(!matches(&doc! { "$not": doc! { "tier": "gold" } }, &doc));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(matches(&Document::new(), &doc! { "anything": 1i64 }));
    }

    #[test]
    fn test_temporal_equality_mixed_representations() {
        let operand = Value::Timestamp(1_704_110_400_000);
        let as_iso = doc! { "ts": "2024-01-01T12:00:00Z" };
        let as_millis = doc! { "ts": 1_704_110_400_000i64 };
        let as_seconds = doc! { "ts": 1_704_110_400i64 };
        let filter = doc! { "ts": operand };

        assert!(matches(&filter, &as_iso));
        assert!(matches(&filter, &as_millis));
        assert!(matches(&filter, &as_seconds));
    }

    #[test]
    fn test_temporal_range_mixed_representations() {
        // one document stores ISO text, the other epoch millis; a closed
        // range pinned at the same instant returns both
        let noon = Value::Timestamp(1_704_110_400_000);
        let filter = doc! { "timestamp": doc! { "$gte": noon.clone(), "$lte": noon } };

        assert!(matches(&filter, &doc! { "timestamp": "2024-01-01T12:00:00Z" }));
        assert!(matches(&filter, &doc! { "timestamp": 1_704_110_400_000i64 }));
        assert!(!matches(&filter, &doc! { "timestamp": "2024-01-01T12:00:01Z" }));
    }

    #[test]
    fn test_temporal_monotonicity_across_representations() {
        let earlier = Value::Timestamp(1_704_110_399_000);
        let later = Value::Timestamp(1_704_110_401_000);
        for stored in [
            doc! { "ts": "2024-01-01T12:00:00Z" },
            doc! { "ts": 1_704_110_400_000i64 },
            doc! { "ts": 1_704_110_400i64 },
            doc! { "ts": 1_704_110_400.25f64 },
        ] {
            assert!(matches(&doc! { "ts": doc! { "$gt": earlier.clone() } }, &stored));
            assert!(matches(&doc! { "ts": doc! { "$lt": later.clone() } }, &stored));
        }
    }

    #[test]
    fn test_non_temporal_stored_value_never_matches_timestamp_operand() {
        let filter = doc! { "ts": doc! { "$gte": Value::Timestamp(0) } };
        assert!(!matches(&filter, &doc! { "ts": true }));
        assert!(!matches(&filter, &doc! { "ts": "not a date" }));
    }
}
