//! Metadata filter evaluation for hybrid queries.
//!
//! A filter is a JSON object mapping field names to conditions, plus the
//! logical operators `$and` and `$or` at the top level. Field predicates are
//! AND-combined. A condition is either a bare value (implicit equality) or
//! an operator map: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`,
//! `$nin`, `$arrContains`.
//!
//! Equality normalizes numbers through f64; ordered comparisons additionally
//! accept numeric strings on either side. Two error classes are
//! distinguished: [`FilterError::Syntax`] for malformed filters (rejected
//! before a scan starts) and [`FilterError::Type`] for per-document type
//! mismatches, which the query pipeline treats as a non-match for that
//! document only.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

use crate::document::{Metadata, MetadataValue};

/// Errors raised while validating or evaluating a filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The filter itself is malformed (unknown operator, wrong shape).
    #[error("invalid filter: {0}")]
    Syntax(String),

    /// A document value has the wrong type for the requested comparison.
    #[error("filter type error: {0}")]
    Type(String),
}

/// Checks whether a document's metadata matches `filter`.
///
/// An empty filter matches every document. A field named in the filter but
/// absent from the metadata never matches, for `$ne` as well.
pub fn matches_filter(metadata: &Metadata, filter: &Map<String, Value>) -> Result<bool, FilterError> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" => {
                let subs = as_filter_array(condition, "$and")?;
                for sub in subs {
                    if !matches_filter(metadata, sub)? {
                        return Ok(false);
                    }
                }
            }
            "$or" => {
                let subs = as_filter_array(condition, "$or")?;
                // A branch that errors counts as a non-match; the whole
                // disjunction fails only when no branch matches.
                let matched = subs
                    .iter()
                    .any(|sub| matches_filter(metadata, sub).unwrap_or(false));
                if !matched {
                    return Ok(false);
                }
            }
            op if op.starts_with('$') => {
                return Err(FilterError::Syntax(format!("unknown operator {op}")));
            }
            field => {
                let value = match metadata.get(field) {
                    Some(value) => value,
                    None => return Ok(false),
                };
                if !check_condition(value, condition)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Validates a filter's shape without evaluating it against any document.
///
/// Catches everything [`matches_filter`] would report as
/// [`FilterError::Syntax`], so a query can reject a malformed filter once
/// instead of erroring on every candidate.
pub fn validate_filter(filter: &Map<String, Value>) -> Result<(), FilterError> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                for sub in as_filter_array(condition, key)? {
                    validate_filter(sub)?;
                }
            }
            op if op.starts_with('$') => {
                return Err(FilterError::Syntax(format!("unknown operator {op}")));
            }
            _ => validate_condition(condition)?,
        }
    }
    Ok(())
}

fn validate_condition(condition: &Value) -> Result<(), FilterError> {
    let Some(map) = condition.as_object() else {
        return Ok(());
    };
    if !map.keys().any(|k| k.starts_with('$')) {
        return Ok(());
    }
    for (op, op_val) in map {
        match op.as_str() {
            "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {}
            "$in" | "$nin" => {
                if !op_val.is_array() {
                    return Err(FilterError::Syntax(format!("{op} expects an array")));
                }
            }
            "$arrContains" => {
                if !op_val.is_array() {
                    return Err(FilterError::Syntax(
                        "$arrContains expects an array of values to check".into(),
                    ));
                }
            }
            other => return Err(FilterError::Syntax(format!("unknown operator {other}"))),
        }
    }
    Ok(())
}

fn as_filter_array<'a>(
    condition: &'a Value,
    op: &str,
) -> Result<Vec<&'a Map<String, Value>>, FilterError> {
    let items = condition
        .as_array()
        .ok_or_else(|| FilterError::Syntax(format!("{op} must be an array of objects")))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| FilterError::Syntax(format!("item in {op} array must be an object")))
        })
        .collect()
}

/// Evaluates one field condition. Operator maps are conjunctive: every
/// operator key must pass.
fn check_condition(value: &MetadataValue, condition: &Value) -> Result<bool, FilterError> {
    if let Some(map) = condition.as_object() {
        if map.keys().any(|k| k.starts_with('$')) {
            for (op, op_val) in map {
                match op.as_str() {
                    "$eq" => {
                        if !loose_eq(value, op_val) {
                            return Ok(false);
                        }
                    }
                    "$ne" => {
                        if loose_eq(value, op_val) {
                            return Ok(false);
                        }
                    }
                    "$gt" => {
                        if compare_numbers(value, op_val)? != Ordering::Greater {
                            return Ok(false);
                        }
                    }
                    "$gte" => {
                        if compare_numbers(value, op_val)? == Ordering::Less {
                            return Ok(false);
                        }
                    }
                    "$lt" => {
                        if compare_numbers(value, op_val)? != Ordering::Less {
                            return Ok(false);
                        }
                    }
                    "$lte" => {
                        if compare_numbers(value, op_val)? == Ordering::Greater {
                            return Ok(false);
                        }
                    }
                    "$in" => {
                        let items = op_val
                            .as_array()
                            .ok_or_else(|| FilterError::Syntax("$in expects an array".into()))?;
                        if !items.iter().any(|item| loose_eq(value, item)) {
                            return Ok(false);
                        }
                    }
                    "$nin" => {
                        let items = op_val
                            .as_array()
                            .ok_or_else(|| FilterError::Syntax("$nin expects an array".into()))?;
                        if items.iter().any(|item| loose_eq(value, item)) {
                            return Ok(false);
                        }
                    }
                    "$arrContains" => {
                        let MetadataValue::Array(doc_items) = value else {
                            return Err(FilterError::Type(
                                "$arrContains requires the field to be an array".into(),
                            ));
                        };
                        let items = op_val.as_array().ok_or_else(|| {
                            FilterError::Syntax(
                                "$arrContains expects an array of values to check".into(),
                            )
                        })?;
                        let shared = items
                            .iter()
                            .any(|item| doc_items.iter().any(|doc| loose_eq(doc, item)));
                        if !shared {
                            return Ok(false);
                        }
                    }
                    other => {
                        return Err(FilterError::Syntax(format!("unknown operator {other}")));
                    }
                }
            }
            return Ok(true);
        }
    }

    // Bare value: implicit equality.
    Ok(loose_eq(value, condition))
}

/// Equality with numeric normalization: integers and floats compare through
/// f64, other types compare structurally.
fn loose_eq(value: &MetadataValue, json: &Value) -> bool {
    match (value, json) {
        (MetadataValue::Null, Value::Null) => true,
        (MetadataValue::Boolean(b), Value::Bool(jb)) => b == jb,
        (MetadataValue::String(s), Value::String(js)) => s == js,
        (MetadataValue::Integer(i), Value::Number(n)) => {
            n.as_f64().is_some_and(|nf| *i as f64 == nf)
        }
        (MetadataValue::Float(f), Value::Number(n)) => n.as_f64().is_some_and(|nf| *f == nf),
        (MetadataValue::Array(items), Value::Array(jitems)) => {
            items.len() == jitems.len()
                && items.iter().zip(jitems.iter()).all(|(a, b)| loose_eq(a, b))
        }
        (MetadataValue::Object(map), Value::Object(jmap)) => {
            map.len() == jmap.len()
                && jmap
                    .iter()
                    .all(|(k, jv)| map.get(k).is_some_and(|v| loose_eq(v, jv)))
        }
        _ => false,
    }
}

/// Ordered comparison through f64. Numeric strings parse on both sides;
/// anything else is a type error.
fn compare_numbers(value: &MetadataValue, json: &Value) -> Result<Ordering, FilterError> {
    let lhs = metadata_as_f64(value);
    let rhs = json_as_f64(json);
    match (lhs, rhs) {
        (Some(a), Some(b)) => a
            .partial_cmp(&b)
            .ok_or_else(|| FilterError::Type("comparison requires numbers".into())),
        _ => Err(FilterError::Type("comparison requires numbers".into())),
    }
}

fn metadata_as_f64(value: &MetadataValue) -> Option<f64> {
    match value {
        MetadataValue::Integer(i) => Some(*i as f64),
        MetadataValue::Float(f) => Some(*f),
        MetadataValue::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn json_as_f64(json: &Value) -> Option<f64> {
    match json {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(pairs: Vec<(&str, MetadataValue)>) -> Metadata {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn filter(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("filter literal is an object")
    }

    #[test]
    fn empty_filter_matches_everything() {
        let metadata = meta(vec![("any", MetadataValue::String("value".into()))]);
        assert!(matches_filter(&metadata, &Map::new()).unwrap());
        assert!(matches_filter(&Metadata::new(), &Map::new()).unwrap());
    }

    #[test]
    fn implicit_equality_on_bare_value() {
        let metadata = meta(vec![("city", MetadataValue::String("NY".into()))]);
        assert!(matches_filter(&metadata, &filter(json!({"city": "NY"}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"city": "SF"}))).unwrap());
    }

    #[test]
    fn multiple_fields_are_and_combined() {
        let metadata = meta(vec![
            ("city", MetadataValue::String("NY".into())),
            ("age", MetadataValue::Integer(25)),
        ]);
        assert!(matches_filter(&metadata, &filter(json!({"city": "NY", "age": 25}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"city": "NY", "age": 30}))).unwrap());
    }

    #[test]
    fn missing_field_never_matches() {
        let metadata = meta(vec![]);
        assert!(!matches_filter(&metadata, &filter(json!({"ghost": 1}))).unwrap());
        // $ne on a missing field fails too: absence is not distinguishable
        // from inequality in this language.
        assert!(!matches_filter(&metadata, &filter(json!({"ghost": {"$ne": 1}}))).unwrap());
    }

    #[test]
    fn numeric_equality_coerces_through_f64() {
        let metadata = meta(vec![("n", MetadataValue::Integer(10))]);
        assert!(matches_filter(&metadata, &filter(json!({"n": 10.0}))).unwrap());
        let metadata = meta(vec![("n", MetadataValue::Float(10.0))]);
        assert!(matches_filter(&metadata, &filter(json!({"n": 10}))).unwrap());
    }

    #[test]
    fn string_number_equality_does_not_coerce() {
        let metadata = meta(vec![("n", MetadataValue::Integer(42))]);
        assert!(!matches_filter(&metadata, &filter(json!({"n": "42"}))).unwrap());
    }

    #[test]
    fn eq_and_ne_operators() {
        let metadata = meta(vec![("status", MetadataValue::String("active".into()))]);
        assert!(matches_filter(&metadata, &filter(json!({"status": {"$eq": "active"}}))).unwrap());
        assert!(matches_filter(&metadata, &filter(json!({"status": {"$ne": "deleted"}}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"status": {"$ne": "active"}}))).unwrap());
    }

    #[test]
    fn ordered_comparisons() {
        let metadata = meta(vec![("age", MetadataValue::Integer(30))]);
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$gt": 25}}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"age": {"$gt": 30}}))).unwrap());
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$gte": 30}}))).unwrap());
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$lt": 31}}))).unwrap());
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$lte": 30}}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"age": {"$lt": 30}}))).unwrap());
    }

    #[test]
    fn comparison_accepts_numeric_strings_both_sides() {
        let metadata = meta(vec![("age", MetadataValue::String("35".into()))]);
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$gt": 30}}))).unwrap());

        let metadata = meta(vec![("age", MetadataValue::Integer(35))]);
        assert!(matches_filter(&metadata, &filter(json!({"age": {"$gt": "30"}}))).unwrap());
    }

    #[test]
    fn comparison_on_non_numeric_is_type_error() {
        let metadata = meta(vec![("name", MetadataValue::String("alice".into()))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"name": {"$gt": 10}}))),
            Err(FilterError::Type(_))
        ));
        let metadata = meta(vec![("flag", MetadataValue::Boolean(true))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"flag": {"$lt": 10}}))),
            Err(FilterError::Type(_))
        ));
    }

    #[test]
    fn operator_keys_are_conjunctive() {
        let metadata = meta(vec![("age", MetadataValue::Integer(30))]);
        assert!(
            matches_filter(&metadata, &filter(json!({"age": {"$gt": 20, "$lt": 40}}))).unwrap()
        );
        assert!(
            !matches_filter(&metadata, &filter(json!({"age": {"$gt": 20, "$lt": 25}}))).unwrap()
        );
    }

    #[test]
    fn in_and_nin_operators() {
        let metadata = meta(vec![("lang", MetadataValue::String("it".into()))]);
        assert!(
            matches_filter(&metadata, &filter(json!({"lang": {"$in": ["en", "it"]}}))).unwrap()
        );
        assert!(
            !matches_filter(&metadata, &filter(json!({"lang": {"$in": ["en", "fr"]}}))).unwrap()
        );
        assert!(
            matches_filter(&metadata, &filter(json!({"lang": {"$nin": ["en", "fr"]}}))).unwrap()
        );
        assert!(
            !matches_filter(&metadata, &filter(json!({"lang": {"$nin": ["it"]}}))).unwrap()
        );
    }

    #[test]
    fn in_with_non_array_is_syntax_error() {
        let metadata = meta(vec![("lang", MetadataValue::String("it".into()))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"lang": {"$in": "it"}}))),
            Err(FilterError::Syntax(_))
        ));
    }

    #[test]
    fn arr_contains_matches_shared_element() {
        let metadata = meta(vec![(
            "tags",
            MetadataValue::Array(vec![
                MetadataValue::String("rust".into()),
                MetadataValue::String("db".into()),
            ]),
        )]);
        assert!(matches_filter(
            &metadata,
            &filter(json!({"tags": {"$arrContains": ["db", "go"]}}))
        )
        .unwrap());
        assert!(!matches_filter(
            &metadata,
            &filter(json!({"tags": {"$arrContains": ["go", "zig"]}}))
        )
        .unwrap());
    }

    #[test]
    fn arr_contains_on_scalar_field_is_type_error() {
        let metadata = meta(vec![("tags", MetadataValue::String("rust".into()))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"tags": {"$arrContains": ["rust"]}}))),
            Err(FilterError::Type(_))
        ));
    }

    #[test]
    fn unknown_field_operator_is_syntax_error() {
        let metadata = meta(vec![("age", MetadataValue::Integer(30))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"age": {"$near": 10}}))),
            Err(FilterError::Syntax(_))
        ));
    }

    #[test]
    fn unknown_top_level_operator_is_syntax_error() {
        let metadata = meta(vec![("age", MetadataValue::Integer(30))]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"$nor": [{"age": 30}]}))),
            Err(FilterError::Syntax(_))
        ));
    }

    #[test]
    fn and_requires_all_branches() {
        let metadata = meta(vec![
            ("city", MetadataValue::String("SF".into())),
            ("age", MetadataValue::Integer(30)),
        ]);
        assert!(matches_filter(
            &metadata,
            &filter(json!({"$and": [{"city": "SF"}, {"age": {"$lt": 35}}]}))
        )
        .unwrap());
        assert!(!matches_filter(
            &metadata,
            &filter(json!({"$and": [{"city": "SF"}, {"age": {"$gt": 35}}]}))
        )
        .unwrap());
    }

    #[test]
    fn or_requires_any_branch() {
        let metadata = meta(vec![("age", MetadataValue::Integer(20))]);
        assert!(matches_filter(
            &metadata,
            &filter(json!({"$or": [{"age": {"$lt": 25}}, {"age": {"$gt": 45}}]}))
        )
        .unwrap());
        assert!(!matches_filter(
            &metadata,
            &filter(json!({"$or": [{"age": {"$lt": 10}}, {"age": {"$gt": 45}}]}))
        )
        .unwrap());
    }

    #[test]
    fn or_swallows_branch_errors() {
        // First branch raises a type error, second branch matches.
        let metadata = meta(vec![
            ("name", MetadataValue::String("alice".into())),
            ("age", MetadataValue::Integer(20)),
        ]);
        assert!(matches_filter(
            &metadata,
            &filter(json!({"$or": [{"name": {"$gt": 5}}, {"age": 20}]}))
        )
        .unwrap());
    }

    #[test]
    fn and_with_non_array_is_syntax_error() {
        let metadata = meta(vec![]);
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"$and": {"a": 1}}))),
            Err(FilterError::Syntax(_))
        ));
        assert!(matches!(
            matches_filter(&metadata, &filter(json!({"$and": [1, 2]}))),
            Err(FilterError::Syntax(_))
        ));
    }

    // Scenario: `$in` + `$gt` pick exactly the older NY document.
    #[test]
    fn in_combined_with_gt() {
        let docs = [
            meta(vec![
                ("city", MetadataValue::String("NY".into())),
                ("age", MetadataValue::Integer(25)),
            ]),
            meta(vec![
                ("city", MetadataValue::String("SF".into())),
                ("age", MetadataValue::Integer(30)),
            ]),
            meta(vec![
                ("city", MetadataValue::String("NY".into())),
                ("age", MetadataValue::Integer(35)),
            ]),
        ];
        let f = filter(json!({"city": {"$in": ["NY"]}, "age": {"$gt": 30}}));
        let matches: Vec<bool> = docs.iter().map(|m| matches_filter(m, &f).unwrap()).collect();
        assert_eq!(matches, vec![false, false, true]);
    }

    // Scenario: nested $and / $or selects exactly document A.
    #[test]
    fn nested_and_or() {
        let a = meta(vec![
            ("city", MetadataValue::String("SF".into())),
            ("age", MetadataValue::Integer(30)),
        ]);
        let b = meta(vec![
            ("city", MetadataValue::String("SF".into())),
            ("age", MetadataValue::Integer(40)),
        ]);
        let c = meta(vec![
            ("city", MetadataValue::String("NY".into())),
            ("age", MetadataValue::Integer(20)),
        ]);
        let f = filter(json!({
            "$and": [
                {"city": "SF"},
                {"$or": [{"age": {"$lt": 35}}, {"age": {"$gt": 45}}]}
            ]
        }));
        assert!(matches_filter(&a, &f).unwrap());
        assert!(!matches_filter(&b, &f).unwrap());
        assert!(!matches_filter(&c, &f).unwrap());
    }

    #[test]
    fn null_equality() {
        let metadata = meta(vec![("x", MetadataValue::Null)]);
        assert!(matches_filter(&metadata, &filter(json!({"x": null}))).unwrap());
        let metadata = meta(vec![("x", MetadataValue::Integer(0))]);
        assert!(!matches_filter(&metadata, &filter(json!({"x": null}))).unwrap());
    }

    #[test]
    fn structural_equality_of_arrays_and_objects() {
        let metadata = meta(vec![(
            "pos",
            MetadataValue::Array(vec![MetadataValue::Integer(1), MetadataValue::Integer(2)]),
        )]);
        assert!(matches_filter(&metadata, &filter(json!({"pos": [1, 2]}))).unwrap());
        assert!(!matches_filter(&metadata, &filter(json!({"pos": [2, 1]}))).unwrap());

        let metadata = meta(vec![(
            "geo",
            MetadataValue::Object(
                [("lat".to_string(), MetadataValue::Float(1.5))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        assert!(matches_filter(&metadata, &filter(json!({"geo": {"lat": 1.5}}))).unwrap());
    }

    #[test]
    fn non_operator_object_condition_compares_structurally() {
        // No $-prefixed key: the object is a literal, not an operator map.
        let metadata = meta(vec![(
            "geo",
            MetadataValue::Object(
                [("lat".to_string(), MetadataValue::Integer(1))]
                    .into_iter()
                    .collect(),
            ),
        )]);
        assert!(!matches_filter(&metadata, &filter(json!({"geo": {"lat": 2}}))).unwrap());
    }

    // ── validate_filter ──────────────────────────────────────────────

    #[test]
    fn validate_accepts_well_formed_filters() {
        for f in [
            json!({}),
            json!({"city": "NY"}),
            json!({"age": {"$gt": 30, "$lte": 60}}),
            json!({"lang": {"$in": ["en"]}, "tags": {"$arrContains": ["a"]}}),
            json!({"$and": [{"a": 1}, {"$or": [{"b": 2}, {"c": {"$ne": 3}}]}]}),
        ] {
            validate_filter(f.as_object().unwrap()).unwrap();
        }
    }

    #[test]
    fn validate_rejects_malformed_filters() {
        for f in [
            json!({"$xor": [{"a": 1}]}),
            json!({"age": {"$near": 1}}),
            json!({"$and": {"a": 1}}),
            json!({"$or": [5]}),
            json!({"lang": {"$in": "en"}}),
            json!({"tags": {"$arrContains": "a"}}),
            json!({"$and": [{"x": {"$bogus": 1}}]}),
        ] {
            assert!(
                matches!(
                    validate_filter(f.as_object().unwrap()),
                    Err(FilterError::Syntax(_))
                ),
                "expected syntax error for {f}"
            );
        }
    }

    #[test]
    fn validate_does_not_reject_type_level_issues() {
        // Ordered comparison against a non-numeric literal is a per-document
        // concern, not a shape error.
        validate_filter(json!({"age": {"$gt": true}}).as_object().unwrap()).unwrap();
    }
}
