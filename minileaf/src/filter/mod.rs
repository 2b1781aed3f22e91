//! Mongo-style filters over documents.
//!
//! A filter arrives as a document: keys starting with `$` select logical
//! operators, any other key is a field path carrying either a literal
//! (equality) or an operator sub-map:
//!
//! ```text
//! { "age": { "$gte": 21, "$lt": 65 }, "$or": [ { "tier": "gold" }, { "vip": true } ] }
//! ```

mod eval;

pub use eval::resolve_path;

use regex::{Regex, RegexBuilder};

use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};

const OP_AND: &str = "$and";
const OP_OR: &str = "$or";
const OP_NOT: &str = "$not";
const OP_GT: &str = "$gt";
const OP_GTE: &str = "$gte";
const OP_LT: &str = "$lt";
const OP_LTE: &str = "$lte";
const OP_NE: &str = "$ne";
const OP_IN: &str = "$in";
const OP_NIN: &str = "$nin";
const OP_EXISTS: &str = "$exists";
const OP_REGEX: &str = "$regex";
const OP_OPTIONS: &str = "$options";
const OP_ELEM_MATCH: &str = "$elemMatch";

/// A single operator applied to a resolved field value.
#[derive(Debug, Clone)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    ElemMatch(Box<Filter>),
}

/// A parsed filter tree, evaluated against documents.
#[derive(Debug, Clone)]
pub enum Filter {
    /// All sub-filters must match. An empty conjunction matches everything.
    And(Vec<Filter>),
    /// Any sub-filter must match.
    Or(Vec<Filter>),
    /// Negation of the sub-filter.
    Not(Box<Filter>),
    /// All operators must hold on the value at `path`.
    Field { path: String, ops: Vec<FieldOp> },
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Filter {
        Filter::And(Vec::new())
    }

    /// Parses a filter from its document wire form.
    pub fn parse(document: &Document) -> MinileafResult<Filter> {
        let mut clauses = Vec::with_capacity(document.len());
        for (key, value) in document.iter() {
            clauses.push(Self::parse_entry(key, value)?);
        }
        match clauses.len() {
            1 => Ok(clauses.remove(0)),
            _ => Ok(Filter::And(clauses)),
        }
    }

    fn parse_entry(key: &str, value: &Value) -> MinileafResult<Filter> {
        if key.starts_with('$') {
            return match key {
                OP_AND => Ok(Filter::And(Self::parse_filter_list(OP_AND, value)?)),
                OP_OR => Ok(Filter::Or(Self::parse_filter_list(OP_OR, value)?)),
                OP_NOT => {
                    let sub = value.as_object().ok_or_else(|| invalid_operand(OP_NOT, value))?;
                    Ok(Filter::Not(Box::new(Filter::parse(sub)?)))
                }
                other => {
                    log::error!("Unknown logical operator: {}", other);
                    Err(MinileafError::new(
                        &format!("Unknown logical operator '{}'", other),
                        ErrorKind::InvalidQuery,
                    ))
                }
            };
        }

        match value {
            Value::Object(sub) if is_operator_map(sub) => Ok(Filter::Field {
                path: key.to_string(),
                ops: Self::parse_field_ops(key, sub)?,
            }),
            literal => Ok(Filter::Field {
                path: key.to_string(),
                ops: vec![FieldOp::Eq(literal.clone())],
            }),
        }
    }

    fn parse_filter_list(op: &str, value: &Value) -> MinileafResult<Vec<Filter>> {
        let items = value.as_array().ok_or_else(|| invalid_operand(op, value))?;
        let mut filters = Vec::with_capacity(items.len());
        for item in items {
            let sub = item.as_object().ok_or_else(|| invalid_operand(op, item))?;
            filters.push(Filter::parse(sub)?);
        }
        Ok(filters)
    }

    fn parse_field_ops(path: &str, operators: &Document) -> MinileafResult<Vec<FieldOp>> {
        let mut ops = Vec::with_capacity(operators.len());
        let case_insensitive = match operators.get_field(OP_OPTIONS) {
            None => false,
            Some(Value::Text(options)) => options.contains('i'),
            Some(other) => return Err(invalid_operand(OP_OPTIONS, other)),
        };

        for (op, operand) in operators.iter() {
            match op.as_str() {
                OP_GT => ops.push(FieldOp::Gt(operand.clone())),
                OP_GTE => ops.push(FieldOp::Gte(operand.clone())),
                OP_LT => ops.push(FieldOp::Lt(operand.clone())),
                OP_LTE => ops.push(FieldOp::Lte(operand.clone())),
                OP_NE => ops.push(FieldOp::Ne(operand.clone())),
                OP_IN => ops.push(FieldOp::In(Self::parse_value_list(OP_IN, operand)?)),
                OP_NIN => ops.push(FieldOp::Nin(Self::parse_value_list(OP_NIN, operand)?)),
                OP_EXISTS => match operand {
                    Value::Bool(flag) => ops.push(FieldOp::Exists(*flag)),
                    other => return Err(invalid_operand(OP_EXISTS, other)),
                },
                OP_REGEX => match operand {
                    Value::Text(pattern) => {
                        let regex = RegexBuilder::new(pattern)
                            .case_insensitive(case_insensitive)
                            .build()?;
                        ops.push(FieldOp::Regex(regex));
                    }
                    other => return Err(invalid_operand(OP_REGEX, other)),
                },
                OP_OPTIONS => {} // companion of $regex, consumed above
                OP_ELEM_MATCH => {
                    let sub = operand
                        .as_object()
                        .ok_or_else(|| invalid_operand(OP_ELEM_MATCH, operand))?;
                    ops.push(FieldOp::ElemMatch(Box::new(Filter::parse(sub)?)));
                }
                unknown => {
                    log::error!("Unknown field operator '{}' on path '{}'", unknown, path);
                    return Err(MinileafError::new(
                        &format!("Unknown operator '{}'", unknown),
                        ErrorKind::InvalidQuery,
                    ));
                }
            }
        }

        if ops.is_empty() {
            log::error!("Operator map on path '{}' holds no operators", path);
            return Err(MinileafError::new(
                &format!("Empty operator map on field '{}'", path),
                ErrorKind::InvalidQuery,
            ));
        }
        Ok(ops)
    }

    fn parse_value_list(op: &str, value: &Value) -> MinileafResult<Vec<Value>> {
        value
            .as_array()
            .map(<[Value]>::to_vec)
            .ok_or_else(|| invalid_operand(op, value))
    }

    /// When this filter is exactly one equality pair on one field, returns
    /// `(path, operand)`. Drives the index fast paths.
    pub fn as_single_equality(&self) -> Option<(&str, &Value)> {
        match self {
            Filter::Field { path, ops } => match ops.as_slice() {
                [FieldOp::Eq(value)] => Some((path.as_str(), value)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn is_operator_map(document: &Document) -> bool {
    !document.is_empty() && document.iter().all(|(key, _)| key.starts_with('$'))
}

fn invalid_operand(op: &str, operand: &Value) -> MinileafError {
    log::error!("Malformed operand for {}: {}", op, operand);
    MinileafError::new(
        &format!("Malformed operand for '{}'", op),
        ErrorKind::InvalidQuery,
    )
}
