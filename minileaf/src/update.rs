//! Atomic partial updates: `$set`, `$unset`, `$inc` on dotted paths.
//!
//! Operator groups are applied in a stable order (set, then unset, then inc)
//! regardless of how the caller arranged them in the wire document. The
//! engines apply these under their write lock on the live document copy.

use crate::common::document::Document;
use crate::common::value::Value;
use crate::errors::{ErrorKind, MinileafError, MinileafResult};

const OP_SET: &str = "$set";
const OP_UNSET: &str = "$unset";
const OP_INC: &str = "$inc";

/// A parsed partial-update operator map.
#[derive(Debug, Clone, Default)]
pub struct UpdateOps {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
    inc: Vec<(String, Value)>,
}

impl UpdateOps {
    /// Parses the wire form `{"$set": {..}, "$unset": {..}, "$inc": {..}}`.
    pub fn parse(document: &Document) -> MinileafResult<UpdateOps> {
        let mut ops = UpdateOps::default();
        for (operator, operand) in document.iter() {
            let entries = operand.as_object().ok_or_else(|| {
                log::error!("Operand of {} is not an object", operator);
                MinileafError::new(
                    &format!("Operand of '{}' must be an object", operator),
                    ErrorKind::InvalidQuery,
                )
            })?;
            match operator.as_str() {
                OP_SET => {
                    for (path, value) in entries.iter() {
                        ops.set.push((path.clone(), value.clone()));
                    }
                }
                OP_UNSET => {
                    for (path, _) in entries.iter() {
                        ops.unset.push(path.clone());
                    }
                }
                OP_INC => {
                    for (path, delta) in entries.iter() {
                        if !delta.is_number() {
                            log::error!("$inc delta for '{}' is not numeric", path);
                            return Err(MinileafError::new(
                                &format!("$inc delta for '{}' must be numeric", path),
                                ErrorKind::InvalidQuery,
                            ));
                        }
                        ops.inc.push((path.clone(), delta.clone()));
                    }
                }
                unknown => {
                    log::error!("Unknown update operator '{}'", unknown);
                    return Err(MinileafError::new(
                        &format!("Unknown update operator '{}'", unknown),
                        ErrorKind::InvalidQuery,
                    ));
                }
            }
        }
        Ok(ops)
    }

    /// Convenience constructor for a `$set`-only update.
    pub fn set(path: &str, value: impl Into<Value>) -> UpdateOps {
        UpdateOps {
            set: vec![(path.to_string(), value.into())],
            ..UpdateOps::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.inc.is_empty()
    }

    /// Applies this update to a document in place.
    pub fn apply(&self, document: &mut Document) -> MinileafResult<()> {
        for (path, value) in &self.set {
            document.set_path(path, value.clone())?;
        }
        for path in &self.unset {
            document.remove_path(path);
        }
        for (path, delta) in &self.inc {
            let incremented = Self::increment(document.get_path(path), delta);
            document.set_path(path, incremented)?;
        }
        Ok(())
    }

    /// The delta's type dictates the stored result type: an integer delta
    /// stores an integer, a float delta stores a float. Absent or
    /// non-numeric current values count as zero.
    fn increment(current: Option<Value>, delta: &Value) -> Value {
        match delta {
            Value::Int(delta) => {
                let base = match current {
                    Some(Value::Int(i)) => i,
                    Some(Value::Float(f)) => f as i64,
                    _ => 0,
                };
                Value::Int(base.wrapping_add(*delta))
            }
            Value::Float(delta) => {
                let base = match current {
                    Some(Value::Int(i)) => i as f64,
                    Some(Value::Float(f)) => f,
                    _ => 0.0,
                };
                Value::Float(base + delta)
            }
            // parse() guarantees numeric deltas
            _ => Value::Int(0),
        }
    }
}
