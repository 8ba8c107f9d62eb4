//! Scalar and aggregate function definitions
//!
//! Scalar functions are trait objects resolved by name at bind time; the
//! signature check runs during binding, execution receives input vectors
//! and produces one output vector. A function may declare side effects
//! (never folded) and per-statement bind data (state initialized once per
//! execution, like the seeded PRNG behind `random()`).

mod scalar;

pub use scalar::{AgeFunction, RandomFunction};

use crate::error::{Error, Result};
use crate::types::{LogicalType, Value};
use crate::vector::Vector;
use rand::rngs::StdRng;
use std::sync::Arc;

/// Opaque per-statement function state, created fresh for every execution.
#[derive(Debug)]
pub enum BindData {
    Prng(StdRng),
}

pub trait ScalarFunction: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Validate argument types and produce the return type.
    fn bind(&self, arg_types: &[LogicalType]) -> Result<LogicalType>;

    /// Side-effecting functions are re-evaluated per chunk and never
    /// constant-folded.
    fn has_side_effects(&self) -> bool {
        false
    }

    fn init_bind_data(&self) -> Option<BindData> {
        None
    }

    fn execute(
        &self,
        args: &[Vector],
        count: usize,
        bind_data: Option<&mut BindData>,
    ) -> Result<Vector>;
}

/// Resolve a scalar function by (lowercased) name.
pub fn resolve_scalar(name: &str) -> Result<Arc<dyn ScalarFunction>> {
    match name {
        "age" => Ok(Arc::new(AgeFunction)),
        "random" => Ok(Arc::new(RandomFunction)),
        _ => Err(Error::NotFound(format!("function {}", name))),
    }
}

/// Aggregate functions are a closed set with per-kind typing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    pub fn from_name(name: &str, star: bool) -> Option<AggregateKind> {
        Some(match (name, star) {
            ("count", true) => AggregateKind::CountStar,
            ("count", false) => AggregateKind::Count,
            ("sum", false) => AggregateKind::Sum,
            ("avg", false) => AggregateKind::Avg,
            ("min", false) => AggregateKind::Min,
            ("max", false) => AggregateKind::Max,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateKind::CountStar | AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }

    /// Return type for an argument type. SUM and AVG reject temporal and
    /// text arguments; MIN/MAX accept any ordered type.
    pub fn bind(&self, arg: Option<&LogicalType>) -> Result<LogicalType> {
        match self {
            AggregateKind::CountStar | AggregateKind::Count => Ok(LogicalType::BigInt),
            AggregateKind::Sum | AggregateKind::Avg => {
                let arg = arg.ok_or_else(|| Error::Internal("missing aggregate argument".into()))?;
                if !arg.is_numeric() {
                    return Err(Error::DisallowedAggregate {
                        function: self.name().to_string(),
                        datatype: arg.to_string(),
                    });
                }
                match self {
                    AggregateKind::Sum if arg.is_integer() => Ok(LogicalType::BigInt),
                    AggregateKind::Sum => Ok(LogicalType::Double),
                    _ => Ok(LogicalType::Double),
                }
            }
            AggregateKind::Min | AggregateKind::Max => {
                let arg = arg.ok_or_else(|| Error::Internal("missing aggregate argument".into()))?;
                Ok(arg.clone())
            }
        }
    }
}

/// Running state for one aggregate within one group.
#[derive(Debug, Clone)]
pub struct AggregateState {
    kind: AggregateKind,
    count: i64,
    int_sum: i128,
    float_sum: f64,
    extreme: Option<Value>,
}

impl AggregateState {
    pub fn new(kind: AggregateKind) -> Self {
        Self {
            kind,
            count: 0,
            int_sum: 0,
            float_sum: 0.0,
            extreme: None,
        }
    }

    /// Fold one input value. NULLs are skipped by every aggregate except
    /// COUNT(*), which never sees an argument.
    pub fn update(&mut self, value: Option<&Value>) {
        match self.kind {
            AggregateKind::CountStar => self.count += 1,
            AggregateKind::Count => {
                if matches!(value, Some(v) if !v.is_null()) {
                    self.count += 1;
                }
            }
            AggregateKind::Sum | AggregateKind::Avg => {
                let Some(value) = value.filter(|v| !v.is_null()) else {
                    return;
                };
                self.count += 1;
                match value {
                    Value::TinyInt(v) => self.int_sum += *v as i128,
                    Value::SmallInt(v) => self.int_sum += *v as i128,
                    Value::Integer(v) => self.int_sum += *v as i128,
                    Value::BigInt(v) => self.int_sum += *v as i128,
                    Value::Real(v) => self.float_sum += *v as f64,
                    Value::Double(v) => self.float_sum += *v,
                    _ => {}
                }
            }
            AggregateKind::Min | AggregateKind::Max => {
                let Some(value) = value.filter(|v| !v.is_null()) else {
                    return;
                };
                let replace = match &self.extreme {
                    None => true,
                    Some(current) => {
                        let ordering = value.compare(current);
                        match self.kind {
                            AggregateKind::Min => ordering.is_lt(),
                            _ => ordering.is_gt(),
                        }
                    }
                };
                if replace {
                    self.extreme = Some(value.clone());
                }
            }
        }
    }

    /// Produce the aggregate result; `result_type` decides the numeric
    /// rendering of sums.
    pub fn finalize(&self, result_type: &LogicalType) -> Result<Value> {
        Ok(match self.kind {
            AggregateKind::CountStar | AggregateKind::Count => Value::BigInt(self.count),
            AggregateKind::Sum => {
                if self.count == 0 {
                    Value::Null
                } else if *result_type == LogicalType::BigInt {
                    let sum = i64::try_from(self.int_sum).map_err(|_| Error::OutOfRange {
                        value: self.int_sum.to_string(),
                        target: result_type.to_string(),
                        row: None,
                    })?;
                    Value::BigInt(sum)
                } else {
                    Value::Double(self.float_sum + self.int_sum as f64)
                }
            }
            AggregateKind::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Double((self.float_sum + self.int_sum as f64) / self.count as f64)
                }
            }
            AggregateKind::Min | AggregateKind::Max => {
                self.extreme.clone().unwrap_or(Value::Null)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_rejects_timestamps() {
        assert!(matches!(
            AggregateKind::Sum.bind(Some(&LogicalType::Timestamp)),
            Err(Error::DisallowedAggregate { .. })
        ));
        assert!(AggregateKind::Min.bind(Some(&LogicalType::Timestamp)).is_ok());
    }

    #[test]
    fn count_skips_nulls() {
        let mut state = AggregateState::new(AggregateKind::Count);
        state.update(Some(&Value::Integer(1)));
        state.update(Some(&Value::Null));
        state.update(Some(&Value::Integer(2)));
        assert_eq!(
            state.finalize(&LogicalType::BigInt).unwrap(),
            Value::BigInt(2)
        );
    }

    #[test]
    fn min_handles_timestamps() {
        let mut state = AggregateState::new(AggregateKind::Min);
        state.update(Some(&Value::Timestamp(2000)));
        state.update(Some(&Value::Null));
        state.update(Some(&Value::Timestamp(1000)));
        assert_eq!(
            state.finalize(&LogicalType::Timestamp).unwrap(),
            Value::Timestamp(1000)
        );
    }

    #[test]
    fn empty_sum_is_null() {
        let state = AggregateState::new(AggregateKind::Sum);
        assert_eq!(state.finalize(&LogicalType::BigInt).unwrap(), Value::Null);
    }
}
