//! Built-in scalar functions

use super::{BindData, ScalarFunction};
use crate::error::{Error, Result};
use crate::types::{temporal, LogicalType, Value};
use crate::vector::Vector;
use rand::{Rng, SeedableRng};

fn signature_error(name: &str, args: &[LogicalType]) -> Error {
    Error::TypeMismatch {
        expected: format!("a valid signature for {}", name),
        found: args
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// `age(a, b)`: the symbolic interval `a - b`, rendered Postgres-style.
#[derive(Debug)]
pub struct AgeFunction;

impl ScalarFunction for AgeFunction {
    fn name(&self) -> &'static str {
        "age"
    }

    fn bind(&self, arg_types: &[LogicalType]) -> Result<LogicalType> {
        match arg_types {
            [LogicalType::Timestamp, LogicalType::Timestamp] => Ok(LogicalType::Varchar(None)),
            args => Err(signature_error("age", args)),
        }
    }

    fn execute(
        &self,
        args: &[Vector],
        count: usize,
        _bind_data: Option<&mut BindData>,
    ) -> Result<Vector> {
        let mut result = Vector::with_capacity(LogicalType::Varchar(None), count);
        for k in 0..count {
            let a = args[0].value_at(k);
            let b = args[1].value_at(k);
            match (a, b) {
                (Value::Timestamp(a), Value::Timestamp(b)) => {
                    let interval = temporal::age(a, b);
                    result.push_value(&Value::Varchar(interval.to_string()))?;
                }
                _ => result.push_value(&Value::Null)?,
            }
        }
        Ok(result)
    }
}

/// `random()`: uniform double in [0, 1). Declares side effects so it is
/// never folded; the PRNG is bind data, seeded once per statement
/// execution.
#[derive(Debug)]
pub struct RandomFunction;

impl ScalarFunction for RandomFunction {
    fn name(&self) -> &'static str {
        "random"
    }

    fn bind(&self, arg_types: &[LogicalType]) -> Result<LogicalType> {
        if !arg_types.is_empty() {
            return Err(signature_error("random", arg_types));
        }
        Ok(LogicalType::Double)
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    fn init_bind_data(&self) -> Option<BindData> {
        Some(BindData::Prng(rand::rngs::StdRng::from_entropy()))
    }

    fn execute(
        &self,
        _args: &[Vector],
        count: usize,
        bind_data: Option<&mut BindData>,
    ) -> Result<Vector> {
        let Some(BindData::Prng(rng)) = bind_data else {
            return Err(Error::Internal("random() executed without bind data".into()));
        };
        let mut result = Vector::with_capacity(LogicalType::Double, count);
        for _ in 0..count {
            result.push_value(&Value::Double(rng.gen_range(0.0..1.0)))?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_renders_interval() {
        let a = Vector::constant(
            &Value::Timestamp(temporal::parse_timestamp("2001-04-10 00:00:00").unwrap()),
            LogicalType::Timestamp,
            1,
        )
        .unwrap();
        let b = Vector::constant(
            &Value::Timestamp(temporal::parse_timestamp("1957-06-13 00:00:00").unwrap()),
            LogicalType::Timestamp,
            1,
        )
        .unwrap();
        let out = AgeFunction.execute(&[a, b], 1, None).unwrap();
        assert_eq!(
            out.value_at(0),
            Value::Varchar("43 years 9 mons 27 days".into())
        );
    }

    #[test]
    fn random_requires_bind_data() {
        assert!(RandomFunction.execute(&[], 1, None).is_err());
        let mut data = RandomFunction.init_bind_data().unwrap();
        let out = RandomFunction.execute(&[], 4, Some(&mut data)).unwrap();
        for k in 0..4 {
            let Value::Double(v) = out.value_at(k) else {
                panic!("expected double");
            };
            assert!((0.0..1.0).contains(&v));
        }
    }
}
