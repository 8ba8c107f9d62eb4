//! Scalar SQL values

use crate::error::{Error, Result};
use crate::types::data_type::LogicalType;
use crate::types::temporal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single immutable scalar: a type tag, an inline payload and a NULL bit
/// (the `Null` variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since 1970-01-01 00:00:00.
    Timestamp(i64),
    Varchar(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The logical type of this value; `None` for NULL, which is typeless
    /// until bound to a context.
    pub fn data_type(&self) -> Option<LogicalType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(LogicalType::Boolean),
            Value::TinyInt(_) => Some(LogicalType::TinyInt),
            Value::SmallInt(_) => Some(LogicalType::SmallInt),
            Value::Integer(_) => Some(LogicalType::Integer),
            Value::BigInt(_) => Some(LogicalType::BigInt),
            Value::Real(_) => Some(LogicalType::Real),
            Value::Double(_) => Some(LogicalType::Double),
            Value::Date(_) => Some(LogicalType::Date),
            Value::Timestamp(_) => Some(LogicalType::Timestamp),
            Value::Varchar(_) => Some(LogicalType::Varchar(None)),
            Value::Blob(_) => Some(LogicalType::Blob),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            Value::Boolean(v) => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    fn out_of_range(&self, target: &LogicalType) -> Error {
        Error::OutOfRange {
            value: self.to_string(),
            target: target.to_string(),
            row: None,
        }
    }

    fn invalid_format(text: &str, target: &LogicalType) -> Error {
        Error::InvalidFormat {
            text: text.to_string(),
            target: target.to_string(),
            row: None,
        }
    }

    /// Convert this value to `target`, checking ranges and formats. Never
    /// panics; NULL casts to NULL of any type.
    pub fn try_cast(&self, target: &LogicalType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        if self.data_type().as_ref() == Some(target) {
            return Ok(self.clone());
        }

        fn narrow<T>(source: &Value, target: &LogicalType, v: i64) -> Result<T>
        where
            T: TryFrom<i64>,
        {
            T::try_from(v).map_err(|_| source.out_of_range(target))
        }

        fn float_to_i64(f: f64, source: &Value, target: &LogicalType) -> Result<i64> {
            let rounded = f.round();
            if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
                return Err(source.out_of_range(target));
            }
            Ok(rounded as i64)
        }

        match target {
            LogicalType::Boolean => match self {
                Value::Varchar(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(Self::invalid_format(s, target)),
                },
                other => match other.as_i64() {
                    Some(v) => Ok(Value::Boolean(v != 0)),
                    None => Err(Self::invalid_format(&other.to_string(), target)),
                },
            },

            LogicalType::TinyInt
            | LogicalType::SmallInt
            | LogicalType::Integer
            | LogicalType::BigInt => {
                let wide = match self {
                    Value::Varchar(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| Self::invalid_format(s, target))?,
                    Value::Real(v) => float_to_i64(*v as f64, self, target)?,
                    Value::Double(v) => float_to_i64(*v, self, target)?,
                    other => other
                        .as_i64()
                        .ok_or_else(|| Self::invalid_format(&other.to_string(), target))?,
                };
                match target {
                    LogicalType::TinyInt => Ok(Value::TinyInt(narrow(self, target, wide)?)),
                    LogicalType::SmallInt => Ok(Value::SmallInt(narrow(self, target, wide)?)),
                    LogicalType::Integer => Ok(Value::Integer(narrow(self, target, wide)?)),
                    _ => Ok(Value::BigInt(wide)),
                }
            }

            LogicalType::Real => match self {
                Value::Varchar(s) => s
                    .trim()
                    .parse::<f32>()
                    .map(Value::Real)
                    .map_err(|_| Self::invalid_format(s, target)),
                other => {
                    let f = other
                        .as_f64()
                        .ok_or_else(|| Self::invalid_format(&other.to_string(), target))?;
                    if f.is_finite() && f.abs() > f32::MAX as f64 {
                        return Err(self.out_of_range(target));
                    }
                    Ok(Value::Real(f as f32))
                }
            },

            LogicalType::Double => match self {
                Value::Varchar(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|_| Self::invalid_format(s, target)),
                other => other
                    .as_f64()
                    .map(Value::Double)
                    .ok_or_else(|| Self::invalid_format(&other.to_string(), target)),
            },

            LogicalType::Date => match self {
                Value::Varchar(s) => temporal::parse_date(s).map(Value::Date),
                Value::Timestamp(micros) => {
                    Ok(Value::Date(micros.div_euclid(temporal::MICROS_PER_DAY) as i32))
                }
                other => Err(Self::invalid_format(&other.to_string(), target)),
            },

            LogicalType::Timestamp => match self {
                Value::Varchar(s) => temporal::parse_timestamp(s).map(Value::Timestamp),
                Value::Date(days) => {
                    Ok(Value::Timestamp(*days as i64 * temporal::MICROS_PER_DAY))
                }
                other => Err(Self::invalid_format(&other.to_string(), target)),
            },

            LogicalType::Varchar(_) => Ok(Value::Varchar(self.to_string())),

            LogicalType::Blob => match self {
                Value::Varchar(s) => Ok(Value::Blob(s.clone().into_bytes())),
                other => Err(Self::invalid_format(&other.to_string(), target)),
            },
        }
    }

    /// Total ordering used by ORDER BY and MIN/MAX. Operands are expected to
    /// share a logical type after binding; mixed numerics compare as
    /// doubles. NULL ordering is decided by the caller.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (TinyInt(a), TinyInt(b)) => a.cmp(b),
            (SmallInt(a), SmallInt(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (BigInt(a), BigInt(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Varchar(a), Varchar(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Date(days) => write!(f, "{}", temporal::format_date(*days)),
            Value::Timestamp(micros) => write!(f, "{}", temporal::format_timestamp(*micros)),
            Value::Varchar(s) => write!(f, "{}", s),
            Value::Blob(b) => {
                for byte in b {
                    write!(f, "\\x{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_checks_range() {
        let v = Value::Integer(10000);
        assert!(matches!(
            v.try_cast(&LogicalType::TinyInt),
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(
            Value::Integer(127).try_cast(&LogicalType::TinyInt).unwrap(),
            Value::TinyInt(127)
        );
    }

    #[test]
    fn null_casts_to_anything() {
        for ty in [LogicalType::Boolean, LogicalType::Timestamp, LogicalType::Blob] {
            assert_eq!(Value::Null.try_cast(&ty).unwrap(), Value::Null);
        }
    }

    #[test]
    fn varchar_round_trip() {
        let cases = vec![
            (Value::Boolean(true), LogicalType::Boolean),
            (Value::TinyInt(-8), LogicalType::TinyInt),
            (Value::SmallInt(1234), LogicalType::SmallInt),
            (Value::Integer(-77), LogicalType::Integer),
            (Value::BigInt(1 << 40), LogicalType::BigInt),
            (
                Value::Varchar("1992-02-29".into())
                    .try_cast(&LogicalType::Date)
                    .unwrap(),
                LogicalType::Date,
            ),
            (
                Value::Varchar("2008-01-01 00:00:01".into())
                    .try_cast(&LogicalType::Timestamp)
                    .unwrap(),
                LogicalType::Timestamp,
            ),
        ];
        for (value, ty) in cases {
            let text = value.try_cast(&LogicalType::Varchar(None)).unwrap();
            assert_eq!(text.try_cast(&ty).unwrap(), value);
        }
    }

    #[test]
    fn malformed_text_is_invalid_format() {
        assert!(matches!(
            Value::Varchar("pony".into()).try_cast(&LogicalType::Integer),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(
            Value::Varchar("1993-02-29".into()).try_cast(&LogicalType::Date),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn timestamp_truncates_to_date() {
        let ts = Value::Varchar("2001-04-10 13:45:00".into())
            .try_cast(&LogicalType::Timestamp)
            .unwrap();
        let date = ts.try_cast(&LogicalType::Date).unwrap();
        assert_eq!(
            date.try_cast(&LogicalType::Varchar(None)).unwrap(),
            Value::Varchar("2001-04-10".into())
        );
    }
}
