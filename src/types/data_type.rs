//! Logical SQL types and their physical in-memory representations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical SQL data types as declared in table schemas and carried by every
/// bound expression. Width and scale are accepted by the grammar for future
/// decimal support but take no part in arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Date,
    Timestamp,
    Varchar(Option<usize>),
    Blob,
}

/// Physical storage types used by vectors. Every logical type maps to
/// exactly one physical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    StringRef,
}

impl LogicalType {
    /// The physical representation of this logical type. Dates are stored as
    /// days since 1970-01-01, timestamps as microseconds since the epoch.
    pub fn physical(&self) -> PhysicalType {
        match self {
            LogicalType::Boolean => PhysicalType::Bool,
            LogicalType::TinyInt => PhysicalType::I8,
            LogicalType::SmallInt => PhysicalType::I16,
            LogicalType::Integer => PhysicalType::I32,
            LogicalType::BigInt => PhysicalType::I64,
            LogicalType::Real => PhysicalType::F32,
            LogicalType::Double => PhysicalType::F64,
            LogicalType::Date => PhysicalType::I32,
            LogicalType::Timestamp => PhysicalType::I64,
            LogicalType::Varchar(_) | LogicalType::Blob => PhysicalType::StringRef,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            LogicalType::TinyInt
                | LogicalType::SmallInt
                | LogicalType::Integer
                | LogicalType::BigInt
                | LogicalType::Real
                | LogicalType::Double
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::TinyInt | LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, LogicalType::Date | LogicalType::Timestamp)
    }

    /// Rank within the numeric promotion lattice; `Double` is the top.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            LogicalType::TinyInt => Some(1),
            LogicalType::SmallInt => Some(2),
            LogicalType::Integer => Some(3),
            LogicalType::BigInt => Some(4),
            LogicalType::Real => Some(5),
            LogicalType::Double => Some(6),
            _ => None,
        }
    }

    /// The join of two types under implicit promotion: numerics promote to
    /// the wider operand, identical types join to themselves, and everything
    /// else (VARCHAR included) is incomparable.
    pub fn join(a: &LogicalType, b: &LogicalType) -> Option<LogicalType> {
        if a == b {
            return Some(a.clone());
        }
        // VARCHARs of different widths compare as text.
        if matches!(a, LogicalType::Varchar(_)) && matches!(b, LogicalType::Varchar(_)) {
            return Some(LogicalType::Varchar(None));
        }
        match (a.numeric_rank(), b.numeric_rank()) {
            (Some(ra), Some(rb)) => Some(if ra >= rb { a.clone() } else { b.clone() }),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::TinyInt => write!(f, "TINYINT"),
            LogicalType::SmallInt => write!(f, "SMALLINT"),
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::BigInt => write!(f, "BIGINT"),
            LogicalType::Real => write!(f, "REAL"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::Varchar(Some(n)) => write!(f, "VARCHAR({})", n),
            LogicalType::Varchar(None) => write!(f, "VARCHAR"),
            LogicalType::Blob => write!(f, "BLOB"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_join_promotes_to_wider() {
        assert_eq!(
            LogicalType::join(&LogicalType::TinyInt, &LogicalType::BigInt),
            Some(LogicalType::BigInt)
        );
        assert_eq!(
            LogicalType::join(&LogicalType::Integer, &LogicalType::Double),
            Some(LogicalType::Double)
        );
        assert_eq!(
            LogicalType::join(&LogicalType::Real, &LogicalType::Real),
            Some(LogicalType::Real)
        );
    }

    #[test]
    fn varchar_is_disjoint_from_numerics() {
        assert_eq!(
            LogicalType::join(&LogicalType::Varchar(None), &LogicalType::Integer),
            None
        );
        assert_eq!(
            LogicalType::join(&LogicalType::Timestamp, &LogicalType::Integer),
            None
        );
    }

    #[test]
    fn every_logical_type_has_a_physical_type() {
        for ty in [
            LogicalType::Boolean,
            LogicalType::TinyInt,
            LogicalType::SmallInt,
            LogicalType::Integer,
            LogicalType::BigInt,
            LogicalType::Real,
            LogicalType::Double,
            LogicalType::Date,
            LogicalType::Timestamp,
            LogicalType::Varchar(Some(16)),
            LogicalType::Blob,
        ] {
            let _ = ty.physical();
        }
    }
}
