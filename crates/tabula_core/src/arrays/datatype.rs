use std::fmt;

use tabula_error::{Result, type_err};

/// Logical type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Type of a column containing only nulls.
    Null,
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Utf8,
    /// Days since the unix epoch.
    Date,
    /// Microseconds since the unix epoch.
    Datetime,
    /// Dictionary encoded strings.
    Categorical,
    /// Variable length lists.
    List(Box<DataType>),
    /// Fixed width lists, every row holds exactly `width` values.
    Array(Box<DataType>, usize),
}

impl DataType {
    pub fn list(inner: DataType) -> Self {
        DataType::List(Box::new(inner))
    }

    pub fn array(inner: DataType, width: usize) -> Self {
        DataType::Array(Box::new(inner), width)
    }

    pub const fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub const fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    pub const fn is_integer(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub const fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub const fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Datetime)
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, DataType::Utf8 | DataType::Categorical)
    }

    pub const fn is_boolean(&self) -> bool {
        matches!(self, DataType::Boolean)
    }

    pub const fn is_nested(&self) -> bool {
        matches!(self, DataType::List(_) | DataType::Array(_, _))
    }

    /// Inner type for list and array types.
    pub fn inner(&self) -> Option<&DataType> {
        match self {
            DataType::List(inner) | DataType::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    /// Signedness and bit width for integer types.
    fn int_info(&self) -> Option<(bool, u32)> {
        Some(match self {
            DataType::Int8 => (true, 8),
            DataType::Int16 => (true, 16),
            DataType::Int32 => (true, 32),
            DataType::Int64 => (true, 64),
            DataType::UInt8 => (false, 8),
            DataType::UInt16 => (false, 16),
            DataType::UInt32 => (false, 32),
            DataType::UInt64 => (false, 64),
            _ => return None,
        })
    }

    fn int_from_info(signed: bool, bits: u32) -> DataType {
        match (signed, bits) {
            (true, 8) => DataType::Int8,
            (true, 16) => DataType::Int16,
            (true, 32) => DataType::Int32,
            (true, _) => DataType::Int64,
            (false, 8) => DataType::UInt8,
            (false, 16) => DataType::UInt16,
            (false, 32) => DataType::UInt32,
            (false, _) => DataType::UInt64,
        }
    }

    /// Get the common type both inputs can be losslessly (where possible)
    /// cast to for arithmetic and comparisons.
    pub fn supertype(left: &DataType, right: &DataType) -> Result<DataType> {
        if left == right {
            return Ok(left.clone());
        }

        let out = match (left, right) {
            (DataType::Null, other) | (other, DataType::Null) => other.clone(),
            (DataType::Boolean, other) | (other, DataType::Boolean) if other.is_numeric() => {
                other.clone()
            }
            (a, b) if a.is_integer() && b.is_integer() => {
                let (a_signed, a_bits) = a.int_info().unwrap_or((true, 64));
                let (b_signed, b_bits) = b.int_info().unwrap_or((true, 64));
                match (a_signed, b_signed) {
                    (true, true) | (false, false) => {
                        DataType::int_from_info(a_signed, a_bits.max(b_bits))
                    }
                    (true, false) => DataType::int_from_info(true, a_bits.max(b_bits * 2)),
                    (false, true) => DataType::int_from_info(true, b_bits.max(a_bits * 2)),
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => DataType::Float64,
            (DataType::Date, DataType::Datetime) | (DataType::Datetime, DataType::Date) => {
                DataType::Datetime
            }
            (DataType::Categorical, DataType::Utf8) | (DataType::Utf8, DataType::Categorical) => {
                DataType::Utf8
            }
            (DataType::List(a), DataType::List(b))
            | (DataType::List(a), DataType::Array(b, _))
            | (DataType::Array(a, _), DataType::List(b)) => {
                DataType::list(DataType::supertype(a, b)?)
            }
            (DataType::Array(a, a_width), DataType::Array(b, b_width)) => {
                if a_width == b_width {
                    DataType::array(DataType::supertype(a, b)?, *a_width)
                } else {
                    DataType::list(DataType::supertype(a, b)?)
                }
            }
            (a, b) => return Err(type_err!("No common type for {a} and {b}")),
        };

        Ok(out)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Int8 => write!(f, "Int8"),
            Self::Int16 => write!(f, "Int16"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt8 => write!(f, "UInt8"),
            Self::UInt16 => write!(f, "UInt16"),
            Self::UInt32 => write!(f, "UInt32"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Float32 => write!(f, "Float32"),
            Self::Float64 => write!(f, "Float64"),
            Self::Utf8 => write!(f, "Utf8"),
            Self::Date => write!(f, "Date"),
            Self::Datetime => write!(f, "Datetime"),
            Self::Categorical => write!(f, "Categorical"),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Array(inner, width) => write!(f, "Array[{inner}; {width}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supertype_integers() {
        let cases = [
            (DataType::Int8, DataType::Int32, DataType::Int32),
            (DataType::UInt8, DataType::UInt16, DataType::UInt16),
            (DataType::UInt8, DataType::Int8, DataType::Int16),
            (DataType::UInt32, DataType::Int64, DataType::Int64),
            (DataType::UInt64, DataType::Int8, DataType::Int64),
            (DataType::Int32, DataType::Float32, DataType::Float64),
            (DataType::Boolean, DataType::Int8, DataType::Int8),
        ];

        for (a, b, expected) in cases {
            assert_eq!(expected, DataType::supertype(&a, &b).unwrap(), "{a} {b}");
            assert_eq!(expected, DataType::supertype(&b, &a).unwrap(), "{b} {a}");
        }
    }

    #[test]
    fn supertype_incompatible() {
        let err = DataType::supertype(&DataType::Utf8, &DataType::Int64).unwrap_err();
        assert_eq!(tabula_error::ErrorKind::Type, err.kind());
    }

    #[test]
    fn supertype_nested() {
        let got = DataType::supertype(
            &DataType::list(DataType::Int32),
            &DataType::list(DataType::Null),
        )
        .unwrap();
        assert_eq!(DataType::list(DataType::Int32), got);
    }

    #[test]
    fn display() {
        assert_eq!("List[Int64]", DataType::list(DataType::Int64).to_string());
        assert_eq!(
            "Array[Float64; 2]",
            DataType::array(DataType::Float64, 2).to_string()
        );
    }
}
