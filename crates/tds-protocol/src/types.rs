//! Server data type identifiers.
//!
//! The type byte is what column descriptions and parameter definitions carry
//! on the wire. The row store uses the helpers here to decide how much room a
//! column needs in a row buffer.

/// Server data type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// Null type.
    Null = 0x1F,
    /// 8-bit unsigned integer.
    Int1 = 0x30,
    /// Bit.
    Bit = 0x32,
    /// 16-bit signed integer.
    Int2 = 0x34,
    /// 32-bit signed integer.
    Int4 = 0x38,
    /// 64-bit signed integer.
    Int8 = 0x7F,
    /// 32-bit float.
    Float4 = 0x3B,
    /// 64-bit float.
    Float8 = 0x3E,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// 4-byte small datetime.
    DateTime4 = 0x3A,

    /// Nullable integer, width given by the column size.
    IntN = 0x26,
    /// Nullable bit.
    BitN = 0x68,
    /// Nullable float.
    FloatN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Unique identifier.
    Guid = 0x24,
    /// Legacy decimal.
    Decimal = 0x37,
    /// Legacy numeric.
    Numeric = 0x3F,
    /// Decimal.
    DecimalN = 0x6A,
    /// Numeric.
    NumericN = 0x6C,

    /// Fixed-length character.
    Char = 0x2F,
    /// Variable-length character.
    VarChar = 0x27,
    /// Fixed-length binary.
    Binary = 0x2D,
    /// Variable-length binary.
    VarBinary = 0x25,
    /// Large variable-length character.
    BigVarChar = 0xA7,
    /// Large variable-length binary.
    BigVarBinary = 0xA5,
    /// Large fixed-length character.
    BigChar = 0xAF,
    /// Large fixed-length binary.
    BigBinary = 0xAD,
    /// Fixed-length UTF-16 character.
    NChar = 0xEF,
    /// Variable-length UTF-16 character.
    NVarChar = 0xE7,

    /// Text blob.
    Text = 0x23,
    /// Image blob.
    Image = 0x22,
    /// UTF-16 text blob.
    NText = 0x63,
    /// XML document.
    Xml = 0xF1,

    /// Date (3 bytes).
    Date = 0x28,
    /// Time with scale.
    Time = 0x29,
    /// Datetime2 with scale.
    DateTime2 = 0x2A,
    /// Datetime with offset.
    DateTimeOffset = 0x2B,

    /// sql_variant.
    Variant = 0x62,
    /// CLR user-defined type.
    Udt = 0xF0,
}

impl TypeId {
    /// Create a type id from a raw byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x1F => Self::Null,
            0x30 => Self::Int1,
            0x32 => Self::Bit,
            0x34 => Self::Int2,
            0x38 => Self::Int4,
            0x7F => Self::Int8,
            0x3B => Self::Float4,
            0x3E => Self::Float8,
            0x3C => Self::Money,
            0x7A => Self::Money4,
            0x3D => Self::DateTime,
            0x3A => Self::DateTime4,
            0x26 => Self::IntN,
            0x68 => Self::BitN,
            0x6D => Self::FloatN,
            0x6E => Self::MoneyN,
            0x6F => Self::DateTimeN,
            0x24 => Self::Guid,
            0x37 => Self::Decimal,
            0x3F => Self::Numeric,
            0x6A => Self::DecimalN,
            0x6C => Self::NumericN,
            0x2F => Self::Char,
            0x27 => Self::VarChar,
            0x2D => Self::Binary,
            0x25 => Self::VarBinary,
            0xA7 => Self::BigVarChar,
            0xA5 => Self::BigVarBinary,
            0xAF => Self::BigChar,
            0xAD => Self::BigBinary,
            0xEF => Self::NChar,
            0xE7 => Self::NVarChar,
            0x23 => Self::Text,
            0x22 => Self::Image,
            0x63 => Self::NText,
            0xF1 => Self::Xml,
            0x28 => Self::Date,
            0x29 => Self::Time,
            0x2A => Self::DateTime2,
            0x2B => Self::DateTimeOffset,
            0x62 => Self::Variant,
            0xF0 => Self::Udt,
            _ => return None,
        })
    }

    /// Storage size of the fixed-width forms.
    #[must_use]
    pub const fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Int1 | Self::Bit => Some(1),
            Self::Int2 => Some(2),
            Self::Int4 | Self::Float4 | Self::Money4 | Self::DateTime4 => Some(4),
            Self::Int8 | Self::Float8 | Self::Money | Self::DateTime => Some(8),
            Self::Date => Some(3),
            _ => None,
        }
    }

    /// Whether the type has one fixed width on the wire.
    #[must_use]
    pub const fn is_fixed_length(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Whether values carry a length prefix.
    #[must_use]
    pub const fn is_variable_length(&self) -> bool {
        !self.is_fixed_length()
    }

    /// Large-object types stored out of line from the row buffer.
    #[must_use]
    pub const fn is_blob(&self) -> bool {
        matches!(
            self,
            Self::Text | Self::Image | Self::NText | Self::Xml | Self::Udt
        )
    }

    /// Decimal and numeric types.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Decimal | Self::Numeric | Self::DecimalN | Self::NumericN
        )
    }

    /// `sql_variant`.
    #[must_use]
    pub const fn is_variant(&self) -> bool {
        matches!(self, Self::Variant)
    }

    /// UTF-16 character types.
    #[must_use]
    pub const fn is_unicode(&self) -> bool {
        matches!(self, Self::NChar | Self::NVarChar | Self::NText)
    }

    /// Single-byte character types.
    #[must_use]
    pub const fn is_character(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::BigChar | Self::BigVarChar | Self::Text | Self::Xml
        )
    }

    /// Binary types.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Binary | Self::VarBinary | Self::BigBinary | Self::BigVarBinary | Self::Image
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(TypeId::Int4.fixed_size(), Some(4));
        assert_eq!(TypeId::DateTime.fixed_size(), Some(8));
        assert_eq!(TypeId::IntN.fixed_size(), None);
        assert!(TypeId::BigVarChar.is_variable_length());
    }

    #[test]
    fn test_families() {
        assert!(TypeId::Image.is_blob());
        assert!(!TypeId::BigVarBinary.is_blob());
        assert!(TypeId::NumericN.is_numeric());
        assert!(TypeId::Variant.is_variant());
        assert!(TypeId::NText.is_unicode());
        assert!(TypeId::Char.is_character());
        assert!(TypeId::BigBinary.is_binary());
    }

    proptest! {
        #[test]
        fn from_u8_is_inverse_of_repr(byte in any::<u8>()) {
            if let Some(type_id) = TypeId::from_u8(byte) {
                prop_assert_eq!(type_id as u8, byte);
            }
        }
    }
}
