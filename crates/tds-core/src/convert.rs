//! Conversion between client bind buffers and server column storage.
//!
//! Client buffers use the host layout of the bind type (little-endian).
//! Server storage follows the TDS encodings:
//!
//! - `MONEY` is the high 32 bits followed by the low 32 bits of a count of
//!   ten-thousandths
//! - `DATETIME` is days since 1900-01-01 and 1/300 second ticks since
//!   midnight
//! - `UNIQUEIDENTIFIER` keeps its first three groups little-endian
//! - `DECIMAL`/`NUMERIC` are precision, scale, a sign byte (1 positive) and
//!   a 32-byte big-endian magnitude
//!
//! Every conversion goes through [`Value`].

use tds_protocol::TypeId;

use crate::column::{Column, NUMERIC_ROW_SIZE};
use crate::error::{Error, Result};

const TICKS_PER_MINUTE: u32 = 300 * 60;
const MONEY_SCALE: i64 = 10_000;
const MAX_PRECISION: u8 = 38;

/// Client-side bind type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    /// Unsigned 8-bit integer.
    TinyInt,
    /// Signed 16-bit integer.
    SmallInt,
    /// Unsigned 16-bit integer.
    USmallInt,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Host `long`, 64-bit.
    Long,
    /// Signed 64-bit integer.
    BigInt,
    /// Unsigned 64-bit integer.
    UBigInt,
    /// 32-bit float.
    Real,
    /// 64-bit float.
    Float,
    /// One byte, zero or not.
    Bit,
    /// 64-bit count of ten-thousandths.
    Money,
    /// 32-bit count of ten-thousandths.
    Money4,
    /// Days then ticks, 32 bits each.
    DateTime,
    /// Days then minutes, 16 bits each.
    DateTime4,
    /// 16-byte GUID in server byte order.
    Unique,
    /// Fixed-length character data.
    Char,
    /// Variable-length character data.
    VarChar,
    /// Fixed-length binary data.
    Binary,
    /// Variable-length binary data.
    VarBinary,
    /// Long character data.
    Text,
    /// Long binary data.
    Image,
}

impl BindType {
    /// Width of a fixed-width bind type. Character and binary types have
    /// none.
    #[must_use]
    pub const fn fixed_len(self) -> Option<usize> {
        match self {
            Self::Long
            | Self::Float
            | Self::Money
            | Self::DateTime
            | Self::BigInt
            | Self::UBigInt => Some(8),
            Self::Int | Self::UInt | Self::Real | Self::Money4 | Self::DateTime4 => Some(4),
            Self::SmallInt | Self::USmallInt => Some(2),
            Self::TinyInt | Self::Bit => Some(1),
            Self::Unique => Some(16),
            Self::Char
            | Self::VarChar
            | Self::Binary
            | Self::VarBinary
            | Self::Text
            | Self::Image => None,
        }
    }

    /// Whether values are character data.
    #[must_use]
    pub const fn is_character(self) -> bool {
        matches!(self, Self::Char | Self::VarChar | Self::Text)
    }

    fn name(self) -> String {
        format!("{self:?}")
    }
}

/// A value between its client and server representations.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Ten-thousandths.
    Money(i64),
    /// Days since 1900-01-01 and 1/300 s ticks since midnight.
    DateTime {
        /// Days.
        days: i32,
        /// Ticks.
        ticks: u32,
    },
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// GUID in server byte order.
    Guid([u8; 16]),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Money(_) => "money",
            Self::DateTime { .. } => "datetime",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Guid(_) => "guid",
        }
    }

    fn to_i128(&self, to: &str) -> Result<i128> {
        match self {
            Self::Int(v) => Ok(i128::from(*v)),
            Self::UInt(v) => Ok(i128::from(*v)),
            Self::Float(v) if v.is_finite() && v.abs() < 1e38 => Ok(v.trunc() as i128),
            Self::Float(_) => Err(Error::conversion("float", to, "not representable")),
            Self::Money(v) => Ok(i128::from(*v / MONEY_SCALE)),
            Self::Text(s) => s
                .trim()
                .parse::<i128>()
                .map_err(|_| Error::conversion("text", to, "not an integer")),
            other => Err(Error::conversion(other.kind(), to, "no integer form")),
        }
    }

    fn to_f64(&self, to: &str) -> Result<f64> {
        match self {
            Self::Int(v) => Ok(*v as f64),
            Self::UInt(v) => Ok(*v as f64),
            Self::Float(v) => Ok(*v),
            Self::Money(v) => Ok(*v as f64 / MONEY_SCALE as f64),
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::conversion("text", to, "not a number")),
            other => Err(Error::conversion(other.kind(), to, "no numeric form")),
        }
    }

    fn to_money(&self, to: &str) -> Result<i64> {
        match self {
            Self::Money(v) => Ok(*v),
            Self::Int(v) => v
                .checked_mul(MONEY_SCALE)
                .ok_or_else(|| Error::conversion("int", to, "out of range")),
            Self::UInt(v) => i64::try_from(*v)
                .ok()
                .and_then(|v| v.checked_mul(MONEY_SCALE))
                .ok_or_else(|| Error::conversion("uint", to, "out of range")),
            Self::Float(v) => float_to_money(*v, to),
            Self::Text(s) => parse_money(s.trim(), to),
            other => Err(Error::conversion(other.kind(), to, "no money form")),
        }
    }

    /// Value as an integer count of `10^-scale` units.
    fn to_scaled(&self, scale: u8, to: &str) -> Result<i128> {
        let factor = pow10(scale);
        match self {
            Self::Int(_) | Self::UInt(_) => self
                .to_i128(to)?
                .checked_mul(factor)
                .ok_or_else(|| Error::conversion(self.kind(), to, "out of range")),
            Self::Money(v) => {
                let v = i128::from(*v);
                if scale >= 4 {
                    v.checked_mul(pow10(scale - 4))
                        .ok_or_else(|| Error::conversion("money", to, "out of range"))
                } else {
                    Ok(v / pow10(4 - scale))
                }
            }
            Self::Float(v) => {
                let scaled = v * factor as f64;
                if scaled.is_finite() && scaled.abs() < 1e38 {
                    Ok(scaled.round() as i128)
                } else {
                    Err(Error::conversion("float", to, "out of range"))
                }
            }
            Self::Text(s) => parse_scaled(s.trim(), scale, to),
            other => Err(Error::conversion(other.kind(), to, "no numeric form")),
        }
    }

    fn to_text(&self, to: &str) -> Result<String> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            Self::Int(v) => Ok(v.to_string()),
            Self::UInt(v) => Ok(v.to_string()),
            Self::Float(v) => Ok(v.to_string()),
            Self::Money(v) => Ok(format_scaled(i128::from(*v), 4)),
            Self::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| Error::conversion("bytes", to, "not valid UTF-8")),
            Self::Guid(g) => Ok(format_guid(g)),
            Self::DateTime { .. } => Err(Error::conversion("datetime", to, "no text form")),
        }
    }

    fn to_bytes(&self, to: &str) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::Text(s) => Ok(s.as_bytes().to_vec()),
            Self::Guid(g) => Ok(g.to_vec()),
            other => Err(Error::conversion(other.kind(), to, "no binary form")),
        }
    }

    fn to_guid(&self, to: &str) -> Result<[u8; 16]> {
        match self {
            Self::Guid(g) => Ok(*g),
            Self::Bytes(b) => <[u8; 16]>::try_from(b.as_slice())
                .map_err(|_| Error::conversion("bytes", to, "not 16 bytes")),
            Self::Text(s) => parse_guid(s.trim(), to),
            other => Err(Error::conversion(other.kind(), to, "no guid form")),
        }
    }

    fn to_datetime(&self, to: &str) -> Result<(i32, u32)> {
        match self {
            Self::DateTime { days, ticks } => Ok((*days, *ticks)),
            other => Err(Error::conversion(other.kind(), to, "no datetime form")),
        }
    }
}

#[cfg(feature = "decimal")]
fn parse_money(text: &str, to: &str) -> Result<i64> {
    use rust_decimal::prelude::ToPrimitive;

    let decimal: rust_decimal::Decimal = text
        .parse()
        .map_err(|_| Error::conversion("text", to, "not a number"))?;
    (decimal * rust_decimal::Decimal::from(MONEY_SCALE))
        .round()
        .to_i64()
        .ok_or_else(|| Error::conversion("text", to, "out of range"))
}

#[cfg(not(feature = "decimal"))]
fn parse_money(text: &str, to: &str) -> Result<i64> {
    let value: f64 = text
        .parse()
        .map_err(|_| Error::conversion("text", to, "not a number"))?;
    float_to_money(value, to)
}

fn float_to_money(value: f64, to: &str) -> Result<i64> {
    let scaled = (value * MONEY_SCALE as f64).round();
    if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled <= i64::MAX as f64 {
        Ok(scaled as i64)
    } else {
        Err(Error::conversion("float", to, "out of range"))
    }
}

#[cfg(feature = "decimal")]
fn parse_scaled(text: &str, scale: u8, to: &str) -> Result<i128> {
    let mut decimal: rust_decimal::Decimal = text
        .parse()
        .map_err(|_| Error::conversion("text", to, "not a number"))?;
    decimal.rescale(u32::from(scale));
    if decimal.scale() != u32::from(scale) {
        return Err(Error::conversion("text", to, "scale out of range"));
    }
    Ok(decimal.mantissa())
}

#[cfg(not(feature = "decimal"))]
fn parse_scaled(text: &str, scale: u8, to: &str) -> Result<i128> {
    let value: f64 = text
        .parse()
        .map_err(|_| Error::conversion("text", to, "not a number"))?;
    Value::Float(value).to_scaled(scale, to)
}

#[cfg(feature = "uuid")]
fn parse_guid(text: &str, to: &str) -> Result<[u8; 16]> {
    let uuid = uuid::Uuid::parse_str(text).map_err(|_| Error::conversion("text", to, "not a GUID"))?;
    let b = uuid.as_bytes();
    Ok([
        b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13],
        b[14], b[15],
    ])
}

#[cfg(not(feature = "uuid"))]
fn parse_guid(_text: &str, to: &str) -> Result<[u8; 16]> {
    Err(Error::conversion("text", to, "GUID parsing disabled"))
}

fn format_guid(g: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        g[3], g[2], g[1], g[0], g[5], g[4], g[7], g[6], g[8], g[9], g[10], g[11], g[12], g[13],
        g[14], g[15]
    )
}

fn pow10(exp: u8) -> i128 {
    10i128.pow(u32::from(exp))
}

/// Render `mantissa * 10^-scale` as decimal text.
fn format_scaled(mantissa: i128, scale: u8) -> String {
    let sign = if mantissa < 0 { "-" } else { "" };
    let digits = mantissa.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let digits = format!("{digits:0>width$}", width = scale + 1);
    let (whole, frac) = digits.split_at(digits.len() - scale);
    format!("{sign}{whole}.{frac}")
}

fn read<const N: usize>(bytes: &[u8], from: &str) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|b| <[u8; N]>::try_from(b).ok())
        .ok_or_else(|| Error::conversion(from, "value", "buffer too short"))
}

/// Read a client buffer of `bind_type`.
pub fn decode_client(bind_type: BindType, bytes: &[u8]) -> Result<Value> {
    let from = bind_type.name();
    let from = from.as_str();
    Ok(match bind_type {
        BindType::TinyInt => Value::Int(i64::from(read::<1>(bytes, from)?[0])),
        BindType::Bit => Value::Int(i64::from(read::<1>(bytes, from)?[0] != 0)),
        BindType::SmallInt => Value::Int(i64::from(i16::from_le_bytes(read(bytes, from)?))),
        BindType::USmallInt => Value::Int(i64::from(u16::from_le_bytes(read(bytes, from)?))),
        BindType::Int => Value::Int(i64::from(i32::from_le_bytes(read(bytes, from)?))),
        BindType::UInt => Value::Int(i64::from(u32::from_le_bytes(read(bytes, from)?))),
        BindType::Long | BindType::BigInt => Value::Int(i64::from_le_bytes(read(bytes, from)?)),
        BindType::UBigInt => Value::UInt(u64::from_le_bytes(read(bytes, from)?)),
        BindType::Real => Value::Float(f64::from(f32::from_le_bytes(read(bytes, from)?))),
        BindType::Float => Value::Float(f64::from_le_bytes(read(bytes, from)?)),
        BindType::Money => Value::Money(i64::from_le_bytes(read(bytes, from)?)),
        BindType::Money4 => Value::Money(i64::from(i32::from_le_bytes(read(bytes, from)?))),
        BindType::DateTime => {
            let raw: [u8; 8] = read(bytes, from)?;
            Value::DateTime {
                days: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                ticks: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            }
        }
        BindType::DateTime4 => {
            let raw: [u8; 4] = read(bytes, from)?;
            Value::DateTime {
                days: i32::from(u16::from_le_bytes([raw[0], raw[1]])),
                ticks: u32::from(u16::from_le_bytes([raw[2], raw[3]])) * TICKS_PER_MINUTE,
            }
        }
        BindType::Unique => Value::Guid(read(bytes, from)?),
        BindType::Char | BindType::VarChar | BindType::Text => Value::Text(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::conversion(from, "text", "not valid UTF-8"))?,
        ),
        BindType::Binary | BindType::VarBinary | BindType::Image => Value::Bytes(bytes.to_vec()),
    })
}

fn int_in_range(value: &Value, to: &str, min: i128, max: i128) -> Result<i128> {
    let v = value.to_i128(to)?;
    if v < min || v > max {
        return Err(Error::conversion(value.kind(), to, "out of range"));
    }
    Ok(v)
}

fn checked_len(bytes: Vec<u8>, limit: usize, from: &str, to: &str) -> Result<Vec<u8>> {
    if limit > 0 && bytes.len() > limit {
        return Err(Error::conversion(from, to, "value too long"));
    }
    Ok(bytes)
}

fn sized(column: &Column, default: usize) -> usize {
    if column.size == 0 { default } else { column.size }
}

/// Encode `value` into the server storage of `column`.
pub fn encode_server(value: &Value, column: &Column) -> Result<Vec<u8>> {
    let ty = column
        .column_type()
        .ok_or(Error::InvalidColumnType)?;
    let to = format!("{ty:?}");
    let to = to.as_str();

    let int = |width: usize| -> Result<Vec<u8>> {
        Ok(match width {
            1 => vec![int_in_range(value, to, 0, i128::from(u8::MAX))? as u8],
            2 => (int_in_range(value, to, i128::from(i16::MIN), i128::from(i16::MAX))? as i16)
                .to_le_bytes()
                .to_vec(),
            4 => (int_in_range(value, to, i128::from(i32::MIN), i128::from(i32::MAX))? as i32)
                .to_le_bytes()
                .to_vec(),
            8 => (int_in_range(value, to, i128::from(i64::MIN), i128::from(i64::MAX))? as i64)
                .to_le_bytes()
                .to_vec(),
            _ => return Err(Error::conversion(value.kind(), to, "unsupported width")),
        })
    };
    let float = |width: usize| -> Result<Vec<u8>> {
        let v = value.to_f64(to)?;
        Ok(match width {
            4 => {
                if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                    return Err(Error::conversion(value.kind(), to, "out of range"));
                }
                (v as f32).to_le_bytes().to_vec()
            }
            8 => v.to_le_bytes().to_vec(),
            _ => return Err(Error::conversion(value.kind(), to, "unsupported width")),
        })
    };
    let money = |width: usize| -> Result<Vec<u8>> {
        let v = value.to_money(to)?;
        Ok(match width {
            4 => i32::try_from(v)
                .map_err(|_| Error::conversion(value.kind(), to, "out of range"))?
                .to_le_bytes()
                .to_vec(),
            8 => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&((v >> 32) as i32).to_le_bytes());
                out.extend_from_slice(&(v as u32).to_le_bytes());
                out
            }
            _ => return Err(Error::conversion(value.kind(), to, "unsupported width")),
        })
    };
    let datetime = |width: usize| -> Result<Vec<u8>> {
        let (days, ticks) = value.to_datetime(to)?;
        Ok(match width {
            4 => {
                let days = u16::try_from(days)
                    .map_err(|_| Error::conversion("datetime", to, "out of range"))?;
                let minutes = u16::try_from(ticks / TICKS_PER_MINUTE)
                    .map_err(|_| Error::conversion("datetime", to, "out of range"))?;
                let mut out = days.to_le_bytes().to_vec();
                out.extend_from_slice(&minutes.to_le_bytes());
                out
            }
            8 => {
                let mut out = days.to_le_bytes().to_vec();
                out.extend_from_slice(&ticks.to_le_bytes());
                out
            }
            _ => return Err(Error::conversion("datetime", to, "unsupported width")),
        })
    };

    match ty {
        TypeId::Int1 => int(1),
        TypeId::Int2 => int(2),
        TypeId::Int4 => int(4),
        TypeId::Int8 => int(8),
        TypeId::IntN => int(sized(column, 4)),
        TypeId::Bit | TypeId::BitN => Ok(vec![u8::from(value.to_i128(to)? != 0)]),
        TypeId::Float4 => float(4),
        TypeId::Float8 => float(8),
        TypeId::FloatN => float(sized(column, 8)),
        TypeId::Money4 => money(4),
        TypeId::Money => money(8),
        TypeId::MoneyN => money(sized(column, 8)),
        TypeId::DateTime4 => datetime(4),
        TypeId::DateTime => datetime(8),
        TypeId::DateTimeN => datetime(sized(column, 8)),
        TypeId::Guid => Ok(value.to_guid(to)?.to_vec()),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            encode_numeric(value, column.precision, column.scale, to)
        }
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            let text = value.to_text(to)?;
            checked_len(text.into_bytes(), column.size, value.kind(), to)
        }
        TypeId::NChar | TypeId::NVarChar | TypeId::NText | TypeId::Xml => {
            let text = value.to_text(to)?;
            let utf16: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
            checked_len(utf16, column.size, value.kind(), to)
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image => checked_len(value.to_bytes(to)?, column.size, value.kind(), to),
        _ => Err(Error::conversion(value.kind(), to, "unsupported conversion")),
    }
}

fn encode_numeric(value: &Value, precision: u8, scale: u8, to: &str) -> Result<Vec<u8>> {
    let precision = if precision == 0 { 18 } else { precision.min(MAX_PRECISION) };
    let scale = scale.min(precision);
    let mantissa = value.to_scaled(scale, to)?;
    let magnitude = mantissa.unsigned_abs();
    if magnitude >= 10u128.pow(u32::from(precision)) {
        return Err(Error::conversion(value.kind(), to, "precision exceeded"));
    }

    let mut out = vec![0u8; NUMERIC_ROW_SIZE];
    out[0] = precision;
    out[1] = scale;
    out[2] = u8::from(mantissa >= 0);
    out[NUMERIC_ROW_SIZE - 16..].copy_from_slice(&magnitude.to_be_bytes());
    Ok(out)
}

fn decode_numeric(data: &[u8], from: &str) -> Result<Value> {
    if data.len() < NUMERIC_ROW_SIZE {
        return Err(Error::conversion(from, "value", "buffer too short"));
    }
    if data[NUMERIC_ROW_SIZE - 32..NUMERIC_ROW_SIZE - 16]
        .iter()
        .any(|&b| b != 0)
    {
        return Err(Error::conversion(from, "value", "magnitude too large"));
    }
    let mut magnitude = [0u8; 16];
    magnitude.copy_from_slice(&data[NUMERIC_ROW_SIZE - 16..NUMERIC_ROW_SIZE]);
    let magnitude = i128::try_from(u128::from_be_bytes(magnitude))
        .map_err(|_| Error::conversion(from, "value", "magnitude too large"))?;
    let mantissa = if data[2] == 0 { -magnitude } else { magnitude };
    Ok(Value::Text(format_scaled(mantissa, data[1])))
}

/// Read the server storage of `column`.
pub fn decode_server(column: &Column, data: &[u8]) -> Result<Value> {
    let ty = column
        .column_type()
        .ok_or(Error::InvalidColumnType)?;
    let from = format!("{ty:?}");
    let from = from.as_str();

    let int = |width: usize| -> Result<Value> {
        Ok(match width {
            1 => Value::Int(i64::from(read::<1>(data, from)?[0])),
            2 => Value::Int(i64::from(i16::from_le_bytes(read(data, from)?))),
            4 => Value::Int(i64::from(i32::from_le_bytes(read(data, from)?))),
            8 => Value::Int(i64::from_le_bytes(read(data, from)?)),
            _ => return Err(Error::conversion(from, "value", "unsupported width")),
        })
    };
    let float = |width: usize| -> Result<Value> {
        Ok(match width {
            4 => Value::Float(f64::from(f32::from_le_bytes(read(data, from)?))),
            8 => Value::Float(f64::from_le_bytes(read(data, from)?)),
            _ => return Err(Error::conversion(from, "value", "unsupported width")),
        })
    };
    let money = |width: usize| -> Result<Value> {
        Ok(match width {
            4 => Value::Money(i64::from(i32::from_le_bytes(read(data, from)?))),
            8 => {
                let raw: [u8; 8] = read(data, from)?;
                let hi = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let lo = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
                Value::Money((i64::from(hi) << 32) | i64::from(lo))
            }
            _ => return Err(Error::conversion(from, "value", "unsupported width")),
        })
    };
    let datetime = |width: usize| -> Result<Value> {
        Ok(match width {
            4 => {
                let raw: [u8; 4] = read(data, from)?;
                Value::DateTime {
                    days: i32::from(u16::from_le_bytes([raw[0], raw[1]])),
                    ticks: u32::from(u16::from_le_bytes([raw[2], raw[3]])) * TICKS_PER_MINUTE,
                }
            }
            8 => {
                let raw: [u8; 8] = read(data, from)?;
                Value::DateTime {
                    days: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                    ticks: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
                }
            }
            _ => return Err(Error::conversion(from, "value", "unsupported width")),
        })
    };

    match ty {
        TypeId::Int1 => int(1),
        TypeId::Int2 => int(2),
        TypeId::Int4 => int(4),
        TypeId::Int8 => int(8),
        TypeId::IntN => int(data.len()),
        TypeId::Bit | TypeId::BitN => Ok(Value::Int(i64::from(read::<1>(data, from)?[0] != 0))),
        TypeId::Float4 => float(4),
        TypeId::Float8 => float(8),
        TypeId::FloatN => float(data.len()),
        TypeId::Money4 => money(4),
        TypeId::Money => money(8),
        TypeId::MoneyN => money(data.len()),
        TypeId::DateTime4 => datetime(4),
        TypeId::DateTime => datetime(8),
        TypeId::DateTimeN => datetime(data.len()),
        TypeId::Guid => Ok(Value::Guid(read(data, from)?)),
        TypeId::Decimal | TypeId::Numeric | TypeId::DecimalN | TypeId::NumericN => {
            decode_numeric(data, from)
        }
        TypeId::Char | TypeId::VarChar | TypeId::BigChar | TypeId::BigVarChar | TypeId::Text => {
            String::from_utf8(data.to_vec())
                .map(Value::Text)
                .map_err(|_| Error::conversion(from, "text", "not valid UTF-8"))
        }
        TypeId::NChar | TypeId::NVarChar | TypeId::NText | TypeId::Xml => {
            if data.len() % 2 != 0 {
                return Err(Error::conversion(from, "text", "odd UTF-16 length"));
            }
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units)
                .map(Value::Text)
                .map_err(|_| Error::conversion(from, "text", "not valid UTF-16"))
        }
        TypeId::Binary
        | TypeId::VarBinary
        | TypeId::BigBinary
        | TypeId::BigVarBinary
        | TypeId::Image => Ok(Value::Bytes(data.to_vec())),
        _ => Err(Error::conversion(from, "value", "unsupported conversion")),
    }
}

/// Encode `value` into a client buffer of `bind_type`, at most `max_len`
/// bytes for character and binary types (0 means no limit).
pub fn encode_client(value: &Value, bind_type: BindType, max_len: usize) -> Result<Vec<u8>> {
    let to = bind_type.name();
    let to = to.as_str();
    let range = |min: i128, max: i128| int_in_range(value, to, min, max);

    Ok(match bind_type {
        BindType::TinyInt => vec![range(0, i128::from(u8::MAX))? as u8],
        BindType::Bit => vec![u8::from(value.to_i128(to)? != 0)],
        BindType::SmallInt => (range(i128::from(i16::MIN), i128::from(i16::MAX))? as i16)
            .to_le_bytes()
            .to_vec(),
        BindType::USmallInt => (range(0, i128::from(u16::MAX))? as u16).to_le_bytes().to_vec(),
        BindType::Int => (range(i128::from(i32::MIN), i128::from(i32::MAX))? as i32)
            .to_le_bytes()
            .to_vec(),
        BindType::UInt => (range(0, i128::from(u32::MAX))? as u32).to_le_bytes().to_vec(),
        BindType::Long | BindType::BigInt => {
            (range(i128::from(i64::MIN), i128::from(i64::MAX))? as i64)
                .to_le_bytes()
                .to_vec()
        }
        BindType::UBigInt => (range(0, i128::from(u64::MAX))? as u64).to_le_bytes().to_vec(),
        BindType::Real => (value.to_f64(to)? as f32).to_le_bytes().to_vec(),
        BindType::Float => value.to_f64(to)?.to_le_bytes().to_vec(),
        BindType::Money => value.to_money(to)?.to_le_bytes().to_vec(),
        BindType::Money4 => i32::try_from(value.to_money(to)?)
            .map_err(|_| Error::conversion(value.kind(), to, "out of range"))?
            .to_le_bytes()
            .to_vec(),
        BindType::DateTime => {
            let (days, ticks) = value.to_datetime(to)?;
            let mut out = days.to_le_bytes().to_vec();
            out.extend_from_slice(&ticks.to_le_bytes());
            out
        }
        BindType::DateTime4 => {
            let (days, ticks) = value.to_datetime(to)?;
            let days =
                u16::try_from(days).map_err(|_| Error::conversion("datetime", to, "out of range"))?;
            let minutes = u16::try_from(ticks / TICKS_PER_MINUTE)
                .map_err(|_| Error::conversion("datetime", to, "out of range"))?;
            let mut out = days.to_le_bytes().to_vec();
            out.extend_from_slice(&minutes.to_le_bytes());
            out
        }
        BindType::Unique => value.to_guid(to)?.to_vec(),
        BindType::Char | BindType::VarChar | BindType::Text => {
            checked_len(value.to_text(to)?.into_bytes(), max_len, value.kind(), to)?
        }
        BindType::Binary | BindType::VarBinary | BindType::Image => {
            checked_len(value.to_bytes(to)?, max_len, value.kind(), to)?
        }
    })
}

/// Convert a bound client buffer into `column`'s server storage.
pub fn client_to_server(bind_type: BindType, src: &[u8], column: &Column) -> Result<Vec<u8>> {
    encode_server(&decode_client(bind_type, src)?, column)
}

/// Convert `column`'s server storage into a client buffer.
pub fn server_to_client(
    column: &Column,
    src: &[u8],
    bind_type: BindType,
    max_len: usize,
) -> Result<Vec<u8>> {
    encode_client(&decode_server(column, src)?, bind_type, max_len)
}
