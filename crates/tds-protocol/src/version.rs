//! TDS protocol version numbers.

use core::fmt;

/// TDS protocol version as sent in the login record.
///
/// TDS 8.0 is encoded as `0x08000000`, numerically lower than every 7.x
/// value, so ordering helpers special-case it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 5.0 (Sybase).
    pub const V5_0: Self = Self(0x0500_0000);
    /// TDS 7.0 (SQL Server 7.0).
    pub const V7_0: Self = Self(0x7000_0000);
    /// TDS 7.1 (SQL Server 2000).
    pub const V7_1: Self = Self(0x7100_0000);
    /// TDS 7.2 (SQL Server 2005), first version with MARS.
    pub const V7_2: Self = Self(0x7209_0002);
    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);
    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);
    /// TDS 7.4 (SQL Server 2012+).
    pub const V7_4: Self = Self(0x7400_0004);
    /// TDS 8.0 (strict encryption).
    pub const V8_0: Self = Self(0x0800_0000);

    /// Wrap a raw version value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is TDS 8.0.
    #[must_use]
    pub const fn is_tds_8(self) -> bool {
        self.0 == Self::V8_0.0
    }

    /// Whether this is a Sybase (pre-7.0) version.
    #[must_use]
    pub const fn is_sybase(self) -> bool {
        !self.is_tds_8() && self.0 < Self::V7_0.0
    }

    /// Whether this version is at least `other`, treating 8.0 as newest.
    #[must_use]
    pub const fn at_least(self, other: Self) -> bool {
        match (self.is_tds_8(), other.is_tds_8()) {
            (true, _) => true,
            (false, true) => false,
            (false, false) => self.0 >= other.0,
        }
    }

    /// Whether multiple active result sets may be negotiated.
    #[must_use]
    pub const fn supports_mars(self) -> bool {
        self.at_least(Self::V7_2)
    }

    /// The lower of two versions, with 8.0 ranking above every 7.x.
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if self.at_least(other) { other } else { self }
    }

    /// Parse `"5.0"`, `"7.0"` .. `"7.4"`, `"7.3a"`, `"7.3b"` or `"8.0"`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5.0" | "5" => Some(Self::V5_0),
            "7.0" => Some(Self::V7_0),
            "7.1" => Some(Self::V7_1),
            "7.2" => Some(Self::V7_2),
            "7.3" | "7.3a" => Some(Self::V7_3A),
            "7.3b" => Some(Self::V7_3B),
            "7.4" => Some(Self::V7_4),
            "8.0" | "8" => Some(Self::V8_0),
            _ => None,
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V5_0 => f.write_str("TDS 5.0"),
            Self::V7_0 => f.write_str("TDS 7.0"),
            Self::V7_1 => f.write_str("TDS 7.1"),
            Self::V7_2 => f.write_str("TDS 7.2"),
            Self::V7_3A => f.write_str("TDS 7.3A"),
            Self::V7_3B => f.write_str("TDS 7.3B"),
            Self::V7_4 => f.write_str("TDS 7.4"),
            Self::V8_0 => f.write_str("TDS 8.0"),
            Self(raw) => write!(f, "TDS 0x{raw:08X}"),
        }
    }
}

impl From<u32> for TdsVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(TdsVersion::V7_4.at_least(TdsVersion::V7_3B));
        assert!(TdsVersion::V7_0.at_least(TdsVersion::V5_0));
        assert!(TdsVersion::V8_0.at_least(TdsVersion::V7_4));
        assert!(!TdsVersion::V7_4.at_least(TdsVersion::V8_0));
        assert!(!TdsVersion::V5_0.at_least(TdsVersion::V7_0));
    }

    #[test]
    fn test_mars_support() {
        assert!(!TdsVersion::V5_0.supports_mars());
        assert!(!TdsVersion::V7_1.supports_mars());
        assert!(TdsVersion::V7_2.supports_mars());
        assert!(TdsVersion::V8_0.supports_mars());
    }

    #[test]
    fn test_sybase_detection() {
        assert!(TdsVersion::V5_0.is_sybase());
        assert!(!TdsVersion::V8_0.is_sybase());
        assert!(!TdsVersion::V7_0.is_sybase());
    }

    #[test]
    fn test_min_version() {
        assert_eq!(TdsVersion::V7_4.min(TdsVersion::V7_3A), TdsVersion::V7_3A);
        assert_eq!(TdsVersion::V8_0.min(TdsVersion::V7_4), TdsVersion::V7_4);
        assert_eq!(TdsVersion::V7_4.min(TdsVersion::V8_0), TdsVersion::V7_4);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(TdsVersion::parse(" 5.0 "), Some(TdsVersion::V5_0));
        assert_eq!(TdsVersion::parse("7.3B"), Some(TdsVersion::V7_3B));
        assert_eq!(TdsVersion::parse("9.1"), None);
        assert_eq!(TdsVersion::V7_3A.to_string(), "TDS 7.3A");
        assert_eq!(TdsVersion::new(0x1234_5678).to_string(), "TDS 0x12345678");
    }
}
