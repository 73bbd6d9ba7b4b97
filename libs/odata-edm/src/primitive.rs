use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `Edm.*` primitive types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveKind {
    Binary,
    Boolean,
    Byte,
    SByte,
    Date,
    DateTimeOffset,
    TimeOfDay,
    Duration,
    Decimal,
    Double,
    Single,
    Guid,
    Int16,
    Int32,
    Int64,
    String,
    Stream,
}

const ALL: [PrimitiveKind; 17] = [
    PrimitiveKind::Binary,
    PrimitiveKind::Boolean,
    PrimitiveKind::Byte,
    PrimitiveKind::SByte,
    PrimitiveKind::Date,
    PrimitiveKind::DateTimeOffset,
    PrimitiveKind::TimeOfDay,
    PrimitiveKind::Duration,
    PrimitiveKind::Decimal,
    PrimitiveKind::Double,
    PrimitiveKind::Single,
    PrimitiveKind::Guid,
    PrimitiveKind::Int16,
    PrimitiveKind::Int32,
    PrimitiveKind::Int64,
    PrimitiveKind::String,
    PrimitiveKind::Stream,
];

impl PrimitiveKind {
    pub const NAMESPACE: &'static str = "Edm";

    /// Short name without the `Edm.` prefix.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Binary => "Binary",
            Self::Boolean => "Boolean",
            Self::Byte => "Byte",
            Self::SByte => "SByte",
            Self::Date => "Date",
            Self::DateTimeOffset => "DateTimeOffset",
            Self::TimeOfDay => "TimeOfDay",
            Self::Duration => "Duration",
            Self::Decimal => "Decimal",
            Self::Double => "Double",
            Self::Single => "Single",
            Self::Guid => "Guid",
            Self::Int16 => "Int16",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::String => "String",
            Self::Stream => "Stream",
        }
    }

    /// Accepts `Edm.Int32` as well as the bare `Int32`.
    #[must_use]
    pub fn from_name(text: &str) -> Option<Self> {
        let short = text.strip_prefix("Edm.").unwrap_or(text);
        ALL.into_iter().find(|k| k.name() == short)
    }

    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Byte | Self::SByte | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.is_integral() || matches!(self, Self::Decimal | Self::Double | Self::Single)
    }

    #[must_use]
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date | Self::DateTimeOffset | Self::TimeOfDay | Self::Duration
        )
    }

    /// Whether a value of `other` can be used where `self` is expected.
    #[must_use]
    pub fn is_compatible_from(self, other: Self) -> bool {
        if self == other {
            return true;
        }
        match other {
            Self::Byte => matches!(
                self,
                Self::Int16 | Self::Int32 | Self::Int64 | Self::Single | Self::Double | Self::Decimal
            ),
            Self::SByte => matches!(
                self,
                Self::Int16 | Self::Int32 | Self::Int64 | Self::Single | Self::Double | Self::Decimal
            ),
            Self::Int16 => matches!(
                self,
                Self::Int32 | Self::Int64 | Self::Single | Self::Double | Self::Decimal
            ),
            Self::Int32 => matches!(
                self,
                Self::Int64 | Self::Single | Self::Double | Self::Decimal
            ),
            Self::Int64 => matches!(self, Self::Single | Self::Double | Self::Decimal),
            Self::Single => matches!(self, Self::Double | Self::Decimal),
            Self::Double => matches!(self, Self::Decimal),
            Self::Decimal => matches!(self, Self::Single | Self::Double),
            Self::Date => matches!(self, Self::DateTimeOffset),
            _ => false,
        }
    }

    /// Common type two numeric operands promote to, if any.
    #[must_use]
    pub fn promote(self, other: Self) -> Option<Self> {
        if self.is_compatible_from(other) {
            Some(self)
        } else if other.is_compatible_from(self) {
            Some(other)
        } else if self.is_numeric() && other.is_numeric() {
            Some(Self::Decimal)
        } else {
            None
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edm.{}", self.name())
    }
}

impl Serialize for PrimitiveKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PrimitiveKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_name(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown primitive type: {text}")))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in ALL {
            assert_eq!(PrimitiveKind::from_name(&kind.to_string()), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_name("Edm.Foo"), None);
    }

    #[test]
    fn numeric_promotion() {
        assert!(PrimitiveKind::Int64.is_compatible_from(PrimitiveKind::Int32));
        assert!(PrimitiveKind::Decimal.is_compatible_from(PrimitiveKind::SByte));
        assert!(!PrimitiveKind::Int32.is_compatible_from(PrimitiveKind::Int64));
        assert!(!PrimitiveKind::String.is_compatible_from(PrimitiveKind::Int32));
        assert!(PrimitiveKind::DateTimeOffset.is_compatible_from(PrimitiveKind::Date));
        assert_eq!(
            PrimitiveKind::Int32.promote(PrimitiveKind::Double),
            Some(PrimitiveKind::Double)
        );
        assert_eq!(
            PrimitiveKind::Double.promote(PrimitiveKind::Decimal),
            Some(PrimitiveKind::Double)
        );
        assert_eq!(PrimitiveKind::String.promote(PrimitiveKind::Int32), None);
    }
}
