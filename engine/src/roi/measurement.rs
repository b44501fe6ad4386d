//! Measurement keys.
//!
//! A measurement is addressed by `(kind, reference)` and packed into a single
//! `u32` for storage, so new kinds never change the persisted schema:
//!
//! ```text
//! bits 31..24  kind
//! bits 23..16  reference tag (0 = none, 1 = channel, 2 = class)
//! bits 15..0   reference value
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::enums::ClassId;

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::FromRepr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MeasurementKind {
    Confidence = 0,
    AreaSize = 1,
    Perimeter = 2,
    Circularity = 3,
    CenterOfMassX = 4,
    CenterOfMassY = 5,
    BoundingBoxWidth = 6,
    BoundingBoxHeight = 7,
    IntensitySum = 8,
    IntensityAvg = 9,
    IntensityMin = 10,
    IntensityMax = 11,
    IntersectionCount = 12,
}

impl MeasurementKind {
    pub fn needs_channel(self) -> bool {
        matches!(
            self,
            MeasurementKind::IntensitySum
                | MeasurementKind::IntensityAvg
                | MeasurementKind::IntensityMin
                | MeasurementKind::IntensityMax
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeasurementRef {
    None,
    /// Channel (`cStack`) of the plane the value was measured on.
    Channel(u16),
    /// Class the value relates to, e.g. for intersection counts.
    Class(ClassId),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct MeasurementKey {
    pub kind: MeasurementKind,
    pub reference: MeasurementRef,
}

impl MeasurementKey {
    pub const fn plain(kind: MeasurementKind) -> Self {
        Self {
            kind,
            reference: MeasurementRef::None,
        }
    }

    pub const fn channel(kind: MeasurementKind, c: u16) -> Self {
        Self {
            kind,
            reference: MeasurementRef::Channel(c),
        }
    }

    pub const fn class(kind: MeasurementKind, class_id: ClassId) -> Self {
        Self {
            kind,
            reference: MeasurementRef::Class(class_id),
        }
    }

    pub fn pack(self) -> u32 {
        let (tag, value) = match self.reference {
            MeasurementRef::None => (0u32, 0u32),
            MeasurementRef::Channel(c) => (1, c as u32),
            MeasurementRef::Class(class_id) => (2, class_id.raw() as u32),
        };
        (self.kind as u32) << 24 | tag << 16 | value
    }

    pub fn unpack(packed: u32) -> Option<Self> {
        let kind = MeasurementKind::from_repr((packed >> 24) as u8)?;
        let value = (packed & 0xFFFF) as u16;
        let reference = match (packed >> 16) & 0xFF {
            0 => MeasurementRef::None,
            1 => MeasurementRef::Channel(value),
            2 => MeasurementRef::Class(ClassId::from_raw(value)),
            _ => return None,
        };
        Some(Self { kind, reference })
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reference {
            MeasurementRef::None => write!(f, "{}", self.kind),
            MeasurementRef::Channel(c) => write!(f, "{}[CH{}]", self.kind, c),
            MeasurementRef::Class(class_id) => write!(f, "{}[{}]", self.kind, class_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn packing_is_lossless_for_every_kind() {
        for kind in MeasurementKind::iter() {
            for reference in [
                MeasurementRef::None,
                MeasurementRef::Channel(3),
                MeasurementRef::Class(ClassId::TEMP_02),
            ] {
                let key = MeasurementKey { kind, reference };
                assert_eq!(MeasurementKey::unpack(key.pack()), Some(key));
            }
        }
    }

    #[test]
    fn packed_layout() {
        let key = MeasurementKey::channel(MeasurementKind::IntensityAvg, 2);
        assert_eq!(key.pack(), 0x0901_0002);
        assert_eq!(MeasurementKey::unpack(0xFF00_0000), None);
        assert_eq!(MeasurementKey::unpack(0x0003_0000), None);
    }

    #[test]
    fn display_names() {
        let key = MeasurementKey::class(MeasurementKind::IntersectionCount, ClassId::C1);
        assert_eq!(key.to_string(), "INTERSECTION_COUNT[C1]");
    }
}
