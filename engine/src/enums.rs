//! Class ids, cache slots and the small enumerations shared by settings and runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Invalid {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Output class of an object.
///
/// `C0..=C32` are user classes. `TEMP_01..=TEMP_04` are pipeline private scratch
/// classes which never survive the pipeline that produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClassId(u16);

impl ClassId {
    pub const MAX_USER: u16 = 32;
    pub const TEMP_01: ClassId = ClassId(0xFFF0);
    pub const TEMP_02: ClassId = ClassId(0xFFF1);
    pub const TEMP_03: ClassId = ClassId(0xFFF2);
    pub const TEMP_04: ClassId = ClassId(0xFFF3);
    pub const NONE: ClassId = ClassId(0xFFFD);
    pub const UNDEFINED: ClassId = ClassId(0xFFFE);

    pub const C0: ClassId = ClassId(0);
    pub const C1: ClassId = ClassId(1);
    pub const C2: ClassId = ClassId(2);
    pub const C3: ClassId = ClassId(3);

    /// User class `C<n>`.
    pub const fn user(n: u16) -> ClassId {
        assert!(n <= Self::MAX_USER, "user class out of range");
        ClassId(n)
    }

    pub const fn from_raw(raw: u16) -> ClassId {
        ClassId(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub fn is_temporary(self) -> bool {
        (Self::TEMP_01.0..=Self::TEMP_04.0).contains(&self.0)
    }

    pub fn is_user(self) -> bool {
        self.0 <= Self::MAX_USER
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ClassId::NONE => write!(f, "NONE"),
            ClassId::UNDEFINED => write!(f, "UNDEFINED"),
            id if id.is_temporary() => write!(f, "TEMP_{:02}", id.0 - Self::TEMP_01.0 + 1),
            id => write!(f, "C{}", id.0),
        }
    }
}

impl FromStr for ClassId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseEnumError::new("class id", s);
        match s {
            "NONE" => Ok(ClassId::NONE),
            "UNDEFINED" => Ok(ClassId::UNDEFINED),
            _ => {
                if let Some(temp) = s.strip_prefix("TEMP_") {
                    let n: u16 = temp.parse().map_err(|_| err())?;
                    if !(1..=4).contains(&n) {
                        return Err(err());
                    }
                    return Ok(ClassId(Self::TEMP_01.0 + n - 1));
                }
                let n: u16 = s
                    .strip_prefix('C')
                    .ok_or_else(err)?
                    .parse()
                    .map_err(|_| err())?;
                if n > Self::MAX_USER {
                    return Err(err());
                }
                Ok(ClassId(n))
            }
        }
    }
}

impl TryFrom<String> for ClassId {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClassId> for String {
    fn from(value: ClassId) -> Self {
        value.to_string()
    }
}

/// Class reference in step settings; `$` resolves to the pipeline default class.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClassIdIn {
    #[default]
    Default,
    Id(ClassId),
}

impl ClassIdIn {
    pub fn resolve(self, default_class: ClassId) -> ClassId {
        match self {
            ClassIdIn::Default => default_class,
            ClassIdIn::Id(id) => id,
        }
    }
}

impl From<ClassId> for ClassIdIn {
    fn from(value: ClassId) -> Self {
        ClassIdIn::Id(value)
    }
}

impl fmt::Display for ClassIdIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassIdIn::Default => write!(f, "$"),
            ClassIdIn::Id(id) => id.fmt(f),
        }
    }
}

impl TryFrom<String> for ClassIdIn {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "$" {
            Ok(ClassIdIn::Default)
        } else {
            Ok(ClassIdIn::Id(value.parse()?))
        }
    }
}

impl From<ClassIdIn> for String {
    fn from(value: ClassIdIn) -> Self {
        value.to_string()
    }
}

/// Named image slot in the iteration cache (`M0`..`M9`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheSlot(u8);

impl CacheSlot {
    pub const COUNT: u8 = 10;

    pub const fn new(idx: u8) -> CacheSlot {
        assert!(idx < Self::COUNT, "cache slot out of range");
        CacheSlot(idx)
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

impl TryFrom<String> for CacheSlot {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let idx: u8 = value
            .strip_prefix('M')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ParseEnumError::new("cache slot", &value))?;
        if idx >= Self::COUNT {
            return Err(ParseEnumError::new("cache slot", &value));
        }
        Ok(CacheSlot(idx))
    }
}

impl From<CacheSlot> for String {
    fn from(value: CacheSlot) -> Self {
        value.to_string()
    }
}

/// Reduction applied over the Z planes of a channel.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ZProjection {
    #[default]
    None,
    #[serde(alias = "MAX_INTENSITY")]
    Max,
    #[serde(alias = "MIN_INTENSITY")]
    Min,
    #[serde(alias = "AVG_INTENSITY")]
    Avg,
    TakeMiddle,
}

/// Quality flags attached to images and planes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageValidity {
    Unknown,
    TooManyObjects,
    ImageOutOfFocus,
    InvalidImage,
}

impl ImageValidity {
    pub const fn bit(self) -> u32 {
        match self {
            ImageValidity::Unknown => 0x01,
            ImageValidity::TooManyObjects => 0x02,
            ImageValidity::ImageOutOfFocus => 0x04,
            ImageValidity::InvalidImage => 0x08,
        }
    }
}
