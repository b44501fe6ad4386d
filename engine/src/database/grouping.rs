//! Assignment of image files to plate wells.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::settings::GroupBy;

/// Group used when grouping is off or a file name carries no well position.
pub const DEFAULT_GROUP_NAME: &str = "default";

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("Invalid filename regex: {0}")]
    InvalidRegex(#[from] regex::Error),
    #[error("Filename regex needs 4 capture groups (prefix)(row)(col)(img), found {found}")]
    TooFewGroups { found: usize },
}

pub type GroupingResult<T> = Result<T, GroupingError>;

/// Well of an image.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct GroupInfo {
    pub group_name: String,
    pub group_id: u16,
    /// Column of the well, 0 when unknown.
    pub well_pos_x: u16,
    /// Row of the well, 0 when unknown.
    pub well_pos_y: u16,
    /// Index of the image inside its well.
    pub image_idx: u32,
}

/// Position parsed from a file name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct WellPosition {
    pub row: u16,
    pub col: u16,
    pub img: u32,
}

impl WellPosition {
    /// `well_<row letter>_<col>`; rows beyond `Z` keep their number.
    pub fn group_name(&self) -> String {
        format!("well_{}_{}", row_label(self.row), self.col)
    }
}

fn row_label(row: u16) -> String {
    match row {
        1..=26 => char::from(b'A' + (row - 1) as u8).to_string(),
        _ => row.to_string(),
    }
}

/// Digits count as themselves and letters as their alphabet index, each
/// step shifting the previous value by one decimal place: `"B"` is 2, `"12"`
/// is 12 and `"A1"` is 11.
pub fn string_to_number(text: &str) -> u32 {
    text.chars().fold(0u32, |acc, c| {
        if let Some(digit) = c.to_digit(10) {
            acc.wrapping_mul(10).wrapping_add(digit)
        } else if c.is_ascii_alphabetic() {
            let index = (c.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
            acc.wrapping_mul(10).wrapping_add(index)
        } else {
            warn!("Invalid character '{c}' in well position");
            acc
        }
    })
}

/// Extracts well positions from file names with a `(prefix)(row)(col)(img)` regex.
#[derive(Clone, Debug)]
pub struct FilenameGrouper {
    regex: Regex,
}

impl FilenameGrouper {
    pub fn new(pattern: &str) -> GroupingResult<FilenameGrouper> {
        let regex = Regex::new(pattern)?;
        // captures_len counts the implicit whole-match group
        let found = regex.captures_len() - 1;
        if found < 4 {
            return Err(GroupingError::TooFewGroups { found });
        }
        Ok(FilenameGrouper { regex })
    }

    pub fn parse(&self, file_name: &str) -> Option<WellPosition> {
        let captures = self.regex.captures(file_name)?;
        let group = |i: usize| captures.get(i).map_or(0, |m| string_to_number(m.as_str()));
        Some(WellPosition {
            row: group(2) as u16,
            col: group(3) as u16,
            img: group(4),
        })
    }
}

/// Hands out group ids in the order groups are first seen.
#[derive(Debug)]
pub struct FileGrouper {
    group_by: GroupBy,
    filename: Option<FilenameGrouper>,
    ids: BTreeMap<String, u16>,
    next_image_idx: BTreeMap<u16, u32>,
}

impl FileGrouper {
    pub fn new(group_by: GroupBy, filename_regex: &str) -> GroupingResult<FileGrouper> {
        let filename = match group_by {
            GroupBy::Filename => Some(FilenameGrouper::new(filename_regex)?),
            GroupBy::Off | GroupBy::Directory => None,
        };
        Ok(FileGrouper {
            group_by,
            filename,
            ids: BTreeMap::new(),
            next_image_idx: BTreeMap::new(),
        })
    }

    fn group_id(&mut self, name: &str) -> u16 {
        let next = self.ids.len() as u16;
        *self.ids.entry(name.to_string()).or_insert(next)
    }

    fn sequential_image_idx(&mut self, group_id: u16) -> u32 {
        let idx = self.next_image_idx.entry(group_id).or_insert(0);
        let current = *idx;
        *idx += 1;
        current
    }

    pub fn group_of(&mut self, path: &Path) -> GroupInfo {
        match self.group_by {
            GroupBy::Off => {
                let group_id = self.group_id(DEFAULT_GROUP_NAME);
                GroupInfo {
                    group_name: DEFAULT_GROUP_NAME.to_string(),
                    group_id,
                    image_idx: self.sequential_image_idx(group_id),
                    ..Default::default()
                }
            }
            GroupBy::Directory => {
                let parent = path.parent().map(PathBuf::from).unwrap_or_default();
                let key = parent.to_string_lossy().into_owned();
                let group_id = self.group_id(&key);
                let group_name = parent
                    .file_name()
                    .map_or_else(|| key.clone(), |n| n.to_string_lossy().into_owned());
                GroupInfo {
                    group_name,
                    group_id,
                    image_idx: self.sequential_image_idx(group_id),
                    ..Default::default()
                }
            }
            GroupBy::Filename => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let position = self.filename.as_ref().and_then(|f| f.parse(&stem));
                match position {
                    Some(position) => {
                        let group_name = position.group_name();
                        GroupInfo {
                            group_id: self.group_id(&group_name),
                            group_name,
                            well_pos_x: position.col,
                            well_pos_y: position.row,
                            image_idx: position.img,
                        }
                    }
                    None => {
                        warn!("No well position in '{}', using the default group", path.display());
                        let group_id = self.group_id(DEFAULT_GROUP_NAME);
                        GroupInfo {
                            group_name: DEFAULT_GROUP_NAME.to_string(),
                            group_id,
                            image_idx: self.sequential_image_idx(group_id),
                            ..Default::default()
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DEFAULT_FILENAME_REGEX;

    #[test]
    fn letters_and_digits_map_to_numbers() {
        assert_eq!(string_to_number("A"), 1);
        assert_eq!(string_to_number("c"), 3);
        assert_eq!(string_to_number("12"), 12);
        assert_eq!(string_to_number("A1"), 11);
    }

    #[test]
    fn default_regex_finds_wells() -> anyhow::Result<()> {
        let grouper = FilenameGrouper::new(DEFAULT_FILENAME_REGEX)?;
        let position = grouper.parse("plate1_B03_7").expect("well position");
        assert_eq!(
            position,
            WellPosition {
                row: 2,
                col: 3,
                img: 7
            }
        );
        assert_eq!(position.group_name(), "well_B_3");
        assert!(grouper.parse("no-position").is_none());
        Ok(())
    }

    #[test]
    fn regex_needs_four_groups() {
        assert!(matches!(
            FilenameGrouper::new(r"_(.)([0-9]+)"),
            Err(GroupingError::TooFewGroups { found: 2 })
        ));
        assert!(matches!(FilenameGrouper::new("(unclosed"), Err(GroupingError::InvalidRegex(_))));
    }

    #[test]
    fn group_ids_are_assigned_in_order() -> anyhow::Result<()> {
        let mut grouper = FileGrouper::new(GroupBy::Filename, DEFAULT_FILENAME_REGEX)?;
        let a = grouper.group_of(Path::new("/data/x_A01_1.tif"));
        let b = grouper.group_of(Path::new("/data/x_B02_1.tif"));
        let a2 = grouper.group_of(Path::new("/data/x_A01_2.tif"));
        assert_eq!((a.group_id, b.group_id, a2.group_id), (0, 1, 0));
        assert_eq!(a2.image_idx, 2);
        assert_eq!((b.well_pos_x, b.well_pos_y), (2, 2));
        Ok(())
    }

    #[test]
    fn directory_and_off_modes() -> anyhow::Result<()> {
        let mut by_dir = FileGrouper::new(GroupBy::Directory, "")?;
        let a = by_dir.group_of(Path::new("/data/w1/img.tif"));
        let b = by_dir.group_of(Path::new("/data/w2/img.tif"));
        let c = by_dir.group_of(Path::new("/data/w1/other.tif"));
        assert_eq!(a.group_name, "w1");
        assert_eq!((a.group_id, b.group_id, c.group_id), (0, 1, 0));
        assert_eq!(c.image_idx, 1);

        let mut off = FileGrouper::new(GroupBy::Off, "")?;
        let first = off.group_of(Path::new("/a.tif"));
        let second = off.group_of(Path::new("/b/c.tif"));
        assert_eq!((first.group_id, second.group_id), (0, 0));
        assert_eq!((first.image_idx, second.image_idx), (0, 1));
        Ok(())
    }
}
