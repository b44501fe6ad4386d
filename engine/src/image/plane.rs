use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of one 2-D slice inside a series.
///
/// Equality is structural; ordering is by `(c, z, t)` so cache dumps and logs
/// group planes by channel first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct PlaneId {
    pub t: u32,
    pub z: u32,
    pub c: u32,
}

impl PlaneId {
    pub const fn new(t: u32, z: u32, c: u32) -> Self {
        Self { t, z, c }
    }

    pub const fn with_c(self, c: u32) -> Self {
        Self { c, ..self }
    }

    pub const fn with_z(self, z: u32) -> Self {
        Self { z, ..self }
    }
}

impl Ord for PlaneId {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.c, self.z, self.t).cmp(&(other.c, other.z, other.t))
    }
}

impl PartialOrd for PlaneId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}z{}t{}", self.c, self.z, self.t)
    }
}

/// Plane reference in step settings. Negative `z` / `t` mean "the plane of the
/// current iteration".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneRef {
    pub c_stack: i32,
    #[serde(default = "current")]
    pub z_stack: i32,
    #[serde(default = "current")]
    pub t_stack: i32,
}

fn current() -> i32 {
    -1
}

impl PlaneRef {
    pub const fn channel(c_stack: i32) -> Self {
        Self {
            c_stack,
            z_stack: -1,
            t_stack: -1,
        }
    }

    /// Concrete plane for the iteration at `current`. A negative channel keeps the current channel.
    pub fn resolve(&self, current: PlaneId) -> PlaneId {
        let pick = |v: i32, fallback: u32| if v < 0 { fallback } else { v as u32 };
        PlaneId {
            t: pick(self.t_stack, current.t),
            z: pick(self.z_stack, current.z),
            c: pick(self.c_stack, current.c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_channel_major() {
        let mut planes = vec![
            PlaneId::new(1, 0, 0),
            PlaneId::new(0, 0, 1),
            PlaneId::new(0, 1, 0),
            PlaneId::new(0, 0, 0),
        ];
        planes.sort();
        assert_eq!(
            planes,
            vec![
                PlaneId::new(0, 0, 0),
                PlaneId::new(1, 0, 0),
                PlaneId::new(0, 1, 0),
                PlaneId::new(0, 0, 1),
            ]
        );
    }

    #[test]
    fn plane_ref_uses_current_for_negative_axes() {
        let current = PlaneId::new(3, 2, 0);
        assert_eq!(PlaneRef::channel(1).resolve(current), PlaneId::new(3, 2, 1));
        let fixed = PlaneRef {
            c_stack: 2,
            z_stack: 0,
            t_stack: -1,
        };
        assert_eq!(fixed.resolve(current), PlaneId::new(3, 0, 2));
    }
}
