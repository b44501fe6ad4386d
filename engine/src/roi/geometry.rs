//! Boundary tracing and shape metrics on binary masks.

use std::f64::consts::{PI, SQRT_2};

use common::buffer2::Buffer2;
use serde::{Deserialize, Serialize};

/// Integer pixel position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis aligned rectangle, `x`/`y` is the top-left pixel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(BoundingBox::new(x, y, right - x, bottom - y))
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    pub fn translated(&self, dx: i32, dy: i32) -> BoundingBox {
        BoundingBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

/// Clockwise neighbour offsets starting east (y axis points down).
const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Outer boundary of the first 8-connected component of `mask` (raster order),
/// as a closed clockwise sequence of boundary pixel positions.
pub fn trace_contour(mask: &Buffer2<bool>) -> Vec<Point> {
    let Some(start_idx) = mask.iter().position(|&v| v) else {
        return Vec::new();
    };
    let start = Point::new(
        (start_idx % mask.width()) as i32,
        (start_idx / mask.width()) as i32,
    );
    let is_set = |p: Point| mask.get_checked(p.x as i64, p.y as i64).copied().unwrap_or(false);

    // Sweep clockwise starting at the background neighbour we entered past.
    let step = |cur: Point, dir: usize| -> Option<(Point, usize)> {
        let first = if dir % 2 == 0 { dir + 6 } else { dir + 5 };
        (0..8).find_map(|k| {
            let d = (first + k) % 8;
            let next = Point::new(cur.x + DIRECTIONS[d].0, cur.y + DIRECTIONS[d].1);
            is_set(next).then_some((next, d))
        })
    };

    let mut contour = vec![start];
    let mut cur = start;
    let mut dir = 0;
    let mut first_dir = None;
    let limit = 4 * mask.len() + 8;
    while let Some((next, next_dir)) = step(cur, dir) {
        match first_dir {
            None => first_dir = Some(next_dir),
            Some(first) if cur == start && next_dir == first => {
                contour.pop();
                break;
            }
            Some(_) => {}
        }
        contour.push(next);
        cur = next;
        dir = next_dir;
        if contour.len() > limit {
            break;
        }
    }
    contour
}

/// Perimeter of a traced boundary, counting straight edges as 1 and
/// non-adjacent corners as `sqrt(2)`.
pub fn traced_perimeter(points: &[Point]) -> f64 {
    let corner = 2.0 - SQRT_2;
    match points.len() {
        0 => return 0.0,
        1 => return 4.0 - 2.0 * corner,
        2 => return 6.0 - 3.0 * corner,
        3 => return 8.0 - 3.0 * corner,
        4 => return 8.0 - 4.0 * corner,
        _ => {}
    }

    let n = points.len();
    // The sweep walks pixel centres, so the outline misses one pixel per axis.
    let mut sum_dx = 2i64;
    let mut sum_dy = 2i64;
    let mut n_corners = 0i64;
    let mut dx1 = (points[0].x - points[n - 1].x) as i64;
    let mut dy1 = (points[0].y - points[n - 1].y) as i64;
    let mut side1 = dx1.abs() + dy1.abs();
    let mut is_corner = false;
    for i in 0..n {
        let next = (i + 1) % n;
        let dx2 = (points[next].x - points[i].x) as i64;
        let dy2 = (points[next].y - points[i].y) as i64;
        sum_dx += dx1.abs();
        sum_dy += dy1.abs();
        let side2 = dx2.abs() + dy2.abs();
        if side1 > 1 || !is_corner {
            is_corner = true;
            n_corners += 1;
        } else {
            is_corner = false;
        }
        dx1 = dx2;
        dy1 = dy2;
        side1 = side2;
    }
    (sum_dx + sum_dy) as f64 - n_corners as f64 * corner
}

/// `4πA / P²`, capped at 1.
pub fn circularity(area: f64, perimeter: f64) -> f64 {
    let dividend = 4.0 * PI * area;
    let divisor = perimeter * perimeter;
    if dividend < divisor {
        dividend / divisor
    } else {
        1.0
    }
}

/// Packs a mask row-major into bits, most significant bit first.
pub fn pack_mask(mask: &Buffer2<bool>) -> Vec<u8> {
    let mut bytes = vec![0u8; mask.len().div_ceil(8)];
    for (i, _) in mask.iter().enumerate().filter(|(_, &v)| v) {
        bytes[i / 8] |= 0x80 >> (i % 8);
    }
    bytes
}

pub fn unpack_mask(bytes: &[u8], width: usize, height: usize) -> Option<Buffer2<bool>> {
    if bytes.len() < (width * height).div_ceil(8) {
        return None;
    }
    Some(Buffer2::from_fn(width, height, |x, y| {
        let i = y * width + x;
        bytes[i / 8] & (0x80 >> (i % 8)) != 0
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Buffer2<bool> {
        let width = rows[0].len();
        Buffer2::from_fn(width, rows.len(), |x, y| rows[y].as_bytes()[x] == b'#')
    }

    #[test]
    fn single_pixel_contour() {
        let mask = mask_from(&["...", ".#.", "..."]);
        assert_eq!(trace_contour(&mask), vec![Point::new(1, 1)]);
    }

    #[test]
    fn square_contour_is_clockwise_ring() {
        let mask = mask_from(&["###", "###", "###"]);
        let contour = trace_contour(&mask);
        assert_eq!(
            contour,
            vec![
                Point::new(0, 0),
                Point::new(1, 0),
                Point::new(2, 0),
                Point::new(2, 1),
                Point::new(2, 2),
                Point::new(1, 2),
                Point::new(0, 2),
                Point::new(0, 1),
            ]
        );
    }

    #[test]
    fn thin_line_revisits_inner_pixels() {
        let mask = mask_from(&["###"]);
        assert_eq!(
            trace_contour(&mask),
            vec![
                Point::new(0, 0),
                Point::new(1, 0),
                Point::new(2, 0),
                Point::new(1, 0)
            ]
        );
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let mask = mask_from(&["#..", ".#.", "..#"]);
        let contour = trace_contour(&mask);
        assert!(contour.contains(&Point::new(2, 2)));
        assert_eq!(contour.len(), 4);
    }

    #[test]
    fn small_perimeters_match_special_cases() {
        let corner = 2.0 - SQRT_2;
        assert!((traced_perimeter(&[Point::new(0, 0)]) - (4.0 - 2.0 * corner)).abs() < 1e-9);
        let square = trace_contour(&mask_from(&["##", "##"]));
        assert_eq!(square.len(), 4);
        assert!((traced_perimeter(&square) - (8.0 - 4.0 * corner)).abs() < 1e-9);
    }

    #[test]
    fn circularity_is_capped() {
        assert_eq!(circularity(100.0, 1.0), 1.0);
        let c = circularity(16.0, 16.0);
        assert!(c > 0.7 && c < 0.8);
    }

    #[test]
    fn box_intersection() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(BoundingBox::new(5, 5, 5, 5)));
        assert!(!a.intersects(&BoundingBox::new(10, 0, 2, 2)));
    }

    #[test]
    fn mask_bits_round_trip() {
        let mask = mask_from(&["#..#", ".##.", "#..."]);
        let packed = pack_mask(&mask);
        assert_eq!(packed.len(), 2);
        assert_eq!(unpack_mask(&packed, 4, 3), Some(mask));
    }
}
