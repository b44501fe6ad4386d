//! Background subtraction with a rolling ball or a sliding paraboloid.
//!
//! The rolling ball follows ImageJ's `BackgroundSubtracter`: the image is
//! pre-smoothed with a 3x3 mean, shrunk by taking block minima, the ball is
//! rolled under the shrunk surface and the result is interpolated back to
//! full size. The background never exceeds the original image, so the
//! subtraction saturates at zero only for noise.
//!
//! The paraboloid is a grey-scale opening with the separable structuring
//! function `(dx² + dy²) / (2r)`, computed with lower envelopes of parabolas
//! in linear time per line.

use serde::{Deserialize, Serialize};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::image::Image;
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BallType {
    #[default]
    Ball,
    Paraboloid,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollingBall {
    pub ball_type: BallType,
    /// Radius in pixels.
    pub ball_size: u32,
}

impl Default for RollingBall {
    fn default() -> Self {
        Self {
            ball_type: BallType::Ball,
            ball_size: 50,
        }
    }
}

impl RollingBall {
    pub fn background(&self, image: &Image) -> Vec<f32> {
        let (w, h) = (image.width(), image.height());
        let pixels: Vec<f32> = image.pixels().iter().map(|&v| v as f32).collect();
        let radius = self.ball_size.max(1) as f32;
        let mut background = match self.ball_type {
            BallType::Ball => rolling_ball_background(&pixels, w, h, radius),
            BallType::Paraboloid => paraboloid_background(&pixels, w, h, radius),
        };
        for (bg, &orig) in background.iter_mut().zip(&pixels) {
            *bg = bg.min(orig);
        }
        background
    }

    pub fn apply(&self, image: &mut Image) {
        if image.width() == 0 || image.height() == 0 {
            return;
        }
        let background = self.background(image);
        for (v, bg) in image.buffer_mut().iter_mut().zip(background) {
            *v = (*v as f32 - bg).round().clamp(0.0, u16::MAX as f32) as u16;
        }
    }
}

impl PipelineCommand for RollingBall {
    fn execute(
        &self,
        _ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        self.apply(image);
        Ok(())
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.ball_size == 0 {
            log.warning(pipeline, "$rollingBall: ball size 0 is treated as 1");
        }
    }
}

// === Rolling ball ===

struct Ball {
    shrink_factor: usize,
    width: usize,
    z: Vec<f32>,
}

impl Ball {
    fn new(radius: f32) -> Self {
        let (shrink_factor, arc_trim_per) = if radius <= 10.0 {
            (1, 24.0)
        } else if radius <= 30.0 {
            (2, 24.0)
        } else if radius <= 100.0 {
            (4, 32.0)
        } else {
            (8, 40.0)
        };
        let small_radius = (radius / shrink_factor as f32).max(1.0);
        let r_square = small_radius * small_radius;
        let x_trim = ((arc_trim_per * small_radius) as i32 / 100) as f32;
        let half_width = (small_radius - x_trim).round() as i32;
        let width = (2 * half_width + 1) as usize;
        let mut z = Vec::with_capacity(width * width);
        for y in 0..width as i32 {
            for x in 0..width as i32 {
                let (dx, dy) = (x - half_width, y - half_width);
                let t = r_square - (dx * dx + dy * dy) as f32;
                z.push(if t > 0.0 { t.sqrt() } else { 0.0 });
            }
        }
        Self {
            shrink_factor,
            width,
            z,
        }
    }
}

fn mean_3x3(pixels: &[f32], w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![0.0; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            let mut n = 0.0;
            for yy in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for xx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    sum += pixels[yy * w + xx];
                    n += 1.0;
                }
            }
            out[y * w + x] = sum / n;
        }
    }
    out
}

fn shrink(pixels: &[f32], w: usize, h: usize, factor: usize) -> (Vec<f32>, usize, usize) {
    let sw = w.div_ceil(factor);
    let sh = h.div_ceil(factor);
    let mut out = vec![f32::MAX; sw * sh];
    for y in 0..h {
        for x in 0..w {
            let s = &mut out[(y / factor) * sw + x / factor];
            *s = s.min(pixels[y * w + x]);
        }
    }
    (out, sw, sh)
}

/// Raises every pixel to the highest ball surface that stays below the data.
fn roll_ball(ball: &Ball, pixels: &mut [f32], w: usize, h: usize) {
    let bw = ball.width as isize;
    let radius = bw / 2;
    let (wi, hi) = (w as isize, h as isize);
    let mut cache = vec![0.0f32; w * ball.width];

    for y in -radius..hi + radius {
        let next_line = y + radius;
        if (0..hi).contains(&next_line) {
            let cache_line = (next_line % bw) as usize;
            let src = next_line as usize * w;
            cache[cache_line * w..(cache_line + 1) * w].copy_from_slice(&pixels[src..src + w]);
            pixels[src..src + w].fill(f32::MIN);
        }
        let y0 = (y - radius).max(0);
        let y_ball0 = y0 - y + radius;
        let y_end = (y + radius).min(hi - 1);

        for x in -radius..wi + radius {
            let x0 = (x - radius).max(0);
            let x_ball0 = x0 - x + radius;
            let x_end = (x + radius).min(wi - 1);
            if x0 > x_end || y0 > y_end {
                continue;
            }

            let mut z = f32::MAX;
            for (yp, y_ball) in (y0..=y_end).zip(y_ball0..) {
                let cache_row = ((yp % bw) as usize) * w;
                for (xp, x_ball) in (x0..=x_end).zip(x_ball0..) {
                    let reduced =
                        cache[cache_row + xp as usize] - ball.z[(y_ball * bw + x_ball) as usize];
                    z = z.min(reduced);
                }
            }
            for (yp, y_ball) in (y0..=y_end).zip(y_ball0..) {
                let row = yp as usize * w;
                for (xp, x_ball) in (x0..=x_end).zip(x_ball0..) {
                    let added = z + ball.z[(y_ball * bw + x_ball) as usize];
                    let p = &mut pixels[row + xp as usize];
                    if added > *p {
                        *p = added;
                    }
                }
            }
        }
    }
}

/// Bilinear interpolation between the centres of the shrink blocks.
fn enlarge(small: &[f32], sw: usize, sh: usize, w: usize, h: usize, factor: usize) -> Vec<f32> {
    let coord = |v: usize, len: usize| -> (usize, usize, f32) {
        let pos = (v as f32 + 0.5) / factor as f32 - 0.5;
        let pos = pos.clamp(0.0, (len - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(len - 1);
        (lo, hi, pos - lo as f32)
    };
    let mut out = vec![0.0; w * h];
    for y in 0..h {
        let (y_lo, y_hi, fy) = coord(y, sh);
        for x in 0..w {
            let (x_lo, x_hi, fx) = coord(x, sw);
            let top = small[y_lo * sw + x_lo] * (1.0 - fx) + small[y_lo * sw + x_hi] * fx;
            let bottom = small[y_hi * sw + x_lo] * (1.0 - fx) + small[y_hi * sw + x_hi] * fx;
            out[y * w + x] = top * (1.0 - fy) + bottom * fy;
        }
    }
    out
}

fn rolling_ball_background(pixels: &[f32], w: usize, h: usize, radius: f32) -> Vec<f32> {
    let ball = Ball::new(radius);
    let smoothed = mean_3x3(pixels, w, h);
    if ball.shrink_factor == 1 {
        let mut bg = smoothed;
        roll_ball(&ball, &mut bg, w, h);
        return bg;
    }
    let (mut small, sw, sh) = shrink(&smoothed, w, h, ball.shrink_factor);
    roll_ball(&ball, &mut small, sw, sh);
    enlarge(&small, sw, sh, w, h, ball.shrink_factor)
}

// === Sliding paraboloid ===

/// `out[i] = min_j f[j] + k (i - j)²` via the lower envelope of parabolas.
fn parabolic_erode_line(f: &[f32], k: f32, out: &mut [f32]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let mut vertices = vec![0usize; n];
    let mut bounds = vec![0f32; n + 1];
    let mut top = 0;
    bounds[0] = f32::NEG_INFINITY;
    bounds[1] = f32::INFINITY;
    for q in 1..n {
        let qf = q as f32;
        let mut s;
        loop {
            let v = vertices[top];
            let vf = v as f32;
            s = ((f[q] + k * qf * qf) - (f[v] + k * vf * vf)) / (2.0 * k * (qf - vf));
            if s <= bounds[top] && top > 0 {
                top -= 1;
            } else {
                break;
            }
        }
        top += 1;
        vertices[top] = q;
        bounds[top] = s;
        bounds[top + 1] = f32::INFINITY;
    }
    let mut j = 0;
    for (i, o) in out.iter_mut().enumerate() {
        let x = i as f32;
        while bounds[j + 1] < x {
            j += 1;
        }
        let v = vertices[j] as f32;
        *o = f[vertices[j]] + k * (x - v) * (x - v);
    }
}

fn parabolic_pass(data: &mut [f32], w: usize, h: usize, k: f32, dilate: bool) {
    let sign = if dilate { -1.0 } else { 1.0 };
    let mut line = Vec::new();
    let mut out = Vec::new();

    for y in 0..h {
        line.clear();
        line.extend(data[y * w..(y + 1) * w].iter().map(|&v| sign * v));
        out.resize(w, 0.0);
        parabolic_erode_line(&line, k, &mut out);
        for (d, &o) in data[y * w..(y + 1) * w].iter_mut().zip(&out) {
            *d = sign * o;
        }
    }
    for x in 0..w {
        line.clear();
        line.extend((0..h).map(|y| sign * data[y * w + x]));
        out.resize(h, 0.0);
        parabolic_erode_line(&line, k, &mut out);
        for (y, &o) in out.iter().enumerate() {
            data[y * w + x] = sign * o;
        }
    }
}

fn paraboloid_background(pixels: &[f32], w: usize, h: usize, radius: f32) -> Vec<f32> {
    let k = 0.5 / radius;
    let mut bg = mean_3x3(pixels, w, h);
    parabolic_pass(&mut bg, w, h, k, false);
    parabolic_pass(&mut bg, w, h, k, true);
    bg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PlaneId;

    #[test]
    fn uniform_image_becomes_zero() {
        for ball_type in [BallType::Ball, BallType::Paraboloid] {
            for ball_size in [3, 20, 50] {
                let mut image = Image::new_filled(40, 30, 1200, PlaneId::default());
                RollingBall { ball_type, ball_size }.apply(&mut image);
                assert!(
                    image.pixels().iter().all(|&v| v <= 1),
                    "{ball_type:?} r={ball_size}"
                );
            }
        }
    }

    #[test]
    fn small_spot_survives_on_flat_background() {
        for ball_type in [BallType::Ball, BallType::Paraboloid] {
            let mut image = Image::new_filled(40, 40, 500, PlaneId::default());
            for y in 19..22 {
                for x in 19..22 {
                    image.set(x, y, 3000);
                }
            }
            RollingBall {
                ball_type,
                ball_size: 10,
            }
            .apply(&mut image);
            assert!(image.get(20, 20) > 1500, "{ball_type:?}");
            assert!(image.get(2, 2) <= 1, "{ball_type:?}");
        }
    }

    #[test]
    fn erosion_of_a_step() {
        let f = [0.0, 0.0, 10.0, 10.0];
        let mut out = [0.0; 4];
        parabolic_erode_line(&f, 1.0, &mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 4.0]);
    }

    #[test]
    fn ball_size_follows_shrink_table() {
        assert_eq!(Ball::new(5.0).shrink_factor, 1);
        assert_eq!(Ball::new(50.0).shrink_factor, 4);
        assert_eq!(Ball::new(200.0).shrink_factor, 8);
        let ball = Ball::new(5.0);
        assert_eq!(ball.z.len(), ball.width * ball.width);
    }
}
