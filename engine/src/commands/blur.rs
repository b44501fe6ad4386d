use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::image::Image;
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

const ROWS_PER_CHUNK: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlurMode {
    /// Normalised box filter.
    #[default]
    Blur,
    Gaussian,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Blur {
    pub mode: BlurMode,
    /// Odd kernel edge length.
    pub kernel_size: u32,
    pub repeat: u32,
}

impl Default for Blur {
    fn default() -> Self {
        Self {
            mode: BlurMode::Blur,
            kernel_size: 3,
            repeat: 1,
        }
    }
}

impl Blur {
    fn kernel(&self) -> Vec<f32> {
        let size = self.kernel_size.max(1) as usize | 1;
        match self.mode {
            BlurMode::Blur => vec![1.0 / size as f32; size],
            BlurMode::Gaussian => gaussian_kernel(size),
        }
    }

    pub fn apply(&self, image: &mut Image) {
        let kernel = self.kernel();
        if kernel.len() == 1 {
            return;
        }
        let (w, h) = (image.width(), image.height());
        let mut data: Vec<f32> = image.pixels().iter().map(|&v| v as f32).collect();
        let mut temp = vec![0.0f32; w * h];
        for _ in 0..self.repeat {
            convolve_rows(&data, &mut temp, w, &kernel);
            convolve_cols(&temp, &mut data, w, h, &kernel);
        }
        for (dst, &v) in image.buffer_mut().iter_mut().zip(&data) {
            *dst = v.round().clamp(0.0, u16::MAX as f32) as u16;
        }
    }
}

impl PipelineCommand for Blur {
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
        if self.kernel_size % 2 == 0 {
            log.warning(
                pipeline,
                format!(
                    "$blur: kernel size {} is even, using {}",
                    self.kernel_size,
                    self.kernel_size | 1
                ),
            );
        }
    }
}

/// Sampled gaussian with the sigma OpenCV derives from the kernel size.
fn gaussian_kernel(size: usize) -> Vec<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (size / 2) as f32;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - radius;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Mirrors `i` into `0..len` without repeating the edge pixel.
#[inline]
fn reflect_101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = i;
    while i < 0 || i > last {
        i = if i < 0 { -i } else { 2 * last - i };
    }
    i as usize
}

fn convolve_rows(input: &[f32], output: &mut [f32], width: usize, kernel: &[f32]) {
    let radius = (kernel.len() / 2) as isize;
    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let y = chunk_idx * ROWS_PER_CHUNK + local_y;
                let in_row = &input[y * width..(y + 1) * width];
                for (x, out) in out_row.iter_mut().enumerate() {
                    *out = kernel
                        .iter()
                        .enumerate()
                        .map(|(k, &weight)| {
                            weight * in_row[reflect_101(x as isize + k as isize - radius, width)]
                        })
                        .sum();
                }
            }
        });
}

fn convolve_cols(input: &[f32], output: &mut [f32], width: usize, height: usize, kernel: &[f32]) {
    let radius = (kernel.len() / 2) as isize;
    output
        .par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, out_chunk)| {
            for (local_y, out_row) in out_chunk.chunks_mut(width).enumerate() {
                let y = (chunk_idx * ROWS_PER_CHUNK + local_y) as isize;
                out_row.fill(0.0);
                for (k, &weight) in kernel.iter().enumerate() {
                    let src_y = reflect_101(y + k as isize - radius, height);
                    let in_row = &input[src_y * width..(src_y + 1) * width];
                    for (out, &v) in out_row.iter_mut().zip(in_row) {
                        *out += weight * v;
                    }
                }
            }
        });
}
