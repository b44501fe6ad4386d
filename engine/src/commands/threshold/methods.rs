//! Global histogram thresholds on 256 bins, after ImageJ's `AutoThresholder`.
//!
//! Every function returns the last bin of the background. `-1` means the
//! method found no threshold and is clamped by the caller.

use tracing::warn;

pub(super) type Histogram = [u64; 256];

const DBL_EPSILON: f64 = 2.220446049250313e-16;
const MAX_SMOOTHING_ITERATIONS: usize = 10_000;

fn to_f64(data: &Histogram) -> [f64; 256] {
    data.map(|v| v as f64)
}

fn total(data: &Histogram) -> f64 {
    data.iter().map(|&v| v as f64).sum()
}

fn normalized(data: &Histogram) -> [f64; 256] {
    let total = total(data);
    data.map(|v| v as f64 / total)
}

/// Cumulative normalized histogram `P1` and its complement `P2`.
fn cumulative(norm: &[f64; 256]) -> ([f64; 256], [f64; 256]) {
    let mut p1 = [0.0; 256];
    let mut p2 = [0.0; 256];
    p1[0] = norm[0];
    p2[0] = 1.0 - p1[0];
    for i in 1..256 {
        p1[i] = p1[i - 1] + norm[i];
        p2[i] = 1.0 - p1[i];
    }
    (p1, p2)
}

/// First and last bin where the cumulative sums are not degenerate.
fn entropy_bins(p1: &[f64; 256], p2: &[f64; 256]) -> (usize, usize) {
    let first = (0..256).find(|&i| p1[i].abs() >= DBL_EPSILON).unwrap_or(0);
    let last = (first..256).rev().find(|&i| p2[i].abs() >= DBL_EPSILON).unwrap_or(255);
    (first, last)
}

pub(super) fn huang(data: &Histogram) -> i32 {
    let Some(first) = data.iter().position(|&v| v != 0) else {
        return 0;
    };
    let last = data.iter().rposition(|&v| v != 0).unwrap_or(255);
    if first == last {
        return first as i32;
    }
    let term = 1.0 / (last - first) as f64;

    let mut mu_0 = [0.0; 256];
    let (mut sum_pix, mut num_pix) = (0.0, 0.0);
    for ih in first..256 {
        sum_pix += ih as f64 * data[ih] as f64;
        num_pix += data[ih] as f64;
        mu_0[ih] = sum_pix / num_pix;
    }
    let mut mu_1 = [0.0; 256];
    let (mut sum_pix, mut num_pix) = (0.0, 0.0);
    for ih in (1..=last).rev() {
        sum_pix += ih as f64 * data[ih] as f64;
        num_pix += data[ih] as f64;
        mu_1[ih - 1] = sum_pix / num_pix;
    }

    let fuzzy = |ih: usize, mu: f64| -> f64 {
        let mu_x = 1.0 / (1.0 + term * (ih as f64 - mu).abs());
        if !(1e-6..=0.999999).contains(&mu_x) {
            return 0.0;
        }
        data[ih] as f64 * (-mu_x * mu_x.ln() - (1.0 - mu_x) * (1.0 - mu_x).ln())
    };

    let mut threshold = -1;
    let mut min_ent = f64::MAX;
    for it in 0..256 {
        let ent: f64 = (0..=it).map(|ih| fuzzy(ih, mu_0[it])).sum::<f64>()
            + (it + 1..256).map(|ih| fuzzy(ih, mu_1[it])).sum::<f64>();
        if ent < min_ent {
            min_ent = ent;
            threshold = it as i32;
        }
    }
    threshold
}

fn is_bimodal(y: &[f64; 256]) -> bool {
    let mut modes = 0;
    for k in 1..255 {
        if y[k - 1] < y[k] && y[k + 1] < y[k] {
            modes += 1;
            if modes > 2 {
                return false;
            }
        }
    }
    modes == 2
}

pub(super) fn intermodes(data: &Histogram) -> i32 {
    let mut histo = to_f64(data);
    let mut iter = 0;
    while !is_bimodal(&histo) {
        let (mut current, mut next) = (0.0, histo[0]);
        for i in 0..255 {
            let previous = current;
            current = next;
            next = histo[i + 1];
            histo[i] = (previous + current + next) / 3.0;
        }
        histo[255] = (current + next) / 3.0;
        iter += 1;
        if iter > MAX_SMOOTHING_ITERATIONS {
            warn!("Intermodes threshold not found after {MAX_SMOOTHING_ITERATIONS} iterations");
            return -1;
        }
    }
    let tt: usize = (1..255)
        .filter(|&i| histo[i - 1] < histo[i] && histo[i + 1] < histo[i])
        .sum();
    (tt as f64 / 2.0).floor() as i32
}

pub(super) fn iso_data(data: &Histogram) -> i32 {
    let Some(first) = (1..256).find(|&i| data[i] > 0) else {
        return 0;
    };
    let mut g = first + 1;
    loop {
        let (mut l, mut totl) = (0u64, 0u64);
        for i in 0..(g + 1).min(256) {
            totl += data[i];
            l += data[i] * i as u64;
        }
        let (mut h, mut toth) = (0u64, 0u64);
        for i in (g + 1).min(256)..256 {
            toth += data[i];
            h += data[i] * i as u64;
        }
        if totl > 0 && toth > 0 {
            let (l, h) = (l / totl, h / toth);
            if g as f64 == ((l + h) as f64 / 2.0).round() {
                return g as i32;
            }
        }
        g += 1;
        if g > 254 {
            return -1;
        }
    }
}

pub(super) fn li(data: &Histogram) -> i32 {
    const TOLERANCE: f64 = 0.5;
    let num_pixels = total(data);
    let mean = (1..256).map(|ih| ih as f64 * data[ih] as f64).sum::<f64>() / num_pixels;

    let mut new_thresh = mean;
    let mut threshold;
    loop {
        let old_thresh = new_thresh;
        threshold = (old_thresh + 0.5) as i32;
        let split = (threshold.clamp(-1, 255) + 1) as usize;

        let (sum_back, num_back) = (0..split).fold((0.0, 0.0), |(s, n), ih| {
            (s + ih as f64 * data[ih] as f64, n + data[ih] as f64)
        });
        let mean_back = if num_back == 0.0 { 0.0 } else { sum_back / num_back };

        let (sum_obj, num_obj) = (split..256).fold((0.0, 0.0), |(s, n), ih| {
            (s + ih as f64 * data[ih] as f64, n + data[ih] as f64)
        });
        let mean_obj = if num_obj == 0.0 { 0.0 } else { sum_obj / num_obj };

        let temp = (mean_back - mean_obj) / (mean_back.ln() - mean_obj.ln());
        new_thresh = if temp < -DBL_EPSILON {
            (temp - 0.5) as i32 as f64
        } else {
            (temp + 0.5) as i32 as f64
        };
        if (new_thresh - old_thresh).abs() <= TOLERANCE || new_thresh.is_nan() {
            break;
        }
    }
    threshold
}

/// Kapur, Sahoo and Wong maximum entropy.
pub(super) fn max_entropy(data: &Histogram) -> i32 {
    let norm = normalized(data);
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bins(&p1, &p2);
    kapur(data, &norm, &p1, &p2, first, last)
}

fn kapur(
    data: &Histogram,
    norm: &[f64; 256],
    p1: &[f64; 256],
    p2: &[f64; 256],
    first: usize,
    last: usize,
) -> i32 {
    let mut threshold = 0;
    let mut max_ent = 0.0;
    for it in first..=last {
        let ent_back: f64 = (0..=it)
            .filter(|&ih| data[ih] != 0)
            .map(|ih| {
                let p = norm[ih] / p1[it];
                -p * p.ln()
            })
            .sum();
        let ent_obj: f64 = (it + 1..256)
            .filter(|&ih| data[ih] != 0)
            .map(|ih| {
                let p = norm[ih] / p2[it];
                -p * p.ln()
            })
            .sum();
        let tot_ent = ent_back + ent_obj;
        if max_ent < tot_ent {
            max_ent = tot_ent;
            threshold = it as i32;
        }
    }
    threshold
}

pub(super) fn mean(data: &Histogram) -> i32 {
    let (tot, sum) = data
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(t, s), (i, &v)| (t + v as f64, s + i as f64 * v as f64));
    (sum / tot).floor() as i32
}

/// Kittler and Illingworth minimum error, iterated from the mean.
pub(super) fn min_error(data: &Histogram) -> i32 {
    let a = |j: i32| -> f64 { (0..=j.clamp(-1, 255)).map(|i| data[i as usize] as f64).sum() };
    let b = |j: i32| -> f64 {
        (0..=j.clamp(-1, 255))
            .map(|i| i as f64 * data[i as usize] as f64)
            .sum()
    };
    let c = |j: i32| -> f64 {
        (0..=j.clamp(-1, 255))
            .map(|i| (i as f64) * (i as f64) * data[i as usize] as f64)
            .sum()
    };

    let mut threshold = mean(data);
    let mut previous = -2;
    let (a_all, b_all, c_all) = (a(255), b(255), c(255));
    let mut iterations = 0;
    while threshold != previous {
        let (a_t, b_t, c_t) = (a(threshold), b(threshold), c(threshold));
        let mu = b_t / a_t;
        let nu = (b_all - b_t) / (a_all - a_t);
        let p = a_t / a_all;
        let q = (a_all - a_t) / a_all;
        let sigma2 = c_t / a_t - mu * mu;
        let tau2 = (c_all - c_t) / (a_all - a_t) - nu * nu;

        let w0 = 1.0 / sigma2 - 1.0 / tau2;
        let w1 = mu / sigma2 - nu / tau2;
        let w2 = (mu * mu) / sigma2 - (nu * nu) / tau2 + ((sigma2 * q * q) / (tau2 * p * p)).ln();

        let sqterm = w1 * w1 - w0 * w2;
        if sqterm < 0.0 {
            warn!("MinError threshold is not converging");
            break;
        }
        previous = threshold;
        let temp = (w1 + sqterm.sqrt()) / w0;
        if !temp.is_nan() {
            threshold = temp.floor().clamp(-1.0, 255.0) as i32;
        }
        iterations += 1;
        if iterations > MAX_SMOOTHING_ITERATIONS {
            break;
        }
    }
    threshold
}

pub(super) fn minimum(data: &Histogram) -> i32 {
    let max = data.iter().rposition(|&v| v > 0).unwrap_or(0);
    let mut histo = to_f64(data);
    let mut iter = 0;
    while !is_bimodal(&histo) {
        let mut smoothed = [0.0; 256];
        for i in 1..255 {
            smoothed[i] = (histo[i - 1] + histo[i] + histo[i + 1]) / 3.0;
        }
        smoothed[0] = (histo[0] + histo[1]) / 3.0;
        smoothed[255] = (histo[254] + histo[255]) / 3.0;
        histo = smoothed;
        iter += 1;
        if iter > MAX_SMOOTHING_ITERATIONS {
            warn!("Minimum threshold not found after {MAX_SMOOTHING_ITERATIONS} iterations");
            return -1;
        }
    }
    (1..max)
        .find(|&i| histo[i - 1] > histo[i] && histo[i + 1] >= histo[i])
        .map_or(-1, |i| i as i32)
}

/// Tsai's moment preserving threshold.
pub(super) fn moments(data: &Histogram) -> i32 {
    let histo = normalized(data);
    let m0 = 1.0;
    let (mut m1, mut m2, mut m3) = (0.0, 0.0, 0.0);
    for (i, &h) in histo.iter().enumerate() {
        let di = i as f64;
        m1 += di * h;
        m2 += di * di * h;
        m3 += di * di * di * h;
    }
    let cd = m0 * m2 - m1 * m1;
    let c0 = (-m2 * m2 + m1 * m3) / cd;
    let c1 = (m0 * -m3 + m2 * m1) / cd;
    let z0 = 0.5 * (-c1 - (c1 * c1 - 4.0 * c0).sqrt());
    let z1 = 0.5 * (-c1 + (c1 * c1 - 4.0 * c0).sqrt());
    let p0 = (z1 - m1) / (z1 - z0);

    let mut sum = 0.0;
    for (i, &h) in histo.iter().enumerate() {
        sum += h;
        if sum > p0 {
            return i as i32;
        }
    }
    -1
}

pub(super) fn otsu(data: &Histogram) -> i32 {
    let (n, s) = data
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(n, s), (k, &v)| (n + v as f64, s + k as f64 * v as f64));
    let mut sk = 0.0;
    let mut n1 = data[0] as f64;
    let mut bcv_max = 0.0;
    let mut k_star = 0;
    for k in 1..255 {
        sk += k as f64 * data[k] as f64;
        n1 += data[k] as f64;
        let denom = n1 * (n - n1);
        let bcv = if denom != 0.0 {
            let num = (n1 / n) * s - sk;
            num * num / denom
        } else {
            0.0
        };
        if bcv >= bcv_max {
            bcv_max = bcv;
            k_star = k as i32;
        }
    }
    k_star
}

pub(super) fn percentile(data: &Histogram) -> i32 {
    const PTILE: f64 = 0.5;
    let total = total(data);
    let mut threshold = -1;
    let mut best = 1.0;
    let mut partial = 0.0;
    for (i, &v) in data.iter().enumerate() {
        partial += v as f64;
        let distance = (partial / total - PTILE).abs();
        if distance < best {
            best = distance;
            threshold = i as i32;
        }
    }
    threshold
}

pub(super) fn renyi_entropy(data: &Histogram) -> i32 {
    let norm = normalized(data);
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bins(&p1, &p2);

    let renyi = |alpha: f64| -> usize {
        let term = 1.0 / (1.0 - alpha);
        let mut threshold = 0;
        let mut max_ent = 0.0;
        for it in first..=last {
            let (ent_back, ent_obj): (f64, f64) = if alpha == 0.5 {
                (
                    (0..=it).map(|ih| (norm[ih] / p1[it]).sqrt()).sum(),
                    (it + 1..256).map(|ih| (norm[ih] / p2[it]).sqrt()).sum(),
                )
            } else {
                (
                    (0..=it).map(|ih| norm[ih] * norm[ih] / (p1[it] * p1[it])).sum(),
                    (it + 1..256).map(|ih| norm[ih] * norm[ih] / (p2[it] * p2[it])).sum(),
                )
            };
            let product = ent_back * ent_obj;
            let tot_ent = term * if product > 0.0 { product.ln() } else { 0.0 };
            if tot_ent > max_ent {
                max_ent = tot_ent;
                threshold = it;
            }
        }
        threshold
    };

    let mut stars = [
        renyi(0.5),
        kapur(data, &norm, &p1, &p2, first, last).max(0) as usize,
        renyi(2.0),
    ];
    stars.sort_unstable();
    let [t1, t2, t3] = stars;

    let close = |a: usize, b: usize| a.abs_diff(b) <= 5;
    let (beta1, beta2, beta3) = match (close(t1, t2), close(t2, t3)) {
        (true, true) => (1.0, 2.0, 1.0),
        (true, false) => (0.0, 1.0, 3.0),
        (false, true) => (3.0, 1.0, 0.0),
        (false, false) => (1.0, 2.0, 1.0),
    };
    let omega = p1[t3] - p1[t1];
    (t1 as f64 * (p1[t1] + 0.25 * omega * beta1)
        + 0.25 * t2 as f64 * omega * beta2
        + t3 as f64 * (p2[t3] + 0.25 * omega * beta3)) as i32
}

pub(super) fn shanbhag(data: &Histogram) -> i32 {
    let norm = normalized(data);
    let (p1, p2) = cumulative(&norm);
    let (first, last) = entropy_bins(&p1, &p2);

    let mut threshold = -1;
    let mut min_ent = f64::MAX;
    for it in first..=last {
        let term = 0.5 / p1[it];
        let ent_back = term
            * -(1..=it)
                .map(|ih| norm[ih] * (1.0 - term * p1[ih - 1]).ln())
                .sum::<f64>();
        let term = 0.5 / p2[it];
        let ent_obj = term
            * -(it + 1..256)
                .map(|ih| norm[ih] * (1.0 - term * p2[ih]).ln())
                .sum::<f64>();
        let tot_ent = (ent_back - ent_obj).abs();
        if tot_ent < min_ent {
            min_ent = tot_ent;
            threshold = it as i32;
        }
    }
    threshold
}

/// Zack's triangle, using the longer tail of the histogram.
pub(super) fn triangle(data: &Histogram) -> i32 {
    let mut histo = to_f64(data);

    let mut min = histo.iter().position(|&v| v > 0.0).unwrap_or(0);
    if min > 0 {
        min -= 1;
    }
    let mut min2 = (1..256).rev().find(|&i| histo[i] > 0.0).unwrap_or(0);
    if min2 < 255 {
        min2 += 1;
    }
    let mut max = 0;
    let mut dmax = 0.0;
    for (i, &v) in histo.iter().enumerate() {
        if v > dmax {
            max = i;
            dmax = v;
        }
    }

    let inverted = (max as i32 - min as i32) < (min2 as i32 - max as i32);
    if inverted {
        histo.reverse();
        min = 255 - min2;
        max = 255 - max;
    }
    if min == max {
        return min as i32;
    }

    let mut nx = histo[max];
    let mut ny = min as f64 - max as f64;
    let d = (nx * nx + ny * ny).sqrt();
    nx /= d;
    ny /= d;
    let d = nx * min as f64 + ny * histo[min];

    let mut split = min as i32;
    let mut split_distance = 0.0;
    for i in min + 1..=max {
        let distance = nx * i as f64 + ny * histo[i] - d;
        if distance > split_distance {
            split = i as i32;
            split_distance = distance;
        }
    }
    split -= 1;

    if inverted {
        255 - split
    } else {
        split
    }
}

pub(super) fn yen(data: &Histogram) -> i32 {
    let norm = normalized(data);
    let mut p1 = [0.0; 256];
    let mut p1_sq = [0.0; 256];
    let mut p2_sq = [0.0; 256];
    p1[0] = norm[0];
    p1_sq[0] = norm[0] * norm[0];
    for i in 1..256 {
        p1[i] = p1[i - 1] + norm[i];
        p1_sq[i] = p1_sq[i - 1] + norm[i] * norm[i];
    }
    for i in (0..255).rev() {
        p2_sq[i] = p2_sq[i + 1] + norm[i + 1] * norm[i + 1];
    }

    let log_or_zero = |v: f64| if v > 0.0 { v.ln() } else { 0.0 };
    let mut threshold = -1;
    let mut max_crit = f64::MIN_POSITIVE;
    for it in 0..256 {
        let crit = -log_or_zero(p1_sq[it] * p2_sq[it]) + 2.0 * log_or_zero(p1[it] * (1.0 - p1[it]));
        if crit > max_crit {
            max_crit = crit;
            threshold = it as i32;
        }
    }
    threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two gaussian-ish peaks at 60 and 190.
    fn bimodal() -> Histogram {
        let mut data = [0u64; 256];
        for (i, v) in data.iter_mut().enumerate() {
            let a = (-((i as f64 - 60.0).powi(2)) / 200.0).exp() * 1000.0;
            let b = (-((i as f64 - 190.0).powi(2)) / 200.0).exp() * 600.0;
            *v = (a + b).round() as u64;
        }
        data
    }

    #[test]
    fn bimodal_methods_split_between_the_peaks() {
        let data = bimodal();
        let methods: [(&str, fn(&Histogram) -> i32); 12] = [
            ("huang", huang),
            ("intermodes", intermodes),
            ("iso_data", iso_data),
            ("li", li),
            ("max_entropy", max_entropy),
            ("mean", mean),
            ("minimum", minimum),
            ("moments", moments),
            ("otsu", otsu),
            ("renyi_entropy", renyi_entropy),
            ("shanbhag", shanbhag),
            ("yen", yen),
        ];
        for (name, method) in methods {
            let t = method(&data);
            assert!((60..190).contains(&t), "{name} returned {t}");
        }
    }

    #[test]
    fn otsu_on_two_spikes() {
        let mut data = [0u64; 256];
        data[10] = 100;
        data[200] = 100;
        let t = otsu(&data);
        assert!((10..200).contains(&t));
    }

    #[test]
    fn mean_of_uniform_spike() {
        let mut data = [0u64; 256];
        data[100] = 5;
        assert_eq!(mean(&data), 100);
    }

    #[test]
    fn percentile_splits_half() {
        let mut data = [0u64; 256];
        data[20] = 50;
        data[220] = 50;
        assert_eq!(percentile(&data), 20);
    }

    #[test]
    fn triangle_uses_the_long_tail() {
        let mut data = [0u64; 256];
        data[10] = 1000;
        for (i, v) in data.iter_mut().enumerate().skip(11).take(100) {
            *v = (1000 - i * 9) as u64;
        }
        let t = triangle(&data);
        assert!(t > 10 && t < 111, "triangle returned {t}");
    }
}
