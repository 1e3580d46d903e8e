//! Weighted-least-squares disparity post-filter.
//!
//! Disparities that survive a left/right consistency check get confidence 1,
//! everything else 0. The confidence-weighted map and the confidence itself
//! are both smoothed with an edge-aware least-squares smoother guided by the
//! reference image, and their ratio is the filtered disparity. The smoother
//! alternates exact 1-D solves along rows and columns.

use image::RgbImage;
use ndarray::{Array2, Axis, Zip};
use tracing::instrument;

use crate::disparity::{
    DisparityFilter, DisparityMap, DisparityMatcher, MatchDirection, DISPARITY_SCALE,
    INVALID_DISPARITY,
};
use crate::error::{Error, Result};

/// Left/right disagreement, in fixed point, above which a disparity is
/// considered unreliable.
pub const LRC_THRESHOLD: i16 = 24;

const ITERATIONS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct WlsFilter {
    lambda: f64,
    sigma_color: f64,
    max_disparity: u32,
}

impl WlsFilter {
    /// Filter for the output of `matcher`, inheriting its disparity range.
    pub fn for_matcher<M: DisparityMatcher>(matcher: &M, lambda: f64, sigma_color: f64) -> Self {
        Self {
            lambda,
            sigma_color,
            max_disparity: matcher.max_disparity(),
        }
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn sigma_color(&self) -> f64 {
        self.sigma_color
    }

    fn edge_weight(&self, diff: f64) -> f64 {
        if self.sigma_color > 0.0 {
            (-diff / self.sigma_color).exp()
        } else if diff == 0.0 {
            1.0
        } else {
            0.0
        }
    }

    /// Neighbour weights `(horizontal, vertical)`; entry `(r, c)` links a
    /// pixel to its right and lower neighbour respectively.
    fn guide_weights(&self, reference: &RgbImage) -> (Array2<f64>, Array2<f64>) {
        let (w, h) = reference.dimensions();
        let (rows, cols) = (h as usize, w as usize);
        let diff = |a: &image::Rgb<u8>, b: &image::Rgb<u8>| {
            a.0.iter()
                .zip(b.0.iter())
                .map(|(&x, &y)| x.abs_diff(y) as f64)
                .sum::<f64>()
                / 3.0
        };
        let mut horizontal = Array2::<f64>::zeros((rows, cols));
        let mut vertical = Array2::<f64>::zeros((rows, cols));
        for (x, y, px) in reference.enumerate_pixels() {
            if x + 1 < w {
                horizontal[(y as usize, x as usize)] = self.edge_weight(diff(px, reference.get_pixel(x + 1, y)));
            }
            if y + 1 < h {
                vertical[(y as usize, x as usize)] = self.edge_weight(diff(px, reference.get_pixel(x, y + 1)));
            }
        }
        (horizontal, vertical)
    }
}

fn confidence(primary: &DisparityMap, mirrored: &DisparityMap) -> Array2<f64> {
    let (rows, cols) = primary.values.dim();
    let mut conf = Array2::<f64>::zeros((rows, cols));
    for ((r, c), &d) in primary.values.indexed_iter() {
        if d == INVALID_DISPARITY {
            continue;
        }
        let shift = (d as f64 / DISPARITY_SCALE as f64).round() as usize;
        if shift > c {
            continue;
        }
        let m = mirrored.values[(r, c - shift)];
        if m != INVALID_DISPARITY && (d as i32 - m as i32).abs() <= LRC_THRESHOLD as i32 {
            conf[(r, c)] = 1.0;
        }
    }
    conf
}

/// Solves `(I + lambda * L) u = f` in place for two right-hand sides sharing
/// the same 1-D chain with link weights `weights[i]` between `i` and `i + 1`.
fn solve_chain(weights: &[f64], lambda: f64, f_a: &mut [f64], f_b: &mut [f64], c_prime: &mut Vec<f64>) {
    let n = f_a.len();
    if n == 0 {
        return;
    }
    c_prime.clear();
    c_prime.resize(n, 0.0);
    let link = |i: usize| if i + 1 < n { lambda * weights[i] } else { 0.0 };

    let mut prev_link = 0.0;
    for i in 0..n {
        let lower = -prev_link;
        let upper = -link(i);
        let diag = 1.0 + prev_link + link(i);
        let denom = if i == 0 { diag } else { diag - lower * c_prime[i - 1] };
        c_prime[i] = upper / denom;
        if i == 0 {
            f_a[i] /= denom;
            f_b[i] /= denom;
        } else {
            f_a[i] = (f_a[i] - lower * f_a[i - 1]) / denom;
            f_b[i] = (f_b[i] - lower * f_b[i - 1]) / denom;
        }
        prev_link = link(i);
    }
    for i in (0..n.saturating_sub(1)).rev() {
        f_a[i] -= c_prime[i] * f_a[i + 1];
        f_b[i] -= c_prime[i] * f_b[i + 1];
    }
}

fn smooth_along(axis: Axis, weights: &Array2<f64>, lambda: f64, num: &mut Array2<f64>, den: &mut Array2<f64>) {
    let mut w = Vec::new();
    let mut a = Vec::new();
    let mut b = Vec::new();
    let mut c_prime = Vec::new();
    Zip::from(weights.lanes(axis))
        .and(num.lanes_mut(axis))
        .and(den.lanes_mut(axis))
        .for_each(|wl, mut nl, mut dl| {
            w.clear();
            w.extend(wl.iter().copied());
            a.clear();
            a.extend(nl.iter().copied());
            b.clear();
            b.extend(dl.iter().copied());
            solve_chain(&w, lambda, &mut a, &mut b, &mut c_prime);
            nl.iter_mut().zip(&a).for_each(|(dst, &v)| *dst = v);
            dl.iter_mut().zip(&b).for_each(|(dst, &v)| *dst = v);
        });
}

impl DisparityFilter for WlsFilter {
    #[instrument(level = "debug", skip_all, fields(lambda = self.lambda, sigma = self.sigma_color))]
    fn filter(
        &self,
        primary: &DisparityMap,
        reference: &RgbImage,
        mirrored: &DisparityMap,
    ) -> Result<Array2<i16>> {
        if primary.direction != MatchDirection::LeftToRight
            || mirrored.direction != MatchDirection::RightToLeft
        {
            return Err(Error::Matching(format!(
                "filter expects a left-to-right primary and right-to-left mirrored map, got {:?} and {:?}",
                primary.direction, mirrored.direction
            )));
        }
        let (w, h) = reference.dimensions();
        let dim = (h as usize, w as usize);
        let fits = |map: &DisparityMap| map.height() == dim.0 && map.width() == dim.1;
        if !fits(primary) || !fits(mirrored) {
            return Err(Error::Matching(format!(
                "disparity maps {}x{}/{}x{} do not match reference image {}x{}",
                primary.width(),
                primary.height(),
                mirrored.width(),
                mirrored.height(),
                w,
                h
            )));
        }

        let (horizontal, vertical) = self.guide_weights(reference);
        let mut den = confidence(primary, mirrored);
        let mut num = &den * &primary.values.mapv(f64::from);

        for _ in 0..ITERATIONS {
            smooth_along(Axis(1), &horizontal, self.lambda, &mut num, &mut den);
            smooth_along(Axis(0), &vertical, self.lambda, &mut num, &mut den);
        }

        let upper = (self.max_disparity as f64 * DISPARITY_SCALE as f64).min(i16::MAX as f64);
        let mut out = Array2::<i16>::zeros(dim);
        Zip::from(&mut out).and(&num).and(&den).for_each(|o, &n, &d| {
            *o = if d > 1e-9 { (n / d).round().clamp(0.0, upper) as i16 } else { 0 };
        });
        Ok(out)
    }
}
