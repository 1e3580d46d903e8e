//! Semi-global block matching.
//!
//! The matching cost of a pixel is the sum over colour channels of the
//! clipped absolute difference to its candidate in the other image, summed
//! over a `block_size` window. Costs are then aggregated along the five
//! scanlines that arrive from above or from the side, with the usual P1/P2
//! smoothness penalties, and the disparity with the smallest total is picked
//! per pixel, refined to sub-pixel precision. The image is processed in one
//! top-down pass, one row of costs at a time.

use std::collections::VecDeque;

use image::{imageops, RgbImage};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis, Zip};
use tracing::instrument;

use crate::disparity::{
    DisparityMap, DisparityMatcher, MatchDirection, DISPARITY_SCALE, INVALID_DISPARITY,
};
use crate::error::{Error, Result};
use crate::params::ValidatedParams;

struct ScanLine {
    drow: i32,
    dcol: i32,
}

/// Scanlines that reach a pixel from the row above or from within its own
/// row, so every path is complete after a single top-down sweep.
static PATH5: [ScanLine; 5] = [
    ScanLine { drow: 0, dcol: 1 },
    ScanLine { drow: 0, dcol: -1 },
    ScanLine { drow: 1, dcol: 1 },
    ScanLine { drow: 1, dcol: 0 },
    ScanLine { drow: 1, dcol: -1 },
];

/// Per-channel clip applied to colour differences.
const PRE_FILTER_CAP: u32 = 63;

#[derive(Debug, Clone, PartialEq)]
pub struct SgmConfig {
    pub num_disparities: u32,
    pub block_size: u32,
    pub p1: u32,
    pub p2: u32,
    /// Allowed difference, in whole pixels, between the left and the
    /// implied right disparity. Negative disables the check.
    pub disp12_max_diff: i32,
    /// Margin in percent by which the best cost must beat every
    /// non-neighbouring candidate.
    pub uniqueness_ratio: u32,
    /// Connected regions of similar disparity smaller than this are
    /// invalidated. Zero disables speckle filtering.
    pub speckle_window_size: usize,
    /// Maximum disparity variation, in whole pixels, within a region.
    pub speckle_range: i16,
}

impl SgmConfig {
    pub fn from_params(params: &ValidatedParams) -> Self {
        Self {
            num_disparities: params.max_disparity,
            block_size: params.block_size,
            p1: params.p1,
            p2: params.p2,
            disp12_max_diff: 1,
            uniqueness_ratio: 15,
            speckle_window_size: 1000,
            speckle_range: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SgmMatcher {
    config: SgmConfig,
    direction: MatchDirection,
}

impl SgmMatcher {
    pub fn new(config: SgmConfig) -> Self {
        Self {
            config,
            direction: MatchDirection::LeftToRight,
        }
    }

    /// Same configuration, opposite search direction.
    pub fn mirrored(&self) -> Self {
        let direction = match self.direction {
            MatchDirection::LeftToRight => MatchDirection::RightToLeft,
            MatchDirection::RightToLeft => MatchDirection::LeftToRight,
        };
        Self {
            config: self.config.clone(),
            direction,
        }
    }

    pub fn config(&self) -> &SgmConfig {
        &self.config
    }
}

impl DisparityMatcher for SgmMatcher {
    fn direction(&self) -> MatchDirection {
        self.direction
    }

    fn max_disparity(&self) -> u32 {
        self.config.num_disparities
    }

    #[instrument(level = "debug", skip_all, fields(direction = ?self.direction))]
    fn compute(&self, reference: &RgbImage, target: &RgbImage) -> Result<DisparityMap> {
        if reference.dimensions() != target.dimensions() {
            return Err(Error::Matching(format!(
                "image sizes differ: {:?} vs {:?}",
                reference.dimensions(),
                target.dimensions()
            )));
        }
        if reference.width() == 0 || reference.height() == 0 {
            return Err(Error::Matching("empty image".to_string()));
        }
        if self.config.num_disparities == 0 {
            return Err(Error::Matching("disparity range is empty".to_string()));
        }
        if self.config.num_disparities >= reference.width() {
            return Err(Error::Matching(format!(
                "{} disparities do not fit in an image {} pixels wide",
                self.config.num_disparities,
                reference.width()
            )));
        }

        let values = match self.direction {
            MatchDirection::LeftToRight => compute_disp(reference, target, &self.config),
            MatchDirection::RightToLeft => {
                // Searching to the right is searching to the left on mirrored images.
                let reference = imageops::flip_horizontal(reference);
                let target = imageops::flip_horizontal(target);
                let flipped = compute_disp(&reference, &target, &self.config);
                flipped.slice(s![.., ..;-1]).to_owned()
            }
        };
        Ok(DisparityMap {
            direction: self.direction,
            values,
        })
    }
}

/// Matching cost of every pixel of `row` against each candidate disparity,
/// indexed `[(col, d)]`.
fn calc_pixel_cost(reference: &RgbImage, target: &RgbImage, row: u32, d_range: usize) -> Array2<u32> {
    let imgx = reference.width();
    let mut ans = Array2::<u32>::from_elem((imgx as usize, d_range), 3 * PRE_FILTER_CAP);
    for x in 0..imgx {
        let val_l = reference.get_pixel(x, row);
        for d in 0..d_range.min(x as usize + 1) {
            let val_r = target.get_pixel(x - d as u32, row);
            let cost: u32 = val_l
                .0
                .iter()
                .zip(val_r.0.iter())
                .map(|(&a, &b)| (a.abs_diff(b) as u32).min(PRE_FILTER_CAP))
                .sum();
            ans[(x as usize, d)] = cost;
        }
    }
    ans
}

/// Replaces every entry with the sum over a `2 * radius + 1` window along
/// `axis`, truncated at the borders.
fn box_sum(cost: &mut Array2<u32>, axis: Axis, radius: usize) {
    let len = cost.len_of(axis);
    let mut prefix = vec![0u32; len + 1];
    for mut lane in cost.lanes_mut(axis) {
        for i in 0..len {
            prefix[i + 1] = prefix[i].saturating_add(lane[i]);
        }
        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            lane[i] = prefix[hi] - prefix[lo];
        }
    }
}

/// Block costs of one row at a time, kept as a running sum over the rows
/// of the matching window so only `block_size` rows of costs are alive.
struct BlockCostWindow<'a> {
    reference: &'a RgbImage,
    target: &'a RgbImage,
    d_range: usize,
    radius: usize,
    rows: VecDeque<(usize, Array2<u32>)>,
    sum: Array2<u32>,
}

impl<'a> BlockCostWindow<'a> {
    fn new(reference: &'a RgbImage, target: &'a RgbImage, d_range: usize, radius: usize) -> Self {
        Self {
            reference,
            target,
            d_range,
            radius,
            rows: VecDeque::with_capacity(2 * radius + 1),
            sum: Array2::zeros((reference.width() as usize, d_range)),
        }
    }

    /// Block costs of `row`, indexed `[(col, d)]`. Rows must be visited top
    /// to bottom.
    fn advance_to(&mut self, row: usize) -> ArrayView2<u32> {
        let last = (row + self.radius).min(self.reference.height() as usize - 1);
        let mut next = self.rows.back().map_or(0, |(r, _)| r + 1);
        while next <= last {
            let mut costs = calc_pixel_cost(self.reference, self.target, next as u32, self.d_range);
            box_sum(&mut costs, Axis(0), self.radius);
            Zip::from(&mut self.sum).and(&costs).for_each(|s, &c| *s = s.saturating_add(c));
            self.rows.push_back((next, costs));
            next += 1;
        }
        while let Some((r, _)) = self.rows.front() {
            if *r + self.radius >= row {
                break;
            }
            if let Some((_, old)) = self.rows.pop_front() {
                Zip::from(&mut self.sum).and(&old).for_each(|s, &c| *s = s.saturating_sub(c));
            }
        }
        self.sum.view()
    }
}

fn aggregate_cost(
    cost: ArrayView1<u32>,
    prev: Option<ArrayView1<u32>>,
    mut out: ArrayViewMut1<u32>,
    p1: u32,
    p2: u32,
) {
    let prev = match prev {
        Some(prev) => prev,
        None => {
            out.assign(&cost);
            return;
        }
    };
    let d_range = cost.len();
    let min_prev_d = prev.iter().copied().min().unwrap_or(0);
    for d in 0..d_range {
        let mut best = prev[d].min(min_prev_d.saturating_add(p2));
        if d > 0 {
            best = best.min(prev[d - 1].saturating_add(p1));
        }
        if d + 1 < d_range {
            best = best.min(prev[d + 1].saturating_add(p1));
        }
        out[d] = cost[d].saturating_add(best - min_prev_d);
    }
}

/// Aggregates one row of block costs along every scanline into `sum_row`.
///
/// `prev_rows[p]` holds path `p`'s costs of the row above and is replaced by
/// this row's on return.
fn aggregate_cost_for_each_scanline(
    cost_row: ArrayView2<u32>,
    has_row_above: bool,
    prev_rows: &mut [Array2<u32>],
    cur_row: &mut Array2<u32>,
    sum_row: &mut Array2<u32>,
    config: &SgmConfig,
) {
    let (cols, d_range) = cost_row.dim();
    let mut scratch = Array1::<u32>::zeros(d_range);
    sum_row.fill(0);

    for (path, prev_row) in PATH5.iter().zip(prev_rows.iter_mut()) {
        let col_order: Vec<usize> = if path.dcol < 0 {
            (0..cols).rev().collect()
        } else {
            (0..cols).collect()
        };
        for &col in &col_order {
            let prev_col = col as i32 - path.dcol;
            let has_prev =
                prev_col >= 0 && (prev_col as usize) < cols && (path.drow == 0 || has_row_above);
            let cost = cost_row.row(col);
            if !has_prev {
                aggregate_cost(cost, None, cur_row.row_mut(col), config.p1, config.p2);
                continue;
            }
            // Horizontal paths chain within the row being built.
            if path.drow == 0 {
                scratch.assign(&cur_row.row(prev_col as usize));
            } else {
                scratch.assign(&prev_row.row(prev_col as usize));
            }
            aggregate_cost(
                cost,
                Some(scratch.view()),
                cur_row.row_mut(col),
                config.p1,
                config.p2,
            );
        }
        Zip::from(&mut *sum_row)
            .and(&*cur_row)
            .for_each(|s, &c| *s = s.saturating_add(c));
        std::mem::swap(prev_row, cur_row);
    }
}

/// Picks the disparity of every pixel in one row of aggregated costs.
fn calc_disparity(sum_row: &Array2<u32>, config: &SgmConfig, mut disp: ArrayViewMut1<i16>) {
    let (cols, d_range) = sum_row.dim();
    // Best disparity seen from the target image, for the consistency check.
    let mut disp_r = vec![-1i32; cols];
    let mut best_r = vec![u32::MAX; cols];
    for col in 0..cols {
        for d in 0..d_range.min(col + 1) {
            let c = sum_row[(col, d)];
            let xr = col - d;
            if c < best_r[xr] {
                best_r[xr] = c;
                disp_r[xr] = d as i32;
            }
        }
    }

    for col in 0..cols {
        disp[col] = INVALID_DISPARITY;
        let costs = sum_row.row(col);
        let (best_d, min_cost) = costs
            .iter()
            .copied()
            .enumerate()
            .min_by_key(|&(_, c)| c)
            .unwrap_or((0, 0));

        let unique = costs.iter().enumerate().all(|(d, &c)| {
            (d as i64 - best_d as i64).abs() <= 1
                || c as u64 * (100 - config.uniqueness_ratio.min(100)) as u64
                    >= min_cost as u64 * 100
        });
        if !unique {
            continue;
        }

        let mut value = best_d as i64 * DISPARITY_SCALE as i64;
        if best_d > 0 && best_d + 1 < d_range {
            let left = costs[best_d - 1] as i64;
            let right = costs[best_d + 1] as i64;
            let denom2 = (left + right - 2 * min_cost as i64).max(1);
            value += ((left - right) * DISPARITY_SCALE as i64 + denom2) / (denom2 * 2);
        }

        if config.disp12_max_diff >= 0 && col >= best_d {
            let dr = disp_r[col - best_d];
            if dr >= 0 && (dr - best_d as i32).abs() > config.disp12_max_diff {
                continue;
            }
        }
        disp[col] = value.clamp(0, i16::MAX as i64) as i16;
    }
}

/// Invalidates connected regions of similar disparity that are too small to
/// be real surfaces.
fn filter_speckles(disp: &mut Array2<i16>, max_speckle_size: usize, max_diff: i16) {
    if max_speckle_size == 0 {
        return;
    }
    let (rows, cols) = disp.dim();
    let mut label = Array2::<u32>::zeros((rows, cols));
    let mut stack = Vec::new();
    let mut region = Vec::new();
    let mut next_label = 0u32;

    for row in 0..rows {
        for col in 0..cols {
            if disp[(row, col)] == INVALID_DISPARITY || label[(row, col)] != 0 {
                continue;
            }
            next_label += 1;
            label[(row, col)] = next_label;
            stack.push((row, col));
            region.clear();
            while let Some((r, c)) = stack.pop() {
                region.push((r, c));
                let v = disp[(r, c)];
                let neighbours = [
                    (r.wrapping_sub(1), c),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r, c + 1),
                ];
                for (nr, nc) in neighbours {
                    if nr >= rows || nc >= cols || label[(nr, nc)] != 0 {
                        continue;
                    }
                    let nv = disp[(nr, nc)];
                    if nv != INVALID_DISPARITY && (nv as i32 - v as i32).abs() <= max_diff as i32 {
                        label[(nr, nc)] = next_label;
                        stack.push((nr, nc));
                    }
                }
            }
            if region.len() <= max_speckle_size {
                for &(r, c) in &region {
                    disp[(r, c)] = INVALID_DISPARITY;
                }
            }
        }
    }
}

/// Left-reference disparity of `reference` against `target` in fixed point.
///
/// Rows are swept once from top to bottom, so apart from the output only
/// a handful of `width x num_disparities` buffers are held at any time.
pub fn compute_disp(reference: &RgbImage, target: &RgbImage, config: &SgmConfig) -> Array2<i16> {
    let d_range = config.num_disparities as usize;
    let radius = (config.block_size / 2) as usize;
    let rows = reference.height() as usize;
    let cols = reference.width() as usize;

    let mut window = BlockCostWindow::new(reference, target, d_range, radius);
    let mut prev_rows: Vec<Array2<u32>> = PATH5.iter().map(|_| Array2::zeros((cols, d_range))).collect();
    let mut cur_row = Array2::<u32>::zeros((cols, d_range));
    let mut sum_row = Array2::<u32>::zeros((cols, d_range));
    let mut disp = Array2::<i16>::from_elem((rows, cols), INVALID_DISPARITY);

    for row in 0..rows {
        let cost_row = window.advance_to(row);
        aggregate_cost_for_each_scanline(cost_row, row > 0, &mut prev_rows, &mut cur_row, &mut sum_row, config);
        calc_disparity(&sum_row, config, disp.row_mut(row));
    }
    filter_speckles(
        &mut disp,
        config.speckle_window_size,
        config.speckle_range.saturating_mul(DISPARITY_SCALE),
    );
    disp
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn hash(x: u32, y: u32, salt: u32) -> u8 {
        let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ salt.wrapping_mul(2_246_822_519);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h ^ (h >> 16)) as u8
    }

    /// Random texture and a copy seen from a camera `shift` pixels to the right.
    fn shifted_pair(w: u32, h: u32, shift: u32) -> (RgbImage, RgbImage) {
        let texture = |x: u32, y: u32| Rgb([hash(x, y, 1), hash(x, y, 2), hash(x, y, 3)]);
        let left = RgbImage::from_fn(w, h, texture);
        let right = RgbImage::from_fn(w, h, |x, y| texture(x + shift, y));
        (left, right)
    }

    fn test_config() -> SgmConfig {
        SgmConfig {
            num_disparities: 16,
            block_size: 5,
            p1: 600,
            p2: 2400,
            disp12_max_diff: 1,
            uniqueness_ratio: 15,
            speckle_window_size: 0,
            speckle_range: 2,
        }
    }

    fn fraction_near(values: &Array2<i16>, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>, expected: i16) -> f32 {
        let mut hits = 0;
        let mut total = 0;
        for r in rows {
            for c in cols.clone() {
                total += 1;
                if (values[(r, c)] - expected).abs() <= DISPARITY_SCALE / 2 {
                    hits += 1;
                }
            }
        }
        hits as f32 / total as f32
    }

    #[test]
    fn recovers_constant_shift() {
        let (left, right) = shifted_pair(64, 32, 4);
        let matcher = SgmMatcher::new(test_config());
        let disp = matcher.compute(&left, &right).unwrap();
        assert_eq!(disp.direction, MatchDirection::LeftToRight);
        assert_eq!(disp.values.dim(), (32, 64));
        let frac = fraction_near(&disp.values, 4..28, 20..60, 4 * DISPARITY_SCALE);
        assert!(frac > 0.9, "only {frac} of pixels near the true disparity");
    }

    #[test]
    fn mirrored_matcher_searches_the_other_way() {
        let (left, right) = shifted_pair(64, 32, 4);
        let matcher = SgmMatcher::new(test_config()).mirrored();
        assert_eq!(matcher.direction(), MatchDirection::RightToLeft);
        let disp = matcher.compute(&right, &left).unwrap();
        assert_eq!(disp.direction, MatchDirection::RightToLeft);
        let frac = fraction_near(&disp.values, 4..28, 4..44, 4 * DISPARITY_SCALE);
        assert!(frac > 0.9, "only {frac} of pixels near the true disparity");
    }

    #[test]
    fn mismatched_sizes_are_rejected() {
        let a = RgbImage::new(32, 16);
        let b = RgbImage::new(30, 16);
        let err = SgmMatcher::new(test_config()).compute(&a, &b);
        assert!(matches!(err, Err(Error::Matching(_))));
    }

    #[test]
    fn small_speckles_are_invalidated() {
        let mut disp = Array2::<i16>::from_elem((10, 10), 64);
        disp[(5, 5)] = 400;
        filter_speckles(&mut disp, 4, 32);
        assert_eq!(disp[(5, 5)], INVALID_DISPARITY);
        assert_eq!(disp[(0, 0)], 64);
    }

    #[test]
    fn box_sum_truncates_at_borders() {
        let mut cost = Array2::<u32>::from_elem((5, 1), 1);
        box_sum(&mut cost, Axis(0), 1);
        let got: Vec<u32> = cost.iter().copied().collect();
        assert_eq!(got, vec![2, 3, 3, 3, 2]);
    }

    #[test]
    fn disparity_range_must_be_narrower_than_the_image() {
        let (left, right) = shifted_pair(16, 8, 2);
        let err = SgmMatcher::new(test_config()).compute(&left, &right);
        assert!(matches!(err, Err(Error::Matching(_))));

        let config = SgmConfig {
            num_disparities: 32,
            ..test_config()
        };
        let err = SgmMatcher::new(config).mirrored().compute(&right, &left);
        assert!(matches!(err, Err(Error::Matching(_))));
    }

    #[test]
    fn saturating_penalties_do_not_overflow() {
        let (left, right) = shifted_pair(48, 16, 3);
        let config = SgmConfig {
            p1: 1,
            p2: u32::MAX - 1,
            ..test_config()
        };
        let disp = SgmMatcher::new(config).compute(&left, &right).unwrap();
        assert_eq!(disp.values.dim(), (16, 48));
        assert!(disp.values.iter().all(|&v| v == INVALID_DISPARITY || v >= 0));
    }

    #[test]
    fn aggregation_saturates_instead_of_wrapping() {
        let cost = Array1::from(vec![u32::MAX - 5, 10, u32::MAX]);
        let prev = Array1::from(vec![u32::MAX, 0, u32::MAX - 1]);
        let mut out = Array1::<u32>::zeros(3);
        aggregate_cost(cost.view(), Some(prev.view()), out.view_mut(), 7, u32::MAX);
        assert_eq!(out.to_vec(), vec![u32::MAX, 10, u32::MAX]);
    }

    #[test]
    fn block_window_matches_full_box_filter() {
        let (left, right) = shifted_pair(12, 7, 1);
        let (d_range, radius) = (4, 1);
        let mut window = BlockCostWindow::new(&left, &right, d_range, radius);
        for row in 0..7usize {
            let got = window.advance_to(row).to_owned();
            let mut expected = Array2::<u32>::zeros((12, d_range));
            for r in row.saturating_sub(radius)..(row + radius + 1).min(7) {
                let mut costs = calc_pixel_cost(&left, &right, r as u32, d_range);
                box_sum(&mut costs, Axis(0), radius);
                expected += &costs;
            }
            assert_eq!(got, expected, "row {row}");
        }
    }
}
