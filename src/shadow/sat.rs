//! Summed-area table over depth moments.
//!
//! The builder runs the same chunked Hillis-Steele scan as the GPU kernel
//! (`render::shaders::SAT_SCAN_WGSL`): a row pass into image A, then a column
//! pass from A into image B. Each line is an independent task, so rows (and
//! later columns) are scanned in parallel with rayon. Addition order within a
//! line is fixed, which makes repeated builds bit-identical.
//!
//! ## Precision
//!
//! Sums are accumulated in f32. At large resolutions the second moment of the
//! far corner grows to roughly `S²`, and small box queries then subtract nearly
//! equal large numbers. This is a known limitation and is not compensated.
//! At S = 1024, a uniform `(0.5, 0.26)` map queried with r = 2 at depth 0.9
//! gives an attenuation error around 1e-7 near the origin but about 3.5e-3 at
//! texel (1000, 1000); `test_precision_loss_grows_with_distance_from_origin`
//! in `tests/cpu_reference.rs` tracks it.

use rayon::prelude::*;

use super::variance::{Moments, VarianceBuffer};
use crate::util::{Error, Result};

/// Default number of elements one scan group processes per chunk.
pub const DEFAULT_SCAN_WIDTH: u32 = 256;

/// Axis a scan pass runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanAxis {
    /// One line per row, accumulating along x (stage H)
    Rows,
    /// One line per column, accumulating along y (stage V)
    Columns,
}

impl ScanAxis {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Rows => 0,
            Self::Columns => 1,
        }
    }
}

/// Box query in texel space: center plus half-width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowQuery {
    pub x: u32,
    pub y: u32,
    pub radius: u32,
}

impl ShadowQuery {
    pub const fn new(x: u32, y: u32, radius: u32) -> Self {
        Self { x, y, radius }
    }
}

/// Mean depth moments over a query box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxStatistics {
    pub mean: f32,
    pub mean_sq: f32,
    /// Texel count of the full `(2r+1)²` box, padding included
    pub area: u32,
}

impl BoxStatistics {
    /// `E[d²] − E[d]²`, floored at `min_variance`.
    #[inline]
    pub fn variance(&self, min_variance: f32) -> f32 {
        (self.mean_sq - self.mean * self.mean).max(min_variance)
    }
}

/// CPU reference implementation of the two-pass prefix-sum.
#[derive(Clone, Copy, Debug)]
pub struct SatBuilder {
    scan_width: u32,
}

impl Default for SatBuilder {
    fn default() -> Self {
        Self {
            scan_width: DEFAULT_SCAN_WIDTH,
        }
    }
}

impl SatBuilder {
    /// `scan_width` plays the role of the GPU work-group size.
    pub fn new(scan_width: u32) -> Result<Self> {
        if scan_width == 0 || !scan_width.is_power_of_two() {
            return Err(Error::InvalidWorkgroupSize {
                size: scan_width,
                max: 1024,
            });
        }
        Ok(Self { scan_width })
    }

    pub fn scan_width(&self) -> u32 {
        self.scan_width
    }

    /// Stage H then stage V.
    #[tracing::instrument(skip_all, fields(size = variance.size()))]
    pub fn build(&self, variance: &VarianceBuffer) -> SummedAreaTable {
        let size = variance.size();
        let rows = self.scan_square(size, variance.texels(), ScanAxis::Rows);
        let table = self.scan_square(size, &rows, ScanAxis::Columns);
        SummedAreaTable { size, texels: table }
    }

    /// One scan pass over every line of a `size × size` image along `axis`.
    pub fn scan(&self, size: u32, src: &[Moments], axis: ScanAxis) -> Result<Vec<Moments>> {
        if size == 0 || src.len() != size as usize * size as usize {
            return Err(Error::invalid(format!(
                "{} texels do not form a {size}x{size} image",
                src.len()
            )));
        }
        Ok(self.scan_square(size, src, axis))
    }

    // `src.len() == size²` is checked by the callers
    fn scan_square(&self, size: u32, src: &[Moments], axis: ScanAxis) -> Vec<Moments> {
        let n = size as usize;
        let width = self.scan_width as usize;
        let mut dst = vec![Moments::ZERO; n * n];

        match axis {
            ScanAxis::Rows => {
                dst.par_chunks_mut(n).enumerate().for_each(|(y, row)| {
                    scan_line(&src[y * n..(y + 1) * n], row, width);
                });
            }
            ScanAxis::Columns => {
                let columns: Vec<Vec<Moments>> = (0..n)
                    .into_par_iter()
                    .map(|x| {
                        let line: Vec<Moments> = (0..n).map(|y| src[y * n + x]).collect();
                        let mut out = vec![Moments::ZERO; n];
                        scan_line(&line, &mut out, width);
                        out
                    })
                    .collect();
                for (x, column) in columns.iter().enumerate() {
                    for (y, value) in column.iter().enumerate() {
                        dst[y * n + x] = *value;
                    }
                }
            }
        }
        dst
    }
}

/// Inclusive scan of one line in chunks of `width`, carrying each chunk's
/// total into the next. Mirrors the WGSL kernel step for step.
fn scan_line(src: &[Moments], dst: &mut [Moments], width: usize) {
    let mut scratch = vec![Moments::ZERO; width];
    let mut prev = vec![Moments::ZERO; width];
    let mut carry = Moments::ZERO;

    for (chunk_idx, chunk) in src.chunks(width).enumerate() {
        scratch.fill(Moments::ZERO);
        scratch[..chunk.len()].copy_from_slice(chunk);

        let mut offset = 1;
        while offset < width {
            prev.copy_from_slice(&scratch);
            for lane in offset..width {
                scratch[lane] = prev[lane] + prev[lane - offset];
            }
            offset <<= 1;
        }

        let base = chunk_idx * width;
        for (lane, out) in dst[base..base + chunk.len()].iter_mut().enumerate() {
            *out = scratch[lane] + carry;
        }
        carry = scratch[width - 1] + carry;
    }
}

/// Inclusive 2D prefix sum of a [`VarianceBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub struct SummedAreaTable {
    size: u32,
    texels: Vec<Moments>,
}

impl SummedAreaTable {
    /// Wrap already-summed texels, e.g. read back from the GPU.
    pub fn from_moments(size: u32, texels: Vec<Moments>) -> Result<Self> {
        if size == 0 || texels.len() != size as usize * size as usize {
            return Err(Error::invalid(format!(
                "{} texels do not form a {size}x{size} table",
                texels.len()
            )));
        }
        Ok(Self { size, texels })
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn texels(&self) -> &[Moments] {
        &self.texels
    }

    /// Table entry with zero padding below 0 and clamping above `size - 1`.
    #[inline]
    pub fn at(&self, x: i64, y: i64) -> Moments {
        if x < 0 || y < 0 {
            return Moments::ZERO;
        }
        let max = self.size as i64 - 1;
        let (x, y) = (x.min(max) as usize, y.min(max) as usize);
        self.texels[y * self.size as usize + x]
    }

    /// Zero-padded sum over the `(2r+1)²` box via four corner reads.
    pub fn box_sum(&self, query: ShadowQuery) -> Moments {
        let (x0, y0, x1, y1) = self.corners(query);
        self.at(x1, y1) - self.at(x0, y1) - self.at(x1, y0) + self.at(x0, y0)
    }

    /// Zero-padded box sum divided by the full box area.
    ///
    /// Texels outside the table count as depth 0, so boxes reaching past the
    /// border darken towards occlusion.
    pub fn box_statistics(&self, query: ShadowQuery) -> BoxStatistics {
        let sum = self.box_sum(query);
        let side = 2 * query.radius + 1;
        let area = side * side;
        BoxStatistics {
            mean: sum.m1 / area as f32,
            mean_sq: sum.m2 / area as f32,
            area,
        }
    }

    /// Exclusive lower corner and inclusive upper corner of the query box.
    fn corners(&self, query: ShadowQuery) -> (i64, i64, i64, i64) {
        let max = self.size as i64 - 1;
        let cx = (query.x as i64).min(max);
        let cy = (query.y as i64).min(max);
        let r = query.radius as i64;
        (cx - r - 1, cy - r - 1, cx + r, cy + r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(size: u32) -> VarianceBuffer {
        let depths: Vec<f32> = (0..size * size).map(|i| (i % 7) as f32 * 0.125).collect();
        VarianceBuffer::from_depths(size, &depths).unwrap()
    }

    fn brute_prefix(buf: &VarianceBuffer, x: u32, y: u32) -> Moments {
        let mut sum = Moments::ZERO;
        for j in 0..=y {
            for i in 0..=x {
                sum += buf.get(i, j);
            }
        }
        sum
    }

    #[test]
    fn test_scan_line_single_chunk() {
        let src: Vec<Moments> = (1..=4).map(|i| Moments::new(i as f32, 1.0)).collect();
        let mut dst = vec![Moments::ZERO; 4];
        scan_line(&src, &mut dst, 4);
        let m1: Vec<f32> = dst.iter().map(|m| m.m1).collect();
        assert_eq!(m1, vec![1.0, 3.0, 6.0, 10.0]);
        assert_eq!(dst[3].m2, 4.0);
    }

    #[test]
    fn test_scan_line_carries_across_chunks() {
        let src = vec![Moments::new(1.0, 2.0); 11];
        let mut dst = vec![Moments::ZERO; 11];
        scan_line(&src, &mut dst, 4);
        for (i, m) in dst.iter().enumerate() {
            assert_eq!(m.m1, (i + 1) as f32);
            assert_eq!(m.m2, 2.0 * (i + 1) as f32);
        }
    }

    #[test]
    fn test_build_matches_brute_force() {
        for size in [1u32, 5, 16, 33] {
            let buf = ramp(size);
            let sat = SatBuilder::new(8).unwrap().build(&buf);
            for y in 0..size {
                for x in 0..size {
                    let expected = brute_prefix(&buf, x, y);
                    let got = sat.at(x as i64, y as i64);
                    assert_eq!(got, expected, "size {size} at ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn test_scan_validates_len() {
        let builder = SatBuilder::new(4).unwrap();
        let src = vec![Moments::new(1.0, 1.0); 9];
        assert!(builder.scan(3, &src[..8], ScanAxis::Rows).is_err());
        assert!(builder.scan(2, &src, ScanAxis::Columns).is_err());
        assert!(builder.scan(0, &[], ScanAxis::Rows).is_err());

        let rows = builder.scan(3, &src, ScanAxis::Rows).unwrap();
        let m1: Vec<f32> = rows.iter().map(|m| m.m1).collect();
        assert_eq!(m1, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_rejects_non_power_of_two_width() {
        assert!(SatBuilder::new(0).is_err());
        assert!(SatBuilder::new(48).is_err());
        assert!(SatBuilder::new(64).is_ok());
    }

    #[test]
    fn test_at_zero_pads_and_clamps() {
        let sat = SatBuilder::default().build(&VarianceBuffer::new(4).unwrap());
        assert_eq!(sat.at(-1, 2), Moments::ZERO);
        assert_eq!(sat.at(2, -1), Moments::ZERO);
        assert_eq!(sat.at(10, 10), sat.at(3, 3));
        assert_eq!(sat.at(3, 3).m1, 16.0);
    }

    #[test]
    fn test_box_statistics_interior_and_edge() {
        let sat = SatBuilder::default().build(&VarianceBuffer::new(8).unwrap());
        let inner = sat.box_statistics(ShadowQuery::new(4, 4, 1));
        assert_eq!(inner.area, 9);
        assert_eq!(inner.mean, 1.0);

        // 9 of the 25 texels are inside the table, the rest are zero
        let corner = sat.box_statistics(ShadowQuery::new(0, 0, 2));
        assert_eq!(corner.area, 25);
        assert_eq!(corner.mean, 9.0 / 25.0);
        assert_eq!(corner.mean_sq, 9.0 / 25.0);
        assert_eq!(sat.box_sum(ShadowQuery::new(0, 0, 2)).m1, 9.0);

        let far_corner = sat.box_statistics(ShadowQuery::new(7, 7, 1));
        assert_eq!(far_corner.mean, 4.0 / 9.0);
    }

    #[test]
    fn test_from_moments_validates_len() {
        assert!(SummedAreaTable::from_moments(2, vec![Moments::ZERO; 3]).is_err());
        assert!(SummedAreaTable::from_moments(2, vec![Moments::ZERO; 4]).is_ok());
    }
}
