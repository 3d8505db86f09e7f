//! Two-moment depth storage shared by the variance buffer and the summed-area table.

use std::ops::{Add, AddAssign, Sub};

use bytemuck::{Pod, Zeroable};

use crate::util::{Error, Result};

/// Depth value written where no geometry was rasterized.
pub const FAR_DEPTH: f32 = 1.0;

/// First and second depth moments of one texel (or a sum of texels).
///
/// Layout matches a single `Rg32Float` texel so GPU readbacks cast directly.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Moments {
    /// Depth (or sum of depths)
    pub m1: f32,
    /// Squared depth (or sum of squared depths)
    pub m2: f32,
}

impl Moments {
    pub const ZERO: Self = Self { m1: 0.0, m2: 0.0 };

    /// Far-plane sentinel used to clear the variance buffer.
    pub const FAR: Self = Self {
        m1: FAR_DEPTH,
        m2: FAR_DEPTH * FAR_DEPTH,
    };

    #[inline]
    pub const fn new(m1: f32, m2: f32) -> Self {
        Self { m1, m2 }
    }

    /// Moments of a single depth sample.
    #[inline]
    pub fn from_depth(depth: f32) -> Self {
        Self {
            m1: depth,
            m2: depth * depth,
        }
    }

    #[inline]
    pub fn scale(self, s: f32) -> Self {
        Self {
            m1: self.m1 * s,
            m2: self.m2 * s,
        }
    }
}

impl Add for Moments {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            m1: self.m1 + rhs.m1,
            m2: self.m2 + rhs.m2,
        }
    }
}

impl AddAssign for Moments {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.m1 += rhs.m1;
        self.m2 += rhs.m2;
    }
}

impl Sub for Moments {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            m1: self.m1 - rhs.m1,
            m2: self.m2 - rhs.m2,
        }
    }
}

/// Square grid of per-texel depth moments as seen from the light.
///
/// Row-major, `texels[y * size + x]`.
#[derive(Clone, Debug, PartialEq)]
pub struct VarianceBuffer {
    size: u32,
    texels: Vec<Moments>,
}

impl VarianceBuffer {
    /// Buffer of `size × size` texels cleared to the far-plane sentinel.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidResolution { size, max: u32::MAX });
        }
        let count = size as usize * size as usize;
        Ok(Self {
            size,
            texels: vec![Moments::FAR; count],
        })
    }

    /// Build from light-space depths, one per texel, row-major.
    pub fn from_depths(size: u32, depths: &[f32]) -> Result<Self> {
        let mut buffer = Self::new(size)?;
        if depths.len() != buffer.texels.len() {
            return Err(Error::invalid(format!(
                "expected {} depths for a {size}x{size} buffer, got {}",
                buffer.texels.len(),
                depths.len()
            )));
        }
        for (texel, &d) in buffer.texels.iter_mut().zip(depths) {
            *texel = Moments::from_depth(d);
        }
        Ok(buffer)
    }

    /// Wrap raw moments, e.g. from a GPU readback.
    pub fn from_moments(size: u32, texels: Vec<Moments>) -> Result<Self> {
        if size == 0 || texels.len() != size as usize * size as usize {
            return Err(Error::invalid(format!(
                "{} texels do not form a {size}x{size} buffer",
                texels.len()
            )));
        }
        Ok(Self { size, texels })
    }

    /// Reset every texel to the far-plane sentinel.
    pub fn clear(&mut self) {
        self.texels.fill(Moments::FAR);
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn texels(&self) -> &[Moments] {
        &self.texels
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Moments {
        self.texels[self.index(x, y)]
    }

    /// Write a depth sample; keeps the nearer surface like the capture depth test.
    pub fn splat_depth(&mut self, x: u32, y: u32, depth: f32) {
        let idx = self.index(x, y);
        if depth < self.texels[idx].m1 {
            self.texels[idx] = Moments::from_depth(depth);
        }
    }

    /// Overwrite a texel regardless of depth ordering.
    pub fn set(&mut self, x: u32, y: u32, moments: Moments) {
        let idx = self.index(x, y);
        self.texels[idx] = moments;
    }

    /// Raw bytes in `Rg32Float` layout for GPU upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.size && y < self.size);
        y as usize * self.size as usize + x as usize
    }
}
