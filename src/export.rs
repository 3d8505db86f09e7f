//! Debug image export (OpenEXR, full f32 precision).

use std::path::Path;

use image::{ImageFormat, Rgba32FImage};
use log::info;

use crate::util::{Error, Result};

/// A read-back debug view: `channels` floats per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<f32>,
}

impl DebugImage {
    pub fn new(width: u32, height: u32, channels: u32, data: Vec<f32>) -> Result<Self> {
        if !(1..=4).contains(&channels) {
            return Err(Error::invalid(format!("{channels} channels per pixel")));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "{} floats for a {width}x{height}x{channels} image (expected {expected})",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let c = self.channels as usize;
        let i = (y as usize * self.width as usize + x as usize) * c;
        &self.data[i..i + c]
    }

    /// Expand to RGBA: missing color channels are 0, missing alpha is 1.
    pub fn to_rgba(&self) -> Vec<f32> {
        let c = self.channels as usize;
        let mut out = Vec::with_capacity(self.data.len() / c * 4);
        for px in self.data.chunks_exact(c) {
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            rgba[..c].copy_from_slice(px);
            out.extend_from_slice(&rgba);
        }
        out
    }

    /// Smallest and largest finite value across all channels.
    pub fn range(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Write as a 32-bit float RGBA EXR.
pub fn export_exr(image: &DebugImage, path: &Path) -> Result<()> {
    let export_err = |reason: String| Error::Export {
        path: path.to_path_buf(),
        reason,
    };
    let rgba = Rgba32FImage::from_raw(image.width, image.height, image.to_rgba())
        .ok_or_else(|| export_err("buffer does not match dimensions".into()))?;
    rgba.save_with_format(path, ImageFormat::OpenExr)
        .map_err(|e| export_err(e.to_string()))?;
    info!(
        "Exported {}x{} debug image to {}",
        image.width,
        image.height,
        path.display()
    );
    Ok(())
}

/// Read an EXR back as RGBA.
pub fn load_exr(path: &Path) -> Result<DebugImage> {
    let img = image::open(path)
        .map_err(|e| Error::Export {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .into_rgba32f();
    let (width, height) = img.dimensions();
    DebugImage::new(width, height, 4, img.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_len() {
        assert!(DebugImage::new(2, 2, 2, vec![0.0; 7]).is_err());
        assert!(DebugImage::new(2, 2, 5, vec![0.0; 20]).is_err());
    }

    #[test]
    fn test_to_rgba_fills_missing() {
        let img = DebugImage::new(2, 1, 2, vec![0.25, 0.5, 0.75, 1.0]).unwrap();
        assert_eq!(img.to_rgba(), vec![0.25, 0.5, 0.0, 1.0, 0.75, 1.0, 0.0, 1.0]);
        assert_eq!(img.pixel(1, 0), &[0.75, 1.0]);
    }

    #[test]
    fn test_range_skips_nan() {
        let img = DebugImage::new(3, 1, 1, vec![f32::NAN, -2.0, 3.0]).unwrap();
        assert_eq!(img.range(), Some((-2.0, 3.0)));
    }
}
