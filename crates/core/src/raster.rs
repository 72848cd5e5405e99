use crate::error::IngestError;
use crate::process::{run_tool, ToolError};
use crate::traits::PageRasterizer;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// 8-bit grayscale raster, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, IngestError> {
        if pixels.len() != width * height {
            return Err(IngestError::InvalidArgument(format!(
                "{} pixels for a {width}x{height} image",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decodes a binary (P5) PGM, the format `pdftoppm -gray` writes.
    pub fn from_pgm(bytes: &[u8]) -> Result<Self, IngestError> {
        let invalid = |details: &str| IngestError::OcrFailed(format!("invalid pgm: {details}"));

        let mut cursor = 0usize;
        let mut header = Vec::with_capacity(4);
        while header.len() < 4 {
            while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            if cursor < bytes.len() && bytes[cursor] == b'#' {
                while cursor < bytes.len() && bytes[cursor] != b'\n' {
                    cursor += 1;
                }
                continue;
            }
            let start = cursor;
            while cursor < bytes.len() && !bytes[cursor].is_ascii_whitespace() {
                cursor += 1;
            }
            if start == cursor {
                return Err(invalid("truncated header"));
            }
            header.push(String::from_utf8_lossy(&bytes[start..cursor]).to_string());
        }
        // exactly one whitespace byte separates the header from the samples
        cursor += 1;

        if header[0] != "P5" {
            return Err(invalid(&format!("unsupported magic {}", header[0])));
        }
        let parse = |value: &str| value.parse::<usize>().map_err(|_| invalid(value));
        let width = parse(&header[1])?;
        let height = parse(&header[2])?;
        let max_value = parse(&header[3])?;
        if max_value == 0 || max_value > u16::MAX as usize {
            return Err(invalid("max value out of range"));
        }

        let samples = bytes.get(cursor..).unwrap_or_default();
        let pixels = if max_value < 256 {
            if samples.len() < width * height {
                return Err(invalid("truncated samples"));
            }
            samples[..width * height]
                .iter()
                .map(|value| ((*value as usize * 255) / max_value) as u8)
                .collect()
        } else {
            if samples.len() < width * height * 2 {
                return Err(invalid("truncated samples"));
            }
            samples
                .chunks_exact(2)
                .take(width * height)
                .map(|pair| {
                    let value = u16::from_be_bytes([pair[0], pair[1]]) as usize;
                    ((value * 255) / max_value) as u8
                })
                .collect()
        };

        Self::new(width, height, pixels)
    }

    pub fn to_pgm(&self) -> Vec<u8> {
        let mut bytes = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        bytes.extend_from_slice(&self.pixels);
        bytes
    }

    /// Copies a region, clipped to the image. `None` when the clip is empty.
    pub fn crop(&self, left: i64, top: i64, width: i64, height: i64) -> Option<GrayImage> {
        let x0 = left.clamp(0, self.width as i64) as usize;
        let y0 = top.clamp(0, self.height as i64) as usize;
        let x1 = (left + width).clamp(0, self.width as i64) as usize;
        let y1 = (top + height).clamp(0, self.height as i64) as usize;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let mut pixels = Vec::with_capacity((x1 - x0) * (y1 - y0));
        for row in y0..y1 {
            let offset = row * self.width;
            pixels.extend_from_slice(&self.pixels[offset + x0..offset + x1]);
        }
        Some(GrayImage {
            width: x1 - x0,
            height: y1 - y0,
            pixels,
        })
    }

    /// Fraction of pixels at or below the Otsu threshold, i.e. ink on a light page.
    pub fn dark_ratio(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let threshold = otsu_threshold(&self.pixels);
        let dark = self.pixels.iter().filter(|value| **value <= threshold).count();
        dark as f32 / self.pixels.len() as f32
    }
}

/// Threshold maximizing between-class variance over the 256-bin histogram.
pub fn otsu_threshold(pixels: &[u8]) -> u8 {
    let mut histogram = [0u64; 256];
    for value in pixels {
        histogram[*value as usize] += 1;
    }

    let total = pixels.len() as f64;
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut background_weight = 0f64;
    let mut background_sum = 0f64;
    let mut best_variance = -1f64;
    let mut threshold = 0u8;

    for (level, count) in histogram.iter().enumerate() {
        background_weight += *count as f64;
        if background_weight == 0.0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0.0 {
            break;
        }
        background_sum += level as f64 * *count as f64;
        let background_mean = background_sum / background_weight;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight;
        let variance =
            background_weight * foreground_weight * (background_mean - foreground_mean).powi(2);
        if variance > best_variance {
            best_variance = variance;
            threshold = level as u8;
        }
    }

    threshold
}

/// Renders pages with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            timeout: Duration::from_secs(60),
        }
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn rasterize(&self, pdf: &[u8], page: u32, dpi: u32) -> Result<GrayImage, IngestError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("input.pdf");
        std::fs::write(&input, pdf)?;
        let prefix = scratch.path().join("page");

        let mut command = Command::new(&self.binary);
        command
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-gray")
            .arg("-singlefile")
            .arg(&input)
            .arg(&prefix);

        run_tool(&mut command, scratch.path(), self.timeout).map_err(|error| match error {
            ToolError::NotFound(details) => IngestError::OcrUnavailable(details),
            ToolError::TimedOut(after) => IngestError::OcrUnavailable(format!(
                "pdftoppm timed out after {}s on page {page}",
                after.as_secs()
            )),
            ToolError::Failed(details) => IngestError::Rasterize { page, details },
        })?;

        let bytes = std::fs::read(prefix.with_extension("pgm")).map_err(|error| {
            IngestError::Rasterize {
                page,
                details: error.to_string(),
            }
        })?;
        GrayImage::from_pgm(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgm_header_with_comment_is_decoded() {
        let mut bytes = b"P5\n# made by test\n3 2\n255\n".to_vec();
        bytes.extend_from_slice(&[0, 128, 255, 10, 20, 30]);
        let image = GrayImage::from_pgm(&bytes).expect("pgm should decode");
        assert_eq!((image.width, image.height), (3, 2));
        assert_eq!(image.pixels, vec![0, 128, 255, 10, 20, 30]);
        assert_eq!(GrayImage::from_pgm(&image.to_pgm()).expect("re-decode"), image);
    }

    #[test]
    fn ascii_pgm_is_rejected() {
        assert!(GrayImage::from_pgm(b"P2\n1 1\n255\n0\n").is_err());
    }

    #[test]
    fn crop_is_clipped_to_bounds() {
        let image = GrayImage::new(4, 4, (0..16).collect()).expect("image");
        let region = image.crop(2, 2, 10, 10).expect("non-empty crop");
        assert_eq!((region.width, region.height), (2, 2));
        assert_eq!(region.pixels, vec![10, 11, 14, 15]);
        assert!(image.crop(5, 0, 2, 2).is_none());
    }

    #[test]
    fn otsu_separates_ink_from_paper() {
        let mut pixels = vec![250u8; 80];
        pixels.extend(vec![5u8; 20]);
        let threshold = otsu_threshold(&pixels);
        assert!((5..250).contains(&threshold));

        let image = GrayImage::new(10, 10, pixels).expect("image");
        assert!((image.dark_ratio() - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn heavier_strokes_have_higher_dark_ratio() {
        let thin = GrayImage::new(10, 1, vec![0, 255, 255, 255, 255, 255, 255, 255, 255, 0])
            .expect("image");
        let thick = GrayImage::new(10, 1, vec![0, 0, 0, 0, 255, 255, 255, 0, 0, 0]).expect("image");
        assert!(thick.dark_ratio() > thin.dark_ratio());
    }
}
