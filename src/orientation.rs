//! Page orientation detection and correction
//!
//! The primary signal is the OCR engine's orientation and script detection
//! (OSD). When OSD fails or reports a confidence below the configured
//! threshold, a geometric heuristic takes over: Canny edges, Hough line
//! voting, and the median line direction decide between upright and
//! sideways text.

use crate::ocr::OcrEngine;
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::edges::canny;
use imageproc::hough::{detect_lines, LineDetectionOptions};

/// Clockwise rotation needed to make a page upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize any multiple of 90 degrees; other angles are rejected
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotate an image clockwise by this amount
    pub fn apply(self, image: &GrayImage) -> GrayImage {
        match self {
            Rotation::Deg0 => image.clone(),
            Rotation::Deg90 => imageops::rotate90(image),
            Rotation::Deg180 => imageops::rotate180(image),
            Rotation::Deg270 => imageops::rotate270(image),
        }
    }
}

/// A rotation estimate and how much the detector trusts it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    pub rotation: Rotation,
    /// Detector-specific scale: Tesseract's OSD confidence for the primary
    /// method, agreeing-line fraction (0.0..=1.0) for the geometric one
    pub confidence: f32,
}

/// Which method produced the applied rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationMethod {
    Osd,
    Geometric,
    /// Neither method produced a usable estimate
    Undetected,
}

/// Configuration for orientation correction
#[derive(Debug, Clone)]
pub struct OrientationConfig {
    /// OSD estimates below this confidence fall back to the geometric method
    pub min_osd_confidence: f32,
    /// Longest side of the working copy used for edge detection
    pub geometric_max_dimension: u32,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
    /// Lines considered when taking the median direction
    pub max_lines: usize,
    /// Share of lines that must agree with the median direction before a
    /// geometric estimate rotates the page
    pub min_geometric_confidence: f32,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            min_osd_confidence: 2.0,
            geometric_max_dimension: 1000,
            canny_low: 50.0,
            canny_high: 150.0,
            max_lines: 50,
            min_geometric_confidence: 0.6,
        }
    }
}

/// A page after orientation correction
#[derive(Debug, Clone)]
pub struct CorrectedPage {
    pub image: GrayImage,
    pub rotation: Rotation,
    pub method: OrientationMethod,
}

/// Detects and undoes page rotation
#[derive(Debug, Clone, Default)]
pub struct OrientationCorrector {
    config: OrientationConfig,
}

impl OrientationCorrector {
    pub fn new(config: OrientationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OrientationConfig {
        &self.config
    }

    /// Estimate the rotation of a page without changing it
    pub fn detect(&self, engine: &dyn OcrEngine, page: &GrayImage) -> (Rotation, OrientationMethod) {
        match engine.detect_orientation(page) {
            Ok(estimate) if estimate.confidence >= self.config.min_osd_confidence => {
                return (estimate.rotation, OrientationMethod::Osd);
            }
            Ok(estimate) => log::debug!(
                "OSD confidence {:.2} below {:.2}, using geometric fallback",
                estimate.confidence,
                self.config.min_osd_confidence
            ),
            Err(e) => log::debug!("OSD failed, using geometric fallback: {}", e),
        }

        match estimate_geometric(page, &self.config) {
            Some(estimate) if estimate.confidence >= self.config.min_geometric_confidence => {
                (estimate.rotation, OrientationMethod::Geometric)
            }
            Some(estimate) => {
                log::debug!(
                    "Line directions split {:.0}%, leaving page unrotated",
                    estimate.confidence * 100.0
                );
                (Rotation::Deg0, OrientationMethod::Undetected)
            }
            None => (Rotation::Deg0, OrientationMethod::Undetected),
        }
    }

    /// Detect the rotation of a page and return the upright page
    pub fn correct(&self, engine: &dyn OcrEngine, page: GrayImage) -> CorrectedPage {
        let (rotation, method) = self.detect(engine, &page);
        let image = match rotation {
            Rotation::Deg0 => page,
            other => other.apply(&page),
        };

        CorrectedPage {
            image,
            rotation,
            method,
        }
    }
}

/// Geometric orientation estimate from dominant line direction
///
/// Hough angles are those of the line normal, clockwise from the x-axis, so
/// horizontal text lines vote near 90 degrees. The heuristic cannot tell
/// 0 from 180 or 90 from 270; sideways pages are reported as 90.
pub fn estimate_geometric(page: &GrayImage, config: &OrientationConfig) -> Option<OrientationEstimate> {
    let (width, height) = page.dimensions();
    if width < 8 || height < 8 {
        return None;
    }

    let longest = width.max(height);
    let working = if longest > config.geometric_max_dimension {
        let scale = config.geometric_max_dimension as f32 / longest as f32;
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        imageops::resize(page, w, h, FilterType::Triangle)
    } else {
        page.clone()
    };

    let edges = canny(&working, config.canny_low, config.canny_high);
    let (w, h) = working.dimensions();
    let options = LineDetectionOptions {
        vote_threshold: (w.min(h) / 4).max(10),
        suppression_radius: 8,
    };

    let mut lines = detect_lines(&edges, options);
    if lines.is_empty() {
        return None;
    }
    lines.truncate(config.max_lines);

    let mut angles: Vec<u32> = lines.iter().map(|l| l.angle_in_degrees % 180).collect();
    angles.sort_unstable();
    let median = angles[angles.len() / 2];

    let is_horizontal = |angle: u32| (45..135).contains(&angle);
    let horizontal = is_horizontal(median);
    let agreeing = angles.iter().filter(|a| is_horizontal(**a) == horizontal).count();

    Some(OrientationEstimate {
        rotation: if horizontal {
            Rotation::Deg0
        } else {
            Rotation::Deg90
        },
        confidence: agreeing as f32 / angles.len() as f32,
    })
}
