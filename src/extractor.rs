//! Page text extraction
//!
//! Native text layers are taken as they are. Rasterized pages are turned
//! upright, cleaned up (median denoising, then adaptive thresholding) and
//! handed to the recognition engine.

use crate::document::{ExtractionMethod, PageError, PageRecord};
use crate::ocr::{OcrEngine, OcrError};
use crate::orientation::{OrientationCorrector, Rotation};
use crate::rasterizer::{PageContent, PageInput};
use crate::DocumentError;
use image::GrayImage;
use imageproc::contrast::adaptive_threshold;
use imageproc::filter::median_filter;

/// Raster cleanup applied before recognition
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Median filter radius; 0 disables denoising
    pub median_radius: u32,
    /// Neighbourhood radius for adaptive thresholding (radius 5 is an 11x11 block)
    pub threshold_block_radius: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            median_radius: 1,
            threshold_block_radius: 5,
        }
    }
}

/// Denoise and binarize a page for recognition
pub fn preprocess(page: &GrayImage, config: &PreprocessConfig) -> GrayImage {
    let denoised = if config.median_radius > 0 {
        median_filter(page, config.median_radius, config.median_radius)
    } else {
        page.clone()
    };
    adaptive_threshold(&denoised, config.threshold_block_radius)
}

/// Turns [`PageInput`]s into [`PageRecord`]s
pub struct TextExtractor<'e> {
    engine: &'e dyn OcrEngine,
    corrector: OrientationCorrector,
    preprocess: PreprocessConfig,
}

impl<'e> TextExtractor<'e> {
    pub fn new(
        engine: &'e dyn OcrEngine,
        corrector: OrientationCorrector,
        preprocess: PreprocessConfig,
    ) -> Self {
        Self {
            engine,
            corrector,
            preprocess,
        }
    }

    /// Extract the text of one page
    ///
    /// Only a missing recognition engine is an error; every other failure is
    /// recorded on the page and yields empty text.
    pub fn extract(&self, input: PageInput) -> Result<PageRecord, DocumentError> {
        let page_index = input.page_index;

        match input.content {
            PageContent::Native(text) => Ok(PageRecord::native(page_index, text)),
            PageContent::Undecodable(reason) => Ok(PageRecord {
                page_index,
                method: ExtractionMethod::Ocr,
                rotation: Rotation::Deg0,
                orientation: None,
                raw_text: String::new(),
                confidence: None,
                error: Some(PageError::Decode(reason)),
            }),
            PageContent::Raster(raster) => self.recognize(page_index, raster),
        }
    }

    fn recognize(&self, page_index: u32, raster: GrayImage) -> Result<PageRecord, DocumentError> {
        let corrected = self.corrector.correct(self.engine, raster);
        if corrected.rotation != Rotation::Deg0 {
            log::debug!(
                "Page {}: rotated {} degrees ({:?})",
                page_index + 1,
                corrected.rotation.degrees(),
                corrected.method
            );
        }

        let prepared = preprocess(&corrected.image, &self.preprocess);
        let (raw_text, confidence, error) = match self.engine.recognize(&prepared) {
            Ok(recognition) => (recognition.text, recognition.confidence, None),
            Err(OcrError::Unavailable(message)) => {
                return Err(DocumentError::OcrUnavailable(message));
            }
            Err(e) => {
                log::warn!("Page {}: recognition failed: {}", page_index + 1, e);
                (String::new(), None, Some(PageError::Recognition(e.to_string())))
            }
        };

        Ok(PageRecord {
            page_index,
            method: ExtractionMethod::Ocr,
            rotation: corrected.rotation,
            orientation: Some(corrected.method),
            raw_text,
            confidence,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::OrientationMethod;
    use crate::testing::FakeEngine;
    use image::Luma;

    fn extractor(engine: &FakeEngine) -> TextExtractor<'_> {
        TextExtractor::new(
            engine,
            OrientationCorrector::default(),
            PreprocessConfig::default(),
        )
    }

    #[test]
    fn test_preprocess_binarizes_and_keeps_size() {
        let page = GrayImage::from_fn(30, 20, |x, _| Luma([if x < 15 { 40 } else { 220 }]));
        let cleaned = preprocess(&page, &PreprocessConfig::default());
        assert_eq!(cleaned.dimensions(), (30, 20));
        assert!(cleaned.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_native_page_skips_engine() {
        let engine = FakeEngine::default();
        let record = extractor(&engine)
            .extract(PageInput {
                page_index: 2,
                content: PageContent::Native("WHEREAS the parties agree".into()),
            })
            .unwrap();

        assert_eq!(record.method, ExtractionMethod::Native);
        assert_eq!(record.raw_text, "WHEREAS the parties agree");
        assert_eq!(engine.calls(), 0);
    }

    #[test]
    fn test_raster_page_is_rotated_before_recognition() {
        let engine = FakeEngine::with_orientation(Rotation::Deg90, 12.0);
        let record = extractor(&engine)
            .extract(PageInput {
                page_index: 0,
                content: PageContent::Raster(GrayImage::from_pixel(40, 60, Luma([255u8]))),
            })
            .unwrap();

        assert_eq!(record.method, ExtractionMethod::Ocr);
        assert_eq!(record.rotation, Rotation::Deg90);
        assert_eq!(record.orientation, Some(OrientationMethod::Osd));
        assert_eq!(record.raw_text, "recognized text");
        assert_eq!(*engine.recognized_sizes.lock().unwrap(), vec![(60, 40)]);
    }

    #[test]
    fn test_recognition_failure_is_recorded() {
        let engine = FakeEngine {
            fail_recognition: true,
            ..FakeEngine::default()
        };
        let record = extractor(&engine)
            .extract(PageInput {
                page_index: 1,
                content: PageContent::Raster(GrayImage::new(16, 16)),
            })
            .unwrap();

        assert!(record.raw_text.is_empty());
        assert!(matches!(record.error, Some(PageError::Recognition(_))));
    }

    #[test]
    fn test_missing_engine_is_fatal() {
        let engine = FakeEngine::unavailable();
        let result = extractor(&engine).extract(PageInput {
            page_index: 0,
            content: PageContent::Raster(GrayImage::new(16, 16)),
        });
        assert!(matches!(result, Err(DocumentError::OcrUnavailable(_))));
    }

    #[test]
    fn test_undecodable_page_has_decode_error() {
        let engine = FakeEngine::default();
        let record = extractor(&engine)
            .extract(PageInput {
                page_index: 4,
                content: PageContent::Undecodable("invalid JPEG data".into()),
            })
            .unwrap();

        assert!(record.raw_text.is_empty());
        assert_eq!(
            record.error,
            Some(PageError::Decode("invalid JPEG data".into()))
        );
        assert_eq!(engine.calls(), 0);
    }
}
