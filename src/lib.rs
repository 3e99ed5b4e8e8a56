//! Legal document normalization and query routing
//!
//! This crate provides:
//! - Document assembly: native text layers where a PDF has them, otherwise
//!   page rendering, rotation correction and OCR, joined under
//!   `--- Page N ---` markers
//! - Query classification into a fixed set of legal analysis intents
//! - A small workflow that routes each query to one specialized handler
//!
//! External collaborators sit behind the [`PageRenderer`], [`OcrEngine`]
//! and [`LanguageModel`] traits.

pub mod classifier;
pub mod detector;
pub mod document;
pub mod extractor;
pub mod handlers;
pub mod model;
pub mod ocr;
pub mod orientation;
pub mod parse;
pub mod prompts;
pub mod query;
pub mod rasterizer;
pub mod render;
pub mod router;

#[cfg(test)]
mod testing;

pub use classifier::{ClassifierConfig, QueryClassifier};
pub use detector::{DetectionConfig, PageLayer};
pub use document::{
    Document, DocumentMetadata, ExtractionMethod, PageError, PageRecord, MAX_DOCUMENT_SIZE,
};
pub use extractor::{PreprocessConfig, TextExtractor};
pub use handlers::{AnalysisHandler, Findings, HandlerKind, Response};
pub use model::{
    HttpModel, LanguageModel, ModelConfig, ModelError, ModelRequest, RetryPolicy, TaskKind,
};
pub use ocr::{OcrEngine, OcrError, Recognition, TesseractCli, TesseractConfig};
pub use orientation::{OrientationConfig, OrientationCorrector, OrientationMethod, Rotation};
pub use query::{Classification, FallbackReason, Query, QueryCategory, QueryError};
pub use rasterizer::{DocumentKind, PageContent, PageInput, RasterConfig};
pub use render::{PageRenderer, PdftoppmCli, PdftoppmConfig, RenderError};
pub use router::{Router, Stage, WorkflowError, WorkflowState};

use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("document is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),
    #[error("PDF parsing error: {0}")]
    Pdf(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for DocumentError {
    fn from(e: lopdf::Error) -> Self {
        DocumentError::Pdf(e.to_string())
    }
}

/// Configuration for document assembly
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Size limit in bytes; values above [`MAX_DOCUMENT_SIZE`] are capped
    pub max_document_size: u64,
    pub raster: RasterConfig,
    pub orientation: OrientationConfig,
    pub preprocess: PreprocessConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_document_size: MAX_DOCUMENT_SIZE,
            raster: RasterConfig::default(),
            orientation: OrientationConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// Turns document bytes into an assembled [`Document`]
pub struct Assembler {
    engine: Arc<dyn OcrEngine>,
    renderer: Arc<dyn PageRenderer>,
    config: PipelineConfig,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(Arc::new(TesseractCli::default()))
    }
}

impl Assembler {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self::with_config(engine, PipelineConfig::default())
    }

    pub fn with_config(engine: Arc<dyn OcrEngine>, config: PipelineConfig) -> Self {
        Self {
            engine,
            renderer: Arc::new(PdftoppmCli::default()),
            config,
        }
    }

    /// Replace the page renderer used for scanned PDF pages
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn size_limit(&self) -> u64 {
        self.config.max_document_size.min(MAX_DOCUMENT_SIZE)
    }

    fn check_size(&self, size: u64) -> Result<(), DocumentError> {
        let limit = self.size_limit();
        if size > limit {
            return Err(DocumentError::TooLarge { size, limit });
        }
        Ok(())
    }

    /// Assemble a document of a known kind
    pub fn assemble(&self, bytes: &[u8], kind: DocumentKind) -> Result<Document, DocumentError> {
        let start = std::time::Instant::now();
        self.check_size(bytes.len() as u64)?;

        let inputs = rasterizer::rasterize(bytes, kind, &self.config.raster, self.renderer.as_ref())?;
        let ocr_pages = inputs.iter().filter(|p| p.needs_ocr()).count();
        if ocr_pages > 0 && !self.engine.is_available() {
            return Err(DocumentError::OcrUnavailable(format!(
                "{} page(s) need OCR but no recognition engine is available",
                ocr_pages
            )));
        }
        log::info!(
            "Extracting text from {} pages ({} need OCR)",
            inputs.len(),
            ocr_pages
        );

        let extractor = TextExtractor::new(
            self.engine.as_ref(),
            OrientationCorrector::new(self.config.orientation.clone()),
            self.config.preprocess.clone(),
        );
        let records = inputs
            .into_par_iter()
            .map(|input| extractor.extract(input))
            .collect::<Result<Vec<_>, _>>()?;

        let document = Document::assemble(kind, bytes.len() as u64, records, self.config.raster.dpi)?;
        log::debug!("Assembly took {} ms", start.elapsed().as_millis());
        Ok(document)
    }

    /// Assemble a document given a MIME type, extension or file name
    pub fn assemble_declared(&self, bytes: &[u8], declared_type: &str) -> Result<Document, DocumentError> {
        let kind = DocumentKind::from_declared(declared_type)?;
        self.assemble(bytes, kind)
    }

    /// Read and assemble a file, recording its name
    pub fn assemble_path<P: AsRef<Path>>(&self, path: P) -> Result<Document, DocumentError> {
        let path = path.as_ref();
        let kind = DocumentKind::from_path(path)?;
        self.check_size(std::fs::metadata(path)?.len())?;

        let bytes = std::fs::read(path)?;
        let document = self.assemble(&bytes, kind)?;
        Ok(match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => document.with_file_name(name),
            None => document,
        })
    }
}

/// Assemble a document with the default Tesseract-backed pipeline
pub fn assemble(bytes: &[u8], declared_type: &str) -> Result<Document, DocumentError> {
    Assembler::default().assemble_declared(bytes, declared_type)
}

/// Answer one query about a document
pub fn answer<M: LanguageModel + ?Sized>(
    model: &M,
    document: &Document,
    query: &str,
) -> Result<Response, WorkflowError> {
    Router::new(model).answer(document, query)
}
