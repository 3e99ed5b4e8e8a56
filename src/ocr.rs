//! Character recognition engine contract and the Tesseract adapter
//!
//! The pipeline only talks to an [`OcrEngine`]: orientation detection (OSD)
//! and recognition over a grayscale raster. [`TesseractCli`] drives the
//! `tesseract` program over stdin/stdout, so no temporary files are written.

use crate::orientation::{OrientationEstimate, Rotation};
use image::{GrayImage, ImageFormat};
use once_cell::sync::OnceCell;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Errors reported by a recognition engine
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    /// The engine is missing or cannot be started
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    /// The engine ran but did not produce a result for this page
    #[error("OCR failed: {0}")]
    Failed(String),
    /// The engine produced output that could not be interpreted
    #[error("unreadable OCR output: {0}")]
    Output(String),
}

/// Text recognized on one page
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence in 0.0..=1.0, when the engine reports one
    pub confidence: Option<f32>,
}

/// A character recognition engine
///
/// Implementations must be deterministic for identical input: the
/// orientation corrector relies on it.
pub trait OcrEngine: Send + Sync {
    /// Whether the engine can be used at all
    fn is_available(&self) -> bool;

    /// Structural orientation and script detection
    fn detect_orientation(&self, page: &GrayImage) -> Result<OrientationEstimate, OcrError>;

    /// Recognize the text of an upright, preprocessed page
    fn recognize(&self, page: &GrayImage) -> Result<Recognition, OcrError>;
}

/// Configuration for the Tesseract adapter
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    /// Executable to run (`tesseract` on the PATH by default)
    pub binary: PathBuf,
    /// Recognition language(s), e.g. `eng` or `eng+spa`
    pub language: String,
    /// OCR engine mode (`--oem`)
    pub engine_mode: u8,
    /// Page segmentation mode used for recognition (`--psm`)
    pub page_segmentation: u8,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            engine_mode: 3,
            page_segmentation: 6,
        }
    }
}

/// [`OcrEngine`] backed by the `tesseract` command-line program
#[derive(Debug, Default)]
pub struct TesseractCli {
    config: TesseractConfig,
    available: OnceCell<bool>,
}

impl TesseractCli {
    pub fn new(config: TesseractConfig) -> Self {
        Self {
            config,
            available: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &TesseractConfig {
        &self.config
    }

    fn check_installed(&self) -> bool {
        match Command::new(&self.config.binary).arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                log::info!(
                    "Tesseract found: {}",
                    version.lines().next().unwrap_or("unknown version")
                );
                true
            }
            Ok(output) => {
                log::warn!(
                    "Tesseract version check exited with {}; OCR disabled",
                    output.status
                );
                false
            }
            Err(e) => {
                log::warn!("Tesseract not found ({}); OCR disabled", e);
                false
            }
        }
    }

    /// Run tesseract on a PNG-encoded page piped through stdin
    fn run(&self, page: &GrayImage, args: &[&str]) -> Result<String, OcrError> {
        let mut png = Vec::new();
        page.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| OcrError::Failed(format!("failed to encode page: {}", e)))?;

        let mut child = Command::new(&self.config.binary)
            .arg("stdin")
            .arg("stdout")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    OcrError::Unavailable(format!(
                        "{} not found; install tesseract-ocr to process scanned documents",
                        self.config.binary.display()
                    ))
                } else {
                    OcrError::Failed(e.to_string())
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .map_err(|e| OcrError::Failed(format!("failed to send page: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl OcrEngine for TesseractCli {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.check_installed())
    }

    fn detect_orientation(&self, page: &GrayImage) -> Result<OrientationEstimate, OcrError> {
        let output = self.run(page, &["--psm", "0"])?;
        parse_osd(&output)
    }

    fn recognize(&self, page: &GrayImage) -> Result<Recognition, OcrError> {
        let oem = self.config.engine_mode.to_string();
        let psm = self.config.page_segmentation.to_string();
        let output = self.run(
            page,
            &["-l", &self.config.language, "--oem", &oem, "--psm", &psm, "tsv"],
        )?;
        parse_tsv(&output)
    }
}

/// Parse Tesseract OSD output (`Rotate:` and `Orientation confidence:` lines)
pub fn parse_osd(output: &str) -> Result<OrientationEstimate, OcrError> {
    let mut rotation = None;
    let mut confidence = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Rotate" => rotation = value.trim().parse::<i64>().ok(),
            "Orientation confidence" => confidence = value.trim().parse::<f32>().ok(),
            _ => {}
        }
    }

    let degrees = rotation.ok_or_else(|| OcrError::Output("OSD output has no Rotate line".into()))?;
    let rotation = Rotation::from_degrees(degrees)
        .ok_or_else(|| OcrError::Output(format!("OSD reported rotation {}", degrees)))?;

    Ok(OrientationEstimate {
        rotation,
        confidence: confidence.unwrap_or(0.0),
    })
}

/// Rebuild page text from Tesseract TSV output
///
/// Words (level 5) are joined by spaces, lines by newlines and paragraphs
/// by blank lines. The confidence is the mean of the word confidences.
pub fn parse_tsv(output: &str) -> Result<Recognition, OcrError> {
    let mut rows = output.lines();
    let header = rows
        .next()
        .ok_or_else(|| OcrError::Output("empty TSV output".into()))?;
    if !header.starts_with("level") {
        return Err(OcrError::Output(format!("unexpected TSV header: {}", header)));
    }

    let mut text = String::new();
    let mut last_line: Option<(u32, u32, u32)> = None;
    let mut last_paragraph: Option<(u32, u32)> = None;
    let mut confidence_sum = 0.0f32;
    let mut confidence_count = 0u32;

    for row in rows {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        let num = |idx: usize| fields[idx].parse::<u32>().unwrap_or(0);
        let paragraph = (num(2), num(3));
        let line = (num(2), num(3), num(4));

        match last_line {
            Some(prev) if prev == line => text.push(' '),
            Some(_) if last_paragraph == Some(paragraph) => text.push('\n'),
            Some(_) => text.push_str("\n\n"),
            None => {}
        }
        text.push_str(word);
        last_line = Some(line);
        last_paragraph = Some(paragraph);

        if let Ok(conf) = fields[10].parse::<f32>() {
            if conf >= 0.0 {
                confidence_sum += conf;
                confidence_count += 1;
            }
        }
    }

    let confidence = if confidence_count > 0 {
        Some((confidence_sum / confidence_count as f32 / 100.0).clamp(0.0, 1.0))
    } else {
        None
    };

    Ok(Recognition { text, confidence })
}
