//! Full-page PDF rendering
//!
//! Scanned pages are rendered whole at the target resolution so every
//! image strip, every compression filter the renderer understands and any
//! drawn content ends up in the raster. [`PdftoppmCli`] drives poppler's
//! `pdftoppm` over stdin/stdout. When no renderer is available the
//! rasterizer composes the page from its image XObjects instead.

use image::{GrayImage, ImageFormat};
use once_cell::sync::OnceCell;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("page renderer unavailable: {0}")]
    Unavailable(String),
    #[error("page rendering failed: {0}")]
    Failed(String),
    #[error("unreadable renderer output: {0}")]
    Output(String),
}

/// Renders single PDF pages to grayscale rasters
pub trait PageRenderer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Render one page (1-based) of a PDF at `dpi`
    ///
    /// The page's `/Rotate` is applied by the renderer.
    fn render(&self, pdf: &[u8], page_number: u32, dpi: u32) -> Result<GrayImage, RenderError>;
}

/// Configuration for the pdftoppm adapter
#[derive(Debug, Clone)]
pub struct PdftoppmConfig {
    /// Executable to run (`pdftoppm` on the PATH by default)
    pub binary: PathBuf,
}

impl Default for PdftoppmConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
        }
    }
}

/// [`PageRenderer`] backed by poppler's `pdftoppm`
#[derive(Debug, Default)]
pub struct PdftoppmCli {
    config: PdftoppmConfig,
    available: OnceCell<bool>,
}

impl PdftoppmCli {
    pub fn new(config: PdftoppmConfig) -> Self {
        Self {
            config,
            available: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &PdftoppmConfig {
        &self.config
    }

    fn check_installed(&self) -> bool {
        // pdftoppm prints its version on stderr and exits 0 or 99 depending
        // on the poppler release, so only a failed spawn counts as missing
        match Command::new(&self.config.binary).arg("-v").output() {
            Ok(output) => {
                let banner = String::from_utf8_lossy(&output.stderr);
                log::info!(
                    "pdftoppm found: {}",
                    banner.lines().next().unwrap_or("unknown version")
                );
                true
            }
            Err(e) => {
                log::warn!(
                    "pdftoppm not found ({}); scanned pages will be composed from their images",
                    e
                );
                false
            }
        }
    }
}

impl PageRenderer for PdftoppmCli {
    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.check_installed())
    }

    fn render(&self, pdf: &[u8], page_number: u32, dpi: u32) -> Result<GrayImage, RenderError> {
        let page = page_number.to_string();
        let resolution = dpi.to_string();

        let mut child = Command::new(&self.config.binary)
            .args(["-f", &page, "-l", &page, "-r", &resolution])
            .args(["-gray", "-png", "-singlefile", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RenderError::Unavailable(format!(
                        "{} not found; install poppler-utils to render scanned pages",
                        self.config.binary.display()
                    ))
                } else {
                    RenderError::Failed(e.to_string())
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(pdf)
                .map_err(|e| RenderError::Failed(format!("failed to send document: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| RenderError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::Failed(stderr.trim().to_string()));
        }
        if output.stdout.is_empty() {
            return Err(RenderError::Output(format!(
                "no image for page {}",
                page_number
            )));
        }

        image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .map(|img| img.to_luma8())
            .map_err(|e| RenderError::Output(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_unavailable() {
        let renderer = PdftoppmCli::new(PdftoppmConfig {
            binary: PathBuf::from("/nonexistent/pdftoppm"),
        });
        assert!(!renderer.is_available());
        assert!(matches!(
            renderer.render(b"%PDF-1.4", 1, 300),
            Err(RenderError::Unavailable(_))
        ));
    }
}
