//! Page rasterization
//!
//! Turns document bytes into one [`PageInput`] per page: native text for PDF
//! pages with a usable text layer, a grayscale raster at the target
//! resolution for scanned pages and image files, or a decode failure that
//! only affects its own page.
//!
//! Scanned pages are rendered whole by a [`PageRenderer`]. Without one, the
//! page is composed from the image XObjects its content stream draws, each
//! placed by the transform in effect at its `Do`.

use crate::detector::{self, get_number, DetectionConfig, PageImage, PageLayer};
use crate::orientation::Rotation;
use crate::render::PageRenderer;
use crate::DocumentError;
use flate2::read::ZlibDecoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use std::io::Read;
use std::path::Path;

/// PDF user space units per inch
const POINTS_PER_INCH: f32 = 72.0;

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
    Tiff,
    Bmp,
}

impl DocumentKind {
    /// Resolve a declared type: a MIME type (`application/pdf`), an
    /// extension (`pdf`, `.JPG`) or a file name (`contract.tiff`)
    pub fn from_declared(declared: &str) -> Result<Self, DocumentError> {
        let normalized = declared.trim().to_ascii_lowercase();
        let token = if normalized.starts_with("application/") || normalized.starts_with("image/") {
            normalized.split_once('/').map(|(_, sub)| sub).unwrap_or("")
        } else {
            normalized.rsplit('.').next().unwrap_or("")
        };

        match token {
            "pdf" | "x-pdf" => Ok(DocumentKind::Pdf),
            "png" => Ok(DocumentKind::Png),
            "jpg" | "jpeg" | "pjpeg" => Ok(DocumentKind::Jpeg),
            "tif" | "tiff" => Ok(DocumentKind::Tiff),
            "bmp" | "x-bmp" | "x-ms-bmp" => Ok(DocumentKind::Bmp),
            _ => Err(DocumentError::UnsupportedFormat(declared.trim().to_string())),
        }
    }

    /// Resolve the kind from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => Self::from_declared(ext),
            None => Err(DocumentError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Png => "png",
            DocumentKind::Jpeg => "jpeg",
            DocumentKind::Tiff => "tiff",
            DocumentKind::Bmp => "bmp",
        }
    }

    fn image_format(self) -> Option<ImageFormat> {
        match self {
            DocumentKind::Pdf => None,
            DocumentKind::Png => Some(ImageFormat::Png),
            DocumentKind::Jpeg => Some(ImageFormat::Jpeg),
            DocumentKind::Tiff => Some(ImageFormat::Tiff),
            DocumentKind::Bmp => Some(ImageFormat::Bmp),
        }
    }
}

/// Configuration for rasterization
#[derive(Debug, Clone)]
pub struct RasterConfig {
    /// Target resolution for scanned PDF pages
    pub dpi: u32,
    /// Upper bound on either side of a resampled raster
    pub max_dimension: u32,
    /// Native text layer detection thresholds
    pub detection: DetectionConfig,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_dimension: 10_000,
            detection: DetectionConfig::default(),
        }
    }
}

/// One page, ready for text extraction
#[derive(Debug, Clone)]
pub struct PageInput {
    /// Zero-based position in the document
    pub page_index: u32,
    pub content: PageContent,
}

#[derive(Debug, Clone)]
pub enum PageContent {
    /// Text from the embedded text layer
    Native(String),
    /// Grayscale raster that needs OCR
    Raster(GrayImage),
    /// The page could not be decoded; carries the reason
    Undecodable(String),
}

impl PageInput {
    pub fn needs_ocr(&self) -> bool {
        matches!(self.content, PageContent::Raster(_))
    }
}

/// Rasterize a document into per-page inputs
///
/// Scanned PDF pages go to `renderer` first; pages it cannot render are
/// composed from their image XObjects.
pub fn rasterize(
    bytes: &[u8],
    kind: DocumentKind,
    config: &RasterConfig,
    renderer: &dyn PageRenderer,
) -> Result<Vec<PageInput>, DocumentError> {
    match kind.image_format() {
        None => rasterize_pdf(bytes, config, renderer),
        Some(format) => Ok(vec![rasterize_image(bytes, format)]),
    }
}

fn rasterize_image(bytes: &[u8], format: ImageFormat) -> PageInput {
    let content = match image::load_from_memory_with_format(bytes, format) {
        Ok(img) => PageContent::Raster(img.to_luma8()),
        Err(e) => {
            log::warn!("Image could not be decoded: {}", e);
            PageContent::Undecodable(e.to_string())
        }
    };

    PageInput {
        page_index: 0,
        content,
    }
}

fn rasterize_pdf(
    bytes: &[u8],
    config: &RasterConfig,
    renderer: &dyn PageRenderer,
) -> Result<Vec<PageInput>, DocumentError> {
    let doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        return Err(DocumentError::Encrypted);
    }

    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(DocumentError::Pdf("document has no pages".to_string()));
    }

    let inputs = pages
        .iter()
        .enumerate()
        .map(|(index, (&page_num, &page_id))| {
            let content = match detector::detect_page_layer(&doc, page_num, page_id, &config.detection) {
                PageLayer::Native(text) => PageContent::Native(text),
                PageLayer::Scanned => match render_scanned_page(bytes, &doc, page_num, page_id, config, renderer) {
                    Ok(raster) => PageContent::Raster(raster),
                    Err(reason) => {
                        log::warn!("Page {} could not be decoded: {}", page_num, reason);
                        PageContent::Undecodable(reason)
                    }
                },
            };
            PageInput {
                page_index: index as u32,
                content,
            }
        })
        .collect();

    Ok(inputs)
}

/// Render a scanned page, composing it from its images when the renderer
/// is missing or fails
fn render_scanned_page(
    bytes: &[u8],
    doc: &Document,
    page_num: u32,
    page_id: ObjectId,
    config: &RasterConfig,
    renderer: &dyn PageRenderer,
) -> Result<GrayImage, String> {
    if renderer.is_available() {
        match renderer.render(bytes, page_num, config.dpi) {
            Ok(raster) => return Ok(cap_dimensions(raster, config.max_dimension)),
            Err(e) => log::warn!(
                "Page {} could not be rendered ({}); composing it from its images",
                page_num,
                e
            ),
        }
    }

    compose_page(doc, page_id, config)
}

fn cap_dimensions(raster: GrayImage, max_dimension: u32) -> GrayImage {
    let (width, height) = raster.dimensions();
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return raster;
    }

    let scale = max_dimension as f32 / longest as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(1);
    let new_height = ((height as f32 * scale).round() as u32).max(1);
    imageops::resize(&raster, new_width, new_height, FilterType::CatmullRom)
}

/// Paint every image the page places onto a white page-sized canvas at the
/// target DPI, then apply the page's `/Rotate`
fn compose_page(doc: &Document, page_id: ObjectId, config: &RasterConfig) -> Result<GrayImage, String> {
    let placements = image_placements(doc, page_id);
    if placements.is_empty() {
        return Err("page places no image".to_string());
    }

    let [x0, y0, x1, y1] = media_box(doc, page_id).unwrap_or(LETTER);
    let (width_pt, height_pt) = ((x1 - x0).abs(), (y1 - y0).abs());
    if width_pt <= 0.0 || height_pt <= 0.0 {
        return Err("page has an empty media box".to_string());
    }

    let mut scale = config.dpi as f32 / POINTS_PER_INCH;
    let longest = width_pt.max(height_pt) * scale;
    if longest > config.max_dimension as f32 {
        scale *= config.max_dimension as f32 / longest;
    }

    let canvas_width = ((width_pt * scale).round() as u32).max(1);
    let canvas_height = ((height_pt * scale).round() as u32).max(1);
    let mut canvas = GrayImage::from_pixel(canvas_width, canvas_height, Luma([255u8]));
    let origin = (x0.min(x1), y0.max(y1));

    let mut painted = 0;
    let mut last_error = None;
    for placement in &placements {
        match decode_image_stream(doc, &placement.image) {
            Ok(image) => {
                paint(&mut canvas, image, &placement.ctm, origin, scale);
                painted += 1;
            }
            Err(reason) => {
                log::debug!("Skipping image: {}", reason);
                last_error = Some(reason);
            }
        }
    }
    if painted == 0 {
        return Err(last_error.unwrap_or_else(|| "page places no image".to_string()));
    }
    log::debug!(
        "Composed {} of {} images into a {}x{} page",
        painted,
        placements.len(),
        canvas_width,
        canvas_height
    );

    let page_rotation = detector::inherited_attribute(doc, page_id, b"Rotate")
        .and_then(|obj| obj.as_i64().ok())
        .and_then(Rotation::from_degrees)
        .unwrap_or_default();
    Ok(page_rotation.apply(&canvas))
}

/// Draw one image where `ctm` maps its unit square; `origin` is the page's
/// top-left corner in user space
fn paint(canvas: &mut GrayImage, image: GrayImage, ctm: &Matrix, origin: (f32, f32), scale: f32) {
    let [a, b, c, d, e, f] = *ctm;
    let corners = [(e, f), (a + e, b + f), (c + e, d + f), (a + c + e, b + d + f)];
    let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    for (x, y) in corners {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    let width = ((max_x - min_x) * scale).round() as u32;
    let height = ((max_y - min_y) * scale).round() as u32;
    if width == 0 || height == 0 {
        return;
    }

    // Image rows run top to bottom; user space y runs upwards
    let oriented = if b.abs() > a.abs() {
        if b > 0.0 {
            imageops::rotate270(&image)
        } else {
            imageops::rotate90(&image)
        }
    } else {
        let mut oriented = image;
        if a < 0.0 {
            oriented = imageops::flip_horizontal(&oriented);
        }
        if d < 0.0 {
            oriented = imageops::flip_vertical(&oriented);
        }
        oriented
    };

    let scaled = if oriented.dimensions() == (width, height) {
        oriented
    } else {
        imageops::resize(&oriented, width, height, FilterType::CatmullRom)
    };

    let left = ((min_x - origin.0) * scale).round() as i64;
    let top = ((origin.1 - max_y) * scale).round() as i64;
    imageops::replace(canvas, &scaled, left, top);
}

/// Affine transform `[a b c d e f]` in PDF's row-vector convention
type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// US Letter, for pages without a usable MediaBox
const LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Forms nested deeper than this are not followed
const MAX_FORM_DEPTH: usize = 8;

/// `m` applied before `ctm`
fn concat(m: &Matrix, ctm: &Matrix) -> Matrix {
    [
        m[0] * ctm[0] + m[1] * ctm[2],
        m[0] * ctm[1] + m[1] * ctm[3],
        m[2] * ctm[0] + m[3] * ctm[2],
        m[2] * ctm[1] + m[3] * ctm[3],
        m[4] * ctm[0] + m[5] * ctm[2] + ctm[4],
        m[4] * ctm[1] + m[5] * ctm[3] + ctm[5],
    ]
}

fn to_matrix(values: &[Object]) -> Option<Matrix> {
    if values.len() != 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, value) in m.iter_mut().zip(values) {
        *slot = get_number(value)?;
    }
    Some(m)
}

/// An image XObject and the transform in effect where the page draws it
struct Placement<'a> {
    image: PageImage<'a>,
    ctm: Matrix,
}

/// Every image the page draws, following form XObjects
fn image_placements(doc: &Document, page_id: ObjectId) -> Vec<Placement<'_>> {
    let Some(resources) = detector::inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
    else {
        return Vec::new();
    };
    let content = match doc.get_page_content(page_id) {
        Ok(content) => content,
        Err(e) => {
            log::debug!("Page content unreadable: {}", e);
            return Vec::new();
        }
    };

    let mut placements = Vec::new();
    collect_placements(doc, &content, resources, IDENTITY, 0, &mut placements);
    placements
}

fn collect_placements<'a>(
    doc: &'a Document,
    content: &[u8],
    resources: &'a Dictionary,
    base: Matrix,
    depth: usize,
    out: &mut Vec<Placement<'a>>,
) {
    let Ok(content) = Content::decode(content) else {
        return;
    };

    let mut ctm = base;
    let mut saved = Vec::new();
    for op in &content.operations {
        match op.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => {
                if let Some(previous) = saved.pop() {
                    ctm = previous;
                }
            }
            "cm" => {
                if let Some(m) = to_matrix(&op.operands) {
                    ctm = concat(&m, &ctm);
                }
            }
            "Do" => {
                let Some(stream) = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| detector::xobject(doc, resources, name))
                else {
                    continue;
                };

                let subtype = stream.dict.get(b"Subtype").and_then(|s| s.as_name()).ok();
                if subtype == Some(b"Image".as_slice()) {
                    out.push(Placement {
                        image: PageImage::from_stream(stream),
                        ctm,
                    });
                } else if subtype == Some(b"Form".as_slice()) && depth < MAX_FORM_DEPTH {
                    let form_matrix = stream
                        .dict
                        .get(b"Matrix")
                        .ok()
                        .and_then(|m| detector::resolve(doc, m).as_array().ok())
                        .and_then(|values| to_matrix(values))
                        .unwrap_or(IDENTITY);
                    let form_resources = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|r| detector::resolve(doc, r).as_dict().ok())
                        .unwrap_or(resources);
                    let data = stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone());
                    collect_placements(
                        doc,
                        &data,
                        form_resources,
                        concat(&form_matrix, &ctm),
                        depth + 1,
                        out,
                    );
                }
            }
            _ => {}
        }
    }
}

fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f32; 4]> {
    let values = detector::inherited_attribute(doc, page_id, b"MediaBox")?
        .as_array()
        .ok()?;
    if values.len() != 4 {
        return None;
    }

    let mut rect = [0.0f32; 4];
    for (slot, value) in rect.iter_mut().zip(values) {
        *slot = get_number(detector::resolve(doc, value))?;
    }
    Some(rect)
}

/// Decode an image XObject into grayscale
fn decode_image_stream(doc: &Document, image: &PageImage<'_>) -> Result<GrayImage, String> {
    let dict = &image.stream.dict;
    if image.width == 0 || image.height == 0 {
        return Err("image has no dimensions".to_string());
    }

    let filters = stream_filters(doc, dict);
    let filter_names: Vec<&[u8]> = filters.iter().map(|f| f.as_slice()).collect();

    match filter_names.as_slice() {
        [] => raw_samples_to_gray(doc, dict, &image.stream.content, image.width, image.height),
        [name] if *name == b"DCTDecode" => {
            image::load_from_memory_with_format(&image.stream.content, ImageFormat::Jpeg)
                .map(|img| img.to_luma8())
                .map_err(|e| format!("invalid JPEG data: {}", e))
        }
        [name] if *name == b"FlateDecode" => {
            let samples = match image.stream.decompressed_content() {
                Ok(data) => data,
                Err(_) => {
                    let mut decoder = ZlibDecoder::new(image.stream.content.as_slice());
                    let mut inflated = Vec::new();
                    decoder
                        .read_to_end(&mut inflated)
                        .map_err(|e| format!("invalid Flate data: {}", e))?;
                    inflated
                }
            };
            raw_samples_to_gray(doc, dict, &samples, image.width, image.height)
        }
        other => {
            let names: Vec<String> = other
                .iter()
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .collect();
            Err(format!("unsupported image filter {}", names.join("+")))
        }
    }
}

fn stream_filters(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").map(|f| detector::resolve(doc, f)) {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn raw_samples_to_gray(
    doc: &Document,
    dict: &Dictionary,
    samples: &[u8],
    width: u32,
    height: u32,
) -> Result<GrayImage, String> {
    let is_mask = dict
        .get(b"ImageMask")
        .ok()
        .and_then(|v| v.as_bool().ok())
        .unwrap_or(false);
    let (components, bits) = if is_mask {
        (1, 1)
    } else {
        let bits = detector::dict_u32(dict, b"BitsPerComponent").unwrap_or(8);
        (color_components(doc, dict)?, bits)
    };

    samples_to_gray(samples, width, height, components, bits)
}

/// Number of color components for an image's color space
fn color_components(doc: &Document, dict: &Dictionary) -> Result<u32, String> {
    let color_space = dict
        .get(b"ColorSpace")
        .map(|cs| detector::resolve(doc, cs))
        .map_err(|_| "image has no color space".to_string())?;

    let family = match color_space {
        Object::Name(name) => name.as_slice(),
        Object::Array(items) => items
            .first()
            .and_then(|o| o.as_name().ok())
            .ok_or_else(|| "malformed color space".to_string())?,
        _ => return Err("malformed color space".to_string()),
    };

    if family == b"DeviceGray" || family == b"CalGray" || family == b"G" {
        Ok(1)
    } else if family == b"DeviceRGB" || family == b"CalRGB" || family == b"RGB" {
        Ok(3)
    } else if family == b"DeviceCMYK" || family == b"CMYK" {
        Ok(4)
    } else if family == b"ICCBased" {
        let Object::Array(items) = color_space else {
            return Err("ICCBased color space without profile".to_string());
        };
        items
            .get(1)
            .map(|profile| detector::resolve(doc, profile))
            .and_then(|profile| profile.as_stream().ok())
            .and_then(|profile| detector::dict_u32(&profile.dict, b"N"))
            .ok_or_else(|| "ICCBased profile without component count".to_string())
    } else {
        Err(format!(
            "unsupported color space {}",
            String::from_utf8_lossy(family)
        ))
    }
}

/// Convert raw image samples to grayscale
///
/// Supports 8-bit Gray/RGB/CMYK and 1-bit gray samples.
pub fn samples_to_gray(
    samples: &[u8],
    width: u32,
    height: u32,
    components: u32,
    bits: u32,
) -> Result<GrayImage, String> {
    match (components, bits) {
        (1, 1) => {
            let row_len = (width as usize).div_ceil(8);
            check_len(samples, row_len * height as usize)?;
            Ok(GrayImage::from_fn(width, height, |x, y| {
                let byte = samples[y as usize * row_len + x as usize / 8];
                let bit = (byte >> (7 - (x % 8))) & 1;
                Luma([if bit == 1 { 255 } else { 0 }])
            }))
        }
        (1 | 3 | 4, 8) => {
            let stride = components as usize;
            let row_len = width as usize * stride;
            check_len(samples, row_len * height as usize)?;
            Ok(GrayImage::from_fn(width, height, |x, y| {
                let offset = y as usize * row_len + x as usize * stride;
                let px = &samples[offset..offset + stride];
                Luma([match stride {
                    1 => px[0],
                    3 => luma(px[0], px[1], px[2]),
                    _ => {
                        let ink = 0.30 * px[0] as f32 + 0.59 * px[1] as f32 + 0.11 * px[2] as f32
                            + px[3] as f32;
                        255 - ink.min(255.0) as u8
                    }
                }])
            }))
        }
        _ => Err(format!(
            "unsupported sample layout: {} components at {} bits",
            components, bits
        )),
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32).round() as u8
}

fn check_len(samples: &[u8], expected: usize) -> Result<(), String> {
    if samples.len() < expected {
        Err(format!(
            "truncated image data: {} of {} bytes",
            samples.len(),
            expected
        ))
    } else {
        Ok(())
    }
}
