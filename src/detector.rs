//! Per-page native text layer detection
//!
//! This module decides, page by page, whether a PDF page carries a usable
//! embedded text layer. A fast scan of the page's content streams for
//! text-showing operators runs first; only pages that actually show text are
//! handed to lopdf's text extraction. Pages without usable text that place an
//! image are reported as scanned and go to the rasterizer.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Inheritable page attributes are looked up at most this many levels up
/// the page tree.
const MAX_TREE_DEPTH: usize = 32;

/// What a page offers to the text extractor
#[derive(Debug, Clone, PartialEq)]
pub enum PageLayer {
    /// Embedded text (possibly empty for blank pages)
    Native(String),
    /// No usable text layer, but the page places at least one image
    Scanned,
}

/// Configuration for native text layer detection
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Minimum text-showing operators before extraction is attempted
    pub min_text_ops_per_page: u32,
    /// Minimum non-whitespace characters for a text layer to count as usable
    pub min_native_chars: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_text_ops_per_page: 1,
            min_native_chars: 20,
        }
    }
}

/// Page content analysis result
#[derive(Debug, Default)]
struct PageAnalysis {
    text_operator_count: u32,
    has_images: bool,
}

/// Classify one page of a loaded document
pub fn detect_page_layer(
    doc: &Document,
    page_num: u32,
    page_id: ObjectId,
    config: &DetectionConfig,
) -> PageLayer {
    let analysis = analyze_page_content(doc, page_id);

    let mut text = String::new();
    if analysis.text_operator_count >= config.min_text_ops_per_page {
        match doc.extract_text(&[page_num]) {
            Ok(extracted) => text = extracted.trim_end().to_string(),
            Err(e) => log::debug!("Native extraction failed on page {}: {}", page_num, e),
        }
    }

    let usable_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if usable_chars >= config.min_native_chars {
        log::debug!(
            "Page {}: native text layer ({} ops, {} chars)",
            page_num,
            analysis.text_operator_count,
            usable_chars
        );
        return PageLayer::Native(text);
    }

    if analysis.has_images {
        log::debug!(
            "Page {}: no usable text layer ({} chars), image present",
            page_num,
            usable_chars
        );
        PageLayer::Scanned
    } else {
        // Short or empty text without images: nothing for OCR to recover
        PageLayer::Native(text)
    }
}

/// Analyze a page's content stream for text operators and images
fn analyze_page_content(doc: &Document, page_id: ObjectId) -> PageAnalysis {
    let mut analysis = PageAnalysis::default();

    for content_id in doc.get_page_contents(page_id) {
        if let Ok(Object::Stream(stream)) = doc.get_object(content_id) {
            let content = match stream.decompressed_content() {
                Ok(data) => data,
                Err(_) => stream.content.clone(),
            };

            let (ops, places_xobject) = scan_content_for_text_operators(&content);
            analysis.text_operator_count += ops;
            analysis.has_images = analysis.has_images || places_xobject;
        }
    }

    // A `Do` may place a form rather than an image; the resources decide
    if analysis.has_images || analysis.text_operator_count == 0 {
        analysis.has_images = !page_images(doc, page_id).is_empty();
    }

    analysis
}

/// Fast scan of content stream bytes for text operators
///
/// Counts `Tj`, `TJ`, `'` and `"` operators and reports whether a `Do`
/// (XObject placement) occurs.
fn scan_content_for_text_operators(content: &[u8]) -> (u32, bool) {
    let mut text_ops = 0u32;
    let mut places_xobject = false;

    let is_delimiter = |idx: usize| idx >= content.len() || content[idx].is_ascii_whitespace();

    let mut i = 0;
    while i < content.len() {
        let b = content[i];
        let preceded_by_space = i == 0 || content[i - 1].is_ascii_whitespace();

        if b == b'T' && i + 1 < content.len() {
            let next = content[i + 1];
            if (next == b'j' || next == b'J') && is_delimiter(i + 2) {
                text_ops += 1;
            }
        }

        // Quote operators: `'` and `"` standing alone after their operand
        if (b == b'\'' || b == b'"') && preceded_by_space && is_delimiter(i + 1) {
            text_ops += 1;
        }

        if b == b'D' && i + 1 < content.len() && content[i + 1] == b'o' && is_delimiter(i + 2) {
            places_xobject = true;
        }

        i += 1;
    }

    (text_ops, places_xobject)
}

/// An image XObject reachable from a page's resources
#[derive(Debug)]
pub(crate) struct PageImage<'a> {
    pub stream: &'a Stream,
    pub width: u32,
    pub height: u32,
}

impl<'a> PageImage<'a> {
    pub fn from_stream(stream: &'a Stream) -> Self {
        Self {
            stream,
            width: dict_u32(&stream.dict, b"Width").unwrap_or(0),
            height: dict_u32(&stream.dict, b"Height").unwrap_or(0),
        }
    }
}

fn is_image(stream: &Stream) -> bool {
    stream
        .dict
        .get(b"Subtype")
        .ok()
        .and_then(|s| s.as_name().ok())
        .map_or(false, |name| name == b"Image")
}

fn xobjects<'a>(doc: &'a Document, resources: &'a Dictionary) -> Option<&'a Dictionary> {
    resources
        .get(b"XObject")
        .ok()
        .map(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
}

/// Look up a named XObject in a resource dictionary
pub(crate) fn xobject<'a>(doc: &'a Document, resources: &'a Dictionary, name: &[u8]) -> Option<&'a Stream> {
    xobjects(doc, resources)?
        .get(name)
        .ok()
        .and_then(|obj| resolve(doc, obj).as_stream().ok())
}

/// Collect the image XObjects of a page (inherited resources included)
pub(crate) fn page_images(doc: &Document, page_id: ObjectId) -> Vec<PageImage<'_>> {
    let Some(xobjects) = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|resources| xobjects(doc, resources))
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, value)| resolve(doc, value).as_stream().ok())
        .filter(|stream| is_image(stream))
        .map(PageImage::from_stream)
        .collect()
}

/// Look up a page attribute, walking up the page tree for inherited values
pub(crate) fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;

    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }

    None
}

/// Follow one level of indirection
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Helper to get f32 from Object
pub(crate) fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

pub(crate) fn dict_u32(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()
        .and_then(|v| v.as_i64().ok())
        .and_then(|v| u32::try_from(v).ok())
}
