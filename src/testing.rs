//! Fixtures shared by unit tests: in-memory PDFs, a scripted OCR engine, a
//! scripted page renderer and a scripted language model.

use crate::model::{LanguageModel, ModelError, ModelRequest};
use crate::ocr::{OcrEngine, OcrError, Recognition};
use crate::orientation::OrientationEstimate;
use crate::render::{PageRenderer, RenderError};
use image::{GrayImage, ImageFormat};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A page to put into a test PDF
pub(crate) enum TestPage {
    /// One line of Helvetica text on a letter-sized page
    Text(&'static str),
    /// An unfiltered DeviceGray image filling a one-inch page
    Gray {
        width: u32,
        height: u32,
        samples: Vec<u8>,
    },
    /// A DCTDecode image (the bytes need not be a valid JPEG)
    Jpeg(Vec<u8>),
    /// Two 8x4 strips of uniform gray stacked on a one-inch page
    Strips { top: u8, bottom: u8 },
    /// A one-inch CCITTFaxDecode image
    Ccitt,
}

fn image_stream(width: i64, height: i64, filter: Option<&str>, data: Vec<u8>) -> Stream {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => Object::Integer(width),
        "Height" => Object::Integer(height),
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => Object::Integer(8),
    };
    if let Some(filter) = filter {
        dict.set("Filter", filter);
    }
    Stream::new(dict, data)
}

/// Image XObjects of a scanned test page: name, stream and placement matrix
fn page_images(page: &TestPage) -> Vec<(&'static str, Stream, &'static str)> {
    match page {
        TestPage::Text(_) => Vec::new(),
        TestPage::Gray {
            width,
            height,
            samples,
        } => vec![(
            "Im1",
            image_stream(*width as i64, *height as i64, None, samples.clone()),
            "72 0 0 72 0 0",
        )],
        TestPage::Jpeg(bytes) => vec![(
            "Im1",
            image_stream(8, 8, Some("DCTDecode"), bytes.clone()),
            "72 0 0 72 0 0",
        )],
        TestPage::Strips { top, bottom } => vec![
            ("Im1", image_stream(8, 4, None, vec![*top; 32]), "72 0 0 36 0 36"),
            ("Im2", image_stream(8, 4, None, vec![*bottom; 32]), "72 0 0 36 0 0"),
        ],
        TestPage::Ccitt => {
            let mut stream = image_stream(8, 8, Some("CCITTFaxDecode"), vec![0x26, 0xA0, 0x00, 0x10]);
            stream.dict.set("BitsPerComponent", Object::Integer(1));
            vec![("Im1", stream, "72 0 0 72 0 0")]
        }
    }
}

fn escape_literal(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}

fn media_box(width: i64, height: i64) -> Vec<Object> {
    vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(width),
        Object::Integer(height),
    ]
}

/// Build a PDF with one page per entry
pub(crate) fn build_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let page_id = match page {
            TestPage::Text(text) => {
                let content = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", escape_literal(text));
                let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => media_box(612, 792),
                    "Resources" => dictionary! {
                        "Font" => dictionary! { "F1" => font_id },
                    },
                    "Contents" => content_id,
                })
            }
            _ => {
                let mut placed = Vec::new();
                for (name, stream, matrix) in page_images(page) {
                    let image_id = doc.add_object(stream);
                    placed.push((name, image_id, matrix));
                }

                let mut xobjects = Dictionary::new();
                let mut content = String::new();
                for (name, image_id, matrix) in placed {
                    xobjects.set(name, image_id);
                    content.push_str(&format!("q {} cm /{} Do Q\n", matrix, name));
                }
                let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => media_box(72, 72),
                    "Resources" => dictionary! { "XObject" => xobjects },
                    "Contents" => content_id,
                })
            }
        };
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages.len() as i64),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub(crate) fn encode_png(image: &GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Scripted [`OcrEngine`]
pub(crate) struct FakeEngine {
    pub available: bool,
    /// `None` makes orientation detection fail
    pub orientation: Option<OrientationEstimate>,
    pub text: String,
    pub fail_recognition: bool,
    pub recognize_calls: AtomicUsize,
    pub osd_calls: AtomicUsize,
    /// Dimensions of every page handed to `recognize`
    pub recognized_sizes: Mutex<Vec<(u32, u32)>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            available: true,
            orientation: None,
            text: "recognized text".to_string(),
            fail_recognition: false,
            recognize_calls: AtomicUsize::new(0),
            osd_calls: AtomicUsize::new(0),
            recognized_sizes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeEngine {
    pub fn with_orientation(rotation: crate::Rotation, confidence: f32) -> Self {
        Self {
            orientation: Some(OrientationEstimate {
                rotation,
                confidence,
            }),
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst) + self.osd_calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for FakeEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    fn detect_orientation(&self, _page: &GrayImage) -> Result<OrientationEstimate, OcrError> {
        self.osd_calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(OcrError::Unavailable("fake engine disabled".into()));
        }
        self.orientation
            .ok_or_else(|| OcrError::Failed("too few characters".into()))
    }

    fn recognize(&self, page: &GrayImage) -> Result<Recognition, OcrError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        self.recognized_sizes.lock().unwrap().push(page.dimensions());
        if !self.available {
            return Err(OcrError::Unavailable("fake engine disabled".into()));
        }
        if self.fail_recognition {
            return Err(OcrError::Failed("engine crashed".into()));
        }
        Ok(Recognition {
            text: self.text.clone(),
            confidence: Some(0.9),
        })
    }
}

/// Scripted [`PageRenderer`] producing a uniform page per DPI inch
pub(crate) struct FakeRenderer {
    pub available: bool,
    pub fail: bool,
    /// Page numbers handed to `render`
    pub rendered: Mutex<Vec<u32>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self {
            available: true,
            fail: false,
            rendered: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl PageRenderer for FakeRenderer {
    fn is_available(&self) -> bool {
        self.available
    }

    fn render(&self, _pdf: &[u8], page_number: u32, dpi: u32) -> Result<GrayImage, RenderError> {
        self.rendered.lock().unwrap().push(page_number);
        if !self.available {
            return Err(RenderError::Unavailable("fake renderer disabled".into()));
        }
        if self.fail {
            return Err(RenderError::Failed("syntax error in page".into()));
        }
        Ok(GrayImage::from_pixel(dpi, dpi, image::Luma([128u8])))
    }
}

/// [`LanguageModel`] answering from a closure and recording every request
pub(crate) struct ScriptedModel<F> {
    respond: F,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl<F> ScriptedModel<F>
where
    F: Fn(&ModelRequest) -> Result<String, ModelError>,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl<F> LanguageModel for ScriptedModel<F>
where
    F: Fn(&ModelRequest) -> Result<String, ModelError>,
{
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}
