use crate::error::IngestError;
use crate::layout::{read_page_layout, PageLayout};
use crate::ocr::OcrWord;
use crate::raster::GrayImage;
use crate::traits::{OcrEngine, PageRasterizer};
use lopdf::{Document, ObjectId};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub const DEFAULT_OCR_DPI: u32 = 300;
pub const DEFAULT_OCR_LANGUAGE: &str = "kor";
/// Placeholder count above which a page may be CID-garbled.
pub const DEFAULT_CID_MIN_MATCHES: usize = 10;
/// Placeholders per character of page text above which a page is CID-garbled.
pub const DEFAULT_CID_MIN_DENSITY: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ExtractionPolicy {
    pub cid_min_matches: usize,
    pub cid_min_density: f64,
    pub dpi: u32,
    pub ocr_language: String,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            cid_min_matches: DEFAULT_CID_MIN_MATCHES,
            cid_min_density: DEFAULT_CID_MIN_DENSITY,
            dpi: DEFAULT_OCR_DPI,
            ocr_language: DEFAULT_OCR_LANGUAGE.to_string(),
        }
    }
}

fn cid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\(cid:\d+\)").expect("static cid pattern"))
}

pub fn contains_hangul(text: &str) -> bool {
    text.chars().any(|ch| ('\u{AC00}'..='\u{D7A3}').contains(&ch))
}

pub fn is_cid_garbled(text: &str, policy: &ExtractionPolicy) -> bool {
    let matches = cid_pattern().find_iter(text).count();
    let length = text.chars().count().max(1);
    matches > policy.cid_min_matches && matches as f64 / length as f64 > policy.cid_min_density
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrReason {
    CidGarbled,
    NoTargetLanguage,
}

/// `None` keeps the text layer.
pub fn ocr_reason(text: &str, policy: &ExtractionPolicy) -> Option<OcrReason> {
    if is_cid_garbled(text, policy) {
        Some(OcrReason::CidGarbled)
    } else if !contains_hangul(text) {
        Some(OcrReason::NoTargetLanguage)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct OcrCapture {
    pub reason: OcrReason,
    pub words: Vec<OcrWord>,
    pub image: GrayImage,
}

#[derive(Debug, Clone)]
pub enum PageSource {
    TextLayer(PageLayout),
    Ocr(OcrCapture),
    /// The page could not be read; it contributes empty text.
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub number: u32,
    pub text: String,
    pub source: PageSource,
}

impl ExtractedPage {
    pub fn used_ocr(&self) -> bool {
        matches!(self.source, PageSource::Ocr(_))
    }
}

/// Per-page text extraction with OCR fallback.
#[derive(Clone)]
pub struct TextExtractor {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<dyn OcrEngine>,
    policy: ExtractionPolicy,
}

impl TextExtractor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrEngine>,
        policy: ExtractionPolicy,
    ) -> Self {
        Self {
            rasterizer,
            ocr,
            policy,
        }
    }

    pub fn policy(&self) -> &ExtractionPolicy {
        &self.policy
    }

    /// Parses the document and returns a lazy, single-pass page iterator.
    ///
    /// Unparseable bytes fail here. After that, a page whose text layer cannot
    /// be read yields empty text, while any OCR or rasterizer failure is yielded
    /// once as an error and ends the iteration.
    pub fn extract<'a>(&'a self, pdf: &'a [u8]) -> Result<PageTexts<'a>, IngestError> {
        let document =
            Document::load_mem(pdf).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let pages = document.get_pages().into_iter().collect::<Vec<_>>();
        if pages.is_empty() {
            return Err(IngestError::PdfParse("pdf has no pages".to_string()));
        }

        Ok(PageTexts {
            extractor: self,
            pdf,
            document,
            pages: pages.into_iter(),
            finished: false,
        })
    }

    pub fn extract_all(&self, pdf: &[u8]) -> Result<Vec<ExtractedPage>, IngestError> {
        self.extract(pdf)?.collect()
    }

    fn extract_page(
        &self,
        pdf: &[u8],
        document: &Document,
        number: u32,
        page_id: ObjectId,
    ) -> Result<ExtractedPage, IngestError> {
        let layout = match read_page_layout(document, number, page_id) {
            Ok(layout) => layout,
            Err(error) => {
                warn!(page = number, %error, "text layer unreadable, page left empty");
                return Ok(ExtractedPage {
                    number,
                    text: String::new(),
                    source: PageSource::Unreadable(error.to_string()),
                });
            }
        };

        let direct = layout.text();
        let Some(reason) = ocr_reason(&direct, &self.policy) else {
            debug!(page = number, chars = direct.chars().count(), "kept text layer");
            return Ok(ExtractedPage {
                number,
                text: direct,
                source: PageSource::TextLayer(layout),
            });
        };

        debug!(page = number, ?reason, dpi = self.policy.dpi, "falling back to ocr");
        let image = self.rasterizer.rasterize(pdf, number, self.policy.dpi)?;
        let recognized = self.ocr.recognize(&image, &self.policy.ocr_language)?;

        Ok(ExtractedPage {
            number,
            text: recognized.text,
            source: PageSource::Ocr(OcrCapture {
                reason,
                words: recognized.words,
                image,
            }),
        })
    }
}

pub struct PageTexts<'a> {
    extractor: &'a TextExtractor,
    pdf: &'a [u8],
    document: Document,
    pages: std::vec::IntoIter<(u32, ObjectId)>,
    finished: bool,
}

impl Iterator for PageTexts<'_> {
    type Item = Result<ExtractedPage, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let (number, page_id) = self.pages.next()?;
        let page = self
            .extractor
            .extract_page(self.pdf, &self.document, number, page_id);
        if page.is_err() {
            self.finished = true;
        }
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, Some(self.pages.len()))
        }
    }
}

impl std::iter::FusedIterator for PageTexts<'_> {}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ocr::OcrPage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns a blank 40x40 page and records which pages were requested.
    #[derive(Default)]
    pub struct FakeRasterizer {
        pub pages: Mutex<Vec<u32>>,
        pub fail: bool,
    }

    impl PageRasterizer for FakeRasterizer {
        fn rasterize(&self, _pdf: &[u8], page: u32, _dpi: u32) -> Result<GrayImage, IngestError> {
            if self.fail {
                return Err(IngestError::OcrUnavailable("pdftoppm missing".to_string()));
            }
            self.pages.lock().expect("lock").push(page);
            GrayImage::new(40, 40, vec![255; 1600])
        }
    }

    pub struct FakeOcr {
        pub calls: AtomicUsize,
        pub text: String,
        pub words: Vec<OcrWord>,
    }

    impl FakeOcr {
        pub fn returning(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                text: text.to_string(),
                words: Vec::new(),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl OcrEngine for FakeOcr {
        fn recognize(&self, _image: &GrayImage, language: &str) -> Result<OcrPage, IngestError> {
            assert_eq!(language, DEFAULT_OCR_LANGUAGE);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OcrPage {
                text: self.text.clone(),
                words: self.words.clone(),
            })
        }
    }
}
