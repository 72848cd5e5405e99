//! Title candidates from visual layout.
//!
//! Recipe manuals print dish names large, bold or vertically. Native pages are
//! scored from font metadata; scanned pages from OCR line boxes. Both return
//! candidates for an optional food-name filter downstream.

use crate::extractor::contains_hangul;
use crate::layout::PageLayout;
use crate::ocr::OcrWord;
use crate::raster::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Lines at least this multiple of the document's mean span size count as large.
pub const LARGE_FONT_RATIO: f32 = 1.3;
/// A block taller than this multiple of its width holds vertical text.
pub const VERTICAL_ASPECT_RATIO: f32 = 1.5;
/// Mean size assumed when a document has no spans at all.
pub const FALLBACK_FONT_SIZE: f32 = 12.0;
/// Tesseract word confidence (0-100) below which tokens are dropped.
pub const OCR_MIN_CONFIDENCE: f32 = 40.0;
/// OCR lines shorter than this fraction of the tallest line are body text.
pub const OCR_MIN_HEIGHT_RATIO: f32 = 0.6;
/// Pixel offset (at 300 dpi) below which OCR lines are not considered titles.
pub const OCR_TOP_LIMIT: i64 = 800;
const BOLD_FONT_MARKERS: [&str; 3] = ["bold", "black", "heavy"];

#[derive(Debug, Clone)]
pub struct TitleDetectionConfig {
    pub large_font_ratio: f32,
    pub vertical_aspect_ratio: f32,
    pub layout_min_chars: usize,
    pub layout_max_chars: usize,
    pub ocr_min_confidence: f32,
    pub ocr_min_height_ratio: f32,
    pub ocr_top_limit: i64,
    pub ocr_min_chars: usize,
    pub ocr_max_chars: usize,
    /// Measure ink density of each OCR line as a boldness proxy.
    pub ocr_boldness: bool,
}

impl Default for TitleDetectionConfig {
    fn default() -> Self {
        Self {
            large_font_ratio: LARGE_FONT_RATIO,
            vertical_aspect_ratio: VERTICAL_ASPECT_RATIO,
            layout_min_chars: 2,
            layout_max_chars: 50,
            ocr_min_confidence: OCR_MIN_CONFIDENCE,
            ocr_min_height_ratio: OCR_MIN_HEIGHT_RATIO,
            ocr_top_limit: OCR_TOP_LIMIT,
            ocr_min_chars: 2,
            ocr_max_chars: 40,
            ocr_boldness: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleCandidate {
    pub text: String,
    /// Max font size (vector layout) or line height in pixels (OCR).
    pub size: f32,
    pub is_bold: bool,
    pub is_vertical: bool,
    pub is_large: bool,
    pub top: f32,
    pub boldness: Option<f32>,
    pub page: u32,
}

impl TitleCandidate {
    /// 3 for large, 2 for bold, 1 for vertical.
    pub fn score(&self) -> u8 {
        3 * self.is_large as u8 + 2 * self.is_bold as u8 + self.is_vertical as u8
    }
}

fn is_pure_number(text: &str) -> bool {
    let compact: String = text.chars().filter(|ch| *ch != ' ' && *ch != '.').collect();
    !compact.is_empty() && compact.chars().all(|ch| ch.is_ascii_digit())
}

fn is_bold_font(font: &str) -> bool {
    let lowered = font.to_lowercase();
    BOLD_FONT_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, Default)]
pub struct LayoutTitleDetector {
    config: TitleDetectionConfig,
}

impl LayoutTitleDetector {
    pub fn new(config: TitleDetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TitleDetectionConfig {
        &self.config
    }

    /// Vector-layout strategy over every native page of one document.
    ///
    /// The size threshold comes from the mean over all spans of all pages, so
    /// pass the whole document in one call.
    pub fn detect_from_layout(&self, pages: &[PageLayout]) -> Vec<TitleCandidate> {
        let sizes = pages
            .iter()
            .flat_map(|page| page.spans().map(|span| span.size))
            .collect::<Vec<_>>();
        let mean = if sizes.is_empty() {
            FALLBACK_FONT_SIZE
        } else {
            sizes.iter().sum::<f32>() / sizes.len() as f32
        };
        let threshold = mean * self.config.large_font_ratio;

        let mut candidates = Vec::new();
        for page in pages {
            for block in &page.blocks {
                let bbox = block.bbox();
                let is_vertical = bbox.height() > bbox.width() * self.config.vertical_aspect_ratio;

                for line in &block.lines {
                    let text = line.text().trim().to_string();
                    if text.is_empty() || !contains_hangul(&text) {
                        continue;
                    }
                    let length = text.chars().count();
                    if length < self.config.layout_min_chars
                        || length > self.config.layout_max_chars
                        || is_pure_number(&text)
                    {
                        continue;
                    }

                    let size = line.max_size();
                    let is_large = size >= threshold;
                    let is_bold = line.spans.iter().any(|span| is_bold_font(&span.font));
                    if !(is_large || is_bold || is_vertical) {
                        continue;
                    }

                    candidates.push(TitleCandidate {
                        text,
                        size,
                        is_bold,
                        is_vertical,
                        is_large,
                        top: line.bbox().top,
                        boldness: None,
                        page: page.number,
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.text.clone()));
        // stable: ties keep first-seen order
        candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.score()));
        candidates
    }

    /// OCR-layout strategy for one scanned page.
    ///
    /// `image` is the raster the words were recognized on; when given (and
    /// enabled) the dark-pixel ratio of each line ranks ahead of height.
    pub fn detect_from_ocr(
        &self,
        page: u32,
        words: &[OcrWord],
        image: Option<&GrayImage>,
    ) -> Vec<TitleCandidate> {
        let lines = group_ocr_lines(words, self.config.ocr_min_confidence);
        let Some(max_height) = lines.iter().map(|line| line.height()).max() else {
            return Vec::new();
        };
        let image = image.filter(|_| self.config.ocr_boldness);

        let mut candidates = Vec::new();
        for line in &lines {
            let text = line.text.trim().to_string();
            let length = text.chars().count();
            if length < self.config.ocr_min_chars || length > self.config.ocr_max_chars {
                continue;
            }
            if !contains_hangul(&text) {
                continue;
            }
            let height = line.height();
            if (height as f32) < max_height as f32 * self.config.ocr_min_height_ratio {
                continue;
            }
            if line.top > self.config.ocr_top_limit {
                continue;
            }

            let boldness = image.and_then(|image| {
                image
                    .crop(line.left, line.top, line.right - line.left, height)
                    .map(|region| region.dark_ratio())
            });

            candidates.push(TitleCandidate {
                text,
                size: height as f32,
                is_bold: false,
                is_vertical: false,
                is_large: true,
                top: line.top as f32,
                boldness,
                page,
            });
        }

        candidates.sort_by(|left, right| {
            let boldness = |candidate: &TitleCandidate| candidate.boldness.unwrap_or(0.0);
            boldness(right)
                .total_cmp(&boldness(left))
                .then(right.size.total_cmp(&left.size))
                .then(left.top.total_cmp(&right.top))
        });

        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.text.clone()));
        candidates
    }
}

#[derive(Debug, Clone)]
struct OcrLine {
    text: String,
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

impl OcrLine {
    fn height(&self) -> i64 {
        self.bottom - self.top
    }
}

/// Merges confident words sharing (block, paragraph, line), in first-seen order.
fn group_ocr_lines(words: &[OcrWord], min_confidence: f32) -> Vec<OcrLine> {
    let mut order = Vec::new();
    let mut lines: HashMap<(u32, u32, u32), OcrLine> = HashMap::new();

    for word in words {
        let text = word.text.trim();
        if text.is_empty() {
            continue;
        }
        // negative confidence means "not reported", as for tesseract layout rows
        if word.confidence >= 0.0 && word.confidence < min_confidence {
            continue;
        }

        let key = (word.block, word.paragraph, word.line);
        let right = word.left + word.width;
        let bottom = word.top + word.height;
        match lines.get_mut(&key) {
            Some(line) => {
                line.text.push(' ');
                line.text.push_str(text);
                line.left = line.left.min(word.left);
                line.top = line.top.min(word.top);
                line.right = line.right.max(right);
                line.bottom = line.bottom.max(bottom);
            }
            None => {
                order.push(key);
                lines.insert(
                    key,
                    OcrLine {
                        text: text.to_string(),
                        left: word.left,
                        top: word.top,
                        right,
                        bottom,
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| lines.remove(&key))
        .collect()
}

/// Candidate texts in rank order with duplicates removed.
pub fn candidate_texts(candidates: &[TitleCandidate]) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|candidate| seen.insert(candidate.text.as_str()))
        .map(|candidate| candidate.text.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BBox, TextBlock, TextLine, TextSpan};

    fn span(text: &str, size: f32, font: &str, x: f32, top: f32) -> TextSpan {
        let width = text.chars().count() as f32 * size;
        TextSpan {
            text: text.to_string(),
            size,
            font: font.to_string(),
            bbox: BBox {
                x0: x,
                top,
                x1: x + width,
                bottom: top + size,
            },
        }
    }

    fn block(spans: Vec<TextSpan>) -> TextBlock {
        TextBlock {
            lines: spans
                .into_iter()
                .map(|span| TextLine { spans: vec![span] })
                .collect(),
        }
    }

    fn word(text: &str, conf: f32, line: u32, left: i64, top: i64, height: i64) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            confidence: conf,
            block: 1,
            paragraph: 1,
            line,
            left,
            top,
            width: 100,
            height,
        }
    }

    #[test]
    fn layout_candidates_are_scored_and_deduplicated() {
        let page = PageLayout {
            number: 1,
            height: 842.0,
            blocks: vec![
                block(vec![
                    span("재료 준비", 10.0, "NanumGothic-Bold", 72.0, 100.0),
                    span("김치찌개", 24.0, "NanumGothic", 72.0, 130.0),
                    span("김치찌개", 24.0, "NanumGothic", 72.0, 400.0),
                    span("돼지고기 200g을 넣고 끓인다", 10.0, "NanumGothic", 72.0, 170.0),
                    span("2024", 30.0, "NanumGothic", 72.0, 190.0),
                    span("Oven Manual", 30.0, "Helvetica-Bold", 72.0, 230.0),
                    span("볶음밥", 26.0, "NanumGothic-Heavy", 72.0, 270.0),
                ]),
                block(vec![span("세", 10.0, "NanumGothic", 500.0, 300.0)]),
            ],
        };
        let mut tall = page.clone();
        tall.blocks[1] = TextBlock {
            lines: vec![
                TextLine {
                    spans: vec![span("세로", 10.0, "NanumGothic", 500.0, 300.0)],
                },
                TextLine {
                    spans: vec![span("글씨", 10.0, "NanumGothic", 500.0, 312.0)],
                },
                TextLine {
                    spans: vec![span("제목", 10.0, "NanumGothic", 500.0, 324.0)],
                },
            ],
        };

        let detector = LayoutTitleDetector::default();
        let texts = detector
            .detect_from_layout(&[tall])
            .into_iter()
            .map(|candidate| (candidate.text.clone(), candidate.score()))
            .collect::<Vec<_>>();

        assert_eq!(
            texts,
            vec![
                ("볶음밥".to_string(), 5),
                ("김치찌개".to_string(), 3),
                ("재료 준비".to_string(), 2),
                ("세로".to_string(), 1),
                ("글씨".to_string(), 1),
                ("제목".to_string(), 1),
            ]
        );
    }

    #[test]
    fn pure_numbers_are_not_titles() {
        assert!(is_pure_number("1 2.5"));
        assert!(!is_pure_number("10인분"));
        assert!(!is_pure_number(" . "));
    }

    #[test]
    fn ocr_lines_are_grouped_and_filtered() {
        let words = vec![
            word("김치", 91.0, 1, 100, 120, 90),
            word("찌개", 88.0, 1, 220, 118, 92),
            word("재료와", 80.0, 2, 100, 300, 40),
            word("분량", 80.0, 2, 220, 300, 40),
            word("된장국", 35.0, 3, 100, 400, 95),
            word("불고기", 90.0, 4, 100, 900, 95),
            word("Recipe", 95.0, 5, 100, 200, 95),
            word("떡볶이", 90.0, 6, 100, 500, 60),
        ];

        let detector = LayoutTitleDetector::default();
        let texts = detector
            .detect_from_ocr(2, &words, None)
            .into_iter()
            .map(|candidate| candidate.text)
            .collect::<Vec<_>>();

        // tallest first, then higher on the page
        assert_eq!(texts, vec!["김치 찌개".to_string(), "떡볶이".to_string()]);
    }

    #[test]
    fn ocr_boldness_ranks_heavier_lines_first() {
        let mut pixels = vec![255u8; 200 * 200];
        // line 1 (rows 10..40) lightly inked, line 2 (rows 100..130) heavily inked
        for row in 10..40 {
            for col in 0..10 {
                pixels[row * 200 + col] = 0;
            }
        }
        for row in 100..130 {
            for col in 0..60 {
                pixels[row * 200 + col] = 0;
            }
        }
        let image = GrayImage::new(200, 200, pixels).expect("image");
        let words = vec![
            word("가벼운 제목", 90.0, 1, 0, 10, 30),
            word("굵은 제목", 90.0, 2, 0, 100, 30),
        ];

        let detector = LayoutTitleDetector::default();
        let ranked = detector.detect_from_ocr(1, &words, Some(&image));
        assert_eq!(ranked[0].text, "굵은 제목");
        assert!(ranked[0].boldness.unwrap_or(0.0) > ranked[1].boldness.unwrap_or(0.0));
    }

    #[test]
    fn empty_ocr_yields_nothing() {
        let detector = LayoutTitleDetector::default();
        assert!(detector.detect_from_ocr(1, &[], None).is_empty());
    }
}
