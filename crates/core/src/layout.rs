//! Visual layout of native PDF pages.
//!
//! Walks each page's content stream and records every shown string as a
//! [`TextSpan`] carrying its effective font size, font name and box in
//! top-down page coordinates. Spans are grouped into lines (shared baseline)
//! and lines into blocks (one text object, split on large vertical gaps).
//!
//! Text is decoded through the font's `ToUnicode` CMap when present. Codes of
//! composite (CID) fonts without a mapping are emitted as `(cid:N)`
//! placeholders so garbled pages stay detectable downstream.

use crate::error::IngestError;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

const DEFAULT_PAGE_HEIGHT: f32 = 842.0;
/// Advance of one glyph, in text-space units, when real widths are not read.
const SINGLE_BYTE_ADVANCE: f32 = 0.5;
const DOUBLE_BYTE_ADVANCE: f32 = 1.0;
/// Baselines closer than this fraction of the font size share a line.
const SAME_LINE_TOLERANCE: f32 = 0.5;
/// A vertical gap above this multiple of the line size starts a new block.
const BLOCK_GAP_RATIO: f32 = 1.5;
/// A horizontal gap above this fraction of the font size inserts a space.
const WORD_GAP_RATIO: f32 = 0.25;
/// Form XObjects drawn inside forms are followed this deep.
const MAX_FORM_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x0: f32,
    pub top: f32,
    pub x1: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            top: self.top.min(other.top),
            x1: self.x1.max(other.x1),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub size: f32,
    pub font: String,
    pub bbox: BBox,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextLine {
    pub spans: Vec<TextSpan>,
}

impl TextLine {
    pub fn text(&self) -> String {
        let mut text = String::new();
        let mut previous: Option<&TextSpan> = None;
        for span in &self.spans {
            if let Some(last) = previous {
                let gap = span.bbox.x0 - last.bbox.x1;
                if gap > last.size * WORD_GAP_RATIO
                    && !text.ends_with(' ')
                    && !span.text.starts_with(' ')
                {
                    text.push(' ');
                }
            }
            text.push_str(&span.text);
            previous = Some(span);
        }
        text
    }

    pub fn max_size(&self) -> f32 {
        self.spans.iter().map(|span| span.size).fold(0.0, f32::max)
    }

    pub fn bbox(&self) -> BBox {
        self.spans
            .iter()
            .map(|span| span.bbox)
            .reduce(|left, right| left.union(&right))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextBlock {
    pub lines: Vec<TextLine>,
}

impl TextBlock {
    pub fn bbox(&self) -> BBox {
        self.lines
            .iter()
            .map(TextLine::bbox)
            .reduce(|left, right| left.union(&right))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageLayout {
    pub number: u32,
    pub height: f32,
    pub blocks: Vec<TextBlock>,
}

impl PageLayout {
    /// Plain text: one line per layout line, blocks separated by a newline.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| {
                block
                    .lines
                    .iter()
                    .map(TextLine::text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|block| !block.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn spans(&self) -> impl Iterator<Item = &TextSpan> {
        self.blocks
            .iter()
            .flat_map(|block| block.lines.iter())
            .flat_map(|line| line.spans.iter())
    }
}

/// Reads the layout of one page of an already parsed document.
pub fn read_page_layout(
    document: &Document,
    number: u32,
    page_id: ObjectId,
) -> Result<PageLayout, IngestError> {
    let page = document
        .get_dictionary(page_id)
        .map_err(|error| IngestError::PdfParse(format!("page {number}: {error}")))?;
    let resources = page_resources(document, page);
    let fonts = resources
        .map(|resources| resource_fonts(document, resources))
        .unwrap_or_default();
    let height = page_height(document, page);

    let content = document
        .get_page_content(page_id)
        .map_err(|error| IngestError::PdfParse(format!("page {number} content: {error}")))?;
    let content = Content::decode(&content)
        .map_err(|error| IngestError::PdfParse(format!("page {number} operators: {error}")))?;

    let mut walker = Walker::new(document, resources, fonts, height);
    walker.run(&content);

    Ok(PageLayout {
        number,
        height,
        blocks: walker.finish(),
    })
}

/// Reads all page layouts from raw bytes, skipping pages that fail to parse.
pub fn read_layouts(pdf: &[u8]) -> Result<Vec<PageLayout>, IngestError> {
    let document =
        Document::load_mem(pdf).map_err(|error| IngestError::PdfParse(error.to_string()))?;
    Ok(document
        .get_pages()
        .into_iter()
        .filter_map(|(number, page_id)| read_page_layout(&document, number, page_id).ok())
        .collect())
}

#[derive(Debug, Clone)]
struct FontInfo {
    name: String,
    composite: bool,
    cmap: Option<ToUnicode>,
}

impl FontInfo {
    fn code_bytes(&self) -> usize {
        match &self.cmap {
            Some(cmap) => cmap.code_bytes,
            None if self.composite => 2,
            None => 1,
        }
    }

    fn decode(&self, bytes: &[u8]) -> (String, usize) {
        let width = self.code_bytes();
        let mut text = String::new();
        let mut glyphs = 0usize;

        for code_bytes in bytes.chunks(width) {
            let code = code_bytes
                .iter()
                .fold(0u32, |code, byte| (code << 8) | *byte as u32);
            glyphs += 1;

            match self.cmap.as_ref().and_then(|cmap| cmap.map.get(&code)) {
                Some(mapped) => text.push_str(mapped),
                None if width > 1 || self.composite => text.push_str(&format!("(cid:{code})")),
                None => text.push(char::from(code as u8)),
            }
        }

        (text, glyphs)
    }

    fn advance(&self) -> f32 {
        if self.code_bytes() > 1 {
            DOUBLE_BYTE_ADVANCE
        } else {
            SINGLE_BYTE_ADVANCE
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ToUnicode {
    code_bytes: usize,
    map: HashMap<u32, String>,
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

fn hex_code(hex: &str) -> u32 {
    hex_bytes(hex)
        .iter()
        .fold(0u32, |code, byte| (code << 8) | *byte as u32)
}

fn utf16_hex(hex: &str) -> String {
    let units = hex_bytes(hex)
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => u16::from_be_bytes([*high, *low]),
            [single] => *single as u16,
            _ => 0,
        })
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

fn cmap_patterns() -> &'static [Regex; 6] {
    static PATTERNS: OnceLock<[Regex; 6]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("static cmap pattern");
        [
            compile(r"(?s)begincodespacerange(.*?)endcodespacerange"),
            compile(r"(?s)beginbfchar(.*?)endbfchar"),
            compile(r"(?s)beginbfrange(.*?)endbfrange"),
            compile(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]*)>"),
            compile(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]+)>\s*(?:<([0-9A-Fa-f]*)>|\[([^\]]*)\])"),
            compile(r"<([0-9A-Fa-f]*)>"),
        ]
    })
}

fn parse_to_unicode(source: &str, composite: bool) -> ToUnicode {
    let [codespace, bfchar, bfrange, pair, range, target] = cmap_patterns();
    let mut cmap = ToUnicode::default();

    let codespace_width = codespace
        .captures(source)
        .and_then(|section| pair.captures(section.get(1)?.as_str()))
        .and_then(|first| first.get(1))
        .map(|low| low.as_str().len() / 2);
    let mut source_width = None;

    for section in bfchar.captures_iter(source) {
        let Some(body) = section.get(1) else { continue };
        for entry in pair.captures_iter(body.as_str()) {
            let (Some(code), Some(target)) = (entry.get(1), entry.get(2)) else {
                continue;
            };
            source_width.get_or_insert(code.as_str().len() / 2);
            cmap.map
                .insert(hex_code(code.as_str()), utf16_hex(target.as_str()));
        }
    }

    for section in bfrange.captures_iter(source) {
        let Some(body) = section.get(1) else { continue };
        for entry in range.captures_iter(body.as_str()) {
            let (Some(low), Some(high)) = (entry.get(1), entry.get(2)) else {
                continue;
            };
            source_width.get_or_insert(low.as_str().len() / 2);
            let (low, high) = (hex_code(low.as_str()), hex_code(high.as_str()));
            if high < low || high - low > 0xFFFF {
                continue;
            }

            if let Some(start) = entry.get(3) {
                let mut units = hex_bytes(start.as_str())
                    .chunks(2)
                    .map(|pair| match pair {
                        [high, low] => u16::from_be_bytes([*high, *low]),
                        [single] => *single as u16,
                        _ => 0,
                    })
                    .collect::<Vec<_>>();
                for code in low..=high {
                    cmap.map.insert(code, String::from_utf16_lossy(&units));
                    if let Some(last) = units.last_mut() {
                        *last = last.wrapping_add(1);
                    }
                }
            } else if let Some(list) = entry.get(4) {
                let targets = target
                    .captures_iter(list.as_str())
                    .filter_map(|capture| capture.get(1))
                    .map(|hex| utf16_hex(hex.as_str()));
                for (code, mapped) in (low..=high).zip(targets) {
                    cmap.map.insert(code, mapped);
                }
            }
        }
    }

    cmap.code_bytes = codespace_width
        .or(source_width)
        .unwrap_or(if composite { 2 } else { 1 })
        .max(1);
    cmap
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    // bounded to break reference cycles
    for _ in 0..8 {
        match current {
            Object::Reference(id) => match document.get_object(*id) {
                Ok(next) => current = next,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

fn name_of(object: &Object) -> Option<String> {
    match object {
        Object::Name(name) => Some(String::from_utf8_lossy(name).to_string()),
        _ => None,
    }
}

fn number_of(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Looks a key up on the page, then on its `Parent` chain.
fn inherited<'a>(document: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..16 {
        if let Ok(value) = current.get(key) {
            return Some(resolve(document, value));
        }
        let parent = current.get(b"Parent").ok()?;
        current = match resolve(document, parent) {
            Object::Dictionary(dictionary) => dictionary,
            _ => return None,
        };
    }
    None
}

fn page_height(document: &Document, page: &Dictionary) -> f32 {
    let Some(Object::Array(media_box)) = inherited(document, page, b"MediaBox") else {
        return DEFAULT_PAGE_HEIGHT;
    };
    let values = media_box
        .iter()
        .filter_map(|value| number_of(resolve(document, value)))
        .collect::<Vec<_>>();
    match values.as_slice() {
        [_, y0, _, y1] if (y1 - y0).abs() > 0.0 => (y1 - y0).abs(),
        _ => DEFAULT_PAGE_HEIGHT,
    }
}

type FontMap = HashMap<Vec<u8>, Rc<FontInfo>>;

fn page_resources<'a>(document: &'a Document, page: &'a Dictionary) -> Option<&'a Dictionary> {
    match inherited(document, page, b"Resources") {
        Some(Object::Dictionary(resources)) => Some(resources),
        _ => None,
    }
}

fn resource_fonts(document: &Document, resources: &Dictionary) -> FontMap {
    let mut fonts = HashMap::new();
    let Some(Object::Dictionary(font_dictionary)) = resources
        .get(b"Font")
        .ok()
        .map(|value| resolve(document, value))
    else {
        return fonts;
    };

    for (key, value) in font_dictionary.iter() {
        let Object::Dictionary(font) = resolve(document, value) else {
            continue;
        };
        let name = font
            .get(b"BaseFont")
            .ok()
            .and_then(|value| name_of(resolve(document, value)))
            .unwrap_or_else(|| String::from_utf8_lossy(key).to_string());
        let composite = font
            .get(b"Subtype")
            .ok()
            .and_then(|value| name_of(resolve(document, value)))
            .is_some_and(|subtype| subtype == "Type0");
        let cmap = font
            .get(b"ToUnicode")
            .ok()
            .map(|value| resolve(document, value))
            .and_then(|value| match value {
                Object::Stream(stream) => Some(
                    stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone()),
                ),
                _ => None,
            })
            .map(|bytes| parse_to_unicode(&String::from_utf8_lossy(&bytes), composite));

        fonts.insert(
            key.clone(),
            Rc::new(FontInfo {
                name,
                composite,
                cmap,
            }),
        );
    }

    fonts
}

/// 2D affine matrix `[a b c d e f]` as used by PDF.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other`
    fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn vertical_scale(&self) -> f32 {
        self.0[2].hypot(self.0[3])
    }

    fn horizontal_scale(&self) -> f32 {
        self.0[0].hypot(self.0[1])
    }
}

struct Walker<'a> {
    document: &'a Document,
    resources: Option<&'a Dictionary>,
    fonts: Rc<FontMap>,
    form_depth: usize,
    page_height: f32,
    ctm: Matrix,
    saved: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    leading: f32,
    font: Option<Rc<FontInfo>>,
    font_size: f32,
    spans: Vec<TextSpan>,
    blocks: Vec<TextBlock>,
}

impl<'a> Walker<'a> {
    fn new(
        document: &'a Document,
        resources: Option<&'a Dictionary>,
        fonts: FontMap,
        page_height: f32,
    ) -> Self {
        Self {
            document,
            resources,
            fonts: Rc::new(fonts),
            form_depth: 0,
            page_height,
            ctm: Matrix::IDENTITY,
            saved: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            leading: 0.0,
            font: None,
            font_size: 0.0,
            spans: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn run(&mut self, content: &Content) {
        for operation in &content.operations {
            self.apply(&operation.operator, &operation.operands);
        }
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        let number = |index: usize| operands.get(index).and_then(number_of).unwrap_or(0.0);

        match operator {
            "q" => self.saved.push(self.ctm),
            "Q" => self.ctm = self.saved.pop().unwrap_or(Matrix::IDENTITY),
            "cm" if operands.len() == 6 => {
                let matrix = Matrix([
                    number(0),
                    number(1),
                    number(2),
                    number(3),
                    number(4),
                    number(5),
                ]);
                self.ctm = matrix.then(&self.ctm);
            }
            "BT" => {
                self.flush();
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "ET" => self.flush(),
            "Tf" => {
                self.font = operands.first().and_then(|name| match name {
                    Object::Name(name) => self.fonts.get(name).cloned(),
                    _ => None,
                });
                self.font_size = number(1);
            }
            "Do" => {
                if let Some(Object::Name(name)) = operands.first() {
                    self.draw_form(name);
                }
            }
            "TL" => self.leading = number(0),
            "Td" => self.move_line(number(0), number(1)),
            "TD" => {
                self.leading = -number(1);
                self.move_line(number(0), number(1));
            }
            "Tm" if operands.len() == 6 => {
                self.line_matrix = Matrix([
                    number(0),
                    number(1),
                    number(2),
                    number(3),
                    number(4),
                    number(5),
                ]);
                self.text_matrix = self.line_matrix;
            }
            "T*" => self.move_line(0.0, -self.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                self.move_line(0.0, -self.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => self.show(bytes),
                            other => {
                                if let Some(adjust) = number_of(other) {
                                    let shift = -adjust / 1000.0 * self.font_size;
                                    self.text_matrix =
                                        Matrix::translate(shift, 0.0).then(&self.text_matrix);
                                }
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn form_stream(&self, name: &[u8]) -> Option<&'a Stream> {
        let document = self.document;
        let xobjects = match resolve(document, self.resources?.get(b"XObject").ok()?) {
            Object::Dictionary(xobjects) => xobjects,
            _ => return None,
        };
        let stream = match resolve(document, xobjects.get(name).ok()?) {
            Object::Stream(stream) => stream,
            _ => return None,
        };
        let subtype = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|value| name_of(resolve(document, value)));
        (subtype.as_deref() == Some("Form")).then_some(stream)
    }

    /// Walks a Form XObject in place: its `/Matrix` is concatenated with the
    /// CTM and its own `/Resources` apply, falling back to the caller's.
    /// Image XObjects are ignored.
    fn draw_form(&mut self, name: &[u8]) {
        if self.form_depth >= MAX_FORM_DEPTH {
            return;
        }
        let Some(stream) = self.form_stream(name) else {
            return;
        };
        let bytes = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let Ok(content) = Content::decode(&bytes) else {
            return;
        };

        let document = self.document;
        let form_matrix = match stream.dict.get(b"Matrix").map(|value| resolve(document, value)) {
            Ok(Object::Array(values)) if values.len() == 6 => {
                let mut matrix = [0.0; 6];
                for (slot, value) in matrix.iter_mut().zip(values) {
                    *slot = number_of(resolve(document, value)).unwrap_or(0.0);
                }
                Matrix(matrix)
            }
            _ => Matrix::IDENTITY,
        };
        let form_resources = match stream.dict.get(b"Resources").map(|value| resolve(document, value)) {
            Ok(Object::Dictionary(resources)) => Some(resources),
            _ => None,
        };

        let saved_ctm = self.ctm;
        let saved_depth = self.saved.len();
        let saved_font = (self.font.clone(), self.font_size);
        let saved_resources = self.resources;
        let saved_fonts = Rc::clone(&self.fonts);

        self.ctm = form_matrix.then(&self.ctm);
        if let Some(resources) = form_resources {
            self.resources = Some(resources);
            self.fonts = Rc::new(resource_fonts(document, resources));
        }
        self.form_depth += 1;
        self.run(&content);
        self.form_depth -= 1;

        self.ctm = saved_ctm;
        self.saved.truncate(saved_depth);
        (self.font, self.font_size) = saved_font;
        self.resources = saved_resources;
        self.fonts = saved_fonts;
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show(&mut self, bytes: &[u8]) {
        let Some(font) = self.font.clone() else { return };
        let (text, glyphs) = font.decode(bytes);
        let advance = glyphs as f32 * font.advance() * self.font_size;

        let rendering = self.text_matrix.then(&self.ctm);
        let size = self.font_size * rendering.vertical_scale();
        let width = advance * rendering.horizontal_scale();
        let [.., x, y] = rendering.0;
        let top = self.page_height - (y + size);

        self.text_matrix = Matrix::translate(advance, 0.0).then(&self.text_matrix);

        if text.is_empty() {
            return;
        }
        self.spans.push(TextSpan {
            text,
            size,
            font: font.name.clone(),
            bbox: BBox {
                x0: x,
                top,
                x1: x + width,
                bottom: top + size,
            },
        });
    }

    /// Closes the current text object into one or more blocks.
    fn flush(&mut self) {
        if self.spans.is_empty() {
            return;
        }

        let mut block = TextBlock::default();
        let mut line = TextLine::default();
        for span in std::mem::take(&mut self.spans) {
            let starts_new_line = line.spans.last().is_some_and(|last| {
                let tolerance = last.size.max(span.size) * SAME_LINE_TOLERANCE;
                (last.bbox.bottom - span.bbox.bottom).abs() > tolerance
            });

            if starts_new_line {
                let finished = std::mem::take(&mut line);
                let gap = span.bbox.top - finished.bbox().bottom;
                let line_size = finished.max_size().max(span.size);
                block.lines.push(finished);
                if gap > line_size * BLOCK_GAP_RATIO {
                    self.blocks.push(std::mem::take(&mut block));
                }
            }
            line.spans.push(span);
        }
        block.lines.push(line);
        self.blocks.push(block);
    }

    fn finish(mut self) -> Vec<TextBlock> {
        self.flush();
        self.blocks
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic PDFs built with lopdf for tests across the crate.

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream, StringFormat};

    /// One shown string: font resource name, size, position and UTF-8 text.
    #[derive(Debug, Clone)]
    pub struct Show {
        pub font: &'static str,
        pub size: f32,
        pub x: f32,
        pub y: f32,
        pub text: String,
    }

    impl Show {
        pub fn new(font: &'static str, size: f32, x: f32, y: f32, text: &str) -> Self {
            Self {
                font,
                size,
                x,
                y,
                text: text.to_string(),
            }
        }
    }

    pub enum FixturePage {
        /// Each inner vec is one `BT … ET` text object.
        Text(Vec<Vec<Show>>),
        /// No text operators at all, like a scanned page.
        ImageOnly,
        /// Same as `Text`, but drawn through a Form XObject `/Fm1` placed with
        /// `/Matrix [1 0 0 1 0 dy]` and no resources of its own.
        Form { dy: f32, objects: Vec<Vec<Show>> },
    }

    fn text_operations(objects: &[Vec<Show>], code_of: &dyn Fn(char) -> usize) -> Vec<Operation> {
        let mut operations = Vec::new();
        for object in objects {
            operations.push(Operation::new("BT", vec![]));
            for show in object {
                let bytes = if show.font == "F4" {
                    show.text.bytes().collect::<Vec<u8>>()
                } else {
                    show.text
                        .chars()
                        .flat_map(|ch| (code_of(ch) as u16).to_be_bytes())
                        .collect()
                };
                operations.push(Operation::new(
                    "Tf",
                    vec![
                        Object::Name(show.font.as_bytes().to_vec()),
                        Object::Real(show.size),
                    ],
                ));
                operations.push(Operation::new(
                    "Tm",
                    vec![
                        1.into(),
                        0.into(),
                        0.into(),
                        1.into(),
                        Object::Real(show.x),
                        Object::Real(show.y),
                    ],
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(bytes, StringFormat::Hexadecimal)],
                ));
            }
            operations.push(Operation::new("ET", vec![]));
        }
        operations
    }

    /// Fonts: `F1` = Type0 "NanumGothic" with a ToUnicode covering every
    /// character used, `F2` = Type0 "NanumGothic-Bold" (same mapping),
    /// `F3` = Type0 "Batang" without ToUnicode, `F4` = Type1 "Helvetica".
    pub fn build_pdf(pages: Vec<FixturePage>) -> Vec<u8> {
        let mut alphabet: Vec<char> = pages
            .iter()
            .flat_map(|page| match page {
                FixturePage::Text(objects) | FixturePage::Form { objects, .. } => objects
                    .iter()
                    .flatten()
                    .flat_map(|show| show.text.chars().collect::<Vec<_>>())
                    .collect::<Vec<_>>(),
                FixturePage::ImageOnly => Vec::new(),
            })
            .collect();
        alphabet.sort_unstable();
        alphabet.dedup();
        let code_of = |ch: char| alphabet.iter().position(|known| *known == ch).unwrap_or(0) + 1;

        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
        );
        cmap.push_str(&format!("{} beginbfchar\n", alphabet.len()));
        for (index, ch) in alphabet.iter().enumerate() {
            let mut units = [0u16; 2];
            let encoded = ch.encode_utf16(&mut units);
            let target = encoded
                .iter()
                .map(|unit| format!("{unit:04X}"))
                .collect::<String>();
            cmap.push_str(&format!("<{:04X}> <{target}>\n", index + 1));
        }
        cmap.push_str("endbfchar\nendcmap\nend\nend\n");

        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let to_unicode = document.add_object(Stream::new(dictionary! {}, cmap.into_bytes()));
        let composite = |document: &mut Document, base: &str, with_cmap: bool| {
            let mut font = dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => base,
                "Encoding" => "Identity-H",
            };
            if with_cmap {
                font.set("ToUnicode", to_unicode);
            }
            document.add_object(font)
        };
        let regular = composite(&mut document, "NanumGothic", true);
        let bold = composite(&mut document, "NanumGothic-Bold", true);
        let unmapped = composite(&mut document, "Batang", false);
        let latin = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources = document.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
                "F3" => unmapped,
                "F4" => latin,
            },
        });

        let mut kids = Vec::new();
        for page in &pages {
            let mut page_dictionary = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
            };
            let operations = match page {
                FixturePage::Text(objects) => text_operations(objects, &code_of),
                FixturePage::ImageOnly => Vec::new(),
                FixturePage::Form { dy, objects } => {
                    let form = Content {
                        operations: text_operations(objects, &code_of),
                    };
                    let form_id = document.add_object(Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Form",
                            "BBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                            "Matrix" => vec![
                                1.into(),
                                0.into(),
                                0.into(),
                                1.into(),
                                0.into(),
                                Object::Real(*dy),
                            ],
                        },
                        form.encode().unwrap_or_default(),
                    ));
                    page_dictionary.set(
                        "Resources",
                        dictionary! {
                            "Font" => dictionary! { "F1" => regular, "F2" => bold },
                            "XObject" => dictionary! { "Fm1" => form_id },
                        },
                    );
                    vec![
                        Operation::new("q", vec![]),
                        Operation::new("Do", vec![Object::Name(b"Fm1".to_vec())]),
                        Operation::new("Q", vec![]),
                    ]
                }
            };
            let content = Content { operations };
            let content_id = document.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap_or_default(),
            ));
            page_dictionary.set("Contents", content_id);
            kids.push(Object::from(document.add_object(page_dictionary)));
        }

        let count = kids.len() as i64;
        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog);

        let mut bytes = Vec::new();
        document
            .save_to(&mut bytes)
            .expect("fixture pdf should serialize");
        bytes
    }
}
