use crate::error::IngestError;
use crate::process::{run_tool, ToolError};
use crate::raster::GrayImage;
use crate::traits::OcrEngine;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Word-level OCR token with its layout identifiers and pixel box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    /// 0-100; negative when the engine reports none.
    pub confidence: f32,
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
    pub left: i64,
    pub top: i64,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPage {
    pub text: String,
    pub words: Vec<OcrWord>,
}

impl OcrPage {
    /// Rebuilds page text from word tokens: words on a line joined by spaces,
    /// a blank line between paragraphs.
    pub fn from_words(words: Vec<OcrWord>) -> Self {
        let mut text = String::new();
        let mut previous: Option<(u32, u32, u32)> = None;

        for word in &words {
            let token = word.text.trim();
            if token.is_empty() {
                continue;
            }
            let key = (word.block, word.paragraph, word.line);
            match previous {
                Some(last) if last == key => text.push(' '),
                Some((block, paragraph, _)) if block == key.0 && paragraph == key.1 => {
                    text.push('\n')
                }
                Some(_) => text.push_str("\n\n"),
                None => {}
            }
            text.push_str(token);
            previous = Some(key);
        }

        Self { text, words }
    }
}

/// Parses tesseract's `tsv` output, keeping word rows (level 5) only.
pub fn parse_tesseract_tsv(tsv: &str) -> Result<Vec<OcrWord>, IngestError> {
    let mut words = Vec::new();

    for (row, line) in tsv.lines().enumerate() {
        if row == 0 && line.starts_with("level") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.splitn(12, '\t').collect();
        if columns.len() < 11 {
            return Err(IngestError::OcrFailed(format!(
                "tsv row {row} has {} columns",
                columns.len()
            )));
        }
        if columns[0] != "5" {
            continue;
        }

        let int = |index: usize| -> Result<i64, IngestError> {
            columns[index].trim().parse::<i64>().map_err(|_| {
                IngestError::OcrFailed(format!("tsv row {row} column {index}: {}", columns[index]))
            })
        };

        words.push(OcrWord {
            text: columns.get(11).map(|text| text.to_string()).unwrap_or_default(),
            confidence: columns[10].trim().parse::<f32>().unwrap_or(-1.0),
            block: int(2)? as u32,
            paragraph: int(3)? as u32,
            line: int(4)? as u32,
            left: int(6)?,
            top: int(7)?,
            width: int(8)?,
            height: int(9)?,
        });
    }

    Ok(words)
}

/// Runs the local `tesseract` binary, one process per page.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub timeout: Duration,
    pub dpi: u32,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            timeout: Duration::from_secs(120),
            dpi: crate::extractor::DEFAULT_OCR_DPI,
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &GrayImage, language: &str) -> Result<OcrPage, IngestError> {
        let scratch = tempfile::tempdir()?;
        let input = scratch.path().join("page.pgm");
        std::fs::write(&input, image.to_pgm())?;
        let output_base = scratch.path().join("page");

        let mut command = Command::new(&self.binary);
        command
            .arg(&input)
            .arg(&output_base)
            .arg("-l")
            .arg(language)
            .arg("--dpi")
            .arg(self.dpi.to_string())
            .arg("tsv");

        run_tool(&mut command, scratch.path(), self.timeout).map_err(|error| match error {
            ToolError::NotFound(details) => IngestError::OcrUnavailable(details),
            ToolError::TimedOut(after) => IngestError::OcrUnavailable(format!(
                "tesseract timed out after {}s",
                after.as_secs()
            )),
            ToolError::Failed(details) => IngestError::OcrFailed(details),
        })?;

        let tsv = std::fs::read_to_string(output_base.with_extension("tsv"))?;
        Ok(OcrPage::from_words(parse_tesseract_tsv(&tsv)?))
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct RemoteOcrRequest<'a> {
    image_base64: String,
    image_format: &'static str,
    language: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteOcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    pages: Option<Vec<RemoteOcrPage>>,
    #[serde(default)]
    words: Option<Vec<OcrWord>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// Posts a page image to an HTTP OCR service (multimodal model or hosted OCR).
///
/// The blocking client is built per call, on the blocking worker thread that
/// runs extraction; it must never be created or dropped inside the async runtime.
#[derive(Debug, Clone)]
pub struct RemoteOcrEngine {
    config: OcrEndpointConfig,
}

impl RemoteOcrEngine {
    pub fn new(config: OcrEndpointConfig) -> Result<Self, IngestError> {
        if config.endpoint.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "ocr endpoint must not be empty".to_string(),
            ));
        }
        url::Url::parse(&config.endpoint)
            .map_err(|error| IngestError::InvalidArgument(format!("ocr endpoint: {error}")))?;
        Ok(Self { config })
    }
}

impl OcrEngine for RemoteOcrEngine {
    fn recognize(&self, image: &GrayImage, language: &str) -> Result<OcrPage, IngestError> {
        let payload = RemoteOcrRequest {
            image_base64: STANDARD.encode(image.to_pgm()),
            image_format: "pgm",
            language,
        };

        let client = Client::builder().timeout(self.config.timeout).build()?;
        let mut request = client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().map_err(|error| {
            if error.is_connect() || error.is_timeout() {
                IngestError::OcrUnavailable(format!("{}: {error}", self.config.endpoint))
            } else {
                IngestError::Http(error)
            }
        })?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "ocr request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: RemoteOcrResponse = response.json()?;
        payload_to_page(payload)
    }
}

fn payload_to_page(payload: RemoteOcrResponse) -> Result<OcrPage, IngestError> {
    let words = payload.words.unwrap_or_default();

    if let Some(text) = payload.text.filter(|text| !text.trim().is_empty()) {
        return Ok(OcrPage {
            text: text.trim().to_string(),
            words,
        });
    }

    if let Some(pages) = payload.pages {
        let text = pages
            .into_iter()
            .filter_map(|page| page.text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            return Ok(OcrPage { text, words });
        }
    }

    if !words.is_empty() {
        return Ok(OcrPage::from_words(words));
    }

    Ok(OcrPage::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t2480\t3508\t-1\t
4\t1\t1\t1\t1\t0\t100\t80\t600\t90\t-1\t
5\t1\t1\t1\t1\t1\t100\t80\t280\t90\t91.5\t김치
5\t1\t1\t1\t1\t2\t400\t82\t300\t88\t88.0\t찌개
5\t1\t1\t1\t2\t1\t100\t200\t200\t40\t75.2\t재료
5\t1\t2\t1\t1\t1\t100\t900\t200\t40\t12.0\t잡음
";

    #[test]
    fn tsv_keeps_word_rows() {
        let words = parse_tesseract_tsv(TSV).expect("tsv should parse");
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].text, "김치");
        assert_eq!((words[0].block, words[0].paragraph, words[0].line), (1, 1, 1));
        assert_eq!(words[1].top, 82);
        assert!((words[3].confidence - 12.0).abs() < f32::EPSILON);
    }

    #[test]
    fn page_text_is_rebuilt_from_lines_and_blocks() {
        let page = OcrPage::from_words(parse_tesseract_tsv(TSV).expect("tsv should parse"));
        assert_eq!(page.text, "김치 찌개\n재료\n\n잡음");
    }

    #[test]
    fn short_rows_are_rejected() {
        assert!(parse_tesseract_tsv("5\t1\t1\n").is_err());
    }

    #[test]
    fn remote_payload_prefers_text_then_pages() {
        let page = payload_to_page(RemoteOcrResponse {
            text: Some("  ".to_string()),
            pages: Some(vec![
                RemoteOcrPage {
                    text: Some("첫째".to_string()),
                },
                RemoteOcrPage { text: None },
                RemoteOcrPage {
                    text: Some("둘째\n".to_string()),
                },
            ]),
            words: None,
        })
        .expect("payload should convert");

        assert_eq!(page.text, "첫째\n둘째");
        assert!(page.words.is_empty());
    }
}
