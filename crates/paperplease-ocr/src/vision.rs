//! Cloud Vision `images:annotate` client.
//!
//! Used in service-assisted mode, where per-block confidences drive the
//! handwriting check on dense signature crops.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use paperplease_core::{
    BoundingBox, OcrBlock, OcrError, OcrMode, OcrOutput, OcrWord, TextExtractor,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1";

/// Blocking HTTP client for the Vision annotate endpoint.
///
/// Called from worker threads, never from inside an async runtime.
pub struct VisionOcr {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

// ── Request shapes ──

#[derive(Serialize)]
struct AnnotateRequest<'a> {
    requests: [ImageRequest<'a>; 1],
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: ImageContent,
    features: [Feature<'a>; 1],
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

// ── Response shapes ──

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    paragraphs: Vec<Paragraph>,
}

#[derive(Deserialize)]
struct Paragraph {
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Word {
    bounding_box: Option<BoundingPoly>,
    #[serde(default)]
    symbols: Vec<Symbol>,
}

#[derive(Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

// Vision omits zero coordinates.
#[derive(Deserialize)]
struct Vertex {
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
}

#[derive(Deserialize)]
struct Symbol {
    #[serde(default)]
    text: String,
}

impl VisionOcr {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(DEFAULT_ENDPOINT.to_string(), api_key)
    }

    /// `base_url` should be like `https://vision.googleapis.com/v1` (no trailing slash).
    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request_body(image_bytes: &[u8], mode: OcrMode) -> AnnotateRequest<'static> {
        let kind = match mode {
            OcrMode::Text => "TEXT_DETECTION",
            OcrMode::Document => "DOCUMENT_TEXT_DETECTION",
        };
        AnnotateRequest {
            requests: [ImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image_bytes),
                },
                features: [Feature { kind }],
            }],
        }
    }
}

impl TextExtractor for VisionOcr {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn run_ocr(&self, image_bytes: &[u8], mode: OcrMode) -> Result<OcrOutput, OcrError> {
        let url = format!("{}/images:annotate", self.base_url);
        debug!(url = %url, ?mode, bytes = image_bytes.len(), "calling vision annotate");

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(image_bytes, mode))
            .send()
            .map_err(|e| OcrError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(OcrError::Backend(format!("vision returned {status}: {body}")));
        }

        let body: AnnotateResponse = resp
            .json()
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;
        let output = into_output(body)?;
        info!(
            blocks = output.blocks.len(),
            chars = output.full_text.len(),
            "vision annotate complete"
        );
        Ok(output)
    }
}

fn into_output(body: AnnotateResponse) -> Result<OcrOutput, OcrError> {
    let Some(response) = body.responses.into_iter().next() else {
        return Err(OcrError::InvalidResponse("no responses in annotate reply".into()));
    };
    if let Some(status) = response.error
        && !status.message.is_empty()
    {
        return Err(OcrError::Backend(status.message));
    }

    // No annotation means no text was found.
    let Some(annotation) = response.full_text_annotation else {
        return Ok(OcrOutput::default());
    };

    let blocks = annotation
        .pages
        .into_iter()
        .flat_map(|page| page.blocks)
        .map(|block| OcrBlock {
            confidence: block.confidence,
            words: block
                .paragraphs
                .into_iter()
                .flat_map(|p| p.words)
                .map(into_word)
                .collect(),
        })
        .collect();

    Ok(OcrOutput {
        full_text: annotation.text,
        blocks,
    })
}

fn into_word(word: Word) -> OcrWord {
    let text = word.symbols.into_iter().map(|s| s.text).collect();
    let bounding_box = word
        .bounding_box
        .and_then(|poly| {
            let xs = poly.vertices.iter().map(|v| v.x);
            let ys = poly.vertices.iter().map(|v| v.y);
            Some(BoundingBox {
                left: xs.clone().min()?,
                top: ys.clone().min()?,
                right: xs.max()?,
                bottom: ys.max()?,
            })
        })
        .unwrap_or_default();
    OcrWord { text, bounding_box }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<OcrOutput, OcrError> {
        into_output(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn maps_blocks_words_and_boxes() {
        let json = r#"{
            "responses": [{
                "fullTextAnnotation": {
                    "text": "by Koby H Technician\n",
                    "pages": [{
                        "blocks": [
                            {
                                "confidence": 0.97,
                                "paragraphs": [{
                                    "words": [
                                        {
                                            "boundingBox": {"vertices": [
                                                {"x": 10, "y": 5}, {"x": 30, "y": 5},
                                                {"x": 30, "y": 20}, {"x": 10, "y": 20}
                                            ]},
                                            "symbols": [{"text": "b"}, {"text": "y"}]
                                        },
                                        {
                                            "boundingBox": {"vertices": [
                                                {"y": 5}, {"x": 60, "y": 5},
                                                {"x": 60, "y": 20}, {"y": 20}
                                            ]},
                                            "symbols": [{"text": "K"}, {"text": "o"}, {"text": "b"}, {"text": "y"}]
                                        }
                                    ]
                                }]
                            },
                            {"confidence": 0.41, "paragraphs": []}
                        ]
                    }]
                }
            }]
        }"#;
        let output = parse(json).unwrap();
        assert_eq!(output.full_text, "by Koby H Technician\n");
        assert_eq!(output.blocks.len(), 2);
        assert_eq!(output.min_block_confidence(), Some(0.41));

        let words = &output.blocks[0].words;
        assert_eq!(words[0].text, "by");
        assert_eq!(
            words[0].bounding_box,
            BoundingBox { left: 10, top: 5, right: 30, bottom: 20 }
        );
        assert_eq!(words[1].text, "Koby");
        assert_eq!(words[1].bounding_box.left, 0);
    }

    #[test]
    fn empty_response_is_no_text() {
        let output = parse(r#"{"responses": [{}]}"#).unwrap();
        assert_eq!(output, OcrOutput::default());
    }

    #[test]
    fn missing_responses_is_invalid() {
        assert!(matches!(
            parse(r#"{"responses": []}"#),
            Err(OcrError::InvalidResponse(_))
        ));
        assert!(matches!(parse("{}"), Err(OcrError::InvalidResponse(_))));
    }

    #[test]
    fn error_message_is_backend_failure() {
        let json = r#"{"responses": [{"error": {"code": 3, "message": "Bad image data."}}]}"#;
        match parse(json) {
            Err(OcrError::Backend(msg)) => assert_eq!(msg, "Bad image data."),
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[test]
    fn request_body_shape() {
        let body = VisionOcr::request_body(b"\x89PNG", OcrMode::Document);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requests"][0]["image"]["content"], "iVBORw==");
        assert_eq!(
            json["requests"][0]["features"][0]["type"],
            "DOCUMENT_TEXT_DETECTION"
        );

        let body = VisionOcr::request_body(b"", OcrMode::Text);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["requests"][0]["features"][0]["type"], "TEXT_DETECTION");
    }

    #[test]
    fn trims_trailing_slash() {
        let ocr = VisionOcr::with_base_url("http://localhost:9000/v1/".into(), "k".into());
        assert_eq!(ocr.base_url, "http://localhost:9000/v1");
        assert_eq!(ocr.name(), "vision");
    }
}
