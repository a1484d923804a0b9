//! Local OCR through the `tesseract` executable.
//!
//! Image bytes go in on stdin and text comes back on stdout, so no temporary
//! files are written. Tesseract's plain-text output carries no block
//! confidences.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use paperplease_core::{OcrError, OcrMode, OcrOutput, TextExtractor};
use tracing::debug;

/// Tesseract CLI adapter.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    executable: PathBuf,
    language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

impl TesseractOcr {
    /// `tesseract` from `PATH`, English.
    pub fn new() -> Self {
        Self {
            executable: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn args(&self, mode: OcrMode) -> Vec<String> {
        // psm 7: treat the image as a single text line; psm 3: automatic page segmentation.
        let psm = match mode {
            OcrMode::Text => "7",
            OcrMode::Document => "3",
        };
        ["stdin", "stdout", "-l", &self.language, "--psm", psm]
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

impl TextExtractor for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn run_ocr(&self, image_bytes: &[u8], mode: OcrMode) -> Result<OcrOutput, OcrError> {
        let mut child = Command::new(&self.executable)
            .args(self.args(mode))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                OcrError::Unavailable(format!("{}: {e}", self.executable.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_bytes)
                .map_err(|e| OcrError::Backend(format!("writing image to tesseract: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| OcrError::Backend(format!("waiting for tesseract: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Backend(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(?mode, chars = text.len(), "tesseract finished");
        Ok(OcrOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_mode_args() {
        let ocr = TesseractOcr::new();
        assert_eq!(
            ocr.args(OcrMode::Text),
            ["stdin", "stdout", "-l", "eng", "--psm", "7"]
        );
    }

    #[test]
    fn document_mode_args_with_language() {
        let ocr = TesseractOcr::new().with_language("eng+spa");
        assert_eq!(
            ocr.args(OcrMode::Document),
            ["stdin", "stdout", "-l", "eng+spa", "--psm", "3"]
        );
    }

    #[test]
    fn missing_executable_is_unavailable() {
        let ocr = TesseractOcr::new().with_executable("/nonexistent/bin/tesseract");
        let result = ocr.run_ocr(&[], OcrMode::Text);
        assert!(matches!(result, Err(OcrError::Unavailable(_))));
    }

    #[test]
    fn executable_override() {
        let ocr = TesseractOcr::default().with_executable("/opt/tess/bin/tesseract");
        assert_eq!(ocr.executable(), Path::new("/opt/tess/bin/tesseract"));
        assert_eq!(ocr.name(), "tesseract");
    }
}
