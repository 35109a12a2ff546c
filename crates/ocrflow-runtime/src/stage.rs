//! Stage transforms
//!
//! Workers treat both transforms as opaque: bytes in, bytes or text out.

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::StageError;

/// Image cleanup ahead of OCR
#[async_trait]
pub trait Preprocessor: Send + Sync {
    async fn preprocess(&self, input: &[u8]) -> Result<Vec<u8>, StageError>;
}

/// Text extraction from a (preprocessed) image
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image: &[u8]) -> Result<String, StageError>;
}

const GAUSSIAN_3X3: [f32; 9] = [1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0];
const SHARPEN_3X3: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Grayscale, 3x3 Gaussian blur, sharpen, PNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous transform. Returns `input` unchanged when it is not a
    /// decodable image or the PNG encode fails.
    pub fn transform(input: &[u8]) -> Vec<u8> {
        let decoded = match image::load_from_memory(input) {
            Ok(img) => img,
            Err(e) => {
                debug!(error = %e, "Input is not a decodable image, passing through");
                return input.to_vec();
            }
        };

        let gray = decoded.to_luma8();
        let blurred = image::imageops::filter3x3(&gray, &GAUSSIAN_3X3[..]);
        let sharpened = image::imageops::filter3x3(&blurred, &SHARPEN_3X3[..]);

        let mut out = Cursor::new(Vec::new());
        match DynamicImage::ImageLuma8(sharpened).write_to(&mut out, ImageFormat::Png) {
            Ok(()) => out.into_inner(),
            Err(e) => {
                warn!(error = %e, "PNG encode failed, passing input through");
                input.to_vec()
            }
        }
    }
}

#[async_trait]
impl Preprocessor for ImagePreprocessor {
    async fn preprocess(&self, input: &[u8]) -> Result<Vec<u8>, StageError> {
        let input = input.to_vec();
        tokio::task::spawn_blocking(move || Self::transform(&input))
            .await
            .map_err(|e| StageError::Engine(format!("preprocess task failed: {}", e)))
    }
}

/// Tesseract invocation settings
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub binary: String,
    pub language: String,
    /// Page segmentation mode
    pub psm: String,
    /// OCR engine mode
    pub oem: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
            psm: "6".to_string(),
            oem: "3".to_string(),
        }
    }
}

impl OcrConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            binary: std::env::var("TESSERACT_BIN").unwrap_or(defaults.binary),
            language: std::env::var("TESSERACT_LANG").unwrap_or(defaults.language),
            psm: std::env::var("TESSERACT_PSM").unwrap_or(defaults.psm),
            oem: std::env::var("TESSERACT_OEM").unwrap_or(defaults.oem),
        }
    }
}

/// OCR through the `tesseract` CLI, image on stdin and text on stdout
#[derive(Debug, Clone, Default)]
pub struct TesseractOcr {
    config: OcrConfig,
}

impl TesseractOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    fn args(&self) -> Vec<&str> {
        vec![
            "stdin",
            "stdout",
            "-l",
            self.config.language.as_str(),
            "--psm",
            self.config.psm.as_str(),
            "--oem",
            self.config.oem.as_str(),
        ]
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract_text(&self, image: &[u8]) -> Result<String, StageError> {
        let spawned = Command::new(&self.config.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::EngineUnavailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.config.binary
                )));
            }
            Err(e) => return Err(StageError::Io(e)),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
