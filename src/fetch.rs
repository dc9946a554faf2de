//! # Image Fetching
//!
//! Resolves the image locator passed to `print_image_data` into a decoded
//! image. Any failure here surfaces as [`PrinterError::EncodingFailed`],
//! because no pixel matrix could be produced.
//!
//! | Locator | Source |
//! |---------|--------|
//! | `http://…`, `https://…` | downloaded with `reqwest` |
//! | `file:///path`, `/path`, `relative/path` | read from disk |

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use tracing::debug;

use crate::error::PrinterError;

/// Turns a locator into a decoded image.
#[async_trait]
pub trait ImageFetcher: Send + Sync + 'static {
    async fn fetch(&self, locator: &str) -> Result<DynamicImage, PrinterError>;
}

/// Default fetcher: HTTP(S) via reqwest, everything else from the filesystem.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, PrinterError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rollo/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PrinterError::EncodingFailed(format!("HTTP client error: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<DynamicImage, PrinterError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PrinterError::EncodingFailed(format!("Failed to download {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(PrinterError::EncodingFailed(format!(
                "Failed to download {}: HTTP {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PrinterError::EncodingFailed(format!("Failed to read image data: {}", e)))?;
        debug!(url, bytes = bytes.len(), "downloaded image");

        tokio::task::spawn_blocking(move || decode(&bytes)).await?
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, locator: &str) -> Result<DynamicImage, PrinterError> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return self.download(locator).await;
        }
        let path = PathBuf::from(locator.strip_prefix("file://").unwrap_or(locator));
        debug!(path = %path.display(), "loading image from disk");
        tokio::task::spawn_blocking(move || {
            image::open(&path).map_err(|e| {
                PrinterError::EncodingFailed(format!("Failed to load {}: {}", path.display(), e))
            })
        })
        .await?
    }
}

/// Decode an in-memory image of any format `image` understands.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PrinterError> {
    image::load_from_memory(bytes)
        .map_err(|e| PrinterError::EncodingFailed(format!("Failed to decode image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, Rgba([0, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let img = decode(&png_bytes()).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(b"not an image").unwrap_err();
        assert!(matches!(err, PrinterError::EncodingFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_from_file() {
        let path = std::env::temp_dir().join(format!("rollo-fetch-{}.png", std::process::id()));
        std::fs::write(&path, png_bytes()).unwrap();

        let fetcher = HttpImageFetcher::new().unwrap();
        let locator = format!("file://{}", path.display());
        let img = fetcher.fetch(&locator).await.unwrap();
        assert_eq!(img.width(), 3);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_encoding_failure() {
        let fetcher = HttpImageFetcher::new().unwrap();
        let err = fetcher.fetch("/nonexistent/rollo.png").await.unwrap_err();
        assert!(matches!(err, PrinterError::EncodingFailed(_)));
    }
}
