//! QR payloads — time-boxed pairing challenges rendered as PNG data URLs.

use std::io::Cursor;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;

/// Rendered side length floor, in pixels.
const MIN_QR_PIXELS: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum QrRenderError {
    #[error("qr encode failed: {0}")]
    Encode(String),
    #[error("png encode failed: {0}")]
    Png(#[from] image::ImageError),
}

/// The single outstanding QR of a session.
#[derive(Debug, Clone)]
pub struct QrPayload {
    /// Raw challenge string from the library.
    pub code: String,
    /// `data:image/png;base64,...`
    pub data_url: String,
    issued_at: Instant,
    ttl: Duration,
}

impl QrPayload {
    pub fn new(code: String, data_url: String, ttl: Duration) -> Self {
        Self {
            code,
            data_url,
            issued_at: Instant::now(),
            ttl,
        }
    }

    /// Render the challenge and stamp it with the current time.
    pub fn render(code: String, ttl: Duration) -> Result<Self, QrRenderError> {
        let data_url = render_data_url(&code)?;
        Ok(Self::new(code, data_url, ttl))
    }

    /// A payload older than its TTL is never handed out.
    pub fn is_valid(&self) -> bool {
        self.issued_at.elapsed() < self.ttl
    }

    pub fn expires_in(&self) -> Duration {
        self.ttl.saturating_sub(self.issued_at.elapsed())
    }
}

/// Encode `code` as a QR symbol and return it as a PNG data URL.
pub fn render_data_url(code: &str) -> Result<String, QrRenderError> {
    let symbol = QrCode::new(code.as_bytes()).map_err(|e| QrRenderError::Encode(e.to_string()))?;
    let image = symbol
        .render::<Luma<u8>>()
        .min_dimensions(MIN_QR_PIXELS, MIN_QR_PIXELS)
        .build();

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}
