//! QR codes for printed bags

use image::{DynamicImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode, render::svg};
use std::io::Cursor;
use thiserror::Error;

/// Edge length of the rendered code in pixels.
const QR_SIZE: u32 = 512;

#[derive(Error, Debug)]
pub enum QrError {
    #[error("Failed to encode QR code: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("Failed to write PNG: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrFormat {
    Png,
    Svg,
}

impl QrFormat {
    /// Parse the `format` query parameter; missing means PNG.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("png") => Some(QrFormat::Png),
            Some("svg") => Some(QrFormat::Svg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            QrFormat::Png => "image/png",
            QrFormat::Svg => "image/svg+xml",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            QrFormat::Png => "png",
            QrFormat::Svg => "svg",
        }
    }
}

/// The URL a bag's QR code points to.
pub fn upload_url(base_url: &str, token: &str) -> String {
    format!("{}/upload?token={}", base_url.trim_end_matches('/'), token)
}

pub fn render(payload: &str, format: QrFormat) -> Result<Vec<u8>, QrError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)?;

    match format {
        QrFormat::Svg => Ok(code
            .render::<svg::Color>()
            .min_dimensions(QR_SIZE, QR_SIZE)
            .build()
            .into_bytes()),
        QrFormat::Png => {
            let image = code
                .render::<Luma<u8>>()
                .min_dimensions(QR_SIZE, QR_SIZE)
                .build();
            let mut bytes = Vec::new();
            DynamicImage::ImageLuma8(image)
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            Ok(bytes)
        }
    }
}

/// Make a bag label safe for a `Content-Disposition` filename.
pub fn sanitize_filename(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '"' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "bag".to_string()
    } else {
        cleaned
    }
}

/// `Content-Disposition` value for downloading a bag's QR code.
pub fn attachment_header(bag_name: &str, format: QrFormat) -> String {
    format!(
        "attachment; filename=\"qr_{}.{}\"",
        sanitize_filename(bag_name),
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(QrFormat::parse(None), Some(QrFormat::Png));
        assert_eq!(QrFormat::parse(Some("SVG")), Some(QrFormat::Svg));
        assert_eq!(QrFormat::parse(Some("gif")), None);
    }

    #[test]
    fn test_upload_url() {
        assert_eq!(
            upload_url("https://id100.example/", "abc"),
            "https://id100.example/upload?token=abc"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Rote \"Tasche\"\r\n"), "Rote _Tasche_");
        assert_eq!(sanitize_filename("a\\b/c"), "a_b_c");
        assert_eq!(sanitize_filename("   "), "bag");
    }

    #[test]
    fn test_render_svg_and_png() {
        let payload = upload_url("http://localhost:8080", "token-value");

        let svg = render(&payload, QrFormat::Svg).unwrap();
        assert!(String::from_utf8(svg).unwrap().contains("<svg"));

        let png = render(&payload, QrFormat::Png).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
