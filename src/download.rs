//! Category icon fetching
//!
//! Icons come from `http(s)://` URLs, `file://` URLs or plain paths and are
//! decoded to RGBA for the map engine.

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::engine::IconImage;

#[derive(Error, Debug)]
pub enum IconError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {0}")]
    Status(u16),
    #[error("Failed to read icon: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode icon: {0}")]
    Decode(#[from] image::ImageError),
}

pub fn decode_icon(bytes: &[u8]) -> Result<IconImage, IconError> {
    let rgba = image::load_from_memory(bytes)?.to_rgba8();
    Ok(IconImage {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}

pub async fn fetch_icon(url: &str, timeout: Duration) -> Result<IconImage, IconError> {
    let bytes = if url.starts_with("http://") || url.starts_with("https://") {
        tracing::debug!("Fetching icon from: {}", url);

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let response = client
            .get(url)
            .header("User-Agent", "PlaceClusters/0.1")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IconError::Status(response.status().as_u16()));
        }
        response.bytes().await?.to_vec()
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        tracing::debug!("Reading icon from: {}", path);
        tokio::fs::read(Path::new(path)).await?
    };

    tracing::debug!("Icon {} is {} bytes", url, bytes.len());
    decode_icon(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let icon = decode_icon(&png(3, 2)).unwrap();
        assert_eq!((icon.width, icon.height), (3, 2));
        assert_eq!(icon.rgba.len(), 3 * 2 * 4);
        assert_eq!(&icon.rgba[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_icon(b"not an image"), Err(IconError::Decode(_))));
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        std::fs::write(&path, png(4, 4)).unwrap();

        let plain = fetch_icon(path.to_str().unwrap(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(plain.width, 4);

        let url = format!("file://{}", path.display());
        let via_url = fetch_icon(&url, Duration::from_secs(1)).await.unwrap();
        assert_eq!(via_url, plain);

        let missing = dir.path().join("missing.png");
        let err = fetch_icon(missing.to_str().unwrap(), Duration::from_secs(1)).await;
        assert!(matches!(err, Err(IconError::Io(_))));
    }
}
