//! Source image input
//!
//! The design tool leaves its last flat export in the local store as a data
//! URL. Raw encoded bytes (PNG/JPEG) are accepted as well, for files handed
//! in on the command line or posted to the API.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbaImage;
use tracing::{debug, info};

use crate::error::SourceError;
use crate::store::KeyValueStore;

/// Key under which the design tool stores its last export
pub const EXPORT_KEY: &str = "roman_shield_last_export";

/// Decode a `data:image/...;base64,` URL into a raster
pub fn decode_data_url(url: &str) -> Result<RgbaImage, SourceError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SourceError::Empty);
    }
    let rest = url.strip_prefix("data:").ok_or(SourceError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(SourceError::InvalidDataUrl)?;
    if !header.ends_with(";base64") {
        return Err(SourceError::InvalidDataUrl);
    }
    let bytes = STANDARD.decode(payload.trim())?;
    decode_bytes(&bytes)
}

/// Decode an encoded image (any format the `image` crate was built with)
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, SourceError> {
    if bytes.is_empty() {
        return Err(SourceError::Empty);
    }
    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}

/// Accept either a data URL or raw encoded bytes
pub fn decode_any(bytes: &[u8]) -> Result<RgbaImage, SourceError> {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let trimmed = &bytes[start..];
    if trimmed.starts_with(b"data:") {
        let text = std::str::from_utf8(trimmed).map_err(|_| SourceError::InvalidDataUrl)?;
        decode_data_url(text)
    } else {
        decode_bytes(bytes)
    }
}

/// Encode a raster as a PNG data URL, the form the design tool stores
pub fn encode_data_url(img: &RgbaImage) -> Result<String, SourceError> {
    let png = crate::render::encode_png(img)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Load the last export from the store
///
/// A missing export is a normal state and yields `None`, as does an export
/// that cannot be decoded.
pub fn load_last_export(store: &dyn KeyValueStore) -> Option<RgbaImage> {
    let raw = match store.get(EXPORT_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("No exported design in store");
            return None;
        }
        Err(e) => {
            debug!("Could not read exported design: {}", e);
            return None;
        }
    };
    match decode_data_url(&raw) {
        Ok(img) => {
            info!("Loaded exported design {}x{}", img.width(), img.height());
            Some(img)
        }
        Err(e) => {
            debug!("Ignoring unreadable exported design: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use image::Rgba;

    fn sample() -> RgbaImage {
        RgbaImage::from_fn(6, 4, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 7, 255]))
    }

    #[test]
    fn test_data_url_round_trip() {
        let img = sample();
        let url = encode_data_url(&img).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let back = decode_data_url(&url).unwrap();
        assert_eq!(back.as_raw(), img.as_raw());
    }

    #[test]
    fn test_decode_any_accepts_both_forms() {
        let img = sample();
        let png = crate::render::encode_png(&img).unwrap();
        assert_eq!(decode_any(&png).unwrap().dimensions(), (6, 4));

        let url = encode_data_url(&img).unwrap();
        assert_eq!(decode_any(url.as_bytes()).unwrap().dimensions(), (6, 4));
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(decode_data_url(""), Err(SourceError::Empty)));
        assert!(matches!(decode_data_url("http://x"), Err(SourceError::InvalidDataUrl)));
        assert!(matches!(decode_data_url("data:image/png,abc"), Err(SourceError::InvalidDataUrl)));
        assert!(matches!(decode_data_url("data:image/png;base64,@@@"), Err(SourceError::Base64(_))));
        assert!(matches!(decode_bytes(b"not an image"), Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_load_last_export() {
        let store = MemoryStore::default();
        assert!(load_last_export(&store).is_none());

        store.set(EXPORT_KEY, "garbage").unwrap();
        assert!(load_last_export(&store).is_none());

        store
            .set("roman_shield_last_export", &encode_data_url(&sample()).unwrap())
            .unwrap();
        assert_eq!(load_last_export(&store).map(|i| i.dimensions()), Some((6, 4)));
    }
}
