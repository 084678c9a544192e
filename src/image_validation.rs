//! Magic-byte validation for accepted image types: jpg, jpeg, png, webp,
//! bmp. Used to filter files extracted from an archive submission and to
//! reject obviously-wrong uploads before they ever reach the detector.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    TooShort,
    UnrecognizedFormat,
}

pub fn validate_magic_bytes(bytes: &[u8]) -> Result<(), InvalidReason> {
    if bytes.len() < 12 {
        return Err(InvalidReason::TooShort);
    }

    let is_jpeg = bytes.starts_with(&[0xFF, 0xD8, 0xFF]);
    let is_png = bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    let is_webp = &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP";
    let is_bmp = bytes.starts_with(b"BM");

    if is_jpeg || is_png || is_webp || is_bmp {
        Ok(())
    } else {
        Err(InvalidReason::UnrecognizedFormat)
    }
}

/// Extension allow-list used alongside the magic-byte check when
/// extracting an archive, per the ingest spec's "only recognized image
/// file types (jpg, jpeg, png, webp, bmp) are admitted".
pub fn has_recognized_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["jpg", "jpeg", "png", "webp", "bmp"]
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_jpeg_magic_bytes() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend(std::iter::repeat(0u8).take(12));
        assert!(validate_magic_bytes(&bytes).is_ok());
    }

    #[test]
    fn accepts_png_magic_bytes() {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend(std::iter::repeat(0u8).take(8));
        assert!(validate_magic_bytes(&bytes).is_ok());
    }

    #[test]
    fn accepts_webp_magic_bytes() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend([0u8; 4]);
        bytes.extend(b"WEBP");
        assert!(validate_magic_bytes(&bytes).is_ok());
    }

    #[test]
    fn rejects_unrecognized_format() {
        let bytes = vec![0u8; 16];
        assert_eq!(validate_magic_bytes(&bytes).unwrap_err(), InvalidReason::UnrecognizedFormat);
    }

    #[test]
    fn rejects_too_short() {
        assert_eq!(validate_magic_bytes(&[0xFF, 0xD8]).unwrap_err(), InvalidReason::TooShort);
    }

    #[test]
    fn extension_allow_list() {
        assert!(has_recognized_extension("photo.JPG"));
        assert!(has_recognized_extension("a/b/c.webp"));
        assert!(!has_recognized_extension("readme.txt"));
    }
}
