//! Stateless magic-byte sniffers used to validate downloaded/generated
//! media before it's trusted or handed to a downstream tool.

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF]
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0..4] == [0x89, 0x50, 0x4E, 0x47]
}

pub fn is_gif(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0..4] == [0x47, 0x49, 0x46, 0x38]
}

pub fn is_webp(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

pub fn is_image(bytes: &[u8]) -> bool {
    is_jpeg(bytes) || is_png(bytes) || is_gif(bytes) || is_webp(bytes)
}

pub fn is_ogg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0..4] == [0x4F, 0x67, 0x67, 0x53]
}

pub fn is_id3(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && &bytes[0..3] == b"ID3"
}

/// MPEG audio frame sync: `FF Fx` where the low nibble of the second byte
/// has its top three bits set (0xFB/0xF3/0xF2 and their ADTS siblings
/// 0xF1/0xF9 are the common cases we actually see from these providers).
pub fn is_mpeg_frame_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2
        && bytes[0] == 0xFF
        && matches!(bytes[1], 0xFB | 0xF3 | 0xF2 | 0xF1 | 0xF9)
}

pub fn is_audio(bytes: &[u8]) -> bool {
    is_ogg(bytes) || is_id3(bytes) || is_mpeg_frame_sync(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_each_image_signature() {
        assert!(is_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(is_png(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A]));
        assert!(is_gif(&[0x47, 0x49, 0x46, 0x38, 0x39, 0x61]));
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert!(is_webp(&webp));
    }

    #[test]
    fn rejects_garbage_as_image() {
        assert!(!is_image(b"not an image"));
        assert!(!is_image(&[]));
    }

    #[test]
    fn recognizes_audio_signatures() {
        assert!(is_ogg(&[0x4F, 0x67, 0x67, 0x53]));
        assert!(is_id3(b"ID3\x03\x00"));
        assert!(is_mpeg_frame_sync(&[0xFF, 0xFB, 0x90]));
        assert!(is_mpeg_frame_sync(&[0xFF, 0xF9, 0x00]));
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(!is_jpeg(&[0xFF]));
        assert!(!is_webp(b"RIFF"));
        assert!(!is_mpeg_frame_sync(&[0xFF]));
    }
}
