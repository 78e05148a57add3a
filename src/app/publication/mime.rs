//! Media type detection for preserved files
//!
//! Known extensions win; otherwise the leading bytes are checked against a
//! few signatures, and valid UTF-8 without control bytes is `text/plain`.

use std::path::Path;

use crate::constants::preservation::FALLBACK_MEDIA_TYPE;

const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("svg", "image/svg+xml"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/x-wav"),
    ("m", "text/x-matlab"),
    ("mat", "application/x-matlab-data"),
    ("py", "text/x-python"),
    ("h5", "application/x-hdf5"),
    ("hdf5", "application/x-hdf5"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
];

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\0", "image/tiff"),
    (b"MM\0*", "image/tiff"),
    (b"PK\x03\x04", "application/zip"),
    (&[0x1F, 0x8B], "application/gzip"),
    (&[0x89, b'H', b'D', b'F', 0x0D, 0x0A, 0x1A, 0x0A], "application/x-hdf5"),
];

/// Media type for `path`, whose first bytes are `head`
pub fn detect_media_type(path: &Path, head: &[u8]) -> &'static str {
    let by_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .and_then(|ext| {
            EXTENSIONS
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, media_type)| *media_type)
        });
    if let Some(media_type) = by_extension {
        return media_type;
    }

    if let Some((_, media_type)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return *media_type;
    }

    if looks_like_text(head) {
        "text/plain"
    } else {
        FALLBACK_MEDIA_TYPE
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    // A multi-byte character may be cut at the end of the sample
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid
        && !head
            .iter()
            .any(|b| b.is_ascii_control() && !matches!(b, b'\n' | b'\r' | b'\t'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        assert_eq!(detect_media_type(Path::new("data/run.CSV"), b"%PDF-"), "text/csv");
        assert_eq!(detect_media_type(Path::new("a/b.h5"), b""), "application/x-hdf5");
    }

    #[test]
    fn test_signatures_without_extension() {
        assert_eq!(detect_media_type(Path::new("report"), b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(
            detect_media_type(Path::new("photo"), &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]),
            "image/jpeg"
        );
    }

    #[test]
    fn test_text_and_binary_fallback() {
        assert_eq!(detect_media_type(Path::new("README"), b"plain words\n"), "text/plain");
        assert_eq!(
            detect_media_type(Path::new("blob"), &[0x00, 0x01, 0x02]),
            FALLBACK_MEDIA_TYPE
        );
        assert_eq!(detect_media_type(Path::new("empty"), b""), FALLBACK_MEDIA_TYPE);
    }
}
