//! MIME type detection
//!
//! Content types come from the serving name's extension when it has a known
//! one, and otherwise from the leading bytes of the content.

/// Common MIME type constants.
pub mod types {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const MARKDOWN: &str = "text/markdown; charset=utf-8";
    pub const CSV: &str = "text/csv; charset=utf-8";

    pub const PDF: &str = "application/pdf";

    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const WASM: &str = "application/wasm";
    pub const ZIP: &str = "application/zip";
    pub const GZIP: &str = "application/gzip";

    pub const PNG: &str = "image/png";
    pub const JPEG: &str = "image/jpeg";
    pub const GIF: &str = "image/gif";
    pub const WEBP: &str = "image/webp";
    pub const AVIF: &str = "image/avif";
    pub const SVG: &str = "image/svg+xml";
    pub const ICO: &str = "image/x-icon";
    pub const BMP: &str = "image/bmp";

    pub const MP3: &str = "audio/mpeg";
    pub const WAV: &str = "audio/wav";
    pub const OGG_AUDIO: &str = "audio/ogg";
    pub const FLAC: &str = "audio/flac";

    pub const MP4: &str = "video/mp4";
    pub const WEBM: &str = "video/webm";
    pub const MOV: &str = "video/quicktime";

    pub const WOFF: &str = "font/woff";
    pub const WOFF2: &str = "font/woff2";
    pub const TTF: &str = "font/ttf";
    pub const OTF: &str = "font/otf";
}

/// Number of leading bytes inspected by [`sniff`]
pub const SNIFF_LEN: u64 = 512;

/// Guess a MIME type from the extension of a serving name.
///
/// Returns `None` for names without an extension or with an unknown one.
pub fn from_name(name: &str) -> Option<&'static str> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    from_extension(&ext.to_ascii_lowercase())
}

/// Guess a MIME type from a lower-case extension.
pub fn from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "html" | "htm" => types::HTML,
        "txt" => types::PLAIN,
        "css" => types::CSS,
        "js" | "mjs" => types::JAVASCRIPT,
        "json" => types::JSON,
        "xml" => types::XML,
        "md" => types::MARKDOWN,
        "csv" => types::CSV,
        "pdf" => types::PDF,
        "wasm" => types::WASM,
        "zip" => types::ZIP,
        "gz" => types::GZIP,
        "png" => types::PNG,
        "jpg" | "jpeg" => types::JPEG,
        "gif" => types::GIF,
        "webp" => types::WEBP,
        "avif" => types::AVIF,
        "svg" => types::SVG,
        "ico" => types::ICO,
        "bmp" => types::BMP,
        "mp3" => types::MP3,
        "wav" => types::WAV,
        "ogg" | "oga" => types::OGG_AUDIO,
        "flac" => types::FLAC,
        "mp4" | "m4v" => types::MP4,
        "webm" => types::WEBM,
        "mov" => types::MOV,
        "woff" => types::WOFF,
        "woff2" => types::WOFF2,
        "ttf" => types::TTF,
        "otf" => types::OTF,
        _ => return None,
    };
    Some(mime)
}

/// Guess a MIME type from the leading bytes of some content.
///
/// Recognises common binary signatures and markup, falls back to plain text
/// when no control bytes are present and to `application/octet-stream`
/// otherwise.
pub fn sniff(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN as usize)];

    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\xFF\xD8\xFF", types::JPEG),
        (b"\x89PNG\r\n\x1A\n", types::PNG),
        (b"GIF87a", types::GIF),
        (b"GIF89a", types::GIF),
        (b"%PDF-", types::PDF),
        (b"PK\x03\x04", types::ZIP),
        (b"\x1F\x8B\x08", types::GZIP),
        (b"\x00asm", types::WASM),
        (b"OggS\x00", types::OGG_AUDIO),
        (b"ID3", types::MP3),
        (b"fLaC", types::FLAC),
        (b"\x1A\x45\xDF\xA3", types::WEBM),
        (b"wOFF", types::WOFF),
        (b"wOF2", types::WOFF2),
        (b"BM", types::BMP),
    ];

    for (signature, mime) in SIGNATURES {
        if data.starts_with(signature) {
            return *mime;
        }
    }

    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return types::WEBP;
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return types::WAV;
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return types::MP4;
    }

    let text_start = data
        .iter()
        .position(|b| !b" \t\n\r\x0C".contains(b))
        .unwrap_or(data.len());
    let head = &data[text_start..];
    if starts_with_ignore_case(head, b"<!DOCTYPE HTML")
        || starts_with_ignore_case(head, b"<html")
        || starts_with_ignore_case(head, b"<head")
        || starts_with_ignore_case(head, b"<body")
    {
        return types::HTML;
    }
    if head.starts_with(b"<?xml") {
        return types::XML;
    }

    let is_binary = data
        .iter()
        .any(|b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F));
    if is_binary {
        types::OCTET_STREAM
    } else {
        types::PLAIN
    }
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}
