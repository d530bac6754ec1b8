//! Selection and offer validation.

use linkdrop_protocol::TransferOffer;

use crate::TransferError;

/// MIME patterns accepted for sharing. A trailing `*` matches any subtype.
pub const ALLOWED_TYPE_PATTERNS: [&str; 5] =
    ["image/*", "video/*", "audio/*", "application/pdf", "text/*"];

/// Returns `true` if `mime_type` matches one of the patterns.
pub fn type_allowed(mime_type: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| match pattern.split_once('*') {
        Some((prefix, _)) => mime_type.starts_with(prefix),
        None => mime_type == *pattern,
    })
}

fn require_allowed_type(mime_type: &str) -> Result<(), TransferError> {
    if type_allowed(mime_type, &ALLOWED_TYPE_PATTERNS) {
        return Ok(());
    }
    let shown = if mime_type.is_empty() {
        "unknown".to_string()
    } else {
        mime_type.to_string()
    };
    Err(TransferError::UnsupportedType(shown))
}

/// Validates a local file selection before it is offered to a peer.
pub fn validate_selection(
    file_name: &str,
    file_size: u64,
    mime_type: &str,
    max_file_size: u64,
) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::NoFileSelected);
    }
    if file_size > max_file_size {
        return Err(TransferError::FileTooLarge {
            size: file_size,
            max: max_file_size,
        });
    }
    require_allowed_type(mime_type)
}

/// Validates an inbound offer before accepting it.
///
/// The receiver applies the same type and size policy as the sender, plus
/// file name hygiene, since the name eventually lands on its disk.
pub fn validate_offer(offer: &TransferOffer, max_file_size: u64) -> Result<(), TransferError> {
    validate_file_name(&offer.file_name)?;
    if offer.file_size > max_file_size {
        return Err(TransferError::FileTooLarge {
            size: offer.file_size,
            max: max_file_size,
        });
    }
    if offer.chunk_size == 0 {
        return Err(TransferError::ProtocolViolation(
            "offer with zero chunk size".into(),
        ));
    }
    require_allowed_type(&offer.mime_type)
}

/// Rejects file names that could escape the download directory.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }
    if name == "." || name == ".." {
        return Err(TransferError::InvalidFileName(name.into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidFileName(format!(
            "path separator in {name:?}"
        )));
    }
    if name.contains(':') {
        return Err(TransferError::InvalidFileName(format!(
            "drive prefix in {name:?}"
        )));
    }
    if name.bytes().any(|b| b < 0x20) {
        return Err(TransferError::InvalidFileName(
            "control character in name".into(),
        ));
    }
    Ok(())
}

/// Guesses a MIME type from the file extension.
///
/// The share dialog falls back to this when the platform reports no type
/// for the picked file.
pub fn guess_mime_type(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "pdf" => "application/pdf",
        "txt" | "md" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        _ => return None,
    };
    Some(mime)
}
