use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::util::sanitize_file_name;

/// An attached recording as it arrives from the submitting client.
///
/// The transport layer is not statically known, so every shape a client can
/// reasonably produce gets its own variant with its own normalization path.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    /// A browser-style file part: bytes plus transport metadata
    Blob {
        bytes: Vec<u8>,
        content_type: Option<String>,
        file_name: Option<String>,
    },
    /// Raw bytes with no metadata at all
    Bytes(Vec<u8>),
    /// A `data:` URL string with base64-encoded content
    DataUrl(String),
}

/// The single uploadable representation every [MediaPayload] normalizes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMedia {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Recording is empty")]
    Empty,
    #[error("Recording data URL is malformed: {0}")]
    MalformedDataUrl(&'static str),
    #[error("Recording could not be decoded: {0}")]
    Decode(String),
}

impl MediaPayload {
    /// Normalizes the payload into an uploadable file representation
    pub fn normalize(self) -> Result<NormalizedMedia, MediaError> {
        match self {
            Self::Blob {
                bytes,
                content_type,
                file_name,
            } => normalize_blob(bytes, content_type, file_name),
            Self::Bytes(bytes) => normalize_bytes(bytes),
            Self::DataUrl(url) => normalize_data_url(&url),
        }
    }
}

fn normalize_blob(
    bytes: Vec<u8>,
    content_type: Option<String>,
    file_name: Option<String>,
) -> Result<NormalizedMedia, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    // Transport content types are untrusted, fall back to guessing when one
    // doesn't parse as a MIME type at all
    let mime = content_type
        .filter(|c| c.parse::<mime::Mime>().is_ok())
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(|name| mime_guess::from_path(name).first_raw())
                .map(str::to_string)
        })
        .unwrap_or_else(|| sniff_mime(&bytes).to_string());

    let file_name = match file_name {
        Some(name) => sanitize_file_name(&name),
        None => generated_file_name(&mime),
    };

    Ok(NormalizedMedia {
        bytes,
        mime,
        file_name,
    })
}

fn normalize_bytes(bytes: Vec<u8>) -> Result<NormalizedMedia, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    let mime = sniff_mime(&bytes).to_string();
    let file_name = generated_file_name(&mime);

    Ok(NormalizedMedia {
        bytes,
        mime,
        file_name,
    })
}

fn normalize_data_url(url: &str) -> Result<NormalizedMedia, MediaError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or(MediaError::MalformedDataUrl("missing data: prefix"))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or(MediaError::MalformedDataUrl("missing content separator"))?;

    let header = match header.strip_suffix(";base64") {
        Some(header) => header,
        None => return Err(MediaError::MalformedDataUrl("content is not base64")),
    };

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    let mime = if header.is_empty() {
        sniff_mime(&bytes).to_string()
    } else {
        header.to_string()
    };

    let file_name = generated_file_name(&mime);

    Ok(NormalizedMedia {
        bytes,
        mime,
        file_name,
    })
}

/// Infers a MIME type from magic bytes of the containers members record in
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return mime_types::WAV;
    }

    if bytes.starts_with(b"OggS") {
        return mime_types::OGG;
    }

    if bytes.starts_with(b"fLaC") {
        return mime_types::FLAC;
    }

    if bytes.starts_with(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
    {
        return mime_types::MP3;
    }

    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return mime_types::WEBM;
    }

    mime_types::OCTET_STREAM
}

fn generated_file_name(mime: &str) -> String {
    let extension = match mime {
        mime_types::WAV => "wav",
        mime_types::OGG => "ogg",
        mime_types::FLAC => "flac",
        mime_types::MP3 => "mp3",
        mime_types::WEBM => "webm",
        _ => "bin",
    };

    format!("recording.{extension}")
}

mod mime_types {
    pub const WAV: &str = "audio/wav";
    pub const OGG: &str = "audio/ogg";
    pub const FLAC: &str = "audio/flac";
    pub const MP3: &str = "audio/mpeg";
    pub const WEBM: &str = "audio/webm";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

#[cfg(test)]
mod test {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    use super::{MediaError, MediaPayload};

    /// A minimal RIFF/WAVE header followed by a few samples of silence
    fn wav_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(&[0u8; 16]);
        bytes
    }

    #[test]
    fn all_shapes_normalize_to_the_same_file() {
        let bytes = wav_bytes();

        let from_blob = MediaPayload::Blob {
            bytes: bytes.clone(),
            content_type: None,
            file_name: Some("take.wav".to_string()),
        }
        .normalize()
        .unwrap();

        let from_bytes = MediaPayload::Bytes(bytes.clone()).normalize().unwrap();

        let data_url = format!("data:audio/wav;base64,{}", BASE64.encode(&bytes));
        let from_data_url = MediaPayload::DataUrl(data_url).normalize().unwrap();

        assert_eq!(from_blob.bytes, bytes);
        assert_eq!(from_bytes.bytes, bytes);
        assert_eq!(from_data_url.bytes, bytes);

        for media in [&from_blob, &from_bytes, &from_data_url] {
            assert!(!media.mime.is_empty());
            assert_eq!(media.mime, "audio/wav");
            assert!(!media.file_name.is_empty());
        }
    }

    #[test]
    fn blob_content_type_wins_over_sniffing() {
        let media = MediaPayload::Blob {
            bytes: wav_bytes(),
            content_type: Some("audio/x-custom".to_string()),
            file_name: None,
        }
        .normalize()
        .unwrap();

        assert_eq!(media.mime, "audio/x-custom");
    }

    #[test]
    fn file_name_extension_guides_the_mime() {
        let media = MediaPayload::Blob {
            bytes: vec![1, 2, 3],
            content_type: None,
            file_name: Some("solo.mp3".to_string()),
        }
        .normalize()
        .unwrap();

        assert_eq!(media.mime, "audio/mpeg");
        assert_eq!(media.file_name, "solo.mp3");
    }

    #[test]
    fn unknown_bytes_still_get_a_mime() {
        let media = MediaPayload::Bytes(vec![9, 9, 9]).normalize().unwrap();

        assert_eq!(media.mime, "application/octet-stream");
        assert_eq!(media.file_name, "recording.bin");
    }

    #[test]
    fn malformed_data_urls_are_rejected() {
        let missing_prefix = MediaPayload::DataUrl("audio/wav;base64,AAAA".to_string()).normalize();
        assert!(matches!(
            missing_prefix,
            Err(MediaError::MalformedDataUrl(_))
        ));

        let not_base64 = MediaPayload::DataUrl("data:audio/wav,plain".to_string()).normalize();
        assert!(matches!(not_base64, Err(MediaError::MalformedDataUrl(_))));

        let bad_payload = MediaPayload::DataUrl("data:audio/wav;base64,!!!".to_string()).normalize();
        assert!(matches!(bad_payload, Err(MediaError::Decode(_))));
    }

    #[test]
    fn empty_payloads_are_rejected() {
        assert!(matches!(
            MediaPayload::Bytes(Vec::new()).normalize(),
            Err(MediaError::Empty)
        ));
    }
}
