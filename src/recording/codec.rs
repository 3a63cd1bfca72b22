//! Container/codec negotiation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RecordingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingFormat {
    #[serde(rename = "video/webm;codecs=vp9,opus")]
    WebmVp9Opus,
    #[serde(rename = "video/webm;codecs=vp8,opus")]
    WebmVp8Opus,
    #[serde(rename = "video/webm")]
    Webm,
    #[serde(rename = "video/mp4")]
    Mp4,
}

/// Most preferred first.
pub const FORMAT_PRIORITY: [RecordingFormat; 4] = [
    RecordingFormat::WebmVp9Opus,
    RecordingFormat::WebmVp8Opus,
    RecordingFormat::Webm,
    RecordingFormat::Mp4,
];

impl RecordingFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::WebmVp9Opus => "video/webm;codecs=vp9,opus",
            Self::WebmVp8Opus => "video/webm;codecs=vp8,opus",
            Self::Webm => "video/webm",
            Self::Mp4 => "video/mp4",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            _ => "webm",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let normalized: String = mime.chars().filter(|c| !c.is_whitespace()).collect();
        FORMAT_PRIORITY
            .into_iter()
            .find(|format| format.mime().eq_ignore_ascii_case(&normalized))
    }
}

/// Capability probe of the local encoder.
pub trait CodecSupport: Send + Sync {
    fn is_supported(&self, mime: &str) -> bool;
}

/// First supported format in priority order wins.
pub fn negotiate(support: &dyn CodecSupport) -> Result<RecordingFormat, RecordingError> {
    for format in FORMAT_PRIORITY {
        if support.is_supported(format.mime()) {
            info!("Negotiated recording format {}", format.mime());
            return Ok(format);
        }
        debug!("Recording format {} not supported", format.mime());
    }
    Err(RecordingError::NoSupportedFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Supports(Vec<&'static str>);

    impl CodecSupport for Supports {
        fn is_supported(&self, mime: &str) -> bool {
            self.0.contains(&mime)
        }
    }

    #[test]
    fn test_priority_order() {
        let all = Supports(FORMAT_PRIORITY.iter().map(|f| f.mime()).collect());
        assert_eq!(negotiate(&all).unwrap(), RecordingFormat::WebmVp9Opus);

        let vp8 = Supports(vec!["video/mp4", "video/webm;codecs=vp8,opus"]);
        assert_eq!(negotiate(&vp8).unwrap(), RecordingFormat::WebmVp8Opus);
    }

    #[test]
    fn test_generic_webm_only() {
        let webm = Supports(vec!["video/webm"]);
        let format = negotiate(&webm).unwrap();
        assert_eq!(format, RecordingFormat::Webm);
        assert_eq!(format.mime(), "video/webm");
    }

    #[test]
    fn test_nothing_supported() {
        assert!(matches!(
            negotiate(&Supports(vec![])),
            Err(RecordingError::NoSupportedFormat)
        ));
    }

    #[test]
    fn test_from_mime_ignores_spacing() {
        assert_eq!(
            RecordingFormat::from_mime("video/webm; codecs=vp9,opus"),
            Some(RecordingFormat::WebmVp9Opus)
        );
        assert_eq!(RecordingFormat::from_mime("audio/wav"), None);
    }

    #[test]
    fn test_serializes_as_mime() {
        let json = serde_json::to_string(&RecordingFormat::WebmVp8Opus).unwrap();
        assert_eq!(json, "\"video/webm;codecs=vp8,opus\"");
    }
}
