//! Media framing for relayed inputs
//!
//! This module provides:
//! - The closed set of supported media types
//! - FLV tag framing with a synthetic file header for late joiners
//! - MPEG-TS cell batching
//! - Ogg page framing with a replayable per-stream header
//! - The `FramingReader` that turns a byte source into framing units

pub mod flv;
pub mod mpegts;
pub mod ogg;
pub mod reader;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::Error;

pub use flv::{FlvTagHeader, FlvTagType};
pub use ogg::OggPage;
pub use reader::{FramingReader, Readiness, ReaderShared};

/// Media types the relay knows how to frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Flash video (FLV tag stream)
    Flv,
    /// MPEG transport stream
    Mpegts,
    /// Ogg container (Theora/Vorbis)
    Theora,
    /// Unframed pass-through
    Text,
}

impl MediaType {
    /// Value for the HTTP `Content-Type` header
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Flv => "application/flash-video",
            MediaType::Mpegts => "video/mp2t",
            MediaType::Theora => "application/ogg",
            MediaType::Text => "text/plain",
        }
    }

    /// Header served before any unit has been read from a source
    pub fn initial_header(&self) -> Bytes {
        match self {
            MediaType::Flv => Bytes::from_static(&flv::SYNTHETIC_HEADER),
            MediaType::Mpegts | MediaType::Theora | MediaType::Text => Bytes::new(),
        }
    }

    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            MediaType::Flv => "flv",
            MediaType::Mpegts => "mpegts",
            MediaType::Theora => "theora",
            MediaType::Text => "txt",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MediaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flv" => Ok(MediaType::Flv),
            "mpegts" | "ts" => Ok(MediaType::Mpegts),
            "theora" | "ogg" => Ok(MediaType::Theora),
            "txt" | "text" => Ok(MediaType::Text),
            _ => Err(Error::UnsupportedMediaType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_str() {
        assert_eq!("flv".parse::<MediaType>().unwrap(), MediaType::Flv);
        assert_eq!("MPEGTS".parse::<MediaType>().unwrap(), MediaType::Mpegts);
        assert_eq!("ts".parse::<MediaType>().unwrap(), MediaType::Mpegts);
        assert_eq!("ogg".parse::<MediaType>().unwrap(), MediaType::Theora);
        assert_eq!(" theora ".parse::<MediaType>().unwrap(), MediaType::Theora);
        assert_eq!("txt".parse::<MediaType>().unwrap(), MediaType::Text);
    }

    #[test]
    fn test_media_type_unsupported() {
        let err = "mkv".parse::<MediaType>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedMediaType(ref name) if name == "mkv"));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(MediaType::Flv.content_type(), "application/flash-video");
        assert_eq!(MediaType::Mpegts.content_type(), "video/mp2t");
        assert_eq!(MediaType::Theora.content_type(), "application/ogg");
        assert_eq!(MediaType::Text.content_type(), "text/plain");
    }

    #[test]
    fn test_initial_header() {
        assert_eq!(MediaType::Flv.initial_header().len(), 13);
        assert!(MediaType::Mpegts.initial_header().is_empty());
        assert!(MediaType::Theora.initial_header().is_empty());
    }
}
