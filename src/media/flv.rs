//! FLV tag framing
//!
//! An FLV stream is a file header followed by a sequence of tags. Every tag
//! is forwarded together with the 4-byte previous-tag-size trailer that
//! follows it, so a client that joins between two tags sees a valid stream.
//!
//! File header:
//! ```text
//! +-----+-----+-----+---------+-------+----------------+
//! | 'F' | 'L' | 'V' | Version | Flags | HeaderSize(4)  |  + PrevTagSize0(4)
//! +-----+-----+-----+---------+-------+----------------+
//! ```
//!
//! Tag:
//! ```text
//! +--------+-------------+-------+--------+-------------+---------+-----------------+
//! | Type(1)| DataSize(3) | TS(3) | TSX(1) | StreamID(3) | Data(N) | PrevTagSize(4)  |
//! +--------+-------------+-------+--------+-------------+---------+-----------------+
//! ```
//!
//! Until the real file header is read, joining clients receive a synthetic
//! header announcing audio and video.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

use super::reader::Source;

/// Header served before the source's own header has been read
pub const SYNTHETIC_HEADER: [u8; 13] = [
    0x46, 0x4C, 0x56, // "FLV"
    0x01, // version
    0x05, // audio + video
    0x00, 0x00, 0x00, 0x09, // header size
    0x00, 0x00, 0x00, 0x00, // previous tag size 0
];

/// Fixed part of the file header
pub const FILE_HEADER_SIZE: usize = 9;

/// Tag header length
pub const TAG_HEADER_SIZE: usize = 11;

/// Trailing previous-tag-size field
pub const PREV_TAG_SIZE: usize = 4;

/// Largest file header accepted from a source
pub const MAX_FILE_HEADER_SIZE: usize = 1024 * 1024;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// Parsed 11-byte tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvTagHeader {
    /// Raw type byte
    pub tag_type: u8,
    /// Body length, excluding the tag header and trailer
    pub data_size: u32,
    /// Timestamp in milliseconds, extension byte applied
    pub timestamp: u32,
    /// Always 0 in conforming streams
    pub stream_id: u32,
}

impl FlvTagHeader {
    pub fn parse(buf: &[u8; TAG_HEADER_SIZE]) -> Self {
        let u24 = |b: &[u8]| ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;

        Self {
            tag_type: buf[0],
            data_size: u24(&buf[1..4]),
            timestamp: u24(&buf[4..7]) | ((buf[7] as u32) << 24),
            stream_id: u24(&buf[8..11]),
        }
    }

    /// Known tag type, if any
    pub fn kind(&self) -> Option<FlvTagType> {
        FlvTagType::from_u8(self.tag_type)
    }

    /// Bytes following the tag header: body plus trailer
    pub fn remaining_len(&self) -> usize {
        self.data_size as usize + PREV_TAG_SIZE
    }
}

/// Total header length (file header plus first previous-tag-size) declared
/// by a fixed file header
fn declared_header_len(fixed: &[u8; FILE_HEADER_SIZE]) -> Result<usize> {
    let declared = u32::from_be_bytes([fixed[5], fixed[6], fixed[7], fixed[8]]) as usize;
    if declared < FILE_HEADER_SIZE {
        return Err(Error::Framing(format!(
            "FLV header size {} is shorter than the fixed header",
            declared
        )));
    }
    if declared > MAX_FILE_HEADER_SIZE {
        return Err(Error::Framing(format!(
            "FLV header size {} exceeds {} bytes",
            declared, MAX_FILE_HEADER_SIZE
        )));
    }
    Ok(declared + PREV_TAG_SIZE)
}

pub(crate) struct FlvFramer {
    header_read: bool,
}

impl FlvFramer {
    pub(crate) fn new() -> Self {
        Self { header_read: false }
    }

    pub(crate) async fn next_unit(&mut self, source: &mut Source) -> Result<Bytes> {
        if !self.header_read {
            let mut fixed = [0u8; FILE_HEADER_SIZE];
            if !source.read_exact_or_eof(&mut fixed).await? {
                return Ok(Bytes::new());
            }

            let total = declared_header_len(&fixed)?;
            let mut header = vec![0u8; total];
            header[..FILE_HEADER_SIZE].copy_from_slice(&fixed);
            if !source.read_exact_or_eof(&mut header[FILE_HEADER_SIZE..]).await? {
                return Err(unexpected_eof("FLV file header"));
            }

            tracing::debug!(header_size = total, "FLV file header received");
            source.shared().set_header(Bytes::from(header));
            self.header_read = true;
        }

        let mut tag = [0u8; TAG_HEADER_SIZE];
        if !source.read_exact_or_eof(&mut tag).await? {
            return Ok(Bytes::new());
        }
        let parsed = FlvTagHeader::parse(&tag);

        let mut unit = BytesMut::with_capacity(TAG_HEADER_SIZE + parsed.remaining_len());
        unit.put_slice(&tag);
        unit.resize(TAG_HEADER_SIZE + parsed.remaining_len(), 0);
        if !source.read_exact_or_eof(&mut unit[TAG_HEADER_SIZE..]).await? {
            return Err(unexpected_eof("FLV tag body"));
        }

        if parsed.kind().is_none() {
            source.shared().mark_broken(1);
            tracing::debug!(
                tag_type = parsed.tag_type,
                data_size = parsed.data_size,
                "Unknown FLV tag type"
            );
        }

        Ok(unit.freeze())
    }
}

fn unexpected_eof(what: &str) -> Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("stream ended inside {}", what),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FramingReader, MediaType};

    fn file_header() -> Vec<u8> {
        vec![
            0x46, 0x4C, 0x56, 0x01, 0x01, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
        ]
    }

    fn tag(tag_type: u8, body: &[u8], timestamp: u32) -> Vec<u8> {
        let size = body.len() as u32;
        let mut out = vec![
            tag_type,
            (size >> 16) as u8,
            (size >> 8) as u8,
            size as u8,
            (timestamp >> 16) as u8,
            (timestamp >> 8) as u8,
            timestamp as u8,
            (timestamp >> 24) as u8,
            0,
            0,
            0,
        ];
        out.extend_from_slice(body);
        out.extend_from_slice(&(size + TAG_HEADER_SIZE as u32).to_be_bytes());
        out
    }

    async fn drain(reader: &mut FramingReader) -> Vec<Bytes> {
        let mut units = Vec::new();
        loop {
            let unit = reader.next_unit().await.unwrap();
            if unit.is_empty() {
                return units;
            }
            units.push(unit);
        }
    }

    #[test]
    fn test_tag_type_from_u8() {
        assert_eq!(FlvTagType::from_u8(8), Some(FlvTagType::Audio));
        assert_eq!(FlvTagType::from_u8(9), Some(FlvTagType::Video));
        assert_eq!(FlvTagType::from_u8(18), Some(FlvTagType::Script));
        assert_eq!(FlvTagType::from_u8(7), None);
        assert_eq!(FlvTagType::Script.as_u8(), 18);
    }

    #[test]
    fn test_tag_header_parse() {
        let raw = tag(9, &[0u8; 300], 0x01_02_03_04);
        let mut header = [0u8; TAG_HEADER_SIZE];
        header.copy_from_slice(&raw[..TAG_HEADER_SIZE]);

        let parsed = FlvTagHeader::parse(&header);
        assert_eq!(parsed.kind(), Some(FlvTagType::Video));
        assert_eq!(parsed.data_size, 300);
        assert_eq!(parsed.timestamp, 0x01_02_03_04);
        assert_eq!(parsed.stream_id, 0);
        assert_eq!(parsed.remaining_len(), 304);
    }

    #[test]
    fn test_declared_header_len_bounds() {
        let mut fixed = [0x46, 0x4C, 0x56, 0x01, 0x05, 0, 0, 0, 9];
        assert_eq!(declared_header_len(&fixed).unwrap(), 13);

        for declared in 0..9 {
            fixed[8] = declared;
            assert!(declared_header_len(&fixed).unwrap_err().is_fatal(), "declared {}", declared);
        }

        fixed[5..9].copy_from_slice(&(2 * MAX_FILE_HEADER_SIZE as u32).to_be_bytes());
        assert!(declared_header_len(&fixed).unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_synthetic_header_before_first_unit() {
        let (_client, server) = tokio::io::duplex(64);
        let reader = FramingReader::new(MediaType::Flv, server);
        assert_eq!(&reader.header()[..], &SYNTHETIC_HEADER[..]);
    }

    #[tokio::test]
    async fn test_round_trip_across_split_reads() {
        let mut stream = file_header();
        stream.extend(tag(18, b"onMetaData", 0));
        stream.extend(tag(9, &[0x17; 40], 0));
        stream.extend(tag(8, &[0xAF; 7], 23));

        // Split at awkward offsets, including inside the file header and trailers
        let mut builder = tokio_test::io::Builder::new();
        for chunk in [&stream[..5], &stream[5..17], &stream[17..30], &stream[30..]] {
            builder.read(chunk);
        }
        let mut reader = FramingReader::new(MediaType::Flv, builder.build());

        let units = drain(&mut reader).await;
        assert_eq!(units.len(), 3);

        let mut rebuilt = reader.header().to_vec();
        for unit in &units {
            rebuilt.extend_from_slice(unit);
        }
        assert_eq!(rebuilt, stream);
        assert_eq!(reader.broken_count(), 0);
    }

    #[tokio::test]
    async fn test_extended_file_header_is_kept() {
        let mut stream = vec![0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x0C];
        stream.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        stream.extend_from_slice(&[0, 0, 0, 0]);
        let header_len = stream.len();
        stream.extend(tag(9, &[1, 2, 3], 0));

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Flv, mock);

        let unit = reader.next_unit().await.unwrap();
        assert_eq!(&reader.header()[..], &stream[..header_len]);
        assert_eq!(&unit[..], &stream[header_len..]);
    }

    #[tokio::test]
    async fn test_unknown_tag_type_is_forwarded() {
        let mut stream = file_header();
        let odd = tag(42, &[9, 9, 9], 0);
        stream.extend(odd.clone());

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Flv, mock);

        let unit = reader.next_unit().await.unwrap();
        assert_eq!(&unit[..], &odd[..]);
        assert_eq!(reader.broken_count(), 1);
    }

    #[tokio::test]
    async fn test_eof_inside_tag_is_transient() {
        let mut stream = file_header();
        let full = tag(9, &[0u8; 64], 0);
        stream.extend_from_slice(&full[..20]);

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Flv, mock);

        let err = reader.next_unit().await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_short_declared_header_is_fatal() {
        let stream = [0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x01];
        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Flv, mock);

        let err = reader.next_unit().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_header_size_inside_fixed_header_keeps_synthetic() {
        let mut stream = vec![0x46, 0x4C, 0x56, 0x01, 0x05, 0x00, 0x00, 0x00, 0x06];
        stream.extend_from_slice(&[0, 0, 0, 0]);
        stream.extend(tag(9, &[1, 2, 3], 0));

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Flv, mock);

        let err = reader.next_unit().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(&reader.header()[..], &SYNTHETIC_HEADER[..]);
        assert_eq!(reader.broken_count(), 0);
    }
}
