//! Ogg page framing
//!
//! Ogg multiplexes several logical streams (for example Theora video and
//! Vorbis audio) into a sequence of pages. Decoders need the header packets
//! of every logical stream before any data, so the framer captures them into
//! the shared header for clients that join late.
//!
//! Page layout:
//! ```text
//! +--------+---------+-------+-------------+-----------+---------+--------+----------+-------------+------+
//! | "OggS" | Ver(1)  | Flags | Granule(8)  | Serial(4) | Seq(4)  | CRC(4) | NSegs(1) | Lacing(N)   | Body |
//! +--------+---------+-------+-------------+-----------+---------+--------+----------+-------------+------+
//! ```
//!
//! All multi-byte fields are little endian.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::Result;

use super::reader::Source;

/// Capture pattern at the start of every page
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed page header length, before the lacing table
pub const PAGE_HEADER_SIZE: usize = 27;

/// Bytes requested from the source per refill
pub const READ_CHUNK: usize = 4096;

const CRC_OFFSET: usize = 22;

/// Page continues a packet from the previous page
pub const FLAG_CONTINUED: u8 = 0x01;
/// First page of a logical stream
pub const FLAG_BOS: u8 = 0x02;
/// Last page of a logical stream
pub const FLAG_EOS: u8 = 0x04;

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

fn crc_update(crc: u32, data: &[u8]) -> u32 {
    data.iter().fold(crc, |crc, &b| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ b) as usize]
    })
}

/// Ogg CRC-32 (init 0, not reflected, no final xor)
pub fn crc32(data: &[u8]) -> u32 {
    crc_update(0, data)
}

/// CRC of a page computed with its CRC field zeroed
fn page_crc(page: &[u8]) -> u32 {
    let crc = crc_update(0, &page[..CRC_OFFSET]);
    let crc = crc_update(crc, &[0u8; 4]);
    crc_update(crc, &page[CRC_OFFSET + 4..])
}

/// One complete, verified page
#[derive(Debug, Clone)]
pub struct OggPage {
    /// Raw page bytes (header, lacing table and body)
    pub bytes: Bytes,
    /// Logical stream serial number
    pub serial: u32,
    /// Header type flags
    pub flags: u8,
}

impl OggPage {
    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags & FLAG_EOS != 0
    }
}

enum PageOut {
    Page(OggPage),
    /// More bytes are needed
    Incomplete,
    /// Bytes were discarded while looking for a valid page
    Skipped,
}

/// Page synchronisation buffer
#[derive(Debug, Default)]
pub(crate) struct PageSync {
    buf: BytesMut,
}

impl PageSync {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn skip_to_capture(&mut self, from: usize) -> bool {
        let found = self.buf[from..]
            .windows(CAPTURE_PATTERN.len())
            .position(|w| w == CAPTURE_PATTERN)
            .map(|pos| pos + from);

        match found {
            Some(0) => false,
            Some(pos) => {
                self.buf.advance(pos);
                true
            }
            None => {
                // Keep a tail that might be the start of a split capture pattern
                let keep = (CAPTURE_PATTERN.len() - 1).min(self.buf.len());
                let drop = self.buf.len() - keep;
                self.buf.advance(drop);
                drop > 0
            }
        }
    }

    fn pageout(&mut self) -> PageOut {
        if self.buf.len() < CAPTURE_PATTERN.len() {
            return PageOut::Incomplete;
        }
        if !self.buf.starts_with(CAPTURE_PATTERN) {
            return if self.skip_to_capture(0) {
                PageOut::Skipped
            } else {
                PageOut::Incomplete
            };
        }
        if self.buf.len() < PAGE_HEADER_SIZE {
            return PageOut::Incomplete;
        }
        if self.buf[4] != 0 {
            self.skip_to_capture(1);
            return PageOut::Skipped;
        }

        let segments = self.buf[26] as usize;
        let header_len = PAGE_HEADER_SIZE + segments;
        if self.buf.len() < header_len {
            return PageOut::Incomplete;
        }
        let body_len: usize = self.buf[PAGE_HEADER_SIZE..header_len]
            .iter()
            .map(|&l| l as usize)
            .sum();
        let page_len = header_len + body_len;
        if self.buf.len() < page_len {
            return PageOut::Incomplete;
        }

        let page = &self.buf[..page_len];
        let stored = u32::from_le_bytes([page[22], page[23], page[24], page[25]]);
        if page_crc(page) != stored {
            self.skip_to_capture(1);
            return PageOut::Skipped;
        }

        let flags = page[5];
        let serial = u32::from_le_bytes([page[14], page[15], page[16], page[17]]);
        let bytes = self.buf.split_to(page_len).freeze();
        PageOut::Page(OggPage {
            bytes,
            serial,
            flags,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LogicalStream {
    /// First data unit captured into the header
    captured: bool,
    /// EOS page seen
    ended: bool,
}

pub(crate) struct OggFramer {
    sync: PageSync,
    streams: HashMap<u32, LogicalStream>,
    resyncing: bool,
}

impl OggFramer {
    pub(crate) fn new() -> Self {
        Self {
            sync: PageSync::new(),
            streams: HashMap::new(),
            resyncing: false,
        }
    }

    /// Next verified page, or `None` at end-of-stream
    async fn next_page(&mut self, source: &mut Source) -> Result<Option<OggPage>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.sync.pageout() {
                PageOut::Page(page) => {
                    self.resyncing = false;
                    return Ok(Some(page));
                }
                PageOut::Skipped => {
                    if !self.resyncing {
                        self.resyncing = true;
                        source.shared().mark_broken(1);
                        tracing::debug!("Ogg stream lost sync");
                    }
                    continue;
                }
                PageOut::Incomplete => {}
            }

            let n = source.read_some(&mut chunk).await?;
            if n == 0 {
                tracing::debug!("EOS detected for Ogg reader");
                return Ok(None);
            }
            self.sync.write(&chunk[..n]);
        }
    }

    pub(crate) async fn next_unit(&mut self, source: &mut Source) -> Result<Bytes> {
        let first = match self.next_page(source).await? {
            Some(page) => page,
            None => return Ok(Bytes::new()),
        };

        if first.is_bos() {
            // A new chain link: the previous streams all ended, so their
            // headers are of no use to a joining client
            if !self.streams.is_empty() && self.streams.values().all(|s| s.ended) {
                tracing::debug!(streams = self.streams.len(), "Ogg chain restarted, resetting header");
                self.streams.clear();
                source.shared().set_header(Bytes::new());
            }
            self.streams.insert(first.serial, LogicalStream::default());
            source.shared().append_header(&first.bytes);
            if first.is_eos() {
                self.mark_ended(first.serial);
            }
            tracing::debug!(serial = first.serial, "Ogg logical stream started");
            return Ok(first.bytes);
        }

        let serial = first.serial;
        let mut ended = Vec::new();
        if first.is_eos() {
            ended.push(first.serial);
        }
        let unit = if first.is_continued() {
            let mut joined = BytesMut::from(&first.bytes[..]);
            let mut continued = true;
            while continued {
                match self.next_page(source).await? {
                    Some(page) => {
                        continued = page.is_continued();
                        if page.is_eos() {
                            ended.push(page.serial);
                        }
                        joined.extend_from_slice(&page.bytes);
                    }
                    None => break,
                }
            }
            joined.freeze()
        } else {
            first.bytes
        };

        let stream = self.streams.entry(serial).or_default();
        if !stream.captured {
            stream.captured = true;
            source.shared().append_header(&unit);
        }
        for serial in ended {
            self.mark_ended(serial);
        }

        Ok(unit)
    }

    fn mark_ended(&mut self, serial: u32) {
        self.streams.entry(serial).or_default().ended = true;
        tracing::debug!(serial, "Ogg logical stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FramingReader, MediaType};

    fn page(serial: u32, seq: u32, flags: u8, body: &[u8]) -> Vec<u8> {
        assert!(body.len() < 255 * 255);
        let mut lacing = vec![255u8; body.len() / 255];
        lacing.push((body.len() % 255) as u8);

        let mut out = Vec::new();
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0);
        out.push(flags);
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&serial.to_le_bytes());
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.push(lacing.len() as u8);
        out.extend_from_slice(&lacing);
        out.extend_from_slice(body);

        let crc = crc32(&out);
        out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
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
    fn test_crc_known_value() {
        // CRC-32/MPEG-2 style without final xor, init 0 ("123456789")
        assert_eq!(crc32(b"123456789"), 0x89A1_897F);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_pageout_waits_for_complete_page() {
        let raw = page(1, 0, FLAG_BOS, b"header packet");
        let mut sync = PageSync::new();

        sync.write(&raw[..10]);
        assert!(matches!(sync.pageout(), PageOut::Incomplete));

        sync.write(&raw[10..]);
        match sync.pageout() {
            PageOut::Page(p) => {
                assert_eq!(&p.bytes[..], &raw[..]);
                assert_eq!(p.serial, 1);
                assert!(p.is_bos());
                assert!(!p.is_continued());
            }
            _ => panic!("expected a page"),
        }
    }

    #[test]
    fn test_pageout_rejects_bad_crc() {
        let mut raw = page(1, 0, 0, b"payload");
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;

        let mut sync = PageSync::new();
        sync.write(&raw);
        assert!(matches!(sync.pageout(), PageOut::Skipped));
    }

    #[tokio::test]
    async fn test_header_captured_per_stream() {
        let video_bos = page(10, 0, FLAG_BOS, b"theora-id");
        let audio_bos = page(20, 0, FLAG_BOS, b"vorbis-id");
        let video_hdr = page(10, 1, 0, b"theora-comment");
        let audio_hdr = page(20, 1, 0, b"vorbis-comment");
        let video_data = page(10, 2, 0, b"frame-1");
        let audio_data = page(20, 2, 0, b"samples-1");

        let stream: Vec<u8> = [
            &video_bos, &audio_bos, &video_hdr, &audio_hdr, &video_data, &audio_data,
        ]
        .iter()
        .flat_map(|p| p.iter().copied())
        .collect();

        let mut builder = tokio_test::io::Builder::new();
        for chunk in stream.chunks(33) {
            builder.read(chunk);
        }
        let mut reader = FramingReader::new(MediaType::Theora, builder.build());

        let units = drain(&mut reader).await;
        assert_eq!(units.len(), 6);

        let rebuilt: Vec<u8> = units.iter().flat_map(|u| u.iter().copied()).collect();
        assert_eq!(rebuilt, stream);

        let expected_header: Vec<u8> = [&video_bos, &audio_bos, &video_hdr, &audio_hdr]
            .iter()
            .flat_map(|p| p.iter().copied())
            .collect();
        assert_eq!(&reader.header()[..], &expected_header[..]);
        assert_eq!(reader.broken_count(), 0);
    }

    #[tokio::test]
    async fn test_continued_pages_form_one_unit() {
        let bos = page(7, 0, FLAG_BOS, b"id");
        let start = page(7, 1, FLAG_CONTINUED, b"part-a");
        let middle = page(7, 2, FLAG_CONTINUED, b"part-b");
        let end = page(7, 3, 0, b"part-c");
        let next = page(7, 4, 0, b"frame");

        let mut stream = Vec::new();
        for p in [&bos, &start, &middle, &end, &next] {
            stream.extend_from_slice(p);
        }

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Theora, mock);

        let units = drain(&mut reader).await;
        assert_eq!(units.len(), 3);
        assert_eq!(&units[0][..], &bos[..]);

        let mut grouped = start.clone();
        grouped.extend_from_slice(&middle);
        grouped.extend_from_slice(&end);
        assert_eq!(&units[1][..], &grouped[..]);
        assert_eq!(&units[2][..], &next[..]);
    }

    #[tokio::test]
    async fn test_garbage_is_skipped_and_counted() {
        let bos = page(3, 0, FLAG_BOS, b"id");
        let data = page(3, 1, 0, b"data");

        let mut stream = b"noise-before-sync".to_vec();
        stream.extend_from_slice(&bos);
        stream.extend_from_slice(&data);

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Theora, mock);

        let units = drain(&mut reader).await;
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0][..], &bos[..]);
        assert_eq!(reader.broken_count(), 1);
    }

    #[tokio::test]
    async fn test_chained_stream_replaces_header() {
        let first_bos = page(1, 0, FLAG_BOS, b"first-id");
        let first_data = page(1, 1, 0, b"first-frame");
        let first_eos = page(1, 2, FLAG_EOS, b"first-last");
        let second_bos = page(2, 0, FLAG_BOS, b"second-id");
        let second_data = page(2, 1, 0, b"second-frame");

        let mut stream = Vec::new();
        for p in [&first_bos, &first_data, &first_eos, &second_bos, &second_data] {
            stream.extend_from_slice(p);
        }

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Theora, mock);

        let units = drain(&mut reader).await;
        assert_eq!(units.len(), 5);

        let mut expected_header = second_bos.clone();
        expected_header.extend_from_slice(&second_data);
        assert_eq!(&reader.header()[..], &expected_header[..]);
    }

    #[tokio::test]
    async fn test_header_kept_while_a_stream_is_live() {
        let video_bos = page(10, 0, FLAG_BOS, b"theora-id");
        let video_data = page(10, 1, 0, b"frame");
        let audio_bos = page(20, 0, FLAG_BOS, b"vorbis-id");
        let audio_eos = page(20, 1, FLAG_EOS, b"samples");
        let late_bos = page(30, 0, FLAG_BOS, b"late-id");

        let mut stream = Vec::new();
        for p in [&video_bos, &video_data, &audio_bos, &audio_eos, &late_bos] {
            stream.extend_from_slice(p);
        }

        let mock = tokio_test::io::Builder::new().read(&stream).build();
        let mut reader = FramingReader::new(MediaType::Theora, mock);
        drain(&mut reader).await;

        let header = reader.header();
        assert!(header.starts_with(&video_bos));
        assert!(header.ends_with(&late_bos));
    }
}
