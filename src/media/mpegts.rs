//! MPEG-TS cell batching
//!
//! Transport stream cells have a fixed size, so framing is just reading a
//! whole number of cells. Cells are batched to keep per-unit overhead low.

use bytes::Bytes;

use crate::error::Result;

use super::reader::Source;

/// Transport stream cell size
pub const CELL_SIZE: usize = 188;

/// Cells read per unit
pub const CELLS_PER_UNIT: usize = 1050;

/// First byte of every well-formed cell
pub const SYNC_BYTE: u8 = 0x47;

/// Number of complete cells in `data` that do not start with the sync byte
pub fn count_unsynced(data: &[u8]) -> u64 {
    data.chunks_exact(CELL_SIZE)
        .filter(|cell| cell[0] != SYNC_BYTE)
        .count() as u64
}

pub(crate) struct MpegtsFramer {
    batch: usize,
}

impl MpegtsFramer {
    pub(crate) fn new() -> Self {
        Self {
            batch: CELL_SIZE * CELLS_PER_UNIT,
        }
    }

    pub(crate) async fn next_unit(&mut self, source: &mut Source) -> Result<Bytes> {
        let mut buf = vec![0u8; self.batch];
        let n = source.read_full(&mut buf).await?;
        buf.truncate(n);

        let broken = count_unsynced(&buf);
        if broken > 0 {
            source.shared().mark_broken(broken);
            tracing::trace!(cells = broken, "MPEG-TS cells without sync byte");
        }

        Ok(Bytes::from(buf))
    }
}
