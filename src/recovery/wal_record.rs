//! WAL record types and on-disk framing.
//!
//! Each record is framed as:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     frame_len (bytes after this field)
//! 4       4     checksum (CRC32 over txn_id, kind, timestamp, payload)
//! 8       8     lsn
//! 16      8     txn_id
//! 24      1     kind
//! 25      8     timestamp (unix millis)
//! 33      -     payload
//! ```
//!
//! A scan stops at the first frame whose checksum does not match or that
//! is truncated; records before it stand.

use crate::common::config::PAGE_SIZE;
use crate::common::{Lsn, PageId, TxnId};

/// Kind of a WAL record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordKind {
    Begin = 1,
    Commit = 2,
    Abort = 3,
    ModifyPage = 4,
    CreateTable = 5,
    DropTable = 6,
    InsertTuple = 7,
    UpdateTuple = 8,
    DeleteTuple = 9,
    Checkpoint = 10,
}

impl WalRecordKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => WalRecordKind::Begin,
            2 => WalRecordKind::Commit,
            3 => WalRecordKind::Abort,
            4 => WalRecordKind::ModifyPage,
            5 => WalRecordKind::CreateTable,
            6 => WalRecordKind::DropTable,
            7 => WalRecordKind::InsertTuple,
            8 => WalRecordKind::UpdateTuple,
            9 => WalRecordKind::DeleteTuple,
            10 => WalRecordKind::Checkpoint,
            _ => return None,
        })
    }
}

/// A single WAL record.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub kind: WalRecordKind,
    /// Unix milliseconds at append time.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

/// Bytes of frame fields after `frame_len`, excluding the payload.
const FRAME_HEADER: usize = 4 + 8 + 8 + 1 + 8;

impl WalRecord {
    pub fn new(lsn: Lsn, txn_id: TxnId, kind: WalRecordKind, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            lsn,
            txn_id,
            kind,
            timestamp,
            payload,
        }
    }

    /// CRC32 over `{txn_id, kind, timestamp, payload}`.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.txn_id.0.to_le_bytes());
        hasher.update(&[self.kind as u8]);
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&self.payload);
        hasher.finalize()
    }

    /// Encode the full frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let frame_len = (FRAME_HEADER + self.payload.len()) as u32;
        let mut out = Vec::with_capacity(4 + frame_len as usize);
        out.extend_from_slice(&frame_len.to_le_bytes());
        out.extend_from_slice(&self.checksum().to_le_bytes());
        out.extend_from_slice(&self.lsn.0.to_le_bytes());
        out.extend_from_slice(&self.txn_id.0.to_le_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `None` when the buffer holds no complete, checksum-valid
    /// frame (truncation or corruption — the scan stops either way).
    /// On success returns the record and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Option<(WalRecord, usize)> {
        if buf.len() < 4 {
            return None;
        }
        let frame_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if frame_len < FRAME_HEADER || buf.len() < 4 + frame_len {
            return None;
        }
        let frame = &buf[4..4 + frame_len];

        let checksum = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let mut u64buf = [0u8; 8];
        u64buf.copy_from_slice(&frame[4..12]);
        let lsn = Lsn::new(u64::from_le_bytes(u64buf));
        u64buf.copy_from_slice(&frame[12..20]);
        let txn_id = TxnId::new(u64::from_le_bytes(u64buf));
        let kind = WalRecordKind::from_u8(frame[20])?;
        u64buf.copy_from_slice(&frame[21..29]);
        let timestamp = u64::from_le_bytes(u64buf);
        let payload = frame[29..].to_vec();

        let record = WalRecord::new(lsn, txn_id, kind, timestamp, payload);
        if record.checksum() != checksum {
            return None;
        }
        Some((record, 4 + frame_len))
    }
}

/// Payload of a `MODIFY_PAGE` record: full before and after images.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyPagePayload {
    pub page_id: PageId,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

impl ModifyPagePayload {
    pub fn encode(&self) -> Vec<u8> {
        debug_assert_eq!(self.before.len(), PAGE_SIZE);
        debug_assert_eq!(self.after.len(), PAGE_SIZE);
        let mut out = Vec::with_capacity(4 + 2 * PAGE_SIZE);
        out.extend_from_slice(&self.page_id.0.to_le_bytes());
        out.extend_from_slice(&self.before);
        out.extend_from_slice(&self.after);
        out
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() != 4 + 2 * PAGE_SIZE {
            return None;
        }
        let page_id = PageId::new(u32::from_le_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ]));
        Some(Self {
            page_id,
            before: payload[4..4 + PAGE_SIZE].to_vec(),
            after: payload[4 + PAGE_SIZE..].to_vec(),
        })
    }
}
