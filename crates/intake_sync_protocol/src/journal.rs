//! Journal record framing.
//!
//! The queue is persisted as an append-only sequence of records:
//!
//! ```text
//! magic "IQJR" (4) | version u16 (2) | type u8 (1) | len u32 (4) | header crc32 (4)
//!     | body (len) | crc32 (4)
//! ```
//!
//! Integers are little-endian. The header CRC covers the eleven bytes
//! before it; the trailing CRC covers everything before it. Bodies are
//! JSON so mutations keep fields this build does not understand.
//!
//! A record cut short at the end of the journal is a torn write from a
//! crash and is reported as such, never as corruption: the caller truncates
//! it away. A torn write only ever loses a suffix, so a complete header
//! that fails its checksum, or claims a body over [`MAX_RECORD_LEN`], is
//! corruption even when the claimed body runs past the end. So is a
//! damaged record followed by more data.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::{Mutation, MutationId};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"IQJR";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Largest body a record may carry.
pub const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// magic (4) + version (2) + type (1) + length (4)
const PREAMBLE_SIZE: usize = 11;

/// Preamble plus its checksum.
const HEADER_SIZE: usize = PREAMBLE_SIZE + 4;

const CRC_SIZE: usize = 4;

const TYPE_APPEND: u8 = 1;
const TYPE_UPDATE: u8 = 2;
const TYPE_REMOVE: u8 = 3;

/// One journal entry.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// A mutation entered the queue.
    Append(Mutation),
    /// A queued mutation changed (attempt count, status, payload, key).
    Update(Mutation),
    /// A mutation left the queue (delivered or discarded).
    Remove(MutationId),
}

#[derive(Serialize, Deserialize)]
struct RemoveBody {
    id: MutationId,
}

impl JournalRecord {
    fn type_byte(&self) -> u8 {
        match self {
            JournalRecord::Append(_) => TYPE_APPEND,
            JournalRecord::Update(_) => TYPE_UPDATE,
            JournalRecord::Remove(_) => TYPE_REMOVE,
        }
    }

    /// Encodes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized or exceeds
    /// [`MAX_RECORD_LEN`].
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let body = match self {
            JournalRecord::Append(m) | JournalRecord::Update(m) => serde_json::to_vec(m)?,
            JournalRecord::Remove(id) => serde_json::to_vec(&RemoveBody { id: *id })?,
        };
        let len = u32::try_from(body.len())
            .ok()
            .filter(|_| body.len() <= MAX_RECORD_LEN)
            .ok_or_else(|| ProtocolError::invalid("journal record body exceeds 16 MiB"))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        out.extend_from_slice(&JOURNAL_MAGIC);
        out.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        out.push(self.type_byte());
        out.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&out);
        out.extend_from_slice(&header_crc.to_le_bytes());
        out.extend_from_slice(&body);
        let crc = compute_crc32(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    fn decode_body(record_type: u8, body: &[u8], offset: u64) -> ProtocolResult<Self> {
        match record_type {
            TYPE_APPEND => Ok(JournalRecord::Append(serde_json::from_slice(body)?)),
            TYPE_UPDATE => Ok(JournalRecord::Update(serde_json::from_slice(body)?)),
            TYPE_REMOVE => {
                let RemoveBody { id } = serde_json::from_slice(body)?;
                Ok(JournalRecord::Remove(id))
            }
            other => Err(ProtocolError::Corrupted {
                offset,
                reason: format!("unknown record type {}", other),
            }),
        }
    }
}

/// Result of scanning a journal.
#[derive(Debug, Clone, Default)]
pub struct JournalScan {
    /// Decoded records in write order.
    pub records: Vec<JournalRecord>,
    /// Length of the intact prefix; anything after it is a torn tail.
    pub valid_len: u64,
    /// Whether a torn trailing record was found.
    pub torn_tail: bool,
}

impl JournalScan {
    /// Decodes every record in `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Corrupted`] for a damaged header anywhere or
    /// a damaged record that is not at the tail, and
    /// [`ProtocolError::UnsupportedVersion`] for records written by a newer
    /// format.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut scan = JournalScan::default();
        let mut pos = 0usize;

        while pos < bytes.len() {
            let offset = pos as u64;
            let remaining = &bytes[pos..];

            if remaining.len() < HEADER_SIZE {
                scan.torn_tail = true;
                break;
            }
            if remaining[0..4] != JOURNAL_MAGIC {
                return Err(ProtocolError::Corrupted {
                    offset,
                    reason: "bad magic".into(),
                });
            }

            let version = u16::from_le_bytes([remaining[4], remaining[5]]);
            if version > JOURNAL_VERSION {
                return Err(ProtocolError::UnsupportedVersion {
                    found: version,
                    supported: JOURNAL_VERSION,
                });
            }

            if compute_crc32(&remaining[..PREAMBLE_SIZE]) != read_u32(remaining, PREAMBLE_SIZE) {
                return Err(ProtocolError::Corrupted {
                    offset,
                    reason: "header checksum mismatch".into(),
                });
            }

            let record_type = remaining[6];
            let len = read_u32(remaining, 7) as usize;
            if len > MAX_RECORD_LEN {
                return Err(ProtocolError::Corrupted {
                    offset,
                    reason: format!("record length {} exceeds {}", len, MAX_RECORD_LEN),
                });
            }
            let total = HEADER_SIZE + len + CRC_SIZE;
            if remaining.len() < total {
                scan.torn_tail = true;
                break;
            }

            let crc_at = HEADER_SIZE + len;
            if compute_crc32(&remaining[..crc_at]) != read_u32(remaining, crc_at) {
                if remaining.len() == total {
                    scan.torn_tail = true;
                    break;
                }
                return Err(ProtocolError::Corrupted {
                    offset,
                    reason: "checksum mismatch".into(),
                });
            }

            let body = &remaining[HEADER_SIZE..crc_at];
            scan.records
                .push(JournalRecord::decode_body(record_type, body, offset)?);
            pos += total;
            scan.valid_len = pos as u64;
        }

        Ok(scan)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
