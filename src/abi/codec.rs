//! Key-list wire format
//!
//! A key list is a packed sequence of `[u16 big-endian length][bytes]` records.
//! The same framing carries Flush keys and the `(id, from, to)` triple of Open.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;

use crate::constants::RECORD_HEADER_LEN;
use crate::AbiError;

/// Decodes every record in `buf`. `buf` must already be cut to the declared
/// length; bytes past it are never looked at.
pub fn decode_key_list(buf: &[u8]) -> Result<Vec<Bytes>, AbiError> {
    let mut keys = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        let offset = buf.len() - rest.len();
        if rest.len() < RECORD_HEADER_LEN {
            return Err(AbiError::TruncatedRecord {
                offset,
                declared: RECORD_HEADER_LEN,
                remaining: rest.len(),
            });
        }
        let len = rest.get_u16() as usize;
        if rest.len() < len {
            return Err(AbiError::TruncatedRecord {
                offset,
                declared: len,
                remaining: rest.len(),
            });
        }
        keys.push(Bytes::copy_from_slice(&rest[..len]));
        rest.advance(len);
    }
    Ok(keys)
}

/// Packs keys into batches no larger than `capacity`.
///
/// When the next record does not fit, the current batch is handed back and a
/// new one is started, so a publisher can issue one Flush per batch.
#[derive(Debug)]
pub struct KeyListEncoder {
    capacity: usize,
    buf: Vec<u8>,
}

impl KeyListEncoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Appends one key. Returns the finished batch if the key overflowed it.
    pub fn push(
        &mut self,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, AbiError> {
        let record_len = RECORD_HEADER_LEN + key.len();
        if key.len() > u16::MAX as usize || record_len > self.capacity {
            return Err(AbiError::RecordTooLarge { len: key.len() });
        }

        let full = if self.buf.len() + record_len > self.capacity {
            Some(std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity)))
        } else {
            None
        };

        self.buf.put_u16(key.len() as u16);
        self.buf.put_slice(key);
        Ok(full)
    }

    /// Returns the trailing batch, if it holds anything.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf)
        }
    }
}

/// Encodes `keys` into as many batches as `capacity` requires.
pub fn encode_key_list<K: AsRef<[u8]>>(
    keys: &[K],
    capacity: usize,
) -> Result<Vec<Vec<u8>>, AbiError> {
    let mut encoder = KeyListEncoder::new(capacity);
    let mut batches = Vec::new();
    for key in keys {
        if let Some(batch) = encoder.push(key.as_ref())? {
            batches.push(batch);
        }
    }
    batches.extend(encoder.finish());
    Ok(batches)
}
