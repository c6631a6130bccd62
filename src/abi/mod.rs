//! Guest ABI marshaling
//!
//! Every host/guest exchange goes through buffers the guest declares once, via
//! the meta table:
//!
//! ```text
//! meta ptr ─► [ buf | buf_cap | buf_len | err | err_cap | err_len | val ]   (7 × u32 LE)
//!               │      │         │        │     │         │         │
//!               ▼      ▼         ▼        ▼     ▼         ▼         ▼
//!             data   u32 cap   u32 len  error u32 cap   u32 len   u64 value slot
//! ```
//!
//! Capacities and lengths live in guest memory and are read on each access.
//! Any access outside the declared bounds is an [`AbiError`], which the
//! embedding must treat as fatal.

mod codec;
pub use codec::*;


use bytes::Bytes;

use crate::constants::META_FIELD_COUNT;
use crate::AbiError;
use crate::Error;
use crate::Result;

/// Raw access to a guest's linear memory.
///
/// Implementations return `None`/`false` when the range falls outside memory;
/// they never panic.
pub trait GuestMemory {
    fn read(
        &self,
        offset: u32,
        len: u32,
    ) -> Option<Vec<u8>>;

    fn write(
        &mut self,
        offset: u32,
        data: &[u8],
    ) -> bool;

    fn read_u32_le(
        &self,
        offset: u32,
    ) -> Option<u32> {
        let b = self.read(offset, 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_le(
        &self,
        offset: u32,
    ) -> Option<u64> {
        let b = self.read(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b);
        Some(u64::from_le_bytes(raw))
    }

    fn write_u32_le(
        &mut self,
        offset: u32,
        val: u32,
    ) -> bool {
        self.write(offset, &val.to_le_bytes())
    }

    fn write_u64_le(
        &mut self,
        offset: u32,
        val: u64,
    ) -> bool {
        self.write(offset, &val.to_le_bytes())
    }
}

/// A guest instance: memory plus the ability to call its exports.
pub trait GuestModule: GuestMemory + Send {
    /// Calls a no-argument export and returns its result stack.
    fn call(
        &mut self,
        export: &str,
    ) -> Result<Vec<u64>>;
}

/// Guest-declared offsets, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Meta {
    pub ptr_buf: u32,
    pub ptr_buf_cap: u32,
    pub ptr_buf_len: u32,
    pub ptr_err: u32,
    pub ptr_err_cap: u32,
    pub ptr_err_len: u32,
    pub ptr_val: u32,
}

/// Calls the guest's meta export and reads the table it points at.
pub fn load_meta<M: GuestModule + ?Sized>(
    m: &mut M,
    export: &str,
) -> Result<Meta> {
    let stack = m.call(export)?;
    let ptr = stack.first().copied().ok_or_else(|| Error::GuestCall {
        export: export.to_string(),
        reason: "meta export returned no value".to_string(),
    })?;
    Ok(read_meta(&*m, ptr as u32)?)
}

/// Reads the 7-field meta table at `ptr`.
pub fn read_meta<M: GuestMemory + ?Sized>(
    m: &M,
    ptr: u32,
) -> std::result::Result<Meta, AbiError> {
    let mut fields = [0u32; META_FIELD_COUNT as usize];
    for (i, field) in fields.iter_mut().enumerate() {
        let offset = ptr
            .checked_add(4 * i as u32)
            .ok_or(AbiError::OutOfRange { offset: ptr, len: 4 * META_FIELD_COUNT })?;
        *field = read_u32(m, offset)?;
    }
    let [ptr_buf, ptr_buf_cap, ptr_buf_len, ptr_err, ptr_err_cap, ptr_err_len, ptr_val] = fields;
    Ok(Meta {
        ptr_buf,
        ptr_buf_cap,
        ptr_buf_len,
        ptr_err,
        ptr_err_cap,
        ptr_err_len,
        ptr_val,
    })
}

impl Meta {
    /// Current contents of the data buffer, up to its declared length.
    pub fn read_data<M: GuestMemory + ?Sized>(
        &self,
        m: &M,
    ) -> std::result::Result<Vec<u8>, AbiError> {
        read_bounded(m, self.ptr_buf, self.ptr_buf_len, self.ptr_buf_cap)
    }

    /// Replaces the data buffer contents and sets its length.
    pub fn write_data<M: GuestMemory + ?Sized>(
        &self,
        m: &mut M,
        data: &[u8],
    ) -> std::result::Result<(), AbiError> {
        let capacity = read_u32(m, self.ptr_buf_cap)?;
        if data.len() > capacity as usize {
            return Err(AbiError::DataTooLarge {
                len: data.len(),
                capacity,
            });
        }
        write(m, self.ptr_buf, data)?;
        write_u32(m, self.ptr_buf_len, data.len() as u32)
    }

    /// Decodes the data buffer as a key list.
    pub fn read_key_list<M: GuestMemory + ?Sized>(
        &self,
        m: &M,
    ) -> std::result::Result<Vec<Bytes>, AbiError> {
        decode_key_list(&self.read_data(m)?)
    }

    pub fn read_value<M: GuestMemory + ?Sized>(
        &self,
        m: &M,
    ) -> std::result::Result<u64, AbiError> {
        m.read_u64_le(self.ptr_val).ok_or(AbiError::OutOfRange {
            offset: self.ptr_val,
            len: 8,
        })
    }

    pub fn write_value<M: GuestMemory + ?Sized>(
        &self,
        m: &mut M,
        val: u64,
    ) -> std::result::Result<(), AbiError> {
        if m.write_u64_le(self.ptr_val, val) {
            Ok(())
        } else {
            Err(AbiError::OutOfRange {
                offset: self.ptr_val,
                len: 8,
            })
        }
    }

    /// Error text the guest left in its error buffer, if any.
    pub fn read_error<M: GuestMemory + ?Sized>(
        &self,
        m: &M,
    ) -> std::result::Result<Option<String>, AbiError> {
        let b = read_bounded(m, self.ptr_err, self.ptr_err_len, self.ptr_err_cap)?;
        if b.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&b).into_owned()))
    }

    /// Writes `msg` into the error buffer, truncated to the declared capacity.
    /// `None` clears it.
    pub fn write_error<M: GuestMemory + ?Sized>(
        &self,
        m: &mut M,
        msg: Option<&str>,
    ) -> std::result::Result<(), AbiError> {
        let msg = msg.unwrap_or_default();
        let capacity = read_u32(m, self.ptr_err_cap)? as usize;
        let mut end = msg.len().min(capacity);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        let msg = &msg.as_bytes()[..end];
        write(m, self.ptr_err, msg)?;
        write_u32(m, self.ptr_err_len, msg.len() as u32)
    }
}

/// Reads `[ptr, ptr + *ptr_cap)` and cuts it to `*ptr_len`.
fn read_bounded<M: GuestMemory + ?Sized>(
    m: &M,
    ptr: u32,
    ptr_len: u32,
    ptr_cap: u32,
) -> std::result::Result<Vec<u8>, AbiError> {
    let capacity = read_u32(m, ptr_cap)?;
    let len = read_u32(m, ptr_len)?;
    if len > capacity {
        return Err(AbiError::LengthExceedsCapacity { len, capacity });
    }
    let mut buf = m.read(ptr, capacity).ok_or(AbiError::OutOfRange {
        offset: ptr,
        len: capacity,
    })?;
    buf.truncate(len as usize);
    Ok(buf)
}

fn read_u32<M: GuestMemory + ?Sized>(
    m: &M,
    ptr: u32,
) -> std::result::Result<u32, AbiError> {
    m.read_u32_le(ptr).ok_or(AbiError::OutOfRange { offset: ptr, len: 4 })
}

fn write_u32<M: GuestMemory + ?Sized>(
    m: &mut M,
    ptr: u32,
    val: u32,
) -> std::result::Result<(), AbiError> {
    if m.write_u32_le(ptr, val) {
        Ok(())
    } else {
        Err(AbiError::OutOfRange { offset: ptr, len: 4 })
    }
}

fn write<M: GuestMemory + ?Sized>(
    m: &mut M,
    ptr: u32,
    data: &[u8],
) -> std::result::Result<(), AbiError> {
    if m.write(ptr, data) {
        Ok(())
    } else {
        Err(AbiError::OutOfRange {
            offset: ptr,
            len: data.len() as u32,
        })
    }
}
