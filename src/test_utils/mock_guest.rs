//! In-memory guest module for tests.
//!
//! Lays out its linear memory the way a real guest client does: a meta table at
//! offset 0 pointing at a data buffer, an error buffer, their cap/len words and
//! an 8-byte value slot. Exports the meta export and the receive export; the
//! receive export dispatches to a callback registered once via
//! [`MockGuest::receive`].

use std::sync::Arc;
use std::sync::OnceLock;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::abi::encode_key_list;
use crate::abi::GuestMemory;
use crate::abi::GuestModule;
use crate::abi::Meta;
use crate::constants::DEFAULT_META_EXPORT;
use crate::constants::DEFAULT_RECEIVE_EXPORT;
use crate::Error;
use crate::Result;

pub const META_PTR: u32 = 0;
const BUF_CAP_PTR: u32 = 32;
const BUF_LEN_PTR: u32 = 36;
const ERR_CAP_PTR: u32 = 40;
const ERR_LEN_PTR: u32 = 44;
const VAL_PTR: u32 = 48;
const BUF_PTR: u32 = 64;

pub const DEFAULT_BUF_CAP: u32 = 16 << 10;
pub const DEFAULT_ERR_CAP: u32 = 1 << 10;

/// Guest-side receive callback. Returns an error message to opt out of the watch.
pub type ReceiveFn = Box<dyn Fn(&Bytes, u64) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuestClientError {
    #[error("WatchRecv Already Registered")]
    ReceiveAlreadyRegistered,

    #[error("WatchRecv Not Registered")]
    ReceiveNotRegistered,
}

/// Clones share the receive callback, so a pool of clones behaves like a pool
/// of instances of the same guest binary.
#[derive(Clone)]
pub struct MockGuest {
    memory: Vec<u8>,
    meta: Meta,
    recv: Arc<OnceLock<ReceiveFn>>,
}

impl MockGuest {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUF_CAP, DEFAULT_ERR_CAP)
    }

    pub fn with_capacity(
        buf_cap: u32,
        err_cap: u32,
    ) -> Self {
        let ptr_err = BUF_PTR + buf_cap;
        let meta = Meta {
            ptr_buf: BUF_PTR,
            ptr_buf_cap: BUF_CAP_PTR,
            ptr_buf_len: BUF_LEN_PTR,
            ptr_err,
            ptr_err_cap: ERR_CAP_PTR,
            ptr_err_len: ERR_LEN_PTR,
            ptr_val: VAL_PTR,
        };
        let mut guest = Self {
            memory: vec![0; (ptr_err + err_cap) as usize],
            meta,
            recv: Arc::new(OnceLock::new()),
        };
        guest.write_u32_le(BUF_CAP_PTR, buf_cap);
        guest.write_u32_le(ERR_CAP_PTR, err_cap);
        guest
    }

    /// A guest whose callback forwards every notification to the returned channel.
    pub fn recording() -> (Self, mpsc::UnboundedReceiver<(Bytes, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let guest = Self::new();
        guest
            .receive(move |id, val| {
                let _ = tx.send((id.clone(), val));
                None
            })
            .unwrap();
        (guest, rx)
    }

    /// Registers the receive callback. Only the first registration wins.
    pub fn receive<F>(
        &self,
        f: F,
    ) -> std::result::Result<(), GuestClientError>
    where
        F: Fn(&Bytes, u64) -> Option<String> + Send + Sync + 'static,
    {
        self.recv
            .set(Box::new(f))
            .map_err(|_| GuestClientError::ReceiveAlreadyRegistered)
    }

    pub fn meta(&self) -> Meta {
        self.meta
    }

    /// Places `records` in the data buffer as one key-list batch.
    pub fn stage_records(
        &mut self,
        records: &[&[u8]],
    ) {
        let cap = self.read_u32_le(BUF_CAP_PTR).unwrap() as usize;
        let batch = encode_key_list(records, cap).unwrap().into_iter().next().unwrap_or_default();
        self.stage_raw(&batch);
    }

    /// Places raw bytes in the data buffer.
    pub fn stage_raw(
        &mut self,
        data: &[u8],
    ) {
        let meta = self.meta;
        meta.write_data(self, data).unwrap();
    }

    pub fn stage_value(
        &mut self,
        val: u64,
    ) {
        let meta = self.meta;
        meta.write_value(self, val).unwrap();
    }

    /// Overwrites the declared data length without touching its contents.
    pub fn set_data_len(
        &mut self,
        len: u32,
    ) {
        self.write_u32_le(BUF_LEN_PTR, len);
    }

    /// Error text the host left for the guest.
    pub fn last_error(&self) -> Option<String> {
        self.meta.read_error(self).unwrap()
    }

    fn on_receive(&mut self) -> Result<Vec<u64>> {
        let recv = self.recv.get().ok_or_else(|| Error::GuestCall {
            export: DEFAULT_RECEIVE_EXPORT.to_string(),
            reason: GuestClientError::ReceiveNotRegistered.to_string(),
        })?;
        let meta = self.meta;
        let id = Bytes::from(meta.read_data(self)?);
        let val = meta.read_value(self)?;
        let err = recv(&id, val);
        meta.write_error(self, err.as_deref())?;
        Ok(Vec::new())
    }
}

impl Default for MockGuest {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestMemory for MockGuest {
    fn read(
        &self,
        offset: u32,
        len: u32,
    ) -> Option<Vec<u8>> {
        let start = offset as usize;
        let end = start.checked_add(len as usize)?;
        self.memory.get(start..end).map(|b| b.to_vec())
    }

    fn write(
        &mut self,
        offset: u32,
        data: &[u8],
    ) -> bool {
        let start = offset as usize;
        let Some(end) = start.checked_add(data.len()) else {
            return false;
        };
        match self.memory.get_mut(start..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

impl GuestModule for MockGuest {
    fn call(
        &mut self,
        export: &str,
    ) -> Result<Vec<u64>> {
        match export {
            DEFAULT_META_EXPORT => {
                let m = self.meta;
                for (i, field) in [
                    m.ptr_buf,
                    m.ptr_buf_cap,
                    m.ptr_buf_len,
                    m.ptr_err,
                    m.ptr_err_cap,
                    m.ptr_err_len,
                    m.ptr_val,
                ]
                .into_iter()
                .enumerate()
                {
                    self.write_u32_le(META_PTR + 4 * i as u32, field);
                }
                Ok(vec![META_PTR as u64])
            }
            DEFAULT_RECEIVE_EXPORT => self.on_receive(),
            other => Err(Error::GuestCall {
                export: other.to_string(),
                reason: "export not found".to_string(),
            }),
        }
    }
}
