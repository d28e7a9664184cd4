//! ID Block codec
//!
//! ## Format
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │ Header word (u32, BE)        │ count × id (u64, BE)         │
//! │  bit 31: ALLIDS              │                              │
//! │  bit 30: INDIRECT            │                              │
//! │  bits 0-29: count            │                              │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//! An indirect block's ids are the first ids of its continuation blocks.

use bytes::{Buf, BufMut};

use crate::error::{LdbmError, Result};

use super::Id;

const ALLIDS_FLAG: u32 = 1 << 31;
const INDIRECT_FLAG: u32 = 1 << 30;
const COUNT_MASK: u32 = INDIRECT_FLAG - 1;

/// One stored value of an IDL key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdBlock {
    Empty,
    /// Sorted ids
    Leaf(Vec<Id>),
    /// First ids of the continuation blocks, sorted
    Indirect(Vec<Id>),
    AllIds,
}

impl IdBlock {
    pub fn encode(&self) -> Vec<u8> {
        let (flags, ids): (u32, &[Id]) = match self {
            IdBlock::Empty => (0, &[]),
            IdBlock::Leaf(ids) => (0, ids),
            IdBlock::Indirect(ids) => (INDIRECT_FLAG, ids),
            IdBlock::AllIds => (ALLIDS_FLAG, &[]),
        };

        let mut buf = Vec::with_capacity(4 + ids.len() * 8);
        buf.put_u32(flags | (ids.len() as u32 & COUNT_MASK));
        for id in ids {
            buf.put_u64(*id);
        }
        buf
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(LdbmError::Corruption(format!(
                "ID block too short: {} bytes",
                bytes.len()
            )));
        }

        let word = bytes.get_u32();
        let count = (word & COUNT_MASK) as usize;

        if word & ALLIDS_FLAG != 0 {
            return Ok(IdBlock::AllIds);
        }

        if bytes.remaining() != count * 8 {
            return Err(LdbmError::Corruption(format!(
                "ID block claims {} ids but carries {} bytes",
                count,
                bytes.remaining()
            )));
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(bytes.get_u64());
        }

        if word & INDIRECT_FLAG != 0 {
            Ok(IdBlock::Indirect(ids))
        } else if ids.is_empty() {
            Ok(IdBlock::Empty)
        } else {
            Ok(IdBlock::Leaf(ids))
        }
    }
}
