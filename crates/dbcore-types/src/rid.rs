//! Module: rid
//! Responsibility: `Rid`, the (page-no, slot-no) identifier stable for a
//! row's lifetime in its heap file.

use std::fmt;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Rid {
    pub page_no: u32,
    pub slot_no: u32,
}

impl Rid {
    #[must_use]
    pub const fn new(page_no: u32, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }

    /// Fixed 8-byte wire image used by log records and spill files.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..].copy_from_slice(&self.slot_no.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_no: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            slot_no: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}
