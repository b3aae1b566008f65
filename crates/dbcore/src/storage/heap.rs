//! Module: storage::heap
//! Responsibility: `HeapFile`, a slotted fixed-record-width heap file
//! built on a `PageStore`. Owns the bitmap-header page layout and slot
//! allocation; does not own index maintenance or locking.

use crate::storage::page_store::{PageId, PageStore};
use dbcore_types::error::{DbError, ErrorKind, ErrorOrigin};
use dbcore_types::record::Record;
use dbcore_types::rid::Rid;
use std::sync::Arc;

/// Bytes reserved at the front of every page for the slot-occupancy
/// bitmap and slot count, ahead of the fixed-width record slots.
const PAGE_HEADER_LEN: usize = 8;

fn slots_per_page(page_size: usize, record_size: usize) -> usize {
    let usable_bits = (page_size - PAGE_HEADER_LEN) * 8;
    let mut slots = usable_bits / (record_size * 8 + 1);
    while (slots + 7) / 8 + slots * record_size + PAGE_HEADER_LEN > page_size {
        slots -= 1;
    }
    slots.max(1)
}

fn bitmap_len(slots: usize) -> usize {
    (slots + 7) / 8
}

fn is_slot_set(bitmap: &[u8], slot: usize) -> bool {
    bitmap[slot / 8] & (1 << (slot % 8)) != 0
}

fn set_slot(bitmap: &mut [u8], slot: usize, occupied: bool) {
    if occupied {
        bitmap[slot / 8] |= 1 << (slot % 8);
    } else {
        bitmap[slot / 8] &= !(1 << (slot % 8));
    }
}

fn storage_err(message: impl Into<String>) -> DbError {
    DbError::new(ErrorKind::Internal, ErrorOrigin::Storage, message)
}

/// A fixed-record-width heap of slotted pages.
pub struct HeapFile {
    store: Arc<dyn PageStore>,
    record_size: usize,
    slots_per_page: usize,
}

impl HeapFile {
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>, record_size: usize) -> Self {
        let slots_per_page = slots_per_page(store.page_size(), record_size);
        Self {
            store,
            record_size,
            slots_per_page,
        }
    }

    fn slot_offset(&self, slot: usize) -> usize {
        PAGE_HEADER_LEN + bitmap_len(self.slots_per_page) + slot * self.record_size
    }

    fn read_bitmap(page: &[u8], bitmap_len: usize) -> &[u8] {
        &page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + bitmap_len]
    }

    fn slot_count(page: &[u8]) -> u32 {
        u32::from_le_bytes(page[0..4].try_into().unwrap())
    }

    fn set_slot_count(page: &mut [u8], count: u32) {
        page[0..4].copy_from_slice(&count.to_le_bytes());
    }

    fn next_free_page(page: &[u8]) -> u32 {
        u32::from_le_bytes(page[4..8].try_into().unwrap())
    }

    fn set_next_free_page(page: &mut [u8], next: u32) {
        page[4..8].copy_from_slice(&next.to_le_bytes());
    }

    fn new_empty_page(&self) -> Result<PageId, DbError> {
        let page_id = self.store.new_page()?;
        let mut page = vec![0u8; self.store.page_size()];
        Self::set_slot_count(&mut page, 0);
        Self::set_next_free_page(&mut page, u32::MAX);
        self.store.write_page(page_id, &page)?;
        Ok(page_id)
    }

    /// Insert `record` into the first page with a free slot, allocating a
    /// fresh page when every existing page is full. Returns the assigned
    /// `Rid`.
    pub fn insert(&self, record: &Record) -> Result<Rid, DbError> {
        if record.size() != self.record_size {
            return Err(storage_err(format!(
                "record size {} does not match heap record size {}",
                record.size(),
                self.record_size
            )));
        }
        let bmp_len = bitmap_len(self.slots_per_page);
        let num_pages = self.store.num_pages();
        for page_no in 0..num_pages.max(1) {
            let page_id: PageId = if page_no < num_pages {
                page_no
            } else {
                self.new_empty_page()?
            };
            let mut page = self.store.fetch(page_id)?;
            let bitmap = Self::read_bitmap(&page, bmp_len).to_vec();
            if let Some(slot) = (0..self.slots_per_page).find(|&s| !is_slot_set(&bitmap, s)) {
                let offset = self.slot_offset(slot);
                page[offset..offset + self.record_size].copy_from_slice(&record.data);
                let mut bitmap = bitmap;
                set_slot(&mut bitmap, slot, true);
                page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + bmp_len].copy_from_slice(&bitmap);
                let count = Self::slot_count(&page) + 1;
                Self::set_slot_count(&mut page, count);
                self.store.write_page(page_id, &page)?;
                return Ok(Rid::new(page_id, slot as u32));
            }
        }
        let page_id = self.new_empty_page()?;
        let mut page = self.store.fetch(page_id)?;
        let mut bitmap = vec![0u8; bmp_len];
        set_slot(&mut bitmap, 0, true);
        page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + bmp_len].copy_from_slice(&bitmap);
        let offset = self.slot_offset(0);
        page[offset..offset + self.record_size].copy_from_slice(&record.data);
        Self::set_slot_count(&mut page, 1);
        self.store.write_page(page_id, &page)?;
        Ok(Rid::new(page_id, 0))
    }

    /// Insert at a caller-specified `rid`, used by recovery redo and by
    /// undo-of-delete. Allocates pages up to `rid.page_no` if necessary.
    pub fn insert_at(&self, rid: Rid, record: &Record) -> Result<(), DbError> {
        while self.store.num_pages() <= rid.page_no {
            self.new_empty_page()?;
        }
        let bmp_len = bitmap_len(self.slots_per_page);
        let mut page = self.store.fetch(rid.page_no)?;
        let offset = self.slot_offset(rid.slot_no as usize);
        page[offset..offset + self.record_size].copy_from_slice(&record.data);
        let mut bitmap = Self::read_bitmap(&page, bmp_len).to_vec();
        let was_set = is_slot_set(&bitmap, rid.slot_no as usize);
        set_slot(&mut bitmap, rid.slot_no as usize, true);
        page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + bmp_len].copy_from_slice(&bitmap);
        if !was_set {
            let count = Self::slot_count(&page) + 1;
            Self::set_slot_count(&mut page, count);
        }
        self.store.write_page(rid.page_no, &page)?;
        Ok(())
    }

    pub fn get(&self, rid: Rid) -> Result<Record, DbError> {
        let page = self.store.fetch(rid.page_no)?;
        let bmp_len = bitmap_len(self.slots_per_page);
        let bitmap = Self::read_bitmap(&page, bmp_len);
        if !is_slot_set(bitmap, rid.slot_no as usize) {
            return Err(storage_err(format!("rid {rid} is not occupied")));
        }
        let offset = self.slot_offset(rid.slot_no as usize);
        Ok(Record::new(page[offset..offset + self.record_size].to_vec()))
    }

    pub fn update(&self, rid: Rid, record: &Record) -> Result<(), DbError> {
        let mut page = self.store.fetch(rid.page_no)?;
        let bmp_len = bitmap_len(self.slots_per_page);
        let bitmap = Self::read_bitmap(&page, bmp_len);
        if !is_slot_set(bitmap, rid.slot_no as usize) {
            return Err(storage_err(format!("rid {rid} is not occupied")));
        }
        let offset = self.slot_offset(rid.slot_no as usize);
        page[offset..offset + self.record_size].copy_from_slice(&record.data);
        self.store.write_page(rid.page_no, &page)?;
        Ok(())
    }

    pub fn delete(&self, rid: Rid) -> Result<(), DbError> {
        let mut page = self.store.fetch(rid.page_no)?;
        let bmp_len = bitmap_len(self.slots_per_page);
        let mut bitmap = Self::read_bitmap(&page, bmp_len).to_vec();
        if !is_slot_set(&bitmap, rid.slot_no as usize) {
            return Err(storage_err(format!("rid {rid} is not occupied")));
        }
        set_slot(&mut bitmap, rid.slot_no as usize, false);
        page[PAGE_HEADER_LEN..PAGE_HEADER_LEN + bmp_len].copy_from_slice(&bitmap);
        let count = Self::slot_count(&page) - 1;
        Self::set_slot_count(&mut page, count);
        self.store.write_page(rid.page_no, &page)?;
        Ok(())
    }

    /// Iterate every occupied `(Rid, Record)` in page/slot order, the
    /// iteration order `SeqScan` relies on.
    pub fn scan(&self) -> Result<Vec<(Rid, Record)>, DbError> {
        let mut out = Vec::new();
        let bmp_len = bitmap_len(self.slots_per_page);
        for page_no in 0..self.store.num_pages() {
            let page = self.store.fetch(page_no)?;
            let bitmap = Self::read_bitmap(&page, bmp_len);
            for slot in 0..self.slots_per_page {
                if is_slot_set(bitmap, slot) {
                    let offset = self.slot_offset(slot);
                    let data = page[offset..offset + self.record_size].to_vec();
                    out.push((Rid::new(page_no, slot as u32), Record::new(data)));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_store::InMemoryPageStore;

    fn heap(record_size: usize) -> HeapFile {
        HeapFile::new(Arc::new(InMemoryPageStore::new(256)), record_size)
    }

    #[test]
    fn insert_get_roundtrip() {
        let heap = heap(8);
        let record = Record::new(vec![7u8; 8]);
        let rid = heap.insert(&record).unwrap();
        assert_eq!(heap.get(rid).unwrap(), record);
    }

    #[test]
    fn delete_frees_slot_for_reuse() {
        let heap = heap(8);
        let a = heap.insert(&Record::new(vec![1u8; 8])).unwrap();
        heap.delete(a).unwrap();
        let b = heap.insert(&Record::new(vec![2u8; 8])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn scan_returns_only_occupied_slots() {
        let heap = heap(4);
        let a = heap.insert(&Record::new(vec![1u8; 4])).unwrap();
        let _b = heap.insert(&Record::new(vec![2u8; 4])).unwrap();
        heap.delete(a).unwrap();
        let scanned = heap.scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].1.data, vec![2u8; 4]);
    }

    #[test]
    fn insert_spills_across_pages() {
        let heap = heap(64);
        for i in 0..20u8 {
            heap.insert(&Record::new(vec![i; 64])).unwrap();
        }
        assert_eq!(heap.scan().unwrap().len(), 20);
    }
}
