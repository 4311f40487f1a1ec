use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};
use crate::index::btree::error::BTreeError;

/// The first allocated page holds the index directory: a count followed by
/// `{name_len(u16) | name bytes | root_page_id(u32)}` records. Every root
/// change writes through so a reopened database can find its trees again.
pub const HEADER_PAGE_ID: PageId = 1;

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

fn record_count(data: &[u8]) -> u32 {
    LittleEndian::read_u32(&data[COUNT_OFFSET..COUNT_OFFSET + 4])
}

fn set_record_count(data: &mut [u8], count: u32) {
    LittleEndian::write_u32(&mut data[COUNT_OFFSET..COUNT_OFFSET + 4], count);
}

/// Walk the records, yielding `(name_range, root_offset, next_offset)`.
fn walk(data: &[u8]) -> Vec<(std::ops::Range<usize>, usize)> {
    let mut records = Vec::new();
    let mut offset = RECORDS_OFFSET;
    for _ in 0..record_count(data) {
        let name_len = LittleEndian::read_u16(&data[offset..offset + 2]) as usize;
        let name_start = offset + 2;
        let root_offset = name_start + name_len;
        records.push((name_start..root_offset, root_offset));
        offset = root_offset + 4;
    }
    records
}

/// Root page id registered under `name`, if any.
pub fn lookup_root(page: &Page, name: &str) -> Option<PageId> {
    walk(&page.data)
        .into_iter()
        .find(|(name_range, _)| &page.data[name_range.clone()] == name.as_bytes())
        .map(|(_, root_offset)| LittleEndian::read_u32(&page.data[root_offset..root_offset + 4]))
}

/// Register or update the root page id for `name`.
pub fn upsert_root(page: &mut Page, name: &str, root: PageId) -> Result<(), BTreeError> {
    if let Some((_, root_offset)) = walk(&page.data)
        .into_iter()
        .find(|(name_range, _)| &page.data[name_range.clone()] == name.as_bytes())
    {
        LittleEndian::write_u32(&mut page.data[root_offset..root_offset + 4], root);
        return Ok(());
    }

    let end = walk(&page.data)
        .last()
        .map(|(_, root_offset)| root_offset + 4)
        .unwrap_or(RECORDS_OFFSET);
    let needed = 2 + name.len() + 4;
    if end + needed > PAGE_SIZE {
        return Err(BTreeError::HeaderSpaceExhausted);
    }

    LittleEndian::write_u16(&mut page.data[end..end + 2], name.len() as u16);
    page.data[end + 2..end + 2 + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_u32(&mut page.data[end + 2 + name.len()..end + needed], root);
    let count = record_count(&page.data);
    set_record_count(&mut page.data, count + 1);
    Ok(())
}
