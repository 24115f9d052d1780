//! ### GUID Partition Table structures
//!
//! On-disk layout of the GPT found at LBA 1 of a RAWNAND, read with the
//! `binrw` crate.  Only the fields the inspector needs are interpreted; the
//! type and unique GUIDs are carried but ignored.

use std::io::Cursor;
use binrw::BinRead;
use log::{debug,warn};
use crate::SECTOR_SIZE;

pub const ENTRY_SIZE: usize = 128;
const SIGNATURE: [u8;8] = *b"EFI PART";

/// GPT header at LBA 1.  Little-endian throughout.
#[derive(BinRead,Debug)]
#[br(little)]
pub struct GptHeader {
    pub signature: [u8;8],
    pub revision: u32,
    pub header_size: u32,
    pub header_crc: u32,
    pub reserved: u32,
    pub my_lba: u64,
    pub alt_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8;16],
    /// first LBA of the entry array
    pub part_ent_lba: u64,
    pub num_part_ents: u32,
    pub part_ent_size: u32,
    pub part_ents_crc: u32
}

/// One 128-byte GPT entry.
#[derive(BinRead,Debug)]
#[br(little)]
pub struct GptEntry {
    pub type_guid: [u8;16],
    pub unique_guid: [u8;16],
    pub lba_start: u64,
    pub lba_end: u64,
    pub attrs: u64,
    pub name_utf16: [u16;36]
}

impl GptEntry {
    /// Partition name translated UTF-16LE to UTF-8, cut at the first NUL.
    pub fn name(&self) -> String {
        let end = self.name_utf16.iter().position(|c| *c==0).unwrap_or(self.name_utf16.len());
        String::from_utf16_lossy(&self.name_utf16[0..end])
    }
}

/// Parse the table from a buffer that begins at LBA 1 (the header sector).
/// Returns the entries in GPT index order.  The entry count is clamped to
/// what the buffer actually holds.
pub fn parse(buf: &[u8]) -> Result<Vec<GptEntry>,crate::DYNERR> {
    let hdr = GptHeader::read(&mut Cursor::new(buf))?;
    if hdr.signature != SIGNATURE {
        warn!("GPT signature mismatch, parsing anyway");
    }
    if hdr.part_ent_lba < 1 {
        warn!("GPT entry array LBA {} out of range",hdr.part_ent_lba);
        return Ok(Vec::new());
    }
    // the buffer starts at LBA 1, locate the entry array inside it
    let array_offset = (hdr.part_ent_lba as usize - 1) * SECTOR_SIZE;
    let available = buf.len().saturating_sub(array_offset) / ENTRY_SIZE;
    let count = usize::min(hdr.num_part_ents as usize,available);
    if count < hdr.num_part_ents as usize {
        warn!("GPT claims {} entries, buffer holds {}",hdr.num_part_ents,count);
    }
    let mut entries = Vec::new();
    for i in 0..count {
        let offset = array_offset + i * ENTRY_SIZE;
        let ent = GptEntry::read(&mut Cursor::new(&buf[offset..offset+ENTRY_SIZE]))?;
        // an all-zero entry slot is unused
        if ent.lba_start==0 && ent.lba_end==0 && ent.name_utf16[0]==0 {
            continue;
        }
        debug!("GPT entry {}: {} [{}..{}]",i,ent.name(),ent.lba_start,ent.lba_end);
        entries.push(ent);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_name(entry: &mut [u8],name: &str) {
        for (i,c) in name.encode_utf16().enumerate() {
            entry[56+2*i..58+2*i].copy_from_slice(&c.to_le_bytes());
        }
    }

    fn header_with(entries: u32) -> Vec<u8> {
        let mut buf = vec![0u8;0x4200];
        buf[0..8].copy_from_slice(b"EFI PART");
        buf[0x48..0x50].copy_from_slice(&2u64.to_le_bytes()); // part_ent_lba
        buf[0x50..0x54].copy_from_slice(&entries.to_le_bytes());
        buf[0x54..0x58].copy_from_slice(&(ENTRY_SIZE as u32).to_le_bytes());
        buf
    }

    #[test]
    fn parse_single_entry() {
        let mut buf = header_with(1);
        {
            let entry = &mut buf[SECTOR_SIZE..SECTOR_SIZE+ENTRY_SIZE];
            entry[32..40].copy_from_slice(&0x4000u64.to_le_bytes());
            entry[40..48].copy_from_slice(&0x7fffu64.to_le_bytes());
            put_name(entry,"SYSTEM");
        }
        let entries = parse(&buf).expect("parse failed");
        assert_eq!(entries.len(),1);
        assert_eq!(entries[0].name(),"SYSTEM");
        assert_eq!(entries[0].lba_start,0x4000);
        assert_eq!(entries[0].lba_end,0x7fff);
    }

    #[test]
    fn entry_count_clamped_to_buffer() {
        let buf = header_with(4096);
        let entries = parse(&buf).expect("parse failed");
        // unused slots are all zero and skipped, the point is no panic
        assert_eq!(entries.len(),0);
    }
}
