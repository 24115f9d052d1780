//! ### FAT32 directory structures
//!
//! A directory is a packed sequence of 32-byte entries.  Long file names are
//! spread over preceding slots, 13 UTF-16 characters each, tagged with a
//! sequence number and the checksum of the 8.3 record they decorate.  This
//! module reassembles them and flattens a directory table into `DirEntry`
//! values the rest of the crate works with.

use std::collections::BTreeMap;
use log::trace;

/// Size of the directory entry in bytes, always 32
pub const DIR_ENTRY_SIZE: usize = 32;
/// first name byte for a free entry
const FREE: u8 = 0xe5;
/// first name byte for a free entry, but also indicating no more entries to follow
const FREE_AND_NO_MORE: u8 = 0x00;
/// first name byte escaping an initial 0xe5
const KANJI_ESCAPE: u8 = 0x05;

pub const READ_ONLY: u8 = 1;
pub const HIDDEN: u8 = 2;
pub const SYSTEM: u8 = 4;
pub const VOLUME_ID: u8 = 8;
pub const DIRECTORY: u8 = 16;
pub const ARCHIVE: u8 = 32;
pub const LONG_NAME: u8 = 15;
pub const LONG_NAME_MASK: u8 = 63;
/// marks the final (first physical) slot of a long name chain
const LAST_LONG_SLOT: u8 = 0x40;
/// byte offsets of the 13 UTF-16 characters inside a long name slot
const LONG_CHAR_OFFS: [usize;13] = [1,3,5,7,9,14,16,18,20,22,24,28,30];

/// Directory record as handed to callers.  `data_offset` is the absolute
/// byte offset of the entry's first cluster within the partition, resolved
/// by the reader once the geometry is known.
#[derive(Clone,Debug)]
pub struct DirEntry {
    pub filename: String,
    pub first_cluster: u32,
    pub file_size: u32,
    pub is_directory: bool,
    pub data_offset: u64
}

/// Long name slots collected while walking toward their 8.3 record.
struct LongName {
    checksum: u8,
    chunks: BTreeMap<u8,Vec<u16>>
}

impl LongName {
    fn assemble(&self) -> String {
        let mut units: Vec<u16> = Vec::new();
        for chunk in self.chunks.values() {
            units.extend_from_slice(chunk);
        }
        // the name ends at the NUL, the rest of the last slot is 0xffff fill
        let end = units.iter().position(|u| *u==0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[0..end])
    }
}

/// checksum of the 11 bytes of an 8.3 name, ties long name slots to their record
fn short_name_checksum(name: &[u8]) -> u8 {
    name.iter().fold(0u8,|sum,b| sum.rotate_right(1).wrapping_add(*b))
}

fn short_name(raw: &[u8]) -> String {
    let mut base = raw[0..8].to_vec();
    if base[0]==KANJI_ESCAPE {
        base[0] = 0xe5;
    }
    let base = String::from_utf8_lossy(&base).trim_end().to_string();
    let ext = String::from_utf8_lossy(&raw[8..11]).trim_end().to_string();
    match ext.is_empty() {
        true => base,
        false => [base,".".to_string(),ext].concat()
    }
}

/// Flatten a directory table into entries, reassembling long names.
/// The buffer may span several chained clusters; parsing stops at the
/// no-more-entries mark.  Volume labels and free slots are skipped.
pub fn parse_dir_table(buf: &[u8]) -> Vec<DirEntry> {
    let mut ans: Vec<DirEntry> = Vec::new();
    let mut pending: Option<LongName> = None;
    for raw in buf.chunks_exact(DIR_ENTRY_SIZE) {
        if raw[0]==FREE_AND_NO_MORE {
            break;
        }
        if raw[0]==FREE {
            pending = None;
            continue;
        }
        let attr = raw[11];
        if attr & LONG_NAME_MASK == LONG_NAME {
            let seq = raw[0] & !LAST_LONG_SLOT;
            let mut chunk: Vec<u16> = Vec::new();
            for off in LONG_CHAR_OFFS {
                chunk.push(u16::from_le_bytes([raw[off],raw[off+1]]));
            }
            if raw[0] & LAST_LONG_SLOT != 0 {
                pending = Some(LongName { checksum: raw[13], chunks: BTreeMap::new() });
            }
            let matched = match pending.as_mut() {
                Some(long) if long.checksum==raw[13] => {
                    long.chunks.insert(seq,chunk);
                    true
                },
                _ => false
            };
            if !matched {
                // orphaned slot, drop whatever was collected
                pending = None;
            }
            continue;
        }
        if attr & VOLUME_ID != 0 {
            pending = None;
            continue;
        }
        let filename = match pending.take() {
            Some(long) if long.checksum==short_name_checksum(&raw[0..11]) => long.assemble(),
            _ => short_name(raw)
        };
        let first_cluster = u16::from_le_bytes([raw[26],raw[27]]) as u32
            | (u16::from_le_bytes([raw[20],raw[21]]) as u32) << 16;
        let file_size = u32::from_le_bytes([raw[28],raw[29],raw[30],raw[31]]);
        trace!("entry {} cluster {} size {}",filename,first_cluster,file_size);
        ans.push(DirEntry {
            filename,
            first_cluster,
            file_size,
            is_directory: attr & DIRECTORY != 0,
            data_offset: 0
        });
    }
    ans
}
