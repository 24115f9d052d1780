//! ## FAT32 Reader Module
//!
//! Read-only access to the FAT32 volumes the NX keeps on its SAFE, SYSTEM and
//! USER partitions.  Everything is routed through a `CryptoStream`, so the
//! same code serves encrypted and plaintext partitions.  The boot sector is in
//! `boot`, directory structures in `directory`; this module walks the file
//! allocation table, follows directory chains across clusters, resolves
//! slash-delimited paths, and counts free clusters.

pub mod boot;
pub mod directory;

use log::{debug,trace,error};
use crate::stream::CryptoStream;
use crate::{DYNERR,SECTOR_SIZE,CLUSTER_SIZE};
pub use boot::FsAttr;
pub use directory::DirEntry;

/// FAT entries at or above this mark end a cluster chain
const END_OF_CHAIN: u32 = 0x0fff_fff8;
/// first cluster number that can hold data
const FIRST_DATA_CLUSTER: u32 = 2;

/// Enumerates FAT32 errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("non-FAT volume")]
    NonFATVolume,
    #[error("file allocation table bad")]
    BadFAT,
    #[error("file not found")]
    FileNotFound
}

/// Read the boot sector through the stream and derive the volume attributes.
/// The read covers the whole first cluster, matching the granularity used
/// when a cipher is validated.
pub fn read_attr(stream: &mut CryptoStream) -> Result<FsAttr,DYNERR> {
    stream.seek(0)?;
    let mut buf = vec![0;CLUSTER_SIZE];
    let got = stream.read(&mut buf)?;
    if got < SECTOR_SIZE {
        return Err(Box::new(Error::NonFATVolume));
    }
    boot::read_boot_sector(&buf)
}

/// Look up one FAT entry, reading the sector that holds it.
fn fat_entry(stream: &mut CryptoStream,fs: &FsAttr,cluster: u32) -> Result<u32,DYNERR> {
    let offset = fs.reserved_sector_count as u64 * fs.bytes_per_sector as u64 + cluster as u64 * 4;
    let aligned = offset - offset % SECTOR_SIZE as u64;
    stream.seek(aligned)?;
    let mut sec = [0u8;SECTOR_SIZE];
    let got = stream.read(&mut sec)?;
    let idx = (offset - aligned) as usize;
    if got < idx + 4 {
        return Err(Box::new(Error::BadFAT));
    }
    Ok(u32::from_le_bytes([sec[idx],sec[idx+1],sec[idx+2],sec[idx+3]]) & 0x0fff_ffff)
}

/// given any cluster, return the next cluster in its chain, or None at the end
fn next_cluster(stream: &mut CryptoStream,fs: &FsAttr,cluster: u32) -> Result<Option<u32>,DYNERR> {
    let raw = fat_entry(stream,fs,cluster)?;
    match raw {
        c if c >= END_OF_CHAIN => Ok(None),
        c if c < FIRST_DATA_CLUSTER => Ok(None),
        c => Ok(Some(c))
    }
}

/// Buffer a whole directory by following its cluster chain through the FAT.
/// The walk is bounded by the FAT entry count so a cycle cannot hang us.
fn load_chain(stream: &mut CryptoStream,fs: &FsAttr,first: u32) -> Result<Vec<u8>,DYNERR> {
    let cluster_bytes = fs.cluster_bytes() as usize;
    let max_clusters = fs.fat_size as u64 * fs.bytes_per_sector as u64 / 4;
    let mut ans: Vec<u8> = Vec::new();
    let mut curr = first;
    for _i in 0..max_clusters {
        stream.seek(fs.cluster_addr(curr))?;
        let mut buf = vec![0;cluster_bytes];
        let got = stream.read(&mut buf)?;
        ans.extend_from_slice(&buf[0..got]);
        curr = match next_cluster(stream,fs,curr)? {
            None => return Ok(ans),
            Some(next) => next
        };
    }
    error!("cluster chain from {} never ended",first);
    Err(Box::new(Error::BadFAT))
}

/// parse a directory's chain and resolve each entry's data offset
fn load_directory(stream: &mut CryptoStream,fs: &FsAttr,first: u32) -> Result<Vec<DirEntry>,DYNERR> {
    let buf = load_chain(stream,fs,first)?;
    let mut entries = directory::parse_dir_table(&buf);
    for ent in entries.iter_mut() {
        if ent.first_cluster >= FIRST_DATA_CLUSTER {
            ent.data_offset = fs.cluster_addr(ent.first_cluster);
        }
    }
    Ok(entries)
}

/// List the directory at `path`, or resolve a file.
///
/// The path is split on `/` and each component is matched case-sensitively
/// against the current entry list, starting from the root directory.  A
/// directory component descends; a file component must be last and collapses
/// the result to that single entry with its data offset resolved.  An empty
/// path or `/` lists the root.
pub fn dir(stream: &mut CryptoStream,path: &str) -> Result<Vec<DirEntry>,DYNERR> {
    let fs = read_attr(stream)?;
    debug!("FAT32 volume '{}', root at {}",fs.label,fs.root_addr());
    let mut entries = load_directory(stream,&fs,fs.root_cluster)?;
    let components: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for (i,component) in components.iter().enumerate() {
        let hit = match entries.iter().find(|e| e.filename==*component) {
            Some(e) => e.clone(),
            None => {
                debug!("component {} not found",component);
                return Err(Box::new(Error::FileNotFound));
            }
        };
        if !hit.is_directory {
            // a file resolves the whole remainder or nothing
            if i+1 != components.len() {
                return Err(Box::new(Error::FileNotFound));
            }
            trace!("resolved file {} at {}",hit.filename,hit.data_offset);
            return Ok(vec![hit]);
        }
        entries = load_directory(stream,&fs,hit.first_cluster)?;
    }
    Ok(entries)
}

/// Free bytes on the volume: scan the first FAT for zero entries and scale
/// by the device cluster size.
pub fn free_space(stream: &mut CryptoStream) -> Result<u64,DYNERR> {
    let fs = read_attr(stream)?;
    let mut remaining = fs.fat_size as u64 * fs.bytes_per_sector as u64 / 4;
    stream.seek(fs.reserved_sector_count as u64 * fs.bytes_per_sector as u64)?;
    let mut free: u64 = 0;
    let mut buf = vec![0;CLUSTER_SIZE];
    while remaining > 0 {
        let got = stream.read(&mut buf)?;
        if got==0 {
            break;
        }
        let here = u64::min(remaining,(got/4) as u64) as usize;
        for entry in buf[0..here*4].chunks_exact(4) {
            if entry.iter().all(|b| *b==0) {
                free += 1;
            }
        }
        remaining -= here as u64;
    }
    debug!("counted {} free clusters",free);
    Ok(free * CLUSTER_SIZE as u64)
}
