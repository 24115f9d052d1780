//! ## NAND Storage Module
//!
//! A `Storage` is the top-level artifact: it owns the block device, knows what
//! kind of NX storage it is looking at, and on RAWNAND owns the partition list
//! parsed from the GPT.  Identification is by magic-byte sniffing at fixed
//! offsets, in a fixed order, stopping at the first match.
//!
//! Partitions are value objects held in a vector and addressed by index, so
//! the storage always outlives them.  Each one is matched against the static
//! catalog in `catalog`, which decides its kind, whether it is expected to be
//! encrypted, and which magic proves a good decryption.  A cipher installed
//! with `set_crypto` is owned by the partition; streams borrow it.

pub mod gpt;
pub mod catalog;

use std::fmt;
use std::path::Path;
use log::{debug,info,warn};
use crate::device::BlockDevice;
use crate::crypto::XtsCipher;
use crate::stream::{CryptoStream,CryptoMode};
use crate::{fat,DYNERR,STDRESULT,SECTOR_SIZE,CLUSTER_SIZE};
pub use catalog::PartitionKind;

/// boot data version + block size log2 + page size log2, at offset 0x530 of a BOOT0
const BOOT0_MAGIC: [u8;12] = [0x01,0x00,0x21,0x00,0x0e,0x00,0x00,0x00,0x09,0x00,0x00,0x00];
const BOOT0_PROBE_OFF: u64 = 0x400;
const BOOT0_MAGIC_OFF: usize = 0x130;
/// package1 magic at offset 0x12D0 of a BOOT1
const BOOT1_MAGIC: [u8;4] = *b"PK11";
const BOOT1_PROBE_OFF: u64 = 0x1200;
const BOOT1_MAGIC_OFF: usize = 0xd0;
/// UTF-16LE "PRODINFO" inside the GPT sector of a RAWNAND, absolute 0x298
const RAWNAND_MAGIC: [u8;15] = [0x50,0x00,0x52,0x00,0x4f,0x00,0x44,0x00,0x49,0x00,0x4e,0x00,0x46,0x00,0x4f];
const RAWNAND_PROBE_OFF: u64 = 0x200;
const RAWNAND_PROBE_LEN: usize = 0x4200;
const RAWNAND_MAGIC_OFF: usize = 0x98;

/// Enumerates storage errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("partition is not an encrypted kind")]
    NotEncrypted,
    #[error("crypto missing or invalid for this partition")]
    BadCrypto,
    #[error("file system not compatible with request")]
    FileSystemMismatch
}

/// What kind of NX storage artifact a path turned out to be.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum StorageKind {
    BOOT0,
    BOOT1,
    RAWNAND,
    UNKNOWN,
    INVALID
}

impl fmt::Display for StorageKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{}",match self {
            Self::BOOT0 => "BOOT0",
            Self::BOOT1 => "BOOT1",
            Self::RAWNAND => "RAWNAND",
            Self::UNKNOWN => "UNKNOWN",
            Self::INVALID => "INVALID"
        })
    }
}

/// Semantic subrange of a storage, produced from one GPT entry.
pub struct Partition {
    name: String,
    lba_start: u64,
    lba_end: u64,
    attrs: u64,
    kind: PartitionKind,
    encrypted: bool,
    valid: bool,
    bad_crypto: bool,
    catalog: Option<&'static catalog::CatalogEntry>,
    cipher: Option<XtsCipher>,
    free_space: Option<u64>
}

impl Partition {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn lba_start(&self) -> u64 {
        self.lba_start
    }
    pub fn lba_end(&self) -> u64 {
        self.lba_end
    }
    pub fn attrs(&self) -> u64 {
        self.attrs
    }
    pub fn kind(&self) -> PartitionKind {
        self.kind
    }
    /// true iff the GPT name matched the catalog
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }
    /// latched when a magic probe through the cipher failed
    pub fn bad_crypto(&self) -> bool {
        self.bad_crypto
    }
    pub fn has_cipher(&self) -> bool {
        self.cipher.is_some()
    }
    /// free bytes cached by the last successful `set_crypto`, FAT32 kinds only
    pub fn free_space(&self) -> Option<u64> {
        self.free_space
    }
    pub fn size(&self) -> u64 {
        match self.lba_end > self.lba_start {
            true => (self.lba_end - self.lba_start + 1) * SECTOR_SIZE as u64,
            false => 0
        }
    }
}

/// The top-level artifact.  Owns the block device and the partition list.
pub struct Storage {
    device: BlockDevice,
    kind: StorageKind,
    partitions: Vec<Partition>
}

impl Storage {
    /// Open a path and identify the storage behind it.
    pub fn open(img_path: &str) -> Result<Self,DYNERR> {
        let device = BlockDevice::open(Path::new(img_path))?;
        let mut storage = Self {
            device,
            kind: StorageKind::UNKNOWN,
            partitions: Vec::new()
        };
        storage.identify()?;
        Ok(storage)
    }
    /// Read `len` bytes at `offset`, or None if the artifact is too short.
    /// A short read is accepted down to `min_len`.
    fn read_probe(&mut self,offset: u64,len: usize,min_len: usize) -> Result<Option<Vec<u8>>,DYNERR> {
        if offset + min_len as u64 > self.device.size() {
            return Ok(None);
        }
        self.device.seek(offset)?;
        let mut buf = vec![0;len];
        let got = self.device.read(&mut buf)?;
        if got < min_len {
            return Ok(None);
        }
        buf.truncate(got);
        Ok(Some(buf))
    }
    /// Sniff the storage kind in fixed order, stopping at the first match,
    /// and parse the GPT when the artifact turns out to be a RAWNAND.
    fn identify(&mut self) -> STDRESULT {
        if self.device.size()==0 {
            warn!("storage has no size, marking invalid");
            self.kind = StorageKind::INVALID;
            return Ok(());
        }
        if let Some(buf) = self.read_probe(BOOT0_PROBE_OFF,SECTOR_SIZE,SECTOR_SIZE)? {
            if buf[BOOT0_MAGIC_OFF..BOOT0_MAGIC_OFF+12]==BOOT0_MAGIC {
                self.kind = StorageKind::BOOT0;
                return Ok(());
            }
        }
        if let Some(buf) = self.read_probe(BOOT1_PROBE_OFF,SECTOR_SIZE,SECTOR_SIZE)? {
            if buf[BOOT1_MAGIC_OFF..BOOT1_MAGIC_OFF+4]==BOOT1_MAGIC {
                self.kind = StorageKind::BOOT1;
                return Ok(());
            }
        }
        if let Some(buf) = self.read_probe(RAWNAND_PROBE_OFF,RAWNAND_PROBE_LEN,RAWNAND_MAGIC_OFF+15)? {
            if buf[RAWNAND_MAGIC_OFF..RAWNAND_MAGIC_OFF+15]==RAWNAND_MAGIC {
                self.kind = StorageKind::RAWNAND;
                for ent in gpt::parse(&buf)? {
                    let part = self.new_partition(&ent)?;
                    self.partitions.push(part);
                }
                info!("GPT yielded {} partitions",self.partitions.len());
                return Ok(());
            }
        }
        Ok(())
    }
    /// Build a partition from a GPT entry, match it against the catalog, and
    /// probe for an image that was decrypted offline: if the magic already
    /// reads in clear without the cipher, the encrypted flag is dropped.
    fn new_partition(&mut self,ent: &gpt::GptEntry) -> Result<Partition,DYNERR> {
        let name = ent.name();
        let row = catalog::lookup(&name);
        let mut part = Partition {
            name,
            lba_start: ent.lba_start,
            lba_end: ent.lba_end,
            attrs: ent.attrs,
            kind: match row { Some(r) => r.kind, None => PartitionKind::UNKNOWN },
            encrypted: match row { Some(r) => r.encrypted, None => false },
            valid: row.is_some(),
            bad_crypto: false,
            catalog: row,
            cipher: None,
            free_space: None
        };
        if let Some(row) = row {
            if part.encrypted {
                if let Some(magic) = row.magic {
                    let abs = part.lba_start * SECTOR_SIZE as u64 + row.magic_off as u64;
                    let remain = (abs % SECTOR_SIZE as u64) as usize;
                    if let Some(buf) = self.read_probe(abs - remain as u64,SECTOR_SIZE,remain+magic.len())? {
                        if &buf[remain..remain+magic.len()]==magic {
                            debug!("{} already reads in clear",part.name);
                            part.encrypted = false;
                        }
                    }
                }
            }
        }
        Ok(part)
    }
    pub fn kind(&self) -> StorageKind {
        self.kind
    }
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            StorageKind::BOOT0 => "BOOT0",
            StorageKind::BOOT1 => "BOOT1",
            StorageKind::RAWNAND => "RAWNAND",
            StorageKind::UNKNOWN => "UNKNOWN",
            StorageKind::INVALID => "INVALID"
        }
    }
    pub fn size(&self) -> u64 {
        self.device.size()
    }
    pub fn is_drive(&self) -> bool {
        self.device.is_drive()
    }
    pub fn partitions(&self) -> &Vec<Partition> {
        &self.partitions
    }
    pub fn partition(&self,idx: usize) -> &Partition {
        &self.partitions[idx]
    }
    /// Index of the first partition of the given kind.
    pub fn partition_by_kind(&self,kind: PartitionKind) -> Option<usize> {
        self.partitions.iter().position(|p| p.kind==kind)
    }
    /// Index of the first partition matching the name, case-insensitive.
    pub fn partition_by_name(&self,name: &str) -> Option<usize> {
        self.partitions.iter().position(|p| p.name.eq_ignore_ascii_case(name))
    }
    pub(crate) fn device_mut(&mut self) -> &mut BlockDevice {
        &mut self.device
    }
    /// Open a stream over a partition's LBA range in the given mode.
    pub fn stream(&mut self,idx: usize,mode: CryptoMode) -> Result<CryptoStream,DYNERR> {
        let part = &self.partitions[idx];
        CryptoStream::new(&mut self.device,part.cipher.as_ref(),part.lba_start,part.lba_end,mode)
    }
    /// Install a cipher on a catalog-encrypted partition, replacing any
    /// previous one, then validate it by reading the first cluster and
    /// comparing the catalog magic.  A mismatch latches `bad_crypto` and
    /// returns Ok(false); logical operations on the partition will then
    /// refuse early.  On success for the FAT32 system kinds the free space
    /// is computed and cached.
    pub fn set_crypto(&mut self,idx: usize,data_key: &[u8;16],tweak_key: &[u8;16]) -> Result<bool,DYNERR> {
        let row = match self.partitions[idx].catalog {
            Some(row) if row.encrypted => row,
            _ => return Err(Box::new(Error::NotEncrypted))
        };
        self.partitions[idx].bad_crypto = false;
        self.partitions[idx].cipher = Some(XtsCipher::new(data_key,tweak_key));
        let mode = match self.partitions[idx].encrypted {
            true => CryptoMode::Decrypt,
            false => CryptoMode::NoCrypto
        };
        let good = {
            let part = &self.partitions[idx];
            let mut stream = CryptoStream::new(&mut self.device,part.cipher.as_ref(),part.lba_start,part.lba_end,mode)?;
            let mut first_cluster = vec![0;CLUSTER_SIZE];
            let got = stream.read(&mut first_cluster)?;
            match row.magic {
                Some(magic) if got >= row.magic_off + magic.len() => {
                    &first_cluster[row.magic_off..row.magic_off+magic.len()]==magic
                },
                Some(_) => false,
                None => true
            }
        };
        if !good {
            warn!("magic probe failed on {}, latching bad crypto",self.partitions[idx].name);
            self.partitions[idx].bad_crypto = true;
            return Ok(false);
        }
        debug!("crypto validated on {}",self.partitions[idx].name);
        if matches!(self.partitions[idx].kind,PartitionKind::SYSTEM | PartitionKind::USER) {
            let free = {
                let part = &self.partitions[idx];
                let mut stream = CryptoStream::new(&mut self.device,part.cipher.as_ref(),part.lba_start,part.lba_end,mode)?;
                fat::free_space(&mut stream)?
            };
            self.partitions[idx].free_space = Some(free);
        }
        Ok(true)
    }
    /// Guard shared by the FAT32 entry points: only the FAT32 kinds qualify,
    /// and an encrypted partition must have a validated cipher.
    fn fat32_stream(&mut self,idx: usize) -> Result<CryptoStream,DYNERR> {
        let part = &self.partitions[idx];
        if !matches!(part.kind,PartitionKind::SAFE | PartitionKind::SYSTEM | PartitionKind::USER) {
            return Err(Box::new(Error::FileSystemMismatch));
        }
        if part.encrypted && (part.bad_crypto || part.cipher.is_none()) {
            return Err(Box::new(Error::BadCrypto));
        }
        let mode = match part.encrypted {
            true => CryptoMode::Decrypt,
            false => CryptoMode::NoCrypto
        };
        CryptoStream::new(&mut self.device,part.cipher.as_ref(),part.lba_start,part.lba_end,mode)
    }
    /// List the directory at `path` on a FAT32 partition, or resolve a file.
    /// See `fat::dir` for the path rules.
    pub fn fat32_dir(&mut self,idx: usize,path: &str) -> Result<Vec<fat::DirEntry>,DYNERR> {
        let mut stream = self.fat32_stream(idx)?;
        fat::dir(&mut stream,path)
    }
    /// Free bytes on a FAT32 partition, counted from free FAT entries.
    pub fn fat32_free_space(&mut self,idx: usize) -> Result<u64,DYNERR> {
        let mut stream = self.fat32_stream(idx)?;
        fat::free_space(&mut stream)
    }
}
