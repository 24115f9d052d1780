//! # `nxkit` main library
//!
//! This library reads, writes, and inspects the raw eMMC image of the NX console,
//! whether the image lives in a file or on a physical drive.
//! Operations can be done at a level as low as raw sectors, or as high as FAT32 listings.
//!
//! ## Architecture
//!
//! Storage operations are built around three layers:
//! * `device::BlockDevice` moves raw bytes to and from a file or drive, sector-aligned
//! * `nand::Storage` identifies the artifact (BOOT0, BOOT1, RAWNAND) and owns its partitions
//! * `stream::CryptoStream` turns a partition's LBA range into a linear byte stream,
//!   applying AES-XTS per sector in one of three modes
//!
//! When a `Storage` is created it takes ownership of a `BlockDevice`.  Partitions are
//! matched against a static catalog of known NX partitions, which decides whether they
//! are expected to be encrypted and how a successful decryption is recognized.
//!
//! ## Copy Engine
//!
//! The `copy` module streams a partition to a file, or restores one from another
//! storage, optionally transforming in flight.  Progress reporting, cooperative
//! cancellation, and MD5 round-trip verification are built in.
//!
//! ## File Systems
//!
//! The SAFE, SYSTEM and USER partitions host FAT32.  The `fat` module reads
//! directories (with long-file-name reassembly) and computes free space, routed
//! through the same transparent-crypto read path.  The FAT32 layer is read-only.

pub mod device;
pub mod crypto;
pub mod stream;
pub mod nand;
pub mod copy;
pub mod fat;

use log::info;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// Sector size of the NX eMMC, every LBA is in these units
pub const SECTOR_SIZE: usize = 512;
/// Allocation unit of the FAT32 volumes on this device, also the probe
/// length used when validating a freshly installed cipher
pub const CLUSTER_SIZE: usize = 0x4000;

/// Open a storage artifact and identify it.
/// This creates the block device, sniffs the storage kind, and on RAWNAND
/// parses the GPT into the partition list.
pub fn open_storage(img_path: &str) -> Result<nand::Storage,DYNERR> {
    let storage = nand::Storage::open(img_path)?;
    info!("identified {} storage",storage.kind());
    Ok(storage)
}
