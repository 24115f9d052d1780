//! ### FAT32 boot sector
//!
//! On-disk layout of the boot sector at offset 0 of a FAT32 partition, read
//! with the `binrw` crate.  Implementation is based on the Microsoft white
//! paper "FAT: General Overview of On-Disk Format."  Only the fields the
//! reader needs survive into `FsAttr`.

use std::io::Cursor;
use binrw::BinRead;
use log::debug;
use crate::DYNERR;

/// Boot sector including the FAT32 extension fields.  Little-endian.
#[derive(BinRead,Debug)]
#[br(little)]
pub struct BootSector {
    pub jmp: [u8;3],
    pub oem: [u8;8],
    /// 512, 1024, 2048, or 4096
    pub bytes_per_sec: u16,
    /// 1, 2, 4, 8, 16, 32, 64, or 128
    pub sec_per_clus: u8,
    pub reserved_sectors: u16,
    /// usually 2
    pub num_fats: u8,
    /// must be 0 for FAT32
    pub root_ent_cnt: u16,
    /// superseded by tot_sec_32 if 0
    pub tot_sec_16: u16,
    pub media: u8,
    /// should be 0 for FAT32
    pub fat_size_16: u16,
    pub sec_per_trk: u16,
    pub num_heads: u16,
    pub hidd_sec: u32,
    pub tot_sec_32: u32,
    /// sectors per FAT
    pub fat_size_32: u32,
    pub flags: u16,
    pub fs_version: u16,
    /// cluster number of the root directory, usually 2
    pub root_cluster: u32,
    pub fs_info: u16,
    pub bk_boot_sec: u16,
    pub reserved: [u8;12],
    pub drv_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_id: u32,
    pub vol_lab: [u8;11],
    pub fil_sys_type: [u8;8]
}

/// File system attributes derived from the boot sector.
#[derive(Clone,Debug)]
pub struct FsAttr {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    /// sectors per FAT
    pub fat_size: u32,
    pub sectors_count: u32,
    pub root_cluster: u32,
    pub label: String
}

impl BootSector {
    pub fn verify(&self) -> bool {
        let mut ans = true;
        if ![512,1024,2048,4096].contains(&self.bytes_per_sec) {
            debug!("invalid bytes per sector {}",self.bytes_per_sec);
            ans = false;
        }
        if ![1,2,4,8,16,32,64,128].contains(&self.sec_per_clus) {
            debug!("invalid sectors per cluster {}",self.sec_per_clus);
            ans = false;
        }
        if self.reserved_sectors==0 {
            debug!("invalid count of reserved sectors 0");
            ans = false;
        }
        if self.num_fats==0 {
            debug!("invalid count of FATs 0");
            ans = false;
        }
        if self.fat_size_32==0 && self.fat_size_16==0 {
            debug!("invalid FAT size 0");
            ans = false;
        }
        ans
    }
    pub fn fat_size(&self) -> u32 {
        match self.fat_size_32 {
            0 => self.fat_size_16 as u32,
            s => s
        }
    }
    pub fn tot_sec(&self) -> u32 {
        match self.tot_sec_32 {
            0 => self.tot_sec_16 as u32,
            s => s
        }
    }
    pub fn attr(&self) -> FsAttr {
        FsAttr {
            bytes_per_sector: self.bytes_per_sec,
            sectors_per_cluster: self.sec_per_clus,
            reserved_sector_count: self.reserved_sectors,
            num_fats: self.num_fats,
            fat_size: self.fat_size(),
            sectors_count: self.tot_sec(),
            root_cluster: self.root_cluster,
            label: String::from_utf8_lossy(&self.vol_lab).trim_end().to_string()
        }
    }
}

impl FsAttr {
    /// partition byte offset of the first data cluster (cluster 2), also
    /// where the root directory of these volumes begins
    pub fn root_addr(&self) -> u64 {
        (self.num_fats as u64 * self.fat_size as u64 + self.reserved_sector_count as u64) * self.bytes_per_sector as u64
    }
    /// bytes per cluster as declared by the boot sector
    pub fn cluster_bytes(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }
    /// partition byte offset of a data cluster
    pub fn cluster_addr(&self,cluster: u32) -> u64 {
        self.bytes_per_sector as u64 * ((cluster as u64 - 2) * self.sectors_per_cluster as u64) + self.root_addr()
    }
}

/// Parse the boot sector from the start of a buffer and derive `FsAttr`.
pub fn read_boot_sector(buf: &[u8]) -> Result<FsAttr,DYNERR> {
    let boot = BootSector::read(&mut Cursor::new(buf))?;
    if !boot.verify() {
        return Err(Box::new(super::Error::NonFATVolume));
    }
    Ok(boot.attr())
}
