//! ### Static partition catalog
//!
//! One row per partition name the NX is known to carry.  The catalog is the
//! sole source of truth for whether a partition is expected to be encrypted
//! and which magic bytes prove a successful decryption.  GPT entries are
//! matched against it case-insensitively.

use std::fmt;

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum PartitionKind {
    PRODINFO,
    PRODINFOF,
    BCPKG21,
    BCPKG22,
    BCPKG23,
    BCPKG24,
    SAFE,
    SYSTEM,
    USER,
    UNKNOWN
}

impl fmt::Display for PartitionKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PRODINFO => write!(f,"PRODINFO"),
            Self::PRODINFOF => write!(f,"PRODINFOF"),
            Self::BCPKG21 => write!(f,"BCPKG2-1-Normal-Main"),
            Self::BCPKG22 => write!(f,"BCPKG2-2-Normal-Sub"),
            Self::BCPKG23 => write!(f,"BCPKG2-3-SafeMode-Main"),
            Self::BCPKG24 => write!(f,"BCPKG2-4-SafeMode-Sub"),
            Self::SAFE => write!(f,"SAFE"),
            Self::SYSTEM => write!(f,"SYSTEM"),
            Self::USER => write!(f,"USER"),
            Self::UNKNOWN => write!(f,"UNKNOWN")
        }
    }
}

/// Catalog row for a known partition name.
pub struct CatalogEntry {
    pub name: &'static str,
    pub kind: PartitionKind,
    pub encrypted: bool,
    /// bytes expected at `magic_off` once the partition reads in clear
    pub magic: Option<&'static [u8]>,
    pub magic_off: usize
}

/// The FAT32 partitions use the volume label in the boot sector tail as
/// their decryption oracle, the others carry a format magic of their own.
pub static KNOWN_PARTITIONS: [CatalogEntry;9] = [
    CatalogEntry { name: "PRODINFO", kind: PartitionKind::PRODINFO, encrypted: true, magic: Some(b"CAL0"), magic_off: 0x0 },
    CatalogEntry { name: "PRODINFOF", kind: PartitionKind::PRODINFOF, encrypted: true, magic: Some(b"CERTIF"), magic_off: 0x680 },
    CatalogEntry { name: "BCPKG2-1-Normal-Main", kind: PartitionKind::BCPKG21, encrypted: false, magic: None, magic_off: 0x0 },
    CatalogEntry { name: "BCPKG2-2-Normal-Sub", kind: PartitionKind::BCPKG22, encrypted: false, magic: None, magic_off: 0x0 },
    CatalogEntry { name: "BCPKG2-3-SafeMode-Main", kind: PartitionKind::BCPKG23, encrypted: false, magic: None, magic_off: 0x0 },
    CatalogEntry { name: "BCPKG2-4-SafeMode-Sub", kind: PartitionKind::BCPKG24, encrypted: false, magic: None, magic_off: 0x0 },
    CatalogEntry { name: "SAFE", kind: PartitionKind::SAFE, encrypted: true, magic: Some(b"NO NAME"), magic_off: 0x47 },
    CatalogEntry { name: "SYSTEM", kind: PartitionKind::SYSTEM, encrypted: true, magic: Some(b"NO NAME"), magic_off: 0x47 },
    CatalogEntry { name: "USER", kind: PartitionKind::USER, encrypted: true, magic: Some(b"NO NAME"), magic_off: 0x47 }
];

/// Case-insensitive lookup of a GPT name in the catalog.
pub fn lookup(name: &str) -> Option<&'static CatalogEntry> {
    KNOWN_PARTITIONS.iter().find(|row| row.name.eq_ignore_ascii_case(name))
}

#[test]
fn catalog_lookup_ignores_case() {
    assert!(lookup("system").is_some());
    assert!(lookup("System").is_some());
    assert_eq!(lookup("SYSTEM").unwrap().kind,PartitionKind::SYSTEM);
    assert!(lookup("SYSTEM0").is_none());
    assert_eq!(lookup("bcpkg2-1-normal-main").unwrap().encrypted,false);
}
