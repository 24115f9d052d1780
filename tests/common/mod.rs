//! helpers shared by the integration tests: synthetic NX images and FAT32 volumes
#![allow(dead_code)]

pub const SECTOR: usize = 512;

/// geometry of the synthetic FAT32 volumes, one cluster is 0x4000 bytes
pub const BPS: usize = 512;
pub const SPC: usize = 32;
pub const RESERVED: usize = 32;
pub const NUM_FATS: usize = 2;
pub const FAT_SECTORS: usize = 32;

pub const ATTR_DIR: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn put_utf16(buf: &mut [u8],offset: usize,s: &str) {
    for (i,c) in s.encode_utf16().enumerate() {
        buf[offset+2*i..offset+2*i+2].copy_from_slice(&c.to_le_bytes());
    }
}

/// deterministic filler so digests are reproducible
pub fn pseudo_random(len: usize,seed: u32) -> Vec<u8> {
    let mut state = seed;
    let mut ans = Vec::with_capacity(len);
    for _i in 0..len {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        ans.push((state >> 16) as u8);
    }
    ans
}

pub struct PartDef {
    pub name: &'static str,
    pub lba_start: u64,
    /// length must be a multiple of the sector size
    pub content: Vec<u8>
}

/// Assemble a RAWNAND image: PRODINFO sniffing magic at 0x298, GPT header at
/// LBA 1 with the entry array at LBA 2, partition contents in place.
pub fn build_rawnand(parts: &[PartDef]) -> Vec<u8> {
    let end_sector = parts.iter()
        .map(|p| p.lba_start + (p.content.len()/SECTOR) as u64)
        .max().unwrap_or(0).max(0x40);
    let mut img = vec![0u8;end_sector as usize*SECTOR];
    img[0x200..0x208].copy_from_slice(b"EFI PART");
    img[0x248..0x250].copy_from_slice(&2u64.to_le_bytes());
    img[0x250..0x254].copy_from_slice(&(parts.len() as u32).to_le_bytes());
    img[0x254..0x258].copy_from_slice(&128u32.to_le_bytes());
    put_utf16(&mut img,0x298,"PRODINFO");
    for (i,p) in parts.iter().enumerate() {
        assert!(p.content.len() % SECTOR == 0);
        let off = 0x400 + i*128;
        let lba_end = p.lba_start + (p.content.len()/SECTOR) as u64 - 1;
        img[off+32..off+40].copy_from_slice(&p.lba_start.to_le_bytes());
        img[off+40..off+48].copy_from_slice(&lba_end.to_le_bytes());
        put_utf16(&mut img,off+56,p.name);
        let start = p.lba_start as usize*SECTOR;
        img[start..start+p.content.len()].copy_from_slice(&p.content);
    }
    img
}

pub fn build_boot0() -> Vec<u8> {
    let mut img = vec![0u8;0x1000];
    img[0x530..0x53c].copy_from_slice(&[0x01,0x00,0x21,0x00,0x0e,0x00,0x00,0x00,0x09,0x00,0x00,0x00]);
    img
}

pub fn build_boot1() -> Vec<u8> {
    let mut img = vec![0u8;0x2000];
    img[0x12d0..0x12d4].copy_from_slice(b"PK11");
    img
}

/// XTS-encrypt a partition's content in place, sector indices taken from the
/// absolute LBA as the crate does
pub fn encrypt_content(content: &mut [u8],lba_start: u64,data_key: &[u8;16],tweak_key: &[u8;16]) {
    let cipher = nxkit::crypto::XtsCipher::new(data_key,tweak_key);
    for (i,sector) in content.chunks_exact_mut(SECTOR).enumerate() {
        cipher.encrypt(lba_start + i as u64,sector);
    }
}

pub fn checksum83(name: &[u8]) -> u8 {
    name.iter().fold(0u8,|sum,b| sum.rotate_right(1).wrapping_add(*b))
}

pub fn short_entry(name83: &[u8;11],attr: u8,cluster: u32,size: u32) -> [u8;32] {
    let mut raw = [0u8;32];
    raw[0..11].copy_from_slice(name83);
    raw[11] = attr;
    raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    raw
}

/// long name slots for `long`, in the on-disk order (last slot first),
/// to be followed by the 8.3 record they decorate
pub fn lfn_for(long: &str,name83: &[u8;11]) -> Vec<u8> {
    const CHAR_OFFS: [usize;13] = [1,3,5,7,9,14,16,18,20,22,24,28,30];
    let sum = checksum83(name83);
    let mut units: Vec<u16> = long.encode_utf16().collect();
    let slots = (units.len() + 12)/13;
    if units.len() < slots*13 {
        units.push(0);
        while units.len() < slots*13 {
            units.push(0xffff);
        }
    }
    let mut out = Vec::new();
    for slot in (0..slots).rev() {
        let mut raw = [0u8;32];
        raw[0] = (slot as u8 + 1) | if slot==slots-1 { 0x40 } else { 0 };
        raw[11] = 0x0f;
        raw[13] = sum;
        for (i,off) in CHAR_OFFS.iter().enumerate() {
            raw[*off..*off+2].copy_from_slice(&units[slot*13+i].to_le_bytes());
        }
        out.extend_from_slice(&raw);
    }
    out
}

/// Builds a minimal FAT32 volume: 512-byte sectors, 32 per cluster, 32
/// reserved sectors, two 32-sector FATs, root directory at cluster 2.
pub struct Fat32Builder {
    bytes: Vec<u8>,
    fat: Vec<u32>
}

impl Fat32Builder {
    pub fn new(total_sectors: usize) -> Self {
        let mut bytes = vec![0u8;total_sectors*SECTOR];
        bytes[0..3].copy_from_slice(&[0xeb,0x58,0x90]);
        bytes[3..11].copy_from_slice(b"MSDOS5.0");
        bytes[11..13].copy_from_slice(&(BPS as u16).to_le_bytes());
        bytes[13] = SPC as u8;
        bytes[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
        bytes[16] = NUM_FATS as u8;
        bytes[21] = 0xf8;
        bytes[24..26].copy_from_slice(&32u16.to_le_bytes());
        bytes[26..28].copy_from_slice(&2u16.to_le_bytes());
        bytes[32..36].copy_from_slice(&(total_sectors as u32).to_le_bytes());
        bytes[36..40].copy_from_slice(&(FAT_SECTORS as u32).to_le_bytes());
        bytes[44..48].copy_from_slice(&2u32.to_le_bytes());
        bytes[48..50].copy_from_slice(&1u16.to_le_bytes());
        bytes[50..52].copy_from_slice(&6u16.to_le_bytes());
        bytes[64] = 0x80;
        bytes[66] = 0x29;
        bytes[71..82].copy_from_slice(b"NO NAME    ");
        bytes[82..90].copy_from_slice(b"FAT32   ");
        bytes[510..512].copy_from_slice(&[0x55,0xaa]);
        let mut fat = vec![0u32;FAT_SECTORS*SECTOR/4];
        fat[0] = 0x0ffffff8;
        fat[1] = 0x0fffffff;
        fat[2] = 0x0fffffff;
        Self { bytes,fat }
    }
    pub fn root_addr() -> usize {
        (NUM_FATS*FAT_SECTORS + RESERVED) * BPS
    }
    pub fn cluster_addr(cluster: u32) -> usize {
        BPS*((cluster as usize - 2)*SPC) + Self::root_addr()
    }
    pub fn set_fat(&mut self,cluster: u32,value: u32) {
        self.fat[cluster as usize] = value;
    }
    /// link the clusters into a chain ending with EOC
    pub fn chain(&mut self,clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.fat[pair[0] as usize] = pair[1];
        }
        if let Some(last) = clusters.last() {
            self.fat[*last as usize] = 0x0fffffff;
        }
    }
    pub fn put_cluster(&mut self,cluster: u32,data: &[u8]) {
        let addr = Self::cluster_addr(cluster);
        assert!(data.len() <= BPS*SPC);
        self.bytes[addr..addr+data.len()].copy_from_slice(data);
    }
    pub fn free_fat_entries(&self) -> u64 {
        self.fat.iter().filter(|e| **e==0).count() as u64
    }
    /// write both FAT copies and hand back the volume
    pub fn finish(mut self) -> Vec<u8> {
        for copy in 0..NUM_FATS {
            let base = (RESERVED + copy*FAT_SECTORS) * SECTOR;
            for (i,entry) in self.fat.iter().enumerate() {
                self.bytes[base+4*i..base+4*i+4].copy_from_slice(&entry.to_le_bytes());
            }
        }
        self.bytes
    }
}

/// a volume whose root holds `save` and `Contents` directories, with one
/// file `DATA.BIN` inside `save`
pub fn standard_volume(total_sectors: usize) -> Vec<u8> {
    let mut builder = Fat32Builder::new(total_sectors);
    let mut root = Vec::new();
    root.extend_from_slice(&lfn_for("save",b"SAVE       "));
    root.extend_from_slice(&short_entry(b"SAVE       ",ATTR_DIR,3,0));
    root.extend_from_slice(&lfn_for("Contents",b"CONTEN~1   "));
    root.extend_from_slice(&short_entry(b"CONTEN~1   ",ATTR_DIR,4,0));
    builder.put_cluster(2,&root);
    let mut save = Vec::new();
    save.extend_from_slice(&short_entry(b".          ",ATTR_DIR,3,0));
    save.extend_from_slice(&short_entry(b"..         ",ATTR_DIR,0,0));
    save.extend_from_slice(&short_entry(b"DATA    BIN",ATTR_ARCHIVE,5,1234));
    builder.put_cluster(3,&save);
    builder.set_fat(3,0x0fffffff);
    builder.set_fat(4,0x0fffffff);
    builder.set_fat(5,0x0fffffff);
    let payload = pseudo_random(1234,99);
    builder.put_cluster(5,&payload);
    builder.finish()
}
