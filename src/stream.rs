//! ## Crypto Stream Module
//!
//! A `CryptoStream` is a stateful cursor over one partition's LBA range.
//! It hands the caller a linear byte stream while transparently applying the
//! partition's XTS cipher per sector, in one of three modes: passthrough,
//! decrypt on read, or encrypt on write (the restore path also reads plaintext
//! and encrypts in flight).  The sector index fed to the cipher is the
//! storage-absolute LBA, `lba_start + cursor/512`.
//!
//! Every byte the stream hands up or lays down is fed, after transformation,
//! into a running MD5.  Two streams opened identically over the same partition
//! produce identical digests iff the underlying sectors and cipher match.

use md5::{Md5,Digest};
use log::{error,trace};
use crate::device::BlockDevice;
use crate::crypto::XtsCipher;
use crate::{STDRESULT,DYNERR,SECTOR_SIZE};

/// Default transfer buffer, a power of two and a multiple of the sector size.
pub const DEFAULT_BUFFER_SIZE: usize = 0x40_0000;

/// Enumerates stream errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("cipher required for this mode")]
    MissingCipher,
    #[error("access not sector aligned in crypto mode")]
    Unaligned,
    #[error("mode not compatible with request")]
    ModeMismatch,
    #[error("read ended short of the request")]
    ShortRead
}

/// How a stream transforms bytes between the caller and the device.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum CryptoMode {
    /// bytes pass through untouched
    NoCrypto,
    /// each sector read from the device is decrypted before it is handed up
    Decrypt,
    /// each sector is encrypted, on read (dump of a plaintext image) or on
    /// write (restore into ciphertext)
    Encrypt
}

/// Sequential reader/writer over a partition's LBA range.
/// Borrows the device and, for the crypto modes, the partition's cipher.
pub struct CryptoStream<'a> {
    device: &'a mut BlockDevice,
    cipher: Option<&'a XtsCipher>,
    lba_start: u64,
    lba_end: u64,
    cursor: u64,
    mode: CryptoMode,
    md5: Md5
}

impl<'a> CryptoStream<'a> {
    /// Create a stream over the inclusive LBA range.  The crypto modes
    /// require a cipher.
    pub fn new(device: &'a mut BlockDevice,cipher: Option<&'a XtsCipher>,lba_start: u64,lba_end: u64,mode: CryptoMode) -> Result<Self,DYNERR> {
        if mode != CryptoMode::NoCrypto && cipher.is_none() {
            error!("stream in {:?} mode needs a cipher",mode);
            return Err(Box::new(Error::MissingCipher));
        }
        Ok(Self {
            device,
            cipher,
            lba_start,
            lba_end,
            cursor: 0,
            mode,
            md5: Md5::new()
        })
    }
    /// Byte length of the covered range.
    pub fn size(&self) -> u64 {
        match self.lba_end >= self.lba_start {
            true => (self.lba_end - self.lba_start + 1) * SECTOR_SIZE as u64,
            false => 0
        }
    }
    pub fn mode(&self) -> CryptoMode {
        self.mode
    }
    /// Buffer size callers should use for bulk transfers.
    pub fn default_buffer_size(&self) -> usize {
        DEFAULT_BUFFER_SIZE
    }
    fn check_alignment(&self,count: usize) -> STDRESULT {
        if self.mode == CryptoMode::NoCrypto {
            return Ok(());
        }
        // a trailing fragment is impossible since partitions are whole sectors,
        // so both the cursor and the count have to land on sector boundaries
        if self.cursor % SECTOR_SIZE as u64 != 0 || count % SECTOR_SIZE != 0 {
            error!("crypto access at {} count {} not sector aligned",self.cursor,count);
            return Err(Box::new(Error::Unaligned));
        }
        Ok(())
    }
    /// Read up to `buf.len()` bytes at the cursor.  Short reads happen only at
    /// the end of the range; reads past the end return 0.
    pub fn read(&mut self,buf: &mut [u8]) -> Result<usize,DYNERR> {
        let size = self.size();
        if self.cursor >= size || buf.is_empty() {
            return Ok(0);
        }
        let count = u64::min(buf.len() as u64,size - self.cursor) as usize;
        self.check_alignment(count)?;
        let abs_offset = self.lba_start * SECTOR_SIZE as u64 + self.cursor;
        self.device.seek(abs_offset)?;
        let got = self.device.read(&mut buf[0..count])?;
        if got < count {
            error!("device returned {} of {} bytes inside the partition",got,count);
            return Err(Box::new(Error::ShortRead));
        }
        match self.mode {
            CryptoMode::NoCrypto => {},
            CryptoMode::Decrypt => {
                let cipher = self.cipher.expect("cipher checked at construction");
                let first_sector = self.lba_start + self.cursor / SECTOR_SIZE as u64;
                for (i,sector) in buf[0..count].chunks_exact_mut(SECTOR_SIZE).enumerate() {
                    cipher.decrypt(first_sector + i as u64,sector);
                }
            },
            CryptoMode::Encrypt => {
                let cipher = self.cipher.expect("cipher checked at construction");
                let first_sector = self.lba_start + self.cursor / SECTOR_SIZE as u64;
                for (i,sector) in buf[0..count].chunks_exact_mut(SECTOR_SIZE).enumerate() {
                    cipher.encrypt(first_sector + i as u64,sector);
                }
            }
        }
        self.md5.update(&buf[0..count]);
        self.cursor += count as u64;
        trace!("stream read {} bytes, cursor {}",count,self.cursor);
        Ok(count)
    }
    /// Write up to `buf.len()` bytes at the cursor.  Only passthrough and
    /// encrypt are legal; the count is clipped at the end of the range.
    pub fn write(&mut self,buf: &[u8]) -> Result<usize,DYNERR> {
        if self.mode == CryptoMode::Decrypt {
            error!("decrypt stream cannot be written");
            return Err(Box::new(Error::ModeMismatch));
        }
        let size = self.size();
        if self.cursor >= size || buf.is_empty() {
            return Ok(0);
        }
        let count = u64::min(buf.len() as u64,size - self.cursor) as usize;
        self.check_alignment(count)?;
        let abs_offset = self.lba_start * SECTOR_SIZE as u64 + self.cursor;
        self.device.seek(abs_offset)?;
        match self.mode {
            CryptoMode::NoCrypto => {
                self.device.write_all(&buf[0..count])?;
                self.md5.update(&buf[0..count]);
            },
            CryptoMode::Encrypt => {
                let cipher = self.cipher.expect("cipher checked at construction");
                let first_sector = self.lba_start + self.cursor / SECTOR_SIZE as u64;
                let mut scratch = buf[0..count].to_vec();
                for (i,sector) in scratch.chunks_exact_mut(SECTOR_SIZE).enumerate() {
                    cipher.encrypt(first_sector + i as u64,sector);
                }
                self.device.write_all(&scratch)?;
                self.md5.update(&scratch);
            },
            CryptoMode::Decrypt => unreachable!()
        }
        self.cursor += count as u64;
        trace!("stream wrote {} bytes, cursor {}",count,self.cursor);
        Ok(count)
    }
    /// Move the cursor to a byte offset relative to the partition start.
    /// O(1); crypto modes require sector alignment.
    pub fn seek(&mut self,offset: u64) -> STDRESULT {
        if offset > self.size() {
            return Err(Box::new(crate::device::Error::SeekRange));
        }
        if self.mode != CryptoMode::NoCrypto && offset % SECTOR_SIZE as u64 != 0 {
            return Err(Box::new(Error::Unaligned));
        }
        self.cursor = offset;
        Ok(())
    }
    pub fn position(&self) -> u64 {
        self.cursor
    }
    /// Digest of every byte this stream handed up or laid down, taken after
    /// transformation.  Consumes the stream.
    pub fn md5_finalize(self) -> [u8;16] {
        self.md5.finalize().into()
    }
}
