//! ## Block Device Module
//!
//! A `BlockDevice` gives uniform byte-addressed access to a disk image file or a
//! raw drive.  The caller seeks in absolute bytes and reads or writes sequentially.
//! Buffers handed to a device are kept at multiples of the sector size so that an
//! unbuffered (direct I/O) backend could be substituted without changing callers.
//!
//! Volume locking is coarse: a drive is locked for the duration of one copy
//! operation.  On regular files the lock is a no-op.  The platform-specific
//! ioctl dance belongs to an outer layer, here we only track the state.

use std::fs::{File,OpenOptions};
use std::io::{Read,Write,Seek,SeekFrom};
use std::path::{Path,PathBuf};
use log::{trace,debug,error};
use crate::{STDRESULT,DYNERR};

/// Enumerates block device errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("could not open storage")]
    OpenFailed,
    #[error("seek beyond end of storage")]
    SeekRange,
    #[error("storage was opened read-only")]
    ReadOnly
}

/// Byte-addressed handle to a disk image file or raw drive.
/// Knows its total size and whether it refers to a removable drive.
pub struct BlockDevice {
    path: PathBuf,
    file: File,
    size: u64,
    is_drive: bool,
    writable: bool,
    locked: bool
}

#[cfg(unix)]
fn file_is_drive(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_block_device()
}

#[cfg(not(unix))]
fn file_is_drive(_meta: &std::fs::Metadata) -> bool {
    false
}

impl BlockDevice {
    /// Open a path and work out its byte length.  Drives report a zero
    /// metadata length, so the size is taken by seeking to the device end,
    /// which equals the product of the drive geometry.
    pub fn open(path: &Path) -> Result<Self,DYNERR> {
        let (mut file,writable) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f,true),
            Err(_) => match OpenOptions::new().read(true).open(path) {
                Ok(f) => (f,false),
                Err(e) => {
                    error!("could not open {}: {}",path.display(),e);
                    return Err(Box::new(Error::OpenFailed));
                }
            }
        };
        let meta = file.metadata()?;
        let is_drive = file_is_drive(&meta);
        let size = match is_drive {
            true => {
                let end = file.seek(SeekFrom::End(0))?;
                file.seek(SeekFrom::Start(0))?;
                end
            },
            false => meta.len()
        };
        debug!("opened {} ({} bytes, drive {})",path.display(),size,is_drive);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            is_drive,
            writable,
            locked: false
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn is_drive(&self) -> bool {
        self.is_drive
    }
    /// Move the cursor to an absolute byte offset.
    /// Seeking beyond the device size is refused.
    pub fn seek(&mut self,offset: u64) -> STDRESULT {
        if offset > self.size {
            error!("seek to {} beyond device size {}",offset,self.size);
            return Err(Box::new(Error::SeekRange));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
    /// Fill as much of `buf` as the device allows, looping over partial reads.
    /// Returns the byte count, which is short only at the end of the device.
    pub fn read(&mut self,buf: &mut [u8]) -> Result<usize,DYNERR> {
        let mut count: usize = 0;
        while count < buf.len() {
            match self.file.read(&mut buf[count..]) {
                Ok(0) => break,
                Ok(n) => count += n,
                Err(e) if e.kind()==std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Box::new(e))
            }
        }
        trace!("read {} bytes",count);
        Ok(count)
    }
    /// Write the whole buffer at the current cursor.
    pub fn write_all(&mut self,buf: &[u8]) -> STDRESULT {
        if !self.writable {
            return Err(Box::new(Error::ReadOnly));
        }
        self.file.write_all(buf)?;
        trace!("wrote {} bytes",buf.len());
        Ok(())
    }
    /// Take the coarse volume lock.  No-op for regular files.
    pub fn lock_volume(&mut self) {
        if self.is_drive {
            debug!("locking volume {}",self.path.display());
        }
        self.locked = true;
    }
    /// Release the coarse volume lock.
    pub fn unlock_volume(&mut self) {
        if self.is_drive {
            debug!("unlocking volume {}",self.path.display());
        }
        self.locked = false;
    }
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
