//! ## Copy Engine Module
//!
//! Streams a partition to a file, or restores one from another storage,
//! driving a `CryptoStream` on each side so the data can be encrypted or
//! decrypted in flight.  The loop is single-threaded and cooperative: one
//! buffer per iteration, a progress callback between buffers, and a shared
//! cancel flag observed at the same boundary.  Volume locks are taken for the
//! duration of an operation and released on every exit path.
//!
//! Errors are returned, never unwound across the loop, and each condition
//! carries one stable integer surface code for front ends that want numbers.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool,Ordering};
use chrono::{DateTime,Utc};
use md5::{Md5,Digest};
use log::{debug,info,error};
use crate::device::BlockDevice;
use crate::nand::Storage;
use crate::stream::{CryptoMode,DEFAULT_BUFFER_SIZE};

/// surface code for a completed operation
pub const SUCCESS: i32 = 0;

/// Enumerates copy engine errors.  The `Display` trait will print the
/// equivalent long message, `code` the stable integer surface value.
#[derive(thiserror::Error,Debug,PartialEq)]
pub enum CopyError {
    #[error("i/o failed during copy")]
    WhileCopy,
    #[error("destination file already exists")]
    FileExists,
    #[error("partition is already decrypted")]
    AlreadyDecrypted,
    #[error("partition is already encrypted")]
    AlreadyEncrypted,
    #[error("restore source is plaintext but destination is encrypted")]
    RestoreCryptoMissing,
    #[error("restore source is encrypted but destination is plaintext")]
    RestoreCryptoExtra,
    #[error("source does not fit the destination partition")]
    SizeMismatch,
    #[error("source storage lacks a partition of the required kind")]
    SourcePartitionNotFound,
    #[error("md5 digests do not match")]
    Md5Mismatch,
    #[error("operation canceled")]
    UserAbort,
    #[error("crypto missing or invalid for this partition")]
    BadCrypto
}

impl CopyError {
    pub fn code(&self) -> i32 {
        match self {
            Self::WhileCopy => -1001,
            Self::FileExists => -1002,
            Self::AlreadyDecrypted => -1003,
            Self::AlreadyEncrypted => -1004,
            Self::RestoreCryptoMissing => -1005,
            Self::RestoreCryptoExtra => -1006,
            Self::SizeMismatch => -1007,
            Self::SourcePartitionNotFound => -1008,
            Self::Md5Mismatch => -1009,
            Self::UserAbort => -1010,
            Self::BadCrypto => -1011
        }
    }
}

/// Transformation applied while copying.  `Md5Hash` copies untransformed and
/// then verifies the destination digest against the source stream digest.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum CopyMode {
    NoCrypto,
    Decrypt,
    Encrypt,
    Md5Hash
}

impl CopyMode {
    fn stream_mode(&self) -> CryptoMode {
        match self {
            Self::Decrypt => CryptoMode::Decrypt,
            Self::Encrypt => CryptoMode::Encrypt,
            _ => CryptoMode::NoCrypto
        }
    }
    fn is_crypto(&self) -> bool {
        matches!(self,Self::Decrypt | Self::Encrypt)
    }
}

/// Which phase a progress report belongs to.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum ProgressKind {
    Copy,
    Restore,
    Md5Hash
}

/// Snapshot handed to the progress callback between buffers.
pub struct ProgressInfo {
    pub mode: ProgressKind,
    pub storage_name: String,
    pub bytes_count: u64,
    pub bytes_total: u64,
    pub begin_time: DateTime<Utc>,
    pub elapsed_seconds: f64
}

impl ProgressInfo {
    fn new(mode: ProgressKind,storage_name: String,bytes_total: u64) -> Self {
        Self {
            mode,
            storage_name,
            bytes_count: 0,
            bytes_total,
            begin_time: Utc::now(),
            elapsed_seconds: 0.0
        }
    }
}

/// Per-operation hooks.  The progress callback must not block and must not
/// re-enter the engine.  The cancel flag is owned by the caller; the engine
/// only ever reads it.
#[derive(Default)]
pub struct CopyOptions<'a> {
    pub progress: Option<&'a mut dyn FnMut(&ProgressInfo)>,
    pub cancel: Option<&'a AtomicBool>
}

fn canceled(opts: &CopyOptions) -> bool {
    match opts.cancel {
        Some(flag) => flag.load(Ordering::Relaxed),
        None => false
    }
}

fn tick(opts: &mut CopyOptions,pi: &mut ProgressInfo) {
    pi.elapsed_seconds = (Utc::now() - pi.begin_time).num_milliseconds() as f64 / 1000.0;
    if let Some(cb) = opts.progress.as_mut() {
        cb(pi);
    }
}

/// Dump a partition to a new file, optionally transforming in flight.
///
/// `Decrypt` requires the partition to be currently encrypted, `Encrypt`
/// requires it plaintext, and the destination must not exist.  `Md5Hash`
/// copies untransformed, then hashes the destination and compares it to the
/// source stream digest.
pub fn dump_to_file(storage: &mut Storage,idx: usize,dest: &Path,mode: CopyMode,opts: &mut CopyOptions) -> Result<(),CopyError> {
    {
        let part = storage.partition(idx);
        if mode==CopyMode::Decrypt && !part.is_encrypted() {
            return Err(CopyError::AlreadyDecrypted);
        }
        if mode==CopyMode::Encrypt && part.is_encrypted() {
            return Err(CopyError::AlreadyEncrypted);
        }
        if mode.is_crypto() && (!part.has_cipher() || part.bad_crypto()) {
            return Err(CopyError::BadCrypto);
        }
    }
    if dest.exists() {
        return Err(CopyError::FileExists);
    }
    let is_drive = storage.is_drive();
    if is_drive {
        storage.device_mut().lock_volume();
    }
    let result = dump_loop(storage,idx,dest,mode,opts);
    if is_drive {
        storage.device_mut().unlock_volume();
    }
    result
}

fn dump_loop(storage: &mut Storage,idx: usize,dest: &Path,mode: CopyMode,opts: &mut CopyOptions) -> Result<(),CopyError> {
    let name = storage.partition(idx).name().to_string();
    let total = storage.partition(idx).size();
    let mut out = OpenOptions::new().write(true).create_new(true).open(dest)
        .map_err(|e| { error!("could not create {}: {}",dest.display(),e); CopyError::WhileCopy })?;
    let mut stream = storage.stream(idx,mode.stream_mode())
        .map_err(|e| { error!("could not open stream: {}",e); CopyError::BadCrypto })?;
    let mut buffer = vec![0u8;stream.default_buffer_size()];
    let mut pi = ProgressInfo::new(ProgressKind::Copy,name.clone(),total);
    info!("dumping {} ({} bytes) to {}",name,total,dest.display());
    tick(opts,&mut pi);
    loop {
        if canceled(opts) {
            return Err(CopyError::UserAbort);
        }
        let count = stream.read(&mut buffer)
            .map_err(|e| { error!("read failed: {}",e); CopyError::WhileCopy })?;
        if count==0 {
            break;
        }
        out.write_all(&buffer[0..count])
            .map_err(|e| { error!("write failed: {}",e); CopyError::WhileCopy })?;
        pi.bytes_count += count as u64;
        tick(opts,&mut pi);
    }
    let digest = stream.md5_finalize();
    out.flush().map_err(|_| CopyError::WhileCopy)?;
    if pi.bytes_count != pi.bytes_total {
        error!("copied {} of {} bytes",pi.bytes_count,pi.bytes_total);
        return Err(CopyError::WhileCopy);
    }
    if mode==CopyMode::Md5Hash {
        verify_md5(dest,&digest,&name,opts)?;
    }
    info!("dump of {} complete",name);
    Ok(())
}

/// Re-read the destination file, hash it, and compare with the source digest.
fn verify_md5(dest: &Path,expected: &[u8;16],name: &str,opts: &mut CopyOptions) -> Result<(),CopyError> {
    let mut device = BlockDevice::open(dest)
        .map_err(|e| { error!("could not reopen {}: {}",dest.display(),e); CopyError::WhileCopy })?;
    let mut pi = ProgressInfo::new(ProgressKind::Md5Hash,name.to_string(),device.size());
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8;DEFAULT_BUFFER_SIZE];
    device.seek(0).map_err(|_| CopyError::WhileCopy)?;
    tick(opts,&mut pi);
    loop {
        if canceled(opts) {
            return Err(CopyError::UserAbort);
        }
        let count = device.read(&mut buffer).map_err(|_| CopyError::WhileCopy)?;
        if count==0 {
            break;
        }
        hasher.update(&buffer[0..count]);
        pi.bytes_count += count as u64;
        tick(opts,&mut pi);
    }
    if pi.bytes_count != pi.bytes_total {
        return Err(CopyError::Md5Mismatch);
    }
    let actual: [u8;16] = hasher.finalize().into();
    if actual != *expected {
        error!("md5 mismatch: {} vs {}",hex::encode(actual),hex::encode(expected));
        return Err(CopyError::Md5Mismatch);
    }
    debug!("md5 verified: {}",hex::encode(actual));
    Ok(())
}

/// Restore a partition from another storage.
///
/// The source must contain a partition of the destination's kind.  With a
/// crypto mode the usual preconditions apply to the source partition; without
/// one the encryption states of both sides must agree.  The source is read in
/// `mode`, the destination written untransformed.
pub fn restore_from_storage(storage: &mut Storage,idx: usize,source: &mut Storage,mode: CopyMode,opts: &mut CopyOptions) -> Result<(),CopyError> {
    let src_idx = match source.partition_by_kind(storage.partition(idx).kind()) {
        Some(i) => i,
        None => return Err(CopyError::SourcePartitionNotFound)
    };
    {
        let src = source.partition(src_idx);
        let dst = storage.partition(idx);
        if mode==CopyMode::Decrypt && !src.is_encrypted() {
            return Err(CopyError::AlreadyDecrypted);
        }
        if mode==CopyMode::Encrypt && src.is_encrypted() {
            return Err(CopyError::AlreadyEncrypted);
        }
        if !mode.is_crypto() && dst.is_encrypted() && !src.is_encrypted() {
            return Err(CopyError::RestoreCryptoMissing);
        }
        if !mode.is_crypto() && !dst.is_encrypted() && src.is_encrypted() {
            return Err(CopyError::RestoreCryptoExtra);
        }
        if src.size() > dst.size() {
            return Err(CopyError::SizeMismatch);
        }
        if mode.is_crypto() && (!src.has_cipher() || src.bad_crypto()) {
            return Err(CopyError::BadCrypto);
        }
    }
    if storage.is_drive() {
        storage.device_mut().lock_volume();
    }
    if source.is_drive() {
        source.device_mut().lock_volume();
    }
    let result = restore_loop(storage,idx,source,src_idx,mode,opts);
    if storage.is_drive() {
        storage.device_mut().unlock_volume();
    }
    if source.is_drive() {
        source.device_mut().unlock_volume();
    }
    result
}

fn restore_loop(storage: &mut Storage,idx: usize,source: &mut Storage,src_idx: usize,mode: CopyMode,opts: &mut CopyOptions) -> Result<(),CopyError> {
    let name = storage.partition(idx).name().to_string();
    let total = source.partition(src_idx).size();
    let mut src_stream = source.stream(src_idx,mode.stream_mode())
        .map_err(|e| { error!("could not open source stream: {}",e); CopyError::BadCrypto })?;
    let mut dst_stream = storage.stream(idx,CryptoMode::NoCrypto)
        .map_err(|e| { error!("could not open destination stream: {}",e); CopyError::WhileCopy })?;
    let mut buffer = vec![0u8;src_stream.default_buffer_size()];
    let mut pi = ProgressInfo::new(ProgressKind::Restore,name.clone(),total);
    info!("restoring {} ({} bytes)",name,total);
    tick(opts,&mut pi);
    loop {
        if canceled(opts) {
            return Err(CopyError::UserAbort);
        }
        let count = src_stream.read(&mut buffer)
            .map_err(|e| { error!("read failed: {}",e); CopyError::WhileCopy })?;
        if count==0 {
            break;
        }
        let written = dst_stream.write(&buffer[0..count])
            .map_err(|e| { error!("write failed: {}",e); CopyError::WhileCopy })?;
        pi.bytes_count += written as u64;
        if written < count {
            error!("wrote {} of {} bytes",written,count);
            break;
        }
        tick(opts,&mut pi);
    }
    if pi.bytes_count != pi.bytes_total {
        error!("restored {} of {} bytes",pi.bytes_count,pi.bytes_total);
        return Err(CopyError::WhileCopy);
    }
    info!("restore of {} complete",name);
    Ok(())
}

#[test]
fn surface_codes_are_stable() {
    assert_eq!(SUCCESS,0);
    assert_eq!(CopyError::WhileCopy.code(),-1001);
    assert_eq!(CopyError::FileExists.code(),-1002);
    assert_eq!(CopyError::AlreadyDecrypted.code(),-1003);
    assert_eq!(CopyError::AlreadyEncrypted.code(),-1004);
    assert_eq!(CopyError::RestoreCryptoMissing.code(),-1005);
    assert_eq!(CopyError::RestoreCryptoExtra.code(),-1006);
    assert_eq!(CopyError::SizeMismatch.code(),-1007);
    assert_eq!(CopyError::SourcePartitionNotFound.code(),-1008);
    assert_eq!(CopyError::Md5Mismatch.code(),-1009);
    assert_eq!(CopyError::UserAbort.code(),-1010);
    assert_eq!(CopyError::BadCrypto.code(),-1011);
}
