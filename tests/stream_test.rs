// test of the crypto stream over a block device
mod common;

use std::path::Path;
use nxkit::device::BlockDevice;
use nxkit::crypto::XtsCipher;
use nxkit::stream::{CryptoStream,CryptoMode};
use common::*;

const DATA_KEY: [u8;16] = [0x50,0x51,0x52,0x53,0x54,0x55,0x56,0x57,0x58,0x59,0x5a,0x5b,0x5c,0x5d,0x5e,0x5f];
const TWEAK_KEY: [u8;16] = [0x60,0x61,0x62,0x63,0x64,0x65,0x66,0x67,0x68,0x69,0x6a,0x6b,0x6c,0x6d,0x6e,0x6f];

fn scratch_device(dir: &Path,sectors: usize) -> BlockDevice {
    let path = dir.join("scratch.bin");
    std::fs::write(&path,vec![0u8;sectors*SECTOR]).expect("could not write image");
    BlockDevice::open(&path).expect("open failed")
}

#[test]
fn encrypt_write_decrypt_read_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),128);
    let cipher = XtsCipher::new(&DATA_KEY,&TWEAK_KEY);
    let plain = pseudo_random(32*SECTOR,11);

    {
        let mut stream = CryptoStream::new(&mut device,Some(&cipher),4,35,CryptoMode::Encrypt).expect("stream failed");
        assert_eq!(stream.write(&plain).expect("write failed"),plain.len());
    }
    {
        let mut stream = CryptoStream::new(&mut device,Some(&cipher),4,35,CryptoMode::Decrypt).expect("stream failed");
        let mut back = vec![0u8;32*SECTOR];
        assert_eq!(stream.read(&mut back).expect("read failed"),plain.len());
        assert_eq!(back,plain);
    }
    // what landed on the device is not the plaintext
    {
        let mut stream = CryptoStream::new(&mut device,None,4,35,CryptoMode::NoCrypto).expect("stream failed");
        let mut raw = vec![0u8;32*SECTOR];
        stream.read(&mut raw).expect("read failed");
        assert_ne!(raw,plain);
    }
}

#[test]
fn identical_streams_agree_on_digest() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),128);
    let cipher = XtsCipher::new(&DATA_KEY,&TWEAK_KEY);
    let plain = pseudo_random(16*SECTOR,12);
    {
        let mut stream = CryptoStream::new(&mut device,Some(&cipher),0,15,CryptoMode::Encrypt).expect("stream failed");
        stream.write(&plain).expect("write failed");
    }
    let mut digests = Vec::new();
    for _pass in 0..2 {
        let mut stream = CryptoStream::new(&mut device,Some(&cipher),0,15,CryptoMode::Decrypt).expect("stream failed");
        let mut buf = vec![0u8;16*SECTOR];
        while stream.read(&mut buf).expect("read failed") > 0 {}
        digests.push(stream.md5_finalize());
    }
    assert_eq!(digests[0],digests[1]);
}

#[test]
fn reads_are_exact_and_end_at_partition() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),64);
    let mut stream = CryptoStream::new(&mut device,None,8,15,CryptoMode::NoCrypto).expect("stream failed");
    assert_eq!(stream.size(),8*SECTOR as u64);
    let mut buf = vec![0u8;16*SECTOR];
    // the read is clipped at the partition end, then returns 0
    assert_eq!(stream.read(&mut buf).expect("read failed"),8*SECTOR);
    assert_eq!(stream.read(&mut buf).expect("read failed"),0);
}

#[test]
fn crypto_modes_demand_alignment() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),64);
    let cipher = XtsCipher::new(&DATA_KEY,&TWEAK_KEY);
    {
        let mut stream = CryptoStream::new(&mut device,Some(&cipher),0,31,CryptoMode::Decrypt).expect("stream failed");
        assert!(stream.seek(100).is_err());
        assert!(stream.seek(SECTOR as u64).is_ok());
        let mut odd = vec![0u8;100];
        assert!(stream.read(&mut odd).is_err());
    }
    // passthrough mode has no such constraint
    let mut stream = CryptoStream::new(&mut device,None,0,31,CryptoMode::NoCrypto).expect("stream failed");
    assert!(stream.seek(100).is_ok());
    let mut odd = vec![0u8;100];
    assert_eq!(stream.read(&mut odd).expect("read failed"),100);
}

#[test]
fn crypto_mode_requires_cipher() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),64);
    assert!(CryptoStream::new(&mut device,None,0,31,CryptoMode::Decrypt).is_err());
}

#[test]
fn decrypt_stream_refuses_writes() {
    init_logging();
    let dir = tempfile::tempdir().expect("no temp dir");
    let mut device = scratch_device(dir.path(),64);
    let cipher = XtsCipher::new(&DATA_KEY,&TWEAK_KEY);
    let mut stream = CryptoStream::new(&mut device,Some(&cipher),0,31,CryptoMode::Decrypt).expect("stream failed");
    assert!(stream.write(&[0u8;512]).is_err());
}
