//! ## XTS Cipher Module
//!
//! AES-XTS-128 over 512-byte sectors, the scheme the NX uses for its eMMC
//! partitions.  A cipher is built from a (data key, tweak key) pair supplied by
//! the caller; no key derivation happens here.  The tweak for a sector is the
//! AES encryption of the little-endian sector index, advanced from block to
//! block by multiplication with the primitive element of GF(2^128).
//! Sector sizes are multiples of the AES block, so ciphertext stealing never
//! comes into play.

use aes::Aes128;
use aes::cipher::{BlockEncrypt,BlockDecrypt,KeyInit};
use aes::cipher::generic_array::GenericArray;

pub const KEY_SIZE: usize = 16;
const AES_BLOCK_SIZE: usize = 16;
/// the GF(2^128) reduction polynomial used by XTS
const GF_POLY: u8 = 0x87;

/// AES-XTS-128 codec for one partition.  Cheap to hold, the key schedules
/// are computed once at construction.
pub struct XtsCipher {
    data: Aes128,
    tweak: Aes128
}

fn xor_in_place(dst: &mut [u8],src: &[u8]) {
    for i in 0..dst.len() {
        dst[i] ^= src[i];
    }
}

/// Multiply the tweak by alpha.  The tweak is treated as a little-endian
/// polynomial, the carry out of the top bit wraps to the reduction polynomial.
fn mul_alpha(tweak: &mut [u8;AES_BLOCK_SIZE]) {
    let mut carry = 0u8;
    for byte in tweak.iter_mut() {
        let next = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = next;
    }
    if carry != 0 {
        tweak[0] ^= GF_POLY;
    }
}

impl XtsCipher {
    pub fn new(data_key: &[u8;KEY_SIZE],tweak_key: &[u8;KEY_SIZE]) -> Self {
        Self {
            data: Aes128::new(GenericArray::from_slice(data_key)),
            tweak: Aes128::new(GenericArray::from_slice(tweak_key))
        }
    }
    /// initial tweak for a sector, AES-enc of the index as a 128-bit LE value
    fn sector_tweak(&self,sector_index: u64) -> [u8;AES_BLOCK_SIZE] {
        let mut block = GenericArray::from([0u8;AES_BLOCK_SIZE]);
        block[0..8].copy_from_slice(&sector_index.to_le_bytes());
        self.tweak.encrypt_block(&mut block);
        block.into()
    }
    /// Encrypt a buffer in place.  The buffer must be an integer number of
    /// 16-byte blocks, in practice one or more 512-byte sectors starting at
    /// `sector_index`.
    pub fn encrypt(&self,sector_index: u64,buf: &mut [u8]) {
        assert!(buf.len() % AES_BLOCK_SIZE == 0,"buffer not block aligned");
        let mut tweak = self.sector_tweak(sector_index);
        for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            xor_in_place(chunk,&tweak);
            self.data.encrypt_block(GenericArray::from_mut_slice(chunk));
            xor_in_place(chunk,&tweak);
            mul_alpha(&mut tweak);
        }
    }
    /// Decrypt a buffer in place, mirror of `encrypt`.
    pub fn decrypt(&self,sector_index: u64,buf: &mut [u8]) {
        assert!(buf.len() % AES_BLOCK_SIZE == 0,"buffer not block aligned");
        let mut tweak = self.sector_tweak(sector_index);
        for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
            xor_in_place(chunk,&tweak);
            self.data.decrypt_block(GenericArray::from_mut_slice(chunk));
            xor_in_place(chunk,&tweak);
            mul_alpha(&mut tweak);
        }
    }
}
