//! Payload encryption (spec.md §4.4). Plaintext sessions use [`Plain`];
//! once `ENCRYPT` completes, the session switches to [`Aes128Ecb`] keyed
//! on `MD5(api_key ‖ salt)`.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use md5::{Digest, Md5};
use zeroize::Zeroizing;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext length is not a multiple of the block size")]
    InvalidLength,
    #[error("invalid padding in decrypted block")]
    InvalidPadding,
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// A reversible transform applied to datagram payloads before they hit the
/// wire and after they come off it.
pub trait Cipher: std::fmt::Debug {
    fn encrypt(&self, plaintext: &str) -> Vec<u8>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CryptoError>;
    fn clone_box(&self) -> Box<dyn Cipher>;
}

impl Clone for Box<dyn Cipher> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// No encryption: the session before `ENCRYPT` negotiates, or when no API
/// key is configured.
#[derive(Debug, Clone, Default)]
pub struct Plain;

impl Cipher for Plain {
    fn encrypt(&self, plaintext: &str) -> Vec<u8> {
        plaintext.as_bytes().to_vec()
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CryptoError> {
        String::from_utf8(ciphertext.to_vec()).map_err(|_| CryptoError::InvalidUtf8)
    }

    fn clone_box(&self) -> Box<dyn Cipher> {
        Box::new(self.clone())
    }
}

/// AES-128-ECB with the key derived per spec.md §4.4: `MD5(api_key ‖
/// salt)`. The key is zeroed on drop.
pub struct Aes128Ecb {
    key: Zeroizing<[u8; 16]>,
}

impl Aes128Ecb {
    /// Derives the session key from the client's API key and the salt the
    /// server handed back in the `209` response.
    pub fn derive(api_key: &str, salt: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(api_key.as_bytes());
        hasher.update(salt.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest);
        Aes128Ecb { key: Zeroizing::new(key) }
    }
}

impl Clone for Aes128Ecb {
    fn clone(&self) -> Self {
        Aes128Ecb { key: self.key.clone() }
    }
}

impl std::fmt::Debug for Aes128Ecb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes128Ecb").finish_non_exhaustive()
    }
}

impl Cipher for Aes128Ecb {
    fn encrypt(&self, plaintext: &str) -> Vec<u8> {
        let cipher = Aes128::new(GenericArray::from_slice(&*self.key));
        let mut data = plaintext.as_bytes().to_vec();
        pkcs_pad(&mut data);
        for block in data.chunks_mut(16) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        data
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::InvalidLength);
        }
        let cipher = Aes128::new(GenericArray::from_slice(&*self.key));
        let mut data = ciphertext.to_vec();
        for block in data.chunks_mut(16) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        pkcs_unpad(&mut data)?;
        String::from_utf8(data).map_err(|_| CryptoError::InvalidUtf8)
    }

    fn clone_box(&self) -> Box<dyn Cipher> {
        Box::new(self.clone())
    }
}

/// Pads to a multiple of 16 bytes; the pad byte equals the pad length
/// (spec.md §4.4). A block of 16 pad bytes is appended if `data` is
/// already block-aligned.
fn pkcs_pad(data: &mut Vec<u8>) {
    let pad_len = 16 - (data.len() % 16);
    data.resize(data.len() + pad_len, pad_len as u8);
}

/// Strips padding by reading the last byte as the pad length.
fn pkcs_unpad(data: &mut Vec<u8>) -> Result<(), CryptoError> {
    let pad_len = *data.last().ok_or(CryptoError::InvalidPadding)? as usize;
    if pad_len == 0 || pad_len > data.len() {
        return Err(CryptoError::InvalidPadding);
    }
    data.truncate(data.len() - pad_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_round_trip() {
        let c = Plain;
        let enc = c.encrypt("FILE size=1&ed2k=x");
        assert_eq!(c.decrypt(&enc).unwrap(), "FILE size=1&ed2k=x");
    }

    #[test]
    fn aes_round_trip_short() {
        let c = Aes128Ecb::derive("myapikey", "saltvalue");
        let enc = c.encrypt("hello world");
        assert_eq!(enc.len() % 16, 0);
        assert_eq!(c.decrypt(&enc).unwrap(), "hello world");
    }

    #[test]
    fn aes_round_trip_block_aligned() {
        let c = Aes128Ecb::derive("k", "s");
        let plaintext = "a".repeat(16);
        let enc = c.encrypt(&plaintext);
        assert_eq!(enc.len(), 32);
        assert_eq!(c.decrypt(&enc).unwrap(), plaintext);
    }

    #[test]
    fn aes_round_trip_empty() {
        let c = Aes128Ecb::derive("k", "s");
        let enc = c.encrypt("");
        assert_eq!(c.decrypt(&enc).unwrap(), "");
    }

    #[test]
    fn decrypt_rejects_unaligned_length() {
        let c = Aes128Ecb::derive("k", "s");
        assert!(matches!(c.decrypt(&[1, 2, 3]), Err(CryptoError::InvalidLength)));
    }

    #[test]
    fn different_salts_change_ciphertext() {
        let a = Aes128Ecb::derive("key", "salt1");
        let b = Aes128Ecb::derive("key", "salt2");
        assert_ne!(a.encrypt("same input"), b.encrypt("same input"));
    }
}
