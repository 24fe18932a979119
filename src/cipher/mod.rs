//! Per-chunk AES-256-CBC encryption with PKCS#7 padding

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;
/// AES block size, also the size of the per-chunk IV
pub const BLOCK_SIZE: usize = 16;

/// Result type for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// Cipher error types
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key material has the wrong length
    #[error("encryption key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Ciphertext is too short or its padding is invalid
    #[error("malformed encrypted chunk: {0}")]
    MalformedChunk(&'static str),
}

/// A 32-byte per-file encryption key.
///
/// The key never leaves the process: it is stored in the catalog row and
/// handed to a [`ChunkCipher`], nothing else. `Debug` is redacted so the key
/// cannot end up in logs by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey([u8; KEY_SIZE]);

impl FileKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Build a key from raw bytes, checking the length
    pub fn from_slice(bytes: &[u8]) -> CipherResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Raw key bytes, for persisting in the catalog
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileKey(..)")
    }
}

/// Encrypts and decrypts file chunks, bound to a single key.
///
/// Every encrypted chunk is self-contained: a fresh random IV is prepended
/// to the ciphertext, so chunks can be decrypted independently and in any
/// order. Output layout: `IV[16] || AES-256-CBC(plaintext, PKCS#7)`.
pub struct ChunkCipher {
    key: FileKey,
}

impl ChunkCipher {
    /// Create a cipher with a newly generated random key
    pub fn generate() -> Self {
        Self {
            key: FileKey::generate(),
        }
    }

    /// Create a cipher bound to an existing key
    pub fn from_key(key: FileKey) -> Self {
        Self { key }
    }

    /// The key this cipher is bound to
    pub fn key(&self) -> &FileKey {
        &self.key
    }

    /// Encrypt one chunk of plaintext.
    ///
    /// Empty plaintext is legal; the output is then the IV plus a single
    /// padding block (32 bytes total).
    pub fn encrypt_chunk(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.0.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut out = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt one chunk produced by [`encrypt_chunk`](Self::encrypt_chunk).
    pub fn decrypt_chunk(&self, encrypted: &[u8]) -> CipherResult<Vec<u8>> {
        if encrypted.len() < BLOCK_SIZE {
            return Err(CipherError::MalformedChunk(
                "shorter than the 16-byte IV prefix",
            ));
        }

        let (iv, ciphertext) = encrypted.split_at(BLOCK_SIZE);
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::MalformedChunk(
                "ciphertext length is not a positive multiple of the block size",
            ));
        }

        let mut iv_arr = [0u8; BLOCK_SIZE];
        iv_arr.copy_from_slice(iv);

        Aes256CbcDec::new(&self.key.0.into(), &iv_arr.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::MalformedChunk("invalid PKCS#7 padding"))
    }
}
