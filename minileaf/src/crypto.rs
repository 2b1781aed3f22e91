//! Authenticated encryption at rest using AES-256-GCM.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::io::{Read, Write};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{ErrorKind, MinileafError, MinileafResult};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for AES-256-GCM.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key from the crypto RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes. The slice must be exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> MinileafResult<Self> {
        if bytes.len() != KEY_SIZE {
            log::error!("Invalid encryption key size: {}", bytes.len());
            return Err(MinileafError::new(
                &format!("Encryption key must be {} bytes, got {}", KEY_SIZE, bytes.len()),
                ErrorKind::InvalidOperation,
            ));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Returns the key material. Don't log or serialize the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts storage records.
///
/// Output format is `nonce (12 bytes) ‖ ciphertext ‖ tag (16 bytes)`; a tag
/// mismatch on decrypt surfaces [ErrorKind::CorruptedCiphertext].
#[derive(Clone)]
pub struct CipherBox {
    cipher: Aes256Gcm,
}

impl CipherBox {
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let key_array = GenericArray::from_slice(key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(key_array),
        }
    }

    /// Encrypts a record payload with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> MinileafResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|_| {
            log::error!("AEAD encryption failed");
            MinileafError::new("Encryption failed", ErrorKind::StorageError)
        })?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    /// Decrypts a record payload produced by [CipherBox::encrypt].
    pub fn decrypt(&self, payload: &[u8]) -> MinileafResult<Vec<u8>> {
        if payload.len() < NONCE_SIZE + TAG_SIZE {
            log::error!("Encrypted payload too short: {} bytes", payload.len());
            return Err(MinileafError::new(
                "Encrypted payload too short",
                ErrorKind::CorruptedCiphertext,
            ));
        }
        let nonce = Nonce::from_slice(&payload[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &payload[NONCE_SIZE..])
            .map_err(|_| {
                log::error!("AEAD authentication tag mismatch");
                MinileafError::new(
                    "Authentication tag mismatch",
                    ErrorKind::CorruptedCiphertext,
                )
            })
    }
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBox").field("cipher", &"Aes256Gcm").finish()
    }
}

/// Writes a length-framed record: `[u32 LE length][length bytes]`.
///
/// Length framing keeps every encrypted record independently recoverable
/// during replay; a corrupt frame is skipped without losing its successors.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> MinileafResult<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Reads one length-framed record. Returns `Ok(None)` on clean end of
/// stream; a frame longer than `max_len` is corruption.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> MinileafResult<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_len {
        log::warn!("Frame length {} exceeds cap {}", len, max_len);
        return Err(MinileafError::new(
            &format!("Frame length {} exceeds cap {}", len, max_len),
            ErrorKind::FileCorrupted,
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
