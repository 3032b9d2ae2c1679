//! AES-128-GCM message protection
//!
//! Whole messages are encrypted before fragmentation and decrypted after
//! reassembly. Every message gets its own nonce, derived from the provisioned
//! base, the sender address and a per-direction counter. The nonce travels in
//! front of the ciphertext and the detached tag behind it.

use alloc::vec::Vec;
use core::fmt;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce, Tag};

use crate::config::security::{AAD_SIZE, KEY_SIZE, NONCE_SIZE, SEALED_OVERHEAD, TAG_SIZE};

/// Errors from the AEAD layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// Tag did not match ciphertext, key, nonce or AAD
    AuthFailure,
    /// Message shorter than its nonce and tag
    Truncated,
    /// Nonce was not issued by the expected sender
    ForeignNonce,
    OutOfMemory,
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::AuthFailure => write!(f, "authentication failed"),
            SecurityError::Truncated => write!(f, "message shorter than nonce and tag"),
            SecurityError::ForeignNonce => write!(f, "nonce from another sender"),
            SecurityError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

/// Per-device AEAD material, provisioned out of band
///
/// `nonce` is the base that per-message nonces are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub key: [u8; KEY_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub aad: [u8; AAD_SIZE],
}

impl SessionKeys {
    pub const fn new(key: [u8; KEY_SIZE], nonce: [u8; NONCE_SIZE], aad: [u8; AAD_SIZE]) -> Self {
        Self { key, nonce, aad }
    }

    /// All-zero material for contexts that have not been provisioned
    pub const fn empty() -> Self {
        Self::new([0; KEY_SIZE], [0; NONCE_SIZE], [0; AAD_SIZE])
    }
}

fn copy_to_vec(data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let mut out = Vec::new();
    out.try_reserve_exact(data.len())
        .map_err(|_| SecurityError::OutOfMemory)?;
    out.extend_from_slice(data);
    Ok(out)
}

/// Encrypt `plaintext`, returning the ciphertext (same length) and the tag
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), SecurityError> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    let mut buffer = copy_to_vec(plaintext)?;

    // Only fails for inputs beyond the GCM length limit
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| SecurityError::AuthFailure)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok((buffer, tag_bytes))
}

/// Decrypt and authenticate `ciphertext` against `tag`
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>, SecurityError> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    let mut buffer = copy_to_vec(ciphertext)?;

    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer, Tag::from_slice(tag))
        .map_err(|_| SecurityError::AuthFailure)?;

    Ok(buffer)
}

/// Nonce for message `counter` sent by `sender`.
///
/// The provisioned nonce is the base. The sender address is mixed into byte 0
/// and the big-endian counter into bytes 4..12, so each direction of a session
/// walks its own nonce sequence.
pub fn message_nonce(base: &[u8; NONCE_SIZE], sender: u8, counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    nonce[0] ^= sender;
    for (byte, c) in nonce[4..].iter_mut().zip(counter.to_be_bytes()) {
        *byte ^= c;
    }
    nonce
}

/// Recover the counter from a received nonce, checking it belongs to `sender`
fn nonce_counter(base: &[u8; NONCE_SIZE], sender: u8, nonce: &[u8]) -> Result<u64, SecurityError> {
    let mut delta = [0u8; NONCE_SIZE];
    for ((d, n), b) in delta.iter_mut().zip(nonce).zip(base) {
        *d = n ^ b;
    }
    if delta[0] != sender || delta[1..4] != [0; 3] {
        return Err(SecurityError::ForeignNonce);
    }

    let mut counter = [0u8; 8];
    counter.copy_from_slice(&delta[4..]);
    Ok(u64::from_be_bytes(counter))
}

/// An authenticated inbound message
#[derive(Debug, PartialEq, Eq)]
pub struct Opened {
    pub plaintext: Vec<u8>,
    /// Sender's message counter taken from the nonce
    pub counter: u64,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt message `counter` from `sender`: `nonce || ciphertext || tag`
pub fn seal(
    keys: &SessionKeys,
    sender: u8,
    counter: u64,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), SecurityError> {
    let nonce = message_nonce(&keys.nonce, sender, counter);
    let (ciphertext, tag) = encrypt(&keys.key, &nonce, &keys.aad, plaintext)?;

    let mut sealed = Vec::new();
    sealed
        .try_reserve_exact(NONCE_SIZE + ciphertext.len() + TAG_SIZE)
        .map_err(|_| SecurityError::OutOfMemory)?;
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);
    Ok((sealed, tag))
}

/// Split nonce and tag off a reassembled message from `sender` and decrypt it
pub fn open(keys: &SessionKeys, sender: u8, sealed: &[u8]) -> Result<Opened, SecurityError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(SecurityError::Truncated);
    }
    let (nonce_bytes, rest) = sealed.split_at(NONCE_SIZE);
    let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_SIZE);

    let counter = nonce_counter(&keys.nonce, sender, nonce_bytes)?;

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(tag_bytes);

    let plaintext = decrypt(&keys.key, &nonce, &keys.aad, ciphertext, &tag)?;
    Ok(Opened {
        plaintext,
        counter,
        tag,
    })
}
