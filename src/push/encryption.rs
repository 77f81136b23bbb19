//! `aes128gcm` content encoding for Web Push payloads (RFC 8188, RFC 8291).
//!
//! Every message gets a fresh ephemeral P-256 key pair and a fresh 16-byte salt:
//! 1. ECDH between the ephemeral private key and the subscriber's `p256dh` key
//! 2. HKDF-SHA256 with the subscriber's auth secret as salt -> input keying material
//! 3. HKDF-SHA256 with the message salt -> 16-byte CEK and 12-byte nonce
//! 4. AES-128-GCM over `plaintext || 0x02` as a single record
//!
//! The returned body is `salt(16) || rs(4, BE) || idlen(1) || keyid(65) || ciphertext`.

use aes_gcm::{aead::Aead, Aes128Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use p256::{
    ecdh,
    elliptic_curve::{
        rand_core::{OsRng, RngCore},
        sec1::ToEncodedPoint,
    },
    PublicKey, SecretKey,
};
use sha2::Sha256;
use thiserror::Error;

pub const CONTENT_ENCODING: &str = "aes128gcm";

pub const AUTH_SECRET_LENGTH: usize = 16;
pub const PUBLIC_KEY_LENGTH: usize = 65;
pub const SALT_LENGTH: usize = 16;
pub const RECORD_SIZE: u32 = 4096;
pub const HEADER_LENGTH: usize = SALT_LENGTH + 4 + 1 + PUBLIC_KEY_LENGTH;

const TAG_LENGTH: usize = 16;
const KEY_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 12;
const IKM_LENGTH: usize = 32;
const PADDING_DELIMITER: u8 = 0x02;

/// Largest plaintext that fits in one record of a 4096-byte push message.
pub const MAX_PAYLOAD_LENGTH: usize =
    RECORD_SIZE as usize - HEADER_LENGTH - TAG_LENGTH - 1;

const WEBPUSH_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("Invalid subscriber public key: {0}")]
    InvalidPublicKey(String),

    #[error("Auth secret must be {expected} bytes, got {actual}")]
    InvalidAuthSecret { expected: usize, actual: usize },

    #[error("Payload of {length} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { length: usize, max: usize },

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("AES-GCM encryption failed")]
    Cipher,
}

/// Encrypts `plaintext` for the subscriber identified by `p256dh` and `auth_secret`.
pub fn encrypt(
    p256dh: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let ephemeral = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);

    encrypt_with(&ephemeral, &salt, p256dh, auth_secret, plaintext)
}

pub(crate) fn encrypt_with(
    ephemeral: &SecretKey,
    salt: &[u8; SALT_LENGTH],
    p256dh: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let subscriber = parse_public_key(p256dh)?;

    if auth_secret.len() != AUTH_SECRET_LENGTH {
        return Err(EncryptionError::InvalidAuthSecret {
            expected: AUTH_SECRET_LENGTH,
            actual: auth_secret.len(),
        });
    }

    if plaintext.len() > MAX_PAYLOAD_LENGTH {
        return Err(EncryptionError::PayloadTooLarge {
            length: plaintext.len(),
            max: MAX_PAYLOAD_LENGTH,
        });
    }

    let shared = ecdh::diffie_hellman(
        ephemeral.to_nonzero_scalar(),
        subscriber.as_affine(),
    );
    let sender_public = ephemeral.public_key().to_encoded_point(false);

    let (cek, nonce) = derive_key_and_nonce(
        shared.raw_secret_bytes(),
        auth_secret,
        p256dh,
        sender_public.as_bytes(),
        salt,
    )?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(PADDING_DELIMITER);

    let cipher =
        Aes128Gcm::new_from_slice(&cek).map_err(|_| EncryptionError::Cipher)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|_| EncryptionError::Cipher)?;

    let mut body = Vec::with_capacity(HEADER_LENGTH + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LENGTH as u8);
    body.extend_from_slice(sender_public.as_bytes());
    body.extend_from_slice(&ciphertext);

    Ok(body)
}

/// Accepts only the 65-byte uncompressed SEC1 form browsers hand out as `p256dh`.
pub fn parse_public_key(p256dh: &[u8]) -> Result<PublicKey, EncryptionError> {
    if p256dh.len() != PUBLIC_KEY_LENGTH || p256dh[0] != 0x04 {
        return Err(EncryptionError::InvalidPublicKey(format!(
            "expected {} byte uncompressed point, got {} bytes",
            PUBLIC_KEY_LENGTH,
            p256dh.len()
        )));
    }

    PublicKey::from_sec1_bytes(p256dh).map_err(|_| {
        EncryptionError::InvalidPublicKey(String::from(
            "point is not on the P-256 curve",
        ))
    })
}

fn derive_key_and_nonce(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    receiver_public: &[u8],
    sender_public: &[u8],
    salt: &[u8],
) -> Result<([u8; KEY_LENGTH], [u8; NONCE_LENGTH]), EncryptionError> {
    let hk = Hkdf::<Sha256>::new(Some(auth_secret), ecdh_secret);
    let mut ikm = [0u8; IKM_LENGTH];
    hk.expand_multi_info(
        &[WEBPUSH_INFO, receiver_public, sender_public],
        &mut ikm,
    )
    .map_err(|_| EncryptionError::KeyDerivation)?;

    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; KEY_LENGTH];
    let mut nonce = [0u8; NONCE_LENGTH];
    hk.expand(CEK_INFO, &mut cek)
        .map_err(|_| EncryptionError::KeyDerivation)?;
    hk.expand(NONCE_INFO, &mut nonce)
        .map_err(|_| EncryptionError::KeyDerivation)?;

    Ok((cek, nonce))
}
