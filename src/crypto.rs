//! Public-key sealing for secrets and metadata.
//!
//! [`CryptoEngine`] is the capability the rest of the crate relies on: sign
//! then encrypt for one recipient, open with a private key, and split opening
//! into session-key derivation plus symmetric decryption so session keys can
//! be cached.
//!
//! [`HybridEngine`] is the bundled implementation. A message body is sealed
//! with a fresh AES-256-GCM session key, which is wrapped for the recipient
//! through an ephemeral X25519 agreement. Bodies carry an Ed25519 signature of
//! the sender. Private keys are stored locked with Argon2id + AES-256-GCM.
//!
//! Opening a message only proves it was signed by the key it carries. Use
//! [`HybridEngine::open_from`] when the sender's public key is known.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{password_hash::rand_core::RngCore, Argon2, Params, Version};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Errors that can occur during cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid base64 encoding")]
    InvalidBase64,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Malformed message")]
    InvalidMessage,
    #[error("Signature verification failed")]
    SignatureMismatch,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

/// Symmetric key protecting a single message body.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded)
            .map_err(|_| CryptoError::InvalidKey("session key is not hex".to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<Vec<u8>> for SessionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(<{} bytes>)", self.0.len())
    }
}

/// Opaque public-key capability used for secrets and metadata.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Sign `plaintext` with the acting key, then encrypt it for the recipient.
    async fn sign_encrypt(
        &self,
        plaintext: &str,
        recipient_public_key: &str,
        acting_private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError>;

    /// Open a message addressed to `private_key`.
    async fn decrypt(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError>;

    /// Recover the session key of a message without decrypting its body.
    async fn derive_session_key(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<SessionKey, CryptoError>;

    /// Decrypt a message body with an already known session key.
    async fn decrypt_with_session_key(
        &self,
        session_key: &SessionKey,
        ciphertext: &str,
    ) -> Result<String, CryptoError>;
}

/// Argon2id cost parameters used to lock private keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// A freshly generated key pair in its armored text form.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<locked>")
            .finish()
    }
}

const FORMAT_VERSION: u8 = 1;
const SEED_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const PUBLIC_LEN: usize = 64;
const SIGNATURE_LEN: usize = 64;
const WRAP_INFO: &[u8] = b"passvault session key wrap";

// version | public | memory | iterations | parallelism | salt | nonce | sealed seed
const PRIVATE_LEN: usize = 1 + PUBLIC_LEN + 12 + SALT_LEN + NONCE_LEN + SEED_LEN + TAG_LEN;
// version | ephemeral public | wrap nonce | wrapped session key | body nonce
const HEADER_LEN: usize = 1 + 32 + NONCE_LEN + SEED_LEN + TAG_LEN + NONCE_LEN;

/// X25519 + Ed25519 + AES-256-GCM implementation of [`CryptoEngine`].
#[derive(Debug, Clone, Default)]
pub struct HybridEngine {
    kdf: KdfParams,
}

impl HybridEngine {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Generate a key pair whose private half is locked with `passphrase`.
    pub fn generate_key_pair(&self, passphrase: &[u8]) -> Result<KeyPair, CryptoError> {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        OsRng.fill_bytes(&mut seed[..]);

        let public = public_bytes(&seed);

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let lock_key = derive_lock_key(passphrase, &salt, &self.kdf)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&lock_key[..]));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed_seed = cipher
            .encrypt(&nonce, &seed[..])
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut armor = Vec::with_capacity(PRIVATE_LEN);
        armor.push(FORMAT_VERSION);
        armor.extend_from_slice(&public);
        armor.extend_from_slice(&self.kdf.memory_kib.to_le_bytes());
        armor.extend_from_slice(&self.kdf.iterations.to_le_bytes());
        armor.extend_from_slice(&self.kdf.parallelism.to_le_bytes());
        armor.extend_from_slice(&salt);
        armor.extend_from_slice(&nonce);
        armor.extend_from_slice(&sealed_seed);

        Ok(KeyPair {
            public_key: STANDARD.encode(public),
            private_key: STANDARD.encode(armor),
        })
    }

    /// Check that `public_key` can be used as a recipient.
    pub fn check_public_key(public_key: &str) -> Result<(), CryptoError> {
        decode_public(public_key).map(|_| ())
    }

    /// Open a message and require that it was signed by `sender_public_key`.
    pub async fn open_from(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
        sender_public_key: &str,
    ) -> Result<String, CryptoError> {
        let (expected, _) = decode_public(sender_public_key)?;
        let session_key = self
            .derive_session_key(ciphertext, private_key, passphrase)
            .await?;
        let (signer, plaintext) = open_body(&session_key, ciphertext)?;
        if signer != expected {
            return Err(CryptoError::SignatureMismatch);
        }
        Ok(plaintext)
    }

    /// Public key embedded in a locked private key.
    pub fn public_key_of(private_key: &str) -> Result<String, CryptoError> {
        let armor = decode_private(private_key)?;
        Ok(STANDARD.encode(&armor[1..1 + PUBLIC_LEN]))
    }
}

#[async_trait]
impl CryptoEngine for HybridEngine {
    async fn sign_encrypt(
        &self,
        plaintext: &str,
        recipient_public_key: &str,
        acting_private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError> {
        let (_, recipient_dh) = decode_public(recipient_public_key)?;
        let seed = unlock_private(acting_private_key, passphrase)?;
        let signing_key = signing_key(&seed);

        let signature = signing_key.sign(plaintext.as_bytes());
        let mut body = Zeroizing::new(Vec::with_capacity(
            32 + SIGNATURE_LEN + plaintext.len(),
        ));
        body.extend_from_slice(signing_key.verifying_key().as_bytes());
        body.extend_from_slice(&signature.to_bytes());
        body.extend_from_slice(plaintext.as_bytes());

        let session_key = Aes256Gcm::generate_key(&mut OsRng);
        let body_nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let body_ct = Aes256Gcm::new(&session_key)
            .encrypt(&body_nonce, body.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient_dh);
        let wrap_key = wrap_key(shared.as_bytes(), &ephemeral_public, &recipient_dh)?;
        let wrap_nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let wrapped = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrap_key[..]))
            .encrypt(&wrap_nonce, session_key.as_slice())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut message = Vec::with_capacity(HEADER_LEN + body_ct.len());
        message.push(FORMAT_VERSION);
        message.extend_from_slice(ephemeral_public.as_bytes());
        message.extend_from_slice(&wrap_nonce);
        message.extend_from_slice(&wrapped);
        message.extend_from_slice(&body_nonce);
        message.extend_from_slice(&body_ct);

        Ok(STANDARD.encode(message))
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<String, CryptoError> {
        let session_key = self
            .derive_session_key(ciphertext, private_key, passphrase)
            .await?;
        self.decrypt_with_session_key(&session_key, ciphertext).await
    }

    async fn derive_session_key(
        &self,
        ciphertext: &str,
        private_key: &str,
        passphrase: &[u8],
    ) -> Result<SessionKey, CryptoError> {
        let message = decode_message(ciphertext)?;
        let seed = unlock_private(private_key, passphrase)?;
        let secret = StaticSecret::from(dh_scalar(&seed));
        let own_public = PublicKey::from(&secret);

        let mut ephemeral = [0u8; 32];
        ephemeral.copy_from_slice(&message[1..33]);
        let ephemeral_public = PublicKey::from(ephemeral);
        let shared = secret.diffie_hellman(&ephemeral_public);
        let wrap_key = wrap_key(shared.as_bytes(), &ephemeral_public, &own_public)?;

        let wrap_nonce = Nonce::from_slice(&message[33..33 + NONCE_LEN]);
        let wrapped = &message[33 + NONCE_LEN..33 + NONCE_LEN + SEED_LEN + TAG_LEN];
        let session_key = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrap_key[..]))
            .decrypt(wrap_nonce, wrapped)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        if session_key.len() != SEED_LEN {
            return Err(CryptoError::InvalidMessage);
        }
        Ok(SessionKey(session_key))
    }

    async fn decrypt_with_session_key(
        &self,
        session_key: &SessionKey,
        ciphertext: &str,
    ) -> Result<String, CryptoError> {
        open_body(session_key, ciphertext).map(|(_, plaintext)| plaintext)
    }
}

fn open_body(
    session_key: &SessionKey,
    ciphertext: &str,
) -> Result<(VerifyingKey, String), CryptoError> {
    if session_key.0.len() != SEED_LEN {
        return Err(CryptoError::InvalidKey("session key length".to_string()));
    }
    let message = decode_message(ciphertext)?;
    let body_nonce = Nonce::from_slice(&message[HEADER_LEN - NONCE_LEN..HEADER_LEN]);
    let body = Zeroizing::new(
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&session_key.0))
            .decrypt(body_nonce, &message[HEADER_LEN..])
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );

    if body.len() < 32 + SIGNATURE_LEN {
        return Err(CryptoError::InvalidMessage);
    }
    let mut signer = [0u8; 32];
    signer.copy_from_slice(&body[..32]);
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&body[32..32 + SIGNATURE_LEN]);
    let plaintext = &body[32 + SIGNATURE_LEN..];

    let verifying_key =
        VerifyingKey::from_bytes(&signer).map_err(|_| CryptoError::SignatureMismatch)?;
    verifying_key
        .verify(plaintext, &Signature::from_bytes(&signature))
        .map_err(|_| CryptoError::SignatureMismatch)?;

    let plaintext =
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::DecryptionFailed)?;
    Ok((verifying_key, plaintext))
}

fn signing_key(seed: &[u8; SEED_LEN]) -> SigningKey {
    let scalar = labelled_hash(b"passvault-sign", seed);
    SigningKey::from_bytes(&scalar)
}

fn dh_scalar(seed: &[u8; SEED_LEN]) -> [u8; 32] {
    labelled_hash(b"passvault-dh", seed)
}

fn labelled_hash(label: &[u8], seed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(seed);
    hasher.finalize().into()
}

fn public_bytes(seed: &[u8; SEED_LEN]) -> [u8; PUBLIC_LEN] {
    let verifying = signing_key(seed).verifying_key();
    let dh_public = PublicKey::from(&StaticSecret::from(dh_scalar(seed)));
    let mut public = [0u8; PUBLIC_LEN];
    public[..32].copy_from_slice(verifying.as_bytes());
    public[32..].copy_from_slice(dh_public.as_bytes());
    public
}

fn wrap_key(
    shared: &[u8],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut info = Vec::with_capacity(WRAP_INFO.len() + 64);
    info.extend_from_slice(WRAP_INFO);
    info.extend_from_slice(ephemeral.as_bytes());
    info.extend_from_slice(recipient.as_bytes());

    let mut okm = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(None, shared)
        .expand(&info, &mut okm[..])
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}

fn derive_lock_key(
    passphrase: &[u8],
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut output[..])
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(output)
}

fn decode_public(public_key: &str) -> Result<(VerifyingKey, PublicKey), CryptoError> {
    let bytes = STANDARD
        .decode(public_key.trim())
        .map_err(|_| CryptoError::InvalidKey("public key is not base64".to_string()))?;
    if bytes.len() != PUBLIC_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "public key has {} bytes, expected {PUBLIC_LEN}",
            bytes.len()
        )));
    }
    let mut verifying = [0u8; 32];
    verifying.copy_from_slice(&bytes[..32]);
    let mut dh = [0u8; 32];
    dh.copy_from_slice(&bytes[32..]);

    let verifying = VerifyingKey::from_bytes(&verifying)
        .map_err(|_| CryptoError::InvalidKey("bad signing half".to_string()))?;
    Ok((verifying, PublicKey::from(dh)))
}

fn decode_private(private_key: &str) -> Result<Vec<u8>, CryptoError> {
    let armor = STANDARD
        .decode(private_key.trim())
        .map_err(|_| CryptoError::InvalidKey("private key is not base64".to_string()))?;
    if armor.len() != PRIVATE_LEN || armor[0] != FORMAT_VERSION {
        return Err(CryptoError::InvalidKey("unrecognised private key".to_string()));
    }
    Ok(armor)
}

fn unlock_private(
    private_key: &str,
    passphrase: &[u8],
) -> Result<Zeroizing<[u8; SEED_LEN]>, CryptoError> {
    let armor = decode_private(private_key)?;

    let mut offset = 1 + PUBLIC_LEN;
    let read_u32 = |offset: &mut usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&armor[*offset..*offset + 4]);
        *offset += 4;
        u32::from_le_bytes(raw)
    };
    let kdf = KdfParams {
        memory_kib: read_u32(&mut offset),
        iterations: read_u32(&mut offset),
        parallelism: read_u32(&mut offset),
    };
    let salt = &armor[offset..offset + SALT_LEN];
    offset += SALT_LEN;
    let nonce = Nonce::from_slice(&armor[offset..offset + NONCE_LEN]);
    offset += NONCE_LEN;

    let lock_key = derive_lock_key(passphrase, salt, &kdf)?;
    let seed = Zeroizing::new(
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&lock_key[..]))
            .decrypt(nonce, &armor[offset..])
            .map_err(|_| CryptoError::DecryptionFailed)?,
    );

    let mut out = Zeroizing::new([0u8; SEED_LEN]);
    out.copy_from_slice(&seed);
    Ok(out)
}

fn decode_message(ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
    let message = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| CryptoError::InvalidBase64)?;
    if message.len() < HEADER_LEN || message[0] != FORMAT_VERSION {
        return Err(CryptoError::InvalidMessage);
    }
    Ok(message)
}
