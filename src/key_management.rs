use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{OnionError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// OAEP overhead for SHA-256: two digests plus two framing bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Largest plaintext RSA-OAEP(SHA-256) can encrypt under a modulus of
/// `modulus_bytes`.
pub fn oaep_capacity(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(OAEP_SHA256_OVERHEAD)
}

/// Relay key pair. The private half stays with the relay that generated it.
#[derive(Clone)]
pub struct AsymmetricKeyPair {
    pub public_key: RsaPublicKey,
    pub private_key: RsaPrivateKey,
}

impl AsymmetricKeyPair {
    pub fn generate(bits: usize) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn capacity(&self) -> usize {
        oaep_capacity(self.public_key.size())
    }
}

pub fn export_public_key(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn export_private_key(key: &RsaPrivateKey) -> Result<String> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
    Ok(STANDARD.encode(der.as_bytes()))
}

pub fn import_public_key(encoded: &str) -> Result<RsaPublicKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| OnionError::InvalidKey(e.to_string()))
}

pub fn import_private_key(encoded: &str) -> Result<RsaPrivateKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
    RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| OnionError::InvalidKey(e.to_string()))
}

pub fn asymmetric_encrypt(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let capacity = oaep_capacity(public_key.size());
    if plaintext.len() > capacity {
        return Err(OnionError::PayloadTooLarge {
            size: plaintext.len(),
            capacity,
        });
    }
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| OnionError::InvalidKey(e.to_string()))
}

pub fn asymmetric_decrypt(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| OnionError::DecryptionFailed)
}

/// AES-256 key for bulk encryption.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SYMMETRIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            OnionError::InvalidKey(format!(
                "symmetric key must be {} bytes, got {}",
                SYMMETRIC_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn export(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn import(encoded: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| OnionError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&raw)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Returns `iv || ciphertext`, with a fresh IV for every call.
pub fn symmetric_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.0.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

pub fn symmetric_decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN {
        return Err(OnionError::DecryptionFailed);
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| OnionError::DecryptionFailed)?;

    Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| OnionError::DecryptionFailed)
}

/// Encrypts one onion layer for the holder of `public_key`.
///
/// A fresh symmetric key encrypts the layer body and is itself wrapped with
/// RSA-OAEP. The wrapped key is exactly one modulus long, so the envelope is
/// `wrapped_key || iv || ciphertext` with no length prefix.
pub fn seal(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>> {
    let layer_key = SymmetricKey::generate();
    let header = asymmetric_encrypt(layer_key.as_bytes(), public_key)?;
    let body = symmetric_encrypt(&layer_key, plaintext);

    let mut envelope = Vec::with_capacity(header.len() + body.len());
    envelope.extend_from_slice(&header);
    envelope.extend_from_slice(&body);
    Ok(envelope)
}

/// Reverses [`seal`]. Every failure, including a well-formed envelope meant
/// for another key, surfaces as `DecryptionFailed`.
pub fn open(envelope: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let header_len = private_key.size();
    if envelope.len() < header_len + IV_LEN {
        return Err(OnionError::DecryptionFailed);
    }
    let (header, body) = envelope.split_at(header_len);

    let raw_key = asymmetric_decrypt(header, private_key)?;
    let layer_key = SymmetricKey::from_bytes(&raw_key).map_err(|_| OnionError::DecryptionFailed)?;
    symmetric_decrypt(&layer_key, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEST_BITS: usize = 1024;

    fn keypair() -> AsymmetricKeyPair {
        AsymmetricKeyPair::generate(TEST_BITS).unwrap()
    }

    #[test]
    fn asymmetric_round_trip_through_exported_keys() {
        let pair = keypair();
        let public = import_public_key(&export_public_key(&pair.public_key).unwrap()).unwrap();
        let private = import_private_key(&export_private_key(&pair.private_key).unwrap()).unwrap();

        let ciphertext = asymmetric_encrypt(b"next hop 4002", &public).unwrap();
        assert_eq!(asymmetric_decrypt(&ciphertext, &private).unwrap(), b"next hop 4002");
        assert_eq!(public, pair.public_key);
    }

    #[test]
    fn asymmetric_encrypt_rejects_oversized_payload() {
        let pair = keypair();
        let capacity = pair.capacity();
        assert_eq!(capacity, 128 - 66);

        assert!(asymmetric_encrypt(&vec![7u8; capacity], &pair.public_key).is_ok());
        match asymmetric_encrypt(&vec![7u8; capacity + 1], &pair.public_key) {
            Err(OnionError::PayloadTooLarge { size, capacity: cap }) => {
                assert_eq!(size, capacity + 1);
                assert_eq!(cap, capacity);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn asymmetric_decrypt_with_wrong_key_fails() {
        let alice = keypair();
        let mallory = keypair();
        let ciphertext = asymmetric_encrypt(b"secret", &alice.public_key).unwrap();

        assert!(matches!(
            asymmetric_decrypt(&ciphertext, &mallory.private_key),
            Err(OnionError::DecryptionFailed)
        ));
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(import_public_key("not-base64!"), Err(OnionError::InvalidKey(_))));
        assert!(matches!(import_private_key("AAAA"), Err(OnionError::InvalidKey(_))));
        assert!(matches!(SymmetricKey::import("AAAA"), Err(OnionError::InvalidKey(_))));
    }

    #[test]
    fn symmetric_key_export_import() {
        let key = SymmetricKey::generate();
        let restored = SymmetricKey::import(&key.export()).unwrap();
        assert_eq!(key, restored);

        let ciphertext = symmetric_encrypt(&key, b"bulk data");
        assert_eq!(symmetric_decrypt(&restored, &ciphertext).unwrap(), b"bulk data");
    }

    #[test]
    fn symmetric_encryption_uses_fresh_iv() {
        let key = SymmetricKey::generate();
        let first = symmetric_encrypt(&key, b"same plaintext");
        let second = symmetric_encrypt(&key, b"same plaintext");
        assert_ne!(first, second);
        assert_ne!(first[..IV_LEN], second[..IV_LEN]);
    }

    #[test]
    fn symmetric_decrypt_rejects_truncated_input() {
        let key = SymmetricKey::generate();
        assert!(matches!(
            symmetric_decrypt(&key, &[0u8; IV_LEN - 1]),
            Err(OnionError::DecryptionFailed)
        ));
    }

    #[test]
    fn sealed_layer_opens_only_for_its_recipient() {
        let relay = keypair();
        let other = keypair();
        let layer = vec![b'x'; 4096];

        let envelope = seal(&layer, &relay.public_key).unwrap();
        assert_eq!(open(&envelope, &relay.private_key).unwrap(), layer);
        assert!(matches!(
            open(&envelope, &other.private_key),
            Err(OnionError::DecryptionFailed)
        ));
        assert!(matches!(
            open(&envelope[..100], &relay.private_key),
            Err(OnionError::DecryptionFailed)
        ));
    }

    proptest! {
        #[test]
        fn symmetric_round_trip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = SymmetricKey::generate();
            let ciphertext = symmetric_encrypt(&key, &plaintext);
            prop_assert_eq!(symmetric_decrypt(&key, &ciphertext).unwrap(), plaintext);
        }
    }
}
