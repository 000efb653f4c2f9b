use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::{SessionKey, IV_LEN};
use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Derive the session key: SHA-256 over the raw shared secret.
///
/// Deterministic — both sides must arrive at the same bytes or every
/// subsequent decryption fails.
pub fn derive_key(shared_secret: &[u8]) -> SessionKey {
    let digest: [u8; 32] = Sha256::digest(shared_secret).into();
    SessionKey::from(digest)
}

/// Encrypt a payload under the session key: AES-256-CBC with PKCS#7 padding.
///
/// The 16-byte IV is drawn fresh from the thread RNG on every call; callers
/// cannot supply one, so IV reuse under a given key cannot be expressed.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> (Vec<u8>, [u8; IV_LEN]) {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .expect("key and IV lengths are fixed");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    (ciphertext, iv)
}

/// Decrypt a payload. Any mismatch — wrong key, corrupted ciphertext, wrong
/// IV — surfaces as [`CryptoError::DecryptionFailed`].
pub fn decrypt(ciphertext: &[u8], key: &SessionKey, iv: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_LEN {
        return Err(CryptoError::InvalidIvLength {
            expected: IV_LEN,
            actual: iv.len(),
        });
    }
    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .expect("key and IV lengths are fixed");
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
