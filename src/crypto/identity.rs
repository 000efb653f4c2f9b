use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Default RSA modulus size in bits.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// PKCS#1 v1.5 encryption overhead per block.
const PKCS1V15_OVERHEAD: usize = 11;

/// A self-signed certificate: a DER-encoded public key together with a
/// signature over that same encoding, made with the matching private key.
///
/// A valid self-signature proves the sender holds the private key. It says
/// nothing about whether the key belongs to an authorized member; that is
/// the membership registry's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    key_der: Vec<u8>,
    self_sig: Vec<u8>,
}

impl Certificate {
    pub fn new(key_der: Vec<u8>, self_sig: Vec<u8>) -> Self {
        Self { key_der, self_sig }
    }

    pub fn key_der(&self) -> &[u8] {
        &self.key_der
    }

    pub fn self_sig(&self) -> &[u8] {
        &self.self_sig
    }

    /// Verify the embedded self-signature against the embedded key.
    ///
    /// Success yields a [`PeerKey`], the only handle the rest of the crate
    /// accepts for peer operations — an unverified certificate cannot be
    /// used to verify or encrypt anything.
    pub fn verify_self_signed(&self) -> Result<PeerKey, CryptoError> {
        let key = RsaPublicKey::from_public_key_der(&self.key_der)
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        let digest = Sha256::digest(&self.key_der);
        key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &self.self_sig)
            .map_err(|_| CryptoError::BadSelfSignature)?;
        Ok(PeerKey {
            key,
            der: self.key_der.clone(),
        })
    }
}

/// A peer public key that has passed self-signature verification.
#[derive(Debug, Clone)]
pub struct PeerKey {
    key: RsaPublicKey,
    der: Vec<u8>,
}

impl PeerKey {
    /// DER encoding this key arrived as, for registry lookups.
    pub fn key_der(&self) -> &[u8] {
        &self.der
    }

    /// Short hex fingerprint for logging.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(&self.der)[..8])
    }

    /// Verify a PKCS#1 v1.5 SHA-256 signature over `msg`.
    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> bool {
        let digest = Sha256::digest(msg);
        self.key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, sig)
            .is_ok()
    }

    /// Encrypt `plaintext` under this key.
    ///
    /// PKCS#1 v1.5 bounds each block at `key_size - 11` bytes, which is
    /// smaller than a Diffie-Hellman public value, so the plaintext is
    /// chunked and the ciphertext is a concatenation of full-size blocks.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.key.size() - PKCS1V15_OVERHEAD;
        let mut out = Vec::with_capacity(plaintext.len().div_ceil(block) * self.key.size());
        for chunk in plaintext.chunks(block) {
            let encrypted = self
                .key
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, chunk)
                .map_err(|_| CryptoError::AsymmetricEncryptFailed)?;
            out.extend_from_slice(&encrypted);
        }
        Ok(out)
    }
}

/// A local key pair plus the self-signed certificate vouching for it.
///
/// Created once per actor and passed by value to whatever constructs
/// sessions; there is no ambient process-wide identity.
#[derive(Clone)]
pub struct Identity {
    private: RsaPrivateKey,
    certificate: Certificate,
}

impl Identity {
    /// Generate a fresh key pair and self-signed certificate.
    ///
    /// Failure here is fatal to the caller: without entropy or a valid key
    /// the process cannot participate at all.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(CryptoError::KeyGeneration)?;
        let public = RsaPublicKey::from(&private);
        let key_der = public
            .to_public_key_der()
            .map_err(|_| CryptoError::KeyEncoding)?
            .into_vec();
        let self_sig = sign_with(&private, &key_der)?;
        Ok(Self {
            private,
            certificate: Certificate::new(key_der, self_sig),
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// PKCS#1 v1.5 SHA-256 signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sign_with(&self.private, msg)
    }

    /// Decrypt a multi-block ciphertext produced by [`PeerKey::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.private.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(CryptoError::AsymmetricDecryptFailed);
        }
        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let decrypted = self
                .private
                .decrypt(Pkcs1v15Encrypt, chunk)
                .map_err(|_| CryptoError::AsymmetricDecryptFailed)?;
            out.extend_from_slice(&decrypted);
        }
        Ok(out)
    }
}

fn sign_with(key: &RsaPrivateKey, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let digest = Sha256::digest(msg);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|_| CryptoError::SignFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    const TEST_KEY_BITS: usize = 1024;

    static ALICE: Lazy<Identity> =
        Lazy::new(|| Identity::generate(TEST_KEY_BITS).expect("keygen"));
    static BOB: Lazy<Identity> =
        Lazy::new(|| Identity::generate(TEST_KEY_BITS).expect("keygen"));

    #[test]
    fn fresh_identity_self_verifies() {
        ALICE
            .certificate()
            .verify_self_signed()
            .expect("valid identity must self-verify");
    }

    #[test]
    fn tampered_self_signature_rejected() {
        let cert = ALICE.certificate();
        let mut sig = cert.self_sig().to_vec();
        sig[0] ^= 0xFF;
        let forged = Certificate::new(cert.key_der().to_vec(), sig);
        assert!(matches!(
            forged.verify_self_signed(),
            Err(CryptoError::BadSelfSignature)
        ));
    }

    #[test]
    fn substituted_key_rejected() {
        // Bob's key with Alice's self-signature must not verify.
        let forged = Certificate::new(
            BOB.certificate().key_der().to_vec(),
            ALICE.certificate().self_sig().to_vec(),
        );
        assert!(forged.verify_self_signed().is_err());
    }

    #[test]
    fn sign_verify_roundtrip() {
        let msg = b"exchange ciphertext";
        let sig = ALICE.sign(msg).unwrap();
        let peer = ALICE.certificate().verify_self_signed().unwrap();
        assert!(peer.verify(msg, &sig));
        assert!(!peer.verify(b"different message", &sig));

        let other = BOB.certificate().verify_self_signed().unwrap();
        assert!(!other.verify(msg, &sig));
    }

    #[test]
    fn chunked_encrypt_decrypt_roundtrip() {
        // 256 bytes spans three PKCS#1 v1.5 blocks at 1024-bit keys,
        // matching the size of a MODP-2048 public value.
        let plaintext: Vec<u8> = (0..=255u8).collect();
        let peer = ALICE.certificate().verify_self_signed().unwrap();
        let ciphertext = peer.encrypt(&plaintext).unwrap();
        assert_eq!(ciphertext.len() % 128, 0);
        assert_eq!(ALICE.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_rejects_misaligned_ciphertext() {
        assert!(matches!(
            ALICE.decrypt(&[0u8; 100]),
            Err(CryptoError::AsymmetricDecryptFailed)
        ));
        assert!(ALICE.decrypt(&[]).is_err());
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let peer = ALICE.certificate().verify_self_signed().unwrap();
        let ciphertext = peer.encrypt(b"for alice only").unwrap();
        assert!(BOB.decrypt(&ciphertext).is_err());
    }
}
