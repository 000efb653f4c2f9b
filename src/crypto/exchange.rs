use num_bigint_dig::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;

/// RFC 3526 MODP group 14: a 2048-bit safe prime.
///
/// Both roles must use this exact constant. The group is never negotiated,
/// and a mismatch does not produce an error — it silently derives different
/// session keys on the two sides.
const DH_PRIME_HEX: &str = "ffffffffffffffffc90fdaa22168c234c4c6628b80dc1cd129024e088a67cc74020bbea63b139b22514a08798e3404ddef9519b3cd3a431b302b0a6df25f14374fe1356d6d51c245e485b576625e7ec6f44c42e9a637ed6b0bff5cb6f406b7edee386bfb5a899fa5ae9f24117c4b1fe649286651ece45b3dc2007cb8a163bf0598da48361c55d39a69163fa8fd24cf5f83655d23dca3ad961c62f356208552bb9ed529077096966d670c354e4abc9804f1746c08ca18217c32905e462e36ce3be39e772c180e86039b2783a2ec07a28fb5c55df06f4c52c9de2bcbf6955817183995497cea956ae515d2261898fa051015728e5a8aacaa68ffffffffffffffff";

/// Generator for the MODP-14 group.
const DH_GENERATOR: u32 = 2;

/// Private exponent length in bytes.
const EXPONENT_LEN: usize = 32;

/// A one-time Diffie-Hellman key pair over the fixed group.
///
/// Generated fresh per session and discarded when the session opens, closes,
/// or fails; reuse across sessions would defeat forward secrecy.
pub struct EphemeralExchange {
    prime: BigUint,
    private: BigUint,
    public: BigUint,
}

impl EphemeralExchange {
    pub fn generate() -> Self {
        let prime = dh_prime();
        let private = random_exponent();
        let public = BigUint::from(DH_GENERATOR).modpow(&private, &prime);
        Self {
            prime,
            private,
            public,
        }
    }

    /// Big-endian encoding of the local public value `g^x mod p`.
    pub fn public_value(&self) -> Vec<u8> {
        self.public.to_bytes_be()
    }

    /// Standard Diffie-Hellman: `remote^x mod p`, big-endian bytes.
    ///
    /// Remote values of 0, 1, or p-1 pin the secret to a known constant and
    /// are rejected outright.
    pub fn compute_shared_secret(&self, remote_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let remote = BigUint::from_bytes_be(remote_public);
        let one = BigUint::from(1u32);
        if remote <= one || remote >= &self.prime - &one {
            return Err(CryptoError::DegenerateExchangeValue);
        }
        Ok(remote.modpow(&self.private, &self.prime).to_bytes_be())
    }
}

fn dh_prime() -> BigUint {
    BigUint::parse_bytes(DH_PRIME_HEX.as_bytes(), 16).expect("prime constant is valid hex")
}

fn random_exponent() -> BigUint {
    let mut buf = [0u8; EXPONENT_LEN];
    loop {
        OsRng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate > BigUint::from(1u32) {
            return candidate;
        }
    }
}
