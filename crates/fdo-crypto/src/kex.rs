//! ECDH key exchange as used by TO2.
//!
//! Each side publishes `len || X || len || Y || len || rand` (lengths are
//! 2-byte big-endian). The KDF input is `Shx || deviceRand || ownerRand`
//! regardless of which side computes it.

use crate::envelope::{CipherSuite, SessionKey};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey, ecdh};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Random contribution size for ECDH256.
pub const ECDH256_RAND_SIZE: usize = 16;

const COORD_SIZE: usize = 32;

/// Negotiated key exchange suite (`kexSuiteName`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KexSuite {
    #[serde(rename = "ECDH256")]
    Ecdh256,
    #[serde(rename = "ECDH384")]
    Ecdh384,
}

impl KexSuite {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ecdh256 => "ECDH256",
            Self::Ecdh384 => "ECDH384",
        }
    }
}

impl fmt::Display for KexSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KexSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECDH256" => Ok(Self::Ecdh256),
            "ECDH384" => Ok(Self::Ecdh384),
            other => Err(CryptoError::unsupported("key exchange suite", other)),
        }
    }
}

/// Which side of the exchange we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexRole {
    /// Publishes `xAKeyExchange` in ProveOVHdr.
    Owner,
    /// Publishes `xBKeyExchange` in ProveDevice.
    Device,
}

/// One side's ephemeral key exchange state.
///
/// The owner must keep this across HTTP requests (61 to 64), so the secret
/// can be exported and restored.
pub struct KeyExchange {
    suite: KexSuite,
    secret: SecretKey,
    rand: [u8; ECDH256_RAND_SIZE],
}

impl KeyExchange {
    /// Fresh ephemeral key and random contribution.
    ///
    /// # Errors
    /// Returns [`CryptoError::Unsupported`] for suites other than ECDH256.
    pub fn generate(suite: KexSuite) -> CryptoResult<Self> {
        ensure_supported(suite)?;
        Ok(Self {
            suite,
            secret: SecretKey::random(&mut rand::rngs::OsRng),
            rand: crate::random_bytes(),
        })
    }

    /// Restore from exported state.
    ///
    /// # Errors
    /// Fails for unsupported suites or malformed secret/rand bytes.
    pub fn restore(suite: KexSuite, secret: &[u8], rand: &[u8]) -> CryptoResult<Self> {
        ensure_supported(suite)?;
        let secret = SecretKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        let rand = <[u8; ECDH256_RAND_SIZE]>::try_from(rand).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: ECDH256_RAND_SIZE,
                actual: rand.len(),
            }
        })?;
        Ok(Self {
            suite,
            secret,
            rand,
        })
    }

    #[must_use]
    pub const fn suite(&self) -> KexSuite {
        self.suite
    }

    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    #[must_use]
    pub const fn rand(&self) -> &[u8; ECDH256_RAND_SIZE] {
        &self.rand
    }

    /// The parameter blob sent to the peer.
    #[must_use]
    pub fn public_param(&self) -> Vec<u8> {
        let point = self.secret.public_key().to_encoded_point(false);
        // uncompressed SEC1: 0x04 || X || Y
        let raw = point.as_bytes();
        let mut out = Vec::with_capacity(6 + 2 * COORD_SIZE + ECDH256_RAND_SIZE);
        push_prefixed(&mut out, &raw[1..=COORD_SIZE]);
        push_prefixed(&mut out, &raw[1 + COORD_SIZE..]);
        push_prefixed(&mut out, &self.rand);
        out
    }

    /// `Shx || deviceRand || ownerRand`.
    ///
    /// # Errors
    /// Fails when the peer parameter blob is malformed or not on the curve.
    pub fn shared_secret(&self, peer_param: &[u8], role: KexRole) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let (peer_public, peer_rand) = parse_param(peer_param)?;
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.as_affine());

        let (device_rand, owner_rand) = match role {
            KexRole::Owner => (peer_rand.as_slice(), self.rand.as_slice()),
            KexRole::Device => (self.rand.as_slice(), peer_rand.as_slice()),
        };
        let mut shse = Zeroizing::new(Vec::with_capacity(COORD_SIZE + 2 * ECDH256_RAND_SIZE));
        shse.extend_from_slice(shared.raw_secret_bytes());
        shse.extend_from_slice(device_rand);
        shse.extend_from_slice(owner_rand);
        Ok(shse)
    }

    /// Run the exchange and the KDF for `suite`.
    ///
    /// # Errors
    /// Fails when the peer parameter is malformed or the KDF rejects the suite sizes.
    pub fn derive_session_key(
        &self,
        peer_param: &[u8],
        role: KexRole,
        suite: CipherSuite,
    ) -> CryptoResult<SessionKey> {
        let shse = self.shared_secret(peer_param, role)?;
        let material = kdf::derive(suite.kdf_prf(), &shse, &[], suite.kdf_output_len())?;
        SessionKey::from_material(suite, &material)
    }
}

impl fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

fn ensure_supported(suite: KexSuite) -> CryptoResult<()> {
    match suite {
        KexSuite::Ecdh256 => Ok(()),
        KexSuite::Ecdh384 => Err(CryptoError::unsupported("key exchange suite", suite)),
    }
}

fn push_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

fn take_prefixed<'a>(input: &mut &'a [u8], what: &str) -> CryptoResult<&'a [u8]> {
    let bad = || CryptoError::InvalidKeyExchange(format!("truncated {what}"));
    let (len, rest) = input.split_first_chunk::<2>().ok_or_else(bad)?;
    let len = usize::from(u16::from_be_bytes(*len));
    if rest.len() < len {
        return Err(bad());
    }
    let (field, rest) = rest.split_at(len);
    *input = rest;
    Ok(field)
}

/// Split a peer parameter blob into its public point and random contribution.
///
/// # Errors
/// Returns [`CryptoError::InvalidKeyExchange`] for malformed blobs and
/// [`CryptoError::InvalidPublicKey`] for points off the curve.
pub fn parse_param(param: &[u8]) -> CryptoResult<(PublicKey, Vec<u8>)> {
    let mut cursor = param;
    let x = take_prefixed(&mut cursor, "X")?;
    let y = take_prefixed(&mut cursor, "Y")?;
    let rand = take_prefixed(&mut cursor, "rand")?;
    if !cursor.is_empty() {
        return Err(CryptoError::InvalidKeyExchange("trailing bytes".into()));
    }
    if x.len() != COORD_SIZE || y.len() != COORD_SIZE {
        return Err(CryptoError::InvalidKeyExchange(format!(
            "coordinate sizes {}/{}",
            x.len(),
            y.len()
        )));
    }
    if rand.len() != ECDH256_RAND_SIZE {
        return Err(CryptoError::InvalidKeyExchange(format!(
            "random contribution is {} bytes",
            rand.len()
        )));
    }

    let mut sec1 = Vec::with_capacity(1 + 2 * COORD_SIZE);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);
    let public = PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok((public, rand.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_layout_is_86_bytes() {
        let kex = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let p = kex.public_param();
        assert_eq!(p.len(), 86);
        assert_eq!(&p[0..2], &[0, 32]);
        assert_eq!(&p[34..36], &[0, 32]);
        assert_eq!(&p[68..70], &[0, 16]);
        assert_eq!(&p[70..], kex.rand());
    }

    #[test]
    fn both_sides_agree_on_shse() {
        let owner = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let device = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let a = owner
            .shared_secret(&device.public_param(), KexRole::Owner)
            .unwrap();
        let b = device
            .shared_secret(&owner.public_param(), KexRole::Device)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[32..48], device.rand());
        assert_eq!(&a[48..], owner.rand());
    }

    #[test]
    fn restored_state_derives_same_secret() {
        let owner = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let device = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let restored =
            KeyExchange::restore(KexSuite::Ecdh256, &owner.secret_bytes(), owner.rand()).unwrap();
        let xb = device.public_param();
        assert_eq!(
            owner.shared_secret(&xb, KexRole::Owner).unwrap(),
            restored.shared_secret(&xb, KexRole::Owner).unwrap()
        );
    }

    #[test]
    fn malformed_params_rejected() {
        let kex = KeyExchange::generate(KexSuite::Ecdh256).unwrap();
        let mut p = kex.public_param();
        assert!(parse_param(&p[..40]).is_err());
        p.push(0);
        assert!(parse_param(&p).is_err());
        assert!(parse_param(&[0u8; 86]).is_err());
    }

    #[test]
    fn ecdh384_is_unsupported() {
        assert!(matches!(
            KeyExchange::generate(KexSuite::Ecdh384),
            Err(CryptoError::Unsupported { .. })
        ));
        assert!("DHKEXid14".parse::<KexSuite>().is_err());
        assert_eq!("ECDH256".parse::<KexSuite>().unwrap(), KexSuite::Ecdh256);
    }
}
