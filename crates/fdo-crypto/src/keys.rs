//! ES256 keys and the FDO `PublicKey = [pkType, pkEnc, body]` encoding.

use crate::error::{CryptoError, CryptoResult};
use fdo_cbor::value::{self, bstr, uint};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use zeroize::Zeroizing;

/// ES256 signature size in bytes (`r || s`).
pub const SIGNATURE_SIZE: usize = 64;

/// P-256 private scalar size in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// COSE algorithm id for ES256.
pub const SG_TYPE_ES256: i64 = -7;

/// COSE algorithm id for ES384.
pub const SG_TYPE_ES384: i64 = -35;

/// Curve of an FDO public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyType {
    Secp256r1,
    Secp384r1,
}

impl PublicKeyType {
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Secp256r1 => 10,
            Self::Secp384r1 => 11,
        }
    }

    /// # Errors
    /// Returns [`CryptoError::Unsupported`] for unknown codes.
    pub fn from_code(code: u64) -> CryptoResult<Self> {
        match code {
            10 => Ok(Self::Secp256r1),
            11 => Ok(Self::Secp384r1),
            other => Err(CryptoError::unsupported("public key type", other)),
        }
    }

    /// Signature algorithm matching this curve.
    #[must_use]
    pub const fn sg_type(self) -> i64 {
        match self {
            Self::Secp256r1 => SG_TYPE_ES256,
            Self::Secp384r1 => SG_TYPE_ES384,
        }
    }
}

/// How the key body is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicKeyEncoding {
    /// Uncompressed SEC1 point.
    Crypto,
    /// SubjectPublicKeyInfo DER.
    X509,
    /// Array of DER certificates, leaf first.
    X5Chain,
    CoseKey,
}

impl PublicKeyEncoding {
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Crypto => 0,
            Self::X509 => 1,
            Self::X5Chain => 2,
            Self::CoseKey => 3,
        }
    }

    /// # Errors
    /// Returns [`CryptoError::Unsupported`] for unknown codes.
    pub fn from_code(code: u64) -> CryptoResult<Self> {
        match code {
            0 => Ok(Self::Crypto),
            1 => Ok(Self::X509),
            2 => Ok(Self::X5Chain),
            3 => Ok(Self::CoseKey),
            other => Err(CryptoError::unsupported("public key encoding", other)),
        }
    }
}

/// FDO public key.
///
/// The body is kept as a raw CBOR value: a byte string for `Crypto`/`X509`,
/// an array for `X5Chain`, a map for `CoseKey`.
#[derive(Debug, Clone, PartialEq)]
pub struct FdoPublicKey {
    pub pk_type: PublicKeyType,
    pub encoding: PublicKeyEncoding,
    pub body: Value,
}

impl FdoPublicKey {
    /// Encode a verifying key as SPKI DER (`X509`).
    ///
    /// # Errors
    /// Returns an error if DER encoding fails.
    pub fn from_verifying_key(key: &VerifyingKey) -> CryptoResult<Self> {
        let der = key
            .to_public_key_der()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self {
            pk_type: PublicKeyType::Secp256r1,
            encoding: PublicKeyEncoding::X509,
            body: bstr(der.as_bytes()),
        })
    }

    /// Encode a verifying key as an uncompressed point (`Crypto`).
    #[must_use]
    pub fn from_verifying_key_raw(key: &VerifyingKey) -> Self {
        Self {
            pk_type: PublicKeyType::Secp256r1,
            encoding: PublicKeyEncoding::Crypto,
            body: bstr(key.to_encoded_point(false).as_bytes()),
        }
    }

    /// Decode to a P-256 verifying key.
    ///
    /// # Errors
    /// Fails for P-384 keys, `CoseKey` bodies, or unparseable key bytes.
    pub fn verifying_key(&self) -> CryptoResult<VerifyingKey> {
        if self.pk_type != PublicKeyType::Secp256r1 {
            return Err(CryptoError::unsupported(
                "public key type",
                self.pk_type.code(),
            ));
        }
        match (&self.encoding, &self.body) {
            (PublicKeyEncoding::Crypto, Value::Bytes(sec1)) => {
                VerifyingKey::from_sec1_bytes(sec1).map_err(|_| CryptoError::InvalidPublicKey)
            }
            (PublicKeyEncoding::X509, Value::Bytes(der)) => spki_to_verifying_key(der),
            (PublicKeyEncoding::X5Chain, Value::Array(chain)) => match chain.first() {
                Some(Value::Bytes(leaf)) => spki_to_verifying_key(leaf),
                _ => Err(CryptoError::InvalidPublicKey),
            },
            (PublicKeyEncoding::CoseKey, _) => Err(CryptoError::unsupported(
                "public key encoding",
                "COSEKEY",
            )),
            _ => Err(CryptoError::InvalidPublicKey),
        }
    }
}

/// Parse SubjectPublicKeyInfo DER into a verifying key.
///
/// # Errors
/// Returns [`CryptoError::InvalidPublicKey`] when the DER is not a P-256 SPKI.
pub fn spki_to_verifying_key(der: &[u8]) -> CryptoResult<VerifyingKey> {
    VerifyingKey::from_public_key_der(der).map_err(|_| CryptoError::InvalidPublicKey)
}

impl CborCodec for FdoPublicKey {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            uint(self.pk_type.code()),
            uint(self.encoding.code()),
            self.body.clone(),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [pk_type, encoding, body] = value::fields(v, "PublicKey")?;
        let pk_type = PublicKeyType::from_code(value::int(&pk_type, "PublicKey.pkType")?)
            .map_err(|e| SerializationError::malformed("PublicKey.pkType", e.to_string()))?;
        let encoding = PublicKeyEncoding::from_code(value::int(&encoding, "PublicKey.pkEnc")?)
            .map_err(|e| SerializationError::malformed("PublicKey.pkEnc", e.to_string()))?;
        Ok(Self {
            pk_type,
            encoding,
            body,
        })
    }
}

/// ES256 signing key.
#[derive(Clone)]
pub struct Es256SigningKey {
    inner: SigningKey,
}

impl Es256SigningKey {
    /// Generate a new random key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore from the 32-byte private scalar.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidSecretKey`] for out-of-range scalars.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let inner = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { inner })
    }

    /// Export the private scalar.
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.inner.to_bytes().to_vec())
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.inner.verifying_key()
    }

    /// Public half as an FDO `X509` public key.
    ///
    /// # Errors
    /// Returns an error if DER encoding fails.
    pub fn public_key(&self) -> CryptoResult<FdoPublicKey> {
        FdoPublicKey::from_verifying_key(&self.verifying_key())
    }

    /// SPKI DER of the public half, used as a stand-in device certificate.
    ///
    /// # Errors
    /// Returns an error if DER encoding fails.
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        self.verifying_key()
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Sign `message` (SHA-256 is applied internally), returning raw `r || s`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let sig: Signature = self.inner.sign(message);
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&sig.to_bytes());
        out
    }
}

impl std::fmt::Debug for Es256SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Es256SigningKey").finish_non_exhaustive()
    }
}

/// Verify a raw `r || s` ES256 signature.
///
/// # Errors
/// Returns [`CryptoError::SignatureVerificationFailed`] on any mismatch or malformed signature.
pub fn verify_es256(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> CryptoResult<()> {
    let sig =
        Signature::from_slice(signature).map_err(|_| CryptoError::SignatureVerificationFailed)?;
    key.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let sk = Es256SigningKey::generate();
        let sig = sk.sign(b"payload");
        verify_es256(&sk.verifying_key(), b"payload", &sig).unwrap();
        assert!(verify_es256(&sk.verifying_key(), b"payload!", &sig).is_err());
    }

    #[test]
    fn short_signature_is_a_verification_failure() {
        let sk = Es256SigningKey::generate();
        let err = verify_es256(&sk.verifying_key(), b"x", &[0u8; 10]).unwrap_err();
        assert!(err.is_verification_failure());
    }

    #[test]
    fn secret_key_restores() {
        let sk = Es256SigningKey::generate();
        let restored = Es256SigningKey::from_bytes(&sk.to_bytes()).unwrap();
        assert_eq!(restored.verifying_key(), sk.verifying_key());
        assert!(Es256SigningKey::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn every_body_encoding_resolves_to_the_same_key() {
        let sk = Es256SigningKey::generate();
        let vk = sk.verifying_key();

        let x509 = FdoPublicKey::from_verifying_key(&vk).unwrap();
        let raw = FdoPublicKey::from_verifying_key_raw(&vk);
        let chain = FdoPublicKey {
            pk_type: PublicKeyType::Secp256r1,
            encoding: PublicKeyEncoding::X5Chain,
            body: Value::Array(vec![bstr(sk.public_key_der().unwrap())]),
        };

        for pk in [x509, raw, chain] {
            assert_eq!(pk.verifying_key().unwrap(), vk);
            let back = FdoPublicKey::from_bytes(&pk.to_bytes().unwrap()).unwrap();
            assert_eq!(back, pk);
        }
    }

    #[test]
    fn p384_keys_are_unsupported() {
        let pk = FdoPublicKey {
            pk_type: PublicKeyType::Secp384r1,
            encoding: PublicKeyEncoding::X509,
            body: bstr(vec![0u8; 10]),
        };
        assert!(matches!(
            pk.verifying_key(),
            Err(CryptoError::Unsupported { .. })
        ));
    }
}
