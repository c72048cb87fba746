//! Session encryption envelopes for TO2 messages 64 onwards.
//!
//! Two shapes exist:
//! - **EMB** (encrypt-and-MAC-by-AEAD, A128GCM / A256GCM): a `COSE_Encrypt0`
//!   `[protected{1: alg}, {5: iv}, ciphertext||tag]`.
//! - **ETM** (encrypt-then-MAC, AES-CBC/CTR + HMAC): the `COSE_Encrypt0` is
//!   serialized and becomes the payload of a `COSE_Mac0`
//!   `[protected{1: macAlg}, {}, encrypt0Bytes, tag]`.

use crate::error::{CryptoError, CryptoResult};
use crate::hash::{HashType, hmac_sha256, hmac_sha384};
use crate::kdf::KdfPrf;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use fdo_cbor::value::{self, bstr, sint, tstr};
use fdo_cbor::{CborCodec, SerializationError, SerializationResult, Value};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// CBOR tag for `COSE_Encrypt0`.
pub const TAG_COSE_ENCRYPT0: u64 = 16;
/// CBOR tag for `COSE_Mac0`.
pub const TAG_COSE_MAC0: u64 = 17;

const HEADER_ALG: i64 = 1;
const HEADER_IV: i64 = 5;
const AES_BLOCK: usize = 16;

/// Negotiated cipher suite (`cipherSuiteName`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    A128Gcm,
    A256Gcm,
    Aes128CbcHmacSha256,
    Aes128CtrHmacSha256,
    Aes256CbcHmacSha384,
    Aes256CtrHmacSha384,
}

impl CipherSuite {
    pub const ALL: [Self; 6] = [
        Self::A128Gcm,
        Self::A256Gcm,
        Self::Aes128CbcHmacSha256,
        Self::Aes128CtrHmacSha256,
        Self::Aes256CbcHmacSha384,
        Self::Aes256CtrHmacSha384,
    ];

    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::A128Gcm => 1,
            Self::A256Gcm => 3,
            Self::Aes128CbcHmacSha256 => -17_760_703,
            Self::Aes128CtrHmacSha256 => -17_760_704,
            Self::Aes256CbcHmacSha384 => -17_760_705,
            Self::Aes256CtrHmacSha384 => -17_760_706,
        }
    }

    /// # Errors
    /// Returns [`CryptoError::Unsupported`] for unknown codes.
    pub fn from_code(code: i64) -> CryptoResult<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| CryptoError::unsupported("cipher suite", code))
    }

    /// Encrypt-then-MAC suites wrap the ciphertext in a `COSE_Mac0`.
    #[must_use]
    pub const fn is_etm(self) -> bool {
        !matches!(self, Self::A128Gcm | Self::A256Gcm)
    }

    #[must_use]
    pub const fn kdf_prf(self) -> KdfPrf {
        match self {
            Self::Aes256CbcHmacSha384 | Self::Aes256CtrHmacSha384 => KdfPrf::HmacSha384,
            _ => KdfPrf::HmacSha256,
        }
    }

    /// `(svk, sek)` sizes for ETM suites, `(0, sevk)` for AEAD suites.
    #[must_use]
    pub const fn key_sizes(self) -> (usize, usize) {
        match self {
            Self::A128Gcm => (0, 16),
            Self::A256Gcm => (0, 32),
            Self::Aes128CbcHmacSha256 | Self::Aes128CtrHmacSha256 => (32, 16),
            Self::Aes256CbcHmacSha384 | Self::Aes256CtrHmacSha384 => (64, 32),
        }
    }

    #[must_use]
    pub const fn kdf_output_len(self) -> usize {
        let (mac, enc) = self.key_sizes();
        mac + enc
    }

    #[must_use]
    pub const fn iv_len(self) -> usize {
        if self.is_etm() { AES_BLOCK } else { 12 }
    }

    /// MAC algorithm of the outer `COSE_Mac0` (ETM only).
    #[must_use]
    pub const fn mac_type(self) -> HashType {
        match self {
            Self::Aes256CbcHmacSha384 | Self::Aes256CtrHmacSha384 => HashType::HmacSha384,
            _ => HashType::HmacSha256,
        }
    }

    const fn is_cbc(self) -> bool {
        matches!(self, Self::Aes128CbcHmacSha256 | Self::Aes256CbcHmacSha384)
    }
}

/// Derived session key material for one cipher suite.
///
/// For ETM suites the material is `SVK || SEK`; for AEAD suites it is `SEVK`.
#[derive(Clone)]
pub struct SessionKey {
    suite: CipherSuite,
    material: Zeroizing<Vec<u8>>,
}

impl SessionKey {
    /// Wrap KDF output (or stored material) for `suite`.
    ///
    /// # Errors
    /// Returns [`CryptoError::InvalidKeyLength`] if the material has the wrong size.
    pub fn from_material(suite: CipherSuite, material: &[u8]) -> CryptoResult<Self> {
        if material.len() != suite.kdf_output_len() {
            return Err(CryptoError::InvalidKeyLength {
                expected: suite.kdf_output_len(),
                actual: material.len(),
            });
        }
        Ok(Self {
            suite,
            material: Zeroizing::new(material.to_vec()),
        })
    }

    #[must_use]
    pub const fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Raw material, for persisting into a session record.
    #[must_use]
    pub fn material(&self) -> &[u8] {
        &self.material
    }

    fn mac_key(&self) -> &[u8] {
        &self.material[..self.suite.key_sizes().0]
    }

    fn enc_key(&self) -> &[u8] {
        &self.material[self.suite.key_sizes().0..]
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("suite", &self.suite)
            .finish_non_exhaustive()
    }
}

/// `COSE_Encrypt0` with the IV pulled out of the unprotected header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypt0 {
    pub protected: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl CborCodec for Encrypt0 {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Tag(
            TAG_COSE_ENCRYPT0,
            Box::new(Value::Array(vec![
                bstr(self.protected.clone()),
                Value::Map(vec![(sint(HEADER_IV), bstr(self.iv.clone()))]),
                bstr(self.ciphertext.clone()),
            ])),
        ))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [protected, unprotected, ciphertext] =
            value::fields(untag(v, TAG_COSE_ENCRYPT0, "Encrypt0")?, "Encrypt0")?;
        let unprotected = value::map(unprotected, "Encrypt0.unprotected")?;
        let iv = value::map_get(&unprotected, HEADER_IV)
            .cloned()
            .ok_or_else(|| SerializationError::malformed("Encrypt0", "missing IV header"))?;
        Ok(Self {
            protected: value::bytes(protected, "Encrypt0.protected")?,
            iv: value::bytes(iv, "Encrypt0.iv")?,
            ciphertext: value::bytes(ciphertext, "Encrypt0.ciphertext")?,
        })
    }
}

/// `COSE_Mac0` with an empty unprotected header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mac0 {
    pub protected: Vec<u8>,
    pub payload: Vec<u8>,
    pub tag: Vec<u8>,
}

impl CborCodec for Mac0 {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Tag(
            TAG_COSE_MAC0,
            Box::new(Value::Array(vec![
                bstr(self.protected.clone()),
                Value::Map(Vec::new()),
                bstr(self.payload.clone()),
                bstr(self.tag.clone()),
            ])),
        ))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [protected, unprotected, payload, tag] =
            value::fields(untag(v, TAG_COSE_MAC0, "Mac0")?, "Mac0")?;
        value::map(unprotected, "Mac0.unprotected")?;
        Ok(Self {
            protected: value::bytes(protected, "Mac0.protected")?,
            payload: value::bytes(payload, "Mac0.payload")?,
            tag: value::bytes(tag, "Mac0.tag")?,
        })
    }
}

fn untag(v: Value, expected: u64, what: &'static str) -> SerializationResult<Value> {
    match v {
        Value::Tag(tag, inner) if tag == expected => Ok(*inner),
        Value::Tag(tag, _) => Err(SerializationError::malformed(what, format!("unexpected tag {tag}"))),
        other => Ok(other),
    }
}

fn protected_alg(alg: i64) -> CryptoResult<Vec<u8>> {
    Ok(fdo_cbor::encode_value(&Value::Map(vec![(
        sint(HEADER_ALG),
        sint(alg),
    )]))?)
}

fn read_protected_alg(protected: &[u8]) -> CryptoResult<i64> {
    let entries = value::map(fdo_cbor::decode_value(protected)?, "protected header")?;
    let alg = value::map_get(&entries, HEADER_ALG)
        .ok_or_else(|| SerializationError::malformed("protected header", "missing alg"))?;
    Ok(value::int(alg, "protected header alg")?)
}

fn enc_structure(protected: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(fdo_cbor::encode_value(&Value::Array(vec![
        tstr("Encrypt0"),
        bstr(protected),
        bstr(Vec::new()),
    ]))?)
}

fn mac_structure(protected: &[u8], payload: &[u8]) -> CryptoResult<Vec<u8>> {
    Ok(fdo_cbor::encode_value(&Value::Array(vec![
        tstr("MAC0"),
        bstr(protected),
        bstr(Vec::new()),
        bstr(payload),
    ]))?)
}

fn mac(suite: CipherSuite, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    match suite.mac_type() {
        HashType::HmacSha384 => hmac_sha384(key, data),
        _ => hmac_sha256(key, data),
    }
}

/// Encrypt `payload` under the session key.
///
/// # Errors
/// Fails if the cipher rejects the key or framing fails.
pub fn add_encryption_wrapping(payload: &[u8], key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let suite = key.suite();
    let iv = crate::random_vec(suite.iv_len());
    let protected = protected_alg(suite.code())?;

    if !suite.is_etm() {
        let aad = enc_structure(&protected)?;
        let ciphertext = gcm_encrypt(suite, key.enc_key(), &iv, payload, &aad)?;
        return Ok(Encrypt0 {
            protected,
            iv,
            ciphertext,
        }
        .to_bytes()?);
    }

    let ciphertext = if suite.is_cbc() {
        cbc_encrypt(key.enc_key(), &iv, payload)?
    } else {
        ctr_apply(key.enc_key(), &iv, payload)?
    };
    let inner = Encrypt0 {
        protected,
        iv,
        ciphertext,
    }
    .to_bytes()?;

    let mac_protected = protected_alg(suite.mac_type().code())?;
    let tag = mac(suite, key.mac_key(), &mac_structure(&mac_protected, &inner)?)?;
    Ok(Mac0 {
        protected: mac_protected,
        payload: inner,
        tag,
    }
    .to_bytes()?)
}

/// Authenticate and decrypt an envelope produced by [`add_encryption_wrapping`].
///
/// # Errors
/// Returns [`CryptoError::DecryptFailed`] on tag/MAC/padding failures and
/// a serialization error when the envelope is not well-formed.
pub fn remove_encryption_wrapping(bytes: &[u8], key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let suite = key.suite();

    let encrypt0 = if suite.is_etm() {
        let mac0 = Mac0::from_bytes(bytes)?;
        if read_protected_alg(&mac0.protected)? != suite.mac_type().code() {
            return Err(CryptoError::DecryptFailed("mac algorithm mismatch"));
        }
        let expected = mac(suite, key.mac_key(), &mac_structure(&mac0.protected, &mac0.payload)?)?;
        if !bool::from(expected.ct_eq(&mac0.tag)) {
            return Err(CryptoError::DecryptFailed("mac tag mismatch"));
        }
        Encrypt0::from_bytes(&mac0.payload)?
    } else {
        Encrypt0::from_bytes(bytes)?
    };

    if read_protected_alg(&encrypt0.protected)? != suite.code() {
        return Err(CryptoError::DecryptFailed("cipher suite mismatch"));
    }
    if encrypt0.iv.len() != suite.iv_len() {
        return Err(CryptoError::DecryptFailed("bad IV length"));
    }

    if !suite.is_etm() {
        let aad = enc_structure(&encrypt0.protected)?;
        gcm_decrypt(suite, key.enc_key(), &encrypt0.iv, &encrypt0.ciphertext, &aad)
    } else if suite.is_cbc() {
        cbc_decrypt(key.enc_key(), &encrypt0.iv, &encrypt0.ciphertext)
    } else {
        ctr_apply(key.enc_key(), &encrypt0.iv, &encrypt0.ciphertext)
    }
}

fn gcm_encrypt(
    suite: CipherSuite,
    key: &[u8],
    iv: &[u8],
    msg: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg, aad };
    let out = match suite {
        CipherSuite::A256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::EncryptFailed)?
            .encrypt(nonce, payload),
        _ => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::EncryptFailed)?
            .encrypt(nonce, payload),
    };
    out.map_err(|_| CryptoError::EncryptFailed)
}

fn gcm_decrypt(
    suite: CipherSuite,
    key: &[u8],
    iv: &[u8],
    msg: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let nonce = Nonce::from_slice(iv);
    let payload = Payload { msg, aad };
    let out = match suite {
        CipherSuite::A256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::DecryptFailed("bad key"))?
            .decrypt(nonce, payload),
        _ => Aes128Gcm::new_from_slice(key)
            .map_err(|_| CryptoError::DecryptFailed("bad key"))?
            .decrypt(nonce, payload),
    };
    out.map_err(|_| CryptoError::DecryptFailed("aead tag mismatch"))
}

fn cbc_encrypt(key: &[u8], iv: &[u8], msg: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut buf = vec![0u8; msg.len() + AES_BLOCK];
    buf[..msg.len()].copy_from_slice(msg);
    let written = match key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptFailed)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, msg.len())
            .map_err(|_| CryptoError::EncryptFailed)?
            .len(),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptFailed)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, msg.len())
            .map_err(|_| CryptoError::EncryptFailed)?
            .len(),
    };
    buf.truncate(written);
    Ok(buf)
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK != 0 {
        return Err(CryptoError::DecryptFailed("ciphertext not block aligned"));
    }
    let mut buf = ciphertext.to_vec();
    let plain_len = match key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::DecryptFailed("bad key"))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| CryptoError::DecryptFailed("bad padding"))?
            .len(),
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::DecryptFailed("bad key"))?
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| CryptoError::DecryptFailed("bad padding"))?
            .len(),
    };
    buf.truncate(plain_len);
    Ok(buf)
}

fn ctr_apply(key: &[u8], iv: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    let mut buf = data.to_vec();
    match key.len() {
        16 => ctr::Ctr128BE::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptFailed)?
            .apply_keystream(&mut buf),
        _ => ctr::Ctr128BE::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(|_| CryptoError::EncryptFailed)?
            .apply_keystream(&mut buf),
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(suite: CipherSuite) -> SessionKey {
        SessionKey::from_material(suite, &crate::random_vec(suite.kdf_output_len())).unwrap()
    }

    // ============================================================================
    // Round trips
    // ============================================================================

    #[test]
    fn every_suite_roundtrips() {
        for suite in CipherSuite::ALL {
            let key = key_for(suite);
            for payload in [Vec::new(), b"x".to_vec(), vec![0xa5; 16], vec![3; 1000]] {
                let sealed = add_encryption_wrapping(&payload, &key).unwrap();
                let opened = remove_encryption_wrapping(&sealed, &key).unwrap();
                assert_eq!(opened, payload, "{suite:?}");
            }
        }
    }

    #[test]
    fn envelope_shape_follows_suite() {
        let gcm = add_encryption_wrapping(b"p", &key_for(CipherSuite::A128Gcm)).unwrap();
        let enc = Encrypt0::from_bytes(&gcm).unwrap();
        assert_eq!(enc.iv.len(), 12);

        let etm = add_encryption_wrapping(b"p", &key_for(CipherSuite::Aes256CbcHmacSha384)).unwrap();
        let mac0 = Mac0::from_bytes(&etm).unwrap();
        assert_eq!(mac0.tag.len(), 48);
        let inner = Encrypt0::from_bytes(&mac0.payload).unwrap();
        assert_eq!(inner.iv.len(), 16);
        assert_eq!(inner.ciphertext.len(), 16);
    }

    // ============================================================================
    // Tamper detection
    // ============================================================================

    #[test]
    fn wrong_key_fails_for_every_suite() {
        for suite in CipherSuite::ALL {
            let sealed = add_encryption_wrapping(b"secret", &key_for(suite)).unwrap();
            let err = remove_encryption_wrapping(&sealed, &key_for(suite)).unwrap_err();
            assert!(err.is_verification_failure(), "{suite:?}: {err}");
        }
    }

    #[test]
    fn flipped_ciphertext_detected() {
        for suite in CipherSuite::ALL {
            let key = key_for(suite);
            let sealed = add_encryption_wrapping(b"some payload", &key).unwrap();
            let tampered = if suite.is_etm() {
                let mut mac0 = Mac0::from_bytes(&sealed).unwrap();
                let mut inner = Encrypt0::from_bytes(&mac0.payload).unwrap();
                inner.ciphertext[0] ^= 1;
                mac0.payload = inner.to_bytes().unwrap();
                mac0.to_bytes().unwrap()
            } else {
                let mut enc = Encrypt0::from_bytes(&sealed).unwrap();
                enc.ciphertext[0] ^= 1;
                enc.to_bytes().unwrap()
            };
            assert!(remove_encryption_wrapping(&tampered, &key).is_err(), "{suite:?}");
        }
    }

    #[test]
    fn suite_mismatch_rejected() {
        let key = key_for(CipherSuite::A128Gcm);
        let other = SessionKey::from_material(CipherSuite::A256Gcm, &crate::random_vec(32)).unwrap();
        let sealed = add_encryption_wrapping(b"p", &key).unwrap();
        assert!(remove_encryption_wrapping(&sealed, &other).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let key = key_for(CipherSuite::Aes128CtrHmacSha256);
        assert!(remove_encryption_wrapping(&[0xff, 0x00], &key).is_err());
    }

    #[test]
    fn material_length_checked() {
        assert!(SessionKey::from_material(CipherSuite::Aes128CbcHmacSha256, &[0; 47]).is_err());
        assert_eq!(CipherSuite::Aes256CtrHmacSha384.kdf_output_len(), 96);
        assert_eq!(
            CipherSuite::from_code(-17_760_705).unwrap(),
            CipherSuite::Aes256CbcHmacSha384
        );
        assert!(CipherSuite::from_code(2).is_err());
    }
}
