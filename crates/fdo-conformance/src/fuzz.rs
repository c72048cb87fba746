//! Message mutators used by negative test identities.
//!
//! Every mutator corrupts exactly one element and leaves the rest of the
//! message intact, so a peer that rejects the result is rejecting that element.

use coset::CoseSign1;
use fdo_cbor::value::{bstr, tstr, uint};
use fdo_cbor::{CborCodec, Value};
use fdo_crypto::envelope::{Encrypt0, Mac0, SessionKey, add_encryption_wrapping};
use fdo_crypto::hash::{FdoHash, HashType};
use fdo_crypto::keys::{FdoPublicKey, PublicKeyEncoding, PublicKeyType, SG_TYPE_ES256, SG_TYPE_ES384};
use fdo_crypto::{CryptoResult, random_vec};
use fdo_protocol::types::SigInfo;
use rand::Rng;
use rand::seq::SliceRandom;

/// Signature types a device may announce (EPID excluded).
const SG_TYPES: [i64; 6] = [SG_TYPE_ES256, SG_TYPE_ES384, -37, -38, -257, -258];

/// Same-length buffer whose first third (roughly) is random and the rest zero.
#[must_use]
pub fn random_buffer_fuzz(input: &[u8]) -> Vec<u8> {
    let max = input.len() / 3;
    let min = max - max / 2;
    let n = rand::thread_rng().gen_range(min..=max);
    let mut out = vec![0u8; input.len()];
    out[..n].copy_from_slice(&random_vec(n));
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sign1Field {
    Protected,
    Unprotected,
    Payload,
    Signature,
}

/// Corrupt one field of a signed object.
#[must_use]
pub fn fuzz_cose_sign1(mut sign1: CoseSign1) -> CoseSign1 {
    let field = *[
        Sign1Field::Protected,
        Sign1Field::Unprotected,
        Sign1Field::Payload,
        Sign1Field::Signature,
    ]
    .choose(&mut rand::thread_rng())
    .unwrap_or(&Sign1Field::Signature);

    match field {
        Sign1Field::Protected => {
            let len = rand::thread_rng().gen_range(5..=49);
            sign1.protected.original_data = Some(random_vec(len));
        }
        Sign1Field::Unprotected => sign1.unprotected = coset::Header::default(),
        Sign1Field::Payload => {
            sign1.payload = sign1.payload.as_deref().map(random_buffer_fuzz);
        }
        Sign1Field::Signature => sign1.signature = random_buffer_fuzz(&sign1.signature),
    }
    sign1
}

/// Corrupt only the signature bytes.
#[must_use]
pub fn fuzz_signature(mut sign1: CoseSign1) -> CoseSign1 {
    sign1.signature = random_buffer_fuzz(&sign1.signature);
    sign1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeField {
    Payload,
    Tag,
    Ciphertext,
    Iv,
    Output,
}

const ETM_FIELDS: [EnvelopeField; 5] = [
    EnvelopeField::Payload,
    EnvelopeField::Tag,
    EnvelopeField::Ciphertext,
    EnvelopeField::Iv,
    EnvelopeField::Output,
];

const EMB_FIELDS: [EnvelopeField; 3] = [
    EnvelopeField::Ciphertext,
    EnvelopeField::Iv,
    EnvelopeField::Output,
];

/// Encrypt `payload` and then corrupt one element of the envelope.
///
/// # Errors
/// Fails when the payload cannot be encrypted under `key`.
pub fn fuzz_encryption_wrapping(payload: &[u8], key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let wrapped = add_encryption_wrapping(payload, key)?;
    let fields: &[EnvelopeField] = if key.suite().is_etm() {
        &ETM_FIELDS
    } else {
        &EMB_FIELDS
    };
    let field = *fields
        .choose(&mut rand::thread_rng())
        .unwrap_or(&EnvelopeField::Output);

    if field == EnvelopeField::Output {
        return Ok(random_buffer_fuzz(&wrapped));
    }

    if !key.suite().is_etm() {
        let mut block = Encrypt0::from_bytes(&wrapped)?;
        corrupt_encrypt0(&mut block, field);
        return Ok(block.to_bytes()?);
    }

    let mut outer = Mac0::from_bytes(&wrapped)?;
    match field {
        EnvelopeField::Payload => outer.payload = random_buffer_fuzz(&outer.payload),
        EnvelopeField::Tag => outer.tag = random_buffer_fuzz(&outer.tag),
        _ => {
            let mut inner = Encrypt0::from_bytes(&outer.payload)?;
            corrupt_encrypt0(&mut inner, field);
            outer.payload = inner.to_bytes()?;
        }
    }
    Ok(outer.to_bytes()?)
}

fn corrupt_encrypt0(block: &mut Encrypt0, field: EnvelopeField) {
    if field == EnvelopeField::Iv {
        block.iv = random_vec(block.iv.len());
    } else {
        block.ciphertext = random_buffer_fuzz(&block.ciphertext);
    }
}

/// A hash that must not verify against `data` under any hash type.
///
/// When `hmac_key` is given the hash is treated as an HMAC under that key.
///
/// # Errors
/// Fails only if the HMAC implementation rejects the key.
pub fn random_hash_fault(
    hash: &FdoHash,
    data: &[u8],
    hmac_key: Option<&[u8]>,
) -> CryptoResult<FdoHash> {
    let mut rng = rand::thread_rng();
    Ok(match rng.gen_range(0..3) {
        0 => FdoHash {
            hash_type: hash.hash_type,
            value: random_vec(hash.hash_type.output_len()),
        },
        1 => {
            let others: Vec<HashType> = HashType::ALL
                .into_iter()
                .filter(|t| *t != hash.hash_type)
                .collect();
            FdoHash {
                hash_type: *others.choose(&mut rng).unwrap_or(&hash.hash_type.swapped_width()),
                value: hash.value.clone(),
            }
        }
        _ => {
            // other width over other bytes, so no width can match
            let swapped = hash.hash_type.swapped_width();
            let mut tampered = data.to_vec();
            tampered.push(rng.r#gen());
            match hmac_key {
                Some(key) => FdoHash::hmac(swapped, key, &tampered)?,
                None => FdoHash::digest(swapped, &tampered),
            }
        }
    })
}

/// SigInfo that differs from `sig_info`: another known type, an unknown
/// type, or a non-empty info field.
#[must_use]
pub fn random_sig_info_fault(sig_info: &SigInfo) -> SigInfo {
    let mut rng = rand::thread_rng();
    let mut out = sig_info.clone();
    match rng.gen_range(0..3) {
        0 => out.sg_type = random_sg_type_except(sig_info.sg_type),
        1 => out.sg_type = rng.gen_range(12..=6312),
        _ => {
            let len = rng.gen_range(1..=32);
            out.info = random_vec(len);
        }
    }
    out
}

/// Public key with one of body, encoding or curve changed.
#[must_use]
pub fn random_public_key_fault(pk: &FdoPublicKey) -> FdoPublicKey {
    let mut rng = rand::thread_rng();
    let mut out = pk.clone();
    match rng.gen_range(0..3) {
        0 => out.body = random_value(2),
        1 => {
            out.encoding = *[
                PublicKeyEncoding::Crypto,
                PublicKeyEncoding::X509,
                PublicKeyEncoding::X5Chain,
                PublicKeyEncoding::CoseKey,
            ]
            .iter()
            .filter(|e| **e != pk.encoding)
            .collect::<Vec<_>>()
            .choose(&mut rng)
            .copied()
            .unwrap_or(&PublicKeyEncoding::CoseKey);
        }
        _ => {
            out.pk_type = match pk.pk_type {
                PublicKeyType::Secp256r1 => PublicKeyType::Secp384r1,
                PublicKeyType::Secp384r1 => PublicKeyType::Secp256r1,
            };
        }
    }
    out
}

/// A known signature type other than `sg_type`.
#[must_use]
pub fn random_sg_type_except(sg_type: i64) -> i64 {
    let candidates: Vec<i64> = SG_TYPES.into_iter().filter(|t| *t != sg_type).collect();
    *candidates
        .choose(&mut rand::thread_rng())
        .unwrap_or(&SG_TYPE_ES384)
}

/// Arbitrary CBOR of random shape, nested at most `depth` levels.
#[must_use]
pub fn random_value(depth: u8) -> Value {
    let mut rng = rand::thread_rng();
    let pick = if depth == 0 {
        rng.gen_range(0..3)
    } else {
        rng.gen_range(0..5)
    };
    match pick {
        0 => tstr(random_word(&mut rng)),
        1 => uint(rng.gen_range(0..61_904)),
        2 => {
            let len = rng.gen_range(0..215);
            bstr(random_vec(len))
        }
        3 => Value::Map(vec![(tstr(random_word(&mut rng)), random_value(depth - 1))]),
        _ => Value::Array(vec![random_value(depth - 1), random_value(depth - 1)]),
    }
}

fn random_word(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(1..=12);
    (0..len).map(|_| char::from(rng.gen_range(b'a'..=b'z'))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdo_crypto::cose;
    use fdo_crypto::envelope::{CipherSuite, remove_encryption_wrapping};
    use fdo_crypto::keys::Es256SigningKey;

    #[test]
    fn buffer_fuzz_keeps_length_and_zeroes_tail() {
        let input = vec![0xAA; 90];
        for _ in 0..32 {
            let out = random_buffer_fuzz(&input);
            assert_eq!(out.len(), input.len());
            assert!(out[30..].iter().all(|b| *b == 0));
        }
        assert!(random_buffer_fuzz(&[]).is_empty());
    }

    #[test]
    fn fuzzed_sign1_never_verifies() {
        let sk = Es256SigningKey::generate();
        // no unprotected entries, so clearing that header changes nothing
        let signed = cose::sign1(b"payload bytes for fuzzing".to_vec(), &sk, cose::no_headers());
        for _ in 0..16 {
            let fuzzed = fuzz_cose_sign1(signed.clone());
            let untouched = fuzzed.payload == signed.payload
                && fuzzed.signature == signed.signature
                && fuzzed.protected.original_data.is_none();
            let verified = cose::sign1_to_vec(&fuzzed)
                .and_then(|b| cose::sign1_from_slice(&b))
                .and_then(|s| cose::verify_sign1(&s, &sk.verifying_key()));
            assert_eq!(verified.is_ok(), untouched);
        }
    }

    #[test]
    fn fuzzed_envelopes_fail_to_open() {
        for suite in [CipherSuite::A128Gcm, CipherSuite::Aes128CbcHmacSha256] {
            let key = SessionKey::from_material(suite, &random_vec(suite.kdf_output_len())).unwrap();
            for _ in 0..16 {
                let bytes = fuzz_encryption_wrapping(b"service info payload", &key).unwrap();
                assert!(remove_encryption_wrapping(&bytes, &key).is_err(), "{suite:?}");
            }
        }
    }

    #[test]
    fn hash_fault_never_verifies() {
        let data = b"to0d bytes";
        for hash_type in [HashType::Sha256, HashType::Sha384] {
            let good = FdoHash::digest(hash_type, data);
            for _ in 0..64 {
                let bad = random_hash_fault(&good, data, None).unwrap();
                assert_ne!(bad, good);
                assert!(bad.verify_digest(data).is_err(), "{bad:?} verifies");
            }
        }
    }

    #[test]
    fn hmac_fault_never_verifies() {
        let key = [9u8; 32];
        let data = b"voucher header";
        let good = FdoHash::hmac(HashType::HmacSha256, &key, data).unwrap();
        for _ in 0..64 {
            let bad = random_hash_fault(&good, data, Some(&key)).unwrap();
            assert!(bad.verify_hmac(&key, data).is_err(), "{bad:?} verifies");
        }
    }

    #[test]
    fn sig_info_fault_is_unsupported() {
        let es384 = SigInfo {
            sg_type: SG_TYPE_ES384,
            info: Vec::new(),
        };
        for _ in 0..32 {
            assert!(!random_sig_info_fault(&SigInfo::es256()).is_supported());
            assert_ne!(random_sig_info_fault(&es384), es384);
        }
    }

    #[test]
    fn public_key_fault_changes_something() {
        let pk = Es256SigningKey::generate().public_key().unwrap();
        for _ in 0..16 {
            assert_ne!(random_public_key_fault(&pk), pk);
        }
    }

    #[test]
    fn sg_type_except_differs() {
        for _ in 0..16 {
            assert_ne!(random_sg_type_except(SG_TYPE_ES256), SG_TYPE_ES256);
        }
    }
}
