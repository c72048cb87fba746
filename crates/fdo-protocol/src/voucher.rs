//! Ownership voucher model, chain verification and test voucher generation.
//!
//! A voucher is `[protVer, headerBytes, headerHmac, devCertChain / null, [entry...]]`.
//! Entry 0 is signed by the manufacturer key from the header and hashes
//! `headerBytes || cbor(headerHmac)`; every later entry is signed by the key
//! carried in the previous entry and hashes the previous entry's encoding.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Guid, RendezvousInfo, SigInfo};
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder, iana};
use fdo_cbor::value::{self, bstr, tstr, uint};
use fdo_cbor::{CborCodec, SerializationResult, Value};
use fdo_crypto::cose;
use fdo_crypto::hash::{FdoHash, HashType};
use fdo_crypto::keys::{Es256SigningKey, FdoPublicKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// FDO protocol version carried in vouchers and headers.
pub const PROTOCOL_VERSION: u16 = 101;

/// Entry count bounds used when the builder picks a random chain length.
pub const MIN_GENERATED_ENTRIES: usize = 3;
pub const MAX_GENERATED_ENTRIES: usize = 7;

/// `OVHeader = [protVer, guid, rvInfo, deviceInfo, mfgPubKey, certChainHash / null]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OvHeader {
    pub prot_ver: u16,
    pub guid: Guid,
    pub rv_info: RendezvousInfo,
    pub device_info: String,
    pub mfg_pub_key: FdoPublicKey,
    pub cert_chain_hash: Option<FdoHash>,
}

impl OvHeader {
    /// Bytes hashed into every entry's `hashHdrInfo`.
    #[must_use]
    pub fn hdr_info(&self) -> Vec<u8> {
        let mut out = self.guid.as_bytes().to_vec();
        out.extend_from_slice(self.device_info.as_bytes());
        out
    }
}

impl CborCodec for OvHeader {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            uint(self.prot_ver.into()),
            self.guid.to_value()?,
            self.rv_info.to_value()?,
            tstr(self.device_info.clone()),
            self.mfg_pub_key.to_value()?,
            match &self.cert_chain_hash {
                Some(h) => h.to_value()?,
                None => Value::Null,
            },
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [prot_ver, guid, rv_info, device_info, mfg_pub_key, cert_chain_hash] =
            value::fields(v, "OVHeader")?;
        Ok(Self {
            prot_ver: value::int(&prot_ver, "OVHeader.protVer")?,
            guid: Guid::from_value(guid)?,
            rv_info: RendezvousInfo::from_value(rv_info)?,
            device_info: value::text(device_info, "OVHeader.deviceInfo")?,
            mfg_pub_key: FdoPublicKey::from_value(mfg_pub_key)?,
            cert_chain_hash: value::optional(cert_chain_hash)
                .map(FdoHash::from_value)
                .transpose()?,
        })
    }
}

/// `OVEntryPayload = [hashPrevEntry, hashHdrInfo, extra / null, pubKey]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntryPayload {
    pub prev_hash: FdoHash,
    pub hdr_info_hash: FdoHash,
    pub extra: Option<Value>,
    pub pub_key: FdoPublicKey,
}

impl CborCodec for OvEntryPayload {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            self.prev_hash.to_value()?,
            self.hdr_info_hash.to_value()?,
            self.extra.clone().unwrap_or(Value::Null),
            self.pub_key.to_value()?,
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [prev_hash, hdr_info_hash, extra, pub_key] = value::fields(v, "OVEntryPayload")?;
        Ok(Self {
            prev_hash: FdoHash::from_value(prev_hash)?,
            hdr_info_hash: FdoHash::from_value(hdr_info_hash)?,
            extra: value::optional(extra),
            pub_key: FdoPublicKey::from_value(pub_key)?,
        })
    }
}

/// Decode the payload of one voucher entry without checking its signature.
///
/// # Errors
/// Fails if the entry has no payload or the payload is malformed.
pub fn entry_payload(entry: &CoseSign1) -> ProtocolResult<OvEntryPayload> {
    Ok(OvEntryPayload::from_bytes(cose::payload(entry)?)?)
}

/// The bytes the first entry's `hashPrevEntry` covers.
///
/// # Errors
/// Fails if the HMAC cannot be encoded.
pub fn header_link(header_bytes: &[u8], header_hmac: &FdoHash) -> ProtocolResult<Vec<u8>> {
    let mut out = header_bytes.to_vec();
    out.extend_from_slice(&header_hmac.to_bytes()?);
    Ok(out)
}

/// Walk `entries` in order and return the key carried by the last one.
///
/// Used both for a complete voucher and for entries collected one at a time
/// over GetOVNextEntry.
///
/// # Errors
/// Returns [`ProtocolError::Verification`] naming the first entry whose hash
/// or signature does not check out.
pub fn verify_entry_chain(
    header_bytes: &[u8],
    header_hmac: &FdoHash,
    header: &OvHeader,
    entries: &[CoseSign1],
) -> ProtocolResult<FdoPublicKey> {
    if entries.is_empty() {
        return Err(ProtocolError::Verification("voucher has no entries".into()));
    }
    let hdr_info = header.hdr_info();
    let mut signer = header.mfg_pub_key.clone();
    let mut prev_bytes = header_link(header_bytes, header_hmac)?;

    for (i, entry) in entries.iter().enumerate() {
        let fail = |what: &str| ProtocolError::Verification(format!("voucher entry {i}: {what}"));
        let key = signer
            .verifying_key()
            .map_err(|e| fail(&format!("signer key unusable: {e}")))?;
        cose::verify_sign1(entry, &key).map_err(|e| fail(&e.to_string()))?;

        let payload = entry_payload(entry)?;
        payload
            .prev_hash
            .verify_digest(&prev_bytes)
            .map_err(|_| fail("hashPrevEntry mismatch"))?;
        payload
            .hdr_info_hash
            .verify_digest(&hdr_info)
            .map_err(|_| fail("hashHdrInfo mismatch"))?;

        prev_bytes = cose::sign1_to_vec(entry)?;
        signer = payload.pub_key;
    }
    debug!(entries = entries.len(), "voucher entry chain verified");
    Ok(signer)
}

/// `OwnershipVoucher`.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipVoucher {
    pub prot_ver: u16,
    pub header_bytes: Vec<u8>,
    pub header_hmac: FdoHash,
    pub dev_cert_chain: Option<Vec<Vec<u8>>>,
    pub entries: Vec<CoseSign1>,
}

impl OwnershipVoucher {
    /// Decode the header.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the header bytes are malformed.
    pub fn header(&self) -> ProtocolResult<OvHeader> {
        Ok(OvHeader::from_bytes(&self.header_bytes)?)
    }

    /// `VerifyChain`: check every entry and return the terminal owner key.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Verification`] on any hash or signature mismatch.
    pub fn verify_chain(&self) -> ProtocolResult<FdoPublicKey> {
        let header = self.header()?;
        verify_entry_chain(&self.header_bytes, &self.header_hmac, &header, &self.entries)
    }

    /// Public key in the last entry, without verification.
    ///
    /// # Errors
    /// Fails for an empty or malformed entry list.
    pub fn final_owner_key(&self) -> ProtocolResult<FdoPublicKey> {
        let last = self
            .entries
            .last()
            .ok_or_else(|| ProtocolError::Verification("voucher has no entries".into()))?;
        Ok(entry_payload(last)?.pub_key)
    }

    /// Structural and cryptographic validation of a received voucher.
    ///
    /// # Errors
    /// Returns the first failed check.
    pub fn validate(&self) -> ProtocolResult<FdoPublicKey> {
        if self.prot_ver != PROTOCOL_VERSION {
            return Err(ProtocolError::Decode(format!(
                "voucher protocol version {}",
                self.prot_ver
            )));
        }
        let header = self.header()?;
        if header.prot_ver != PROTOCOL_VERSION {
            return Err(ProtocolError::Decode(format!(
                "voucher header protocol version {}",
                header.prot_ver
            )));
        }
        if header.rv_info.is_empty() {
            return Err(ProtocolError::Decode("voucher header has no rendezvous info".into()));
        }
        if header.device_info.is_empty() {
            return Err(ProtocolError::Decode("voucher header has no device info".into()));
        }
        if self.entries.is_empty() {
            return Err(ProtocolError::Decode("voucher has no entries".into()));
        }
        match (&header.cert_chain_hash, &self.dev_cert_chain) {
            (Some(hash), Some(chain)) => hash
                .verify_digest(&chain.concat())
                .map_err(|_| ProtocolError::Verification("certificate chain hash mismatch".into()))?,
            (Some(_), None) => {
                return Err(ProtocolError::Decode(
                    "certificate chain hash without certificate chain".into(),
                ));
            }
            _ => {}
        }
        self.verify_chain()
    }

    /// Device-side check that the header is bound to our HMAC secret.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Verification`] when the HMAC does not match.
    pub fn verify_header_hmac(&self, secret: &[u8]) -> ProtocolResult<()> {
        Ok(self.header_hmac.verify_hmac(secret, &self.header_bytes)?)
    }
}

impl CborCodec for OwnershipVoucher {
    fn to_value(&self) -> SerializationResult<Value> {
        let chain = self.dev_cert_chain.as_ref().map_or(Value::Null, |certs| {
            Value::Array(certs.iter().cloned().map(bstr).collect())
        });
        let entries = self
            .entries
            .iter()
            .map(|e| cose::embed_sign1(e, "OVEntry"))
            .collect::<SerializationResult<Vec<_>>>()?;
        Ok(Value::Array(vec![
            uint(self.prot_ver.into()),
            bstr(self.header_bytes.clone()),
            self.header_hmac.to_value()?,
            chain,
            Value::Array(entries),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [prot_ver, header_bytes, header_hmac, chain, entries] =
            value::fields(v, "OwnershipVoucher")?;
        let dev_cert_chain = value::optional(chain)
            .map(|c| {
                value::array(c, "OwnershipVoucher.devCertChain")?
                    .into_iter()
                    .map(|cert| value::bytes(cert, "OwnershipVoucher.devCertChain[]"))
                    .collect::<SerializationResult<Vec<_>>>()
            })
            .transpose()?;
        Ok(Self {
            prot_ver: value::int(&prot_ver, "OwnershipVoucher.protVer")?,
            header_bytes: value::bytes(header_bytes, "OwnershipVoucher.header")?,
            header_hmac: FdoHash::from_value(header_hmac)?,
            dev_cert_chain,
            entries: value::array(entries, "OwnershipVoucher.entries")?
                .into_iter()
                .map(|e| cose::extract_sign1(e, "OVEntry"))
                .collect::<SerializationResult<Vec<_>>>()?,
        })
    }
}

/// Device credential produced alongside a generated voucher.
#[derive(Clone)]
pub struct DeviceCredential {
    pub active: bool,
    pub prot_ver: u16,
    pub hmac_secret: Vec<u8>,
    pub device_info: String,
    pub guid: Guid,
    pub rv_info: RendezvousInfo,
    /// Digest of the manufacturer public key.
    pub pub_key_hash: FdoHash,
    /// Device attestation key (P-256 scalar).
    pub private_key: Vec<u8>,
    /// Leaf first; each entry is SPKI DER.
    pub cert_chain: Vec<Vec<u8>>,
    pub hmac_alg: HashType,
    pub hash_alg: HashType,
}

impl DeviceCredential {
    /// Device attestation key.
    ///
    /// # Errors
    /// Fails if the stored scalar is not a valid P-256 key.
    pub fn signing_key(&self) -> ProtocolResult<Es256SigningKey> {
        Ok(Es256SigningKey::from_bytes(&self.private_key)?)
    }

    /// The `eASigInfo` this device sends.
    #[must_use]
    pub const fn sig_info(&self) -> SigInfo {
        SigInfo::es256()
    }
}

impl std::fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("guid", &self.guid)
            .field("device_info", &self.device_info)
            .field("hash_alg", &self.hash_alg)
            .finish_non_exhaustive()
    }
}

impl CborCodec for DeviceCredential {
    fn to_value(&self) -> SerializationResult<Value> {
        Ok(Value::Array(vec![
            Value::Bool(self.active),
            uint(self.prot_ver.into()),
            bstr(self.hmac_secret.clone()),
            tstr(self.device_info.clone()),
            self.guid.to_value()?,
            self.rv_info.to_value()?,
            self.pub_key_hash.to_value()?,
            bstr(self.private_key.clone()),
            Value::Array(self.cert_chain.iter().cloned().map(bstr).collect()),
            value::sint(self.hmac_alg.code()),
            value::sint(self.hash_alg.code()),
        ]))
    }

    fn from_value(v: Value) -> SerializationResult<Self> {
        let [
            active,
            prot_ver,
            hmac_secret,
            device_info,
            guid,
            rv_info,
            pub_key_hash,
            private_key,
            cert_chain,
            hmac_alg,
            hash_alg,
        ] = value::fields(v, "DeviceCredential")?;
        let hash_type = |v: &Value, what: &'static str| -> SerializationResult<HashType> {
            HashType::from_code(value::int(v, what)?)
                .map_err(|e| fdo_cbor::SerializationError::malformed(what, e.to_string()))
        };
        Ok(Self {
            active: value::boolean(active, "DeviceCredential.active")?,
            prot_ver: value::int(&prot_ver, "DeviceCredential.protVer")?,
            hmac_secret: value::bytes(hmac_secret, "DeviceCredential.hmacSecret")?,
            device_info: value::text(device_info, "DeviceCredential.deviceInfo")?,
            guid: Guid::from_value(guid)?,
            rv_info: RendezvousInfo::from_value(rv_info)?,
            pub_key_hash: FdoHash::from_value(pub_key_hash)?,
            private_key: value::bytes(private_key, "DeviceCredential.privateKey")?,
            cert_chain: value::array(cert_chain, "DeviceCredential.certChain")?
                .into_iter()
                .map(|c| value::bytes(c, "DeviceCredential.certChain[]"))
                .collect::<SerializationResult<Vec<_>>>()?,
            hmac_alg: hash_type(&hmac_alg, "DeviceCredential.hmacAlg")?,
            hash_alg: hash_type(&hash_alg, "DeviceCredential.hashAlg")?,
        })
    }
}

/// Single deliberate defect injected into a generated voucher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherFault {
    HeaderBadProtVersion,
    HeaderBadRvinfoEmpty,
    HeaderBadDeviceinfoEmpty,
    HeaderBadPubkey,
    HeaderBadCertchainHash,
    EntryBadPrevHash,
    EntryBadHdrinfoHash,
    EntryBadSgType,
    EntryBadSignature,
    EntryBadPubkey,
    BadProtVersion,
    BadHeaderBytes,
    BadHdrHmac,
    BadEmptyEntries,
}

impl VoucherFault {
    pub const ALL: [Self; 14] = [
        Self::HeaderBadProtVersion,
        Self::HeaderBadRvinfoEmpty,
        Self::HeaderBadDeviceinfoEmpty,
        Self::HeaderBadPubkey,
        Self::HeaderBadCertchainHash,
        Self::EntryBadPrevHash,
        Self::EntryBadHdrinfoHash,
        Self::EntryBadSgType,
        Self::EntryBadSignature,
        Self::EntryBadPubkey,
        Self::BadProtVersion,
        Self::BadHeaderBytes,
        Self::BadHdrHmac,
        Self::BadEmptyEntries,
    ];
}

/// Output of [`VoucherBuilder::build`].
#[derive(Debug, Clone)]
pub struct GeneratedVoucher {
    pub credential: DeviceCredential,
    pub voucher: OwnershipVoucher,
    /// Private key matching the last entry's public key.
    pub owner_key: Es256SigningKey,
}

/// Generates a fresh device credential and a voucher chain for it.
#[derive(Debug, Clone)]
pub struct VoucherBuilder {
    rv_info: RendezvousInfo,
    device_info: String,
    entry_count: Option<usize>,
    hash_type: HashType,
    fault: Option<VoucherFault>,
}

impl VoucherBuilder {
    #[must_use]
    pub fn new(rv_info: RendezvousInfo) -> Self {
        Self {
            rv_info,
            device_info: "FDO Conformance Virtual Device".to_owned(),
            entry_count: None,
            hash_type: HashType::Sha256,
            fault: None,
        }
    }

    #[must_use]
    pub fn device_info(mut self, device_info: impl Into<String>) -> Self {
        self.device_info = device_info.into();
        self
    }

    /// Fixed chain length instead of a random one.
    #[must_use]
    pub fn entry_count(mut self, count: usize) -> Self {
        self.entry_count = Some(count.max(1));
        self
    }

    #[must_use]
    pub const fn hash_type(mut self, hash_type: HashType) -> Self {
        self.hash_type = hash_type.to_digest();
        self
    }

    #[must_use]
    pub const fn fault(mut self, fault: Option<VoucherFault>) -> Self {
        self.fault = fault;
        self
    }

    /// Generate keys, sign the chain and apply the configured fault.
    ///
    /// # Errors
    /// Fails only if key encoding or CBOR framing fails.
    pub fn build(self) -> ProtocolResult<GeneratedVoucher> {
        let mut rng = rand::thread_rng();
        let fault = self.fault;
        let hash_type = self.hash_type;

        let guid = Guid::random();
        let hmac_secret = fdo_crypto::random_vec(32);
        let device_key = Es256SigningKey::generate();
        let mfg_key = Es256SigningKey::generate();
        let mut cert_chain = vec![device_key.public_key_der()?, mfg_key.public_key_der()?];

        let mut header = OvHeader {
            prot_ver: PROTOCOL_VERSION,
            guid,
            rv_info: self.rv_info.clone(),
            device_info: self.device_info.clone(),
            mfg_pub_key: mfg_key.public_key()?,
            cert_chain_hash: Some(FdoHash::digest(hash_type, &cert_chain.concat())),
        };
        match fault {
            Some(VoucherFault::HeaderBadProtVersion) => header.prot_ver = rng.gen_range(105..10_000),
            Some(VoucherFault::HeaderBadRvinfoEmpty) => header.rv_info = RendezvousInfo::default(),
            Some(VoucherFault::HeaderBadDeviceinfoEmpty) => header.device_info.clear(),
            Some(VoucherFault::HeaderBadPubkey) => {
                header.mfg_pub_key = Es256SigningKey::generate().public_key()?;
            }
            Some(VoucherFault::HeaderBadCertchainHash) => {
                header.cert_chain_hash = Some(FdoHash {
                    hash_type,
                    value: fdo_crypto::random_vec(hash_type.output_len()),
                });
            }
            _ => {}
        }

        let header_bytes = header.to_bytes()?;
        let header_hmac = FdoHash::hmac(hash_type.to_hmac(), &hmac_secret, &header_bytes)?;
        let hdr_info = header.hdr_info();

        let count = self
            .entry_count
            .unwrap_or_else(|| rng.gen_range(MIN_GENERATED_ENTRIES..=MAX_GENERATED_ENTRIES));
        let bad_index = rng.gen_range(0..count);
        let mut signer = mfg_key;
        let mut prev_bytes = header_link(&header_bytes, &header_hmac)?;
        let mut entries = Vec::with_capacity(count);

        for i in 0..count {
            let next = Es256SigningKey::generate();
            let entry_fault = fault.filter(|_| i == bad_index);
            let mut payload = OvEntryPayload {
                prev_hash: FdoHash::digest(hash_type, &prev_bytes),
                hdr_info_hash: FdoHash::digest(hash_type, &hdr_info),
                extra: None,
                pub_key: next.public_key()?,
            };
            match entry_fault {
                Some(VoucherFault::EntryBadPrevHash) => {
                    payload.prev_hash.value = fdo_crypto::random_vec(hash_type.output_len());
                }
                Some(VoucherFault::EntryBadHdrinfoHash) => {
                    payload.hdr_info_hash.value = fdo_crypto::random_vec(hash_type.output_len());
                }
                Some(VoucherFault::EntryBadPubkey) => {
                    payload.pub_key = Es256SigningKey::generate().public_key()?;
                }
                _ => {}
            }

            let mut entry = if entry_fault == Some(VoucherFault::EntryBadSgType) {
                sign_with_declared_alg(payload.to_bytes()?, &signer, iana::Algorithm::ES384)
            } else {
                cose::sign1(payload.to_bytes()?, &signer, cose::no_headers())
            };
            if entry_fault == Some(VoucherFault::EntryBadSignature) {
                entry.signature = fdo_crypto::random_vec(entry.signature.len());
            }

            prev_bytes = cose::sign1_to_vec(&entry)?;
            entries.push(entry);
            signer = next;
        }

        let mut voucher = OwnershipVoucher {
            prot_ver: PROTOCOL_VERSION,
            header_bytes: header_bytes.clone(),
            header_hmac: header_hmac.clone(),
            dev_cert_chain: None,
            entries,
        };
        match fault {
            Some(VoucherFault::BadProtVersion) => voucher.prot_ver = rng.gen_range(105..10_000),
            Some(VoucherFault::BadHeaderBytes) => {
                voucher.header_bytes = fdo_crypto::random_vec(header_bytes.len());
            }
            Some(VoucherFault::BadHdrHmac) => {
                voucher.header_hmac.value = fdo_crypto::random_vec(header_hmac.value.len());
                cert_chain.swap(0, 1);
            }
            Some(VoucherFault::BadEmptyEntries) => voucher.entries.clear(),
            _ => {}
        }
        voucher.dev_cert_chain = Some(cert_chain.clone());

        let credential = DeviceCredential {
            active: true,
            prot_ver: PROTOCOL_VERSION,
            hmac_secret,
            device_info: self.device_info,
            guid,
            rv_info: self.rv_info,
            pub_key_hash: FdoHash::digest(hash_type, &header.mfg_pub_key.to_bytes()?),
            private_key: device_key.to_bytes().to_vec(),
            cert_chain,
            hmac_alg: hash_type.to_hmac(),
            hash_alg: hash_type,
        };
        debug!(%guid, entries = count, ?fault, "generated voucher");

        Ok(GeneratedVoucher {
            credential,
            voucher,
            owner_key: signer,
        })
    }
}

/// Sign with an ES256 key while declaring another algorithm in the protected header.
fn sign_with_declared_alg(
    payload: Vec<u8>,
    key: &Es256SigningKey,
    alg: iana::Algorithm,
) -> CoseSign1 {
    let mut sign1 = CoseSign1Builder::new()
        .protected(HeaderBuilder::new().algorithm(alg).build())
        .payload(payload)
        .build();
    let tbs = sign1.tbs_data(&[]);
    sign1.signature = key.sign(&tbs).to_vec();
    sign1
}
