//! SP800-108 counter-mode KDF with HMAC as the PRF.
//!
//! Each block is `HMAC(ShSe, i || "FIDO-KDF" || 0x00 || "AutomaticOnboardTunnel" || contextRand || L)`,
//! with a one-byte counter starting at 1 and `L` the output length in bits
//! (2 bytes, big-endian).

use crate::error::{CryptoError, CryptoResult};
use crate::hash::{hmac_sha256, hmac_sha384};
use zeroize::Zeroizing;

const LABEL: &[u8] = b"FIDO-KDF";
const CONTEXT: &[u8] = b"AutomaticOnboardTunnel";

/// PRF used by the KDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfPrf {
    HmacSha256,
    HmacSha384,
}

impl KdfPrf {
    const fn block_len(self) -> usize {
        match self {
            Self::HmacSha256 => 32,
            Self::HmacSha384 => 48,
        }
    }

    fn mac(self, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
        match self {
            Self::HmacSha256 => hmac_sha256(key, data),
            Self::HmacSha384 => hmac_sha384(key, data),
        }
    }
}

/// Derive `out_len` bytes of key material from the shared secret.
///
/// # Errors
/// Fails if `out_len` needs more than 255 blocks or does not fit the 16-bit length field.
pub fn derive(
    prf: KdfPrf,
    shared_secret: &[u8],
    context_rand: &[u8],
    out_len: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let bits = out_len
        .checked_mul(8)
        .and_then(|b| u16::try_from(b).ok())
        .ok_or_else(|| CryptoError::unsupported("kdf output length", out_len))?;
    let blocks = out_len.div_ceil(prf.block_len());
    if blocks > usize::from(u8::MAX) {
        return Err(CryptoError::unsupported("kdf output length", out_len));
    }

    let mut out = Zeroizing::new(Vec::with_capacity(blocks * prf.block_len()));
    for counter in 1..=blocks {
        let mut input = Vec::with_capacity(1 + LABEL.len() + 1 + CONTEXT.len() + context_rand.len() + 2);
        #[allow(clippy::cast_possible_truncation)]
        input.push(counter as u8);
        input.extend_from_slice(LABEL);
        input.push(0x00);
        input.extend_from_slice(CONTEXT);
        input.extend_from_slice(context_rand);
        input.extend_from_slice(&bits.to_be_bytes());
        let block = Zeroizing::new(prf.mac(shared_secret, &input)?);
        out.extend_from_slice(&block);
    }
    out.truncate(out_len);
    Ok(out)
}
