// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{anyhow, bail, Result};
use data_encoding::BASE64;

use crate::environment::Cancel;

/// Encrypts the plaintext of `fn::secret` expressions. The engine never
/// invokes an Encrypter itself; it exists so that tooling which rewrites
/// definitions can produce ciphertext the paired [`Decrypter`] will accept.
pub trait Encrypter: Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Decrypts the ciphertext of `fn::secret` expressions. Implementations
/// should return promptly once `cancel` fires.
pub trait Decrypter: Sync {
    fn decrypt(&self, ciphertext: &[u8], cancel: &Cancel) -> Result<Vec<u8>>;
}

// Ciphertext is carried in definitions as base64(envelope), where the
// envelope is the magic string "envx", a big-endian u32 version, the raw
// ciphertext, and a trailing big-endian CRC32C of everything before it.
const ENVELOPE_MAGIC: &[u8; 4] = b"envx";
const ENVELOPE_VERSION: u32 = 1;
const ENVELOPE_OVERHEAD: usize = 12;

/// Wraps raw ciphertext in the envelope format used by `fn::secret`.
pub fn encode_ciphertext(ciphertext: &[u8]) -> String {
    let mut envelope = Vec::with_capacity(ENVELOPE_OVERHEAD + ciphertext.len());
    envelope.extend_from_slice(ENVELOPE_MAGIC);
    envelope.extend_from_slice(&ENVELOPE_VERSION.to_be_bytes());
    envelope.extend_from_slice(ciphertext);
    let checksum = crc32c::crc32c(&envelope);
    envelope.extend_from_slice(&checksum.to_be_bytes());
    BASE64.encode(&envelope)
}

/// Unwraps an envelope produced by [`encode_ciphertext`] and returns the raw
/// ciphertext within.
pub fn decode_ciphertext(repr: &str) -> Result<Vec<u8>> {
    let envelope = BASE64
        .decode(repr.as_bytes())
        .map_err(|e| anyhow!("decoding base64 string: {e}"))?;
    if envelope.len() < ENVELOPE_OVERHEAD {
        bail!("truncated envelope");
    }

    let (body, tail) = envelope.split_at(envelope.len() - 4);
    let checksum = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
    if crc32c::crc32c(body) != checksum {
        bail!("invalid checksum");
    }

    if &body[..4] != ENVELOPE_MAGIC {
        bail!("invalid header");
    }
    let version = u32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    if version != ENVELOPE_VERSION {
        bail!("unsupported version {version}");
    }

    Ok(body[8..].to_vec())
}
