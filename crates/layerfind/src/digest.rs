//! Content addressing for layer stores.
//!
//! Image metadata identifies each layer by its *diff id*, the sha256 of the
//! uncompressed layer tarball.  Layer stores key their content by *chain id*
//! instead, which covers a layer together with every layer below it:
//!
//! ```text
//! chain_id(0) = diff_id(0)
//! chain_id(n) = "sha256:" + hex(sha256(chain_id(n-1) + " " + diff_id(n)))
//! ```
//!
//! Both operands are hashed with their `sha256:` prefix intact.  Dropping the
//! prefix produces ids that exist in no layer store.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Algorithm prefix carried by every digest string.
pub const SHA256_PREFIX: &str = "sha256:";

/// A SHA-256 digest in binary.
pub type Sha256Digest = [u8; 32];

/// Parse a string containing a SHA256 digest in hexadecimal form into a [`Sha256Digest`].
///
/// The string must contain exactly 64 characters and consist entirely of [0-9a-f], case
/// insensitive.
pub fn parse_sha256(string: impl AsRef<str>) -> Result<Sha256Digest> {
    let string = string.as_ref();
    let mut value = [0u8; 32];
    hex::decode_to_slice(string, &mut value)
        .map_err(|_| Error::InvalidDigest(string.to_string()))?;
    Ok(value)
}

/// Strips the `sha256:` prefix from `digest`, checking that the remainder is a
/// well-formed hex digest.
pub fn strip_algorithm(digest: &str) -> Result<&str> {
    let Some(hex) = digest.strip_prefix(SHA256_PREFIX) else {
        return Err(Error::InvalidDigest(digest.to_string()));
    };
    parse_sha256(hex).map_err(|_| Error::InvalidDigest(digest.to_string()))?;
    Ok(hex)
}

/// Returns `"sha256:<hex>"` for the given bytes.
pub fn hash(bytes: &[u8]) -> String {
    let mut context = Sha256::new();
    context.update(bytes);
    format!("{SHA256_PREFIX}{}", hex::encode(context.finalize()))
}

/// Computes the chain id of a layer from its parent's chain id and its own diff id.
pub fn chain_id(parent_chain_id: &str, diff_id: &str) -> String {
    let mut context = Sha256::new();
    context.update(parent_chain_id.as_bytes());
    context.update(b" ");
    context.update(diff_id.as_bytes());
    format!("{SHA256_PREFIX}{}", hex::encode(context.finalize()))
}
