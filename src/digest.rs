//! Digest-and-sign engine (spec §4.2).
//!
//! Operates on a pair of field names — `("Digest", "Signature")` for a
//! server descriptor, `("DirectoryDigest", "DirectorySignature")` for a
//! directory header — locating the first line matching each, blanking its
//! value before hashing, and (in sign mode) splicing the base64-encoded
//! digest and signature back in.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::crypto::{self, Keypair, PublicKey};
use crate::error::CryptoError;

/// Blank the first line starting with `field_a:` and the first line
/// starting with `field_b:` to just `field_name:` (value removed). Lines
/// are matched in document order; each field is blanked at most once.
pub fn strip_fields(canonical_text: &str, field_a: &str, field_b: &str) -> String {
    let prefix_a = format!("{field_a}:");
    let prefix_b = format!("{field_b}:");
    let mut found_a = false;
    let mut found_b = false;
    let mut out = String::with_capacity(canonical_text.len());
    for line in canonical_text.split_inclusive('\n') {
        let bare = line.trim_end_matches('\n');
        if !found_a && bare.starts_with(&prefix_a) {
            out.push_str(&prefix_a);
            out.push('\n');
            found_a = true;
        } else if !found_b && bare.starts_with(&prefix_b) {
            out.push_str(&prefix_b);
            out.push('\n');
            found_b = true;
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Digest mode: strip `field_a`/`field_b`, SHA-1 the result.
pub fn digest(canonical_text: &str, field_a: &str, field_b: &str) -> [u8; crypto::DIGEST_LEN] {
    let stripped = strip_fields(canonical_text, field_a, field_b);
    crypto::sha1(stripped.as_bytes())
}

/// Sign mode: compute the digest, sign it, and splice base64-encoded
/// `field_a: <digest>` / `field_b: <signature>` lines back into the
/// blanked text. Returns the spliced text and the raw digest.
pub fn sign(
    canonical_text: &str,
    field_a: &str,
    field_b: &str,
    keypair: &Keypair,
) -> Result<(String, [u8; crypto::DIGEST_LEN]), CryptoError> {
    let stripped = strip_fields(canonical_text, field_a, field_b);
    let digest = crypto::sha1(stripped.as_bytes());
    let signature = keypair.sign_digest(&digest)?;

    let prefix_a = format!("{field_a}:");
    let prefix_b = format!("{field_b}:");
    let line_a = format!("{field_a}: {}\n", BASE64.encode(digest));
    let line_b = format!("{field_b}: {}\n", BASE64.encode(&signature));

    let mut out = String::with_capacity(stripped.len() + line_a.len() + line_b.len());
    for line in stripped.split_inclusive('\n') {
        let bare = line.trim_end_matches('\n');
        if bare == prefix_a {
            out.push_str(&line_a);
        } else if bare == prefix_b {
            out.push_str(&line_b);
        } else {
            out.push_str(line);
        }
    }
    Ok((out, digest))
}

/// Recover the base64-encoded value of the field named `field`, from its
/// (unblanked) line in `canonical_text`.
pub fn field_value<'a>(canonical_text: &'a str, field: &str) -> Option<&'a str> {
    let prefix = format!("{field}:");
    for line in canonical_text.lines() {
        if let Some(rest) = line.strip_prefix(&prefix) {
            return Some(rest.trim());
        }
    }
    None
}

/// Verify that `signature_b64` (the raw value of `field_b`'s line) is a
/// valid signature over the digest of `canonical_text` with `field_a`/
/// `field_b` blanked, under `identity`. Returns the digest on success.
pub fn verify(
    canonical_text: &str,
    field_a: &str,
    field_b: &str,
    identity: &PublicKey,
    signature_b64: &str,
) -> Result<[u8; crypto::DIGEST_LEN], CryptoError> {
    let expected = digest(canonical_text, field_a, field_b);
    let signature = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    identity.verify_digest(&expected, &signature)?;
    Ok(expected)
}
