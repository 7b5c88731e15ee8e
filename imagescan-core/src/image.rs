//! Helpers for container image references
//!
//! References come in two shapes: `repo[:tag]` and the digest-pinned
//! `repo@sha256:<hex>`. Pinned references are never rescanned or rewritten.

/// Marker that identifies an image reference already pinned to a digest.
pub const DIGEST_MARKER: &str = "@sha256:";

/// Whether the reference is already pinned to a content digest.
pub fn is_digest_pinned(image: &str) -> bool {
    image.contains(DIGEST_MARKER)
}

/// The repository part of a reference, with any trailing `:tag` removed.
///
/// A colon before the last `/` belongs to a registry host port
/// (`localhost:5000/app`) and is kept.
pub fn repository(image: &str) -> &str {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].find(':') {
        Some(colon) => &image[..name_start + colon],
        None => image,
    }
}

/// The reference rewritten to point at `digest`: `<repository>@<digest>`.
pub fn pin(image: &str, digest: &str) -> String {
    format!("{}@{}", repository(image), digest)
}
