//! JSON Patch pinning container images to their scanned digests
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use serde_json::Value;

use crate::{image, DigestMapping, PodObject};

/// Prefix of the annotations recording each rewrite.
pub const ANNOTATION_PREFIX: &str = "admission.sysdig.com";

/// Annotation key holding the image reference of container `index` (0-based)
/// before it was pinned.
pub fn original_image_annotation(index: usize) -> String {
    format!("{ANNOTATION_PREFIX}/container-{}-original-image", index + 1)
}

/// Annotation key holding the pinned reference of container `index` (0-based).
pub fn mutated_image_annotation(index: usize) -> String {
    format!("{ANNOTATION_PREFIX}/container-{}-mutated-image", index + 1)
}

fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}

/// Build the patch that rewrites every container image with a resolved digest
/// to `<repository>@<digest>` and records the rewrite in annotations.
///
/// Containers already pinned to a digest, and containers whose image has no
/// entry in `digests`, are left alone. The annotation object is created once,
/// before the first rewrite, when the pod has none. A pod with nothing to
/// rewrite yields an empty patch.
pub fn build_patch(pod: &PodObject, digests: &DigestMapping) -> Patch {
    let mut ops = Vec::new();
    for (i, container) in pod.containers.iter().enumerate() {
        if image::is_digest_pinned(&container.image) {
            continue;
        }
        let Some(digest) = digests.get(&container.image) else {
            continue;
        };

        if ops.is_empty() && !pod.has_annotations() {
            ops.push(PatchOperation::Add(AddOperation {
                path: PointerBuf::from_tokens(["metadata", "annotations"]),
                value: Value::Object(Default::default()),
            }));
        }

        let pinned = image::pin(&container.image, digest);
        tracing::info!(
            pod = %pod.display_name(),
            container = %container.name,
            original = %container.image,
            mutated = %pinned,
            "pinning container image to digest"
        );
        ops.push(PatchOperation::Replace(ReplaceOperation {
            path: PointerBuf::from_tokens(["spec", "containers", &*i.to_string(), "image"]),
            value: Value::String(pinned.clone()),
        }));
        ops.push(PatchOperation::Add(AddOperation {
            path: annotation_path(&original_image_annotation(i)),
            value: Value::String(container.image.clone()),
        }));
        ops.push(PatchOperation::Add(AddOperation {
            path: annotation_path(&mutated_image_annotation(i)),
            value: Value::String(pinned),
        }));
    }
    Patch(ops)
}
