//! Ownership tagging
//!
//! Every applied object carries the id of the service that owns it and the
//! digest of the manifest it was applied from. The id scopes diffs and
//! pruning to one service; the digest lets the diff skip unchanged objects
//! without comparing server-defaulted fields.
//!
//! The id is written both as an annotation (authoritative) and as a label
//! so live objects can be listed with a label selector.

use sherpack_core::Manifest;

use crate::annotations::sherpack;

/// Tag manifests with their owning service and content digest
///
/// The digest is computed before any tag is written so it only reflects
/// rendered content.
pub fn stamp(manifests: &mut [Manifest], service_id: &str) {
    for manifest in manifests.iter_mut() {
        let digest = manifest.digest();
        manifest.set_annotation(sherpack::SERVICE_ID, service_id);
        manifest.set_annotation(sherpack::DIGEST, &digest);
        manifest.set_label(sherpack::SERVICE_ID, service_id);
    }
}

/// Service id an object is tagged with
pub fn owner_of(manifest: &Manifest) -> Option<&str> {
    manifest
        .annotation(sherpack::SERVICE_ID)
        .filter(|id| !id.is_empty())
}

pub fn is_owned_by(manifest: &Manifest, service_id: &str) -> bool {
    owner_of(manifest) == Some(service_id)
}

/// Digest an object was applied from
pub fn applied_digest(manifest: &Manifest) -> Option<&str> {
    manifest.annotation(sherpack::DIGEST)
}

/// Keep only the objects owned by `service_id`
pub fn filter_owned<'a, I>(objects: I, service_id: &str) -> Vec<Manifest>
where
    I: IntoIterator<Item = &'a Manifest>,
{
    objects
        .into_iter()
        .filter(|m| is_owned_by(m, service_id))
        .cloned()
        .collect()
}

/// Label selector matching the objects of one service
pub fn owner_selector(service_id: &str) -> String {
    format!("{}={}", sherpack::SERVICE_ID, service_id)
}
