//! Minimal views of the pod under admission
//!
//! The pipeline only needs the ordered container list, the annotation set and
//! the raw object for policies, so the webhook decodes the Kubernetes object
//! once and hands over this shape.
use std::collections::BTreeMap;

use serde_json::Value;

/// One container of the pod spec.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerObject {
    /// Container name.
    pub name: String,
    /// Image reference as written in the pod spec.
    pub image: String,
    /// The container as JSON, handed to per-container policies.
    pub raw: Value,
}

impl ContainerObject {
    /// A container with the given name and image and no extra fields.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let name = name.into();
        let image = image.into();
        let raw = serde_json::json!({ "name": name, "image": image });
        Self { name, image, raw }
    }
}

/// The pod being admitted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodObject {
    /// `metadata.name`, empty on CREATE requests relying on `generateName`.
    pub name: Option<String>,
    /// `metadata.generateName`.
    pub generate_name: Option<String>,
    /// `metadata.namespace`.
    pub namespace: Option<String>,
    /// `metadata.annotations`; `None` when the field is absent.
    pub annotations: Option<BTreeMap<String, String>>,
    /// `spec.containers`, in spec order.
    pub containers: Vec<ContainerObject>,
    /// The whole pod as JSON, handed to policies.
    pub raw: Value,
}

impl PodObject {
    /// Whether the pod carries at least one annotation.
    ///
    /// An empty map counts as no annotations: a JSON Patch adding a key below
    /// `/metadata/annotations` still needs the object to exist.
    pub fn has_annotations(&self) -> bool {
        self.annotations.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Name used in log lines.
    pub fn display_name(&self) -> String {
        match (&self.name, &self.generate_name) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(prefix)) if !prefix.is_empty() => format!("{prefix}*"),
            _ => "<Not yet generated>".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_name() {
        let mut pod = PodObject {
            name: Some("web".into()),
            generate_name: Some("web-".into()),
            ..Default::default()
        };
        assert_eq!(pod.display_name(), "web");

        pod.name = Some(String::new());
        assert_eq!(pod.display_name(), "web-*");

        pod.generate_name = None;
        assert_eq!(pod.display_name(), "<Not yet generated>");
    }

    #[test]
    fn empty_annotations_count_as_absent() {
        let mut pod = PodObject::default();
        assert!(!pod.has_annotations());
        pod.annotations = Some(BTreeMap::new());
        assert!(!pod.has_annotations());
        pod.annotations = Some(BTreeMap::from([("team".to_owned(), "a".to_owned())]));
        assert!(pod.has_annotations());
    }
}
