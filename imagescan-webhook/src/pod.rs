//! Conversion of admission requests into the pipeline's pod view
use imagescan_core::{AdmissionContext, ContainerObject, PodObject};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{admission::AdmissionRequest, DynamicObject, GroupVersionResource};
use serde_json::Value;

use crate::review::ReviewError;

/// Whether the request targets core `v1` pods.
pub fn is_pod_resource(resource: &GroupVersionResource) -> bool {
    resource.group.is_empty() && resource.version == "v1" && resource.resource == "pods"
}

/// Decode the pod of an admission request.
///
/// Fails if the request is not about `v1/pods`, carries no object, or the
/// object is not a pod.
pub fn extract(req: &AdmissionRequest<DynamicObject>) -> Result<(AdmissionContext, PodObject), ReviewError> {
    if !is_pod_resource(&req.resource) {
        let gvr = &req.resource;
        let resource = if gvr.group.is_empty() {
            format!("{}/{}", gvr.version, gvr.resource)
        } else {
            format!("{}/{}/{}", gvr.group, gvr.version, gvr.resource)
        };
        return Err(ReviewError::WrongResource(resource));
    }
    let object = req.object.as_ref().ok_or(ReviewError::MissingObject)?;
    let raw = serde_json::to_value(object).map_err(ReviewError::DecodePod)?;
    let pod: Pod = serde_json::from_value(raw.clone()).map_err(ReviewError::DecodePod)?;

    let containers = pod
        .spec
        .map(|spec| spec.containers)
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, container)| ContainerObject {
            raw: raw
                .pointer(&format!("/spec/containers/{i}"))
                .cloned()
                .unwrap_or(Value::Null),
            name: container.name,
            image: container.image.unwrap_or_default(),
        })
        .collect();

    let pod = PodObject {
        name: pod.metadata.name,
        generate_name: pod.metadata.generate_name,
        namespace: pod.metadata.namespace.or_else(|| req.namespace.clone()),
        annotations: pod.metadata.annotations,
        containers,
        raw,
    };

    let mut context = AdmissionContext::new(req.uid.clone())
        .raw(serde_json::to_value(req).map_err(ReviewError::EncodeRequest)?);
    if let Some(namespace) = &req.namespace {
        context = context.namespace(namespace.clone());
    }
    Ok((context, pod))
}
