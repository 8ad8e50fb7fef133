//! Conversions between the tagged `Value` tree used for template rendering
//! and the `DynamicObject`/API calls needed to create and patch downstream
//! Kubernetes resources of arbitrary, discovered-at-runtime kinds.

use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::{discovery, Client};
use poolboy_types::Value;

use crate::util::Error;

pub async fn api_for(
    client: &Client,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
) -> Result<Api<DynamicObject>, Error> {
    let gvk = match api_version.split_once('/') {
        Some((group, version)) => kube::core::GroupVersionKind::gvk(group, version, kind),
        None => kube::core::GroupVersionKind::gvk("", api_version, kind),
    };
    let (ar, caps) = discovery::pinned_kind(client, &gvk).await?;
    Ok(match (namespace, caps.scope) {
        (Some(ns), kube::discovery::Scope::Namespaced) => Api::namespaced_with(client.clone(), ns, &ar),
        _ => Api::all_with(client.clone(), &ar),
    })
}

pub fn to_dynamic_object(value: &Value) -> Result<DynamicObject, Error> {
    let json: serde_json::Value = value.clone().into();
    Ok(serde_json::from_value(json)?)
}

pub fn from_dynamic_object(obj: &DynamicObject) -> Value {
    serde_json::to_value(obj).map(Value::from).unwrap_or(Value::Null)
}

pub async fn create(
    client: &Client,
    api_version: &str,
    kind: &str,
    namespace: Option<&str>,
    definition: &Value,
) -> Result<DynamicObject, Error> {
    let api = api_for(client, api_version, kind, namespace).await?;
    let obj = to_dynamic_object(definition)?;
    Ok(api.create(&PostParams::default(), &obj).await?)
}

pub async fn get(
    client: &Client,
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Result<Option<DynamicObject>, Error> {
    let api = api_for(client, api_version, kind, namespace).await?;
    Ok(api.get_opt(name).await?)
}

pub async fn apply_patch(
    client: &Client,
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
    ops: Vec<crate::jsonpatch::PatchOp>,
) -> Result<(), Error> {
    if ops.is_empty() {
        return Ok(());
    }
    let api = api_for(client, api_version, kind, namespace).await?;
    let patch = Patch::Json::<DynamicObject>(json_patch::Patch(
        ops.into_iter()
            .map(|op| serde_json::from_value(serde_json::to_value(op).unwrap()).unwrap())
            .collect(),
    ));
    api.patch(name, &PatchParams::apply("poolboy"), &patch).await?;
    Ok(())
}

pub async fn delete(
    client: &Client,
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: Option<&str>,
) -> Result<(), Error> {
    let api = api_for(client, api_version, kind, namespace).await?;
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(e) if matches!(&e, kube::Error::Api(r) if r.code == 404) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
