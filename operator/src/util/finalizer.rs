use kube::{
    api::{Patch, Resource},
    core::NamespaceResourceScope,
    Api, Client, Error,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::{clone::Clone, fmt::Debug};

/// Name of the finalizer this operator places on ResourceHandles and
/// ResourcePools to guard their cascading delete.
pub const FINALIZER_NAME: &str = "poolboy.gpte.redhat.com/finalizer";

/// Adds the finalizer to a `T` kind of resource. If it is already present,
/// this is a no-op merge-patch.
pub async fn add<T: Clone + Resource + Serialize + DeserializeOwned + Debug>(
    client: Client,
    name: &str,
    namespace: &str,
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    let finalizer: Value = json!({
        "metadata": {
            "finalizers": [FINALIZER_NAME]
        }
    });
    let patch: Patch<&Value> = Patch::Merge(&finalizer);
    Ok(api.patch(name, &Default::default(), &patch).await?)
}

/// Removes all finalizers from a `T` resource.
pub async fn delete<T: Clone + Resource + Serialize + DeserializeOwned + Debug>(
    client: Client,
    name: &str,
    namespace: &str,
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    let finalizer: Value = json!({
        "metadata": {
            "finalizers": null
        }
    });
    let patch: Patch<&Value> = Patch::Merge(&finalizer);
    Ok(api.patch(name, &Default::default(), &patch).await?)
}
