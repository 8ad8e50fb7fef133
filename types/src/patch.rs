use crate::claim::{ResourceClaim, ResourceClaimStatus};
use crate::handle::{ResourceHandle, ResourceHandleStatus};
use crate::pool::{ResourcePool, ResourcePoolStatus};
use crate::provider::{ResourceProvider, ResourceProviderStatus};
use kube::{
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
    Api, Client, Error,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{clone::Clone, fmt::Debug};

pub trait Object<S: Status> {
    fn mut_status(&mut self) -> &mut S;
}

/// Hook for status types that track a `lastUpdated` timestamp; types that
/// don't carry one (claims, handles, pools publish their own timestamped
/// sub-fields instead) can leave the default no-op.
pub trait Status {
    fn set_last_updated(&mut self, _last_updated: String) {}
}

impl Object<ResourceClaimStatus> for ResourceClaim {
    fn mut_status(&mut self) -> &mut ResourceClaimStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
impl Status for ResourceClaimStatus {}

impl Object<ResourceHandleStatus> for ResourceHandle {
    fn mut_status(&mut self) -> &mut ResourceHandleStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
impl Status for ResourceHandleStatus {}

impl Object<ResourcePoolStatus> for ResourcePool {
    fn mut_status(&mut self) -> &mut ResourcePoolStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
impl Status for ResourcePoolStatus {}

impl Object<ResourceProviderStatus> for ResourceProvider {
    fn mut_status(&mut self) -> &mut ResourceProviderStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
impl Status for ResourceProviderStatus {
    fn set_last_updated(&mut self, last_updated: String) {
        self.last_updated = Some(last_updated);
    }
}

/// Patch the resource's status object with the provided function. The
/// function is passed a mutable reference to the status object, which is
/// to be mutated in-place.
pub async fn patch_status<
    S: Status,
    T: Clone + Resource + Object<S> + Serialize + DeserializeOwned + Debug,
>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        status.set_last_updated(chrono::Utc::now().to_rfc3339());
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    Ok(api
        .patch_status(name, &PatchParams::apply("controller"), &patch)
        .await?)
}
