use kube::CustomResourceExt;
use poolboy_types::*;
use std::fs;

fn main() {
    fs::create_dir_all("../crds").unwrap();
    fs::write(
        "../crds/poolboy.gpte.redhat.com_resourceproviders_crd.yaml",
        serde_yaml::to_string(&ResourceProvider::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/poolboy.gpte.redhat.com_resourceclaims_crd.yaml",
        serde_yaml::to_string(&ResourceClaim::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/poolboy.gpte.redhat.com_resourcehandles_crd.yaml",
        serde_yaml::to_string(&ResourceHandle::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/poolboy.gpte.redhat.com_resourcepools_crd.yaml",
        serde_yaml::to_string(&ResourcePool::crd()).unwrap(),
    )
    .unwrap();
}
