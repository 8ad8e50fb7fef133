//! ResourceProvider registry (spec §4.2): an in-memory index of providers,
//! kept current by the watcher's dispatch callback, plus the matching and
//! template-diff operations every other reconciler consults.

use crate::jsonpatch::jsonpatch_from_diff;
use crate::util::Error;
use kube::api::{Api, ListParams};
use kube::Client;
use poolboy_types::{ResourceProvider, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct ProviderRegistry {
    client: Client,
    namespace: String,
    providers: RwLock<HashMap<String, Arc<ResourceProvider>>>,
}

impl ProviderRegistry {
    pub fn new(client: Client, namespace: String) -> Arc<Self> {
        Arc::new(ProviderRegistry {
            client,
            namespace,
            providers: RwLock::new(HashMap::new()),
        })
    }

    /// Lists all providers in the operator namespace and populates the
    /// index. Called once at startup, before the watch for ResourceProvider
    /// is started, so `Get`/`FindByTemplateMatch` never race an empty cache.
    pub async fn preload(&self) -> Result<(), Error> {
        let api: Api<ResourceProvider> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut providers = self.providers.write().await;
        providers.clear();
        let mut continue_token = None;
        loop {
            let lp = ListParams {
                limit: Some(50),
                continue_token: continue_token.clone(),
                ..Default::default()
            };
            let list = api.list(&lp).await?;
            for p in list.items {
                if let Some(name) = p.metadata.name.clone() {
                    providers.insert(name, Arc::new(p));
                }
            }
            match list.metadata.continue_.clone() {
                Some(tok) if !tok.is_empty() => continue_token = Some(tok),
                _ => break,
            }
        }
        Ok(())
    }

    pub async fn upsert(&self, provider: ResourceProvider) {
        if let Some(name) = provider.metadata.name.clone() {
            self.providers.write().await.insert(name, Arc::new(provider));
        }
    }

    pub async fn remove(&self, name: &str) {
        self.providers.write().await.remove(name);
    }

    /// Returns the cached provider, falling back to a namespaced read when
    /// the registry hasn't observed it yet (e.g. right after creation, before
    /// the watch event arrives).
    pub async fn get(&self, name: &str) -> Result<Option<Arc<ResourceProvider>>, Error> {
        if let Some(p) = self.providers.read().await.get(name).cloned() {
            return Ok(Some(p));
        }
        let api: Api<ResourceProvider> = Api::namespaced(self.client.clone(), &self.namespace);
        match api.get_opt(name).await? {
            Some(p) => {
                self.upsert(p.clone()).await;
                Ok(Some(Arc::new(p)))
            }
            None => Ok(None),
        }
    }

    /// Returns the unique provider whose `spec.match` is satisfied by
    /// `template` (`deep_merge(template, provider.match) == template`).
    /// Zero matches is retryable (providers may still be registering); more
    /// than one is a permanent configuration error.
    pub async fn find_by_template_match(&self, template: &Value) -> Result<Arc<ResourceProvider>, Error> {
        let providers = self.providers.read().await;
        let mut matches: Vec<Arc<ResourceProvider>> = Vec::new();
        for provider in providers.values() {
            if provider_matches(provider, template) {
                matches.push(provider.clone());
            }
        }
        match matches.len() {
            0 => Err(Error::temporary(
                "no ResourceProvider matches the requested template",
                std::time::Duration::from_secs(60),
            )),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(Error::permanent(format!(
                "{} ResourceProviders match the requested template, configuration is ambiguous",
                matches.len()
            ))),
        }
    }

    /// Computes the RFC-6902 diff of `claim_template` relative to
    /// `handle_template`, keeps only `add`/`replace` ops, and drops any op
    /// whose path matches one of `provider`'s `matchIgnore` regexes. Returns
    /// `None` if any non-ignored op remains — the templates disagree outside
    /// the ignored paths, so this is not a match. Otherwise returns
    /// `Some(vec![])`: the dropped (ignored) ops, kept only so callers can
    /// still report what was ignored.
    pub fn check_template_match(
        provider: &ResourceProvider,
        handle_template: &Value,
        claim_template: &Value,
    ) -> Option<Vec<crate::jsonpatch::PatchOp>> {
        let a: serde_json::Value = handle_template.clone().into();
        let b: serde_json::Value = claim_template.clone().into();
        let ops: Vec<_> = jsonpatch_from_diff(&a, &b, &[])
            .into_iter()
            .filter(|op| op.op == "add" || op.op == "replace")
            .collect();
        let ignore: Vec<Regex> = provider
            .spec
            .match_ignore
            .iter()
            .filter_map(|pat| Regex::new(&format!("^{}$", pat)).ok())
            .collect();
        let remaining: Vec<_> = ops
            .into_iter()
            .filter(|op| !ignore.iter().any(|re| re.is_match(&op.path)))
            .collect();
        if remaining.is_empty() {
            Some(remaining)
        } else {
            None
        }
    }
}

/// A provider is a match for `template` iff merging the provider's `match`
/// into the template is a no-op — i.e. every field the provider constrains
/// already agrees with the template.
fn provider_matches(provider: &ResourceProvider, template: &Value) -> bool {
    let Some(m) = &provider.spec.match_ else {
        return false;
    };
    let mut merged = template.clone();
    merged.deep_merge(m.clone());
    &merged == template
}

#[cfg(test)]
mod test {
    use super::*;
    use poolboy_types::{ProviderTemplate, ResourceProviderSpec};

    fn provider_with_match(m: Value) -> ResourceProvider {
        let mut p = ResourceProvider::new(
            "p",
            ResourceProviderSpec {
                match_: Some(m),
                template: ProviderTemplate {
                    definition: Value::Object(Default::default()),
                    enable: true,
                    style: Default::default(),
                },
                ..Default::default()
            },
        );
        p.metadata.name = Some("p".to_string());
        p
    }

    #[test]
    fn provider_matches_subset_template() {
        let provider = provider_with_match(serde_json::json!({"kind": "X"}).into());
        let template: Value = serde_json::json!({"kind": "X", "name": "a"}).into();
        assert!(provider_matches(&provider, &template));
    }

    #[test]
    fn provider_rejects_conflicting_template() {
        let provider = provider_with_match(serde_json::json!({"kind": "X"}).into());
        let template: Value = serde_json::json!({"kind": "Y"}).into();
        assert!(!provider_matches(&provider, &template));
    }

    #[test]
    fn check_template_match_ignores_configured_paths() {
        let mut provider = provider_with_match(serde_json::json!({"kind": "X"}).into());
        provider.spec.match_ignore = vec!["/metadata/name".to_string()];
        let handle_t: Value = serde_json::json!({"metadata": {"name": "a"}}).into();
        let claim_t: Value = serde_json::json!({"metadata": {"name": "b"}}).into();
        let ops = ProviderRegistry::check_template_match(&provider, &handle_t, &claim_t).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn check_template_match_rejects_unignored_diff() {
        let provider = provider_with_match(serde_json::json!({"kind": "X"}).into());
        let handle_t: Value = serde_json::json!({"foo": "bar"}).into();
        let claim_t: Value = serde_json::json!({"foo": "baz"}).into();
        assert!(ProviderRegistry::check_template_match(&provider, &handle_t, &claim_t).is_none());
    }
}
