//! Wires together the shared, process-wide collaborators every reconciler
//! needs: the Kubernetes client, configuration, the dynamic watcher/cache,
//! the provider registry, the handle indices and the template engine.

use kube::Client;
use std::sync::Arc;

use crate::config::Config;
use crate::handles::index::HandleIndex;
use crate::providers::ProviderRegistry;
use crate::template::Engine;
use crate::watcher::ResourceWatcher;

pub struct AppContext {
    pub client: Client,
    pub config: Config,
    pub watcher: Arc<ResourceWatcher>,
    pub providers: Arc<ProviderRegistry>,
    pub handles: Arc<HandleIndex>,
    pub template: Engine,
}

impl AppContext {
    pub fn new(
        client: Client,
        config: Config,
        watcher: Arc<ResourceWatcher>,
        providers: Arc<ProviderRegistry>,
        handles: Arc<HandleIndex>,
    ) -> Arc<Self> {
        Arc::new(AppContext {
            client,
            config,
            watcher,
            providers,
            handles,
            template: Engine::new(),
        })
    }
}
