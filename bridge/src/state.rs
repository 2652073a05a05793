use std::sync::Arc;
use std::time::Duration;

use crate::config::Mode;
use crate::dispatcher::ToolDispatcher;
use crate::gateway::Gateway;
use crate::identity::IdentityResolver;
use crate::manifest::Manifest;
use crate::resources::ResourceReader;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub identity: IdentityResolver,
    pub manifest: Arc<Manifest>,
    pub mode: Mode,
    pub ping_interval: Duration,
    /// Operator secret for `POST /link`. `None` disables HTTP linking.
    pub link_secret: Option<String>,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        identity: IdentityResolver,
        mode: Mode,
        ping_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            identity,
            manifest: Arc::new(Manifest::build()),
            mode,
            ping_interval,
            link_secret: None,
        }
    }

    pub fn with_link_secret(mut self, secret: Option<String>) -> Self {
        self.link_secret = secret;
        self
    }

    pub fn dispatcher(&self) -> ToolDispatcher {
        ToolDispatcher::new(self.gateway.clone(), self.identity.clone())
    }

    pub fn resources(&self) -> ResourceReader {
        ResourceReader::new(self.gateway.clone(), self.identity.clone())
    }
}
