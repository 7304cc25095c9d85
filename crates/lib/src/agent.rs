//! Agent wiring: open the config store and build the post-apply runner around it.
//! Shared by the HTTP API and the one-shot CLI commands.

use std::path::Path;
use std::sync::Arc;

use crate::command::PostApplyRunner;
use crate::config::{self, Config};
use crate::events::{AuditCounters, EventBus};
use crate::store::CfgDb;

/// Long-lived collaborators for one agent process.
pub struct Agent {
    pub store: Arc<CfgDb>,
    pub events: EventBus,
    pub counters: Arc<AuditCounters>,
    pub runner: Arc<PostApplyRunner>,
}

impl Agent {
    /// Open `cfgdb.json` under the data dir (empty store if missing) and build the runner.
    pub async fn open(config: &Config, config_path: &Path) -> Self {
        let path = config::store_path(config, config_path);
        log::debug!("opening config store at {}", path.display());
        Self::with_store(Arc::new(CfgDb::load(path).await))
    }

    pub fn with_store(store: Arc<CfgDb>) -> Self {
        let events = EventBus::new();
        let counters = Arc::new(AuditCounters::new());
        let runner = Arc::new(PostApplyRunner::new(
            store.clone(),
            store.clone(),
            events.clone(),
            counters.clone(),
        ));
        Self {
            store,
            events,
            counters,
            runner,
        }
    }
}
