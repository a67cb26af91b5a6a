use crate::academics::{CachedPeriod, PeriodCache, PeriodKey, PeriodService};
use crate::cache::Cache;
use crate::config::Config;
use crate::db::{PoolOptions, Store};
use crate::promotions::PromotionEngine;
use crate::roster::Roster;
use parking_lot::RwLock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything bound to one open workspace database.
pub struct Workspace {
    pub path: PathBuf,
    pub store: Arc<Store>,
    pub periods: PeriodService,
    pub roster: Roster,
    pub promotions: PromotionEngine,
}

impl Workspace {
    /// Opens the database and fills a fresh period cache from it.
    pub fn open(path: &Path, options: PoolOptions) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(path, options)?);
        let cache: Arc<PeriodCache> = Arc::new(Cache::<PeriodKey, CachedPeriod>::new());
        let periods = PeriodService::new(Arc::clone(&store), cache);
        periods.warm_cache()?;
        Ok(Self {
            path: path.to_path_buf(),
            roster: Roster::new(Arc::clone(&store), periods.clone()),
            promotions: PromotionEngine::new(Arc::clone(&store)),
            periods,
            store,
        })
    }
}

/// Shared by every request worker; only `workspace.select` takes the write lock.
pub struct AppState {
    pub config: Config,
    workspace: RwLock<Option<Arc<Workspace>>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: RwLock::new(None),
        }
    }

    pub fn workspace(&self) -> Option<Arc<Workspace>> {
        self.workspace.read().clone()
    }

    pub fn replace_workspace(&self, ws: Workspace) -> Arc<Workspace> {
        let ws = Arc::new(ws);
        *self.workspace.write() = Some(Arc::clone(&ws));
        ws
    }
}
