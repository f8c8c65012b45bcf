//! Engine wiring: journal, controller and factory built from one config.

use crate::config::EngineConfig;
use crate::lifecycle::{
    AssetLedger, Clock, EventJournal, LifecycleController, MemoryJournal, PoolPairFactory,
    SqliteJournal,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub struct Engine {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub journal: Arc<dyn EventJournal>,
    pub controller: Arc<LifecycleController>,
    pub factory: Arc<PoolPairFactory>,
}

impl Engine {
    pub fn build(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        asset: Arc<dyn AssetLedger>,
    ) -> Result<Self> {
        config.validate()?;

        let journal: Arc<dyn EventJournal> = match &config.journal.sqlite_path {
            Some(path) => {
                info!(path = %path, "using sqlite event journal");
                Arc::new(SqliteJournal::open(path).context("open event journal")?)
            }
            None => Arc::new(MemoryJournal::new()),
        };

        let controller = Arc::new(LifecycleController::new(
            config.controller_config(),
            Arc::clone(&clock),
            Arc::clone(&journal),
        ));
        let factory = Arc::new(PoolPairFactory::new(
            config.factory_address(),
            asset,
            Arc::clone(&controller),
        ));

        Ok(Self {
            config,
            clock,
            journal,
            controller,
            factory,
        })
    }
}
