use std::sync::Arc;

use sproutpay::settlement::SettlementNetwork;

use crate::config::SproutConfig;
use crate::db::Database;
use crate::machine::StatusMachine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SproutConfig>,
    pub db: Arc<Database>,
    pub network: Arc<dyn SettlementNetwork>,
    pub machine: Arc<StatusMachine>,
}

impl AppState {
    pub fn new(config: SproutConfig, db: Database, network: Arc<dyn SettlementNetwork>) -> Self {
        let db = Arc::new(db);
        let machine = StatusMachine::new(db.clone(), network.clone(), config.virtual_channel_fallback);
        Self::with_machine(config, db, network, machine)
    }

    pub fn with_machine(
        config: SproutConfig,
        db: Arc<Database>,
        network: Arc<dyn SettlementNetwork>,
        machine: StatusMachine,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            network,
            machine: Arc::new(machine),
        }
    }
}
