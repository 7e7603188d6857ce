use std::{path::Path, sync::Arc};

use crate::{
    auth::TokenVerifier,
    engine::Engine,
    leaderboard::Leaderboard,
    ledger::Ledger,
    store::{Store, StoreResult},
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<Store>,
    pub verifier: TokenVerifier,
}

impl AppState {
    /// Fresh ledger and books; trade history is reopened from `db_path`.
    pub fn new(db_path: impl AsRef<Path>, jwt_secret: &str) -> StoreResult<Self> {
        let engine = Engine::new(Arc::new(Ledger::new()), Arc::new(Leaderboard::new()));
        Ok(Self {
            engine: Arc::new(engine),
            store: Arc::new(Store::open(db_path)?),
            verifier: TokenVerifier::new(jwt_secret),
        })
    }
}
