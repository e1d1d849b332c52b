use std::sync::Arc;

use crate::database::TransactionStore;
use crate::services::pesaflux::PesaFluxService;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub gateway: Arc<PesaFluxService>,
}

impl AppState {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<PesaFluxService>) -> Self {
        AppState { store, gateway }
    }
}
