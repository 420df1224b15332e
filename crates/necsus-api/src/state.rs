use std::sync::Arc;

use necsus_db::Store;
use necsus_engine::Dispatcher;
use necsus_gateway::Broker;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(dispatcher: Dispatcher) -> AppState {
        Arc::new(Self { dispatcher })
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.dispatcher.store().clone()
    }

    pub fn broker(&self) -> &Broker {
        self.dispatcher.broker()
    }
}
