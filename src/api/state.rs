use axum::extract::FromRef;
use secrecy::Secret;
use std::sync::Arc;

use crate::services::{engine::AttendanceEngine, relay::Relay, roster::RosterStore};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: AttendanceEngine,
    pub relay: Relay,
    pub api_token: Arc<Secret<String>>,
}

impl AppState {
    pub fn new(store: Arc<dyn RosterStore>, relay: Relay, api_token: Secret<String>) -> Self {
        Self {
            engine: AttendanceEngine::new(store),
            relay,
            api_token: Arc::new(api_token),
        }
    }

    pub fn store(&self) -> &Arc<dyn RosterStore> {
        self.engine.store()
    }
}

impl FromRef<AppState> for Relay {
    fn from_ref(state: &AppState) -> Relay {
        state.relay.clone()
    }
}
