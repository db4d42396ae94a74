pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod scraper;
pub mod status;
pub mod validator;

use std::sync::Arc;
use jobs::Orchestrator;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}
