use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::JobPublisher;
use crate::modules::clips::repository::ClipLookup;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: Arc<dyn JobPublisher>,
    pub clips: Arc<dyn ClipLookup>,
}

impl AppState {
    pub fn new(config: AppConfig, queue: Arc<dyn JobPublisher>, clips: Arc<dyn ClipLookup>) -> Self {
        Self {
            config,
            queue,
            clips,
        }
    }
}
