use crate::client::TorBoxClient;
use crate::config::Settings;
use crate::downloads::ActiveOperations;
use crate::processor::FileProcessor;
use crate::tracker::JobTracker;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub client: TorBoxClient,
    pub tracker: JobTracker,
    pub processor: FileProcessor,
    pub active: ActiveOperations,
    /// Jobs with a download-link request or transfer underway.
    pub in_flight: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(settings: Settings, client: TorBoxClient, processor: FileProcessor) -> Self {
        Self {
            settings,
            client,
            tracker: JobTracker::new(),
            processor,
            active: ActiveOperations::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}
