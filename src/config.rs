// Runtime settings resolved from the command line plus a couple of
// environment overrides. Everything downstream reads this value only.

use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_REGION: &str = "southcentralus";

/// Overrides the endpoint derived from the region (useful for proxies and tests).
pub const ENDPOINT_ENV: &str = "CUSTOM_VISION_ENDPOINT";
/// Overrides the location of the upload cache file.
pub const DATABASE_ENV: &str = "CVTRAINER_DATABASE";

const DATABASE_FILE: &str = "CognitiveServiceTrainerStorage.db";

/// What the run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Upload new images, then train.
    Sync,
    /// Delete every tagged image and tag of the project, and its cache entries.
    Delete,
    /// Print the projects visible with the training key.
    ListProjects,
    /// Download the project's tagged images into one folder per tag.
    GetImages,
    /// Forget every cached upload and tag, for all projects.
    PurgeCache,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: String,
    pub training_key: String,
    pub project_id: Option<Uuid>,
    pub folder: String,
    /// Zero means no constraint on that axis.
    pub max_width: u32,
    pub max_height: u32,
    pub mode: Mode,
    pub database: PathBuf,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    /// Pause after each uploaded batch.
    pub batch_pause: Duration,
    pub batch_size: usize,
    pub page_size: usize,
    pub show_progress: bool,
}

impl Settings {
    pub fn new(training_key: impl Into<String>, region: &str) -> Self {
        Settings {
            endpoint: std::env::var(ENDPOINT_ENV).unwrap_or_else(|_| endpoint_for_region(region)),
            training_key: training_key.into(),
            project_id: None,
            folder: ".".into(),
            max_width: 0,
            max_height: 0,
            mode: Mode::Sync,
            database: std::env::var(DATABASE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_database_path()),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            batch_pause: Duration::from_millis(500),
            batch_size: 32,
            page_size: 50,
            show_progress: true,
        }
    }

    pub fn resize_requested(&self) -> bool {
        self.max_width > 0 || self.max_height > 0
    }
}

pub fn endpoint_for_region(region: &str) -> String {
    format!("https://{}.api.cognitive.microsoft.com/customvision/v2.2/Training", region)
}

/// `<local data dir>/cvtrainer/CognitiveServiceTrainerStorage.db`, or the
/// current directory when the platform has no data dir.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("cvtrainer"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATABASE_FILE)
}
