// Library root
// -----------
// Keeps a folder of labeled images in sync with a Custom Vision training
// project. The binary (`main.rs`) parses arguments and hands a `Settings`
// value to `ui::run`.
//
// Module responsibilities:
// - `api`: HTTP calls to the training service, behind the `TrainingApi` trait.
// - `store`: SQLite cache of uploaded images and created tags per project.
// - `sync`: the upload/train orchestration plus delete, list and get modes.
// - `resize`: shrinks images to a bounding box before upload.
// - `retry`: wait-and-retry schedule for batch uploads.
// - `config`: resolved runtime settings.
// - `ui`: console output and the top-level error report.
pub mod api;
pub mod config;
pub mod error;
pub mod resize;
pub mod retry;
pub mod store;
pub mod sync;
pub mod ui;

pub use error::{Result, TrainerError};
