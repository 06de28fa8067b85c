// Entrypoint for the CLI application.
// - Parses flags with clap and turns them into `Settings`.
// - Sets up tracing, then hands over to `ui::run`.

use clap::Parser;
use cvtrainer::config::{Mode, Settings, DEFAULT_REGION};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Upload a folder of labeled images to a Custom Vision project and train it.
///
/// Every subfolder of FOLDER becomes a tag (folders starting with "!" are
/// ignored) and the images inside it are uploaded under that tag.
#[derive(Parser, Debug)]
#[command(name = "cvtrainer", version, about, long_about = None, disable_help_flag = true)]
struct Args {
    /// The region of the service
    #[arg(short, long, default_value = DEFAULT_REGION)]
    region: String,

    /// The training key
    #[arg(short, long = "trainingkey", visible_alias = "training-key")]
    training_key: String,

    /// The project to upload images for
    #[arg(short, long = "project")]
    project_id: Option<Uuid>,

    /// The directory that contains the images to be used for training
    #[arg(short, long, default_value = ".")]
    folder: String,

    /// Maximum width of the uploaded images
    #[arg(short, long)]
    width: Option<u32>,

    /// Maximum height of the uploaded images
    #[arg(short = 'h', long)]
    height: Option<u32>,

    /// Just delete the project's images and tags, then exit
    #[arg(short, long, conflicts_with_all = ["list", "get"])]
    delete: bool,

    /// Just list the projects, then exit
    #[arg(short, long, conflicts_with = "get")]
    list: bool,

    /// Download all tagged images, one folder per first tag
    #[arg(short, long)]
    get: bool,

    /// Clear the local upload cache for every project, then exit
    #[arg(long, conflicts_with_all = ["delete", "list", "get"])]
    purge_cache: bool,

    /// Do not ask for confirmation before deleting
    #[arg(long)]
    yes: bool,

    /// Path of the upload cache database
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

impl Args {
    fn settings(&self) -> Settings {
        let mut settings = Settings::new(self.training_key.clone(), &self.region);
        settings.project_id = self.project_id;
        settings.folder = self.folder.clone();
        settings.max_width = self.width.unwrap_or(0);
        settings.max_height = self.height.unwrap_or(0);
        settings.mode = if self.delete {
            Mode::Delete
        } else if self.list {
            Mode::ListProjects
        } else if self.get {
            Mode::GetImages
        } else if self.purge_cache {
            Mode::PurgeCache
        } else {
            Mode::Sync
        };
        if let Some(database) = &self.database {
            settings.database = database.clone();
        }
        settings
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    cvtrainer::ui::run(args.settings(), args.yes).await
}
