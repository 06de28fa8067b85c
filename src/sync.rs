// Orchestrates a run: turns each tag folder into a remote tag, uploads the
// files the cache and the remote listing do not already account for, then
// trains the project. Also hosts the delete, list and download modes.

use crate::api::{Image, ImageFileCreateBatch, ImageFileCreateEntry, Iteration, Project, Tag, TrainingApi};
use crate::config::{Mode, Settings};
use crate::error::{Result, TrainerError};
use crate::resize::resize;
use crate::store::{CacheStore, CachedImage, CachedImageTag, CachedTag};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Folders whose name starts with this are not uploaded.
const IGNORED_FOLDER_PREFIX: char = '!';

/// What a sync run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub tags_created: usize,
    pub tags_reused: usize,
    pub uploaded: usize,
    pub skipped: usize,
    /// Size of every batch sent, in order.
    pub batches: Vec<usize>,
    pub iteration: Option<Uuid>,
}

#[derive(Debug)]
pub enum Outcome {
    /// Delete mode finished; `false` when the cleanup hit an error.
    Deleted { completed: bool },
    Projects(Vec<Project>),
    Downloaded(usize),
    Synced(SyncReport),
    CachePurged,
}

pub struct Trainer<'a, A: TrainingApi + ?Sized> {
    api: &'a A,
    store: &'a CacheStore,
    settings: &'a Settings,
}

impl<'a, A: TrainingApi + ?Sized> Trainer<'a, A> {
    pub fn new(api: &'a A, store: &'a CacheStore, settings: &'a Settings) -> Self {
        Trainer { api, store, settings }
    }

    /// Dispatch on the configured mode.
    pub async fn run(&self) -> Result<Outcome> {
        match self.settings.mode {
            Mode::Delete => {
                let project = self.project()?;
                let completed = match self.delete_project(project).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%project, error = %e, "delete did not complete");
                        false
                    }
                };
                Ok(Outcome::Deleted { completed })
            }
            Mode::ListProjects => Ok(Outcome::Projects(self.api.list_projects().await?)),
            Mode::GetImages => {
                let project = self.project()?;
                let folder = self.folder()?;
                Ok(Outcome::Downloaded(self.download_images(project, &folder).await?))
            }
            Mode::Sync => Ok(Outcome::Synced(self.sync().await?)),
            Mode::PurgeCache => {
                self.store.delete_database()?;
                Ok(Outcome::CachePurged)
            }
        }
    }

    fn project(&self) -> Result<Uuid> {
        self.settings.project_id.ok_or(TrainerError::ProjectNotSpecified)
    }

    /// Resolve the configured folder to an existing absolute path.
    fn folder(&self) -> Result<PathBuf> {
        let folder = self.settings.folder.trim();
        if folder.is_empty() {
            return Err(TrainerError::FolderNotSpecified);
        }
        let path = Path::new(folder);
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        if !full.is_dir() {
            return Err(TrainerError::FolderNotFound(full));
        }
        Ok(full.canonicalize()?)
    }

    /// Remove every tagged image and every tag of the project remotely, then
    /// forget the project locally.
    pub async fn delete_project(&self, project: Uuid) -> Result<()> {
        info!(%project, "deleting existing images");
        loop {
            let page = self.api.tagged_images(project, &[], self.settings.page_size, 0).await?;
            if page.is_empty() {
                break;
            }
            let ids: Vec<Uuid> = page.iter().map(|i| i.id).collect();
            self.api.delete_images(project, &ids).await?;
        }

        info!(%project, "deleting existing tags");
        for tag in self.api.list_tags(project).await? {
            self.api.delete_tag(project, tag.id).await?;
        }

        let removed = self.store.delete_project_entries(project)?;
        debug!(%project, removed, "cleared cache entries");
        Ok(())
    }

    /// Page through tagged images. `tag_ids` empty means every tagged image.
    async fn all_tagged_images(&self, project: Uuid, tag_ids: &[Uuid]) -> Result<Vec<Image>> {
        let mut images = Vec::new();
        let mut skip = 0;
        loop {
            let page = self.api.tagged_images(project, tag_ids, self.settings.page_size, skip).await?;
            if page.is_empty() {
                break;
            }
            skip += page.len();
            images.extend(page);
        }
        Ok(images)
    }

    /// Save every tagged image as `<folder>/<first tag>/<image id>.jpg`.
    pub async fn download_images(&self, project: Uuid, folder: &Path) -> Result<usize> {
        let tags: HashMap<Uuid, String> = self
            .api
            .list_tags(project)
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();

        let mut saved = 0;
        for image in self.all_tagged_images(project, &[]).await? {
            let Some(name) = image.tags.first().and_then(|t| tags.get(&t.tag_id)) else {
                warn!(image = %image.id, "image has no known tag, skipping");
                continue;
            };
            let dir = folder.join(name);
            if !dir.is_dir() {
                info!(folder = %dir.display(), "creating folder");
                tokio::fs::create_dir_all(&dir).await?;
            }
            let file = dir.join(format!("{}.jpg", image.id));
            debug!(file = %file.display(), "downloading");
            let data = self.api.download(&image.image_uri).await?;
            tokio::fs::write(&file, data).await?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Upload every tag folder under the configured folder, then train.
    pub async fn sync(&self) -> Result<SyncReport> {
        let project = self.project()?;
        let root = self.folder()?;
        let mut report = SyncReport::default();

        for (tag_name, dir) in tag_folders(&root)? {
            self.upload_folder(project, &tag_name, &dir, &mut report).await?;
        }

        let iteration = self.train(project).await?;
        report.iteration = Some(iteration.id);
        Ok(report)
    }

    async fn upload_folder(&self, project: Uuid, tag_name: &str, dir: &Path, report: &mut SyncReport) -> Result<()> {
        let tag_id = self.resolve_tag(project, tag_name, report).await?;

        info!(tag = tag_name, "checking images already uploaded");
        let uploaded: HashSet<Uuid> = self
            .all_tagged_images(project, &[tag_id])
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();

        let files = image_files(dir)?;
        let bar = self.progress_bar(files.len() as u64, tag_name);
        let mut staged = Vec::with_capacity(self.settings.batch_size);

        for path in files {
            bar.inc(1);
            let local_path = path.to_string_lossy().into_owned();
            if let Some(cached) = self.store.find_image(&local_path, project)? {
                if uploaded.contains(&cached.remote_image_id) {
                    debug!(path = %local_path, "image already exists");
                    report.skipped += 1;
                    continue;
                }
            }

            let mut contents = tokio::fs::read(&path).await?;
            if self.settings.resize_requested() {
                contents = resize(&contents, self.settings.max_width, self.settings.max_height)?;
            }
            staged.push(ImageFileCreateEntry { name: local_path, contents, tag_ids: vec![tag_id] });

            if staged.len() >= self.settings.batch_size {
                self.upload_batch(project, std::mem::take(&mut staged), report).await?;
            }
        }
        if !staged.is_empty() {
            self.upload_batch(project, staged, report).await?;
        }
        bar.finish_and_clear();
        Ok(())
    }

    /// Reuse the cached tag while it still exists remotely; otherwise adopt
    /// a remote tag of the same name or create one, and record the id.
    async fn resolve_tag(&self, project: Uuid, tag_name: &str, report: &mut SyncReport) -> Result<Uuid> {
        let cached = self.store.find_tag(tag_name, project)?;
        if let Some(cached) = &cached {
            if self.api.get_tag(project, cached.remote_tag_id).await?.is_some() {
                report.tags_reused += 1;
                return Ok(cached.remote_tag_id);
            }
            warn!(tag = tag_name, stale = %cached.remote_tag_id, "cached tag is gone remotely");
        }

        let tag = match self.find_remote_tag(project, tag_name).await? {
            Some(tag) => {
                info!(tag = tag_name, id = %tag.id, "reusing remote tag missing from the cache");
                report.tags_reused += 1;
                tag
            }
            None => {
                info!(tag = tag_name, "creating tag");
                report.tags_created += 1;
                self.api.create_tag(project, tag_name).await?
            }
        };

        let record = cached_tag(tag_name, project, &tag);
        if cached.is_some() {
            self.store.replace_tag(&record)?;
        } else {
            self.store.insert_tag(&record)?;
        }
        Ok(tag.id)
    }

    /// The service rejects a second tag with the same name, so a tag the
    /// cache does not know about has to be looked up by name first.
    async fn find_remote_tag(&self, project: Uuid, tag_name: &str) -> Result<Option<Tag>> {
        let tags = self.api.list_tags(project).await?;
        Ok(tags.into_iter().find(|tag| tag.name.eq_ignore_ascii_case(tag_name)))
    }

    /// Send one batch under the retry policy and record what was uploaded.
    async fn upload_batch(&self, project: Uuid, entries: Vec<ImageFileCreateEntry>, report: &mut SyncReport) -> Result<()> {
        let count = entries.len();
        for entry in &entries {
            info!(path = %entry.name, "uploading image");
        }
        let batch = ImageFileCreateBatch { images: entries };
        let images = self
            .settings
            .retry
            .run("upload batch", || self.try_upload(project, &batch))
            .await?;

        for (entry, image) in batch.images.iter().zip(images) {
            if self.store.find_image(&entry.name, project)?.is_some() {
                debug!(path = %entry.name, "replacing stale cache record");
                self.store.remove_image(&entry.name, project)?;
            }
            self.store.insert_image(&cached_image(&entry.name, project, image))?;
        }

        report.uploaded += count;
        report.batches.push(count);
        if !self.settings.batch_pause.is_zero() {
            tokio::time::sleep(self.settings.batch_pause).await;
        }
        Ok(())
    }

    /// One upload attempt. A short response or any per-image status other
    /// than OK fails it.
    async fn try_upload(&self, project: Uuid, batch: &ImageFileCreateBatch) -> Result<Vec<Image>> {
        let summary = self.api.create_images_from_files(project, batch).await?;
        if summary.images.len() != batch.images.len() {
            warn!(sent = batch.images.len(), received = summary.images.len(), "API bad response");
            return Err(TrainerError::IncompleteBatch {
                sent: batch.images.len(),
                received: summary.images.len(),
            });
        }
        summary
            .images
            .into_iter()
            .map(|result| match result.image {
                Some(image) if result.is_ok() => Ok(image),
                _ => {
                    warn!(status = %result.status, "API bad response");
                    Err(TrainerError::BadImageStatus(result.status))
                }
            })
            .collect()
    }

    /// Train the project, wait for the iteration to finish and make it the
    /// default endpoint.
    pub async fn train(&self, project: Uuid) -> Result<Iteration> {
        info!(%project, "training");
        let spinner = self.spinner("Training...");
        let mut iteration = self.api.train_project(project).await?;
        while iteration.is_training() {
            tokio::time::sleep(self.settings.poll_interval).await;
            iteration = self.api.get_iteration(project, iteration.id).await?;
        }
        spinner.finish_and_clear();

        iteration.is_default = true;
        let iteration = self.api.update_iteration(project, &iteration).await?;
        info!(iteration = %iteration.id, status = %iteration.status, "training completed");
        Ok(iteration)
    }

    fn progress_bar(&self, len: u64, tag_name: &str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(tag_name.to_string());
        bar
    }

    fn spinner(&self, message: &'static str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }
}

fn cached_tag(tag_name: &str, project: Uuid, tag: &Tag) -> CachedTag {
    CachedTag {
        tag_name: tag_name.to_string(),
        project_id: project,
        remote_tag_id: tag.id,
    }
}

fn cached_image(local_path: &str, project: Uuid, image: Image) -> CachedImage {
    CachedImage {
        local_path: local_path.to_string(),
        remote_image_id: image.id,
        project_id: project,
        created_at: image.created,
        width: image.width,
        height: image.height,
        image_uri: image.image_uri,
        thumbnail_uri: image.thumbnail_uri,
        tags: image
            .tags
            .into_iter()
            .map(|t| CachedImageTag { tag_id: t.tag_id, created_at: t.created })
            .collect(),
    }
}

/// Immediate subfolders of `root` as (tag name, path), sorted by name.
/// Tag names are lower-cased folder names.
pub fn tag_folders(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut folders = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(IGNORED_FOLDER_PREFIX) {
            continue;
        }
        folders.push((name.to_lowercase(), entry.path()));
    }
    folders.sort();
    Ok(folders)
}

/// Image files anywhere under `dir`, in file-name order.
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
