// API client module: a small async HTTP client for the Custom Vision
// training REST surface. Only the calls the sync tool needs are exposed,
// and all of them go through the `TrainingApi` trait so the orchestrator
// can be driven by an in-memory fake in tests.

use crate::error::{Result, TrainerError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;
use uuid::Uuid;

/// Per-image status values the service reports for a successful upload.
pub const STATUS_OK: &str = "OK";
pub const STATUS_OK_DUPLICATE: &str = "OKDuplicate";

/// Iteration status while the service is still training.
pub const STATUS_TRAINING: &str = "Training";

const TRAINING_KEY_HEADER: &str = "training-key";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageTag {
    pub tag_id: Uuid,
    #[serde(default)]
    pub created: DateTime<Utc>,
}

/// An image as stored by the service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: Uuid,
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub image_uri: String,
    #[serde(default)]
    pub thumbnail_uri: String,
    #[serde(default)]
    pub tags: Vec<ImageTag>,
}

/// One file of an upload batch. `name` carries the local path so the
/// response can be matched back to the file.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageFileCreateEntry {
    pub name: String,
    #[serde(serialize_with = "serialize_base64")]
    pub contents: Vec<u8>,
    pub tag_ids: Vec<Uuid>,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageFileCreateBatch {
    pub images: Vec<ImageFileCreateEntry>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ImageCreateResult {
    #[serde(default)]
    pub source_url: Option<String>,
    pub status: String,
    #[serde(default)]
    pub image: Option<Image>,
}

impl ImageCreateResult {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK || self.status == STATUS_OK_DUPLICATE
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageCreateSummary {
    #[serde(default)]
    pub is_batch_successful: bool,
    #[serde(default)]
    pub images: Vec<ImageCreateResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_modified: DateTime<Utc>,
}

impl Iteration {
    pub fn is_training(&self) -> bool {
        self.status == STATUS_TRAINING
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// The remote operations the orchestrator consumes.
#[async_trait]
pub trait TrainingApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn list_tags(&self, project: Uuid) -> Result<Vec<Tag>>;
    /// `None` when the tag no longer exists remotely.
    async fn get_tag(&self, project: Uuid, tag: Uuid) -> Result<Option<Tag>>;
    async fn create_tag(&self, project: Uuid, name: &str) -> Result<Tag>;
    async fn delete_tag(&self, project: Uuid, tag: Uuid) -> Result<()>;
    /// One page of tagged images. An empty `tag_ids` lists every tagged image.
    async fn tagged_images(&self, project: Uuid, tag_ids: &[Uuid], take: usize, skip: usize) -> Result<Vec<Image>>;
    async fn delete_images(&self, project: Uuid, image_ids: &[Uuid]) -> Result<()>;
    async fn create_images_from_files(&self, project: Uuid, batch: &ImageFileCreateBatch) -> Result<ImageCreateSummary>;
    async fn train_project(&self, project: Uuid) -> Result<Iteration>;
    async fn get_iteration(&self, project: Uuid, iteration: Uuid) -> Result<Iteration>;
    async fn update_iteration(&self, project: Uuid, iteration: &Iteration) -> Result<Iteration>;
    /// Fetch the raw bytes behind an image URI returned by the service.
    async fn download(&self, uri: &str) -> Result<Vec<u8>>;
}

/// HTTP implementation of `TrainingApi`. Holds a reqwest client carrying
/// the training key, a bare client for image downloads and the base URL of
/// the training endpoint.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    // Image URIs point at blob storage, which must never see the key.
    download_client: Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client for `base_url` (no trailing slash needed).
    pub fn new(base_url: &str, training_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(training_key).map_err(|_| TrainerError::InvalidTrainingKey)?;
        headers.insert(TRAINING_KEY_HEADER, key);
        let client = Client::builder().default_headers(headers).build()?;
        Ok(ApiClient {
            client,
            download_client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn project_url(&self, project: Uuid, path: &str) -> String {
        format!("{}/projects/{}{}", self.base_url, project, path)
    }

    /// Send a request and turn any non-success status into `TrainerError::Api`
    /// carrying the response body.
    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(TrainerError::Api { status, body });
        }
        Ok(res)
    }
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl TrainingApi for ApiClient {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let url = format!("{}/projects", self.base_url);
        Ok(self.send(self.client.get(&url)).await?.json().await?)
    }

    async fn list_tags(&self, project: Uuid) -> Result<Vec<Tag>> {
        let url = self.project_url(project, "/tags");
        Ok(self.send(self.client.get(&url)).await?.json().await?)
    }

    async fn get_tag(&self, project: Uuid, tag: Uuid) -> Result<Option<Tag>> {
        let url = self.project_url(project, &format!("/tags/{}", tag));
        match self.send(self.client.get(&url)).await {
            Ok(res) => Ok(Some(res.json().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_tag(&self, project: Uuid, name: &str) -> Result<Tag> {
        let url = self.project_url(project, "/tags");
        debug!(%project, tag = name, "creating tag");
        let req = self.client.post(&url).query(&[("name", name)]);
        Ok(self.send(req).await?.json().await?)
    }

    async fn delete_tag(&self, project: Uuid, tag: Uuid) -> Result<()> {
        let url = self.project_url(project, &format!("/tags/{}", tag));
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn tagged_images(&self, project: Uuid, tag_ids: &[Uuid], take: usize, skip: usize) -> Result<Vec<Image>> {
        let url = self.project_url(project, "/images/tagged");
        let mut query = vec![("take", take.to_string()), ("skip", skip.to_string())];
        if !tag_ids.is_empty() {
            query.push(("tagIds", join_ids(tag_ids)));
        }
        let req = self.client.get(&url).query(&query);
        Ok(self.send(req).await?.json().await?)
    }

    async fn delete_images(&self, project: Uuid, image_ids: &[Uuid]) -> Result<()> {
        let url = self.project_url(project, "/images");
        let req = self.client.delete(&url).query(&[("imageIds", join_ids(image_ids))]);
        self.send(req).await?;
        Ok(())
    }

    async fn create_images_from_files(&self, project: Uuid, batch: &ImageFileCreateBatch) -> Result<ImageCreateSummary> {
        let url = self.project_url(project, "/images/files");
        debug!(%project, count = batch.images.len(), "uploading image batch");
        Ok(self.send(self.client.post(&url).json(batch)).await?.json().await?)
    }

    async fn train_project(&self, project: Uuid) -> Result<Iteration> {
        let url = self.project_url(project, "/train");
        Ok(self.send(self.client.post(&url)).await?.json().await?)
    }

    async fn get_iteration(&self, project: Uuid, iteration: Uuid) -> Result<Iteration> {
        let url = self.project_url(project, &format!("/iterations/{}", iteration));
        Ok(self.send(self.client.get(&url)).await?.json().await?)
    }

    async fn update_iteration(&self, project: Uuid, iteration: &Iteration) -> Result<Iteration> {
        let url = self.project_url(project, &format!("/iterations/{}", iteration.id));
        Ok(self.send(self.client.patch(&url).json(iteration)).await?.json().await?)
    }

    async fn download(&self, uri: &str) -> Result<Vec<u8>> {
        let res = self.send(self.download_client.get(uri)).await?;
        Ok(res.bytes().await?.to_vec())
    }
}
