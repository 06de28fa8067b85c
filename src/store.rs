// Local upload cache: remembers which files were uploaded to which project
// and which tags were created there, so a second run only sends new files.
//
// Backed by a single SQLite file. Every call takes the connection mutex, so
// one `CacheStore` can be shared between tasks.

use crate::error::{Result, TrainerError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Tag association recorded for an uploaded image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CachedImageTag {
    pub tag_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// An image that was uploaded successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    pub local_path: String,
    pub remote_image_id: Uuid,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub image_uri: String,
    pub thumbnail_uri: String,
    pub tags: Vec<CachedImageTag>,
}

/// A tag created remotely for a folder.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTag {
    pub tag_name: String,
    pub project_id: Uuid,
    pub remote_tag_id: Uuid,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open (or create) the cache file at `path`, creating parent folders.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // No UNIQUE constraints: callers look up before inserting.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                local_path      TEXT NOT NULL,
                remote_image_id TEXT NOT NULL,
                project_id      TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                width           INTEGER NOT NULL,
                height          INTEGER NOT NULL,
                image_uri       TEXT NOT NULL,
                thumbnail_uri   TEXT NOT NULL,
                tags_json       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tags (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                tag_name        TEXT NOT NULL,
                project_id      TEXT NOT NULL,
                remote_tag_id   TEXT NOT NULL
            );",
        )?;
        Ok(CacheStore { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TrainerError::StorePoisoned)
    }

    pub fn find_image(&self, local_path: &str, project_id: Uuid) -> Result<Option<CachedImage>> {
        let conn = self.lock()?;
        let image = conn
            .query_row(
                "SELECT local_path, remote_image_id, project_id, created_at, width, height,
                        image_uri, thumbnail_uri, tags_json
                 FROM images WHERE local_path = ?1 AND project_id = ?2 LIMIT 1",
                params![local_path, project_id.to_string()],
                image_from_row,
            )
            .optional()?;
        Ok(image)
    }

    pub fn find_tag(&self, tag_name: &str, project_id: Uuid) -> Result<Option<CachedTag>> {
        let conn = self.lock()?;
        let tag = conn
            .query_row(
                "SELECT tag_name, project_id, remote_tag_id
                 FROM tags WHERE tag_name = ?1 AND project_id = ?2 LIMIT 1",
                params![tag_name, project_id.to_string()],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    /// Append an image record. Does not check for an existing record.
    pub fn insert_image(&self, image: &CachedImage) -> Result<()> {
        let tags_json = serde_json::to_string(&image.tags)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO images (local_path, remote_image_id, project_id, created_at, width, height,
                                 image_uri, thumbnail_uri, tags_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                image.local_path,
                image.remote_image_id.to_string(),
                image.project_id.to_string(),
                image.created_at.to_rfc3339(),
                image.width,
                image.height,
                image.image_uri,
                image.thumbnail_uri,
                tags_json,
            ],
        )?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_images_local_path ON images(local_path);
             CREATE INDEX IF NOT EXISTS idx_images_project_id ON images(project_id);",
        )?;
        Ok(())
    }

    /// Append a tag record. Does not check for an existing record.
    pub fn insert_tag(&self, tag: &CachedTag) -> Result<()> {
        let conn = self.lock()?;
        insert_tag_row(&conn, tag)
    }

    /// Drop the record of `local_path` in `project_id`. Returns rows removed.
    pub fn remove_image(&self, local_path: &str, project_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM images WHERE local_path = ?1 AND project_id = ?2",
            params![local_path, project_id.to_string()],
        )?;
        Ok(removed)
    }

    /// Swap whatever is cached for `tag.tag_name` in the project for `tag`.
    /// Delete and insert run under one lock in one transaction.
    pub fn replace_tag(&self, tag: &CachedTag) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM tags WHERE tag_name = ?1 AND project_id = ?2",
            params![tag.tag_name, tag.project_id.to_string()],
        )?;
        insert_tag_row(&tx, tag)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove every image and tag record of a project. Returns rows removed.
    pub fn delete_project_entries(&self, project_id: Uuid) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = project_id.to_string();
        let images = tx.execute("DELETE FROM images WHERE project_id = ?1", params![id])?;
        let tags = tx.execute("DELETE FROM tags WHERE project_id = ?1", params![id])?;
        tx.commit()?;
        Ok(images + tags)
    }

    /// Wipe both collections for every project.
    pub fn delete_database(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM images; DELETE FROM tags;")?;
        Ok(())
    }

    pub fn image_count(&self, project_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE project_id = ?1",
            params![project_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn tag_count(&self, project_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tags WHERE project_id = ?1",
            params![project_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn insert_tag_row(conn: &Connection, tag: &CachedTag) -> Result<()> {
    conn.execute(
        "INSERT INTO tags (tag_name, project_id, remote_tag_id) VALUES (?1, ?2, ?3)",
        params![tag.tag_name, tag.project_id.to_string(), tag.remote_tag_id.to_string()],
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_tags_tag_name ON tags(tag_name);
         CREATE INDEX IF NOT EXISTS idx_tags_project_id ON tags(project_id);",
    )?;
    Ok(())
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<CachedImage> {
    let created: String = row.get(3)?;
    let created_at = DateTime::parse_from_rfc3339(&created)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    let tags_json: String = row.get(8)?;
    let tags = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(CachedImage {
        local_path: row.get(0)?,
        remote_image_id: parse_uuid(row, 1)?,
        project_id: parse_uuid(row, 2)?,
        created_at,
        width: row.get(4)?,
        height: row.get(5)?,
        image_uri: row.get(6)?,
        thumbnail_uri: row.get(7)?,
        tags,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<CachedTag> {
    Ok(CachedTag {
        tag_name: row.get(0)?,
        project_id: parse_uuid(row, 1)?,
        remote_tag_id: parse_uuid(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(path: &str, project: Uuid) -> CachedImage {
        CachedImage {
            local_path: path.to_string(),
            remote_image_id: Uuid::new_v4(),
            project_id: project,
            created_at: Utc::now(),
            width: 640,
            height: 480,
            image_uri: "https://blob/img".into(),
            thumbnail_uri: "https://blob/thumb".into(),
            tags: vec![CachedImageTag { tag_id: Uuid::new_v4(), created_at: Utc::now() }],
        }
    }

    #[test]
    fn image_lookup_is_scoped_by_project() {
        let store = CacheStore::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let record = image("/data/cats/1.jpg", a);
        store.insert_image(&record).unwrap();

        let found = store.find_image("/data/cats/1.jpg", a).unwrap().unwrap();
        assert_eq!(found.remote_image_id, record.remote_image_id);
        assert_eq!(found.tags, record.tags);
        assert!(store.find_image("/data/cats/1.jpg", b).unwrap().is_none());
        assert!(store.find_image("/data/cats/1", a).unwrap().is_none());
    }

    #[test]
    fn tag_lookup_is_exact() {
        let store = CacheStore::open_in_memory().unwrap();
        let project = Uuid::new_v4();
        let tag = CachedTag { tag_name: "cats".into(), project_id: project, remote_tag_id: Uuid::new_v4() };
        store.insert_tag(&tag).unwrap();

        assert_eq!(store.find_tag("cats", project).unwrap(), Some(tag));
        assert!(store.find_tag("cat", project).unwrap().is_none());
    }

    #[test]
    fn replace_tag_keeps_a_single_record() {
        let store = CacheStore::open_in_memory().unwrap();
        let project = Uuid::new_v4();
        let old = CachedTag { tag_name: "dogs".into(), project_id: project, remote_tag_id: Uuid::new_v4() };
        let new = CachedTag { remote_tag_id: Uuid::new_v4(), ..old.clone() };
        store.insert_tag(&old).unwrap();
        store.replace_tag(&new).unwrap();

        assert_eq!(store.tag_count(project).unwrap(), 1);
        assert_eq!(store.find_tag("dogs", project).unwrap(), Some(new));
    }

    #[test]
    fn concurrent_replacements_leave_one_record() {
        let store = std::sync::Arc::new(CacheStore::open_in_memory().unwrap());
        let project = Uuid::new_v4();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let tag = CachedTag { tag_name: "birds".into(), project_id: project, remote_tag_id: Uuid::new_v4() };
                        store.replace_tag(&tag).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.tag_count(project).unwrap(), 1);
    }

    #[test]
    fn delete_project_entries_leaves_other_projects() {
        let store = CacheStore::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.insert_image(&image("/x/1.png", a)).unwrap();
        store.insert_image(&image("/x/2.png", a)).unwrap();
        store.insert_image(&image("/x/1.png", b)).unwrap();
        store
            .insert_tag(&CachedTag { tag_name: "x".into(), project_id: a, remote_tag_id: Uuid::new_v4() })
            .unwrap();

        assert_eq!(store.delete_project_entries(a).unwrap(), 3);
        assert_eq!(store.image_count(a).unwrap(), 0);
        assert_eq!(store.tag_count(a).unwrap(), 0);
        assert_eq!(store.image_count(b).unwrap(), 1);
    }

    #[test]
    fn records_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let project = Uuid::new_v4();
        {
            let store = CacheStore::open(&path).unwrap();
            store.insert_image(&image("/a.jpg", project)).unwrap();
        }
        let store = CacheStore::open(&path).unwrap();
        assert!(store.find_image("/a.jpg", project).unwrap().is_some());

        store.delete_database().unwrap();
        assert_eq!(store.image_count(project).unwrap(), 0);
    }
}
