use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

use crate::downloads::DownloadStatus;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContentType {
    Movie,
    Series,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ContentStatus {
    Wanted,
    Available,
    Missing,
}

#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct DbContent {
    pub id: i64,
    pub content_type: ContentType,
    pub title: String,
    pub year: i64,
    pub status: ContentStatus,
    pub quality_profile: String,
    pub root_path: String,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct NewContent {
    pub content_type: ContentType,
    pub title: String,
    pub year: i64,
    pub quality_profile: String,
    pub root_path: String,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i64>,
}

#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct DbEpisode {
    pub id: i64,
    pub content_id: i64,
    pub season: i64,
    pub episode: i64,
    pub status: ContentStatus,
}

#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct DbDownload {
    pub id: i64,
    pub content_id: i64,
    pub episode_id: Option<i64>,
    pub season: Option<i64>,
    pub is_complete_season: bool,
    pub client_name: String,
    pub client_id: String,
    pub release_name: String,
    pub indexer: String,
    pub status: DownloadStatus,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
    #[schema(value_type = Option<String>)]
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewDownload {
    pub content_id: i64,
    pub episode_id: Option<i64>,
    pub season: Option<i64>,
    pub is_complete_season: bool,
    pub client_name: String,
    pub client_id: String,
    pub release_name: String,
    pub indexer: String,
}

#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct DbFile {
    pub id: i64,
    pub content_id: i64,
    pub episode_id: Option<i64>,
    pub path: String,
    pub size: i64,
    pub quality: String,
    pub source: String,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub content_id: i64,
    pub episode_id: Option<i64>,
    pub path: String,
    pub size: i64,
    pub quality: String,
    pub source: String,
}

#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct DbHistory {
    pub id: i64,
    pub download_id: Option<i64>,
    pub content_id: Option<i64>,
    pub event: String,
    pub detail: String,
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(
            r#"CREATE TABLE IF NOT EXISTS content (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    content_type TEXT NOT NULL,
                                    title TEXT NOT NULL,
                                    year INTEGER NOT NULL DEFAULT 0,
                                    status TEXT NOT NULL,
                                    quality_profile TEXT NOT NULL,
                                    root_path TEXT NOT NULL,
                                    imdb_id TEXT,
                                    tvdb_id INTEGER,
                                    added_at TEXT NOT NULL,
                                    updated_at TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS episodes (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    content_id INTEGER NOT NULL,
                                    season INTEGER NOT NULL,
                                    episode INTEGER NOT NULL,
                                    status TEXT NOT NULL,
                                    UNIQUE (content_id, season, episode),
                                    FOREIGN KEY (content_id) REFERENCES content (id) ON DELETE CASCADE);
CREATE TABLE IF NOT EXISTS downloads (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    content_id INTEGER NOT NULL,
                                    episode_id INTEGER,
                                    season INTEGER,
                                    is_complete_season INTEGER NOT NULL DEFAULT 0,
                                    client_name TEXT NOT NULL,
                                    client_id TEXT NOT NULL,
                                    release_name TEXT NOT NULL,
                                    indexer TEXT NOT NULL,
                                    status TEXT NOT NULL,
                                    added_at TEXT NOT NULL,
                                    completed_at TEXT,
                                    UNIQUE (client_name, client_id));
CREATE TABLE IF NOT EXISTS files (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    content_id INTEGER NOT NULL,
                                    episode_id INTEGER,
                                    path TEXT NOT NULL UNIQUE,
                                    size INTEGER NOT NULL,
                                    quality TEXT NOT NULL,
                                    source TEXT NOT NULL,
                                    added_at TEXT NOT NULL,
                                    FOREIGN KEY (content_id) REFERENCES content (id) ON DELETE CASCADE);
CREATE TABLE IF NOT EXISTS history (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    download_id INTEGER,
                                    content_id INTEGER,
                                    event TEXT NOT NULL,
                                    detail TEXT NOT NULL DEFAULT '',
                                    created_at TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS quality_profiles (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    name TEXT NOT NULL UNIQUE,
                                    data TEXT NOT NULL,
                                    updated_at TEXT NOT NULL);"#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn insert_content(&self, content: NewContent) -> Result<i64, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO content
            (content_type, title, year, status, quality_profile, root_path, imdb_id, tvdb_id, added_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id;",
        )
        .bind(content.content_type)
        .bind(&content.title)
        .bind(content.year)
        .bind(ContentStatus::Wanted)
        .bind(&content.quality_profile)
        .bind(&content.root_path)
        .bind(&content.imdb_id)
        .bind(content.tvdb_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn content(&self, id: i64) -> Result<DbContent, sqlx::Error> {
        sqlx::query_as("SELECT * FROM content WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn all_content(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DbContent>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM content ORDER BY id LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    /// Content removal takes its files and episodes along; download rows
    /// stay behind as an audit trail.
    pub async fn remove_content(&self, id: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files WHERE content_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM episodes WHERE content_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM content WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    pub async fn insert_episode(
        &self,
        content_id: i64,
        season: i64,
        episode: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO episodes (content_id, season, episode, status)
            VALUES (?, ?, ?, ?) RETURNING id;",
        )
        .bind(content_id)
        .bind(season)
        .bind(episode)
        .bind(ContentStatus::Wanted)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn episodes(&self, content_id: i64) -> Result<Vec<DbEpisode>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM episodes WHERE content_id = ? ORDER BY season, episode")
            .bind(content_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn insert_download(&self, download: NewDownload) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO downloads
            (content_id, episode_id, season, is_complete_season, client_name, client_id,
             release_name, indexer, status, added_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id;",
        )
        .bind(download.content_id)
        .bind(download.episode_id)
        .bind(download.season)
        .bind(download.is_complete_season)
        .bind(&download.client_name)
        .bind(&download.client_id)
        .bind(&download.release_name)
        .bind(&download.indexer)
        .bind(DownloadStatus::Queued)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
    }

    pub async fn download(&self, id: i64) -> Result<DbDownload, sqlx::Error> {
        sqlx::query_as("SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn downloads(&self, active_only: bool) -> Result<Vec<DbDownload>, sqlx::Error> {
        let sql = if active_only {
            "SELECT * FROM downloads WHERE status NOT IN ('cleaned', 'failed') ORDER BY id"
        } else {
            "SELECT * FROM downloads ORDER BY id"
        };
        sqlx::query_as(sql).fetch_all(&self.pool).await
    }

    pub async fn download_by_client_id(
        &self,
        client_name: &str,
        client_id: &str,
    ) -> Result<Option<DbDownload>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM downloads WHERE client_name = ? AND client_id = ?")
            .bind(client_name)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_download_status(
        &self,
        id: i64,
        status: DownloadStatus,
        completed_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE downloads SET status = ?, completed_at = ? WHERE id = ?")
            .bind(status)
            .bind(completed_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn imported_downloads_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<DbDownload>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM downloads WHERE status = 'imported' AND completed_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn files(&self, content_id: Option<i64>) -> Result<Vec<DbFile>, sqlx::Error> {
        match content_id {
            Some(id) => {
                sqlx::query_as("SELECT * FROM files WHERE content_id = ? ORDER BY id")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as("SELECT * FROM files ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
            }
        }
    }

    /// Everything a successful import changes, in one transaction: the file
    /// rows appear, the download becomes `imported`, the content becomes
    /// `available` and the history records it. Season packs land several
    /// files under one download.
    pub async fn record_import(
        &self,
        files: Vec<NewFile>,
        download_id: i64,
        completed_at: Option<OffsetDateTime>,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let content_id = files.first().map(|f| f.content_id).unwrap_or_default();
        let mut tx = self.pool.begin().await?;
        let mut file_ids = Vec::with_capacity(files.len());
        for file in &files {
            let file_id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO files (content_id, episode_id, path, size, quality, source, added_at)
                VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id;",
            )
            .bind(file.content_id)
            .bind(file.episode_id)
            .bind(&file.path)
            .bind(file.size)
            .bind(&file.quality)
            .bind(&file.source)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            file_ids.push(file_id);
            if let Some(episode_id) = file.episode_id {
                sqlx::query("UPDATE episodes SET status = ? WHERE id = ?")
                    .bind(ContentStatus::Available)
                    .bind(episode_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        sqlx::query("UPDATE downloads SET status = ?, completed_at = ? WHERE id = ?")
            .bind(DownloadStatus::Imported)
            .bind(completed_at)
            .bind(download_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE content SET status = ?, updated_at = ? WHERE id = ?")
            .bind(ContentStatus::Available)
            .bind(now)
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        let detail = files
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(
            "INSERT INTO history (download_id, content_id, event, detail, created_at)
            VALUES (?, ?, ?, ?, ?);",
        )
        .bind(download_id)
        .bind(content_id)
        .bind("import_completed")
        .bind(&detail)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(file_ids)
    }

    /// Like [`Db::record_import`] but for files that arrive outside the
    /// download lifecycle.
    pub async fn record_manual_import(&self, files: Vec<NewFile>) -> Result<Vec<i64>, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let content_id = files.first().map(|f| f.content_id).unwrap_or_default();
        let mut tx = self.pool.begin().await?;
        let mut file_ids = Vec::with_capacity(files.len());
        for file in &files {
            let file_id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO files (content_id, episode_id, path, size, quality, source, added_at)
                VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id;",
            )
            .bind(file.content_id)
            .bind(file.episode_id)
            .bind(&file.path)
            .bind(file.size)
            .bind(&file.quality)
            .bind(&file.source)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            file_ids.push(file_id);
            if let Some(episode_id) = file.episode_id {
                sqlx::query("UPDATE episodes SET status = ? WHERE id = ?")
                    .bind(ContentStatus::Available)
                    .bind(episode_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        sqlx::query("UPDATE content SET status = ?, updated_at = ? WHERE id = ?")
            .bind(ContentStatus::Available)
            .bind(now)
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        let detail = files
            .iter()
            .map(|f| f.path.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(
            "INSERT INTO history (download_id, content_id, event, detail, created_at)
            VALUES (NULL, ?, ?, ?, ?);",
        )
        .bind(content_id)
        .bind("manual_import")
        .bind(&detail)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(file_ids)
    }

    /// Episode rows are created lazily as files for them show up.
    pub async fn ensure_episode(
        &self,
        content_id: i64,
        season: i64,
        episode: i64,
    ) -> Result<i64, sqlx::Error> {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM episodes WHERE content_id = ? AND season = ? AND episode = ?",
        )
        .bind(content_id)
        .bind(season)
        .bind(episode)
        .fetch_optional(&self.pool)
        .await?;
        match existing {
            Some(id) => Ok(id),
            None => self.insert_episode(content_id, season, episode).await,
        }
    }

    pub async fn insert_history(
        &self,
        download_id: Option<i64>,
        content_id: Option<i64>,
        event: &str,
        detail: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO history (download_id, content_id, event, detail, created_at)
            VALUES (?, ?, ?, ?, ?);",
        )
        .bind(download_id)
        .bind(content_id)
        .bind(event)
        .bind(detail)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history(&self, limit: i64, offset: i64) -> Result<Vec<DbHistory>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM history ORDER BY id DESC LIMIT ? OFFSET ?")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn upsert_quality_profile(&self, name: &str, data: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO quality_profiles (name, data, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at;",
        )
        .bind(name)
        .bind(data)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub async fn temp_db() -> Db {
        let mut path = std::env::temp_dir();
        path.push("fetcharr-test");
        std::fs::create_dir_all(&path).unwrap();
        path.push(format!("{}.db", uuid::Uuid::new_v4()));
        Db::connect(&path).await.unwrap()
    }

    pub fn movie_content() -> NewContent {
        NewContent {
            content_type: ContentType::Movie,
            title: "Test Movie".into(),
            year: 2024,
            quality_profile: "hd".into(),
            root_path: "/media/movies".into(),
            imdb_id: Some("tt0000001".into()),
            tvdb_id: None,
        }
    }

    pub fn sab_download(content_id: i64, client_id: &str) -> NewDownload {
        NewDownload {
            content_id,
            episode_id: None,
            season: None,
            is_complete_season: false,
            client_name: "sabnzbd".into(),
            client_id: client_id.into(),
            release_name: "Test.Movie.2024.1080p.WEB-DL.DDP5.1.H264-X".into(),
            indexer: "nzbhub".into(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn content_round_trip() {
        let db = temp_db().await;
        let id = db.insert_content(movie_content()).await.unwrap();
        let content = db.content(id).await.unwrap();
        assert_eq!("Test Movie", content.title);
        assert_eq!(ContentStatus::Wanted, content.status);
        assert_eq!(ContentType::Movie, content.content_type);
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_client_id_is_rejected() {
        let db = temp_db().await;
        let content_id = db.insert_content(movie_content()).await.unwrap();
        db.insert_download(sab_download(content_id, "nzo_1"))
            .await
            .unwrap();
        assert!(db
            .insert_download(sab_download(content_id, "nzo_1"))
            .await
            .is_err());
    }

    #[test_log::test(tokio::test)]
    async fn record_import_is_transactional() {
        let db = temp_db().await;
        let content_id = db.insert_content(movie_content()).await.unwrap();
        let download_id = db
            .insert_download(sab_download(content_id, "nzo_2"))
            .await
            .unwrap();
        let completed = Some(OffsetDateTime::now_utc());
        db.record_import(
            vec![NewFile {
                content_id,
                episode_id: None,
                path: "/media/movies/Test Movie (2024)/Test Movie (2024).mkv".into(),
                size: 4096,
                quality: "1080p".into(),
                source: "webdl".into(),
            }],
            download_id,
            completed,
        )
        .await
        .unwrap();

        assert_eq!(
            ContentStatus::Available,
            db.content(content_id).await.unwrap().status
        );
        assert_eq!(
            DownloadStatus::Imported,
            db.download(download_id).await.unwrap().status
        );
        assert_eq!(1, db.files(Some(content_id)).await.unwrap().len());
        assert!(!db.history(10, 0).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn download_rows_survive_content_removal() {
        let db = temp_db().await;
        let content_id = db.insert_content(movie_content()).await.unwrap();
        let download_id = db
            .insert_download(sab_download(content_id, "nzo_3"))
            .await
            .unwrap();
        db.remove_content(content_id).await.unwrap();
        // The audit trail keeps the download even though its content is gone.
        let remaining = db.downloads(false).await.unwrap();
        assert_eq!(1, remaining.len());
        assert_eq!(download_id, remaining[0].id);
        assert!(db.content(content_id).await.is_err());
    }
}
