use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::PublicationConfig;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Publication {
    pub id: i64,
    pub name: String,
    pub rss_url: String,
    pub website_url: Option<String>,
    pub logo_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
    pub last_fetched_at: Option<String>,
    pub fetch_error: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub url: String,
    pub guid: String,
    pub author: Option<String>,
    pub published_date: String,
    pub publication_id: i64,
    pub image_url: Option<String>,
    pub word_count: i64,
    pub reading_time: i64,
    pub tags: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Article {
    /// Topic tags stored alongside the article.
    pub fn tags(&self) -> Vec<String> {
        self.tags
            .as_deref()
            .and_then(|t| serde_json::from_str(t).ok())
            .unwrap_or_default()
    }
}

/// An article as produced by extraction, not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub url: String,
    pub guid: String,
    pub author: Option<String>,
    pub published_date: DateTime<Utc>,
    pub publication_id: i64,
    pub image_url: Option<String>,
    pub word_count: i64,
    pub reading_time: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserArticle {
    pub id: i64,
    pub user_id: i64,
    pub article_id: i64,
    pub is_read: bool,
    pub is_saved: bool,
    pub read_at: Option<String>,
    pub saved_at: Option<String>,
}

/// Timestamps are stored as second-precision RFC 3339 in UTC so that string
/// comparison in SQL matches chronological order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publications (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                rss_url TEXT NOT NULL UNIQUE,
                website_url TEXT,
                logo_url TEXT,
                description TEXT,
                category TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_fetched_at TEXT,
                fetch_error TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL,
                guid TEXT NOT NULL,
                author TEXT,
                published_date TEXT NOT NULL,
                publication_id INTEGER NOT NULL REFERENCES publications(id),
                image_url TEXT,
                word_count INTEGER NOT NULL DEFAULT 0,
                reading_time INTEGER NOT NULL DEFAULT 0,
                tags TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(url, publication_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_publication_published
            ON articles(publication_id, published_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-user state is written by the reading side; article_id is left
        // without a foreign key so retention can delete articles first and
        // sweep orphans afterwards.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_articles (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                article_id INTEGER NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_saved INTEGER NOT NULL DEFAULT 0,
                read_at TEXT,
                saved_at TEXT,
                UNIQUE(user_id, article_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert configured publications. Existing rows get their descriptive
    /// fields refreshed; the active flag is only set on insert.
    pub async fn sync_publications(&self, configs: &[PublicationConfig]) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO publications
                    (name, rss_url, website_url, logo_url, description, category, is_active, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(rss_url) DO UPDATE SET
                    name = excluded.name,
                    website_url = excluded.website_url,
                    logo_url = excluded.logo_url,
                    description = excluded.description,
                    category = excluded.category
                "#,
            )
            .bind(&config.name)
            .bind(&config.url)
            .bind(&config.website_url)
            .bind(&config.logo_url)
            .bind(&config.description)
            .bind(&config.category)
            .bind(config.active)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_publications(&self) -> anyhow::Result<Vec<Publication>> {
        let publications =
            sqlx::query_as::<_, Publication>("SELECT * FROM publications ORDER BY name, id")
                .fetch_all(&self.pool)
                .await?;
        Ok(publications)
    }

    /// Active publications, least recently fetched first.
    pub async fn list_active_publications(&self) -> anyhow::Result<Vec<Publication>> {
        let publications = sqlx::query_as::<_, Publication>(
            r#"
            SELECT * FROM publications
            WHERE is_active = 1
            ORDER BY last_fetched_at ASC NULLS FIRST, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(publications)
    }

    pub async fn get_publication(&self, publication_id: i64) -> anyhow::Result<Option<Publication>> {
        let publication =
            sqlx::query_as::<_, Publication>("SELECT * FROM publications WHERE id = ?")
                .bind(publication_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(publication)
    }

    pub async fn set_publication_active(
        &self,
        publication_id: i64,
        active: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE publications SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(publication_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamp a fetch attempt. `error` replaces any previous error, so `None`
    /// clears it.
    pub async fn record_fetch_outcome(
        &self,
        publication_id: i64,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let now = timestamp(Utc::now());
        sqlx::query(
            r#"
            UPDATE publications
            SET last_fetched_at = ?, fetch_error = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(error)
        .bind(publication_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or refresh a batch of articles keyed by `(url, publication_id)`.
    ///
    /// The batch is written in one transaction. Existing rows keep their id and
    /// `created_at`; everything derived from the feed is overwritten.
    pub async fn bulk_upsert_articles(
        &self,
        articles: &[NewArticle],
    ) -> anyhow::Result<Vec<Article>> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(articles.len());

        for article in articles {
            let tags = if article.tags.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&article.tags)?)
            };

            let row = sqlx::query_as::<_, Article>(
                r#"
                INSERT INTO articles (
                    title, content, summary, url, guid, author, published_date,
                    publication_id, image_url, word_count, reading_time, tags,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(url, publication_id) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    summary = excluded.summary,
                    author = excluded.author,
                    published_date = excluded.published_date,
                    image_url = excluded.image_url,
                    word_count = excluded.word_count,
                    reading_time = excluded.reading_time,
                    tags = excluded.tags,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(&article.title)
            .bind(&article.content)
            .bind(&article.summary)
            .bind(&article.url)
            .bind(&article.guid)
            .bind(&article.author)
            .bind(timestamp(article.published_date))
            .bind(article.publication_id)
            .bind(&article.image_url)
            .bind(article.word_count)
            .bind(article.reading_time)
            .bind(tags)
            .bind(&now)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

            stored.push(row);
        }

        tx.commit().await?;
        Ok(stored)
    }

    pub async fn get_articles_for_publication(
        &self,
        publication_id: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Article>> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            WHERE publication_id = ?
            ORDER BY published_date DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(publication_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn get_article_count_for_publication(
        &self,
        publication_id: i64,
    ) -> anyhow::Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM articles WHERE publication_id = ?")
                .bind(publication_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    /// Delete articles published more than `age_days` ago that no user saved.
    pub async fn delete_articles_older_than_unsaved(&self, age_days: i64) -> anyhow::Result<u64> {
        let cutoff = timestamp(Utc::now() - Duration::days(age_days));
        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE published_date < ?
              AND id NOT IN (
                  SELECT article_id FROM user_articles WHERE is_saved = 1
              )
            "#,
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_orphaned_user_articles(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM user_articles WHERE article_id NOT IN (SELECT id FROM articles)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_read(
        &self,
        user_id: i64,
        article_id: i64,
        is_read: bool,
    ) -> anyhow::Result<UserArticle> {
        let read_at = is_read.then(|| timestamp(Utc::now()));
        let row = sqlx::query_as::<_, UserArticle>(
            r#"
            INSERT INTO user_articles (user_id, article_id, is_read, read_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET
                is_read = excluded.is_read,
                read_at = COALESCE(excluded.read_at, user_articles.read_at)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(is_read)
        .bind(read_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_saved(
        &self,
        user_id: i64,
        article_id: i64,
        is_saved: bool,
    ) -> anyhow::Result<UserArticle> {
        let saved_at = is_saved.then(|| timestamp(Utc::now()));
        let row = sqlx::query_as::<_, UserArticle>(
            r#"
            INSERT INTO user_articles (user_id, article_id, is_saved, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, article_id) DO UPDATE SET
                is_saved = excluded.is_saved,
                saved_at = COALESCE(excluded.saved_at, user_articles.saved_at)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(article_id)
        .bind(is_saved)
        .bind(saved_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_user_article(
        &self,
        user_id: i64,
        article_id: i64,
    ) -> anyhow::Result<Option<UserArticle>> {
        let row = sqlx::query_as::<_, UserArticle>(
            "SELECT * FROM user_articles WHERE user_id = ? AND article_id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
