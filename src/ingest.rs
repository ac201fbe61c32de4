use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::db::{Database, NewArticle, Publication};
use crate::error::IngestError;
use crate::extract::ItemExtractor;
use crate::fetcher::FeedFetcher;

/// Outcome of ingesting one publication.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub publication: String,
    pub success: bool,
    pub count: usize,
    pub error: Option<String>,
}

impl FetchResult {
    fn failed(publication: &Publication, error: String) -> Self {
        Self {
            publication: publication.name.clone(),
            success: false,
            count: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total_feeds: usize,
    pub successful_feeds: usize,
    pub total_articles: usize,
    pub results: Vec<FetchResult>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RetentionStats {
    pub articles_deleted: u64,
    pub user_states_deleted: u64,
}

/// Drives fetch, extraction and storage for every active publication.
pub struct Ingester {
    db: Arc<Database>,
    fetcher: FeedFetcher,
    extractor: ItemExtractor,
    config: IngestConfig,
    running: AtomicBool,
}

impl Ingester {
    pub fn new(
        db: Arc<Database>,
        fetcher: FeedFetcher,
        extractor: ItemExtractor,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            extractor,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run over all active publications, one at a time.
    pub async fn ingest_all(&self) -> Result<RunStats, IngestError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Ingestion already in progress, skipping");
            return Err(IngestError::RunInProgress);
        }

        // Cleared on drop, so a cancelled run doesn't block the next one.
        let _guard = RunGuard(&self.running);
        self.do_ingest_all().await
    }

    async fn do_ingest_all(&self) -> Result<RunStats, IngestError> {
        let publications = self.db.list_active_publications().await?;
        info!("Ingesting {} publications", publications.len());

        let mut results = Vec::with_capacity(publications.len());

        for (index, publication) in publications.iter().enumerate() {
            if index > 0 && !self.config.request_delay.is_zero() {
                tokio::time::sleep(self.config.request_delay).await;
            }

            let result = match self.ingest_one(publication).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Failed to ingest '{}': {:#}", publication.name, e);
                    let message = e.to_string();
                    if let Err(e) = self
                        .db
                        .record_fetch_outcome(publication.id, Some(&message))
                        .await
                    {
                        error!("Failed to record outcome for '{}': {}", publication.name, e);
                    }
                    FetchResult::failed(publication, message)
                }
            };

            results.push(result);
        }

        let stats = RunStats {
            total_feeds: results.len(),
            successful_feeds: results.iter().filter(|r| r.success).count(),
            total_articles: results.iter().map(|r| r.count).sum(),
            results,
        };

        info!(
            "Ingestion complete: {}/{} feeds succeeded, {} articles",
            stats.successful_feeds, stats.total_feeds, stats.total_articles
        );
        Ok(stats)
    }

    /// Fetch one publication and store its articles.
    ///
    /// A fetch or parse failure is reported in the returned result and recorded
    /// on the publication. Storage failures are returned as `Err`.
    pub async fn ingest_one(&self, publication: &Publication) -> anyhow::Result<FetchResult> {
        info!("Fetching feed: {} ({})", publication.name, publication.rss_url);

        let items = match self.fetcher.fetch(&publication.rss_url).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to fetch '{}': {}", publication.name, e);
                let message = e.to_string();
                self.db
                    .record_fetch_outcome(publication.id, Some(&message))
                    .await?;
                return Ok(FetchResult::failed(publication, message));
            }
        };

        let now = Utc::now();
        let mut articles: Vec<NewArticle> = Vec::with_capacity(items.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for item in &items {
            let Some(article) = self.extractor.extract(item, publication.id, now) else {
                debug!(
                    "Skipping item without title or link in '{}': {:?}",
                    publication.name, item.title
                );
                continue;
            };

            // Same canonical URL twice in one feed: the later entry wins.
            match positions.get(&article.url) {
                Some(&pos) => articles[pos] = article,
                None => {
                    positions.insert(article.url.clone(), articles.len());
                    articles.push(article);
                }
            }
        }

        let stored = self.db.bulk_upsert_articles(&articles).await?;
        self.db.record_fetch_outcome(publication.id, None).await?;

        info!(
            "Stored {} articles for '{}' ({} items in feed)",
            stored.len(),
            publication.name,
            items.len()
        );

        Ok(FetchResult {
            publication: publication.name.clone(),
            success: true,
            count: stored.len(),
            error: None,
        })
    }

    /// Remove old unsaved articles, then user state left pointing at nothing.
    pub async fn retention_sweep(&self) -> anyhow::Result<RetentionStats> {
        let articles_deleted = self
            .db
            .delete_articles_older_than_unsaved(self.config.retention_days)
            .await?;
        let user_states_deleted = self.db.delete_orphaned_user_articles().await?;

        info!(
            "Retention sweep removed {} articles and {} user states",
            articles_deleted, user_states_deleted
        );

        Ok(RetentionStats {
            articles_deleted,
            user_states_deleted,
        })
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, PublicationConfig};
    use crate::tagger::TopicTagger;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <rss version="2.0">
                <channel>
                    <title>Test</title>
                    <link>https://example.com</link>
                    <description>Test feed</description>
                    {}
                </channel>
            </rss>"#,
            items
        )
    }

    fn item(title: &str, link: &str, description: &str) -> String {
        format!(
            r#"<item>
                <title>{}</title>
                <link>{}</link>
                <description>{}</description>
                <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
            </item>"#,
            title, link, description
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, status: u16, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    fn publication(name: &str, url: String) -> PublicationConfig {
        PublicationConfig {
            name: name.to_string(),
            url,
            website_url: None,
            logo_url: None,
            description: None,
            category: None,
            active: true,
        }
    }

    async fn create_ingester(configs: &[PublicationConfig]) -> (Ingester, Arc<Database>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db.sync_publications(configs).await.unwrap();
        let db = Arc::new(db);

        let fetcher = FeedFetcher::new(&FetchConfig {
            timeout: Duration::from_secs(5),
            ..FetchConfig::default()
        })
        .unwrap();
        let extractor = ItemExtractor::new(TopicTagger::with_default_topics().unwrap());
        let config = IngestConfig {
            request_delay: Duration::ZERO,
            retention_days: 90,
        };

        (Ingester::new(db.clone(), fetcher, extractor, config), db)
    }

    async fn publication_named(db: &Database, name: &str) -> Publication {
        db.get_all_publications()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    mod ingest_one_tests {
        use super::*;

        #[tokio::test]
        async fn test_successful_ingest_stores_articles() {
            let server = MockServer::start().await;
            let body = rss(&format!(
                "{}{}",
                item(
                    "Fed raises interest rates amid inflation fears",
                    "https://news.example.com/fed?utm_source=rss",
                    "The central bank moved again."
                ),
                item("Second story", "https://news.example.com/two/", "Body")
            ));
            mount_feed(&server, "/feed", 200, body).await;

            let (ingester, db) =
                create_ingester(&[publication("News", format!("{}/feed", server.uri()))]).await;
            let news = publication_named(&db, "News").await;

            let result = ingester.ingest_one(&news).await.unwrap();
            assert!(result.success);
            assert_eq!(result.count, 2);
            assert!(result.error.is_none());

            let articles = db.get_articles_for_publication(news.id, 10, 0).await.unwrap();
            assert_eq!(articles.len(), 2);
            let fed = articles
                .iter()
                .find(|a| a.url == "https://news.example.com/fed")
                .unwrap();
            assert_eq!(fed.tags(), vec!["Economic News".to_string()]);
            assert_eq!(fed.published_date, "2024-12-09T12:00:00Z");

            let news = db.get_publication(news.id).await.unwrap().unwrap();
            assert!(news.last_fetched_at.is_some());
            assert!(news.fetch_error.is_none());
        }

        #[tokio::test]
        async fn test_http_error_recorded_on_publication() {
            let server = MockServer::start().await;
            mount_feed(&server, "/feed", 500, String::new()).await;

            let (ingester, db) =
                create_ingester(&[publication("Broken", format!("{}/feed", server.uri()))]).await;
            let broken = publication_named(&db, "Broken").await;

            let result = ingester.ingest_one(&broken).await.unwrap();
            assert!(!result.success);
            assert_eq!(result.count, 0);
            assert!(result.error.as_deref().unwrap().contains("500"));

            let broken = db.get_publication(broken.id).await.unwrap().unwrap();
            assert!(broken.last_fetched_at.is_some());
            assert!(broken.fetch_error.unwrap().contains("500"));
        }

        #[tokio::test]
        async fn test_success_clears_previous_error() {
            let server = MockServer::start().await;
            mount_feed(
                &server,
                "/feed",
                200,
                rss(&item("Story", "https://a.example.com/1", "x")),
            )
            .await;

            let (ingester, db) =
                create_ingester(&[publication("Flaky", format!("{}/feed", server.uri()))]).await;
            let flaky = publication_named(&db, "Flaky").await;
            db.record_fetch_outcome(flaky.id, Some("timeout")).await.unwrap();

            ingester.ingest_one(&flaky).await.unwrap();

            let flaky = db.get_publication(flaky.id).await.unwrap().unwrap();
            assert!(flaky.fetch_error.is_none());
        }

        #[tokio::test]
        async fn test_item_without_title_skipped() {
            let server = MockServer::start().await;
            let body = rss(
                r#"<item><link>https://a.example.com/untitled</link></item>
                   <item><title>Has title</title><link>https://a.example.com/titled</link></item>"#,
            );
            mount_feed(&server, "/feed", 200, body).await;

            let (ingester, db) =
                create_ingester(&[publication("Mixed", format!("{}/feed", server.uri()))]).await;
            let mixed = publication_named(&db, "Mixed").await;

            let result = ingester.ingest_one(&mixed).await.unwrap();
            assert!(result.success);
            assert_eq!(result.count, 1);
        }

        #[tokio::test]
        async fn test_duplicate_canonical_urls_in_one_feed() {
            let server = MockServer::start().await;
            let body = rss(&format!(
                "{}{}",
                item("First", "https://a.example.com/story?utm_medium=x", "one"),
                item("Second", "https://a.example.com/story/#top", "two")
            ));
            mount_feed(&server, "/feed", 200, body).await;

            let (ingester, db) =
                create_ingester(&[publication("Dupes", format!("{}/feed", server.uri()))]).await;
            let dupes = publication_named(&db, "Dupes").await;

            let result = ingester.ingest_one(&dupes).await.unwrap();
            assert_eq!(result.count, 1);

            let articles = db.get_articles_for_publication(dupes.id, 10, 0).await.unwrap();
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].title, "Second");
        }

        #[tokio::test]
        async fn test_reingest_updates_existing_row() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&item("Old title", "https://a.example.com/1", "x"))),
                )
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/feed"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&item("New title", "https://a.example.com/1", "y"))),
                )
                .mount(&server)
                .await;

            let (ingester, db) =
                create_ingester(&[publication("Pub", format!("{}/feed", server.uri()))]).await;
            let publication = publication_named(&db, "Pub").await;

            ingester.ingest_one(&publication).await.unwrap();
            ingester.ingest_one(&publication).await.unwrap();

            let articles = db
                .get_articles_for_publication(publication.id, 10, 0)
                .await
                .unwrap();
            assert_eq!(articles.len(), 1);
            assert_eq!(articles[0].title, "New title");
        }
    }

    mod ingest_all_tests {
        use super::*;

        #[tokio::test]
        async fn test_one_failing_feed_does_not_abort_run() {
            let server = MockServer::start().await;
            mount_feed(&server, "/a", 200, rss(&item("A", "https://a.example.com/1", "x"))).await;
            mount_feed(&server, "/b", 500, String::new()).await;
            mount_feed(&server, "/c", 200, rss(&item("C", "https://c.example.com/1", "x"))).await;

            let (ingester, _db) = create_ingester(&[
                publication("A", format!("{}/a", server.uri())),
                publication("B", format!("{}/b", server.uri())),
                publication("C", format!("{}/c", server.uri())),
            ])
            .await;

            let stats = ingester.ingest_all().await.unwrap();
            assert_eq!(stats.total_feeds, 3);
            assert_eq!(stats.results.len(), 3);
            assert_eq!(stats.successful_feeds, 2);
            assert_eq!(stats.total_articles, 2);

            let failed: Vec<_> = stats.results.iter().filter(|r| !r.success).collect();
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].publication, "B");
            assert!(!ingester.is_running());
        }

        #[tokio::test]
        async fn test_storage_failure_isolated_to_one_publication() {
            let server = MockServer::start().await;
            let two_items = |host: &str| {
                rss(&format!(
                    "{}{}",
                    item("One", &format!("https://{}/1", host), "x"),
                    item("Two", &format!("https://{}/2", host), "x")
                ))
            };
            mount_feed(&server, "/a", 200, two_items("a.example.com")).await;
            mount_feed(&server, "/b", 200, two_items("b.example.com")).await;
            mount_feed(&server, "/c", 200, two_items("c.example.com")).await;

            let (ingester, db) = create_ingester(&[
                publication("A", format!("{}/a", server.uri())),
                publication("B", format!("{}/b", server.uri())),
                publication("C", format!("{}/c", server.uri())),
            ])
            .await;
            let a = publication_named(&db, "A").await;
            let b = publication_named(&db, "B").await;
            let c = publication_named(&db, "C").await;

            // Let B's first row in, then fail the second so the batch must roll back.
            sqlx::query(&format!(
                r#"
                CREATE TRIGGER fail_b BEFORE INSERT ON articles
                WHEN NEW.publication_id = {} AND NEW.url LIKE '%/2'
                BEGIN SELECT RAISE(ABORT, 'disk full'); END
                "#,
                b.id
            ))
            .execute(db.pool())
            .await
            .unwrap();

            let stats = ingester.ingest_all().await.unwrap();
            assert_eq!(stats.total_feeds, 3);
            assert_eq!(stats.successful_feeds, 2);
            assert_eq!(stats.total_articles, 4);

            let failed = stats.results.iter().find(|r| r.publication == "B").unwrap();
            assert!(!failed.success);
            assert!(failed.error.as_deref().unwrap().contains("disk full"));

            assert_eq!(db.get_article_count_for_publication(a.id).await.unwrap(), 2);
            assert_eq!(db.get_article_count_for_publication(b.id).await.unwrap(), 0);
            assert_eq!(db.get_article_count_for_publication(c.id).await.unwrap(), 2);

            let b = db.get_publication(b.id).await.unwrap().unwrap();
            assert!(b.fetch_error.unwrap().contains("disk full"));
            assert!(b.last_fetched_at.is_some());
        }

        #[tokio::test]
        async fn test_inactive_publications_excluded() {
            let server = MockServer::start().await;
            mount_feed(&server, "/on", 200, rss(&item("On", "https://a.example.com/1", "x"))).await;

            let mut off = publication("Off", format!("{}/off", server.uri()));
            off.active = false;
            let (ingester, _db) =
                create_ingester(&[publication("On", format!("{}/on", server.uri())), off]).await;

            let stats = ingester.ingest_all().await.unwrap();
            assert_eq!(stats.total_feeds, 1);
            assert_eq!(stats.results[0].publication, "On");
        }

        #[tokio::test]
        async fn test_concurrent_run_refused() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&item("Slow", "https://a.example.com/1", "x")))
                        .set_delay(Duration::from_millis(500)),
                )
                .mount(&server)
                .await;

            let (ingester, _db) =
                create_ingester(&[publication("Slow", format!("{}/feed", server.uri()))]).await;
            let ingester = Arc::new(ingester);

            let background = ingester.clone();
            let handle = tokio::spawn(async move { background.ingest_all().await });

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(ingester.is_running());
            assert!(matches!(
                ingester.ingest_all().await,
                Err(IngestError::RunInProgress)
            ));

            let stats = handle.await.unwrap().unwrap();
            assert_eq!(stats.successful_feeds, 1);
            assert!(!ingester.is_running());
        }

        #[tokio::test]
        async fn test_cancelled_run_releases_guard() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&item("Slow", "https://a.example.com/1", "x")))
                        .set_delay(Duration::from_secs(2)),
                )
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(rss(&item("Fast", "https://a.example.com/1", "x"))),
                )
                .mount(&server)
                .await;

            let (ingester, _db) =
                create_ingester(&[publication("Feed", format!("{}/feed", server.uri()))]).await;
            let ingester = Arc::new(ingester);

            let background = ingester.clone();
            let handle = tokio::spawn(async move { background.ingest_all().await });

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(ingester.is_running());
            handle.abort();
            assert!(handle.await.unwrap_err().is_cancelled());

            assert!(!ingester.is_running());
            let stats = ingester.ingest_all().await.unwrap();
            assert_eq!(stats.successful_feeds, 1);
        }

        #[tokio::test]
        async fn test_empty_run() {
            let (ingester, _db) = create_ingester(&[]).await;
            let stats = ingester.ingest_all().await.unwrap();
            assert_eq!(stats.total_feeds, 0);
            assert_eq!(stats.successful_feeds, 0);
            assert_eq!(stats.total_articles, 0);
        }
    }

    mod retention_tests {
        use super::*;
        use chrono::Duration as ChronoDuration;

        fn article(publication_id: i64, url: &str, age_days: i64) -> NewArticle {
            NewArticle {
                title: "T".to_string(),
                content: String::new(),
                summary: String::new(),
                url: url.to_string(),
                guid: url.to_string(),
                author: None,
                published_date: Utc::now() - ChronoDuration::days(age_days),
                publication_id,
                image_url: None,
                word_count: 0,
                reading_time: 0,
                tags: Vec::new(),
            }
        }

        #[tokio::test]
        async fn test_sweep_keeps_saved_and_recent() {
            let (ingester, db) =
                create_ingester(&[publication("P", "https://p.example.com/rss".to_string())])
                    .await;
            let p = publication_named(&db, "P").await;

            let stored = db
                .bulk_upsert_articles(&[
                    article(p.id, "https://p.example.com/old", 120),
                    article(p.id, "https://p.example.com/old-saved", 120),
                    article(p.id, "https://p.example.com/new", 1),
                ])
                .await
                .unwrap();

            db.mark_read(1, stored[0].id, true).await.unwrap();
            db.mark_saved(1, stored[1].id, true).await.unwrap();

            let stats = ingester.retention_sweep().await.unwrap();
            assert_eq!(
                stats,
                RetentionStats {
                    articles_deleted: 1,
                    user_states_deleted: 1,
                }
            );
            assert_eq!(db.get_article_count_for_publication(p.id).await.unwrap(), 2);
        }
    }
}
