use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;

use storymill::config::{Images, Storage};
use storymill::db::{ensure_schema, Pool};
use storymill::images::{download_author_images, FetchedImage, ImageProvider};
use storymill::model::Outcome;
use storymill::storage::ObjectStore;

/// Provider serving a fixed number of images per author.
struct FixedProvider {
    per_author: HashMap<String, usize>,
}

#[async_trait]
impl ImageProvider for FixedProvider {
    async fn search(&self, author: &str, _limit: u32) -> Result<Vec<FetchedImage>> {
        let count = self.per_author.get(author).copied().unwrap_or(0);
        Ok((1..=count)
            .map(|n| FetchedImage {
                filename: format!("{}_{n}.jpg", author.replace(' ', "_")),
                bytes: vec![0u8; 4],
            })
            .collect())
    }
}

/// Store that records keys and serves CDN URLs without any network.
struct MemoryStore {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, _bytes: Vec<u8>) -> Result<String> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(format!("https://cdn.suvichaar.org/{key}"))
    }
}

fn images_cfg() -> Images {
    Images {
        search_url: "https://images.suvichaar.org/search".into(),
        per_author: 15,
    }
}

fn storage_cfg() -> Storage {
    Storage {
        upload_base_url: "https://upload.suvichaar.org/suvichaarapp".into(),
        bucket: "suvichaarapp".into(),
        key_prefix: "media/".into(),
        cdn_base_url: "https://cdn.suvichaar.org/".into(),
        media_base_url: "https://media.suvichaar.org/".into(),
    }
}

async fn setup_pool() -> Pool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    ensure_schema(&pool).await.unwrap();
    pool
}

async fn seed_quote(pool: &Pool, author: &str, scrape_id: &str, ts: &str) {
    sqlx::query(
        "INSERT INTO quote_scraped_data (quote, author_name, scrape_id, timestamp)
         VALUES (?, ?, ?, ?)",
    )
    .bind(format!("{author} says something"))
    .bind(author)
    .bind(scrape_id)
    .bind(ts)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn zero_image_author_does_not_wedge_the_queue() -> Result<()> {
    let pool = setup_pool().await;
    seed_quote(&pool, "Ghost", "old-run", "2026-01-01 00:00:00").await;
    seed_quote(&pool, "Rumi", "new-run", "2026-02-01 00:00:00").await;

    let provider = FixedProvider {
        per_author: HashMap::from([("Rumi".to_string(), 2)]),
    };
    let store = MemoryStore {
        keys: Mutex::new(Vec::new()),
    };

    // Oldest run first: the search succeeds but yields nothing, so the run
    // is consumed rather than retried forever.
    let report =
        download_author_images(&pool, &provider, &store, &images_cfg(), &storage_cfg()).await?;
    assert_eq!(report.status, Outcome::NoData);
    let ghost: String = sqlx::query_scalar(
        "SELECT author_image_check FROM quote_scraped_data WHERE author_name = 'Ghost'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(ghost, "checked");
    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_fetched_data")
        .fetch_one(&pool)
        .await?;
    assert_eq!(stored, 0);

    // The newer run is reachable on the next invocation.
    let report =
        download_author_images(&pool, &provider, &store, &images_cfg(), &storage_cfg()).await?;
    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.rows, Some(2));
    let rows = sqlx::query("SELECT author, filename, cdn_url FROM image_fetched_data ORDER BY id")
        .fetch_all(&pool)
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<String, _>("author"), "Rumi");
    assert_eq!(rows[0].get::<String, _>("filename"), "Rumi_1.jpg");
    assert!(store
        .keys
        .lock()
        .unwrap()
        .contains(&"media/Rumi/Rumi_1.jpg".to_string()));

    // Nothing left to process.
    let report =
        download_author_images(&pool, &provider, &store, &images_cfg(), &storage_cfg()).await?;
    assert_eq!(report.status, Outcome::NoData);
    Ok(())
}

#[tokio::test]
async fn failed_searches_stay_unchecked_for_retry() -> Result<()> {
    struct FailingProvider;

    #[async_trait]
    impl ImageProvider for FailingProvider {
        async fn search(&self, _author: &str, _limit: u32) -> Result<Vec<FetchedImage>> {
            Err(anyhow::anyhow!("search backend unreachable"))
        }
    }

    let pool = setup_pool().await;
    seed_quote(&pool, "Rumi", "run-1", "2026-01-01 00:00:00").await;

    let store = MemoryStore {
        keys: Mutex::new(Vec::new()),
    };
    let report =
        download_author_images(&pool, &FailingProvider, &store, &images_cfg(), &storage_cfg())
            .await?;
    assert_eq!(report.status, Outcome::NoData);

    // A transport failure leaves the author pending for the next run.
    let check: String = sqlx::query_scalar(
        "SELECT author_image_check FROM quote_scraped_data WHERE author_name = 'Rumi'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(check, "Unchecked");
    Ok(())
}
