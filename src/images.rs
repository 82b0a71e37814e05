use crate::config::{Images, Storage};
use crate::db::Pool;
use crate::model::{ImageAsset, ImageCheck, StageReport};
use crate::storage::ObjectStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One candidate image fetched for an author.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Image lookup collaborator: candidate portraits for a person, best first.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn search(&self, author: &str, limit: u32) -> Result<Vec<FetchedImage>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    url: String,
}

/// Provider backed by an image search endpoint returning
/// `{"results": [{"url": ...}, ...]}`; each hit is downloaded in turn.
#[derive(Clone)]
pub struct SearchApiProvider {
    http: Client,
    search_url: Url,
}

impl fmt::Debug for SearchApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchApiProvider")
            .field("search_url", &self.search_url)
            .finish_non_exhaustive()
    }
}

impl SearchApiProvider {
    pub fn new(search_url: &str) -> Result<Self> {
        let search_url = Url::parse(search_url).context("invalid image search URL")?;
        let http = Client::builder()
            .user_agent("storymill/0.1")
            .build()
            .expect("reqwest client");
        Ok(Self { http, search_url })
    }
}

/// Stored filename for the nth image of an author: `{Author_Key}_{n}.{ext}`.
/// Downstream stages key on this shape (the alt-text custom id is the stem,
/// and the resizer drops `…1.jpg`, the provider's usual junk first hit).
pub fn image_filename(author_key: &str, index: usize, source_url: &str) -> Option<String> {
    let path = Url::parse(source_url).ok()?;
    let ext = std::path::Path::new(path.path())
        .extension()?
        .to_str()?
        .to_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(format!("{author_key}_{index}.{ext}"))
}

/// Author key used in object keys and image filenames: spaces to underscores.
pub fn author_key(author: &str) -> String {
    author.trim().replace(' ', "_")
}

#[async_trait]
impl ImageProvider for SearchApiProvider {
    async fn search(&self, author: &str, limit: u32) -> Result<Vec<FetchedImage>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("query", author)
            .append_pair("limit", &limit.to_string());
        let res = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to reach image search")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("image search failed {}: {}", status, body));
        }
        let hits: SearchResponse = res.json().await.context("invalid search response")?;

        let key = author_key(author);
        let mut images = Vec::new();
        for (i, hit) in hits.results.iter().take(limit as usize).enumerate() {
            let Some(filename) = image_filename(&key, i + 1, &hit.url) else {
                continue;
            };
            match self.http.get(&hit.url).send().await {
                Ok(res) if res.status().is_success() => match res.bytes().await {
                    Ok(bytes) => {
                        debug!(url = %hit.url, filename, "downloaded author image");
                        images.push(FetchedImage {
                            filename,
                            bytes: bytes.to_vec(),
                        });
                    }
                    Err(err) => warn!(?err, url = %hit.url, "image body read failed; skipping"),
                },
                Ok(res) => warn!(status = %res.status(), url = %hit.url, "image fetch failed; skipping"),
                Err(err) => warn!(?err, url = %hit.url, "image fetch failed; skipping"),
            }
        }
        Ok(images)
    }
}

/// Fetch portraits for every author in the oldest scrape run that still has
/// unchecked authors, upload them to object storage, and record the CDN URLs.
/// One alt-text batch task id covers the whole run. Authors whose search or
/// uploads fail are skipped and stay unchecked for a retry.
#[instrument(skip_all)]
pub async fn download_author_images(
    pool: &Pool,
    provider: &dyn ImageProvider,
    store: &dyn ObjectStore,
    images: &Images,
    storage: &Storage,
) -> Result<StageReport> {
    let scrape_id: Option<String> = sqlx::query_scalar(
        "SELECT scrape_id FROM quote_scraped_data
         WHERE author_image_check != ? AND scrape_id IS NOT NULL
         GROUP BY scrape_id ORDER BY MIN(timestamp) LIMIT 1",
    )
    .bind(ImageCheck::Checked.as_str())
    .fetch_optional(pool)
    .await?;
    let Some(scrape_id) = scrape_id else {
        return Ok(StageReport::no_data("No scrape runs awaiting images."));
    };

    let authors: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT author_name FROM quote_scraped_data
         WHERE scrape_id = ? AND author_image_check != ?",
    )
    .bind(&scrape_id)
    .bind(ImageCheck::Checked.as_str())
    .fetch_all(pool)
    .await?;

    let short = Uuid::new_v4().simple().to_string();
    let batch_task_id = format!("{}_i1", &short[..8]);

    let mut assets: Vec<ImageAsset> = Vec::new();
    let mut completed_authors: Vec<String> = Vec::new();
    for author in &authors {
        let fetched = match provider.search(author, images.per_author).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(?err, author, "image search failed; skipping author");
                continue;
            }
        };
        // The search completed, so this author is consumed for the run even
        // when it yields nothing usable; otherwise a zero-image author would
        // pin the oldest-run selection forever.
        completed_authors.push(author.clone());
        let key = author_key(author);
        for image in fetched {
            let object_key = format!("{}{key}/{}", storage.key_prefix, image.filename);
            match store.put_object(&object_key, image.bytes).await {
                Ok(cdn_url) => assets.push(ImageAsset {
                    author: author.clone(),
                    filename: image.filename,
                    cdn_url,
                    batch_task_id: batch_task_id.clone(),
                    batch_custom_id: format!("{batch_task_id}_{key}"),
                }),
                Err(err) => warn!(?err, key = object_key, "upload failed; skipping image"),
            }
        }
    }

    if completed_authors.is_empty() {
        return Ok(StageReport::no_data("Image search failed for every author."));
    }

    let mut tx = pool.begin().await?;
    for asset in &assets {
        sqlx::query(
            "INSERT INTO image_fetched_data (
                author, filename, cdn_url, batch_task_id, batch_custom_id,
                batch_type, batch_created
             ) VALUES (?, ?, ?, ?, ?, 'Auto', 0)",
        )
        .bind(&asset.author)
        .bind(&asset.filename)
        .bind(&asset.cdn_url)
        .bind(&asset.batch_task_id)
        .bind(&asset.batch_custom_id)
        .execute(&mut *tx)
        .await?;
    }
    for author in &completed_authors {
        sqlx::query(
            "UPDATE quote_scraped_data SET author_image_check = ?
             WHERE scrape_id = ? AND author_name = ?",
        )
        .bind(ImageCheck::Checked.as_str())
        .bind(&scrape_id)
        .bind(author)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    if assets.is_empty() {
        return Ok(StageReport::no_data("No images could be fetched for this run.")
            .with_extra("authors", serde_json::json!(completed_authors.len())));
    }
    info!(
        images = assets.len(),
        authors = completed_authors.len(),
        batch_task_id,
        "author images stored"
    );
    Ok(StageReport::success(assets.len() as u64)
        .with_extra("batch_task_id", serde_json::json!(batch_task_id))
        .with_extra("authors", serde_json::json!(completed_authors.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_follow_author_index_shape() {
        assert_eq!(
            image_filename("Rumi", 1, "https://img.example/a/rumi.jpg").as_deref(),
            Some("Rumi_1.jpg")
        );
        assert_eq!(
            image_filename("Albert_Einstein", 3, "https://img.example/x.PNG").as_deref(),
            Some("Albert_Einstein_3.png")
        );
        assert!(image_filename("Rumi", 1, "https://img.example/page.html").is_none());
        assert!(image_filename("Rumi", 1, "https://img.example/noext").is_none());
    }

    #[test]
    fn author_key_replaces_spaces() {
        assert_eq!(author_key(" Albert Einstein "), "Albert_Einstein");
    }
}
