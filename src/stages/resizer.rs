use crate::config::Storage;
use crate::db::Pool;
use crate::model::StageReport;
use crate::resize::{key_from_public_url, resize_url, RESIZE_PRESETS};
use anyhow::Result;
use sqlx::Row;
use tracing::{info, instrument};

/// Generate the six resized-URL variants for every image that has alt text
/// and has not been resized yet. Filenames ending in `1.jpg` are the image
/// provider's junk first hit and are dropped here for good.
#[instrument(skip_all)]
pub async fn generate_resized_urls(pool: &Pool, storage: &Storage) -> Result<StageReport> {
    let rows = sqlx::query(
        "SELECT id, author, filename, cdn_url, alttxt FROM alttxt_processed_data
         WHERE status_resizer = 0",
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(StageReport::no_data("No unprocessed rows in alttxt_processed_data."));
    }

    let keep: Vec<&sqlx::sqlite::SqliteRow> = rows
        .iter()
        .filter(|r| !r.get::<String, _>("filename").ends_with("1.jpg"))
        .collect();
    if keep.is_empty() {
        return Ok(StageReport::no_data("All rows were junk first images."));
    }

    let mut processed: Vec<String> = Vec::with_capacity(keep.len());
    let mut tx = pool.begin().await?;
    for row in &keep {
        let filename: String = row.get("filename");
        let cdn_url: String = row.get("cdn_url");
        let key = key_from_public_url(&cdn_url, &storage.cdn_base_url, &storage.media_base_url);

        let urls: Vec<String> = RESIZE_PRESETS
            .iter()
            .map(|(_, w, h)| {
                resize_url(&storage.media_base_url, &storage.bucket, &key, *w, *h)
            })
            .collect();

        sqlx::query(
            "INSERT INTO resized_url_data (
                author, filename, cdn_url, alttxt,
                potraightcoverurl, landscapecoverurl, squarecoverurl,
                socialthumbnailcoverurl, nextstoryimageurl, standardurl
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.get::<String, _>("author"))
        .bind(&filename)
        .bind(&cdn_url)
        .bind(row.get::<String, _>("alttxt"))
        .bind(&urls[0])
        .bind(&urls[1])
        .bind(&urls[2])
        .bind(&urls[3])
        .bind(&urls[4])
        .bind(&urls[5])
        .execute(&mut *tx)
        .await?;
        processed.push(filename);
    }
    for filename in &processed {
        sqlx::query("UPDATE alttxt_processed_data SET status_resizer = 1 WHERE filename = ?")
            .bind(filename)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(processed = processed.len(), "resize URLs generated");
    Ok(StageReport::success(processed.len() as u64))
}
