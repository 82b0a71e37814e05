use crate::db::Pool;
use crate::model::StageReport;
use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, instrument};

/// Match generated alt text back to the fetched images it was requested for.
/// The correlation key is the image filename stem, which was the alt job's
/// custom id. Matched pairs land in `alttxt_match_table` and, joined with the
/// image row, in `alttxt_processed_data` ready for the resizer.
#[instrument(skip_all)]
pub async fn match_alt_text(pool: &Pool) -> Result<StageReport> {
    let images = sqlx::query("SELECT id, author, filename, cdn_url FROM image_fetched_data")
        .fetch_all(pool)
        .await?;
    if images.is_empty() {
        return Ok(StageReport::no_data("No fetched images to match."));
    }

    let alt_rows = sqlx::query("SELECT custom_id, alttxt FROM image_batch_processed_data")
        .fetch_all(pool)
        .await?;
    let alt_by_id: HashMap<String, String> = alt_rows
        .iter()
        .map(|r| (r.get::<String, _>("custom_id"), r.get::<String, _>("alttxt")))
        .collect();

    let mut matched = 0u64;
    let mut tx = pool.begin().await?;
    for row in &images {
        let filename: String = row.get("filename");
        let custom_id = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| filename.clone());
        let Some(alttxt) = alt_by_id.get(&custom_id) else {
            continue;
        };
        if alttxt == "NA" || alttxt.is_empty() {
            continue;
        }

        sqlx::query("INSERT INTO alttxt_match_table (custom_id, alttxt) VALUES (?, ?)")
            .bind(&custom_id)
            .bind(alttxt)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO alttxt_processed_data (
                image_id, author, filename, cdn_url, alttxt, status_resizer
             ) VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(row.get::<i64, _>("id"))
        .bind(row.get::<String, _>("author"))
        .bind(&filename)
        .bind(row.get::<String, _>("cdn_url"))
        .bind(alttxt)
        .execute(&mut *tx)
        .await?;
        matched += 1;
    }
    tx.commit().await?;

    info!(matched, total_checked = images.len(), "alt text matched");
    Ok(StageReport::success(matched)
        .with_extra("total_checked", serde_json::json!(images.len())))
}
