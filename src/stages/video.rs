use crate::db::{self, Pool};
use crate::model::StageReport;
use crate::stages::distribute::DISTRIBUTION_TABLE;
use anyhow::Result;
use rand::Rng;
use sqlx::Row;
use tracing::{info, instrument};

pub const VIDEO_MERGED_TABLE: &str = "video_meta_added_table";
pub const CLEANED_TABLE: &str = "cleaned_video_meta";

const VIDEO_COLUMNS: [&str; 5] = [
    "s10video1",
    "hookline",
    "s10alt1",
    "videoscreenshot",
    "s10caption1",
];

/// Attach one randomly chosen video metadata row (slide 10) to every
/// distributed record. The whole output table is rebuilt each run.
#[instrument(skip_all)]
pub async fn assign_video_metadata<R: Rng>(pool: &Pool, rng: &mut R) -> Result<StageReport> {
    let dist_columns = db::table_columns(pool, DISTRIBUTION_TABLE).await?;
    let dist_rows = db::fetch_text_rows(pool, DISTRIBUTION_TABLE, &dist_columns, None, None).await?;
    if dist_rows.is_empty() {
        return Ok(StageReport::no_data("No distributed records."));
    }

    let videos = sqlx::query(
        "SELECT s10video1, hookline, s10alt1, videoscreenshot, s10caption1 FROM video_metadata",
    )
    .fetch_all(pool)
    .await?;
    if videos.is_empty() {
        return Ok(StageReport::no_data("video_metadata table is empty."));
    }

    let mut columns = dist_columns.clone();
    columns.extend(VIDEO_COLUMNS.iter().map(|c| c.to_string()));

    let mut out_rows: Vec<Vec<String>> = Vec::with_capacity(dist_rows.len());
    for row in dist_rows {
        let video = &videos[rng.gen_range(0..videos.len())];
        let mut values = row;
        for col in VIDEO_COLUMNS {
            values.push(video.get::<Option<String>, _>(col).unwrap_or_default());
        }
        out_rows.push(values);
    }

    let mut tx = pool.begin().await?;
    db::replace_text_table(&mut tx, VIDEO_MERGED_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, VIDEO_MERGED_TABLE, &columns, &out_rows).await?;
    tx.commit().await?;

    info!(rows = out_rows.len(), "video metadata assigned");
    Ok(StageReport::success(out_rows.len() as u64))
}

/// A column name in the video-merged table mapped to its cleaned name, or
/// None when the column is dropped.
fn cleaned_name(col: &str) -> Option<String> {
    if col == "video_data_status" {
        return None;
    }
    if col == "author_name" {
        return Some("writername".to_string());
    }
    for i in 2..=9 {
        for variant in [
            "potraightcoverurl",
            "landscapecoverurl",
            "squarecoverurl",
            "socialthumbnailcoverurl",
            "nextstoryimageurl",
        ] {
            if col == format!("{variant}{i}") {
                return None;
            }
        }
        if col == format!("standardurl{i}") {
            return Some(format!("s{i}imageurl1"));
        }
    }
    Some(col.to_string())
}

/// Drop the per-slide URL variants the later stages never read, rename the
/// slide images to their template names, and add the enrichment flag.
#[instrument(skip_all)]
pub async fn clean_video_meta(pool: &Pool) -> Result<StageReport> {
    let source_columns = db::table_columns(pool, VIDEO_MERGED_TABLE).await?;
    let rows = db::fetch_text_rows(pool, VIDEO_MERGED_TABLE, &source_columns, None, None).await?;
    if rows.is_empty() {
        return Ok(StageReport::no_data("No video-merged records."));
    }

    let keep: Vec<(usize, String)> = source_columns
        .iter()
        .enumerate()
        .filter_map(|(i, col)| cleaned_name(col).map(|name| (i, name)))
        .collect();
    let columns: Vec<String> = keep.iter().map(|(_, name)| name.clone()).collect();
    let out_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| keep.iter().map(|(i, _)| row[*i].clone()).collect())
        .collect();

    let mut tx = pool.begin().await?;
    db::replace_text_table(&mut tx, CLEANED_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, CLEANED_TABLE, &columns, &out_rows).await?;
    sqlx::query(&format!(
        "ALTER TABLE {CLEANED_TABLE} ADD COLUMN meta_data_added INTEGER NOT NULL DEFAULT 0"
    ))
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(rows = out_rows.len(), "video metadata cleaned");
    Ok(StageReport::success(out_rows.len() as u64))
}
