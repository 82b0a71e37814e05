use crate::db::{self, Pool};
use crate::enrich::{generate_urls, iso_utc_now, pick_user, STATIC_METADATA};
use crate::model::StageReport;
use crate::stages::video::CLEANED_TABLE;
use anyhow::Result;
use rand::Rng;
use sqlx::Row;
use tracing::{info, instrument};

pub const META_TABLE: &str = "meta_data";

const ENRICHED_COLUMNS: [&str; 9] = [
    "uuid",
    "urlslug",
    "canurl",
    "canurl1",
    "pagetitle",
    "publishedtime",
    "modifiedtime",
    "user",
    "userprofileurl",
];

/// Enrich cleaned records with their publishing identity: slug and canonical
/// URLs, page title, timestamps, an assigned publisher profile, the static
/// site metadata block, and a stable `seq` position that later ordering
/// relies on. Processed source rows are flagged so reruns only pick up new
/// records.
#[instrument(skip_all)]
pub async fn generate_metadata<R: Rng>(pool: &Pool, rng: &mut R) -> Result<StageReport> {
    let source_columns: Vec<String> = db::table_columns(pool, CLEANED_TABLE)
        .await?
        .into_iter()
        .filter(|c| c != "meta_data_added")
        .collect();

    let col_list: Vec<String> = source_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect();
    let sql = format!(
        "SELECT id, {} FROM {CLEANED_TABLE} WHERE meta_data_added = 0",
        col_list.join(", ")
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    if rows.is_empty() {
        return Ok(StageReport::no_data("No cleaned records awaiting metadata."));
    }

    // Static keys already present in the source (s10caption1 arrives with the
    // video metadata) are overwritten in place, not duplicated as columns.
    let (static_overrides, static_new): (Vec<(&str, &str)>, Vec<(&str, &str)>) = STATIC_METADATA
        .iter()
        .copied()
        .partition(|(k, _)| source_columns.iter().any(|c| c == k));

    let mut columns = source_columns.clone();
    columns.extend(ENRICHED_COLUMNS.iter().map(|c| c.to_string()));
    columns.extend(static_new.iter().map(|(k, _)| k.to_string()));
    columns.push("seq".into());

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(META_TABLE)
    .fetch_one(pool)
    .await?;
    let base_seq: i64 = if existing > 0 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {META_TABLE}"))
            .fetch_one(pool)
            .await?
    } else {
        0
    };

    let title_idx = source_columns
        .iter()
        .position(|c| c == "storytitle")
        .ok_or_else(|| anyhow::anyhow!("{CLEANED_TABLE} has no storytitle column"))?;

    let mut ids: Vec<i64> = Vec::with_capacity(rows.len());
    let mut out_rows: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        ids.push(row.get::<i64, _>("id"));
        let mut values: Vec<String> = Vec::with_capacity(columns.len());
        for (i, _) in source_columns.iter().enumerate() {
            values.push(row.get::<Option<String>, _>(i + 1).unwrap_or_default());
        }
        for (key, value) in &static_overrides {
            if let Some(pos) = source_columns.iter().position(|c| c == key) {
                values[pos] = value.to_string();
            }
        }

        let storytitle = values[title_idx].clone();
        let bundle = generate_urls(&storytitle, rng);
        let now = iso_utc_now();
        let (user, profile) = pick_user(rng);
        values.push(bundle.nano_id);
        values.push(bundle.urlslug);
        values.push(bundle.canurl);
        values.push(bundle.canurl1);
        values.push(format!("{storytitle} | Suvichaar"));
        values.push(now.clone());
        values.push(now);
        values.push(user.to_string());
        values.push(profile.to_string());
        for (_, v) in &static_new {
            values.push(v.to_string());
        }
        values.push((base_seq + idx as i64 + 1).to_string());
        out_rows.push(values);
    }

    let mut tx = pool.begin().await?;
    db::create_text_table_if_missing(&mut tx, META_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, META_TABLE, &columns, &out_rows).await?;
    for id in &ids {
        sqlx::query(&format!(
            "UPDATE {CLEANED_TABLE} SET meta_data_added = 1 WHERE id = ?"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(rows = out_rows.len(), "metadata generated");
    Ok(StageReport::success(out_rows.len() as u64))
}
