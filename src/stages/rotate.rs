use crate::db::{self, Pool};
use crate::model::StageReport;
use crate::stages::metadata::META_TABLE;
use anyhow::{anyhow, Result};
use tracing::{info, instrument};

pub const PRE_FINAL_TABLE: &str = "pre_final_stage_data";

const NAV_COLUMNS: [&str; 8] = [
    "prevstorytitle",
    "prevstorylink",
    "nextstorytitle",
    "nextstorylink",
    "nextstoryimage",
    "nextstoryimagealt",
    "s11paragraph1",
    "s11btnlink",
];

/// Compute ring navigation indices for `n` records: each record points to its
/// neighbours, wrapping at both ends. A single record points to itself.
pub fn ring_neighbours(n: usize, i: usize) -> (usize, usize) {
    let prev = if i == 0 { n - 1 } else { i - 1 };
    let next = if i + 1 == n { 0 } else { i + 1 };
    (prev, next)
}

/// Link every enriched record to its neighbours in `seq` order, forming a
/// closed ring of prev/next story navigation. Rebuilds the pre-final table.
#[instrument(skip_all)]
pub async fn rotate_navigation(pool: &Pool) -> Result<StageReport> {
    let source_columns = db::table_columns(pool, META_TABLE).await?;
    let rows = db::fetch_text_rows(
        pool,
        META_TABLE,
        &source_columns,
        None,
        Some("CAST(seq AS INTEGER)"),
    )
    .await?;
    if rows.is_empty() {
        return Ok(StageReport::no_data("No enriched records to rotate."));
    }

    let idx_of = |name: &str| {
        source_columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("{META_TABLE} has no {name} column"))
    };
    let title = idx_of("storytitle")?;
    let canurl = idx_of("canurl")?;
    let square = idx_of("squarecoverurl")?;
    let alt = idx_of("s1alt1")?;

    let mut columns = source_columns.clone();
    columns.extend(NAV_COLUMNS.iter().map(|c| c.to_string()));

    let n = rows.len();
    let mut out_rows: Vec<Vec<String>> = Vec::with_capacity(n);
    for (i, row) in rows.iter().enumerate() {
        let (prev, next) = ring_neighbours(n, i);
        let mut values = row.clone();
        values.push(rows[prev][title].clone());
        values.push(rows[prev][canurl].clone());
        values.push(rows[next][title].clone());
        values.push(rows[next][canurl].clone());
        values.push(rows[next][square].clone());
        values.push(rows[next][alt].clone());
        values.push(rows[next][title].clone());
        values.push(rows[next][canurl].clone());
        out_rows.push(values);
    }

    let mut tx = pool.begin().await?;
    db::replace_text_table(&mut tx, PRE_FINAL_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, PRE_FINAL_TABLE, &columns, &out_rows).await?;
    tx.commit().await?;

    info!(rows = n, "navigation ring built");
    Ok(StageReport::success(n as u64))
}
