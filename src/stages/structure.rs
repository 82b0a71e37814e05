use crate::db::Pool;
use crate::model::{StageReport, StructureStatus, StructuredGroup};
use anyhow::Result;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::{info, instrument};

const MAX_QUOTE_CHARS: usize = 180;
const GROUP_SIZE: usize = 8;

/// Group pending quotes into batches of exactly eight per author. Trailing
/// groups smaller than eight are discarded, never persisted; the quotes they
/// hold stay `Pending` for a later run.
#[instrument(skip_all)]
pub async fn structure_quotes(pool: &Pool) -> Result<StageReport> {
    let rows = sqlx::query(
        "SELECT text_structure_id, quote, author_name FROM quote_scraped_data
         WHERE text_structure_status = ?",
    )
    .bind(StructureStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(StageReport::no_data("No pending quotes found."));
    }

    // Scrape-run ids in first-appearance order get short task ids t1, t2, ...
    let mut task_ids: BTreeMap<String, String> = BTreeMap::new();
    let mut seen_order: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for row in &rows {
        let structure_id: String = row.get("text_structure_id");
        let quote: String = row.get("quote");
        let author: String = row.get("author_name");
        let trimmed = quote.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_QUOTE_CHARS {
            continue;
        }
        if !seen_order.contains(&structure_id) {
            seen_order.push(structure_id.clone());
        }
        grouped
            .entry((structure_id, author))
            .or_default()
            .push(trimmed.to_string());
    }
    for (i, id) in seen_order.iter().enumerate() {
        let short = id.get(..8).unwrap_or(id);
        task_ids.insert(id.clone(), format!("{short}-t{}", i + 1));
    }

    let mut groups: Vec<StructuredGroup> = Vec::new();
    let mut used_quotes: Vec<String> = Vec::new();
    for ((structure_id, author), quotes) in &grouped {
        let task_id = &task_ids[structure_id];
        let short = structure_id.get(..8).unwrap_or(structure_id);
        let author_clean = author.replace(' ', "-");
        for (idx, chunk) in quotes.chunks_exact(GROUP_SIZE).enumerate() {
            let n = idx + 1;
            let mut paragraphs: [String; 8] = Default::default();
            for (slot, quote) in paragraphs.iter_mut().zip(chunk) {
                *slot = quote.clone();
            }
            used_quotes.extend(chunk.iter().cloned());
            groups.push(StructuredGroup {
                text_structure_id: structure_id.clone(),
                batch_custom_id: format!("{short}-{n}-{author_clean}-{n}"),
                paragraphs,
                author_name: author.clone(),
                batch_task_id: task_id.clone(),
            });
        }
    }

    if groups.is_empty() {
        return Ok(StageReport::success(0).with_message("No complete 8-quote groups found."));
    }

    let batches = seen_order.len();
    let authors = groups
        .iter()
        .map(|g| g.author_name.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    let mut tx = pool.begin().await?;
    for g in &groups {
        sqlx::query(
            "INSERT INTO template1_text_structure_data (
                text_structure_id, batch_custom_id,
                s2paragraph1, s3paragraph1, s4paragraph1, s5paragraph1,
                s6paragraph1, s7paragraph1, s8paragraph1, s9paragraph1,
                author_name, batch_type, batch_task_id, batch_created
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'Auto', ?, 0)",
        )
        .bind(&g.text_structure_id)
        .bind(&g.batch_custom_id)
        .bind(&g.paragraphs[0])
        .bind(&g.paragraphs[1])
        .bind(&g.paragraphs[2])
        .bind(&g.paragraphs[3])
        .bind(&g.paragraphs[4])
        .bind(&g.paragraphs[5])
        .bind(&g.paragraphs[6])
        .bind(&g.paragraphs[7])
        .bind(&g.author_name)
        .bind(&g.batch_task_id)
        .execute(&mut *tx)
        .await?;
    }
    // SQLite caps bind parameters per statement; flip statuses in slices.
    for chunk in used_quotes.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "UPDATE quote_scraped_data SET text_structure_status = ?
             WHERE quote IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(StructureStatus::Completed.as_str());
        for quote in chunk {
            query = query.bind(quote);
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!(groups = groups.len(), batches, authors, "quotes structured");
    Ok(StageReport::success(groups.len() as u64)
        .with_extra("batches_created", serde_json::json!(batches))
        .with_extra("authors_structured", serde_json::json!(authors)))
}
