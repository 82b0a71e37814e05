//! Batch job lifecycle: build and submit JSONL jobs to the external LLM batch
//! endpoint, and poll submitted jobs for completed output.

use crate::db::Pool;
use crate::llm::{self, BatchService};
use crate::model::{BatchKind, CompletionStatus, StageReport};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::Row;
use std::path::Path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Submit one text-metadata batch over every structured group not yet sent.
///
/// No DB row is touched until both the payload upload and the job submission
/// have succeeded; the tracker inserts and the `batch_created` flips then
/// commit together.
#[instrument(skip_all)]
pub async fn submit_text_batch(
    pool: &Pool,
    api: &dyn BatchService,
    deployment: &str,
    artifact_dir: &Path,
) -> Result<StageReport> {
    let rows = sqlx::query(
        "SELECT batch_task_id, batch_custom_id, author_name,
                s2paragraph1, s3paragraph1, s4paragraph1, s5paragraph1,
                s6paragraph1, s7paragraph1, s8paragraph1, s9paragraph1
         FROM template1_text_structure_data
         WHERE batch_created = 0",
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(StageReport::no_data("No unprocessed quotes found."));
    }

    let mut requests = Vec::with_capacity(rows.len());
    let mut task_ids: Vec<String> = Vec::new();
    for row in &rows {
        let task_id: String = row.get("batch_task_id");
        if !task_ids.contains(&task_id) {
            task_ids.push(task_id);
        }
        let custom_id: String = row.get("batch_custom_id");
        let author: String = row.get("author_name");
        let quotes: Vec<String> = (2..10)
            .map(|i| row.get::<String, _>(format!("s{i}paragraph1").as_str()))
            .collect();
        requests.push(llm::build_text_request(&custom_id, deployment, &author, &quotes));
    }

    let filename = format!(
        "quotefancy_text_batch_{}.jsonl",
        Utc::now().format("%Y%m%d%H%M%S")
    );
    let handle = upload_and_submit(api, artifact_dir, &filename, &requests).await?;

    let mut tx = pool.begin().await?;
    for task_id in &task_ids {
        insert_tracker(&mut tx, task_id, BatchKind::Text, &handle, &filename).await?;
        sqlx::query(
            "UPDATE template1_text_structure_data SET batch_created = 1 WHERE batch_task_id = ?",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(batch_id = %handle.batch_id, prompts = requests.len(), "text batch submitted");
    Ok(StageReport::success(requests.len() as u64)
        .with_extra("batch_id", json!(handle.batch_id))
        .with_extra("file_id", json!(handle.file_id))
        .with_extra("jsonl_file", json!(filename))
        .with_extra("tracking_url", json!(handle.tracking_url)))
}

/// Submit one alt-text batch over every fetched image not yet sent. The whole
/// job shares a single tracker row; custom ids are image filename stems.
#[instrument(skip_all)]
pub async fn submit_image_batch(
    pool: &Pool,
    api: &dyn BatchService,
    deployment: &str,
    artifact_dir: &Path,
) -> Result<StageReport> {
    let rows = sqlx::query(
        "SELECT author, filename, cdn_url FROM image_fetched_data WHERE batch_created = 0",
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(StageReport::no_data("No unprocessed images found."));
    }

    let mut requests = Vec::with_capacity(rows.len());
    for row in &rows {
        let author: String = row.get("author");
        let filename: String = row.get("filename");
        let cdn_url: String = row.get("cdn_url");
        let custom_id = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or(filename);
        requests.push(llm::build_alt_request(&custom_id, deployment, &author, &cdn_url));
    }

    let batch_task_id = format!("{}_i1", &Uuid::new_v4().to_string()[..8]);
    let filename = format!(
        "image_alt_batch_{}.jsonl",
        Utc::now().format("%Y%m%d%H%M%S")
    );
    let handle = upload_and_submit(api, artifact_dir, &filename, &requests).await?;

    // The rows are reassigned to the submission's task id, so the tracker row
    // and image_fetched_data always agree on lineage even when the job spans
    // several download runs.
    let mut tx = pool.begin().await?;
    insert_tracker(&mut tx, &batch_task_id, BatchKind::ImageAlt, &handle, &filename).await?;
    sqlx::query(
        "UPDATE image_fetched_data SET batch_created = 1, batch_task_id = ?
         WHERE batch_created = 0",
    )
    .bind(&batch_task_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    info!(batch_id = %handle.batch_id, images = requests.len(), "image alt batch submitted");
    Ok(StageReport::success(requests.len() as u64)
        .with_extra("batch_id", json!(handle.batch_id))
        .with_extra("file_id", json!(handle.file_id))
        .with_extra("jsonl_file", json!(filename))
        .with_extra("tracking_url", json!(handle.tracking_url)))
}

/// Write the payload artifact, upload it, submit the job. Fails before any DB
/// mutation; the artifact file stays behind as the job's immutable input.
async fn upload_and_submit(
    api: &dyn BatchService,
    artifact_dir: &Path,
    filename: &str,
    requests: &[serde_json::Value],
) -> Result<llm::BatchHandle> {
    let payload = llm::to_jsonl(requests);
    let path = artifact_dir.join(filename);
    tokio::fs::write(&path, &payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    let file_id = api.upload_file(filename, &payload).await?;
    api.create_batch(&file_id).await
}

async fn insert_tracker(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    batch_task_id: &str,
    kind: BatchKind,
    handle: &llm::BatchHandle,
    jsonl_file: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO batch_process_tracker_data (
            batch_task_id, batch_kind, batch_type, batch_id, file_id,
            jsonl_file, status, batch_completion_status, tracking_url
         ) VALUES (?, ?, 'Auto', ?, ?, ?, 'Submitted', ?, ?)",
    )
    .bind(batch_task_id)
    .bind(kind.as_str())
    .bind(&handle.batch_id)
    .bind(&handle.file_id)
    .bind(jsonl_file)
    .bind(CompletionStatus::Processing.as_str())
    .bind(&handle.tracking_url)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Poll pending batch jobs, bounded per invocation. Jobs without output yet
/// are skipped and stay `processing`; a completed job's result rows and its
/// one-way status flip commit together, so it is never polled again.
#[instrument(skip_all)]
pub async fn poll_pending_batches(
    pool: &Pool,
    api: &dyn BatchService,
    limit: u32,
) -> Result<StageReport> {
    let pending = sqlx::query(
        "SELECT DISTINCT batch_id, batch_kind FROM batch_process_tracker_data
         WHERE batch_completion_status = ? LIMIT ?",
    )
    .bind(CompletionStatus::Processing.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    if pending.is_empty() {
        return Ok(StageReport::no_data("No pending batches."));
    }

    let mut batches_completed: u64 = 0;
    let mut text_saved: u64 = 0;
    let mut image_saved: u64 = 0;

    for row in &pending {
        let batch_id: String = row.get("batch_id");
        let kind_raw: String = row.get("batch_kind");
        let Some(kind) = BatchKind::parse(&kind_raw) else {
            warn!(batch_id, kind = kind_raw, "unknown batch kind; skipping");
            continue;
        };

        let output_file_id = match api.output_file_id(&batch_id).await {
            Ok(Some(id)) => id,
            Ok(None) => continue, // still running
            Err(err) => {
                warn!(?err, batch_id, "batch status fetch failed; will retry next run");
                continue;
            }
        };
        let output = match api.download_output(&output_file_id).await {
            Ok(output) => output,
            Err(err) => {
                warn!(?err, batch_id, "output download failed; will retry next run");
                continue;
            }
        };

        let mut tx = pool.begin().await?;
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            let Some(result) = llm::parse_output_line(line) else {
                warn!(batch_id, "malformed result line dropped");
                continue;
            };
            match kind {
                BatchKind::Text => {
                    let Some(fields) = llm::parse_text_content(&result.content) else {
                        warn!(batch_id, custom_id = result.custom_id, "unparseable text content dropped");
                        continue;
                    };
                    sqlx::query(
                        "INSERT INTO template1_text_batch_processed_data (
                            batch_custom_id, storytitle, metadescription, metakeywords
                         ) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&result.custom_id)
                    .bind(&fields.storytitle)
                    .bind(&fields.metadescription)
                    .bind(&fields.metakeywords)
                    .execute(&mut *tx)
                    .await?;
                    text_saved += 1;
                }
                BatchKind::ImageAlt => {
                    sqlx::query(
                        "INSERT INTO image_batch_processed_data (custom_id, alttxt, merged_status)
                         VALUES (?, ?, 'Pending')",
                    )
                    .bind(&result.custom_id)
                    .bind(&result.content)
                    .execute(&mut *tx)
                    .await?;
                    image_saved += 1;
                }
            }
        }
        sqlx::query(
            "UPDATE batch_process_tracker_data
             SET batch_completion_status = ?, status = 'Completed'
             WHERE batch_id = ? AND batch_completion_status = ?",
        )
        .bind(CompletionStatus::Completed.as_str())
        .bind(&batch_id)
        .bind(CompletionStatus::Processing.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(batch_id, "batch completed");
        batches_completed += 1;
    }

    Ok(StageReport::success(batches_completed)
        .with_extra("batches_checked", json!(pending.len()))
        .with_extra("text_entries_saved", json!(text_saved))
        .with_extra("image_entries_saved", json!(image_saved)))
}
