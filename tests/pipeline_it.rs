use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;

use storymill::batch::{poll_pending_batches, submit_image_batch, submit_text_batch};
use storymill::db::{ensure_schema, Pool};
use storymill::llm::{BatchHandle, BatchService};
use storymill::model::Outcome;
use storymill::stages::merge::merge_textual_data;
use storymill::stages::structure::structure_quotes;

/// Test double that records every upload and serves a canned output payload.
struct RecordingBatch {
    uploads: Mutex<Vec<(String, String)>>,
    output: Mutex<String>,
}

impl RecordingBatch {
    fn new() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            output: Mutex::new(String::new()),
        }
    }

    fn set_output(&self, output: String) {
        *self.output.lock().unwrap() = output;
    }
}

#[async_trait]
impl BatchService for RecordingBatch {
    async fn upload_file(&self, filename: &str, content: &str) -> Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), content.to_string()));
        Ok("file-1".to_string())
    }

    async fn create_batch(&self, file_id: &str) -> Result<BatchHandle> {
        Ok(BatchHandle {
            batch_id: "batch-1".to_string(),
            file_id: file_id.to_string(),
            tracking_url: "https://example.test/openai/batches/batch-1".to_string(),
        })
    }

    async fn output_file_id(&self, _batch_id: &str) -> Result<Option<String>> {
        Ok(Some("out-1".to_string()))
    }

    async fn download_output(&self, _file_id: &str) -> Result<String> {
        Ok(self.output.lock().unwrap().clone())
    }
}

async fn setup_pool() -> Pool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    ensure_schema(&pool).await.unwrap();
    pool
}

async fn seed_quotes(pool: &Pool, author: &str, count: usize, structure_id: &str) {
    for i in 0..count {
        sqlx::query(
            "INSERT INTO quote_scraped_data (
                quote, author_name, quote_link, scrape_id,
                text_structure_status, text_structure_id
             ) VALUES (?, ?, ?, ?, 'Pending', ?)",
        )
        .bind(format!("{author} wisdom number {i}"))
        .bind(author)
        .bind(format!("https://quotefancy.com/quote/{i}"))
        .bind(structure_id)
        .bind(structure_id)
        .execute(pool)
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn structure_groups_in_eights_and_discards_remainders() -> Result<()> {
    let pool = setup_pool().await;
    let sid = "0a1b2c3d-0000-0000-0000-000000000000";
    seed_quotes(&pool, "Rumi", 16, sid).await;
    seed_quotes(&pool, "Buddha", 3, sid).await;

    let report = structure_quotes(&pool).await?;
    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.rows, Some(2));

    let groups = sqlx::query(
        "SELECT batch_custom_id, author_name, batch_task_id, batch_created
         FROM template1_text_structure_data ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(groups.len(), 2);
    for g in &groups {
        assert_eq!(g.get::<String, _>("author_name"), "Rumi");
        assert_eq!(g.get::<String, _>("batch_task_id"), "0a1b2c3d-t1");
        assert_eq!(g.get::<i64, _>("batch_created"), 0);
    }
    assert_eq!(groups[0].get::<String, _>("batch_custom_id"), "0a1b2c3d-1-Rumi-1");
    assert_eq!(groups[1].get::<String, _>("batch_custom_id"), "0a1b2c3d-2-Rumi-2");

    // Grouped quotes flipped; the short Buddha remainder stays pending.
    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quote_scraped_data WHERE text_structure_status = 'Pending'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(pending, 3);

    // Second run finds no complete group to build.
    let report = structure_quotes(&pool).await?;
    assert_eq!(report.rows, Some(0));
    Ok(())
}

#[tokio::test]
async fn text_batch_submit_poll_merge_round_trip() -> Result<()> {
    let pool = setup_pool().await;
    let sid = "fe0d1c2b-0000-0000-0000-000000000000";
    seed_quotes(&pool, "Rumi", 16, sid).await;
    structure_quotes(&pool).await?;

    let api = RecordingBatch::new();
    let artifacts = tempfile::tempdir()?;
    let report = submit_text_batch(&pool, &api, "gpt-4o-global-batch", artifacts.path()).await?;
    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.rows, Some(2));
    assert_eq!(report.extra["batch_id"], "batch-1");

    // One tracker row for the run's single task id, typed as a text batch.
    let tracker = sqlx::query(
        "SELECT batch_kind, batch_id, batch_completion_status FROM batch_process_tracker_data",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker[0].get::<String, _>("batch_kind"), "text");
    assert_eq!(
        tracker[0].get::<String, _>("batch_completion_status"),
        "processing"
    );

    // Payload was written locally and uploaded with one line per group.
    let uploads = api.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].0.starts_with("quotefancy_text_batch_"));
    assert_eq!(uploads[0].1.lines().count(), 2);
    assert!(artifacts.path().join(&uploads[0].0).exists());

    // Resubmission has nothing left to send.
    let report = submit_text_batch(&pool, &api, "gpt-4o-global-batch", artifacts.path()).await?;
    assert_eq!(report.status, Outcome::NoData);

    // Two valid result lines plus one malformed line that must be dropped.
    let line = |custom_id: &str, title: &str| {
        json!({
            "custom_id": custom_id,
            "response": {"body": {"choices": [{"message": {"content":
                json!({
                    "storytitle": title,
                    "metadescription": "desc",
                    "metakeywords": "rumi, quotes"
                })
                .to_string()
            }}]}}
        })
        .to_string()
    };
    api.set_output(format!(
        "{}\n{}\nnot json at all\n",
        line("fe0d1c2b-1-Rumi-1", "Rumi on Love"),
        line("fe0d1c2b-2-Rumi-2", "Rumi on Light"),
    ));

    let report = poll_pending_batches(&pool, &api, 15).await?;
    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.extra["text_entries_saved"], 2);

    let saved: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM template1_text_batch_processed_data")
            .fetch_one(&pool)
            .await?;
    assert_eq!(saved, 2);
    let status: String = sqlx::query_scalar(
        "SELECT batch_completion_status FROM batch_process_tracker_data WHERE batch_id = 'batch-1'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(status, "completed");

    // Completed jobs are never polled again.
    let report = poll_pending_batches(&pool, &api, 15).await?;
    assert_eq!(report.status, Outcome::NoData);

    // Merge joins groups with their generated metadata.
    let report = merge_textual_data(&pool).await?;
    assert_eq!(report.rows, Some(2));
    let merged = sqlx::query(
        "SELECT storytitle, s2paragraph1, author_name FROM textual_structured_data ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].get::<String, _>("storytitle"), "Rumi on Love");
    assert_eq!(merged[0].get::<String, _>("author_name"), "Rumi");
    assert!(!merged[0].get::<String, _>("s2paragraph1").is_empty());
    Ok(())
}

#[tokio::test]
async fn image_batch_reassigns_rows_to_submission_task() -> Result<()> {
    let pool = setup_pool().await;
    for filename in ["Rumi_1.jpg", "Rumi_2.jpg"] {
        sqlx::query(
            "INSERT INTO image_fetched_data (
                author, filename, cdn_url, batch_task_id, batch_custom_id,
                batch_type, batch_created
             ) VALUES ('Rumi', ?, ?, 'deadbeef_i1', 'deadbeef_i1_Rumi', 'Auto', 0)",
        )
        .bind(filename)
        .bind(format!("https://cdn.suvichaar.org/media/Rumi/{filename}"))
        .execute(&pool)
        .await?;
    }

    let api = RecordingBatch::new();
    let artifacts = tempfile::tempdir()?;
    let report = submit_image_batch(&pool, &api, "gpt-4o-global-batch", artifacts.path()).await?;
    assert_eq!(report.status, Outcome::Success);
    assert_eq!(report.rows, Some(2));

    let tracker = sqlx::query(
        "SELECT batch_task_id, batch_kind FROM batch_process_tracker_data",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker[0].get::<String, _>("batch_kind"), "image_alt");
    let task_id: String = tracker[0].get("batch_task_id");
    assert!(task_id.ends_with("_i1"));

    // Rows and tracker agree on lineage after submission.
    let row_ids: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT batch_task_id FROM image_fetched_data")
            .fetch_all(&pool)
            .await?;
    assert_eq!(row_ids, vec![task_id]);
    let unsent: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM image_fetched_data WHERE batch_created = 0")
            .fetch_one(&pool)
            .await?;
    assert_eq!(unsent, 0);
    Ok(())
}

#[tokio::test]
async fn failed_submission_leaves_no_db_traces() -> Result<()> {
    let pool = setup_pool().await;
    let report = submit_text_batch(
        &pool,
        &RecordingBatch::new(),
        "gpt-4o-global-batch",
        std::path::Path::new("/nonexistent"),
    )
    .await;
    // Nothing structured yet, so this is a clean no-data result.
    assert_eq!(report?.status, Outcome::NoData);

    let sid = "aa0d1c2b-0000-0000-0000-000000000000";
    seed_quotes(&pool, "Rumi", 8, sid).await;
    structure_quotes(&pool).await?;

    // Artifact directory missing: submission fails before any DB mutation.
    let err = submit_text_batch(
        &pool,
        &RecordingBatch::new(),
        "gpt-4o-global-batch",
        std::path::Path::new("/nonexistent"),
    )
    .await;
    assert!(err.is_err());

    let trackers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_process_tracker_data")
        .fetch_one(&pool)
        .await?;
    assert_eq!(trackers, 0);
    let unsent: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM template1_text_structure_data WHERE batch_created = 0",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(unsent, 1);
    Ok(())
}
