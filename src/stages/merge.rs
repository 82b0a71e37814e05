use crate::db::Pool;
use crate::model::StageReport;
use anyhow::Result;
use tracing::{info, instrument};

/// Merge structured quote groups with their generated text metadata on
/// `batch_custom_id` (inner join) into `textual_structured_data`.
#[instrument(skip_all)]
pub async fn merge_textual_data(pool: &Pool) -> Result<StageReport> {
    let res = sqlx::query(
        "INSERT INTO textual_structured_data (
            batch_custom_id, s2paragraph1, s3paragraph1, s4paragraph1, s5paragraph1,
            s6paragraph1, s7paragraph1, s8paragraph1, s9paragraph1, author_name,
            storytitle, metadescription, metakeywords
         )
         SELECT s.batch_custom_id, s.s2paragraph1, s.s3paragraph1, s.s4paragraph1,
                s.s5paragraph1, s.s6paragraph1, s.s7paragraph1, s.s8paragraph1,
                s.s9paragraph1, s.author_name,
                m.storytitle, m.metadescription, m.metakeywords
         FROM template1_text_structure_data s
         JOIN template1_text_batch_processed_data m
           ON m.batch_custom_id = s.batch_custom_id",
    )
    .execute(pool)
    .await?;

    let merged = res.rows_affected();
    if merged == 0 {
        return Ok(StageReport::no_data("No matching metadata to merge."));
    }
    info!(rows = merged, "textual data merged");
    Ok(StageReport::success(merged))
}
