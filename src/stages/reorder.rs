use crate::db::{self, Pool};
use crate::model::StageReport;
use crate::stages::rotate::PRE_FINAL_TABLE;
use anyhow::Result;
use tracing::{info, instrument};

pub const FINAL_TABLE: &str = "final_quote_fancy_data";

/// Column order of the final export table. Apart from `batch_custom_id` the
/// names are the template's moustache placeholders, verbatim.
pub const FINAL_COLUMNS: [&str; 76] = [
    "batch_custom_id",
    "{{storytitle}}",
    "{{pagetitle}}",
    "{{uuid}}",
    "{{urlslug}}",
    "{{canurl}}",
    "{{canurl1}}",
    "{{publishedtime}}",
    "{{modifiedtime}}",
    "{{metakeywords}}",
    "{{metadescription}}",
    "{{s2paragraph1}}",
    "{{s3paragraph1}}",
    "{{s4paragraph1}}",
    "{{s5paragraph1}}",
    "{{s6paragraph1}}",
    "{{s7paragraph1}}",
    "{{s8paragraph1}}",
    "{{s9paragraph1}}",
    "{{s1alt1}}",
    "{{s2alt1}}",
    "{{s3alt1}}",
    "{{s4alt1}}",
    "{{s5alt1}}",
    "{{s6alt1}}",
    "{{s7alt1}}",
    "{{s8alt1}}",
    "{{s9alt1}}",
    "{{hookline}}",
    "{{potraightcoverurl}}",
    "{{landscapecoverurl}}",
    "{{squarecoverurl}}",
    "{{socialthumbnailcoverurl}}",
    "{{s1image1}}",
    "{{s2image1}}",
    "{{s3image1}}",
    "{{s4image1}}",
    "{{s5image1}}",
    "{{s6image1}}",
    "{{s7image1}}",
    "{{s8image1}}",
    "{{s9image1}}",
    "{{s11btntext}}",
    "{{lang}}",
    "{{user}}",
    "{{userprofileurl}}",
    "{{storygeneratorname}}",
    "{{contenttype}}",
    "{{storygeneratorversion}}",
    "{{sitename}}",
    "{{generatorplatform}}",
    "{{sitelogo96x96}}",
    "{{person}}",
    "{{sitelogo32x32}}",
    "{{sitelogo192x192}}",
    "{{sitelogo144x144}}",
    "{{sitelogo92x92}}",
    "{{sitelogo180x180}}",
    "{{publisher}}",
    "{{publisherlogosrc}}",
    "{{gtagid}}",
    "{{organization}}",
    "{{publisherlogoalt}}",
    "{{s10video1}}",
    "{{s10alt1}}",
    "{{videoscreenshot}}",
    "{{s10caption1}}",
    "{{s11paragraph1}}",
    "{{nextstoryimage}}",
    "{{nextstoryimagealt}}",
    "{{prevstorytitle}}",
    "{{prevstorylink}}",
    "{{nextstorytitle}}",
    "{{nextstorylink}}",
    "{{s11btnlink}}",
    "{{writername}}",
];

/// Source column in the pre-final table feeding a final column. Slide images
/// were renamed `s{i}imageurl1` during cleaning; everything else maps by its
/// own name with the braces stripped.
fn source_name(final_col: &str) -> String {
    if final_col == "batch_custom_id" {
        return final_col.to_string();
    }
    let bare = final_col
        .trim_start_matches("{{")
        .trim_end_matches("}}");
    for i in 2..=9 {
        if bare == format!("s{i}image1") {
            return format!("s{i}imageurl1");
        }
    }
    bare.to_string()
}

/// Project the pre-final table onto the fixed export schema. Columns the
/// pipeline never produced are filled with empty strings; the final table is
/// rebuilt from scratch every run.
#[instrument(skip_all)]
pub async fn reorder_final(pool: &Pool) -> Result<StageReport> {
    let source_columns = db::table_columns(pool, PRE_FINAL_TABLE).await?;
    let rows = db::fetch_text_rows(pool, PRE_FINAL_TABLE, &source_columns, None, None).await?;
    if rows.is_empty() {
        return Ok(StageReport::no_data("No pre-final records."));
    }

    // For each final column: its index in the source, or None for "" fill.
    let picks: Vec<Option<usize>> = FINAL_COLUMNS
        .iter()
        .map(|final_col| {
            let src = source_name(final_col);
            source_columns
                .iter()
                .position(|c| *c == src)
                .or_else(|| source_columns.iter().position(|c| c == final_col))
        })
        .collect();

    let columns: Vec<String> = FINAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    let out_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            picks
                .iter()
                .map(|pick| pick.map(|i| row[i].clone()).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut tx = pool.begin().await?;
    db::replace_text_table(&mut tx, FINAL_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, FINAL_TABLE, &columns, &out_rows).await?;
    tx.commit().await?;

    info!(rows = out_rows.len(), columns = columns.len(), "final table built");
    Ok(StageReport::success(out_rows.len() as u64)
        .with_extra("columns_saved", serde_json::json!(columns)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_schema_is_fixed() {
        assert_eq!(FINAL_COLUMNS.len(), 76);
        assert_eq!(FINAL_COLUMNS[0], "batch_custom_id");
        assert_eq!(FINAL_COLUMNS[75], "{{writername}}");
    }

    #[test]
    fn slide_images_map_to_renamed_sources() {
        assert_eq!(source_name("{{s2image1}}"), "s2imageurl1");
        assert_eq!(source_name("{{s9image1}}"), "s9imageurl1");
        assert_eq!(source_name("{{s1image1}}"), "s1image1");
        assert_eq!(source_name("{{storytitle}}"), "storytitle");
        assert_eq!(source_name("{{nextstorylink}}"), "nextstorylink");
        assert_eq!(source_name("batch_custom_id"), "batch_custom_id");
    }
}
