use crate::db::{self, Pool};
use crate::model::StageReport;
use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

pub const DISTRIBUTION_TABLE: &str = "distribution_data";

const URL_VARIANTS: [&str; 6] = [
    "potraightcoverurl",
    "landscapecoverurl",
    "squarecoverurl",
    "socialthumbnailcoverurl",
    "nextstoryimageurl",
    "standardurl",
];

struct AuthorImage {
    urls: [String; 6],
    alttxt: String,
}

fn distribution_columns() -> Vec<String> {
    let mut cols: Vec<String> = vec!["batch_custom_id".into()];
    for i in 2..=9 {
        cols.push(format!("s{i}paragraph1"));
    }
    cols.extend(
        ["author_name", "storytitle", "metadescription", "metakeywords"]
            .iter()
            .map(|c| c.to_string()),
    );
    for i in 2..=9 {
        for variant in URL_VARIANTS {
            cols.push(format!("{variant}{i}"));
        }
        cols.push(format!("s{i}alt1"));
    }
    cols.extend(URL_VARIANTS[..5].iter().map(|c| c.to_string()));
    cols.push("s1image1".into());
    cols.push("s1alt1".into());
    cols.push("video_data_status".into());
    cols
}

/// Cross the merged textual records with each author's resized image set:
/// slide slots s2..s9 cycle through the author's images in order, and the
/// first image doubles as the cover. Authors with no usable images are
/// skipped and stay behind for a later run.
#[instrument(skip_all)]
pub async fn distribute_images(pool: &Pool) -> Result<StageReport> {
    let textual = sqlx::query(
        "SELECT batch_custom_id, s2paragraph1, s3paragraph1, s4paragraph1, s5paragraph1,
                s6paragraph1, s7paragraph1, s8paragraph1, s9paragraph1, author_name,
                storytitle, metadescription, metakeywords
         FROM textual_structured_data",
    )
    .fetch_all(pool)
    .await?;
    if textual.is_empty() {
        return Ok(StageReport::no_data("No merged textual records."));
    }

    let resized = sqlx::query(
        "SELECT author, alttxt, potraightcoverurl, landscapecoverurl, squarecoverurl,
                socialthumbnailcoverurl, nextstoryimageurl, standardurl
         FROM resized_url_data ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    let mut by_author: HashMap<String, Vec<AuthorImage>> = HashMap::new();
    for row in &resized {
        let urls: [String; 6] = [
            row.get("potraightcoverurl"),
            row.get("landscapecoverurl"),
            row.get("squarecoverurl"),
            row.get("socialthumbnailcoverurl"),
            row.get("nextstoryimageurl"),
            row.get("standardurl"),
        ];
        by_author
            .entry(row.get::<String, _>("author"))
            .or_default()
            .push(AuthorImage {
                urls,
                alttxt: row.get("alttxt"),
            });
    }

    let columns = distribution_columns();
    let mut out_rows: Vec<Vec<String>> = Vec::new();
    for row in &textual {
        let author: String = row.get("author_name");
        let Some(images) = by_author.get(&author) else {
            warn!(author, "no resized images for author, skipping record");
            continue;
        };
        let k = images.len();

        let mut values: Vec<String> = vec![row.get("batch_custom_id")];
        for i in 2..=9 {
            values.push(row.get::<String, _>(format!("s{i}paragraph1").as_str()));
        }
        values.push(author.clone());
        values.push(row.get("storytitle"));
        values.push(row.get("metadescription"));
        values.push(row.get("metakeywords"));
        for i in 2..=9usize {
            let image = &images[(i - 2) % k];
            values.extend(image.urls.iter().cloned());
            values.push(image.alttxt.clone());
        }
        // Representative cover set comes from the author's first image.
        let cover = &images[0];
        values.extend(cover.urls[..5].iter().cloned());
        values.push(cover.urls[5].clone());
        values.push(cover.alttxt.clone());
        values.push("0".to_string());
        out_rows.push(values);
    }

    if out_rows.is_empty() {
        return Ok(StageReport::no_data("No records had images to distribute."));
    }

    let mut tx = pool.begin().await?;
    db::create_text_table_if_missing(&mut tx, DISTRIBUTION_TABLE, &columns).await?;
    db::insert_text_rows(&mut tx, DISTRIBUTION_TABLE, &columns, &out_rows).await?;
    tx.commit().await?;

    info!(rows = out_rows.len(), "images distributed");
    Ok(StageReport::success(out_rows.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_layout_is_stable() {
        let cols = distribution_columns();
        assert_eq!(cols[0], "batch_custom_id");
        assert!(cols.contains(&"potraightcoverurl2".to_string()));
        assert!(cols.contains(&"s9alt1".to_string()));
        assert!(cols.contains(&"s1image1".to_string()));
        assert_eq!(cols.last().unwrap(), "video_data_status");
        // 13 base + 8 slots * 7 + 7 representative + 1 flag
        assert_eq!(cols.len(), 13 + 8 * 7 + 7 + 1);
    }
}
