use anyhow::{anyhow, Result};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

/// Lazily create the statically-shaped tables. Derived wide tables
/// (`distribution_data` onward) are created by the stages that compute them,
/// since their column sets depend on upstream output.
#[instrument(skip_all)]
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS quotefancy_page_links (
            page_id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_link TEXT NOT NULL UNIQUE,
            scraped_status INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS quote_scraped_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_id INTEGER,
            quote TEXT NOT NULL,
            author_name TEXT,
            quote_link TEXT,
            page_link TEXT,
            scrape_id TEXT,
            text_structure_status TEXT NOT NULL DEFAULT 'Pending',
            text_structure_id TEXT,
            author_image_check TEXT NOT NULL DEFAULT 'Unchecked',
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (quote, author_name)
        )",
        "CREATE TABLE IF NOT EXISTS template1_text_structure_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text_structure_id TEXT,
            batch_custom_id TEXT,
            s2paragraph1 TEXT,
            s3paragraph1 TEXT,
            s4paragraph1 TEXT,
            s5paragraph1 TEXT,
            s6paragraph1 TEXT,
            s7paragraph1 TEXT,
            s8paragraph1 TEXT,
            s9paragraph1 TEXT,
            author_name TEXT,
            batch_type TEXT,
            batch_task_id TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            batch_created INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS batch_process_tracker_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_task_id TEXT,
            batch_kind TEXT NOT NULL,
            batch_type TEXT,
            batch_id TEXT,
            file_id TEXT,
            jsonl_file TEXT,
            status TEXT,
            batch_completion_status TEXT NOT NULL DEFAULT 'processing',
            tracking_url TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS template1_text_batch_processed_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_custom_id TEXT,
            storytitle TEXT,
            metadescription TEXT,
            metakeywords TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS image_fetched_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author TEXT,
            filename TEXT,
            cdn_url TEXT,
            batch_task_id TEXT,
            batch_custom_id TEXT,
            batch_type TEXT,
            batch_created INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS image_batch_processed_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            custom_id TEXT,
            alttxt TEXT,
            merged_status TEXT NOT NULL DEFAULT 'Pending',
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS alttxt_match_table (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            custom_id TEXT,
            alttxt TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS alttxt_processed_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            image_id INTEGER,
            author TEXT,
            filename TEXT,
            cdn_url TEXT,
            alttxt TEXT,
            status_resizer INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS resized_url_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author TEXT,
            filename TEXT,
            cdn_url TEXT,
            alttxt TEXT,
            potraightcoverurl TEXT,
            landscapecoverurl TEXT,
            squarecoverurl TEXT,
            socialthumbnailcoverurl TEXT,
            nextstoryimageurl TEXT,
            standardurl TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS textual_structured_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_custom_id TEXT,
            s2paragraph1 TEXT,
            s3paragraph1 TEXT,
            s4paragraph1 TEXT,
            s5paragraph1 TEXT,
            s6paragraph1 TEXT,
            s7paragraph1 TEXT,
            s8paragraph1 TEXT,
            s9paragraph1 TEXT,
            author_name TEXT,
            storytitle TEXT,
            metadescription TEXT,
            metakeywords TEXT,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS video_metadata (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            s10video1 TEXT,
            hookline TEXT,
            s10alt1 TEXT,
            videoscreenshot TEXT,
            s10caption1 TEXT,
            inserted_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    ];
    for stmt in statements {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names of `table` in declaration order, excluding `id`.
pub async fn table_columns(pool: &Pool, table: &str) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT name FROM pragma_table_info(?) ORDER BY cid")
        .bind(table)
        .fetch_all(pool)
        .await?;
    if rows.is_empty() {
        return Err(anyhow!("table {table} does not exist"));
    }
    Ok(rows
        .iter()
        .map(|r| r.get::<String, _>("name"))
        .filter(|name| name != "id")
        .collect())
}

/// Drop and recreate `table` with the given all-TEXT column set plus an `id`
/// primary key. Used by the reshaping stages that replace their output
/// wholesale.
pub async fn replace_text_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    columns: &[String],
) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .execute(&mut **tx)
        .await?;
    create_text_table(tx, table, columns).await
}

/// Create `table` with the given all-TEXT column set if it is missing.
pub async fn create_text_table_if_missing(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    columns: &[String],
) -> Result<()> {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        quote_ident(table),
        defs.join(", ")
    );
    sqlx::query(&sql).execute(&mut **tx).await?;
    Ok(())
}

async fn create_text_table(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    columns: &[String],
) -> Result<()> {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    let sql = format!(
        "CREATE TABLE {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        quote_ident(table),
        defs.join(", ")
    );
    sqlx::query(&sql).execute(&mut **tx).await?;
    Ok(())
}

/// Bulk insert of string rows. Each row must match `columns` in length.
pub async fn insert_text_rows(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    columns: &[String],
    rows: &[Vec<String>],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        col_list.join(", "),
        placeholders.join(", ")
    );
    for row in rows {
        if row.len() != columns.len() {
            return Err(anyhow!(
                "row width {} does not match {} columns of {table}",
                row.len(),
                columns.len()
            ));
        }
        let mut query = sqlx::query(&sql);
        for value in row {
            query = query.bind(value);
        }
        query.execute(&mut **tx).await?;
    }
    Ok(())
}

/// Fetch the named columns of every row in `table` as strings (NULL → "").
/// `order_by` and `filter` are appended verbatim when given; they only ever
/// come from compile-time constants in the stage modules.
pub async fn fetch_text_rows(
    pool: &Pool,
    table: &str,
    columns: &[String],
    filter: Option<&str>,
    order_by: Option<&str>,
) -> Result<Vec<Vec<String>>> {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let mut sql = format!("SELECT {} FROM {}", col_list.join(", "), quote_ident(table));
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }
    if let Some(order_by) = order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let v: Option<String> = row.try_get(i)?;
            values.push(v.unwrap_or_default());
        }
        out.push(values);
    }
    Ok(out)
}

/// Enqueue page links for the scraper. Duplicates are ignored.
#[instrument(skip_all)]
pub async fn seed_page_links(pool: &Pool, links: &[String]) -> Result<u64> {
    let mut inserted = 0;
    for link in links {
        let res = sqlx::query(
            "INSERT INTO quotefancy_page_links (page_link) VALUES (?)
             ON CONFLICT (page_link) DO NOTHING",
        )
        .bind(link)
        .execute(pool)
        .await?;
        inserted += res.rows_affected();
    }
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn quote_count(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quote_scraped_data")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
