use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storymill::model::{ErrorReport, StageReport};
use storymill::{batch, config, db, images, llm, scrape, stages, storage};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enqueue quotefancy listing links for the scraper
    SeedPages { links: Vec<String> },
    /// Scrape queued page links into quote_scraped_data
    Scrape,
    /// Group pending quotes into 8-quote author batches
    Structure,
    /// Fetch and store author portraits for the oldest unchecked scrape run
    DownloadImages,
    /// Submit a story-text batch job over unsent structured groups
    SubmitTextBatch,
    /// Submit an alt-text batch job over unsent images
    SubmitImageBatch,
    /// Poll pending batch jobs and persist completed results
    Poll,
    /// Merge structured groups with their generated story text
    MergeText,
    /// Match generated alt text to fetched images
    MatchAlt,
    /// Generate the six resized URL variants per image
    Resize,
    /// Cross textual records with per-author image sets
    Distribute,
    /// Attach random video metadata to distributed records
    VideoMeta,
    /// Drop unused URL variants and rename slide columns
    CleanVideoMeta,
    /// Enrich cleaned records with slugs, URLs and publishing metadata
    GenerateMetadata,
    /// Build the prev/next story navigation ring
    Rotate,
    /// Project everything onto the final template schema
    Reorder,
    /// Print the number of scraped quotes
    QuoteCount,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => {
            let report = ErrorReport::from_error(&err);
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<StageReport> {
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/storymill.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::ensure_schema(&pool).await?;

    let mut rng = StdRng::from_entropy();
    let report = match args.command {
        Command::SeedPages { links } => {
            let inserted = db::seed_page_links(&pool, &links).await?;
            StageReport::success(inserted)
        }
        Command::Scrape => {
            let source = scrape::QuotefancyClient::new(
                &cfg.scrape.base_url,
                Duration::from_secs(cfg.scrape.request_timeout_secs),
            )?;
            scrape::scrape_pending_pages(&pool, &source, &cfg.scrape).await?
        }
        Command::Structure => stages::structure::structure_quotes(&pool).await?,
        Command::DownloadImages => {
            let provider = images::SearchApiProvider::new(&cfg.images.search_url)?;
            let store = storage::HttpObjectStore::new(
                &cfg.storage.upload_base_url,
                &cfg.storage.cdn_base_url,
            )?;
            images::download_author_images(&pool, &provider, &store, &cfg.images, &cfg.storage)
                .await?
        }
        Command::SubmitTextBatch => {
            let api = batch_client(&cfg)?;
            batch::submit_text_batch(
                &pool,
                &api,
                &cfg.batch_api.deployment,
                Path::new(&cfg.app.artifact_dir),
            )
            .await?
        }
        Command::SubmitImageBatch => {
            let api = batch_client(&cfg)?;
            batch::submit_image_batch(
                &pool,
                &api,
                &cfg.batch_api.deployment,
                Path::new(&cfg.app.artifact_dir),
            )
            .await?
        }
        Command::Poll => {
            let api = batch_client(&cfg)?;
            batch::poll_pending_batches(&pool, &api, cfg.app.poll_batch_limit).await?
        }
        Command::MergeText => stages::merge::merge_textual_data(&pool).await?,
        Command::MatchAlt => stages::alt_match::match_alt_text(&pool).await?,
        Command::Resize => stages::resizer::generate_resized_urls(&pool, &cfg.storage).await?,
        Command::Distribute => stages::distribute::distribute_images(&pool).await?,
        Command::VideoMeta => stages::video::assign_video_metadata(&pool, &mut rng).await?,
        Command::CleanVideoMeta => stages::video::clean_video_meta(&pool).await?,
        Command::GenerateMetadata => {
            stages::metadata::generate_metadata(&pool, &mut rng).await?
        }
        Command::Rotate => stages::rotate::rotate_navigation(&pool).await?,
        Command::Reorder => stages::reorder::reorder_final(&pool).await?,
        Command::QuoteCount => {
            let count = db::quote_count(&pool).await?;
            StageReport::success(count as u64)
                .with_extra("total_quotes", serde_json::json!(count))
        }
    };
    Ok(report)
}

fn batch_client(cfg: &config::Config) -> Result<llm::OpenAiBatchClient> {
    llm::OpenAiBatchClient::new(
        &cfg.batch_api.endpoint,
        cfg.batch_api.api_key.clone(),
        cfg.batch_api.api_version.clone(),
    )
}
