use crate::config::Scrape;
use crate::db::Pool;
use crate::model::{ImageCheck, ScrapedQuote, StageReport, StructureStatus};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use sqlx::Row;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Source of quote pages. A page with zero quotes marks the end of an
/// author's pagination.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_page(&self, slug: &str, page: u32) -> Result<Vec<ScrapedQuote>>;
}

/// HTTP client for the public quote site.
#[derive(Clone)]
pub struct QuotefancyClient {
    http: Client,
    base_url: Url,
}

impl fmt::Debug for QuotefancyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotefancyClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl QuotefancyClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid scrape base URL")?;
        let http = Client::builder()
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                 AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/90.0.4430.93 Safari/537.36",
            )
            .timeout(request_timeout)
            .build()
            .expect("reqwest client");
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl QuoteSource for QuotefancyClient {
    async fn fetch_page(&self, slug: &str, page: u32) -> Result<Vec<ScrapedQuote>> {
        let url = self
            .base_url
            .join(&format!("{slug}/page/{page}"))
            .context("invalid page URL")?;
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("page fetch failed: {url}"))?;
        if !res.status().is_success() {
            return Err(anyhow!("page fetch failed: {url} -> {}", res.status()));
        }
        let body = res.text().await?;
        Ok(parse_quote_page(&body, self.base_url.as_str()))
    }
}

/// First path segment of a page link, e.g.
/// `https://quotefancy.com/rumi-quotes` → `rumi-quotes`.
pub fn extract_slug(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    parsed
        .path()
        .trim_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Pull quote/author/link triples out of one listing page.
pub fn parse_quote_page(html: &str, base: &str) -> Vec<ScrapedQuote> {
    let doc = Html::parse_document(html);
    let wrapper = Selector::parse("div.q-wrapper").expect("valid selector");
    let quote_div = Selector::parse("div.quote-a").expect("valid selector");
    let quote_anchor = Selector::parse("a.quote-a").expect("valid selector");
    let anchor = Selector::parse("a").expect("valid selector");
    let bylines = Selector::parse("div.author-p.bylines").expect("valid selector");
    let author_p = Selector::parse("p.author-p a").expect("valid selector");

    let base = Url::parse(base).ok();
    let mut quotes = Vec::new();
    for container in doc.select(&wrapper) {
        let (quote_text, href) = if let Some(div) = container.select(&quote_div).next() {
            let text = div.text().collect::<String>().trim().to_string();
            let href = div
                .select(&anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
                .unwrap_or("")
                .to_string();
            (text, href)
        } else if let Some(a) = container.select(&quote_anchor).next() {
            (
                a.text().collect::<String>().trim().to_string(),
                a.value().attr("href").unwrap_or("").to_string(),
            )
        } else {
            continue;
        };
        if quote_text.is_empty() {
            continue;
        }

        let link = match &base {
            Some(base) => base
                .join(&href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.clone()),
            None => href.clone(),
        };

        let author = if let Some(div) = container.select(&bylines).next() {
            div.text()
                .collect::<String>()
                .trim()
                .trim_start_matches("by ")
                .trim()
                .to_string()
        } else if let Some(a) = container.select(&author_p).next() {
            a.text().collect::<String>().trim().to_string()
        } else {
            "Anonymous".to_string()
        };

        quotes.push(ScrapedQuote {
            quote: quote_text,
            author,
            link,
        });
    }
    quotes
}

/// Scrape stage: walk the pending page-link queue, harvesting every paginated
/// listing per link. Each page link's quote inserts and its scraped marker
/// commit in one transaction, so a crash cannot leave a link marked scraped
/// with its quotes missing.
#[instrument(skip_all)]
pub async fn scrape_pending_pages(
    pool: &Pool,
    source: &dyn QuoteSource,
    cfg: &Scrape,
) -> Result<StageReport> {
    let pages = sqlx::query(
        "SELECT page_id, page_link FROM quotefancy_page_links
         WHERE scraped_status = 0 ORDER BY page_id LIMIT ?",
    )
    .bind(cfg.pages_per_run)
    .fetch_all(pool)
    .await?;

    if pages.is_empty() {
        return Ok(StageReport::no_data("No new pages to scrape."));
    }

    // One id for the whole run; the structuring stage groups by it.
    let text_structure_id = Uuid::new_v4().to_string();
    let scrape_id = text_structure_id.clone();

    let mut total_quotes: u64 = 0;
    let mut pages_done: u64 = 0;
    for row in pages {
        let page_id: i64 = row.get("page_id");
        let page_link: String = row.get("page_link");
        let slug = extract_slug(&page_link);

        let mut quotes = Vec::new();
        for page in 1..=cfg.max_pages_per_slug {
            match source.fetch_page(&slug, page).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => quotes.extend(batch),
                Err(err) => {
                    warn!(?err, slug, page, "page fetch failed; stopping pagination");
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(cfg.page_delay_ms)).await;
        }

        let mut tx = pool.begin().await?;
        for q in &quotes {
            sqlx::query(
                "INSERT INTO quote_scraped_data (
                    page_id, quote, author_name, quote_link, page_link,
                    scrape_id, text_structure_status, text_structure_id, author_image_check
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (quote, author_name) DO NOTHING",
            )
            .bind(page_id)
            .bind(&q.quote)
            .bind(&q.author)
            .bind(&q.link)
            .bind(&page_link)
            .bind(&scrape_id)
            .bind(StructureStatus::Pending.as_str())
            .bind(&text_structure_id)
            .bind(ImageCheck::Unchecked.as_str())
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("UPDATE quotefancy_page_links SET scraped_status = 1 WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(page_link, count = quotes.len(), "quotes saved");
        total_quotes += quotes.len() as u64;
        pages_done += 1;
    }

    Ok(StageReport::success(total_quotes)
        .with_extra("pages_scraped", serde_json::json!(pages_done))
        .with_extra("scrape_id", serde_json::json!(scrape_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="q-wrapper">
            <div class="quote-a"><a href="/rumi-quotes/12345">The wound is the place where the Light enters you.</a></div>
            <div class="author-p bylines">by Rumi</div>
          </div>
          <div class="q-wrapper">
            <a class="quote-a" href="/anon/1">Short anonymous line.</a>
            <p class="author-p"><a>Someone Else</a></p>
          </div>
          <div class="q-wrapper">
            <a class="quote-a" href="/anon/2">No author at all.</a>
          </div>
        </body></html>"#;

    #[test]
    fn parses_quote_containers() {
        let quotes = parse_quote_page(PAGE, "https://quotefancy.com");
        assert_eq!(quotes.len(), 3);
        assert_eq!(
            quotes[0].quote,
            "The wound is the place where the Light enters you."
        );
        assert_eq!(quotes[0].author, "Rumi");
        assert_eq!(quotes[0].link, "https://quotefancy.com/rumi-quotes/12345");
        assert_eq!(quotes[1].author, "Someone Else");
        assert_eq!(quotes[2].author, "Anonymous");
    }

    #[test]
    fn empty_page_yields_no_quotes() {
        assert!(parse_quote_page("<html><body></body></html>", "https://quotefancy.com").is_empty());
    }

    #[test]
    fn slug_is_first_path_segment() {
        assert_eq!(extract_slug("https://quotefancy.com/rumi-quotes"), "rumi-quotes");
        assert_eq!(
            extract_slug("https://quotefancy.com/rumi-quotes/page/2"),
            "rumi-quotes"
        );
        assert_eq!(extract_slug("not a url"), "");
    }
}
