//! storymill: a staged pipeline that turns scraped quotes into publishable
//! web-story records. Quotes are scraped into SQLite, grouped per author,
//! enriched through an external LLM batch endpoint (story text and image alt
//! text), crossed with author imagery and video metadata, and projected onto
//! the final template schema.

pub mod batch;
pub mod config;
pub mod db;
pub mod enrich;
pub mod images;
pub mod llm;
pub mod model;
pub mod resize;
pub mod scrape;
pub mod stages;
pub mod storage;
