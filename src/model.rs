use serde::{Deserialize, Serialize};

/// Per-quote structuring lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StructureStatus {
    Pending,
    Completed,
}

impl StructureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StructureStatus::Pending => "Pending",
            StructureStatus::Completed => "Completed",
        }
    }
}

/// Whether author images were already fetched for a quote row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageCheck {
    Unchecked,
    Checked,
}

impl ImageCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageCheck::Unchecked => "Unchecked",
            // Lowercase to match the values the templating side expects.
            ImageCheck::Checked => "checked",
        }
    }
}

/// Typed discriminant for what a batch job produces. Persisted in the tracker
/// row so the poller routes results without inspecting artifact filenames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BatchKind {
    Text,
    ImageAlt,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Text => "text",
            BatchKind::ImageAlt => "image_alt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(BatchKind::Text),
            "image_alt" => Some(BatchKind::ImageAlt),
            _ => None,
        }
    }
}

/// Batch job lifecycle as tracked in `batch_process_tracker_data`.
/// The transition `Processing → Completed` is one-way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompletionStatus {
    Processing,
    Completed,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Processing => "processing",
            CompletionStatus::Completed => "completed",
        }
    }
}

/// One quote as delivered by the scrape collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedQuote {
    pub quote: String,
    pub author: String,
    pub link: String,
}

/// One structured group of exactly eight quotes by a single author.
#[derive(Debug, Clone)]
pub struct StructuredGroup {
    pub text_structure_id: String,
    pub batch_custom_id: String,
    pub paragraphs: [String; 8],
    pub author_name: String,
    pub batch_task_id: String,
}

/// One image downloaded and uploaded for an author.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub author: String,
    pub filename: String,
    pub cdn_url: String,
    pub batch_task_id: String,
    pub batch_custom_id: String,
}

/// Outcome discriminant for a stage invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoData,
    Error,
}

/// Structured result every stage entry point resolves to. Serializes to the
/// `{status, message, ...}` envelope the command surface prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub status: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl StageReport {
    pub fn success(rows: u64) -> Self {
        Self {
            status: Outcome::Success,
            message: None,
            rows: Some(rows),
            extra: serde_json::Map::new(),
        }
    }

    pub fn no_data(message: &str) -> Self {
        Self {
            status: Outcome::NoData,
            message: Some(message.to_string()),
            rows: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Error envelope produced at the command boundary; failures never propagate
/// past it as unhandled faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub status: Outcome,
    pub detail: String,
}

impl ErrorReport {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            status: Outcome::Error,
            detail: format!("{err:#}"),
        }
    }
}
