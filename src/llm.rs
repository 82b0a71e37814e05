use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

/// Identifiers returned when a batch job is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHandle {
    pub batch_id: String,
    pub file_id: String,
    pub tracking_url: String,
}

/// One parsed line of batch output, keyed by the caller-assigned custom id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResultLine {
    pub custom_id: String,
    pub content: String,
}

/// Generated metadata fields carried inside a text-batch result line.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TextFields {
    #[serde(default)]
    pub storytitle: String,
    #[serde(default)]
    pub metadescription: String,
    #[serde(default)]
    pub metakeywords: String,
}

/// External LLM batch endpoint: upload a JSONL payload, submit a job against
/// it, check for output, download output content.
#[async_trait]
pub trait BatchService: Send + Sync {
    async fn upload_file(&self, filename: &str, content: &str) -> Result<String>;

    async fn create_batch(&self, file_id: &str) -> Result<BatchHandle>;

    /// Output file id of a job, or None while the job is still running.
    async fn output_file_id(&self, batch_id: &str) -> Result<Option<String>>;

    async fn download_output(&self, file_id: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiBatchClient {
    http: Client,
    base_url: Url,
    api_key: String,
    api_version: String,
}

impl fmt::Debug for OpenAiBatchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiBatchClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl OpenAiBatchClient {
    pub fn new(endpoint: &str, api_key: String, api_version: String) -> Result<Self> {
        let base_url = Url::parse(endpoint).context("invalid batch API endpoint")?;
        Ok(Self::with_base_url(base_url, api_key, api_version))
    }

    pub fn with_base_url(base_url: Url, api_key: String, api_version: String) -> Self {
        let http = Client::builder()
            .user_agent("storymill/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            api_version,
        }
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .context("invalid batch API base URL")?;
        url.set_query(Some(&format!("api-version={}", self.api_version)));
        Ok(url)
    }
}

#[async_trait]
impl BatchService for OpenAiBatchClient {
    async fn upload_file(&self, filename: &str, content: &str) -> Result<String> {
        let url = self.api_url("openai/files")?;
        let form = multipart::Form::new()
            .text("purpose", "batch")
            .text("expires_after.seconds", "1209600")
            .text("expires_after.anchor", "created_at")
            .part(
                "file",
                multipart::Part::text(content.to_string())
                    .file_name(filename.to_string())
                    .mime_str("application/json")?,
            );
        debug!(url=%url, filename, "uploading batch payload");
        let res = self
            .http
            .post(url)
            .header("api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .context("failed to reach batch API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("file upload failed {}: {}", status, body));
        }
        let payload: FileResponse = res.json().await.context("invalid upload response")?;
        Ok(payload.id)
    }

    async fn create_batch(&self, file_id: &str) -> Result<BatchHandle> {
        let url = self.api_url("openai/batches")?;
        let body = json!({
            "input_file_id": file_id,
            "endpoint": "/chat/completions",
            "completion_window": "24h",
            "output_expires_after": {"seconds": 1209600},
            "anchor": "created_at",
        });
        debug!(url=%url, file_id, "submitting batch job");
        let res = self
            .http
            .post(url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach batch API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("batch creation failed {}: {}", status, body));
        }
        let payload: BatchResponse = res.json().await.context("invalid batch response")?;
        let tracking_url = self
            .api_url(&format!("openai/batches/{}", payload.id))?
            .to_string();
        Ok(BatchHandle {
            batch_id: payload.id,
            file_id: file_id.to_string(),
            tracking_url,
        })
    }

    async fn output_file_id(&self, batch_id: &str) -> Result<Option<String>> {
        let url = self.api_url(&format!("openai/batches/{batch_id}"))?;
        let res = self
            .http
            .get(url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .context("failed to reach batch API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("batch status failed {}: {}", status, body));
        }
        let payload: BatchResponse = res.json().await.context("invalid status response")?;
        Ok(payload.output_file_id.filter(|id| !id.is_empty()))
    }

    async fn download_output(&self, file_id: &str) -> Result<String> {
        let url = self.api_url(&format!("openai/files/{file_id}/content"))?;
        let res = self
            .http
            .get(url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .context("failed to reach batch API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("output download failed {}: {}", status, body));
        }
        Ok(res.text().await?)
    }
}

#[derive(Deserialize)]
struct FileResponse {
    id: String,
}

#[derive(Deserialize)]
struct BatchResponse {
    id: String,
    #[serde(default)]
    output_file_id: Option<String>,
}

/// One chat-completions request asking for story metadata from a group of
/// quotes by one author.
pub fn build_text_request(
    custom_id: &str,
    model: &str,
    author: &str,
    quotes: &[String],
) -> Value {
    let block = quotes
        .iter()
        .filter(|q| !q.is_empty())
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "You're given a series of quotes by {author}\n\
         Use them to generate metadata for a web story.\n\
         Quotes:\n{block}\n\n\
         Please respond ONLY in this exact JSON format:\n\
         {{\n  \"storytitle\": \"...\",\n  \"metadescription\": \"...\",\n  \"metakeywords\": \"...\"\n}}"
    );
    json!({
        "custom_id": custom_id,
        "method": "POST",
        "url": "/chat/completions",
        "body": {
            "model": model,
            "messages": [
                {"role": "system", "content": "You are a creative and SEO-savvy content writer."},
                {"role": "user", "content": prompt}
            ]
        }
    })
}

/// One chat-completions request asking for ALT text of an author portrait.
pub fn build_alt_request(custom_id: &str, model: &str, author: &str, image_url: &str) -> Value {
    let prompt = format!(
        "Given the following image URL of a famous personality, generate a short ALT text \
         (max 1\u{2013}2 sentences) that introduces the {author}, including their name, legacy, \
         or profession in a respectful tone suitable for accessibility or SEO purposes."
    );
    json!({
        "custom_id": custom_id,
        "method": "POST",
        "url": "/chat/completions",
        "body": {
            "model": model,
            "messages": [
                {"role": "system", "content": "You are a helpful and professional assistant with expertise in creating descriptive ALT texts that are accessible, informative, and optimized for SEO. Respond with clarity and respect."},
                {"role": "user", "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": {"url": image_url, "detail": "high"}}
                ]}
            ],
            "max_tokens": 1000
        }
    })
}

/// Serialize request objects as one newline-delimited payload.
pub fn to_jsonl(requests: &[Value]) -> String {
    let mut out = String::new();
    for req in requests {
        out.push_str(&req.to_string());
        out.push('\n');
    }
    out
}

/// Parse one output line into `(custom_id, message content)`. Lines that are
/// not valid JSON or lack either field yield None and are dropped by the
/// poller.
pub fn parse_output_line(line: &str) -> Option<BatchResultLine> {
    let data: Value = serde_json::from_str(line).ok()?;
    let custom_id = data.get("custom_id")?.as_str()?.to_string();
    let content = data
        .get("response")?
        .get("body")?
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?
        .to_string();
    if custom_id.is_empty() || content.is_empty() {
        return None;
    }
    Some(BatchResultLine { custom_id, content })
}

/// Parse the JSON document a text-batch result carries as its content.
pub fn parse_text_content(content: &str) -> Option<TextFields> {
    serde_json::from_str(content).ok()
}
