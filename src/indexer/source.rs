use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::rag::Document;

/// Downloads `url` and wraps the body as a document tagged with its source.
pub async fn fetch_url(url: &str, timeout: Duration) -> Result<Document> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        anyhow::bail!("Fetching {} returned {}", url, response.status());
    }

    let text = response
        .text()
        .await
        .with_context(|| format!("Failed to read body of {}", url))?;

    Ok(Document::new(text).with_metadata("source", url))
}

pub fn read_file(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))?;
    Ok(Document::new(text).with_metadata("source", path.to_string_lossy()))
}
