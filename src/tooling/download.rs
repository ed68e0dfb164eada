use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{AppError, Result};

/// Stream `url` into `dest`, creating parent directories as needed.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", "stack-launcher")
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let mut file = fs::File::create(dest)?;
    let mut stream = resp.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
    }

    log::info!("Downloaded {} ({} bytes)", url, written);
    Ok(())
}
