//! Utility functions
//!
use std::{
    fs::{self, File},
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

const CACHE_SUBDIR: &str = "realfake_cam";

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath.as_ref())
        .with_context(|| format!("failed to create {}", filepath.as_ref().display()))?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Location of a downloaded model inside `cache_dir`, named after the last URL segment.
pub fn cached_model_path(cache_dir: &Path, url: &str) -> Result<PathBuf> {
    let filename = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .with_context(|| format!("no file name in model URL {url}"))?;

    Ok(cache_dir.join(CACHE_SUBDIR).join(filename))
}

/// Get the model at `url` from the user cache directory, downloading it on first use.
pub async fn fetch_model(url: &str) -> Result<PathBuf> {
    let Some(cache_dir) = dirs::cache_dir() else {
        bail!("no cache directory available for downloaded models");
    };
    let filepath = cached_model_path(&cache_dir, url)?;

    if filepath.is_file() {
        log::info!("Using cached model {}", filepath.display());
        return Ok(filepath);
    }

    if let Some(parent) = filepath.parent() {
        fs::create_dir_all(parent)?;
    }

    log::info!("Downloading model from {}", url);
    let partial = filepath.with_extension("part");
    download_file(&Client::new(), url, &partial).await?;
    fs::rename(&partial, &filepath)?;
    log::info!("Model stored in {}", filepath.display());

    Ok(filepath)
}
