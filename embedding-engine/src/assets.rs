use mindfeed_core::{CoreError, EmbeddingError, ModelConfig};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const REQUIRED_FILES: [&str; 3] = [WEIGHTS_FILE, CONFIG_FILE, TOKENIZER_FILE];

/// The files the on-device model needs, rooted at one directory.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    dir: PathBuf,
    repo_url: String,
}

impl ModelAssets {
    pub fn new(dir: impl Into<PathBuf>, repo_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            repo_url: repo_url.into(),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.dir, &config.repo_url)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(WEIGHTS_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    pub fn missing(&self) -> Vec<&'static str> {
        REQUIRED_FILES
            .iter()
            .copied()
            .filter(|name| !self.dir.join(name).is_file())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Fails with `ModelNotFound` naming the first absent file.
    pub fn require(&self) -> Result<(), EmbeddingError> {
        match self.missing().first() {
            None => Ok(()),
            Some(name) => Err(EmbeddingError::ModelNotFound {
                model_name: self.dir.join(name).display().to_string(),
            }),
        }
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.repo_url.trim_end_matches('/'), name)
    }

    /// Downloads every missing file. Existing files are left alone.
    pub async fn download_missing(&self, client: &reqwest::Client) -> Result<usize, CoreError> {
        fs::create_dir_all(&self.dir).await?;

        let missing = self.missing();
        for name in &missing {
            let url = self.url_for(name);
            self.download_file(client, &url, &self.dir.join(name)).await?;
        }
        Ok(missing.len())
    }

    async fn download_file(
        &self,
        client: &reqwest::Client,
        url: &str,
        target: &Path,
    ) -> Result<(), CoreError> {
        info!("Downloading {}", url);
        let download_failed = || EmbeddingError::DownloadFailed {
            url: url.to_string(),
        };

        let mut response = client
            .get(url)
            .send()
            .await
            .map_err(|_| download_failed())?;
        if !response.status().is_success() {
            return Err(download_failed().into());
        }

        let total = response.content_length();
        let partial = target.with_extension("part");
        let mut file = fs::File::create(&partial).await?;
        let mut written: u64 = 0;
        let mut last_percent = 0;

        while let Some(chunk) = response.chunk().await.map_err(|_| download_failed())? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = (written * 100 / total) as u8;
                if percent >= last_percent + 10 {
                    last_percent = percent;
                    info!("{}: {}%", target.display(), percent);
                }
            }
        }
        file.flush().await?;
        drop(file);

        fs::rename(&partial, target).await?;
        debug!("Wrote {} bytes to {}", written, target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("mindfeed_assets_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_reports_missing_files() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();

        let assets = ModelAssets::new(&dir, "https://example.test/repo/");
        assert_eq!(assets.missing(), vec![WEIGHTS_FILE, TOKENIZER_FILE]);
        assert!(matches!(
            assets.require(),
            Err(EmbeddingError::ModelNotFound { .. })
        ));
        assert_eq!(
            assets.url_for(TOKENIZER_FILE),
            "https://example.test/repo/tokenizer.json"
        );

        std::fs::write(dir.join(WEIGHTS_FILE), b"w").unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), "{}").unwrap();
        assert!(assets.is_complete());
        assert!(assets.require().is_ok());

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_complete_assets_skip_download() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        for name in REQUIRED_FILES {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        // Unreachable host: succeeds only because nothing is fetched
        let assets = ModelAssets::new(&dir, "http://127.0.0.1:9");
        let fetched = assets
            .download_missing(&reqwest::Client::new())
            .await
            .unwrap();
        assert_eq!(fetched, 0);

        std::fs::remove_dir_all(dir).ok();
    }
}
