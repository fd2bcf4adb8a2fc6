//! Download backend clients (§1 Non-goals: "the system hands off URLs to a
//! configured download backend and tracks status" — it never executes
//! transfers itself). `Downloader` is the seam the scheduler depends on;
//! `qbittorrent` and `torrserver` are the two concrete backends carried
//! forward from the donor's own client layer.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::DownloadQueueItem;

/// A snapshot of a backend-tracked transfer, translated into the scheduler's
/// vocabulary.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub progress_percentage: u8,
    pub completed: bool,
    pub download_path: Option<String>,
    pub error: Option<String>,
}

/// A download backend. One call starts a transfer and returns an opaque
/// handle the scheduler persists on the queue item; subsequent polls use
/// that handle to translate backend state into `DownloadProgress`.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn start(&self, item: &DownloadQueueItem) -> Result<String>;
    async fn poll(&self, handle: &str) -> Result<DownloadProgress>;
    async fn cancel(&self, handle: &str) -> Result<()>;
    async fn test_connection(&self) -> Result<()>;
}

pub mod qbittorrent {
    use super::*;
    use qbit_rs::{
        Qbit,
        model::{AddTorrentArg, Credential, GetTorrentListArg, State, TorrentSource},
    };
    use reqwest::Url;
    use std::sync::Arc;

    pub struct QbittorrentDownloader {
        qbit: Arc<Qbit>,
    }

    impl QbittorrentDownloader {
        pub fn new(url: &str, username: Option<String>, password: Option<String>) -> Self {
            let credential = Credential::new(username.unwrap_or_default(), password.unwrap_or_default());
            Self {
                qbit: Arc::new(Qbit::new(url, credential)),
            }
        }

        async fn ensure_login(&self) -> Result<()> {
            self.qbit
                .login(false)
                .await
                .map_err(|e| Error::Transport(format!("qbittorrent login failed: {e}")))
        }
    }

    #[async_trait]
    impl Downloader for QbittorrentDownloader {
        async fn start(&self, item: &DownloadQueueItem) -> Result<String> {
            self.ensure_login().await?;
            let url = Url::parse(&item.download_url)
                .map_err(|e| Error::InvalidArgument(format!("invalid download url: {e}")))?;
            let arg = AddTorrentArg::builder()
                .source(TorrentSource::Urls {
                    urls: vec![url].into(),
                })
                .build();
            self.qbit
                .add_torrent(arg)
                .await
                .map_err(|e| Error::Transport(format!("qbittorrent add_torrent failed: {e}")))?;
            Ok(item.id.to_string())
        }

        async fn poll(&self, handle: &str) -> Result<DownloadProgress> {
            let list = self
                .qbit
                .get_torrent_list(GetTorrentListArg::default())
                .await
                .map_err(|e| Error::Transport(format!("qbittorrent list failed: {e}")))?;

            let Some(torrent) = list
                .into_iter()
                .find(|t| t.hash.as_deref() == Some(handle) || t.tags.as_deref() == Some(handle))
            else {
                return Ok(DownloadProgress {
                    progress_percentage: 0,
                    completed: false,
                    download_path: None,
                    error: None,
                });
            };

            let progress_percentage = torrent
                .progress
                .map(|p| (p * 100.0).round().clamp(0.0, 100.0) as u8)
                .unwrap_or(0);
            let completed = matches!(torrent.state, Some(State::UploadingUP) | Some(State::PausedUP));
            let error = match torrent.state {
                Some(State::Error) | Some(State::MissingFiles) => {
                    Some("qbittorrent reported a torrent error state".to_string())
                }
                _ => None,
            };

            Ok(DownloadProgress {
                progress_percentage,
                completed,
                download_path: torrent.save_path,
                error,
            })
        }

        async fn cancel(&self, handle: &str) -> Result<()> {
            self.ensure_login().await?;
            self.qbit
                .delete_torrents(vec![handle.to_string()], true)
                .await
                .map_err(|e| Error::Transport(format!("qbittorrent delete failed: {e}")))
        }

        async fn test_connection(&self) -> Result<()> {
            self.ensure_login().await?;
            let version = self
                .qbit
                .get_version()
                .await
                .map_err(|e| Error::Transport(format!("qbittorrent get_version failed: {e}")))?;
            if version.is_empty() {
                return Err(Error::Transport("qbittorrent returned empty version".into()));
            }
            Ok(())
        }
    }
}

pub mod torrserver {
    use super::*;
    use serde::{Deserialize, Serialize};

    pub struct TorrServerDownloader {
        base_url: String,
        client: reqwest::Client,
    }

    impl TorrServerDownloader {
        pub fn new(base_url: &str) -> Self {
            Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                client: reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(15))
                    .build()
                    .expect("reqwest client builder never fails with these options"),
            }
        }
    }

    #[derive(Serialize)]
    struct AddRequest<'a> {
        action: &'a str,
        link: &'a str,
    }

    #[derive(Serialize)]
    struct StatRequest<'a> {
        hash: &'a str,
    }

    #[derive(Deserialize)]
    struct StatResponse {
        stat: Option<i32>,
        #[serde(default)]
        preload_size: u64,
        #[serde(default)]
        file_stats: Option<Vec<FileStat>>,
    }

    #[derive(Deserialize)]
    struct FileStat {
        #[serde(default)]
        size: u64,
        #[serde(default)]
        completed_size: u64,
    }

    #[async_trait]
    impl Downloader for TorrServerDownloader {
        async fn start(&self, item: &DownloadQueueItem) -> Result<String> {
            let req = AddRequest {
                action: "add",
                link: &item.download_url,
            };
            let resp = self
                .client
                .post(format!("{}/torrents", self.base_url))
                .json(&req)
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(Error::HTTPStatus(resp.status().as_u16()));
            }
            Ok(item.id.to_string())
        }

        async fn poll(&self, handle: &str) -> Result<DownloadProgress> {
            let req = StatRequest { hash: handle };
            let resp = self
                .client
                .post(format!("{}/torrents", self.base_url))
                .json(&serde_json::json!({"action": "stat", "hash": req.hash}))
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if !resp.status().is_success() {
                return Ok(DownloadProgress {
                    progress_percentage: 0,
                    completed: false,
                    download_path: None,
                    error: None,
                });
            }
            let stat: StatResponse = resp
                .json()
                .await
                .map_err(|e| Error::MalformedResponse(e.to_string()))?;

            let (done, total) = stat
                .file_stats
                .unwrap_or_default()
                .into_iter()
                .fold((0u64, 0u64), |(d, t), f| (d + f.completed_size, t + f.size));
            let progress_percentage = if total > 0 {
                ((done * 100) / total).min(100) as u8
            } else if stat.preload_size > 0 && done >= stat.preload_size {
                100
            } else {
                0
            };

            Ok(DownloadProgress {
                progress_percentage,
                completed: total > 0 && done >= total,
                download_path: None,
                error: stat.stat.filter(|s| *s < 0).map(|s| format!("torrserver stat code {s}")),
            })
        }

        async fn cancel(&self, handle: &str) -> Result<()> {
            let resp = self
                .client
                .post(format!("{}/torrents", self.base_url))
                .json(&serde_json::json!({"action": "rem", "hash": handle}))
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(Error::HTTPStatus(resp.status().as_u16()))
            }
        }

        async fn test_connection(&self) -> Result<()> {
            let resp = self
                .client
                .get(format!("{}/echo", self.base_url))
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(Error::HTTPStatus(resp.status().as_u16()))
            }
        }
    }
}

pub use qbittorrent::QbittorrentDownloader;
pub use torrserver::TorrServerDownloader;
