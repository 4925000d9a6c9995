//! HTTP 下载引擎
//!
//! 把解析出的视频地址保存到本地文件：
//! - 普通文件流式写入同目录下的 `.part` 临时文件，完成后原子重命名。
//!   每次下载使用独立的临时文件，同一目标的并发下载互不干扰
//! - M3U8 流交给 [`M3U8Downloader`] 按片段下载
//! - 失败时清理临时文件，不留下半成品

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::core::config::{DownloadConfig, DESKTOP_USER_AGENT};
use crate::core::m3u8_downloader::M3U8Downloader;
use crate::core::models::{AppError, AppResult};

/// 保存视频文件的能力。编排器只依赖这个 trait，测试里可以替换成假实现。
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// 下载 `video_url` 到 `destination`，返回写入的字节数
    async fn download(&self, video_url: &str, destination: &Path) -> AppResult<u64>;
}

/// HTTP下载器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
    /// 两次数据块之间的最长等待（秒）
    pub read_timeout: u64,
    /// 用户代理
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 60,
            user_agent: DESKTOP_USER_AGENT.to_string(),
        }
    }
}

impl From<&DownloadConfig> for DownloaderConfig {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout_seconds,
            read_timeout: config.read_timeout_seconds,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// HTTP 下载引擎
#[derive(Clone)]
pub struct HttpDownloader {
    config: DownloaderConfig,
    client: Client,
    m3u8_downloader: M3U8Downloader,
}

impl HttpDownloader {
    /// 创建新的下载器实例
    pub fn new(config: DownloaderConfig) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .user_agent(&config.user_agent)
            .build()?;
        let m3u8_downloader =
            M3U8Downloader::new(client.clone(), Duration::from_secs(config.read_timeout));

        Ok(Self {
            config,
            client,
            m3u8_downloader,
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// 流式下载普通文件到 `part_path`
    async fn download_file(&self, url: &str, part_path: &Path) -> AppResult<u64> {
        let read_timeout = Duration::from_secs(self.config.read_timeout);

        let response = timeout(read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| AppError::Download(format!("请求超时: {}", url)))??;

        if !response.status().is_success() {
            return Err(AppError::Download(format!(
                "HTTP错误: {} ({})",
                response.status(),
                url
            )));
        }

        if let Some(len) = response.content_length() {
            tracing::debug!("文件大小: {}", format_bytes(len));
        }

        let mut file = File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        loop {
            let next = timeout(read_timeout, stream.next())
                .await
                .map_err(|_| AppError::Download(format!("读取超时: {}", url)))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }

        // 确保文件数据写入磁盘
        file.flush().await?;
        file.sync_all().await?;
        Ok(downloaded)
    }
}

#[async_trait]
impl MediaDownloader for HttpDownloader {
    async fn download(&self, video_url: &str, destination: &Path) -> AppResult<u64> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part_path = part_path_for(destination);
        let result = if is_m3u8_url(video_url) {
            tracing::info!("使用M3U8Downloader开始流媒体下载: {}", destination.display());
            self.m3u8_downloader.download_m3u8(video_url, &part_path).await
        } else {
            self.download_file(video_url, &part_path).await
        };

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, destination).await?;
                tracing::info!(
                    "文件下载完成: {} ({})",
                    destination.display(),
                    format_bytes(bytes)
                );
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("清理临时文件失败 {}: {}", part_path.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }
}

/// `.<file name>.<uuid>.part` next to `destination`, unique per call
pub fn part_path_for(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let part_name = format!(".{}.{}.part", file_name, uuid::Uuid::new_v4().simple());
    match destination.parent() {
        Some(parent) => parent.join(part_name),
        None => PathBuf::from(part_name),
    }
}

/// 检测是否为M3U8 URL
pub fn is_m3u8_url(url: &str) -> bool {
    url.to_lowercase().contains(".m3u8")
}

/// 输出文件扩展名：HLS 流保存为 `ts`，其他为 `mp4`
pub fn media_extension(url: &str) -> &'static str {
    if is_m3u8_url(url) {
        "ts"
    } else {
        "mp4"
    }
}

/// 格式化字节大小为可读格式
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: u64 = 1024;

    if bytes < THRESHOLD {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD as f64 && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD as f64;
        unit_index += 1;
    }

    format!("{:.1} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// 目录中残留的临时文件
    fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.to_string_lossy().ends_with(".part"))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 单连接 HTTP 桩服务：按路径返回固定响应
    async fn serve(routes: Vec<(&'static str, u16, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, s, b)| (*s, b.clone()))
                        .unwrap_or((404, b"not found".to_vec()));
                    let head = format!(
                        "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_downloads_file_and_renames_part() {
        let base = serve(vec![("/v/1.mp4", 200, vec![42u8; 2048])]).await;
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("Show/Season 1/Show - S1E1.mp4");

        let downloader = HttpDownloader::new(DownloaderConfig::default()).unwrap();
        let bytes = downloader
            .download(&format!("{}/v/1.mp4", base), &destination)
            .await
            .unwrap();

        assert_eq!(bytes, 2048);
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), 2048);
        assert!(leftover_parts(destination.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_file() {
        let base = serve(vec![("/v/gone.mp4", 403, b"forbidden".to_vec())]).await;
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("gone.mp4");

        let downloader = HttpDownloader::new(DownloaderConfig::default()).unwrap();
        let result = downloader
            .download(&format!("{}/v/gone.mp4", base), &destination)
            .await;

        assert!(matches!(result, Err(AppError::Download(_))));
        assert!(!destination.exists());
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_downloads_to_same_destination() {
        let base = serve(vec![
            ("/v/a.mp4", 200, vec![1u8; 4000]),
            ("/v/b.mp4", 200, vec![2u8; 4000]),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("Show - S1E1.mp4");
        let downloader = HttpDownloader::new(DownloaderConfig::default()).unwrap();

        let url_a = format!("{}/v/a.mp4", base);
        let url_b = format!("{}/v/b.mp4", base);
        let (a, b) = tokio::join!(
            downloader.download(&url_a, &destination),
            downloader.download(&url_b, &destination),
        );

        assert_eq!(a.unwrap(), 4000);
        assert_eq!(b.unwrap(), 4000);
        // 最后完成的下载整体替换目标文件，不会出现混合内容
        let data = std::fs::read(&destination).unwrap();
        assert_eq!(data.len(), 4000);
        assert!(data.iter().all(|byte| *byte == data[0]));
        assert!(leftover_parts(dir.path()).is_empty());
    }

    #[test]
    fn test_part_paths_are_unique_siblings() {
        let destination = Path::new("/data/Show/Season 1/Show - S1E1.mp4");
        let first = part_path_for(destination);
        let second = part_path_for(destination);

        assert_ne!(first, second);
        assert_eq!(first.parent(), destination.parent());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".Show - S1E1.mp4."));
        assert!(name.ends_with(".part"));
    }

    #[tokio::test]
    async fn test_downloads_m3u8_stream() {
        let playlist = b"#EXTM3U\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n#EXT-X-ENDLIST\n";
        let base = serve(vec![
            (
                "/hls/master.m3u8",
                200,
                b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=100\nlow.m3u8\n\
                  #EXT-X-STREAM-INF:BANDWIDTH=900\nhigh.m3u8\n"
                    .to_vec(),
            ),
            ("/hls/high.m3u8", 200, playlist.to_vec()),
            ("/hls/seg0.ts", 200, vec![1u8; 100]),
            ("/hls/seg1.ts", 200, vec![2u8; 50]),
        ])
        .await;
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("ep.ts");

        let downloader = HttpDownloader::new(DownloaderConfig::default()).unwrap();
        let bytes = downloader
            .download(&format!("{}/hls/master.m3u8", base), &destination)
            .await
            .unwrap();

        assert_eq!(bytes, 150);
        let data = std::fs::read(&destination).unwrap();
        assert_eq!(&data[..100], &[1u8; 100][..]);
        assert_eq!(&data[100..], &[2u8; 50][..]);
    }

    #[test]
    fn test_media_extension() {
        assert_eq!(media_extension("https://cdn.example/a/index.M3U8?t=1"), "ts");
        assert_eq!(media_extension("https://cdn.example/a/video.mp4"), "mp4");
        assert_eq!(media_extension("https://cdn.example/stream"), "mp4");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
