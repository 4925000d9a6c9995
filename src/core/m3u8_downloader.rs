//! M3U8/HLS 流媒体下载器
//!
//! 剧集页面常常只给出 .m3u8 播放列表，这里负责：
//! - 解析主播放列表并选择最高码率
//! - 按顺序下载 .ts 片段并直接追加到目标文件
//! - 支持 AES-128 加密的 HLS 流

use aes::Aes128;
use bytes::Bytes;
use cbc::Decryptor;
use cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use reqwest::Client;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use url::Url;

use crate::core::models::{AppError, AppResult};

/// 主播放列表嵌套层数上限
const MAX_PLAYLIST_DEPTH: usize = 3;

/// 主播放列表中的一个码率变体
#[derive(Debug, Clone, PartialEq)]
pub struct M3U8Variant {
    pub bandwidth: u64,
    pub url: String,
}

/// 片段加密信息
#[derive(Debug, Clone, PartialEq)]
pub struct M3U8Encryption {
    /// 加密方法
    pub method: String,
    /// 密钥URL
    pub key_url: Option<String>,
    /// 初始化向量
    pub iv: Option<[u8; 16]>,
}

/// M3U8片段信息
#[derive(Debug, Clone, PartialEq)]
pub struct M3U8Segment {
    pub url: String,
    /// 媒体序列号（无显式 IV 时用于派生 IV）
    pub sequence: u64,
    /// 字节范围 (start, end)，闭区间
    pub byte_range: Option<(u64, u64)>,
    pub encryption: Option<M3U8Encryption>,
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum M3U8Playlist {
    Master(Vec<M3U8Variant>),
    Media(Vec<M3U8Segment>),
}

/// 解析播放列表文本，相对地址基于 `playlist_url` 解析
pub fn parse_playlist(playlist_url: &str, content: &str) -> AppResult<M3U8Playlist> {
    let base = Url::parse(playlist_url)
        .map_err(|e| AppError::Download(format!("无效的播放列表地址 {}: {}", playlist_url, e)))?;
    let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(AppError::Download("无效的M3U8文件格式".into()));
    }

    let mut variants = Vec::new();
    let mut segments = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;
    let mut sequence: u64 = 0;
    let mut encryption: Option<M3U8Encryption> = None;
    let mut pending_byte_range: Option<(u64, u64)> = None;
    let mut last_byte_range_end: Option<u64> = None;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attrs = parse_attributes(attrs);
            pending_bandwidth = Some(
                attrs
                    .get("BANDWIDTH")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            );
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            sequence = value.parse().unwrap_or(0);
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-KEY:") {
            encryption = parse_key(&base, attrs)?;
        } else if let Some(value) = line.strip_prefix("#EXT-X-BYTERANGE:") {
            let mut parts = value.split('@');
            let length: u64 = parts.next().and_then(|v| v.trim().parse().ok()).unwrap_or(0);
            if length == 0 {
                pending_byte_range = None;
            } else {
                let start = parts
                    .next()
                    .and_then(|v| v.trim().parse().ok())
                    .or_else(|| last_byte_range_end.map(|end| end + 1))
                    .unwrap_or(0);
                pending_byte_range = Some((start, start + length - 1));
            }
        } else if line.starts_with('#') {
            continue;
        } else {
            let url = base
                .join(line)
                .map_err(|e| AppError::Download(format!("无法解析片段地址 {}: {}", line, e)))?
                .to_string();

            if let Some(bandwidth) = pending_bandwidth.take() {
                variants.push(M3U8Variant { bandwidth, url });
                continue;
            }

            let byte_range = pending_byte_range.take();
            if let Some((_, end)) = byte_range {
                last_byte_range_end = Some(end);
            }
            segments.push(M3U8Segment {
                url,
                sequence,
                byte_range,
                encryption: encryption.clone(),
            });
            sequence += 1;
        }
    }

    if !variants.is_empty() {
        return Ok(M3U8Playlist::Master(variants));
    }
    if segments.is_empty() {
        return Err(AppError::Download("M3U8播放列表为空".into()));
    }
    Ok(M3U8Playlist::Media(segments))
}

/// 解析 `KEY=VALUE,KEY="VALUE"` 属性列表（引号内允许逗号）
fn parse_attributes(input: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' if in_value => in_quotes = !in_quotes,
            '=' if !in_value => in_value = true,
            ',' if !in_quotes => {
                if !key.is_empty() {
                    attrs.insert(key.trim().to_string(), value.trim().to_string());
                }
                key.clear();
                value.clear();
                in_value = false;
            }
            _ if in_value => value.push(c),
            _ => key.push(c),
        }
    }
    if !key.is_empty() {
        attrs.insert(key.trim().to_string(), value.trim().to_string());
    }
    attrs
}

fn parse_key(base: &Url, attrs: &str) -> AppResult<Option<M3U8Encryption>> {
    let attrs = parse_attributes(attrs);
    let method = attrs.get("METHOD").cloned().unwrap_or_default();
    if method.is_empty() || method.eq_ignore_ascii_case("NONE") {
        return Ok(None);
    }

    let key_url = match attrs.get("URI") {
        Some(uri) => Some(
            base.join(uri)
                .map_err(|e| AppError::Download(format!("无法解析密钥地址 {}: {}", uri, e)))?
                .to_string(),
        ),
        None => None,
    };
    let iv = attrs.get("IV").and_then(|iv| parse_iv(iv));

    Ok(Some(M3U8Encryption {
        method,
        key_url,
        iv,
    }))
}

fn parse_iv(iv: &str) -> Option<[u8; 16]> {
    let trimmed = iv.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let decoded = hex::decode(trimmed).ok()?;
    decoded.try_into().ok()
}

/// 计算 AES-128 IV：显式 IV 优先，否则使用媒体序列号
fn derive_iv(encryption: &M3U8Encryption, sequence: u64) -> [u8; 16] {
    if let Some(iv) = encryption.iv {
        return iv;
    }
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence.to_be_bytes());
    iv
}

/// 解密单个 TS 片段
fn decrypt_segment(data: &[u8], key: &[u8], iv: &[u8; 16]) -> AppResult<Vec<u8>> {
    if key.len() != 16 {
        return Err(AppError::Download(format!(
            "AES-128 密钥长度必须为 16 字节，当前为 {}",
            key.len()
        )));
    }
    let decryptor = Decryptor::<Aes128>::new_from_slices(key, iv)
        .map_err(|e| AppError::Download(e.to_string()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| AppError::Download("AES-128 解密失败".into()))
}

/// M3U8下载器
#[derive(Clone)]
pub struct M3U8Downloader {
    client: Client,
    read_timeout: Duration,
}

impl M3U8Downloader {
    pub fn new(client: Client, read_timeout: Duration) -> Self {
        Self {
            client,
            read_timeout,
        }
    }

    /// 下载整个流并写入 `output`，返回写入字节数。
    /// 片段严格按顺序逐个下载，避免对源站并发请求。
    pub async fn download_m3u8(&self, m3u8_url: &str, output: &Path) -> AppResult<u64> {
        tracing::info!("开始下载M3U8流: {}", m3u8_url);
        let segments = self.resolve_media_playlist(m3u8_url).await?;
        tracing::info!("解析到 {} 个片段", segments.len());

        let mut keys: HashMap<String, Bytes> = HashMap::new();
        let mut file = File::create(output).await?;
        let mut written = 0u64;

        for (index, segment) in segments.iter().enumerate() {
            let mut data = self.fetch_bytes(&segment.url, segment.byte_range).await?;

            if let Some(encryption) = &segment.encryption {
                if !encryption.method.eq_ignore_ascii_case("AES-128") {
                    return Err(AppError::Download(format!(
                        "不支持的加密方法: {}",
                        encryption.method
                    )));
                }
                let key_url = encryption
                    .key_url
                    .as_deref()
                    .ok_or_else(|| AppError::Download("AES-128 片段缺少密钥地址".into()))?;
                if !keys.contains_key(key_url) {
                    tracing::debug!("获取加密密钥: {}", key_url);
                    let key = self.fetch_bytes(key_url, None).await?;
                    keys.insert(key_url.to_string(), key);
                }
                let iv = derive_iv(encryption, segment.sequence);
                data = Bytes::from(decrypt_segment(&data, &keys[key_url], &iv)?);
            }

            file.write_all(&data).await?;
            written += data.len() as u64;
            tracing::debug!("片段 {}/{} 完成", index + 1, segments.len());
        }

        file.flush().await?;
        file.sync_all().await?;
        tracing::info!("M3U8下载完成: {} ({} 字节)", output.display(), written);
        Ok(written)
    }

    /// 跟随主播放列表直到拿到片段列表
    async fn resolve_media_playlist(&self, m3u8_url: &str) -> AppResult<Vec<M3U8Segment>> {
        let mut current = m3u8_url.to_string();
        for _ in 0..MAX_PLAYLIST_DEPTH {
            let content = self.fetch_text(&current).await?;
            match parse_playlist(&current, &content)? {
                M3U8Playlist::Media(segments) => return Ok(segments),
                M3U8Playlist::Master(variants) => {
                    let best = variants
                        .into_iter()
                        .max_by_key(|v| v.bandwidth)
                        .ok_or_else(|| AppError::Download("主播放列表没有可用码率".into()))?;
                    tracing::debug!("选择码率 {} : {}", best.bandwidth, best.url);
                    current = best.url;
                }
            }
        }
        Err(AppError::Download(format!(
            "播放列表嵌套过深: {}",
            m3u8_url
        )))
    }

    async fn fetch_text(&self, url: &str) -> AppResult<String> {
        let bytes = self.fetch_bytes(url, None).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| AppError::Download(format!("播放列表不是有效的 UTF-8: {}", url)))
    }

    async fn fetch_bytes(&self, url: &str, byte_range: Option<(u64, u64)>) -> AppResult<Bytes> {
        let mut request = self.client.get(url);
        if let Some((start, end)) = byte_range {
            request = request.header("Range", format!("bytes={}-{}", start, end));
        }

        let response = timeout(self.read_timeout, request.send())
            .await
            .map_err(|_| AppError::Download(format!("请求超时: {}", url)))??;
        if !response.status().is_success() {
            return Err(AppError::Download(format!(
                "下载失败: {} - {}",
                url,
                response.status()
            )));
        }

        let bytes = timeout(self.read_timeout, response.bytes())
            .await
            .map_err(|_| AppError::Download(format!("读取超时: {}", url)))??;
        Ok(bytes)
    }
}
