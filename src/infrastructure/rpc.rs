// 传输层 - JSON-RPC（EVM / Solana）与 REST（Tron、区块浏览器、Esplora）
// 签名器只依赖这里的 trait，测试用脚本化实现替换。

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::rpc_validator::validate_rpc_response;

/// JSON-RPC 2.0 传输
#[async_trait]
pub trait JsonRpcTransport: Send + Sync {
    fn endpoint(&self) -> &str;

    /// 返回 `result` 字段；节点返回 `error` 时为 Err（保留节点原始消息）
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// REST 传输（路径相对于 base url）
#[async_trait]
pub trait RestTransport: Send + Sync {
    fn base_url(&self) -> &str;

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    async fn post_json(&self, path: &str, body: Value) -> Result<Value>;

    /// 纯文本请求体/响应（Esplora 广播）
    async fn post_text(&self, path: &str, body: String) -> Result<String>;

    async fn get_text(&self, path: &str) -> Result<String>;
}

/// 构建共享的 HTTP 客户端
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// reqwest 实现的 JSON-RPC 客户端
pub struct HttpJsonRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpJsonRpc {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl JsonRpcTransport for HttpJsonRpc {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!(method = method, endpoint = %self.url, "rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("{method} returned a non-JSON body (HTTP {status})"))?;

        validate_rpc_response(body).with_context(|| format!("{method} failed"))
    }
}

/// reqwest 实现的 REST 客户端
pub struct HttpRest {
    client: reqwest::Client,
    base_url: String,
    /// 可选的 API key 请求头（例如 TRON-PRO-API-KEY）
    api_key_header: Option<(String, String)>,
}

impl HttpRest {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key_header: None,
        }
    }

    pub fn with_api_key(mut self, header: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key_header = Some((header.into(), key.into()));
        self
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn decorate(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key_header {
            Some((header, key)) => builder.header(header.as_str(), key.as_str()),
            None => builder,
        }
    }

    async fn read_text(response: reqwest::Response, path: &str) -> Result<String> {
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {path}"))?;
        if !status.is_success() {
            // 节点/索引服务的原始错误消息保留给调用方
            anyhow::bail!("HTTP {} from {}: {}", status, path, text.trim());
        }
        Ok(text)
    }
}

#[async_trait]
impl RestTransport for HttpRest {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self
            .decorate(self.client.get(self.url(path)).query(query))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        let text = Self::read_text(response, path).await?;
        serde_json::from_str(&text).with_context(|| format!("GET {path} returned invalid JSON"))
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .decorate(self.client.post(self.url(path)).json(&body))
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        let text = Self::read_text(response, path).await?;
        serde_json::from_str(&text).with_context(|| format!("POST {path} returned invalid JSON"))
    }

    async fn post_text(&self, path: &str, body: String) -> Result<String> {
        let response = self
            .decorate(
                self.client
                    .post(self.url(path))
                    .header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(body),
            )
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        Self::read_text(response, path).await
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        let response = self
            .decorate(self.client.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        Self::read_text(response, path).await
    }
}
