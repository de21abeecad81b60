use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::SessionKey;
use crate::settings::Settings;

/// Network primitives the engine drives. Bodies of downloads are discarded; only
/// success and timing matter.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn download(&self, session: &SessionKey, bytes: u64) -> Result<()>;
    async fn upload(&self, session: &SessionKey, payload: Bytes) -> Result<()>;
    /// Raw status body: JSON or the literal `null`.
    async fn status(&self, session: &SessionKey) -> Result<String>;
    async fn clear(&self, session: &SessionKey) -> Result<()>;
    async fn open_echo(&self) -> Result<Box<dyn EchoChannel>>;
}

/// Persistent connection whose peer echoes each probe straight back.
#[async_trait]
pub trait EchoChannel: Send {
    async fn echo(&mut self) -> Result<()>;
    async fn close(&mut self);
}

fn timestamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

pub struct HttpTransport {
    client: reqwest::Client,
    settings: Settings,
}

impl HttpTransport {
    pub fn new(settings: Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .no_gzip()
            .build()?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, session: &SessionKey, bytes: u64) -> Result<()> {
        let url = format!(
            "{}/{}?bytes={}&timestamp={}",
            self.settings.download_url(),
            session,
            bytes,
            timestamp()
        );
        let response = self
            .client
            .get(&url)
            .header("Cache-Control", "no-cache")
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            chunk?;
        }
        Ok(())
    }

    async fn upload(&self, session: &SessionKey, payload: Bytes) -> Result<()> {
        let url = format!(
            "{}/{}?timestamp={}",
            self.settings.upload_url(),
            session,
            timestamp()
        );
        self.client
            .post(&url)
            .header("Content-Encoding", "identity")
            .header("Content-Type", "application/octet-stream")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn status(&self, session: &SessionKey) -> Result<String> {
        let url = format!(
            "{}/{}?timestamp={}",
            self.settings.status_url(),
            session,
            timestamp()
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn clear(&self, session: &SessionKey) -> Result<()> {
        let url = format!(
            "{}/{}?timestamp={}",
            self.settings.clear_url(),
            session,
            timestamp()
        );
        self.client.delete(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn open_echo(&self) -> Result<Box<dyn EchoChannel>> {
        let mut request = self
            .settings
            .echo_url()
            .into_client_request()
            .context("invalid echo url")?;
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_str(&self.settings.origin())?);

        let (stream, _) = connect_async(request)
            .await
            .context("echo socket connect failed")?;
        debug!("echo socket open");
        Ok(Box::new(WsEcho { stream }))
    }
}

struct WsEcho {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EchoChannel for WsEcho {
    async fn echo(&mut self) -> Result<()> {
        self.stream.send(Message::Text("p".into())).await?;
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(_) | Message::Binary(_) => return Ok(()),
                Message::Close(_) => break,
                _ => {}
            }
        }
        bail!("echo socket closed")
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
