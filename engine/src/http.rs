//! HTTP/WebSocket client for the gymsync document server.

use crate::network::ConnectivityProbe;
use crate::remote::{Filter, RemoteChange, RemoteDocument, RemoteStore};
use crate::{error::Result, EntityId, Error};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Deserialize)]
struct AddResponse {
    id: EntityId,
}

/// Remote store reached over HTTP, with live changes over WebSocket.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn documents_url(&self, path: &str) -> String {
        format!(
            "{}/collections/{}/documents",
            self.base_url,
            urlencoding::encode(path)
        )
    }

    fn document_url(&self, path: &str, id: &str) -> String {
        format!("{}/{}", self.documents_url(path), urlencoding::encode(id))
    }

    fn subscribe_url(&self, path: &str, filter: Option<&Filter>) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };

        let mut url = format!("{}/collections/{}/subscribe", base, urlencoding::encode(path));
        if let Some(filter) = filter {
            url.push_str(&format!(
                "?field={}&equals={}",
                urlencoding::encode(&filter.field),
                urlencoding::encode(&filter.equals.to_string())
            ));
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch(&self, path: &str, url: &str, query: &[(&str, String)]) -> Result<Vec<RemoteDocument>> {
        let response = self
            .request(reqwest::Method::GET, url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::remote_read(path, e))?;

        if !response.status().is_success() {
            return Err(Error::remote_read(
                path,
                format!("server returned status {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::remote_read(path, e))
    }

    async fn write(&self, path: &str, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::remote_write(path, e))?;

        if !response.status().is_success() {
            return Err(Error::remote_write(
                path,
                format!("server returned status {}", response.status()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert(&self, path: &str, id: &str, data: Value) -> Result<()> {
        let url = self.document_url(path, id);
        self.write(path, self.request(reqwest::Method::PUT, &url).json(&data))
            .await?;
        Ok(())
    }

    async fn add(&self, path: &str, data: Value) -> Result<EntityId> {
        let url = self.documents_url(path);
        let response = self
            .write(path, self.request(reqwest::Method::POST, &url).json(&data))
            .await?;
        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| Error::remote_write(path, e))?;
        Ok(added.id)
    }

    async fn delete(&self, path: &str, id: &str) -> Result<()> {
        let url = self.document_url(path, id);
        self.write(path, self.request(reqwest::Method::DELETE, &url))
            .await?;
        Ok(())
    }

    async fn read_all(&self, path: &str) -> Result<Vec<RemoteDocument>> {
        self.fetch(path, &self.documents_url(path), &[]).await
    }

    async fn read_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<RemoteDocument>> {
        let query = [
            ("orderBy", order_field.to_string()),
            ("limit", limit.to_string()),
        ];
        self.fetch(path, &self.documents_url(path), &query).await
    }

    async fn subscribe(
        &self,
        path: &str,
        filter: Option<Filter>,
    ) -> Result<BoxStream<'static, RemoteChange>> {
        let url = self.subscribe_url(path, filter.as_ref());
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::remote_read(path, e))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::remote_read(path, e))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| Error::remote_read(path, e))?;
        tracing::debug!(path, "subscribed to remote changes");

        let path = path.to_string();
        let changes = socket
            .take_while(|message| {
                futures::future::ready(matches!(message, Ok(m) if !m.is_close()))
            })
            .filter_map(move |message| {
                let path = path.clone();
                async move {
                    match message {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<RemoteChange>(text.as_str()) {
                                Ok(change) => Some(change),
                                Err(e) => {
                                    tracing::warn!(%path, error = %e, "ignoring malformed change frame");
                                    None
                                }
                            }
                        }
                        _ => None,
                    }
                }
            });

        Ok(Box::pin(changes))
    }
}

#[async_trait]
impl ConnectivityProbe for HttpRemote {
    async fn reachable(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "health probe failed");
                false
            }
        }
    }
}
