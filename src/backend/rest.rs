use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    AuthUser, Backend, BackendError, ChangeCallback, ChangeEvent, ChangeHub, ChangeKind, Filter,
    Query, Row, SubscriptionHandle,
};

/// HTTP client for a PostgREST-style platform (`/rest/v1`, `/auth/v1`).
///
/// The platform pushes row changes to this service through database webhooks;
/// those arrive via [`Backend::publish`] and fan out to subscribers.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    hub: ChangeHub,
}

impl RestBackend {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            hub: ChangeHub::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Unavailable(format!("invalid backend URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(path.split('/'));
        Ok(url)
    }

    fn table_url(&self, table: &str, columns: &[String], filters: &[Filter]) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&format!("rest/v1/{table}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            if !columns.is_empty() {
                pairs.append_pair("select", &columns.join(","));
            }
            for filter in filters {
                pairs.append_pair(filter.column(), &encode_filter(filter));
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url.as_str())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn rows(response: reqwest::Response) -> Result<Vec<Row>, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn list_literal(value: &Value) -> String {
    let raw = literal(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('"', "\\\""))
    } else {
        raw
    }
}

pub(crate) fn encode_filter(filter: &Filter) -> String {
    match filter {
        Filter::Eq(_, Value::Null) => "is.null".to_string(),
        Filter::Eq(_, value) => format!("eq.{}", literal(value)),
        Filter::In(_, values) => {
            let items: Vec<String> = values.iter().map(list_literal).collect();
            format!("in.({})", items.join(","))
        }
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        let url = self.table_url(table, &query.columns, &query.filters)?;
        debug!(%url, "backend select");
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::rows(response).await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let url = self.table_url(table, &[], &[])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let stored = Self::rows(response).await?;
        Ok(stored.into_iter().next().unwrap_or(row))
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError> {
        let url = self.table_url(table, &[], filters)?;
        let response = self
            .request(reqwest::Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        Self::rows(response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        let url = self.table_url(table, &[], filters)?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .header("Prefer", "return=representation")
            .send()
            .await?;
        Self::rows(response).await
    }

    async fn authenticate(&self, access_token: &str) -> Result<Option<AuthUser>, BackendError> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .client
            .get(url.as_str())
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            status => Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        self.hub.subscribe(table, kinds, callback)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.hub.unsubscribe(handle);
    }

    fn publish(&self, event: ChangeEvent) {
        let delivered = self.hub.publish(&event);
        debug!(table = %event.table, kind = %event.kind, delivered, "change published");
    }
}
