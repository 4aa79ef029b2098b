use crate::adapters::{LegacySource, ModernStore, ReferenceSource};
use crate::migrator::config::{MigratorConfig, ModernConfig};
use crate::migrator::model::{
    ChallengeTypeRef, LegacyChallenge, LegacyFilter, LegacyIdPage, LegacyListing,
    LegacyResource, ResourceRoleRef, TargetChallenge, TargetResource, TimelineTemplateRef,
};
use crate::migrator::util::{challenge_doc_id, resource_doc_id};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Page size used when scanning the search index for children.
const INDEX_SCAN_SIZE: usize = 1_000;

/// Fetch `from`-offset pages of `page_size` until a short page comes back.
fn collect_pages<T>(
    page_size: usize,
    mut fetch: impl FnMut(usize) -> Result<Vec<T>>,
) -> Result<Vec<T>> {
    let page_size = page_size.max(1);
    let mut all = Vec::new();
    loop {
        let page = fetch(all.len())?;
        let short = page.len() < page_size;
        all.extend(page);
        if short {
            return Ok(all);
        }
    }
}

pub struct ApiClient {
    client: Client,
    token: Option<String>,
    retries: usize,
}

impl ApiClient {
    pub fn new(cfg: &MigratorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http.timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            token: cfg.auth_token.clone(),
            retries: cfg.http.retries,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET with linear backoff. Reads are idempotent, so retrying is safe;
    /// 404 is returned as `None` without retrying.
    fn get_optional(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Response>> {
        let mut last_err = None;
        for attempt in 0..=self.retries {
            let request = self.authorize(self.client.get(url).query(query));
            match request.send() {
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(resp) if resp.status().is_success() => return Ok(Some(resp)),
                Ok(resp) if resp.status().is_client_error() => {
                    anyhow::bail!("GET {url} failed with status {}", resp.status());
                }
                Ok(resp) => {
                    last_err = Some(anyhow::anyhow!("GET {url} failed with status {}", resp.status()));
                }
                Err(err) => {
                    last_err = Some(anyhow::Error::new(err).context(format!("GET {url}")));
                }
            }
            if attempt < self.retries {
                tracing::debug!(url, attempt, "retrying legacy read");
                thread::sleep(Duration::from_millis(250 * (attempt as u64 + 1)));
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("GET {url} failed")))
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let Some(resp) = self.get_optional(url, query)? else {
            return Ok(None);
        };
        let parsed = resp
            .json::<T>()
            .with_context(|| format!("failed to decode response from {url}"))?;
        Ok(Some(parsed))
    }

    fn send_json(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let resp = self
            .authorize(request)
            .send()
            .with_context(|| format!("{what} request failed"))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("{what} failed with status {status}: {}", body.trim());
        }
        Ok(resp)
    }

    /// DELETE where an already-missing resource counts as deleted.
    fn delete_if_present(&self, request: RequestBuilder, what: &str) -> Result<bool> {
        let resp = self
            .authorize(request)
            .send()
            .with_context(|| format!("{what} request failed"))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(what, "already absent");
            return Ok(false);
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            anyhow::bail!("{what} failed with status {status}: {}", body.trim());
        }
        Ok(true)
    }
}

fn trim_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Deserialize)]
struct ListingEnvelope {
    total: u64,
    #[serde(default)]
    items: Vec<LegacyListing>,
}

pub struct HttpLegacySource {
    api: Arc<ApiClient>,
    base_url: String,
}

impl HttpLegacySource {
    pub fn new(api: Arc<ApiClient>, base_url: &str) -> Self {
        Self {
            api,
            base_url: trim_base(base_url),
        }
    }
}

impl LegacySource for HttpLegacySource {
    fn list_ids(&self, filter: &LegacyFilter, page_size: u64, page: u64) -> Result<LegacyIdPage> {
        let url = format!("{}/challenges", self.base_url);
        let mut query = vec![
            ("page", page.max(1).to_string()),
            ("perPage", page_size.max(1).to_string()),
            ("sortBy", "modifiedAt".to_string()),
            ("sortOrder", "asc".to_string()),
        ];
        if let Some(start) = filter.start_date {
            query.push(("startDate", start.to_rfc3339()));
        }
        if let Some(end) = filter.end_date {
            query.push(("endDate", end.to_rfc3339()));
        }
        if let Some(id) = filter.legacy_id {
            query.push(("legacyId", id.to_string()));
        }
        let envelope: ListingEnvelope = self
            .api
            .get_json(&url, &query)?
            .with_context(|| format!("legacy listing endpoint {url} not found"))?;
        Ok(LegacyIdPage {
            total: envelope.total,
            items: envelope.items,
        })
    }

    fn get_detail(&self, legacy_id: i64) -> Result<Option<LegacyChallenge>> {
        let url = format!("{}/challenges/{legacy_id}", self.base_url);
        self.api.get_json(&url, &[])
    }

    fn get_child_records(&self, legacy_id: i64) -> Result<Vec<LegacyResource>> {
        let url = format!("{}/challenges/{legacy_id}/resources", self.base_url);
        Ok(self.api.get_json(&url, &[])?.unwrap_or_default())
    }
}

pub struct HttpReferenceSource {
    api: Arc<ApiClient>,
    base_url: String,
}

impl HttpReferenceSource {
    pub fn new(api: Arc<ApiClient>, base_url: &str) -> Self {
        Self {
            api,
            base_url: trim_base(base_url),
        }
    }

    fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = format!("{}/{path}", self.base_url);
        let query = [("perPage", "1000".to_string())];
        self.api
            .get_json(&url, &query)?
            .with_context(|| format!("reference endpoint {url} not found"))
    }
}

impl ReferenceSource for HttpReferenceSource {
    fn list_types(&self) -> Result<Vec<ChallengeTypeRef>> {
        self.list("challenge-types")
    }

    fn list_roles(&self) -> Result<Vec<ResourceRoleRef>> {
        self.list("resource-roles")
    }

    fn list_timeline_templates(&self) -> Result<Vec<TimelineTemplateRef>> {
        self.list("timeline-templates")
    }
}

/// Writes go to the document store first and the search index second. Both
/// are keyed PUTs, so a retry after a partial failure converges.
pub struct HttpModernStore {
    api: Arc<ApiClient>,
    document_url: String,
    index_url: String,
    challenge_index: String,
    resource_index: String,
}

impl HttpModernStore {
    pub fn new(api: Arc<ApiClient>, cfg: &ModernConfig) -> Self {
        Self {
            api,
            document_url: trim_base(&cfg.document_url),
            index_url: trim_base(&cfg.index_url),
            challenge_index: cfg.challenge_index.trim().to_string(),
            resource_index: cfg.resource_index.trim().to_string(),
        }
    }

    fn index_doc(&self, index: &str, id: &str, body: &Value) -> Result<()> {
        let url = format!("{}/{index}/_doc/{id}?refresh=wait_for", self.index_url);
        self.api
            .send_json(self.api.client.put(&url).json(body), &format!("index {index}/{id}"))?;
        Ok(())
    }

    fn search<T: DeserializeOwned>(
        &self,
        index: &str,
        query: &Value,
        from: usize,
        size: usize,
    ) -> Result<Vec<T>> {
        let url = format!("{}/{index}/_search", self.index_url);
        let body = json!({ "from": from, "size": size, "query": query });
        let resp = self
            .api
            .send_json(self.api.client.post(&url).json(&body), &format!("search {index}"))?;
        let parsed: Value = resp
            .json()
            .with_context(|| format!("failed to decode search response from {index}"))?;
        let hits = parsed
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        hits.into_iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .map(|source| serde_json::from_value(source).context("invalid indexed document"))
            .collect()
    }
}

impl ModernStore for HttpModernStore {
    fn upsert(&self, challenge: &TargetChallenge) -> Result<String> {
        let id = challenge
            .id
            .clone()
            .unwrap_or_else(|| challenge_doc_id(challenge.legacy_id));
        let mut doc = challenge.clone();
        doc.id = Some(id.clone());
        let body = serde_json::to_value(&doc)?;

        let url = format!("{}/challenges/{id}", self.document_url);
        self.api.send_json(
            self.api.client.put(&url).json(&body),
            &format!("store challenge {id} (legacy {})", challenge.legacy_id),
        )?;
        self.index_doc(&self.challenge_index, &id, &body)?;
        Ok(id)
    }

    fn delete(&self, target_id: &str) -> Result<()> {
        let doc_url = format!("{}/challenges/{target_id}", self.document_url);
        let stored = self.api.delete_if_present(
            self.api.client.delete(&doc_url),
            &format!("delete challenge {target_id}"),
        )?;

        let index_url = format!(
            "{}/{}/_doc/{target_id}?refresh=wait_for",
            self.index_url, self.challenge_index
        );
        self.api.delete_if_present(
            self.api.client.delete(&index_url),
            &format!("unindex challenge {target_id}"),
        )?;

        let by_query = format!("{}/{}/_delete_by_query", self.index_url, self.resource_index);
        let body = json!({ "query": { "term": { "challengeId": target_id } } });
        self.api.delete_if_present(
            self.api.client.post(&by_query).json(&body),
            &format!("unindex resources of {target_id}"),
        )?;
        if !stored {
            tracing::info!(target_id, "challenge was already gone from the document store");
        }
        Ok(())
    }

    fn read_by_legacy_id(&self, legacy_id: i64) -> Result<Option<TargetChallenge>> {
        let hits: Vec<TargetChallenge> = self.search(
            &self.challenge_index,
            &json!({ "term": { "legacyId": legacy_id } }),
            0,
            2,
        )?;
        if hits.len() > 1 {
            tracing::warn!(legacy_id, "search index holds duplicate challenges for legacy id");
        }
        Ok(hits.into_iter().next())
    }

    fn upsert_child(&self, resource: &TargetResource) -> Result<()> {
        let id = resource.id.clone().unwrap_or_else(|| {
            resource_doc_id(
                &resource.challenge_id,
                resource.member_id.as_str(),
                &resource.role_id,
            )
        });
        let mut doc = resource.clone();
        doc.id = Some(id.clone());
        let body = serde_json::to_value(&doc)?;

        let url = format!("{}/resources/{id}", self.document_url);
        self.api.send_json(
            self.api.client.put(&url).json(&body),
            &format!("store resource {} on {}", resource.member_id, resource.challenge_id),
        )?;
        self.index_doc(&self.resource_index, &id, &body)
    }

    fn list_children(&self, target_id: &str) -> Result<Vec<TargetResource>> {
        let query = json!({ "term": { "challengeId": target_id } });
        collect_pages(INDEX_SCAN_SIZE, |from| {
            self.search(&self.resource_index, &query, from, INDEX_SCAN_SIZE)
        })
    }
}
