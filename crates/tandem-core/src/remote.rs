use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;

use crate::entitlement::{Entitlement, EntitlementProvider};

/// The external binary storage collaborator. Owns the bytes behind every
/// attachment's `storage_path`.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, storage_path: &str) -> Result<Vec<u8>>;
    async fn access_url(&self, storage_path: &str) -> Result<String>;
    async fn upload(&self, storage_path: &str, bytes: Vec<u8>, mime_type: &str) -> Result<()>;
}

/// Binary storage over plain HTTP: objects live at `{base_url}/{path}`.
pub struct HttpImageStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, storage_path: &str) -> String {
        format!("{}/{}", self.base_url, storage_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ImageStore for HttpImageStore {
    async fn fetch(&self, storage_path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(storage_path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn access_url(&self, storage_path: &str) -> Result<String> {
        Ok(self.url_for(storage_path))
    }

    async fn upload(&self, storage_path: &str, bytes: Vec<u8>, mime_type: &str) -> Result<()> {
        let url = self.url_for(storage_path);
        self.client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("PUT {}", url))?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EntitlementDto {
    tier: String,
    is_active: bool,
}

/// Entitlement collaborator backed by an HTTP subscription service. The
/// identity context is process state here, matching the collaborator's
/// contract: `current_entitlement` answers for the last-switched ref.
pub struct HttpEntitlementProvider {
    client: reqwest::Client,
    base_url: String,
    current_ref: Mutex<Option<String>>,
}

impl HttpEntitlementProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            current_ref: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EntitlementProvider for HttpEntitlementProvider {
    async fn switch_identity(&self, entitlement_ref: &str) -> Result<()> {
        if entitlement_ref.is_empty() {
            bail!("empty entitlement ref");
        }
        let mut current = self
            .current_ref
            .lock()
            .map_err(|e| anyhow::anyhow!("identity lock poisoned: {}", e))?;
        *current = Some(entitlement_ref.to_string());
        Ok(())
    }

    async fn current_entitlement(&self) -> Result<Entitlement> {
        let entitlement_ref = {
            let current = self
                .current_ref
                .lock()
                .map_err(|e| anyhow::anyhow!("identity lock poisoned: {}", e))?;
            current.clone()
        };
        let Some(entitlement_ref) = entitlement_ref else {
            bail!("no identity context set");
        };

        let url = format!("{}/entitlements/{}", self.base_url, entitlement_ref);
        let dto: EntitlementDto = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .json()
            .await?;

        Ok(Entitlement {
            tier: dto.tier,
            is_active: dto.is_active,
        })
    }
}
