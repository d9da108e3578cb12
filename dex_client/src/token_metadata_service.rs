use crate::birdeye_client::{BirdEyeClient, SecurityRow, TokenMetadata};
use crate::{DexClientError, Result};
use harvest_core::EntityKey;
use persistence_layer::{Cached, CsvTable, JsonCache};
use std::path::Path;
use tracing::{debug, info};

pub const METADATA_KIND: &str = "metadata";
pub const SECURITY_FILE: &str = "security_details.csv";

/// Cache-aware access to per-token BirdEye documents.
///
/// Metadata lives in `metadata_<address>.json`, security details as rows of
/// `security_details.csv`. Neither is fetched again once present unless
/// `force_refresh` is set.
pub struct TokenMetadataService {
    client: BirdEyeClient,
    cache: JsonCache,
    security: CsvTable,
    force_refresh: bool,
}

impl TokenMetadataService {
    pub fn new(client: BirdEyeClient, data_dir: &Path, force_refresh: bool) -> Self {
        Self {
            client,
            cache: JsonCache::new(data_dir),
            security: CsvTable::new(data_dir.join(SECURITY_FILE)),
            force_refresh,
        }
    }

    pub fn client(&self) -> &BirdEyeClient {
        &self.client
    }

    pub fn has_metadata(&self, key: &EntityKey) -> bool {
        self.cache.get::<TokenMetadata>(METADATA_KIND, key).is_some()
    }

    pub fn has_security(&self, key: &EntityKey) -> Result<bool> {
        Ok(self.security.find::<SecurityRow>("address", key.as_str())?.is_some())
    }

    pub async fn metadata(&self, key: &EntityKey) -> Result<Option<Cached<TokenMetadata>>> {
        self.cache
            .get_or_fetch(METADATA_KIND, key, self.force_refresh, || async {
                Ok::<_, DexClientError>(self.client.token_metadata(key).await?)
            })
            .await
    }

    pub async fn security(&self, key: &EntityKey) -> Result<Option<Cached<SecurityRow>>> {
        if !self.force_refresh {
            if let Some(row) = self.security.find::<SecurityRow>("address", key.as_str())? {
                return Ok(Some(Cached::Hit(row)));
            }
        }

        match self.client.token_security(key).await? {
            Some(security) => {
                let row = SecurityRow::from_security(key.as_str(), security);
                self.security.append(std::slice::from_ref(&row))?;
                debug!("🔐 Saved security details for {}", key);
                Ok(Some(Cached::Fresh(row)))
            }
            None => Ok(None),
        }
    }

    /// Creation time from saved security details, falling back to the meme metadata.
    ///
    /// `None` means no source knows it; callers treat that as a missing precondition.
    pub async fn creation_time(&self, key: &EntityKey) -> Result<Option<i64>> {
        if let Some(row) = self.security.find::<SecurityRow>("address", key.as_str())? {
            if let Some(ts) = row.creation_time {
                return Ok(Some(ts));
            }
        }

        let creation = self
            .metadata(key)
            .await?
            .and_then(|m| m.into_inner().creation_time());
        if creation.is_none() {
            info!("⚠️ No creation time known for {}", key);
        }
        Ok(creation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_manager::SystemConfig;
    use harvest_core::testing::ScriptedTransport;
    use harvest_core::{Invoker, RawResponse};
    use retry_utils::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(transport: Arc<ScriptedTransport>, dir: &Path, force: bool) -> TokenMetadataService {
        let mut config = SystemConfig::default().birdeye;
        config.api_base_url = "https://birdeye.test".to_string();
        let invoker = Invoker::new(transport, RetryConfig::new(1, Duration::from_millis(1), 3));
        TokenMetadataService::new(BirdEyeClient::new(config, invoker), dir, force)
    }

    const META: &str = r#"{"success":true,"data":{"address":"TOKEN1","meme_info":{"creation_time":1700000000}}}"#;

    #[tokio::test]
    async fn test_metadata_cached_after_first_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(META))]));
        let service = service(transport.clone(), dir.path(), false);
        let key = EntityKey::from("TOKEN1");

        let first = service.metadata(&key).await.unwrap().unwrap();
        let second = service.metadata(&key).await.unwrap().unwrap();

        assert!(!first.is_hit());
        assert!(second.is_hit());
        assert_eq!(transport.request_count(), 1);
        assert!(dir.path().join("metadata_TOKEN1.json").exists());
    }

    #[tokio::test]
    async fn test_creation_time_prefers_security_row() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(
            r#"{"success":true,"data":{"creatorAddress":"C","creationTime":1650000000,"top10HolderPercent":0.4}}"#,
        ))]));
        let service = service(transport.clone(), dir.path(), false);
        let key = EntityKey::from("TOKEN1");

        let row = service.security(&key).await.unwrap().unwrap().into_inner();
        assert_eq!(row.creator_address.as_deref(), Some("C"));

        assert_eq!(service.creation_time(&key).await.unwrap(), Some(1_650_000_000));
        // Served from security_details.csv, no metadata request
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_creation_time_falls_back_to_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::ok(META))]));
        let service = service(transport, dir.path(), false);

        assert_eq!(
            service.creation_time(&EntityKey::from("TOKEN1")).await.unwrap(),
            Some(1_700_000_000)
        );
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_security_rows() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"success":true,"data":{"creationTime":1}}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::ok(body)),
            Ok(RawResponse::ok(body)),
        ]));
        let key = EntityKey::from("TOKEN1");

        service(transport.clone(), dir.path(), false).security(&key).await.unwrap();
        let refreshed = service(transport.clone(), dir.path(), true)
            .security(&key)
            .await
            .unwrap()
            .unwrap();

        assert!(!refreshed.is_hit());
        assert_eq!(transport.request_count(), 2);
    }
}
