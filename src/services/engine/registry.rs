use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AthenaConfig;
use crate::models::RegionTag;
use crate::services::engine::athena::AthenaHttpClient;
use crate::services::engine::client::{AnalyticalEngineClient, EngineError};

/// Registry that keeps one engine client per region.
/// Clients are created lazily on first use and shared afterwards.
pub struct EngineRegistry {
    clients: Arc<RwLock<HashMap<RegionTag, Arc<dyn AnalyticalEngineClient>>>>,
    config: AthenaConfig,
}

impl EngineRegistry {
    pub fn new(config: AthenaConfig) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a client up front, replacing any existing one for its region.
    pub async fn insert(&self, client: Arc<dyn AnalyticalEngineClient>) {
        let mut clients = self.clients.write().await;
        clients.insert(client.region(), client);
    }

    /// Get or create the client for a region.
    /// This method is safe to call concurrently from multiple tasks
    pub async fn get_or_create(&self, region: RegionTag) -> Result<Arc<dyn AnalyticalEngineClient>, EngineError> {
        // Fast path: check if client already exists (read lock)
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&region) {
                return Ok(client.clone());
            }
        }

        // Slow path: create new client (write lock)
        let mut clients = self.clients.write().await;

        // Double-check in case another task created the client while we were waiting
        if let Some(client) = clients.get(&region) {
            return Ok(client.clone());
        }

        let region_config = self.config.region(region);
        tracing::info!(
            "Creating Athena client (region: {}, endpoint: {})",
            region,
            region_config.endpoint
        );
        let client: Arc<dyn AnalyticalEngineClient> = Arc::new(AthenaHttpClient::new(
            region,
            region_config,
            self.config.api_key.clone(),
        )?);
        clients.insert(region, client.clone());

        Ok(client)
    }

    pub fn config(&self) -> &AthenaConfig {
        &self.config
    }

    /// Get the number of clients created so far
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
