// SPDX-License-Identifier: GPL-3.0-only

//! Frame provider lifecycle manager
//!
//! The manager provides:
//! - One [`FrameProvider`] per device reported by the discovery collaborator
//! - Release of the provider when its device goes away
//! - Thread-safe provider lookup

use super::DeviceProvider;
use crate::config::ProviderConfig;
use crate::errors::{ProviderError, ProviderResult};
use crate::pipelines::{FrameProvider, FrameSink};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Internal manager state
struct ManagerState {
    /// Live providers keyed by device id
    providers: BTreeMap<String, Arc<FrameProvider>>,
    /// Set once by shutdown; no provider is created afterwards
    destroyed: bool,
}

/// Frame provider manager
///
/// Thread-safe and can be shared across threads.
#[derive(Clone)]
pub struct ProviderManager {
    state: Arc<Mutex<ManagerState>>,
    devices: Arc<dyn DeviceProvider>,
    sink: Arc<dyn FrameSink>,
    config: ProviderConfig,
    runtime: Handle,
}

impl ProviderManager {
    /// Create a new manager
    ///
    /// # Arguments
    /// * `devices` - Resolves device ids reported by discovery
    /// * `sink` - Receives frames and availability updates of every provider
    /// * `config` - Applied to every provider the manager creates
    /// * `runtime` - Runs the acquisition read steps
    pub fn new(
        devices: Arc<dyn DeviceProvider>,
        sink: Arc<dyn FrameSink>,
        config: ProviderConfig,
        runtime: Handle,
    ) -> Self {
        info!(kind = %config.device_kind, "Creating frame provider manager");

        Self {
            state: Arc::new(Mutex::new(ManagerState {
                providers: BTreeMap::new(),
                destroyed: false,
            })),
            devices,
            sink,
            config,
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Discovery reported a device
    ///
    /// Creates the provider unless one already exists for `device_id`. A
    /// failed creation leaves nothing registered.
    pub fn device_added(&self, device_id: &str) -> ProviderResult<Arc<FrameProvider>> {
        let mut state = self.lock();
        if state.destroyed {
            return Err(ProviderError::InvalidState(
                "provider manager shut down".to_string(),
            ));
        }
        if let Some(existing) = state.providers.get(device_id) {
            return Ok(Arc::clone(existing));
        }

        info!(device = %device_id, "Device added, creating provider");

        let provider = FrameProvider::open(
            self.devices.as_ref(),
            device_id,
            &self.config,
            Arc::clone(&self.sink),
            self.runtime.clone(),
        )
        .map_err(|e| {
            warn!(device = %device_id, error = %e, "Failed to create provider");
            e
        })?;

        let provider = Arc::new(provider);
        state
            .providers
            .insert(device_id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Discovery reported a device gone; returns whether a provider was released
    pub fn device_removed(&self, device_id: &str) -> bool {
        let removed = self.lock().providers.remove(device_id);
        match removed {
            Some(provider) => {
                info!(device = %device_id, "Device removed, releasing provider");
                provider.shutdown();
                true
            }
            None => false,
        }
    }

    /// Provider for a device, if one is registered
    pub fn get_provider(&self, device_id: &str) -> Option<Arc<FrameProvider>> {
        self.lock().providers.get(device_id).cloned()
    }

    /// Ids of all registered providers, sorted
    pub fn provider_ids(&self) -> Vec<String> {
        self.lock().providers.keys().cloned().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().destroyed
    }

    /// Release every provider and refuse further additions
    pub fn shutdown(&self) {
        let providers = {
            let mut state = self.lock();
            state.destroyed = true;
            std::mem::take(&mut state.providers)
        };

        info!(count = providers.len(), "Shutting down provider manager");
        for provider in providers.values() {
            provider.shutdown();
        }
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ProviderManager")
            .field("providers", &state.providers.keys().collect::<Vec<_>>())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
