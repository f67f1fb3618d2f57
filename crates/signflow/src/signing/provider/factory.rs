use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use super::zapsign::ZapSignStrategy;
use super::ProviderStrategy;
use crate::config::ProviderConfig;
use crate::signing::domain::Company;

/// Identity of a cached strategy instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub provider_code: String,
    pub credential: String,
    pub base_url: Option<String>,
}

impl ProviderKey {
    pub fn new(provider_code: &str, credential: &str, base_url: Option<&str>) -> Self {
        Self {
            provider_code: provider_code.trim().to_ascii_lowercase(),
            credential: credential.to_string(),
            base_url: base_url
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }
}

/// Settings handed to every strategy builder.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub request_timeout: Duration,
    pub zapsign_base_url: String,
}

impl From<&ProviderConfig> for ProviderSettings {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            zapsign_base_url: config.zapsign_base_url.clone(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

pub type StrategyBuilder = Arc<
    dyn Fn(&ProviderKey, &ProviderSettings) -> Result<Arc<dyn ProviderStrategy>, FactoryError>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    #[error("unknown provider code: {0}")]
    UnknownProvider(String),
    #[error("unable to build provider client: {0}")]
    Client(String),
}

/// Resolves tenant provider bindings to process-lifetime strategy instances.
///
/// Constructed explicitly and shared through `Arc`; the cache lives as long as
/// the factory does.
pub struct ProviderFactory {
    settings: ProviderSettings,
    builders: BTreeMap<String, StrategyBuilder>,
    cache: RwLock<HashMap<ProviderKey, Arc<dyn ProviderStrategy>>>,
}

impl ProviderFactory {
    /// Factory with the built-in providers registered.
    pub fn new(settings: ProviderSettings) -> Self {
        Self::empty(settings).register(
            ZapSignStrategy::CODE,
            Arc::new(
                |key: &ProviderKey,
                 settings: &ProviderSettings|
                 -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
                    let base_url = key
                        .base_url
                        .clone()
                        .unwrap_or_else(|| settings.zapsign_base_url.clone());
                    let strategy = ZapSignStrategy::new(
                        &key.credential,
                        &base_url,
                        settings.request_timeout,
                    )?;
                    Ok(Arc::new(strategy))
                },
            ),
        )
    }

    pub fn empty(settings: ProviderSettings) -> Self {
        Self {
            settings,
            builders: BTreeMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(mut self, code: &str, builder: StrategyBuilder) -> Self {
        self.builders
            .insert(code.trim().to_ascii_lowercase(), builder);
        self
    }

    pub fn provider_codes(&self) -> Vec<String> {
        self.builders.keys().cloned().collect()
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.builders
            .contains_key(&code.trim().to_ascii_lowercase())
    }

    /// Returns the cached strategy for the key, constructing it at most once.
    pub fn get(
        &self,
        provider_code: &str,
        credential: &str,
        base_url: Option<&str>,
    ) -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
        let key = ProviderKey::new(provider_code, credential, base_url);

        if let Some(strategy) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(strategy));
        }

        let builder = self
            .builders
            .get(&key.provider_code)
            .ok_or_else(|| FactoryError::UnknownProvider(provider_code.to_string()))?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(strategy) = cache.get(&key) {
            return Ok(Arc::clone(strategy));
        }

        let strategy = builder(&key, &self.settings)?;
        debug!(provider = %key.provider_code, "constructed provider strategy");
        cache.insert(key, Arc::clone(&strategy));
        Ok(strategy)
    }

    pub fn for_company(&self, company: &Company) -> Result<Arc<dyn ProviderStrategy>, FactoryError> {
        let binding = &company.binding;
        self.get(
            &binding.provider_code,
            &binding.api_token,
            binding.base_url.as_deref(),
        )
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("settings", &self.settings)
            .field("providers", &self.provider_codes())
            .field("cached", &self.cached_len())
            .finish()
    }
}
