//! Provider-routing completion client.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::LlmError;
use crate::provider::ProviderAdapter;
use crate::stream::StreamEventStream;
use crate::types::{Request, Response};

/// Routes requests to registered provider adapters.
///
/// A request naming a provider goes to that adapter; otherwise the default
/// provider is used. The first registered adapter becomes the default.
#[derive(Clone, Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
}

impl Client {
    pub fn new(
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers,
            default_provider,
        }
    }

    pub fn with_provider(provider: Arc<dyn ProviderAdapter>) -> Self {
        let mut client = Self::default();
        client.register_provider(provider);
        client
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn set_default_provider(&mut self, provider: impl Into<String>) {
        self.default_provider = Some(provider.into());
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub async fn complete(&self, mut request: Request) -> Result<Response, LlmError> {
        let adapter = self.resolve(&mut request)?;
        request.stream = false;
        adapter.complete(request).await
    }

    pub async fn stream(&self, mut request: Request) -> Result<StreamEventStream, LlmError> {
        let adapter = self.resolve(&mut request)?;
        request.stream = true;
        adapter.stream(request).await
    }

    fn resolve(&self, request: &mut Request) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
        let provider_name = request
            .provider
            .clone()
            .or_else(|| self.default_provider.clone())
            .ok_or_else(|| LlmError::configuration("no provider configured"))?;
        let adapter = self.providers.get(&provider_name).cloned().ok_or_else(|| {
            LlmError::configuration(format!("provider '{provider_name}' is not registered"))
        })?;
        request.provider = Some(provider_name);
        Ok(adapter)
    }
}
