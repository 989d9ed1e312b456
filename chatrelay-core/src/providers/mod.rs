pub mod openai;

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::RelayResult;
use crate::http_client::HttpClient;
use crate::provider::{ChatProvider, NullProvider};

/// Build the provider the relay streams from: OpenAI when the configured
/// environment variable holds an API key, otherwise the canned null provider
/// so the pipeline still works offline.
pub fn build_provider(cfg: &Config) -> RelayResult<Arc<dyn ChatProvider>> {
    match std::env::var(&cfg.upstream.api_key_env) {
        Ok(key) if !key.is_empty() => {
            let http = HttpClient::new(&cfg.http)?;
            info!(model = %cfg.upstream.model, base = %cfg.upstream.base, "using openai provider");
            Ok(Arc::new(openai::OpenAI::new(
                http,
                SecretString::new(key.into()),
                cfg.upstream.base.clone(),
                cfg.upstream.model.clone(),
            )))
        }
        _ => {
            warn!(env = %cfg.upstream.api_key_env, "no API key in environment; using null provider");
            Ok(Arc::new(NullProvider))
        }
    }
}
