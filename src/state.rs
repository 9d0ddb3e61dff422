use std::time::Duration;

use crate::broker::Broker;
use crate::config::Config;
use crate::features::RANDOM_COLUMNS;
use crate::github::GithubClient;
use crate::model::{self, SharedPredictor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broker: Broker,
    /// GitHub access for the random-sampling endpoint
    pub github: Option<GithubClient>,
    /// Model for the `random` feature set; the endpoint is disabled without it
    pub random_model: Option<SharedPredictor>,
}

impl AppState {
    pub fn new(
        config: Config,
        broker: Broker,
        github: Option<GithubClient>,
        random_model: Option<SharedPredictor>,
    ) -> Self {
        Self {
            config,
            broker,
            github,
            random_model,
        }
    }

    /// Build the serving state from configuration. The random-sampling
    /// dependencies are optional: failures to load them are logged and the
    /// endpoint answers 503.
    pub fn from_config(config: Config) -> Self {
        let broker = Broker::new(config.broker.queue_capacity);

        let github = match GithubClient::from_config(&config.github) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("Random-repo predictions disabled: {e:#}");
                None
            }
        };

        let random_model = match model::load_shared(&config.serving.random_model_path) {
            Ok(m) if m.feature_count() == RANDOM_COLUMNS.len() => Some(m),
            Ok(m) => {
                tracing::warn!(
                    "Random-repo predictions disabled: model at {} takes {} features, expected {}",
                    config.serving.random_model_path.display(),
                    m.feature_count(),
                    RANDOM_COLUMNS.len()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Random-repo predictions disabled: {e:#}");
                None
            }
        };

        Self::new(config, broker, github, random_model)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.config.broker.result_timeout_secs)
    }

    pub fn claim_poll(&self) -> Duration {
        Duration::from_secs(self.config.broker.claim_poll_secs)
    }
}
