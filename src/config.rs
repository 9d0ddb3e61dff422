use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root for raw pages, feature tables and model artifacts
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// GitHub API access
    pub github: GithubConfig,
    /// Search query and paging used by the collector
    pub collector: CollectorConfig,
    /// Model paths and random-sampling settings for the web service
    pub serving: ServingConfig,
    /// Task queue settings shared by the service and remote workers
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Base URL of the REST API (overridable for tests and GitHub Enterprise)
    pub api_base_url: String,
    /// File holding the personal access token
    pub token_path: PathBuf,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub query: String,
    /// Number of search pages to fetch (the search API stops at 1000 results)
    pub pages: u32,
    pub per_page: u32,
    /// Width of the commit-velocity window in days
    pub commit_window_days: i64,
    /// Concurrent commit-count requests while building features
    pub commit_fetch_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Artifact trained on the `form` feature set, used by `POST /predict`
    pub form_model_path: PathBuf,
    /// Artifact trained on the `random` feature set, used by `GET /predict_random_repos`
    pub random_model_path: PathBuf,
    pub random_sample_size: usize,
    pub random_query: String,
    /// Random page is drawn from `1..=random_max_page`
    pub random_max_page: u32,
    /// In-process worker tasks started by `serve` (0 = remote workers only)
    pub local_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Where remote workers reach the service's broker endpoints
    pub url: String,
    pub queue_capacity: usize,
    /// How long a request waits for its prediction (capped at 300)
    pub result_timeout_secs: u64,
    /// Long-poll window for `POST /broker/tasks/claim`
    pub claim_poll_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            bind_addr: "127.0.0.1:9100".to_string(),
            github: GithubConfig::default(),
            collector: CollectorConfig::default(),
            serving: ServingConfig::with_data_dir(&data_dir),
            broker: BrokerConfig::default(),
            data_dir,
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            token_path: expand_home("~/.config/star-predictor/token.txt"),
            timeout_secs: 30,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            query: "language:python stars:>50".to_string(),
            pages: 10,
            per_page: 100,
            commit_window_days: 30,
            commit_fetch_concurrency: 4,
        }
    }
}

impl ServingConfig {
    fn with_data_dir(data_dir: &std::path::Path) -> Self {
        let artifacts = data_dir.join("models").join("artifacts");
        Self {
            form_model_path: artifacts.join("form_model.json"),
            random_model_path: artifacts.join("random_model.json"),
            random_sample_size: 5,
            random_query: "stars:>1000".to_string(),
            random_max_page: 10,
            local_workers: 2,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9100".to_string(),
            queue_capacity: 64,
            result_timeout_secs: 30,
            claim_poll_secs: 20,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("STAR_PREDICTOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.serving = ServingConfig::with_data_dir(&config.data_dir);
        }
        if let Ok(addr) = std::env::var("STAR_PREDICTOR_BIND_ADDR") {
            config.bind_addr = addr;
        }

        // GitHub
        if let Ok(url) = std::env::var("GITHUB_API_URL") {
            config.github.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(path) = std::env::var("GITHUB_TOKEN_PATH") {
            config.github.token_path = expand_home(&path);
        }
        parse_env("GITHUB_TIMEOUT_SECS", &mut config.github.timeout_secs);

        // Collector
        if let Ok(query) = std::env::var("STAR_PREDICTOR_QUERY") {
            config.collector.query = query;
        }
        parse_env("STAR_PREDICTOR_PAGES", &mut config.collector.pages);
        parse_env("STAR_PREDICTOR_PER_PAGE", &mut config.collector.per_page);
        parse_env(
            "STAR_PREDICTOR_COMMIT_CONCURRENCY",
            &mut config.collector.commit_fetch_concurrency,
        );
        config.collector.per_page = config.collector.per_page.clamp(1, 100);
        config.collector.commit_fetch_concurrency = config.collector.commit_fetch_concurrency.max(1);

        // Serving
        if let Ok(path) = std::env::var("STAR_PREDICTOR_FORM_MODEL") {
            config.serving.form_model_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("STAR_PREDICTOR_RANDOM_MODEL") {
            config.serving.random_model_path = PathBuf::from(path);
        }
        parse_env(
            "STAR_PREDICTOR_RANDOM_SAMPLE",
            &mut config.serving.random_sample_size,
        );
        parse_env(
            "STAR_PREDICTOR_LOCAL_WORKERS",
            &mut config.serving.local_workers,
        );

        // Broker
        if let Ok(url) = std::env::var("STAR_PREDICTOR_BROKER_URL") {
            config.broker.url = url.trim_end_matches('/').to_string();
        }
        parse_env(
            "STAR_PREDICTOR_QUEUE_CAPACITY",
            &mut config.broker.queue_capacity,
        );
        parse_env(
            "STAR_PREDICTOR_RESULT_TIMEOUT_SECS",
            &mut config.broker.result_timeout_secs,
        );
        parse_env(
            "STAR_PREDICTOR_CLAIM_POLL_SECS",
            &mut config.broker.claim_poll_secs,
        );
        config.broker.result_timeout_secs = config.broker.result_timeout_secs.min(300); // Cap at 5 minutes
        config.broker.queue_capacity = config.broker.queue_capacity.max(1);

        config
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn features_path(&self) -> PathBuf {
        self.data_dir.join("features").join("features.parquet")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("models").join("artifacts")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.data_dir.join("models").join("metrics")
    }
}

/// Overwrite `target` when `key` is set and parses; otherwise keep the default.
fn parse_env<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.trim().parse() {
            *target = v;
        }
    }
}

/// Expand a leading `~/` using `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
