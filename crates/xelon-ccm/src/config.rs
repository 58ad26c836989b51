//! Configuration
//!
//! Bootstrap settings come from flags or their environment variables via clap.
//! Controller tunables have defaults and optional environment overrides.

use std::net::SocketAddr;
use std::time::Duration;

use clap::builder::NonEmptyStringValueParser;
use clap::Args;
use xelon_api::ClientOptions;

use crate::version;

/// Arguments of the `run` subcommand.
#[derive(Args, Clone)]
pub struct RunArgs {
    /// Xelon API token
    #[arg(long, env = "XELON_TOKEN", hide_env_values = true, value_parser = NonEmptyStringValueParser::new())]
    pub token: String,

    /// Xelon cloud id
    #[arg(long, env = "XELON_CLOUD_ID", value_parser = NonEmptyStringValueParser::new())]
    pub cloud_id: String,

    /// Xelon id of the managed Kubernetes cluster this controller runs in
    #[arg(long, env = "XELON_KUBERNETES_CLUSTER_ID", value_parser = NonEmptyStringValueParser::new())]
    pub kubernetes_cluster_id: String,

    /// Xelon API base URL
    #[arg(long, env = "XELON_BASE_URL", default_value = xelon_api::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Client id sent with every API request
    #[arg(long, env = "XELON_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Listen address of the health and metrics server
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:10258")]
    pub metrics_addr: SocketAddr,
}

impl RunArgs {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: Some(self.base_url.clone()),
            client_id: self.client_id.clone().filter(|id| !id.is_empty()),
            user_agent: Some(version::user_agent()),
            timeout: None,
        }
    }
}

/// Controller tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Node inventory TTL (env: NODE_CACHE_TTL_SECONDS)
    pub node_cache_ttl: Duration,

    /// Requeue delay for services whose load balancer cluster is provisioning
    pub provisioning_retry: Duration,

    /// Periodic resync of reconciled services (env: SERVICE_RESYNC_SECONDS)
    pub service_resync: Duration,

    /// Requeue delay after a failed reconciliation
    pub error_requeue: Duration,

    /// Periodic resync of reconciled nodes (env: NODE_RESYNC_SECONDS)
    pub node_resync: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_cache_ttl: Duration::from_secs(15),
            provisioning_retry: Duration::from_secs(30),
            service_resync: Duration::from_secs(300),
            error_requeue: Duration::from_secs(60),
            node_resync: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ttl) = env_seconds("NODE_CACHE_TTL_SECONDS") {
            config.node_cache_ttl = ttl;
        }
        if let Some(resync) = env_seconds("SERVICE_RESYNC_SECONDS") {
            config.service_resync = resync;
        }
        if let Some(resync) = env_seconds("NODE_RESYNC_SECONDS") {
            config.node_resync = resync;
        }

        config
    }
}

fn env_seconds(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.node_cache_ttl, Duration::from_secs(15));
        assert_eq!(config.provisioning_retry, Duration::from_secs(30));
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "xelon-ccm",
            "--token",
            "secret",
            "--cloud-id",
            "cloud-1",
            "--kubernetes-cluster-id",
            "k8s-1",
            "--base-url",
            "https://hq.example.test/api/service/",
            "--client-id",
            "client-1",
        ])
        .unwrap();

        assert_eq!(cli.run.metrics_addr.port(), 10258);
        let options = cli.run.client_options();
        assert_eq!(
            options.base_url.as_deref(),
            Some("https://hq.example.test/api/service/")
        );
        assert_eq!(options.client_id.as_deref(), Some("client-1"));
        assert!(options
            .user_agent
            .is_some_and(|agent| agent.starts_with("xelon-cloud-controller-manager/")));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = Cli::try_parse_from([
            "xelon-ccm",
            "--token",
            "",
            "--cloud-id",
            "cloud-1",
            "--kubernetes-cluster-id",
            "k8s-1",
        ]);
        assert!(result.is_err());
    }
}
