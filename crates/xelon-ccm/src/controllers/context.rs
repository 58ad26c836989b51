//! Shared controller context

use kube::Client;

use crate::config::ControllerConfig;
use crate::load_balancer::LoadBalancers;
use crate::node_cache::NodeCache;

/// Shared context for all controllers.
pub struct Context {
    pub client: Client,
    pub load_balancers: LoadBalancers,
    pub nodes: NodeCache,
    pub config: ControllerConfig,
}

impl Context {
    pub fn new(
        client: Client,
        load_balancers: LoadBalancers,
        nodes: NodeCache,
        config: ControllerConfig,
    ) -> Self {
        Self {
            client,
            load_balancers,
            nodes,
            config,
        }
    }
}
