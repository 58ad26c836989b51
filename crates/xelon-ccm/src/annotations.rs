//! Service annotations
//!
//! Annotations are the only state this controller persists between
//! reconciliations. Raw strings are parsed here, once, into
//! [`LoadBalancerAnnotations`]; malformed values degrade to "absent".

use k8s_openapi::api::core::v1::Service;
use tracing::warn;

/// Load balancer cluster chosen for the service. Written by the controller.
pub const LOAD_BALANCER_CLUSTER_ID: &str = "kubernetes.xelon.ch/load-balancer-cluster-id";

/// Virtual IP of the load balancer cluster assigned to the service. Written by the controller.
pub const LOAD_BALANCER_VIRTUAL_IP_ID: &str =
    "kubernetes.xelon.ch/load-balancer-cluster-virtual-ip-id";

/// Comma-separated frontend ids of the forwarding rules owned by the service.
pub const LOAD_BALANCER_FORWARDING_RULE_IDS: &str =
    "kubernetes.xelon.ch/load-balancer-cluster-forwarding-rule-ids";

/// PROXY protocol version sent to backends: 0 (off), 1 (text) or 2 (binary). Set by users.
pub const LOAD_BALANCER_PROXY_PROTOCOL_VERSION: &str =
    "service.beta.kubernetes.io/xelon-load-balancer-cluster-proxy-protocol-version";

/// Parsed view of the load balancer annotations of one service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerAnnotations {
    pub cluster_id: Option<String>,
    pub virtual_ip_id: Option<String>,
    pub forwarding_rule_ids: Vec<String>,
    pub proxy_protocol: i32,
}

impl LoadBalancerAnnotations {
    pub fn from_service(service: &Service) -> Self {
        Self {
            cluster_id: non_empty(service, LOAD_BALANCER_CLUSTER_ID),
            virtual_ip_id: non_empty(service, LOAD_BALANCER_VIRTUAL_IP_ID),
            forwarding_rule_ids: non_empty(service, LOAD_BALANCER_FORWARDING_RULE_IDS)
                .map(|ids| parse_id_list(&ids))
                .unwrap_or_default(),
            proxy_protocol: non_empty(service, LOAD_BALANCER_PROXY_PROTOCOL_VERSION)
                .map(|value| parse_proxy_protocol(service, &value))
                .unwrap_or_default(),
        }
    }

    /// Whether a load balancer cluster was ever assigned to the service.
    pub fn has_load_balancer(&self) -> bool {
        self.cluster_id.is_some()
    }
}

pub fn set_cluster_id(service: &mut Service, id: &str) {
    set(service, LOAD_BALANCER_CLUSTER_ID, id);
}

pub fn set_virtual_ip_id(service: &mut Service, id: &str) {
    set(service, LOAD_BALANCER_VIRTUAL_IP_ID, id);
}

pub fn set_forwarding_rule_ids(service: &mut Service, ids: &[String]) {
    set(service, LOAD_BALANCER_FORWARDING_RULE_IDS, &ids.join(","));
}

fn set(service: &mut Service, key: &str, value: &str) {
    service
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

fn non_empty(service: &Service, key: &str) -> Option<String> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_id_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_proxy_protocol(service: &Service, value: &str) -> i32 {
    match value.parse::<i32>() {
        Ok(version) if version >= 0 => version,
        _ => {
            warn!(
                service = %service_key(service),
                value = %value,
                "Invalid proxy protocol version annotation, falling back to 0"
            );
            0
        }
    }
}

/// `namespace/name` of a service, for logging.
pub fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.metadata.namespace.as_deref().unwrap_or_default(),
        service.metadata.name.as_deref().unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service_with(annotations: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_absent_annotations() {
        let parsed = LoadBalancerAnnotations::from_service(&Service::default());
        assert_eq!(parsed, LoadBalancerAnnotations::default());
        assert!(!parsed.has_load_balancer());
    }

    #[test]
    fn test_empty_values_are_absent() {
        let parsed = LoadBalancerAnnotations::from_service(&service_with(&[
            (LOAD_BALANCER_CLUSTER_ID, ""),
            (LOAD_BALANCER_VIRTUAL_IP_ID, "  "),
            (LOAD_BALANCER_FORWARDING_RULE_IDS, ""),
        ]));
        assert_eq!(parsed.cluster_id, None);
        assert_eq!(parsed.virtual_ip_id, None);
        assert!(parsed.forwarding_rule_ids.is_empty());
    }

    #[test]
    fn test_forwarding_rule_ids_skip_blank_entries() {
        let parsed = LoadBalancerAnnotations::from_service(&service_with(&[(
            LOAD_BALANCER_FORWARDING_RULE_IDS,
            "a1, b2,,c3,",
        )]));
        assert_eq!(parsed.forwarding_rule_ids, vec!["a1", "b2", "c3"]);
    }

    #[test]
    fn test_proxy_protocol_parsing() {
        let version = |value| {
            LoadBalancerAnnotations::from_service(&service_with(&[(
                LOAD_BALANCER_PROXY_PROTOCOL_VERSION,
                value,
            )]))
            .proxy_protocol
        };
        assert_eq!(version("2"), 2);
        assert_eq!(version("0"), 0);
        assert_eq!(version("invalid"), 0);
        assert_eq!(version("-1"), 0);
    }

    #[test]
    fn test_setters_create_annotation_map() {
        let mut service = Service::default();
        set_cluster_id(&mut service, "lb-1");
        set_virtual_ip_id(&mut service, "vip-1");
        set_forwarding_rule_ids(&mut service, &["a".to_string(), "b".to_string()]);

        let parsed = LoadBalancerAnnotations::from_service(&service);
        assert_eq!(parsed.cluster_id.as_deref(), Some("lb-1"));
        assert_eq!(parsed.virtual_ip_id.as_deref(), Some("vip-1"));
        assert_eq!(parsed.forwarding_rule_ids, vec!["a", "b"]);
    }
}
