//! The fixed component graph of the managed application.
//!
//! One proxy-administration front plus three store/logic/proxy triples
//! (nodes, users, resources). The topology is deliberately static: this
//! orchestrator manages one logical application, not fleets.

/// Name of the proxy-administration front.
pub const FRONT: &str = "proxy-admin";

/// One store/logic/proxy triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentTriple {
    /// Storage unit name.
    pub store: &'static str,
    /// Logic implementation name.
    pub logic: &'static str,
    /// Proxy name (the stable external identity of the triple).
    pub proxy: &'static str,
}

/// The managed triples, in deployment order.
pub const TRIPLES: [ComponentTriple; 3] = [
    ComponentTriple {
        store: "node-store",
        logic: "node-logic",
        proxy: "node-proxy",
    },
    ComponentTriple {
        store: "user-store",
        logic: "user-logic",
        proxy: "user-proxy",
    },
    ComponentTriple {
        store: "resource-store",
        logic: "resource-logic",
        proxy: "resource-proxy",
    },
];

/// Deterministic creation payload for a named component.
///
/// Payloads stand in for the component's immutable code-plus-constructor
/// artifact; what matters to the pipeline is that identical names yield
/// identical bytes on every run.
#[must_use]
pub fn artifact_payload(name: &str) -> Vec<u8> {
    format!("stagecraft-artifact/{name}/v1").into_bytes()
}

/// Looks up the triple a proxy name belongs to.
#[must_use]
pub fn triple_for_proxy(proxy: &str) -> Option<&'static ComponentTriple> {
    TRIPLES.iter().find(|t| t.proxy == proxy)
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = TRIPLES
            .iter()
            .flat_map(|t| [t.store, t.logic, t.proxy])
            .chain([FRONT])
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_artifact_payload_deterministic() {
        assert_eq!(artifact_payload("node-store"), artifact_payload("node-store"));
        assert_ne!(artifact_payload("node-store"), artifact_payload("user-store"));
    }

    #[test]
    fn test_triple_lookup() {
        assert_eq!(triple_for_proxy("user-proxy").unwrap().logic, "user-logic");
        assert!(triple_for_proxy("missing-proxy").is_none());
    }
}
