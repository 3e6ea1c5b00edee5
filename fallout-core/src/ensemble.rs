//! Ensemble Handle
//!
//! The resolved set of provisioned machine groups a workload runs against.
//! Provisioning itself happens elsewhere; the engine receives an [`Ensemble`]
//! fully initialized and treats it as read-only.

use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A capability published by a configuration manager. Modules declare the
/// providers they require; the registry checks availability at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(pub String);

impl Provider {
    /// Provider by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A target system a module is known to support. Metadata only; the engine
/// records but does not enforce product claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product(pub String);

impl Product {
    /// The wildcard claim: the module works against anything.
    pub fn everything() -> Vec<Product> {
        vec![Product("*".to_string())]
    }
}

/// One provisioned machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Ordinal within the group
    pub ordinal: u32,
    /// Hostname or address
    pub hostname: String,
}

/// A named group of provisioned machines with the providers its
/// configuration managers published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGroup {
    name: String,
    nodes: Vec<Node>,
    providers: FxHashSet<Provider>,
}

impl NodeGroup {
    /// Build a group.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        providers: impl IntoIterator<Item = Provider>,
    ) -> Self {
        Self {
            name: name.into(),
            nodes,
            providers: providers.into_iter().collect(),
        }
    }

    /// An empty group, for roles a test does not use.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), [])
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group's machines.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Providers available on this group.
    pub fn providers(&self) -> &FxHashSet<Provider> {
        &self.providers
    }

    /// Whether a provider is available on this group.
    pub fn has_provider(&self, provider: &Provider) -> bool {
        self.providers.contains(provider)
    }

    /// A tracing span scoped to this group, used as the group logger.
    pub fn logger(&self) -> tracing::Span {
        tracing::info_span!("node_group", group = %self.name)
    }
}

/// The four machine groups of a test run plus its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ensemble {
    test_run_id: String,
    server: NodeGroup,
    client: NodeGroup,
    controller: NodeGroup,
    observer: NodeGroup,
}

impl Ensemble {
    /// Assemble from already-provisioned groups.
    pub fn new(
        test_run_id: impl Into<String>,
        server: NodeGroup,
        client: NodeGroup,
        controller: NodeGroup,
        observer: NodeGroup,
    ) -> Self {
        Self {
            test_run_id: test_run_id.into(),
            server,
            client,
            controller,
            observer,
        }
    }

    /// A minimal single-host ensemble with empty groups. Useful for tests and
    /// workloads whose modules drive no remote machines.
    pub fn local(test_run_id: impl Into<String>) -> Self {
        Self::new(
            test_run_id,
            NodeGroup::empty("server"),
            NodeGroup::empty("client"),
            NodeGroup::empty("controller"),
            NodeGroup::empty("observer"),
        )
    }

    /// Identity of the test run this ensemble was provisioned for.
    pub fn test_run_id(&self) -> &str {
        &self.test_run_id
    }

    /// The server group.
    pub fn server_group(&self) -> &NodeGroup {
        &self.server
    }

    /// The client group.
    pub fn client_group(&self) -> &NodeGroup {
        &self.client
    }

    /// The controller group (where the engine itself runs).
    pub fn controller_group(&self) -> &NodeGroup {
        &self.controller
    }

    /// The observer group.
    pub fn observer_group(&self) -> &NodeGroup {
        &self.observer
    }

    /// Union of providers across all groups.
    pub fn available_providers(&self) -> FxHashSet<Provider> {
        let mut all = FxHashSet::default();
        for group in [&self.server, &self.client, &self.controller, &self.observer] {
            all.extend(group.providers().iter().cloned());
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_providers_is_the_union() {
        let ensemble = Ensemble::new(
            "run-1",
            NodeGroup::new("server", vec![], [Provider::named("cassandra")]),
            NodeGroup::new("client", vec![], [Provider::named("stress")]),
            NodeGroup::empty("controller"),
            NodeGroup::empty("observer"),
        );

        let providers = ensemble.available_providers();
        assert!(providers.contains(&Provider::named("cassandra")));
        assert!(providers.contains(&Provider::named("stress")));
        assert_eq!(providers.len(), 2);
    }

    #[test]
    fn test_local_ensemble_has_no_providers() {
        let ensemble = Ensemble::local("run-2");
        assert_eq!(ensemble.test_run_id(), "run-2");
        assert!(ensemble.available_providers().is_empty());
        assert!(ensemble.server_group().nodes().is_empty());
    }
}
