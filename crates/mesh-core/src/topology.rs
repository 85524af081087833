use crate::config::{TargetConfig, TopologyConfig};
use crate::identity::{GridCoord, NAME_PREFIX, NAMESPACE_MARKER};
use rand::Rng;

/// Grid bounds and locality bias. Immutable after startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Topology {
    pub namespace_count: u32,
    pub deployment_count: u32,
    /// Percentage in [0, 100] of requests kept in the current namespace
    pub locality_ratio: f64,
}

impl Topology {
    pub fn new(namespace_count: u32, deployment_count: u32, locality_ratio: f64) -> Self {
        Self {
            namespace_count,
            deployment_count,
            locality_ratio,
        }
    }

    pub fn from_config(config: &TopologyConfig) -> Self {
        Self::new(config.namespaces, config.deployments, config.same_ns_ratio)
    }

    /// Pick the next target for a request originating at `current`.
    ///
    /// Draws `r` uniformly from `[0, 100)`; see [`Topology::target_for_draw`].
    pub fn next_target<R: Rng + ?Sized>(&self, current: GridCoord, rng: &mut R) -> GridCoord {
        let draw: f64 = rng.gen_range(0.0..100.0);
        self.target_for_draw(current, draw)
    }

    /// Deterministic half of the routing policy.
    ///
    /// Below the locality ratio the request stays in the namespace and walks
    /// to the next deployment; otherwise it moves to the next namespace and
    /// keeps the deployment. Both walks wrap back to 1 past the grid edge.
    pub fn target_for_draw(&self, current: GridCoord, draw: f64) -> GridCoord {
        let [same_namespace, next_namespace] = self.neighbours(current);
        if draw < self.locality_ratio {
            same_namespace
        } else {
            next_namespace
        }
    }

    /// The only two coordinates `current` ever targets: next deployment in
    /// the same namespace, then same deployment in the next namespace.
    pub fn neighbours(&self, current: GridCoord) -> [GridCoord; 2] {
        [
            GridCoord::new(
                current.namespace,
                wrap_next(current.deployment, self.deployment_count),
            ),
            GridCoord::new(
                wrap_next(current.namespace, self.namespace_count),
                current.deployment,
            ),
        ]
    }
}

fn wrap_next(index: u32, count: u32) -> u32 {
    if index < count {
        index + 1
    } else {
        1
    }
}

/// Canonical service name of the instance group at `coord`.
pub fn service_name(coord: GridCoord, cluster_domain: &str) -> String {
    format!(
        "{prefix}-{ns}-{x}-svc-{y}.{prefix}-{ns}-{x}.{cluster_domain}",
        prefix = NAME_PREFIX,
        ns = NAMESPACE_MARKER,
        x = coord.namespace,
        y = coord.deployment,
    )
}

/// Base URL (scheme, host, port) for requests to `coord`.
pub fn target_base_url(coord: GridCoord, target: &TargetConfig) -> String {
    let host = match &target.host_override {
        Some(host) => host.clone(),
        None => service_name(coord, &target.cluster_domain),
    };
    format!("http://{}:{}", host, target.service_port)
}
