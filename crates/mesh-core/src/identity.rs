//! Instance identity derived from the assigned pod name.
//!
//! Names follow `gc-ns-<X>-rs-<Y>-<suffix...>`, where `X` is the namespace
//! index and `Y` the deployment index on the simulation grid.

use std::fmt;
use thiserror::Error;

pub const NAME_PREFIX: &str = "gc";
pub const NAMESPACE_MARKER: &str = "ns";
pub const ROLE_MARKER: &str = "rs";

const MIN_TOKENS: usize = 6;

/// Position of an instance on the simulation grid. Both indices start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCoord {
    pub namespace: u32,
    pub deployment: u32,
}

impl GridCoord {
    pub fn new(namespace: u32, deployment: u32) -> Self {
        Self {
            namespace,
            deployment,
        }
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.namespace, self.deployment)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("instance name '{name}' has {found} tokens, expected at least 6")]
    TooFewTokens { name: String, found: usize },

    #[error("instance name '{name}': expected '{expected}' at token {position}, found '{found}'")]
    WrongMarker {
        name: String,
        position: usize,
        expected: &'static str,
        found: String,
    },

    #[error("instance name '{name}': {field} index '{value}' is not a number")]
    NotNumeric {
        name: String,
        field: &'static str,
        value: String,
    },

    #[error("instance name '{name}': {field} index must be at least 1")]
    ZeroIndex { name: String, field: &'static str },
}

/// Immutable identity of this instance, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    coord: GridCoord,
    display_name: String,
}

impl NodeIdentity {
    pub fn resolve(name: &str) -> Result<Self, IdentityError> {
        let parts: Vec<&str> = name.split('-').collect();
        if parts.len() < MIN_TOKENS {
            return Err(IdentityError::TooFewTokens {
                name: name.to_string(),
                found: parts.len(),
            });
        }

        for (position, expected) in [(0, NAME_PREFIX), (1, NAMESPACE_MARKER), (3, ROLE_MARKER)] {
            if parts[position] != expected {
                return Err(IdentityError::WrongMarker {
                    name: name.to_string(),
                    position,
                    expected,
                    found: parts[position].to_string(),
                });
            }
        }

        let namespace = parse_index(name, "namespace", parts[2])?;
        let deployment = parse_index(name, "deployment", parts[4])?;

        Ok(Self {
            coord: GridCoord::new(namespace, deployment),
            display_name: name.to_string(),
        })
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn namespace_index(&self) -> u32 {
        self.coord.namespace
    }

    pub fn deployment_index(&self) -> u32 {
        self.coord.deployment
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

fn parse_index(name: &str, field: &'static str, value: &str) -> Result<u32, IdentityError> {
    let index: u32 = value.parse().map_err(|_| IdentityError::NotNumeric {
        name: name.to_string(),
        field,
        value: value.to_string(),
    })?;
    if index == 0 {
        return Err(IdentityError::ZeroIndex {
            name: name.to_string(),
            field,
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_valid_names() {
        let id = NodeIdentity::resolve("gc-ns-1-rs-2-dkjdn").unwrap();
        assert_eq!(id.coord(), GridCoord::new(1, 2));
        assert_eq!(id.display_name(), "gc-ns-1-rs-2-dkjdn");

        // Deployment pods carry a replicaset hash and a pod hash
        let id = NodeIdentity::resolve("gc-ns-12-rs-40-7c9f8d6b5-x2kqz").unwrap();
        assert_eq!(id.namespace_index(), 12);
        assert_eq!(id.deployment_index(), 40);
    }

    #[test]
    fn test_resolve_round_trips_every_grid_position() {
        for x in 1..=7 {
            for y in 1..=9 {
                let name = format!("gc-ns-{x}-rs-{y}-abc12");
                let id = NodeIdentity::resolve(&name).unwrap();
                assert_eq!(id.coord(), GridCoord::new(x, y), "name: {name}");
            }
        }
    }

    #[test]
    fn test_resolve_rejects_too_few_tokens() {
        let err = NodeIdentity::resolve("gc-ns-1-rs-2").unwrap_err();
        assert_eq!(
            err,
            IdentityError::TooFewTokens {
                name: "gc-ns-1-rs-2".to_string(),
                found: 5
            }
        );
        assert!(NodeIdentity::resolve("").is_err());
    }

    #[test]
    fn test_resolve_rejects_wrong_markers() {
        assert!(matches!(
            NodeIdentity::resolve("xx-ns-1-rs-2-abc"),
            Err(IdentityError::WrongMarker { position: 0, .. })
        ));
        assert!(matches!(
            NodeIdentity::resolve("gc-namespace-1-rs-2-abc"),
            Err(IdentityError::WrongMarker { position: 1, .. })
        ));
        assert!(matches!(
            NodeIdentity::resolve("gc-ns-1-svc-2-abc"),
            Err(IdentityError::WrongMarker { position: 3, .. })
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_indices() {
        assert!(matches!(
            NodeIdentity::resolve("gc-ns-one-rs-2-abc"),
            Err(IdentityError::NotNumeric {
                field: "namespace",
                ..
            })
        ));
        assert!(matches!(
            NodeIdentity::resolve("gc-ns-1-rs--3-abc"),
            Err(IdentityError::NotNumeric {
                field: "deployment",
                ..
            })
        ));
        assert!(matches!(
            NodeIdentity::resolve("gc-ns-0-rs-2-abc"),
            Err(IdentityError::ZeroIndex {
                field: "namespace",
                ..
            })
        ));
    }
}
