//! Binding of host call sites to governor roles
//!
//! The host describes what it wants instrumented as [`BindRequest`]s; a
//! [`BindingResolver`] checks each against whatever the host can actually
//! reach (a symbol table, a plugin registry, a list of known hooks) and
//! returns the canonical binding or a [`BindError`]. Failures are local:
//! one missing target disables only the feature it belonged to.

use crate::error::BindError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What the governor does with a bound call site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingRole {
    /// Timing, allocation and burst attribution only
    Timed,
    /// Timed, and vetoed when the named throttle family says skip
    Throttled(String),
    /// Timed, and eligible for deferral into the work queue
    Deferrable,
}

/// A call site the host would like bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub scope: String,
    pub name: String,
    pub role: BindingRole,
}

impl BindRequest {
    pub fn new(scope: impl Into<String>, name: impl Into<String>, role: BindingRole) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
            role,
        }
    }

    pub fn target(&self) -> String {
        if self.scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.scope, self.name)
        }
    }
}

/// A resolved call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub scope: String,
    pub name: String,
    pub role: BindingRole,
}

pub trait BindingResolver {
    fn resolve(&self, request: &BindRequest) -> Result<Binding, BindError>;
}

/// Resolver over a fixed list of `scope::name` targets
///
/// A request with an empty scope matches by name alone and fails as
/// ambiguous if several scopes define that name.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    targets: Vec<(String, String)>,
    incompatible: HashSet<String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, scope: &str, name: &str) -> Self {
        self.targets.push((scope.to_string(), name.to_string()));
        self
    }

    /// Known, but with a shape the governor cannot wrap
    pub fn with_incompatible(mut self, scope: &str, name: &str) -> Self {
        self.targets.push((scope.to_string(), name.to_string()));
        self.incompatible.insert(format!("{scope}::{name}"));
        self
    }
}

impl BindingResolver for StaticResolver {
    fn resolve(&self, request: &BindRequest) -> Result<Binding, BindError> {
        let matches: Vec<&(String, String)> = self
            .targets
            .iter()
            .filter(|(scope, name)| {
                *name == request.name && (request.scope.is_empty() || *scope == request.scope)
            })
            .collect();

        let (scope, name) = match matches.as_slice() {
            [] => {
                return Err(BindError::NotFound {
                    target: request.target(),
                })
            }
            [single] => *single,
            many => {
                return Err(BindError::Ambiguous {
                    target: request.target(),
                    candidates: many.len(),
                })
            }
        };

        if self.incompatible.contains(&format!("{scope}::{name}")) {
            return Err(BindError::Incompatible {
                target: request.target(),
                reason: "signature cannot be wrapped".to_string(),
            });
        }

        Ok(Binding {
            scope: scope.clone(),
            name: name.clone(),
            role: request.role.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> StaticResolver {
        StaticResolver::new()
            .with_target("Economy", "daily_tick")
            .with_target("Ui", "redraw")
            .with_target("Minimap", "redraw")
            .with_incompatible("Save", "write")
    }

    #[test]
    fn test_resolves_scoped_target() {
        let binding = resolver()
            .resolve(&BindRequest::new("Ui", "redraw", BindingRole::Throttled("ui_redraw".into())))
            .unwrap();
        assert_eq!(binding.scope, "Ui");
        assert_eq!(binding.role, BindingRole::Throttled("ui_redraw".into()));
    }

    #[test]
    fn test_unscoped_request_fills_scope() {
        let binding = resolver()
            .resolve(&BindRequest::new("", "daily_tick", BindingRole::Timed))
            .unwrap();
        assert_eq!(binding.scope, "Economy");
    }

    #[test]
    fn test_unscoped_ambiguous() {
        let err = resolver()
            .resolve(&BindRequest::new("", "redraw", BindingRole::Timed))
            .unwrap_err();
        assert_eq!(
            err,
            BindError::Ambiguous {
                target: "redraw".into(),
                candidates: 2
            }
        );
    }

    #[test]
    fn test_not_found_and_incompatible() {
        let r = resolver();
        let err = r
            .resolve(&BindRequest::new("Economy", "weekly_tick", BindingRole::Timed))
            .unwrap_err();
        assert_eq!(err.target(), "Economy::weekly_tick");

        let err = r
            .resolve(&BindRequest::new("Save", "write", BindingRole::Deferrable))
            .unwrap_err();
        assert!(matches!(err, BindError::Incompatible { .. }));
    }
}
