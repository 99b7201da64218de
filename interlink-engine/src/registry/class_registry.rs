//! Class registry: configuration-driven instantiation without dynamic
//! loading.
//!
//! In a statically-linked engine, "class by name" is a registry of
//! constructor functions keyed by string. Namespaces are enforced by the
//! registration API: built-ins live under the protected `li.*` prefixes,
//! developer extensions under `custom.*`, and a handful of namespaces are
//! blocked outright and never resolve.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use tracing::debug;

// Layer 3: Internal module imports
use crate::config::{ItemConfig, RuleConfig};
use crate::error::EngineError;
use crate::host::HostBehavior;
use crate::message::Message;

/// Protected built-in namespaces; registration from outside the built-in
/// set is rejected.
const PROTECTED_PREFIXES: &[&str] = &["li.hosts.", "li.adapters.", "li.rules."];

/// Namespace for developer extensions.
const EXTENSION_PREFIX: &str = "custom.";

/// Namespaces that never resolve, whatever is asked for.
const BLOCKED_NAMESPACES: &[&str] = &["os", "sys", "subprocess", "importlib", "pickle", "__main__"];

/// Everything a constructor may need: the item's own config plus the
/// production-level routing rules (routing processes pick theirs up here).
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub item: ItemConfig,
    pub rules: Vec<RuleConfig>,
}

impl BuildContext {
    pub fn new(item: ItemConfig) -> Self {
        Self {
            item,
            rules: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<RuleConfig>) -> Self {
        self.rules = rules;
        self
    }
}

/// Constructor function for a host behavior.
pub type HostConstructor =
    Arc<dyn Fn(&BuildContext) -> Result<Arc<dyn HostBehavior>, EngineError> + Send + Sync>;

/// A message transform applied by routing rules.
pub trait Transform: Send + Sync {
    fn apply(&self, message: &Message) -> Result<Message, EngineError>;
}

fn is_protected(name: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn is_blocked(name: &str) -> bool {
    let head = name.split('.').next().unwrap_or(name);
    BLOCKED_NAMESPACES.contains(&head)
}

/// Registry of host constructors, transforms, and name aliases.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::registry::ClassRegistry;
///
/// let registry = ClassRegistry::with_builtins();
/// assert!(registry.resolve_host("li.hosts.Hl7MllpService").is_ok());
/// // Legacy names alias onto the built-ins.
/// assert!(registry.resolve_host("EnsLib.HL7.Service.TCPService").is_ok());
/// ```
#[derive(Default)]
pub struct ClassRegistry {
    hosts: DashMap<String, HostConstructor>,
    transforms: DashMap<String, Arc<dyn Transform>>,
    aliases: DashMap<String, String>,
}

impl ClassRegistry {
    /// An empty registry; prefer [`ClassRegistry::with_builtins`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in host classes and their
    /// legacy-name aliases.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::host::runtime::install_builtins(&registry);
        registry
    }

    /// Register a developer-extension host constructor.
    ///
    /// The name must live under `custom.`; protected and foreign namespaces
    /// are rejected with `NamespaceViolation`.
    pub fn register_host(
        &self,
        name: &str,
        constructor: HostConstructor,
    ) -> Result<(), EngineError> {
        if is_protected(name) || !name.starts_with(EXTENSION_PREFIX) {
            return Err(EngineError::NamespaceViolation {
                name: name.to_string(),
            });
        }
        self.hosts.insert(name.to_string(), constructor);
        debug!(name, "host class registered");
        Ok(())
    }

    /// Built-in registration path, available only inside the crate.
    pub(crate) fn register_host_builtin(&self, name: &str, constructor: HostConstructor) {
        self.hosts.insert(name.to_string(), constructor);
    }

    /// Register a developer-extension transform.
    pub fn register_transform(
        &self,
        name: &str,
        transform: Arc<dyn Transform>,
    ) -> Result<(), EngineError> {
        if is_protected(name) || !name.starts_with(EXTENSION_PREFIX) {
            return Err(EngineError::NamespaceViolation {
                name: name.to_string(),
            });
        }
        self.transforms.insert(name.to_string(), transform);
        Ok(())
    }

    pub(crate) fn register_transform_builtin(&self, name: &str, transform: Arc<dyn Transform>) {
        self.transforms.insert(name.to_string(), transform);
    }

    /// Register an alias for an extension name.
    ///
    /// Aliasing into a protected name is a built-in privilege and is
    /// rejected here, as is shadowing a protected name with an alias.
    pub fn register_alias(&self, alias: &str, target: &str) -> Result<(), EngineError> {
        if is_protected(alias) || is_protected(target) {
            return Err(EngineError::NamespaceViolation {
                name: alias.to_string(),
            });
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    pub(crate) fn register_alias_builtin(&self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    /// Resolve a name, following one level of aliasing.
    fn resolve_name(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .map(|t| t.value().clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Resolve a host constructor by name.
    ///
    /// Fails with `NamespaceViolation` for blocked namespaces,
    /// `TypeMismatch` when the name resolves to a transform, and
    /// `ConfigurationError` when nothing is registered.
    pub fn resolve_host(&self, name: &str) -> Result<HostConstructor, EngineError> {
        let resolved = self.resolve_name(name);
        if let Some(constructor) = self.hosts.get(&resolved) {
            return Ok(Arc::clone(constructor.value()));
        }
        if is_blocked(&resolved) {
            return Err(EngineError::NamespaceViolation {
                name: resolved.clone(),
            });
        }
        if self.transforms.contains_key(&resolved) {
            return Err(EngineError::TypeMismatch {
                name: resolved,
                expected: "host behavior",
            });
        }
        Err(EngineError::configuration(format!(
            "unknown host class: '{name}'"
        )))
    }

    /// Resolve a transform by name.
    pub fn resolve_transform(&self, name: &str) -> Result<Arc<dyn Transform>, EngineError> {
        let resolved = self.resolve_name(name);
        if let Some(transform) = self.transforms.get(&resolved) {
            return Ok(Arc::clone(transform.value()));
        }
        if is_blocked(&resolved) {
            return Err(EngineError::NamespaceViolation {
                name: resolved.clone(),
            });
        }
        if self.hosts.contains_key(&resolved) {
            return Err(EngineError::TypeMismatch {
                name: resolved,
                expected: "transform",
            });
        }
        Err(EngineError::configuration(format!(
            "unknown transform: '{name}'"
        )))
    }

    /// All registered host class names.
    pub fn list_hosts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hosts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::host::PassthroughProcess;

    fn custom_constructor() -> HostConstructor {
        Arc::new(|_build| Ok(Arc::new(PassthroughProcess::new()) as Arc<dyn HostBehavior>))
    }

    // `Result::unwrap_err` requires the `Ok` type to implement `Debug`, which
    // the trait-object constructor/transform types here don't. This extracts
    // the error without that bound.
    fn expect_err<T>(result: Result<T, EngineError>) -> EngineError {
        match result {
            Ok(_) => panic!("expected an error, got Ok"),
            Err(err) => err,
        }
    }

    struct IdentityTransform;

    impl Transform for IdentityTransform {
        fn apply(&self, message: &Message) -> Result<Message, EngineError> {
            Ok(message.clone())
        }
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = ClassRegistry::with_builtins();
        for name in [
            "li.hosts.Hl7MllpService",
            "li.hosts.Hl7MllpOperation",
            "li.hosts.RoutingProcess",
            "li.hosts.PassthroughProcess",
            "li.hosts.FileService",
            "li.hosts.FileOperation",
            "li.hosts.HttpService",
            "li.hosts.HttpOperation",
        ] {
            assert!(registry.resolve_host(name).is_ok(), "missing builtin {name}");
        }
    }

    #[test]
    fn test_legacy_aliases_resolve() {
        let registry = ClassRegistry::with_builtins();
        for alias in [
            "EnsLib.HL7.Service.TCPService",
            "EnsLib.HL7.Operation.TCPOperation",
            "EnsLib.HL7.MsgRouter.RoutingEngine",
            "EnsLib.File.InboundAdapter",
            "EnsLib.File.OutboundAdapter",
        ] {
            assert!(registry.resolve_host(alias).is_ok(), "missing alias {alias}");
        }
    }

    #[test]
    fn test_custom_registration() {
        let registry = ClassRegistry::with_builtins();
        registry
            .register_host("custom.acme.AuditProcess", custom_constructor())
            .unwrap();
        assert!(registry.resolve_host("custom.acme.AuditProcess").is_ok());
    }

    #[test]
    fn test_protected_namespace_rejected() {
        let registry = ClassRegistry::with_builtins();
        let err = registry
            .register_host("li.hosts.Rogue", custom_constructor())
            .unwrap_err();
        assert!(matches!(err, EngineError::NamespaceViolation { .. }));

        // Neither protected nor custom: also rejected.
        let err = registry
            .register_host("acme.Loose", custom_constructor())
            .unwrap_err();
        assert!(matches!(err, EngineError::NamespaceViolation { .. }));
    }

    #[test]
    fn test_alias_into_protected_rejected() {
        let registry = ClassRegistry::with_builtins();
        let err = registry
            .register_alias("Vendor.Thing", "li.hosts.Hl7MllpService")
            .unwrap_err();
        assert!(matches!(err, EngineError::NamespaceViolation { .. }));

        let err = registry
            .register_alias("li.hosts.Shadow", "custom.acme.Thing")
            .unwrap_err();
        assert!(matches!(err, EngineError::NamespaceViolation { .. }));
    }

    #[test]
    fn test_custom_alias_allowed() {
        let registry = ClassRegistry::with_builtins();
        registry
            .register_host("custom.acme.AuditProcess", custom_constructor())
            .unwrap();
        registry
            .register_alias("Acme.Audit", "custom.acme.AuditProcess")
            .unwrap();
        assert!(registry.resolve_host("Acme.Audit").is_ok());
    }

    #[test]
    fn test_blocked_namespaces_never_resolve() {
        let registry = ClassRegistry::with_builtins();
        for name in ["os.system", "subprocess.Popen", "pickle.loads", "__main__.X"] {
            let err = expect_err(registry.resolve_host(name));
            assert!(
                matches!(err, EngineError::NamespaceViolation { .. }),
                "expected violation for {name}"
            );
        }
    }

    #[test]
    fn test_unknown_class_is_configuration_error() {
        let registry = ClassRegistry::with_builtins();
        let err = expect_err(registry.resolve_host("li.hosts.NoSuchThing"));
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_type_mismatch_between_kinds() {
        let registry = ClassRegistry::with_builtins();
        registry
            .register_transform("custom.acme.Identity", Arc::new(IdentityTransform))
            .unwrap();

        let err = expect_err(registry.resolve_host("custom.acme.Identity"));
        assert!(matches!(err, EngineError::TypeMismatch { .. }));

        let err = expect_err(registry.resolve_transform("li.hosts.Hl7MllpService"));
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn test_transform_apply() {
        let registry = ClassRegistry::with_builtins();
        registry
            .register_transform("custom.acme.Identity", Arc::new(IdentityTransform))
            .unwrap();
        let transform = registry.resolve_transform("custom.acme.Identity").unwrap();
        let message = Message::create(b"x".to_vec(), "text/plain", "A");
        assert_eq!(transform.apply(&message).unwrap(), message);
    }
}
