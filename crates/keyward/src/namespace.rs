//! Key namespacing.
//!
//! Every logical key passes through [`resolve`] before it reaches the
//! store. The physical key is `"{namespace}:{logical_key}"`, where the
//! namespace is the per-call override if one is given, otherwise the
//! configured namespace. Without either the key passes through unchanged.

/// Maps a logical key to its physical key.
///
/// Empty namespaces count as absent.
///
/// ```
/// use keyward::namespace::resolve;
///
/// assert_eq!(resolve("user:1", Some("app"), None), "app:user:1");
/// assert_eq!(resolve("user:1", Some("app"), Some("tenant")), "tenant:user:1");
/// assert_eq!(resolve("user:1", None, None), "user:1");
/// ```
#[must_use]
pub fn resolve(logical_key: &str, configured: Option<&str>, override_ns: Option<&str>) -> String {
    let namespace =
        override_ns.filter(|ns| !ns.is_empty()).or(configured.filter(|ns| !ns.is_empty()));
    match namespace {
        Some(ns) => format!("{ns}:{logical_key}"),
        None => logical_key.to_owned(),
    }
}

/// The namespace context keys are resolved in.
///
/// Holds the configured namespace and an optional override set with
/// [`scoped`](Self::scoped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyspace {
    namespace: Option<String>,
    override_ns: Option<String>,
}

impl Keyspace {
    /// Creates a keyspace rooted at `namespace`.
    #[must_use]
    pub fn new(namespace: Option<String>) -> Self {
        Self { namespace, override_ns: None }
    }

    /// Keyspace without namespace; keys pass through unchanged.
    #[must_use]
    pub fn unprefixed() -> Self {
        Self::default()
    }

    /// Returns a copy resolving keys under `namespace` instead of the
    /// configured one.
    #[must_use]
    pub fn scoped(&self, namespace: impl Into<String>) -> Self {
        Self { namespace: self.namespace.clone(), override_ns: Some(namespace.into()) }
    }

    /// The namespace keys are currently resolved under.
    #[must_use]
    pub fn effective_namespace(&self) -> Option<&str> {
        self.override_ns
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(self.namespace.as_deref().filter(|ns| !ns.is_empty()))
    }

    /// Resolves a logical key.
    #[must_use]
    pub fn resolve(&self, logical_key: &str) -> String {
        resolve(logical_key, self.namespace.as_deref(), self.override_ns.as_deref())
    }

    /// Resolves a batch of logical keys, preserving order.
    #[must_use]
    pub fn resolve_all<K: AsRef<str>>(&self, logical_keys: &[K]) -> Vec<String> {
        logical_keys.iter().map(|key| self.resolve(key.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::passthrough(None, None, "k")]
    #[case::configured(Some("app"), None, "app:k")]
    #[case::override_wins(Some("app"), Some("tenant"), "tenant:k")]
    #[case::override_without_configured(None, Some("tenant"), "tenant:k")]
    #[case::empty_override_ignored(Some("app"), Some(""), "app:k")]
    #[case::empty_configured_ignored(Some(""), None, "k")]
    fn resolution_precedence(
        #[case] configured: Option<&str>,
        #[case] override_ns: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(resolve("k", configured, override_ns), expected);
    }

    #[test]
    fn scoped_keyspace_keeps_base() {
        let base = Keyspace::new(Some("app".into()));
        let scoped = base.scoped("tenant");

        assert_eq!(base.resolve("k"), "app:k");
        assert_eq!(scoped.resolve("k"), "tenant:k");
        assert_eq!(scoped.effective_namespace(), Some("tenant"));
        assert_eq!(Keyspace::unprefixed().effective_namespace(), None);
    }

    #[test]
    fn resolve_all_preserves_order() {
        let keyspace = Keyspace::new(Some("ns".into()));
        assert_eq!(keyspace.resolve_all(&["b", "a"]), ["ns:b", "ns:a"]);
    }
}
