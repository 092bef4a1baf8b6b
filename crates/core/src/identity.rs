use std::fmt;

use serde::{Deserialize, Serialize};

/// Group/version/kind of a served resource, plus the plural used in URL paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType {
    group: String,
    version: String,
    kind: String,
    plural: String,
}

impl ResourceType {
    /// Build a type with the plural guessed from `kind`.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let plural = pluralize(&kind);
        Self { group: group.into(), version: version.into(), kind, plural }
    }

    /// Override the guessed plural (irregular kinds, CRDs with custom names).
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Type of a compiled-in k8s-openapi resource.
    pub fn of<K: k8s_openapi::Resource>() -> Self {
        Self {
            group: K::GROUP.to_string(),
            version: K::VERSION.to_string(),
            kind: K::KIND.to_string(),
            plural: K::URL_PATH_SEGMENT.to_string(),
        }
    }

    /// Parse `v1/Kind` or `group/v1/Kind`.
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Some(Self::new(*group, *version, *kind)),
            _ => None,
        }
    }

    pub fn group(&self) -> &str { &self.group }
    pub fn version(&self) -> &str { &self.version }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn plural(&self) -> &str { &self.plural }

    /// `apiVersion` as it appears on the wire (`v1` for the core group).
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Address a named object of this type.
    pub fn identity(&self, namespace: impl Into<String>, name: impl Into<String>) -> ResourceIdentity {
        ResourceIdentity { ty: self.clone(), namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.plural)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.plural)
        }
    }
}

/// Address of one remote object. Empty namespace means cluster-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    ty: ResourceType,
    namespace: String,
    name: String,
}

impl ResourceIdentity {
    pub fn new(ty: ResourceType, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ty.identity(namespace, name)
    }

    /// Identity of a compiled-in k8s-openapi resource.
    pub fn of<K: k8s_openapi::Resource>(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ResourceType::of::<K>().identity(namespace, name)
    }

    pub fn resource_type(&self) -> &ResourceType { &self.ty }
    pub fn group(&self) -> &str { self.ty.group() }
    pub fn version(&self) -> &str { self.ty.version() }
    pub fn kind(&self) -> &str { self.ty.kind() }
    pub fn namespace(&self) -> &str { &self.namespace }
    pub fn name(&self) -> &str { &self.name }

    pub fn is_namespaced(&self) -> bool { !self.namespace.is_empty() }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.ty, self.name)
        } else {
            write!(f, "{} {}/{}", self.ty, self.namespace, self.name)
        }
    }
}

/// Lower-cased English plural, the same guess the API server's REST mapper makes.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.is_empty() || lower == "endpoints" {
        return lower;
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with('z') || lower.ends_with("ch") || lower.ends_with("sh") {
        return format!("{}es", lower);
    }
    if let Some(stem) = lower.strip_suffix('y') {
        let before = stem.chars().last();
        if !matches!(before, Some('a' | 'e' | 'i' | 'o' | 'u')) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;

    #[test]
    fn pluralize_handles_common_kinds() {
        assert_eq!(pluralize("Deployment"), "deployments");
        assert_eq!(pluralize("Ingress"), "ingresses");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize("Gateway"), "gateways");
        assert_eq!(pluralize("Endpoints"), "endpoints");
        assert_eq!(pluralize("Box"), "boxes");
    }

    #[test]
    fn typed_identity_uses_openapi_constants() {
        let id = ResourceIdentity::of::<Deployment>("default", "demo");
        assert_eq!(id.group(), "apps");
        assert_eq!(id.version(), "v1");
        assert_eq!(id.kind(), "Deployment");
        assert_eq!(id.resource_type().plural(), "deployments");
        assert_eq!(id.to_string(), "apps/v1/deployments default/demo");

        let svc = ResourceType::of::<Service>();
        assert_eq!(svc.api_version(), "v1");
        assert_eq!(svc.to_string(), "v1/services");
    }

    #[test]
    fn parse_accepts_core_and_grouped_keys() {
        let core = ResourceType::parse("v1/ConfigMap").expect("core");
        assert_eq!(core.group(), "");
        assert_eq!(core.plural(), "configmaps");
        let apps = ResourceType::parse("apps/v1/Deployment").expect("grouped");
        assert_eq!(apps.api_version(), "apps/v1");
        assert!(ResourceType::parse("Deployment").is_none());
        assert!(ResourceType::parse("a/b/c/d").is_none());
        assert!(ResourceType::parse("v1/").is_none());
    }

    #[test]
    fn cluster_scoped_display_omits_namespace() {
        let id = ResourceType::new("", "v1", "Namespace").identity("", "prod");
        assert!(!id.is_namespaced());
        assert_eq!(id.to_string(), "v1/namespaces prod");
    }
}
