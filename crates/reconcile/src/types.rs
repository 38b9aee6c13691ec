//! Core types for declared resources, planned operations and run results

use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Structural view of a resource used for diffing
pub type Properties = BTreeMap<String, Value>;

/// Output values a provider reports for a resource (always carries `id`)
pub type Outputs = BTreeMap<String, Value>;

/// Pseudo-property holding the sorted dependency list
pub const DEPENDS_ON: &str = "depends_on";

/// Kind tag of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Network,
    Image,
    Container,
}

impl ResourceKind {
    /// Properties that cannot change without replacing the resource
    pub fn immutable_properties(&self) -> &'static [&'static str] {
        match self {
            Self::Network => &["runtime_name", "driver", "internal", "labels"],
            Self::Image => &["reference"],
            Self::Container => &["runtime_name"],
        }
    }

    pub fn is_immutable(&self, property: &str) -> bool {
        self.immutable_properties().contains(&property)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Image => write!(f, "image"),
            Self::Container => write!(f, "container"),
        }
    }
}

// ============================================================================
// Typed arguments
// ============================================================================

fn default_driver() -> String {
    "bridge".to_string()
}

/// Arguments of a network resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkArgs {
    /// Name given to the network in the runtime (defaults to the resource name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Arguments of an image resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageArgs {
    /// Registry reference, e.g. `redis:7-alpine`
    pub reference: String,
    /// Leave the image in the local cache when the resource is deleted
    #[serde(default)]
    pub keep_locally: bool,
}

/// Attachment of a container to a network resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkAttachment {
    /// Name of the network resource
    pub network: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Published port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Always => write!(f, "always"),
            Self::OnFailure => write!(f, "on-failure"),
            Self::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

/// File content copied into a container before it starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Upload {
    /// Absolute path inside the container
    pub file: String,
    pub content: String,
}

/// Arguments of a container resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    /// Name of the image resource to run
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<NetworkAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<Upload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

/// Typed arguments, one shape per resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceSpec {
    Network(NetworkArgs),
    Image(ImageArgs),
    Container(ContainerArgs),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::Image(_) => ResourceKind::Image,
            Self::Container(_) => ResourceKind::Container,
        }
    }

    /// References carried by the arguments, with the kind each must point to
    pub fn references(&self) -> Vec<(&str, ResourceKind)> {
        match self {
            Self::Network(_) | Self::Image(_) => Vec::new(),
            Self::Container(args) => {
                let mut refs = vec![(args.image.as_str(), ResourceKind::Image)];
                refs.extend(
                    args.networks
                        .iter()
                        .map(|n| (n.network.as_str(), ResourceKind::Network)),
                );
                refs
            }
        }
    }

    fn validate(&self, resource: &str) -> Result<()> {
        let invalid = |property: &str, message: &str| Error::InvalidProperty {
            resource: resource.to_string(),
            property: property.to_string(),
            message: message.to_string(),
        };

        match self {
            Self::Network(args) => {
                if matches!(&args.runtime_name, Some(n) if n.trim().is_empty()) {
                    return Err(invalid("runtime_name", "must not be empty"));
                }
                if args.driver.trim().is_empty() {
                    return Err(invalid("driver", "must not be empty"));
                }
            }
            Self::Image(args) => {
                if args.reference.trim().is_empty() {
                    return Err(invalid("reference", "must not be empty"));
                }
                if args.reference.chars().any(char::is_whitespace) {
                    return Err(invalid("reference", "must not contain whitespace"));
                }
            }
            Self::Container(args) => {
                if matches!(&args.runtime_name, Some(n) if n.trim().is_empty()) {
                    return Err(invalid("runtime_name", "must not be empty"));
                }
                if args.image.trim().is_empty() {
                    return Err(invalid("image", "must name an image resource"));
                }
                for port in &args.ports {
                    if port.internal == 0 || port.external == 0 {
                        return Err(invalid("ports", "port numbers must be between 1 and 65535"));
                    }
                }
                let mut published = BTreeSet::new();
                for port in &args.ports {
                    if !published.insert((port.external, port.protocol)) {
                        return Err(invalid(
                            "ports",
                            &format!("external port {}/{} published twice", port.external, port.protocol),
                        ));
                    }
                }
                if let Some(key) = args
                    .env
                    .keys()
                    .find(|k| k.is_empty() || k.contains('='))
                {
                    return Err(invalid("env", &format!("invalid variable name '{key}'")));
                }
                if let Some(upload) = args.uploads.iter().find(|u| !u.file.starts_with('/')) {
                    return Err(invalid(
                        "uploads",
                        &format!("'{}' is not an absolute path", upload.file),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Resource
// ============================================================================

/// A named declaration with typed arguments and dependency edges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
    /// Explicit dependencies in addition to the ones implied by the arguments
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn network(name: impl Into<String>) -> Self {
        Self::new(
            name,
            ResourceSpec::Network(NetworkArgs {
                runtime_name: None,
                driver: default_driver(),
                internal: false,
                labels: BTreeMap::new(),
            }),
        )
    }

    pub fn image(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(
            name,
            ResourceSpec::Image(ImageArgs {
                reference: reference.into(),
                keep_locally: false,
            }),
        )
    }

    pub fn container(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self::new(
            name,
            ResourceSpec::Container(ContainerArgs {
                runtime_name: None,
                image: image.into(),
                networks: Vec::new(),
                ports: Vec::new(),
                env: BTreeMap::new(),
                restart: RestartPolicy::default(),
                uploads: Vec::new(),
                command: Vec::new(),
            }),
        )
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    /// Attach a container to a network resource (no-op for other kinds)
    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        if let ResourceSpec::Container(args) = &mut self.spec {
            args.networks.push(NetworkAttachment {
                network: network.into(),
                aliases: Vec::new(),
            });
        }
        self
    }

    /// Publish a port (no-op for non-containers)
    pub fn with_port(mut self, internal: u16, external: u16) -> Self {
        if let ResourceSpec::Container(args) = &mut self.spec {
            args.ports.push(PortMapping {
                internal,
                external,
                protocol: Protocol::Tcp,
            });
        }
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Name used for the object in the container runtime
    pub fn runtime_name(&self) -> &str {
        match &self.spec {
            ResourceSpec::Network(args) => args.runtime_name.as_deref().unwrap_or(&self.name),
            ResourceSpec::Image(args) => &args.reference,
            ResourceSpec::Container(args) => args.runtime_name.as_deref().unwrap_or(&self.name),
        }
    }

    /// All dependency names: explicit plus implied by arguments
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.depends_on.clone();
        deps.extend(self.spec.references().into_iter().map(|(n, _)| n.to_string()));
        deps
    }

    /// Validate arguments without looking at other resources
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidProperty {
                resource: self.name.clone(),
                property: "name".to_string(),
                message: "resource name must not be empty".to_string(),
            });
        }
        self.spec.validate(&self.name)
    }

    /// Structural property map, including the sorted dependency list
    pub fn properties(&self) -> Properties {
        let mut props = match serde_json::to_value(&self.spec) {
            Ok(Value::Object(map)) => map.into_iter().collect::<Properties>(),
            _ => Properties::new(),
        };
        props.remove("type");
        let deps = self.dependencies();
        if !deps.is_empty() {
            props.insert(
                DEPENDS_ON.to_string(),
                Value::Array(deps.into_iter().map(Value::String).collect()),
            );
        }
        props
    }
}

/// Last-applied resource plus what the provider reported for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource: Resource,
    /// Provider-assigned identifier
    pub id: String,
    #[serde(default)]
    pub outputs: Outputs,
}

impl ResourceState {
    pub fn name(&self) -> &str {
        &self.resource.name
    }

    /// Look up an output value; `id` is always available
    pub fn output(&self, key: &str) -> Option<Value> {
        match key {
            "id" => Some(Value::String(self.id.clone())),
            _ => self.outputs.get(key).cloned(),
        }
    }
}

/// A declared stack output
///
/// A bare string is a `resource.key` reference resolved after every run;
/// a `{ value = ... }` table is recorded as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, deny_unknown_fields)]
pub enum OutputDecl {
    Reference(String),
    Literal { value: Value },
}

impl OutputDecl {
    pub fn reference(reference: impl Into<String>) -> Self {
        Self::Reference(reference.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Fail with `UnknownOutput` when a reference names no declared resource
    pub fn check(&self, declared: impl Fn(&str) -> bool) -> Result<()> {
        let Self::Reference(reference) = self else {
            return Ok(());
        };
        let known = reference
            .split_once('.')
            .is_some_and(|(resource, key)| !key.is_empty() && declared(resource));
        if known {
            Ok(())
        } else {
            Err(Error::UnknownOutput {
                reference: reference.clone(),
            })
        }
    }
}

impl From<&str> for OutputDecl {
    fn from(reference: &str) -> Self {
        Self::reference(reference)
    }
}

impl fmt::Display for OutputDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference(reference) => f.write_str(reference),
            Self::Literal { value } => write!(f, "{value}"),
        }
    }
}

// ============================================================================
// Operations and results
// ============================================================================

/// What the engine does to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    /// Delete followed by create
    Replace,
    Delete,
    #[serde(rename = "noop")]
    NoOp,
}

impl OperationKind {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Replace => write!(f, "replace"),
            Self::Delete => write!(f, "delete"),
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// Settled status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one operation in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub resource: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Provider calls made, retries included
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures, nothing skipped)
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of operations processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed + self.no_change
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &OperationOutcome) {
        match (outcome.status, outcome.kind) {
            (OperationStatus::Failed, _) => self.failed += 1,
            (OperationStatus::Skipped, _) => self.skipped += 1,
            (OperationStatus::Succeeded, OperationKind::Create) => self.created += 1,
            (OperationStatus::Succeeded, OperationKind::Update) => self.updated += 1,
            (OperationStatus::Succeeded, OperationKind::Replace) => self.replaced += 1,
            (OperationStatus::Succeeded, OperationKind::Delete) => self.deleted += 1,
            (OperationStatus::Succeeded, OperationKind::NoOp) => self.no_change += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Upper bound on concurrently running provider calls
    pub jobs: usize,
    pub retry: RetryConfig,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_dependencies_include_references() {
        let c = Resource::container("web", "nginx-image")
            .on_network("net")
            .depends_on("cache");
        let deps: Vec<_> = c.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["cache", "net", "nginx-image"]);
    }

    #[test]
    fn test_properties_exclude_type_tag() {
        let props = Resource::image("img", "redis:7-alpine").properties();
        assert!(!props.contains_key("type"));
        assert_eq!(props["reference"], Value::String("redis:7-alpine".into()));
        assert_eq!(props["keep_locally"], Value::Bool(false));
    }

    #[test]
    fn test_runtime_name_defaults_to_resource_name() {
        let net = Resource::network("webapp-network");
        assert_eq!(net.runtime_name(), "webapp-network");

        let img = Resource::image("redis-image", "redis:7-alpine");
        assert_eq!(img.runtime_name(), "redis:7-alpine");
    }

    #[test]
    fn test_resource_deserializes_flat_table() {
        let json = r#"{
            "name": "redis",
            "type": "container",
            "image": "redis-image",
            "ports": [{ "internal": 6379, "external": 9081 }],
            "restart": "unless-stopped"
        }"#;
        let resource: Resource = serde_json::from_str(json).unwrap();
        assert_eq!(resource.kind(), ResourceKind::Container);
        match &resource.spec {
            ResourceSpec::Container(args) => {
                assert_eq!(args.restart, RestartPolicy::UnlessStopped);
                assert_eq!(args.ports[0].protocol, Protocol::Tcp);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_resource_rejects_unknown_argument() {
        let json = r#"{ "name": "img", "type": "image", "reference": "redis:7", "tag": "7" }"#;
        assert!(serde_json::from_str::<Resource>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let c = Resource::container("web", "img").with_port(80, 0);
        assert!(matches!(
            c.validate(),
            Err(Error::InvalidProperty { property, .. }) if property == "ports"
        ));
    }

    #[test]
    fn test_validate_rejects_relative_upload() {
        let mut c = Resource::container("web", "img");
        if let ResourceSpec::Container(args) = &mut c.spec {
            args.uploads.push(Upload {
                file: "etc/nginx.conf".into(),
                content: String::new(),
            });
        }
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = ExecuteSummary::default();
        for (kind, status) in [
            (OperationKind::Create, OperationStatus::Succeeded),
            (OperationKind::NoOp, OperationStatus::Succeeded),
            (OperationKind::Update, OperationStatus::Failed),
            (OperationKind::Create, OperationStatus::Skipped),
        ] {
            summary.add_outcome(&OperationOutcome {
                resource: "r".into(),
                kind,
                status,
                attempts: 1,
                error: None,
            });
        }
        assert_eq!(summary.created, 1);
        assert_eq!(summary.no_change, 1);
        assert_eq!(summary.total(), 4);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_output_declarations() {
        let decls: BTreeMap<String, OutputDecl> = serde_json::from_value(serde_json::json!({
            "redisId": "redis.id",
            "redisPort": { "value": 9081 },
            "stackInfo": { "value": { "name": "dev" } },
        }))
        .unwrap();
        assert_eq!(decls["redisId"], OutputDecl::reference("redis.id"));
        assert_eq!(decls["redisPort"], OutputDecl::literal(9081));
        assert_eq!(decls["stackInfo"].to_string(), r#"{"name":"dev"}"#);

        let declared = |name: &str| name == "redis";
        assert!(decls["redisId"].check(declared).is_ok());
        assert!(decls["redisPort"].check(declared).is_ok());
        assert!(OutputDecl::from("nginx.id").check(declared).is_err());
        assert!(OutputDecl::from("redis.").check(declared).is_err());
        assert!(OutputDecl::from("redis").check(declared).is_err());
    }
}
