//! Stack manifest loading
//!
//! A manifest declares the resources of a stack plus optional settings and
//! outputs. TOML is the default; files ending in `.json` are read as JSON.

use anyhow::{Context, Result, bail};
use reconcile::{ExecuteOptions, Graph, GraphBuilder, OutputDecl, Resource, RetryConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Stack used when neither the CLI nor the manifest names one
pub const DEFAULT_STACK: &str = "dev";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub stack: StackSection,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Output name to a `resource.key` reference or a `{ value = ... }` literal
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackSection {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    pub jobs: Option<usize>,
    pub retry: Option<RetrySettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Manifest file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Load a manifest, returning it with the dotted paths of ignored keys
pub fn load(path: &Path) -> Result<(Manifest, Vec<String>)> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let (manifest, ignored) = parse(&content, Format::from_path(path))
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    log::debug!(
        "Loaded {} resources from {}",
        manifest.resources.len(),
        path.display()
    );
    Ok((manifest, ignored))
}

/// Parse manifest text; unknown keys outside resource tables are collected
pub fn parse(content: &str, format: Format) -> Result<(Manifest, Vec<String>)> {
    let mut ignored = Vec::new();
    let manifest: Manifest = match format {
        Format::Toml => {
            let value: toml::Value = toml::from_str(content)?;
            serde_ignored::deserialize(value, |path| ignored.push(path.to_string()))?
        }
        Format::Json => {
            let value: serde_json::Value = serde_json::from_str(content)?;
            serde_ignored::deserialize(value, |path| ignored.push(path.to_string()))?
        }
    };
    Ok((manifest, ignored))
}

impl Manifest {
    /// Build the validated resource graph
    pub fn build_graph(&self) -> reconcile::Result<Graph> {
        let mut builder = GraphBuilder::new();
        for resource in &self.resources {
            builder.push(resource.clone());
        }
        builder.build()
    }

    /// Resolve the stack name: CLI flag (or `DOCKYARD_STACK`), manifest, default
    pub fn stack_name(&self, flag: Option<&str>) -> String {
        flag.or(self.stack.name.as_deref())
            .unwrap_or(DEFAULT_STACK)
            .to_string()
    }

    /// Execution options from settings, with CLI overrides
    pub fn execute_options(&self, jobs: Option<usize>, retries: Option<u32>) -> Result<ExecuteOptions> {
        let defaults = ExecuteOptions::default();
        let jobs = jobs.or(self.settings.jobs).unwrap_or(defaults.jobs);
        if jobs == 0 {
            bail!("jobs must be at least 1");
        }

        let mut retry = self
            .settings
            .retry
            .as_ref()
            .map_or(defaults.retry, RetryConfig::from);
        if let Some(attempts) = retries {
            retry.max_attempts = attempts;
        }
        if retry.max_attempts == 0 {
            bail!("retry attempts must be at least 1");
        }
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 0.0 {
            bail!(
                "retry backoff_factor must be a finite, non-negative number (got {})",
                retry.backoff_factor
            );
        }

        Ok(ExecuteOptions { jobs, retry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{ResourceKind, ResourceSpec, RestartPolicy};

    const WEBAPP: &str = r#"
[stack]
name = "webapp"

[settings]
jobs = 2
retry = { max_attempts = 5, base_delay_ms = 100 }

[[resources]]
type = "network"
name = "webapp-network"

[[resources]]
type = "image"
name = "redis-image"
reference = "redis:7-alpine"
keep_locally = true

[[resources]]
type = "container"
name = "redis"
image = "redis-image"
networks = [{ network = "webapp-network", aliases = ["redis"] }]
ports = [{ internal = 6379, external = 9081 }]
restart = "unless-stopped"

[outputs]
redisContainerId = "redis.id"
redisPort = { value = 9081 }
"#;

    #[test]
    fn test_parse_webapp_manifest() {
        let (manifest, ignored) = parse(WEBAPP, Format::Toml).unwrap();
        assert!(ignored.is_empty());
        assert_eq!(manifest.resources.len(), 3);
        assert_eq!(
            manifest.outputs["redisContainerId"],
            OutputDecl::reference("redis.id")
        );
        assert_eq!(manifest.outputs["redisPort"], OutputDecl::literal(9081));

        let graph = manifest.build_graph().unwrap();
        assert_eq!(
            graph.topological_order(),
            ["webapp-network", "redis-image", "redis"]
        );
        let redis = graph.get("redis").unwrap();
        assert_eq!(redis.kind(), ResourceKind::Container);
        match &redis.spec {
            ResourceSpec::Container(args) => {
                assert_eq!(args.restart, RestartPolicy::UnlessStopped);
                assert_eq!(args.networks[0].aliases, ["redis"]);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_settings_and_overrides() {
        let (manifest, _) = parse(WEBAPP, Format::Toml).unwrap();
        let opts = manifest.execute_options(None, None).unwrap();
        assert_eq!(opts.jobs, 2);
        assert_eq!(opts.retry.max_attempts, 5);
        assert_eq!(opts.retry.base_delay, Duration::from_millis(100));
        assert_eq!(opts.retry.max_delay, Duration::from_millis(10_000));

        let opts = manifest.execute_options(Some(8), Some(1)).unwrap();
        assert_eq!(opts.jobs, 8);
        assert_eq!(opts.retry.max_attempts, 1);

        assert!(manifest.execute_options(Some(0), None).is_err());
    }

    #[test]
    fn test_negative_backoff_factor_is_rejected() {
        let content = "[settings]\nretry = { backoff_factor = -2.0 }\n";
        let (manifest, _) = parse(content, Format::Toml).unwrap();
        let err = manifest.execute_options(None, None).unwrap_err();
        assert!(err.to_string().contains("backoff_factor"));

        let content = "[settings]\nretry = { backoff_factor = nan }\n";
        let (manifest, _) = parse(content, Format::Toml).unwrap();
        assert!(manifest.execute_options(None, None).is_err());

        let content = "[settings]\nretry = { backoff_factor = 1.5 }\n";
        let (manifest, _) = parse(content, Format::Toml).unwrap();
        assert!(manifest.execute_options(None, None).is_ok());
    }

    #[test]
    fn test_stack_name_resolution() {
        let (manifest, _) = parse(WEBAPP, Format::Toml).unwrap();
        assert_eq!(manifest.stack_name(Some("prod")), "prod");
        assert_eq!(manifest.stack_name(None), "webapp");
        assert_eq!(Manifest::default().stack_name(None), DEFAULT_STACK);
    }

    #[test]
    fn test_unknown_top_level_key_is_reported() {
        let content = "colour = \"blue\"\n[settings]\njobz = 3\n";
        let (manifest, ignored) = parse(content, Format::Toml).unwrap();
        assert!(manifest.resources.is_empty());
        assert_eq!(ignored, ["colour", "settings.jobz"]);
    }

    #[test]
    fn test_unknown_resource_key_is_rejected() {
        let content = r#"
[[resources]]
type = "image"
name = "img"
reference = "nginx:alpine"
pull_always = true
"#;
        assert!(parse(content, Format::Toml).is_err());
    }

    #[test]
    fn test_json_manifest() {
        let content = r#"{
            "resources": [
                { "type": "network", "name": "net", "driver": "overlay", "internal": true }
            ]
        }"#;
        let (manifest, _) = parse(content, Format::Json).unwrap();
        let graph = manifest.build_graph().unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(Format::from_path(Path::new("stack.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("dockyard.toml")), Format::Toml);
    }

    #[test]
    fn test_demo_manifest_builds() {
        let (manifest, ignored) =
            parse(include_str!("../demos/dockyard.toml"), Format::Toml).unwrap();
        assert!(ignored.is_empty(), "unexpected keys: {ignored:?}");

        let graph = manifest.build_graph().unwrap();
        assert_eq!(graph.len(), 5);
        let order = graph.topological_order();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("redis") < position("nginx"));
        assert!(position("network") < position("redis"));

        assert_eq!(manifest.outputs.len(), 7);
        assert_eq!(manifest.outputs["redisPort"], OutputDecl::literal(9081));
        for declaration in manifest.outputs.values() {
            declaration.check(|name| graph.contains(name)).unwrap();
        }

        match &graph.get("nginx").unwrap().spec {
            ResourceSpec::Container(args) => {
                assert_eq!(args.uploads.len(), 2);
                assert!(args.uploads[0].content.contains("upstream redis_backend"));
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_output_forms() {
        let content = r#"
[outputs]
url = { value = "http://localhost:8081" }
info = { value = { name = "dev", replicas = 1 } }
id = "web.id"
"#;
        let (manifest, _) = parse(content, Format::Toml).unwrap();
        assert_eq!(
            manifest.outputs["url"],
            OutputDecl::literal("http://localhost:8081")
        );
        assert_eq!(
            manifest.outputs["info"],
            OutputDecl::literal(serde_json::json!({ "name": "dev", "replicas": 1 }))
        );
        assert_eq!(manifest.outputs["id"], OutputDecl::reference("web.id"));

        assert!(parse("[outputs]\nport = 9081\n", Format::Toml).is_err());
        assert!(parse("[outputs]\nport = { valu = 9081 }\n", Format::Toml).is_err());
    }

    #[test]
    fn test_graph_errors_surface() {
        let content = r#"
[[resources]]
type = "container"
name = "web"
image = "missing"
"#;
        let (manifest, _) = parse(content, Format::Toml).unwrap();
        assert!(matches!(
            manifest.build_graph(),
            Err(reconcile::Error::UnresolvedReference { .. })
        ));
    }
}
