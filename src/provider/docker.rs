//! Provider backed by `docker` CLI commands.

use super::{DockerCli, Runner, is_not_found};
use reconcile::{
    ContainerArgs, Dependencies, NetworkArgs, Outputs, Provider, ProviderError, Resource,
    ResourceSpec, ResourceState, Upload, property_changes,
};
use serde_json::Value;
use std::io::Write;

/// Container properties that `docker container update` can change in place
const UPDATABLE: &[&str] = &["restart", reconcile::types::DEPENDS_ON];

/// Provider that manages networks, images and containers through a [`Runner`].
pub struct DockerProvider<R = DockerCli> {
    runner: R,
}

impl DockerProvider<DockerCli> {
    /// Create a provider that runs the `docker` executable from `PATH`.
    pub fn new() -> Self {
        Self::with_runner(DockerCli::default())
    }
}

impl Default for DockerProvider<DockerCli> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runner> DockerProvider<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }

    fn docker(&self, args: &[String]) -> Result<String, ProviderError> {
        self.runner.run(args)
    }

    /// Remove an object, treating "already gone" as success
    fn remove(&self, args: &[String]) -> Result<(), ProviderError> {
        match self.docker(args) {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => {
                log::debug!("{} already removed: {err}", args.join(" "));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn create_network(&self, name: &str, args: &NetworkArgs) -> Result<Outputs, ProviderError> {
        let id = self.docker(&network_create_args(name, args))?;
        Ok(outputs(&id, name))
    }

    fn create_image(&self, reference: &str) -> Result<Outputs, ProviderError> {
        self.docker(&argv(&["image", "pull", "--quiet", reference]))?;
        let id = self.docker(&argv(&["image", "inspect", "--format", "{{.Id}}", reference]))?;
        Ok(outputs(&id, reference))
    }

    fn create_container(
        &self,
        resource: &Resource,
        args: &ContainerArgs,
        deps: &Dependencies,
    ) -> Result<Outputs, ProviderError> {
        let name = resource.runtime_name();
        let id = self.docker(&container_create_args(resource, args, deps)?)?;

        if let Err(err) = self.start_container(&id, args, deps) {
            // Leave no half-configured container holding the name
            if let Err(cleanup) = self.docker(&argv(&["container", "rm", "--force", &id])) {
                log::warn!("Failed to remove partially created container {name}: {cleanup}");
            }
            return Err(err);
        }

        Ok(outputs(&id, name))
    }

    /// Attach extra networks, copy uploads, then start
    fn start_container(
        &self,
        id: &str,
        args: &ContainerArgs,
        deps: &Dependencies,
    ) -> Result<(), ProviderError> {
        for attachment in args.networks.iter().skip(1) {
            let mut connect = argv(&["network", "connect"]);
            for alias in &attachment.aliases {
                connect.push("--alias".to_string());
                connect.push(alias.clone());
            }
            connect.push(deps.output_str(&attachment.network, "name")?.to_string());
            connect.push(id.to_string());
            self.docker(&connect)?;
        }

        for upload in &args.uploads {
            self.upload(id, upload)?;
        }

        self.docker(&argv(&["container", "start", id]))?;
        Ok(())
    }

    fn upload(&self, id: &str, upload: &Upload) -> Result<(), ProviderError> {
        let io_error = |e: std::io::Error| {
            ProviderError::fatal(format!("failed to stage upload {}: {e}", upload.file))
        };
        let mut staged = tempfile::NamedTempFile::new().map_err(io_error)?;
        staged.write_all(upload.content.as_bytes()).map_err(io_error)?;
        staged.flush().map_err(io_error)?;

        let source = staged.path().to_string_lossy().to_string();
        self.docker(&[
            "container".to_string(),
            "cp".to_string(),
            source,
            format!("{id}:{}", upload.file),
        ])?;
        Ok(())
    }
}

impl<R: Runner> Provider for DockerProvider<R> {
    fn create(&self, resource: &Resource, deps: &Dependencies) -> Result<Outputs, ProviderError> {
        match &resource.spec {
            ResourceSpec::Network(args) => self.create_network(resource.runtime_name(), args),
            ResourceSpec::Image(args) => self.create_image(&args.reference),
            ResourceSpec::Container(args) => self.create_container(resource, args, deps),
        }
    }

    fn update(
        &self,
        current: &ResourceState,
        desired: &Resource,
        _deps: &Dependencies,
    ) -> Result<Outputs, ProviderError> {
        match (&current.resource.spec, &desired.spec) {
            (ResourceSpec::Container(before), ResourceSpec::Container(after)) => {
                let changes = property_changes(&current.resource.properties(), &desired.properties());
                if let Some(change) = changes
                    .iter()
                    .find(|c| !UPDATABLE.contains(&c.property.as_str()))
                {
                    return Err(ProviderError::ImmutableConflict {
                        property: change.property.clone(),
                    });
                }
                if before.restart != after.restart {
                    self.docker(&argv(&[
                        "container",
                        "update",
                        "--restart",
                        &after.restart.to_string(),
                        &current.id,
                    ]))?;
                }
                Ok(outputs(&current.id, desired.runtime_name()))
            }
            // Every runtime-visible network property forces a replacement and
            // keep_locally only matters on delete
            (ResourceSpec::Network(_), ResourceSpec::Network(_))
            | (ResourceSpec::Image(_), ResourceSpec::Image(_)) => {
                Ok(outputs(&current.id, desired.runtime_name()))
            }
            _ => Err(ProviderError::ImmutableConflict {
                property: "type".to_string(),
            }),
        }
    }

    fn delete(&self, current: &ResourceState) -> Result<(), ProviderError> {
        match &current.resource.spec {
            ResourceSpec::Network(_) => self.remove(&argv(&["network", "rm", &current.id])),
            ResourceSpec::Image(args) => {
                if args.keep_locally {
                    log::debug!("Keeping image {} in the local cache", args.reference);
                    return Ok(());
                }
                self.remove(&argv(&["image", "rm", &current.id]))
            }
            ResourceSpec::Container(_) => {
                self.remove(&argv(&["container", "rm", "--force", &current.id]))
            }
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

fn outputs(id: &str, name: &str) -> Outputs {
    Outputs::from([
        ("id".to_string(), Value::String(id.to_string())),
        ("name".to_string(), Value::String(name.to_string())),
    ])
}

fn network_create_args(name: &str, args: &NetworkArgs) -> Vec<String> {
    let mut cmd = argv(&["network", "create", "--driver", &args.driver]);
    if args.internal {
        cmd.push("--internal".to_string());
    }
    for (key, value) in &args.labels {
        cmd.push("--label".to_string());
        cmd.push(format!("{key}={value}"));
    }
    cmd.push(name.to_string());
    cmd
}

/// `docker container create` invocation; the first network is attached here
fn container_create_args(
    resource: &Resource,
    args: &ContainerArgs,
    deps: &Dependencies,
) -> Result<Vec<String>, ProviderError> {
    let mut cmd = argv(&[
        "container",
        "create",
        "--name",
        resource.runtime_name(),
        "--restart",
        &args.restart.to_string(),
    ]);

    for port in &args.ports {
        cmd.push("--publish".to_string());
        cmd.push(format!("{}:{}/{}", port.external, port.internal, port.protocol));
    }

    for (key, value) in &args.env {
        cmd.push("--env".to_string());
        cmd.push(format!("{key}={value}"));
    }

    if let Some(first) = args.networks.first() {
        cmd.push("--network".to_string());
        cmd.push(deps.output_str(&first.network, "name")?.to_string());
        for alias in &first.aliases {
            cmd.push("--network-alias".to_string());
            cmd.push(alias.clone());
        }
    }

    cmd.push(deps.id(&args.image)?.to_string());
    cmd.extend(args.command.iter().cloned());
    Ok(cmd)
}
