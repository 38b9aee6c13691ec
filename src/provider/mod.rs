//! Container runtime access for the reconciliation engine.
//!
//! The [`Runner`] trait is the seam between the provider and the `docker`
//! executable, allowing for different implementations (real CLI, scripted
//! runner for testing).

pub mod docker;

pub use docker::DockerProvider;

use reconcile::ProviderError;
use std::process::Command;

/// Executes one runtime CLI invocation and returns its stdout.
pub trait Runner: Send + Sync {
    fn run(&self, args: &[String]) -> Result<String, ProviderError>;
}

/// Runner that executes the real `docker` CLI.
pub struct DockerCli {
    /// Path or name of the docker executable
    program: String,
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl Runner for DockerCli {
    fn run(&self, args: &[String]) -> Result<String, ProviderError> {
        log::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| ProviderError::fatal(format!("failed to execute {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Map CLI error output to a retryable or fatal provider error.
pub fn classify(stderr: &str) -> ProviderError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    // Daemon and registry hiccups
    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("i/o timeout")
        || lower.contains("timed out")
        || lower.contains("tls handshake")
        || lower.contains("toomanyrequests")
        || lower.contains("too many requests")
        || lower.contains("temporary failure in name resolution")
        || lower.contains("service unavailable")
        || lower.contains("bad gateway")
    {
        return ProviderError::Transient(message);
    }

    ProviderError::Fatal(message)
}

/// Whether an error says the object is already gone
pub fn is_not_found(err: &ProviderError) -> bool {
    match err {
        ProviderError::Fatal(message) => {
            let lower = message.to_lowercase();
            lower.contains("no such") || lower.contains("not found")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_errors_are_transient() {
        let err = classify(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?\n",
        );
        assert!(err.is_retryable());

        let err = classify("Error response from daemon: toomanyrequests: You have reached your pull rate limit.");
        assert!(err.is_retryable());

        let err = classify("Get \"https://registry-1.docker.io/v2/\": net/http: TLS handshake timeout");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_argument_errors_are_fatal() {
        let err = classify(
            "Error response from daemon: Conflict. The container name \"/redis\" is already in use\n",
        );
        assert_eq!(
            err,
            ProviderError::Fatal(
                "Error response from daemon: Conflict. The container name \"/redis\" is already in use"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(&classify("Error: No such container: redis")));
        assert!(is_not_found(&classify("Error response from daemon: network webapp not found")));
        assert!(!is_not_found(&classify("permission denied")));
        assert!(!is_not_found(&ProviderError::transient("not found, but retry")));
    }
}
