//! Cache endpoint resolution.

use storepush_core::{CommandRunner, Endpoint, EndpointSource, Invocation};

use crate::error::SyncError;

/// Go template printing one address per attached network.
const ADDRESS_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{println .IPAddress}}{{end}}";

/// Resolve the configured endpoint. A container source is inspected with
/// `docker inspect` and becomes `http://<address>`.
pub fn resolve(
    source: &EndpointSource,
    docker_bin: &str,
    runner: &dyn CommandRunner,
) -> Result<Endpoint, SyncError> {
    match source {
        EndpointSource::Url(endpoint) => Ok(endpoint.clone()),
        EndpointSource::Container(name) => {
            let invocation = Invocation::new(docker_bin)
                .args(["inspect", "--format", ADDRESS_TEMPLATE])
                .arg(name.as_str());
            let output = runner.run(&invocation).map_err(|err| {
                SyncError::Resolution(format!("cannot inspect container '{name}': {err}"))
            })?;
            if !output.success() {
                return Err(SyncError::Resolution(format!(
                    "`{}` failed: {}",
                    invocation.command_line(),
                    output.stderr.trim()
                )));
            }
            let Some(address) = output
                .stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
            else {
                return Err(SyncError::Resolution(format!(
                    "container '{name}' has no network address"
                )));
            };
            let endpoint = Endpoint::new(format!("http://{}", bracket_ipv6(address)));
            tracing::info!(container = %name, endpoint = %endpoint, "resolved cache endpoint");
            Ok(endpoint)
        }
    }
}

fn bracket_ipv6(address: &str) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]")
    } else {
        address.to_string()
    }
}
