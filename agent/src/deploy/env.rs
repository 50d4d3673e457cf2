//! Environment resolution for a deployment intent

use crate::models::deployment::ContainerSpec;

/// Build the container's `NAME=value` list: explicit variables first, in
/// order, then one entry per secret reference with the value looked up by
/// the secret key. A secret that was never loaded resolves to an empty value.
pub fn resolve_env<F>(container: &ContainerSpec, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = container
        .env_vars
        .iter()
        .map(|var| format!("{}={}", var.name, var.value));

    let secrets = container.secrets.iter().map(|secret| {
        let value = lookup(&secret.secret_key).unwrap_or_default();
        format!("{}={}", secret.secret_key, value)
    });

    explicit.chain(secrets).collect()
}

/// Look a secret up in the process environment
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
