use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the wgfleet system.
///
/// This hierarchy separates configuration problems (fatal before any
/// remote interaction) from per-host connectivity and remote execution
/// failures, so callers can map each class to a distinct exit code.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Instruction {name} failed: {source}")]
    Instruction {
        name: String,
        #[source]
        source: Box<FleetError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown instruction '{name}' in workflow description")]
    UnknownInstruction { name: String },

    #[error("Malformed workflow description: {0}")]
    MalformedWorkflow(String),

    #[error("Missing invocation argument '{name}'")]
    MissingArgument { name: &'static str },

    #[error("Failed to read fleet config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed fleet config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Host '{hostname}' not present in fleet config")]
    UnknownHost { hostname: String },

    #[error("Peer '{peer}' is missing required field '{field}'")]
    MissingPeerField { peer: String, field: &'static str },
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("{host}: failed to stage SSH key material: {message}")]
    KeyMaterial { host: String, message: String },

    #[error("{host}: connect failed: {message}")]
    Connect { host: String, message: String },

    #[error("{host}: failed to execute '{command}': {message}")]
    Exec {
        host: String,
        command: String,
        message: String,
    },

    #[error("{host}: '{what}' exited with status {code}: {stderr}")]
    RemoteExit {
        host: String,
        what: String,
        code: i32,
        stderr: String,
    },

    #[error("{host}: failed to transfer to {remote_path}: {message}")]
    Transfer {
        host: String,
        remote_path: String,
        message: String,
    },

    #[error("Unknown named command '{name}'")]
    UnknownCommand { name: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to compile template '{name}': {source}")]
    Template {
        name: &'static str,
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("Failed to render template '{name}': {source}")]
    Render {
        name: &'static str,
        #[source]
        source: Box<handlebars::RenderError>,
    },
}

/// Map a [`FleetError`] to a process exit code.
///
/// 2 = configuration (nothing touched), 3 = connectivity,
/// 4 = remote execution, 1 = anything else.
pub fn exit_code(err: &FleetError) -> u8 {
    match err {
        FleetError::Config(_) | FleetError::Render(_) => 2,
        FleetError::Host(host_err) => match host_err {
            HostError::Connect { .. } | HostError::KeyMaterial { .. } => 3,
            _ => 4,
        },
        FleetError::Instruction { source, .. } => exit_code(source),
        FleetError::Other(_) => 1,
    }
}

/// Exit code for the CLI boundary, where errors arrive as `anyhow::Error`.
pub fn get_exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<FleetError>() {
        Some(fleet_err) => exit_code(fleet_err),
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_exit_code_2() {
        let err = FleetError::Config(ConfigError::UnknownInstruction {
            name: "NOPE".to_string(),
        });
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn instruction_wrapper_preserves_inner_exit_code() {
        let inner = FleetError::Host(HostError::Connect {
            host: "vpn1".to_string(),
            message: "timeout".to_string(),
        });
        let err = FleetError::Instruction {
            name: "CONNECT_HOSTS".to_string(),
            source: Box::new(inner),
        };
        assert_eq!(exit_code(&err), 3);
        assert!(err.to_string().contains("CONNECT_HOSTS"));
    }

    #[test]
    fn anyhow_boundary_falls_back_to_1() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(get_exit_code(&err), 1);
    }
}
