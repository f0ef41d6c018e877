//! Shipped workflow descriptions.
//!
//! The same YAML shape `Workflow::from_yaml` accepts from operators,
//! embedded as the two (plus one extended) workflows the CLI drives.

use crate::errors::ConfigError;
use crate::workflow::Workflow;

const STATUS_WF: &str = "\
instructions:
  - LOAD_CONFIG: {}
  - CONNECT_HOSTS: {}
  - GET_WIREGUARD_STATUS: {}
";

const DEPLOY_WIREGUARD_WF: &str = "\
instructions:
  - LOAD_CONFIG: {}
  - CONNECT_HOSTS: {}
  - DEPLOY_WIREGUARD: {}
";

const DEPLOY_WIREGUARD_WITH_CLIENTS_WF: &str = "\
instructions:
  - LOAD_CONFIG: {}
  - CONNECT_HOSTS: {}
  - DEPLOY_WIREGUARD: {}
  - BUILD_WIREGUARD_CLIENTS: {}
";

pub fn status_workflow() -> Result<Workflow, ConfigError> {
    Workflow::from_yaml(STATUS_WF)
}

pub fn deploy_wireguard_workflow(with_clients: bool) -> Result<Workflow, ConfigError> {
    if with_clients {
        Workflow::from_yaml(DEPLOY_WIREGUARD_WITH_CLIENTS_WF)
    } else {
        Workflow::from_yaml(DEPLOY_WIREGUARD_WF)
    }
}
