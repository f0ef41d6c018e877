//! wgfleet — provision and inspect WireGuard VPN servers across an SSH
//! fleet.
//!
//! Two subsystems carry the real machinery:
//!
//! - [`workflow`]: a small interpreter that executes an ordered list of
//!   named instructions against a shared execution context, so multi-step
//!   fleet operations are composed as data instead of hard-coded scripts.
//! - [`parser`]: a generic stack-based parser that turns hierarchically
//!   blocked command output into a nested key-value tree, driven by an
//!   ordered list of nesting-level patterns.
//!
//! Everything else is plumbing around them: the typed fleet config, the
//! SSH-backed remote host, template rendering, and the clap surface.
//!
//! # Quick start
//!
//! ```ignore
//! use wgfleet::workflow::RunArgs;
//! use wgfleet::workflows::status_workflow;
//!
//! let ctx = status_workflow()?
//!     .run(None, RunArgs { vpn_yaml: Some("fleet.yaml".into()), hostname: None })
//!     .await?;
//! println!("{:?}", ctx.get_data("status"));
//! ```

pub mod cli;
pub mod cmds;
pub mod config;
pub mod errors;
pub mod host;
pub mod parser;
pub mod render;
pub mod telemetry;
pub mod wireguard;
pub mod workflow;
pub mod workflows;

pub use errors::FleetError;
pub use workflow::{ExecutionContext, Instruction, RunArgs, Workflow};
