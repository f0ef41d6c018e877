//! Workflow engine.
//!
//! Multi-step fleet operations are sequenced as data: an ordered list of
//! named instructions resolved against a closed, compiler-checked set of
//! variants, executed one at a time against a shared [`ExecutionContext`].
//! Operators compose new workflows (status only, deploy then build
//! clients) by editing the description, not the engine.
//!
//! Execution is strictly sequential at every level: one instruction at a
//! time, and within an instruction hosts, interfaces and peers iterate in
//! order. A failing instruction aborts the run immediately; partial
//! effects on already-touched hosts persist and surface to the operator.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{self, FleetConfig, HostConfig};
use crate::errors::{ConfigError, FleetError};
use crate::host::{Host, SshTransport, Transport, TMP_DATA_DIR};
use crate::parser::tree_to_json;
use crate::wireguard::{
    build_wg_peer_cfg, build_wg_server_cfg, render_qr_code, DEPLOY_WIREGUARD_SCRIPT,
};

/// Invocation parameters, immutable for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to the fleet configuration file.
    pub vpn_yaml: Option<PathBuf>,
    /// Restrict the run to a single host.
    pub hostname: Option<String>,
}

/// Parameter mapping captured when an instruction is constructed.
pub type InstructionParams = BTreeMap<String, serde_yaml::Value>;

/// How connected-host transports are built; swapped out in tests.
pub type TransportFactory =
    Arc<dyn Fn(&str, &HostConfig) -> Result<Arc<dyn Transport>, FleetError> + Send + Sync>;

fn ssh_transport_factory() -> TransportFactory {
    Arc::new(|hostname, host_config| {
        let transport = SshTransport::new(hostname, host_config)?;
        Ok(Arc::new(transport) as Arc<dyn Transport>)
    })
}

/// Mutable state threaded through one workflow run.
///
/// Exclusively owned by the running workflow; instructions receive
/// exclusive mutable access for the duration of their call. Once
/// `CONNECT_HOSTS` has run, `hosts` keys are a subset of `config` keys.
pub struct ExecutionContext {
    args: RunArgs,
    pub config: FleetConfig,
    pub hosts: BTreeMap<String, Host>,
    /// Auxiliary keyed data shared across instructions; also the place
    /// callers look for a run's aggregated results.
    pub data: BTreeMap<String, serde_json::Value>,
    queue: VecDeque<Instruction>,
    history: Vec<String>,
    transport_factory: TransportFactory,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("args", &self.args)
            .field("data", &self.data)
            .field("queue", &self.queue)
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(args: RunArgs) -> Self {
        Self::with_transport_factory(args, ssh_transport_factory())
    }

    pub fn with_transport_factory(args: RunArgs, transport_factory: TransportFactory) -> Self {
        Self {
            args,
            config: FleetConfig::new(),
            hosts: BTreeMap::new(),
            data: BTreeMap::new(),
            queue: VecDeque::new(),
            history: Vec::new(),
            transport_factory,
        }
    }

    pub fn args(&self) -> &RunArgs {
        &self.args
    }

    pub fn set_data(&mut self, key: &str, value: serde_json::Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub fn del_data(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    /// Names of the instructions that have completed, in execution order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn load_instructions(&mut self, instructions: &[Instruction]) {
        self.queue = instructions.iter().cloned().collect();
    }

    fn next_instruction(&mut self) -> Option<Instruction> {
        self.queue.pop_front()
    }
}

/// One named, parameterized unit of work. The set is closed: adding an
/// operation means adding a variant here and an arm in `from_name`.
#[derive(Debug, Clone)]
pub enum Instruction {
    LoadConfig { params: InstructionParams },
    ConnectHosts { params: InstructionParams },
    GetHostStatus { params: InstructionParams },
    GetWireguardStatus { params: InstructionParams },
    DeployWireguard { params: InstructionParams },
    BuildWireguardClients { params: InstructionParams },
}

impl Instruction {
    /// Resolve a registry name to a variant. This is the entire
    /// instruction registry; unknown names are fatal input errors.
    pub fn from_name(name: &str, params: InstructionParams) -> Result<Self, ConfigError> {
        match name {
            "LOAD_CONFIG" => Ok(Instruction::LoadConfig { params }),
            "CONNECT_HOSTS" => Ok(Instruction::ConnectHosts { params }),
            "GET_HOST_STATUS" => Ok(Instruction::GetHostStatus { params }),
            "GET_WIREGUARD_STATUS" => Ok(Instruction::GetWireguardStatus { params }),
            "DEPLOY_WIREGUARD" => Ok(Instruction::DeployWireguard { params }),
            "BUILD_WIREGUARD_CLIENTS" => Ok(Instruction::BuildWireguardClients { params }),
            _ => Err(ConfigError::UnknownInstruction {
                name: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::LoadConfig { .. } => "LOAD_CONFIG",
            Instruction::ConnectHosts { .. } => "CONNECT_HOSTS",
            Instruction::GetHostStatus { .. } => "GET_HOST_STATUS",
            Instruction::GetWireguardStatus { .. } => "GET_WIREGUARD_STATUS",
            Instruction::DeployWireguard { .. } => "DEPLOY_WIREGUARD",
            Instruction::BuildWireguardClients { .. } => "BUILD_WIREGUARD_CLIENTS",
        }
    }

    pub fn params(&self) -> &InstructionParams {
        match self {
            Instruction::LoadConfig { params }
            | Instruction::ConnectHosts { params }
            | Instruction::GetHostStatus { params }
            | Instruction::GetWireguardStatus { params }
            | Instruction::DeployWireguard { params }
            | Instruction::BuildWireguardClients { params } => params,
        }
    }

    /// Execute this instruction against the context.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<(), FleetError> {
        match self {
            Instruction::LoadConfig { .. } => run_load_config(ctx),
            Instruction::ConnectHosts { .. } => run_connect_hosts(ctx).await,
            Instruction::GetHostStatus { .. } => run_get_host_status(ctx).await,
            Instruction::GetWireguardStatus { .. } => run_get_wireguard_status(ctx).await,
            Instruction::DeployWireguard { .. } => run_deploy_wireguard(ctx).await,
            Instruction::BuildWireguardClients { .. } => run_build_wireguard_clients(ctx).await,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params().is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}(params={:?})", self.name(), self.params())
        }
    }
}

/// Declarative workflow description: ordered single-entry mappings from
/// instruction name to parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDescription {
    pub instructions: Vec<BTreeMap<String, InstructionParams>>,
}

/// An ordered, immutable sequence of instructions. A workflow may be run
/// any number of times; each run gets a fresh context unless the caller
/// supplies one, so nothing leaks between runs.
#[derive(Debug, Clone)]
pub struct Workflow {
    instructions: Vec<Instruction>,
}

impl Workflow {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Materialize a workflow from its declarative description.
    pub fn from_description(description: &WorkflowDescription) -> Result<Self, ConfigError> {
        let mut instructions = Vec::new();
        for entry in &description.instructions {
            if entry.len() != 1 {
                return Err(ConfigError::MalformedWorkflow(format!(
                    "expected a single-entry mapping per instruction, got {} keys",
                    entry.len()
                )));
            }
            let (name, params) = entry.iter().next().expect("len checked above");
            instructions.push(Instruction::from_name(name, params.clone())?);
        }
        Ok(Self::new(instructions))
    }

    /// Parse a YAML workflow description and materialize it.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let description: WorkflowDescription = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::MalformedWorkflow(e.to_string()))?;
        Self::from_description(&description)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Run the workflow to completion and return the final context.
    ///
    /// Without a supplied context, a fresh one is created from `args` and
    /// seeded with this workflow's instruction queue. Instructions are
    /// dequeued and executed strictly in order; the first failure aborts
    /// the run with the instruction's identity attached.
    pub async fn run(
        &self,
        ctx: Option<ExecutionContext>,
        args: RunArgs,
    ) -> Result<ExecutionContext, FleetError> {
        let mut ctx = match ctx {
            Some(ctx) => ctx,
            None => {
                let mut ctx = ExecutionContext::new(args);
                ctx.load_instructions(&self.instructions);
                ctx
            }
        };

        while let Some(instruction) = ctx.next_instruction() {
            info!("Executing: {instruction}");
            instruction
                .run(&mut ctx)
                .await
                .map_err(|source| FleetError::Instruction {
                    name: instruction.name().to_string(),
                    source: Box::new(source),
                })?;
            ctx.history.push(instruction.name().to_string());
        }
        Ok(ctx)
    }
}

fn run_load_config(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    let path = ctx
        .args
        .vpn_yaml
        .clone()
        .ok_or(ConfigError::MissingArgument { name: "vpn_yaml" })?;
    ctx.config = config::load_fleet_config(&path, ctx.args.hostname.as_deref())?;
    info!("Loaded fleet config for {} host(s)", ctx.config.len());
    Ok(())
}

async fn run_connect_hosts(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    for (hostname, host_config) in ctx.config.clone() {
        let transport = (ctx.transport_factory)(&hostname, &host_config)?;
        let mut host = Host::new(hostname.clone(), host_config, transport);
        host.connect().await?;
        ctx.hosts.insert(hostname, host);
    }
    Ok(())
}

async fn run_get_host_status(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    for (hostname, host) in &ctx.hosts {
        let uptime = host.run_named_command("GET_UPTIME").await?;
        println!("{}", hostname);
        println!("{}", uptime.raw.trim_end());
    }
    Ok(())
}

async fn run_get_wireguard_status(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    let mut report = serde_json::Map::new();

    for (hostname, host) in &ctx.hosts {
        let uptime = host.run_named_command("GET_UPTIME").await?;
        let uptime = uptime.raw.trim().to_string();

        match host.config.description.as_deref() {
            Some(description) => {
                println!("{} {}", hostname.bold(), format!("({description})").dimmed())
            }
            None => println!("{}", hostname.bold()),
        }
        println!("  up since: {uptime}");

        let wg = host.run_named_command("WG_SHOW").await?;
        let mut wireguard = serde_json::Value::Null;
        if let Some(outcome) = wg.parsed {
            for skipped in &outcome.skipped {
                warn!(
                    "{}: dropped wg show line {} ({}): {}",
                    hostname, skipped.line_no, skipped.reason, skipped.text
                );
            }
            for (tag, node) in &outcome.tree {
                println!("  {}", tag.cyan());
                if let Some(block) = node.as_block() {
                    for (key, value) in block {
                        if let Some(value) = value.as_str() {
                            println!("    {key}: {value}");
                        }
                    }
                }
            }
            wireguard = tree_to_json(&outcome.tree);
        }

        report.insert(
            hostname.clone(),
            serde_json::json!({ "uptime": uptime, "wireguard": wireguard }),
        );
    }

    ctx.set_data("status", serde_json::Value::Object(report));
    Ok(())
}

async fn run_deploy_wireguard(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    for (hostname, host) in &ctx.hosts {
        info!("{hostname}: Deploying Wireguard");
        let wireguard = host.config.app_config.wireguard.clone();
        if wireguard.is_empty() {
            warn!("{hostname}: no wireguard interfaces configured, skipping");
            continue;
        }
        for (ifname, iface) in &wireguard {
            info!("{hostname}: Generating Wireguard configuration for {ifname}");
            let server_cfg = build_wg_server_cfg(iface, hostname, ifname)?;
            let remote_path = format!("{TMP_DATA_DIR}/{ifname}.conf");
            info!("{hostname}: Uploading Wireguard configuration");
            host.put_data_into_file(&server_cfg, &remote_path).await?;
        }
        // run_script already rejects a non-zero remote exit.
        host.run_script(DEPLOY_WIREGUARD_SCRIPT, None, true).await?;
        info!("{hostname}: Wireguard deployed");
    }
    Ok(())
}

async fn run_build_wireguard_clients(ctx: &mut ExecutionContext) -> Result<(), FleetError> {
    for (hostname, host) in &ctx.hosts {
        info!("{hostname}: Generating Wireguard client configurations");
        for iface in host.config.app_config.wireguard.values() {
            for (peer_name, peer) in iface.named_peers() {
                info!("{hostname}: Generating Wireguard client configuration for {peer_name}");
                let client_cfg = build_wg_peer_cfg(peer_name, peer, iface, hostname)?;
                println!("Configuration for {peer_name}:");
                println!("{client_cfg}");
                println!("QR code for {peer_name}:");
                let qr = render_qr_code(&client_cfg).await?;
                println!("{qr}");
            }
        }
    }
    Ok(())
}
