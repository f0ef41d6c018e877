//! Remote host access.
//!
//! [`Host`] pairs a fleet config entry with a [`Transport`] and exposes the
//! narrow operation set the instructions need: run a command, run a named
//! command from the registry, upload data, run a script. The production
//! transport drives the OpenSSH client binaries via `tokio::process`, with
//! the inlined private key staged to a mode-0600 temp file for the life of
//! the session. Tests inject recording transports through the same trait.

use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::cmds;
use crate::config::HostConfig;
use crate::errors::HostError;
use crate::parser::ParseOutcome;

/// Remote path scripts are staged to before execution.
pub const TMP_SCRIPT_PATH: &str = "/tmp/tmp_script.sh";
/// Remote directory rendered configuration files are staged to.
pub const TMP_DATA_DIR: &str = "/tmp";

/// Captured result of one remote command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Output of a named command: raw text plus the structured tree when the
/// command has a parser bound.
#[derive(Debug, Clone)]
pub struct NamedCommandOutput {
    pub raw: String,
    pub parsed: Option<ParseOutcome>,
}

/// Authenticated command execution and file transfer to one machine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Verify the host is reachable and authentication works.
    async fn connect(&self) -> Result<(), HostError>;

    /// Execute a command remotely. Transport-level failures (spawn, I/O)
    /// are errors; a non-zero remote exit is reported in the output.
    async fn exec(&self, command: &str) -> Result<CmdOutput, HostError>;

    /// Write `data` to `remote_path` on the host.
    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<(), HostError>;
}

/// A managed fleet host.
pub struct Host {
    pub hostname: String,
    pub config: HostConfig,
    transport: Arc<dyn Transport>,
    connected: bool,
}

impl Host {
    pub fn new(hostname: String, config: HostConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            hostname,
            config,
            transport,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn connect(&mut self) -> Result<(), HostError> {
        if !self.connected {
            self.transport.connect().await?;
            info!("Connected: {}", self.hostname);
            self.connected = true;
        }
        Ok(())
    }

    pub async fn reconnect(&mut self) -> Result<(), HostError> {
        self.connected = false;
        self.connect().await?;
        info!("Reconnected: {}", self.hostname);
        Ok(())
    }

    /// Run a command, treating a non-zero remote exit as an error.
    pub async fn run(&self, command: &str) -> Result<CmdOutput, HostError> {
        let output = self.transport.exec(command).await?;
        if !output.ok() {
            return Err(HostError::RemoteExit {
                host: self.hostname.clone(),
                what: command.to_string(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run a command from the named registry, applying its output parser
    /// when one is bound.
    pub async fn run_named_command(&self, name: &str) -> Result<NamedCommandOutput, HostError> {
        let spec = cmds::lookup(name).ok_or_else(|| HostError::UnknownCommand {
            name: name.to_string(),
        })?;
        let output = self.run(spec.cmd).await?;
        let parsed = spec.parser.map(|parse| parse(&output.stdout));
        Ok(NamedCommandOutput {
            raw: output.stdout,
            parsed,
        })
    }

    /// Upload `data` to `remote_path`, optionally applying a chmod mode.
    pub async fn transfer_data(
        &self,
        data: &str,
        remote_path: &str,
        chmod: Option<&str>,
    ) -> Result<(), HostError> {
        info!("{}: Uploading file {}", self.hostname, remote_path);
        self.transport.upload(data.as_bytes(), remote_path).await?;
        if let Some(mode) = chmod {
            self.run(&format!(
                "chmod {} {}",
                mode,
                quote(&self.hostname, remote_path)?
            ))
            .await?;
        }
        Ok(())
    }

    pub async fn put_data_into_file(
        &self,
        data: &str,
        remote_path: &str,
    ) -> Result<(), HostError> {
        self.transfer_data(data, remote_path, None).await
    }

    /// Stage `script` on the host, mark it executable, and run it —
    /// via `sudo su` when `root` is set.
    pub async fn run_script(
        &self,
        script: &str,
        remote_path: Option<&str>,
        root: bool,
    ) -> Result<CmdOutput, HostError> {
        let remote_path = remote_path.unwrap_or(TMP_SCRIPT_PATH);
        self.transfer_data(script, remote_path, Some("+x")).await?;
        info!("{}: Executing script {}", self.hostname, remote_path);

        let command = if root {
            format!("sudo su -c {} root", quote(&self.hostname, remote_path)?)
        } else {
            quote(&self.hostname, remote_path)?
        };
        let result = self.run(&command).await;
        match &result {
            Ok(_) => info!("{}: Returned OK from {}", self.hostname, remote_path),
            Err(_) => error!("{}: Returned Fail from {}", self.hostname, remote_path),
        }
        result
    }
}

fn quote(host: &str, arg: &str) -> Result<String, HostError> {
    shlex::try_quote(arg)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| HostError::Exec {
            host: host.to_string(),
            command: arg.to_string(),
            message: "argument contains a nul byte".to_string(),
        })
}

/// Transport backed by the local OpenSSH client (`ssh`/`scp`).
pub struct SshTransport {
    hostname: String,
    user: String,
    key_file: NamedTempFile,
}

impl SshTransport {
    pub fn new(hostname: &str, config: &HostConfig) -> Result<Self, HostError> {
        let key_material = |message: String| HostError::KeyMaterial {
            host: hostname.to_string(),
            message,
        };

        let mut key_file = tempfile::Builder::new()
            .prefix(".wgfleet-key-")
            .tempfile()
            .map_err(|e| key_material(e.to_string()))?;
        key_file
            .write_all(config.ssh_private_key.as_bytes())
            .map_err(|e| key_material(e.to_string()))?;
        key_file
            .flush()
            .map_err(|e| key_material(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_file.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| key_material(e.to_string()))?;
        }

        Ok(Self {
            hostname: hostname.to_string(),
            user: config.ssh_user.clone(),
            key_file,
        })
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_file.path().display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ]
    }

    async fn run_local(
        &self,
        program: &str,
        args: &[String],
        context: &str,
    ) -> Result<CmdOutput, HostError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::Exec {
                host: self.hostname.clone(),
                command: context.to_string(),
                message: e.to_string(),
            })?;
        Ok(CmdOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self) -> Result<(), HostError> {
        let probe = self.exec("true").await?;
        if !probe.ok() {
            return Err(HostError::Connect {
                host: self.hostname.clone(),
                message: probe.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn exec(&self, command: &str) -> Result<CmdOutput, HostError> {
        let mut args = self.common_args();
        args.push("-l".to_string());
        args.push(self.user.clone());
        args.push(self.hostname.clone());
        args.push(command.to_string());
        self.run_local("ssh", &args, command).await
    }

    async fn upload(&self, data: &[u8], remote_path: &str) -> Result<(), HostError> {
        let transfer = |message: String| HostError::Transfer {
            host: self.hostname.clone(),
            remote_path: remote_path.to_string(),
            message,
        };

        let mut staged = NamedTempFile::new().map_err(|e| transfer(e.to_string()))?;
        staged
            .write_all(data)
            .map_err(|e| transfer(e.to_string()))?;
        staged.flush().map_err(|e| transfer(e.to_string()))?;

        let mut args = self.common_args();
        args.push(staged.path().display().to_string());
        args.push(format!("{}@{}:{}", self.user, self.hostname, remote_path));
        let output = self.run_local("scp", &args, remote_path).await?;
        if !output.ok() {
            return Err(transfer(output.stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport that returns canned outputs and records every call.
    struct FakeTransport {
        calls: Mutex<Vec<String>>,
        exit_code: i32,
    }

    impl FakeTransport {
        fn new(exit_code: i32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                exit_code,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn connect(&self) -> Result<(), HostError> {
            self.calls.lock().unwrap().push("connect".to_string());
            Ok(())
        }

        async fn exec(&self, command: &str) -> Result<CmdOutput, HostError> {
            self.calls.lock().unwrap().push(format!("exec:{command}"));
            Ok(CmdOutput {
                exit_code: self.exit_code,
                stdout: "2024-01-01 00:00:00\n".to_string(),
                stderr: String::new(),
            })
        }

        async fn upload(&self, _data: &[u8], remote_path: &str) -> Result<(), HostError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("upload:{remote_path}"));
            Ok(())
        }
    }

    fn host_config() -> HostConfig {
        HostConfig {
            ssh_user: "ops".to_string(),
            ssh_private_key: "key".to_string(),
            description: None,
            app_config: Default::default(),
        }
    }

    fn make_host(transport: Arc<FakeTransport>) -> Host {
        Host::new("vpn1".to_string(), host_config(), transport)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let transport = FakeTransport::new(0);
        let mut host = make_host(transport.clone());
        host.connect().await.unwrap();
        host.connect().await.unwrap();
        assert_eq!(transport.calls(), vec!["connect"]);
        assert!(host.is_connected());
    }

    #[tokio::test]
    async fn run_rejects_non_zero_exit() {
        let transport = FakeTransport::new(3);
        let host = make_host(transport);
        let err = host.run("false").await.unwrap_err();
        assert!(matches!(err, HostError::RemoteExit { code: 3, .. }));
    }

    #[tokio::test]
    async fn run_script_uploads_chmods_and_runs_as_root() {
        let transport = FakeTransport::new(0);
        let host = make_host(transport.clone());
        host.run_script("#!/bin/sh\ntrue\n", None, true)
            .await
            .unwrap();
        assert_eq!(
            transport.calls(),
            vec![
                format!("upload:{TMP_SCRIPT_PATH}"),
                format!("exec:chmod +x {TMP_SCRIPT_PATH}"),
                format!("exec:sudo su -c {TMP_SCRIPT_PATH} root"),
            ]
        );
    }

    #[tokio::test]
    async fn named_command_applies_bound_parser() {
        let transport = FakeTransport::new(0);
        let host = make_host(transport);
        let uptime = host.run_named_command("GET_UPTIME").await.unwrap();
        assert!(uptime.parsed.is_none());
        assert_eq!(uptime.raw.trim(), "2024-01-01 00:00:00");

        let err = host.run_named_command("NOPE").await.unwrap_err();
        assert!(matches!(err, HostError::UnknownCommand { .. }));
    }
}
