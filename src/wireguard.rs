//! WireGuard configuration building.
//!
//! Turns fleet config records into server and client configuration file
//! text via the embedded templates, and renders client configs as
//! terminal QR codes by piping them through `qrencode`.

use anyhow::{bail, Context};
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::config::{PeerConfig, WgInterfaceConfig};
use crate::errors::{ConfigError, FleetError};
use crate::render::{Renderer, WG_CLIENT_TEMPLATE, WG_SERVER_TEMPLATE};

/// Provisioning script executed on each host after configs are staged.
pub const DEPLOY_WIREGUARD_SCRIPT: &str = include_str!("../scripts/deploy_wireguard.sh");

/// Render the server-side configuration for one interface.
pub fn build_wg_server_cfg(
    iface: &WgInterfaceConfig,
    hostname: &str,
    ifname: &str,
) -> Result<String, FleetError> {
    let mut peers = Vec::new();
    for (name, peer) in iface.named_peers() {
        let allowed_ips = peer
            .allowed_ips
            .as_deref()
            .or(peer.address.as_deref())
            .ok_or_else(|| ConfigError::MissingPeerField {
                peer: name.to_string(),
                field: "allowed_ips",
            })?;
        peers.push(json!({
            "name": name,
            "public_key": peer.public_key,
            "allowed_ips": allowed_ips,
        }));
    }

    let data = json!({
        "hostname": hostname,
        "interface": ifname,
        "now": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        "address": iface.address,
        "listen_port": iface.listen_port,
        "private_key": iface.private_key,
        "peers": peers,
    });
    Ok(Renderer::new()?.render(WG_SERVER_TEMPLATE, &data)?)
}

/// Render the client-side configuration for one named peer.
pub fn build_wg_peer_cfg(
    peer_name: &str,
    peer: &PeerConfig,
    iface: &WgInterfaceConfig,
    hostname: &str,
) -> Result<String, FleetError> {
    let missing = |field: &'static str| ConfigError::MissingPeerField {
        peer: peer_name.to_string(),
        field,
    };
    let private_key = peer.private_key.as_deref().ok_or_else(|| missing("private_key"))?;
    let address = peer.address.as_deref().ok_or_else(|| missing("address"))?;

    let data = json!({
        "private_key": private_key,
        "address": address,
        "dns": iface.dns,
        "server_public_key": iface.public_key,
        "endpoint": iface.endpoint_for(hostname),
        "allowed_ips": iface.client_allowed_ips,
    });
    Ok(Renderer::new()?.render(WG_CLIENT_TEMPLATE, &data)?)
}

/// Pipe `text` through `qrencode -t ansiutf8` and return the terminal-
/// renderable QR code.
pub async fn render_qr_code(text: &str) -> anyhow::Result<String> {
    let mut child = tokio::process::Command::new("qrencode")
        .args(["-t", "ansiutf8"])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .context("failed to spawn qrencode (is it installed?)")?;

    let mut stdin = child
        .stdin
        .take()
        .context("qrencode stdin unavailable")?;
    stdin.write_all(text.as_bytes()).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        bail!(
            "qrencode exited with status {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn iface_with_peers() -> WgInterfaceConfig {
        let mut laptop = BTreeMap::new();
        laptop.insert(
            "laptop".to_string(),
            PeerConfig {
                public_key: "laptop-public".to_string(),
                private_key: Some("laptop-private".to_string()),
                address: Some("10.0.0.2/32".to_string()),
                allowed_ips: None,
            },
        );
        let mut phone = BTreeMap::new();
        phone.insert(
            "phone".to_string(),
            PeerConfig {
                public_key: "phone-public".to_string(),
                private_key: None,
                address: Some("10.0.0.3/32".to_string()),
                allowed_ips: Some("10.0.0.3/32, 192.168.1.0/24".to_string()),
            },
        );
        WgInterfaceConfig {
            address: "10.0.0.1/24".to_string(),
            listen_port: 51820,
            private_key: "server-private".to_string(),
            public_key: "server-public".to_string(),
            endpoint: None,
            dns: Some("1.1.1.1".to_string()),
            client_allowed_ips: "0.0.0.0/0".to_string(),
            peers: vec![laptop, phone],
        }
    }

    #[test]
    fn server_config_lists_every_peer_in_order() {
        let iface = iface_with_peers();
        let cfg = build_wg_server_cfg(&iface, "vpn1.example.com", "wg0").unwrap();
        assert!(cfg.contains("Address = 10.0.0.1/24"));
        assert!(cfg.contains("ListenPort = 51820"));
        assert!(cfg.contains("PrivateKey = server-private"));
        assert!(cfg.contains("PublicKey = laptop-public"));
        // allowed_ips falls back to the peer address when unset.
        assert!(cfg.contains("AllowedIPs = 10.0.0.2/32"));
        assert!(cfg.contains("AllowedIPs = 10.0.0.3/32, 192.168.1.0/24"));
        let laptop_at = cfg.find("laptop-public").unwrap();
        let phone_at = cfg.find("phone-public").unwrap();
        assert!(laptop_at < phone_at);
    }

    #[test]
    fn client_config_points_back_at_the_server() {
        let iface = iface_with_peers();
        let (name, peer) = iface.named_peers().next().unwrap();
        let cfg = build_wg_peer_cfg(name, peer, &iface, "vpn1.example.com").unwrap();
        assert!(cfg.contains("PrivateKey = laptop-private"));
        assert!(cfg.contains("Address = 10.0.0.2/32"));
        assert!(cfg.contains("DNS = 1.1.1.1"));
        assert!(cfg.contains("PublicKey = server-public"));
        assert!(cfg.contains("Endpoint = vpn1.example.com:51820"));
        assert!(cfg.contains("AllowedIPs = 0.0.0.0/0"));
    }

    #[test]
    fn client_config_requires_peer_private_key() {
        let iface = iface_with_peers();
        let (name, peer) = iface.named_peers().nth(1).unwrap();
        let err = build_wg_peer_cfg(name, peer, &iface, "vpn1.example.com").unwrap_err();
        assert!(matches!(
            err,
            FleetError::Config(ConfigError::MissingPeerField {
                field: "private_key",
                ..
            })
        ));
    }
}
