//! Named remote commands.
//!
//! A fixed table of the Linux commands the instructions run on managed
//! hosts, each optionally paired with a parser that turns its raw output
//! into a structured tree.

use std::sync::OnceLock;

use crate::parser::{ParseOutcome, TextParser};

pub struct CommandSpec {
    pub name: &'static str,
    pub cmd: &'static str,
    pub parser: Option<fn(&str) -> ParseOutcome>,
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "GET_UPTIME",
        cmd: "uptime -s",
        parser: None,
    },
    CommandSpec {
        name: "WIREGUARD_SVC_STATUS",
        cmd: "systemctl status wg-quick@wg0",
        parser: None,
    },
    CommandSpec {
        name: "WG_SHOW",
        cmd: "wg show",
        parser: Some(parse_wg_show),
    },
    CommandSpec {
        name: "APT_UPDATE_UPGRADE",
        cmd: "apt-get update && apt-get -y upgrade",
        parser: None,
    },
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Parse `wg show` output into `{interface-or-peer-tag: {key: value}}`.
///
/// `interface:` and `peer:` lines open blocks tagged by the interface name
/// or peer public key; the indented `key: value` lines below them become
/// that block's leaves.
fn parse_wg_show(text: &str) -> ParseOutcome {
    static PARSER: OnceLock<TextParser> = OnceLock::new();
    PARSER
        .get_or_init(|| {
            TextParser::new(&[
                r"^(?:interface|peer):\s+(\S+)$",
                r"^([^:]+):\s+(.+)$",
            ])
            .expect("hard-coded wg show patterns are valid")
        })
        .parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_commands() {
        assert_eq!(lookup("GET_UPTIME").unwrap().cmd, "uptime -s");
        assert!(lookup("WG_SHOW").unwrap().parser.is_some());
        assert!(lookup("NO_SUCH_COMMAND").is_none());
    }

    #[test]
    fn wg_show_output_parses_into_interface_and_peer_blocks() {
        let text = "\
interface: wg0
  public key: c2VydmVyCg==
  listening port: 51820

peer: bGFwdG9wCg==
  endpoint: 192.0.2.10:51820
  latest handshake: 1 minute, 5 seconds ago
  transfer: 1.21 MiB received, 4.8 MiB sent

peer: cGhvbmUK
  endpoint: 192.0.2.11:51820
";
        let outcome = parse_wg_show(text);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.tree.len(), 3);

        let wg0 = outcome.tree["wg0"].as_block().unwrap();
        assert_eq!(wg0["listening port"].as_str(), Some("51820"));

        let laptop = outcome.tree["bGFwdG9wCg=="].as_block().unwrap();
        assert_eq!(
            laptop["latest handshake"].as_str(),
            Some("1 minute, 5 seconds ago")
        );
        let phone = outcome.tree["cGhvbmUK"].as_block().unwrap();
        assert_eq!(phone["endpoint"].as_str(), Some("192.0.2.11:51820"));
    }
}
