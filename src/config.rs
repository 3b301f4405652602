use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::error::{Error, ErrorKind, Result};

/// A zone this Hive cares about: either the local primary or one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonePeer {
    pub suffix: String,
    pub server: IpAddr,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub local_nets: Vec<IpNetwork>,
    pub local_zone: ZonePeer,
    pub search_suffix: String,
    pub peers: Vec<ZonePeer>,
    pub bind_address: IpAddr,
    pub ttl: u32,
}

impl Config {
    /// Load and validate a configuration file from disk.
    pub fn load(path: &Path) -> Result<Config> {
        let bytes = std::fs::read(path)?;
        Config::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for Config {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let raw: RawConfig = serde_json::from_slice(bytes)?;
        raw.validate()
    }
}

#[derive(Deserialize)]
struct RawPeer {
    suffix: String,
    server: String,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "localNets", default)]
    local_nets: Vec<String>,
    #[serde(rename = "localZone")]
    local_zone: Option<RawPeer>,
    #[serde(rename = "searchSuffix")]
    search_suffix: String,
    #[serde(default)]
    peers: Vec<RawPeer>,
    #[serde(rename = "bindAddress", default)]
    bind_address: Option<String>,
    ttl: u32,
}

impl RawConfig {
    fn validate(self) -> Result<Config> {
        if self.ttl < 300 {
            return Err(Error::new(
                ErrorKind::Config,
                format!("ttl must be at least 300 seconds but got {}", self.ttl),
            ));
        }

        let local_zone = self
            .local_zone
            .ok_or_else(|| Error::new(ErrorKind::Config, "localZone must be specified"))?;
        let local_zone = ZonePeer {
            suffix: normalize_suffix(&local_zone.suffix),
            server: parse_server(&local_zone.suffix, &local_zone.server)?,
        };

        let mut local_nets = Vec::with_capacity(self.local_nets.len());
        for (idx, net) in self.local_nets.iter().enumerate() {
            let parsed: IpNetwork = net.parse().map_err(|e: ipnetwork::IpNetworkError| {
                Error::new(
                    ErrorKind::Cidr,
                    format!("local net {} with value '{}' invalid: {}", idx, net, e),
                )
            })?;
            local_nets.push(parsed);
        }

        let mut peers = Vec::with_capacity(self.peers.len());
        for (idx, peer) in self.peers.into_iter().enumerate() {
            let server = parse_server(&peer.suffix, &peer.server).map_err(|_| {
                Error::new(
                    ErrorKind::Addr,
                    format!("peer {} with server '{}' invalid", idx, peer.server),
                )
            })?;
            peers.push(ZonePeer {
                suffix: normalize_suffix(&peer.suffix),
                server,
            });
        }

        let bind_address = match self.bind_address {
            Some(addr) => addr
                .parse()
                .map_err(|e: std::net::AddrParseError| Error::new(ErrorKind::Addr, e.to_string()))?,
            None => IpAddr::from(std::net::Ipv4Addr::UNSPECIFIED),
        };

        Ok(Config {
            local_nets,
            local_zone,
            search_suffix: normalize_suffix(&self.search_suffix),
            peers,
            bind_address,
            ttl: self.ttl,
        })
    }
}

fn parse_server(suffix: &str, server: &str) -> Result<IpAddr> {
    server.parse().map_err(|e: std::net::AddrParseError| {
        Error::new(
            ErrorKind::Addr,
            format!("zone '{}' server address '{}' invalid: {}", suffix, server, e),
        )
    })
}

fn normalize_suffix(suffix: &str) -> String {
    let lower = suffix.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "localNets": ["10.1.0.0/16"],
        "localZone": { "suffix": "WEST.example.com.", "server": "10.1.0.1" },
        "searchSuffix": "rdvu.example.com",
        "peers": [ { "suffix": "east.example.com.", "server": "10.2.0.1" } ],
        "bindAddress": "10.1.0.2",
        "ttl": 3600
    }"#;

    #[test]
    fn parses_and_normalizes_suffixes() {
        let config = Config::try_from(VALID.as_bytes()).unwrap();
        assert_eq!(config.local_zone.suffix, "west.example.com.");
        assert_eq!(config.search_suffix, "rdvu.example.com.");
        assert_eq!(config.peers[0].suffix, "east.example.com.");
        assert_eq!(config.local_nets.len(), 1);
    }

    #[test]
    fn rejects_short_ttl() {
        let bad = VALID.replace("3600", "60");
        let err = Config::try_from(bad.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn rejects_missing_local_zone() {
        let bad = r#"{ "searchSuffix": "rdvu.example.com.", "ttl": 3600 }"#;
        let err = Config::try_from(bad.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn rejects_bad_cidr() {
        let bad = VALID.replace("10.1.0.0/16", "not-a-cidr");
        let err = Config::try_from(bad.as_bytes()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cidr);
    }

    #[test]
    fn defaults_bind_address_when_absent() {
        let no_bind = VALID.replace(r#""bindAddress": "10.1.0.2","#, "");
        let config = Config::try_from(no_bind.as_bytes()).unwrap();
        assert_eq!(config.bind_address, IpAddr::from(std::net::Ipv4Addr::UNSPECIFIED));
    }
}
