use ipnetwork::IpNetwork;

use crate::config::Config;
use crate::zone::{canonicalize, is_subdomain_of, ZoneContents};

/// Rewrites `name`'s trailing `old_suffix` to `new_suffix`, e.g.
/// `alice.west.example.com.` under suffix `west.example.com.` becomes
/// `alice.rdvu.example.com.` under `rdvu.example.com.`.
fn replace_suffix(name: &str, old_suffix: &str, new_suffix: &str) -> String {
    let prefix = name.strip_suffix(old_suffix).unwrap_or(name);
    canonicalize(&format!("{}{}", prefix, new_suffix))
}

fn contained_in_any(ip: std::net::IpAddr, nets: &[IpNetwork]) -> bool {
    nets.iter().any(|net| net.contains(ip))
}

/// C5: maps the local primary's address records into rendezvous CNAMEs,
/// restricted to names under the local suffix whose address is actually
/// reachable from one of this site's local networks.
pub fn transpose_primary(local_zone: &ZoneContents, config: &Config) -> ZoneContents {
    let mut out = ZoneContents::default();

    for (name, ip) in &local_zone.a_records {
        if is_subdomain_of(name, &config.local_zone.suffix) && contained_in_any(*ip, &config.local_nets) {
            let rdvu_name = replace_suffix(name, &config.local_zone.suffix, &config.search_suffix);
            out.cname_records.insert(rdvu_name, canonicalize(name));
        }
    }

    out
}

/// C5: same mapping for a peer's Zone, without the local-network filter —
/// the peer already applied it on its own side before publishing.
pub fn transpose_peer(peer_zone: &ZoneContents, peer_suffix: &str, search_suffix: &str) -> ZoneContents {
    let mut out = ZoneContents::default();

    for (name, _ip) in &peer_zone.a_records {
        if is_subdomain_of(name, peer_suffix) {
            let rdvu_name = replace_suffix(name, peer_suffix, search_suffix);
            out.cname_records.insert(rdvu_name, canonicalize(name));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZonePeer;
    use std::net::IpAddr;

    fn config(local_nets: Vec<&str>) -> Config {
        Config {
            local_nets: local_nets.iter().map(|n| n.parse().unwrap()).collect(),
            local_zone: ZonePeer {
                suffix: "west.example.com.".to_string(),
                server: "10.1.0.1".parse().unwrap(),
            },
            search_suffix: "rdvu.example.com.".to_string(),
            peers: vec![],
            bind_address: "10.1.0.2".parse().unwrap(),
            ttl: 3600,
        }
    }

    #[test]
    fn transpose_primary_filters_by_suffix_and_local_net() {
        let config = config(vec!["10.1.0.0/16"]);
        let mut local = ZoneContents::default();
        local.a_records.insert("alice.west.example.com.".into(), "10.1.0.5".parse::<IpAddr>().unwrap());
        local.a_records.insert("bob.west.example.com.".into(), "192.0.2.9".parse::<IpAddr>().unwrap());
        local.a_records.insert("carol.east.example.com.".into(), "10.1.0.9".parse::<IpAddr>().unwrap());

        let out = transpose_primary(&local, &config);

        assert_eq!(out.cname_records.len(), 1);
        assert_eq!(
            out.cname_records.get("alice.rdvu.example.com."),
            Some(&"alice.west.example.com.".to_string())
        );
        assert!(out.a_records.is_empty());
    }

    #[test]
    fn transpose_peer_ignores_local_net_filter() {
        let mut peer = ZoneContents::default();
        peer.a_records.insert("carol.east.example.com.".into(), "203.0.113.7".parse::<IpAddr>().unwrap());

        let out = transpose_peer(&peer, "east.example.com.", "rdvu.example.com.");

        assert_eq!(
            out.cname_records.get("carol.rdvu.example.com."),
            Some(&"carol.east.example.com.".to_string())
        );
    }
}
