use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

/// Lowercases `name` and ensures a trailing dot, per the canonicalization
/// invariant every Zone-producing operation must uphold.
pub fn canonicalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('.') {
        lower
    } else {
        format!("{}.", lower)
    }
}

pub fn is_subdomain_of(name: &str, suffix: &str) -> bool {
    name == suffix || name.ends_with(&format!(".{}", suffix.trim_start_matches('.')))
}

/// A shallow copy of a Zone's two record maps, taken under lock for
/// iteration or for feeding into the transposer/differ.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneContents {
    pub a_records: HashMap<String, IpAddr>,
    pub cname_records: HashMap<String, String>,
}

/// A named container for one zone's rendezvous-relevant records.
///
/// Mutators hold the lock only long enough to compare and, if different,
/// write the proposed value. Snapshotting holds it for the whole clone so a
/// concurrent mutator can't interleave with an iteration.
#[derive(Debug)]
pub struct Zone {
    origin_server: Option<IpAddr>,
    contents: RwLock<ZoneContents>,
}

impl Zone {
    pub fn empty(origin_server: Option<IpAddr>) -> Zone {
        Zone {
            origin_server,
            contents: RwLock::new(ZoneContents::default()),
        }
    }

    pub fn from_contents(origin_server: Option<IpAddr>, contents: ZoneContents) -> Zone {
        Zone {
            origin_server,
            contents: RwLock::new(contents),
        }
    }

    pub fn origin_server(&self) -> Option<IpAddr> {
        self.origin_server
    }

    pub fn snapshot(&self) -> ZoneContents {
        self.contents.read().unwrap().clone()
    }

    /// Replaces the whole contents, as C7 does when it rebuilds the
    /// rendezvous zone after a reconciliation.
    pub fn replace(&self, contents: ZoneContents) {
        *self.contents.write().unwrap() = contents;
    }

    /// Inserts or updates an A/AAAA record. Returns `true` if the stored
    /// value changed (i.e. the name was absent or held a different IP).
    pub fn set_a(&self, name: &str, ip: IpAddr) -> bool {
        let name = canonicalize(name);
        let mut contents = self.contents.write().unwrap();
        if contents.a_records.get(&name) == Some(&ip) {
            false
        } else {
            contents.a_records.insert(name, ip);
            true
        }
    }

    /// Inserts or updates a CNAME record. Returns `true` if the stored
    /// value changed.
    pub fn set_cname(&self, name: &str, target: &str) -> bool {
        let name = canonicalize(name);
        let target = canonicalize(target);
        let mut contents = self.contents.write().unwrap();
        if contents.cname_records.get(&name) == Some(&target) {
            false
        } else {
            contents.cname_records.insert(name, target);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_and_adds_dot() {
        assert_eq!(canonicalize("Alice.WEST.example.com"), "alice.west.example.com.");
        assert_eq!(canonicalize("alice.west.example.com."), "alice.west.example.com.");
    }

    #[test]
    fn is_subdomain_of_matches_self_and_descendants() {
        assert!(is_subdomain_of("west.example.com.", "west.example.com."));
        assert!(is_subdomain_of("alice.west.example.com.", "west.example.com."));
        assert!(!is_subdomain_of("alice.east.example.com.", "west.example.com."));
    }

    #[test]
    fn set_a_reports_change_only_when_value_differs() {
        let zone = Zone::empty(None);
        let ip: IpAddr = "10.1.0.5".parse().unwrap();
        assert!(zone.set_a("alice.west.example.com.", ip));
        assert!(!zone.set_a("alice.west.example.com.", ip));
        let other: IpAddr = "10.1.0.6".parse().unwrap();
        assert!(zone.set_a("alice.west.example.com.", other));
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let zone = Zone::empty(None);
        zone.set_cname("alice.rdvu.example.com.", "alice.west.example.com.");
        let snap = zone.snapshot();
        zone.set_cname("bob.rdvu.example.com.", "bob.west.example.com.");
        assert_eq!(snap.cname_records.len(), 1);
        assert_eq!(zone.snapshot().cname_records.len(), 2);
    }
}
