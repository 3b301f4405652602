use std::collections::HashMap;
use std::net::IpAddr;

use crate::zone::ZoneContents;

/// Replaces the differ's in-band sentinels (empty-string CNAME target,
/// `0.0.0.0` address) with a proper tagged variant. Wire encoding of a
/// `Delete` (class ANY, TTL 0) happens only where C3 builds the update
/// message, never inside the reconciliation engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change<T> {
    Set(T),
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub a_records: HashMap<String, Change<IpAddr>>,
    pub cname_records: HashMap<String, Change<String>>,
}

/// C6: layers `suggested` under `canonical` — an entry from `suggested` is
/// kept only if `canonical` has nothing under that name. Applied to both
/// maps independently. Used to fold peer contributions under the local
/// one, and the whole merged result under `default_zone`.
pub fn merge(canonical: &ZoneContents, suggested: &ZoneContents) -> ZoneContents {
    let mut merged = canonical.clone();

    for (name, ip) in &suggested.a_records {
        merged.a_records.entry(name.clone()).or_insert(*ip);
    }
    for (name, target) in &suggested.cname_records {
        merged.cname_records.entry(name.clone()).or_insert_with(|| target.clone());
    }

    merged
}

/// C6: the set of writes needed to turn `before` into `after`.
pub fn diff(before: &ZoneContents, after: &ZoneContents) -> Delta {
    let mut delta = Delta::default();

    for (name, ip) in &before.a_records {
        match after.a_records.get(name) {
            None => {
                delta.a_records.insert(name.clone(), Change::Delete);
            }
            Some(new_ip) if new_ip != ip => {
                delta.a_records.insert(name.clone(), Change::Set(*new_ip));
            }
            _ => {}
        }
    }
    for (name, ip) in &after.a_records {
        if !before.a_records.contains_key(name) {
            delta.a_records.insert(name.clone(), Change::Set(*ip));
        }
    }

    for (name, target) in &before.cname_records {
        match after.cname_records.get(name) {
            None => {
                delta.cname_records.insert(name.clone(), Change::Delete);
            }
            Some(new_target) if new_target != target => {
                delta.cname_records.insert(name.clone(), Change::Set(new_target.clone()));
            }
            _ => {}
        }
    }
    for (name, target) in &after.cname_records {
        if !before.cname_records.contains_key(name) {
            delta.cname_records.insert(name.clone(), Change::Set(target.clone()));
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(a: &[(&str, &str)], cname: &[(&str, &str)]) -> ZoneContents {
        ZoneContents {
            a_records: a.iter().map(|(n, ip)| (n.to_string(), ip.parse().unwrap())).collect(),
            cname_records: cname.iter().map(|(n, t)| (n.to_string(), t.to_string())).collect(),
        }
    }

    #[test]
    fn merge_prefers_canonical_on_conflict() {
        let canonical = contents(&[], &[("alice.rdvu.example.com.", "alice.west.example.com.")]);
        let suggested = contents(&[], &[("alice.rdvu.example.com.", "alice.east.example.com.")]);
        let merged = merge(&canonical, &suggested);
        assert_eq!(
            merged.cname_records.get("alice.rdvu.example.com."),
            Some(&"alice.west.example.com.".to_string())
        );
    }

    #[test]
    fn merge_adds_names_absent_from_canonical() {
        let canonical = contents(&[], &[]);
        let suggested = contents(&[], &[("carol.rdvu.example.com.", "carol.east.example.com.")]);
        let merged = merge(&canonical, &suggested);
        assert_eq!(merged.cname_records.len(), 1);
    }

    #[test]
    fn diff_is_empty_for_identical_zones() {
        let z = contents(&[("a.example.com.", "10.0.0.1")], &[("b.example.com.", "c.example.com.")]);
        let delta = diff(&z, &z);
        assert!(delta.a_records.is_empty());
        assert!(delta.cname_records.is_empty());
    }

    #[test]
    fn diff_emits_delete_for_removed_name() {
        let before = contents(&[], &[("alice.rdvu.example.com.", "alice.west.example.com.")]);
        let after = contents(&[], &[]);
        let delta = diff(&before, &after);
        assert_eq!(delta.cname_records.get("alice.rdvu.example.com."), Some(&Change::Delete));
    }

    #[test]
    fn diff_round_trips_before_into_after() {
        let before = contents(&[], &[("a.example.com.", "1.example.com."), ("b.example.com.", "2.example.com.")]);
        let after = contents(&[], &[("a.example.com.", "1.example.com."), ("c.example.com.", "3.example.com.")]);

        let delta = diff(&before, &after);
        let mut applied = before.clone();
        for (name, change) in &delta.cname_records {
            match change {
                Change::Set(target) => {
                    applied.cname_records.insert(name.clone(), target.clone());
                }
                Change::Delete => {
                    applied.cname_records.remove(name);
                }
            }
        }

        assert_eq!(applied, after);
    }
}
