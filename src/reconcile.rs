//! C7: the reconciliation loop. Owns every zone Hive tracks, runs the
//! startup transfer sequence, and recomputes the rendezvous zone whenever a
//! peer proposes a change through the [`Callbacks`] hooks C4 drives.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Utc};

use crate::client::{read_zone, write_update, Mapping};
use crate::config::Config;
use crate::error::Result;
use crate::key::TsigKey;
use crate::merge::{diff, merge, Change};
use crate::server::Callbacks;
use crate::transpose::{transpose_peer, transpose_primary};
use crate::zone::{canonicalize, Zone, ZoneContents};

struct Inner {
    config: Arc<Config>,
    key: Arc<TsigKey>,
    primary_zone: Arc<Zone>,
    rendezvous_zone: Arc<Zone>,
    peer_zones: Vec<Arc<Zone>>,
    default_zone: Arc<Zone>,
    zone_by_server: HashMap<IpAddr, Arc<Zone>>,
    zone_by_name: HashMap<String, Arc<Zone>>,
    zone_name_by_server: HashMap<IpAddr, String>,
    update_rev: Mutex<HashMap<String, u32>>,
    last_serial: Mutex<HashMap<String, u32>>,
    reconcile_lock: tokio::sync::Mutex<()>,
}

/// A cheap-to-clone handle onto the single reconciliation engine a running
/// Hive node owns. Cloned into the C4 server and into the tasks it spawns in
/// response to peer updates.
#[derive(Clone)]
pub struct Hive(Arc<Inner>);

impl Hive {
    pub fn new(config: Arc<Config>, key: Arc<TsigKey>) -> Hive {
        let primary_zone = Arc::new(Zone::empty(Some(config.local_zone.server)));
        let rendezvous_zone = Arc::new(Zone::empty(Some(config.bind_address)));
        let default_zone = Arc::new(Zone::empty(None));
        let peer_zones: Vec<Arc<Zone>> = config
            .peers
            .iter()
            .map(|peer| Arc::new(Zone::empty(Some(peer.server))))
            .collect();

        let mut zone_by_server = HashMap::new();
        zone_by_server.insert(config.local_zone.server, primary_zone.clone());
        for (peer, zone) in config.peers.iter().zip(peer_zones.iter()) {
            zone_by_server.insert(peer.server, zone.clone());
        }

        let mut zone_by_name = HashMap::new();
        zone_by_name.insert(config.local_zone.suffix.clone(), primary_zone.clone());
        zone_by_name.insert(config.search_suffix.clone(), rendezvous_zone.clone());
        for (peer, zone) in config.peers.iter().zip(peer_zones.iter()) {
            zone_by_name.insert(peer.suffix.clone(), zone.clone());
        }

        let mut zone_name_by_server = HashMap::new();
        zone_name_by_server.insert(config.local_zone.server, config.local_zone.suffix.clone());
        for peer in &config.peers {
            zone_name_by_server.insert(peer.server, peer.suffix.clone());
        }

        Hive(Arc::new(Inner {
            config,
            key,
            primary_zone,
            rendezvous_zone,
            peer_zones,
            default_zone,
            zone_by_server,
            zone_by_name,
            zone_name_by_server,
            update_rev: Mutex::new(HashMap::new()),
            last_serial: Mutex::new(HashMap::new()),
            reconcile_lock: tokio::sync::Mutex::new(()),
        }))
    }

    /// The five-step startup sequence: transfer the local suffix (fatal if
    /// it fails — without it Hive has nothing to publish), transfer the
    /// rendezvous zone back from itself (non-fatal; a cold start has none
    /// yet), transfer each peer (non-fatal per peer), then run an initial
    /// reconciliation if the rendezvous transfer came back empty-handed.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.0;

        let primary_contents = read_zone(inner.config.local_zone.server, &inner.key.key, &inner.config.local_zone.suffix).await?;
        inner.primary_zone.replace(primary_contents);
        log::info!(target: "reconcile", "transferred local zone {}", inner.config.local_zone.suffix);

        let mut initial_update_required = false;
        match read_zone(inner.config.bind_address, &inner.key.key, &inner.config.search_suffix).await {
            Ok(contents) => inner.rendezvous_zone.replace(contents),
            Err(e) => {
                log::warn!(target: "reconcile", "no existing rendezvous zone ({}), starting cold", e);
                initial_update_required = true;
            }
        }

        for (peer, zone) in inner.config.peers.iter().zip(inner.peer_zones.iter()) {
            match read_zone(peer.server, &inner.key.key, &peer.suffix).await {
                Ok(contents) => zone.replace(contents),
                Err(e) => log::warn!(target: "reconcile", "initial transfer from peer {} failed: {}", peer.suffix, e),
            }
        }

        if initial_update_required {
            self.reconcile().await;
        }

        Ok(())
    }

    /// C5/C6 composed: transpose the primary and every peer into rendezvous
    /// CNAMEs, then fold them together in priority order (primary wins,
    /// then peers in config order, then the default zone as last resort).
    fn compute_merged(&self) -> ZoneContents {
        let inner = &self.0;

        let mut merged = transpose_primary(&inner.primary_zone.snapshot(), &inner.config);
        for (peer, zone) in inner.config.peers.iter().zip(inner.peer_zones.iter()) {
            let contributed = transpose_peer(&zone.snapshot(), &peer.suffix, &inner.config.search_suffix);
            merged = merge(&merged, &contributed);
        }
        merge(&merged, &inner.default_zone.snapshot())
    }

    /// Recomputes the rendezvous zone from primary + peers + default, and
    /// writes out only the CNAME changes that result. A/AAAA records never
    /// leave the rendezvous server; they are consumed locally for diffing
    /// and for test inspection only.
    async fn reconcile(&self) {
        let inner = &self.0;
        let _guard = inner.reconcile_lock.lock().await;

        let merged = self.compute_merged();
        let before = inner.rendezvous_zone.snapshot();
        let delta = diff(&before, &merged);

        if delta.cname_records.is_empty() {
            return;
        }

        *inner
            .update_rev
            .lock()
            .unwrap()
            .entry(inner.config.search_suffix.clone())
            .or_insert(0) += 1;

        for (name, change) in &delta.cname_records {
            let mapping = Mapping::Cname(change.clone());
            if let Err(e) = write_update(
                inner.config.bind_address,
                inner.config.ttl,
                &inner.key.key,
                name,
                mapping,
                &inner.config.search_suffix,
            )
            .await
            {
                log::error!(target: "reconcile", "update of {} failed, aborting reconciliation: {}", name, e);
                return;
            }
        }

        inner.rendezvous_zone.replace(merged);
        log::info!(target: "reconcile", "rendezvous zone updated with {} change(s)", delta.cname_records.len());
    }

    fn zone_for_server(&self, proposer: IpAddr) -> Arc<Zone> {
        self.0
            .zone_by_server
            .get(&proposer)
            .cloned()
            .unwrap_or_else(|| self.0.default_zone.clone())
    }

    fn zone_for_name(&self, zone_name: &str) -> Arc<Zone> {
        self.0
            .zone_by_name
            .get(zone_name)
            .cloned()
            .unwrap_or_else(|| self.0.rendezvous_zone.clone())
    }

    /// The zone suffix `on_serial`/`reconcile` key their counters by, for the
    /// zone a proposer's address resolves to. `None` for an unrecognized
    /// proposer — its changes land in the default zone, which is never
    /// transferred out, so there is no serial to bump.
    fn zone_name_for_server(&self, proposer: IpAddr) -> Option<&str> {
        self.0.zone_name_by_server.get(&proposer).map(String::as_str)
    }

    fn bump_rev(&self, zone_name: &str) {
        *self.0.update_rev.lock().unwrap().entry(zone_name.to_string()).or_insert(0) += 1;
    }

    fn spawn_reconcile(&self) {
        let hive = self.clone();
        tokio::spawn(async move { hive.reconcile().await });
    }
}

impl Callbacks for Hive {
    fn on_cname(&self, proposer: IpAddr, name: &str, target: &str) {
        let zone = self.zone_for_server(proposer);
        let name = canonicalize(name);

        if zone.set_cname(&name, target) {
            if let Some(zone_name) = self.zone_name_for_server(proposer) {
                self.bump_rev(zone_name);
            }
            self.spawn_reconcile();
        }
    }

    fn on_a(&self, proposer: IpAddr, name: &str, addr: IpAddr) {
        let zone = self.zone_for_server(proposer);
        let name = canonicalize(name);

        if zone.set_a(&name, addr) {
            if let Some(zone_name) = self.zone_name_for_server(proposer) {
                self.bump_rev(zone_name);
            }
            self.spawn_reconcile();
        }
    }

    fn on_aaaa(&self, proposer: IpAddr, name: &str, addr: IpAddr) {
        self.on_a(proposer, name, addr);
    }

    /// Synthesizes a date-stamped SOA serial for `zone_name`, then hardens it
    /// against clock skew and restarts: the emitted value never goes
    /// backwards, even if the computed date-serial would be lower than the
    /// last one handed out for this zone.
    fn on_serial(&self, zone_name: &str) -> u32 {
        let rev = self
            .0
            .update_rev
            .lock()
            .unwrap()
            .get(zone_name)
            .copied()
            .unwrap_or(0)
            .min(9999);

        let now = Utc::now();
        let computed = ((now.year() as u32 % 100) * 10000 + now.month() * 100 + now.day()) * 10000 + rev;

        let mut last_serial = self.0.last_serial.lock().unwrap();
        let next = match last_serial.get(zone_name) {
            Some(&last) if last >= computed => last + 1,
            _ => computed,
        };
        last_serial.insert(zone_name.to_string(), next);
        next
    }

    fn on_transfer(&self, zone_name: &str) -> ZoneContents {
        self.zone_for_name(zone_name).snapshot()
    }
}
