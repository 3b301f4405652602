//! C4: the peer-facing DNS server. Every rendezvous node runs this on UDP and
//! TCP port 53, accepting TSIG-signed RFC 2136 updates from peers and serving
//! TSIG-signed AXFR zone transfers back out. TSIG verification lives here —
//! inline, not in a middleware stack — because both request kinds it guards
//! (UPDATE, AXFR) dispatch straight into the reconciliation callbacks below.

use core::future::{ready, Future};
use std::net::IpAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use domain::base::iana::{Class, Rcode, Rtype};
use domain::base::name::ParsedName;
use domain::base::{Message, Name, Serial, Ttl};
use domain::net::server::message::Request;
use domain::net::server::service::{CallResult, Service, ServiceError, ServiceResult};
use domain::net::server::util::mk_builder_for_target;
use domain::rdata::tsig::Time48;
use domain::rdata::{AllRecordData, Soa, ZoneRecordData};
use domain::tsig::{ServerSequence, ServerTransaction};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{once, Stream};

use crate::key::KeyStore;
use crate::metric::Stats;
use crate::zone::{canonicalize, ZoneContents};

/// The five hooks C7 wires into this server so it never has to know about
/// sockets, TSIG, or wire formats, and C4 never has to know about merging.
pub trait Callbacks: Send + Sync {
    fn on_cname(&self, proposer: IpAddr, name: &str, target: &str);
    fn on_a(&self, proposer: IpAddr, name: &str, addr: IpAddr);
    fn on_aaaa(&self, proposer: IpAddr, name: &str, addr: IpAddr);
    fn on_serial(&self, zone_name: &str) -> u32;
    fn on_transfer(&self, zone_name: &str) -> ZoneContents;
}

#[derive(Clone)]
pub struct PeerServer<C> {
    keystore: Arc<KeyStore>,
    callbacks: Arc<C>,
    stats: Arc<RwLock<Stats>>,
    ttl: u32,
}

impl<C: Callbacks + 'static> PeerServer<C> {
    pub fn new(keystore: Arc<KeyStore>, callbacks: Arc<C>, stats: Arc<RwLock<Stats>>, ttl: u32) -> Self {
        PeerServer {
            keystore,
            callbacks,
            stats,
            ttl,
        }
    }

    fn handle_single(&self, request: &Request<Vec<u8>>) -> ServiceResult<Vec<u8>> {
        let mut message = request.message().clone();
        let message = Arc::make_mut(&mut message);

        match ServerTransaction::request::<KeyStore, Vec<u8>>(&self.keystore, message, Time48::now()) {
            Ok(Some(transaction)) => {
                self.stats.write().unwrap().record_request();

                let rcode = match self.dispatch_update(message, request.client_addr().ip()) {
                    Ok(()) => Rcode::NOERROR,
                    Err(()) => Rcode::SERVFAIL,
                };

                let builder = mk_builder_for_target();
                let mut answer = builder
                    .start_answer(message, rcode)
                    .map_err(|_| ServiceError::InternalError)?;
                let mut additional = answer.additional();
                if transaction.answer(&mut additional, Time48::now()).is_err() {
                    return Err(ServiceError::InternalError);
                }
                Ok(CallResult::new(additional))
            }
            _ => {
                self.stats.write().unwrap().record_tsig_failure();
                log::warn!(target: "server", "tsig verification failed for request from {}", request.client_addr());
                let builder = mk_builder_for_target();
                let answer = builder
                    .start_answer(message, Rcode::NOERROR)
                    .map_err(|_| ServiceError::InternalError)?;
                Ok(CallResult::new(answer.additional()))
            }
        }
    }

    /// Scans the authority section for the A/AAAA/CNAME RRs a peer proposes
    /// and hands each one to the matching callback. Other rrtypes and
    /// deletion semantics (class ANY) in inbound updates are ignored.
    fn dispatch_update(&self, message: &Message<Vec<u8>>, proposer: IpAddr) -> Result<(), ()> {
        self.stats.write().unwrap().record_update();

        let authority = message.authority().map_err(|_| ())?;
        for rr in authority {
            let rr = rr.map_err(|_| ())?;
            let Some(record) = rr.to_record::<AllRecordData<Bytes, ParsedName<Bytes>>>().map_err(|_| ())? else {
                continue;
            };

            if record.class() != Class::IN {
                continue;
            }

            let owner = canonicalize(&record.owner().to_string());

            match record.data() {
                AllRecordData::A(a) => self.callbacks.on_a(proposer, &owner, IpAddr::V4(a.addr())),
                AllRecordData::Aaaa(aaaa) => self.callbacks.on_aaaa(proposer, &owner, IpAddr::V6(aaaa.addr())),
                AllRecordData::Cname(cname) => self.callbacks.on_cname(proposer, &owner, &canonicalize(&cname.cname().to_string())),
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_axfr(&self, request: Request<Vec<u8>>, sender: UnboundedSender<ServiceResult<Vec<u8>>>) {
        let server = self.clone();

        tokio::spawn(async move {
            let mut message = request.message().clone();
            let message = Arc::make_mut(&mut message);

            let mut sequence = match ServerSequence::request::<KeyStore, Vec<u8>>(&server.keystore, message, Time48::now()) {
                Ok(Some(sequence)) => sequence,
                _ => {
                    server.stats.write().unwrap().record_tsig_failure();
                    log::warn!(target: "server", "tsig verification failed for axfr from {}", request.client_addr());
                    if let Ok(answer) = mk_builder_for_target().start_answer(message, Rcode::NOERROR) {
                        let _ = sender.unbounded_send(Ok(CallResult::new(answer.additional())));
                    }
                    return;
                }
            };

            let Ok(question) = message.sole_question() else { return };
            let zone_name = canonicalize(&question.qname().to_string());

            server.stats.write().unwrap().record_transfer();

            let contents = server.callbacks.on_transfer(&zone_name);
            if contents.a_records.is_empty() && contents.cname_records.is_empty() {
                if let Ok(answer) = mk_builder_for_target().start_answer(message, Rcode::NOTAUTH) {
                    let mut additional = answer.additional();
                    if sequence.answer(&mut additional, Time48::now()).is_ok() {
                        let _ = sender.unbounded_send(Ok(CallResult::new(additional)));
                    }
                }
                return;
            }

            let serial = server.callbacks.on_serial(&zone_name);
            let soa = build_soa(&zone_name, serial, server.ttl);

            let mut records: Vec<(Name<Bytes>, ZoneRecordData<Bytes, Name<Bytes>>)> =
                Vec::with_capacity(contents.a_records.len() + contents.cname_records.len());
            for (name, ip) in &contents.a_records {
                let Ok(name) = Name::<Bytes>::from_str(name) else { continue };
                let data = match ip {
                    IpAddr::V4(v4) => ZoneRecordData::A(domain::rdata::A::new(*v4)),
                    IpAddr::V6(v6) => ZoneRecordData::Aaaa(domain::rdata::Aaaa::new(*v6)),
                };
                records.push((name, data));
            }
            for (name, target) in &contents.cname_records {
                let (Ok(name), Ok(target)) = (Name::<Bytes>::from_str(name), Name::<Bytes>::from_str(target)) else {
                    continue;
                };
                records.push((name, ZoneRecordData::Cname(domain::rdata::Cname::new(target))));
            }

            let soa_name = Name::<Bytes>::from_str(&zone_name).unwrap_or_else(|_| Name::root());
            let soa_rr = (soa_name.clone(), ZoneRecordData::Soa(soa.clone()));

            send_envelope(&server, message, &mut sequence, std::slice::from_ref(&soa_rr), &sender);
            for chunk in records.chunks(64) {
                send_envelope(&server, message, &mut sequence, chunk, &sender);
            }
            send_envelope(&server, message, &mut sequence, std::slice::from_ref(&soa_rr), &sender);
        });
    }
}

fn send_envelope<C: Callbacks>(
    server: &PeerServer<C>,
    orig: &Message<Vec<u8>>,
    sequence: &mut ServerSequence<Arc<domain::tsig::Key>>,
    records: &[(Name<Bytes>, ZoneRecordData<Bytes, Name<Bytes>>)],
    sender: &UnboundedSender<ServiceResult<Vec<u8>>>,
) {
    let builder = mk_builder_for_target();
    let Ok(mut answer) = builder.start_answer(orig, Rcode::NOERROR) else { return };
    for (name, data) in records {
        let _ = answer.push((name.clone(), Ttl::from_secs(server.ttl), data.clone()));
    }
    let mut additional = answer.additional();
    if sequence.answer(&mut additional, Time48::now()).is_err() {
        return;
    }
    let _ = sender.unbounded_send(Ok(CallResult::new(additional)));
}

fn build_soa(zone_name: &str, serial: u32, ttl: u32) -> Soa<Name<Bytes>> {
    let ns = Name::<Bytes>::from_str(&format!("ns.{}", zone_name)).unwrap_or_else(|_| Name::root());
    Soa::new(
        ns.clone(),
        ns,
        Serial::from(serial),
        Ttl::from_secs(ttl),
        Ttl::from_secs(ttl / 10),
        Ttl::from_secs(ttl.saturating_mul(2)),
        Ttl::from_secs(ttl.saturating_mul(2)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::iana::Opcode;
    use domain::base::{MessageBuilder, Question};
    use domain::rdata::{Aaaa, Cname, A};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        a: Mutex<Vec<(IpAddr, String, IpAddr)>>,
        aaaa: Mutex<Vec<(IpAddr, String, IpAddr)>>,
        cname: Mutex<Vec<(IpAddr, String, String)>>,
        transfer: ZoneContents,
    }

    impl Callbacks for RecordingCallbacks {
        fn on_cname(&self, proposer: IpAddr, name: &str, target: &str) {
            self.cname.lock().unwrap().push((proposer, name.to_string(), target.to_string()));
        }

        fn on_a(&self, proposer: IpAddr, name: &str, addr: IpAddr) {
            self.a.lock().unwrap().push((proposer, name.to_string(), addr));
        }

        fn on_aaaa(&self, proposer: IpAddr, name: &str, addr: IpAddr) {
            self.aaaa.lock().unwrap().push((proposer, name.to_string(), addr));
        }

        fn on_serial(&self, _zone_name: &str) -> u32 {
            1
        }

        fn on_transfer(&self, _zone_name: &str) -> ZoneContents {
            self.transfer.clone()
        }
    }

    fn update_message(push: impl FnOnce(&mut domain::base::message_builder::AuthorityBuilder<Vec<u8>>)) -> Message<Vec<u8>> {
        let zone = Name::<Bytes>::from_str("rdvu.example.com.").unwrap();
        let mut builder = MessageBuilder::new_vec();
        builder.header_mut().set_opcode(Opcode::UPDATE);
        builder.push(Question::new_in(&zone, Rtype::SOA)).unwrap();
        let mut builder = builder.authority();
        push(&mut builder);
        Message::from_octets(builder.finish()).unwrap()
    }

    fn owner() -> Name<Bytes> {
        Name::<Bytes>::from_str("alice.rdvu.example.com.").unwrap()
    }

    #[test]
    fn dispatch_update_classifies_a_record_set() {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let keystore = Arc::new(KeyStore::new(test_key()));
        let server = PeerServer::new(keystore, callbacks.clone(), Stats::new_shared(), 3600);

        let message = update_message(|builder| {
            builder
                .push((owner(), Class::IN, Ttl::from_secs(3600), ZoneRecordData::<Bytes, Name<Bytes>>::A(A::new("10.1.0.5".parse().unwrap()))))
                .unwrap();
        });

        server.dispatch_update(&message, "10.1.0.1".parse().unwrap()).unwrap();

        let recorded = callbacks.a.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, "alice.rdvu.example.com.");
        assert_eq!(recorded[0].2, "10.1.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn dispatch_update_classifies_aaaa_record_set() {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let keystore = Arc::new(KeyStore::new(test_key()));
        let server = PeerServer::new(keystore, callbacks.clone(), Stats::new_shared(), 3600);

        let message = update_message(|builder| {
            builder
                .push((
                    owner(),
                    Class::IN,
                    Ttl::from_secs(3600),
                    ZoneRecordData::<Bytes, Name<Bytes>>::Aaaa(Aaaa::new("2001:db8::5".parse().unwrap())),
                ))
                .unwrap();
        });

        server.dispatch_update(&message, "10.1.0.1".parse().unwrap()).unwrap();

        let recorded = callbacks.aaaa.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].2, "2001:db8::5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn dispatch_update_ignores_class_any_deletion_attempts() {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let keystore = Arc::new(KeyStore::new(test_key()));
        let server = PeerServer::new(keystore, callbacks.clone(), Stats::new_shared(), 3600);

        let empty = domain::rdata::UnknownRecordData::from_octets(Rtype::CNAME, Bytes::new()).unwrap();
        let message = update_message(|builder| {
            builder
                .push((owner(), Class::ANY, Ttl::from_secs(0), ZoneRecordData::<Bytes, Name<Bytes>>::Unknown(empty)))
                .unwrap();
        });

        server.dispatch_update(&message, "10.1.0.1".parse().unwrap()).unwrap();

        assert!(callbacks.cname.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_update_classifies_cname_set() {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let keystore = Arc::new(KeyStore::new(test_key()));
        let server = PeerServer::new(keystore, callbacks.clone(), Stats::new_shared(), 3600);

        let target = Name::<Bytes>::from_str("alice.west.example.com.").unwrap();
        let message = update_message(|builder| {
            builder
                .push((owner(), Class::IN, Ttl::from_secs(3600), ZoneRecordData::<Bytes, Name<Bytes>>::Cname(Cname::new(target))))
                .unwrap();
        });

        server.dispatch_update(&message, "10.1.0.1".parse().unwrap()).unwrap();

        let recorded = callbacks.cname.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].2, "alice.west.example.com.".to_string());
    }

    #[test]
    fn build_soa_uses_date_stamped_serial_and_ttl_derived_timers() {
        let soa = build_soa("rdvu.example.com.", 2608010001, 3600);
        assert_eq!(soa.serial(), Serial::from(2608010001));
        assert_eq!(soa.refresh(), Ttl::from_secs(3600));
        assert_eq!(soa.retry(), Ttl::from_secs(360));
        assert_eq!(soa.expire(), Ttl::from_secs(7200));
        assert_eq!(soa.minimum(), Ttl::from_secs(7200));
    }

    fn test_key() -> Arc<domain::tsig::Key> {
        Arc::new(domain::tsig::Key::new(domain::tsig::Algorithm::Sha256, b"secretsecretsecretsecret", "hive.".parse().unwrap(), None, Some(300)).unwrap())
    }
}

impl<C: Callbacks + 'static> Service<Vec<u8>> for PeerServer<C> {
    type Target = Vec<u8>;
    type Stream = Pin<Box<dyn Stream<Item = ServiceResult<Self::Target>> + Send>>;
    type Future = Pin<Box<dyn Future<Output = Self::Stream> + Send>>;

    fn call(&self, request: Request<Vec<u8>>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let is_axfr = matches!(
                request.message().sole_question().map(|q| q.qtype() == Rtype::AXFR && q.qclass() == Class::IN),
                Ok(true)
            );

            if !is_axfr {
                let result = server.handle_single(&request);
                return Box::pin(once(ready(result))) as Self::Stream;
            }

            let (sender, receiver) = unbounded();
            server.handle_axfr(request, sender);
            Box::pin(receiver) as Self::Stream
        })
    }
}
