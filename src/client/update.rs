use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use bytes::Bytes;
use domain::base::iana::{Class, Opcode, Rcode, Rtype};
use domain::base::{Message, MessageBuilder, Name, Question, Ttl};
use domain::net::client::request::{RequestMessage, SendRequest};
use domain::net::client::{self, protocol::UdpConnect};
use domain::rdata::{Aaaa, Cname, UnknownRecordData, ZoneRecordData, A};
use domain::tsig::Key;

use crate::error::{Error, ErrorKind, Result};
use crate::merge::Change;

/// The single record C3 writes or deletes in one exchange: an A/AAAA
/// address, or a CNAME (set or delete — Hive only ever deletes CNAMEs).
pub enum Mapping {
    A(Change<IpAddr>),
    Cname(Change<String>),
}

/// C3: `write_update(server, ttl, key, mapping, zone_name)`.
///
/// Builds a single-RR RFC 2136 update, signs it with TSIG and a 300s fudge,
/// and validates the (also TSIG-signed) reply. Any failure — connection,
/// malformed reply, or TSIG mismatch — is reported as an error; Hive never
/// retries from inside this call.
pub async fn write_update(server: IpAddr, ttl: u32, key: &Key, owner: &str, mapping: Mapping, zone_name: &str) -> Result<()> {
    let name = Name::<Bytes>::from_str(zone_name)
        .map_err(|e| Error::new(ErrorKind::Update, format!("invalid zone name '{}': {}", zone_name, e)))?;
    let owner = Name::<Bytes>::from_str(owner)
        .map_err(|e| Error::new(ErrorKind::Update, format!("invalid owner name '{}': {}", owner, e)))?;

    let mut builder = MessageBuilder::new_vec();
    builder.header_mut().set_opcode(Opcode::UPDATE);
    builder
        .push(Question::new_in(&name, Rtype::SOA))
        .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))?;

    let mut builder = builder.authority();
    push_mapping(&mut builder, &owner, &mapping, ttl)?;
    let message = Message::from_octets(builder.finish())
        .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))?;

    let addr = SocketAddr::new(server, 53);
    let udp_conn = UdpConnect::new(addr);
    let conn = client::dgram::Connection::new(udp_conn);
    let conn = client::tsig::Connection::new(key.clone(), conn);

    let request = RequestMessage::new(message).map_err(|e| Error::new(ErrorKind::Update, e.to_string()))?;
    let reply = conn
        .send_request(request)
        .get_response()
        .await
        .map_err(|e| Error::new(ErrorKind::Update, format!("tsig-signed update failed: {}", e)))?;

    if reply.header().rcode() != Rcode::NOERROR {
        return Err(Error::new(
            ErrorKind::Update,
            format!("update rejected with rcode {}", reply.header().rcode()),
        ));
    }

    Ok(())
}

fn push_mapping<Target>(
    builder: &mut domain::base::message_builder::AuthorityBuilder<Target>,
    name: &Name<Bytes>,
    mapping: &Mapping,
    ttl: u32,
) -> Result<()>
where
    Target: domain::base::wire::Composer + Default,
{
    match mapping {
        Mapping::A(Change::Set(IpAddr::V4(ip))) => builder
            .push((name.clone(), Class::IN, Ttl::from_secs(ttl), ZoneRecordData::A(A::new(*ip))))
            .map_err(|e| Error::new(ErrorKind::Update, e.to_string())),
        Mapping::A(Change::Set(IpAddr::V6(ip))) => builder
            .push((name.clone(), Class::IN, Ttl::from_secs(ttl), ZoneRecordData::Aaaa(Aaaa::new(*ip))))
            .map_err(|e| Error::new(ErrorKind::Update, e.to_string())),
        Mapping::Cname(Change::Set(target)) => {
            let target = Name::<Bytes>::from_str(target)
                .map_err(|e| Error::new(ErrorKind::Update, format!("invalid cname target: {}", e)))?;
            builder
                .push((name.clone(), Class::IN, Ttl::from_secs(ttl), ZoneRecordData::Cname(Cname::new(target))))
                .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))
        }
        Mapping::A(Change::Delete) => {
            let empty = UnknownRecordData::from_octets(Rtype::A, Bytes::new())
                .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))?;
            builder
                .push((name.clone(), Class::ANY, Ttl::from_secs(0), ZoneRecordData::Unknown(empty)))
                .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))
        }
        Mapping::Cname(Change::Delete) => {
            let empty = UnknownRecordData::from_octets(Rtype::CNAME, Bytes::new())
                .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))?;
            builder
                .push((name.clone(), Class::ANY, Ttl::from_secs(0), ZoneRecordData::Unknown(empty)))
                .map_err(|e| Error::new(ErrorKind::Update, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Name<Bytes> {
        Name::<Bytes>::from_str("alice.rdvu.example.com.").unwrap()
    }

    #[test]
    fn pushes_a_record_set() {
        let name = owner();
        let mut builder = MessageBuilder::new_vec().authority();
        let mapping = Mapping::A(Change::Set("10.1.0.5".parse().unwrap()));
        push_mapping(&mut builder, &name, &mapping, 3600).unwrap();
    }

    #[test]
    fn pushes_aaaa_record_set() {
        let name = owner();
        let mut builder = MessageBuilder::new_vec().authority();
        let mapping = Mapping::A(Change::Set("2001:db8::5".parse().unwrap()));
        push_mapping(&mut builder, &name, &mapping, 3600).unwrap();
    }

    #[test]
    fn pushes_cname_record_set() {
        let name = owner();
        let mut builder = MessageBuilder::new_vec().authority();
        let mapping = Mapping::Cname(Change::Set("alice.west.example.com.".to_string()));
        push_mapping(&mut builder, &name, &mapping, 3600).unwrap();
    }

    #[test]
    fn pushes_cname_record_delete_as_class_any_ttl_zero() {
        let name = owner();
        let mut builder = MessageBuilder::new_vec().authority();
        let mapping = Mapping::Cname(Change::Delete);
        push_mapping(&mut builder, &name, &mapping, 3600).unwrap();
    }

    #[test]
    fn rejects_invalid_cname_target() {
        let name = owner();
        let mut builder = MessageBuilder::new_vec().authority();
        let mapping = Mapping::Cname(Change::Set("not a name".to_string()));
        assert!(push_mapping(&mut builder, &name, &mapping, 3600).is_err());
    }
}
