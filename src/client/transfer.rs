use std::net::IpAddr;
use std::str::FromStr;

use bytes::Bytes;
use domain::base::iana::{Class, Rtype};
use domain::base::name::ParsedName;
use domain::base::{Message, MessageBuilder, Name};
use domain::net::client::request::{RequestMessageMulti, SendRequestMulti};
use domain::net::client::{self};
use domain::rdata::AllRecordData;
use domain::tsig::Key;
use tokio::net::TcpStream;

use crate::error::{Error, ErrorKind, Result};
use crate::zone::ZoneContents;

/// C2: `read_zone(server, key, zone_name)`. Performs a TSIG-signed AXFR over
/// TCP and keeps only the A/AAAA/CNAME records; everything else (SOA
/// included) is discarded after it has served its framing purpose.
pub async fn read_zone(server: IpAddr, key: &Key, zone_name: &str) -> Result<ZoneContents> {
    let name = Name::<Bytes>::from_str(zone_name)
        .map_err(|e| Error::new(ErrorKind::Transfer, format!("invalid zone name '{}': {}", zone_name, e)))?;

    let mut builder = MessageBuilder::new_vec();
    builder
        .push(domain::base::Question::new_in(&name, Rtype::AXFR))
        .map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?;
    let message = Message::from_octets(builder.finish())
        .map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?;

    let addr = std::net::SocketAddr::new(server, 53);
    let tcp_conn = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::new(ErrorKind::Transfer, format!("connect to {}: {}", addr, e)))?;

    let (client, transport) =
        client::stream::Connection::<domain::net::client::request::RequestMessage<Vec<u8>>, RequestMessageMulti<Vec<u8>>>::new(tcp_conn);
    tokio::spawn(transport.run());
    let client = client::tsig::Connection::new(key.clone(), client);

    let request = RequestMessageMulti::new(message)
        .map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?;
    let mut response = client.send_request(request);

    let mut contents = ZoneContents::default();
    let mut soas_seen = 0u32;

    loop {
        let reply = response
            .get_response()
            .await
            .map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?;

        let Some(reply) = reply else { break };

        if reply.header().rcode() != domain::base::iana::Rcode::NOERROR {
            return Err(Error::new(
                ErrorKind::Transfer,
                format!("server returned rcode {}", reply.header().rcode()),
            ));
        }

        for rr in reply.answer().map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))? {
            let rr = rr.map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?;
            let Some(record) = rr
                .to_record::<AllRecordData<Bytes, ParsedName<Bytes>>>()
                .map_err(|e| Error::new(ErrorKind::Transfer, e.to_string()))?
            else {
                continue;
            };

            if record.class() != Class::IN {
                continue;
            }

            let owner = crate::zone::canonicalize(&record.owner().to_string());

            match record.data() {
                AllRecordData::A(a) => {
                    contents.a_records.insert(owner, IpAddr::V4(a.addr()));
                }
                AllRecordData::Aaaa(aaaa) => {
                    contents.a_records.insert(owner, IpAddr::V6(aaaa.addr()));
                }
                AllRecordData::Cname(cname) => {
                    contents
                        .cname_records
                        .insert(owner, crate::zone::canonicalize(&cname.cname().to_string()));
                }
                AllRecordData::Soa(_) => {
                    soas_seen += 1;
                }
                _ => {}
            }
        }

        if soas_seen >= 2 {
            break;
        }
    }

    Ok(contents)
}
