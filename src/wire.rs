//! DNS messages, via `hickory-proto`.
//!
//! This is the default answer parser for [crate::resolver::Resolver], and the
//! query encoder used by the bundled UDP core.

use crate::record::QueryType;
use crate::reply::{
    AddrTtl, Hostent, MxReply, NaptrReply, Reply, SoaReply, SrvReply, TxtChunk,
};
use crate::status::Status;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::net::IpAddr;
use tracing::{event, Level};

/// Renders a domain name the way results report it: without the root dot.
pub(crate) fn host_name(name: &Name) -> String {
    let ascii = name.to_ascii();
    match ascii.trim_end_matches('.') {
        "" => ".".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Parses `name` as an absolute domain name.
pub(crate) fn fqdn(name: &str) -> Result<Name, Status> {
    let mut name = Name::from_utf8(name).map_err(|_| Status::BadName)?;
    name.set_fqdn(true);
    Ok(name)
}

fn ttl(record: &Record) -> i32 {
    i32::try_from(record.ttl()).unwrap_or(i32::MAX)
}

/// Encodes a single-question query.
pub fn build_query(
    id: u16,
    name: &str,
    qtype: QueryType,
    recursion_desired: bool,
) -> Result<Vec<u8>, Status> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(recursion_desired);
    message.add_query(Query::query(fqdn(name)?, RecordType::from(qtype.code())));
    message.to_vec().map_err(|err| {
        event!(Level::DEBUG, ?err, name, "failed to encode query");
        Status::BadQuery
    })
}

/// The name whose PTR record maps `address` back to a host.
pub fn reverse_name(address: IpAddr) -> String {
    host_name(&Name::from(address))
}

/// Decodes a message, rejecting anything that is not a response to exactly
/// one question.
pub(crate) fn decode(buffer: &[u8]) -> Result<Message, Status> {
    let message = Message::from_vec(buffer).map_err(|err| {
        event!(Level::TRACE, ?err, "undecodable DNS message");
        Status::BadResponse
    })?;
    if message.message_type() != MessageType::Response || message.queries().len() != 1 {
        return Err(Status::BadResponse);
    }
    Ok(message)
}

/// The answers reachable from the question name, following CNAMEs.
///
/// Returns the chain of alias targets (possibly empty) and the records of
/// `rtype` owned by the last name in that chain.
fn follow_chain<'a>(message: &'a Message, rtype: RecordType) -> (Vec<Name>, Vec<&'a Record>) {
    let Some(question) = message.queries().first() else {
        return (vec![], vec![]);
    };
    let mut current = question.name().clone();
    let mut chain: Vec<Name> = vec![];

    // Bounded by the answer count, so a CNAME loop terminates.
    for _ in 0..message.answers().len() {
        let next = message.answers().iter().find_map(|record| match record.data() {
            Some(RData::CNAME(cname)) if *record.name() == current => Some(cname.0.clone()),
            _ => None,
        });
        match next {
            Some(target) if !chain.contains(&target) => {
                chain.push(target.clone());
                current = target;
            }
            _ => break,
        }
    }

    let found = message
        .answers()
        .iter()
        .filter(|record| record.record_type() == rtype && *record.name() == current)
        .collect();
    (chain, found)
}

fn of_type(message: &Message, rtype: RecordType) -> impl Iterator<Item = &Record> {
    message
        .answers()
        .iter()
        .filter(move |record| record.record_type() == rtype)
}

fn non_empty<T>(items: Vec<T>) -> Result<Vec<T>, Status> {
    if items.is_empty() {
        Err(Status::NoData)
    } else {
        Ok(items)
    }
}

fn addresses(message: &Message, qtype: QueryType) -> Result<Vec<AddrTtl>, Status> {
    let rtype = RecordType::from(qtype.code());
    let (_, found) = follow_chain(message, rtype);
    let addrs = found
        .into_iter()
        .filter_map(|record| {
            let address = match record.data()? {
                RData::A(a) => IpAddr::V4(a.0),
                RData::AAAA(aaaa) => IpAddr::V6(aaaa.0),
                _ => return None,
            };
            Some(AddrTtl {
                address,
                ttl: ttl(record),
            })
        })
        .collect();
    non_empty(addrs)
}

/// Parses the answer section of `buffer` for one concrete record type.
pub fn parse_reply(buffer: &[u8], qtype: QueryType) -> Result<Reply, Status> {
    let message = decode(buffer)?;
    let qname = message
        .queries()
        .first()
        .map(|query| host_name(query.name()))
        .unwrap_or_default();

    let reply = match qtype {
        QueryType::A => Reply::A(addresses(&message, qtype)?),
        QueryType::Aaaa => Reply::Aaaa(addresses(&message, qtype)?),
        QueryType::Cname => {
            let (chain, _) = follow_chain(&message, RecordType::CNAME);
            let Some(target) = chain.last() else {
                return Err(Status::NoData);
            };
            Reply::Cname(Hostent {
                name: host_name(target),
                aliases: vec![qname],
                addresses: vec![],
            })
        }
        QueryType::Mx => Reply::Mx(non_empty(
            of_type(&message, RecordType::MX)
                .filter_map(|record| match record.data()? {
                    RData::MX(mx) => Some(MxReply {
                        host: host_name(mx.exchange()),
                        priority: mx.preference(),
                        ttl: ttl(record),
                    }),
                    _ => None,
                })
                .collect(),
        )?),
        QueryType::Naptr => Reply::Naptr(non_empty(
            of_type(&message, RecordType::NAPTR)
                .filter_map(|record| match record.data()? {
                    RData::NAPTR(naptr) => Some(NaptrReply {
                        order: naptr.order(),
                        preference: naptr.preference(),
                        flags: naptr.flags().to_vec(),
                        service: naptr.services().to_vec(),
                        regexp: naptr.regexp().to_vec(),
                        replacement: host_name(naptr.replacement()),
                        ttl: ttl(record),
                    }),
                    _ => None,
                })
                .collect(),
        )?),
        QueryType::Ns => {
            let hosts = of_type(&message, RecordType::NS)
                .filter_map(|record| match record.data()? {
                    RData::NS(ns) => Some(host_name(&ns.0)),
                    _ => None,
                })
                .collect();
            Reply::Ns(Hostent {
                name: qname,
                aliases: non_empty(hosts)?,
                addresses: vec![],
            })
        }
        QueryType::Ptr => {
            let (_, found) = follow_chain(&message, RecordType::PTR);
            let targets: Vec<(String, i32)> = found
                .into_iter()
                .filter_map(|record| match record.data()? {
                    RData::PTR(ptr) => Some((host_name(&ptr.0), ttl(record))),
                    _ => None,
                })
                .collect();
            // The last target names the host, with its ttl.
            let (name, last_ttl) = targets.last().cloned().ok_or(Status::NoData)?;
            Reply::Ptr {
                hostent: Hostent {
                    name,
                    aliases: targets.into_iter().map(|(name, _)| name).collect(),
                    addresses: vec![],
                },
                ttl: last_ttl,
            }
        }
        QueryType::Soa => {
            let soa = of_type(&message, RecordType::SOA).find_map(|record| {
                match record.data()? {
                    RData::SOA(soa) => Some(SoaReply {
                        nsname: host_name(soa.mname()),
                        hostmaster: host_name(soa.rname()),
                        serial: soa.serial(),
                        refresh: soa.refresh() as u32,
                        retry: soa.retry() as u32,
                        expire: soa.expire() as u32,
                        minttl: soa.minimum(),
                        ttl: ttl(record),
                    }),
                    _ => None,
                }
            });
            Reply::Soa(soa.ok_or(Status::BadResponse)?)
        }
        QueryType::Srv => Reply::Srv(non_empty(
            of_type(&message, RecordType::SRV)
                .filter_map(|record| match record.data()? {
                    RData::SRV(srv) => Some(SrvReply {
                        host: host_name(srv.target()),
                        port: srv.port(),
                        priority: srv.priority(),
                        weight: srv.weight(),
                        ttl: ttl(record),
                    }),
                    _ => None,
                })
                .collect(),
        )?),
        QueryType::Txt => Reply::Txt(non_empty(
            of_type(&message, RecordType::TXT)
                .filter_map(|record| match record.data()? {
                    RData::TXT(txt) => Some((txt, ttl(record))),
                    _ => None,
                })
                .flat_map(|(txt, ttl)| {
                    txt.txt_data()
                        .iter()
                        .enumerate()
                        .map(move |(i, text)| TxtChunk {
                            text: text.to_vec(),
                            ttl,
                            record_start: i == 0,
                        })
                })
                .collect(),
        )?),
        QueryType::Any => return Err(Status::BadQuery),
    };
    Ok(reply)
}

/// Parses an address answer into a host entry: the canonical name, the
/// aliases that led to it, and every address of `qtype`.
pub(crate) fn parse_host(buffer: &[u8], qtype: QueryType) -> Result<Hostent, Status> {
    let message = decode(buffer)?;
    let rtype = RecordType::from(qtype.code());
    let (chain, found) = follow_chain(&message, rtype);

    let qname = message
        .queries()
        .first()
        .map(|query| query.name().clone())
        .ok_or(Status::BadResponse)?;
    let mut names: Vec<Name> = std::iter::once(qname).chain(chain).collect();
    let canonical = names.pop().map(|name| host_name(&name)).unwrap_or_default();

    let addresses = found
        .into_iter()
        .filter_map(|record| match record.data()? {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect();
    Ok(Hostent {
        name: canonical,
        aliases: names.iter().map(host_name).collect(),
        addresses: non_empty(addresses)?,
    })
}
