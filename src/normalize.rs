//! Conversion of raw resolver output into [Record]s.

use crate::address;
use crate::record::{HostEntry, QueryType, Record, TTL_NOT_APPLICABLE};
use crate::reply::{Hostent, Reply, TxtChunk};
use crate::status::Status;

use tracing::{event, Level};

/// Turns a completed query into the records handed to its callback.
///
/// `parse` decodes the raw answer buffer for one concrete type. For
/// [QueryType::Any] every concrete type is parsed in turn, in the order of
/// [QueryType::CONCRETE]: types that are absent from the answer (reported as
/// [Status::NoData] or [Status::BadResponse]) are skipped, and any other
/// parse failure fails the whole query, discarding what was gathered so far.
pub fn normalize<P>(
    parse: P,
    qtype: QueryType,
    outcome: Result<&[u8], Status>,
) -> Result<Vec<Record>, Status>
where
    P: Fn(&[u8], QueryType) -> Result<Reply, Status>,
{
    let buffer = outcome?;

    if qtype != QueryType::Any {
        return convert(parse(buffer, qtype)?);
    }

    let mut records = Vec::new();
    for concrete in QueryType::CONCRETE {
        match parse(buffer, concrete).and_then(convert) {
            Ok(found) => records.extend(found),
            Err(Status::NoData | Status::BadResponse) => {
                event!(Level::TRACE, qtype = %concrete, "absent from ANY answer");
            }
            Err(status) => return Err(status),
        }
    }
    Ok(records)
}

/// Maps one parsed reply onto the uniform record model.
pub fn convert(reply: Reply) -> Result<Vec<Record>, Status> {
    let records = match reply {
        Reply::A(addrs) | Reply::Aaaa(addrs) => addrs
            .into_iter()
            .map(|addr| Record::Address {
                host: address::ip_to_text(&addr.address),
                ttl: addr.ttl,
            })
            .collect(),
        Reply::Cname(hostent) => vec![Record::Cname {
            cname: hostent.name,
            ttl: TTL_NOT_APPLICABLE,
        }],
        Reply::Mx(mxs) => mxs
            .into_iter()
            .map(|mx| Record::Mx {
                host: mx.host,
                priority: mx.priority,
                ttl: mx.ttl,
            })
            .collect(),
        Reply::Naptr(naptrs) => naptrs
            .into_iter()
            .map(|naptr| Record::Naptr {
                order: naptr.order,
                preference: naptr.preference,
                flags: lossy(naptr.flags),
                service: lossy(naptr.service),
                regex: lossy(naptr.regexp),
                replacement: naptr.replacement,
                ttl: naptr.ttl,
            })
            .collect(),
        Reply::Ns(hostent) => hostent
            .aliases
            .into_iter()
            .map(|host| Record::Ns {
                host,
                ttl: TTL_NOT_APPLICABLE,
            })
            .collect(),
        Reply::Ptr { hostent, ttl } => vec![Record::Ptr {
            name: hostent.name,
            ttl,
            aliases: hostent.aliases,
        }],
        Reply::Soa(soa) => vec![Record::Soa {
            nsname: soa.nsname,
            hostmaster: soa.hostmaster,
            serial: soa.serial,
            refresh: soa.refresh,
            retry: soa.retry,
            expires: soa.expire,
            minttl: soa.minttl,
            ttl: soa.ttl,
        }],
        Reply::Srv(srvs) => srvs
            .into_iter()
            .map(|srv| Record::Srv {
                host: srv.host,
                port: srv.port,
                priority: srv.priority,
                weight: srv.weight,
                ttl: srv.ttl,
            })
            .collect(),
        Reply::Txt(chunks) => reassemble_txt(chunks)?,
    };
    Ok(records)
}

/// Joins the character-strings of each TXT record back together.
///
/// A chunk with `record_start` set begins a new record; any other chunk is
/// appended to the record currently being built. The record's TTL is that
/// of its first chunk.
pub fn reassemble_txt(chunks: Vec<TxtChunk>) -> Result<Vec<Record>, Status> {
    let (mut records, open) = chunks.into_iter().try_fold(
        (Vec::new(), None::<(Vec<u8>, i32)>),
        |(mut records, open), chunk| {
            if chunk.record_start {
                if let Some((text, ttl)) = open {
                    records.push(Record::Txt { text, ttl });
                }
                Ok((records, Some((chunk.text, chunk.ttl))))
            } else {
                let Some((mut text, ttl)) = open else {
                    event!(Level::DEBUG, "TXT continuation without a record start");
                    return Err(Status::BadResponse);
                };
                text.extend_from_slice(&chunk.text);
                Ok((records, Some((text, ttl))))
            }
        },
    )?;
    if let Some((text, ttl)) = open {
        records.push(Record::Txt { text, ttl });
    }
    Ok(records)
}

/// Renders a host entry's addresses as text.
pub fn host_entry(hostent: Hostent) -> HostEntry {
    HostEntry {
        name: hostent.name,
        aliases: hostent.aliases,
        addresses: hostent
            .addresses
            .iter()
            .map(address::ip_to_text)
            .collect(),
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}
