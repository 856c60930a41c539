//! Raw, per-type replies produced by a resolver core's parser.
//!
//! These mirror the shape of the DNS answer section closely. The
//! [crate::normalize] module turns them into [crate::record::Record]s.

use std::net::IpAddr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddrTtl {
    pub address: IpAddr,
    pub ttl: i32,
}

/// A host entry, still holding binary addresses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hostent {
    pub name: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<IpAddr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MxReply {
    pub host: String,
    pub priority: u16,
    pub ttl: i32,
}

/// NAPTR strings are character-strings on the wire and need not be UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NaptrReply {
    pub order: u16,
    pub preference: u16,
    pub flags: Vec<u8>,
    pub service: Vec<u8>,
    pub regexp: Vec<u8>,
    pub replacement: String,
    pub ttl: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaReply {
    pub nsname: String,
    pub hostmaster: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minttl: u32,
    pub ttl: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrvReply {
    pub host: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub ttl: i32,
}

/// One character-string of a TXT record.
///
/// A TXT record may carry several strings; `record_start` is set on the
/// first string of each record so that they can be joined again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxtChunk {
    pub text: Vec<u8>,
    pub ttl: i32,
    pub record_start: bool,
}

/// A parsed answer for one concrete record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    A(Vec<AddrTtl>),
    Aaaa(Vec<AddrTtl>),
    Cname(Hostent),
    Mx(Vec<MxReply>),
    Naptr(Vec<NaptrReply>),
    /// The nameserver names are carried as the entry's aliases.
    Ns(Hostent),
    Ptr { hostent: Hostent, ttl: i32 },
    Soa(SoaReply),
    Srv(Vec<SrvReply>),
    Txt(Vec<TxtChunk>),
}
