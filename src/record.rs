//! The typed result model handed to callbacks.

use std::fmt;

/// A record which has no meaningful time-to-live.
pub const TTL_NOT_APPLICABLE: i32 = -1;

/// The record types a query may ask for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum QueryType {
    A,
    Aaaa,
    Cname,
    Mx,
    Naptr,
    Ns,
    Ptr,
    Soa,
    Srv,
    Txt,
    /// Every concrete type, merged into one result.
    Any,
}

impl QueryType {
    /// Concrete types, in the order an [QueryType::Any] answer is examined.
    pub const CONCRETE: [QueryType; 10] = [
        QueryType::A,
        QueryType::Aaaa,
        QueryType::Cname,
        QueryType::Mx,
        QueryType::Naptr,
        QueryType::Ns,
        QueryType::Ptr,
        QueryType::Soa,
        QueryType::Srv,
        QueryType::Txt,
    ];

    /// The IANA RR type code.
    pub const fn code(&self) -> u16 {
        match self {
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Naptr => 35,
            QueryType::Any => 255,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            QueryType::A => "A",
            QueryType::Aaaa => "AAAA",
            QueryType::Cname => "CNAME",
            QueryType::Mx => "MX",
            QueryType::Naptr => "NAPTR",
            QueryType::Ns => "NS",
            QueryType::Ptr => "PTR",
            QueryType::Soa => "SOA",
            QueryType::Srv => "SRV",
            QueryType::Txt => "TXT",
            QueryType::Any => "ANY",
        }
    }
}

impl TryFrom<u16> for QueryType {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        QueryType::CONCRETE
            .into_iter()
            .chain(std::iter::once(QueryType::Any))
            .find(|qtype| qtype.code() == code)
            .ok_or(code)
    }
}

impl std::str::FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryType::CONCRETE
            .into_iter()
            .chain(std::iter::once(QueryType::Any))
            .find(|qtype| qtype.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown query type {s:?}"))
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer to a query.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Record {
    /// An A or AAAA record.
    Address { host: String, ttl: i32 },

    /// The canonical name an alias resolves to.
    Cname { cname: String, ttl: i32 },

    Mx {
        host: String,
        priority: u16,
        ttl: i32,
    },

    Naptr {
        order: u16,
        preference: u16,
        flags: String,
        service: String,
        regex: String,
        replacement: String,
        ttl: i32,
    },

    Ns { host: String, ttl: i32 },

    Ptr {
        name: String,
        ttl: i32,
        aliases: Vec<String>,
    },

    Soa {
        nsname: String,
        hostmaster: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expires: u32,
        minttl: u32,
        ttl: i32,
    },

    Srv {
        host: String,
        port: u16,
        priority: u16,
        weight: u16,
        ttl: i32,
    },

    /// A complete text record, with every character-string joined.
    Txt { text: Vec<u8>, ttl: i32 },
}

impl Record {
    /// The concrete type this record answers.
    pub fn query_type(&self) -> QueryType {
        match self {
            Record::Address { host, .. } if host.contains(':') => QueryType::Aaaa,
            Record::Address { .. } => QueryType::A,
            Record::Cname { .. } => QueryType::Cname,
            Record::Mx { .. } => QueryType::Mx,
            Record::Naptr { .. } => QueryType::Naptr,
            Record::Ns { .. } => QueryType::Ns,
            Record::Ptr { .. } => QueryType::Ptr,
            Record::Soa { .. } => QueryType::Soa,
            Record::Srv { .. } => QueryType::Srv,
            Record::Txt { .. } => QueryType::Txt,
        }
    }

    pub fn ttl(&self) -> i32 {
        match self {
            Record::Address { ttl, .. }
            | Record::Cname { ttl, .. }
            | Record::Mx { ttl, .. }
            | Record::Naptr { ttl, .. }
            | Record::Ns { ttl, .. }
            | Record::Ptr { ttl, .. }
            | Record::Soa { ttl, .. }
            | Record::Srv { ttl, .. }
            | Record::Txt { ttl, .. } => *ttl,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qtype = self.query_type();
        match self {
            Record::Address { host, ttl } => write!(f, "{qtype}\t{ttl}\t{host}"),
            Record::Cname { cname, .. } => write!(f, "{qtype}\t-\t{cname}"),
            Record::Mx {
                host,
                priority,
                ttl,
            } => write!(f, "{qtype}\t{ttl}\t{priority} {host}"),
            Record::Naptr {
                order,
                preference,
                flags,
                service,
                regex,
                replacement,
                ttl,
            } => write!(
                f,
                "{qtype}\t{ttl}\t{order} {preference} {flags:?} {service:?} {regex:?} {replacement}"
            ),
            Record::Ns { host, .. } => write!(f, "{qtype}\t-\t{host}"),
            Record::Ptr { name, ttl, .. } => write!(f, "{qtype}\t{ttl}\t{name}"),
            Record::Soa {
                nsname,
                hostmaster,
                serial,
                refresh,
                retry,
                expires,
                minttl,
                ttl,
            } => write!(
                f,
                "{qtype}\t{ttl}\t{nsname} {hostmaster} {serial} {refresh} {retry} {expires} {minttl}"
            ),
            Record::Srv {
                host,
                port,
                priority,
                weight,
                ttl,
            } => write!(f, "{qtype}\t{ttl}\t{priority} {weight} {port} {host}"),
            Record::Txt { text, ttl } => {
                write!(f, "{qtype}\t{ttl}\t{:?}", String::from_utf8_lossy(text))
            }
        }
    }
}

/// The result of a forward or reverse host lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HostEntry {
    pub name: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<String>,
}

/// The result of a name-info lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct NameInfo {
    pub node: Option<String>,
    pub service: Option<String>,
}
