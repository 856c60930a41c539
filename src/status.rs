//! Outcomes delivered to callbacks.

use thiserror::Error;

/// The reason a request did not produce a result.
///
/// Success is represented by `Ok` in the callback's `Result`; everything
/// else the protocol, the transport, or the channel itself can report is one
/// of these variants.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Status {
    #[error("DNS server returned answer with no data")]
    NoData,

    #[error("DNS server claims query was misformatted")]
    FormatError,

    #[error("DNS server returned general failure")]
    ServerFailure,

    #[error("Domain name not found")]
    NotFound,

    #[error("DNS server does not implement requested operation")]
    NotImplemented,

    #[error("DNS server refused query")]
    Refused,

    #[error("Misformatted DNS query")]
    BadQuery,

    #[error("Misformatted domain name")]
    BadName,

    #[error("Unsupported address family")]
    BadFamily,

    #[error("Misformatted DNS reply")]
    BadResponse,

    #[error("Could not contact DNS servers")]
    ConnectionRefused,

    #[error("Timeout while contacting DNS servers")]
    Timeout,

    #[error("Out of memory")]
    NoMemory,

    #[error("Channel is being destroyed")]
    Destroyed,

    #[error("Invalid flags specified")]
    BadFlags,

    #[error("DNS query cancelled")]
    Canceled,
}

impl Status {
    /// The conventional numeric code for this outcome.
    pub const fn code(&self) -> i32 {
        match self {
            Status::NoData => 1,
            Status::FormatError => 2,
            Status::ServerFailure => 3,
            Status::NotFound => 4,
            Status::NotImplemented => 5,
            Status::Refused => 6,
            Status::BadQuery => 7,
            Status::BadName => 8,
            Status::BadFamily => 9,
            Status::BadResponse => 10,
            Status::ConnectionRefused => 11,
            Status::Timeout => 12,
            Status::NoMemory => 15,
            Status::Destroyed => 16,
            Status::BadFlags => 18,
            Status::Canceled => 24,
        }
    }

    /// The `E`-prefixed name, used by USDT probes and structured logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::NoData => "ENODATA",
            Status::FormatError => "EFORMERR",
            Status::ServerFailure => "ESERVFAIL",
            Status::NotFound => "ENOTFOUND",
            Status::NotImplemented => "ENOTIMP",
            Status::Refused => "EREFUSED",
            Status::BadQuery => "EBADQUERY",
            Status::BadName => "EBADNAME",
            Status::BadFamily => "EBADFAMILY",
            Status::BadResponse => "EBADRESP",
            Status::ConnectionRefused => "ECONNREFUSED",
            Status::Timeout => "ETIMEOUT",
            Status::NoMemory => "ENOMEM",
            Status::Destroyed => "EDESTRUCTION",
            Status::BadFlags => "EBADFLAGS",
            Status::Canceled => "ECANCELLED",
        }
    }
}
