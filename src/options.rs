//! Configuration options which alter the behavior of a channel.

use crate::address;

use bitflags::bitflags;
use hickory_proto::rr::Name;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{event, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("timeout must be at least one millisecond (got {0:?})")]
    InvalidTimeout(Duration),

    #[error("tries must be at least one")]
    InvalidTries,

    #[error("{0} port must be non-zero")]
    InvalidPort(&'static str),

    #[error("invalid address")]
    Address(#[from] address::Error),

    #[error("invalid search domain {0:?}")]
    InvalidDomain(String),

    #[error("invalid lookup order {0:?}: expected a non-empty combination of 'b' and 'f'")]
    InvalidLookups(String),

    #[error("{0} buffer size must be non-zero")]
    InvalidBufferSize(&'static str),

    #[error("invalid local device name {0:?}")]
    InvalidLocalDev(String),

    #[error("unknown flag bits {0:#x}")]
    UnknownFlags(u32),

    #[error("cannot read {path:?}")]
    ResolvConfRead {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("cannot parse {path:?}: {reason}")]
    ResolvConfParse { path: PathBuf, reason: String },
}

bitflags! {
    /// Behavioral flags for a channel.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct Flags: u32 {
        /// Always use TCP.
        const USEVC = 1 << 0;
        /// Only ever query the first server.
        const PRIMARY = 1 << 1;
        /// Accept truncated answers instead of retrying over TCP.
        const IGNTC = 1 << 2;
        /// Do not set the "recursion desired" bit.
        const NORECURSE = 1 << 3;
        /// Keep sockets open when no queries are pending.
        const STAYOPEN = 1 << 4;
        /// Do not apply the search list to host lookups.
        const NOSEARCH = 1 << 5;
        /// Ignore host aliases.
        const NOALIASES = 1 << 6;
        /// Report SERVFAIL, NOTIMP and REFUSED instead of trying the next
        /// server.
        const NOCHECKRESP = 1 << 7;
    }
}

bitflags! {
    /// Flags for [crate::channel::Channel::getnameinfo].
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize))]
    pub struct NameInfoFlags: u32 {
        const NOFQDN = 1 << 0;
        const NUMERICHOST = 1 << 1;
        const NAMEREQD = 1 << 2;
        const NUMERICSERV = 1 << 3;
        const DGRAM = 1 << 4;
        const TCP = 0;
        const UDP = 1 << 4;
        const SCTP = 1 << 5;
        const DCCP = 1 << 6;
        const NUMERICSCOPE = 1 << 7;
        const LOOKUPHOST = 1 << 8;
        const LOOKUPSERVICE = 1 << 9;
        const IDN = 1 << 10;
        const IDN_ALLOW_UNASSIGNED = 1 << 11;
        const IDN_USE_STD3_ASCII_RULES = 1 << 12;
    }
}

/// Options used to configure a channel.
///
/// Every field is optional; anything left unset falls back to the value in
/// `resolvconf_path`, if one is given, and then to a built-in default.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub flags: Option<Flags>,

    /// How long to wait for each attempt.
    ///
    /// Truncated to whole milliseconds.
    pub timeout: Option<Duration>,

    /// Attempts per server.
    pub tries: Option<u32>,

    /// Names with at least this many dots are tried as-is before the search
    /// list is applied.
    pub ndots: Option<u32>,

    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,

    /// Nameserver addresses, as text.
    pub servers: Vec<String>,

    /// Search domains.
    pub domains: Vec<String>,

    /// Lookup order: `b` for DNS and `f` for the hosts file.
    pub lookups: Option<String>,

    pub socket_send_buffer_size: Option<usize>,
    pub socket_receive_buffer_size: Option<usize>,

    /// Round-robin across servers instead of always starting at the first.
    pub rotate: bool,

    /// Source address for outgoing queries, as text.
    pub local_ip: Option<String>,

    /// Network interface to bind outgoing sockets to.
    pub local_dev: Option<String>,

    /// A resolv.conf-format file to read defaults from.
    pub resolvconf_path: Option<PathBuf>,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_TRIES: u32 = 3;
pub const DEFAULT_NDOTS: u32 = 1;
pub const DEFAULT_PORT: u16 = 53;
pub const DEFAULT_LOOKUPS: &str = "fb";

/// Longest interface name accepted by [Options::local_dev].
pub const MAX_LOCAL_DEV_LEN: usize = 31;

/// A validated, immutable snapshot of a channel's configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub flags: Flags,
    pub timeout: Duration,
    pub tries: u32,
    pub ndots: u32,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub servers: Vec<IpAddr>,
    pub domains: Vec<String>,
    pub lookups: String,
    pub socket_send_buffer_size: Option<usize>,
    pub socket_receive_buffer_size: Option<usize>,
    pub rotate: bool,
    pub local_ip: Option<IpAddr>,
    pub local_dev: Option<String>,
    pub resolvconf_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            flags: Flags::empty(),
            timeout: DEFAULT_TIMEOUT,
            tries: DEFAULT_TRIES,
            ndots: DEFAULT_NDOTS,
            tcp_port: DEFAULT_PORT,
            udp_port: DEFAULT_PORT,
            servers: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            domains: vec![],
            lookups: DEFAULT_LOOKUPS.to_string(),
            socket_send_buffer_size: None,
            socket_receive_buffer_size: None,
            rotate: false,
            local_ip: None,
            local_dev: None,
            resolvconf_path: None,
        }
    }
}

/// Values read from a resolv.conf file.
#[derive(Debug, Default)]
struct FileDefaults {
    servers: Vec<IpAddr>,
    domains: Vec<String>,
    ndots: Option<u32>,
    tries: Option<u32>,
    timeout: Option<Duration>,
    rotate: bool,
}

impl FileDefaults {
    fn read(path: &PathBuf) -> Result<Self, Error> {
        let data = std::fs::read(path).map_err(|err| Error::ResolvConfRead {
            path: path.clone(),
            err,
        })?;
        let conf = resolv_conf::Config::parse(data).map_err(|err| Error::ResolvConfParse {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        event!(Level::DEBUG, ?path, ?conf, "read resolver configuration file");

        Ok(Self {
            servers: conf.nameservers.iter().map(IpAddr::from).collect(),
            domains: conf.get_search().cloned().unwrap_or_default(),
            ndots: Some(conf.ndots),
            tries: Some(conf.attempts),
            timeout: Some(Duration::from_secs(u64::from(conf.timeout))),
            rotate: conf.rotate,
        })
    }
}

pub(crate) fn validate_local_dev(dev: &str) -> Result<(), Error> {
    if dev.is_empty() || dev.len() > MAX_LOCAL_DEV_LEN || dev.contains('\0') {
        return Err(Error::InvalidLocalDev(dev.to_string()));
    }
    Ok(())
}

fn validate_lookups(lookups: &str) -> Result<(), Error> {
    let mut seen = HashSet::new();
    let valid = !lookups.is_empty()
        && lookups
            .chars()
            .all(|c| matches!(c, 'b' | 'f') && seen.insert(c));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidLookups(lookups.to_string()))
    }
}

impl Options {
    /// Checks every option, producing the configuration a channel runs with.
    ///
    /// Nothing is created unless every option is valid.
    pub fn validate(&self) -> Result<Config, Error> {
        let file = match &self.resolvconf_path {
            Some(path) => FileDefaults::read(path)?,
            None => FileDefaults::default(),
        };
        let mut config = Config::default();

        if let Some(flags) = self.flags {
            config.flags = Flags::from_bits(flags.bits()).ok_or_else(|| {
                Error::UnknownFlags(flags.bits() & !Flags::all().bits())
            })?;
        }

        if let Some(timeout) = self.timeout.or(file.timeout) {
            let truncated = Duration::from_millis(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            );
            if truncated.is_zero() {
                return Err(Error::InvalidTimeout(timeout));
            }
            config.timeout = truncated;
        }

        if let Some(tries) = self.tries.or(file.tries) {
            if tries == 0 {
                return Err(Error::InvalidTries);
            }
            config.tries = tries;
        }

        if let Some(ndots) = self.ndots.or(file.ndots) {
            config.ndots = ndots;
        }

        for (which, port, slot) in [
            ("tcp", self.tcp_port, &mut config.tcp_port),
            ("udp", self.udp_port, &mut config.udp_port),
        ] {
            match port {
                Some(0) => return Err(Error::InvalidPort(which)),
                Some(port) => *slot = port,
                None => (),
            }
        }

        if !self.servers.is_empty() {
            config.servers = self
                .servers
                .iter()
                .map(|server| address::parse_ip(server))
                .collect::<Result<_, _>>()?;
        } else if !file.servers.is_empty() {
            config.servers = file.servers;
        }

        let domains = if self.domains.is_empty() {
            file.domains
        } else {
            self.domains.clone()
        };
        for domain in &domains {
            if domain.is_empty() || Name::from_utf8(domain).is_err() {
                return Err(Error::InvalidDomain(domain.clone()));
            }
        }
        config.domains = domains;

        if let Some(lookups) = &self.lookups {
            validate_lookups(lookups)?;
            config.lookups = lookups.clone();
        }

        for (which, size, slot) in [
            (
                "send",
                self.socket_send_buffer_size,
                &mut config.socket_send_buffer_size,
            ),
            (
                "receive",
                self.socket_receive_buffer_size,
                &mut config.socket_receive_buffer_size,
            ),
        ] {
            match size {
                Some(0) => return Err(Error::InvalidBufferSize(which)),
                size => *slot = size,
            }
        }

        config.rotate = self.rotate || file.rotate;

        if let Some(local_ip) = &self.local_ip {
            config.local_ip = Some(address::parse_ip(local_ip)?);
        }

        if let Some(dev) = &self.local_dev {
            validate_local_dev(dev)?;
            config.local_dev = Some(dev.clone());
        }

        config.resolvconf_path = self.resolvconf_path.clone();
        Ok(config)
    }
}
