//! The interface for a resolver core, which performs DNS I/O.

use crate::address::Family;
use crate::options::{Config, NameInfoFlags};
use crate::record::QueryType;
use crate::registry::CallbackHandle;
use crate::reply::{Hostent, Reply};
use crate::status::Status;
use crate::wire;

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// A descriptor the caller's event loop should watch.
pub type Socket = std::os::fd::RawFd;

/// Invoked with `(socket, readable, writable)` whenever the set of sockets
/// a core wants watched changes. Both flags false means "stop watching".
pub type SocketStateCallback = Box<dyn FnMut(Socket, bool, bool)>;

/// One unit of work handed to a core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Fetch the raw answer for `name`.
    Query { name: String, qtype: QueryType },

    /// Forward host lookup.
    HostByName { name: String, family: Family },

    /// Reverse host lookup.
    HostByAddr { address: IpAddr },

    NameInfo {
        address: SocketAddr,
        flags: NameInfoFlags,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Query { .. } => "query",
            Request::HostByName { .. } => "gethostbyname",
            Request::HostByAddr { .. } => "gethostbyaddr",
            Request::NameInfo { .. } => "getnameinfo",
        }
    }
}

/// What a core produced for a successful request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    /// The undecoded answer to a [Request::Query].
    Raw(Vec<u8>),

    Host(Hostent),

    NameInfo {
        node: Option<String>,
        service: Option<String>,
    },
}

/// A finished request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub handle: CallbackHandle,
    pub outcome: Result<Answer, Status>,

    /// How many attempts timed out before this outcome.
    pub timeouts: u32,
}

/// Interest in one socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SocketInterest {
    pub socket: Socket,
    pub readable: bool,
    pub writable: bool,
}

/// Performs lookups on behalf of a [crate::channel::Channel].
///
/// A core never runs on its own: it does work only when submitted a request
/// or advanced by the caller's event loop, and reports finished requests by
/// returning [Completion]s. Each handle passed to [Resolver::submit] must be
/// reported at most once, either as a completion or from
/// [Resolver::cancel_all].
pub trait Resolver: Sized {
    /// Creates a core from a validated configuration.
    fn init(config: &Config, socket_state: Option<SocketStateCallback>) -> Result<Self, Status>;

    /// Starts a request.
    ///
    /// Returns the completion immediately if the request could be answered
    /// without I/O, or failed before any was attempted.
    fn submit(&mut self, handle: CallbackHandle, request: Request, now: Instant)
        -> Option<Completion>;

    /// Drives I/O on the given sockets and expires timed-out attempts.
    fn advance(
        &mut self,
        readable: Option<Socket>,
        writable: Option<Socket>,
        now: Instant,
    ) -> Vec<Completion>;

    /// Abandons every outstanding request, returning their handles.
    fn cancel_all(&mut self) -> Vec<CallbackHandle>;

    /// Sockets the event loop should currently be watching.
    fn sockets(&self) -> Vec<SocketInterest>;

    /// Time until the core next needs [Resolver::advance], if it is waiting
    /// on anything.
    fn next_timeout(&self, now: Instant) -> Option<Duration>;

    fn servers(&self) -> Vec<IpAddr>;

    /// Replaces the server list.
    fn set_servers(&mut self, servers: Vec<IpAddr>) -> Result<(), Status>;

    fn set_local_ip(&mut self, address: IpAddr);

    fn set_local_dev(&mut self, dev: &str);

    /// Decodes the raw answer of a [Request::Query] for one concrete type.
    fn parse_reply(&self, buffer: &[u8], qtype: QueryType) -> Result<Reply, Status> {
        wire::parse_reply(buffer, qtype)
    }
}
