//! Implementation of [Resolver] over UDP

use crate::address::Family;
use crate::options::{Config, Flags, NameInfoFlags};
use crate::record::QueryType;
use crate::registry::CallbackHandle;
use crate::reply::{Hostent, Reply};
use crate::resolver::{
    Answer, Completion, Request, Resolver, Socket, SocketInterest, SocketStateCallback,
};
use crate::resolvers::hosts::{Hosts, DEFAULT_HOSTS_PATH};
use crate::resolvers::search;
use crate::status::Status;
use crate::wire;

use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use socket2::{Domain, Protocol, Type};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{event, instrument, Level};

// Large enough for any UDP payload.
const RECV_BUFFER_SIZE: usize = 65535;

struct Server {
    address: SocketAddr,
    socket: Option<UdpSocket>,
}

/// One DNS question, retried across servers until it gets an answer.
struct Transaction {
    owner: CallbackHandle,
    name: String,
    qtype: QueryType,
    message: Vec<u8>,
    server: usize,
    first_server: usize,
    attempts: u32,
    max_attempts: u32,
    deadline: Instant,
    timeouts: u32,
    last_error: Status,

    // Set when a send failed; the next expiry moves on without counting a
    // timeout.
    send_error: Option<Status>,
}

enum Step<T> {
    Waiting,
    Done(Result<T, Status>),
}

/// Keeps the most useful failure seen across several attempts.
#[derive(Default)]
struct Failure(Option<Status>);

impl Failure {
    fn record(&mut self, status: Status) {
        if self.0 != Some(Status::NoData) || status == Status::NoData {
            self.0 = Some(status);
        }
    }

    fn status(&self) -> Status {
        self.0.unwrap_or(Status::NotFound)
    }
}

/// Forward lookup: each source in lookup order, and for DNS each
/// candidate name and record type.
struct HostSearch {
    name: String,
    family: Family,
    sources: VecDeque<char>,
    candidates: VecDeque<(String, QueryType)>,
    failure: Failure,
}

/// Reverse lookup: each source in lookup order.
struct ReverseSearch {
    address: IpAddr,
    sources: VecDeque<char>,
    failure: Failure,
}

enum Lookup {
    Query,
    Host(HostSearch),
    Reverse(ReverseSearch),
    NameInfo {
        reverse: ReverseSearch,
        flags: NameInfoFlags,
        service: Option<String>,
    },
}

struct Pending {
    lookup: Lookup,
    timeouts: u32,
}

/// A resolver core which sends queries over UDP.
///
/// One connected, non-blocking socket is kept per server, opened when the
/// first query is sent to it and closed once it has nothing outstanding
/// (unless [Flags::STAYOPEN] is set). There is no TCP fallback: truncated
/// answers are returned as received.
pub struct UdpResolver {
    config: Config,
    servers: Vec<Server>,
    transactions: HashMap<u16, Transaction>,
    lookups: HashMap<CallbackHandle, Pending>,
    next_server: usize,
    socket_state: Option<SocketStateCallback>,
    hosts_path: PathBuf,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for UdpResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpResolver")
            .field(
                "servers",
                &self.servers.iter().map(|s| s.address).collect::<Vec<_>>(),
            )
            .field("transactions", &self.transactions.len())
            .field("lookups", &self.lookups.len())
            .finish_non_exhaustive()
    }
}

impl UdpResolver {
    /// Reads host entries from `path` instead of [DEFAULT_HOSTS_PATH].
    pub fn set_hosts_path(&mut self, path: impl Into<PathBuf>) {
        self.hosts_path = path.into();
    }

    fn notify(&mut self, socket: Socket, readable: bool) {
        if let Some(socket_state) = &mut self.socket_state {
            socket_state(socket, readable, false);
        }
    }

    fn open_socket(&self, address: SocketAddr) -> io::Result<UdpSocket> {
        let socket = socket2::Socket::new(
            Domain::for_address(address),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_nonblocking(true)?;
        if let Some(size) = self.config.socket_send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.config.socket_receive_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        if let Some(dev) = &self.config.local_dev {
            socket.bind_device(Some(dev.as_bytes()))?;
        }
        if let Some(local_ip) = self.config.local_ip {
            if Family::of(&local_ip) == Family::of(&address.ip()) {
                socket.bind(&SocketAddr::new(local_ip, 0).into())?;
            }
        }
        socket.connect(&address.into())?;
        Ok(socket.into())
    }

    /// Returns the socket for server `index`, opening it if needed.
    fn socket(&mut self, index: usize) -> io::Result<&UdpSocket> {
        if self.servers[index].socket.is_none() {
            let address = self.servers[index].address;
            let socket = self.open_socket(address)?;
            let fd = socket.as_raw_fd();
            event!(Level::DEBUG, %address, fd, "opened socket");
            self.servers[index].socket = Some(socket);
            self.notify(fd, true);
        }
        self.servers[index]
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn close_socket(&mut self, index: usize) {
        if let Some(socket) = self.servers[index].socket.take() {
            let fd = socket.as_raw_fd();
            event!(Level::DEBUG, address = %self.servers[index].address, fd, "closing socket");
            self.notify(fd, false);
        }
    }

    /// Closes every socket no transaction is waiting on.
    fn release_idle_sockets(&mut self) {
        if self.config.flags.contains(Flags::STAYOPEN) {
            return;
        }
        for index in 0..self.servers.len() {
            let busy = self.transactions.values().any(|tx| tx.server == index);
            if !busy {
                self.close_socket(index);
            }
        }
    }

    fn unique_id(&self) -> u16 {
        loop {
            let id = rand::random::<u16>();
            if !self.transactions.contains_key(&id) {
                return id;
            }
        }
    }

    fn start_server(&mut self) -> usize {
        if self.config.flags.contains(Flags::PRIMARY) || !self.config.rotate {
            return 0;
        }
        let start = self.next_server % self.servers.len();
        self.next_server = (start + 1) % self.servers.len();
        start
    }

    /// Sends a new query for `owner`.
    fn start_transaction(
        &mut self,
        owner: CallbackHandle,
        name: &str,
        qtype: QueryType,
        now: Instant,
    ) -> Result<(), Status> {
        if self.servers.is_empty() {
            return Err(Status::ServerFailure);
        }
        let id = self.unique_id();
        let recurse = !self.config.flags.contains(Flags::NORECURSE);
        let message = wire::build_query(id, name, qtype, recurse)?;
        let first_server = self.start_server();
        let max_attempts = if self.config.flags.contains(Flags::PRIMARY) {
            self.config.tries
        } else {
            self.config.tries.saturating_mul(self.servers.len() as u32)
        };
        self.transactions.insert(
            id,
            Transaction {
                owner,
                name: name.to_string(),
                qtype,
                message,
                server: first_server,
                first_server,
                attempts: 0,
                max_attempts,
                deadline: now,
                timeouts: 0,
                last_error: Status::Timeout,
                send_error: None,
            },
        );
        self.send(id, now);
        Ok(())
    }

    #[instrument(level = "trace", skip(self, now), name = "UdpResolver::send")]
    fn send(&mut self, id: u16, now: Instant) {
        let Some(tx) = self.transactions.get(&id) else {
            return;
        };
        let server = tx.server;
        let message = tx.message.clone();
        let timeout = self.config.timeout;

        let result = self
            .socket(server)
            .and_then(|socket| socket.send(&message));
        let send_error = match result {
            Ok(_) => {
                event!(Level::TRACE, id, server, "sent query");
                None
            }
            Err(err) => {
                event!(Level::DEBUG, id, server, ?err, "failed to send query");
                Some(match err.kind() {
                    io::ErrorKind::ConnectionRefused => Status::ConnectionRefused,
                    _ => Status::ServerFailure,
                })
            }
        };

        if let Some(tx) = self.transactions.get_mut(&id) {
            tx.attempts += 1;
            tx.send_error = send_error;
            tx.deadline = if send_error.is_some() { now } else { now + timeout };
        }
    }

    /// Moves a failed attempt on to the next server, or finishes the
    /// transaction once every attempt has been used.
    fn retry(&mut self, id: u16, status: Status, now: Instant) -> Option<Completion> {
        let tx = self.transactions.get_mut(&id)?;
        tx.last_error = status;
        if tx.attempts >= tx.max_attempts {
            return self.finish(id, Err(status), now);
        }
        if !self.config.flags.contains(Flags::PRIMARY) {
            tx.server = (tx.first_server + tx.attempts as usize) % self.servers.len();
        }
        self.send(id, now);
        None
    }

    fn finish(
        &mut self,
        id: u16,
        outcome: Result<Vec<u8>, Status>,
        now: Instant,
    ) -> Option<Completion> {
        let tx = self.transactions.remove(&id)?;
        event!(
            Level::DEBUG,
            id,
            name = %tx.name,
            qtype = %tx.qtype,
            ok = outcome.is_ok(),
            "transaction finished"
        );
        let completion = self.resume(tx.owner, tx.qtype, outcome, tx.timeouts, now);
        self.release_idle_sockets();
        completion
    }

    fn handle_datagram(
        &mut self,
        server: usize,
        datagram: &[u8],
        now: Instant,
    ) -> Option<Completion> {
        let Ok(message) = Message::from_vec(datagram) else {
            event!(Level::TRACE, server, "ignoring undecodable datagram");
            return None;
        };
        let id = message.id();
        let Some(tx) = self.transactions.get(&id) else {
            event!(Level::TRACE, id, "ignoring response to unknown query");
            return None;
        };
        let matches = tx.server == server
            && message.queries().len() == 1
            && message.queries().first().is_some_and(|query| {
                query.query_type() == RecordType::from(tx.qtype.code())
                    && wire::fqdn(&tx.name).is_ok_and(|name| *query.name() == name)
            });
        if !matches {
            event!(Level::TRACE, id, "ignoring mismatched response");
            return None;
        }
        if message.truncated() {
            event!(Level::DEBUG, id, "accepting truncated response");
        }

        let check = !self.config.flags.contains(Flags::NOCHECKRESP);
        let outcome = match message.response_code() {
            ResponseCode::NoError if message.answers().is_empty() => Err(Status::NoData),
            ResponseCode::NoError => Ok(datagram.to_vec()),
            ResponseCode::NXDomain => Err(Status::NotFound),
            ResponseCode::FormErr => Err(Status::FormatError),
            ResponseCode::ServFail if check => return self.retry(id, Status::ServerFailure, now),
            ResponseCode::NotImp if check => return self.retry(id, Status::NotImplemented, now),
            ResponseCode::Refused if check => return self.retry(id, Status::Refused, now),
            ResponseCode::ServFail => Err(Status::ServerFailure),
            ResponseCode::NotImp => Err(Status::NotImplemented),
            ResponseCode::Refused => Err(Status::Refused),
            _ => Err(Status::BadResponse),
        };
        self.finish(id, outcome, now)
    }

    /// Reads every datagram waiting on `socket`.
    fn read(&mut self, socket: Socket, now: Instant) -> Vec<Completion> {
        let Some(server) = self.servers.iter().position(|server| {
            server
                .socket
                .as_ref()
                .is_some_and(|s| s.as_raw_fd() == socket)
        }) else {
            return vec![];
        };

        let mut completions = vec![];
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.resize(RECV_BUFFER_SIZE, 0);
        loop {
            let Some(udp) = self.servers[server].socket.as_ref() else {
                break;
            };
            match udp.recv(&mut buffer) {
                Ok(len) => {
                    event!(Level::TRACE, server, len, "received datagram");
                    completions.extend(self.handle_datagram(server, &buffer[..len], now));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    event!(Level::DEBUG, server, "connection refused");
                    let ids: Vec<u16> = self
                        .transactions
                        .iter()
                        .filter(|(_, tx)| tx.server == server)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in ids {
                        completions.extend(self.retry(id, Status::ConnectionRefused, now));
                    }
                }
                Err(err) => {
                    event!(Level::WARN, server, ?err, "failed to read from socket");
                    break;
                }
            }
        }
        self.buffer = buffer;
        completions
    }

    /// Handles every transaction whose deadline has passed.
    fn expire(&mut self, now: Instant) -> Vec<Completion> {
        let mut expired: Vec<(Instant, u16)> = self
            .transactions
            .iter()
            .filter(|(_, tx)| tx.deadline <= now)
            .map(|(id, tx)| (tx.deadline, *id))
            .collect();
        expired.sort();

        let mut completions = vec![];
        for (_, id) in expired {
            let Some(tx) = self.transactions.get_mut(&id) else {
                continue;
            };
            let status = match tx.send_error.take() {
                Some(status) => status,
                None => {
                    tx.timeouts += 1;
                    event!(Level::DEBUG, id, server = tx.server, "query timed out");
                    Status::Timeout
                }
            };
            completions.extend(self.retry(id, status, now));
        }
        completions
    }

    fn hosts(&self) -> Hosts {
        match Hosts::load(&self.hosts_path) {
            Ok(hosts) => hosts,
            Err(err) => {
                event!(Level::DEBUG, path = ?self.hosts_path, ?err, "cannot read hosts file");
                Hosts::default()
            }
        }
    }

    fn step_host(
        &mut self,
        owner: CallbackHandle,
        host: &mut HostSearch,
        now: Instant,
    ) -> Step<Hostent> {
        loop {
            if let Some((name, qtype)) = host.candidates.pop_front() {
                match self.start_transaction(owner, &name, qtype, now) {
                    Ok(()) => return Step::Waiting,
                    Err(status) => {
                        host.failure.record(status);
                        continue;
                    }
                }
            }
            match host.sources.pop_front() {
                Some('f') => {
                    if let Some(hostent) = self.hosts().by_name(&host.name, host.family) {
                        return Step::Done(Ok(hostent));
                    }
                }
                Some(_) => {
                    let qtypes: &[QueryType] = match host.family {
                        Family::Inet => &[QueryType::A],
                        Family::Inet6 => &[QueryType::Aaaa],
                        Family::Unspec => &[QueryType::A, QueryType::Aaaa],
                    };
                    let names = search::candidates(&host.name, &self.config);
                    host.candidates = qtypes
                        .iter()
                        .flat_map(|qtype| names.iter().map(|name| (name.clone(), *qtype)))
                        .collect();
                }
                None => return Step::Done(Err(host.failure.status())),
            }
        }
    }

    fn step_reverse(
        &mut self,
        owner: CallbackHandle,
        search: &mut ReverseSearch,
        now: Instant,
    ) -> Step<Hostent> {
        loop {
            match search.sources.pop_front() {
                Some('f') => {
                    if let Some(hostent) = self.hosts().by_addr(search.address) {
                        return Step::Done(Ok(hostent));
                    }
                }
                Some(_) => {
                    let name = wire::reverse_name(search.address);
                    match self.start_transaction(owner, &name, QueryType::Ptr, now) {
                        Ok(()) => return Step::Waiting,
                        Err(status) => search.failure.record(status),
                    }
                }
                None => return Step::Done(Err(search.failure.status())),
            }
        }
    }

    fn reverse_answer(
        address: IpAddr,
        outcome: Result<Vec<u8>, Status>,
    ) -> Result<Hostent, Status> {
        let buffer = outcome?;
        match wire::parse_reply(&buffer, QueryType::Ptr)? {
            Reply::Ptr { hostent, .. } => Ok(Hostent {
                aliases: hostent
                    .aliases
                    .into_iter()
                    .filter(|alias| *alias != hostent.name)
                    .collect(),
                name: hostent.name,
                addresses: vec![address],
            }),
            _ => Err(Status::BadResponse),
        }
    }

    fn name_info_answer(
        address: IpAddr,
        flags: NameInfoFlags,
        service: Option<String>,
        host: Result<Hostent, Status>,
    ) -> Result<Answer, Status> {
        let node = match host {
            Ok(hostent) if flags.contains(NameInfoFlags::NOFQDN) => {
                search::strip_domain(&hostent.name)
            }
            Ok(hostent) => hostent.name,
            Err(status) if flags.contains(NameInfoFlags::NAMEREQD) => return Err(status),
            Err(_) => address.to_string(),
        };
        Ok(Answer::NameInfo {
            node: Some(node),
            service,
        })
    }

    /// Feeds a finished transaction back into the lookup that started it.
    fn resume(
        &mut self,
        owner: CallbackHandle,
        qtype: QueryType,
        outcome: Result<Vec<u8>, Status>,
        timeouts: u32,
        now: Instant,
    ) -> Option<Completion> {
        // Canceled lookups have already been removed.
        let mut pending = self.lookups.remove(&owner)?;
        pending.timeouts += timeouts;

        let step = match &mut pending.lookup {
            Lookup::Query => Step::Done(outcome.map(Answer::Raw)),
            Lookup::Host(search) => {
                match outcome.and_then(|buffer| wire::parse_host(&buffer, qtype)) {
                    Ok(hostent) => Step::Done(Ok(Answer::Host(hostent))),
                    Err(status) => {
                        search.failure.record(status);
                        if !matches!(
                            status,
                            Status::NoData | Status::NotFound | Status::ServerFailure
                        ) {
                            search.candidates.clear();
                        }
                        match self.step_host(owner, search, now) {
                            Step::Waiting => Step::Waiting,
                            Step::Done(result) => Step::Done(result.map(Answer::Host)),
                        }
                    }
                }
            }
            Lookup::Reverse(search) => match Self::reverse_answer(search.address, outcome) {
                Ok(hostent) => Step::Done(Ok(Answer::Host(hostent))),
                Err(status) => {
                    search.failure.record(status);
                    match self.step_reverse(owner, search, now) {
                        Step::Waiting => Step::Waiting,
                        Step::Done(result) => Step::Done(result.map(Answer::Host)),
                    }
                }
            },
            Lookup::NameInfo {
                reverse,
                flags,
                service,
            } => {
                let host = match Self::reverse_answer(reverse.address, outcome) {
                    Ok(hostent) => Step::Done(Ok(hostent)),
                    Err(status) => {
                        reverse.failure.record(status);
                        self.step_reverse(owner, reverse, now)
                    }
                };
                match host {
                    Step::Waiting => Step::Waiting,
                    Step::Done(host) => Step::Done(Self::name_info_answer(
                        reverse.address,
                        *flags,
                        service.take(),
                        host,
                    )),
                }
            }
        };

        match step {
            Step::Waiting => {
                self.lookups.insert(owner, pending);
                None
            }
            Step::Done(outcome) => Some(Completion {
                handle: owner,
                outcome,
                timeouts: pending.timeouts,
            }),
        }
    }

    fn sources(&self) -> VecDeque<char> {
        self.config.lookups.chars().collect()
    }

    /// Starts a lookup, returning its result if it finished without I/O.
    fn begin(&mut self, owner: CallbackHandle, request: Request, now: Instant) -> Step<Answer> {
        match request {
            Request::Query { name, qtype } => {
                if let Err(status) = self.start_transaction(owner, &name, qtype, now) {
                    return Step::Done(Err(status));
                }
                self.lookups.insert(
                    owner,
                    Pending {
                        lookup: Lookup::Query,
                        timeouts: 0,
                    },
                );
                Step::Waiting
            }
            Request::HostByName { name, family } => {
                if let Ok(address) = name.parse::<IpAddr>() {
                    let matches = family == Family::Unspec || family == Family::of(&address);
                    return Step::Done(if matches {
                        Ok(Answer::Host(Hostent {
                            name,
                            aliases: vec![],
                            addresses: vec![address],
                        }))
                    } else {
                        Err(Status::NotFound)
                    });
                }
                let mut search = HostSearch {
                    name,
                    family,
                    sources: self.sources(),
                    candidates: VecDeque::new(),
                    failure: Failure::default(),
                };
                match self.step_host(owner, &mut search, now) {
                    Step::Waiting => {
                        self.lookups.insert(
                            owner,
                            Pending {
                                lookup: Lookup::Host(search),
                                timeouts: 0,
                            },
                        );
                        Step::Waiting
                    }
                    Step::Done(result) => Step::Done(result.map(Answer::Host)),
                }
            }
            Request::HostByAddr { address } => {
                let mut search = ReverseSearch {
                    address,
                    sources: self.sources(),
                    failure: Failure::default(),
                };
                match self.step_reverse(owner, &mut search, now) {
                    Step::Waiting => {
                        self.lookups.insert(
                            owner,
                            Pending {
                                lookup: Lookup::Reverse(search),
                                timeouts: 0,
                            },
                        );
                        Step::Waiting
                    }
                    Step::Done(result) => Step::Done(result.map(Answer::Host)),
                }
            }
            Request::NameInfo { address, flags } => {
                let wants_host = flags.contains(NameInfoFlags::LOOKUPHOST);
                let wants_service = flags.contains(NameInfoFlags::LOOKUPSERVICE);
                if !wants_host && !wants_service {
                    return Step::Done(Err(Status::BadFlags));
                }
                let service = wants_service.then(|| search::service_name(address.port(), flags));
                if !wants_host {
                    return Step::Done(Ok(Answer::NameInfo {
                        node: None,
                        service,
                    }));
                }
                if flags.contains(NameInfoFlags::NUMERICHOST) {
                    return Step::Done(Ok(Answer::NameInfo {
                        node: Some(address.ip().to_string()),
                        service,
                    }));
                }

                let mut reverse = ReverseSearch {
                    address: address.ip(),
                    sources: self.sources(),
                    failure: Failure::default(),
                };
                match self.step_reverse(owner, &mut reverse, now) {
                    Step::Waiting => {
                        self.lookups.insert(
                            owner,
                            Pending {
                                lookup: Lookup::NameInfo {
                                    reverse,
                                    flags,
                                    service,
                                },
                                timeouts: 0,
                            },
                        );
                        Step::Waiting
                    }
                    Step::Done(host) => {
                        Step::Done(Self::name_info_answer(address.ip(), flags, service, host))
                    }
                }
            }
        }
    }
}

impl Resolver for UdpResolver {
    fn init(config: &Config, socket_state: Option<SocketStateCallback>) -> Result<Self, Status> {
        if config.flags.contains(Flags::USEVC) {
            event!(Level::WARN, "TCP transport requested but not supported");
            return Err(Status::NotImplemented);
        }
        let servers = config
            .servers
            .iter()
            .map(|ip| Server {
                address: SocketAddr::new(*ip, config.udp_port),
                socket: None,
            })
            .collect();
        Ok(Self {
            config: config.clone(),
            servers,
            transactions: HashMap::new(),
            lookups: HashMap::new(),
            next_server: 0,
            socket_state,
            hosts_path: PathBuf::from(DEFAULT_HOSTS_PATH),
            buffer: Vec::new(),
        })
    }

    #[instrument(level = "trace", skip(self, now), name = "UdpResolver::submit")]
    fn submit(
        &mut self,
        handle: CallbackHandle,
        request: Request,
        now: Instant,
    ) -> Option<Completion> {
        match self.begin(handle, request, now) {
            Step::Waiting => None,
            Step::Done(outcome) => {
                self.release_idle_sockets();
                Some(Completion {
                    handle,
                    outcome,
                    timeouts: 0,
                })
            }
        }
    }

    fn advance(
        &mut self,
        readable: Option<Socket>,
        writable: Option<Socket>,
        now: Instant,
    ) -> Vec<Completion> {
        let mut completions = vec![];
        if let Some(socket) = readable {
            completions.extend(self.read(socket, now));
        }
        if let Some(socket) = writable {
            event!(Level::TRACE, socket, "ignoring writable socket");
        }
        completions.extend(self.expire(now));
        completions
    }

    fn cancel_all(&mut self) -> Vec<CallbackHandle> {
        self.transactions.clear();
        let handles = self.lookups.drain().map(|(handle, _)| handle).collect();
        self.release_idle_sockets();
        handles
    }

    fn sockets(&self) -> Vec<SocketInterest> {
        self.servers
            .iter()
            .filter_map(|server| server.socket.as_ref())
            .map(|socket| SocketInterest {
                socket: socket.as_raw_fd(),
                readable: true,
                writable: false,
            })
            .collect()
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.transactions
            .values()
            .map(|tx| tx.deadline.saturating_duration_since(now))
            .min()
    }

    fn servers(&self) -> Vec<IpAddr> {
        self.servers.iter().map(|server| server.address.ip()).collect()
    }

    fn set_servers(&mut self, servers: Vec<IpAddr>) -> Result<(), Status> {
        if !self.transactions.is_empty() {
            return Err(Status::NotImplemented);
        }
        for index in 0..self.servers.len() {
            self.close_socket(index);
        }
        self.servers = servers
            .iter()
            .map(|ip| Server {
                address: SocketAddr::new(*ip, self.config.udp_port),
                socket: None,
            })
            .collect();
        self.next_server = 0;
        self.config.servers = servers;
        Ok(())
    }

    fn set_local_ip(&mut self, address: IpAddr) {
        self.config.local_ip = Some(address);
    }

    fn set_local_dev(&mut self, dev: &str) {
        self.config.local_dev = Some(dev.to_string());
    }
}

impl Drop for UdpResolver {
    fn drop(&mut self) {
        for index in 0..self.servers.len() {
            self.close_socket(index);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::Channel;
    use crate::driver::run_until_idle;
    use crate::options::Options;
    use crate::record::{HostEntry, NameInfo, Record};

    use hickory_proto::op::{MessageType, OpCode};
    use hickory_server::authority::{AuthorityObject, Catalog, ZoneType};
    use hickory_server::proto::rr::{
        rdata, LowerName, Name, RData, Record as DnsRecord, RecordSet, RrKey,
    };
    use hickory_server::server::ServerFuture;
    use hickory_server::store::in_memory::InMemoryAuthority;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::rc::Rc;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup_tracing_subscriber() {
        use tracing_subscriber::fmt::format::FmtSpan;
        let _ = tracing_subscriber::fmt()
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    fn soa_record(name: &str) -> (RrKey, RecordSet) {
        (
            RrKey::new(LowerName::from_str(name).unwrap(), RecordType::SOA),
            DnsRecord::from_rdata(
                Name::from_utf8(name).unwrap(),
                0,
                RData::SOA(rdata::SOA::new(
                    Name::from_utf8(name).unwrap(),
                    Name::from_utf8(name).unwrap(),
                    1,
                    3600,
                    600,
                    86400,
                    60,
                )),
            )
            .into(),
        )
    }

    fn record_set(name: &str, rtype: RecordType, rdatas: Vec<RData>) -> (RrKey, RecordSet) {
        let owner = Name::from_utf8(name).unwrap();
        let mut set = RecordSet::new(&owner, rtype, 0);
        // Each record keeps its own TTL.
        for rdata in rdatas {
            set.insert(DnsRecord::from_rdata(owner.clone(), 120, rdata), 0);
        }
        (RrKey::new(LowerName::from_str(name).unwrap(), rtype), set)
    }

    fn authority(origin: &str, records: Vec<(RrKey, RecordSet)>) -> Box<dyn AuthorityObject> {
        let mut records: BTreeMap<RrKey, RecordSet> = records.into_iter().collect();
        records.extend([soa_record(origin)]);
        Box::new(Arc::new(
            InMemoryAuthority::new(
                Name::from_utf8(origin).unwrap(),
                records,
                ZoneType::Primary,
                false,
            )
            .unwrap(),
        ))
    }

    // Serves "example.com." and the reverse zone for 192.0.2.0/24 on a
    // loopback port.
    async fn start_dns_server() -> SocketAddr {
        start_dns_server_on("127.0.0.1:0").await
    }

    async fn start_dns_server_on(bind: &str) -> SocketAddr {
        let mut catalog = Catalog::new();
        catalog.upsert(
            LowerName::from_str("example.com.").unwrap(),
            authority(
                "example.com.",
                vec![
                    record_set(
                        "www.example.com.",
                        RecordType::A,
                        vec![
                            RData::A(rdata::A(Ipv4Addr::new(192, 0, 2, 10))),
                            RData::A(rdata::A(Ipv4Addr::new(192, 0, 2, 11))),
                        ],
                    ),
                    record_set(
                        "www.example.com.",
                        RecordType::TXT,
                        vec![RData::TXT(rdata::TXT::new(vec![
                            "hello ".to_string(),
                            "world".to_string(),
                        ]))],
                    ),
                    record_set(
                        "example.com.",
                        RecordType::MX,
                        vec![RData::MX(rdata::MX::new(
                            10,
                            Name::from_utf8("mail.example.com.").unwrap(),
                        ))],
                    ),
                ],
            ),
        );
        catalog.upsert(
            LowerName::from_str("2.0.192.in-addr.arpa.").unwrap(),
            authority(
                "2.0.192.in-addr.arpa.",
                vec![record_set(
                    "10.2.0.192.in-addr.arpa.",
                    RecordType::PTR,
                    vec![RData::PTR(rdata::PTR(
                        Name::from_utf8("www.example.com.").unwrap(),
                    ))],
                )],
            ),
        );

        let listener = tokio::net::UdpSocket::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        event!(Level::DEBUG, ?addr, "New DNS server on address");

        let mut server = ServerFuture::new(catalog);
        server.register_socket(listener);
        tokio::task::spawn(async move {
            server.block_until_done().await.unwrap();
        });
        addr
    }

    // Counts the queries it receives. Answers each one with `rcode` and no
    // records, or stays silent without one.
    async fn start_scripted_server(
        bind: &str,
        rcode: Option<ResponseCode>,
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let socket = tokio::net::UdpSocket::bind(bind).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        tokio::task::spawn(async move {
            let mut buffer = vec![0; RECV_BUFFER_SIZE];
            while let Ok((len, peer)) = socket.recv_from(&mut buffer).await {
                counter.fetch_add(1, Ordering::SeqCst);
                let Some(rcode) = rcode else {
                    continue;
                };
                let query = Message::from_vec(&buffer[..len]).unwrap();
                let mut response = Message::new();
                response
                    .set_id(query.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_response_code(rcode)
                    .add_queries(query.queries().to_vec());
                socket
                    .send_to(&response.to_vec().unwrap(), peer)
                    .await
                    .unwrap();
            }
        });
        (addr, seen)
    }

    // Two servers sharing one port on different loopback addresses, since
    // every server of a channel is reached on the same port.
    async fn start_server_pair(
        first: Option<ResponseCode>,
        second: Option<ResponseCode>,
    ) -> (u16, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (addr, first_seen) = start_scripted_server("127.0.0.1:0", first).await;
        let (_, second_seen) =
            start_scripted_server(&format!("127.0.0.2:{}", addr.port()), second).await;
        (addr.port(), first_seen, second_seen)
    }

    fn options_for_pair(port: u16) -> Options {
        Options {
            servers: vec!["127.0.0.1".to_string(), "127.0.0.2".to_string()],
            udp_port: Some(port),
            timeout: Some(Duration::from_millis(50)),
            tries: Some(1),
            lookups: Some("b".to_string()),
            ..Default::default()
        }
    }

    fn options_for(server: SocketAddr) -> Options {
        Options {
            servers: vec![server.ip().to_string()],
            udp_port: Some(server.port()),
            timeout: Some(Duration::from_millis(500)),
            tries: Some(2),
            lookups: Some("b".to_string()),
            ..Default::default()
        }
    }

    fn capture<T: 'static>() -> (
        Rc<RefCell<Option<Result<T, Status>>>>,
        impl FnOnce(Result<T, Status>) + 'static,
    ) {
        let slot = Rc::new(RefCell::new(None));
        let callback = {
            let slot = slot.clone();
            move |result: Result<T, Status>| {
                let previous = slot.borrow_mut().replace(result);
                assert!(previous.is_none(), "callback invoked twice");
            }
        };
        (slot, callback)
    }

    fn take<T>(slot: &Rc<RefCell<Option<Result<T, Status>>>>) -> Result<T, Status> {
        slot.borrow_mut().take().expect("callback was not invoked")
    }

    #[tokio::test]
    async fn test_query_records() {
        setup_tracing_subscriber();
        let server = start_dns_server().await;
        let mut channel = Channel::new(options_for(server)).unwrap();

        let (a, on_a) = capture::<Vec<Record>>();
        let (txt, on_txt) = capture::<Vec<Record>>();
        let (mx, on_mx) = capture::<Vec<Record>>();
        channel.query("www.example.com", QueryType::A, on_a).unwrap();
        channel.query("www.example.com", QueryType::Txt, on_txt).unwrap();
        channel.query("example.com", QueryType::Mx, on_mx).unwrap();
        assert_eq!(channel.pending(), 3);

        run_until_idle(&mut channel).await.unwrap();

        let mut hosts: Vec<_> = take(&a)
            .unwrap()
            .into_iter()
            .map(|record| match record {
                Record::Address { host, ttl } => {
                    assert_eq!(ttl, 120);
                    host
                }
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        hosts.sort();
        assert_eq!(hosts, vec!["192.0.2.10", "192.0.2.11"]);

        assert_eq!(
            take(&txt).unwrap(),
            vec![Record::Txt {
                text: b"hello world".to_vec(),
                ttl: 120
            }]
        );
        assert_eq!(
            take(&mx).unwrap(),
            vec![Record::Mx {
                host: "mail.example.com".to_string(),
                priority: 10,
                ttl: 120
            }]
        );
        channel.destroy().unwrap();
    }

    #[tokio::test]
    async fn test_missing_name() {
        setup_tracing_subscriber();
        let server = start_dns_server().await;
        let mut channel = Channel::new(options_for(server)).unwrap();

        let (missing, on_missing) = capture::<Vec<Record>>();
        let (no_data, on_no_data) = capture::<Vec<Record>>();
        channel
            .query("missing.example.com", QueryType::A, on_missing)
            .unwrap();
        channel
            .query("www.example.com", QueryType::Srv, on_no_data)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&missing), Err(Status::NotFound));
        assert_eq!(take(&no_data), Err(Status::NoData));
    }

    #[tokio::test]
    async fn test_host_lookups() {
        setup_tracing_subscriber();
        let server = start_dns_server().await;
        let mut channel = Channel::new(Options {
            domains: vec!["example.com".to_string()],
            ..options_for(server)
        })
        .unwrap();

        let (forward, on_forward) = capture::<HostEntry>();
        let (reverse, on_reverse) = capture::<HostEntry>();
        let (info, on_info) = capture::<NameInfo>();
        // Found through the search list.
        channel
            .gethostbyname("www", Family::Inet, on_forward)
            .unwrap();
        channel.gethostbyaddr("192.0.2.10", on_reverse).unwrap();
        channel
            .getnameinfo(
                ("192.0.2.10", 443),
                NameInfoFlags::LOOKUPHOST | NameInfoFlags::LOOKUPSERVICE | NameInfoFlags::NOFQDN,
                on_info,
            )
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        let forward = take(&forward).unwrap();
        assert_eq!(forward.name, "www.example.com");
        assert_eq!(forward.addresses.len(), 2);
        assert!(forward.addresses.contains(&"192.0.2.10".to_string()));

        let reverse = take(&reverse).unwrap();
        assert_eq!(reverse.name, "www.example.com");
        assert_eq!(reverse.addresses, vec!["192.0.2.10"]);

        assert_eq!(
            take(&info).unwrap(),
            NameInfo {
                node: Some("www".to_string()),
                service: Some("https".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_numeric_lookups_complete_immediately() {
        setup_tracing_subscriber();
        let mut channel = Channel::new(Options {
            lookups: Some("b".to_string()),
            ..Default::default()
        })
        .unwrap();

        let (host, on_host) = capture::<HostEntry>();
        channel
            .gethostbyname("192.0.2.1", Family::Unspec, on_host)
            .unwrap();
        assert_eq!(take(&host).unwrap().addresses, vec!["192.0.2.1"]);

        let (info, on_info) = capture::<NameInfo>();
        channel
            .getnameinfo(
                ("2001:db8::1", 53),
                NameInfoFlags::LOOKUPHOST
                    | NameInfoFlags::NUMERICHOST
                    | NameInfoFlags::LOOKUPSERVICE,
                on_info,
            )
            .unwrap();
        assert_eq!(
            take(&info).unwrap(),
            NameInfo {
                node: Some("2001:db8::1".to_string()),
                service: Some("domain".to_string()),
            }
        );

        let (bad, on_bad) = capture::<NameInfo>();
        channel
            .getnameinfo(("127.0.0.1", 80), NameInfoFlags::NOFQDN, on_bad)
            .unwrap();
        assert_eq!(take(&bad), Err(Status::BadFlags));
        assert_eq!(channel.pending(), 0);
        assert!(channel.socket_descriptors().unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_hosts_file_lookup() {
        setup_tracing_subscriber();
        let path = std::env::temp_dir().join(format!("dnschannel-hosts-{}", std::process::id()));
        std::fs::write(&path, "192.0.2.77 printer.lan printer\n").unwrap();

        let mut channel = Channel::new(Options {
            lookups: Some("fb".to_string()),
            ..Default::default()
        })
        .unwrap();
        channel.resolver_mut().unwrap().set_hosts_path(&path);

        let (host, on_host) = capture::<HostEntry>();
        channel
            .gethostbyname("printer", Family::Inet, on_host)
            .unwrap();
        let (addr, on_addr) = capture::<HostEntry>();
        channel.gethostbyaddr("192.0.2.77", on_addr).unwrap();
        std::fs::remove_file(&path).unwrap();

        let host = take(&host).unwrap();
        assert_eq!(host.name, "printer.lan");
        assert_eq!(host.aliases, vec!["printer"]);
        assert_eq!(take(&addr).unwrap().name, "printer.lan");
        // Answered without touching the network.
        assert!(channel.socket_descriptors().unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_against_silent_server() {
        setup_tracing_subscriber();
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();

        let mut channel = Channel::new(Options {
            timeout: Some(Duration::from_millis(50)),
            tries: Some(2),
            ..options_for(addr)
        })
        .unwrap();

        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        let started = Instant::now();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result), Err(Status::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(100));
        drop(silent);
    }

    #[tokio::test]
    async fn test_socket_state_delegate() {
        setup_tracing_subscriber();
        let server = start_dns_server().await;
        let events = Rc::new(RefCell::new(vec![]));
        let mut channel = {
            let events = events.clone();
            Channel::with_socket_state(
                options_for(server),
                move |socket: Socket, readable: bool, writable: bool| {
                    events.borrow_mut().push((socket, readable, writable));
                },
            )
            .unwrap()
        };

        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        let (read, write) = channel.socket_descriptors().unwrap();
        assert_eq!(read.len(), 1);
        assert!(write.is_empty());
        let fd = read[0];
        assert_eq!(*events.borrow(), vec![(fd, true, false)]);

        run_until_idle(&mut channel).await.unwrap();
        assert!(take(&result).is_ok());

        // The idle socket is closed once the answer arrives.
        assert_eq!(*events.borrow(), vec![(fd, true, false), (fd, false, false)]);
        assert!(channel.socket_descriptors().unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_stayopen_keeps_socket_until_destroy() {
        setup_tracing_subscriber();
        let server = start_dns_server().await;
        let events = Rc::new(RefCell::new(vec![]));
        let mut channel = {
            let events = events.clone();
            Channel::with_socket_state(
                Options {
                    flags: Some(Flags::STAYOPEN),
                    ..options_for(server)
                },
                move |socket: Socket, readable: bool, writable: bool| {
                    events.borrow_mut().push((socket, readable, writable));
                },
            )
            .unwrap()
        };

        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();
        assert!(take(&result).is_ok());
        assert_eq!(events.borrow().len(), 1);

        channel.destroy().unwrap();
        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], (events[0].0, false, false));
    }

    #[test]
    fn tcp_is_not_supported() {
        let err = Channel::new(Options {
            flags: Some(Flags::USEVC),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            crate::channel::Error::Resolver(Status::NotImplemented)
        ));
    }

    #[tokio::test]
    async fn test_cancel_releases_sockets() {
        setup_tracing_subscriber();
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut channel = Channel::new(options_for(silent.local_addr().unwrap())).unwrap();

        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        assert!(channel.next_timeout(None).unwrap() > Duration::ZERO);
        assert!(matches!(
            channel.set_servers(&["127.0.0.2"]),
            Err(crate::channel::Error::Resolver(Status::NotImplemented))
        ));

        channel.cancel().unwrap();
        assert_eq!(take(&result), Err(Status::Canceled));
        assert!(channel.socket_descriptors().unwrap().0.is_empty());
        channel.set_servers(&["127.0.0.2"]).unwrap();
        channel.destroy().unwrap();
    }

    #[tokio::test]
    async fn test_refused_port_reports_connection_refused() {
        setup_tracing_subscriber();
        let closed = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let mut channel = Channel::new(Options {
            tries: Some(1),
            ..options_for(addr)
        })
        .unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        let (read, _) = channel.socket_descriptors().unwrap();
        assert_eq!(read.len(), 1);

        // Give the port-unreachable error time to land on the socket.
        tokio::time::sleep(Duration::from_millis(50)).await;
        channel.advance(Some(read[0]), None).unwrap();

        assert_eq!(take(&result), Err(Status::ConnectionRefused));
        assert!(channel.socket_descriptors().unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_server_failure_moves_to_next_server() {
        setup_tracing_subscriber();
        let (failing, failing_seen) =
            start_scripted_server("127.0.0.1:0", Some(ResponseCode::ServFail)).await;
        start_dns_server_on(&format!("127.0.0.2:{}", failing.port())).await;

        let mut channel = Channel::new(Options {
            timeout: Some(Duration::from_millis(500)),
            ..options_for_pair(failing.port())
        })
        .unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result).unwrap().len(), 2);
        assert_eq!(failing_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nocheckresp_reports_server_failure() {
        setup_tracing_subscriber();
        let (failing, failing_seen) =
            start_scripted_server("127.0.0.1:0", Some(ResponseCode::ServFail)).await;
        start_dns_server_on(&format!("127.0.0.2:{}", failing.port())).await;

        let mut channel = Channel::new(Options {
            flags: Some(Flags::NOCHECKRESP),
            timeout: Some(Duration::from_millis(500)),
            ..options_for_pair(failing.port())
        })
        .unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result), Err(Status::ServerFailure));
        assert_eq!(failing_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_answer_exhausts_every_server() {
        setup_tracing_subscriber();
        let (port, first, second) = start_server_pair(
            Some(ResponseCode::Refused),
            Some(ResponseCode::Refused),
        )
        .await;

        let mut channel = Channel::new(options_for_pair(port)).unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result), Err(Status::Refused));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rotate_alternates_first_server() {
        setup_tracing_subscriber();
        let (port, first, second) = start_server_pair(None, None).await;

        let mut channel = Channel::new(Options {
            rotate: true,
            timeout: Some(Duration::from_secs(5)),
            ..options_for_pair(port)
        })
        .unwrap();
        let mut results = vec![];
        for _ in 0..2 {
            let (result, on_result) = capture::<Vec<Record>>();
            channel
                .query("www.example.com", QueryType::A, on_result)
                .unwrap();
            results.push(result);
        }
        let mut starts: Vec<usize> = channel
            .resolver()
            .unwrap()
            .transactions
            .values()
            .map(|tx| tx.first_server)
            .collect();
        starts.sort();
        assert_eq!(starts, vec![0, 1]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        channel.cancel().unwrap();
        for result in &results {
            assert_eq!(take(result), Err(Status::Canceled));
        }
    }

    #[tokio::test]
    async fn test_without_rotate_every_query_starts_at_first_server() {
        setup_tracing_subscriber();
        let (port, first, second) = start_server_pair(None, None).await;

        let mut channel = Channel::new(Options {
            timeout: Some(Duration::from_secs(5)),
            ..options_for_pair(port)
        })
        .unwrap();
        for _ in 0..2 {
            let (_, on_result) = capture::<Vec<Record>>();
            channel
                .query("www.example.com", QueryType::A, on_result)
                .unwrap();
        }
        assert!(channel
            .resolver()
            .unwrap()
            .transactions
            .values()
            .all(|tx| tx.first_server == 0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        channel.cancel().unwrap();
    }

    #[tokio::test]
    async fn test_primary_only_contacts_first_server() {
        setup_tracing_subscriber();
        let (port, first, second) = start_server_pair(None, None).await;

        let mut channel = Channel::new(Options {
            flags: Some(Flags::PRIMARY),
            rotate: true,
            tries: Some(2),
            ..options_for_pair(port)
        })
        .unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        let started = Instant::now();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result), Err(Status::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Two tries, both at the first server.
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeouts_walk_the_server_list() {
        setup_tracing_subscriber();
        let (port, first, second) = start_server_pair(None, None).await;

        let mut channel = Channel::new(Options {
            tries: Some(2),
            ..options_for_pair(port)
        })
        .unwrap();
        let (result, on_result) = capture::<Vec<Record>>();
        channel
            .query("www.example.com", QueryType::A, on_result)
            .unwrap();
        run_until_idle(&mut channel).await.unwrap();

        assert_eq!(take(&result), Err(Status::Timeout));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }
}
