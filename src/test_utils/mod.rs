//! Utilities to help with testing channels

use crate::options::Config;
use crate::record::QueryType;
use crate::registry::CallbackHandle;
use crate::reply::Reply;
use crate::resolver::{
    Answer, Completion, Request, Resolver, Socket, SocketInterest, SocketStateCallback,
};
use crate::status::Status;
use crate::wire;

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// The descriptor a [FakeResolver] claims to be using.
pub const FAKE_SOCKET: Socket = 1000;

thread_local! {
    static INITS: Cell<usize> = const { Cell::new(0) };
}

/// How many [FakeResolver]s this thread has created.
pub fn init_count() -> usize {
    INITS.with(|inits| inits.get())
}

/// A test-only resolver core which performs no I/O.
///
/// Requests are recorded, and stay outstanding until the test scripts a
/// completion for them with [FakeResolver::complete].
pub struct FakeResolver {
    /// Every request submitted, in order.
    pub requests: Vec<(CallbackHandle, Request)>,

    /// Reported by [Resolver::next_timeout] while requests are outstanding.
    pub timeout: Option<Duration>,

    pub servers: Vec<IpAddr>,
    pub local_ip: Option<IpAddr>,
    pub local_dev: Option<String>,

    outstanding: Vec<CallbackHandle>,
    scripted: VecDeque<Completion>,
    immediate: Option<Result<Answer, Status>>,
    replies: HashMap<QueryType, Result<Reply, Status>>,
    socket_state: Option<SocketStateCallback>,
}

impl std::fmt::Debug for FakeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeResolver")
            .field("requests", &self.requests)
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}

impl FakeResolver {
    /// Queues `outcome` for `handle`, delivered by the next advance.
    pub fn complete(&mut self, handle: CallbackHandle, outcome: Result<Answer, Status>) {
        self.scripted.push_back(Completion {
            handle,
            outcome,
            timeouts: 0,
        });
    }

    /// Answers the next submission synchronously with `outcome`.
    pub fn respond_immediately(&mut self, outcome: Result<Answer, Status>) {
        self.immediate = Some(outcome);
    }

    /// Makes [Resolver::parse_reply] return `reply` for `qtype`, whatever
    /// the buffer. Types without a scripted reply parse as [Status::NoData].
    pub fn set_reply(&mut self, qtype: QueryType, reply: Result<Reply, Status>) {
        self.replies.insert(qtype, reply);
    }

    pub fn outstanding(&self) -> &[CallbackHandle] {
        &self.outstanding
    }

    fn notify(&mut self, readable: bool) {
        if let Some(socket_state) = &mut self.socket_state {
            socket_state(FAKE_SOCKET, readable, false);
        }
    }

    fn retire(&mut self, handle: CallbackHandle) {
        self.outstanding.retain(|h| *h != handle);
        if self.outstanding.is_empty() {
            self.notify(false);
        }
    }
}

impl Resolver for FakeResolver {
    fn init(config: &Config, socket_state: Option<SocketStateCallback>) -> Result<Self, Status> {
        INITS.with(|inits| inits.set(inits.get() + 1));
        Ok(Self {
            requests: vec![],
            timeout: None,
            servers: config.servers.clone(),
            local_ip: config.local_ip,
            local_dev: config.local_dev.clone(),
            outstanding: vec![],
            scripted: VecDeque::new(),
            immediate: None,
            replies: HashMap::new(),
            socket_state,
        })
    }

    fn submit(
        &mut self,
        handle: CallbackHandle,
        request: Request,
        _now: Instant,
    ) -> Option<Completion> {
        self.requests.push((handle, request));
        if let Some(outcome) = self.immediate.take() {
            return Some(Completion {
                handle,
                outcome,
                timeouts: 0,
            });
        }
        if self.outstanding.is_empty() {
            self.notify(true);
        }
        self.outstanding.push(handle);
        None
    }

    fn advance(
        &mut self,
        _readable: Option<Socket>,
        _writable: Option<Socket>,
        _now: Instant,
    ) -> Vec<Completion> {
        let completions: Vec<_> = self.scripted.drain(..).collect();
        for completion in &completions {
            if self.outstanding.contains(&completion.handle) {
                self.retire(completion.handle);
            }
        }
        completions
    }

    fn cancel_all(&mut self) -> Vec<CallbackHandle> {
        let handles = std::mem::take(&mut self.outstanding);
        self.scripted.clear();
        if !handles.is_empty() {
            self.notify(false);
        }
        handles
    }

    fn sockets(&self) -> Vec<SocketInterest> {
        if self.outstanding.is_empty() {
            return vec![];
        }
        vec![SocketInterest {
            socket: FAKE_SOCKET,
            readable: true,
            writable: false,
        }]
    }

    fn next_timeout(&self, _now: Instant) -> Option<Duration> {
        if self.outstanding.is_empty() {
            None
        } else {
            self.timeout
        }
    }

    fn servers(&self) -> Vec<IpAddr> {
        self.servers.clone()
    }

    fn set_servers(&mut self, servers: Vec<IpAddr>) -> Result<(), Status> {
        self.servers = servers;
        Ok(())
    }

    fn set_local_ip(&mut self, address: IpAddr) {
        self.local_ip = Some(address);
    }

    fn set_local_dev(&mut self, dev: &str) {
        self.local_dev = Some(dev.to_string());
    }

    fn parse_reply(&self, buffer: &[u8], qtype: QueryType) -> Result<Reply, Status> {
        if self.replies.is_empty() {
            return wire::parse_reply(buffer, qtype);
        }
        self.replies.get(&qtype).cloned().unwrap_or(Err(Status::NoData))
    }
}
