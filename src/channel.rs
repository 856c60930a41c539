//! The top-level resolution channel.

use crate::address::{self, Family};
use crate::dispatch::{Dispatcher, HostLookup};
use crate::normalize;
use crate::options::{self, Config, NameInfoFlags, Options};
#[cfg(feature = "probes")]
use crate::probes;
use crate::record::{HostEntry, NameInfo, QueryType, Record};
use crate::registry::{self, Callback, Registry};
use crate::resolver::{Answer, Completion, Resolver, Socket, SocketStateCallback};
use crate::resolvers::udp::UdpResolver;
use crate::status::Status;

use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("channel has been destroyed")]
    Destroyed,

    #[error("invalid channel configuration")]
    Config(#[from] options::Error),

    #[error("invalid address")]
    Address(#[from] address::Error),

    #[error("invalid query type {0}")]
    InvalidQueryType(u16),

    #[error("invalid address family {0}")]
    InvalidFamily(i32),

    #[error(transparent)]
    Registry(#[from] registry::Error),

    #[error("{0} queries still pending; cancel them first")]
    QueriesPending(usize),

    #[error("resolver refused the operation: {0}")]
    Resolver(Status),

    #[error("I/O error driving the channel")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct Inner<R> {
    resolver: R,
    registry: Registry,
    config: Config,
}

impl<R: Resolver> Inner<R> {
    fn dispatcher(&mut self) -> Dispatcher<'_, R> {
        Dispatcher {
            registry: &mut self.registry,
            resolver: &mut self.resolver,
        }
    }

    /// Hands a finished request to its callback.
    fn deliver(&mut self, completion: Completion) -> Result<(), registry::Error> {
        let Completion {
            handle,
            outcome,
            timeouts,
        } = completion;
        let callback = self.registry.resolve(handle)?;

        event!(
            Level::DEBUG,
            handle = handle.as_u64(),
            kind = callback.kind(),
            timeouts,
            status = match &outcome {
                Ok(_) => "SUCCESS",
                Err(status) => status.as_str(),
            },
            "delivering completion"
        );
        #[cfg(feature = "probes")]
        probes::query__done!(|| (
            handle.as_u64(),
            match &outcome {
                Ok(_) => "SUCCESS",
                Err(status) => status.as_str(),
            }
        ));

        match callback {
            Callback::Query { callback, qtype } => {
                let raw = match &outcome {
                    Ok(Answer::Raw(buffer)) => Ok(buffer.as_slice()),
                    Ok(_) => Err(Status::BadResponse),
                    Err(status) => Err(*status),
                };
                let resolver = &self.resolver;
                let result = normalize::normalize(
                    |buffer, qtype| resolver.parse_reply(buffer, qtype),
                    qtype,
                    raw,
                );
                (callback.0)(result);
            }
            Callback::Host(callback) => {
                let result = match outcome {
                    Ok(Answer::Host(hostent)) => Ok(normalize::host_entry(hostent)),
                    Ok(_) => Err(Status::BadResponse),
                    Err(status) => Err(status),
                };
                (callback.0)(result);
            }
            Callback::NameInfo(callback) => {
                let result = match outcome {
                    Ok(Answer::NameInfo { node, service }) => Ok(NameInfo { node, service }),
                    Ok(_) => Err(Status::BadResponse),
                    Err(status) => Err(status),
                };
                (callback.0)(result);
            }
        }
        Ok(())
    }

    fn deliver_all(
        &mut self,
        completions: impl IntoIterator<Item = Completion>,
    ) -> Result<(), registry::Error> {
        let mut first_err = None;
        for completion in completions {
            if let Err(err) = self.deliver(completion) {
                event!(Level::ERROR, ?err, "resolver completed an unknown request");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Fails every registered callback with `status`, oldest first.
    fn drain(&mut self, status: Status) -> usize {
        let abandoned = self.resolver.cancel_all();
        let callbacks = self.registry.drain_canceled();
        if abandoned.len() != callbacks.len() {
            event!(
                Level::DEBUG,
                abandoned = abandoned.len(),
                registered = callbacks.len(),
                "resolver and registry disagree on outstanding requests"
            );
        }
        let count = callbacks.len();
        for (handle, callback) in callbacks {
            #[cfg(feature = "probes")]
            probes::query__done!(|| (handle.as_u64(), status.as_str()));
            event!(Level::TRACE, handle = handle.as_u64(), %status, "failing request");
            callback.fail(status);
        }
        count
    }
}

/// A resolution channel.
///
/// The channel owns a [Resolver] core and every callback submitted through
/// it. Nothing happens in the background: the caller watches the sockets
/// reported by [Channel::socket_descriptors], and calls [Channel::advance]
/// when one is ready or when [Channel::next_timeout] elapses. Callbacks run
/// synchronously inside those calls, exactly once per request.
///
/// Once destroyed, every operation fails with [Error::Destroyed].
pub struct Channel<R: Resolver = UdpResolver> {
    inner: Option<Inner<R>>,
}

impl<R: Resolver + std::fmt::Debug> std::fmt::Debug for Channel<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("inner", &self.inner).finish()
    }
}

impl Channel<UdpResolver> {
    /// Creates a channel using the bundled UDP core.
    pub fn new(options: Options) -> Result<Self, Error> {
        Self::configure(options, None)
    }

    /// Like [Channel::new], notifying `socket_state` as sockets open and
    /// close.
    pub fn with_socket_state(
        options: Options,
        socket_state: impl FnMut(Socket, bool, bool) + 'static,
    ) -> Result<Self, Error> {
        Self::configure(options, Some(Box::new(socket_state)))
    }
}

impl<R: Resolver> Channel<R> {
    /// Validates `options`, then creates the resolver core.
    ///
    /// If any option is invalid, no core is created.
    #[instrument(skip(socket_state), err, name = "Channel::configure")]
    pub fn configure(
        options: Options,
        socket_state: Option<SocketStateCallback>,
    ) -> Result<Self, Error> {
        let config = options.validate()?;

        #[cfg(feature = "probes")]
        if let Err(err) = usdt::register_probes() {
            event!(Level::WARN, ?err, "failed to register USDT probes");
        }

        let resolver = R::init(&config, socket_state).map_err(Error::Resolver)?;
        event!(Level::DEBUG, ?config, "channel configured");
        Ok(Self {
            inner: Some(Inner {
                resolver,
                registry: Registry::new(),
                config,
            }),
        })
    }

    fn inner(&self) -> Result<&Inner<R>, Error> {
        self.inner.as_ref().ok_or(Error::Destroyed)
    }

    fn inner_mut(&mut self) -> Result<&mut Inner<R>, Error> {
        self.inner.as_mut().ok_or(Error::Destroyed)
    }

    /// Looks up records of `qtype` for `name`.
    ///
    /// With [QueryType::Any], every record type present in the answer is
    /// returned, in a fixed type order.
    pub fn query(
        &mut self,
        name: &str,
        qtype: QueryType,
        callback: impl FnOnce(Result<Vec<Record>, Status>) + 'static,
    ) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let fast = inner.dispatcher().submit(name, qtype, callback);
        inner.deliver_all(fast)?;
        Ok(())
    }

    /// Like [Channel::query], with the record type given by its numeric code.
    pub fn query_code(
        &mut self,
        name: &str,
        code: u16,
        callback: impl FnOnce(Result<Vec<Record>, Status>) + 'static,
    ) -> Result<(), Error> {
        let qtype = QueryType::try_from(code).map_err(Error::InvalidQueryType)?;
        self.query(name, qtype, callback)
    }

    /// Resolves `name` to addresses of `family`.
    ///
    /// [Family::Unspec] tries IPv4 first, then IPv6.
    pub fn gethostbyname(
        &mut self,
        name: &str,
        family: Family,
        callback: impl FnOnce(Result<HostEntry, Status>) + 'static,
    ) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let fast = inner
            .dispatcher()
            .submit_host_lookup(HostLookup::ByName { name, family }, callback)?;
        inner.deliver_all(fast)?;
        Ok(())
    }

    /// Like [Channel::gethostbyname], with the family given by its `AF_*`
    /// value.
    pub fn gethostbyname_af(
        &mut self,
        name: &str,
        af: i32,
        callback: impl FnOnce(Result<HostEntry, Status>) + 'static,
    ) -> Result<(), Error> {
        let family = Family::try_from(af).map_err(Error::InvalidFamily)?;
        self.gethostbyname(name, family, callback)
    }

    /// Finds the host names of a textual IPv4 or IPv6 address.
    pub fn gethostbyaddr(
        &mut self,
        address: &str,
        callback: impl FnOnce(Result<HostEntry, Status>) + 'static,
    ) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let fast = inner
            .dispatcher()
            .submit_host_lookup(HostLookup::ByAddr(address), callback)?;
        inner.deliver_all(fast)?;
        Ok(())
    }

    /// Translates an address and port into a host and service name.
    pub fn getnameinfo(
        &mut self,
        address: (&str, u16),
        flags: NameInfoFlags,
        callback: impl FnOnce(Result<NameInfo, Status>) + 'static,
    ) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let fast = inner
            .dispatcher()
            .submit_nameinfo(address, flags, callback)?;
        inner.deliver_all(fast)?;
        Ok(())
    }

    /// The configured nameservers, as text.
    pub fn servers(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .inner()?
            .resolver
            .servers()
            .iter()
            .map(address::ip_to_text)
            .collect())
    }

    /// Replaces the nameservers.
    ///
    /// Every entry is checked before the core is touched.
    pub fn set_servers<S: AsRef<str>>(&mut self, servers: &[S]) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let servers = servers
            .iter()
            .map(|server| address::parse_ip(server.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        inner
            .resolver
            .set_servers(servers.clone())
            .map_err(Error::Resolver)?;
        inner.config.servers = servers;
        Ok(())
    }

    pub fn local_ip(&self) -> Result<Option<String>, Error> {
        Ok(self.inner()?.config.local_ip.as_ref().map(address::ip_to_text))
    }

    /// Sets the source address for queries sent from now on.
    pub fn set_local_ip(&mut self, ip: &str) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let address = address::parse_ip(ip)?;
        inner.resolver.set_local_ip(address);
        inner.config.local_ip = Some(address);
        Ok(())
    }

    pub fn local_dev(&self) -> Result<Option<String>, Error> {
        Ok(self.inner()?.config.local_dev.clone())
    }

    /// Binds sockets opened from now on to the interface `dev`.
    pub fn set_local_dev(&mut self, dev: &str) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        options::validate_local_dev(dev)?;
        inner.resolver.set_local_dev(dev);
        inner.config.local_dev = Some(dev.to_string());
        Ok(())
    }

    /// Sockets to watch, as `(readable, writable)` sets.
    pub fn socket_descriptors(&self) -> Result<(Vec<Socket>, Vec<Socket>), Error> {
        let (mut read, mut write) = (vec![], vec![]);
        for interest in self.inner()?.resolver.sockets() {
            if interest.readable {
                read.push(interest.socket);
            }
            if interest.writable {
                write.push(interest.socket);
            }
        }
        Ok((read, write))
    }

    /// Processes readiness on `readable` and `writable`, and any expired
    /// timeouts, invoking the callbacks of every request that finishes.
    ///
    /// Callbacks are invoked in the order the core completes them. If the
    /// core reports a request the channel does not know, the rest are still
    /// delivered and the first such fault is returned.
    #[instrument(level = "trace", skip(self), err, name = "Channel::advance")]
    pub fn advance(
        &mut self,
        readable: Option<Socket>,
        writable: Option<Socket>,
    ) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let completions = inner.resolver.advance(readable, writable, Instant::now());
        inner.deliver_all(completions)?;
        Ok(())
    }

    /// How long the caller may wait before calling [Channel::advance]
    /// without any socket activity, bounded by `cap`.
    ///
    /// With nothing pending this is `cap`, or zero.
    pub fn next_timeout(&self, cap: Option<Duration>) -> Result<Duration, Error> {
        let inner = self.inner()?;
        let next = match inner.resolver.next_timeout(Instant::now()) {
            Some(next) if !inner.registry.is_empty() => next,
            _ => return Ok(cap.unwrap_or(Duration::ZERO)),
        };
        Ok(cap.map_or(next, |cap| next.min(cap)))
    }

    /// Completes every pending request with [Status::Canceled].
    #[instrument(level = "debug", skip(self), err, name = "Channel::cancel")]
    pub fn cancel(&mut self) -> Result<(), Error> {
        let inner = self.inner_mut()?;
        let count = inner.drain(Status::Canceled);
        #[cfg(feature = "probes")]
        probes::channel__cancel!(|| count as u64);
        event!(Level::DEBUG, count, "canceled pending requests");
        Ok(())
    }

    /// Releases the resolver core and its sockets.
    ///
    /// Destroying an already destroyed channel does nothing. Pending requests
    /// must be canceled first.
    #[instrument(level = "debug", skip(self), err, name = "Channel::destroy")]
    pub fn destroy(&mut self) -> Result<(), Error> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        if !inner.registry.is_empty() {
            return Err(Error::QueriesPending(inner.registry.len()));
        }
        self.inner = None;
        event!(Level::DEBUG, "channel destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_none()
    }

    /// The configuration the channel runs with.
    pub fn config(&self) -> Result<&Config, Error> {
        Ok(&self.inner()?.config)
    }

    /// Number of requests still waiting for a callback.
    pub fn pending(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.registry.len())
    }

    pub fn resolver(&self) -> Result<&R, Error> {
        Ok(&self.inner()?.resolver)
    }

    pub fn resolver_mut(&mut self) -> Result<&mut R, Error> {
        Ok(&mut self.inner_mut()?.resolver)
    }
}

impl<R: Resolver> Drop for Channel<R> {
    fn drop(&mut self) {
        let Some(inner) = &mut self.inner else {
            return;
        };
        if !inner.registry.is_empty() {
            event!(
                Level::WARN,
                pending = inner.registry.len(),
                "channel dropped with pending requests"
            );
            inner.drain(Status::Destroyed);
        }
    }
}
