//! Validation and forwarding of requests to a resolver core.

use crate::address::{self, Family};
use crate::channel::Error;
use crate::options::NameInfoFlags;
#[cfg(feature = "probes")]
use crate::probes;
use crate::record::{HostEntry, NameInfo, QueryType, Record};
use crate::registry::{Callback, Registry};
use crate::resolver::{Completion, Request, Resolver};
use crate::status::Status;

use std::net::SocketAddr;
use std::time::Instant;
use tracing::{event, Level};

/// Target of a host lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum HostLookup<'a> {
    ByName { name: &'a str, family: Family },
    ByAddr(&'a str),
}

/// Registers callbacks and hands the matching request to the core.
///
/// Everything that can be rejected synchronously is rejected before the
/// callback is registered, so a failed submission leaves no trace.
pub(crate) struct Dispatcher<'a, R> {
    pub registry: &'a mut Registry,
    pub resolver: &'a mut R,
}

impl<R: Resolver> Dispatcher<'_, R> {
    fn dispatch(&mut self, request: Request, callback: Callback) -> Option<Completion> {
        let handle = self.registry.register(callback);
        event!(Level::DEBUG, handle = handle.as_u64(), ?request, "submitting");
        #[cfg(feature = "probes")]
        probes::query__start!(|| (request.kind(), handle.as_u64()));

        self.resolver.submit(handle, request, Instant::now())
    }

    pub fn submit(
        &mut self,
        name: &str,
        qtype: QueryType,
        callback: impl FnOnce(Result<Vec<Record>, Status>) + 'static,
    ) -> Option<Completion> {
        self.dispatch(
            Request::Query {
                name: name.to_string(),
                qtype,
            },
            Callback::query(qtype, callback),
        )
    }

    pub fn submit_host_lookup(
        &mut self,
        lookup: HostLookup<'_>,
        callback: impl FnOnce(Result<HostEntry, Status>) + 'static,
    ) -> Result<Option<Completion>, Error> {
        let request = match lookup {
            HostLookup::ByName { name, family } => Request::HostByName {
                name: name.to_string(),
                family,
            },
            HostLookup::ByAddr(text) => Request::HostByAddr {
                address: address::parse_ip(text)?,
            },
        };
        Ok(self.dispatch(request, Callback::host(callback)))
    }

    pub fn submit_nameinfo(
        &mut self,
        (ip, port): (&str, u16),
        flags: NameInfoFlags,
        callback: impl FnOnce(Result<NameInfo, Status>) + 'static,
    ) -> Result<Option<Completion>, Error> {
        let address = SocketAddr::new(address::parse_ip(ip)?, port);
        Ok(self.dispatch(
            Request::NameInfo { address, flags },
            Callback::name_info(callback),
        ))
    }
}
