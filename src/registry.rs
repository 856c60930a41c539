//! Ownership of per-request callbacks.
//!
//! The registry is the only owner of a request's callback. Resolver cores
//! hold a [CallbackHandle], which is `Copy` and generational: once the entry
//! behind it has been resolved, the handle can never find anything again.

use crate::record::{HostEntry, NameInfo, QueryType, Record};
use crate::status::Status;

use debug_ignore::DebugIgnore;
use slotmap::{new_key_type, Key, SlotMap};
use thiserror::Error;

new_key_type! {
    /// Identifies one outstanding request.
    pub struct CallbackHandle;
}

impl CallbackHandle {
    /// A stable numeric form, for logs and probes.
    pub fn as_u64(&self) -> u64 {
        self.data().as_ffi()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no outstanding request for handle {0:?}")]
    UnknownHandle(CallbackHandle),
}

pub type QueryCallback = Box<dyn FnOnce(Result<Vec<Record>, Status>)>;
pub type HostCallback = Box<dyn FnOnce(Result<HostEntry, Status>)>;
pub type NameInfoCallback = Box<dyn FnOnce(Result<NameInfo, Status>)>;

/// A user callback, tagged with what it expects to receive.
#[derive(Debug)]
pub enum Callback {
    Query {
        callback: DebugIgnore<QueryCallback>,
        qtype: QueryType,
    },
    Host(DebugIgnore<HostCallback>),
    NameInfo(DebugIgnore<NameInfoCallback>),
}

impl Callback {
    pub fn query(
        qtype: QueryType,
        callback: impl FnOnce(Result<Vec<Record>, Status>) + 'static,
    ) -> Self {
        Callback::Query {
            callback: DebugIgnore(Box::new(callback)),
            qtype,
        }
    }

    pub fn host(callback: impl FnOnce(Result<HostEntry, Status>) + 'static) -> Self {
        Callback::Host(DebugIgnore(Box::new(callback)))
    }

    pub fn name_info(callback: impl FnOnce(Result<NameInfo, Status>) + 'static) -> Self {
        Callback::NameInfo(DebugIgnore(Box::new(callback)))
    }

    /// Consumes the callback, delivering `status` whatever its kind.
    pub fn fail(self, status: Status) {
        match self {
            Callback::Query { callback, .. } => (callback.0)(Err(status)),
            Callback::Host(callback) => (callback.0)(Err(status)),
            Callback::NameInfo(callback) => (callback.0)(Err(status)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Callback::Query { .. } => "query",
            Callback::Host(_) => "host",
            Callback::NameInfo(_) => "nameinfo",
        }
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    callback: Callback,
}

/// Arena of outstanding callbacks, in submission order.
#[derive(Debug)]
pub struct Registry {
    entries: SlotMap<CallbackHandle, Entry>,
    next_seq: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: SlotMap::with_key(),
            next_seq: 0,
        }
    }

    pub fn register(&mut self, callback: Callback) -> CallbackHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(Entry { seq, callback })
    }

    /// Removes the entry for `handle`, returning its callback.
    ///
    /// Each handle resolves at most once.
    pub fn resolve(&mut self, handle: CallbackHandle) -> Result<Callback, Error> {
        self.entries
            .remove(handle)
            .map(|entry| entry.callback)
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Empties the registry, oldest request first.
    pub fn drain_canceled(&mut self) -> Vec<(CallbackHandle, Callback)> {
        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(handle, entry)| (handle, entry.callback))
            .collect()
    }

    pub fn contains(&self, handle: CallbackHandle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
