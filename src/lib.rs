//! dnschannel is a callback-driven asynchronous DNS resolution crate.
//!
//! dnschannel offers resolution "channels": independent resolver instances
//! that accept lookups, hand results to caller-supplied callbacks, and leave
//! the event loop to the caller.
//!
//! It uses the following terminology:
//! * A channel owns a resolver core and the callbacks waiting on it.
//! * A resolver core performs the DNS I/O: it sends queries, watches sockets,
//!   and reports finished requests back to the channel.
//! * Records are the normalized, typed results handed to query callbacks.
//!
//! # Usage
//!
//! * The main interface for this crate is [channel::Channel].
//! * A channel is built from [options::Options], and uses the bundled
//!   [resolvers::udp::UdpResolver] unless another [resolver::Resolver] is
//!   supplied.
//! * Callers either watch [channel::Channel::socket_descriptors] in their own
//!   loop, calling [channel::Channel::advance], or let
//!   [driver::run_until_idle] do it on tokio.
//!
//! # DTrace probes
//!
//! dnschannel contains a few DTrace USDT probes, which fire as requests move
//! through a channel. The full list of probes is:
//!
//! - `query-start`: Fires when a request is handed to the resolver core.
//! - `query-done`: Fires just before a request's callback is invoked, with
//!   the status it completed with.
//! - `channel-cancel`: Fires when a channel cancels its pending requests.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly enabled,
//! by tracing the program with the `dtrace(1)` command-line tool.
//!
//! Registering the probes is technically fallible. A failure is logged when a
//! channel is configured, and the channel works without them.

// Public API
pub mod address;
pub mod channel;
pub mod driver;
pub mod normalize;
pub mod options;
pub mod record;
pub mod registry;
pub mod reply;
pub mod resolver;
pub mod status;
pub mod wire;

// Necessary for implementation
mod dispatch;
#[cfg(test)]
mod test_utils;

// Default implementations of generic interfaces
pub mod resolvers;

/// USDT probes for tracing requests through a channel.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "dnschannel")]
mod probes {
    /// Fires when a request is submitted to the resolver core, with the kind
    /// of request and the handle identifying its callback.
    fn query__start(kind: &str, handle: u64) {}

    /// Fires right before a request's callback runs, with a string naming
    /// the outcome.
    fn query__done(handle: u64, status: &str) {}

    /// Fires when pending requests are canceled, with how many there were.
    fn channel__cancel(count: u64) {}
}
