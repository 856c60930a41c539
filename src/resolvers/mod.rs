//! Default implementations of [crate::resolver::Resolver]

pub mod hosts;
pub(crate) mod search;
pub mod udp;
