//! Lookups against a hosts(5) file.

use crate::address::Family;
use crate::reply::Hostent;

use std::io;
use std::net::IpAddr;
use std::path::Path;
use tracing::{event, Level};

pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    address: IpAddr,
    canonical: String,
    aliases: Vec<String>,
}

impl Entry {
    fn matches(&self, name: &str) -> bool {
        self.canonical.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }
}

/// The parsed contents of a hosts file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hosts {
    entries: Vec<Entry>,
}

impl Hosts {
    /// Parses hosts-file text, skipping malformed lines.
    pub fn parse(text: &str) -> Self {
        let mut entries = vec![];
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let mut tokens = line.split_whitespace();
            let (Some(address), Some(canonical)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let address = match address.parse::<IpAddr>() {
                Ok(address) => address,
                Err(_) => {
                    event!(Level::WARN, address, "skipping hosts entry with bad address");
                    continue;
                }
            };
            entries.push(Entry {
                address,
                canonical: canonical.to_string(),
                aliases: tokens.map(str::to_string).collect(),
            });
        }
        Self { entries }
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Finds every address of `family` for `name`.
    ///
    /// For [Family::Unspec], IPv4 addresses are preferred; IPv6 ones are
    /// returned only if there are none.
    pub fn by_name(&self, name: &str, family: Family) -> Option<Hostent> {
        let name = name.strip_suffix('.').unwrap_or(name);
        match family {
            Family::Unspec => self
                .by_name(name, Family::Inet)
                .or_else(|| self.by_name(name, Family::Inet6)),
            family => {
                let of_family = |entry: &&Entry| Family::of(&entry.address) == family;
                let first = self
                    .entries
                    .iter()
                    .filter(of_family)
                    .find(|entry| entry.matches(name))?;

                // Every line for the same canonical host contributes.
                let mut hostent = Hostent {
                    name: first.canonical.clone(),
                    aliases: vec![],
                    addresses: vec![],
                };
                for entry in self.entries.iter().filter(of_family) {
                    if !entry.canonical.eq_ignore_ascii_case(&first.canonical) {
                        continue;
                    }
                    if !hostent.addresses.contains(&entry.address) {
                        hostent.addresses.push(entry.address);
                    }
                    for alias in &entry.aliases {
                        if !hostent.aliases.contains(alias) {
                            hostent.aliases.push(alias.clone());
                        }
                    }
                }
                Some(hostent)
            }
        }
    }

    /// Finds the first entry for `address`.
    pub fn by_addr(&self, address: IpAddr) -> Option<Hostent> {
        self.entries
            .iter()
            .find(|entry| entry.address == address)
            .map(|entry| Hostent {
                name: entry.canonical.clone(),
                aliases: entry.aliases.clone(),
                addresses: vec![address],
            })
    }
}
