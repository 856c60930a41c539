//! Name expansion and service naming for host and name-info lookups.

use crate::options::{Config, Flags, NameInfoFlags};

/// The names to try, in order, when looking up `name`.
///
/// An absolute name (trailing dot) is tried only as given. Otherwise the
/// search domains are appended; a name with at least `ndots` dots is tried
/// as-is first, anything shorter last.
pub(crate) fn candidates(name: &str, config: &Config) -> Vec<String> {
    if let Some(absolute) = name.strip_suffix('.') {
        return vec![absolute.to_string()];
    }
    if config.flags.contains(Flags::NOSEARCH) || config.domains.is_empty() {
        return vec![name.to_string()];
    }

    let searched = config
        .domains
        .iter()
        .map(|domain| format!("{name}.{}", domain.trim_end_matches('.')));
    let dots = name.matches('.').count();
    if dots >= config.ndots as usize {
        std::iter::once(name.to_string()).chain(searched).collect()
    } else {
        searched.chain(std::iter::once(name.to_string())).collect()
    }
}

// Ports whose service name is the same for every transport.
const SERVICES: &[(u16, &str)] = &[
    (20, "ftp-data"),
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (67, "bootps"),
    (68, "bootpc"),
    (69, "tftp"),
    (80, "http"),
    (110, "pop3"),
    (123, "ntp"),
    (143, "imap"),
    (161, "snmp"),
    (389, "ldap"),
    (443, "https"),
    (587, "submission"),
    (636, "ldaps"),
    (853, "domain-s"),
    (993, "imaps"),
    (995, "pop3s"),
    (3306, "mysql"),
    (5060, "sip"),
    (5432, "postgresql"),
];

/// The service name for `port`, or the port number itself.
pub(crate) fn service_name(port: u16, flags: NameInfoFlags) -> String {
    if flags.contains(NameInfoFlags::NUMERICSERV) {
        return port.to_string();
    }
    if port == 514 {
        let udp = flags.contains(NameInfoFlags::DGRAM);
        return if udp { "syslog" } else { "shell" }.to_string();
    }
    SERVICES
        .iter()
        .find(|(known, _)| *known == port)
        .map_or_else(|| port.to_string(), |(_, name)| name.to_string())
}

/// Drops everything after the first label.
pub(crate) fn strip_domain(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_string()
}
