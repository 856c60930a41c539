use clap::Parser;
use dnschannel::address::Family;
use dnschannel::channel::Channel;
use dnschannel::driver::run_until_idle;
use dnschannel::options::{NameInfoFlags, Options};
use dnschannel::record::{HostEntry, QueryType, Record};
use dnschannel::status::Status;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
pub struct Args {
    /// Nameserver to query; may be repeated
    #[clap(long, short = 's')]
    pub server: Vec<String>,

    #[clap(long, short = 'p')]
    pub port: Option<u16>,

    /// Per-attempt timeout
    #[clap(long)]
    pub timeout_ms: Option<u64>,

    #[clap(long)]
    pub tries: Option<u32>,

    /// Record type to ask for
    #[clap(long, short = 't', default_value_t = QueryType::A)]
    pub r#type: QueryType,

    /// Treat NAME as an address and look up its host name
    #[clap(long, short = 'x', conflicts_with = "host")]
    pub reverse: bool,

    /// Resolve NAME like a host lookup, consulting the hosts file
    #[clap(long)]
    pub host: bool,

    /// Read defaults from this resolv.conf
    #[clap(long)]
    pub resolvconf: Option<PathBuf>,

    #[clap(long, short = 'v')]
    pub verbose: bool,

    pub name: String,
}

impl Args {
    fn options(&self) -> Options {
        Options {
            servers: self.server.clone(),
            udp_port: self.port,
            timeout: self.timeout_ms.map(Duration::from_millis),
            tries: self.tries,
            resolvconf_path: self.resolvconf.clone(),
            ..Default::default()
        }
    }
}

type Slot<T> = Rc<RefCell<Option<Result<T, Status>>>>;

fn slot<T: 'static>() -> (Slot<T>, impl FnOnce(Result<T, Status>) + 'static) {
    let slot: Slot<T> = Rc::new(RefCell::new(None));
    let callback = {
        let slot = slot.clone();
        move |result: Result<T, Status>| {
            *slot.borrow_mut() = Some(result);
        }
    };
    (slot, callback)
}

fn print_host(host: &HostEntry) {
    println!("{}", host.name);
    for alias in &host.aliases {
        println!("  alias {alias}");
    }
    for address in &host.addresses {
        println!("  address {address}");
    }
}

fn finish<T>(slot: Slot<T>, print: impl FnOnce(&T)) -> anyhow::Result<()> {
    match slot.borrow_mut().take() {
        Some(Ok(value)) => {
            print(&value);
            Ok(())
        }
        Some(Err(status)) => anyhow::bail!("lookup failed: {status}"),
        None => anyhow::bail!("lookup never completed"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut channel = Channel::new(args.options())?;

    if args.reverse {
        let (host, on_host) = slot::<HostEntry>();
        let (info, on_info) = slot();
        channel.gethostbyaddr(&args.name, on_host)?;
        channel.getnameinfo(
            (&args.name, 0),
            NameInfoFlags::LOOKUPHOST | NameInfoFlags::NAMEREQD,
            on_info,
        )?;
        run_until_idle(&mut channel).await?;
        finish(host, print_host)?;
        // The address already resolved, so a name-info failure is not fatal.
        if let Err(err) = finish(info, |info: &dnschannel::record::NameInfo| {
            if let Some(node) = &info.node {
                println!("nameinfo {node}");
            }
        }) {
            eprintln!("nameinfo: {err}");
        }
    } else if args.host {
        let (host, on_host) = slot::<HostEntry>();
        channel.gethostbyname(&args.name, Family::Unspec, on_host)?;
        run_until_idle(&mut channel).await?;
        finish(host, print_host)?;
    } else {
        let (records, on_records) = slot::<Vec<Record>>();
        channel.query(&args.name, args.r#type, on_records)?;
        run_until_idle(&mut channel).await?;
        finish(records, |records: &Vec<Record>| {
            for record in records {
                println!("{record}");
            }
        })?;
    }

    channel.destroy()?;
    Ok(())
}
