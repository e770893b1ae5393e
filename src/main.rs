//! cdgate binary: IP over CDNET field-bus gateway.

use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};

use cdgate::config::{init_logging, BusKind, Config};
use cdgate::gateway::Gateway;
use cdgate::transport;
use cdgate::tun::TunDevice;

#[derive(Parser, Debug)]
#[command(name = "cdgate", version, about = "IP over CDNET field-bus gateway")]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local IPv6 self address (prefix, scope tag, net, mac)
    #[arg(long)]
    self6: Option<Ipv6Addr>,

    /// Default router for cross-net traffic
    #[arg(long)]
    router6: Option<Ipv6Addr>,

    /// TUN interface name
    #[arg(long)]
    tun: Option<String>,

    /// Bus device path
    #[arg(long)]
    dev: Option<String>,

    /// Bus transport kind: chardev or loopback
    #[arg(long, value_enum)]
    dev_type: Option<DevType>,

    /// Log level override
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DevType {
    Chardev,
    Loopback,
}

fn load_config(args: &Args) -> cdgate::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    // CLI flags win over file values
    if let Some(self6) = args.self6 {
        config.addr.self6 = Some(self6);
    }
    if let Some(router6) = args.router6 {
        config.addr.router6 = Some(router6);
    }
    if let Some(tun) = &args.tun {
        config.tun.name = tun.clone();
    }
    if let Some(dev) = &args.dev {
        config.bus.device = dev.clone();
    }
    if let Some(kind) = args.dev_type {
        config.bus.kind = match kind {
            DevType::Chardev => BusKind::Chardev,
            DevType::Loopback => BusKind::Loopback,
        };
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn run(config: &Config) -> cdgate::Result<()> {
    let mut tun = TunDevice::create(&config.tun.name, config.tun.mtu)?;
    let mut bus = transport::open(&config.bus)?;
    let mut gateway = Gateway::new(config)?;

    info!(version = cdgate::VERSION, "cdgate starting");
    gateway.run(&mut tun, bus.as_mut())
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cdgate: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("cdgate: {e}");
        process::exit(1);
    }

    if let Err(e) = run(&config) {
        error!(%e, "fatal error");
        process::exit(1);
    }
}
