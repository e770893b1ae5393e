//! Configuration management for cdgate.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Self addresses and routers.
    #[serde(default)]
    pub addr: AddrConfig,

    /// TUN device configuration.
    #[serde(default)]
    pub tun: TunConfig,

    /// Bus transport configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Data plane timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration. A missing self address is fatal before the
    /// event loop starts.
    pub fn validate(&self) -> Result<()> {
        if self.addr.self6.is_none() {
            return Err(Error::InvalidConfig("addr.self6 is not set".into()));
        }
        for group in &self.addr.multicast_groups {
            if group.mac == 0xff || group.members.iter().any(|m| *m == 0xff) {
                return Err(Error::InvalidConfig(
                    "multicast group contains the broadcast sentinel 0xff".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Self addresses consumed by the address translator.
///
/// `self6` carries the site /104 prefix in its first 13 bytes, the scope
/// tag in byte 13, the net id in byte 14 and the local mac in byte 15.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddrConfig {
    /// Local unique-local self address (required).
    pub self6: Option<Ipv6Addr>,

    /// Default router for cross-net unique-local traffic.
    pub router6: Option<Ipv6Addr>,

    /// Global-scope self address.
    pub global6: Option<Ipv6Addr>,

    /// Default router for global-scope traffic.
    pub router6_global: Option<Ipv6Addr>,

    /// Local IPv4 address for the coarse passthrough path.
    pub self4: Option<Ipv4Addr>,

    /// IPv4 subnet prefix length.
    #[serde(default = "default_prefix4")]
    pub prefix4: u8,

    /// Default IPv4 router.
    pub router4: Option<Ipv4Addr>,

    /// L0 multicast group membership.
    #[serde(default)]
    pub multicast_groups: Vec<McastGroup>,
}

fn default_prefix4() -> u8 {
    24
}

/// One L0 multicast group: the group's own mac and its member node macs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McastGroup {
    pub mac: u8,
    pub members: Vec<u8>,
}

/// TUN device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunConfig {
    /// Device name hint; the kernel may assign a different one.
    #[serde(default = "default_tun_name")]
    pub name: String,

    /// MTU for the tunnel interface.
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

fn default_tun_name() -> String {
    "cdgate0".into()
}

fn default_mtu() -> u16 {
    1500
}

impl Default for TunConfig {
    fn default() -> Self {
        Self {
            name: default_tun_name(),
            mtu: default_mtu(),
        }
    }
}

/// Bus transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Raw character device exposing one frame per read/write.
    #[default]
    Chardev,
    /// In-memory transport for tests and dry runs.
    Loopback,
}

/// Bus transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Transport kind.
    #[serde(default)]
    pub kind: BusKind,

    /// Device path for the chardev transport.
    #[serde(default = "default_bus_device")]
    pub device: String,

    /// Frame pool capacity.
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,

    /// Packet pool capacity.
    #[serde(default = "default_packet_count")]
    pub packet_count: usize,
}

fn default_bus_device() -> String {
    "/dev/cdbus".into()
}

fn default_frame_count() -> usize {
    crate::pool::DEFAULT_FRAME_COUNT
}

fn default_packet_count() -> usize {
    crate::pool::DEFAULT_PACKET_COUNT
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::default(),
            device: default_bus_device(),
            frame_count: default_frame_count(),
            packet_count: default_packet_count(),
        }
    }
}

/// Data plane timing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// L0 node reply timeout before the sweep force-advances.
    #[serde(default = "default_l0_timeout", with = "humantime_serde")]
    pub l0_timeout: Duration,

    /// Idle eviction timeout for stalled reassembly trains.
    #[serde(default = "default_reassembly_timeout", with = "humantime_serde")]
    pub reassembly_timeout: Duration,
}

fn default_l0_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_reassembly_timeout() -> Duration {
    Duration::from_millis(500)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            l0_timeout: default_l0_timeout(),
            reassembly_timeout: default_reassembly_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(config.color))
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_self6_is_rejected() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [addr]
            self6 = "fdcd::80:1"

            [timing]
            l0_timeout = "250ms"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.l0_timeout, Duration::from_millis(250));
        assert_eq!(config.bus.frame_count, 200);
    }

    #[test]
    fn tun_mtu_defaults_and_overrides() {
        let config: Config = toml::from_str(
            r#"
            [addr]
            self6 = "fdcd::80:1"
            "#,
        )
        .unwrap();
        assert_eq!(config.tun.mtu, 1500);

        let config: Config = toml::from_str(
            r#"
            [addr]
            self6 = "fdcd::80:1"

            [tun]
            mtu = 1280
            "#,
        )
        .unwrap();
        assert_eq!(config.tun.mtu, 1280);
    }

    #[test]
    fn broadcast_in_multicast_group_rejected() {
        let config: Config = toml::from_str(
            r#"
            [addr]
            self6 = "fdcd::80:1"

            [[addr.multicast_groups]]
            mac = 0xf5
            members = [0x05, 0xff]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
