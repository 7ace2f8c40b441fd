//! Configuration file support for ipsyncd
//!
//! Loads and validates ipsyncd configuration from TOML files.
//! Default location: /etc/ipstack/ipsyncd.toml

use crate::error::{IpsyncError, Result};
use crate::types::IfIndex;
use ipstack_hw::SoftSwitchConfig;
use ipstack_types::{MacAddress, VlanId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ipstack/ipsyncd.toml";

/// Netlink socket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetlinkConfig {
    /// Receive buffer of the monitor socket in bytes
    #[serde(default = "default_monitor_rcvbuf")]
    pub monitor_rcvbuf: usize,

    /// Send buffer of request sockets in bytes
    #[serde(default = "default_request_sndbuf")]
    pub request_sndbuf: usize,

    /// Receive buffer of request sockets in bytes
    #[serde(default = "default_request_rcvbuf")]
    pub request_rcvbuf: usize,

    /// Datagrams drained without blocking after the first one of a burst
    #[serde(default = "default_burst_limit")]
    pub burst_limit: usize,

    /// Retries of a dump interrupted by a concurrent kernel change
    #[serde(default = "default_recv_retries")]
    pub recv_retries: u32,

    /// How often a blocked monitor read wakes up to check for shutdown
    #[serde(default = "default_wakeup_interval_ms")]
    pub wakeup_interval_ms: u64,
}

/// Interface naming and creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacesConfig {
    /// Kernel name prefix of VLAN interfaces, followed by the VLAN id
    #[serde(default = "default_vlan_prefix")]
    pub vlan_prefix: String,

    /// Kernel name prefix of CPU interfaces, followed by their number
    #[serde(default = "default_cpu_prefix")]
    pub cpu_prefix: String,

    /// Link kind used when creating VLAN interfaces
    #[serde(default = "default_mux_kind")]
    pub mux_kind: String,

    /// Switch base MAC, assigned to created interfaces
    #[serde(default)]
    pub base_mac: Option<MacAddress>,
}

/// Hardware model limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_rleg_capacity")]
    pub rleg_capacity: usize,

    #[serde(default = "default_route_capacity")]
    pub route_capacity: usize,

    /// Entries consumed per bulk route call
    #[serde(default = "default_bulk_chunk")]
    pub bulk_chunk: usize,
}

/// Global routing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Enable IPv4/IPv6 forwarding at startup
    #[serde(default = "default_routing_enable")]
    pub enable: bool,

    /// Root of the sysctl tree holding the forwarding switches
    #[serde(default = "default_sysctl_root")]
    pub sysctl_root: PathBuf,
}

/// Logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete ipsyncd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpsyncConfig {
    #[serde(default)]
    pub netlink: NetlinkConfig,

    #[serde(default)]
    pub interfaces: InterfacesConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_monitor_rcvbuf() -> usize {
    1024 * 1024
}

fn default_request_sndbuf() -> usize {
    32 * 1024
}

fn default_request_rcvbuf() -> usize {
    1024 * 1024
}

fn default_burst_limit() -> usize {
    100
}

fn default_recv_retries() -> u32 {
    2
}

fn default_wakeup_interval_ms() -> u64 {
    1000
}

fn default_vlan_prefix() -> String {
    "vtss.vlan.".to_string()
}

fn default_cpu_prefix() -> String {
    "vtss.cpu.".to_string()
}

fn default_mux_kind() -> String {
    "vtss_if_mux".to_string()
}

fn default_rleg_capacity() -> usize {
    128
}

fn default_route_capacity() -> usize {
    16384
}

fn default_bulk_chunk() -> usize {
    4096
}

fn default_routing_enable() -> bool {
    true
}

fn default_sysctl_root() -> PathBuf {
    PathBuf::from("/proc/sys")
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for NetlinkConfig {
    fn default() -> Self {
        Self {
            monitor_rcvbuf: default_monitor_rcvbuf(),
            request_sndbuf: default_request_sndbuf(),
            request_rcvbuf: default_request_rcvbuf(),
            burst_limit: default_burst_limit(),
            recv_retries: default_recv_retries(),
            wakeup_interval_ms: default_wakeup_interval_ms(),
        }
    }
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        Self {
            vlan_prefix: default_vlan_prefix(),
            cpu_prefix: default_cpu_prefix(),
            mux_kind: default_mux_kind(),
            base_mac: None,
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            rleg_capacity: default_rleg_capacity(),
            route_capacity: default_route_capacity(),
            bulk_chunk: default_bulk_chunk(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            enable: default_routing_enable(),
            sysctl_root: default_sysctl_root(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NetlinkConfig {
    pub fn wakeup_interval(&self) -> Duration {
        Duration::from_millis(self.wakeup_interval_ms)
    }
}

impl InterfacesConfig {
    /// Maps a kernel interface name to its handle, if the name follows the
    /// switch convention.
    pub fn parse_name(&self, name: &str) -> Option<IfIndex> {
        if let Some(id) = name.strip_prefix(self.vlan_prefix.as_str()) {
            let id: u16 = parse_decimal(id)?;
            return VlanId::new(id).ok().map(IfIndex::Vlan);
        }
        if let Some(n) = name.strip_prefix(self.cpu_prefix.as_str()) {
            return parse_decimal(n).map(IfIndex::Cpu);
        }
        None
    }

    /// Kernel name of a VLAN interface.
    pub fn vlan_name(&self, vlan: VlanId) -> String {
        format!("{}{}", self.vlan_prefix, vlan)
    }
}

/// Plain decimal; rejects signs and empty strings that `str::parse` would
/// accept or misreport.
fn parse_decimal(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl HardwareConfig {
    pub fn soft_switch(&self, base_mac: Option<MacAddress>) -> SoftSwitchConfig {
        SoftSwitchConfig {
            rleg_capacity: self.rleg_capacity,
            route_capacity: self.route_capacity,
            bulk_chunk: self.bulk_chunk,
            base_mac,
        }
    }
}

impl IpsyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    IpsyncError::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "ipsyncd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(IpsyncError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IpsyncError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let nl = &self.netlink;
        if nl.monitor_rcvbuf == 0 || nl.request_sndbuf == 0 || nl.request_rcvbuf == 0 {
            return Err(IpsyncError::Config(
                "netlink buffer sizes must be > 0".to_string(),
            ));
        }

        if nl.burst_limit == 0 {
            return Err(IpsyncError::Config("burst_limit must be > 0".to_string()));
        }

        if self.interfaces.vlan_prefix.is_empty() || self.interfaces.cpu_prefix.is_empty() {
            return Err(IpsyncError::Config(
                "interface prefixes must not be empty".to_string(),
            ));
        }

        if self.hardware.bulk_chunk == 0 {
            return Err(IpsyncError::Config("bulk_chunk must be > 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = IpsyncConfig::default();
        assert_eq!(config.netlink.burst_limit, 100);
        assert_eq!(config.netlink.recv_retries, 2);
        assert_eq!(config.interfaces.vlan_prefix, "vtss.vlan.");
        assert_eq!(config.interfaces.mux_kind, "vtss_if_mux");
        assert_eq!(config.hardware.bulk_chunk, 4096);
        assert!(config.routing.enable);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [interfaces]
            base_mac = "00:01:c1:00:00:01"

            [hardware]
            route_capacity = 512
        "#;
        let config: IpsyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.interfaces.base_mac,
            Some("00:01:c1:00:00:01".parse().unwrap())
        );
        assert_eq!(config.interfaces.cpu_prefix, "vtss.cpu.");
        assert_eq!(config.hardware.route_capacity, 512);
        assert_eq!(config.hardware.bulk_chunk, 4096);
    }

    #[test]
    fn test_validate_rejects_zero_burst() {
        let mut config = IpsyncConfig::default();
        config.netlink.burst_limit = 0;
        assert!(config.validate().is_err());

        let mut config = IpsyncConfig::default();
        config.interfaces.vlan_prefix.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = IpsyncConfig::load_or_default("/nonexistent/ipsyncd.toml").unwrap();
        assert_eq!(config, IpsyncConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let file = NamedTempFile::new().unwrap();
        let mut config = IpsyncConfig::default();
        config.netlink.wakeup_interval_ms = 250;
        config.save(file.path()).unwrap();

        let loaded = IpsyncConfig::load_or_default(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.netlink.wakeup_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_toml() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "[netlink\nburst_limit = ").unwrap();
        assert!(matches!(
            IpsyncConfig::load_or_default(file.path()),
            Err(IpsyncError::Config(_))
        ));
    }

    #[test]
    fn test_parse_interface_names() {
        let ifs = InterfacesConfig::default();
        assert_eq!(
            ifs.parse_name("vtss.vlan.10"),
            Some(IfIndex::Vlan(VlanId::new(10).unwrap()))
        );
        assert_eq!(ifs.parse_name("vtss.cpu.1"), Some(IfIndex::Cpu(1)));
        assert_eq!(ifs.parse_name("vtss.vlan.0"), None);
        assert_eq!(ifs.parse_name("vtss.vlan.4095"), None);
        assert_eq!(ifs.parse_name("vtss.vlan.+7"), None);
        assert_eq!(ifs.parse_name("vtss.vlan."), None);
        assert_eq!(ifs.parse_name("eth0"), None);
        assert_eq!(ifs.vlan_name(VlanId::new(10).unwrap()), "vtss.vlan.10");
    }
}
