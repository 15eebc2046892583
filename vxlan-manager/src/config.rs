// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration of the vxlan manager.

use derive_builder::{Builder, UninitializedFieldError};
use ipnet::IpNet;
use net::interface::InterfaceName;
use net::vxlan::{Vni, Vxlan};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// The reasons why a configuration may be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A mandatory parameter was not set.
    #[error("Missing mandatory parameter: {0}")]
    MissingParameter(&'static str),
    /// The hostname is empty.
    #[error("The hostname of the local node must not be empty")]
    EmptyHostname,
    /// A size or duration is zero.
    #[error("{0} must not be zero")]
    Zero(&'static str),
    /// An external node CIDR can't be parsed.
    #[error("'{0}' is not a valid CIDR")]
    InvalidCidr(String),
    /// The configuration document can't be deserialized.
    #[error("Can't parse configuration: {0}")]
    Parse(String),
}

impl From<UninitializedFieldError> for ConfigError {
    fn from(value: UninitializedFieldError) -> Self {
        ConfigError::MissingParameter(value.field_name())
    }
}

fn default_max_ip_set_size() -> usize {
    1_048_576
}

fn default_ipset_id() -> String {
    "all-vxlan-net".to_string()
}

fn default_vni() -> Vni {
    Vni::DEFAULT
}

fn default_port() -> u16 {
    Vxlan::PORT
}

fn default_device_name() -> InterfaceName {
    InterfaceName::try_from("vxlan.calico").unwrap_or_else(|e| unreachable!("{e}"))
}

fn default_mtu() -> u32 {
    1410
}

fn default_period() -> Duration {
    Duration::from_secs(10)
}

fn default_route_protocol() -> u8 {
    // RTPROT_BOOT
    3
}

fn default_true() -> bool {
    true
}

/// (De)serialize durations as a number of seconds.
mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Configuration of a [`VxlanManager`](crate::VxlanManager).
///
/// Only the hostname is mandatory.
#[derive(Builder, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[builder(build_fn(private, name = "fallible_build", error = "ConfigError"))]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The name of the local node
    #[builder(setter(into))]
    pub hostname: String,
    /// Capacity hint of the external-nodes ip set
    #[builder(default = "default_max_ip_set_size()")]
    #[serde(default = "default_max_ip_set_size")]
    pub max_ip_set_size: usize,
    /// CIDRs of nodes outside the cluster which are published in the external-nodes ip set
    #[builder(default)]
    #[serde(default)]
    pub external_nodes_cidrs: Vec<String>,
    /// Identifier of the external-nodes ip set
    #[builder(setter(into), default = "default_ipset_id()")]
    #[serde(default = "default_ipset_id")]
    pub external_nodes_ipset_id: String,
    /// The vni of the overlay device
    #[builder(default = "default_vni()")]
    #[serde(default = "default_vni")]
    pub vxlan_vni: Vni,
    /// The UDP port of the overlay device
    #[builder(default = "default_port()")]
    #[serde(default = "default_port")]
    pub vxlan_port: u16,
    /// The name of the overlay device
    #[builder(default = "default_device_name()")]
    #[serde(default = "default_device_name")]
    pub device_name: InterfaceName,
    /// MTU of the overlay device
    #[builder(default = "default_mtu()")]
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Upper bound of every kernel request
    #[builder(default = "default_period()")]
    #[serde(default = "default_period", with = "seconds")]
    pub netlink_timeout: Duration,
    /// Period of the device resync loop
    #[builder(default = "default_period()")]
    #[serde(default = "default_period", with = "seconds")]
    pub resync_period: Duration,
    /// Preferred source address of the routes installed on the parent interface
    #[builder(default)]
    #[serde(default)]
    pub device_route_source_address: Option<IpAddr>,
    /// Protocol of the routes installed on the parent interface
    #[builder(default = "default_route_protocol()")]
    #[serde(default = "default_route_protocol")]
    pub device_route_protocol: u8,
    /// Whether routes not owned by the manager are removed from the parent interface
    #[builder(default = "default_true()")]
    #[serde(default = "default_true")]
    pub remove_external_routes: bool,
}

impl ConfigBuilder {
    /// Build and validate a [`Config`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the hostname is missing or if the configuration is invalid.
    pub fn build(&self) -> Result<Config, ConfigError> {
        let config = self.fallible_build()?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Check the semantic constraints of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::EmptyHostname);
        }
        if self.max_ip_set_size == 0 {
            return Err(ConfigError::Zero("max_ip_set_size"));
        }
        if self.netlink_timeout.is_zero() {
            return Err(ConfigError::Zero("netlink_timeout"));
        }
        if self.resync_period.is_zero() {
            return Err(ConfigError::Zero("resync_period"));
        }
        if let Some(bad) = self
            .external_nodes_cidrs
            .iter()
            .find(|cidr| cidr.parse::<IpNet>().is_err() && cidr.parse::<IpAddr>().is_err())
        {
            return Err(ConfigError::InvalidCidr(bad.clone()));
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document can't be deserialized, or the validation
    /// error otherwise.
    pub fn from_yaml(yaml: &str) -> Result<Config, ConfigError> {
        let config: Config =
            serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = ConfigBuilder::default().hostname("node1").build().unwrap();
        assert_eq!(config.hostname, "node1");
        assert_eq!(config.max_ip_set_size, 1_048_576);
        assert!(config.external_nodes_cidrs.is_empty());
        assert_eq!(config.external_nodes_ipset_id, "all-vxlan-net");
        assert_eq!(config.vxlan_vni.as_u32(), 4096);
        assert_eq!(config.vxlan_port, 4789);
        assert_eq!(config.device_name.as_ref(), "vxlan.calico");
        assert_eq!(config.mtu, 1410);
        assert_eq!(config.netlink_timeout, Duration::from_secs(10));
        assert_eq!(config.resync_period, Duration::from_secs(10));
        assert_eq!(config.device_route_source_address, None);
        assert_eq!(config.device_route_protocol, 3);
        assert!(config.remove_external_routes);
    }

    #[test]
    fn hostname_is_mandatory() {
        assert_eq!(
            ConfigBuilder::default().build(),
            Err(ConfigError::MissingParameter("hostname"))
        );
        assert_eq!(
            ConfigBuilder::default().hostname("  ").build(),
            Err(ConfigError::EmptyHostname)
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut builder = ConfigBuilder::default();
        builder.hostname("node1");
        assert_eq!(
            builder.clone().max_ip_set_size(0).build(),
            Err(ConfigError::Zero("max_ip_set_size"))
        );
        assert_eq!(
            builder.clone().resync_period(Duration::ZERO).build(),
            Err(ConfigError::Zero("resync_period"))
        );
        assert_eq!(
            builder.netlink_timeout(Duration::ZERO).build(),
            Err(ConfigError::Zero("netlink_timeout"))
        );
    }

    #[test]
    fn external_cidrs_are_checked() {
        let ok = ConfigBuilder::default()
            .hostname("node1")
            .external_nodes_cidrs(vec!["10.0.0.0/24".to_string(), "192.0.2.7".to_string()])
            .build();
        assert!(ok.is_ok());
        let bad = ConfigBuilder::default()
            .hostname("node1")
            .external_nodes_cidrs(vec!["10.0.0.0/33".to_string()])
            .build();
        assert_eq!(bad, Err(ConfigError::InvalidCidr("10.0.0.0/33".to_string())));
    }

    #[test]
    fn yaml() {
        let yaml = r"
hostname: node1
max_ip_set_size: 5
external_nodes_cidrs: [10.0.0.0/24]
vxlan_vni: 1
vxlan_port: 20
netlink_timeout: 2.5
device_route_source_address: 172.0.0.2
";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.max_ip_set_size, 5);
        assert_eq!(config.external_nodes_cidrs, vec!["10.0.0.0/24".to_string()]);
        assert_eq!(config.vxlan_vni.as_u32(), 1);
        assert_eq!(config.vxlan_port, 20);
        assert_eq!(config.netlink_timeout, Duration::from_millis(2500));
        assert_eq!(config.resync_period, Duration::from_secs(10));
        assert_eq!(
            config.device_route_source_address,
            Some("172.0.0.2".parse().unwrap())
        );

        assert!(matches!(
            Config::from_yaml("hostname: node1\nvxlan_vni: 0\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_yaml("hostname: node1\nbogus: 1\n"),
            Err(ConfigError::Parse(_))
        ));
        assert_eq!(
            Config::from_yaml("hostname: node1\nresync_period: 0\n"),
            Err(ConfigError::Zero("resync_period"))
        );
    }
}
