use serde::Deserialize;

use crate::LORA_MTU;

/// Device-layer tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// MTU assigned to interfaces registered without an explicit one.
    pub default_mtu: usize,
    /// Upper bound on live interfaces; registration past it fails with
    /// `DeviceError::Exhausted`.
    pub max_interfaces: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { default_mtu: LORA_MTU, max_interfaces: 64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_link_constants() {
        let config = DeviceConfig::default();
        assert_eq!(config.default_mtu, LORA_MTU);
        assert_eq!(config.max_interfaces, 64);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: DeviceConfig = toml::from_str("max_interfaces = 4").expect("parse");
        assert_eq!(config.max_interfaces, 4);
        assert_eq!(config.default_mtu, LORA_MTU);
    }
}
