use toml;

use datatype::{Error, Url, Util};


/// A container for all parsed config sections, with defaults for any
/// missing section or field.
#[derive(Deserialize, PartialEq, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub device:  DeviceConfig,
    #[serde(default)]
    pub tls:     Option<TlsConfig>,
    #[serde(default)]
    pub provision: Option<ProvisionConfig>,
    #[serde(default)]
    pub uptane:  UptaneConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(rename = "secondary", default)]
    pub secondaries: Vec<SecondaryConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device:      DeviceConfig::default(),
            tls:         None,
            provision:   None,
            uptane:      UptaneConfig::default(),
            network:     NetworkConfig::default(),
            secondaries: Vec::new(),
        }
    }
}

impl Config {
    /// Read a toml config file using default values for missing sections or fields.
    pub fn load(path: &str) -> Result<Config, Error> {
        info!("Loading config file: {}", path);
        Config::parse(&Util::read_text(path)?)
    }

    /// Parse a toml config using default values for missing sections or fields.
    pub fn parse(text: &str) -> Result<Config, Error> {
        Ok(toml::from_str(text)?)
    }
}


#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id:    Option<String>,
    pub hardware_id:  Option<String>,
    pub storage_path: String,
    pub runtime_path: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_id:    None,
            hardware_id:  None,
            storage_path: "/var/sota".into(),
            runtime_path: "/var/run/sota".into(),
        }
    }
}


#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct TlsConfig {
    pub server: Url,
}

impl Default for TlsConfig {
    fn default() -> Self {
        TlsConfig { server: "http://localhost:8000".parse().expect("tls server url") }
    }
}


#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct ProvisionConfig {
    pub server: Url,
    pub ttl:    u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            server: "http://localhost:8000".parse().expect("provision server url"),
            ttl:    36000,
        }
    }
}


#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct UptaneConfig {
    pub director_server:    Url,
    pub repo_server:        Url,
    pub primary_ecu_serial: Option<String>,
    pub staging_path:       String,
    pub sentinel_path:      String,
}

impl Default for UptaneConfig {
    fn default() -> Self {
        UptaneConfig {
            director_server:    "http://localhost:8001/director".parse().expect("director url"),
            repo_server:        "http://localhost:8002/repo".parse().expect("repo url"),
            primary_ecu_serial: None,
            staging_path:       "/var/sota/staging".into(),
            sentinel_path:      "/var/sota/boot".into(),
        }
    }
}


#[derive(Deserialize, PartialEq, Debug, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_sec: u64,
    pub retries:     u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig { timeout_sec: 60, retries: 3 }
    }
}


/// One attached secondary ECU as declared in the config file.
#[derive(Deserialize, PartialEq, Debug, Clone)]
pub struct SecondaryConfig {
    #[serde(rename = "type")]
    pub kind:          SecondaryKind,
    pub ecu_serial:    Option<String>,
    pub hardware_id:   Option<String>,
    pub ip:            Option<String>,
    pub port:          Option<u16>,
    pub metadata_path: Option<String>,
    pub verification:  Option<String>,
}

#[derive(Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum SecondaryKind {
    #[serde(rename = "virtual")]
    Virtual,
    #[serde(rename = "ip")]
    Ip,
    #[serde(rename = "ostree_proxy")]
    OstreeProxy,
}


#[cfg(test)]
mod tests {
    use super::*;


    const SAMPLE: &'static str = r#"
        [device]
        device_id = "device-1234"
        storage_path = "/tmp/sota-test"

        [tls]
        server = "https://ota.example.com:8443"

        [provision]
        server = "https://provision.example.com:9443"

        [uptane]
        director_server = "https://ota.example.com:8443/director"
        repo_server = "https://ota.example.com:8443/repo"
        primary_ecu_serial = "CA:FE:A6:D2:84:9D"

        [[secondary]]
        type = "ip"
        ip = "127.0.0.1"
        port = 9061
    "#;

    #[test]
    fn parse_sample_config() {
        let config = Config::parse(SAMPLE).expect("parse sample");
        assert_eq!(config.device.device_id, Some("device-1234".into()));
        assert_eq!(config.device.runtime_path, "/var/run/sota");
        assert_eq!(config.uptane.primary_ecu_serial, Some("CA:FE:A6:D2:84:9D".into()));
        assert_eq!(config.network.timeout_sec, 60);
        assert_eq!(config.secondaries.len(), 1);
        assert_eq!(config.secondaries[0].kind, SecondaryKind::Ip);
        assert_eq!(config.secondaries[0].port, Some(9061));
    }

    #[test]
    fn parse_empty_config() {
        let config = Config::parse("").expect("parse empty");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn reject_bad_config() {
        assert!(Config::parse("[uptane]\ndirector_server = 123").is_err());
    }
}
