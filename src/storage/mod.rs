pub mod file;
pub mod mem;

pub use self::file::FileStorage;
pub use self::mem::MemStorage;

use serde_json as json;

use datatype::{Error, InstallMode, RoleName, TufImage};
use uptane::RepoType;


/// The device's TLS credentials as PEM bytes.
#[derive(PartialEq, Debug, Clone)]
pub struct TlsCreds {
    pub ca:   Vec<u8>,
    pub cert: Vec<u8>,
    pub pkey: Vec<u8>,
}

/// A persisted record of an attached secondary ECU.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct SecondaryInfo {
    pub serial: String,
    #[serde(rename = "type")]
    pub kind:   String,
    pub extra:  json::Value,
}


/// The persistence contract the update client relies on. Writes must be
/// atomic per row: a reader never observes a partially written value.
pub trait Storage: Send {
    // Root metadata is append-only and kept per version.
    fn store_root(&mut self, repo: RepoType, version: u64, raw: &[u8]) -> Result<(), Error>;
    fn load_root(&self, repo: RepoType, version: u64) -> Result<Option<Vec<u8>>, Error>;
    fn load_latest_root(&self, repo: RepoType) -> Result<Option<(u64, Vec<u8>)>, Error>;

    // Non-root roles keep only the latest copy per (repo, role).
    fn store_non_root(&mut self, repo: RepoType, role: &RoleName, raw: &[u8]) -> Result<(), Error>;
    fn load_non_root(&self, repo: RepoType, role: &RoleName) -> Result<Option<Vec<u8>>, Error>;
    fn clear_non_root(&mut self, repo: RepoType) -> Result<(), Error>;

    // Device PKI.
    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error>;
    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error>;
    fn store_primary_keys(&mut self, public_pem: &[u8], private_der: &[u8]) -> Result<(), Error>;
    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error>;

    // Device identity and ECU registration.
    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error>;
    fn load_device_id(&self) -> Result<Option<String>, Error>;
    fn store_ecu_serials(&mut self, serials: &[(String, String)]) -> Result<(), Error>;
    fn load_ecu_serials(&self) -> Result<Vec<(String, String)>, Error>;
    fn store_ecu_registered(&mut self) -> Result<(), Error>;
    fn load_ecu_registered(&self) -> Result<bool, Error>;

    // Installed versions, with at most one pending per ECU.
    fn save_installed_version(&mut self, serial: &str, image: &TufImage, mode: InstallMode) -> Result<(), Error>;
    fn load_installed_versions(&self, serial: &str) -> Result<(Option<TufImage>, Option<TufImage>), Error>;
    fn clear_pending_version(&mut self, serial: &str) -> Result<(), Error>;

    // Secondary ECU records.
    fn store_secondary_info(&mut self, info: &SecondaryInfo) -> Result<(), Error>;
    fn load_secondaries_info(&self) -> Result<Vec<SecondaryInfo>, Error>;
}


/// The JSON row stored for an ECU's installed versions.
#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct InstalledVersions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<TufImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<TufImage>,
}

impl InstalledVersions {
    pub fn apply(&mut self, image: &TufImage, mode: InstallMode) {
        match mode {
            InstallMode::Current => {
                self.current = Some(image.clone());
                self.pending = None;
            }
            InstallMode::Pending => self.pending = Some(image.clone()),
        }
    }
}
