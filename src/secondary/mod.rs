pub mod ip;
pub mod virt;

pub use self::ip::{IpSecondary, OstreeProxySecondary};
pub use self::virt::VirtualSecondary;

use serde_json as json;

use datatype::{Error, InstallOutcome, Key, RoleName, TufImage, TufSigned};
use uptane::RepoType;


/// The metadata delivered to a secondary in one shot: at minimum the
/// Director's Root and Targets plus the Image repository's full chain,
/// in verification order.
pub type MetaBundle = Vec<((RepoType, RoleName), Vec<u8>)>;

/// A subordinate ECU the primary coordinates. The primary never trusts a
/// secondary with raw metadata it has not verified itself; the secondary
/// in turn re-verifies everything it receives.
pub trait Secondary: Send {
    fn serial(&self) -> String;
    fn hardware_id(&self) -> String;
    fn public_key(&self) -> Result<Key, Error>;

    fn protocol_version(&self) -> Result<u32, Error> {
        Ok(2)
    }

    fn get_manifest(&self) -> Result<TufSigned, Error>;
    fn get_root_version(&self, repo: RepoType) -> Result<u64, Error>;
    fn put_root(&mut self, repo: RepoType, raw: &[u8]) -> Result<(), Error>;
    fn put_meta(&mut self, bundle: &MetaBundle) -> Result<(), Error>;
    fn send_firmware(&mut self, image: &TufImage, payload: &[u8]) -> Result<(), Error>;
    fn install(&mut self, image: &TufImage) -> Result<InstallOutcome, Error>;

    /// The type tag and connection details persisted by the primary so the
    /// ECU is still reported when unreachable on a later boot.
    fn kind(&self) -> &'static str;
    fn extra(&self) -> json::Value;
}
