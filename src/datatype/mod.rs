pub mod canonical;
pub mod config;
pub mod error;
pub mod install;
pub mod network;
pub mod signature;
pub mod tuf;
pub mod util;

pub use self::canonical::CanonicalJson;
pub use self::config::{Config, DeviceConfig, NetworkConfig, ProvisionConfig,
                       SecondaryConfig, SecondaryKind, TlsConfig, UptaneConfig};
pub use self::error::Error;
pub use self::install::{InstallCode, InstallMode, InstallOutcome, OperationResult, Package};
pub use self::network::{Method, SocketAddr, Url};
pub use self::signature::{Signature, SignatureType, sha256_hex, sha512_hex};
pub use self::tuf::{DelegatedRole, Delegations, EcuCustom, EcuManifests, EcuVersion,
                    Key, KeyType, KeyValue, MetaInfo, PrivateKey, RoleData, RoleMeta,
                    RoleName, TufCustom, TufImage, TufMeta, TufSigned};
pub use self::util::Util;
