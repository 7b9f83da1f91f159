use base64;
use chrono::{DateTime, Utc};
use hex::ToHex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error as SerdeError;
use serde_json as json;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::{CanonicalJson, Error, OperationResult, Signature, SignatureType, sha256_hex};


/// The TUF role of a metadata object, with delegated targets roles
/// identified by their delegation name.
#[derive(Hash, Eq, PartialEq, Debug, Clone)]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
    Delegation(String),
}

impl RoleName {
    /// The metadata path used when fetching this role from a repository.
    pub fn remote_path(&self) -> String {
        match *self {
            RoleName::Delegation(ref name) => format!("delegations/{}.json", name),
            ref role => format!("{}.json", role),
        }
    }
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root"      | "Root"      => Ok(RoleName::Root),
            "snapshot"  | "Snapshot"  => Ok(RoleName::Snapshot),
            "targets"   | "Targets"   => Ok(RoleName::Targets),
            "timestamp" | "Timestamp" => Ok(RoleName::Timestamp),
            _ => Err(Error::TufRole(s.into()))
        }
    }
}

impl Display for RoleName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RoleName::Root      => write!(f, "root"),
            RoleName::Targets   => write!(f, "targets"),
            RoleName::Snapshot  => write!(f, "snapshot"),
            RoleName::Timestamp => write!(f, "timestamp"),
            RoleName::Delegation(ref name) => write!(f, "{}", name),
        }
    }
}

impl Serialize for RoleName {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&format!("{}", self))
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<RoleName, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown RoleName: {}", err)))
        } else {
            Err(SerdeError::custom("unknown `RoleName` from `_type` field"))
        }
    }
}


/// The payload of any signed metadata object. Fields not used by a
/// particular role are absent from its JSON representation.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RoleData {
    pub _type:   RoleName,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys:    Option<HashMap<String, Key>>,        // root only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles:   Option<HashMap<RoleName, RoleMeta>>, // root only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<HashMap<String, TufMeta>>,    // targets only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta:    Option<HashMap<String, MetaInfo>>,   // timestamp/snapshot only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,             // targets only
}

impl RoleData {
    pub fn expired(&self) -> bool {
        self.expires < Utc::now()
    }

    /// The version and size a snapshot or timestamp records for a role file.
    pub fn meta_info(&self, filename: &str) -> Option<&MetaInfo> {
        self.meta.as_ref().and_then(|meta| meta.get(filename))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct RoleMeta {
    pub keyids:    HashSet<String>,
    pub threshold: u64,
}


/// A role file reference inside timestamp or snapshot metadata.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct MetaInfo {
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashes: Option<HashMap<String, String>>,
}


#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum KeyType {
    Ed25519,
    Rsa,
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" | "ED25519" => Ok(KeyType::Ed25519),
            "rsa"     | "RSA"     => Ok(KeyType::Rsa),
            _ => Err(Error::TufKeyType(s.into()))
        }
    }
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(match *self {
            KeyType::Ed25519 => "ED25519",
            KeyType::Rsa     => "RSA",
        })
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<KeyType, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown KeyType: {}", err)))
        } else {
            Err(SerdeError::custom("unknown KeyType"))
        }
    }
}


#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Key {
    pub keytype: KeyType,
    pub keyval:  KeyValue,
}

impl Key {
    /// A key is identified by the SHA-256 digest of its canonical JSON form.
    pub fn key_id(&self) -> Result<String, Error> {
        Ok(sha256_hex(&CanonicalJson::into_bytes(json::to_value(self)?)?))
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct KeyValue {
    pub public: String,
}

#[derive(Clone)]
pub struct PrivateKey {
    pub keyid:   String,
    pub der_key: Vec<u8>,
}

impl PrivateKey {
    /// Wrap a JSON value in a one-signature `TufSigned` envelope.
    pub fn sign_data(&self, data: json::Value, sig_type: SignatureType) -> Result<TufSigned, Error> {
        let cjson = CanonicalJson::into_bytes(data.clone())?;
        let sig = sig_type.sign_msg(&cjson, &self.der_key)?;
        let encoded = match sig_type {
            SignatureType::Ed25519   => sig.to_hex(),
            SignatureType::RsaSsaPss => base64::encode(&sig),
        };
        Ok(TufSigned {
            signatures: vec![Signature { keyid: self.keyid.clone(), method: sig_type, sig: encoded }],
            signed: data,
        })
    }
}


/// The envelope of every metadata object exchanged with a repository.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct TufSigned {
    pub signatures: Vec<Signature>,
    pub signed:     json::Value,
}


#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TufImage {
    pub filepath: String,
    pub fileinfo: TufMeta,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TufMeta {
    pub length: u64,
    pub hashes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<TufCustom>,
}

impl TufMeta {
    /// True when length and every hash declared by `other` match exactly.
    pub fn matches(&self, other: &TufMeta) -> bool {
        if self.length != other.length {
            return false;
        }
        other.hashes.iter().all(|(alg, hex)| self.hashes.get(alg).map_or(false, |own| own == hex))
    }
}

#[allow(non_snake_case)]
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct TufCustom {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecuIdentifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardwareId: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}


/// The optional delegations block of a targets role.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Delegations {
    pub keys:  HashMap<String, Key>,
    pub roles: Vec<DelegatedRole>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct DelegatedRole {
    pub name:      String,
    pub keyids:    HashSet<String>,
    pub threshold: u64,
    pub paths:     Vec<String>,
    #[serde(default)]
    pub terminating: bool,
}

impl DelegatedRole {
    pub fn matches_path(&self, target: &str) -> bool {
        self.paths.iter().any(|pattern| glob_matches(pattern, target))
    }
}

/// Match a target name against a path pattern where `*` matches any
/// sequence of characters, including the empty one.
fn glob_matches(pattern: &str, path: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = path.chars().collect();
    let (mut p, mut t) = (0, 0);
    let (mut star, mut mark) = (None, 0);

    while t < txt.len() {
        if p < pat.len() && (pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}


/// One ECU's signed report of its currently installed image.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuVersion {
    pub attacks_detected:         String,
    pub ecu_serial:               String,
    pub installed_image:          TufImage,
    pub previous_timeserver_time: String,
    pub timeserver_time:          String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<EcuCustom>,
}

impl EcuVersion {
    pub fn from(ecu_serial: String, image: TufImage, custom: Option<EcuCustom>) -> Self {
        let now = Utc::now().format("%FT%TZ").to_string();
        EcuVersion {
            attacks_detected: "".into(),
            ecu_serial: ecu_serial,
            installed_image: image,
            previous_timeserver_time: "1970-01-01T00:00:00Z".into(),
            timeserver_time: now,
            custom: custom,
        }
    }
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuCustom {
    pub operation_result: OperationResult,
}

impl EcuCustom {
    pub fn from_result(operation_result: OperationResult) -> Self {
        EcuCustom { operation_result: operation_result }
    }
}

/// The unsigned payload of a device manifest.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct EcuManifests {
    pub primary_ecu_serial:    String,
    pub ecu_version_manifests: HashMap<String, TufSigned>,
}


#[cfg(test)]
mod tests {
    use super::*;


    #[test]
    fn test_role_name_round_trip() {
        for name in &["root", "targets", "snapshot", "timestamp"] {
            let role: RoleName = name.parse().expect("parse");
            assert_eq!(&format!("{}", role), name);
        }
        assert!("campaigns".parse::<RoleName>().is_err());
    }

    #[test]
    fn test_key_id_is_stable() {
        let key = Key {
            keytype: KeyType::Ed25519,
            keyval:  KeyValue { public: "e453c713367595e1a9e5c1de8b2c039f".into() },
        };
        assert_eq!(key.key_id().expect("key_id"), key.key_id().expect("key_id again"));
    }

    #[test]
    fn test_parse_targets_role() {
        let raw = r#"{
            "_type": "Targets",
            "version": 3,
            "expires": "2031-01-01T00:00:00Z",
            "targets": {
                "file.img": {
                    "length": 17,
                    "hashes": { "sha256": "abc123" },
                    "custom": { "ecuIdentifier": "some-serial" }
                }
            }
        }"#;
        let data: RoleData = ::serde_json::from_str(raw).expect("parse targets");
        assert_eq!(data._type, RoleName::Targets);
        assert_eq!(data.version, 3);
        let targets = data.targets.expect("targets");
        let meta = targets.get("file.img").expect("file.img");
        assert_eq!(meta.length, 17);
        assert_eq!(meta.custom.as_ref().and_then(|c| c.ecuIdentifier.clone()),
                   Some("some-serial".into()));
    }

    #[test]
    fn test_meta_matches() {
        let meta = |len, sha: &str| TufMeta {
            length: len,
            hashes: hashmap!{ "sha256".into() => sha.into() },
            custom: None,
        };
        assert!(meta(17, "aa").matches(&meta(17, "aa")));
        assert!(!meta(17, "aa").matches(&meta(18, "aa")));
        assert!(!meta(17, "aa").matches(&meta(17, "bb")));
    }

    #[test]
    fn test_delegated_paths() {
        let role = DelegatedRole {
            name: "abc".into(),
            keyids: HashSet::new(),
            threshold: 1,
            paths: vec!["dir/*.img".into(), "exact.txt".into()],
            terminating: false,
        };
        assert!(role.matches_path("dir/a.img"));
        assert!(role.matches_path("dir/nested.img"));
        assert!(role.matches_path("exact.txt"));
        assert!(!role.matches_path("other/a.img"));
        assert!(!role.matches_path("dir/a.bin"));
    }
}
