//! Shared fixtures: an in-memory Uptane server whose metadata is signed
//! with real Ed25519 keys, plus a pre-provisioned storage.

use chrono::{DateTime, Utc};
use crypto::ed25519;
use hex::ToHex;
use serde_json as json;
use std::collections::HashMap;
use std::fs;

use ota::datatype::{CanonicalJson, Key, KeyType, KeyValue, MetaInfo, PrivateKey, RoleData,
                    RoleMeta, RoleName, SignatureType, TufCustom, TufMeta, sha256_hex};
use ota::storage::{MemStorage, Storage, TlsCreds};


pub struct Signer {
    pub private: PrivateKey,
    pub keyid:   String,
    pub public:  Key,
}

pub fn signer(seed: u8) -> Signer {
    let (secret, public) = ed25519::keypair(&[seed; 32]);
    let key = Key {
        keytype: KeyType::Ed25519,
        keyval:  KeyValue { public: public.to_hex() },
    };
    let keyid = key.key_id().expect("key_id");
    Signer {
        private: PrivateKey { keyid: keyid.clone(), der_key: secret.as_ref().to_vec() },
        keyid:   keyid,
        public:  key,
    }
}

pub fn future() -> DateTime<Utc> {
    "2031-01-01T00:00:00Z".parse().expect("future timestamp")
}

pub fn sign(data: &RoleData, signer: &Signer) -> Vec<u8> {
    let value = json::to_value(data).expect("role value");
    let signed = signer.private.sign_data(value, SignatureType::Ed25519).expect("sign");
    json::to_vec(&signed).expect("signed bytes")
}

pub fn root_data(version: u64, signer: &Signer) -> RoleData {
    let meta = RoleMeta { keyids: hashset!{ signer.keyid.clone() }, threshold: 1 };
    RoleData {
        _type:   RoleName::Root,
        version: version,
        expires: future(),
        keys:    Some(hashmap!{ signer.keyid.clone() => signer.public.clone() }),
        roles:   Some(hashmap!{
            RoleName::Root      => meta.clone(),
            RoleName::Targets   => meta.clone(),
            RoleName::Snapshot  => meta.clone(),
            RoleName::Timestamp => meta,
        }),
        targets: None,
        meta:    None,
        delegations: None,
    }
}

pub fn targets_data(version: u64, targets: HashMap<String, TufMeta>) -> RoleData {
    RoleData {
        _type:   RoleName::Targets,
        version: version,
        expires: future(),
        keys:    None,
        roles:   None,
        targets: Some(targets),
        meta:    None,
        delegations: None,
    }
}

pub fn snapshot_data(version: u64, targets_version: u64) -> RoleData {
    RoleData {
        _type:   RoleName::Snapshot,
        version: version,
        expires: future(),
        keys:    None,
        roles:   None,
        targets: None,
        meta:    Some(hashmap!{
            "targets.json".to_string() => MetaInfo { version: targets_version, length: None, hashes: None }
        }),
        delegations: None,
    }
}

pub fn timestamp_data(version: u64, snapshot_version: u64, snapshot_raw: &[u8]) -> RoleData {
    let digest = sha256_hex(&CanonicalJson::from_slice(snapshot_raw).expect("canonical"));
    RoleData {
        _type:   RoleName::Timestamp,
        version: version,
        expires: future(),
        keys:    None,
        roles:   None,
        targets: None,
        meta:    Some(hashmap!{
            "snapshot.json".to_string() => MetaInfo {
                version: snapshot_version,
                length: None,
                hashes: Some(hashmap!{ "sha256".into() => digest }),
            }
        }),
        delegations: None,
    }
}

pub fn firmware_meta(serial: Option<&str>, body: &[u8]) -> TufMeta {
    TufMeta {
        length: body.len() as u64,
        hashes: hashmap!{ "sha256".into() => sha256_hex(body) },
        custom: serial.map(|serial| TufCustom {
            ecuIdentifier: Some(serial.into()),
            hardwareId:    None,
            uri:           None,
            format:        None,
        }),
    }
}

/// Routes for a server carrying the same targets on both repositories.
/// Director assignments carry ECU serials; the image copy does not.
pub fn server_routes(signer: &Signer, assignments: HashMap<String, TufMeta>)
                     -> HashMap<String, Vec<Vec<u8>>> {
    let root = sign(&root_data(1, signer), signer);

    let image_targets = assignments.iter()
        .map(|(name, meta)| {
            let mut meta = meta.clone();
            meta.custom = None;
            (name.clone(), meta)
        })
        .collect::<HashMap<_, _>>();

    let director_targets_raw = sign(&targets_data(1, assignments), signer);
    let image_targets_raw = sign(&targets_data(1, image_targets), signer);
    let snapshot_raw = sign(&snapshot_data(1, 1), signer);
    let timestamp_raw = sign(&timestamp_data(1, 1, &snapshot_raw), signer);

    hashmap!{
        "director/1.root.json".to_string()  => vec![root.clone()],
        "director/targets.json".to_string() => vec![director_targets_raw],
        "repo/1.root.json".to_string()      => vec![root],
        "repo/timestamp.json".to_string()   => vec![timestamp_raw],
        "repo/snapshot.json".to_string()    => vec![snapshot_raw],
        "repo/targets.json".to_string()     => vec![image_targets_raw],
        "manifest".to_string()              => vec![b"{}".to_vec()],
        "system_info".to_string()           => vec![b"{}".to_vec()],
        "core/installed".to_string()        => vec![b"{}".to_vec()],
    }
}

/// Storage for a device that already completed provisioning.
pub fn provisioned_storage(serials: &[(&str, &str)]) -> MemStorage {
    let mut storage = MemStorage::default();
    storage.store_device_id("test-device").expect("device id");
    storage.store_tls_creds(&TlsCreds {
        ca:   b"ca".to_vec(),
        cert: b"cert".to_vec(),
        pkey: b"pkey".to_vec(),
    }).expect("tls creds");
    let serials = serials.iter()
        .map(|&(serial, hardware)| (serial.to_string(), hardware.to_string()))
        .collect::<Vec<_>>();
    storage.store_ecu_serials(&serials).expect("serials");
    storage.store_ecu_registered().expect("registered");
    storage
}

pub fn test_dir(reason: &str) -> String {
    let dir = format!("/tmp/{}-{}", reason, &sha256_hex(reason.as_bytes())[..8]);
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}
