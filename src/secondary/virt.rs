use crypto::digest::Digest;
use crypto::ed25519;
use crypto::sha2::Sha256;
use hex::ToHex;
use serde_json as json;
use std::collections::HashMap;

use datatype::{EcuVersion, Error, InstallCode, InstallMode, InstallOutcome, Key, KeyType,
               KeyValue, PrivateKey, RoleData, RoleName, SignatureType, TufImage, TufMeta,
               TufSigned, Util, sha256_hex};
use secondary::{MetaBundle, Secondary};
use storage::{FileStorage, Storage};
use uptane::{Repo, RepoType};
use uptane::repo::{self_verify_root, verify_root_transition};


/// A colocated, file-backed secondary that performs full verification of
/// everything the primary delivers, with its own Ed25519 signing key.
pub struct VirtualSecondary {
    serial:      String,
    hardware_id: String,
    dir:         String,
    private_key: PrivateKey,
    public:      Key,
    storage:     FileStorage,
    director:    Repo,
    image:       Repo,
}

impl VirtualSecondary {
    /// The signing key is derived deterministically from the serial so a
    /// re-created instance keeps its identity.
    pub fn new(serial: String, hardware_id: String, dir: String) -> Result<Self, Error> {
        let mut seed = [0u8; 32];
        let mut hasher = Sha256::new();
        hasher.input(serial.as_bytes());
        hasher.result(&mut seed);
        let (secret, public) = ed25519::keypair(&seed);

        let key = Key {
            keytype: KeyType::Ed25519,
            keyval:  KeyValue { public: public.to_hex() },
        };
        let keyid = key.key_id()?;

        Ok(VirtualSecondary {
            serial:      serial,
            hardware_id: hardware_id,
            storage:     FileStorage::new(&dir),
            dir:         dir,
            private_key: PrivateKey { keyid: keyid, der_key: secret.as_ref().to_vec() },
            public:      key,
            director:    Repo::new(RepoType::Director),
            image:       Repo::new(RepoType::Image),
        })
    }

    fn stored_root(&self, repo: RepoType) -> Result<Option<RoleData>, Error> {
        match self.storage.load_latest_root(repo)? {
            Some((_, raw)) => Ok(Some(self_verify_root(&raw)?)),
            None => Ok(None)
        }
    }

    fn assigned_target(&self, image: &TufImage) -> Result<TufMeta, Error> {
        let targets = self.director.targets()
            .and_then(|data| data.targets.as_ref())
            .ok_or_else(|| Error::Secondary("no verified director targets".into()))?;
        let meta = targets.get(&image.filepath)
            .ok_or_else(|| Error::Secondary(format!("target {} not authorized", image.filepath)))?;
        let assigned = meta.custom.as_ref()
            .and_then(|custom| custom.ecuIdentifier.as_ref())
            .map_or(false, |serial| serial == &self.serial);
        if !assigned {
            return Err(Error::Secondary(format!("target {} not assigned to {}", image.filepath, self.serial)));
        }
        Ok(meta.clone())
    }

    fn firmware_path(&self, image: &TufImage) -> String {
        format!("{}/firmware/{}", self.dir, image.filepath)
    }
}

impl Secondary for VirtualSecondary {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn hardware_id(&self) -> String {
        self.hardware_id.clone()
    }

    fn public_key(&self) -> Result<Key, Error> {
        Ok(self.public.clone())
    }

    fn get_manifest(&self) -> Result<TufSigned, Error> {
        let (current, _) = self.storage.load_installed_versions(&self.serial)?;
        let image = current.unwrap_or_else(|| TufImage {
            filepath: "noimage".into(),
            fileinfo: TufMeta { length: 0, hashes: HashMap::new(), custom: None },
        });
        let version = EcuVersion::from(self.serial.clone(), image, None);
        self.private_key.sign_data(json::to_value(version)?, SignatureType::Ed25519)
    }

    fn get_root_version(&self, repo: RepoType) -> Result<u64, Error> {
        Ok(self.stored_root(repo)?.map_or(0, |root| root.version))
    }

    fn put_root(&mut self, repo: RepoType, raw: &[u8]) -> Result<(), Error> {
        let root = match self.stored_root(repo)? {
            Some(ref current) if self_verify_root(raw)?.version == current.version => return Ok(()),
            Some(current) => verify_root_transition(&current, raw)?,
            None => self_verify_root(raw)?
        };
        self.storage.store_root(repo, root.version, raw)?;
        Ok(())
    }

    fn put_meta(&mut self, bundle: &MetaBundle) -> Result<(), Error> {
        for &((repo, ref role), ref raw) in bundle {
            match *role {
                RoleName::Root => self.put_root(repo, raw)?,
                ref role => self.storage.store_non_root(repo, role, raw)?
            }
        }

        self.director.check_meta_offline(&self.storage)
            .map_err(|err| Error::Secondary(format!("director metadata rejected: {}", err)))?;
        self.image.check_meta_offline(&self.storage)
            .map_err(|err| Error::Secondary(format!("image metadata rejected: {}", err)))?;
        Ok(())
    }

    fn send_firmware(&mut self, image: &TufImage, payload: &[u8]) -> Result<(), Error> {
        let meta = self.assigned_target(image)?;
        if payload.len() as u64 != meta.length {
            return Err(Error::Secondary(format!("firmware length {} != {}", payload.len(), meta.length)));
        }
        if let Some(expected) = meta.hashes.get("sha256") {
            if &sha256_hex(payload) != expected {
                return Err(Error::Secondary(format!("firmware hash mismatch for {}", image.filepath)));
            }
        }
        Util::write_file(&self.firmware_path(image), payload)
    }

    fn install(&mut self, image: &TufImage) -> Result<InstallOutcome, Error> {
        let (current, _) = self.storage.load_installed_versions(&self.serial)?;
        if current.as_ref() == Some(image) {
            return Ok(InstallOutcome::new(InstallCode::ALREADY_PROCESSED, "".into()));
        }

        let meta = self.assigned_target(image)?;
        let staged = match Util::read_file(&self.firmware_path(image)) {
            Ok(staged) => staged,
            Err(_) => return Ok(InstallOutcome::new(InstallCode::DOWNLOAD_FAILED, "no firmware received".into()))
        };
        if let Some(expected) = meta.hashes.get("sha256") {
            if &sha256_hex(&staged) != expected {
                return Ok(InstallOutcome::new(InstallCode::VERIFICATION_FAILED, "staged firmware corrupt".into()));
            }
        }

        self.storage.save_installed_version(&self.serial, image, InstallMode::Current)?;
        Ok(InstallOutcome::ok())
    }

    fn kind(&self) -> &'static str {
        "Virtual"
    }

    fn extra(&self) -> json::Value {
        json!({ "metadata_path": self.dir, "verification_type": "Full" })
    }
}
