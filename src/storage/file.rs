use serde_json as json;
use std::fs;
use std::path::{Path, PathBuf};

use datatype::{Error, InstallMode, RoleName, TufImage, Util};
use storage::{InstalledVersions, SecondaryInfo, Storage, TlsCreds};
use uptane::RepoType;


/// A `Storage` implementation that keeps each row in its own file under
/// a base directory, written via temp-file rename so readers never see a
/// partial row.
pub struct FileStorage {
    base: PathBuf,
}

impl FileStorage {
    pub fn new(base: &str) -> Self {
        FileStorage { base: PathBuf::from(base) }
    }

    fn path(&self, parts: &[&str]) -> String {
        let mut path = self.base.clone();
        for part in parts {
            path.push(part);
        }
        path.to_string_lossy().into_owned()
    }

    fn read_opt(path: &str) -> Result<Option<Vec<u8>>, Error> {
        if Path::new(path).exists() {
            Ok(Some(Util::read_file(path)?))
        } else {
            Ok(None)
        }
    }

    fn installed_row(&self, serial: &str) -> Result<InstalledVersions, Error> {
        match Self::read_opt(&self.path(&["installed", &format!("{}.json", serial)]))? {
            Some(raw) => Ok(json::from_slice(&raw)?),
            None      => Ok(InstalledVersions::default())
        }
    }
}

impl Storage for FileStorage {
    fn store_root(&mut self, repo: RepoType, version: u64, raw: &[u8]) -> Result<(), Error> {
        let repo_name = format!("{}", repo);
        Util::atomic_write(&self.path(&["metadata", &repo_name, &format!("{}.root.json", version)]), raw)
    }

    fn load_root(&self, repo: RepoType, version: u64) -> Result<Option<Vec<u8>>, Error> {
        let repo_name = format!("{}", repo);
        Self::read_opt(&self.path(&["metadata", &repo_name, &format!("{}.root.json", version)]))
    }

    fn load_latest_root(&self, repo: RepoType) -> Result<Option<(u64, Vec<u8>)>, Error> {
        let dir = self.path(&["metadata", &format!("{}", repo)]);
        if !Path::new(&dir).exists() {
            return Ok(None);
        }

        let mut latest = None;
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(version) = name.split(".root.json").nth(0)
                .and_then(|prefix| if format!("{}.root.json", prefix) == name { prefix.parse::<u64>().ok() } else { None })
            {
                if latest.map_or(true, |known| version > known) {
                    latest = Some(version);
                }
            }
        }

        match latest {
            Some(version) => Ok(self.load_root(repo, version)?.map(|raw| (version, raw))),
            None => Ok(None)
        }
    }

    fn store_non_root(&mut self, repo: RepoType, role: &RoleName, raw: &[u8]) -> Result<(), Error> {
        let repo_name = format!("{}", repo);
        Util::atomic_write(&self.path(&["metadata", &repo_name, &format!("{}.json", role)]), raw)
    }

    fn load_non_root(&self, repo: RepoType, role: &RoleName) -> Result<Option<Vec<u8>>, Error> {
        let repo_name = format!("{}", repo);
        Self::read_opt(&self.path(&["metadata", &repo_name, &format!("{}.json", role)]))
    }

    fn clear_non_root(&mut self, repo: RepoType) -> Result<(), Error> {
        let dir = self.path(&["metadata", &format!("{}", repo)]);
        if !Path::new(&dir).exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".root.json") && name.ends_with(".json") {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error> {
        Util::atomic_write(&self.path(&["tls", "ca.pem"]), &creds.ca)?;
        Util::atomic_write(&self.path(&["tls", "cert.pem"]), &creds.cert)?;
        Util::atomic_write(&self.path(&["tls", "pkey.pem"]), &creds.pkey)
    }

    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error> {
        let ca   = Self::read_opt(&self.path(&["tls", "ca.pem"]))?;
        let cert = Self::read_opt(&self.path(&["tls", "cert.pem"]))?;
        let pkey = Self::read_opt(&self.path(&["tls", "pkey.pem"]))?;
        match (ca, cert, pkey) {
            (Some(ca), Some(cert), Some(pkey)) => Ok(Some(TlsCreds { ca: ca, cert: cert, pkey: pkey })),
            _ => Ok(None)
        }
    }

    fn store_primary_keys(&mut self, public_pem: &[u8], private_der: &[u8]) -> Result<(), Error> {
        Util::atomic_write(&self.path(&["keys", "public.pem"]), public_pem)?;
        Util::atomic_write(&self.path(&["keys", "private.der"]), private_der)
    }

    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        let public  = Self::read_opt(&self.path(&["keys", "public.pem"]))?;
        let private = Self::read_opt(&self.path(&["keys", "private.der"]))?;
        match (public, private) {
            (Some(public), Some(private)) => Ok(Some((public, private))),
            _ => Ok(None)
        }
    }

    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error> {
        Util::atomic_write(&self.path(&["device_id"]), device_id.as_bytes())
    }

    fn load_device_id(&self) -> Result<Option<String>, Error> {
        match Self::read_opt(&self.path(&["device_id"]))? {
            Some(raw) => Ok(Some(String::from_utf8(raw)?)),
            None => Ok(None)
        }
    }

    fn store_ecu_serials(&mut self, serials: &[(String, String)]) -> Result<(), Error> {
        Util::atomic_write(&self.path(&["ecu_serials.json"]), &json::to_vec(&serials)?)
    }

    fn load_ecu_serials(&self) -> Result<Vec<(String, String)>, Error> {
        match Self::read_opt(&self.path(&["ecu_serials.json"]))? {
            Some(raw) => Ok(json::from_slice(&raw)?),
            None => Ok(Vec::new())
        }
    }

    fn store_ecu_registered(&mut self) -> Result<(), Error> {
        Util::atomic_write(&self.path(&["ecu_registered"]), b"1")
    }

    fn load_ecu_registered(&self) -> Result<bool, Error> {
        Ok(Path::new(&self.path(&["ecu_registered"])).exists())
    }

    fn save_installed_version(&mut self, serial: &str, image: &TufImage, mode: InstallMode) -> Result<(), Error> {
        let mut row = self.installed_row(serial)?;
        row.apply(image, mode);
        Util::atomic_write(&self.path(&["installed", &format!("{}.json", serial)]), &json::to_vec(&row)?)
    }

    fn load_installed_versions(&self, serial: &str) -> Result<(Option<TufImage>, Option<TufImage>), Error> {
        let row = self.installed_row(serial)?;
        Ok((row.current, row.pending))
    }

    fn clear_pending_version(&mut self, serial: &str) -> Result<(), Error> {
        let mut row = self.installed_row(serial)?;
        row.pending = None;
        Util::atomic_write(&self.path(&["installed", &format!("{}.json", serial)]), &json::to_vec(&row)?)
    }

    fn store_secondary_info(&mut self, info: &SecondaryInfo) -> Result<(), Error> {
        let mut known = self.load_secondaries_info()?;
        known.retain(|sec| sec.serial != info.serial);
        known.push(info.clone());
        Util::atomic_write(&self.path(&["secondaries.json"]), &json::to_vec(&known)?)
    }

    fn load_secondaries_info(&self) -> Result<Vec<SecondaryInfo>, Error> {
        match Self::read_opt(&self.path(&["secondaries.json"]))? {
            Some(raw) => Ok(json::from_slice(&raw)?),
            None => Ok(Vec::new())
        }
    }
}
