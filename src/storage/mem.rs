use std::collections::HashMap;

use datatype::{Error, InstallMode, RoleName, TufImage};
use storage::{InstalledVersions, SecondaryInfo, Storage, TlsCreds};
use uptane::RepoType;


/// An in-memory `Storage` implementation for tests.
#[derive(Default)]
pub struct MemStorage {
    roots:       HashMap<(RepoType, u64), Vec<u8>>,
    non_roots:   HashMap<(RepoType, String), Vec<u8>>,
    tls_creds:   Option<TlsCreds>,
    keys:        Option<(Vec<u8>, Vec<u8>)>,
    device_id:   Option<String>,
    serials:     Vec<(String, String)>,
    registered:  bool,
    installed:   HashMap<String, InstalledVersions>,
    secondaries: Vec<SecondaryInfo>,
}

impl Storage for MemStorage {
    fn store_root(&mut self, repo: RepoType, version: u64, raw: &[u8]) -> Result<(), Error> {
        self.roots.insert((repo, version), raw.to_vec());
        Ok(())
    }

    fn load_root(&self, repo: RepoType, version: u64) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.roots.get(&(repo, version)).cloned())
    }

    fn load_latest_root(&self, repo: RepoType) -> Result<Option<(u64, Vec<u8>)>, Error> {
        Ok(self.roots.iter()
           .filter(|&(&(r, _), _)| r == repo)
           .max_by_key(|&(&(_, version), _)| version)
           .map(|(&(_, version), raw)| (version, raw.clone())))
    }

    fn store_non_root(&mut self, repo: RepoType, role: &RoleName, raw: &[u8]) -> Result<(), Error> {
        self.non_roots.insert((repo, format!("{}", role)), raw.to_vec());
        Ok(())
    }

    fn load_non_root(&self, repo: RepoType, role: &RoleName) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.non_roots.get(&(repo, format!("{}", role))).cloned())
    }

    fn clear_non_root(&mut self, repo: RepoType) -> Result<(), Error> {
        self.non_roots.retain(|&(r, _), _| r != repo);
        Ok(())
    }

    fn store_tls_creds(&mut self, creds: &TlsCreds) -> Result<(), Error> {
        self.tls_creds = Some(creds.clone());
        Ok(())
    }

    fn load_tls_creds(&self) -> Result<Option<TlsCreds>, Error> {
        Ok(self.tls_creds.clone())
    }

    fn store_primary_keys(&mut self, public_pem: &[u8], private_der: &[u8]) -> Result<(), Error> {
        self.keys = Some((public_pem.to_vec(), private_der.to_vec()));
        Ok(())
    }

    fn load_primary_keys(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self.keys.clone())
    }

    fn store_device_id(&mut self, device_id: &str) -> Result<(), Error> {
        self.device_id = Some(device_id.into());
        Ok(())
    }

    fn load_device_id(&self) -> Result<Option<String>, Error> {
        Ok(self.device_id.clone())
    }

    fn store_ecu_serials(&mut self, serials: &[(String, String)]) -> Result<(), Error> {
        self.serials = serials.to_vec();
        Ok(())
    }

    fn load_ecu_serials(&self) -> Result<Vec<(String, String)>, Error> {
        Ok(self.serials.clone())
    }

    fn store_ecu_registered(&mut self) -> Result<(), Error> {
        self.registered = true;
        Ok(())
    }

    fn load_ecu_registered(&self) -> Result<bool, Error> {
        Ok(self.registered)
    }

    fn save_installed_version(&mut self, serial: &str, image: &TufImage, mode: InstallMode) -> Result<(), Error> {
        self.installed.entry(serial.into()).or_insert_with(InstalledVersions::default).apply(image, mode);
        Ok(())
    }

    fn load_installed_versions(&self, serial: &str) -> Result<(Option<TufImage>, Option<TufImage>), Error> {
        match self.installed.get(serial) {
            Some(row) => Ok((row.current.clone(), row.pending.clone())),
            None      => Ok((None, None))
        }
    }

    fn clear_pending_version(&mut self, serial: &str) -> Result<(), Error> {
        if let Some(row) = self.installed.get_mut(serial) {
            row.pending = None;
        }
        Ok(())
    }

    fn store_secondary_info(&mut self, info: &SecondaryInfo) -> Result<(), Error> {
        self.secondaries.retain(|known| known.serial != info.serial);
        self.secondaries.push(info.clone());
        Ok(())
    }

    fn load_secondaries_info(&self) -> Result<Vec<SecondaryInfo>, Error> {
        Ok(self.secondaries.clone())
    }
}
