use crossbeam;
use serde_json as json;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use datatype::{Config, EcuCustom, EcuManifests, EcuVersion, Error, InstallCode, InstallMode,
               InstallOutcome, OperationResult, RoleData, RoleName, SecondaryKind, TufImage,
               TufMeta, Url, Util};
use download::{Downloader, FlowControlToken};
use http::Client;
use keys::KeyManager;
use pacman::{Credentials, PacMan};
use provision::{EcuEntry, Provisioner};
use secondary::{IpSecondary, MetaBundle, OstreeProxySecondary, Secondary, VirtualSecondary};
use storage::{SecondaryInfo, Storage};
use uptane::{MetaFetcher, Repo, RepoType};
use uptane::repo::verify_delegation;


const SENTINEL_FILE: &'static str = "need_reboot";
const MAX_DELEGATION_DEPTH: usize = 5;


/// The outcome of a metadata check.
#[derive(Debug)]
pub enum UpdateCheck {
    UpdatesAvailable(Vec<UpdateTarget>),
    NoUpdatesAvailable,
}

/// One verified target assigned to a specific ECU by the Director.
#[derive(Debug, Clone)]
pub struct UpdateTarget {
    pub serial: String,
    pub image:  TufImage,
    pub uri:    Option<String>,
}


/// The update orchestrator: drives provisioning, metadata verification,
/// artifact download, installation and manifest reporting for the
/// primary and its secondaries. Every operation is single-shot; looping
/// is the caller's concern.
pub struct OtaClient {
    storage:     Box<Storage>,
    client:      Box<Client>,
    keys:        KeyManager,
    pacman:      PacMan,
    provisioner: Provisioner,
    secondaries: Vec<Box<Secondary>>,

    director: Repo,
    image:    Repo,

    director_server: Url,
    image_server:    Url,
    tls_server:      Option<Url>,
    staging_dir:     String,
    sentinel_dir:    String,
    retries:         u32,

    offline:         bool,
    install_results: HashMap<String, OperationResult>,
}

impl OtaClient {
    pub fn new(config: &Config, storage: Box<Storage>, client: Box<Client>, keys: KeyManager,
               pacman: PacMan, secondaries: Vec<Box<Secondary>>) -> Self {
        OtaClient {
            storage:     storage,
            client:      client,
            keys:        keys,
            pacman:      pacman,
            provisioner: Provisioner::from_config(config),
            secondaries: secondaries,

            director: Repo::new(RepoType::Director),
            image:    Repo::new(RepoType::Image),

            director_server: config.uptane.director_server.clone(),
            image_server:    config.uptane.repo_server.clone(),
            tls_server:      config.tls.as_ref().map(|tls| tls.server.clone()),
            staging_dir:     config.uptane.staging_path.clone(),
            sentinel_dir:    config.uptane.sentinel_path.clone(),
            retries:         config.network.retries,

            offline:         false,
            install_results: HashMap::new(),
        }
    }

    /// Must run before any other operation: completes an install that was
    /// pending a reboot and migrates legacy secondary records.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.keys.generate_keypair(&mut *self.storage)?;

        let entries = self.secondaries.iter()
            .map(|sec| EcuEntry {
                serial:      sec.serial(),
                hardware_id: sec.hardware_id(),
                client_key:  sec.public_key().ok(),
            })
            .collect::<Vec<_>>();
        self.provisioner.set_secondaries(entries);

        self.finalize_after_reboot()?;
        self.migrate_secondaries_info()?;
        Ok(())
    }

    /// Make one attempt at provisioning; a no-op once provisioned.
    pub fn attempt_provision(&mut self) -> Result<(), Error> {
        if self.provisioner.is_provisioned(&*self.storage)? {
            return Ok(());
        }
        self.provisioner.attempt(&mut *self.storage, &mut self.keys, &*self.client)
    }

    /// Refresh Director then Image metadata and resolve the authorized
    /// targets for this device's ECUs.
    pub fn fetch_meta(&mut self) -> Result<UpdateCheck, Error> {
        self.attempt_provision()?;

        let result = self.update_repos();
        self.log_connectivity(result.is_ok());
        result?;

        let updates = self.check_updates()?;
        if updates.is_empty() {
            Ok(UpdateCheck::NoUpdatesAvailable)
        } else {
            Ok(UpdateCheck::UpdatesAvailable(updates))
        }
    }

    fn update_repos(&mut self) -> Result<(), Error> {
        let fetcher = MetaFetcher::new(&*self.client, self.director_server.clone(), self.retries);
        self.director.update_meta(&mut *self.storage, &fetcher)?;
        let fetcher = MetaFetcher::new(&*self.client, self.image_server.clone(), self.retries);
        self.image.update_meta(&mut *self.storage, &fetcher)
    }

    /// Rebuild the verified view from storage without the network.
    pub fn check_meta_offline(&mut self) -> Result<(), Error> {
        self.director.check_meta_offline(&*self.storage)?;
        self.image.check_meta_offline(&*self.storage)
    }

    /// Match every Director assignment against the Image repository's
    /// targets tree. Unknown or unauthorized targets are skipped; a
    /// length or hash disagreement fails the cycle.
    pub fn check_updates(&mut self) -> Result<Vec<UpdateTarget>, Error> {
        let known = self.storage.load_ecu_serials()?
            .into_iter()
            .map(|(serial, _)| serial)
            .collect::<HashSet<_>>();
        let assignments = self.director.targets()
            .and_then(|targets| targets.targets.clone())
            .ok_or_else(|| Error::UptaneTargets("director targets not verified".into()))?;
        let image_targets = self.image.targets()
            .cloned()
            .ok_or_else(|| Error::UptaneTargets("image targets not verified".into()))?;

        let fetcher = MetaFetcher::new(&*self.client, self.image_server.clone(), self.retries);
        let storage = &mut *self.storage;
        let mut updates = Vec::new();

        for (name, meta) in assignments {
            let serial = match meta.custom.as_ref().and_then(|custom| custom.ecuIdentifier.clone()) {
                Some(serial) => serial,
                None => {
                    debug!("director target {} has no ecu assignment", name);
                    continue;
                }
            };
            if !known.contains(&serial) {
                info!("ignoring target {} for unknown ecu {}", name, serial);
                continue;
            }

            let found = find_image_target(&image_targets, &fetcher, storage, &name, 0)?;
            let image_meta = match found {
                Some(image_meta) => image_meta,
                None => {
                    info!("target {} not found in image repository, ignoring", name);
                    continue;
                }
            };
            if !image_meta.matches(&meta) {
                return Err(Error::UptaneTargetMismatch(name.clone()));
            }

            let image = TufImage { filepath: name.clone(), fileinfo: meta.clone() };
            let (current, _) = storage.load_installed_versions(&serial)?;
            if current.as_ref() == Some(&image) {
                debug!("target {} already installed on {}", name, serial);
                continue;
            }

            let uri = meta.custom.as_ref().and_then(|custom| custom.uri.clone());
            updates.push(UpdateTarget { serial: serial, image: image, uri: uri });
        }
        Ok(updates)
    }

    /// Download each target to the staging area. Aborting leaves partial
    /// files behind for a later resumed call.
    pub fn download_images(&mut self, targets: &[UpdateTarget], token: &FlowControlToken)
                           -> Result<HashMap<String, String>, Error> {
        let downloader = Downloader::new(&*self.client, self.staging_dir.clone());
        let mut staged = HashMap::new();
        for target in targets {
            let url = match target.uri {
                Some(ref uri) => uri.parse()?,
                None => self.image_server.join(&format!("targets/{}", target.image.filepath))
            };
            let path = downloader.download(url, &target.image.fileinfo, token, &mut |read, total| {
                trace!("downloaded {}/{} bytes of {}", read, total, target.image.filepath);
            })?;
            staged.insert(target.image.filepath.clone(), path);
        }
        Ok(staged)
    }

    /// Install on the primary, then fan the update out to the secondaries
    /// concurrently. Per-ECU failures are recorded for the next manifest
    /// and never abort the cycle.
    pub fn uptane_install(&mut self, targets: &[UpdateTarget]) -> Result<Vec<(String, InstallOutcome)>, Error> {
        let primary_serial = self.provisioner.primary_ecu_serial(&*self.storage)?;
        let mut reports = Vec::new();

        for target in targets.iter().filter(|target| target.serial == primary_serial) {
            let outcome = self.install_primary(target)?;
            reports.push((primary_serial.clone(), outcome));
        }

        let bundle = self.meta_bundle()?;
        let roots = self.root_chains()?;
        let downloader = Downloader::new(&*self.client, self.staging_dir.clone());
        let mut work = Vec::new();
        for target in targets.iter().filter(|target| target.serial != primary_serial) {
            let payload = downloader.staging_path(&target.image.fileinfo)
                .and_then(|staged| Util::read_file(&staged));
            match payload {
                Ok(payload) => work.push((target.clone(), payload)),
                Err(_) => {
                    // recorded for the manifest; the other ECUs still proceed
                    reports.push((target.serial.clone(),
                                  InstallOutcome::new(InstallCode::DOWNLOAD_FAILED, "target not downloaded".into())));
                }
            }
        }

        {
            let secondaries = &mut self.secondaries;
            let results = crossbeam::scope(|scope| {
                let mut handles = Vec::new();
                for sec in secondaries.iter_mut() {
                    let job = work.iter().find(|&&(ref target, _)| target.serial == sec.serial());
                    let job = match job {
                        Some(job) => job,
                        None => continue
                    };
                    let bundle = &bundle;
                    let roots = &roots;
                    handles.push(scope.spawn(move || {
                        let serial = sec.serial();
                        let outcome = deliver_to_secondary(sec, roots, bundle, &job.0, &job.1);
                        (serial, outcome)
                    }));
                }
                handles.into_iter().map(|handle| handle.join()).collect::<Vec<_>>()
            });
            reports.extend(results);
        }

        for &(ref serial, ref outcome) in &reports {
            if serial != &primary_serial && outcome.code == InstallCode::OK {
                if let Some(target) = targets.iter().find(|target| &target.serial == serial) {
                    self.storage.save_installed_version(serial, &target.image, InstallMode::Current)?;
                }
            }
            let result = outcome.clone().into_result(
                targets.iter()
                    .find(|target| &target.serial == serial)
                    .map(|target| target.image.filepath.clone())
                    .unwrap_or_default());
            self.install_results.insert(serial.clone(), result);
        }
        Ok(reports)
    }

    fn install_primary(&mut self, target: &UpdateTarget) -> Result<InstallOutcome, Error> {
        let downloader = Downloader::new(&*self.client, self.staging_dir.clone());
        let staged = downloader.staging_path(&target.image.fileinfo)?;
        if !Path::new(&staged).exists() {
            return Ok(InstallOutcome::new(InstallCode::DOWNLOAD_FAILED, "target not downloaded".into()));
        }
        if !self.pacman.is_target_supported(&target.image) {
            return Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "unsupported target format".into()));
        }

        let creds = self.credentials();
        let outcome = self.pacman.install(&target.image, &staged, &creds)?;
        match outcome.code {
            InstallCode::OK => {
                self.storage.save_installed_version(&target.serial, &target.image, InstallMode::Current)?;
            }
            InstallCode::NEED_COMPLETION => {
                // the pending version is persisted before the sentinel
                self.storage.save_installed_version(&target.serial, &target.image, InstallMode::Pending)?;
                fs::create_dir_all(&self.sentinel_dir)?;
                Util::write_file(&format!("{}/{}", self.sentinel_dir, SENTINEL_FILE), b"")?;
            }
            _ => ()
        }
        Ok(outcome)
    }

    /// Collect a signed manifest from every ECU, wrap them in the device
    /// envelope and PUT the result to the Director.
    pub fn put_manifest(&mut self) -> Result<(), Error> {
        let primary_serial = self.provisioner.primary_ecu_serial(&*self.storage)?;
        let mut manifests = HashMap::new();

        let custom = self.install_results.remove(&primary_serial).map(EcuCustom::from_result);
        let image = self.installed_or_unknown(&primary_serial)?;
        let version = EcuVersion::from(primary_serial.clone(), image, custom);
        manifests.insert(primary_serial.clone(), self.keys.sign_data(json::to_value(version)?)?);

        for index in 0..self.secondaries.len() {
            let (serial, manifest) = {
                let sec = &self.secondaries[index];
                (sec.serial(), sec.get_manifest())
            };
            match manifest {
                Ok(signed) => {
                    manifests.insert(serial, signed);
                }
                Err(err) => {
                    // report the last known version on the secondary's behalf
                    warn!("couldn't get manifest from {}: {}", serial, err);
                    let custom = self.install_results.remove(&serial).map(EcuCustom::from_result);
                    let image = self.installed_or_unknown(&serial)?;
                    let version = EcuVersion::from(serial.clone(), image, custom);
                    manifests.insert(serial, self.keys.sign_data(json::to_value(version)?)?);
                }
            }
        }

        let ecus = EcuManifests {
            primary_ecu_serial:    primary_serial,
            ecu_version_manifests: manifests,
        };
        let manifest = self.keys.sign_data(json::to_value(ecus)?)?;
        let url = self.director_server.join("manifest");
        self.client.put(url, Some(json::to_vec(&manifest)?)).recv()
            .ok_or_else(|| Error::Client("no manifest response".into()))?
            .into_result()?;
        info!("manifest sent");
        Ok(())
    }

    /// Post hardware details and the installed package list.
    pub fn send_device_data(&mut self) -> Result<(), Error> {
        let server = match self.tls_server {
            Some(ref server) => server.clone(),
            None => {
                debug!("no device gateway configured, skipping device data");
                return Ok(());
            }
        };

        let serials = self.storage.load_ecu_serials()?;
        let info = json!({
            "ecus": serials.iter()
                .map(|&(ref serial, ref hardware)| json!({
                    "ecu_serial": serial,
                    "hardware_identifier": hardware
                }))
                .collect::<Vec<_>>()
        });
        self.client.post(server.join("system_info"), Some(json::to_vec(&info)?)).recv()
            .ok_or_else(|| Error::Client("no system_info response".into()))?
            .into_result()?;

        let packages = self.pacman.installed_packages().unwrap_or_else(|err| {
            debug!("couldn't list installed packages: {}", err);
            Vec::new()
        });
        self.client.put(server.join("core/installed"), Some(json::to_vec(&packages)?)).recv()
            .ok_or_else(|| Error::Client("no installed packages response".into()))?
            .into_result()?;
        Ok(())
    }

    /// Reboot completion: promote or clear the pending version recorded
    /// before the reboot, and remember the outcome for the next manifest.
    pub fn finalize_after_reboot(&mut self) -> Result<(), Error> {
        let sentinel = format!("{}/{}", self.sentinel_dir, SENTINEL_FILE);
        if !Path::new(&sentinel).exists() {
            return Ok(());
        }

        info!("completing installation after reboot");
        let serial = self.provisioner.primary_ecu_serial(&*self.storage)?;
        let (_, pending) = self.storage.load_installed_versions(&serial)?;
        match pending {
            Some(image) => {
                let outcome = self.pacman.finalize_install(&image)?;
                if outcome.code.is_success() {
                    self.storage.save_installed_version(&serial, &image, InstallMode::Current)?;
                } else {
                    self.storage.clear_pending_version(&serial)?;
                }
                self.install_results.insert(serial, outcome.into_result(image.filepath));
            }
            None => debug!("reboot sentinel found without a pending version")
        }
        fs::remove_file(&sentinel)?;
        Ok(())
    }

    pub fn complete_install(&mut self) -> Result<(), Error> {
        self.finalize_after_reboot()
    }

    /// The persisted records of all known secondary ECUs.
    pub fn secondaries_info(&self) -> Result<Vec<SecondaryInfo>, Error> {
        self.storage.load_secondaries_info()
    }

    pub fn has_pending_update(&self) -> Result<bool, Error> {
        let serial = self.provisioner.primary_ecu_serial(&*self.storage)?;
        let (_, pending) = self.storage.load_installed_versions(&serial)?;
        Ok(pending.is_some())
    }

    /// The image recorded as current for an ECU, or a placeholder when
    /// nothing was installed yet.
    fn installed_or_unknown(&self, serial: &str) -> Result<TufImage, Error> {
        let (current, _) = self.storage.load_installed_versions(serial)?;
        Ok(current.unwrap_or_else(|| TufImage {
            filepath: "noimage".into(),
            fileinfo: TufMeta { length: 0, hashes: HashMap::new(), custom: None },
        }))
    }

    fn credentials(&self) -> Credentials {
        match self.keys.tls_data() {
            Some(tls) => Credentials {
                ca_file:   tls.ca_path.map(String::from),
                cert_file: tls.cert_path.map(String::from),
                pkey_file: tls.pkey_path.map(String::from),
            },
            None => Credentials::default()
        }
    }

    /// The metadata bundle delivered to secondaries, in verification order.
    fn meta_bundle(&self) -> Result<MetaBundle, Error> {
        let mut bundle = Vec::new();
        for &repo in &[RepoType::Director, RepoType::Image] {
            let (_, root) = self.storage.load_latest_root(repo)?
                .ok_or_else(|| Error::UptaneRole(format!("no stored {} root", repo)))?;
            bundle.push(((repo, RoleName::Root), root));

            let roles: &[RoleName] = match repo {
                RepoType::Director => &[RoleName::Targets],
                RepoType::Image    => &[RoleName::Timestamp, RoleName::Snapshot, RoleName::Targets],
            };
            for role in roles {
                let raw = self.storage.load_non_root(repo, role)?
                    .ok_or_else(|| Error::UptaneRole(format!("no stored {} {}", repo, role)))?;
                bundle.push(((repo, role.clone()), raw));
            }
        }
        Ok(bundle)
    }

    /// Every stored root version per repository, for walking a secondary
    /// through rotations one version at a time.
    fn root_chains(&self) -> Result<HashMap<RepoType, Vec<(u64, Vec<u8>)>>, Error> {
        let mut chains = HashMap::new();
        for &repo in &[RepoType::Director, RepoType::Image] {
            let latest = match self.storage.load_latest_root(repo)? {
                Some((version, _)) => version,
                None => continue
            };
            let mut chain = Vec::new();
            for version in 1..latest + 1 {
                if let Some(raw) = self.storage.load_root(repo, version)? {
                    chain.push((version, raw));
                }
            }
            chains.insert(repo, chain);
        }
        Ok(chains)
    }

    fn migrate_secondaries_info(&mut self) -> Result<(), Error> {
        let known = self.storage.load_secondaries_info()?;
        for sec in &self.secondaries {
            if !known.iter().any(|info| info.serial == sec.serial()) {
                self.storage.store_secondary_info(&SecondaryInfo {
                    serial: sec.serial(),
                    kind:   sec.kind().into(),
                    extra:  sec.extra(),
                })?;
            }
        }
        Ok(())
    }

    fn log_connectivity(&mut self, ok: bool) {
        if ok && self.offline {
            info!("connectivity restored");
        } else if !ok && !self.offline {
            warn!("server unreachable");
        }
        self.offline = !ok;
    }
}


/// Bring one secondary fully up to date. Failures are reported, never
/// propagated: the cycle continues for the other ECUs.
fn deliver_to_secondary(sec: &mut Box<Secondary>, roots: &HashMap<RepoType, Vec<(u64, Vec<u8>)>>,
                        bundle: &MetaBundle, target: &UpdateTarget, payload: &[u8]) -> InstallOutcome {
    let serial = sec.serial();
    match deliver_steps(sec, roots, bundle, target, payload) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("update of secondary {} failed: {}", serial, err);
            InstallOutcome::error(format!("{}", err))
        }
    }
}

fn deliver_steps(sec: &mut Box<Secondary>, roots: &HashMap<RepoType, Vec<(u64, Vec<u8>)>>,
                 bundle: &MetaBundle, target: &UpdateTarget, payload: &[u8]) -> Result<InstallOutcome, Error> {
    for &repo in &[RepoType::Director, RepoType::Image] {
        let current = sec.get_root_version(repo).unwrap_or(0);
        if let Some(chain) = roots.get(&repo) {
            for &(version, ref raw) in chain.iter().filter(|&&(version, _)| version > current) {
                trace!("sending {} root version {} to {}", repo, version, sec.serial());
                sec.put_root(repo, raw)?;
            }
        }
    }
    sec.put_meta(bundle)?;
    sec.send_firmware(&target.image, payload)?;
    sec.install(&target.image)
}

/// Look a target name up in the image targets, then depth-first through
/// the delegation tree in declaration order. A terminating role ends the
/// search once its path patterns match.
fn find_image_target(parent: &RoleData, fetcher: &MetaFetcher, storage: &mut Storage,
                     name: &str, depth: usize) -> Result<Option<TufMeta>, Error> {
    if let Some(meta) = parent.targets.as_ref().and_then(|targets| targets.get(name)) {
        return Ok(Some(meta.clone()));
    }
    if depth >= MAX_DELEGATION_DEPTH {
        return Ok(None);
    }

    let delegations = match parent.delegations {
        Some(ref delegations) => delegations,
        None => return Ok(None)
    };
    for role in &delegations.roles {
        if !role.matches_path(name) {
            continue;
        }

        let role_name = RoleName::Delegation(role.name.clone());
        let raw = match fetcher.fetch_role(&role_name, ::uptane::MAX_TARGETS_SIZE) {
            Ok(raw) => {
                storage.store_non_root(RepoType::Image, &role_name, &raw)?;
                raw
            }
            Err(err) => match storage.load_non_root(RepoType::Image, &role_name)? {
                Some(raw) => raw,
                None => return Err(err)
            }
        };
        let data = verify_delegation(parent, &role.name, &raw)?;

        let found = find_image_target(&data, fetcher, storage, name, depth + 1)?;
        if found.is_some() {
            return Ok(found);
        }
        if role.terminating {
            return Ok(None);
        }
    }
    Ok(None)
}


/// Build the secondary list from the config, reusing persisted identity
/// details when a remote ECU is unreachable so it can still be reported.
pub fn build_secondaries(config: &Config, storage: &Storage, timeout: Duration) -> Vec<Box<Secondary>> {
    let stored = storage.load_secondaries_info().unwrap_or_default();
    let serials = storage.load_ecu_serials().unwrap_or_default();
    let mut spare_serials = serials.into_iter().skip(1).collect::<Vec<_>>();

    let mut secondaries: Vec<Box<Secondary>> = Vec::new();
    for cfg in &config.secondaries {
        match cfg.kind {
            SecondaryKind::Virtual => {
                let serial = cfg.ecu_serial.clone()
                    .or_else(|| spare_serials.pop().map(|(serial, _)| serial))
                    .unwrap_or_else(|| format!("{}", ::uuid::Uuid::new_v4()));
                let hardware = cfg.hardware_id.clone().unwrap_or_else(|| "virtual-secondary".into());
                let dir = cfg.metadata_path.clone().unwrap_or_else(|| format!("/var/sota/virtual/{}", serial));
                match VirtualSecondary::new(serial, hardware, dir) {
                    Ok(sec) => secondaries.push(Box::new(sec)),
                    Err(err) => error!("couldn't create virtual secondary: {}", err)
                }
            }

            SecondaryKind::Ip | SecondaryKind::OstreeProxy => {
                let addr = match (cfg.ip.as_ref(), cfg.port) {
                    (Some(ip), Some(port)) => match format!("{}:{}", ip, port).parse() {
                        Ok(addr) => addr,
                        Err(err) => {
                            error!("bad secondary address {}:{}: {}", ip, port, err);
                            continue;
                        }
                    },
                    _ => {
                        error!("ip secondary declared without ip and port");
                        continue;
                    }
                };

                let inner = match IpSecondary::discover(addr, timeout) {
                    Ok(sec) => sec,
                    Err(err) => {
                        warn!("secondary at {} unreachable: {}", addr, err);
                        let serial = cfg.ecu_serial.clone()
                            .or_else(|| stored.iter()
                                     .find(|info| info.extra.get("port").and_then(|port| port.as_u64())
                                           == Some(addr.port() as u64))
                                     .map(|info| info.serial.clone()))
                            .or_else(|| spare_serials.pop().map(|(serial, _)| serial));
                        match serial {
                            Some(serial) => {
                                let hardware = cfg.hardware_id.clone().unwrap_or_else(|| "remote-secondary".into());
                                IpSecondary::from_parts(addr, timeout, serial, hardware)
                            }
                            None => {
                                error!("unreachable secondary at {} has no known serial, skipping", addr);
                                continue;
                            }
                        }
                    }
                };

                if cfg.kind == SecondaryKind::OstreeProxy {
                    secondaries.push(Box::new(OstreeProxySecondary::new(inner, None, None, None)));
                } else {
                    secondaries.push(Box::new(inner));
                }
            }
        }
    }
    secondaries
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use crypto::ed25519;
    use hex::ToHex;

    use datatype::{DelegatedRole, Delegations, Key, KeyType, KeyValue, PrivateKey, RoleMeta,
                   SignatureType, TufCustom, TufSigned, sha256_hex};
    use http::TestClient;
    use keys::KeyManager;
    use storage::MemStorage;


    fn signer(seed: u8) -> (PrivateKey, String, Key) {
        let (secret, public) = ed25519::keypair(&[seed; 32]);
        let key = Key {
            keytype: KeyType::Ed25519,
            keyval:  KeyValue { public: public.to_hex() },
        };
        let keyid = key.key_id().expect("key_id");
        (PrivateKey { keyid: keyid.clone(), der_key: secret.as_ref().to_vec() }, keyid, key)
    }

    fn future() -> DateTime<Utc> {
        "2031-01-01T00:00:00Z".parse().expect("future")
    }

    fn sign(data: &RoleData, key: &PrivateKey) -> Vec<u8> {
        let value = json::to_value(data).expect("value");
        json::to_vec(&key.sign_data(value, SignatureType::Ed25519).expect("sign")).expect("bytes")
    }

    fn meta_for(body: &[u8]) -> TufMeta {
        TufMeta {
            length: body.len() as u64,
            hashes: hashmap!{ "sha256".into() => sha256_hex(body) },
            custom: Some(TufCustom {
                ecuIdentifier: None,
                hardwareId:    None,
                uri:           None,
                format:        None,
            }),
        }
    }

    fn delegating_targets(keyid: &str, key: &Key, roles: Vec<DelegatedRole>) -> RoleData {
        RoleData {
            _type:   RoleName::Targets,
            version: 1,
            expires: future(),
            keys:    None,
            roles:   None,
            targets: Some(HashMap::new()),
            meta:    None,
            delegations: Some(Delegations {
                keys:  hashmap!{ keyid.to_string() => key.clone() },
                roles: roles,
            }),
        }
    }

    fn delegated_targets(name: &str) -> RoleData {
        RoleData {
            _type:   RoleName::Targets,
            version: 1,
            expires: future(),
            keys:    None,
            roles:   None,
            targets: Some(hashmap!{ name.to_string() => meta_for(b"delegated body") }),
            meta:    None,
            delegations: None,
        }
    }

    fn role(name: &str, keyid: &str, paths: Vec<String>, terminating: bool) -> DelegatedRole {
        DelegatedRole {
            name:      name.into(),
            keyids:    hashset!{ keyid.to_string() },
            threshold: 1,
            paths:     paths,
            terminating: terminating,
        }
    }


    #[test]
    fn delegation_tree_is_searched_in_order() {
        let (privkey, keyid, key) = signer(5);
        let parent = delegating_targets(&keyid, &key, vec![
            role("other", &keyid, vec!["other/*".into()], false),
            role("apps", &keyid, vec!["apps/*".into()], false),
        ]);

        let client = TestClient::from_routes(hashmap!{
            "delegations/apps.json".to_string() => vec![sign(&delegated_targets("apps/demo.img"), &privkey)],
            "delegations/other.json".to_string() => vec![sign(&delegated_targets("other/x.img"), &privkey)],
        });
        let fetcher = MetaFetcher::new(&client, "http://localhost:8002/repo".parse().unwrap(), 1);
        let mut storage = MemStorage::default();

        let found = find_image_target(&parent, &fetcher, &mut storage, "apps/demo.img", 0)
            .expect("search").expect("found");
        assert_eq!(found.length, b"delegated body".len() as u64);

        // verified delegations are cached for offline resolution
        let cached = storage.load_non_root(RepoType::Image, &RoleName::Delegation("apps".into()))
            .expect("load").expect("cached");
        assert!(!cached.is_empty());
    }

    #[test]
    fn terminating_delegation_ends_the_search() {
        let (privkey, keyid, key) = signer(5);
        let parent = delegating_targets(&keyid, &key, vec![
            role("first", &keyid, vec!["apps/*".into()], true),
            role("second", &keyid, vec!["apps/*".into()], false),
        ]);

        // only `second` actually lists the target
        let client = TestClient::from_routes(hashmap!{
            "delegations/first.json".to_string() => vec![sign(&delegated_targets("apps/elsewhere.img"), &privkey)],
            "delegations/second.json".to_string() => vec![sign(&delegated_targets("apps/demo.img"), &privkey)],
        });
        let fetcher = MetaFetcher::new(&client, "http://localhost:8002/repo".parse().unwrap(), 1);
        let mut storage = MemStorage::default();

        let found = find_image_target(&parent, &fetcher, &mut storage, "apps/demo.img", 0).expect("search");
        assert!(found.is_none());
    }

    #[test]
    fn unsigned_delegation_is_rejected() {
        let (_, keyid, key) = signer(5);
        let (evil, _, _) = signer(6);
        let parent = delegating_targets(&keyid, &key, vec![
            role("apps", &keyid, vec!["apps/*".into()], false),
        ]);

        let client = TestClient::from_routes(hashmap!{
            "delegations/apps.json".to_string() => vec![sign(&delegated_targets("apps/demo.img"), &evil)],
        });
        let fetcher = MetaFetcher::new(&client, "http://localhost:8002/repo".parse().unwrap(), 1);
        let mut storage = MemStorage::default();

        assert!(find_image_target(&parent, &fetcher, &mut storage, "apps/demo.img", 0).is_err());
    }


    /// A secondary that accepts everything, for exercising the fan-out.
    struct FakeSecondary {
        serial: String,
    }

    impl Secondary for FakeSecondary {
        fn serial(&self) -> String {
            self.serial.clone()
        }

        fn hardware_id(&self) -> String {
            "fake-hw".into()
        }

        fn public_key(&self) -> Result<Key, Error> {
            Ok(Key { keytype: KeyType::Ed25519, keyval: KeyValue { public: "00".into() } })
        }

        fn get_manifest(&self) -> Result<TufSigned, Error> {
            Err(Error::Secondary("no manifest".into()))
        }

        fn get_root_version(&self, _: RepoType) -> Result<u64, Error> {
            Ok(1)
        }

        fn put_root(&mut self, _: RepoType, _: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn put_meta(&mut self, _: &MetaBundle) -> Result<(), Error> {
            Ok(())
        }

        fn send_firmware(&mut self, _: &TufImage, _: &[u8]) -> Result<(), Error> {
            Ok(())
        }

        fn install(&mut self, _: &TufImage) -> Result<InstallOutcome, Error> {
            Ok(InstallOutcome::ok())
        }

        fn kind(&self) -> &'static str {
            "Virtual"
        }

        fn extra(&self) -> json::Value {
            json!({})
        }
    }

    #[test]
    fn missing_secondary_artifact_does_not_abort_install() {
        let dir = format!("/tmp/ota-install-partial-{}", &sha256_hex(b"ota-install-partial")[..8]);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create dir");

        let mut config = Config::default();
        config.uptane.primary_ecu_serial = Some("primary".into());
        config.uptane.staging_path = format!("{}/staging", dir);
        config.uptane.sentinel_path = format!("{}/boot", dir);

        let mut storage = MemStorage::default();
        storage.store_ecu_serials(&[("primary".into(), "hw".into()),
                                    ("sec-ok".into(), "hw".into()),
                                    ("sec-missing".into(), "hw".into())]).expect("serials");
        // raw rows are enough for the bundle; the fake secondaries accept anything
        storage.store_root(RepoType::Director, 1, b"root").expect("director root");
        storage.store_non_root(RepoType::Director, &RoleName::Targets, b"targets").expect("director targets");
        storage.store_root(RepoType::Image, 1, b"root").expect("image root");
        for role in &[RoleName::Timestamp, RoleName::Snapshot, RoleName::Targets] {
            storage.store_non_root(RepoType::Image, role, b"meta").expect("image role");
        }

        let primary_body = b"primary body";
        let staged_body = b"staged body";
        let missing_body = b"missing body";
        let staging = format!("{}/staging", dir);
        Util::write_file(&format!("{}/{}", staging, sha256_hex(primary_body)), primary_body).expect("stage primary");
        Util::write_file(&format!("{}/{}", staging, sha256_hex(staged_body)), staged_body).expect("stage secondary");

        let secondaries: Vec<Box<Secondary>> = vec![
            Box::new(FakeSecondary { serial: "sec-ok".into() }),
            Box::new(FakeSecondary { serial: "sec-missing".into() }),
        ];
        let mut ota = OtaClient::new(
            &config,
            Box::new(storage),
            Box::new(TestClient::default()),
            KeyManager::new(format!("{}/run", dir)),
            PacMan::Test { filename: format!("{}/tpm", dir), succeeds: true, completion: false },
            secondaries,
        );

        let target = |serial: &str, name: &str, body: &[u8]| UpdateTarget {
            serial: serial.into(),
            image:  TufImage { filepath: name.into(), fileinfo: meta_for(body) },
            uri:    None,
        };
        let targets = vec![
            target("primary", "primary.img", primary_body),
            target("sec-ok", "ok.img", staged_body),
            target("sec-missing", "missing.img", missing_body),
        ];

        let reports = ota.uptane_install(&targets).expect("install");
        assert_eq!(reports.len(), 3);
        let code_for = |serial: &str| reports.iter()
            .find(|&&(ref known, _)| known == serial)
            .map(|&(_, ref outcome)| outcome.code)
            .expect(serial);
        assert_eq!(code_for("primary"), InstallCode::OK);
        assert_eq!(code_for("sec-ok"), InstallCode::OK);
        assert_eq!(code_for("sec-missing"), InstallCode::DOWNLOAD_FAILED);

        let _ = fs::remove_dir_all(&dir);
    }
}
