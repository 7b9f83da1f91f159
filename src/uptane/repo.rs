use serde_json as json;
use std::thread;
use std::time::Duration;

use datatype::{CanonicalJson, Error, MetaInfo, RoleData, RoleName, TufSigned, Url,
               sha256_hex, sha512_hex};
use http::{Client, Response};
use storage::Storage;
use uptane::{RepoType, Verifier};


pub const MAX_ROOT_SIZE:      u64 = 64 * 1024;
pub const MAX_TIMESTAMP_SIZE: u64 = 16 * 1024;
pub const MAX_SNAPSHOT_SIZE:  u64 = 5 * 1024 * 1024;
pub const MAX_TARGETS_SIZE:   u64 = 5 * 1024 * 1024;
pub const MAX_ROOT_ROTATIONS: u64 = 1000;


/// Fetches metadata from one repository with a bounded response size and
/// a linear retry on transport failures and server errors.
pub struct MetaFetcher<'c> {
    client:  &'c Client,
    server:  Url,
    retries: u32,
}

impl<'c> MetaFetcher<'c> {
    pub fn new(client: &'c Client, server: Url, retries: u32) -> Self {
        MetaFetcher { client: client, server: server, retries: retries }
    }

    pub fn fetch_role(&self, role: &RoleName, max_size: u64) -> Result<Vec<u8>, Error> {
        self.fetch_path(&role.remote_path(), max_size)
    }

    pub fn fetch_root_version(&self, version: u64, max_size: u64) -> Result<Vec<u8>, Error> {
        self.fetch_path(&format!("{}.root.json", version), max_size)
    }

    pub fn fetch_path(&self, path: &str, max_size: u64) -> Result<Vec<u8>, Error> {
        let url = self.server.join(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = self.client.get(url.clone(), Some(max_size)).recv()
                .ok_or_else(|| Error::Client("no fetch response".into()))?;
            match resp {
                Response::Success(data) => return Ok(data.body),

                Response::Failed(data) => {
                    if data.code.is_server_error() && attempt < self.retries {
                        warn!("fetch of {} returned {}, retrying", url, data.code);
                        thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                    return Err(data.into());
                }

                Response::Error(err) => {
                    if attempt < self.retries {
                        warn!("fetch of {} failed ({}), retrying", url, err);
                        thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                    return Err(*err);
                }
            }
        }
    }
}


/// Parse the version claim of an envelope before any verification, for
/// rollback comparisons only.
fn untrusted_version(raw: &[u8]) -> Result<u64, Error> {
    let signed = json::from_slice::<TufSigned>(raw)?;
    signed.signed.get("version")
        .and_then(|version| version.as_u64())
        .ok_or_else(|| Error::Parse("metadata missing version field".into()))
}

/// Parse and self-verify an initial root: its own keys must meet its own
/// root role threshold.
pub fn self_verify_root(raw: &[u8]) -> Result<RoleData, Error> {
    let signed = json::from_slice::<TufSigned>(raw)?;
    let data = json::from_value::<RoleData>(signed.signed.clone())?;
    Verifier::from_root(&data)?.verify_signed(&RoleName::Root, &signed)
}

/// Verify a candidate next root against the current one: it must carry a
/// signature threshold under both the old and the new key sets, and bump
/// the version by exactly one.
pub fn verify_root_transition(current: &RoleData, raw: &[u8]) -> Result<RoleData, Error> {
    let signed = json::from_slice::<TufSigned>(raw)?;
    Verifier::from_root(current)?.verify_signatures(&RoleName::Root, &signed)?;
    let data = self_verify_root(raw)?;
    if data.version != current.version + 1 {
        return Err(Error::UptaneRootRotation(
            format!("expected version {}, got {}", current.version + 1, data.version)));
    }
    Ok(data)
}

/// Verify a delegated targets role under its parent's delegations block.
pub fn verify_delegation(parent: &RoleData, name: &str, raw: &[u8]) -> Result<RoleData, Error> {
    let delegations = parent.delegations.as_ref()
        .ok_or_else(|| Error::UptaneRole(format!("no delegations for role {}", name)))?;
    let signed = json::from_slice::<TufSigned>(raw)?;
    let data = Verifier::from_delegations(delegations)?
        .verify_signed(&RoleName::Delegation(name.into()), &signed)?;
    if data.expired() {
        return Err(Error::UptaneExpired(RoleName::Delegation(name.into())));
    }
    Ok(data)
}


/// The per-repository verification state machine. The Director and Image
/// instances share root rotation and differ in their role graph: the
/// Director serves Targets only, the Image repository the full
/// Timestamp/Snapshot/Targets chain.
pub struct Repo {
    pub repo_type: RepoType,
    root:          Option<RoleData>,
    timestamp:     Option<RoleData>,
    timestamp_sig: Option<String>,
    snapshot:      Option<RoleData>,
    targets:       Option<RoleData>,
}

impl Repo {
    pub fn new(repo_type: RepoType) -> Self {
        Repo {
            repo_type:     repo_type,
            root:          None,
            timestamp:     None,
            timestamp_sig: None,
            snapshot:      None,
            targets:       None,
        }
    }

    pub fn root(&self) -> Result<&RoleData, Error> {
        self.root.as_ref().ok_or_else(|| Error::UptaneRole(format!("{} root not loaded", self.repo_type)))
    }

    pub fn root_version(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.version)
    }

    pub fn targets(&self) -> Option<&RoleData> {
        self.targets.as_ref()
    }

    /// All roles are verified, current and unexpired.
    pub fn is_ready(&self) -> bool {
        self.targets.is_some()
    }

    fn reset_meta(&mut self) {
        self.timestamp = None;
        self.timestamp_sig = None;
        self.snapshot = None;
        self.targets = None;
    }

    /// Bring the trusted root up to the latest version the repository
    /// serves: starting from the stored root (or a self-verified version
    /// 1), accept each N+1 that is double-signed and contiguous. Every
    /// accepted rotation invalidates the cached non-root metadata.
    pub fn update_root(&mut self, storage: &mut Storage, fetcher: &MetaFetcher) -> Result<(), Error> {
        let root = match storage.load_latest_root(self.repo_type)? {
            Some((_, raw)) => self_verify_root(&raw)?,
            None => {
                let raw = fetcher.fetch_root_version(1, MAX_ROOT_SIZE)?;
                let root = self_verify_root(&raw)?;
                storage.store_root(self.repo_type, root.version, &raw)?;
                root
            }
        };
        self.root = Some(root);

        for _ in 0..MAX_ROOT_ROTATIONS {
            let next = self.root_version() + 1;
            let raw = match fetcher.fetch_root_version(next, MAX_ROOT_SIZE) {
                Ok(raw) => raw,
                Err(_)  => break
            };
            let root = verify_root_transition(self.root()?, &raw)?;
            debug!("{} root rotated to version {}", self.repo_type, root.version);
            storage.store_root(self.repo_type, root.version, &raw)?;
            storage.clear_non_root(self.repo_type)?;
            self.reset_meta();
            self.root = Some(root);
        }

        if self.root()?.expired() {
            return Err(Error::UptaneExpired(RoleName::Root));
        }
        Ok(())
    }

    /// Refresh all metadata for this repository from the server.
    pub fn update_meta(&mut self, storage: &mut Storage, fetcher: &MetaFetcher) -> Result<(), Error> {
        let prev_timestamp = self.timestamp.take();
        let prev_timestamp_sig = self.timestamp_sig.take();
        self.reset_meta();
        self.update_root(storage, fetcher)?;

        match self.repo_type {
            RepoType::Director => self.update_director_targets(storage, fetcher),
            RepoType::Image => {
                self.update_timestamp(storage, fetcher, prev_timestamp_sig)?;
                let snapshot_updated = self.update_snapshot(storage, fetcher, prev_timestamp.as_ref())?;
                self.update_targets(storage, fetcher, snapshot_updated)
            }
        }
    }

    /// Re-run the verification chain over the stored metadata without
    /// touching the network, rebuilding the in-memory view.
    pub fn check_meta_offline(&mut self, storage: &Storage) -> Result<(), Error> {
        self.reset_meta();

        let (_, raw) = storage.load_latest_root(self.repo_type)?
            .ok_or_else(|| Error::UptaneRole(format!("no stored {} root", self.repo_type)))?;
        let root = self_verify_root(&raw)?;
        if root.expired() {
            return Err(Error::UptaneExpired(RoleName::Root));
        }
        self.root = Some(root);

        if self.repo_type == RepoType::Image {
            let raw = self.load_stored(storage, RoleName::Timestamp)?;
            let signed = json::from_slice::<TufSigned>(&raw)?;
            let data = self.verifier()?.verify_signed(&RoleName::Timestamp, &signed)?;
            if data.expired() {
                return Err(Error::UptaneExpired(RoleName::Timestamp));
            }
            self.timestamp_sig = signed.signatures.get(0).map(|sig| sig.sig.clone());
            self.timestamp = Some(data);

            let raw = self.load_stored(storage, RoleName::Snapshot)?;
            let data = self.verify_snapshot(&raw, false)?;
            if data.expired() {
                return Err(Error::UptaneExpired(RoleName::Snapshot));
            }
            self.snapshot = Some(data);
        }

        let raw = self.load_stored(storage, RoleName::Targets)?;
        let data = match self.repo_type {
            RepoType::Director => self.verifier()?.verify_signed(&RoleName::Targets, &json::from_slice::<TufSigned>(&raw)?)?,
            RepoType::Image    => self.verify_targets(&raw, false)?,
        };
        if data.expired() {
            return Err(Error::UptaneExpired(RoleName::Targets));
        }
        self.targets = Some(data);
        Ok(())
    }

    fn load_stored(&self, storage: &Storage, role: RoleName) -> Result<Vec<u8>, Error> {
        storage.load_non_root(self.repo_type, &role)?
            .ok_or_else(|| Error::UptaneRole(format!("no stored {} {}", self.repo_type, role)))
    }

    fn verifier(&self) -> Result<Verifier, Error> {
        Verifier::from_root(self.root()?)
    }

    /// The Director role graph has no Timestamp or Snapshot: its Targets
    /// verify directly under the root.
    fn update_director_targets(&mut self, storage: &mut Storage, fetcher: &MetaFetcher) -> Result<(), Error> {
        let raw = fetcher.fetch_role(&RoleName::Targets, MAX_TARGETS_SIZE)?;
        let remote_version = untrusted_version(&raw)?;
        let local_version = match storage.load_non_root(self.repo_type, &RoleName::Targets)? {
            Some(stored) => untrusted_version(&stored).unwrap_or(0),
            None => 0
        };

        let data = self.verifier()?.verify_signed(&RoleName::Targets, &json::from_slice::<TufSigned>(&raw)?)?;
        if local_version > remote_version {
            return Err(Error::UptaneRollback(
                format!("director targets version {} older than stored {}", remote_version, local_version)));
        }
        storage.store_non_root(self.repo_type, &RoleName::Targets, &raw)?;
        if data.expired() {
            return Err(Error::UptaneExpired(RoleName::Targets));
        }
        self.targets = Some(data);
        Ok(())
    }

    fn update_timestamp(&mut self, storage: &mut Storage, fetcher: &MetaFetcher,
                        prev_sig: Option<String>) -> Result<(), Error> {
        let raw = fetcher.fetch_role(&RoleName::Timestamp, MAX_TIMESTAMP_SIZE)?;
        let remote_version = untrusted_version(&raw)?;

        let stored = storage.load_non_root(self.repo_type, &RoleName::Timestamp)?;
        let local_version = match stored {
            Some(ref stored) => untrusted_version(stored).unwrap_or(0),
            None => 0
        };
        let stored_sig = prev_sig.or_else(|| {
            stored.as_ref()
                .and_then(|raw| json::from_slice::<TufSigned>(raw).ok())
                .and_then(|signed| signed.signatures.get(0).map(|sig| sig.sig.clone()))
        });

        let signed = json::from_slice::<TufSigned>(&raw)?;
        let data = self.verifier()?.verify_signed(&RoleName::Timestamp, &signed)?;
        if local_version > remote_version {
            return Err(Error::UptaneRollback(
                format!("timestamp version {} older than stored {}", remote_version, local_version)));
        }

        // A same-version timestamp is re-persisted only when re-signed.
        let new_sig = signed.signatures.get(0).map(|sig| sig.sig.clone());
        if local_version < remote_version || stored_sig != new_sig {
            storage.store_non_root(self.repo_type, &RoleName::Timestamp, &raw)?;
        }

        if data.expired() {
            return Err(Error::UptaneExpired(RoleName::Timestamp));
        }
        self.timestamp_sig = new_sig;
        self.timestamp = Some(data);
        Ok(())
    }

    /// Returns true when a new snapshot was fetched from the server.
    fn update_snapshot(&mut self, storage: &mut Storage, fetcher: &MetaFetcher,
                       prev_timestamp: Option<&RoleData>) -> Result<bool, Error> {
        let mut local_version = 0;
        let mut need_fetch = true;

        if let Some(stored) = storage.load_non_root(self.repo_type, &RoleName::Snapshot)? {
            match self.verify_snapshot(&stored, true) {
                Ok(data) => {
                    debug!("skipping {} snapshot download; stored version is still current", self.repo_type);
                    local_version = data.version;
                    self.snapshot = Some(data);
                    need_fetch = false;
                }
                Err(err) => {
                    let expected = match prev_timestamp {
                        None => true,
                        Some(prev) => {
                            let old = prev.meta_info("snapshot.json").and_then(|info| info.hashes.clone());
                            let new = self.timestamp.as_ref()
                                .and_then(|ts| ts.meta_info("snapshot.json"))
                                .and_then(|info| info.hashes.clone());
                            old != new
                        }
                    };
                    if expected {
                        debug!("{} snapshot verification failed: {}", self.repo_type, err);
                    } else {
                        error!("{} snapshot verification failed: {}", self.repo_type, err);
                    }
                    local_version = untrusted_version(&stored).unwrap_or(0);
                }
            }
        }

        if need_fetch {
            let size = self.timestamp.as_ref()
                .and_then(|ts| ts.meta_info("snapshot.json"))
                .and_then(|info| info.length)
                .unwrap_or(MAX_SNAPSHOT_SIZE);
            let raw = fetcher.fetch_role(&RoleName::Snapshot, size)?;
            let remote_version = untrusted_version(&raw)?;
            let data = self.verify_snapshot(&raw, false)?;
            if local_version > remote_version {
                return Err(Error::UptaneRollback(
                    format!("snapshot version {} older than stored {}", remote_version, local_version)));
            }
            storage.store_non_root(self.repo_type, &RoleName::Snapshot, &raw)?;
            self.snapshot = Some(data);
        }

        if self.snapshot.as_ref().map_or(false, |data| data.expired()) {
            return Err(Error::UptaneExpired(RoleName::Snapshot));
        }
        Ok(need_fetch)
    }

    fn update_targets(&mut self, storage: &mut Storage, fetcher: &MetaFetcher,
                      snapshot_updated: bool) -> Result<(), Error> {
        let mut local_version = 0;
        let mut need_fetch = true;

        if let Some(stored) = storage.load_non_root(self.repo_type, &RoleName::Targets)? {
            match self.verify_targets(&stored, true) {
                Ok(data) => {
                    debug!("skipping {} targets download; stored version is still current", self.repo_type);
                    local_version = data.version;
                    self.targets = Some(data);
                    need_fetch = false;
                }
                Err(err) => {
                    if snapshot_updated {
                        debug!("{} targets verification failed: {}", self.repo_type, err);
                    } else {
                        error!("{} targets verification failed: {}", self.repo_type, err);
                    }
                    local_version = untrusted_version(&stored).unwrap_or(0);
                }
            }
        }

        if need_fetch {
            let size = self.snapshot.as_ref()
                .and_then(|snapshot| snapshot.meta_info("targets.json"))
                .and_then(|info| info.length)
                .unwrap_or(MAX_TARGETS_SIZE);
            let raw = fetcher.fetch_role(&RoleName::Targets, size)?;
            let remote_version = untrusted_version(&raw)?;
            let data = self.verify_targets(&raw, false)?;
            if local_version > remote_version {
                return Err(Error::UptaneRollback(
                    format!("targets version {} older than stored {}", remote_version, local_version)));
            }
            storage.store_non_root(self.repo_type, &RoleName::Targets, &raw)?;
            self.targets = Some(data);
        }

        if self.targets.as_ref().map_or(false, |data| data.expired()) {
            return Err(Error::UptaneExpired(RoleName::Targets));
        }
        Ok(())
    }

    /// Verify a snapshot against the current timestamp: every hash the
    /// timestamp declares must match (SHA-256 is mandatory), the signature
    /// threshold must hold and the version must agree.
    fn verify_snapshot(&self, raw: &[u8], prefetch: bool) -> Result<RoleData, Error> {
        let info = self.timestamp.as_ref()
            .and_then(|ts| ts.meta_info("snapshot.json"))
            .ok_or_else(|| Error::UptaneRole("timestamp has no snapshot.json entry".into()))?
            .clone();
        check_role_hashes(raw, &info, &RoleName::Snapshot, true, prefetch)?;

        let signed = json::from_slice::<TufSigned>(raw)?;
        let data = self.verifier()?.verify_signed(&RoleName::Snapshot, &signed)?;
        if data.version != info.version {
            return Err(Error::UptaneVersion(
                format!("snapshot version {} != timestamp's {}", data.version, info.version)));
        }
        Ok(data)
    }

    /// Verify targets against the current snapshot. Hashes are optional in
    /// snapshot metadata; when present they may as well be checked.
    fn verify_targets(&self, raw: &[u8], prefetch: bool) -> Result<RoleData, Error> {
        let info = self.snapshot.as_ref()
            .and_then(|snapshot| snapshot.meta_info("targets.json"))
            .ok_or_else(|| Error::UptaneRole("snapshot has no targets.json entry".into()))?
            .clone();
        check_role_hashes(raw, &info, &RoleName::Targets, false, prefetch)?;

        let signed = json::from_slice::<TufSigned>(raw)?;
        let data = self.verifier()?.verify_signed(&RoleName::Targets, &signed)?;
        if data.version != info.version {
            return Err(Error::UptaneVersion(
                format!("targets version {} != snapshot's {}", data.version, info.version)));
        }
        Ok(data)
    }
}

/// Compare the canonical digest of a role file against the hashes a
/// referencing role declares for it.
fn check_role_hashes(raw: &[u8], info: &MetaInfo, role: &RoleName,
                     required: bool, prefetch: bool) -> Result<(), Error> {
    let canonical = CanonicalJson::from_slice(raw)?;
    let mut found = false;

    if let Some(ref hashes) = info.hashes {
        for (alg, expected) in hashes {
            let actual = match alg.as_str() {
                "sha256" => sha256_hex(&canonical),
                "sha512" => sha512_hex(&canonical),
                _ => continue
            };
            if &actual != expected {
                if prefetch {
                    debug!("hash verification for stale {} metadata failed", role);
                } else {
                    error!("hash verification for {} metadata failed", role);
                }
                return Err(Error::UptaneBadHash(format!("{} {} digest", role, alg)));
            }
            found = true;
        }
    }

    if required && !found {
        return Err(Error::UptaneBadHash(format!("no supported hash declared for {}", role)));
    }
    Ok(())
}
