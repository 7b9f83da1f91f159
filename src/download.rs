use crypto::digest::Digest;
use crypto::sha2::{Sha256, Sha512};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex};

use datatype::{Error, TufMeta, Url};
use http::Client;


const CHUNK_SIZE: usize = 64 * 1024;


#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FlowState {
    Running,
    Paused,
    Aborted,
}

/// Shared pause/abort switch observed by in-flight transfers. Pausing
/// blocks the transfer on a condition variable until resumed; aborting
/// is sticky and makes the current operation return promptly.
pub struct FlowControlToken {
    state: Mutex<FlowState>,
    cv:    Condvar,
}

impl Default for FlowControlToken {
    fn default() -> Self {
        FlowControlToken { state: Mutex::new(FlowState::Running), cv: Condvar::new() }
    }
}

impl FlowControlToken {
    /// Returns false when the call had no effect.
    pub fn set_pause(&self, pause: bool) -> bool {
        {
            let mut state = self.state.lock().expect("token lock");
            match (*state, pause) {
                (FlowState::Running, true)  => *state = FlowState::Paused,
                (FlowState::Paused,  false) => *state = FlowState::Running,
                _ => return false
            }
        }
        self.cv.notify_all();
        true
    }

    /// Returns false when already aborted.
    pub fn set_abort(&self) -> bool {
        {
            let mut state = self.state.lock().expect("token lock");
            if *state == FlowState::Aborted {
                return false;
            }
            *state = FlowState::Aborted;
        }
        self.cv.notify_all();
        true
    }

    /// When blocking, waits out any pause before answering.
    pub fn can_continue(&self, blocking: bool) -> bool {
        let mut state = self.state.lock().expect("token lock");
        if blocking {
            while *state == FlowState::Paused {
                state = self.cv.wait(state).expect("token wait");
            }
        }
        *state == FlowState::Running
    }

    pub fn reset(&self) {
        *self.state.lock().expect("token lock") = FlowState::Running;
    }
}


/// Downloads target artifacts to a content-addressed staging directory,
/// resuming any partial file left by an earlier attempt.
pub struct Downloader<'c> {
    pub client:      &'c Client,
    pub staging_dir: String,
}

impl<'c> Downloader<'c> {
    pub fn new(client: &'c Client, staging_dir: String) -> Self {
        Downloader { client: client, staging_dir: staging_dir }
    }

    /// The staging path for a target is its declared SHA-256 digest.
    pub fn staging_path(&self, meta: &TufMeta) -> Result<String, Error> {
        let sha256 = meta.hashes.get("sha256")
            .ok_or_else(|| Error::Download("no sha256 hash declared for target".into()))?;
        Ok(format!("{}/{}", self.staging_dir, sha256))
    }

    /// Fetch the artifact at `url` into the staging area, returning the
    /// staging path once the full contents match the declared hashes and
    /// length. An aborted transfer keeps the partial file for a later
    /// resume; a hash or length mismatch discards it.
    pub fn download(&self, url: Url, meta: &TufMeta, token: &FlowControlToken,
                    progress: &mut FnMut(u64, u64)) -> Result<String, Error> {
        let path = self.staging_path(meta)?;
        fs::create_dir_all(&self.staging_dir)?;

        let mut offset = match fs::metadata(&path) {
            Ok(stat) => stat.len(),
            Err(_)   => 0
        };
        if offset > meta.length {
            debug!("partial file at {} larger than target, discarding", path);
            fs::remove_file(&path)?;
            offset = 0;
        } else if offset == meta.length {
            match self.verify(&path, meta) {
                Ok(())   => return Ok(path),
                Err(err) => {
                    debug!("stale staging file at {}: {}", path, err);
                    fs::remove_file(&path)?;
                    offset = 0;
                }
            }
        }

        if !token.can_continue(true) {
            return Err(Error::Aborted);
        }

        let remaining = meta.length - offset;
        if offset > 0 {
            info!("resuming download of {} at byte {}", url, offset);
        }
        let rx = match offset {
            0 => self.client.get(url, Some(remaining)),
            n => self.client.get_range(url, n, Some(remaining))
        };
        let body = rx.recv().ok_or_else(|| Error::Client("no download response".into()))?.into_result()?;
        if body.len() as u64 != remaining {
            return Err(Error::Download(format!("expected {} bytes, server sent {}", remaining, body.len())));
        }

        let mut file = OpenOptions::new().create(true).write(true).append(true).open(&path)?;
        let mut written = offset;
        for chunk in body.chunks(CHUNK_SIZE) {
            if !token.can_continue(true) {
                return Err(Error::Aborted);
            }
            file.write_all(chunk)?;
            written += chunk.len() as u64;
            progress(written, meta.length);
        }
        file.flush()?;
        drop(file);

        match self.verify(&path, meta) {
            Ok(()) => Ok(path),
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(err)
            }
        }
    }

    /// Re-hash the completed file against every declared digest.
    fn verify(&self, path: &str, meta: &TufMeta) -> Result<(), Error> {
        let stat = fs::metadata(path)?;
        if stat.len() != meta.length {
            return Err(Error::Download(format!("length mismatch: expected {}, got {}", meta.length, stat.len())));
        }

        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        let mut file = File::open(path)?;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf)?;
            if read == 0 {
                break;
            }
            sha256.input(&buf[..read]);
            sha512.input(&buf[..read]);
        }

        if let Some(expected) = meta.hashes.get("sha256") {
            if &sha256.result_str() != expected {
                return Err(Error::Download(format!("sha256 mismatch for {}", path)));
            }
        }
        if let Some(expected) = meta.hashes.get("sha512") {
            if &sha512.result_str() != expected {
                return Err(Error::Download(format!("sha512 mismatch for {}", path)));
            }
        }
        Ok(())
    }
}
