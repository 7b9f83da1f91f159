use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::process::{Command, Output};
use std::str;

use datatype::{Error, InstallCode, InstallOutcome, Package, TufImage, TufMeta};
use pacman::Credentials;


fn run<S: AsRef<OsStr> + Debug>(args: &[S]) -> Result<Output, Error> {
    debug!("running `ostree` command with args: {:?}", args);
    Command::new("ostree")
        .args(args)
        .env("OSTREE_REPO", "/sysroot/ostree/repo")
        .env("OSTREE_BOOT_PARTITION", "/boot")
        .output()
        .map_err(|err| Error::OSTree(err.to_string()))
        .and_then(|output| {
            if output.status.success() {
                Ok(output)
            } else {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                Err(Error::OSTree(format!("stdout: {}\nstderr: {}", stdout, stderr)))
            }
        })
}

/// Deploy the commit named by the target's sha256. The deployment only
/// becomes active after a reboot, so a successful deploy is pending
/// completion.
pub fn install(image: &TufImage, creds: &Credentials) -> Result<InstallOutcome, Error> {
    let commit = image.fileinfo.hashes.get("sha256")
        .ok_or_else(|| Error::OSTree("target has no sha256 commit".into()))?;

    if let Some(current) = get_current()? {
        if current.fileinfo.hashes.get("sha256") == Some(commit) {
            return Ok(InstallOutcome::new(InstallCode::ALREADY_PROCESSED, "".into()));
        }
    }

    if let Some(ref uri) = image.fileinfo.custom.as_ref().and_then(|custom| custom.uri.clone()) {
        let mut args = vec!["remote".to_string(), "add".to_string(), "--no-gpg-verify".to_string()];
        if let Some(ref ca) = creds.ca_file {
            args.push(format!("--set=tls-ca-path={}", ca));
        }
        if let (&Some(ref cert), &Some(ref pkey)) = (&creds.cert_file, &creds.pkey_file) {
            args.push(format!("--set=tls-client-cert-path={}", cert));
            args.push(format!("--set=tls-client-key-path={}", pkey));
        }
        args.push("sota-remote".into());
        args.push(uri.clone());
        let _ = run(&args); // the remote may already exist
        run(&["pull".to_string(), "sota-remote".into(), commit.clone()])?;
    }

    match run(&["admin", "deploy", "--karg-proc-cmdline", commit.as_str()]) {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            Ok(InstallOutcome::new(InstallCode::NEED_COMPLETION, stdout))
        }
        Err(Error::OSTree(detail)) => Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, detail)),
        Err(err) => Err(err)
    }
}

/// After the reboot the deployed commit must be the booted one.
pub fn finalize(image: &TufImage) -> Result<InstallOutcome, Error> {
    let commit = image.fileinfo.hashes.get("sha256")
        .ok_or_else(|| Error::OSTree("target has no sha256 commit".into()))?;
    match get_current()? {
        Some(ref current) if current.fileinfo.hashes.get("sha256") == Some(commit) => {
            Ok(InstallOutcome::ok())
        }
        _ => Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "deployed commit not booted".into()))
    }
}

/// Parse the booted deployment out of `ostree admin status`.
pub fn get_current() -> Result<Option<TufImage>, Error> {
    let output = run(&["admin", "status"])?;
    let stdout = str::from_utf8(&output.stdout)?;
    for line in stdout.lines().map(str::trim) {
        if line.starts_with('*') {
            let mut parts = line.split(' ').skip(1);
            let (os_name, commit_name) = match (parts.next(), parts.next()) {
                (Some(os_name), Some(commit)) => (os_name, commit),
                _ => return Err(Error::Parse(format!("couldn't parse deployment: {}", line)))
            };
            let commit = commit_name.split('.').nth(0).unwrap_or(commit_name);
            let mut hashes = HashMap::new();
            hashes.insert("sha256".to_string(), commit.to_string());
            return Ok(Some(TufImage {
                filepath: format!("{}-{}", os_name, commit),
                fileinfo: TufMeta { length: 0, hashes: hashes, custom: None },
            }));
        }
    }
    Ok(None)
}

pub fn installed_packages() -> Result<Vec<Package>, Error> {
    match get_current()? {
        Some(image) => {
            let commit = image.fileinfo.hashes.get("sha256").cloned().unwrap_or_default();
            Ok(vec![Package { name: image.filepath, version: commit }])
        }
        None => Ok(Vec::new())
    }
}
