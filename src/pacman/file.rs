use serde_json as json;
use std::fs;
use std::path::Path;

use datatype::{Error, InstallCode, InstallOutcome, Package, TufImage, Util};


/// Filesystem installer: a successful install copies the staged artifact
/// into the images directory and records it as current.
pub fn install(images_dir: &str, image: &TufImage, staged: &str) -> Result<InstallOutcome, Error> {
    if get_current(images_dir)?.map_or(false, |current| current == *image) {
        return Ok(InstallOutcome::new(InstallCode::ALREADY_PROCESSED, "".into()));
    }

    let dest = format!("{}/{}", images_dir, image.filepath);
    if let Some(dir) = Path::new(&dest).parent() {
        fs::create_dir_all(dir)?;
    }
    fs::copy(staged, &dest)?;
    set_current(images_dir, image)?;
    Ok(InstallOutcome::ok())
}

pub fn finalize(images_dir: &str, image: &TufImage) -> Result<InstallOutcome, Error> {
    if get_current(images_dir)?.map_or(false, |current| current == *image) {
        Ok(InstallOutcome::ok())
    } else {
        Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "image not installed".into()))
    }
}

pub fn get_current(images_dir: &str) -> Result<Option<TufImage>, Error> {
    let marker = format!("{}/.current", images_dir);
    if !Path::new(&marker).exists() {
        return Ok(None);
    }
    Ok(Some(json::from_slice(&Util::read_file(&marker)?)?))
}

fn set_current(images_dir: &str, image: &TufImage) -> Result<(), Error> {
    Util::atomic_write(&format!("{}/.current", images_dir), &json::to_vec(image)?)
}

pub fn installed_packages(images_dir: &str) -> Result<Vec<Package>, Error> {
    match get_current(images_dir)? {
        Some(image) => {
            let version = image.fileinfo.hashes.get("sha256").cloned().unwrap_or_default();
            Ok(vec![Package { name: image.filepath, version: version }])
        }
        None => Ok(Vec::new())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use datatype::TufMeta;


    fn image(name: &str, sha: &str) -> TufImage {
        let mut hashes = HashMap::new();
        hashes.insert("sha256".to_string(), sha.to_string());
        TufImage {
            filepath: name.into(),
            fileinfo: TufMeta { length: 4, hashes: hashes, custom: None },
        }
    }

    #[test]
    fn install_copies_and_tracks_current() {
        let dir = "/tmp/ota-pacman-file-test";
        let _ = fs::remove_dir_all(dir);
        fs::create_dir_all(dir).expect("create dir");
        let staged = format!("{}/staged", dir);
        Util::write_file(&staged, b"data").expect("staged");

        let target = image("fw.img", "abc");
        let outcome = install(dir, &target, &staged).expect("install");
        assert_eq!(outcome.code, InstallCode::OK);
        assert!(Path::new(&format!("{}/fw.img", dir)).exists());
        assert_eq!(get_current(dir).unwrap().unwrap(), target);

        // repeating the same install is a non-error no-op
        let outcome = install(dir, &target, &staged).expect("reinstall");
        assert_eq!(outcome.code, InstallCode::ALREADY_PROCESSED);

        let packages = installed_packages(dir).expect("packages");
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "fw.img");
        fs::remove_dir_all(dir).expect("cleanup");
    }
}
