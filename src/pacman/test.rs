use serde_json as json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use datatype::{Error, InstallCode, InstallOutcome, Package, TufImage, Util};


/// Test installer: appends installed target names to a file and succeeds
/// or fails as configured. With `completion` set, installs stay pending
/// until `finalize` runs.
pub fn install(filename: &str, image: &TufImage, succeeds: bool, completion: bool) -> Result<InstallOutcome, Error> {
    if !succeeds {
        return Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "test backend failure".into()));
    }
    if completion {
        return Ok(InstallOutcome::new(InstallCode::NEED_COMPLETION, "".into()));
    }
    let mut file = OpenOptions::new().create(true).write(true).append(true).open(filename)?;
    file.write_all(format!("{}\n", image.filepath).as_bytes())?;
    set_current(filename, image)?;
    Ok(InstallOutcome::ok())
}

pub fn finalize(filename: &str, image: &TufImage, succeeds: bool) -> Result<InstallOutcome, Error> {
    if !succeeds {
        return Ok(InstallOutcome::new(InstallCode::INSTALL_FAILED, "test backend failure".into()));
    }
    let mut file = OpenOptions::new().create(true).write(true).append(true).open(filename)?;
    file.write_all(format!("{}\n", image.filepath).as_bytes())?;
    set_current(filename, image)?;
    Ok(InstallOutcome::ok())
}

pub fn get_current(filename: &str) -> Result<Option<TufImage>, Error> {
    let marker = format!("{}.current", filename);
    if !Path::new(&marker).exists() {
        return Ok(None);
    }
    Ok(Some(json::from_slice(&Util::read_file(&marker)?)?))
}

fn set_current(filename: &str, image: &TufImage) -> Result<(), Error> {
    Util::atomic_write(&format!("{}.current", filename), &json::to_vec(image)?)
}

pub fn installed_packages(filename: &str) -> Result<Vec<Package>, Error> {
    if !Path::new(filename).exists() {
        return Ok(Vec::new());
    }
    Ok(Util::read_text(filename)?
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| Package { name: line.to_string(), version: "".to_string() })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use datatype::TufMeta;


    fn image(name: &str) -> TufImage {
        TufImage {
            filepath: name.into(),
            fileinfo: TufMeta { length: 0, hashes: HashMap::new(), custom: None },
        }
    }

    #[test]
    fn install_records_target() {
        let filename = "/tmp/ota-pacman-test-install";
        let _ = fs::remove_file(filename);
        let _ = fs::remove_file(format!("{}.current", filename));

        let outcome = install(filename, &image("a.img"), true, false).expect("install");
        assert_eq!(outcome.code, InstallCode::OK);
        assert_eq!(installed_packages(filename).unwrap().len(), 1);
        assert_eq!(get_current(filename).unwrap().unwrap().filepath, "a.img");

        let _ = fs::remove_file(filename);
        let _ = fs::remove_file(format!("{}.current", filename));
    }

    #[test]
    fn pending_install_completes_on_finalize() {
        let filename = "/tmp/ota-pacman-test-pending";
        let _ = fs::remove_file(filename);
        let _ = fs::remove_file(format!("{}.current", filename));

        let outcome = install(filename, &image("b.img"), true, true).expect("install");
        assert_eq!(outcome.code, InstallCode::NEED_COMPLETION);
        assert!(get_current(filename).unwrap().is_none());

        let outcome = finalize(filename, &image("b.img"), true).expect("finalize");
        assert_eq!(outcome.code, InstallCode::OK);
        assert_eq!(get_current(filename).unwrap().unwrap().filepath, "b.img");

        let _ = fs::remove_file(filename);
        let _ = fs::remove_file(format!("{}.current", filename));
    }

    #[test]
    fn failing_backend_reports_failure() {
        let outcome = install("/tmp/ota-pacman-test-fail", &image("c.img"), false, false).expect("install");
        assert_eq!(outcome.code, InstallCode::INSTALL_FAILED);
    }
}
