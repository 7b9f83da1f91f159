pub mod file;
pub mod ostree;
pub mod test;

use std::str::FromStr;

use datatype::{Error, InstallOutcome, Package, TufImage};


/// Optional credentials forwarded to a package backend that pulls
/// artifacts itself.
#[derive(Default, Clone)]
pub struct Credentials {
    pub ca_file:   Option<String>,
    pub cert_file: Option<String>,
    pub pkey_file: Option<String>,
}


/// The available package-install backends. Each one supports the same
/// capability set: target support, install, reboot finalization and the
/// currently installed image.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PacMan {
    File { images_dir: String },
    Ostree,
    Test { filename: String, succeeds: bool, completion: bool },
}

impl PacMan {
    /// Whether this backend can install the target, judged by the format
    /// recorded in its custom metadata.
    pub fn is_target_supported(&self, image: &TufImage) -> bool {
        let format = image.fileinfo.custom.as_ref()
            .and_then(|custom| custom.format.as_ref())
            .map(|format| format.as_str())
            .unwrap_or("binary");
        match *self {
            PacMan::File { .. } => format == "binary",
            PacMan::Ostree      => format == "ostree",
            PacMan::Test { .. } => true
        }
    }

    /// Install a downloaded target from its staging path.
    pub fn install(&self, image: &TufImage, staged: &str, creds: &Credentials) -> Result<InstallOutcome, Error> {
        match *self {
            PacMan::File { ref images_dir } => file::install(images_dir, image, staged),
            PacMan::Ostree => ostree::install(image, creds),
            PacMan::Test { ref filename, succeeds, completion } => {
                test::install(filename, image, succeeds, completion)
            }
        }
    }

    /// Complete an installation that was pending a reboot.
    pub fn finalize_install(&self, image: &TufImage) -> Result<InstallOutcome, Error> {
        match *self {
            PacMan::File { ref images_dir } => file::finalize(images_dir, image),
            PacMan::Ostree => ostree::finalize(image),
            PacMan::Test { ref filename, succeeds, .. } => test::finalize(filename, image, succeeds)
        }
    }

    /// The image this backend believes is currently installed.
    pub fn get_current(&self) -> Result<Option<TufImage>, Error> {
        match *self {
            PacMan::File { ref images_dir } => file::get_current(images_dir),
            PacMan::Ostree => ostree::get_current(),
            PacMan::Test { ref filename, .. } => test::get_current(filename)
        }
    }

    /// The package list reported with the device data.
    pub fn installed_packages(&self) -> Result<Vec<Package>, Error> {
        match *self {
            PacMan::File { ref images_dir } => file::installed_packages(images_dir),
            PacMan::Ostree => ostree::installed_packages(),
            PacMan::Test { ref filename, .. } => test::installed_packages(filename)
        }
    }
}

impl FromStr for PacMan {
    type Err = Error;

    fn from_str(s: &str) -> Result<PacMan, Error> {
        match s.to_lowercase().as_str() {
            "ostree" => Ok(PacMan::Ostree),

            file if file.len() > 5 && &file[..5] == "file:" => {
                Ok(PacMan::File { images_dir: file[5..].to_string() })
            }

            test if test.len() > 5 && &test[..5] == "test:" => {
                Ok(PacMan::Test { filename: test[5..].to_string(), succeeds: true, completion: false })
            }

            _ => Err(Error::Parse(format!("unknown package manager: {}", s)))
        }
    }
}
