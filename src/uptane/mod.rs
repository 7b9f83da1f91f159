pub mod repo;
pub mod verify;

pub use self::repo::{MetaFetcher, Repo, verify_root_transition,
                     MAX_ROOT_ROTATIONS, MAX_ROOT_SIZE, MAX_TIMESTAMP_SIZE,
                     MAX_SNAPSHOT_SIZE, MAX_TARGETS_SIZE};
pub use self::verify::Verifier;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use datatype::Error;


/// The two independent trust chains every device talks to: the Director
/// assigns updates to specific ECUs while the Image repository describes
/// all shippable artifacts.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RepoType {
    Director,
    Image,
}

impl Display for RepoType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RepoType::Director => write!(f, "director"),
            RepoType::Image    => write!(f, "image"),
        }
    }
}

impl FromStr for RepoType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "director" => Ok(RepoType::Director),
            "image"    => Ok(RepoType::Image),
            _ => Err(Error::Parse(format!("unknown repository type: {}", s)))
        }
    }
}
