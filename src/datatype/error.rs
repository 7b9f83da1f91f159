use base64::Base64Error;
use bincode::Error as BincodeError;
use chrono::ParseError as ChronoParseError;
use hex::FromHexError;
use hyper::error::Error as HyperError;
use openssl::error::ErrorStack as OpensslErrors;
use pem::Error as PemError;
use ring::error::Unspecified as RingUnspecified;
use serde_json::Error as SerdeJsonError;
use std::convert::From;
use std::fmt::{self, Display, Formatter};
use std::io::Error as IoError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::sync::PoisonError;
use toml::de::Error as TomlError;
use url::ParseError as UrlParseError;

use datatype::RoleName;
use http::ResponseData;


/// System-wide errors that are returned from `Result` type failures.
#[derive(Debug)]
pub enum Error {
    Aborted,
    Base64(Base64Error),
    Bincode(BincodeError),
    Canonical(String),
    Client(String),
    Config(String),
    DateTime(ChronoParseError),
    Download(String),
    FromUtf8(FromUtf8Error),
    Hex(FromHexError),
    Http(ResponseData),
    HttpAuth(ResponseData),
    Hyper(HyperError),
    Install(String),
    Io(IoError),
    Json(SerdeJsonError),
    KeyNotFound(String),
    KeySign(String),
    Openssl(OpensslErrors),
    OSTree(String),
    PacMan(String),
    Parse(String),
    Pem(PemError),
    Poison(String),
    Provision(String),
    Ring(RingUnspecified),
    Secondary(String),
    SecondaryUnreachable(String),
    SizeLimit(u64),
    Storage(String),
    Toml(TomlError),
    TufKeyId(String),
    TufKeyType(String),
    TufRole(String),
    TufSigType(String),
    UptaneBadHash(String),
    UptaneExpired(RoleName),
    UptaneMissingKeys,
    UptaneMissingRoles,
    UptaneRole(String),
    UptaneRollback(String),
    UptaneRootRotation(String),
    UptaneTargetMismatch(String),
    UptaneTargets(String),
    UptaneThreshold(String),
    UptaneVersion(String),
    UrlParse(UrlParseError),
    Utf8(Utf8Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let inner: String = match *self {
            Error::Aborted                   => "Download aborted".into(),
            Error::Base64(ref err)           => format!("Base64 parse error: {}", err),
            Error::Bincode(ref err)          => format!("Bincode error: {}", err),
            Error::Canonical(ref err)        => format!("Canonical JSON error: {}", err),
            Error::Client(ref err)           => format!("HTTP client error: {}", err),
            Error::Config(ref err)           => format!("Bad config: {}", err),
            Error::DateTime(ref err)         => format!("DateTime parse error: {}", err),
            Error::Download(ref err)         => format!("Download error: {}", err),
            Error::FromUtf8(ref err)         => format!("From utf8 error: {}", err),
            Error::Hex(ref err)              => format!("Not valid hex data: {}", err),
            Error::Http(ref err)             => format!("HTTP error: {}", err),
            Error::HttpAuth(ref err)         => format!("HTTP authorization error: {}", err),
            Error::Hyper(ref err)            => format!("Hyper error: {}", err),
            Error::Install(ref err)          => format!("Install error: {}", err),
            Error::Io(ref err)               => format!("IO error: {}", err),
            Error::Json(ref err)             => format!("JSON parse error: {}", err),
            Error::KeyNotFound(ref err)      => format!("Key not found: {}", err),
            Error::KeySign(ref err)          => format!("Key signing error: {}", err),
            Error::Openssl(ref err)          => format!("OpenSSL errors: {}", err),
            Error::OSTree(ref err)           => format!("OSTree error: {}", err),
            Error::PacMan(ref err)           => format!("Package manager error: {}", err),
            Error::Parse(ref err)            => format!("Parse error: {}", err),
            Error::Pem(ref err)              => format!("PEM parse error: {}", err),
            Error::Poison(ref err)           => format!("Poison error: {}", err),
            Error::Provision(ref err)        => format!("Provisioning error: {}", err),
            Error::Ring(ref err)             => format!("Ring error: {:?}", err),
            Error::Secondary(ref err)        => format!("Secondary error: {}", err),
            Error::SecondaryUnreachable(ref err) => format!("Secondary unreachable: {}", err),
            Error::SizeLimit(limit)          => format!("Response exceeded limit of {} bytes", limit),
            Error::Storage(ref err)          => format!("Storage error: {}", err),
            Error::Toml(ref err)             => format!("TOML error: {:?}", err),
            Error::TufKeyId(ref err)         => format!("Invalid TUF key id: {}", err),
            Error::TufKeyType(ref err)       => format!("Invalid TUF key type: {}", err),
            Error::TufRole(ref err)          => format!("Invalid TUF role: {}", err),
            Error::TufSigType(ref err)       => format!("Invalid TUF signature type: {}", err),
            Error::UptaneBadHash(ref err)    => format!("Uptane: metadata hash mismatch: {}", err),
            Error::UptaneExpired(ref role)   => format!("Uptane: {} metadata has expired", role),
            Error::UptaneMissingKeys         => "Uptane: missing `keys` field".into(),
            Error::UptaneMissingRoles        => "Uptane: missing `roles` field".into(),
            Error::UptaneRole(ref err)       => format!("Uptane role: {}", err),
            Error::UptaneRollback(ref err)   => format!("Uptane: rollback attempt: {}", err),
            Error::UptaneRootRotation(ref err)   => format!("Uptane: root rotation: {}", err),
            Error::UptaneTargetMismatch(ref err) => format!("Uptane: target mismatch: {}", err),
            Error::UptaneTargets(ref err)    => format!("Uptane targets: {}", err),
            Error::UptaneThreshold(ref err)  => format!("Uptane: signature threshold: {}", err),
            Error::UptaneVersion(ref err)    => format!("Uptane: version mismatch: {}", err),
            Error::UrlParse(ref err)         => format!("Url parse error: {}", err),
            Error::Utf8(ref err)             => format!("Utf8 error: {}", err),
        };
        write!(f, "{}", inner)
    }
}

impl<E> From<PoisonError<E>> for Error {
    fn from(err: PoisonError<E>) -> Error {
        Error::Poison(err.to_string())
    }
}


macro_rules! derive_from {
    ([ $( $from: ident => $to: ident ),* ]) => {
        $(impl From<$from> for Error {
            fn from(err: $from) -> Error {
                Error::$to(err)
            }
        })*
    };
}

derive_from!([
    Base64Error      => Base64,
    BincodeError     => Bincode,
    ChronoParseError => DateTime,
    FromHexError     => Hex,
    FromUtf8Error    => FromUtf8,
    HyperError       => Hyper,
    IoError          => Io,
    OpensslErrors    => Openssl,
    PemError         => Pem,
    ResponseData     => Http,
    RingUnspecified  => Ring,
    SerdeJsonError   => Json,
    TomlError        => Toml,
    UrlParseError    => UrlParse,
    Utf8Error        => Utf8
]);
