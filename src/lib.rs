extern crate base64;
extern crate bincode;
extern crate byteorder;
extern crate chan;
extern crate chrono;
extern crate crossbeam;
extern crate crypto;
extern crate hex;
extern crate hyper;
extern crate itoa;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate maplit;
extern crate openssl;
extern crate pem;
extern crate ring;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate tar;
extern crate toml;
extern crate untrusted;
extern crate url;
extern crate uuid;

pub mod client;
pub mod datatype;
pub mod download;
pub mod http;
pub mod keys;
pub mod pacman;
pub mod provision;
pub mod queue;
pub mod secondary;
pub mod storage;
pub mod uptane;
