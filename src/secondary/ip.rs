use bincode::{self, Infinite};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json as json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tar;

use datatype::{Error, InstallOutcome, Key, KeyValue, TufImage, TufSigned, Util};
use secondary::{MetaBundle, Secondary};
use uptane::RepoType;


// One-byte message tags of the primary/secondary wire protocol. A
// response reuses the request tag; MSG_ERROR carries a WireAck.
const MSG_GET_INFO:         u8 = 0x01;
const MSG_GET_VERSION:      u8 = 0x02;
const MSG_GET_MANIFEST:     u8 = 0x03;
const MSG_GET_ROOT_VERSION: u8 = 0x04;
const MSG_PUT_ROOT:         u8 = 0x05;
const MSG_PUT_META:         u8 = 0x06;
const MSG_SEND_FIRMWARE:    u8 = 0x07;
const MSG_INSTALL:          u8 = 0x08;
const MSG_ERROR:            u8 = 0x7f;

/// An incoming frame may not exceed this size.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

pub const PROTOCOL_VERSION: u32 = 2;


#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireInfo {
    pub ecu_serial:  String,
    pub hardware_id: String,
    pub key_type:    String,
    pub public_key:  String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireAck {
    pub ok:      bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireVersion {
    pub version: u32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireRootVersionReq {
    pub repo: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireRootVersion {
    pub version: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WirePutRoot {
    pub repo:     String,
    pub metadata: Vec<u8>,
}

/// Bundle entries as (repo, role, raw metadata), order preserved.
#[derive(Serialize, Deserialize, Debug)]
pub struct WireMetaBundle {
    pub items: Vec<(String, String, Vec<u8>)>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireFirmware {
    pub filepath: String,
    pub payload:  Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WireInstallReq {
    pub filepath: String,
}

/// Raw JSON bytes of the secondary's signed manifest.
#[derive(Serialize, Deserialize, Debug)]
pub struct WireManifest {
    pub manifest: Vec<u8>,
}


/// A remote secondary reached over TCP with length-prefixed frames: one
/// type byte, a u32 big-endian payload length, then the payload.
pub struct IpSecondary {
    pub addr:    SocketAddr,
    pub timeout: Duration,
    info:        WireInfo,
}

impl IpSecondary {
    /// Handshake with the remote ECU to learn its identity.
    pub fn discover(addr: SocketAddr, timeout: Duration) -> Result<Self, Error> {
        let info: WireInfo = request(&addr, timeout, MSG_GET_INFO, &())?;
        debug!("discovered secondary {} at {}", info.ecu_serial, addr);
        Ok(IpSecondary { addr: addr, timeout: timeout, info: info })
    }

    /// Reconstruct a known secondary without a handshake, so an offline
    /// ECU can still be tracked and reported.
    pub fn from_parts(addr: SocketAddr, timeout: Duration, serial: String, hardware_id: String) -> Self {
        IpSecondary {
            addr:    addr,
            timeout: timeout,
            info:    WireInfo {
                ecu_serial:  serial,
                hardware_id: hardware_id,
                key_type:    "ED25519".into(),
                public_key:  String::new(),
            },
        }
    }

    fn call<T: Serialize, R: DeserializeOwned>(&self, tag: u8, payload: &T) -> Result<R, Error> {
        request(&self.addr, self.timeout, tag, payload)
    }
}

fn request<T: Serialize, R: DeserializeOwned>(addr: &SocketAddr, timeout: Duration,
                                              tag: u8, payload: &T) -> Result<R, Error> {
    let mut stream = TcpStream::connect_timeout(addr, timeout)
        .map_err(|err| Error::SecondaryUnreachable(format!("{}: {}", addr, err)))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let encoded = bincode::serialize(payload, Infinite)?;
    write_frame(&mut stream, tag, &encoded)?;

    let (resp_tag, body) = read_frame(&mut stream)?;
    match resp_tag {
        t if t == tag => Ok(bincode::deserialize(&body)?),
        MSG_ERROR => {
            let ack: WireAck = bincode::deserialize(&body)?;
            Err(Error::Secondary(ack.message))
        }
        other => Err(Error::Secondary(format!("unexpected response tag: {:#x}", other)))
    }
}

pub fn write_frame<W: Write>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<(), Error> {
    writer.write_u8(tag)?;
    writer.write_u32::<BigEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<(u8, Vec<u8>), Error> {
    let tag = reader.read_u8()?;
    let length = reader.read_u32::<BigEndian>()?;
    if length > MAX_FRAME_SIZE {
        return Err(Error::Secondary(format!("frame of {} bytes exceeds limit", length)));
    }
    let mut body = vec![0u8; length as usize];
    reader.read_exact(&mut body)?;
    Ok((tag, body))
}

fn ack_or_err(ack: WireAck) -> Result<(), Error> {
    if ack.ok {
        Ok(())
    } else {
        Err(Error::Secondary(ack.message))
    }
}

impl Secondary for IpSecondary {
    fn serial(&self) -> String {
        self.info.ecu_serial.clone()
    }

    fn hardware_id(&self) -> String {
        self.info.hardware_id.clone()
    }

    fn public_key(&self) -> Result<Key, Error> {
        Ok(Key {
            keytype: self.info.key_type.parse()?,
            keyval:  KeyValue { public: self.info.public_key.clone() },
        })
    }

    fn protocol_version(&self) -> Result<u32, Error> {
        let version: WireVersion = self.call(MSG_GET_VERSION, &())?;
        Ok(version.version)
    }

    fn get_manifest(&self) -> Result<TufSigned, Error> {
        let resp: WireManifest = self.call(MSG_GET_MANIFEST, &())?;
        Ok(json::from_slice(&resp.manifest)?)
    }

    fn get_root_version(&self, repo: RepoType) -> Result<u64, Error> {
        let req = WireRootVersionReq { repo: format!("{}", repo) };
        let resp: WireRootVersion = self.call(MSG_GET_ROOT_VERSION, &req)?;
        Ok(resp.version)
    }

    fn put_root(&mut self, repo: RepoType, raw: &[u8]) -> Result<(), Error> {
        let req = WirePutRoot { repo: format!("{}", repo), metadata: raw.to_vec() };
        ack_or_err(self.call(MSG_PUT_ROOT, &req)?)
    }

    fn put_meta(&mut self, bundle: &MetaBundle) -> Result<(), Error> {
        let items = bundle.iter()
            .map(|&((repo, ref role), ref raw)| (format!("{}", repo), format!("{}", role), raw.clone()))
            .collect::<Vec<_>>();
        ack_or_err(self.call(MSG_PUT_META, &WireMetaBundle { items: items })?)
    }

    fn send_firmware(&mut self, image: &TufImage, payload: &[u8]) -> Result<(), Error> {
        let req = WireFirmware { filepath: image.filepath.clone(), payload: payload.to_vec() };
        ack_or_err(self.call(MSG_SEND_FIRMWARE, &req)?)
    }

    fn install(&mut self, image: &TufImage) -> Result<InstallOutcome, Error> {
        let req = WireInstallReq { filepath: image.filepath.clone() };
        self.call(MSG_INSTALL, &req)
    }

    fn kind(&self) -> &'static str {
        "IP"
    }

    fn extra(&self) -> json::Value {
        json!({
            "ip": format!("{}", self.addr.ip()),
            "port": self.addr.port(),
            "verification_type": "Full"
        })
    }
}


/// An IP secondary that pulls its image from an artifact server itself:
/// instead of firmware it receives an archive of the device credentials.
pub struct OstreeProxySecondary {
    inner:     IpSecondary,
    ca_path:   Option<String>,
    cert_path: Option<String>,
    pkey_path: Option<String>,
}

impl OstreeProxySecondary {
    pub fn new(inner: IpSecondary, ca: Option<String>, cert: Option<String>, pkey: Option<String>) -> Self {
        OstreeProxySecondary { inner: inner, ca_path: ca, cert_path: cert, pkey_path: pkey }
    }

    /// Pack the device credentials into a tar archive for shipping.
    fn credentials_archive(&self) -> Result<Vec<u8>, Error> {
        let mut builder = tar::Builder::new(Vec::new());
        let entries = [
            ("ca.pem", &self.ca_path),
            ("client.pem", &self.cert_path),
            ("pkey.pem", &self.pkey_path),
        ];
        for &(name, path) in &entries {
            if let Some(ref path) = *path {
                let data = Util::read_file(path)?;
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o600);
                header.set_cksum();
                builder.append_data(&mut header, name, &data[..])?;
            }
        }
        Ok(builder.into_inner()?)
    }
}

impl Secondary for OstreeProxySecondary {
    fn serial(&self) -> String {
        self.inner.serial()
    }

    fn hardware_id(&self) -> String {
        self.inner.hardware_id()
    }

    fn public_key(&self) -> Result<Key, Error> {
        self.inner.public_key()
    }

    fn protocol_version(&self) -> Result<u32, Error> {
        self.inner.protocol_version()
    }

    fn get_manifest(&self) -> Result<TufSigned, Error> {
        self.inner.get_manifest()
    }

    fn get_root_version(&self, repo: RepoType) -> Result<u64, Error> {
        self.inner.get_root_version(repo)
    }

    fn put_root(&mut self, repo: RepoType, raw: &[u8]) -> Result<(), Error> {
        self.inner.put_root(repo, raw)
    }

    fn put_meta(&mut self, bundle: &MetaBundle) -> Result<(), Error> {
        self.inner.put_meta(bundle)
    }

    fn send_firmware(&mut self, image: &TufImage, _: &[u8]) -> Result<(), Error> {
        let archive = self.credentials_archive()?;
        self.inner.send_firmware(image, &archive)
    }

    fn install(&mut self, image: &TufImage) -> Result<InstallOutcome, Error> {
        self.inner.install(image)
    }

    fn kind(&self) -> &'static str {
        "OstreeProxy"
    }

    fn extra(&self) -> json::Value {
        let mut extra = self.inner.extra();
        extra["type_detail"] = json!("ostree_proxy");
        extra
    }
}
