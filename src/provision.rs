use openssl::pkcs12::Pkcs12;
use serde_json as json;
use uuid::Uuid;

use datatype::{Config, Error, Key, Url, Util};
use http::{Client, Response};
use keys::KeyManager;
use storage::{Storage, TlsCreds};


/// A secondary ECU to be included in the device registration.
#[derive(Clone, Debug)]
pub struct EcuEntry {
    pub serial:      String,
    pub hardware_id: String,
    pub client_key:  Option<Key>,
}


/// Idempotent device enrollment. Every step persists its result before
/// the next one runs, so a failed attempt resumes where it stopped and
/// identifiers generated offline stay stable across retries.
pub struct Provisioner {
    device_id_cfg:      Option<String>,
    hardware_id_cfg:    Option<String>,
    primary_serial_cfg: Option<String>,
    secondaries:        Vec<EcuEntry>,
    provision_server:   Option<Url>,
    ecu_server:         Option<Url>,
    ttl:                u32,
}

impl Provisioner {
    pub fn from_config(config: &Config) -> Self {
        Provisioner {
            device_id_cfg:      config.device.device_id.clone(),
            hardware_id_cfg:    config.device.hardware_id.clone(),
            primary_serial_cfg: config.uptane.primary_ecu_serial.clone(),
            secondaries:        Vec::new(),
            provision_server:   config.provision.as_ref().map(|provision| provision.server.clone()),
            ecu_server:         config.tls.as_ref().map(|tls| tls.server.join("director/ecus")),
            ttl:                config.provision.as_ref().map_or(36000, |provision| provision.ttl),
        }
    }

    /// Declare the secondary ECUs to register alongside the primary.
    pub fn set_secondaries(&mut self, secondaries: Vec<EcuEntry>) {
        self.secondaries = secondaries;
    }

    pub fn is_provisioned(&self, storage: &Storage) -> Result<bool, Error> {
        Ok(storage.load_tls_creds()?.is_some() && storage.load_ecu_registered()?)
    }

    /// The primary serial is generated and persisted on the first attempt,
    /// before any network call, and never changes afterwards.
    pub fn primary_ecu_serial(&self, storage: &Storage) -> Result<String, Error> {
        storage.load_ecu_serials()?.first()
            .map(|&(ref serial, _)| serial.clone())
            .ok_or_else(|| Error::Provision("no primary ecu serial stored".into()))
    }

    pub fn primary_hardware_id(&self, storage: &Storage) -> Result<String, Error> {
        storage.load_ecu_serials()?.first()
            .map(|&(_, ref hardware)| hardware.clone())
            .ok_or_else(|| Error::Provision("no primary hardware id stored".into()))
    }

    /// Run every remaining enrollment step. A no-op once provisioned.
    pub fn attempt(&self, storage: &mut Storage, keys: &mut KeyManager, client: &Client) -> Result<(), Error> {
        self.ensure_device_id(storage)?;
        self.ensure_ecu_serials(storage)?;
        keys.generate_keypair(storage)?;
        self.ensure_tls_creds(storage, client)?;
        self.ensure_ecus_registered(storage, keys, client)?;
        Ok(())
    }

    fn ensure_device_id(&self, storage: &mut Storage) -> Result<String, Error> {
        if let Some(device_id) = storage.load_device_id()? {
            return Ok(device_id);
        }
        let device_id = self.device_id_cfg.clone()
            .or_else(|| KeyManager::device_cn(storage).ok())
            .unwrap_or_else(|| format!("{}", Uuid::new_v4()));
        info!("provisioning with device id {}", device_id);
        storage.store_device_id(&device_id)?;
        Ok(device_id)
    }

    fn ensure_ecu_serials(&self, storage: &mut Storage) -> Result<Vec<(String, String)>, Error> {
        let stored = storage.load_ecu_serials()?;
        if !stored.is_empty() {
            return Ok(stored);
        }

        let hardware = self.hardware_id_cfg.clone().unwrap_or_else(system_hostname);
        let primary = self.primary_serial_cfg.clone().unwrap_or_else(|| format!("{}", Uuid::new_v4()));
        let mut serials = vec![(primary, hardware)];
        for ecu in &self.secondaries {
            serials.push((ecu.serial.clone(), ecu.hardware_id.clone()));
        }
        storage.store_ecu_serials(&serials)?;
        Ok(serials)
    }

    fn ensure_tls_creds(&self, storage: &mut Storage, client: &Client) -> Result<(), Error> {
        if storage.load_tls_creds()?.is_some() {
            return Ok(());
        }

        let server = self.provision_server.as_ref()
            .ok_or_else(|| Error::Provision("no provisioning server configured".into()))?;
        let device_id = storage.load_device_id()?
            .ok_or_else(|| Error::Provision("no device id stored".into()))?;
        let body = json::to_vec(&json!({ "deviceId": device_id, "ttl": self.ttl }))?;

        debug!("requesting device credentials from {}", server);
        let resp = client.post(server.join("devices"), Some(body)).recv()
            .ok_or_else(|| Error::Provision("no response from provisioning server".into()))?;
        let p12 = match resp {
            Response::Success(data) => data.body,
            Response::Failed(data) => {
                if String::from_utf8_lossy(&data.body).contains("device_already_registered") {
                    return Err(Error::Provision("device already registered".into()));
                }
                return Err(data.into());
            }
            Response::Error(err) => return Err(*err)
        };

        storage.store_tls_creds(&decompose_p12(&p12)?)
    }

    fn ensure_ecus_registered(&self, storage: &mut Storage, keys: &KeyManager, client: &Client) -> Result<(), Error> {
        if storage.load_ecu_registered()? {
            return Ok(());
        }

        let server = self.ecu_server.as_ref()
            .ok_or_else(|| Error::Provision("no ecu registration server configured".into()))?;
        let serials = storage.load_ecu_serials()?;
        let primary = serials.first()
            .map(|&(ref serial, _)| serial.clone())
            .ok_or_else(|| Error::Provision("no ecu serials stored".into()))?;
        let primary_key = keys.uptane_public_key()?;

        let ecus = serials.iter()
            .map(|&(ref serial, ref hardware)| {
                let key = self.secondaries.iter()
                    .find(|ecu| &ecu.serial == serial)
                    .and_then(|ecu| ecu.client_key.clone())
                    .unwrap_or_else(|| primary_key.clone());
                Ok(json!({
                    "ecu_serial": serial,
                    "hardware_identifier": hardware,
                    "clientKey": json::to_value(&key)?
                }))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        debug!("registering {} ecus at {}", serials.len(), server);
        let body = json::to_vec(&json!({ "primary_ecu_serial": primary, "ecus": ecus }))?;
        let resp = client.post(server.clone(), Some(body)).recv()
            .ok_or_else(|| Error::Provision("no response from ecu registration".into()))?;
        match resp {
            Response::Success(_) => {
                storage.store_ecu_registered()?;
                info!("ecu registration complete");
                Ok(())
            }
            Response::Failed(data) => {
                if String::from_utf8_lossy(&data.body).contains("ecu_already_registered") {
                    Err(Error::Provision("ecu already registered".into()))
                } else {
                    Err(data.into())
                }
            }
            Response::Error(err) => Err(*err)
        }
    }
}

/// Split a PKCS#12 archive into its ca/cert/pkey PEM parts.
fn decompose_p12(der: &[u8]) -> Result<TlsCreds, Error> {
    let parsed = Pkcs12::from_der(der)?.parse("")?;
    let mut ca = Vec::new();
    for cert in &parsed.chain {
        ca.extend(cert.to_pem()?);
    }
    Ok(TlsCreds {
        ca:   ca,
        cert: parsed.cert.to_pem()?,
        pkey: parsed.pkey.private_key_to_pem()?,
    })
}

fn system_hostname() -> String {
    Util::read_text("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|_| "unknown-hardware".into())
}


#[cfg(test)]
mod tests {
    use super::*;
    use chan::Sender;
    use hyper::status::StatusCode;

    use datatype::Config;
    use http::{Request, ResponseData, TestClient};
    use storage::MemStorage;


    struct FailClient {
        code: StatusCode,
        body: Vec<u8>,
    }

    impl Client for FailClient {
        fn chan_request(&self, _: Request, resp_tx: Sender<Response>) {
            resp_tx.send(Response::Failed(ResponseData { code: self.code, body: self.body.clone() }));
        }

        fn is_testing(&self) -> bool { true }
    }

    fn provisioner() -> Provisioner {
        let mut config = Config::default();
        config.tls = Some(Default::default());
        config.uptane.primary_ecu_serial = Some("CA:FE:A6:D2:84:9D".into());
        Provisioner::from_config(&config)
    }

    fn with_tls_creds(storage: &mut MemStorage) {
        storage.store_tls_creds(&TlsCreds {
            ca:   b"ca".to_vec(),
            cert: b"cert".to_vec(),
            pkey: b"pkey".to_vec(),
        }).expect("store creds");
    }


    #[test]
    fn attempt_is_idempotent() {
        let mut storage = MemStorage::default();
        with_tls_creds(&mut storage);
        let mut keys = KeyManager::new("/tmp/ota-prov-idem".into());
        let client = TestClient::from(vec![b"{}".to_vec(), b"{}".to_vec()]);
        let prov = provisioner();

        prov.attempt(&mut storage, &mut keys, &client).expect("first attempt");
        let device_id = storage.load_device_id().unwrap();
        let serials = storage.load_ecu_serials().unwrap();
        let keypair = storage.load_primary_keys().unwrap();
        assert!(storage.load_ecu_registered().unwrap());

        prov.attempt(&mut storage, &mut keys, &client).expect("second attempt");
        assert_eq!(device_id, storage.load_device_id().unwrap());
        assert_eq!(serials, storage.load_ecu_serials().unwrap());
        assert_eq!(keypair, storage.load_primary_keys().unwrap());
    }

    #[test]
    fn primary_serial_stable_while_offline() {
        let mut storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-prov-offline".into());
        let client = TestClient::default(); // every request fails
        let prov = provisioner();

        assert!(prov.attempt(&mut storage, &mut keys, &client).is_err());
        let first = prov.primary_ecu_serial(&storage).expect("serial persisted");
        assert!(prov.attempt(&mut storage, &mut keys, &client).is_err());
        assert_eq!(first, prov.primary_ecu_serial(&storage).expect("serial unchanged"));
        assert_eq!(first, "CA:FE:A6:D2:84:9D");
    }

    #[test]
    fn generated_serial_survives_retries() {
        let mut storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-prov-gen".into());
        let client = TestClient::default();
        let mut config = Config::default();
        config.tls = Some(Default::default());
        let prov = Provisioner::from_config(&config);

        assert!(prov.attempt(&mut storage, &mut keys, &client).is_err());
        let first = prov.primary_ecu_serial(&storage).expect("serial persisted");
        assert!(prov.attempt(&mut storage, &mut keys, &client).is_err());
        assert_eq!(first, prov.primary_ecu_serial(&storage).expect("serial unchanged"));
    }

    #[test]
    fn ecu_already_registered_is_surfaced() {
        let mut storage = MemStorage::default();
        with_tls_creds(&mut storage);
        let mut keys = KeyManager::new("/tmp/ota-prov-dup".into());
        let client = FailClient {
            code: StatusCode::Conflict,
            body: br#"{"code": "ecu_already_registered"}"#.to_vec(),
        };
        let prov = provisioner();

        match prov.attempt(&mut storage, &mut keys, &client) {
            Err(Error::Provision(ref message)) => assert!(message.contains("already registered")),
            other => panic!("expected provision error, got {:?}", other.map(|_| ()))
        }
        assert!(!storage.load_ecu_registered().unwrap());
    }

    #[test]
    fn device_already_registered_is_surfaced() {
        let mut storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-prov-dev-dup".into());
        let client = FailClient {
            code: StatusCode::Conflict,
            body: br#"{"code": "device_already_registered"}"#.to_vec(),
        };
        let mut config = Config::default();
        config.provision = Some(Default::default());
        config.tls = Some(Default::default());
        let prov = Provisioner::from_config(&config);

        match prov.attempt(&mut storage, &mut keys, &client) {
            Err(Error::Provision(ref message)) => assert!(message.contains("already registered")),
            other => panic!("expected provision error, got {:?}", other.map(|_| ()))
        }
        assert!(storage.load_tls_creds().unwrap().is_none());
    }
}
