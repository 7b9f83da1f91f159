use openssl::nid;
use openssl::rsa::Rsa;
use openssl::x509::X509;
use serde_json as json;
use std::fs;

use datatype::{Error, Key, KeyType, KeyValue, PrivateKey, SignatureType, TufSigned, Util};
use http::TlsData;
use storage::Storage;


/// Details extracted from the device's TLS client certificate.
#[derive(PartialEq, Debug, Clone)]
pub struct CertInfo {
    pub subject_cn:        String,
    pub business_category: Option<String>,
    pub not_before:        String,
    pub not_after:         String,
    pub issuer:            String,
}


/// Owns the device's Uptane signing key and hands its TLS credentials to
/// the HTTP layer via scoped temp files that are removed when the manager
/// is dropped.
pub struct KeyManager {
    runtime_dir: String,
    private_key: Option<PrivateKey>,
    public_pem:  Option<Vec<u8>>,
    temp_creds:  Option<TempCreds>,
}

impl KeyManager {
    pub fn new(runtime_dir: String) -> Self {
        KeyManager {
            runtime_dir: runtime_dir,
            private_key: None,
            public_pem:  None,
            temp_creds:  None,
        }
    }

    /// Load the Uptane keypair from storage, generating and persisting a
    /// new RSA-2048 keypair on first use. Returns the existing keypair
    /// unchanged on every subsequent call.
    pub fn generate_keypair(&mut self, storage: &mut Storage) -> Result<(), Error> {
        let (public_pem, private_der) = match storage.load_primary_keys()? {
            Some(keys) => keys,
            None => {
                info!("generating a new uptane keypair");
                let rsa = Rsa::generate(2048)?;
                let public_pem = rsa.public_key_to_pem()?;
                let private_der = rsa.private_key_to_der()?;
                storage.store_primary_keys(&public_pem, &private_der)?;
                (public_pem, private_der)
            }
        };

        let keyid = Key {
            keytype: KeyType::Rsa,
            keyval:  KeyValue { public: String::from_utf8(public_pem.clone())? },
        }.key_id()?;
        self.private_key = Some(PrivateKey { keyid: keyid, der_key: private_der });
        self.public_pem = Some(public_pem);
        Ok(())
    }

    /// The public half of the Uptane keypair as a TUF key object.
    pub fn uptane_public_key(&self) -> Result<Key, Error> {
        let pem = self.public_pem.as_ref().ok_or_else(|| Error::KeySign("no uptane keypair loaded".into()))?;
        Ok(Key {
            keytype: KeyType::Rsa,
            keyval:  KeyValue { public: String::from_utf8(pem.clone())? },
        })
    }

    /// Wrap a JSON value in a signed envelope using the Uptane key.
    pub fn sign_data(&self, data: json::Value) -> Result<TufSigned, Error> {
        let key = self.private_key.as_ref().ok_or_else(|| Error::KeySign("no uptane keypair loaded".into()))?;
        key.sign_data(data, SignatureType::RsaSsaPss)
    }

    /// Write the stored TLS credentials to scoped temp files for the HTTP
    /// layer. Returns false when no credentials are stored yet.
    pub fn load_tls_creds(&mut self, storage: &Storage) -> Result<bool, Error> {
        let creds = match storage.load_tls_creds()? {
            Some(creds) => creds,
            None => return Ok(false)
        };

        fs::create_dir_all(&self.runtime_dir)?;
        let paths = TempCreds {
            ca:   format!("{}/tls-ca.pem", self.runtime_dir),
            cert: format!("{}/tls-cert.pem", self.runtime_dir),
            pkey: format!("{}/tls-pkey.pem", self.runtime_dir),
        };
        Util::write_file(&paths.ca, &creds.ca)?;
        Util::write_file(&paths.cert, &creds.cert)?;
        Util::write_file(&paths.pkey, &creds.pkey)?;
        self.temp_creds = Some(paths);
        Ok(true)
    }

    /// Paths to the temp credential files, for `TlsClient::init`.
    pub fn tls_data(&self) -> Option<TlsData> {
        self.temp_creds.as_ref().map(|paths| TlsData {
            ca_path:   Some(&paths.ca),
            cert_path: Some(&paths.cert),
            pkey_path: Some(&paths.pkey),
        })
    }

    /// The common name of the stored device certificate.
    pub fn device_cn(storage: &Storage) -> Result<String, Error> {
        let creds = storage.load_tls_creds()?
            .ok_or_else(|| Error::KeyNotFound("no TLS certificate stored".into()))?;
        let cert = X509::from_pem(&creds.cert)?;
        let cn = cert.subject_name().entries_by_nid(nid::COMMONNAME).next()
            .ok_or_else(|| Error::Parse("certificate has no common name".into()))?
            .data().as_utf8()?;
        Ok(cn.to_string())
    }

    /// Subject, issuer and validity details of the device certificate.
    pub fn cert_info(storage: &Storage) -> Result<CertInfo, Error> {
        let creds = storage.load_tls_creds()?
            .ok_or_else(|| Error::KeyNotFound("no TLS certificate stored".into()))?;
        let cert = X509::from_pem(&creds.cert)?;

        let cn = cert.subject_name().entries_by_nid(nid::COMMONNAME).next()
            .ok_or_else(|| Error::Parse("certificate has no common name".into()))?
            .data().as_utf8()?.to_string();
        let bc = cert.subject_name().entries_by_nid(nid::BUSINESSCATEGORY).next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|category| category.to_string());
        let issuer = cert.issuer_name().entries_by_nid(nid::COMMONNAME).next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|name| name.to_string())
            .unwrap_or_else(String::new);

        Ok(CertInfo {
            subject_cn:        cn,
            business_category: bc,
            not_before:        format!("{}", cert.not_before()),
            not_after:         format!("{}", cert.not_after()),
            issuer:            issuer,
        })
    }
}


struct TempCreds {
    ca:   String,
    cert: String,
    pkey: String,
}

impl Drop for TempCreds {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.ca);
        let _ = fs::remove_file(&self.cert);
        let _ = fs::remove_file(&self.pkey);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use storage::{MemStorage, TlsCreds};


    #[test]
    fn keypair_generation_is_idempotent() {
        let mut storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-keys-test".into());
        keys.generate_keypair(&mut storage).expect("generate");
        let first = storage.load_primary_keys().unwrap().expect("keys stored");

        let mut again = KeyManager::new("/tmp/ota-keys-test".into());
        again.generate_keypair(&mut storage).expect("reload");
        let second = storage.load_primary_keys().unwrap().expect("keys unchanged");
        assert_eq!(first, second);
        assert_eq!(keys.uptane_public_key().unwrap(), again.uptane_public_key().unwrap());
    }

    #[test]
    fn sign_data_wraps_payload() {
        let mut storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-keys-sign".into());
        keys.generate_keypair(&mut storage).expect("generate");

        let signed = keys.sign_data(json!({"hello": "world"})).expect("sign");
        assert_eq!(signed.signatures.len(), 1);
        assert_eq!(signed.signed, json!({"hello": "world"}));
    }

    #[test]
    fn missing_tls_creds_is_not_an_error() {
        let storage = MemStorage::default();
        let mut keys = KeyManager::new("/tmp/ota-keys-tls".into());
        assert_eq!(keys.load_tls_creds(&storage).expect("load"), false);
        assert!(keys.tls_data().is_none());
    }

    #[test]
    fn temp_creds_are_removed_on_drop() {
        let mut storage = MemStorage::default();
        storage.store_tls_creds(&TlsCreds {
            ca:   b"ca".to_vec(),
            cert: b"cert".to_vec(),
            pkey: b"pkey".to_vec(),
        }).unwrap();

        let dir = "/tmp/ota-keys-drop";
        let path = format!("{}/tls-ca.pem", dir);
        {
            let mut keys = KeyManager::new(dir.into());
            assert!(keys.load_tls_creds(&storage).expect("load"));
            assert!(::std::path::Path::new(&path).exists());
        }
        assert!(!::std::path::Path::new(&path).exists());
    }
}
