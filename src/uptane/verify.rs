use base64;
use hex::FromHex;
use pem;
use serde_json as json;
use std::collections::{HashMap, HashSet};

use datatype::{CanonicalJson, Delegations, Error, Key, KeyType, RoleData, RoleMeta,
               RoleName, Signature, SignatureType, TufSigned};


/// Store the keys and role data used for verifying uptane metadata.
#[derive(Default)]
pub struct Verifier {
    keys:  HashMap<String, Key>,
    roles: HashMap<RoleName, RoleMeta>,
}

impl Verifier {
    /// Build a verifier from the keys and role thresholds of a root.
    pub fn from_root(root: &RoleData) -> Result<Verifier, Error> {
        let mut verifier = Verifier::default();
        for (role, meta) in root.roles.as_ref().ok_or(Error::UptaneMissingRoles)? {
            verifier.add_meta(role.clone(), meta.clone())?;
        }
        for (id, key) in root.keys.as_ref().ok_or(Error::UptaneMissingKeys)? {
            verifier.add_key(id.clone(), key.clone())?;
        }
        Ok(verifier)
    }

    /// Build a verifier for the delegated roles of a parent targets.
    pub fn from_delegations(delegations: &Delegations) -> Result<Verifier, Error> {
        let mut verifier = Verifier::default();
        for role in &delegations.roles {
            let meta = RoleMeta { keyids: role.keyids.clone(), threshold: role.threshold };
            verifier.add_meta(RoleName::Delegation(role.name.clone()), meta)?;
        }
        for (id, key) in &delegations.keys {
            verifier.add_key(id.clone(), key.clone())?;
        }
        Ok(verifier)
    }

    pub fn add_meta(&mut self, role: RoleName, meta: RoleMeta) -> Result<(), Error> {
        trace!("adding role to verifier: {}", role);
        if self.roles.get(&role).is_some() {
            Err(Error::UptaneRole(format!("{} already exists", role)))
        } else if meta.threshold < 1 {
            Err(Error::UptaneThreshold(format!("{} threshold too low", role)))
        } else {
            self.roles.insert(role, meta);
            Ok(())
        }
    }

    pub fn add_key(&mut self, id: String, key: Key) -> Result<(), Error> {
        trace!("adding key_id to verifier: {}", id);
        if self.keys.get(&id).is_some() {
            Err(Error::TufKeyId(format!("key_id already exists: {}", id)))
        } else {
            self.keys.insert(id, key);
            Ok(())
        }
    }

    /// Verify the signed envelope for a role and return its parsed payload.
    /// Freshness (expiry) and version agreement between roles are left to
    /// the repository state machine.
    pub fn verify_signed(&self, role: &RoleName, signed: &TufSigned) -> Result<RoleData, Error> {
        self.verify_signatures(role, signed)?;

        let data = json::from_value::<RoleData>(signed.signed.clone())?;
        let expected = match *role {
            RoleName::Delegation(_) => RoleName::Targets,
            ref name => name.clone(),
        };
        if data._type != expected {
            Err(Error::UptaneRole(format!("expected `{}`, got `{}`", expected, data._type)))
        } else if data.version < 1 {
            Err(Error::UptaneVersion(format!("{} version must be positive", role)))
        } else {
            Ok(data)
        }
    }

    /// Verify that a role-defined threshold of distinct keys signed the data.
    pub fn verify_signatures(&self, role: &RoleName, signed: &TufSigned) -> Result<(), Error> {
        let meta = self.roles.get(role).ok_or_else(|| Error::UptaneRole(format!("{} not found", role)))?;
        let cjson = CanonicalJson::into_bytes(signed.signed.clone())?;
        let valid = signed.signatures
            .iter()
            .filter(|sig| meta.keyids.contains(&sig.keyid))
            .filter(|sig| self.verify_data(&cjson, sig))
            .map(|sig| &sig.keyid)
            .collect::<HashSet<_>>();

        if (valid.len() as u64) < meta.threshold {
            Err(Error::UptaneThreshold(format!("{}: {} of {} ok", role, valid.len(), meta.threshold)))
        } else {
            Ok(())
        }
    }

    /// Verify that the signature matches the data.
    pub fn verify_data(&self, data: &[u8], sig: &Signature) -> bool {
        let verify = || -> Result<bool, Error> {
            let key = self.keys.get(&sig.keyid).ok_or_else(|| Error::KeyNotFound(sig.keyid.clone()))?;
            match key.keytype {
                KeyType::Ed25519 => {
                    let sig = Vec::from_hex(&sig.sig)?;
                    let key = Vec::from_hex(&key.keyval.public)?;
                    Ok(SignatureType::Ed25519.verify_msg(data, &key, &sig))
                }

                KeyType::Rsa => {
                    let sig = base64::decode(&sig.sig)?;
                    let pem = pem::parse(&key.keyval.public)?;
                    Ok(SignatureType::RsaSsaPss.verify_msg(data, &pem.contents, &sig))
                }
            }
        };

        match verify() {
            Ok(true)  => { trace!("successful verification: {}", sig.keyid); true }
            Ok(false) => { trace!("failed verification: {}", sig.keyid); false }
            Err(err)  => { trace!("failed verification for {}: {}", sig.keyid, err); false }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crypto::ed25519;
    use hex::ToHex;

    use datatype::{KeyValue, PrivateKey};


    fn ed25519_key(seed: &[u8; 32]) -> (PrivateKey, String, Key) {
        let (secret, public) = ed25519::keypair(seed);
        let key = Key {
            keytype: KeyType::Ed25519,
            keyval:  KeyValue { public: public.to_hex() },
        };
        let keyid = key.key_id().expect("key_id");
        (PrivateKey { keyid: keyid.clone(), der_key: secret.as_ref().to_vec() }, keyid, key)
    }

    fn targets_value() -> json::Value {
        json!({
            "_type": "Targets",
            "version": 2,
            "expires": "2031-01-01T00:00:00Z",
            "targets": {}
        })
    }

    fn verifier_for(keyid: &str, key: Key, threshold: u64) -> Verifier {
        let mut verifier = Verifier::default();
        verifier.add_meta(RoleName::Targets, RoleMeta {
            keyids: hashset!{ keyid.to_string() },
            threshold: threshold,
        }).expect("add meta");
        verifier.add_key(keyid.to_string(), key).expect("add key");
        verifier
    }


    #[test]
    fn accepts_valid_signature() {
        let (privkey, keyid, key) = ed25519_key(&[1; 32]);
        let signed = privkey.sign_data(targets_value(), SignatureType::Ed25519).expect("sign");
        let verifier = verifier_for(&keyid, key, 1);
        let data = verifier.verify_signed(&RoleName::Targets, &signed).expect("verify");
        assert_eq!(data.version, 2);
    }

    #[test]
    fn rejects_tampered_payload() {
        let (privkey, keyid, key) = ed25519_key(&[1; 32]);
        let mut signed = privkey.sign_data(targets_value(), SignatureType::Ed25519).expect("sign");
        signed.signed["version"] = json!(9);
        let verifier = verifier_for(&keyid, key, 1);
        assert!(verifier.verify_signed(&RoleName::Targets, &signed).is_err());
    }

    #[test]
    fn rejects_unknown_signer() {
        let (privkey, _, _) = ed25519_key(&[1; 32]);
        let (_, keyid, key) = ed25519_key(&[2; 32]);
        let signed = privkey.sign_data(targets_value(), SignatureType::Ed25519).expect("sign");
        let verifier = verifier_for(&keyid, key, 1);
        assert!(verifier.verify_signed(&RoleName::Targets, &signed).is_err());
    }

    #[test]
    fn duplicate_signatures_do_not_meet_threshold() {
        let (privkey, keyid, key) = ed25519_key(&[1; 32]);
        let mut signed = privkey.sign_data(targets_value(), SignatureType::Ed25519).expect("sign");
        let dup = signed.signatures[0].clone();
        signed.signatures.push(dup);
        let verifier = verifier_for(&keyid, key, 2);
        assert!(verifier.verify_signed(&RoleName::Targets, &signed).is_err());
    }

    #[test]
    fn wrong_role_type_is_rejected() {
        let (privkey, keyid, key) = ed25519_key(&[1; 32]);
        let snapshot = json!({
            "_type": "Snapshot",
            "version": 1,
            "expires": "2031-01-01T00:00:00Z",
            "meta": {}
        });
        let signed = privkey.sign_data(snapshot, SignatureType::Ed25519).expect("sign");
        let verifier = verifier_for(&keyid, key, 1);
        assert!(verifier.verify_signed(&RoleName::Targets, &signed).is_err());
    }
}
