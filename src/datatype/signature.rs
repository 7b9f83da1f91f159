use crypto::digest::Digest;
use crypto::ed25519;
use crypto::sha2::{Sha256, Sha512};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::{Rsa, Padding};
use openssl::sign::Verifier;
use ring::rand::SystemRandom;
use ring::signature::{RSAKeyPair, RSASigningState, RSA_PSS_SHA256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde::de::Error as SerdeError;
use serde_json as json;
use std::os::raw::c_int;
use std::str::FromStr;
use std::sync::Arc;
use untrusted::Input;

use datatype::Error;


const RSA_PKCS1_PSS_PADDING: c_int = 6;


#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Signature {
    pub keyid:  String,
    pub method: SignatureType,
    pub sig:    String,
}


#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum SignatureType {
    Ed25519,
    RsaSsaPss,
}

impl<'de> Deserialize<'de> for SignatureType {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown SignatureType: {}", err)))
        } else {
            Err(SerdeError::custom("unknown SignatureType"))
        }
    }
}

impl Serialize for SignatureType {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(match *self {
            SignatureType::Ed25519   => "ed25519",
            SignatureType::RsaSsaPss => "rsassa-pss"
        })
    }
}

impl FromStr for SignatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519"    => Ok(SignatureType::Ed25519),
            "rsassa-pss" => Ok(SignatureType::RsaSsaPss),
            _ => Err(Error::TufSigType(s.to_string()))
        }
    }
}

impl SignatureType {
    pub fn sign_msg(&self, msg: &[u8], der_key: &[u8]) -> Result<Vec<u8>, Error> {
        match *self {
            SignatureType::Ed25519 => Ok(ed25519::signature(msg, der_key).as_ref().into()),

            SignatureType::RsaSsaPss => {
                let pair = RSAKeyPair::from_der(Input::from(der_key))?;
                let mut state = RSASigningState::new(Arc::new(pair))?;
                let mut sig = vec![0; state.key_pair().public_modulus_len()];
                state.sign(&RSA_PSS_SHA256, &SystemRandom::new(), msg, &mut sig)?;
                Ok(sig)
            }
        }
    }

    pub fn verify_msg(&self, msg: &[u8], pub_key: &[u8], sig: &[u8]) -> bool {
        match *self {
            SignatureType::Ed25519 => ed25519::verify(msg, pub_key, sig),

            SignatureType::RsaSsaPss => {
                let verify = || -> Result<bool, Error> {
                    let pub_key = PKey::from_rsa(Rsa::public_key_from_der(pub_key)?)?;
                    let mut verifier = Verifier::new(MessageDigest::sha256(), &pub_key)?;
                    verifier.pkey_ctx_mut().set_rsa_padding(Padding::from_raw(RSA_PKCS1_PSS_PADDING))?;
                    verifier.update(msg)?;
                    Ok(verifier.finish(sig)?)
                };
                verify().unwrap_or_else(|err| { trace!("RSA SSA-PSS verification failed: {}", err); false })
            }
        }
    }
}


/// Hex-encoded SHA-256 digest of the input bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.input(bytes);
    hasher.result_str()
}

/// Hex-encoded SHA-512 digest of the input bytes.
pub fn sha512_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.input(bytes);
    hasher.result_str()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crypto::ed25519;


    fn flip_bit(mut data: Vec<u8>) -> Vec<u8> { data[0] ^= 1; data }

    fn sign_and_verify(sig_type: SignatureType, priv_key: &[u8], pub_key: &[u8]) {
        let msg = b"hello";
        let sig = sig_type.sign_msg(msg, priv_key).expect("sign_msg");
        let bad_msg = flip_bit(msg.as_ref().into());
        let bad_sig = flip_bit(sig.clone());

        assert!(sig_type.verify_msg(msg, pub_key, &sig));
        assert!(!sig_type.verify_msg(&bad_msg, pub_key, &sig));
        assert!(!sig_type.verify_msg(msg, pub_key, &bad_sig));
    }

    #[test]
    fn test_ed25519_sign_and_verify() {
        let (priv_key, pub_key) = ed25519::keypair(&[7u8; 32]);
        sign_and_verify(SignatureType::Ed25519, &priv_key, &pub_key);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(sha256_hex(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
        assert_eq!(sha256_hex(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_sha512_hex() {
        assert_eq!(sha512_hex(b"abc"),
                   "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                    2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f");
    }
}
