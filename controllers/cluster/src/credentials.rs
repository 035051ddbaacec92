//! Credential material generation.
//!
//! Root CA, component certificates, key pairs and bearer tokens for a
//! tenant cluster. Behind a trait so handler tests can run with a
//! deterministic fake instead of real key generation.

use rand::distributions::Alphanumeric;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, KeyPair,
};

use crds::{KeyCert, KeyPairData};

use crate::error::ControllerError;

/// Length of generated bearer tokens.
const TOKEN_LENGTH: usize = 32;

/// Generates the credential material the Pending handler installs.
pub trait CredentialFactory: Send + Sync {
    /// Self-signed root CA for one cluster.
    fn root_ca(&self, cluster_name: &str) -> Result<KeyCert, ControllerError>;

    /// Key/cert pair for a component, signed by the cluster root CA.
    fn signed_cert(&self, common_name: &str, ca: &KeyCert) -> Result<KeyCert, ControllerError>;

    /// SSH-style private/public key pair for apiserver tunnels.
    fn ssh_key_pair(&self) -> Result<KeyPairData, ControllerError>;

    /// Signing key for service account tokens.
    fn service_account_key(&self) -> Result<Vec<u8>, ControllerError>;

    /// Random bearer token.
    fn bearer_token(&self) -> String;
}

/// Production factory built on rcgen and rand.
#[derive(Debug, Default)]
pub struct RcgenCredentialFactory;

impl RcgenCredentialFactory {
    fn pem_str(bytes: &[u8]) -> Result<&str, ControllerError> {
        std::str::from_utf8(bytes)
            .map_err(|_| ControllerError::InvalidConfig("CA material is not valid PEM".to_string()))
    }
}

impl CredentialFactory for RcgenCredentialFactory {
    fn root_ca(&self, cluster_name: &str) -> Result<KeyCert, ControllerError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::new())?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, format!("root-ca.{cluster_name}"));
        let cert = params.self_signed(&key)?;
        Ok(KeyCert {
            key: key.serialize_pem().into_bytes(),
            cert: cert.pem().into_bytes(),
        })
    }

    fn signed_cert(&self, common_name: &str, ca: &KeyCert) -> Result<KeyCert, ControllerError> {
        let issuer_key = KeyPair::from_pem(Self::pem_str(&ca.key)?)?;
        let issuer_params = CertificateParams::from_ca_cert_pem(Self::pem_str(&ca.cert)?)?;
        let issuer = issuer_params.self_signed(&issuer_key)?;

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![common_name.to_string()])?;
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let cert = params.signed_by(&key, &issuer, &issuer_key)?;
        Ok(KeyCert {
            key: key.serialize_pem().into_bytes(),
            cert: cert.pem().into_bytes(),
        })
    }

    fn ssh_key_pair(&self) -> Result<KeyPairData, ControllerError> {
        let key = KeyPair::generate()?;
        Ok(KeyPairData {
            private_key: key.serialize_pem().into_bytes(),
            public_key: key.public_key_pem().into_bytes(),
        })
    }

    fn service_account_key(&self) -> Result<Vec<u8>, ControllerError> {
        Ok(KeyPair::generate()?.serialize_pem().into_bytes())
    }

    fn bearer_token(&self) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        token.to_lowercase()
    }
}
