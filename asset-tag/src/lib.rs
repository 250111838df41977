// SPDX-License-Identifier: Apache-2.0

//! Asset tag issuance and deployment.
//!
//! An asset tag is an X.509 certificate binding administrator-defined
//! key/value attributes to a host's hardware UUID. Each attribute is DER
//! encoded as a two-string SEQUENCE and carried in its own extension under
//! [`TAG_ATTRIBUTE_OID`]; the hardware UUID is the subject common name.
//! Deployment hands the certificate's SHA-384 digest to the host's TPM so
//! it becomes part of future PCR measurements.

use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA384,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use trustd_types::connector::HostConnector;
use trustd_types::{Error, Result};

/// OID under which every tag attribute extension is emitted.
pub const TAG_ATTRIBUTE_OID: &[u64] = &[2, 5, 4, 789, 1];

/// One administrator-defined attribute bound to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagKvAttribute {
    pub key: String,
    pub value: String,
}

/// Inputs for [`create_asset_tag`]. Validated in order; the first failure
/// wins.
#[derive(Debug, Clone)]
pub struct TagCertConfig {
    /// Hardware UUID of the host the tag is for.
    pub subject_uuid: String,
    pub tag_attributes: Vec<TagKvAttribute>,
    pub validity_seconds: u64,
    /// Tag-CA private key, PKCS#8 PEM.
    pub private_key_pem: String,
    /// Tag-CA certificate, PEM.
    pub ca_cert_pem: String,
}

/// Issue an asset tag certificate, returning its DER encoding.
pub fn create_asset_tag(config: &TagCertConfig) -> Result<Vec<u8>> {
    if config.subject_uuid.trim().is_empty() {
        return Err(Error::invalid_input(
            "Subject UUID is required to be set to create an asset tag certificate",
        ));
    }
    if config.tag_attributes.is_empty() {
        return Err(Error::invalid_input(
            "Tag key-value attributes are required to be set to create an asset tag certificate",
        ));
    }
    if config.validity_seconds == 0 {
        return Err(Error::invalid_input(
            "Certificate validity in seconds required to be set to create an asset tag certificate",
        ));
    }
    if config.private_key_pem.trim().is_empty() {
        return Err(Error::invalid_input(
            "Private key is required to be set to create an asset tag certificate",
        ));
    }
    if config.ca_cert_pem.trim().is_empty() {
        return Err(Error::invalid_input(
            "Tag CA-Certificate is required to be set to fetch issuer configuration information \
             to create an asset tag certificate",
        ));
    }

    let key = KeyPair::from_pem_and_sign_algo(&config.private_key_pem, &PKCS_RSA_SHA384)
        .context("failed to parse tag-CA private key")
        .map_err(Error::crypto)?;
    let issuer = CertificateParams::from_ca_cert_pem(&config.ca_cert_pem)
        .context("failed to parse tag-CA certificate")
        .map_err(Error::crypto)?
        .self_signed(&key)
        .context("failed to reconstruct tag-CA issuer")
        .map_err(Error::crypto)?;

    let mut params = CertificateParams::new(Vec::new())
        .context("failed to initialize certificate parameters")
        .map_err(Error::crypto)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, config.subject_uuid.clone());
    params.distinguished_name = dn;

    let mut serial = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut serial)
        .context("failed to draw serial number")
        .map_err(Error::crypto)?;
    params.serial_number = Some(serial.to_vec().into());

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + Duration::from_secs(config.validity_seconds)).into();

    for attribute in &config.tag_attributes {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            TAG_ATTRIBUTE_OID,
            encode_attribute(attribute),
        ));
    }

    let cert = params
        .signed_by(&key, &issuer, &key)
        .context("failed to sign asset tag certificate")
        .map_err(Error::crypto)?;
    info!(subject = %config.subject_uuid, attributes = config.tag_attributes.len(),
        "issued asset tag certificate");
    Ok(cert.der().to_vec())
}

/// Push an issued tag's digest to the host TPM through its connector.
pub async fn deploy_asset_tag(
    connector: &dyn HostConnector,
    tag_digest_hex: &str,
    hardware_uuid: &str,
) -> Result<()> {
    let digest_hex = tag_digest_hex.trim();
    if digest_hex.is_empty() {
        return Err(Error::invalid_input(
            "tag digest is required to deploy an asset tag",
        ));
    }
    if hardware_uuid.trim().is_empty() {
        return Err(Error::invalid_input(
            "hardware UUID is required to deploy an asset tag",
        ));
    }
    let digest = hex::decode(digest_hex)
        .map_err(|_| Error::invalid_input("tag digest is not valid hex"))?;
    let uuid = Uuid::parse_str(hardware_uuid.trim())
        .map_err(|_| Error::invalid_input("hardware UUID is not a valid UUID"))?;

    connector.deploy_asset_tag(uuid, &digest).await?;
    info!(%uuid, "deployed asset tag digest to host");
    Ok(())
}

/// DER encoding of one attribute: `SEQUENCE { UTF8String key, UTF8String value }`.
pub fn encode_attribute(attribute: &TagKvAttribute) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_utf8_string(&attribute.key);
            writer.next().write_utf8_string(&attribute.value);
        })
    })
}

/// Decode an attribute extension value written by [`encode_attribute`].
pub fn decode_attribute(der: &[u8]) -> anyhow::Result<TagKvAttribute> {
    yasna::parse_der(der, |reader| {
        reader.read_sequence(|reader| {
            let key = reader.next().read_utf8string()?;
            let value = reader.next().read_utf8string()?;
            Ok(TagKvAttribute { key, value })
        })
    })
    .map_err(|e| anyhow::anyhow!("malformed tag attribute: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_encoding_round_trip() {
        let attr = TagKvAttribute {
            key: "Country".to_string(),
            value: "US".to_string(),
        };
        let der = encode_attribute(&attr);
        assert_eq!(decode_attribute(&der).unwrap(), attr);
    }

    #[test]
    fn attribute_decoding_rejects_garbage() {
        assert!(decode_attribute(&[0x04, 0x02, 0xde, 0xad]).is_err());
    }
}
