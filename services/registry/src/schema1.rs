//! Schema version 1 signed manifests.
//!
//! A signed manifest is the manifest JSON with a `signatures` array spliced
//! in before the closing brace. Each signature's protected header records
//! where the splice happened (`formatLength`) and what followed it
//! (`formatTail`), so the signed payload can be rebuilt from the raw bytes.
//!
//! Only the structure of signatures is checked here. Key trust is left to
//! callers.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// JOSE base64url: no padding written, padding tolerated on read.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The only schema version understood by this store.
pub const SCHEMA_VERSION: u64 = 1;

/// A layer reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    /// Digest of the layer blob.
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

/// Opaque v1 image metadata for one layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// Raw v1 JSON, kept as a string.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// The unsigned body of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always [`SCHEMA_VERSION`].
    pub schema_version: u64,
    /// Repository the manifest belongs to.
    pub name: String,
    /// Tag the manifest is published under.
    pub tag: String,
    /// Target architecture.
    #[serde(default)]
    pub architecture: String,
    /// Layers, most recent first.
    pub fs_layers: Vec<FsLayer>,
    /// One entry per layer.
    #[serde(default)]
    pub history: Vec<History>,
}

impl Manifest {
    /// A manifest for `name:tag` referencing `layers`, each with empty history.
    pub fn new(name: impl Into<String>, tag: impl Into<String>, layers: Vec<Digest>) -> Self {
        let history = layers
            .iter()
            .map(|_| History {
                v1_compatibility: "{}".to_owned(),
            })
            .collect();
        Self {
            schema_version: SCHEMA_VERSION,
            name: name.into(),
            tag: tag.into(),
            architecture: "amd64".to_owned(),
            fs_layers: layers
                .into_iter()
                .map(|blob_sum| FsLayer { blob_sum })
                .collect(),
            history,
        }
    }

    /// Layer digests in manifest order.
    pub fn layers(&self) -> impl Iterator<Item = &Digest> {
        self.fs_layers.iter().map(|layer| &layer.blob_sum)
    }

    /// Produce signed JSON for this manifest.
    ///
    /// `sign` receives the JWS signing input and returns the raw signature
    /// bytes for algorithm `alg`.
    pub fn sign_with<F>(&self, alg: &str, sign: F) -> RegistryResult<Bytes>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let payload = serde_json::to_vec_pretty(self).map_err(invalid)?;
        let format_length = payload
            .iter()
            .rposition(|&b| b == b'}')
            .and_then(|close| payload[..close].iter().rposition(|b| !b.is_ascii_whitespace()))
            .map(|last| last + 1)
            .ok_or_else(|| RegistryError::ManifestInvalid("empty manifest body".to_owned()))?;
        let tail = &payload[format_length..];

        let protected = serde_json::to_vec(&ProtectedHeader {
            format_length,
            format_tail: BASE64URL.encode(tail),
            time: Some(Utc::now().to_rfc3339()),
        })
        .map_err(invalid)?;
        let protected = BASE64URL.encode(protected);

        let input = format!("{protected}.{}", BASE64URL.encode(&payload));
        let signature = Signature {
            header: JoseHeader {
                alg: alg.to_owned(),
                jwk: None,
            },
            signature: BASE64URL.encode(sign(input.as_bytes())),
            protected,
        };
        let signatures = serde_json::to_vec_pretty(&[signature]).map_err(invalid)?;

        let mut signed = Vec::with_capacity(payload.len() + signatures.len() + 32);
        signed.extend_from_slice(&payload[..format_length]);
        signed.extend_from_slice(b",\n   \"signatures\": ");
        signed.extend_from_slice(&signatures);
        signed.extend_from_slice(tail);
        Ok(signed.into())
    }
}

/// Unprotected JOSE header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoseHeader {
    /// Signature algorithm, e.g. `ES256`.
    pub alg: String,
    /// Public key of the signer, if embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<serde_json::Value>,
}

/// One JWS signature over the manifest payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Unprotected header.
    pub header: JoseHeader,
    /// base64url signature bytes.
    pub signature: String,
    /// base64url protected header.
    pub protected: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtectedHeader {
    format_length: usize,
    format_tail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Versioned {
    schema_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(flatten)]
    manifest: Manifest,
    #[serde(default)]
    signatures: Vec<Signature>,
}

fn invalid(err: serde_json::Error) -> RegistryError {
    RegistryError::ManifestInvalid(err.to_string())
}

fn bad_signature(index: usize, reason: impl std::fmt::Display) -> RegistryError {
    RegistryError::SignatureInvalid(format!("signature {index}: {reason}"))
}

/// A parsed manifest together with the exact bytes it was received as.
#[derive(Debug, Clone)]
pub struct SignedManifest {
    manifest: Manifest,
    signatures: Vec<Signature>,
    payload: Bytes,
    raw: Bytes,
}

impl SignedManifest {
    /// Parse and structurally verify signed manifest bytes.
    pub fn parse(raw: impl Into<Bytes>) -> RegistryResult<Self> {
        let raw = raw.into();

        let versioned: Versioned = serde_json::from_slice(&raw).map_err(invalid)?;
        match versioned.schema_version {
            Some(SCHEMA_VERSION) => {}
            Some(other) => return Err(RegistryError::UnsupportedSchemaVersion(other)),
            None => {
                return Err(RegistryError::ManifestInvalid(
                    "missing schemaVersion".to_owned(),
                ));
            }
        }

        let envelope: Envelope = serde_json::from_slice(&raw).map_err(invalid)?;
        let manifest = envelope.manifest;
        if manifest.fs_layers.is_empty() {
            return Err(RegistryError::ManifestInvalid(
                "manifest has no layers".to_owned(),
            ));
        }
        if manifest.history.len() != manifest.fs_layers.len() {
            return Err(RegistryError::ManifestInvalid(format!(
                "{} history entries for {} layers",
                manifest.history.len(),
                manifest.fs_layers.len()
            )));
        }

        let payload = verify_signatures(&raw, &envelope.signatures)?;
        let signed: Manifest = serde_json::from_slice(&payload)
            .map_err(|err| RegistryError::SignatureInvalid(format!("payload: {err}")))?;
        if signed != manifest {
            return Err(RegistryError::SignatureInvalid(
                "signed payload does not match manifest".to_owned(),
            ));
        }

        Ok(Self {
            manifest,
            signatures: envelope.signatures,
            payload,
            raw,
        })
    }

    /// The manifest body.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Signatures, in the order they appear.
    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// The bytes the signatures cover.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The bytes as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Content digest of the bytes as received.
    pub fn digest(&self) -> Digest {
        Digest::sha256(&self.raw)
    }
}

/// Check every signature's shape and return the payload they all agree on.
fn verify_signatures(raw: &[u8], signatures: &[Signature]) -> RegistryResult<Bytes> {
    if signatures.is_empty() {
        return Err(RegistryError::SignatureInvalid(
            "manifest is not signed".to_owned(),
        ));
    }

    let mut agreed: Option<Vec<u8>> = None;
    for (index, signature) in signatures.iter().enumerate() {
        if signature.header.alg.is_empty() {
            return Err(bad_signature(index, "missing alg"));
        }
        let bytes = BASE64URL
            .decode(&signature.signature)
            .map_err(|err| bad_signature(index, err))?;
        if bytes.is_empty() {
            return Err(bad_signature(index, "empty signature"));
        }

        let protected = BASE64URL
            .decode(&signature.protected)
            .map_err(|err| bad_signature(index, err))?;
        let protected: ProtectedHeader =
            serde_json::from_slice(&protected).map_err(|err| bad_signature(index, err))?;
        let tail = BASE64URL
            .decode(&protected.format_tail)
            .map_err(|err| bad_signature(index, err))?;
        let head = raw
            .get(..protected.format_length)
            .ok_or_else(|| bad_signature(index, "formatLength exceeds manifest"))?;

        let mut payload = Vec::with_capacity(head.len() + tail.len());
        payload.extend_from_slice(head);
        payload.extend_from_slice(&tail);

        match &agreed {
            None => agreed = Some(payload),
            Some(first) if *first == payload => {}
            Some(_) => return Err(bad_signature(index, "payload differs from other signatures")),
        }
    }

    Ok(agreed.unwrap_or_default().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::new(
            "library/ubuntu",
            "latest",
            vec![Digest::sha256(b"one"), Digest::sha256(b"two")],
        )
    }

    fn signed() -> Bytes {
        manifest().sign_with("ES256", |_| vec![1, 2, 3]).unwrap()
    }

    #[test]
    fn parse_signed() {
        let raw = signed();
        let parsed = SignedManifest::parse(raw.clone()).unwrap();
        assert_eq!(parsed.manifest(), &manifest());
        assert_eq!(parsed.signatures().len(), 1);
        assert_eq!(parsed.raw(), &raw);
        assert_eq!(parsed.digest(), Digest::sha256(&raw));
        assert_eq!(
            parsed.payload().as_ref(),
            serde_json::to_vec_pretty(&manifest()).unwrap()
        );
    }

    #[test]
    fn unsupported_version() {
        let mut manifest = manifest();
        manifest.schema_version = 2;
        let raw = serde_json::to_vec(&manifest).unwrap();
        assert!(matches!(
            SignedManifest::parse(raw),
            Err(RegistryError::UnsupportedSchemaVersion(2))
        ));
    }

    #[test]
    fn unsigned_is_rejected() {
        let raw = serde_json::to_vec(&manifest()).unwrap();
        assert!(matches!(
            SignedManifest::parse(raw),
            Err(RegistryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn edited_body_breaks_payload() {
        let raw = String::from_utf8(signed().to_vec()).unwrap();
        let edited = raw.replace("\"latest\"", "\"latest2\"");
        assert!(matches!(
            SignedManifest::parse(edited),
            Err(RegistryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn signatures_must_agree() {
        let raw = String::from_utf8(signed().to_vec()).unwrap();
        let first = SignedManifest::parse(raw.clone()).unwrap().signatures()[0].clone();

        let header: ProtectedHeader =
            serde_json::from_slice(&BASE64URL.decode(&first.protected).unwrap()).unwrap();
        let shifted = ProtectedHeader {
            format_length: header.format_length - 1,
            ..header
        };
        let mut second = first.clone();
        second.protected = BASE64URL.encode(serde_json::to_vec(&shifted).unwrap());

        let one = String::from_utf8(serde_json::to_vec_pretty(&[first.clone()]).unwrap()).unwrap();
        let two = String::from_utf8(serde_json::to_vec_pretty(&[first, second]).unwrap()).unwrap();
        assert!(raw.contains(&one));
        let raw = raw.replace(&one, &two);

        assert!(matches!(
            SignedManifest::parse(raw),
            Err(RegistryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn malformed_signature_fields() {
        let raw = signed();
        let mut value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        value["signatures"][0]["signature"] = "not base64!".into();
        let raw = serde_json::to_vec(&value).unwrap();
        assert!(matches!(
            SignedManifest::parse(raw),
            Err(RegistryError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn layers_and_history_must_agree() {
        let mut manifest = manifest();
        manifest.history.pop();
        let raw = manifest.sign_with("ES256", |_| vec![1]).unwrap();
        assert!(matches!(
            SignedManifest::parse(raw),
            Err(RegistryError::ManifestInvalid(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            SignedManifest::parse(&b"not json"[..]),
            Err(RegistryError::ManifestInvalid(_))
        ));
    }
}
