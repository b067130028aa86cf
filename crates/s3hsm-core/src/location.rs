//! Self-describing object locations.
//!
//! A location is the only state kept for a stored object. It names the
//! backend bucket and object key and, for encrypted objects, carries the
//! cipher tag and the raw key:
//!
//! ```text
//! <scheme>://<authority>/<path>[?etype=<alg>&ekey=<hexkey>]
//! ```
//!
//! Anyone holding a location can decrypt the object, so it is treated as a
//! secret: `Debug` output redacts the key.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroize;

use crate::error::{HsmError, HsmResult};
use crate::types::CipherKind;

/// Query parameter holding the cipher tag.
pub const PARAM_ETYPE: &str = "etype";
/// Query parameter holding the hex-encoded raw key.
pub const PARAM_EKEY: &str = "ekey";
/// Query parameter written by the first generation of the tool: the raw
/// 24-character AES-192 key, unencoded.
pub const PARAM_LEGACY_ENC: &str = "enc";

/// Characters escaped inside a path segment. `/` is kept as the separator.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Cipher metadata carried in a location: which cipher, and its raw key.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherSpec {
    kind: CipherKind,
    key: Vec<u8>,
}

impl CipherSpec {
    pub fn new(kind: CipherKind, key: Vec<u8>) -> Self {
        Self { kind, key }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for CipherSpec {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSpec")
            .field("kind", &self.kind)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// A parsed or freshly built object location.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    scheme: String,
    authority: String,
    path: String,
    cipher: Option<CipherSpec>,
}

impl ObjectLocation {
    /// Build a location, validating every part so that [`ObjectLocation::encode`]
    /// and [`ObjectLocation::decode`] stay lossless.
    ///
    /// The scheme is lowercased; a leading `/` on `path` is ignored.
    pub fn new(
        scheme: &str,
        authority: &str,
        path: &str,
        cipher: Option<CipherSpec>,
    ) -> HsmResult<Self> {
        let scheme = scheme.to_ascii_lowercase();
        validate_scheme(&scheme)?;
        validate_authority(authority)?;
        let path = path.strip_prefix('/').unwrap_or(path);
        validate_path(path)?;

        Ok(Self {
            scheme,
            authority: authority.to_string(),
            path: path.to_string(),
            cipher,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Object path without its leading separator.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cipher(&self) -> Option<&CipherSpec> {
        self.cipher.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Render the location string.
    pub fn encode(&self) -> String {
        let path = self
            .path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");

        let mut out = format!("{}://{}/{}", self.scheme, self.authority, path);
        if let Some(cipher) = &self.cipher {
            out.push_str(&format!(
                "?{PARAM_ETYPE}={}&{PARAM_EKEY}={}",
                cipher.kind.tag(),
                hex::encode(&cipher.key)
            ));
        }
        out
    }

    /// Parse a location string.
    pub fn decode(s: &str) -> HsmResult<Self> {
        if s.chars().any(|c| c.is_ascii_control()) {
            return Err(HsmError::MalformedLocation(format!(
                "{s:?}: control characters are not allowed in a location"
            )));
        }
        // Url::parse resolves `.`/`..` segments, including escaped ones, so
        // they must be caught before it sees them.
        for segment in raw_path(s).split('/') {
            let segment = percent_decode_str(segment).decode_utf8_lossy();
            if segment == "." || segment == ".." {
                return Err(HsmError::MalformedLocation(format!(
                    "{s}: '.' and '..' segments are not allowed"
                )));
            }
        }

        let url = Url::parse(s).map_err(|e| HsmError::MalformedLocation(format!("{s}: {e}")))?;

        if url.cannot_be_a_base() {
            return Err(HsmError::MalformedLocation(format!(
                "{s}: expected <scheme>://<bucket>/<object>"
            )));
        }
        if !url.username().is_empty() || url.password().is_some() || url.port().is_some() {
            return Err(HsmError::MalformedLocation(format!(
                "{s}: credentials or port are not allowed in a location"
            )));
        }
        if url.fragment().is_some() {
            return Err(HsmError::MalformedLocation(format!(
                "{s}: fragments are not allowed in a location"
            )));
        }

        let authority = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| HsmError::MalformedLocation(format!("{s}: missing bucket")))?;

        let path = percent_decode_str(url.path())
            .decode_utf8()
            .map_err(|e| HsmError::MalformedLocation(format!("{s}: path is not UTF-8: {e}")))?;

        let cipher = decode_cipher(&url)?;

        Self::new(url.scheme(), authority, &path, cipher)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLocation")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("path", &self.path)
            .field("cipher", &self.cipher)
            .finish()
    }
}

impl FromStr for ObjectLocation {
    type Err = HsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn decode_cipher(url: &Url) -> HsmResult<Option<CipherSpec>> {
    let mut etype = None;
    let mut ekey = None;
    let mut legacy = None;

    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            PARAM_ETYPE if etype.is_none() => etype = Some(value.into_owned()),
            PARAM_EKEY if ekey.is_none() => ekey = Some(value.into_owned()),
            PARAM_LEGACY_ENC if legacy.is_none() => legacy = Some(value.into_owned()),
            other => tracing::debug!(param = other, "ignoring location query parameter"),
        }
    }

    match (etype, ekey) {
        (Some(etype), Some(ekey)) => {
            let kind = CipherKind::from_tag(&etype)?;
            let key = hex::decode(&ekey)
                .map_err(|e| HsmError::BadKeyEncoding(format!("{PARAM_EKEY}: {e}")))?;
            Ok(Some(CipherSpec::new(kind, key)))
        }
        (Some(etype), None) => {
            // Report an unknown cipher first; it is the more useful message.
            CipherKind::from_tag(&etype)?;
            Err(HsmError::MalformedLocation(format!(
                "{PARAM_ETYPE} present without {PARAM_EKEY}"
            )))
        }
        (None, Some(_)) => Err(HsmError::MalformedLocation(format!(
            "{PARAM_EKEY} present without {PARAM_ETYPE}"
        ))),
        (None, None) => match legacy {
            Some(raw) => {
                let kind = CipherKind::Aes192Ofb;
                if raw.len() != kind.key_len() {
                    return Err(HsmError::BadKeyEncoding(format!(
                        "{PARAM_LEGACY_ENC}: expected {} characters, got {}",
                        kind.key_len(),
                        raw.len()
                    )));
                }
                Ok(Some(CipherSpec::new(kind, raw.into_bytes())))
            }
            None => Ok(None),
        },
    }
}

/// The path of `s` exactly as written, before any URL normalisation.
fn raw_path(s: &str) -> &str {
    let rest = s.split_once("://").map_or("", |(_, rest)| rest);
    let rest = &rest[..rest.find(['?', '#']).unwrap_or(rest.len())];
    rest.find('/').map_or("", |start| &rest[start..])
}

/// Schemes the URL standard gives host and path rules of their own.
const SPECIAL_SCHEMES: [&str; 6] = ["http", "https", "ws", "wss", "ftp", "file"];

fn validate_scheme(scheme: &str) -> HsmResult<()> {
    if SPECIAL_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
        return Err(HsmError::MalformedLocation(format!(
            "scheme '{scheme}' cannot be used for a location"
        )));
    }
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(HsmError::MalformedLocation(format!("invalid scheme '{scheme}'")))
    }
}

fn validate_authority(authority: &str) -> HsmResult<()> {
    let valid = !authority.is_empty()
        && authority
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
    if valid {
        Ok(())
    } else {
        Err(HsmError::MalformedLocation(format!(
            "invalid bucket or instance name '{authority}'"
        )))
    }
}

fn validate_path(path: &str) -> HsmResult<()> {
    if path.is_empty() {
        return Err(HsmError::MalformedLocation("empty object path".into()));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(HsmError::MalformedLocation(format!(
                "invalid object path '{path}': empty, '.' or '..' segment"
            )));
        }
    }
    Ok(())
}

/// Backend coordinates an object lives at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAddress {
    pub bucket: String,
    pub key: String,
}

/// How the bucket and object key are laid out inside a location.
///
/// Two conventions exist in deployed locations, so both are kept and picked
/// per deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationLayout {
    /// `s3://<bucket>/<key>`: the authority is the bucket.
    #[default]
    HostBucket,
    /// `s3://<instance>/<bucket>/<key>`: the authority names the HSM
    /// instance, the last path segment is the key and the parent is the bucket.
    ParentDir,
}

impl LocationLayout {
    /// Build the location for `bucket/key`.
    ///
    /// `instance` is only used by [`LocationLayout::ParentDir`].
    pub fn locate(
        &self,
        scheme: &str,
        instance: &str,
        bucket: &str,
        key: &str,
        cipher: Option<CipherSpec>,
    ) -> HsmResult<ObjectLocation> {
        match self {
            LocationLayout::HostBucket => ObjectLocation::new(scheme, bucket, key, cipher),
            LocationLayout::ParentDir => {
                if bucket.is_empty() || bucket.contains('/') {
                    return Err(HsmError::MalformedLocation(format!(
                        "invalid bucket '{bucket}' for parent-dir layout"
                    )));
                }
                if key.contains('/') {
                    return Err(HsmError::MalformedLocation(format!(
                        "object key '{key}' must not contain '/' in parent-dir layout"
                    )));
                }
                ObjectLocation::new(scheme, instance, &format!("{bucket}/{key}"), cipher)
            }
        }
    }

    /// Map a location back to the bucket and key it names.
    pub fn resolve(&self, location: &ObjectLocation) -> HsmResult<ObjectAddress> {
        match self {
            LocationLayout::HostBucket => Ok(ObjectAddress {
                bucket: location.authority().to_string(),
                key: location.path().to_string(),
            }),
            LocationLayout::ParentDir => {
                let (bucket, key) = location.path().rsplit_once('/').ok_or_else(|| {
                    HsmError::MalformedLocation(format!(
                        "{}: parent-dir layout expects <instance>/<bucket>/<key>",
                        location.path()
                    ))
                })?;
                Ok(ObjectAddress {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
        }
    }
}
