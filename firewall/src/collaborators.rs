//! Interfaces the revocation core consumes from the SPA server side:
//! the authorization decision and the client public key lookup.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::descriptor::ConnectionDescriptor;
use crate::error::FirewallError;

const PUBLIC_KEY_EXTENSION: &str = "pub";

/// Decides how long a requested connection may stay open.
pub trait AuthorizationPolicy: Send + Sync {
    /// Zero means unauthorized.
    fn authorized_duration(&self, request: &ConnectionDescriptor) -> Duration;
}

/// Grants every request the same duration.
#[derive(Debug, Clone)]
pub struct FixedDurationPolicy {
    duration: Duration,
}

impl FixedDurationPolicy {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for FixedDurationPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3 * 60))
    }
}

impl AuthorizationPolicy for FixedDurationPolicy {
    fn authorized_duration(&self, _request: &ConnectionDescriptor) -> Duration {
        self.duration
    }
}

/// Finds a client's public key by device id.
pub trait PublicKeyLookup: Send + Sync {
    /// `Ok(None)` when the device has no key on record.
    fn public_key(&self, client_device_id: &str) -> Result<Option<String>, FirewallError>;
}

/// Keys stored as `<dir>/<device-uuid>.pub`
#[derive(Debug, Clone)]
pub struct PublicKeyDirectory {
    dir: PathBuf,
}

impl PublicKeyDirectory {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl PublicKeyLookup for PublicKeyDirectory {
    fn public_key(&self, client_device_id: &str) -> Result<Option<String>, FirewallError> {
        // Parsing as a UUID also keeps path separators out of the file name
        let id = Uuid::parse_str(client_device_id.trim())
            .map_err(|_| FirewallError::InvalidDeviceId(client_device_id.to_string()))?;

        let path = self
            .dir
            .join(format!("{}.{PUBLIC_KEY_EXTENSION}", id.hyphenated()));
        match fs::read_to_string(&path) {
            Ok(key) => Ok(Some(key)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("Device {id} does not have a public key in {}", self.dir.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
