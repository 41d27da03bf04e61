//! Encoding of registered instances at the coordination service.
//!
//! Each instance is an ephemeral sequential child of the service namespace,
//! e.g. `/services/api/instance-0000000007`, holding `{"host": .., "port": ..}`.
//! The sequence suffix is the instance id and its ring node key.

use corelib::{InstanceId, ServiceInstance};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Payload stored at an instance's registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePayload {
    pub host: String,
    pub port: u16,
}

pub fn encode_payload(host: &str, port: u16) -> Result<Vec<u8>> {
    let payload = InstancePayload {
        host: host.to_string(),
        port,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Parses the instance id from the trailing `-<sequence>` of a registry path.
pub fn instance_id_from_path(path: &str) -> Result<InstanceId> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, sequence) = name
        .rsplit_once('-')
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
    if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(sequence.parse()?)
}

/// Builds the instance registered at `path` from its stored payload.
pub fn decode_instance(path: &str, data: &[u8]) -> Result<ServiceInstance> {
    let id = instance_id_from_path(path)?;
    let payload: InstancePayload = serde_json::from_slice(data)?;
    Ok(ServiceInstance::new(id, payload.host, payload.port))
}
