//! Broadcast targeting engine
//!
//! Resolves a declarative target specification into a concrete set of
//! recipient uids against a consistent metadata snapshot. The design is
//! fail-closed: a malformed mode or a missing mode-required field resolves
//! to an empty set, never to "everyone".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::{BroadcastType, ClientType, MAX_PAYLOAD_SIZE};
use crate::registry::ClientMetadata;

/// A validated `broadcast` request body.
///
/// Unknown fields are rejected outright, both here and on the nested
/// target object; the base envelope is lenient but this sub-schema is not.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BroadcastRequest {
    pub broadcast_type: BroadcastType,
    pub target: TargetSpec,
    pub payload: Value,
}

/// Declarative recipient specification.
///
/// `mode` is kept as a raw string so an unrecognized mode falls through to
/// the fail-closed empty resolution instead of a schema error.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    pub mode: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub uuids: Option<Vec<String>>,
}

/// An immutable, server-validated fan-out message.
///
/// Sender identity is derived exclusively from the session that issued the
/// broadcast, never from client-supplied fields.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    pub broadcast_id: String,
    pub broadcast_type: BroadcastType,
    pub sender_uuid: Uuid,
    pub sender_name: String,
    pub sender_type: ClientType,
    pub target_uuids: Vec<Uuid>,
    pub payload: Value,
}

impl BroadcastEvent {
    /// Construct a broadcast event with a fresh unique id.
    pub fn new(
        broadcast_type: BroadcastType,
        sender_uuid: Uuid,
        sender_name: String,
        sender_type: ClientType,
        target_uuids: Vec<Uuid>,
        payload: Value,
    ) -> Self {
        Self {
            broadcast_id: format!("b-{}", Uuid::new_v4()),
            broadcast_type,
            sender_uuid,
            sender_name,
            sender_type,
            target_uuids,
            payload,
        }
    }
}

/// Serialized size of a broadcast payload in bytes.
pub fn payload_size(payload: &Value) -> usize {
    serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(usize::MAX)
}

/// True if the payload fits under the cap (exactly `MAX_PAYLOAD_SIZE`
/// bytes is still accepted).
pub fn payload_within_cap(payload: &Value) -> bool {
    payload_size(payload) <= MAX_PAYLOAD_SIZE
}

/// Resolve a target specification into a deduplicated recipient list.
///
/// Sender inclusion follows the mode: `all` always excludes the sender to
/// prevent self-echo; the other modes include the sender exactly when its
/// own identity matches the specification.
pub fn resolve_targets(
    spec: &TargetSpec,
    clients: &HashMap<Uuid, ClientMetadata>,
    sender: Uuid,
) -> Vec<Uuid> {
    match spec.mode.as_str() {
        "all" => clients.keys().copied().filter(|uid| *uid != sender).collect(),

        "type" => {
            let Some(value) = spec.value.as_deref().filter(|v| !v.is_empty()) else {
                tracing::warn!("Target mode 'type' requires 'value' field");
                return Vec::new();
            };
            clients
                .iter()
                .filter(|(_, meta)| meta.client_type.as_str() == value)
                .map(|(uid, _)| *uid)
                .collect()
        }

        "names" => {
            let Some(names) = spec.names.as_deref().filter(|n| !n.is_empty()) else {
                tracing::warn!("Target mode 'names' requires 'names' list");
                return Vec::new();
            };
            clients
                .iter()
                .filter(|(_, meta)| names.iter().any(|n| *n == meta.name))
                .map(|(uid, _)| *uid)
                .collect()
        }

        "uuids" => {
            let Some(uuids) = spec.uuids.as_deref().filter(|u| !u.is_empty()) else {
                tracing::warn!("Target mode 'uuids' requires 'uuids' list");
                return Vec::new();
            };
            // Unknown or unparseable ids are silently dropped; duplicates
            // collapse to a single delivery.
            let mut resolved = Vec::new();
            for raw in uuids {
                let Ok(uid) = raw.parse::<Uuid>() else { continue };
                if clients.contains_key(&uid) && !resolved.contains(&uid) {
                    resolved.push(uid);
                }
            }
            resolved
        }

        other => {
            tracing::warn!(mode = other, "Invalid target mode");
            Vec::new()
        }
    }
}
