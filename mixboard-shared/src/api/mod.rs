use serde::{Deserialize, Serialize};

use crate::domain::{Mix, MixMetadata, Stage};

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

/// SSE event names used by the mix stream.
pub const EVENT_SNAPSHOT: &str = "snapshot";
pub const EVENT_MIX: &str = "mix";
pub const EVENT_ERROR: &str = "error";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupReq {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Mixes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMixReq {
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub metadata: MixMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateFromTemplateReq {
    pub template_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdvanceReq {
    /// Stage index the caller saw when deciding to advance.
    pub from_index: usize,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateMixReq {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stages: Option<Vec<Stage>>,
    #[serde(default)]
    pub metadata: Option<MixMetadata>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MixListQuery {
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub mix_id: Option<String>,
}

// Templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateReq {
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub metadata: MixMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveAsTemplateReq {
    pub template_name: String,
}

/// Payload of the `error` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
}

/// Decoded mix stream event.
#[derive(Debug, Clone)]
pub enum MixStreamEvent {
    Snapshot(Vec<Mix>),
    Mix(Option<Mix>),
    Error(StreamError),
}

impl MixStreamEvent {
    /// Decodes an SSE frame by event name. Unknown names yield `Ok(None)`.
    pub fn decode(event: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        Ok(match event {
            EVENT_SNAPSHOT => Some(Self::Snapshot(serde_json::from_str(data)?)),
            EVENT_MIX => Some(Self::Mix(serde_json::from_str(data)?)),
            EVENT_ERROR => Some(Self::Error(serde_json::from_str(data)?)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stream_frames() {
        let ev = MixStreamEvent::decode(EVENT_SNAPSHOT, "[]").unwrap();
        assert!(matches!(ev, Some(MixStreamEvent::Snapshot(v)) if v.is_empty()));
        let ev = MixStreamEvent::decode(EVENT_MIX, "null").unwrap();
        assert!(matches!(ev, Some(MixStreamEvent::Mix(None))));
        let ev = MixStreamEvent::decode(EVENT_ERROR, r#"{"message":"boom"}"#).unwrap();
        assert!(matches!(ev, Some(MixStreamEvent::Error(e)) if e.message == "boom"));
        assert!(MixStreamEvent::decode("keepalive", "").unwrap().is_none());
        assert!(MixStreamEvent::decode(EVENT_SNAPSHOT, "{").is_err());
    }

    #[test]
    fn update_request_fields_default_to_none() {
        let req: UpdateMixReq = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_none() && req.stages.is_none() && req.metadata.is_none());
    }
}
