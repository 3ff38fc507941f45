//! Messages exchanged with a remote instance.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::{StageRecord, TransferStage};
use crate::error::{Result, TransferError};
use crate::strategy::{ConflictStrategy, RestoreConfiguration};

/// Direction of a remote transfer, seen from the remote instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// The remote instance receives data.
    Push,
    /// The remote instance sends data.
    Pull,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Push => "push",
            TransferKind::Pull => "pull",
        }
    }
}

/// Options sent when a push transfer is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushOptions {
    pub strategy: ConflictStrategy,
    pub restore: RestoreConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub transfer: TransferKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PushOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReply {
    #[serde(rename = "transferID")]
    pub transfer_id: String,
}

/// Provider-level actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Bootstrap,
    GetMetadata,
    GetSchemas,
    BeforeTransfer,
    End,
}

/// Per-stage steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Start,
    /// Push a batch of records.
    Stream,
    /// Pull the next batch of records.
    Pull,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Action {
        action: Action,
    },
    Transfer {
        step: Step,
        stage: TransferStage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<u64>,
    },
}

/// One request. The `uuid` is kept across retries so the remote side can
/// recognize a replayed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub uuid: Uuid,

    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn action(action: Action) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            body: MessageBody::Action { action },
        }
    }

    pub fn step(step: Step, stage: TransferStage) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            body: MessageBody::Transfer {
                step,
                stage,
                data: None,
                cursor: None,
            },
        }
    }

    pub fn stream(stage: TransferStage, batch: Vec<Value>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            body: MessageBody::Transfer {
                step: Step::Stream,
                stage,
                data: Some(batch),
                cursor: None,
            },
        }
    }

    pub fn pull(stage: TransferStage, cursor: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            body: MessageBody::Transfer {
                step: Step::Pull,
                stage,
                data: None,
                cursor: Some(cursor),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Envelope of every reply.
#[derive(Debug, Clone, Deserialize)]
pub struct Reply<T> {
    pub data: Option<T>,

    #[serde(default)]
    pub error: Option<ErrorBody>,
}

/// Reply to a `start` step. A destination may decline the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReply {
    #[serde(default = "accepted_default")]
    pub accepted: bool,
}

fn accepted_default() -> bool {
    true
}

/// One pulled batch. `next` is `None` once the stage is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullBatch {
    #[serde(default)]
    pub records: Vec<Value>,

    #[serde(default)]
    pub next: Option<u64>,
}

/// JSON form of a record, asset bytes inlined as base64.
pub fn encode_record(record: &StageRecord) -> Result<Value> {
    let mut value = record.to_json()?;
    if let (StageRecord::Asset(asset), Value::Object(map)) = (record, &mut value) {
        map.insert("data".into(), Value::String(STANDARD.encode(&asset.data)));
    }
    Ok(value)
}

/// Inverse of [`encode_record`].
pub fn decode_record(stage: TransferStage, mut value: Value) -> Result<StageRecord> {
    let data = match (stage, &mut value) {
        (TransferStage::Media, Value::Object(map)) => match map.remove("data") {
            Some(Value::String(encoded)) => Some(STANDARD.decode(encoded).map_err(|e| {
                TransferError::stage_integrity(stage, format!("invalid asset payload: {}", e))
            })?),
            _ => None,
        },
        _ => None,
    };
    let mut record = StageRecord::from_json(stage, value)
        .map_err(|e| TransferError::stage_integrity(stage, e.to_string()))?;
    if let (StageRecord::Asset(asset), Some(data)) = (&mut record, data) {
        asset.stats.size = data.len() as u64;
        asset.data = Bytes::from(data);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Asset, AssetStats};
    use serde_json::json;

    #[test]
    fn test_action_message_shape() {
        let message = Message::action(Action::GetMetadata);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["action"], "getMetadata");
        assert!(value["uuid"].is_string());
    }

    #[test]
    fn test_stream_message_shape() {
        let message = Message::stream(TransferStage::Entities, vec![json!({"id": 1})]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "transfer");
        assert_eq!(value["step"], "stream");
        assert_eq!(value["stage"], "entities");
        assert_eq!(value["data"], json!([{"id": 1}]));
        assert!(value.get("cursor").is_none());
    }

    #[test]
    fn test_asset_payload_is_base64() {
        let record = StageRecord::Asset(Asset {
            filename: "a.bin".into(),
            filepath: "/uploads/a.bin".into(),
            stats: AssetStats { size: 3 },
            metadata: None,
            data: Bytes::from_static(&[0, 159, 255]),
        });
        let value = encode_record(&record).unwrap();
        assert_eq!(value["data"], "AJ//");
        assert_eq!(decode_record(TransferStage::Media, value).unwrap(), record);
    }

    #[test]
    fn test_invalid_asset_payload() {
        let value = json!({"filename": "a", "filepath": "a", "stats": {"size": 1}, "data": "%%"});
        let err = decode_record(TransferStage::Media, value).unwrap_err();
        assert!(matches!(err, TransferError::StageIntegrity { .. }));
    }

    fn parse_reply<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Reply<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_reply_without_data() {
        let reply: Reply<PullBatch> = parse_reply(json!({"error": {"message": "denied"}}));
        assert!(reply.data.is_none());
        assert_eq!(reply.error.unwrap().message, "denied");

        let empty: Reply<StartReply> = parse_reply(json!({}));
        assert!(empty.data.is_none() && empty.error.is_none());
    }

    #[test]
    fn test_start_reply_defaults_to_accepted() {
        let reply: StartReply = serde_json::from_value(json!({})).unwrap();
        assert!(reply.accepted);
    }
}
