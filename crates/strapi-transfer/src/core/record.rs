//! Records moved through the pipeline, one type per stage.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use super::stage::TransferStage;

/// Content-type schema, keyed by uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Content-type uid, e.g. `api::article.article`.
    pub uid: String,

    /// Everything else of the definition (attributes, options, info, ...).
    #[serde(flatten)]
    pub definition: Map<String, Value>,
}

impl Schema {
    /// The definition as a JSON object, uid excluded.
    pub fn definition_value(&self) -> Value {
        Value::Object(self.definition.clone())
    }
}

/// Schemas keyed by uid.
pub type SchemaMap = BTreeMap<String, Schema>;

/// One content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Content-type uid.
    #[serde(rename = "type")]
    pub content_type: String,

    pub id: i64,

    /// Attribute values.
    pub data: Value,
}

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSide {
    #[serde(rename = "type")]
    pub content_type: String,

    #[serde(rename = "ref")]
    pub reference: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<f64>,
}

/// A relation between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Relation kind (`relation.basic`, `relation.morph`, ...).
    pub kind: String,

    /// Cardinality (`oneToMany`, `manyToMany`, ...).
    pub relation: String,

    pub left: LinkSide,

    pub right: LinkSide,
}

/// Kind of configuration item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigurationKind {
    #[serde(rename = "core-store")]
    CoreStore,
    #[serde(rename = "webhook")]
    Webhook,
}

impl ConfigurationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigurationKind::CoreStore => "core-store",
            ConfigurationKind::Webhook => "webhook",
        }
    }
}

/// Instance configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    #[serde(rename = "type")]
    pub kind: ConfigurationKind,

    pub value: Value,
}

/// File statistics of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AssetStats {
    pub size: u64,
}

/// An uploaded media file together with its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub filename: String,

    /// Path of the file relative to the uploads directory of its instance.
    pub filepath: String,

    pub stats: AssetStats,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// File contents. Carried out-of-band by every wire format.
    #[serde(skip)]
    pub data: Bytes,
}

/// Any record moved by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRecord {
    Schema(Schema),
    Entity(Entity),
    Link(Link),
    Configuration(ConfigurationItem),
    Asset(Asset),
}

impl StageRecord {
    /// Stage this record belongs to.
    pub fn stage(&self) -> TransferStage {
        match self {
            StageRecord::Schema(_) => TransferStage::Schemas,
            StageRecord::Entity(_) => TransferStage::Entities,
            StageRecord::Link(_) => TransferStage::Links,
            StageRecord::Configuration(_) => TransferStage::Configuration,
            StageRecord::Asset(_) => TransferStage::Media,
        }
    }

    /// Size used for progress accounting: the asset file size, or the
    /// length of the serialized JSON for everything else.
    pub fn size(&self) -> u64 {
        let json_len = |v: serde_json::Result<Vec<u8>>| v.map(|b| b.len() as u64).unwrap_or(0);
        match self {
            StageRecord::Schema(s) => json_len(serde_json::to_vec(s)),
            StageRecord::Entity(e) => json_len(serde_json::to_vec(e)),
            StageRecord::Link(l) => json_len(serde_json::to_vec(l)),
            StageRecord::Configuration(c) => json_len(serde_json::to_vec(c)),
            StageRecord::Asset(a) => a.stats.size,
        }
    }

    /// Aggregate subkey used in stage results.
    pub fn aggregate_key(&self) -> Option<String> {
        match self {
            StageRecord::Schema(_) => None,
            StageRecord::Entity(e) => Some(e.content_type.clone()),
            StageRecord::Link(l) => Some(format!(
                "{} -> {}",
                l.left.content_type, l.right.content_type
            )),
            StageRecord::Configuration(c) => Some(c.kind.as_str().to_string()),
            StageRecord::Asset(a) => Some(
                Path::new(&a.filename)
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_else(|| "No extension".to_string()),
            ),
        }
    }

    /// Serialize the JSON part of the record (asset bytes excluded).
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            StageRecord::Schema(s) => serde_json::to_value(s),
            StageRecord::Entity(e) => serde_json::to_value(e),
            StageRecord::Link(l) => serde_json::to_value(l),
            StageRecord::Configuration(c) => serde_json::to_value(c),
            StageRecord::Asset(a) => serde_json::to_value(a),
        }
    }

    /// Parse a record of the given stage from its JSON form.
    pub fn from_json(stage: TransferStage, value: Value) -> serde_json::Result<Self> {
        Ok(match stage {
            TransferStage::Schemas => StageRecord::Schema(serde_json::from_value(value)?),
            TransferStage::Entities => StageRecord::Entity(serde_json::from_value(value)?),
            TransferStage::Links => StageRecord::Link(serde_json::from_value(value)?),
            TransferStage::Configuration => {
                StageRecord::Configuration(serde_json::from_value(value)?)
            }
            TransferStage::Media => StageRecord::Asset(serde_json::from_value(value)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(left: &str, right: &str) -> Link {
        Link {
            kind: "relation.basic".into(),
            relation: "manyToOne".into(),
            left: LinkSide {
                content_type: left.into(),
                reference: 1,
                field: Some("author".into()),
                pos: None,
            },
            right: LinkSide {
                content_type: right.into(),
                reference: 2,
                field: None,
                pos: None,
            },
        }
    }

    #[test]
    fn test_entity_wire_names() {
        let entity: Entity =
            serde_json::from_value(json!({"type": "api::a.a", "id": 3, "data": {"title": "x"}}))
                .unwrap();
        assert_eq!(entity.content_type, "api::a.a");
        assert_eq!(entity.id, 3);
    }

    #[test]
    fn test_schema_flattens_definition() {
        let schema: Schema = serde_json::from_value(json!({
            "uid": "api::a.a",
            "modelType": "contentType",
            "attributes": {"title": {"type": "string"}}
        }))
        .unwrap();
        assert_eq!(schema.uid, "api::a.a");
        assert!(schema.definition.contains_key("attributes"));
        assert!(!schema.definition.contains_key("uid"));
    }

    #[test]
    fn test_aggregate_keys() {
        let rec = StageRecord::Link(link("api::a.a", "api::b.b"));
        assert_eq!(rec.aggregate_key().unwrap(), "api::a.a -> api::b.b");

        let asset = |name: &str| {
            StageRecord::Asset(Asset {
                filename: name.into(),
                filepath: name.into(),
                stats: AssetStats { size: 12 },
                metadata: None,
                data: Bytes::new(),
            })
        };
        assert_eq!(asset("cat.png").aggregate_key().unwrap(), ".png");
        assert_eq!(asset("README").aggregate_key().unwrap(), "No extension");
        assert_eq!(asset("cat.png").size(), 12);
    }

    #[test]
    fn test_configuration_kind_serde() {
        let item: ConfigurationItem =
            serde_json::from_value(json!({"type": "core-store", "value": {"key": "k"}})).unwrap();
        assert_eq!(item.kind, ConfigurationKind::CoreStore);
    }
}
