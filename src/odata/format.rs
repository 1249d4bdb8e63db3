//! Entity response rendering (OData v2 JSON verbose format)

use serde_json::{json, Map, Value};

use super::entity::{Entity, EntityList, ID_PROPERTY};

pub trait FormatWriter: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// Render one entity. `entity_set_uri` is the absolute set URI.
    fn render_entity(&self, entity_set_uri: &str, entity: &Entity) -> String;

    fn render_entities(&self, entity_set_uri: &str, list: &EntityList) -> String;
}

/// `{"d":{"results":...}}` JSON writer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatWriter;

impl JsonFormatWriter {
    fn entity_value(entity_set_uri: &str, entity: &Entity) -> Value {
        let mut object = Map::new();
        object.insert(
            "__metadata".to_string(),
            json!({
                "uri": format!("{}('{}')", entity_set_uri, entity.id),
                "etag": format!("W/\"{}\"", entity.etag),
                "type": format!("UserData.{}", entity.entity_set),
            }),
        );
        object.insert(ID_PROPERTY.to_string(), Value::String(entity.id.clone()));
        object.insert(
            "__published".to_string(),
            Value::String(odata_date(entity.published.timestamp_millis())),
        );
        object.insert(
            "__updated".to_string(),
            Value::String(odata_date(entity.updated.timestamp_millis())),
        );
        for (name, value) in &entity.properties {
            object.insert(name.clone(), value.clone());
        }
        Value::Object(object)
    }
}

impl FormatWriter for JsonFormatWriter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render_entity(&self, entity_set_uri: &str, entity: &Entity) -> String {
        json!({"d": {"results": Self::entity_value(entity_set_uri, entity)}}).to_string()
    }

    fn render_entities(&self, entity_set_uri: &str, list: &EntityList) -> String {
        let results: Vec<Value> = list
            .entities
            .iter()
            .map(|e| Self::entity_value(entity_set_uri, e))
            .collect();

        let mut d = Map::new();
        d.insert("results".to_string(), Value::Array(results));
        if let Some(count) = list.count {
            d.insert("__count".to_string(), Value::String(count.to_string()));
        }
        json!({ "d": d }).to_string()
    }
}

fn odata_date(millis: i64) -> String {
    format!("/Date({})/", millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entity() -> Entity {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut properties = Map::new();
        properties.insert("amount".into(), json!(3));
        Entity {
            entity_set: "Sales".into(),
            id: "k1".into(),
            etag: "1-1700000000000".into(),
            properties,
            published: at,
            updated: at,
        }
    }

    #[test]
    fn test_render_entity() {
        let body = JsonFormatWriter.render_entity("http://u/c/b/col/Sales", &entity());
        let value: Value = serde_json::from_str(&body).unwrap();
        let results = &value["d"]["results"];
        assert_eq!(results["__id"], "k1");
        assert_eq!(results["amount"], 3);
        assert_eq!(results["__metadata"]["uri"], "http://u/c/b/col/Sales('k1')");
        assert_eq!(results["__metadata"]["etag"], "W/\"1-1700000000000\"");
        assert_eq!(results["__published"], "/Date(1700000000000)/");
    }

    #[test]
    fn test_render_entities_with_count() {
        let list = EntityList {
            entities: vec![entity(), entity()],
            count: Some(7),
        };
        let body = JsonFormatWriter.render_entities("http://u/Sales", &list);
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["d"]["results"].as_array().unwrap().len(), 2);
        assert_eq!(value["d"]["__count"], "7");
    }
}
