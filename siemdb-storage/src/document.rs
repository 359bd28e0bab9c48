use serde_json::Value;

pub type DocFields = serde_json::Map<String, Value>;

/// A document: an `_id` plus a field map. Field values keep their JSON type,
/// so a nested object inserted by a client comes back as a nested object,
/// not a re-escaped string.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: DocFields,
}

impl Document {
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("_id".to_string(), Value::String(self.id.clone()));
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_value_embeds_id_alongside_fields() {
        let mut fields = DocFields::new();
        fields.insert("name".to_string(), json!("alice"));
        let doc = Document { id: "doc_1".to_string(), fields };
        let v = doc.to_value();
        assert_eq!(v["_id"], json!("doc_1"));
        assert_eq!(v["name"], json!("alice"));
    }
}
