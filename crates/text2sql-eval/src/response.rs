use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use text2sql_contracts::{FIELD_DB_PATH, FIELD_ERROR, FIELD_GENERATED, FIELD_GOLD_SQL, FIELD_QUESTION};

use crate::metric::Metric;
use crate::score::ItemScore;

/// One model response to evaluate. Unknown keys are carried through to the predictions file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(rename = "generated")]
    pub generated_sql: String,
    #[serde(rename = "SQL")]
    pub gold_sql: String,
    pub db_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseRecord {
    pub fn new(
        generated_sql: impl Into<String>,
        gold_sql: impl Into<String>,
        db_path: impl Into<String>,
    ) -> Self {
        Self {
            question: None,
            generated_sql: generated_sql.into(),
            gold_sql: gold_sql.into(),
            db_path: db_path.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        match value.into() {
            Value::String(q) if key == FIELD_QUESTION => self.question = Some(q),
            value => {
                self.extra.insert(key, value);
            }
        }
        self
    }

    /// Looks up a record field by its on-disk key.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            FIELD_QUESTION => self.question.clone().map(Value::String),
            FIELD_GENERATED => Some(Value::String(self.generated_sql.clone())),
            FIELD_GOLD_SQL => Some(Value::String(self.gold_sql.clone())),
            FIELD_DB_PATH => Some(Value::String(self.db_path.clone())),
            _ => self.extra.get(name).cloned(),
        }
    }

    /// Group label for `name`: strings as-is, other JSON values in their compact JSON form.
    pub fn group_key(&self, name: &str) -> Option<String> {
        self.field(name).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// A response with its metric value and error, serialized as the input record plus
/// `<metric>` and `error` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResponse {
    pub record: ResponseRecord,
    pub metric: Metric,
    pub value: f64,
    pub error: Option<String>,
}

impl ScoredResponse {
    pub fn new(record: ResponseRecord, metric: Metric, score: ItemScore) -> Self {
        Self {
            record,
            metric,
            value: score.value,
            error: score.error,
        }
    }
}

impl Serialize for ScoredResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let metric_key = self.metric.as_str();
        let mut map = serializer.serialize_map(None)?;
        if let Some(q) = &self.record.question {
            map.serialize_entry(FIELD_QUESTION, q)?;
        }
        map.serialize_entry(FIELD_GENERATED, &self.record.generated_sql)?;
        map.serialize_entry(FIELD_GOLD_SQL, &self.record.gold_sql)?;
        map.serialize_entry(FIELD_DB_PATH, &self.record.db_path)?;
        // Scores from an earlier run are replaced, not duplicated.
        for (k, v) in &self.record.extra {
            if k == metric_key || k == FIELD_ERROR {
                continue;
            }
            map.serialize_entry(k, v)?;
        }
        map.serialize_entry(metric_key, &self.value)?;
        map.serialize_entry(FIELD_ERROR, &self.error)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_keys_are_carried_through() {
        let raw = json!({
            "question": "how many?",
            "generated": "SELECT 1",
            "SQL": "SELECT 1",
            "db_path": "a.sqlite",
            "difficulty": "hard",
            "level": 3
        });
        let rec: ResponseRecord = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(rec.question.as_deref(), Some("how many?"));
        assert_eq!(rec.group_key("difficulty").as_deref(), Some("hard"));
        assert_eq!(rec.group_key("level").as_deref(), Some("3"));
        assert_eq!(rec.group_key("db_path").as_deref(), Some("a.sqlite"));
        assert_eq!(rec.group_key("missing"), None);
        assert_eq!(serde_json::to_value(&rec).unwrap(), raw);
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let raw = json!({"generated": "SELECT 1", "db_path": "a.sqlite"});
        assert!(serde_json::from_value::<ResponseRecord>(raw).is_err());
    }

    #[test]
    fn scored_response_adds_metric_and_error() {
        let rec = ResponseRecord::new("SELECT 2", "SELECT 1", "a.sqlite")
            .with_field("accuracy", 1)
            .with_field("error", "stale")
            .with_field("difficulty", "simple");
        let scored = ScoredResponse::new(
            rec,
            Metric::Accuracy,
            ItemScore {
                value: 0.0,
                error: Some("Table mismatch".into()),
            },
        );
        let text = serde_json::to_string(&scored).unwrap();
        assert_eq!(text.matches("\"accuracy\"").count(), 1);
        assert_eq!(text.matches("\"error\"").count(), 1);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["accuracy"], json!(0.0));
        assert_eq!(v["error"], json!("Table mismatch"));
        assert_eq!(v["difficulty"], json!("simple"));
        assert!(v.get("question").is_none());
    }
}
