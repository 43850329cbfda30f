use async_trait::async_trait;
use serde_json::Value;
use schemaflow_utils::SchemaflowResult;

/// Where refresh documents come from.
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Fetch and parse the JSON document at `url`.
    async fn fetch(&self, url: &str) -> SchemaflowResult<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FixtureSource {
        documents: HashMap<String, Value>,
    }

    #[async_trait]
    impl Source for FixtureSource {
        fn name(&self) -> &str {
            "fixture"
        }
        async fn fetch(&self, url: &str) -> SchemaflowResult<Value> {
            self.documents
                .get(url)
                .cloned()
                .ok_or_else(|| schemaflow_utils::error::Error::UpstreamStatus { status: 404, body: url.to_string() })
        }
    }

    #[tokio::test]
    async fn source_trait_objects_fetch_documents() {
        let mut documents = HashMap::new();
        documents.insert("mem://weather".to_string(), json!({"hourly": {"time": []}}));
        let source: Box<dyn Source> = Box::new(FixtureSource { documents });

        assert_eq!(source.name(), "fixture");
        assert_eq!(source.fetch("mem://weather").await.unwrap()["hourly"]["time"], json!([]));
        assert!(source.fetch("mem://missing").await.is_err());
    }
}
