use async_trait::async_trait;
use schemaflow_utils::{Row, SchemaflowResult};

use crate::schema::types::{ColumnDef, TableKind};

/// The relational store that holds user tables.
///
/// Callers only ever hand it rows that are already coerced; it never sees raw
/// source documents.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    async fn create_table(&self, name: &str, kind: TableKind, columns: &[ColumnDef]) -> SchemaflowResult<()>;

    async fn list_tables(&self) -> SchemaflowResult<Vec<String>>;

    async fn get_columns(&self, name: &str) -> SchemaflowResult<Vec<ColumnDef>>;

    /// Insert a batch; returns the number of rows written.
    async fn insert_rows(&self, name: &str, rows: Vec<Row>) -> SchemaflowResult<u64>;

    async fn delete_table(&self, name: &str) -> SchemaflowResult<()>;

    /// Rows in insertion order, at most `limit` of them.
    async fn query(&self, name: &str, limit: Option<usize>) -> SchemaflowResult<Vec<Row>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaflow_utils::SqlValue;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingDestination {
        count: AtomicU64,
    }

    #[async_trait]
    impl Destination for CountingDestination {
        fn name(&self) -> &str {
            "counter"
        }
        async fn create_table(&self, _: &str, _: TableKind, _: &[ColumnDef]) -> SchemaflowResult<()> {
            Ok(())
        }
        async fn list_tables(&self) -> SchemaflowResult<Vec<String>> {
            Ok(vec![])
        }
        async fn get_columns(&self, _: &str) -> SchemaflowResult<Vec<ColumnDef>> {
            Ok(vec![])
        }
        async fn insert_rows(&self, _: &str, rows: Vec<Row>) -> SchemaflowResult<u64> {
            let n = rows.len() as u64;
            self.count.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
        async fn delete_table(&self, _: &str) -> SchemaflowResult<()> {
            Ok(())
        }
        async fn query(&self, _: &str, _: Option<usize>) -> SchemaflowResult<Vec<Row>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn destination_trait_counts_rows() {
        let dest = CountingDestination { count: AtomicU64::new(0) };
        let rows: Vec<Row> = (0..3)
            .map(|i| [("n".to_string(), SqlValue::Integer(i))].into_iter().collect())
            .collect();

        assert_eq!(dest.insert_rows("t", rows).await.unwrap(), 3);
        assert_eq!(dest.count.load(Ordering::SeqCst), 3);
        assert_eq!(dest.name(), "counter");
    }
}
