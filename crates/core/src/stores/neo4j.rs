use crate::error::StorageError;
use crate::graph::GraphStatement;
use crate::traits::GraphStore;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Statements sent per transactional request.
const STATEMENTS_PER_REQUEST: usize = 200;

pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    async fn commit(&self, statements: &[GraphStatement]) -> Result<(), StorageError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&statements_payload(statements))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::backend("neo4j", response.status().to_string()));
        }

        let body: Value = response.json().await?;
        if let Some(message) = first_error(&body) {
            return Err(StorageError::backend("neo4j", message));
        }
        debug!(statements = statements.len(), "neo4j transaction committed");
        Ok(())
    }
}

fn statements_payload(statements: &[GraphStatement]) -> Value {
    let statements: Vec<Value> = statements
        .iter()
        .map(|statement| {
            let (cypher, parameters) = statement.to_cypher();
            json!({ "statement": cypher, "parameters": parameters })
        })
        .collect();
    json!({ "statements": statements })
}

/// The tx endpoint answers 200 even when a statement fails; failures are
/// listed under `errors`.
fn first_error(payload: &Value) -> Option<String> {
    let error = payload.pointer("/errors/0")?;
    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(format!("{code}: {message}"))
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn run(&self, statement: &GraphStatement) -> Result<(), StorageError> {
        self.commit(std::slice::from_ref(statement)).await
    }

    async fn run_all(&self, statements: &[GraphStatement]) -> Result<(), StorageError> {
        for batch in statements.chunks(STATEMENTS_PER_REQUEST) {
            self.commit(batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeRef;

    #[test]
    fn payload_carries_one_entry_per_statement() {
        let rfp = NodeRef::new("Rfp", [("name", json!("Montana RFP 25"))]);
        let document = NodeRef::new("Document", [("name", json!("Montana-RFP"))]);
        let payload = statements_payload(&[
            GraphStatement::node(rfp.clone()),
            GraphStatement::edge(&rfp, "HAS_DOCUMENT", &document),
        ]);

        let statements = payload["statements"].as_array().map(Vec::len);
        assert_eq!(statements, Some(2));
        assert_eq!(payload["statements"][0]["statement"], "MERGE (n:Rfp {name: $k_name})");
        assert_eq!(payload["statements"][0]["parameters"]["k_name"], "Montana RFP 25");
        assert_eq!(payload["statements"][1]["parameters"]["b_name"], "Montana-RFP");
    }

    #[test]
    fn errors_in_a_successful_response_are_detected() {
        let ok = json!({"results": [{"columns": [], "data": []}], "errors": []});
        assert_eq!(first_error(&ok), None);

        let failed = json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "bad"}]
        });
        assert_eq!(
            first_error(&failed).as_deref(),
            Some("Neo.ClientError.Statement.SyntaxError: bad")
        );
    }

    #[test]
    fn tx_url_targets_the_database() {
        let store = Neo4jStore::new("http://localhost:7474/", "neo4j", "neo4j", "secret");
        assert_eq!(store.tx_url(), "http://localhost:7474/db/neo4j/tx/commit");
    }
}
