//! Workflow definitions in Postgres.
//!
//! The editor owns these tables; the engine only reads them.

use crate::db::{decode_error, store_error};
use async_trait::async_trait;
use nodeflow_core::{CredentialId, UserId, WorkflowId};
use nodeflow_workflow::{
    Connection, Node, NodeId, NodeType, StoreError, Workflow, WorkflowRepository,
};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    owner_id: String,
}

/// Row type for node queries.
#[derive(FromRow)]
struct NodeRow {
    id: String,
    node_type: String,
    data: serde_json::Value,
    credential_id: Option<String>,
}

impl NodeRow {
    fn try_into_node(self) -> Result<Node, sqlx::Error> {
        let node_type = NodeType::from_str(&self.node_type)
            .map_err(|e| decode_error("node type", &self.node_type, e))?;
        let credential_id = self
            .credential_id
            .map(|cid| {
                CredentialId::from_str(&cid).map_err(|e| decode_error("credential id", &cid, e))
            })
            .transpose()?;

        Ok(Node {
            id: NodeId::new(self.id),
            node_type,
            data: self.data,
            credential_id,
        })
    }
}

/// Row type for connection queries.
#[derive(FromRow)]
struct ConnectionRow {
    from_node_id: String,
    to_node_id: String,
    from_output: String,
    to_input: String,
}

impl From<ConnectionRow> for Connection {
    fn from(row: ConnectionRow) -> Self {
        Connection::new(row.from_node_id.as_str(), row.to_node_id.as_str())
            .from_slot(row.from_output)
            .into_slot(row.to_input)
    }
}

/// Repository for workflow definitions.
#[derive(Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_rows(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, sqlx::Error> {
        let id = workflow_id.to_string();
        let Some(row): Option<WorkflowRow> =
            sqlx::query_as("SELECT id, name, owner_id FROM workflows WHERE id = $1")
                .bind(&id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let owner_id = UserId::from_str(&row.owner_id)
            .map_err(|e| decode_error("user id", &row.owner_id, e))?;
        let workflow_id = WorkflowId::from_str(&row.id)
            .map_err(|e| decode_error("workflow id", &row.id, e))?;

        // Position preserves editor order, which breaks ties in execution order
        let nodes: Vec<NodeRow> = sqlx::query_as(
            r#"
            SELECT id, node_type, data, credential_id
            FROM nodes
            WHERE workflow_id = $1
            ORDER BY position
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let connections: Vec<ConnectionRow> = sqlx::query_as(
            r#"
            SELECT from_node_id, to_node_id, from_output, to_input
            FROM connections
            WHERE workflow_id = $1
            ORDER BY position
            "#,
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Workflow {
            id: workflow_id,
            name: row.name,
            owner_id,
            nodes: nodes
                .into_iter()
                .map(NodeRow::try_into_node)
                .collect::<Result<_, _>>()?,
            connections: connections.into_iter().map(Connection::from).collect(),
        }))
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        self.load_rows(workflow_id).await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_rows_decode_type_and_credential() {
        let credential = CredentialId::new();
        let node = NodeRow {
            id: "n1".to_string(),
            node_type: "HTTP_REQUEST".to_string(),
            data: json!({"endpoint": "https://example.com"}),
            credential_id: Some(credential.to_string()),
        }
        .try_into_node()
        .unwrap();

        assert_eq!(node.node_type, NodeType::HttpRequest);
        assert_eq!(node.credential_id, Some(credential));
        assert_eq!(node.data["endpoint"], "https://example.com");
    }

    #[test]
    fn unknown_node_type_is_a_decode_error() {
        let err = NodeRow {
            id: "n1".to_string(),
            node_type: "FTP_UPLOAD".to_string(),
            data: json!({}),
            credential_id: None,
        }
        .try_into_node()
        .unwrap_err();
        assert!(err.to_string().contains("FTP_UPLOAD"));
    }

    #[test]
    fn connection_rows_keep_slot_labels() {
        let connection = Connection::from(ConnectionRow {
            from_node_id: "model".to_string(),
            to_node_id: "agent".to_string(),
            from_output: "main".to_string(),
            to_input: "ai-model".to_string(),
        });
        assert_eq!(connection.to_input, "ai-model");
        assert_eq!(connection.from_node_id, NodeId::new("model"));
    }
}
