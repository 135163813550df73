//! Workspaces, datasets and DAX queries

use super::client::{PowerBiClient, PowerBiError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A workspace, dataset or report as listed by the REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl std::fmt::Display for NamedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.name.is_empty() { "<no name>" } else { &self.name };
        write!(f, "{} ({})", name, self.id)
    }
}

/// Items of a `{ "value": [...] }` collection
pub fn collection_items(response: &Value) -> Vec<NamedItem> {
    response
        .get("value")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

impl PowerBiClient {
    /// Workspaces the service principal can access
    pub async fn list_workspaces(&self) -> Result<Vec<NamedItem>, PowerBiError> {
        let response = self.get_json(&self.api_url("groups")).await?;
        Ok(collection_items(&response))
    }

    /// Datasets (semantic models) in a workspace
    pub async fn list_datasets(&self, workspace_id: &str) -> Result<Vec<NamedItem>, PowerBiError> {
        let url = self.api_url(&format!("groups/{}/datasets", workspace_id));
        let response = self.get_json(&url).await?;
        Ok(collection_items(&response))
    }

    /// Execute a DAX query and return the `tables` of the first result
    pub async fn execute_dax_query(
        &self,
        workspace_id: &str,
        dataset_id: &str,
        query: &str,
    ) -> Result<Option<Value>, PowerBiError> {
        let url = self.api_url(&format!(
            "groups/{}/datasets/{}/executeQueries",
            workspace_id, dataset_id
        ));
        let body = json!({
            "queries": [{ "query": query }],
            "serializerSettings": { "includeNulls": true }
        });

        let response = self.post_json(&url, body).await?;
        Ok(response
            .pointer("/results/0/tables")
            .filter(|tables| !tables.is_null() && tables.as_array().map_or(true, |t| !t.is_empty()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_items() {
        let response = json!({
            "@odata.context": "x",
            "value": [
                {"id": "1", "name": "Sales", "configuredBy": "someone"},
                {"id": "2"}
            ]
        });
        let items = collection_items(&response);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].to_string(), "Sales (1)");
        assert_eq!(items[1].to_string(), "<no name> (2)");
        assert!(collection_items(&json!({})).is_empty());
    }
}
