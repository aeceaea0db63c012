// Amazon Athena client over the JSON 1.1 HTTP protocol.
// Requests go to the region's configured endpoint; request signing is expected
// to be handled by that endpoint (a signing gateway) when an API key is set.
use crate::config::RegionConfig;
use crate::models::{ExecutionState, QueryRequest, RegionTag};
use crate::services::engine::client::{AnalyticalEngineClient, EngineError, EngineStatus, ResultPage};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const TARGET_PREFIX: &str = "AmazonAthena";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub struct AthenaHttpClient {
    endpoint: String,
    region: RegionTag,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionRequest<'a> {
    query_string: &'a str,
    query_execution_context: QueryExecutionContext<'a>,
    result_configuration: ResultConfiguration<'a>,
    work_group: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionContext<'a> {
    database: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResultConfiguration<'a> {
    output_location: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionResponse {
    query_execution_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryExecutionResponse {
    query_execution: QueryExecutionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionBody {
    status: QueryExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionStatus {
    state: String,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsResponse {
    result_set: ResultSet,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSet {
    #[serde(default)]
    rows: Vec<AthenaRow>,
    #[serde(default)]
    result_set_metadata: Option<ResultSetMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AthenaRow {
    #[serde(default)]
    data: Vec<Datum>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datum {
    #[serde(default)]
    var_char_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSetMetadata {
    #[serde(default)]
    column_info: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ColumnInfo {
    name: String,
}

impl From<GetQueryResultsResponse> for ResultPage {
    fn from(response: GetQueryResultsResponse) -> Self {
        let columns = response
            .result_set
            .result_set_metadata
            .map(|meta| meta.column_info.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();
        let rows = response
            .result_set
            .rows
            .into_iter()
            .map(|row| row.data.into_iter().map(|d| d.var_char_value).collect())
            .collect();

        ResultPage {
            columns,
            rows,
            next_token: response.next_token,
        }
    }
}

impl AthenaHttpClient {
    pub fn new(region: RegionTag, config: &RegionConfig, api_key: Option<String>) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            region,
            api_key,
            client,
        })
    }

    /// POST one Athena operation and decode its JSON response.
    async fn call<T: DeserializeOwned>(&self, operation: &'static str, body: Value) -> Result<T, EngineError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, operation))
            .header("Content-Type", CONTENT_TYPE)
            .body(body.to_string());

        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Api {
                operation,
                status,
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::Decode(format!("{}: {}", operation, e)))
    }
}

#[async_trait::async_trait]
impl AnalyticalEngineClient for AthenaHttpClient {
    async fn start_query(&self, request: &QueryRequest) -> Result<String, EngineError> {
        let body = StartQueryExecutionRequest {
            query_string: &request.sql,
            query_execution_context: QueryExecutionContext {
                database: &request.catalog,
            },
            result_configuration: ResultConfiguration {
                output_location: &request.output_location,
            },
            work_group: &request.workgroup,
        };
        let body = serde_json::to_value(&body).map_err(|e| EngineError::Decode(e.to_string()))?;

        let response: StartQueryExecutionResponse = self.call("StartQueryExecution", body).await?;
        Ok(response.query_execution_id)
    }

    async fn get_status(&self, execution_id: &str) -> Result<EngineStatus, EngineError> {
        let response: GetQueryExecutionResponse = self
            .call("GetQueryExecution", json!({ "QueryExecutionId": execution_id }))
            .await?;
        let status = response.query_execution.status;

        Ok(EngineStatus {
            state: ExecutionState::from_engine(&status.state),
            reason: status.state_change_reason,
        })
    }

    async fn get_results(&self, execution_id: &str, max_rows: usize) -> Result<ResultPage, EngineError> {
        let response: GetQueryResultsResponse = self
            .call(
                "GetQueryResults",
                json!({ "QueryExecutionId": execution_id, "MaxResults": max_rows }),
            )
            .await?;
        Ok(response.into())
    }

    async fn stop_query(&self, execution_id: &str) -> Result<(), EngineError> {
        let _: Value = self
            .call("StopQueryExecution", json!({ "QueryExecutionId": execution_id }))
            .await?;
        Ok(())
    }

    fn region(&self) -> RegionTag {
        self.region
    }
}
