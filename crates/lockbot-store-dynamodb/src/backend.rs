use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use lockbot_core::store::{Condition, Item, KvBackend, Table};
use lockbot_core::BackendError;
use tracing::{debug, instrument};

use crate::convert::{condition_expression, from_attribute_map, to_attribute_map};

/// Hash key attribute of both tables.
pub const KEY_ATTRIBUTE: &str = "pk";

/// Where to find the tables.
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    pub locks_table: String,
    pub installations_table: String,
    /// Overrides the region from the environment.
    pub region: Option<String>,
    /// Custom endpoint, e.g. DynamoDB Local.
    pub endpoint_url: Option<String>,
}

/// DynamoDB backend.
///
/// Table layout (both tables):
/// ```text
/// pk (S, hash key)   store key, `team#channel#name` or `team`
/// <attributes>       the item's JSON attributes, `expiresAt` as N (epoch ms)
/// ```
///
/// SDK-level retries are disabled; the store adapter owns the retry budget.
#[derive(Clone)]
pub struct DynamoBackend {
    client: Client,
    locks_table: String,
    installations_table: String,
}

impl DynamoBackend {
    pub fn new(client: Client, locks_table: String, installations_table: String) -> Self {
        Self {
            client,
            locks_table,
            installations_table,
        }
    }

    /// Build a client from the ambient AWS configuration.
    pub async fn connect(config: DynamoConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).retry_config(RetryConfig::disabled());
        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self::new(
            Client::new(&sdk_config),
            config.locks_table,
            config.installations_table,
        )
    }

    fn table_name(&self, table: Table) -> &str {
        match table {
            Table::Locks => &self.locks_table,
            Table::Installations => &self.installations_table,
        }
    }

    fn key(key: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([(KEY_ATTRIBUTE.to_string(), AttributeValue::S(key.to_string()))])
    }
}

#[async_trait]
impl KvBackend for DynamoBackend {
    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, table: Table, key: &str) -> Result<Option<Item>, BackendError> {
        let output = self
            .client
            .get_item()
            .table_name(self.table_name(table))
            .set_key(Some(Self::key(key)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| classify("get_item", e))?;

        output
            .item
            .map(|item| from_attribute_map(KEY_ATTRIBUTE, &item))
            .transpose()
    }

    #[instrument(skip(self, item), level = "debug")]
    async fn put(
        &self,
        table: Table,
        key: &str,
        item: Item,
        condition: &Condition,
    ) -> Result<(), BackendError> {
        let mut request = self
            .client
            .put_item()
            .table_name(self.table_name(table))
            .set_item(Some(to_attribute_map(KEY_ATTRIBUTE, key, &item)));

        if let Some(expr) = condition_expression(condition, KEY_ATTRIBUTE) {
            request = request
                .condition_expression(&expr.expression)
                .set_expression_attribute_values(expr.values())
                .set_expression_attribute_names(Some(expr.names));
        }

        request.send().await.map_err(|e| classify("put_item", e))?;
        debug!("Put {} in {}", key, table);
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(
        &self,
        table: Table,
        key: &str,
        condition: &Condition,
    ) -> Result<Option<Item>, BackendError> {
        let mut request = self
            .client
            .delete_item()
            .table_name(self.table_name(table))
            .set_key(Some(Self::key(key)))
            .return_values(ReturnValue::AllOld);

        if let Some(expr) = condition_expression(condition, KEY_ATTRIBUTE) {
            request = request
                .condition_expression(&expr.expression)
                .set_expression_attribute_values(expr.values())
                .set_expression_attribute_names(Some(expr.names));
        }

        let output = request
            .send()
            .await
            .map_err(|e| classify("delete_item", e))?;

        output
            .attributes
            .filter(|attributes| !attributes.is_empty())
            .map(|attributes| from_attribute_map(KEY_ATTRIBUTE, &attributes))
            .transpose()
    }

    /// Paginated consistent scan filtered on the key prefix.
    #[instrument(skip(self), level = "debug")]
    async fn query(&self, table: Table, prefix: &str) -> Result<Vec<Item>, BackendError> {
        let mut items = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut request = self
                .client
                .scan()
                .table_name(self.table_name(table))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take());

            if !prefix.is_empty() {
                request = request
                    .filter_expression("begins_with(#pk, :prefix)")
                    .expression_attribute_names("#pk", KEY_ATTRIBUTE)
                    .expression_attribute_values(":prefix", AttributeValue::S(prefix.to_string()));
            }

            let output = request.send().await.map_err(|e| classify("scan", e))?;

            for item in output.items.unwrap_or_default() {
                items.push(from_attribute_map(KEY_ATTRIBUTE, &item)?);
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!("Scanned {} items with prefix {:?} in {}", items.len(), prefix, table);
        Ok(items)
    }
}

/// Whether a DynamoDB error code is worth retrying.
fn is_transient(code: &str) -> bool {
    matches!(
        code,
        "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalServerError"
            | "ServiceUnavailable"
            | "TransactionConflictException"
    )
}

fn classify<E, R>(op: &str, err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if err.code() == Some("ConditionalCheckFailedException") {
        return BackendError::ConditionFailed;
    }

    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => true,
        _ => err.code().is_some_and(is_transient),
    };
    let message = format!("DynamoDB {} failed: {}", op, DisplayErrorContext(&err));
    if transient {
        BackendError::Throttled(message)
    } else {
        BackendError::Other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_dynamodb::config::Credentials;
    use chrono::DateTime;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

    fn backend(server: &MockServer) -> DynamoBackend {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(server.uri())
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .build();
        DynamoBackend::new(
            Client::from_conf(config),
            "locks".into(),
            "installations".into(),
        )
    }

    fn target(op: &str) -> wiremock::matchers::HeaderExactMatcher {
        header("x-amz-target", format!("DynamoDB_20120810.{op}").as_str())
    }

    fn dynamo_error(status: u16, code: &str) -> ResponseTemplate {
        let body = json!({
            "__type": format!("com.amazonaws.dynamodb.v20120810#{code}"),
            "message": "mocked"
        });
        ResponseTemplate::new(status).set_body_raw(body.to_string(), CONTENT_TYPE)
    }

    #[test]
    fn test_transient_codes() {
        assert!(is_transient("ProvisionedThroughputExceededException"));
        assert!(is_transient("ThrottlingException"));
        assert!(!is_transient("ResourceNotFoundException"));
        assert!(!is_transient("ValidationException"));
    }

    #[tokio::test]
    async fn test_get_item_strips_key_attribute() {
        let server = MockServer::start().await;
        let body = json!({
            "Item": {
                "pk": {"S": "T1#C1#deploy"},
                "holder": {"S": "alice"},
                "acquiredAt": {"N": "1700000000000"}
            }
        });
        Mock::given(method("POST"))
            .and(target("GetItem"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), CONTENT_TYPE))
            .mount(&server)
            .await;

        let item = backend(&server)
            .get(Table::Locks, "T1#C1#deploy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.get("pk"), None);
        assert_eq!(item["holder"], json!("alice"));
        assert_eq!(item["acquiredAt"], json!(1_700_000_000_000_i64));
    }

    #[tokio::test]
    async fn test_missing_item_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("GetItem"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", CONTENT_TYPE))
            .mount(&server)
            .await;

        assert!(backend(&server)
            .get(Table::Installations, "T1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_condition_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("PutItem"))
            .respond_with(dynamo_error(400, "ConditionalCheckFailedException"))
            .mount(&server)
            .await;

        let now = DateTime::from_timestamp_millis(1_000).unwrap();
        let err = backend(&server)
            .put(
                Table::Locks,
                "k",
                Item::new(),
                &Condition::AbsentOrExpired { now },
            )
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::ConditionFailed);
    }

    #[tokio::test]
    async fn test_throttling_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("DeleteItem"))
            .respond_with(dynamo_error(400, "ProvisionedThroughputExceededException"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .delete(Table::Locks, "k", &Condition::Always)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Throttled(_)));
    }

    #[tokio::test]
    async fn test_access_denied_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(target("Scan"))
            .respond_with(dynamo_error(400, "ResourceNotFoundException"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .query(Table::Locks, "T1#")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Other(_)));
    }

    #[tokio::test]
    async fn test_scan_follows_pagination() {
        let server = MockServer::start().await;
        let first = json!({
            "Items": [{"pk": {"S": "T1#C1#a"}, "name": {"S": "a"}}],
            "LastEvaluatedKey": {"pk": {"S": "T1#C1#a"}}
        });
        let second = json!({
            "Items": [{"pk": {"S": "T1#C1#b"}, "name": {"S": "b"}}]
        });
        Mock::given(method("POST"))
            .and(target("Scan"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(first.to_string(), CONTENT_TYPE))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(target("Scan"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(second.to_string(), CONTENT_TYPE))
            .mount(&server)
            .await;

        let items = backend(&server).query(Table::Locks, "T1#C1#").await.unwrap();
        let names: Vec<_> = items.iter().map(|i| i["name"].clone()).collect();
        assert_eq!(names, vec![json!("a"), json!("b")]);
    }
}
