//! Azure Table Storage Adapter
//!
//! Speaks the Table service REST protocol directly: SharedKeyLite signed
//! requests, JSON payloads without OData metadata, `MERGE` for
//! insert-or-merge.

use crate::entity::{Row, RowValue};
use crate::error::{Error, Result};
use crate::table::{TableCreation, TableService};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{header, Method, StatusCode};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2019-02-02";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Well-known local emulator account
const DEV_ACCOUNT_NAME: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_TABLE_ENDPOINT: &str = "http://127.0.0.1:10002/devstoreaccount1";

// =============================================================================
// Connection String
// =============================================================================

/// Parsed storage account connection string
#[derive(Clone)]
pub struct ConnectionString {
    pub account_name: String,
    account_key: Vec<u8>,
    pub table_endpoint: String,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` connection strings.
    ///
    /// Recognized keys: `DefaultEndpointsProtocol`, `AccountName`,
    /// `AccountKey`, `EndpointSuffix`, `TableEndpoint`,
    /// `UseDevelopmentStorage`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut protocol = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut suffix = None;
        let mut table_endpoint = None;
        let mut development = false;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                Error::ConnectionString(format!("segment without '=': {:?}", redact(part)))
            })?;
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "defaultendpointsprotocol" => protocol = Some(value),
                "accountname" => account_name = Some(value),
                "accountkey" => account_key = Some(value),
                "endpointsuffix" => suffix = Some(value),
                "tableendpoint" => table_endpoint = Some(value),
                "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
                // Blob/queue endpoints and SAS tokens are irrelevant here
                _ => {}
            }
        }

        if development {
            return Ok(Self {
                account_name: DEV_ACCOUNT_NAME.to_string(),
                account_key: decode_key(DEV_ACCOUNT_KEY)?,
                table_endpoint: table_endpoint.unwrap_or_else(|| DEV_TABLE_ENDPOINT.to_string()),
            });
        }

        let account_name = account_name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::ConnectionString("missing AccountName".into()))?;
        let account_key = account_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::ConnectionString("missing AccountKey".into()))?;

        let table_endpoint = table_endpoint.unwrap_or_else(|| {
            format!(
                "{}://{}.table.{}",
                protocol.as_deref().unwrap_or("https"),
                account_name,
                suffix.as_deref().unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            )
        });

        Ok(Self {
            account_name,
            account_key: decode_key(&account_key)?,
            table_endpoint: table_endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("table_endpoint", &self.table_endpoint)
            .finish()
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(key)
        .map_err(|e| Error::ConnectionString(format!("AccountKey is not valid base64: {}", e)))
}

fn redact(segment: &str) -> String {
    segment.chars().take(16).collect::<String>() + "..."
}

// =============================================================================
// Azure Table Service
// =============================================================================

/// Table storage backend over the Azure Table REST API
pub struct AzureTableService {
    http: reqwest::Client,
    connection: ConnectionString,
}

impl AzureTableService {
    /// Create a new adapter for the given account
    pub fn new(connection: ConnectionString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { http, connection })
    }

    /// Parse a connection string and create the adapter
    pub fn from_connection_string(raw: &str) -> Result<Self> {
        Self::new(ConnectionString::parse(raw)?)
    }

    pub fn account_name(&self) -> &str {
        &self.connection.account_name
    }

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        let raw = format!("{}/{}", self.connection.table_endpoint, path);
        reqwest::Url::parse(&raw)
            .map_err(|e| Error::Configuration(format!("invalid table URL {}: {}", raw, e)))
    }

    /// SharedKeyLite: HMAC-SHA256 over `date \n /account/path`
    fn authorization(&self, date: &str, url: &reqwest::Url) -> Result<String> {
        let canonical_resource = format!("/{}{}", self.connection.account_name, url.path());
        let string_to_sign = format!("{}\n{}", date, canonical_resource);

        let mut mac = HmacSha256::new_from_slice(&self.connection.account_key)
            .map_err(|e| Error::Configuration(format!("unusable AccountKey: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedKeyLite {}:{}",
            self.connection.account_name, signature
        ))
    }

    async fn send(
        &self,
        method: Method,
        url: reqwest::Url,
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let authorization = self.authorization(&date, &url)?;

        let mut request = self
            .http
            .request(method, url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION)
            .header(header::ACCEPT, ACCEPT_NO_METADATA)
            .header(header::AUTHORIZATION, authorization);

        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .header("Prefer", "return-no-content")
                .body(body.to_string());
        }

        Ok(request.send().await?)
    }

    fn entity_path(table: &str, partition_key: &str, row_key: &str) -> String {
        format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            table,
            urlencoding::encode(&partition_key.replace('\'', "''")),
            urlencoding::encode(&row_key.replace('\'', "''"))
        )
    }
}

/// Turn a failed response into a status error carrying the service's error code
async fn status_error(table: &str, operation: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/odata.error/code")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);

    Error::RemoteStatus {
        table: table.to_string(),
        operation: operation.to_string(),
        status,
        reason,
    }
}

/// Row to request body. Integers outside Int32 need an explicit Edm.Int64
/// annotation and a string value.
fn row_to_json(row: &Row) -> Value {
    let mut object = Map::new();
    for (column, value) in row.iter() {
        match value {
            RowValue::Int(i) if i32::try_from(*i).is_err() => {
                object.insert(format!("{}@odata.type", column), json!("Edm.Int64"));
                object.insert(column.clone(), json!(i.to_string()));
            }
            RowValue::Int(i) => {
                object.insert(column.clone(), json!(i));
            }
            RowValue::Bool(b) => {
                object.insert(column.clone(), json!(b));
            }
            RowValue::Str(s) => {
                object.insert(column.clone(), json!(s));
            }
        }
    }
    Value::Object(object)
}

/// Response body to row. Metadata and non-integral numbers are dropped.
fn row_from_json(table: &str, row_key: &str, value: Value) -> Result<Row> {
    let Value::Object(object) = value else {
        return Err(Error::MalformedRow {
            table: table.to_string(),
            row_key: row_key.to_string(),
            reason: "response is not a JSON object".into(),
        });
    };

    Ok(object
        .into_iter()
        .filter(|(column, _)| !column.starts_with("odata.") && !column.contains("@odata."))
        .filter_map(|(column, value)| {
            let value = match value {
                Value::Bool(b) => RowValue::Bool(b),
                Value::String(s) => RowValue::Str(s),
                Value::Number(n) => RowValue::Int(n.as_i64()?),
                _ => return None,
            };
            Some((column, value))
        })
        .collect())
}

#[async_trait]
impl TableService for AzureTableService {
    fn backend(&self) -> &'static str {
        "azure"
    }

    async fn create_table_if_not_exists(&self, table: &str) -> Result<TableCreation> {
        let url = self.url("Tables")?;
        let response = self
            .send(Method::POST, url, Some(json!({ "TableName": table })))
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(TableCreation::Created),
            StatusCode::CONFLICT => Ok(TableCreation::AlreadyExists),
            _ => Err(status_error(table, "create_table", response).await),
        }
    }

    async fn upsert_merge(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        row: &Row,
    ) -> Result<()> {
        let url = self.url(&Self::entity_path(table, partition_key, row_key))?;
        let merge = Method::from_bytes(b"MERGE")
            .map_err(|e| Error::Internal(format!("MERGE verb rejected: {}", e)))?;

        let response = self.send(merge, url, Some(row_to_json(row))).await?;
        if response.status().is_success() {
            debug!(table, row_key, "Merged row");
            Ok(())
        } else {
            Err(status_error(table, "merge", response).await)
        }
    }

    async fn get_row(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<Row>> {
        let url = self.url(&Self::entity_path(table, partition_key, row_key))?;
        let response = self.send(Method::GET, url, None).await?;

        match response.status() {
            StatusCode::OK => {
                let body: Value = response.json().await?;
                row_from_json(table, row_key, body).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(status_error(table, "get", response).await),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    #[test]
    fn test_parse_account_connection_string() {
        let raw = format!(
            "DefaultEndpointsProtocol=https;AccountName=grinders;AccountKey={};EndpointSuffix=core.windows.net",
            KEY
        );
        let conn = ConnectionString::parse(&raw).unwrap();
        assert_eq!(conn.account_name, "grinders");
        assert_eq!(conn.table_endpoint, "https://grinders.table.core.windows.net");
        assert_eq!(conn.account_key, b"secret-key-for-tests".to_vec());
    }

    #[test]
    fn test_parse_explicit_endpoint() {
        let raw = format!(
            "AccountName=grinders;AccountKey={};TableEndpoint=https://tables.example.net/;",
            KEY
        );
        let conn = ConnectionString::parse(&raw).unwrap();
        assert_eq!(conn.table_endpoint, "https://tables.example.net");
    }

    #[test]
    fn test_parse_development_storage() {
        let conn = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        assert_eq!(conn.account_name, "devstoreaccount1");
        assert_eq!(conn.table_endpoint, "http://127.0.0.1:10002/devstoreaccount1");
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert_matches!(
            ConnectionString::parse("AccountName=grinders"),
            Err(Error::ConnectionString(_))
        );
        assert_matches!(
            ConnectionString::parse("AccountName=grinders;AccountKey=***"),
            Err(Error::ConnectionString(_))
        );
        assert_matches!(ConnectionString::parse("garbage"), Err(Error::ConnectionString(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let conn = ConnectionString::parse("UseDevelopmentStorage=true").unwrap();
        let printed = format!("{:?}", conn);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("Eby8"));
    }

    #[test]
    fn test_entity_path_escapes_keys() {
        assert_eq!(
            AzureTableService::entity_path("UserCache", "UserCache", "42"),
            "UserCache(PartitionKey='UserCache',RowKey='42')"
        );
        assert_eq!(
            AzureTableService::entity_path("T", "P", "it's"),
            "T(PartitionKey='P',RowKey='it%27%27s')"
        );
    }

    #[test]
    fn test_authorization_is_deterministic() {
        let service =
            AzureTableService::from_connection_string("UseDevelopmentStorage=true").unwrap();
        let url = service.url("Tables").unwrap();
        let date = "Tue, 02 Jan 2024 11:00:00 GMT";

        let a = service.authorization(date, &url).unwrap();
        let b = service.authorization(date, &url).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("SharedKeyLite devstoreaccount1:"));

        let other = service.authorization("Wed, 03 Jan 2024 11:00:00 GMT", &url).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_row_json_conversion() {
        let row = Row::keyed("UserCache", "7")
            .with("numEasy", 3u32)
            .with("big", 9_000_000_000i64)
            .with("completedToday", true);

        let body = row_to_json(&row);
        assert_eq!(body["numEasy"], 3);
        assert_eq!(body["big"], "9000000000");
        assert_eq!(body["big@odata.type"], "Edm.Int64");

        let response = json!({
            "odata.etag": "W/\"datetime'2024-01-02T11%3A05%3A00Z'\"",
            "PartitionKey": "UserCache",
            "RowKey": "7",
            "Timestamp": "2024-01-02T11:05:00Z",
            "numEasy": 3,
            "ratio": 0.5,
            "completedToday": true
        });
        let parsed = row_from_json("UserCache", "7", response).unwrap();
        assert_eq!(parsed.row_key(), Some("7"));
        assert_eq!(parsed.get("numEasy"), Some(&RowValue::Int(3)));
        assert_eq!(parsed.get("completedToday"), Some(&RowValue::Bool(true)));
        assert!(parsed.get("ratio").is_none());
        assert!(parsed.get("odata.etag").is_none());

        assert!(row_from_json("UserCache", "7", json!([1, 2])).is_err());
    }

    // =========================================================================
    // Status mapping against a canned HTTP endpoint
    // =========================================================================

    use crate::error::ErrorClass;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned response per connection, in order, and hand back
    /// the request lines that were received
    async fn canned_endpoint(
        responses: Vec<(u16, &'static str)>,
    ) -> (AzureTableService, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_request_line(&mut socket).await);

                let response = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    ACCEPT_NO_METADATA,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });

        let raw = format!(
            "AccountName=grinders;AccountKey={};TableEndpoint=http://127.0.0.1:{}",
            KEY, port
        );
        let service = AzureTableService {
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
            connection: ConnectionString::parse(&raw).unwrap(),
        };
        (service, server)
    }

    /// Read headers and body of one request, return its request line
    async fn read_request_line(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        head.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_create_table_maps_created_and_conflict() {
        let conflict = r#"{"odata.error":{"code":"TableAlreadyExists","message":{"value":"exists"}}}"#;
        let (service, server) = canned_endpoint(vec![(201, ""), (409, conflict)]).await;

        assert_matches!(
            service.create_table_if_not_exists("UserCache").await,
            Ok(TableCreation::Created)
        );
        assert_matches!(
            service.create_table_if_not_exists("UserCache").await,
            Ok(TableCreation::AlreadyExists)
        );

        let seen = server.await.unwrap();
        assert!(seen.iter().all(|line| line.starts_with("POST /Tables ")));
    }

    #[tokio::test]
    async fn test_get_row_not_found_is_none() {
        let missing = r#"{"odata.error":{"code":"ResourceNotFound","message":{"value":"gone"}}}"#;
        let (service, server) = canned_endpoint(vec![(404, missing)]).await;

        assert_matches!(service.get_row("UserCache", "UserCache", "7").await, Ok(None));

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("GET /UserCache(PartitionKey="));
    }

    #[tokio::test]
    async fn test_get_row_parses_nometadata_body() {
        let body = r#"{"PartitionKey":"UserCache","RowKey":"7","Timestamp":"2024-01-02T11:05:00Z","numEasy":3,"completedToday":true,"currStreakStartDate":"2024-01-01"}"#;
        let (service, server) = canned_endpoint(vec![(200, body)]).await;

        let row = service
            .get_row("UserCache", "UserCache", "7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.row_key(), Some("7"));
        assert_eq!(row.get("numEasy"), Some(&RowValue::Int(3)));
        assert_eq!(row.get("completedToday"), Some(&RowValue::Bool(true)));
        assert_eq!(row.read_str("currStreakStartDate"), Some("2024-01-01"));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let busy = r#"{"odata.error":{"code":"ServerBusy","message":{"value":"slow down"}}}"#;
        let (service, server) = canned_endpoint(vec![(503, busy), (204, "")]).await;

        let err = service
            .get_row("UserCache", "UserCache", "7")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_matches!(
            &err,
            Error::RemoteStatus { status: 503, operation, reason, .. }
                if operation == "get" && reason == "ServerBusy"
        );

        let row = Row::keyed("UserCache", "7").with("numEasy", 4u32);
        assert!(service.upsert_merge("UserCache", "UserCache", "7", &row).await.is_ok());

        let seen = server.await.unwrap();
        assert!(seen[1].starts_with("MERGE /UserCache(PartitionKey="));
    }
}
