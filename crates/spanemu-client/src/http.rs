use crate::data::HttpDataClient;
use crate::traits::{Close, Connector, DataClient, DatabaseAdmin, InstanceAdmin, LongRunning};
use crate::types::{
    CreateDatabaseRequest, CreateInstanceRequest, Database, Endpoint, Instance, Operation,
    UpdateDatabaseDdlRequest,
};
use crate::{code, ClientError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use spanemu_config::{ClientConfig, ClientOption};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_USER_AGENT: &str = concat!("spanemu/", env!("CARGO_PKG_VERSION"));

/// JSON-over-HTTP transport to the emulator's REST gateway.
///
/// Routes are the Cloud Spanner v1 REST surface:
/// - `POST   /v1/{project}/instances`              create instance
/// - `GET    /v1/{instance}`                       get instance
/// - `POST   /v1/{instance}/databases`             create database
/// - `GET    /v1/{database}`                       get database
/// - `PATCH  /v1/{database}/ddl`                   update DDL
/// - `GET    /v1/{database}/ddl`                   get DDL
/// - `GET    /v1/{operation}`                      poll operation
/// - `POST   /v1/{database}/sessions`              create session
/// - `DELETE /v1/{session}`                        delete session
/// - `POST   /v1/{session}:beginTransaction`, `:executeBatchDml`,
///   `:executeSql`, `:commit`, `:rollback`
///
/// No `Authorization` header is ever sent.
pub(crate) struct RestTransport {
    base: String,
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
    user_agent: String,
}

impl RestTransport {
    pub(crate) fn new(endpoint: &Endpoint, options: &[ClientOption]) -> Self {
        let mut headers = Vec::new();
        let mut user_agent = DEFAULT_USER_AGENT.to_owned();
        let mut timeout = None;
        for opt in options {
            match opt {
                ClientOption::Header { name, value } => {
                    if name.eq_ignore_ascii_case("authorization") {
                        warn!("dropping Authorization header: emulator clients are unauthenticated");
                        continue;
                    }
                    headers.push((name.clone(), value.clone()));
                }
                ClientOption::UserAgent(ua) => user_agent.clone_from(ua),
                ClientOption::RequestTimeout(d) => timeout = Some(*d),
            }
        }
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .into();
        Self {
            base: endpoint.rest_url(),
            agent,
            headers,
            user_agent,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base, path.trim_start_matches('/'))
    }

    fn decorate<B>(&self, mut req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        req = req.header("User-Agent", self.user_agent.as_str());
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req
    }

    pub(crate) fn get(&self, path: &str) -> Result<Json, ClientError> {
        let url = self.url(path);
        debug!("GET {url}");
        let result = self.decorate(self.agent.get(&url)).call();
        finish(&url, result)
    }

    pub(crate) fn post(&self, path: &str, body: &Json) -> Result<Json, ClientError> {
        let url = self.url(path);
        debug!("POST {url}");
        self.send(self.agent.post(&url), &url, body)
    }

    pub(crate) fn patch(&self, path: &str, body: &Json) -> Result<Json, ClientError> {
        let url = self.url(path);
        debug!("PATCH {url}");
        self.send(self.agent.patch(&url), &url, body)
    }

    pub(crate) fn delete(&self, path: &str) -> Result<(), ClientError> {
        let url = self.url(path);
        debug!("DELETE {url}");
        let result = self.decorate(self.agent.delete(&url)).call();
        finish(&url, result).map(|_| ())
    }

    fn send(
        &self,
        req: ureq::RequestBuilder<ureq::typestate::WithBody>,
        url: &str,
        body: &Json,
    ) -> Result<Json, ClientError> {
        let bytes = serde_json::to_vec(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        let result = self
            .decorate(req)
            .header("Content-Type", "application/json")
            .send(&bytes[..]);
        finish(url, result)
    }
}

fn finish(
    url: &str,
    result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
) -> Result<Json, ClientError> {
    let resp = result.map_err(|e| ClientError::Transport(format!("{url}: {e}")))?;
    let status = resp.status().as_u16();
    let mut body = Vec::new();
    resp.into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| ClientError::Transport(format!("{url}: {e}")))?;

    if status >= 400 {
        return Err(error_from_body(status, &body));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(&body).map_err(|e| ClientError::Decode(format!("{url}: {e}")))
}

/// Build an error from a failed response. Understands both the gateway's
/// `{"code": 5, "message": ...}` and Google's
/// `{"error": {"status": "NOT_FOUND", "message": ...}}` shapes, falling
/// back to the HTTP status.
pub(crate) fn error_from_body(http_status: u16, body: &[u8]) -> ClientError {
    let parsed: Json = serde_json::from_slice(body).unwrap_or(Json::Null);
    let text = || String::from_utf8_lossy(body).trim().to_owned();

    if let Some(err) = parsed.get("error").filter(|e| e.is_object()) {
        let message = err
            .get("message")
            .and_then(Json::as_str)
            .map_or_else(text, str::to_owned);
        let status_code = err
            .get("status")
            .and_then(Json::as_str)
            .map_or_else(|| code_from_http(http_status), code_from_name);
        return ClientError::from_status(status_code, message);
    }
    if let Some(status_code) = parsed.get("code").and_then(Json::as_i64) {
        let message = parsed
            .get("message")
            .and_then(Json::as_str)
            .map_or_else(text, str::to_owned);
        let status_code = i32::try_from(status_code).unwrap_or(code::UNKNOWN);
        return ClientError::from_status(status_code, message);
    }
    ClientError::from_status(code_from_http(http_status), format!("HTTP {http_status}: {}", text()))
}

fn code_from_name(name: &str) -> i32 {
    match name {
        "OK" => code::OK,
        "INVALID_ARGUMENT" => code::INVALID_ARGUMENT,
        "NOT_FOUND" => code::NOT_FOUND,
        "ALREADY_EXISTS" => code::ALREADY_EXISTS,
        "FAILED_PRECONDITION" => code::FAILED_PRECONDITION,
        "ABORTED" => code::ABORTED,
        "UNIMPLEMENTED" => code::UNIMPLEMENTED,
        "INTERNAL" => code::INTERNAL,
        "UNAVAILABLE" => code::UNAVAILABLE,
        _ => code::UNKNOWN,
    }
}

fn code_from_http(status: u16) -> i32 {
    match status {
        400 => code::INVALID_ARGUMENT,
        404 => code::NOT_FOUND,
        409 => code::ALREADY_EXISTS,
        501 => code::UNIMPLEMENTED,
        503 => code::UNAVAILABLE,
        _ => code::UNKNOWN,
    }
}

pub(crate) fn decode<T: DeserializeOwned>(json: Json) -> Result<T, ClientError> {
    serde_json::from_value(json).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Set once by `close`; every later call fails with `Closed`.
#[derive(Default)]
pub(crate) struct CloseFlag(AtomicBool);

impl CloseFlag {
    pub(crate) fn ensure_open(&self) -> Result<(), ClientError> {
        if self.0.load(Ordering::SeqCst) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn close(&self) -> Result<(), ClientError> {
        if self.0.swap(true, Ordering::SeqCst) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

pub struct HttpInstanceAdmin {
    transport: RestTransport,
    closed: CloseFlag,
}

impl HttpInstanceAdmin {
    pub fn new(endpoint: &Endpoint, options: &[ClientOption]) -> Self {
        Self {
            transport: RestTransport::new(endpoint, options),
            closed: CloseFlag::default(),
        }
    }
}

impl Close for HttpInstanceAdmin {
    fn close(&self) -> Result<(), ClientError> {
        self.closed.close()
    }
}

impl LongRunning for HttpInstanceAdmin {
    fn get_operation(&self, name: &str) -> Result<Operation, ClientError> {
        self.closed.ensure_open()?;
        decode(self.transport.get(name)?)
    }
}

impl InstanceAdmin for HttpInstanceAdmin {
    fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Operation, ClientError> {
        self.closed.ensure_open()?;
        let body = json!({
            "instanceId": request.instance_id,
            "instance": request.instance,
        });
        decode(
            self.transport
                .post(&format!("{}/instances", request.parent), &body)?,
        )
    }

    fn get_instance(&self, name: &str) -> Result<Instance, ClientError> {
        self.closed.ensure_open()?;
        decode(self.transport.get(name)?)
    }
}

pub struct HttpDatabaseAdmin {
    transport: RestTransport,
    closed: CloseFlag,
}

impl HttpDatabaseAdmin {
    pub fn new(endpoint: &Endpoint, options: &[ClientOption]) -> Self {
        Self {
            transport: RestTransport::new(endpoint, options),
            closed: CloseFlag::default(),
        }
    }
}

impl Close for HttpDatabaseAdmin {
    fn close(&self) -> Result<(), ClientError> {
        self.closed.close()
    }
}

impl LongRunning for HttpDatabaseAdmin {
    fn get_operation(&self, name: &str) -> Result<Operation, ClientError> {
        self.closed.ensure_open()?;
        decode(self.transport.get(name)?)
    }
}

impl DatabaseAdmin for HttpDatabaseAdmin {
    fn create_database(&self, request: &CreateDatabaseRequest) -> Result<Operation, ClientError> {
        self.closed.ensure_open()?;
        let body = json!({
            "createStatement": request.create_statement,
            "extraStatements": request.extra_statements,
            "databaseDialect": request.dialect.api_name(),
        });
        decode(
            self.transport
                .post(&format!("{}/databases", request.parent), &body)?,
        )
    }

    fn update_database_ddl(
        &self,
        request: &UpdateDatabaseDdlRequest,
    ) -> Result<Operation, ClientError> {
        self.closed.ensure_open()?;
        let body = json!({ "statements": request.statements });
        decode(
            self.transport
                .patch(&format!("{}/ddl", request.database), &body)?,
        )
    }

    fn get_database(&self, name: &str) -> Result<Database, ClientError> {
        self.closed.ensure_open()?;
        decode(self.transport.get(name)?)
    }

    fn get_database_ddl(&self, database: &str) -> Result<Vec<String>, ClientError> {
        self.closed.ensure_open()?;
        #[derive(serde::Deserialize)]
        struct DdlResponse {
            #[serde(default)]
            statements: Vec<String>,
        }
        let resp: DdlResponse = decode(self.transport.get(&format!("{database}/ddl"))?)?;
        Ok(resp.statements)
    }
}

/// Opens REST clients against the emulator gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn instance_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn InstanceAdmin>, ClientError> {
        Ok(Arc::new(HttpInstanceAdmin::new(endpoint, options)))
    }

    fn database_admin(
        &self,
        endpoint: &Endpoint,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DatabaseAdmin>, ClientError> {
        Ok(Arc::new(HttpDatabaseAdmin::new(endpoint, options)))
    }

    fn data_client(
        &self,
        endpoint: &Endpoint,
        database: &str,
        config: &ClientConfig,
        options: &[ClientOption],
    ) -> Result<Arc<dyn DataClient>, ClientError> {
        let transport = RestTransport::new(endpoint, options);
        Ok(Arc::new(HttpDataClient::open(transport, database, config)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operation::wait_operation;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tiny_http::{Header, Response, Server, StatusCode};

    /// A captured HTTP request for header and body inspection.
    #[derive(Debug, Clone)]
    pub(crate) struct CapturedRequest {
        pub(crate) method: String,
        pub(crate) path: String,
        pub(crate) headers: HashMap<String, String>,
        pub(crate) body: Json,
    }

    type Handler = dyn Fn(&str, &str, &Json) -> (u16, Json) + Send + Sync;

    /// Fake emulator gateway on a random port. Responses come from `handler`
    /// given method, path and decoded body. Dropping it stops the server.
    pub(crate) struct FakeGateway {
        pub(crate) endpoint: Endpoint,
        server: Arc<Server>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
        handle: Option<std::thread::JoinHandle<()>>,
    }

    impl FakeGateway {
        pub(crate) fn start(
            handler: impl Fn(&str, &str, &Json) -> (u16, Json) + Send + Sync + 'static,
        ) -> Self {
            let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
            let port = server.server_addr().to_ip().unwrap().port();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let handler: Arc<Handler> = Arc::new(handler);

            let srv = Arc::clone(&server);
            let reqs = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for mut request in srv.incoming_requests() {
                    let method = request.method().to_string();
                    let path = request.url().to_owned();
                    let headers = request
                        .headers()
                        .iter()
                        .map(|h| {
                            (
                                h.field.as_str().as_str().to_lowercase(),
                                h.value.as_str().to_owned(),
                            )
                        })
                        .collect();
                    let mut raw = String::new();
                    let _ = request.as_reader().read_to_string(&mut raw);
                    let body = serde_json::from_str(&raw).unwrap_or(Json::Null);

                    let (status, reply) = handler(&method, &path, &body);
                    reqs.lock().unwrap().push(CapturedRequest {
                        method,
                        path,
                        headers,
                        body,
                    });
                    let header =
                        Header::from_bytes("Content-Type", "application/json").unwrap();
                    let _ = request.respond(
                        Response::from_string(reply.to_string())
                            .with_status_code(StatusCode(status))
                            .with_header(header),
                    );
                }
            });

            Self {
                endpoint: Endpoint::new("127.0.0.1", 1, port),
                server,
                requests,
                handle: Some(handle),
            }
        }

        pub(crate) fn requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Drop for FakeGateway {
        fn drop(&mut self) {
            self.server.unblock();
            if let Some(h) = self.handle.take() {
                let _ = h.join();
            }
        }
    }

    fn done_op(name: &str) -> Json {
        json!({"name": name, "done": true})
    }

    #[test]
    fn create_instance_posts_to_project() {
        let gw = FakeGateway::start(|_, path, _| {
            (200, json!({"name": format!("{}/operations/1", path.trim_start_matches("/v1/")), "done": false}))
        });
        let admin = HttpInstanceAdmin::new(&gw.endpoint, &[]);
        let op = admin
            .create_instance(&CreateInstanceRequest {
                parent: "projects/p".to_owned(),
                instance_id: "i".to_owned(),
                instance: Instance {
                    name: "projects/p/instances/i".to_owned(),
                    config: "projects/p/instanceConfigs/emulator-config".to_owned(),
                    display_name: "i".to_owned(),
                    node_count: 1,
                    state: String::new(),
                },
            })
            .unwrap();
        assert_eq!(op.name, "projects/p/instances/operations/1");

        let reqs = gw.requests();
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].path, "/v1/projects/p/instances");
        assert_eq!(reqs[0].body["instanceId"], json!("i"));
        assert_eq!(reqs[0].body["instance"]["nodeCount"], json!(1));
        assert_eq!(
            reqs[0].body["instance"]["config"],
            json!("projects/p/instanceConfigs/emulator-config")
        );
    }

    #[test]
    fn create_database_sends_dialect_and_extra_statements() {
        let gw = FakeGateway::start(|_, _, _| (200, done_op("op")));
        let admin = HttpDatabaseAdmin::new(&gw.endpoint, &[]);
        admin
            .create_database(&CreateDatabaseRequest {
                parent: "projects/p/instances/i".to_owned(),
                create_statement: "CREATE DATABASE \"d\"".to_owned(),
                extra_statements: vec!["CREATE TABLE t (pk BIGINT PRIMARY KEY)".to_owned()],
                dialect: spanemu_config::Dialect::PostgreSql,
            })
            .unwrap();
        let req = &gw.requests()[0];
        assert_eq!(req.path, "/v1/projects/p/instances/i/databases");
        assert_eq!(req.body["databaseDialect"], json!("POSTGRESQL"));
        assert_eq!(req.body["extraStatements"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn update_ddl_uses_patch() {
        let gw = FakeGateway::start(|_, _, _| (200, done_op("op")));
        let admin = HttpDatabaseAdmin::new(&gw.endpoint, &[]);
        admin
            .update_database_ddl(&UpdateDatabaseDdlRequest {
                database: "projects/p/instances/i/databases/d".to_owned(),
                statements: vec!["CREATE TABLE t (pk INT64) PRIMARY KEY (pk)".to_owned()],
            })
            .unwrap();
        let req = &gw.requests()[0];
        assert_eq!(req.method, "PATCH");
        assert_eq!(req.path, "/v1/projects/p/instances/i/databases/d/ddl");
    }

    #[test]
    fn wait_operation_polls_gateway() {
        let polls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&polls);
        let gw = FakeGateway::start(move |method, _, _| {
            if method == "GET" {
                let mut n = counter.lock().unwrap();
                *n += 1;
                (200, json!({"name": "op", "done": *n >= 2}))
            } else {
                (200, json!({"name": "op", "done": false}))
            }
        });
        let admin = HttpInstanceAdmin::new(&gw.endpoint, &[]);
        let op = admin
            .create_instance(&CreateInstanceRequest {
                parent: "projects/p".to_owned(),
                instance_id: "i".to_owned(),
                instance: Instance::default(),
            })
            .unwrap();
        let op = wait_operation(&admin, op).unwrap();
        assert!(op.done);
        assert_eq!(*polls.lock().unwrap(), 2);
        assert_eq!(gw.requests()[1].path, "/v1/op");
    }

    #[test]
    fn gateway_error_maps_to_status() {
        let gw = FakeGateway::start(|_, _, _| {
            (409, json!({"code": 6, "message": "Instance already exists"}))
        });
        let admin = HttpInstanceAdmin::new(&gw.endpoint, &[]);
        let err = admin.get_instance("projects/p/instances/i").unwrap_err();
        assert!(matches!(err, ClientError::AlreadyExists(m) if m.contains("already exists")));
    }

    #[test]
    fn google_error_shape_maps_to_status() {
        let err = error_from_body(
            404,
            br#"{"error":{"code":404,"message":"Database not found","status":"NOT_FOUND"}}"#,
        );
        assert!(matches!(err, ClientError::NotFound(m) if m == "Database not found"));
    }

    #[test]
    fn out_of_range_code_maps_to_unknown() {
        let err = error_from_body(500, br#"{"code":4294967301,"message":"garbled"}"#);
        assert!(matches!(err, ClientError::Rpc { code: 2, ref message } if message == "garbled"));
    }

    #[test]
    fn plain_text_error_falls_back_to_http_status() {
        let err = error_from_body(400, b"bad request");
        assert!(matches!(err, ClientError::InvalidArgument(m) if m.contains("bad request")));
        let err = error_from_body(500, b"");
        assert!(matches!(err, ClientError::Rpc { code: 2, .. }));
    }

    #[test]
    fn options_set_headers_and_user_agent_but_never_authorization() {
        let gw = FakeGateway::start(|_, _, _| (200, json!({"name": "projects/p/instances/i"})));
        let admin = HttpInstanceAdmin::new(
            &gw.endpoint,
            &[
                ClientOption::header("x-goog-request-reason", "test"),
                ClientOption::header("Authorization", "Bearer nope"),
                ClientOption::UserAgent("spanemu-test/1".to_owned()),
            ],
        );
        admin.get_instance("projects/p/instances/i").unwrap();
        let req = &gw.requests()[0];
        assert_eq!(
            req.headers.get("x-goog-request-reason").map(String::as_str),
            Some("test")
        );
        assert_eq!(
            req.headers.get("user-agent").map(String::as_str),
            Some("spanemu-test/1")
        );
        assert!(!req.headers.contains_key("authorization"));
    }

    #[test]
    fn closed_admin_rejects_calls() {
        let gw = FakeGateway::start(|_, _, _| (200, json!({})));
        let admin = HttpDatabaseAdmin::new(&gw.endpoint, &[]);
        admin.close().unwrap();
        assert!(matches!(admin.close(), Err(ClientError::Closed)));
        assert!(matches!(
            admin.get_database_ddl("projects/p/instances/i/databases/d"),
            Err(ClientError::Closed)
        ));
        assert!(gw.requests().is_empty());
    }

    #[test]
    fn get_database_ddl_reads_statements() {
        let gw = FakeGateway::start(|_, _, _| {
            (200, json!({"statements": ["CREATE TABLE t (pk INT64) PRIMARY KEY (pk)"]}))
        });
        let admin = HttpDatabaseAdmin::new(&gw.endpoint, &[]);
        let ddl = admin
            .get_database_ddl("projects/p/instances/i/databases/d")
            .unwrap();
        assert_eq!(ddl.len(), 1);
    }

    #[test]
    fn connection_refused_is_transport_error() {
        let admin = HttpInstanceAdmin::new(&Endpoint::new("127.0.0.1", 1, 1), &[]);
        assert!(matches!(
            admin.get_instance("projects/p/instances/i"),
            Err(ClientError::Transport(_))
        ));
    }
}
