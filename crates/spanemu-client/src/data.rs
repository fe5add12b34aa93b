use crate::codec::{decode_result_set, encode_statement, row_count};
use crate::http::{decode, CloseFlag, RestTransport};
use crate::pool::SessionPool;
use crate::traits::{Close, DataClient, Transaction};
use crate::types::{ResultSet, RpcStatus};
use crate::{code, ClientError};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use spanemu_config::{ClientConfig, Statement};
use tracing::{debug, warn};

/// Data-plane client over REST with a bounded session pool.
pub struct HttpDataClient {
    transport: RestTransport,
    database: String,
    pool: SessionPool<String>,
    database_role: Option<String>,
    closed: CloseFlag,
}

#[derive(Deserialize)]
struct Session {
    name: String,
}

#[derive(Deserialize)]
struct BeginResponse {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchDmlResponse {
    #[serde(default)]
    result_sets: Vec<Json>,
    #[serde(default)]
    status: Option<RpcStatus>,
}

impl HttpDataClient {
    pub(crate) fn open(
        transport: RestTransport,
        database: &str,
        config: &ClientConfig,
    ) -> Result<Self, ClientError> {
        config
            .session_pool
            .validate()
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let database_role = config.database_role.clone();
        let pool = SessionPool::open(
            config.session_pool,
            || create_session(&transport, database, database_role.as_deref()),
            |orphan| {
                if let Err(e) = transport.delete(&orphan) {
                    warn!("failed to delete session {orphan}: {e}");
                }
            },
        )?;
        debug!(
            "data client for {database}: {} session(s) opened",
            pool.size()
        );
        Ok(Self {
            transport,
            database: database.to_owned(),
            pool,
            database_role,
            closed: CloseFlag::default(),
        })
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&str) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        self.closed.ensure_open()?;
        let session = self.pool.acquire(|| {
            create_session(&self.transport, &self.database, self.database_role.as_deref())
        })?;
        let result = f(&session);
        if let Some(orphan) = self.pool.release(session) {
            self.delete_session(&orphan);
        }
        result
    }

    fn delete_session(&self, name: &str) -> Option<ClientError> {
        match self.transport.delete(name) {
            Ok(()) => None,
            Err(e) => {
                warn!("failed to delete session {name}: {e}");
                Some(e)
            }
        }
    }
}

fn create_session(
    transport: &RestTransport,
    database: &str,
    role: Option<&str>,
) -> Result<String, ClientError> {
    let body = match role {
        Some(role) => json!({ "session": { "creatorRole": role } }),
        None => json!({ "session": {} }),
    };
    let session: Session = decode(transport.post(&format!("{database}/sessions"), &body)?)?;
    Ok(session.name)
}

impl Close for HttpDataClient {
    /// Deletes every idle session. Sessions checked out at this point are
    /// deleted when they are returned.
    fn close(&self) -> Result<(), ClientError> {
        self.closed.close()?;
        let mut first_err = None;
        for session in self.pool.drain()? {
            if let Some(e) = self.delete_session(&session) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl DataClient for HttpDataClient {
    fn database(&self) -> &str {
        &self.database
    }

    fn read_write_transaction(
        &self,
        f: &mut dyn FnMut(&mut dyn Transaction) -> Result<(), ClientError>,
    ) -> Result<(), ClientError> {
        self.with_session(|session| {
            let begin: BeginResponse = decode(self.transport.post(
                &format!("{session}:beginTransaction"),
                &json!({ "options": { "readWrite": {} } }),
            )?)?;
            let mut txn = HttpTransaction {
                transport: &self.transport,
                session,
                id: begin.id,
                seqno: 0,
            };
            match f(&mut txn) {
                Ok(()) => {
                    self.transport.post(
                        &format!("{session}:commit"),
                        &json!({ "transactionId": txn.id }),
                    )?;
                    Ok(())
                }
                Err(e) => {
                    if let Err(rb) = self.transport.post(
                        &format!("{session}:rollback"),
                        &json!({ "transactionId": txn.id }),
                    ) {
                        warn!("rollback failed: {rb}");
                    }
                    Err(e)
                }
            }
        })
    }

    fn query(&self, statement: &Statement) -> Result<ResultSet, ClientError> {
        self.with_session(|session| {
            let mut body = encode_statement(statement);
            body["transaction"] = json!({ "singleUse": { "readOnly": { "strong": true } } });
            let resp = self
                .transport
                .post(&format!("{session}:executeSql"), &body)?;
            decode_result_set(&resp)
        })
    }
}

struct HttpTransaction<'a> {
    transport: &'a RestTransport,
    session: &'a str,
    id: String,
    seqno: i64,
}

impl HttpTransaction<'_> {
    fn next_seqno(&mut self) -> String {
        self.seqno += 1;
        self.seqno.to_string()
    }
}

impl Transaction for HttpTransaction<'_> {
    fn update(&mut self, statement: &Statement) -> Result<i64, ClientError> {
        let mut body = encode_statement(statement);
        body["transaction"] = json!({ "id": self.id });
        body["seqno"] = Json::String(self.next_seqno());
        let resp = self
            .transport
            .post(&format!("{}:executeSql", self.session), &body)?;
        Ok(row_count(&resp))
    }

    fn batch_update(&mut self, statements: &[Statement]) -> Result<Vec<i64>, ClientError> {
        let body = json!({
            "transaction": { "id": self.id },
            "statements": statements.iter().map(encode_statement).collect::<Vec<_>>(),
            "seqno": self.next_seqno(),
        });
        let resp: BatchDmlResponse = decode(
            self.transport
                .post(&format!("{}:executeBatchDml", self.session), &body)?,
        )?;
        if let Some(status) = resp.status.filter(|s| s.code != code::OK) {
            return Err(ClientError::from_status(
                status.code,
                format!(
                    "statement {} of batch failed: {}",
                    resp.result_sets.len(),
                    status.message
                ),
            ));
        }
        Ok(resp.result_sets.iter().map(row_count).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::FakeGateway;
    use crate::traits::Connector;
    use crate::HttpConnector;
    use spanemu_config::{SessionPoolConfig, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const DB: &str = "projects/p/instances/i/databases/d";

    /// Answers the session and transaction routes; `:executeBatchDml` fails
    /// on any statement containing `FAIL`.
    fn gateway() -> FakeGateway {
        let sessions = Arc::new(AtomicU32::new(0));
        FakeGateway::start(move |method, path, body| {
            let path = path.trim_start_matches("/v1/");
            if method == "DELETE" {
                return (200, json!({}));
            }
            if path.ends_with("/sessions") {
                let n = sessions.fetch_add(1, Ordering::SeqCst) + 1;
                return (200, json!({ "name": format!("{DB}/sessions/s{n}") }));
            }
            if path.ends_with(":beginTransaction") {
                return (200, json!({ "id": "dHgx" }));
            }
            if path.ends_with(":executeBatchDml") {
                let stmts = body["statements"].as_array().cloned().unwrap_or_default();
                let mut sets = Vec::new();
                for s in &stmts {
                    if s["sql"].as_str().unwrap_or_default().contains("FAIL") {
                        return (
                            200,
                            json!({ "resultSets": sets, "status": { "code": 3, "message": "bad" } }),
                        );
                    }
                    sets.push(json!({ "stats": { "rowCountExact": "2" } }));
                }
                return (200, json!({ "resultSets": sets, "status": {} }));
            }
            if path.ends_with(":executeSql") {
                return (
                    200,
                    json!({
                        "metadata": { "rowType": { "fields": [
                            { "name": "pk", "type": { "code": "STRING" } },
                            { "name": "col", "type": { "code": "INT64" } }
                        ]}},
                        "rows": [["bar", "2"], ["foo", "1"]]
                    }),
                );
            }
            (200, json!({}))
        })
    }

    fn paths(gw: &FakeGateway) -> Vec<String> {
        gw.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    fn open(gw: &FakeGateway, config: &ClientConfig) -> Arc<dyn DataClient> {
        HttpConnector
            .data_client(&gw.endpoint, DB, config, &[])
            .unwrap()
    }

    #[test]
    fn opens_min_sessions_with_role() {
        let gw = gateway();
        let config = ClientConfig {
            session_pool: SessionPoolConfig {
                min_opened: 2,
                max_opened: 4,
            },
            database_role: Some("reader".to_owned()),
        };
        let _client = open(&gw, &config);
        let reqs = gw.requests();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].path, format!("/v1/{DB}/sessions"));
        assert_eq!(reqs[0].body["session"]["creatorRole"], json!("reader"));
    }

    #[test]
    fn partial_open_deletes_created_sessions() {
        let sessions = Arc::new(AtomicU32::new(0));
        let gw = FakeGateway::start(move |method, path, _| {
            if method == "DELETE" {
                return (200, json!({}));
            }
            if path.ends_with("/sessions") {
                let n = sessions.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 2 {
                    return (503, json!({ "code": 14, "message": "try later" }));
                }
                return (200, json!({ "name": format!("{DB}/sessions/s{n}") }));
            }
            (200, json!({}))
        });
        let config = ClientConfig {
            session_pool: SessionPoolConfig {
                min_opened: 2,
                max_opened: 4,
            },
            database_role: None,
        };
        let result = HttpConnector.data_client(&gw.endpoint, DB, &config, &[]);
        assert!(matches!(result, Err(ClientError::Rpc { code: 14, .. })));
        assert_eq!(
            paths(&gw).last().map(String::as_str),
            Some(format!("DELETE /v1/{DB}/sessions/s1").as_str())
        );
    }

    #[test]
    fn transaction_commits_batch() {
        let gw = gateway();
        let client = open(&gw, &ClientConfig::single_session());
        let mut counts = Vec::new();
        client
            .read_write_transaction(&mut |txn| {
                counts = txn.batch_update(&[
                    Statement::new("INSERT INTO t (pk) VALUES ('a'), ('b')"),
                    Statement::new("UPDATE t SET c = @v WHERE true").with_param("v", 1),
                ])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(counts, vec![2, 2]);

        let p = paths(&gw);
        assert!(p[1].ends_with(":beginTransaction"));
        assert!(p[2].ends_with(":executeBatchDml"));
        assert!(p[3].ends_with(":commit"));
        let batch = &gw.requests()[2].body;
        assert_eq!(batch["transaction"]["id"], json!("dHgx"));
        assert_eq!(batch["statements"][1]["paramTypes"]["v"]["code"], json!("INT64"));
    }

    #[test]
    fn failed_batch_rolls_back() {
        let gw = gateway();
        let client = open(&gw, &ClientConfig::single_session());
        let err = client
            .read_write_transaction(&mut |txn| {
                txn.batch_update(&[
                    Statement::new("INSERT INTO t (pk) VALUES ('a')"),
                    Statement::new("FAIL"),
                ])?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(m) if m.contains("statement 1")));
        let p = paths(&gw);
        assert!(p.last().unwrap().ends_with(":rollback"));
        assert!(!p.iter().any(|x| x.ends_with(":commit")));
    }

    #[test]
    fn query_is_single_use_read_only() {
        let gw = gateway();
        let client = open(&gw, &ClientConfig::single_session());
        let rs = client
            .query(&Statement::new("SELECT pk, col FROM tbl ORDER BY pk"))
            .unwrap();
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.get(0, "col"), Some(&Value::Int64(2)));
        let body = &gw.requests()[1].body;
        assert_eq!(body["transaction"]["singleUse"]["readOnly"]["strong"], json!(true));
    }

    #[test]
    fn session_is_reused_across_calls() {
        let gw = gateway();
        let client = open(&gw, &ClientConfig::single_session());
        client.query(&Statement::new("SELECT 1")).unwrap();
        client.query(&Statement::new("SELECT 1")).unwrap();
        let creates = paths(&gw)
            .iter()
            .filter(|p| p.ends_with("/sessions"))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn close_deletes_sessions_and_rejects_calls() {
        let gw = gateway();
        let client = open(&gw, &ClientConfig::single_session());
        client.close().unwrap();
        assert!(paths(&gw)
            .last()
            .unwrap()
            .starts_with(&format!("DELETE /v1/{DB}/sessions/s1")));
        assert!(matches!(
            client.query(&Statement::new("SELECT 1")),
            Err(ClientError::Closed)
        ));
        assert!(matches!(client.close(), Err(ClientError::Closed)));
    }

    #[test]
    fn invalid_pool_config_is_rejected() {
        let gw = gateway();
        let config = ClientConfig {
            session_pool: SessionPoolConfig {
                min_opened: 3,
                max_opened: 1,
            },
            database_role: None,
        };
        assert!(matches!(
            HttpConnector.data_client(&gw.endpoint, DB, &config, &[]),
            Err(ClientError::InvalidArgument(_))
        ));
    }
}
