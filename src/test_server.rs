//! Loopback HTTP stub for exercising the blocking `ureq` clients.
//!
//! Every request is recorded and answered with the same status and JSON body.

use axum::extract::Query;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Json;
use axum::Router;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: String,
}

pub(crate) struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubServer {
    pub async fn start(reply: Value) -> Self {
        Self::start_with_status(StatusCode::OK, reply).await
    }

    pub async fn start_with_status(status: StatusCode, reply: Value) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        let router = Router::new().fallback(
            move |method: Method,
                  uri: Uri,
                  Query(query): Query<HashMap<String, String>>,
                  headers: HeaderMap,
                  body: String| {
                let log = Arc::clone(&log);
                let reply = reply.clone();
                async move {
                    log.lock().unwrap().push(Recorded {
                        method,
                        path: uri.path().to_string(),
                        query,
                        headers,
                        body,
                    });
                    (status, Json(reply))
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}
