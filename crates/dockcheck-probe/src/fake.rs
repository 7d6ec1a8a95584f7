//! Scripted HTTP client for tests.
//!
//! Each route holds a queue of responses. Requests consume the queue in
//! order and the last response repeats once the queue is down to one, so
//! "fails twice then succeeds" is three entries and "always refuses" is one.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dockcheck_common::error::{HarnessError, Result};

use crate::http::{HttpClient, HttpResponse};

/// HTTP method of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// A request received by [`ScriptedHttp`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// JSON body, for `POST`.
    pub body: Option<serde_json::Value>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum Reply {
    Respond(HttpResponse),
    Refuse,
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    replies: VecDeque<Reply>,
}

#[derive(Debug, Default)]
struct Script {
    routes: Vec<Route>,
    requests: Vec<RecordedRequest>,
}

/// An [`HttpClient`] answering from per-route response queues.
///
/// Routes match when the request URL ends with the route path. Requests to
/// an unscripted route are refused like a closed port.
#[derive(Debug, Default)]
pub struct ScriptedHttp {
    script: Mutex<Script>,
}

impl ScriptedHttp {
    /// Creates a client with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a `GET` response.
    #[must_use]
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.push(Method::Get, path, Reply::Respond(HttpResponse::new(status, body)))
    }

    /// Queues a refused connection for `GET`.
    #[must_use]
    pub fn refuse_get(self, path: &str) -> Self {
        self.push(Method::Get, path, Reply::Refuse)
    }

    /// Queues a `POST` response.
    #[must_use]
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.push(Method::Post, path, Reply::Respond(HttpResponse::new(status, body)))
    }

    /// Queues a `GET` response at runtime, for scripts that depend on
    /// values only known mid-test.
    pub fn add_get(&self, path: &str, status: u16, body: &str) {
        self.enqueue(Method::Get, path, Reply::Respond(HttpResponse::new(status, body)));
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests received for a method and path.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(path))
            .count()
    }

    fn push(self, method: Method, path: &str, reply: Reply) -> Self {
        self.enqueue(method, path, reply);
        self
    }

    fn enqueue(&self, method: Method, path: &str, reply: Reply) {
        let mut script = self.lock();
        if let Some(route) = script
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            route.replies.push_back(reply);
        } else {
            script.routes.push(Route {
                method,
                path: path.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, request: RecordedRequest) -> Result<HttpResponse> {
        let mut script = self.lock();
        let url = request.url.clone();
        let method = request.method;
        script.requests.push(request);

        let reply = script
            .routes
            .iter_mut()
            .filter(|r| r.method == method && url.ends_with(&r.path))
            .max_by_key(|r| r.path.len())
            .and_then(|route| {
                if route.replies.len() > 1 {
                    route.replies.pop_front()
                } else {
                    route.replies.front().cloned()
                }
            });

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Refuse) | None => Err(HarnessError::Http {
                url,
                message: "connection refused".into(),
            }),
        }
    }
}

fn owned_headers(headers: &[(&str, &str)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

impl HttpClient for ScriptedHttp {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        self.answer(RecordedRequest {
            method: Method::Get,
            url: url.to_string(),
            body: None,
            headers: owned_headers(headers),
        })
    }

    fn post(
        &self,
        url: &str,
        body: Option<&serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        self.answer(RecordedRequest {
            method: Method::Post,
            url: url.to_string(),
            body: body.cloned(),
            headers: owned_headers(headers),
        })
    }
}
