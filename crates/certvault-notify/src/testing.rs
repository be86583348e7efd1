// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Test doubles shared by the unit tests in this crate.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use certvault_core::error::Result;
use certvault_core::types::{DispatchOutcome, EscalationEvent};

use crate::dispatcher::EscalationSink;
use crate::ingest_server::{HttpRequest, read_request, send_response_with};

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

/// Local HTTP endpoint that records each request and answers with a fixed
/// status and body, or never answers at all.
pub struct CannedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    handle: JoinHandle<()>,
}

impl CannedServer {
    pub async fn start(status: u16, body: &str) -> Self {
        Self::start_with_headers(status, &[], body).await
    }

    pub async fn start_with_headers(status: u16, headers: &[(&str, &str)], body: &str) -> Self {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::spawn(Some(Reply {
            status,
            headers,
            body: body.as_bytes().to_vec(),
        }))
        .await
    }

    /// Accepts connections and reads requests but never responds.
    pub async fn start_silent() -> Self {
        Self::spawn(None).await
    }

    async fn spawn(reply: Option<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            let mut parked = Vec::new();
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                if let Ok(request) = read_request(&mut stream, usize::MAX).await {
                    captured.lock().unwrap().push(request);
                }
                match &reply {
                    Some(reply) => {
                        let headers: Vec<(&str, &str)> = reply
                            .headers
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect();
                        let _ =
                            send_response_with(&mut stream, reply.status, &headers, &reply.body)
                                .await;
                    }
                    None => parked.push(stream),
                }
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/api/v1/cert/ingest", self.addr)
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A URL on localhost that nothing is listening on.
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/api/v1/cert/ingest")
}

/// Sink that replays a script of results and counts calls.
pub struct ScriptedSink {
    script: Mutex<VecDeque<Result<DispatchOutcome>>>,
    calls: AtomicU32,
}

impl ScriptedSink {
    pub fn new(script: Vec<Result<DispatchOutcome>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EscalationSink for ScriptedSink {
    async fn dispatch(&self, _event: &EscalationEvent) -> Result<DispatchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted sink ran out of responses")
    }
}

pub fn outcome(status: u16, body: &str) -> DispatchOutcome {
    DispatchOutcome {
        status,
        body: body.to_owned(),
    }
}
