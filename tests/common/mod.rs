//! Common test utilities for the SDS integration tests.
//!
//! Provides an in-memory provisioner and a harness that drives one SDS
//! stream through in-process channels.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use envoy_types::pb::envoy::config::core::v3::Node;
use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use sds_server::secrets::{Provisioner, Secret, TlsCertificateBundle, KNOWN_RESOURCES};
use sds_server::xds::run_secret_stream;
use sds_server::{Error, Result, SecretsManager};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

pub const PERIOD: Duration = Duration::from_secs(60);

/// Serves `chain-<n>` bundles, where n counts calls; fails the listed calls
#[derive(Debug, Default)]
pub struct StaticProvisioner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    failing_calls: Vec<usize>,
}

impl StaticProvisioner {
    pub fn failing_first_call() -> Self {
        Self::failing_on_call(1)
    }

    /// Call `call` (1-based) fails; every other call succeeds
    pub fn failing_on_call(call: usize) -> Self {
        Self { failing_calls: vec![call], ..Default::default() }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl Provisioner for StaticProvisioner {
    async fn get_resources(&self, session_id: &str, resource_names: &[String]) -> Result<Vec<Secret>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((session_id.to_string(), resource_names.to_vec()));
            calls.len()
        };

        if self.failing_calls.contains(&call) {
            return Err(Error::provisioner("backend unavailable"));
        }
        if let Some(unknown) =
            resource_names.iter().find(|name| !KNOWN_RESOURCES.contains(&name.as_str()))
        {
            return Err(Error::unknown_resource(unknown.clone()));
        }

        Ok(resource_names
            .iter()
            .map(|name| {
                Secret::tls_certificate(
                    name.clone(),
                    TlsCertificateBundle::new(format!("chain-{}", call), "key", ""),
                )
            })
            .collect())
    }

    fn kind(&self) -> &'static str {
        "static"
    }
}

pub fn initial_request(node_id: &str, resources: &[&str]) -> DiscoveryRequest {
    DiscoveryRequest {
        node: Some(Node { id: node_id.to_string(), ..Default::default() }),
        resource_names: resources.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn ack(response: &DiscoveryResponse) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: response.version_info.clone(),
        response_nonce: response.nonce.clone(),
        ..Default::default()
    }
}

/// One SDS stream driven through in-process channels
pub struct StreamHarness {
    pub requests: mpsc::Sender<std::result::Result<DiscoveryRequest, Status>>,
    pub responses: mpsc::Receiver<std::result::Result<DiscoveryResponse, Status>>,
    pub task: JoinHandle<std::result::Result<(), Status>>,
}

impl StreamHarness {
    pub fn start(manager: Arc<SecretsManager>, stop: CancellationToken) -> Self {
        let (requests, inbound) = mpsc::channel(8);
        let (outbound, responses) = mpsc::channel(8);
        let task = tokio::spawn(run_secret_stream(
            manager,
            stop,
            ReceiverStream::new(inbound),
            outbound,
        ));
        Self { requests, responses, task }
    }

    pub async fn send(&self, request: DiscoveryRequest) {
        self.requests.send(Ok(request)).await.unwrap();
    }

    pub async fn next_response(&mut self) -> DiscoveryResponse {
        self.responses.recv().await.expect("stream ended").expect("stream returned an error")
    }

    /// Close the request side and wait for the stream result
    pub async fn finish(self) -> std::result::Result<(), Status> {
        drop(self.requests);
        self.task.await.unwrap()
    }
}
