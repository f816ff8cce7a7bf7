//! In-memory provisioner for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Provisioner, Secret, TlsCertificateBundle};
use crate::{Error, Result};

/// Records every call; pops scripted failures before succeeding
///
/// Call `n` (1-based) returns one TLS secret per requested name with the
/// certificate chain `chain-n`.
#[derive(Debug, Default)]
pub(crate) struct MockProvisioner {
    calls: Mutex<Vec<Vec<String>>>,
    failures: Mutex<VecDeque<bool>>,
    delay: Option<Duration>,
}

impl MockProvisioner {
    pub(crate) fn failing_on(script: &[bool]) -> Self {
        Self { failures: Mutex::new(script.iter().copied().collect()), ..Default::default() }
    }

    /// Every call sleeps for `delay` before answering
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Default::default() }
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn get_resources(
        &self,
        _session_id: &str,
        resource_names: &[String],
    ) -> Result<Vec<Secret>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(resource_names.to_vec());
            calls.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
            return Err(Error::provisioner(format!("scripted failure on call {}", call)));
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
        "mock"
    }
}
