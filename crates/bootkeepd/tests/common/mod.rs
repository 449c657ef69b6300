//! Fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bootkeep_common::{sha256_hex, Manifest, UpdateError, VersionRecord};
use bootkeepd::{AppTarget, HealthProbe, ProbeResult, UpdateSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct FakeSource {
    manifest: Arc<Mutex<Option<Result<Manifest, UpdateError>>>>,
    artifact: Arc<Mutex<Vec<u8>>>,
    fetches: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn publish(&self, version: &str, artifact: &[u8]) {
        self.publish_with_hash(version, artifact, &sha256_hex(artifact));
    }

    pub fn publish_with_hash(&self, version: &str, artifact: &[u8], hash: &str) {
        *self.manifest.lock().unwrap() = Some(Ok(Manifest {
            version: version.to_string(),
            artifact_url: format!("http://updates.local/artifacts/{}", version),
            artifact_hash: hash.to_string(),
            changelog: String::new(),
        }));
        *self.artifact.lock().unwrap() = artifact.to_vec();
    }

    pub fn fail(&self, error: UpdateError) {
        *self.manifest.lock().unwrap() = Some(Err(error));
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateSource for FakeSource {
    async fn fetch_manifest(&self, _current: Option<&VersionRecord>) -> Result<Manifest, UpdateError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.manifest
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(UpdateError::Network("no manifest published".to_string())))
    }

    async fn download_artifact(&self, _manifest: &Manifest) -> Result<Vec<u8>, UpdateError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.artifact.lock().unwrap().clone())
    }
}

/// Returns queued verdicts, then `Healthy`
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    verdicts: Arc<Mutex<VecDeque<ProbeResult>>>,
    probed: Arc<Mutex<Vec<AppTarget>>>,
}

impl ScriptedProbe {
    pub fn then(&self, result: ProbeResult) -> &Self {
        self.verdicts.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, target: &AppTarget, _timeout: Duration) -> ProbeResult {
        self.probed.lock().unwrap().push(target.clone());
        self.verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProbeResult::Healthy)
    }
}
