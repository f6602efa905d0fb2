//! Episode archival side channel.
//!
//! After a successful gateway action the request/response pair is posted to
//! the memory service on a background thread. Nothing that happens there is
//! reported back: the spawn entry point returns `()` and every failure is
//! logged at debug level and dropped.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::builder::iso_timestamp;
use crate::error::TransportError;
use crate::model::{AppConfig, EpisodeInputs, EpisodeMeta, EpisodeOutputs, EpisodePayload};
use crate::transport::{HttpReply, Transport, endpoint};

pub const DOMAIN: &str = "invoice";
pub const APP_SOURCE: &str = "invoice-console/app";
pub const OPERATOR_SOURCE: &str = "invoice-console/operator";

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub base_url: String,
    pub token: String,
}

impl ArchiveTarget {
    /// Dedicated memory settings win; the gateway ones fill any gap.
    pub fn resolve(memory_base_url: &str, memory_token: &str, gateway_base_url: &str, gateway_token: &str) -> Option<Self> {
        let base_url = first_non_empty(memory_base_url, gateway_base_url)?;
        let token = first_non_empty(memory_token, gateway_token)?;
        Some(Self {
            base_url: base_url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Option<Self> {
        Self::resolve(
            &config.memory_base_url,
            &config.memory_token,
            &config.gateway_base_url,
            &config.access_key,
        )
    }
}

fn first_non_empty<'a>(preferred: &'a str, fallback: &'a str) -> Option<&'a str> {
    [preferred, fallback].into_iter().find(|s| !s.is_empty())
}

/// `ui_<millis>_<6 base36 chars>`
pub fn episode_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("ui_{}_{}", now.timestamp_millis(), suffix)
}

pub struct EpisodeDraft {
    pub action: String,
    pub gw_request_id: Option<String>,
    pub request: Value,
    pub response: Value,
    pub http_status: Option<u16>,
    pub meta: EpisodeMeta,
}

pub fn build_episode(draft: EpisodeDraft, now: DateTime<Utc>) -> EpisodePayload {
    EpisodePayload {
        episode_id: episode_id(now),
        domain: DOMAIN.to_string(),
        action: draft.action,
        ts_iso: iso_timestamp(now),
        gw_request_id: draft.gw_request_id,
        inputs: EpisodeInputs { request: draft.request },
        outputs: EpisodeOutputs {
            http_status: draft.http_status,
            response: draft.response,
        },
        meta: draft.meta,
    }
}

/// One POST to `{base}/episode/store`.
pub fn store_episode(
    transport: &dyn Transport,
    target: &ArchiveTarget,
    episode: &EpisodePayload,
) -> Result<HttpReply, TransportError> {
    let body = serde_json::to_value(episode).map_err(|e| TransportError::Other(e.to_string()))?;
    transport.post_json(&endpoint(&target.base_url, "/episode/store"), &target.token, &body)
}

pub struct EpisodeArchiver {
    transport: Arc<dyn Transport>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl EpisodeArchiver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Fire and forget. Without a resolvable endpoint and token this does nothing.
    pub fn spawn(&self, config: &AppConfig, episode: EpisodePayload) {
        let Some(target) = ArchiveTarget::from_config(config) else {
            tracing::debug!(action = %episode.action, "no archive target, skipping episode");
            return;
        };

        let transport = Arc::clone(&self.transport);
        let spawned = std::thread::Builder::new()
            .name("episode-archiver".into())
            .spawn(move || match store_episode(transport.as_ref(), &target, &episode) {
                Ok(reply) if reply.is_success() => {
                    tracing::debug!(episode_id = %episode.episode_id, "episode stored");
                }
                Ok(reply) => {
                    tracing::debug!(episode_id = %episode.episode_id, status = reply.status, "episode rejected");
                }
                Err(e) => {
                    tracing::debug!(episode_id = %episode.episode_id, error = %e, "episode store failed");
                }
            });

        match spawned {
            Ok(handle) => self.pending().push(handle),
            Err(e) => tracing::debug!(error = %e, "could not spawn archiver thread"),
        }
    }

    /// Waits for every spawned store. Outcomes are discarded.
    pub fn drain(&self) {
        let handles: Vec<_> = self.pending().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
