//! HTTP link to the panel controller.
//!
//! Endpoints:
//!
//! - `GET /status` - liveness probe
//! - `GET /fire-alarm/data` - latest raw frame, either as a JSON object with
//!   a `raw_data` string field or as the bare frame text
//! - `POST /fire-alarm/command` - JSON `{command, parameters, timestamp}`
//!
//! [`spawn_poller`] fetches the frame on an interval and re-targets itself
//! whenever the watched [`Config`] changes.
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, PanelConfig};
use crate::monitor::CommandSink;
use crate::protocol::CommandRecord;

const USER_AGENT: &str = concat!("firewatch/", env!("CARGO_PKG_VERSION"));
/// Response times kept for the min/avg/max figures.
const RESPONSE_WINDOW: usize = 50;

/// Request counters and a sliding window of response times.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    pub requests: u64,
    pub errors: u64,
    response_ms: VecDeque<u64>,
}

impl PollStats {
    pub fn record_success(&mut self, elapsed: Duration) {
        self.requests += 1;
        if self.response_ms.len() == RESPONSE_WINDOW {
            self.response_ms.pop_front();
        }
        self.response_ms.push_back(elapsed.as_millis() as u64);
    }

    pub fn record_error(&mut self) {
        self.requests += 1;
        self.errors += 1;
    }

    /// Percentage of successful requests; 0 before the first request.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.requests - self.errors) as f64 / self.requests as f64 * 100.0
    }

    pub fn avg_response_ms(&self) -> Option<u64> {
        if self.response_ms.is_empty() {
            return None;
        }
        Some(self.response_ms.iter().sum::<u64>() / self.response_ms.len() as u64)
    }

    pub fn min_response_ms(&self) -> Option<u64> {
        self.response_ms.iter().copied().min()
    }

    pub fn max_response_ms(&self) -> Option<u64> {
        self.response_ms.iter().copied().max()
    }

    pub fn samples(&self) -> usize {
        self.response_ms.len()
    }
}

/// Outcome of a `/status` probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub url: String,
    pub success: bool,
    pub status: Option<u16>,
    pub response_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct CommandBody<'a> {
    command: &'a str,
    parameters: CommandParameters<'a>,
    timestamp: i64,
}

#[derive(Serialize)]
struct CommandParameters<'a> {
    id: String,
    status_byte: &'a str,
}

/// Pull the raw frame out of a `/fire-alarm/data` response body.
///
/// JSON objects must carry a string `raw_data` field; anything else that
/// parses as JSON yields `None`, the same as a deleted record. Non-JSON
/// bodies are taken as the frame itself.
pub fn extract_raw_frame(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .get("raw_data")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Err(_) => Some(trimmed.to_string()),
    }
}

pub struct PanelClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl PanelClient {
    pub fn new(panel: &PanelConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            base_url: panel.base_url(),
            timeout: panel.timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /status`, never failing: errors are reported in the result.
    pub async fn probe(&self) -> ProbeReport {
        let url = format!("{}/status", self.base_url);
        let started = Instant::now();
        let result = self.client.get(&url).timeout(self.timeout).send().await;
        let response_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.ok();
                ProbeReport {
                    url,
                    success: status.is_success(),
                    status: Some(status.as_u16()),
                    response_ms,
                    body,
                    error: None,
                }
            }
            Err(e) => ProbeReport {
                url,
                success: false,
                status: None,
                response_ms,
                body: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// `GET /fire-alarm/data`; `Ok(None)` when the body holds no frame.
    pub async fn fetch_frame(&self) -> Result<Option<String>> {
        let url = format!("{}/fire-alarm/data", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(anyhow!("Panel returned status: {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        Ok(extract_raw_frame(&body))
    }

    /// `POST /fire-alarm/command`. Commands get twice the read timeout.
    pub async fn send_command(&self, record: &CommandRecord) -> Result<()> {
        let url = format!("{}/fire-alarm/command", self.base_url);
        let body = CommandBody {
            command: record.operation.as_str(),
            parameters: CommandParameters {
                id: record.id.to_string(),
                status_byte: &record.status_byte,
            },
            timestamp: record.timestamp.timestamp_millis(),
        };
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout * 2)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(anyhow!("Panel rejected command: {}", resp.status()));
        }
        Ok(())
    }
}

/// Command sink posting to the controller.
pub struct HttpCommandSink {
    client: PanelClient,
}

impl HttpCommandSink {
    pub fn new(panel: &PanelConfig) -> Result<Self> {
        Ok(Self {
            client: PanelClient::new(panel)?,
        })
    }
}

impl CommandSink for HttpCommandSink {
    async fn submit(&self, record: &CommandRecord) -> Result<()> {
        self.client.send_command(record).await
    }
}

/// Poll `/fire-alarm/data` every `monitoring_interval_ms`, forwarding each
/// result to `tx`. Failed polls are counted and skipped, not forwarded.
///
/// The task ends when `tx`'s receiver is dropped and returns its stats.
pub fn spawn_poller(
    mut config: watch::Receiver<Config>,
    tx: mpsc::UnboundedSender<Option<String>>,
) -> JoinHandle<PollStats> {
    tokio::spawn(async move {
        let mut stats = PollStats::default();
        let mut panel = config.borrow_and_update().panel.clone();
        let mut client = match PanelClient::new(&panel) {
            Ok(c) => c,
            Err(e) => {
                warn!("HTTP poller not started: {}", e);
                return stats;
            }
        };
        let mut ticker = tokio::time::interval(panel.monitoring_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "Polling {} every {}ms",
            client.base_url(),
            panel.monitoring_interval_ms
        );

        let mut config_open = true;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = config.changed(), if config_open => {
                    if changed.is_err() {
                        // config service gone; keep polling the last target
                        config_open = false;
                        continue;
                    }
                    let next = config.borrow_and_update().panel.clone();
                    if next != panel {
                        match PanelClient::new(&next) {
                            Ok(c) => {
                                info!("Panel address changed: {} -> {}", client.base_url(), c.base_url());
                                client = c;
                                if next.monitoring_interval_ms != panel.monitoring_interval_ms {
                                    ticker = tokio::time::interval(next.monitoring_interval());
                                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                                }
                                panel = next;
                            }
                            Err(e) => warn!("Keeping previous panel client: {}", e),
                        }
                    }
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match client.fetch_frame().await {
                        Ok(frame) => {
                            stats.record_success(started.elapsed());
                            debug!("Polled frame in {}ms", started.elapsed().as_millis());
                            if tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            stats.record_error();
                            warn!("Poll of {} failed: {}", client.base_url(), e);
                        }
                    }
                }
            }
        }
        stats
    })
}
