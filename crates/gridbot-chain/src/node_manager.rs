/*
[INPUT]:  A configured list of node endpoints, periodic latency probes,
          and broadcast/query failures reported by callers.
[OUTPUT]: A latency-ranked, currently-reachable node endpoint to dial next,
          with misbehaving nodes blacklisted and later given another try.
[POS]:    Transport layer - multi-node health/failover. Already a clean,
          reusable module - kept here verbatim in shape, not redesigned.
[UPDATE]: When changing blacklist thresholds or recovery backoff.
*/

use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_BLACKLIST_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeHealth {
    Healthy,
    Blacklisted { until: std::time::Instant },
}

#[derive(Debug, Clone)]
struct NodeRecord {
    url: String,
    latency: Option<Duration>,
    consecutive_failures: u32,
    health: NodeHealth,
}

/// Latency-ranked node pool with blacklist/recovery.
#[derive(Debug)]
pub struct NodeManager {
    nodes: Vec<NodeRecord>,
    failure_threshold: u32,
    blacklist_duration: Duration,
}

impl NodeManager {
    pub fn new(urls: Vec<String>) -> Self {
        Self::with_thresholds(urls, DEFAULT_FAILURE_THRESHOLD, DEFAULT_BLACKLIST_DURATION)
    }

    pub fn with_thresholds(
        urls: Vec<String>,
        failure_threshold: u32,
        blacklist_duration: Duration,
    ) -> Self {
        let nodes = urls
            .into_iter()
            .map(|url| NodeRecord {
                url,
                latency: None,
                consecutive_failures: 0,
                health: NodeHealth::Healthy,
            })
            .collect();

        Self {
            nodes,
            failure_threshold,
            blacklist_duration,
        }
    }

    pub fn record_latency(&mut self, url: &str, latency: Duration) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.url == url) {
            node.latency = Some(latency);
            node.consecutive_failures = 0;
            node.health = NodeHealth::Healthy;
        }
    }

    pub fn record_failure(&mut self, url: &str, now: Instant) {
        let Some(node) = self.nodes.iter_mut().find(|n| n.url == url) else {
            return;
        };

        node.consecutive_failures += 1;
        if node.consecutive_failures >= self.failure_threshold {
            node.health = NodeHealth::Blacklisted {
                until: now + self.blacklist_duration,
            };
        }
    }

    fn recover_expired(&mut self, now: Instant) {
        for node in &mut self.nodes {
            if let NodeHealth::Blacklisted { until } = node.health
                && now >= until
            {
                node.health = NodeHealth::Healthy;
                node.consecutive_failures = 0;
            }
        }
    }

    /// Best reachable node by latency (lowest first); nodes with no
    /// recorded latency sort last but are still eligible.
    pub fn best_node(&mut self, now: Instant) -> Option<&str> {
        self.recover_expired(now);

        self.nodes
            .iter()
            .filter(|n| n.health == NodeHealth::Healthy)
            .min_by(|a, b| match (a.latency, b.latency) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .map(|n| n.url.as_str())
    }

    pub fn healthy_count(&self, now: Instant) -> usize {
        self.nodes
            .iter()
            .filter(|n| match n.health {
                NodeHealth::Healthy => true,
                NodeHealth::Blacklisted { until } => now >= until,
            })
            .count()
    }

    pub fn latencies(&self) -> HashMap<String, Option<Duration>> {
        self.nodes
            .iter()
            .map(|n| (n.url.clone(), n.latency))
            .collect()
    }
}
