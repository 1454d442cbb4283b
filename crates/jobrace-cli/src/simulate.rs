//! Race simulator
//!
//! Submits a batch of jobs through a simulated transport while the
//! in-memory change feed reports the same jobs with independent delays.
//! Either side may be dropped to exercise the fallback and deadline paths.

use jobrace_channels::{InMemoryChangeFeed, JobSubmitter, JobTransport, TransportError};
use jobrace_core::{
    ArbiterConfig, ChannelKind, CompletionArbiter, HttpFailurePolicy, JobId, JobRecord,
    RaceOptions, RaceStats,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Simulation parameters
#[derive(Debug, Clone)]
pub(crate) struct SimulationConfig {
    pub(crate) jobs: usize,
    pub(crate) http_delay: Duration,
    pub(crate) feed_delay: Duration,
    pub(crate) jitter: Duration,
    pub(crate) deadline: Duration,
    pub(crate) drop_rate: f64,
    pub(crate) seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            jobs: 100,
            http_delay: Duration::from_millis(120),
            feed_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(80),
            deadline: Duration::from_secs(2),
            drop_rate: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Plan {
    http_delay: Duration,
    feed_delay: Duration,
    http_dropped: bool,
    feed_dropped: bool,
}

struct SimulatedTransport {
    plans: HashMap<JobId, Plan>,
}

#[async_trait::async_trait]
impl JobTransport for SimulatedTransport {
    async fn submit(&self, job_id: &JobId, request: Value) -> Result<Value, TransportError> {
        let Some(plan) = self.plans.get(job_id).copied() else {
            return Err(TransportError::Status {
                status: 404,
                body: format!("unknown job {job_id}"),
            });
        };
        if plan.http_dropped {
            // Response lost in transit; only the feed or deadline can end the race.
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(plan.http_delay).await;
        Ok(json!({ "source": "http", "request": request }))
    }
}

/// Simulation results
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimulationReport {
    pub(crate) jobs: usize,
    pub(crate) http_wins: usize,
    pub(crate) channel_wins: usize,
    pub(crate) expired: usize,
    pub(crate) elapsed_ms: u128,
    pub(crate) stats: RaceStats,
}

impl SimulationReport {
    /// Every registration ended in exactly one terminal state
    pub(crate) fn passed(&self) -> bool {
        let s = &self.stats;
        s.registered == self.jobs as u64
            && s.resolved() + s.expired == s.registered
            && s.resolved() == (self.http_wins + self.channel_wins) as u64
            && s.expired == self.expired as u64
            && s.pending == 0
    }

    pub(crate) fn generate_text(&self) -> String {
        format!(
            "Race Simulation Report\n\
             ======================\n\
             Jobs:          {}\n\
             HTTP wins:     {}\n\
             Channel wins:  {}\n\
             Expired:       {}\n\
             Late arrivals: {}\n\
             Elapsed:       {} ms\n\
             Result:        {}",
            self.jobs,
            self.http_wins,
            self.channel_wins,
            self.expired,
            self.stats.late_arrivals,
            self.elapsed_ms,
            if self.passed() { "PASS" } else { "FAIL" },
        )
    }
}

fn jittered(rng: &mut StdRng, base: Duration, jitter: Duration) -> Duration {
    let extra = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    base + Duration::from_millis(rng.random_range(0..=extra))
}

/// Run one simulation
///
/// # Errors
/// Fails if the arbiter cannot be created (no runtime)
pub(crate) async fn run(config: &SimulationConfig) -> anyhow::Result<SimulationReport> {
    let started = Instant::now();
    let feed = InMemoryChangeFeed::new();
    let arbiter = CompletionArbiter::new(
        Arc::new(feed.clone()),
        ArbiterConfig::new().with_default_deadline(config.deadline),
    )?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let drop_rate = config.drop_rate.clamp(0.0, 1.0);
    let plans: Vec<(JobId, Plan)> = (0..config.jobs)
        .map(|i| {
            let plan = Plan {
                http_delay: jittered(&mut rng, config.http_delay, config.jitter),
                feed_delay: jittered(&mut rng, config.feed_delay, config.jitter),
                http_dropped: rng.random_bool(drop_rate),
                feed_dropped: rng.random_bool(drop_rate),
            };
            (JobId::new(format!("sim-{i:05}")), plan)
        })
        .collect();

    let transport = Arc::new(SimulatedTransport {
        plans: plans.iter().cloned().collect(),
    });
    let submitter = JobSubmitter::new(arbiter.clone(), transport)
        .with_failure_policy(HttpFailurePolicy::DeferToChannel);

    let mut pending = Vec::with_capacity(plans.len());
    for (seq, (job_id, plan)) in plans.into_iter().enumerate() {
        pending.push(submitter.submit_with(job_id.clone(), json!({ "seq": seq }), RaceOptions::default()));
        if !plan.feed_dropped {
            let feed = feed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(plan.feed_delay).await;
                feed.publish(&JobRecord::completed(job_id, json!({ "source": "channel" })));
            });
        }
    }

    let resolutions = futures::future::join_all(pending.into_iter().map(|p| p.wait())).await;

    let mut report = SimulationReport {
        jobs: config.jobs,
        http_wins: 0,
        channel_wins: 0,
        expired: 0,
        elapsed_ms: 0,
        stats: RaceStats::default(),
    };
    for resolution in resolutions {
        match resolution.map(|r| r.channel) {
            Some(ChannelKind::Http) => report.http_wins += 1,
            Some(ChannelKind::Channel) => report.channel_wins += 1,
            None => report.expired += 1,
        }
    }
    report.stats = arbiter.stats();
    report.elapsed_ms = started.elapsed().as_millis();

    tracing::info!(
        jobs = report.jobs,
        http_wins = report.http_wins,
        channel_wins = report.channel_wins,
        expired = report.expired,
        "simulation finished"
    );
    arbiter.shutdown();
    Ok(report)
}
