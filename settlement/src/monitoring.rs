//! Settlement health monitoring
//!
//! A recurring read-only sweep over the full settlement set. It never
//! mutates a settlement; it computes a metrics snapshot, updates the
//! Prometheus gauges, and emits tiered alerts keyed on
//! `settlement-id:condition` so downstream consumers can deduplicate.
//!
//! # Metrics
//!
//! - `settlement_pending` - settlements still at PENDING
//! - `settlement_in_progress` - non-terminal, past PENDING
//! - `settlement_settled_today` - reached SETTLED on the sweep date
//! - `settlement_failed_total` - FAILED settlements
//! - `settlement_overdue` - non-terminal, past current-stage due date
//! - `settlement_critically_overdue` - overdue past the ERROR threshold
//! - `settlement_active_alerts{severity}` - alerts emitted by the last sweep
//! - `settlement_monitoring_sweep_duration_seconds` - sweep wall time

use chrono::{DateTime, Utc};
use prometheus::{Histogram, HistogramOpts, IntGauge, IntGaugeVec, Opts, Registry};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use exchange_core::CertificateType;

use crate::config::MonitoringConfig;
use crate::error::Error;
use crate::service::SettlementService;
use crate::types::{Settlement, SettlementStage};

/// Alert tier, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    /// Overdue, or parked in one stage unusually long
    Warning,
    /// Overdue past the error threshold
    Error,
    /// Failed settlement awaiting acknowledgement
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        };
        write!(f, "{}", name)
    }
}

/// Condition component of an alert key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCondition {
    /// Settlement is in the Failed stage
    Failed,
    /// Non-terminal settlement past its current-stage due date
    Overdue,
    /// Parked in one stage for more than twice its normal duration
    Stuck,
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertCondition::Failed => "failed",
            AlertCondition::Overdue => "overdue",
            AlertCondition::Stuck => "stuck",
        };
        write!(f, "{}", name)
    }
}

/// One alert raised by a monitoring sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Stable deduplication key: `settlement-id:condition`
    pub key: String,
    /// Severity tier
    pub severity: AlertSeverity,
    /// Settlement the alert concerns
    pub settlement_id: Uuid,
    /// Condition that raised the alert
    pub condition: AlertCondition,
    /// Human-readable description
    pub message: String,
    /// Sweep instant that raised the alert
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn new(
        settlement_id: Uuid,
        condition: AlertCondition,
        severity: AlertSeverity,
        message: String,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: format!("{}:{}", settlement_id, condition),
            severity,
            settlement_id,
            condition,
            message,
            raised_at,
        }
    }
}

/// Aggregate health metrics over the full settlement set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Settlements still at PENDING
    pub pending_count: usize,
    /// Non-terminal settlements past PENDING
    pub in_progress_count: usize,
    /// Settlements that reached SETTLED on the snapshot date
    pub settled_today: usize,
    /// Settlements that have ever reached SETTLED
    pub settled_count: usize,
    /// FAILED settlements
    pub failed_count: usize,
    /// Non-terminal settlements past their current-stage due date
    pub overdue_count: usize,
    /// Overdue past the error threshold
    pub critically_overdue_count: usize,
    /// Sum of quantity x reference price over pending settlements
    pub pending_value: Decimal,
    /// Sum of quantity x reference price over settled settlements
    pub settled_value: Decimal,
    /// Mean days from trade date to SETTLED, over settled entries
    pub average_settlement_days: Option<Decimal>,
}

impl MetricsSnapshot {
    /// All settlements accounted for by the snapshot
    pub fn total(&self) -> usize {
        self.pending_count + self.in_progress_count + self.settled_count + self.failed_count
    }
}

/// Snapshot plus the alerts raised alongside it
#[derive(Debug, Clone)]
pub struct MonitoringReport {
    /// Sweep instant
    pub generated_at: DateTime<Utc>,
    /// Metrics at sweep time
    pub metrics: MetricsSnapshot,
    /// Alerts raised this sweep, acknowledged ones excluded
    pub alerts: Vec<Alert>,
}

/// End-of-day roll-up: the sweep report plus the settlements that
/// completed on the report date
#[derive(Debug, Clone)]
pub struct DailyReport {
    /// Underlying sweep report
    pub report: MonitoringReport,
    /// Settlements that reached SETTLED on the report date
    pub settled_today: Vec<Settlement>,
}

/// Prometheus instruments updated by each sweep, on a private registry
#[derive(Clone)]
struct Gauges {
    pending: IntGauge,
    in_progress: IntGauge,
    settled_today: IntGauge,
    failed_total: IntGauge,
    overdue: IntGauge,
    critically_overdue: IntGauge,
    active_alerts: IntGaugeVec,
    sweep_duration: Histogram,
    registry: Arc<Registry>,
}

impl Gauges {
    fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let pending = IntGauge::new("settlement_pending", "Settlements still at PENDING")?;
        registry.register(Box::new(pending.clone()))?;

        let in_progress = IntGauge::new(
            "settlement_in_progress",
            "Non-terminal settlements past PENDING",
        )?;
        registry.register(Box::new(in_progress.clone()))?;

        let settled_today = IntGauge::new(
            "settlement_settled_today",
            "Settlements settled on the current date",
        )?;
        registry.register(Box::new(settled_today.clone()))?;

        let failed_total = IntGauge::new("settlement_failed_total", "Failed settlements")?;
        registry.register(Box::new(failed_total.clone()))?;

        let overdue = IntGauge::new(
            "settlement_overdue",
            "Non-terminal settlements past their current-stage due date",
        )?;
        registry.register(Box::new(overdue.clone()))?;

        let critically_overdue = IntGauge::new(
            "settlement_critically_overdue",
            "Settlements overdue past the error threshold",
        )?;
        registry.register(Box::new(critically_overdue.clone()))?;

        let active_alerts = IntGaugeVec::new(
            Opts::new(
                "settlement_active_alerts",
                "Alerts emitted by the last monitoring sweep",
            ),
            &["severity"],
        )?;
        registry.register(Box::new(active_alerts.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_monitoring_sweep_duration_seconds",
                "Monitoring sweep wall time",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        Ok(Self {
            pending,
            in_progress,
            settled_today,
            failed_total,
            overdue,
            critically_overdue,
            active_alerts,
            sweep_duration,
            registry,
        })
    }
}

/// Recurring read-only health sweep over a settlement service
pub struct SettlementMonitor {
    service: Arc<SettlementService>,
    config: MonitoringConfig,
    gauges: Gauges,
    reference_prices: RwLock<HashMap<CertificateType, Decimal>>,
    acknowledged: RwLock<HashSet<String>>,
    last_report: RwLock<Option<MonitoringReport>>,
}

impl fmt::Debug for SettlementMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SettlementMonitor {
    /// Create a monitor over the service
    pub fn new(
        service: Arc<SettlementService>,
        config: MonitoringConfig,
    ) -> crate::Result<Self> {
        let gauges = Gauges::new().map_err(|e| Error::Metrics(e.to_string()))?;
        Ok(Self {
            service,
            config,
            gauges,
            reference_prices: RwLock::new(HashMap::new()),
            acknowledged: RwLock::new(HashSet::new()),
            last_report: RwLock::new(None),
        })
    }

    /// Record the latest traded price for a certificate type, used to
    /// value pending and settled positions
    pub async fn set_reference_price(&self, certificate_type: CertificateType, price: Decimal) {
        self.reference_prices
            .write()
            .await
            .insert(certificate_type, price);
    }

    /// Suppress future alerts with this key (operator has seen it)
    pub async fn acknowledge(&self, key: &str) {
        self.acknowledged.write().await.insert(key.to_string());
    }

    /// Prometheus registry holding the monitor's gauges
    pub fn registry(&self) -> Arc<Registry> {
        self.gauges.registry.clone()
    }

    /// Report from the most recent sweep, if one has run
    pub async fn last_report(&self) -> Option<MonitoringReport> {
        self.last_report.read().await.clone()
    }

    /// Run a single read-only sweep at the given instant
    pub async fn run_once(&self, now: DateTime<Utc>) -> crate::Result<MonitoringReport> {
        let started = std::time::Instant::now();
        let all = self.service.list_all().await?;
        let prices = self.reference_prices.read().await.clone();
        let acked = self.acknowledged.read().await.clone();

        let metrics = self.compute_metrics(&all, &prices, now);
        let alerts = self.compute_alerts(&all, &acked, now);

        self.gauges.pending.set(metrics.pending_count as i64);
        self.gauges.in_progress.set(metrics.in_progress_count as i64);
        self.gauges.settled_today.set(metrics.settled_today as i64);
        self.gauges.failed_total.set(metrics.failed_count as i64);
        self.gauges.overdue.set(metrics.overdue_count as i64);
        self.gauges
            .critically_overdue
            .set(metrics.critically_overdue_count as i64);
        for severity in [
            AlertSeverity::Warning,
            AlertSeverity::Error,
            AlertSeverity::Critical,
        ] {
            let count = alerts.iter().filter(|a| a.severity == severity).count();
            let label = severity.to_string();
            self.gauges
                .active_alerts
                .with_label_values(&[label.as_str()])
                .set(count as i64);
        }

        for alert in &alerts {
            match alert.severity {
                AlertSeverity::Critical | AlertSeverity::Error => warn!(
                    key = %alert.key,
                    severity = %alert.severity,
                    "{}", alert.message
                ),
                AlertSeverity::Warning => info!(
                    key = %alert.key,
                    severity = %alert.severity,
                    "{}", alert.message
                ),
            }
        }

        let report = MonitoringReport {
            generated_at: now,
            metrics,
            alerts,
        };
        *self.last_report.write().await = Some(report.clone());
        self.gauges
            .sweep_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(report)
    }

    /// End-of-day roll-up for the sweep date: the report plus the
    /// settlements that completed that day
    pub async fn daily_report(&self, now: DateTime<Utc>) -> crate::Result<DailyReport> {
        let report = self.run_once(now).await?;
        let today = now.date_naive();
        let settled_today = self
            .service
            .list_all()
            .await?
            .into_iter()
            .filter(|s| {
                s.stage == SettlementStage::Settled
                    && s.settled_at.is_some_and(|at| at.date_naive() == today)
            })
            .collect();
        Ok(DailyReport {
            report,
            settled_today,
        })
    }

    fn compute_metrics(
        &self,
        all: &[Settlement],
        prices: &HashMap<CertificateType, Decimal>,
        now: DateTime<Utc>,
    ) -> MetricsSnapshot {
        let today = now.date_naive();
        let value_of = |s: &Settlement| {
            prices
                .get(&s.certificate_type)
                .map(|price| *price * Decimal::from(s.quantity))
                .unwrap_or(Decimal::ZERO)
        };

        let mut snapshot = MetricsSnapshot {
            pending_count: 0,
            in_progress_count: 0,
            settled_today: 0,
            settled_count: 0,
            failed_count: 0,
            overdue_count: 0,
            critically_overdue_count: 0,
            pending_value: Decimal::ZERO,
            settled_value: Decimal::ZERO,
            average_settlement_days: None,
        };

        let mut duration_days = Decimal::ZERO;
        for s in all {
            match s.stage {
                SettlementStage::Pending => {
                    snapshot.pending_count += 1;
                    snapshot.pending_value += value_of(s);
                }
                SettlementStage::Settled => {
                    snapshot.settled_count += 1;
                    snapshot.settled_value += value_of(s);
                    if let Some(settled_at) = s.settled_at {
                        if settled_at.date_naive() == today {
                            snapshot.settled_today += 1;
                        }
                        duration_days +=
                            Decimal::from((settled_at.date_naive() - s.trade_date).num_days());
                    }
                }
                SettlementStage::Failed => snapshot.failed_count += 1,
                _ => snapshot.in_progress_count += 1,
            }

            if s.is_overdue(now) {
                snapshot.overdue_count += 1;
                if s.days_overdue(now) >= self.config.overdue_error_days {
                    snapshot.critically_overdue_count += 1;
                }
            }
        }

        if snapshot.settled_count > 0 {
            snapshot.average_settlement_days =
                Some(duration_days / Decimal::from(snapshot.settled_count));
        }

        snapshot
    }

    /// At most one alert per settlement, highest applicable tier
    fn compute_alerts(
        &self,
        all: &[Settlement],
        acked: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for s in all {
            let alert = if s.stage == SettlementStage::Failed {
                Some(Alert::new(
                    s.settlement_id,
                    AlertCondition::Failed,
                    AlertSeverity::Critical,
                    format!(
                        "Settlement {} failed: {}",
                        s.settlement_id,
                        s.failure_reason.as_deref().unwrap_or("unknown")
                    ),
                    now,
                ))
            } else if !s.is_terminal()
                && s.days_overdue(now) >= self.config.overdue_warning_days
            {
                let days = s.days_overdue(now);
                let severity = if days >= self.config.overdue_error_days {
                    AlertSeverity::Error
                } else {
                    AlertSeverity::Warning
                };
                Some(Alert::new(
                    s.settlement_id,
                    AlertCondition::Overdue,
                    severity,
                    format!(
                        "Settlement {} at {} is {} day(s) overdue",
                        s.settlement_id, s.stage, days
                    ),
                    now,
                ))
            } else if self.is_stuck(s, now) {
                Some(Alert::new(
                    s.settlement_id,
                    AlertCondition::Stuck,
                    AlertSeverity::Warning,
                    format!(
                        "Settlement {} has been at {} unusually long",
                        s.settlement_id, s.stage
                    ),
                    now,
                ))
            } else {
                None
            };

            if let Some(alert) = alert {
                if !acked.contains(&alert.key) {
                    alerts.push(alert);
                }
            }
        }

        alerts
    }

    /// Parked in one stage for more than twice its normal duration
    fn is_stuck(&self, s: &Settlement, now: DateTime<Utc>) -> bool {
        let Some(normal_hours) = self.config.stage_duration_hours.for_stage(s.stage) else {
            return false;
        };
        let elapsed = now - s.stage_entered_at;
        elapsed.num_hours() > 2 * normal_hours as i64
    }

    /// Spawn the recurring sweep on its configured interval
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(Utc::now()).await {
                    error!(error = %e, "Monitoring sweep failed");
                }
            }
        })
    }
}
