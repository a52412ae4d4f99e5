//! # Settlement Scheduler
//!
//! Periodic background task that turns concluded events into payout plans.
//! Each cycle:
//!
//! 1. creates a pending plan, scheduled now, for every event whose last
//!    session ended more than `grace_days` ago and that has no plan yet
//! 2. processes every pending plan whose scheduled time has arrived:
//!    gross over paid orders, commission, VAT on the commission, net
//!
//! Each plan is completed in its own transaction, so all four amounts and
//! the status flip land together or not at all. A failed cycle is logged and
//! retried on the next tick.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::error::StoreError;
use crate::models::{PayoutAmounts, PayoutPlan, PayoutStatus};
use crate::store::PipelineStore;

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub plans_created: usize,
    pub plans_processed: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.plans_created == 0 && self.plans_processed == 0
    }
}

/// Split `gross` into commission, VAT on the commission and the organizer's net.
/// Commission and VAT are rounded to cents; net absorbs the rounding.
pub fn compute_amounts(gross: BigDecimal, config: &SettlementConfig) -> PayoutAmounts {
    let commission = (&gross * &config.commission_rate).round(2);
    let vat = (&commission * &config.vat_rate).round(2);
    let net = &gross - &commission - &vat;
    PayoutAmounts {
        gross,
        commission,
        vat,
        net,
    }
}

pub struct SettlementScheduler<S> {
    store: Arc<S>,
    config: SettlementConfig,
}

impl<S: PipelineStore> SettlementScheduler<S> {
    pub fn new(store: Arc<S>, config: SettlementConfig) -> Self {
        Self { store, config }
    }

    /// Run one cycle as of `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, StoreError> {
        let plans_created = self.plan_concluded_events(now).await?;

        let due = {
            let mut tx = self.store.begin().await?;
            self.store.due_payout_plans(&mut tx, now).await?
        };

        let mut plans_processed = 0;
        for plan in &due {
            if self.process_plan(plan, now).await? {
                plans_processed += 1;
            }
        }

        Ok(CycleReport {
            plans_created,
            plans_processed,
        })
    }

    async fn plan_concluded_events(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let Some(cutoff) = Duration::try_days(self.config.grace_days)
            .and_then(|grace| now.checked_sub_signed(grace))
        else {
            error!(
                grace_days = self.config.grace_days,
                "Grace period out of range; no payout plans created"
            );
            return Ok(0);
        };
        let mut created = 0;
        let mut tx = self.store.begin().await?;
        let events = self.store.events_due_for_payout(&mut tx, cutoff).await?;
        for event_id in &events {
            let plan = PayoutPlan {
                id: Uuid::new_v4(),
                event_id: *event_id,
                status: PayoutStatus::Pending,
                scheduled_at: now,
                created_at: now,
                processed_at: None,
                gross_amount: None,
                commission_amount: None,
                vat_amount: None,
                net_amount: None,
            };
            if self.store.insert_payout_plan(&mut tx, &plan).await? {
                created += 1;
                info!("Payout plan {} created for event {}", plan.id, event_id);
            } else {
                debug!("Event {} already has a payout plan", event_id);
            }
        }
        self.store.commit(tx).await?;
        Ok(created)
    }

    async fn process_plan(&self, plan: &PayoutPlan, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;
        let gross = self.store.paid_gross(&mut tx, plan.event_id).await?;
        let amounts = compute_amounts(gross, &self.config);
        if !self
            .store
            .complete_payout_plan(&mut tx, plan.id, &amounts, now)
            .await?
        {
            warn!("Payout plan {} was no longer pending; skipped", plan.id);
            return Ok(false);
        }
        self.store.commit(tx).await?;
        info!(
            "Payout plan {} processed: gross {} commission {} vat {} net {}",
            plan.id, amounts.gross, amounts.commission, amounts.vat, amounts.net
        );
        Ok(true)
    }

    /// Start the periodic loop in a background task.
    pub fn spawn(self) -> SettlementHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run_loop(shutdown_rx));
        SettlementHandle { shutdown_tx, task }
    }

    async fn run_loop(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            grace_days = self.config.grace_days,
            "Settlement scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report.is_idle() => debug!("Settlement cycle: nothing to do"),
                        Ok(report) => info!(
                            plans_created = report.plans_created,
                            plans_processed = report.plans_processed,
                            "Settlement cycle complete"
                        ),
                        Err(e) => error!(error = %e, "Settlement cycle failed; retrying next tick"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Settlement scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the scheduler.
pub struct SettlementHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SettlementHandle {
    /// Signal shutdown and wait for the in-flight cycle, if any, to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Settlement scheduler task ended abnormally");
        }
        info!("Settlement scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentsConfig;
    use crate::handlers::checkout::admit;
    use crate::handlers::fixtures::catalog;
    use crate::models::{CheckoutItem, CheckoutRequest, EventSession, OrderStatus};
    use crate::store::MemoryStore;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    async fn session(store: &MemoryStore, event_id: Uuid, ended: DateTime<Utc>) {
        store
            .seed_session(EventSession {
                id: Uuid::new_v4(),
                event_id,
                start_at: ended - Duration::hours(3),
                end_at: Some(ended),
            })
            .await;
    }

    #[test]
    fn amounts_follow_the_commission_and_vat_rates() {
        let amounts = compute_amounts(dec("200"), &SettlementConfig::default());
        assert_eq!(amounts.commission, dec("50"));
        assert_eq!(amounts.vat, dec("10"));
        assert_eq!(amounts.net, dec("140"));
    }

    #[test]
    fn rounding_lands_in_net() {
        let amounts = compute_amounts(dec("33.33"), &SettlementConfig::default());
        assert_eq!(amounts.commission, dec("8.33"));
        assert_eq!(amounts.vat, dec("1.67"));
        assert_eq!(amounts.net, dec("23.33"));
        assert_eq!(
            &amounts.commission + &amounts.vat + &amounts.net,
            amounts.gross
        );
    }

    #[tokio::test]
    async fn plans_only_events_past_the_grace_period_once() {
        let c = catalog(100, 10).await;
        let now = Utc::now();
        session(&c.store, c.event_id, now - Duration::days(6)).await;
        session(&c.store, c.event_id, now - Duration::days(10)).await;

        let scheduler = SettlementScheduler::new(Arc::new(c.store.clone()), SettlementConfig::default());
        let report = scheduler.run_cycle(now).await.unwrap();
        assert!(report.is_idle(), "latest session ended only six days ago");

        let later = now + Duration::days(2);
        let report = scheduler.run_cycle(later).await.unwrap();
        assert_eq!(report, CycleReport { plans_created: 1, plans_processed: 1 });

        let report = scheduler.run_cycle(later + Duration::days(1)).await.unwrap();
        assert!(report.is_idle());
        assert_eq!(c.store.payout_plans().await.len(), 1);
    }

    #[tokio::test]
    async fn gross_counts_only_paid_orders() {
        let c = catalog(100, 10).await;
        let now = Utc::now();
        session(&c.store, c.event_id, now - Duration::days(8)).await;

        let req = CheckoutRequest {
            event_id: c.event_id,
            items: vec![CheckoutItem { ticket_type_id: c.ticket_type_id, quantity: 2 }],
            currency: None,
        };
        let paid = admit(&c.store, &PaymentsConfig::default(), Uuid::new_v4(), &req, now)
            .await
            .unwrap();
        admit(&c.store, &PaymentsConfig::default(), Uuid::new_v4(), &req, now)
            .await
            .unwrap();
        c.store.force_order_status(paid.order_id, OrderStatus::Paid).await;

        let scheduler = SettlementScheduler::new(Arc::new(c.store.clone()), SettlementConfig::default());
        scheduler.run_cycle(now).await.unwrap();

        let plan = &c.store.payout_plans().await[0];
        assert_eq!(plan.status, PayoutStatus::Processed);
        assert_eq!(plan.gross_amount, Some(dec("200")));
        assert_eq!(plan.commission_amount, Some(dec("50")));
        assert_eq!(plan.vat_amount, Some(dec("10")));
        assert_eq!(plan.net_amount, Some(dec("140")));
        assert!(plan.processed_at.is_some());
    }

    #[tokio::test]
    async fn oversized_grace_period_keeps_the_loop_alive() {
        let c = catalog(100, 10).await;
        session(&c.store, c.event_id, Utc::now() - Duration::days(30)).await;
        let config = SettlementConfig {
            interval: std::time::Duration::from_millis(10),
            grace_days: 200_000_000_000,
            ..SettlementConfig::default()
        };

        let scheduler = SettlementScheduler::new(Arc::new(c.store.clone()), config);
        assert!(scheduler.run_cycle(Utc::now()).await.unwrap().is_idle());

        let handle = scheduler.spawn();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(handle.is_running());
        handle.shutdown().await;
        assert!(c.store.payout_plans().await.is_empty());
    }

    #[tokio::test]
    async fn planned_events_are_not_counted_twice() {
        let c = catalog(100, 10).await;
        let mut tx = c.store.begin().await.unwrap();
        let plan = PayoutPlan {
            id: Uuid::new_v4(),
            event_id: c.event_id,
            status: PayoutStatus::Pending,
            scheduled_at: Utc::now(),
            created_at: Utc::now(),
            processed_at: None,
            gross_amount: None,
            commission_amount: None,
            vat_amount: None,
            net_amount: None,
        };
        assert!(c.store.insert_payout_plan(&mut tx, &plan).await.unwrap());
        let twin = PayoutPlan { id: Uuid::new_v4(), ..plan.clone() };
        assert!(!c.store.insert_payout_plan(&mut tx, &twin).await.unwrap());
        c.store.commit(tx).await.unwrap();
        assert_eq!(c.store.payout_plans().await.len(), 1);
    }

    #[tokio::test]
    async fn spawned_loop_runs_and_stops() {
        let c = catalog(100, 10).await;
        session(&c.store, c.event_id, Utc::now() - Duration::days(30)).await;
        let config = SettlementConfig {
            interval: std::time::Duration::from_millis(10),
            ..SettlementConfig::default()
        };

        let handle = SettlementScheduler::new(Arc::new(c.store.clone()), config).spawn();
        for _ in 0..100 {
            if !c.store.payout_plans().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(handle.is_running());
        handle.shutdown().await;

        let plans = c.store.payout_plans().await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].status, PayoutStatus::Processed);
    }
}
