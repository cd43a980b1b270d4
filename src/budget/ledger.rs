//! Budget ledger: the single source of truth for spend
//!
//! Every provider call goes through a reservation:
//!
//! 1. [`BudgetLedger::reserve`] checks headroom and holds
//!    `estimate * safety_buffer` against the limit, under one lock
//! 2. the call runs
//! 3. [`BudgetLedger::commit`] swaps the hold for the billed cost and appends
//!    a transaction, or [`BudgetLedger::release`] drops the hold when
//!    nothing was billed
//!
//! A check can therefore never pass on headroom that a concurrent call has
//! already claimed. The period is the UTC calendar day; the first mutating
//! call on a new day starts a fresh period.

use super::{micros_to_usd, scale_micros_ceil, usd_to_micros, usd_to_micros_ceil};
use crate::config::BudgetConfig;
use crate::models::ModelId;
use crate::router::{SessionId, TaskId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Result of a non-mutating budget check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetCheck {
    pub allowed: bool,
    /// Headroom in USD before this call
    pub remaining: f64,
    /// Buffered amount the call would hold
    pub required: f64,
}

/// Read-only view of the current period
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetStatus {
    /// Headroom in USD (limit minus spent minus outstanding holds)
    pub remaining: f64,
    pub spent: f64,
    pub limit: f64,
    /// Outstanding reservation holds
    pub reserved: f64,
    pub period: NaiveDate,
}

/// A reservation was refused; nothing was held
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("budget exceeded: {required:.6} USD required, {remaining:.6} USD remaining")]
pub struct BudgetDenied {
    pub remaining: f64,
    pub required: f64,
}

/// One committed charge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    pub task_id: TaskId,
    pub model_id: ModelId,
    pub cost: f64,
    pub cost_micros: u64,
}

/// Budget held for one in-flight call
///
/// Must be settled exactly once with [`BudgetLedger::commit`] or
/// [`BudgetLedger::release`]; an unsettled reservation keeps its hold until
/// the period rolls over.
#[derive(Debug)]
#[must_use = "a reservation holds budget until committed or released"]
pub struct Reservation {
    id: u64,
    session_id: SessionId,
    task_id: TaskId,
    held_micros: u64,
    period: NaiveDate,
}

impl Reservation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Held amount in USD
    pub fn held(&self) -> f64 {
        micros_to_usd(self.held_micros)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionSpend {
    spent: u64,
    reserved: u64,
}

#[derive(Debug)]
struct LedgerState {
    period: NaiveDate,
    spent: u64,
    reserved: u64,
    sessions: HashMap<SessionId, SessionSpend>,
    transactions: Vec<Transaction>,
    next_reservation: u64,
}

impl LedgerState {
    fn new(period: NaiveDate) -> Self {
        Self {
            period,
            spent: 0,
            reserved: 0,
            sessions: HashMap::new(),
            transactions: Vec::new(),
            next_reservation: 1,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.period {
            tracing::info!(
                previous_period = %self.period,
                new_period = %today,
                previous_spent = micros_to_usd(self.spent),
                transactions = self.transactions.len(),
                "Budget period rolled over"
            );
            let next_reservation = self.next_reservation;
            *self = Self::new(today);
            self.next_reservation = next_reservation;
        }
    }

    /// Global and session totals as seen on `today` (a stale period reads as empty)
    fn totals(&self, today: NaiveDate, session: &SessionId) -> (SessionSpend, SessionSpend) {
        if today != self.period {
            return (SessionSpend::default(), SessionSpend::default());
        }
        let global = SessionSpend {
            spent: self.spent,
            reserved: self.reserved,
        };
        let session = self.sessions.get(session).copied().unwrap_or_default();
        (global, session)
    }
}

/// Process-wide spend ledger
pub struct BudgetLedger {
    daily_limit: u64,
    safety_buffer: f64,
    session_limit: Option<u64>,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    /// Create a ledger for the current UTC day
    ///
    /// # Arguments
    /// * `daily_limit` - hard cap in USD per UTC day
    /// * `safety_buffer` - multiplier applied to estimates at check time (>= 1.0)
    /// * `session_limit` - optional per-session cap within the same period
    pub fn new(daily_limit: f64, safety_buffer: f64, session_limit: Option<f64>) -> Self {
        Self::starting_on(daily_limit, safety_buffer, session_limit, Utc::now().date_naive())
    }

    pub(crate) fn starting_on(
        daily_limit: f64,
        safety_buffer: f64,
        session_limit: Option<f64>,
        period: NaiveDate,
    ) -> Self {
        Self {
            daily_limit: usd_to_micros(daily_limit),
            safety_buffer,
            session_limit: session_limit.map(usd_to_micros),
            state: Mutex::new(LedgerState::new(period)),
        }
    }

    /// Create a ledger from the `[budget]` config section
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(
            config.daily_limit(),
            config.safety_buffer_ratio(),
            config.session_limit(),
        )
    }

    pub fn limit(&self) -> f64 {
        micros_to_usd(self.daily_limit)
    }

    pub fn safety_buffer(&self) -> f64 {
        self.safety_buffer
    }

    /// Amount a call with this estimate would hold
    fn hold_for(&self, estimated: f64) -> u64 {
        scale_micros_ceil(usd_to_micros_ceil(estimated), self.safety_buffer)
    }

    /// Headroom left given totals, taking the tighter of global and session caps
    fn headroom(&self, global: SessionSpend, session: SessionSpend) -> u64 {
        let global_left = self
            .daily_limit
            .saturating_sub(global.spent.saturating_add(global.reserved));
        match self.session_limit {
            Some(limit) => {
                global_left.min(limit.saturating_sub(session.spent.saturating_add(session.reserved)))
            }
            None => global_left,
        }
    }

    /// Check whether a call with this estimate would be allowed (non-mutating)
    pub async fn check(&self, session: &SessionId, estimated: f64) -> BudgetCheck {
        self.check_at(session, estimated, Utc::now()).await
    }

    pub(crate) async fn check_at(
        &self,
        session: &SessionId,
        estimated: f64,
        now: DateTime<Utc>,
    ) -> BudgetCheck {
        let state = self.state.lock().await;
        let (global, session_spend) = state.totals(now.date_naive(), session);
        let hold = self.hold_for(estimated);
        let remaining = self.headroom(global, session_spend);
        BudgetCheck {
            allowed: hold <= remaining,
            remaining: micros_to_usd(remaining),
            required: micros_to_usd(hold),
        }
    }

    /// Atomically check and hold budget for one call
    ///
    /// # Errors
    /// Returns [`BudgetDenied`] when the buffered estimate does not fit; no
    /// budget is held in that case.
    pub async fn reserve(
        &self,
        session: &SessionId,
        task: &TaskId,
        estimated: f64,
    ) -> Result<Reservation, BudgetDenied> {
        self.reserve_at(session, task, estimated, Utc::now()).await
    }

    pub(crate) async fn reserve_at(
        &self,
        session: &SessionId,
        task: &TaskId,
        estimated: f64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, BudgetDenied> {
        let mut state = self.state.lock().await;
        state.roll_over(now.date_naive());

        let (global, session_spend) = state.totals(now.date_naive(), session);
        let hold = self.hold_for(estimated);
        let remaining = self.headroom(global, session_spend);

        if hold > remaining {
            tracing::warn!(
                session_id = %session,
                task_id = %task,
                required = micros_to_usd(hold),
                remaining = micros_to_usd(remaining),
                "Budget reservation denied"
            );
            return Err(BudgetDenied {
                remaining: micros_to_usd(remaining),
                required: micros_to_usd(hold),
            });
        }

        state.reserved = state.reserved.saturating_add(hold);
        let entry = state.sessions.entry(session.clone()).or_default();
        entry.reserved = entry.reserved.saturating_add(hold);
        let id = state.next_reservation;
        state.next_reservation += 1;

        tracing::debug!(
            session_id = %session,
            task_id = %task,
            reservation_id = id,
            held = micros_to_usd(hold),
            remaining_after = micros_to_usd(remaining - hold),
            "Budget reserved"
        );

        Ok(Reservation {
            id,
            session_id: session.clone(),
            task_id: task.clone(),
            held_micros: hold,
            period: state.period,
        })
    }

    /// Replace a hold with the billed cost and append a transaction
    ///
    /// The billed cost is recorded as reported even when it exceeds the hold.
    pub async fn commit(
        &self,
        reservation: Reservation,
        model: &ModelId,
        actual_cost: f64,
    ) -> Transaction {
        self.commit_at(reservation, model, actual_cost, Utc::now())
            .await
    }

    pub(crate) async fn commit_at(
        &self,
        reservation: Reservation,
        model: &ModelId,
        actual_cost: f64,
        now: DateTime<Utc>,
    ) -> Transaction {
        let mut state = self.state.lock().await;
        state.roll_over(now.date_naive());
        Self::drop_hold(&mut state, &reservation);

        let actual = usd_to_micros(actual_cost);
        if actual > reservation.held_micros {
            tracing::warn!(
                task_id = %reservation.task_id,
                model_id = %model,
                held = micros_to_usd(reservation.held_micros),
                actual = micros_to_usd(actual),
                "Billed cost exceeded the reserved amount"
            );
        }

        Self::append(
            &mut state,
            now,
            &reservation.session_id,
            &reservation.task_id,
            model,
            actual,
        )
    }

    /// Drop a hold without charging anything
    pub async fn release(&self, reservation: Reservation) {
        let mut state = self.state.lock().await;
        state.roll_over(Utc::now().date_naive());
        Self::drop_hold(&mut state, &reservation);
        tracing::debug!(
            task_id = %reservation.task_id,
            reservation_id = reservation.id,
            released = micros_to_usd(reservation.held_micros),
            "Budget reservation released"
        );
    }

    /// Record a charge that was not reserved beforehand
    pub async fn record(
        &self,
        session: &SessionId,
        task: &TaskId,
        model: &ModelId,
        actual_cost: f64,
    ) -> Transaction {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.roll_over(now.date_naive());
        Self::append(&mut state, now, session, task, model, usd_to_micros(actual_cost))
    }

    fn drop_hold(state: &mut LedgerState, reservation: &Reservation) {
        // Holds from a previous period were cleared by the rollover
        if reservation.period != state.period {
            return;
        }
        state.reserved = state.reserved.saturating_sub(reservation.held_micros);
        if let Some(entry) = state.sessions.get_mut(&reservation.session_id) {
            entry.reserved = entry.reserved.saturating_sub(reservation.held_micros);
        }
    }

    fn append(
        state: &mut LedgerState,
        now: DateTime<Utc>,
        session: &SessionId,
        task: &TaskId,
        model: &ModelId,
        micros: u64,
    ) -> Transaction {
        state.spent = state.spent.saturating_add(micros);
        let entry = state.sessions.entry(session.clone()).or_default();
        entry.spent = entry.spent.saturating_add(micros);

        let transaction = Transaction {
            timestamp: now,
            session_id: session.clone(),
            task_id: task.clone(),
            model_id: model.clone(),
            cost: micros_to_usd(micros),
            cost_micros: micros,
        };
        state.transactions.push(transaction.clone());

        tracing::info!(
            session_id = %session,
            task_id = %task,
            model_id = %model,
            cost = transaction.cost,
            spent = micros_to_usd(state.spent),
            "Spend recorded"
        );

        transaction
    }

    /// Global status of the current period
    pub async fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now()).await
    }

    pub(crate) async fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        let state = self.state.lock().await;
        let today = now.date_naive();
        let (global, _) = state.totals(today, &SessionId::anonymous());
        let remaining = self
            .daily_limit
            .saturating_sub(global.spent.saturating_add(global.reserved));
        BudgetStatus {
            remaining: micros_to_usd(remaining),
            spent: micros_to_usd(global.spent),
            limit: micros_to_usd(self.daily_limit),
            reserved: micros_to_usd(global.reserved),
            period: today,
        }
    }

    /// Status as seen by one session
    ///
    /// `spent` and `reserved` are the session's own; `remaining` is the tighter
    /// of the session and global headroom; `limit` is the session limit when
    /// one is configured, otherwise the daily limit.
    pub async fn session_status(&self, session: &SessionId) -> BudgetStatus {
        let now = Utc::now();
        let state = self.state.lock().await;
        let today = now.date_naive();
        let (global, session_spend) = state.totals(today, session);
        BudgetStatus {
            remaining: micros_to_usd(self.headroom(global, session_spend)),
            spent: micros_to_usd(session_spend.spent),
            limit: micros_to_usd(self.session_limit.unwrap_or(self.daily_limit)),
            reserved: micros_to_usd(session_spend.reserved),
            period: today,
        }
    }

    /// Audit log of the current period, oldest first
    pub async fn transactions(&self) -> Vec<Transaction> {
        let state = self.state.lock().await;
        if state.period != Utc::now().date_naive() {
            return Vec::new();
        }
        state.transactions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn session() -> SessionId {
        SessionId::from("s1")
    }

    fn task(n: usize) -> TaskId {
        TaskId::from(format!("t{}", n))
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn ledger_on(day: u32, limit: f64, session_limit: Option<f64>) -> BudgetLedger {
        BudgetLedger::starting_on(limit, 1.5, session_limit, noon(day).date_naive())
    }

    #[tokio::test]
    async fn test_near_limit_denies_with_buffer() {
        let ledger = BudgetLedger::new(5.00, 1.5, None);
        ledger
            .record(&session(), &task(0), &ModelId::from("m"), 4.95)
            .await;

        let check = ledger.check(&session(), 0.10).await;
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0.05);
        assert_eq!(check.required, 0.15);

        let denied = ledger.reserve(&session(), &task(1), 0.10).await.unwrap_err();
        assert_eq!(denied.remaining, 0.05);
        assert_eq!(ledger.status().await.spent, 4.95);
    }

    #[tokio::test]
    async fn test_reservation_holds_until_settled() {
        let ledger = BudgetLedger::new(1.00, 1.5, None);
        let reservation = ledger.reserve(&session(), &task(1), 0.20).await.unwrap();
        assert_eq!(reservation.held(), 0.30);

        let status = ledger.status().await;
        assert_eq!(status.reserved, 0.30);
        assert_eq!(status.remaining, 0.70);
        assert_eq!(status.spent, 0.0);

        let tx = ledger
            .commit(reservation, &ModelId::from("cheap-a"), 0.12)
            .await;
        assert_eq!(tx.cost_micros, 120_000);

        let status = ledger.status().await;
        assert_eq!(status.reserved, 0.0);
        assert_eq!(status.spent, 0.12);
        assert_eq!(status.remaining, 0.88);
        assert_eq!(ledger.transactions().await, vec![tx]);
    }

    #[tokio::test]
    async fn test_non_finite_estimate_is_denied() {
        let ledger = BudgetLedger::new(1_000.0, 1.0, None);
        assert!(!ledger.check(&session(), f64::INFINITY).await.allowed);
        assert!(!ledger.check(&session(), f64::NAN).await.allowed);
        assert!(ledger.reserve(&session(), &task(1), f64::NAN).await.is_err());
        assert_eq!(ledger.status().await.reserved, 0.0);
    }

    #[tokio::test]
    async fn test_release_charges_nothing() {
        let ledger = BudgetLedger::new(1.00, 1.5, None);
        let reservation = ledger.reserve(&session(), &task(1), 0.20).await.unwrap();
        ledger.release(reservation).await;

        let status = ledger.status().await;
        assert_eq!(status.remaining, 1.00);
        assert!(ledger.transactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_outstanding_holds_block_further_reservations() {
        let ledger = BudgetLedger::new(1.00, 1.0, None);
        let _first = ledger.reserve(&session(), &task(1), 0.60).await.unwrap();
        let second = ledger.reserve(&session(), &task(2), 0.60).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_overshoot_is_recorded_as_billed() {
        let ledger = BudgetLedger::new(1.00, 1.0, None);
        let reservation = ledger.reserve(&session(), &task(1), 0.10).await.unwrap();
        let tx = ledger.commit(reservation, &ModelId::from("m"), 0.25).await;
        assert_eq!(tx.cost, 0.25);
        assert_eq!(ledger.status().await.spent, 0.25);
    }

    #[tokio::test]
    async fn test_session_limit_is_tighter() {
        let ledger = BudgetLedger::new(10.00, 1.0, Some(1.00));
        ledger
            .record(&session(), &task(0), &ModelId::from("m"), 0.90)
            .await;

        assert!(!ledger.check(&session(), 0.20).await.allowed);
        assert!(ledger.check(&SessionId::from("s2"), 0.20).await.allowed);

        let status = ledger.session_status(&session()).await;
        assert_eq!(status.limit, 1.00);
        assert_eq!(status.spent, 0.90);
        assert_eq!(status.remaining, 0.10);
        assert_eq!(ledger.status().await.remaining, 9.10);
    }

    #[tokio::test]
    async fn test_status_is_idempotent() {
        let ledger = BudgetLedger::new(5.00, 1.5, None);
        ledger
            .record(&session(), &task(0), &ModelId::from("m"), 1.25)
            .await;
        let first = ledger.status().await;
        for _ in 0..10 {
            assert_eq!(ledger.status().await, first);
        }
    }

    #[tokio::test]
    async fn test_new_day_starts_fresh_period() {
        let ledger = ledger_on(1, 1.00, None);
        let reservation = ledger
            .reserve_at(&session(), &task(1), 0.50, noon(1))
            .await
            .unwrap();
        ledger
            .commit_at(reservation, &ModelId::from("m"), 0.50, noon(1))
            .await;
        assert!(!ledger.check_at(&session(), 0.50, noon(1)).await.allowed);

        // Reading on the next day reports a fresh period without mutating
        let status = ledger.status_at(noon(2)).await;
        assert_eq!(status.spent, 0.0);
        assert_eq!(status.period, noon(2).date_naive());
        assert_eq!(ledger.status_at(noon(1)).await.spent, 0.50);

        assert!(ledger.check_at(&session(), 0.50, noon(2)).await.allowed);
        let next = ledger
            .reserve_at(&session(), &task(2), 0.10, noon(2))
            .await
            .unwrap();
        assert_eq!(ledger.status_at(noon(2)).await.reserved, 0.15);
        ledger.release(next).await;
    }

    #[tokio::test]
    async fn test_commit_across_rollover_charges_new_period() {
        let ledger = ledger_on(1, 1.00, None);
        let reservation = ledger
            .reserve_at(&session(), &task(1), 0.40, noon(1))
            .await
            .unwrap();
        let late = noon(1) + Duration::hours(13);
        ledger
            .commit_at(reservation, &ModelId::from("m"), 0.30, late)
            .await;

        let status = ledger.status_at(late).await;
        assert_eq!(status.spent, 0.30);
        assert_eq!(status.reserved, 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overspend() {
        let ledger = Arc::new(BudgetLedger::new(1.00, 1.0, None));
        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                match ledger.reserve(&session(), &task(i), 0.07).await {
                    Ok(reservation) => {
                        tokio::task::yield_now().await;
                        ledger.commit(reservation, &ModelId::from("m"), 0.07).await;
                        true
                    }
                    Err(_) => false,
                }
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 14);
        let status = ledger.status().await;
        assert!(status.spent <= status.limit);
        assert_eq!(status.spent, 0.98);
    }
}
