// Schedule engine: one pass over all resource definitions
//
// Per group, actions are walked latest-first. The first action that is due
// and handled (already done, executed, failed) ends the group unless it opts
// out with `prevent_next = false`.

use crate::calendar::HolidayCalendar;
use crate::condition::{day_context, ConditionContext, ConditionEvaluator};
use crate::errors::ExecutionError;
use crate::executor::ActionDispatcher;
use crate::models::{Action, ActionGroup, Resource};
use crate::schedule::{sort_actions_by_time, ScheduledAction};
use crate::storage::{fingerprint, ActionHistoryStore};
use crate::telemetry;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub resources: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_not_due: usize,
    pub skipped_already_done: usize,
    pub skipped_condition_false: usize,
    pub abandoned_groups: usize,
}

/// What happened to a due action, before the group short-circuit is applied
enum Handled {
    AlreadyDone,
    Succeeded,
    Failed,
}

impl Handled {
    fn as_str(&self) -> &'static str {
        match self {
            Handled::AlreadyDone => "already_done",
            Handled::Succeeded => "succeeded",
            Handled::Failed => "failed",
        }
    }
}

/// ScheduleEngine decides which actions are due and runs them
pub struct ScheduleEngine {
    calendar: Arc<HolidayCalendar>,
    evaluator: Arc<ConditionEvaluator>,
    history: Arc<ActionHistoryStore>,
    dispatcher: Arc<ActionDispatcher>,
    timezone: Tz,
    action_timeout: Option<Duration>,
}

impl ScheduleEngine {
    pub fn new(
        calendar: Arc<HolidayCalendar>,
        evaluator: Arc<ConditionEvaluator>,
        history: Arc<ActionHistoryStore>,
        dispatcher: Arc<ActionDispatcher>,
        timezone: Tz,
    ) -> Self {
        Self {
            calendar,
            evaluator,
            history,
            dispatcher,
            timezone,
            action_timeout: None,
        }
    }

    /// Bound every dispatch. A timed out action counts as failed.
    pub fn with_action_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Run one pass at `now`. Never fails: every problem is logged and
    /// confined to the action or group it came from.
    pub async fn run(&self, resources: &[Resource], now: DateTime<Utc>) -> PassSummary {
        let pass_id = Uuid::new_v4();
        let span = info_span!("pass", pass_id = %pass_id);
        self.run_pass(pass_id, resources, now).instrument(span).await
    }

    async fn run_pass(
        &self,
        pass_id: Uuid,
        resources: &[Resource],
        now: DateTime<Utc>,
    ) -> PassSummary {
        let started = Instant::now();
        let today = now.with_timezone(&self.timezone).date_naive();
        let status = self.calendar.is_holiday(today);
        let context = day_context(&status);

        info!(
            date = %today,
            timezone = %self.timezone,
            is_holiday = status.is_holiday,
            holiday_reason = status.reason.as_str(),
            resources = resources.len(),
            "Pass started"
        );

        let mut summary = PassSummary {
            pass_id,
            resources: resources.len(),
            ..PassSummary::default()
        };

        for resource in resources {
            for (index, group) in resource.action_groups.iter().enumerate() {
                let span = info_span!("group", resource = %resource.resource_id, group = index);
                self.run_group(resource, group, today, now, &context, &mut summary)
                    .instrument(span)
                    .await;
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        telemetry::record_pass(elapsed, summary.dispatched);
        info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped_not_due = summary.skipped_not_due,
            skipped_already_done = summary.skipped_already_done,
            skipped_condition_false = summary.skipped_condition_false,
            abandoned_groups = summary.abandoned_groups,
            duration_seconds = elapsed,
            "Pass finished"
        );

        summary
    }

    async fn run_group(
        &self,
        resource: &Resource,
        group: &ActionGroup,
        today: NaiveDate,
        now: DateTime<Utc>,
        context: &ConditionContext,
        summary: &mut PassSummary,
    ) {
        let scheduled = match sort_actions_by_time(
            group,
            today,
            self.timezone,
            &resource.resource_id.human_readable(),
        ) {
            Ok(scheduled) => scheduled,
            Err(e) => {
                error!(error = %e, "Abandoning action group");
                summary.abandoned_groups += 1;
                return;
            }
        };

        for ScheduledAction { action, at } in scheduled {
            let span = info_span!("action", action_type = %action.action_type, time = %action.time);
            let handled = self
                .handle_action(resource, action, at, now, context, summary)
                .instrument(span)
                .await;

            let Some(handled) = handled else {
                continue;
            };
            if action.prevents_next() {
                debug!(
                    action_type = %action.action_type,
                    outcome = handled.as_str(),
                    "Skipping remaining actions of the group"
                );
                break;
            }
        }
    }

    /// Apply the time, idempotency and condition gates, then execute.
    ///
    /// Returns `None` when the action was passed over and the walk continues
    /// with the next (earlier) action regardless of `prevent_next`.
    async fn handle_action(
        &self,
        resource: &Resource,
        action: &Action,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        context: &ConditionContext,
        summary: &mut PassSummary,
    ) -> Option<Handled> {
        if now < at {
            debug!(scheduled_at = %at, "Action not due yet");
            summary.skipped_not_due += 1;
            return None;
        }

        let fp = fingerprint(&resource.resource_id, action);
        if action.runs_only_once() && self.history.has_completed_since(&fp, at).await {
            debug!(scheduled_at = %at, "Action already done for this occurrence");
            summary.skipped_already_done += 1;
            return Some(Handled::AlreadyDone);
        }

        if !action.conditions.is_empty() {
            match self.evaluator.evaluate_all(&action.conditions, context) {
                Ok(true) => {}
                Ok(false) => {
                    info!("Conditions not met, skipping action");
                    summary.skipped_condition_false += 1;
                    return None;
                }
                Err(e) => {
                    error!(error = %e, "Condition evaluation failed");
                    telemetry::record_action_failure(action.action_type.as_str(), "condition");
                    summary.failed += 1;
                    return Some(Handled::Failed);
                }
            }
        }

        summary.dispatched += 1;
        match self.execute(action, resource).await {
            Ok(()) => {
                summary.succeeded += 1;
                telemetry::record_action_success(action.action_type.as_str());
                info!("Action completed");

                if let Err(e) = self
                    .history
                    .record_completion(&resource.resource_id, action, now)
                    .await
                {
                    warn!(error = %e, "Failed to record action completion, it stays eligible");
                }
                Some(Handled::Succeeded)
            }
            Err(e) => {
                summary.failed += 1;
                let reason = match e {
                    ExecutionError::Timeout(_) => "timeout",
                    _ => "error",
                };
                telemetry::record_action_failure(action.action_type.as_str(), reason);
                error!(error = %e, "Action failed");
                Some(Handled::Failed)
            }
        }
    }

    async fn execute(&self, action: &Action, resource: &Resource) -> Result<(), ExecutionError> {
        let started = Instant::now();
        let dispatch = self.dispatcher.dispatch(action, &resource.resource_id);

        let result = match self.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, dispatch).await {
                Ok(result) => result,
                Err(_) => Err(ExecutionError::Timeout(limit.as_secs())),
            },
            None => dispatch.await,
        };

        telemetry::record_action_duration(
            action.action_type.as_str(),
            started.elapsed().as_secs_f64(),
        );
        result
    }
}
