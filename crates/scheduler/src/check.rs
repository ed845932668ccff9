//! Evaluation Cycle

use crate::dependency::{mark_unevaluated, remove_unknown_events, triggering};
use crate::executor::{ExecContext, ExecError, GroupResult};
use crate::history::{PriorStatuses, RunHistory};
use crate::schedule::{Inner, Schedule};
use crate::SchedError;
use alert_model::{ActionType, AlertKey, AlertRule, EvalResult, Event, Expr, State, Status, TagSet};
use alerting::to_chrono;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Summary of one evaluation cycle
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub cycle: u64,
    /// Keys with an event this cycle
    pub events: usize,
    /// Alerts whose evaluation failed
    pub errors: usize,
    /// Notifications queued by transitions
    pub queued: usize,
    pub duration: Duration,
}

fn prior_statuses(states: &HashMap<AlertKey, State>) -> PriorStatuses {
    let mut prior = PriorStatuses::new();
    for (ak, state) in states {
        prior
            .entry(ak.name().to_string())
            .or_default()
            .push((ak.group().clone(), state.status()));
    }
    for entries in prior.values_mut() {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
    }
    prior
}

impl Schedule {
    /// Run one evaluation cycle as of `now`.
    ///
    /// Fails immediately with `CheckRunning` when another cycle holds the
    /// guard. Executor failures become Error events, never errors here.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<CheckReport, SchedError> {
        let _permit = self
            .check_running
            .try_acquire()
            .map_err(|_| SchedError::CheckRunning)?;
        let timer = Instant::now();

        let (cycle, mut rh) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.cycles += 1;
            inner.last_check = Some(now);
            let mut rh = RunHistory::new(now, prior_statuses(&inner.states));
            let seeded = self.seed_unknowns(inner, &mut rh.events, now);
            if seeded > 0 {
                info!("Cycle {}: {} keys went unknown", inner.cycles, seeded);
            }
            (inner.cycles, rh)
        };

        let mut failed = Vec::new();
        let mut succeeded = Vec::new();
        for rule in self.rules.alerts() {
            if (cycle - 1) % u64::from(rule.run_every) != 0 {
                continue;
            }
            match self.evaluate_rule(rule, &mut rh).await {
                Ok(deps) => {
                    let marked = mark_unevaluated(&mut rh.events, &deps, &rule.name);
                    if marked > 0 {
                        debug!("{}: {} keys withheld by dependency", rule.name, marked);
                    }
                    succeeded.push(rule.name.clone());
                }
                Err(e) => {
                    warn!("Cycle {}: alert {} failed to evaluate: {}", cycle, rule.name, e);
                    remove_unknown_events(&mut rh.events, &rule.name);
                    let mut event = Event::new(Status::Error, now);
                    event.error = Some(EvalResult::error(e.to_string()));
                    rh.events
                        .insert(AlertKey::new(rule.name.as_str(), TagSet::new()), event);
                    failed.push(rule.name.clone());
                }
            }
        }

        let events = rh.events.len();
        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            for name in &succeeded {
                inner.failing.remove(name);
            }
            inner.failing.extend(failed.iter().cloned());
            self.apply_run_history(inner, rh)
        };

        for ak in &outcome.auto_close {
            if let Err(e) = self.action(
                "scheduler",
                "Auto close because was silenced.",
                ActionType::Close,
                ak,
                now,
            ) {
                debug!("Auto close of {} skipped: {}", ak, e);
            }
        }
        if outcome.queued > 0 {
            self.notify_wake.notify_one();
        }
        self.request_save();

        let duration = timer.elapsed();
        metrics::histogram!("sched.check.duration").record(duration.as_secs_f64());
        if !failed.is_empty() {
            metrics::counter!("sched.check.errors").increment(failed.len() as u64);
        }
        Ok(CheckReport {
            cycle,
            events,
            errors: failed.len(),
            queued: outcome.queued,
            duration,
        })
    }

    /// Seed Unknown events for open keys that stopped receiving data
    fn seed_unknowns(
        &self,
        inner: &Inner,
        events: &mut HashMap<AlertKey, Event>,
        now: DateTime<Utc>,
    ) -> usize {
        if now - self.started < to_chrono(self.config.check_frequency) {
            return 0;
        }
        let mut seeded = 0;
        for (ak, state) in &inner.states {
            if !state.open || state.forgotten || state.status() == Status::Error {
                continue;
            }
            let Some(rule) = self.rules.alert(ak.name()) else {
                continue;
            };
            if inner.failing.contains(&rule.name) || rule.squelch.squelched(ak.group()) {
                continue;
            }
            let timeout = rule
                .unknown
                .unwrap_or(self.config.check_frequency * 2 * rule.run_every);
            if now - state.touched < to_chrono(timeout) {
                continue;
            }
            events.insert(ak.clone(), Event::new(Status::Unknown, now));
            seeded += 1;
        }
        seeded
    }

    /// Evaluate depends, crit and warn for one rule.
    ///
    /// Returns the triggering dependency groups.
    async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        rh: &mut RunHistory,
    ) -> Result<Vec<TagSet>, ExecError> {
        let deps = match &rule.depends {
            Some(expr) => triggering(&self.evaluate(expr, &rule.name, rh).await?),
            None => Vec::new(),
        };
        let mut flagged = HashSet::new();
        if let Some(expr) = &rule.crit {
            flagged = self
                .check_expr(rule, expr, Status::Critical, &HashSet::new(), rh)
                .await?;
        }
        if let Some(expr) = &rule.warn {
            self.check_expr(rule, expr, Status::Warning, &flagged, rh)
                .await?;
        }
        Ok(deps)
    }

    /// Resolve an expression, memoizing queries for the cycle
    async fn evaluate(
        &self,
        expr: &Expr,
        alert: &str,
        rh: &mut RunHistory,
    ) -> Result<Arc<Vec<GroupResult>>, ExecError> {
        match expr {
            Expr::Alert(name) => Ok(Arc::new(rh.alert_results(name))),
            Expr::Query(query) => {
                if let Some(cached) = rh.cached(query) {
                    return Ok(cached);
                }
                let ctx = ExecContext {
                    start: rh.start,
                    alert,
                };
                let results = Arc::new(self.executor.execute(query, &ctx).await?);
                rh.store(query, Arc::clone(&results));
                Ok(results)
            }
        }
    }

    /// Classify each group of an expression at `status`.
    ///
    /// Keys in `ignore` are skipped. Returns keys classified Critical or
    /// Error.
    async fn check_expr(
        &self,
        rule: &AlertRule,
        expr: &Expr,
        status: Status,
        ignore: &HashSet<AlertKey>,
        rh: &mut RunHistory,
    ) -> Result<HashSet<AlertKey>, ExecError> {
        let results = self.evaluate(expr, &rule.name, rh).await?;
        let text = expr.to_string();
        let start = rh.start;
        let mut flagged = HashSet::new();

        for r in results.iter() {
            if rule.squelch.squelched(&r.group) {
                continue;
            }
            let ak = AlertKey::new(rule.name.as_str(), r.group.clone());
            if ignore.contains(&ak) {
                continue;
            }
            let payload = EvalResult {
                value: r.value,
                expr: text.clone(),
                computations: r.computations.clone(),
            };
            let classified = if r.value.is_nan() {
                Status::Error
            } else if r.value == 0.0 {
                Status::Normal
            } else {
                status
            };

            let event = rh
                .events
                .entry(ak.clone())
                .or_insert_with(|| Event::new(Status::None, start));
            if classified == Status::Error {
                event.error = Some(payload.clone());
            }
            if status == Status::Critical {
                event.crit = Some(payload);
            } else {
                event.warn = Some(payload);
            }
            event.status = event.status.max(classified);

            if matches!(classified, Status::Critical | Status::Error) {
                flagged.insert(ak);
            }
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use crate::schedule::testing::*;
    use crate::SchedError;
    use alert_model::{AlertKey, AlertRule, Expr, NotificationDef, Status, TagSet};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn key(s: &str) -> AlertKey {
        s.parse().unwrap()
    }

    fn rule(name: &str, crit: &str) -> AlertRule {
        let mut rule = AlertRule::new(name);
        rule.crit = Some(Expr::Query(crit.to_string()));
        rule.crit_notification = vec!["ops".to_string()];
        rule
    }

    fn ops() -> Vec<NotificationDef> {
        vec![NotificationDef::new("ops", "ops@example.com")]
    }

    #[tokio::test]
    async fn test_critical_opens_and_queues() {
        let (sched, exec, _) = schedule(vec![rule("a", "q")], ops());
        exec.set("q", &[("a=b", 1.0)]);

        let report = sched.check(Utc::now()).await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.queued, 1);

        let state = sched.state(&key("a{a=b}")).unwrap();
        assert_eq!(state.status(), Status::Critical);
        assert!(state.open);
        assert!(state.need_ack);
        assert_eq!(state.subject, "CRITICAL: a{a=b}");
    }

    #[tokio::test]
    async fn test_classification() {
        let mut r = rule("a", "crit");
        r.warn = Some(Expr::Query("warn".to_string()));
        let (sched, exec, _) = schedule(vec![r], ops());
        exec.set("crit", &[("h=1", 1.0), ("h=2", 0.0), ("h=3", f64::NAN), ("h=4", 0.0)]);
        exec.set("warn", &[("h=1", 1.0), ("h=2", 1.0), ("h=3", 1.0), ("h=4", 0.0)]);

        sched.check(Utc::now()).await.unwrap();
        assert_eq!(sched.state(&key("a{h=1}")).unwrap().status(), Status::Critical);
        assert_eq!(sched.state(&key("a{h=2}")).unwrap().status(), Status::Warning);
        assert_eq!(sched.state(&key("a{h=3}")).unwrap().status(), Status::Error);
        assert_eq!(sched.state(&key("a{h=4}")).unwrap().status(), Status::Normal);

        // Warn is not recorded for keys already Critical
        let last = sched.state(&key("a{h=1}")).unwrap();
        assert!(last.last().unwrap().warn.is_none());
    }

    #[tokio::test]
    async fn test_query_memoized_within_cycle() {
        let (sched, exec, _) = schedule(vec![rule("a", "shared"), rule("b", "shared")], ops());
        exec.set("shared", &[("h=1", 0.0)]);

        sched.check(Utc::now()).await.unwrap();
        assert_eq!(exec.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_squelched_groups_skipped() {
        let mut r = rule("a", "q");
        r.squelch.0.push("h=noisy".parse().unwrap());
        let (sched, exec, _) = schedule(vec![r], ops());
        exec.set("q", &[("h=noisy", 1.0), ("h=quiet", 1.0)]);

        sched.check(Utc::now()).await.unwrap();
        assert!(sched.state(&key("a{h=noisy}")).is_none());
        assert!(sched.state(&key("a{h=quiet}")).is_some());
    }

    #[tokio::test]
    async fn test_executor_failure_becomes_error_event() {
        let (sched, exec, _) = schedule(vec![rule("a", "broken"), rule("b", "fine")], ops());
        exec.fail("broken");
        exec.set("fine", &[("h=1", 1.0)]);

        let report = sched.check(Utc::now()).await.unwrap();
        assert_eq!(report.errors, 1);

        let error = sched.state(&AlertKey::new("a", TagSet::new())).unwrap();
        assert_eq!(error.status(), Status::Error);
        assert!(error.last().unwrap().error.is_some());
        // Other alerts proceed
        assert_eq!(sched.state(&key("b{h=1}")).unwrap().status(), Status::Critical);
        assert!(sched.lock().failing.contains("a"));
    }

    #[tokio::test]
    async fn test_run_every_skips_cycles() {
        let mut r = rule("a", "q");
        r.run_every = 2;
        let (sched, exec, _) = schedule(vec![r], ops());
        exec.set("q", &[("h=1", 0.0)]);

        let now = Utc::now();
        for i in 0..4 {
            sched.check(now + Duration::seconds(i)).await.unwrap();
        }
        assert_eq!(exec.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_seeding() {
        let (sched, exec, _) = schedule(vec![rule("a", "q")], ops());
        let t0 = Utc::now();
        let sched = sched.with_start_time(t0);
        exec.set("q", &[("a=b", 1.0)]);

        // Within the grace period nothing is seeded
        sched.check(t0).await.unwrap();
        exec.set("q", &[]);
        sched.check(t0 + Duration::seconds(30)).await.unwrap();
        assert_eq!(sched.state(&key("a{a=b}")).unwrap().status(), Status::Critical);

        // Default timeout is 2 x 60s x run_every
        sched.check(t0 + Duration::seconds(100)).await.unwrap();
        assert_eq!(sched.state(&key("a{a=b}")).unwrap().status(), Status::Critical);
        let report = sched.check(t0 + Duration::seconds(121)).await.unwrap();
        assert_eq!(sched.state(&key("a{a=b}")).unwrap().status(), Status::Unknown);

        // Critical to Unknown escalates and queues the Unknown notification
        assert_eq!(report.queued, 1);
        let ak = key("a{a=b}");
        let guard = sched.lock();
        let queued: Vec<_> = guard
            .notifications
            .outbox()
            .into_iter()
            .filter(|o| o.key == ak)
            .collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].notification, "ops");
    }

    #[tokio::test]
    async fn test_unknown_not_seeded_for_failing_alert() {
        let mut r = rule("a", "q");
        r.unknown = Some(std::time::Duration::from_secs(60));
        let (sched, exec, _) = schedule(vec![r], ops());
        let t0 = Utc::now() - Duration::hours(1);
        let sched = sched.with_start_time(t0);
        exec.set("q", &[("a=b", 1.0)]);
        sched.check(t0 + Duration::minutes(2)).await.unwrap();

        exec.fail("q");
        sched.check(t0 + Duration::minutes(5)).await.unwrap();
        sched.check(t0 + Duration::minutes(10)).await.unwrap();
        assert_eq!(sched.state(&key("a{a=b}")).unwrap().status(), Status::Critical);
    }

    #[tokio::test]
    async fn test_dependency_suppresses_dependent() {
        let up = rule("up", "ping");
        let mut cpu = rule("cpu", "load");
        cpu.depends = Some(Expr::Alert("up".to_string()));
        let (sched, exec, _) = schedule(vec![up, cpu], ops());
        let now = Utc::now();
        exec.set("ping", &[("host=a", 1.0), ("host=b", 0.0)]);
        exec.set("load", &[("host=a", 0.0), ("host=b", 0.0)]);

        // Alert references see the statuses from before this cycle
        sched.check(now).await.unwrap();
        assert!(!sched.state(&key("cpu{host=a}")).unwrap().unevaluated);

        exec.set("load", &[("host=a", 1.0), ("host=b", 1.0)]);
        sched.check(now + Duration::seconds(60)).await.unwrap();
        let a = sched.state(&key("cpu{host=a}")).unwrap();
        assert!(a.unevaluated);
        assert_eq!(a.status(), Status::Normal);
        assert_eq!(a.history.len(), 1);
        let withheld = key("cpu{host=a}");
        assert!(sched.lock().notifications.outbox().iter().all(|o| o.key != withheld));

        let b = sched.state(&key("cpu{host=b}")).unwrap();
        assert!(!b.unevaluated);
        assert_eq!(b.status(), Status::Critical);
    }

    #[tokio::test]
    async fn test_dependency_chain_advances_per_cycle() {
        let a = rule("a", "qa");
        let mut b = rule("b", "qb");
        b.depends = Some(Expr::Alert("a".to_string()));
        let mut c = rule("c", "qc");
        c.depends = Some(Expr::Alert("b".to_string()));
        let (sched, exec, _) = schedule(vec![a, b, c], ops());
        let now = Utc::now();
        for q in ["qa", "qb", "qc"] {
            exec.set(q, &[("host=x", 1.0)]);
        }

        // a and b fire in the same cycle, but c only sees b one cycle later
        sched.check(now).await.unwrap();
        assert!(!sched.state(&key("b{host=x}")).unwrap().unevaluated);
        assert!(!sched.state(&key("c{host=x}")).unwrap().unevaluated);
        assert_eq!(sched.state(&key("c{host=x}")).unwrap().status(), Status::Critical);

        sched.check(now + Duration::seconds(60)).await.unwrap();
        assert!(sched.state(&key("b{host=x}")).unwrap().unevaluated);
        assert!(sched.state(&key("c{host=x}")).unwrap().unevaluated);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (sched, _, _) = schedule(vec![rule("a", "q")], ops());
        let sched = Arc::new(sched);
        let permit = sched.check_running.try_acquire().unwrap();
        assert!(matches!(
            sched.check(Utc::now()).await,
            Err(SchedError::CheckRunning)
        ));
        drop(permit);
        assert!(sched.check(Utc::now()).await.is_ok());
    }
}
