//! Sync scheduler - the control core of the daemon
//!
//! Runs the outer iteration loop: refresh the account snapshot, run a
//! synchronization pass when one is due, establish the callback
//! channel, register it with every account, then either wait for
//! inbound notifications (inner loop) or sleep through a poll interval
//! when the channel could not be made reachable.
//!
//! ## Flow
//!
//! ```text
//! populate ──→ sync-if-due ──→ establish ──┬─ reachable ──→ wait loop
//!                                          └─ poll-only ──→ sleep(wait)
//! ```
//!
//! Failures anywhere in an iteration are caught at the loop boundary
//! and answered with an escalating backoff; a fully successful
//! iteration resets the failure counter. Shutdown cancels every wait
//! and always runs the teardown path: deregister callbacks, release
//! the port mapping.

use std::ops::ControlFlow;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use banksync_core::backoff::BackoffPolicy;
use banksync_core::config::ScheduleConfig;
use banksync_core::domain::{SchedulerState, CALLBACK_MARKER};
use banksync_core::ports::callback_channel::ICallbackChannel;
use banksync_core::ports::ledger_sync::ILedgerSync;
use banksync_provider::registrar::CallbackRegistrar;

/// Minimum spacing between synchronization passes triggered by rapid
/// notifications.
const DEBOUNCE: Duration = Duration::from_secs(30);

/// What to do after a wake-up in the inner wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeAction {
    /// Too soon after the last pass; push the sync deadline out
    Defer(Instant),
    /// Run a synchronization pass now
    Synchronize,
}

/// Decides whether a wake-up (notification or timeout) triggers a
/// synchronization pass or gets debounced.
fn wake_action(now: Instant, last_sync: Instant, debounce: Duration) -> WakeAction {
    if now < last_sync + debounce {
        WakeAction::Defer(last_sync + debounce)
    } else {
        WakeAction::Synchronize
    }
}

/// The daemon's main control loop.
pub struct SyncScheduler {
    schedule: ScheduleConfig,
    state: SchedulerState,
    channel: Box<dyn ICallbackChannel>,
    registrar: CallbackRegistrar,
    ledger: Box<dyn ILedgerSync>,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        schedule: ScheduleConfig,
        channel: Box<dyn ICallbackChannel>,
        registrar: CallbackRegistrar,
        ledger: Box<dyn ILedgerSync>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            schedule,
            state: SchedulerState::default(),
            channel,
            registrar,
            ledger,
            shutdown,
        }
    }

    /// Runs until shutdown, then tears down registrations and mappings.
    pub async fn run(&mut self) {
        info!(
            wait_minutes = self.schedule.wait_minutes,
            interval_minutes = self.schedule.interval_minutes,
            refresh_minutes = self.schedule.refresh_minutes,
            "Scheduler starting"
        );

        while !self.shutdown.is_cancelled() {
            match self.run_iteration().await {
                Ok(()) => self.state.record_success(),
                Err(e) => {
                    self.state.record_failure();
                    let delay = BackoffPolicy::delay(self.state.consecutive_errors);
                    error!(
                        error = format!("{e:#}"),
                        failures = self.state.consecutive_errors,
                        retry_secs = delay.as_secs(),
                        "Iteration failed, backing off"
                    );
                    if self.pause(delay).await.is_break() {
                        break;
                    }
                }
            }
        }

        self.teardown().await;
        info!("Scheduler stopped");
    }

    /// One outer iteration; any error escapes to the backoff branch.
    async fn run_iteration(&mut self) -> anyhow::Result<()> {
        self.ledger
            .populate()
            .await
            .context("Failed to refresh account snapshot")?;

        if self.state.sync_due(Instant::now(), self.schedule.wait()) {
            info!("Synchronizing at start or before refresh");
            self.synchronize_pass().await;
        }

        self.channel
            .establish()
            .await
            .context("Channel establishment failed")?;

        match self.channel.callback_url() {
            Some(url) => {
                for account in self.ledger.accounts().to_vec() {
                    self.registrar
                        .sync(&account.user_id, CALLBACK_MARKER, Some(&url))
                        .await
                        .with_context(|| format!("Failed to register callback for {account}"))?;
                }
                self.wait_loop().await
            }
            None => {
                warn!(
                    minutes = self.schedule.wait_minutes,
                    "No callback channel, falling back to polling"
                );
                let _ = self.pause(self.schedule.wait()).await;
                Ok(())
            }
        }
    }

    /// Inner wait loop; runs while the channel is reachable, returns
    /// when the refresh deadline passes (the outer loop then re-runs
    /// channel establishment) or on shutdown.
    async fn wait_loop(&mut self) -> anyhow::Result<()> {
        let interval = self.schedule.interval();
        let shutdown = self.shutdown.clone();

        let mut last_sync = Instant::now();
        let next_refresh = last_sync + self.schedule.refresh();
        let mut next_sync = last_sync + interval;

        loop {
            let deadline = next_sync.min(next_refresh);
            info!(
                seconds = deadline.saturating_duration_since(Instant::now()).as_secs(),
                "Waiting for notification"
            );

            // The event itself is not inspected further: a genuine
            // notification and a timeout both mean "consider syncing".
            let _event = tokio::select! {
                event = self.channel.wait_for_event(deadline) => {
                    event.context("Waiting for notification failed")?
                }
                _ = shutdown.cancelled() => return Ok(()),
            };

            let now = Instant::now();
            if next_refresh <= now {
                info!("Refreshing callback channel setup");
                return Ok(());
            }
            match wake_action(now, last_sync, DEBOUNCE) {
                WakeAction::Defer(at) => next_sync = at,
                WakeAction::Synchronize => {
                    info!("Synchronizing periodically");
                    self.synchronize_pass().await;
                    last_sync = Instant::now();
                    next_sync = last_sync + interval;
                }
            }
        }
    }

    /// Runs one synchronization pass. Failures inside the pass are
    /// logged and swallowed; the completion time is recorded either
    /// way so a broken pass cannot turn into a sync storm.
    async fn synchronize_pass(&mut self) {
        info!("Starting synchronization pass");
        match self.ledger.synchronize().await {
            Ok(()) => info!("Finished synchronization pass"),
            Err(e) => error!(error = format!("{e:#}"), "Synchronization failed"),
        }
        self.state.record_sync(Instant::now());
    }

    /// Best-effort cleanup on every exit path: deregister the callback
    /// for every known account, release the port mapping.
    async fn teardown(&mut self) {
        info!("Cleaning up");
        for account in self.ledger.accounts().to_vec() {
            if let Err(e) = self
                .registrar
                .sync(&account.user_id, CALLBACK_MARKER, None)
                .await
            {
                warn!(
                    account = %account,
                    error = format!("{e:#}"),
                    "Failed to remove callback registration"
                );
            }
        }
        self.channel.teardown().await;
    }

    /// Sleeps for `duration`, waking early on shutdown.
    async fn pause(&self, duration: Duration) -> ControlFlow<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => ControlFlow::Continue(()),
            _ = self.shutdown.cancelled() => ControlFlow::Break(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;

    use banksync_core::domain::{Account, Subscription};
    use banksync_core::ports::bank_provider::{IBankProvider, TransactionRecord};
    use banksync_core::ports::callback_channel::Event;

    use super::*;

    // ------------------------------------------------------------------
    // wake_action
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_wake_action_defers_within_debounce_window() {
        let last = Instant::now();
        let action = wake_action(last + Duration::from_secs(10), last, DEBOUNCE);
        assert_eq!(action, WakeAction::Defer(last + DEBOUNCE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_action_synchronizes_after_debounce_window() {
        let last = Instant::now();
        let action = wake_action(last + DEBOUNCE, last, DEBOUNCE);
        assert_eq!(action, WakeAction::Synchronize);
    }

    // ------------------------------------------------------------------
    // Backoff sequence
    // ------------------------------------------------------------------

    #[test]
    fn test_backoff_sequence_for_consecutive_failures() {
        let mut state = SchedulerState::default();
        let mut delays = Vec::new();
        for _ in 0..61 {
            state.record_failure();
            delays.push(BackoffPolicy::delay(state.consecutive_errors));
        }
        assert!(delays[..5].iter().all(|d| *d == Duration::from_secs(10)));
        // The counter is incremented before the delay is computed, so
        // the 59th failure is the last short retry and the 60th
        // already waits a minute.
        assert_eq!(delays[58], Duration::from_secs(10));
        assert_eq!(delays[59], Duration::from_secs(60));
        assert_eq!(delays[60], Duration::from_secs(60));
    }

    // ------------------------------------------------------------------
    // Scripted collaborators
    // ------------------------------------------------------------------

    enum Step {
        /// Deliver a notification after sleeping this long
        Notify(Duration),
        /// Sleep until the passed deadline, then time out
        TimeoutAtDeadline,
        /// Cancel the scheduler's shutdown token and never return
        CancelAndHang,
    }

    struct FakeChannel {
        reachable: bool,
        script: Mutex<VecDeque<Step>>,
        establish_count: Arc<AtomicUsize>,
        shutdown: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ICallbackChannel for FakeChannel {
        async fn establish(&mut self) -> anyhow::Result<()> {
            self.establish_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn external_address(&self) -> Option<(IpAddr, u16)> {
            self.reachable
                .then(|| ("1.2.3.4".parse().unwrap(), 5000))
        }

        fn callback_url(&self) -> Option<String> {
            self.reachable
                .then(|| "https://1.2.3.4:5000/banksync-autosync".to_string())
        }

        async fn wait_for_event(&mut self, deadline: Instant) -> anyhow::Result<Event> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Notify(after)) => {
                    tokio::time::sleep(after).await;
                    Ok(Event::Notification("1.2.3.4".parse().unwrap()))
                }
                Some(Step::TimeoutAtDeadline) => {
                    tokio::time::sleep_until(deadline).await;
                    Ok(Event::Timeout)
                }
                Some(Step::CancelAndHang) | None => {
                    self.shutdown.cancel();
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn teardown(&mut self) {}
    }

    #[derive(Default)]
    struct CountingProvider {
        put_calls: AtomicUsize,
        list_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl IBankProvider for CountingProvider {
        async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
            Ok(Vec::new())
        }

        async fn list_subscriptions(&self, _user_id: &str) -> anyhow::Result<Vec<Subscription>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn put_subscriptions(
            &self,
            _user_id: &str,
            _subscriptions: Vec<Subscription>,
        ) -> anyhow::Result<()> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_transactions_since(
            &self,
            _user_id: &str,
            _account_id: &str,
            _since: NaiveDate,
        ) -> anyhow::Result<Vec<TransactionRecord>> {
            Ok(Vec::new())
        }
    }

    struct FakeLedger {
        accounts: Vec<Account>,
        sync_count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ILedgerSync for FakeLedger {
        async fn populate(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn accounts(&self) -> &[Account] {
            &self.accounts
        }

        async fn synchronize(&mut self) -> anyhow::Result<()> {
            self.sync_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        scheduler: SyncScheduler,
        provider: Arc<CountingProvider>,
        sync_count: Arc<AtomicUsize>,
        establish_count: Arc<AtomicUsize>,
    }

    fn harness(schedule: ScheduleConfig, reachable: bool, script: Vec<Step>) -> Harness {
        let shutdown = CancellationToken::new();
        let provider = Arc::new(CountingProvider::default());
        let sync_count = Arc::new(AtomicUsize::new(0));
        let establish_count = Arc::new(AtomicUsize::new(0));

        let channel = FakeChannel {
            reachable,
            script: Mutex::new(script.into()),
            establish_count: establish_count.clone(),
            shutdown: shutdown.clone(),
        };
        let ledger = FakeLedger {
            accounts: vec![Account::new("7", "42", "Checking", "NL00BANK0123456789")],
            sync_count: sync_count.clone(),
        };
        let registrar = CallbackRegistrar::new(provider.clone());

        let scheduler = SyncScheduler::new(
            schedule,
            Box::new(channel),
            registrar,
            Box::new(ledger),
            shutdown,
        );
        Harness {
            scheduler,
            provider,
            sync_count,
            establish_count,
        }
    }

    fn schedule(wait: u64, interval: u64, refresh: u64) -> ScheduleConfig {
        ScheduleConfig {
            wait_minutes: wait,
            interval_minutes: interval,
            refresh_minutes: refresh,
        }
    }

    // ------------------------------------------------------------------
    // Outer-loop scenarios
    // ------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_poll_only_iteration_makes_no_registrar_calls() {
        let mut h = harness(schedule(60, 240, 480), false, vec![]);

        let start = Instant::now();
        h.scheduler.run_iteration().await.unwrap();

        // Initial sync is due, then the loop sleeps through the full
        // poll interval without touching subscriptions.
        assert_eq!(h.sync_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.list_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.provider.put_calls.load(Ordering::SeqCst), 0);
        assert!(start.elapsed() >= Duration::from_secs(60 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_iteration_registers_callback() {
        let mut h = harness(schedule(60, 240, 480), true, vec![Step::CancelAndHang]);
        h.scheduler.state.record_sync(Instant::now());

        h.scheduler.run_iteration().await.unwrap();

        assert_eq!(h.establish_count.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.put_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.sync_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rapid_notifications_cause_one_sync() {
        let script = vec![
            Step::Notify(Duration::from_secs(1)),
            Step::Notify(Duration::from_secs(1)),
            Step::TimeoutAtDeadline,
            Step::CancelAndHang,
        ];
        let mut h = harness(schedule(60, 240, 480), true, script);
        h.scheduler.state.record_sync(Instant::now());

        h.scheduler.run_iteration().await.unwrap();

        // Both notifications land inside the debounce window; the
        // deferred deadline then fires once, 30s after loop entry.
        assert_eq!(h.sync_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_deadline_exits_inner_loop() {
        // Refresh after one minute, sync interval four hours.
        let mut h = harness(schedule(60, 240, 1), true, vec![Step::TimeoutAtDeadline]);
        h.scheduler.state.record_sync(Instant::now());

        let start = Instant::now();
        h.scheduler.run_iteration().await.unwrap();

        // The inner loop returned at the refresh deadline without a
        // synchronization pass; the outer loop would now re-establish.
        assert_eq!(h.sync_count.load(Ordering::SeqCst), 0);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tears_down_registrations_on_shutdown() {
        let mut h = harness(schedule(60, 240, 480), true, vec![Step::CancelAndHang]);
        h.scheduler.state.record_sync(Instant::now());

        h.scheduler.run().await;

        // One registration put, then teardown listed subscriptions
        // again to deregister (nothing left to remove on the fake).
        assert_eq!(h.provider.put_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.list_calls.load(Ordering::SeqCst), 2);
    }
}
