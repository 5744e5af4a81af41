//! Per-action queue manager: watches `new/`, claims items, runs the action.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{GleanerError, Result};
use crate::id::Id;
use crate::model::{Action, Article};
use crate::paths;

use super::queue::{ActionQueue, Claimed};

/// Work announced to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intake {
    /// Item appeared in `new/`.
    Pending(Id),
    /// Item found in `wip/` at startup.
    Recovered(Id),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ActionManager {
    action: Action,
    queue: ActionQueue,
    token: CancellationToken,
    /// Scope of executions started from now on. Replaced on cancel/restart.
    session: Mutex<CancellationToken>,
    intake_tx: mpsc::UnboundedSender<Intake>,
    intake_rx: Mutex<Option<mpsc::UnboundedReceiver<Intake>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl ActionManager {
    /// Open the action's queue under `queue_base`. No task runs until `start`.
    pub fn new(action: Action, queue_base: &Path, parent: &CancellationToken) -> Result<Self> {
        let queue = ActionQueue::open(queue_base, action.id)?;
        let token = parent.child_token();
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        Ok(Self {
            action,
            queue,
            session: Mutex::new(token.child_token()),
            token,
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            watcher: Mutex::new(None),
        })
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Start watching `new/`, re-announce leftovers from an earlier run
    /// (`wip/` first, then `new/`) and spawn the dispatcher on `tracker`.
    /// Calling it again is a no-op.
    pub fn start(self: &Arc<Self>, tracker: &TaskTracker) -> Result<()> {
        let Some(rx) = lock(&self.intake_rx).take() else {
            return Ok(());
        };

        let watcher = self.watch()?;
        *lock(&self.watcher) = Some(watcher);

        let recovered = self.queue.inflight_ids()?;
        let pending = self.queue.pending_ids()?;
        if !recovered.is_empty() || !pending.is_empty() {
            tracing::info!(
                action = %self.action.name,
                recovered = recovered.len(),
                pending = pending.len(),
                "resuming queued work"
            );
        }
        for id in recovered {
            let _ = self.intake_tx.send(Intake::Recovered(id));
        }
        for id in pending {
            let _ = self.intake_tx.send(Intake::Pending(id));
        }

        tracker.spawn(self.clone().dispatch(rx, tracker.clone()));
        tracing::debug!(action = %self.action.name, dir = %self.queue.root().display(), "action manager started");
        Ok(())
    }

    fn watch(&self) -> Result<RecommendedWatcher> {
        let tx = self.intake_tx.clone();
        let name = self.action.name.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // Renames into new/ arrive as Modify(Name); hard links as Create.
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))) {
                    return;
                }
                for id in event.paths.iter().filter_map(|p| paths::item_id(p)) {
                    let _ = tx.send(Intake::Pending(id));
                }
            }
            Err(e) => tracing::error!(action = %name, error = %e, "queue watcher error"),
        })
        .map_err(|e| GleanerError::Watch(e.to_string()))?;

        watcher
            .watch(self.queue.new_dir(), RecursiveMode::NonRecursive)
            .map_err(|e| GleanerError::Watch(e.to_string()))?;
        Ok(watcher)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    async fn dispatch(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Intake>, tracker: TaskTracker) {
        loop {
            let intake = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = rx.recv() => match next {
                    Some(intake) => intake,
                    None => break,
                },
            };

            let claimed = match intake {
                Intake::Pending(id) => self.queue.claim(id),
                Intake::Recovered(id) => self.queue.reclaim(id),
            };
            match claimed {
                Ok(Some(item)) => {
                    let session = lock(&self.session).clone();
                    tracker.spawn(self.clone().execute(item, session));
                }
                Ok(None) => {
                    tracing::trace!(action = %self.action.name, ?intake, "item already taken");
                }
                Err(e) => {
                    tracing::warn!(action = %self.action.name, ?intake, error = %e, "cannot claim queue item");
                }
            }
        }
        tracing::debug!(action = %self.action.name, "dispatcher stopped");
    }

    async fn execute(self: Arc<Self>, item: Claimed, session: CancellationToken) {
        let name = &self.action.name;

        if let Err(e) = Article::from_wire(&item.payload) {
            tracing::error!(action = %name, item = %item.id, error = %e, "queue item is not an article");
            self.bury(item.id);
            return;
        }

        tracing::debug!(action = %name, item = %item.id, "executing action");
        match action_exec::run(&self.action.command, &item.payload, &session).await {
            Ok(out) => {
                tracing::info!(action = %name, item = %item.id, "action succeeded");
                if !out.stdout.is_empty() {
                    tracing::debug!(action = %name, item = %item.id, stdout = %out.stdout.trim_end(), "action output");
                }
                if let Err(e) = self.queue.complete(item.id) {
                    tracing::error!(action = %name, item = %item.id, error = %e, "cannot remove finished item");
                }
            }
            Err(e) if e.is_cancelled() || session.is_cancelled() => {
                if self.token.is_cancelled() {
                    // Manager closing: left in wip/ for the next startup.
                    tracing::info!(action = %name, item = %item.id, "action cancelled; item kept for recovery");
                } else {
                    tracing::info!(action = %name, item = %item.id, "action cancelled; item requeued");
                    self.requeue(item.id);
                }
            }
            Err(e) => {
                tracing::error!(action = %name, item = %item.id, error = %e, "action failed");
                self.bury(item.id);
            }
        }
    }

    fn bury(&self, item: Id) {
        if let Err(e) = self.queue.bury(item) {
            tracing::error!(action = %self.action.name, item = %item, error = %e, "cannot move item to dead-letter queue");
        }
    }

    fn requeue(&self, item: Id) {
        match self.queue.release(item) {
            Ok(()) => self.nudge(item),
            Err(e) => {
                tracing::error!(action = %self.action.name, item = %item, error = %e, "cannot requeue cancelled item")
            }
        }
    }

    fn nudge(&self, item: Id) {
        let _ = self.intake_tx.send(Intake::Pending(item));
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Durably enqueue `payload` under `item`. Fails with `AlreadyQueued` if
    /// the id is already known to this queue.
    pub fn add_queue_item(&self, item: Id, payload: &[u8]) -> Result<()> {
        self.queue.add(item, payload)?;
        self.nudge(item);
        Ok(())
    }

    pub fn queue_items(&self) -> Result<Vec<Article>> {
        self.queue.pending()
    }

    pub fn deadletter_items(&self) -> Result<Vec<Article>> {
        self.queue.deadletter()
    }

    /// Items claimed by an execution that has not finished.
    pub fn inflight_items(&self) -> Result<Vec<Article>> {
        self.queue.inflight()
    }

    pub fn delete_queue_item(&self, item: Id) -> Result<()> {
        self.queue.delete_pending(item)
    }

    pub fn delete_deadletter_item(&self, item: Id) -> Result<()> {
        self.queue.delete_deadletter(item)
    }

    pub fn redrive(&self, item: Id) -> Result<()> {
        self.queue.redrive(item)?;
        tracing::info!(action = %self.action.name, item = %item, "redriven");
        self.nudge(item);
        Ok(())
    }

    pub fn is_drained(&self) -> Result<bool> {
        self.queue.is_drained()
    }

    /// Cancel every execution in flight. Their items go back to `new/` and,
    /// like everything already queued, run under the fresh session.
    pub fn cancel_action(&self) {
        self.renew_session();
        tracing::info!(action = %self.action.name, "in-flight executions cancelled");
    }

    /// Same cancellation as `cancel_action`, used on configuration reload.
    pub fn restart(&self) {
        self.renew_session();
        tracing::info!(action = %self.action.name, "action session restarted");
    }

    fn renew_session(&self) {
        let mut session = lock(&self.session);
        session.cancel();
        *session = self.token.child_token();
    }

    /// Stop watching and cancel everything this manager started.
    pub fn close(&self) {
        self.token.cancel();
        lock(&self.watcher).take();
        tracing::debug!(action = %self.action.name, "action manager closed");
    }
}

impl Drop for ActionManager {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::article;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Harness {
        dir: TempDir,
        root: CancellationToken,
        tracker: TaskTracker,
        manager: Arc<ActionManager>,
    }

    impl Harness {
        /// Manager whose action runs `body` as a shell script.
        fn new(body: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let script = dir.path().join("action.sh");
            std::fs::write(&script, body).unwrap();
            let action = Action {
                id: Id::new(),
                name: "test-action".into(),
                command: format!("sh {}", script.display()),
            };
            let root = CancellationToken::new();
            let manager = Arc::new(ActionManager::new(action, &dir.path().join("queue"), &root).unwrap());
            Self {
                dir,
                root,
                tracker: TaskTracker::new(),
                manager,
            }
        }

        fn start(&self) {
            self.manager.start(&self.tracker).unwrap();
        }

        fn out(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("out")).unwrap_or_default()
        }

        fn enqueue(&self, title: &str) -> Article {
            let a = article(title);
            self.manager.add_queue_item(a.id, &a.to_wire().unwrap()).unwrap();
            a
        }

        async fn shutdown(self) {
            self.root.cancel();
            self.tracker.close();
            timeout(Duration::from_secs(5), self.tracker.wait()).await.unwrap();
        }
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let poll = async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(Duration::from_secs(10), poll)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    /// Appends each input line to `out`. The first title containing "slow"
    /// blocks; titles containing "fail" exit non-zero unless `ok` exists.
    const SCRIPT: &str = r#"
dir=$(dirname "$0")
read -r line
case "$line" in
  *slow*) [ -f "$dir/slowed" ] || { touch "$dir/slowed"; sleep 30; } ;;
  *fail*) [ -f "$dir/ok" ] || { echo "refused" >&2; exit 1; } ;;
esac
echo "$line" >> "$dir/out"
"#;

    #[tokio::test]
    async fn successful_item_is_executed_and_removed() {
        let h = Harness::new(SCRIPT);
        h.start();
        let a = h.enqueue("hello");

        wait_until("output", || h.out().contains(&a.id.to_string())).await;
        wait_until("wip cleared", || h.manager.queue().inflight().unwrap().is_empty()).await;
        assert!(h.manager.is_drained().unwrap());
        h.shutdown().await;
    }

    #[tokio::test]
    async fn failure_dead_letters_and_redrive_round_trips() {
        let h = Harness::new(SCRIPT);
        h.start();
        let a = h.enqueue("will fail");

        wait_until("dead letter", || h.manager.deadletter_items().unwrap().len() == 1).await;
        assert_eq!(h.manager.deadletter_items().unwrap(), vec![a.clone()]);
        assert!(h.manager.queue_items().unwrap().is_empty());

        std::fs::write(h.dir.path().join("ok"), b"").unwrap();
        h.manager.redrive(a.id).unwrap();

        wait_until("redriven output", || h.out().contains(&a.id.to_string())).await;
        wait_until("wip cleared", || h.manager.queue().inflight().unwrap().is_empty()).await;
        assert!(h.manager.deadletter_items().unwrap().is_empty());
        assert!(h.manager.queue_items().unwrap().is_empty());
        h.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_item_is_requeued_and_rerun() {
        let h = Harness::new(SCRIPT);
        h.start();
        let slow = h.enqueue("slow one");
        wait_until("claimed", || h.manager.inflight_items().unwrap().len() == 1).await;
        assert_eq!(h.manager.inflight_items().unwrap(), vec![slow.clone()]);
        assert!(!h.manager.is_drained().unwrap());

        h.manager.cancel_action();
        wait_until("rerun output", || h.out().contains(&slow.id.to_string())).await;
        wait_until("drained", || h.manager.is_drained().unwrap()).await;
        assert!(h.manager.deadletter_items().unwrap().is_empty());

        // The fresh session keeps processing new work.
        let fast = h.enqueue("fast one");
        wait_until("fast output", || h.out().contains(&fast.id.to_string())).await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn restart_resumes_interrupted_item() {
        let h = Harness::new(SCRIPT);
        h.start();
        let slow = h.enqueue("slow again");
        wait_until("claimed", || h.manager.inflight_items().unwrap().len() == 1).await;

        h.manager.restart();
        wait_until("rerun output", || h.out().contains(&slow.id.to_string())).await;
        wait_until("drained", || h.manager.is_drained().unwrap()).await;
        h.shutdown().await;
    }

    #[tokio::test]
    async fn leftovers_are_recovered_on_start() {
        let h = Harness::new(SCRIPT);
        let in_flight = article("from wip");
        let pending = article("from new");
        let queue = h.manager.queue();
        queue.add(in_flight.id, &in_flight.to_wire().unwrap()).unwrap();
        queue.claim(in_flight.id).unwrap().unwrap();
        queue.add(pending.id, &pending.to_wire().unwrap()).unwrap();

        h.start();
        wait_until("both recovered", || {
            let out = h.out();
            out.contains(&in_flight.id.to_string()) && out.contains(&pending.id.to_string())
        })
        .await;
        wait_until("wip cleared", || queue.inflight().unwrap().is_empty()).await;
        assert!(queue.is_drained().unwrap());
        h.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let h = Harness::new(SCRIPT);
        let a = h.enqueue("once");
        let err = h.manager.add_queue_item(a.id, b"{}").unwrap_err();
        assert!(matches!(err, GleanerError::AlreadyQueued(id) if id == a.id));
        assert_eq!(h.manager.queue_items().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_stops_running_executions() {
        let h = Harness::new(SCRIPT);
        h.start();
        h.enqueue("slow forever");
        wait_until("claimed", || h.manager.queue().inflight().unwrap().len() == 1).await;

        h.manager.close();
        h.tracker.close();
        timeout(Duration::from_secs(5), h.tracker.wait()).await.unwrap();
        assert!(h.manager.deadletter_items().unwrap().is_empty());
        // Kept in wip/ for the next startup.
        assert_eq!(h.manager.inflight_items().unwrap().len(), 1);
        assert!(h.manager.queue_items().unwrap().is_empty());
    }
}
