//! The leased execution state machine.

use std::future::Future;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cronlease_lease::{Lease, LeaseError, LeaseStore};

use crate::{
    ExecutionError, ExecutionReport, ExecutionRequest, LeaseLossPolicy, Outcome, OutputSink,
};

/// How long before expiry a held lease is renewed.
pub const RENEWAL_MARGIN: Duration = Duration::from_millis(250);

/// How long to keep copying output after the command has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on acquire and release calls, lazy connect included.
const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// An extend call in flight, bounded by the lease's remaining lifetime.
type Renewal<'a> = Pin<Box<dyn Future<Output = Result<(), LeaseError>> + Send + 'a>>;

/// Time from acquiring (or extending) a lease to its next renewal.
///
/// Leases too short to fit the margin twice are renewed at half their TTL.
pub fn renewal_interval(ttl: Duration) -> Duration {
    if ttl > RENEWAL_MARGIN * 2 {
        ttl - RENEWAL_MARGIN
    } else {
        ttl / 2
    }
}

/// Uniform draw from `[0, secs * 1000)` milliseconds.
pub(crate) fn random_wait(secs: u64) -> Duration {
    let ceiling = secs.saturating_mul(1000);
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..ceiling))
}

/// Resolves at `at`, or never.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Resolves with the renewal result, or never if none is in flight.
async fn renewal_done(renewal: &mut Option<Renewal<'_>>) -> Result<(), LeaseError> {
    match renewal {
        Some(call) => call.await,
        None => std::future::pending().await,
    }
}

/// Run a store call, giving up after `limit`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, LeaseError>>,
) -> Result<T, LeaseError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| LeaseError::Timeout(limit))?
}

/// How the coordinating loop ended.
enum Finish {
    Exited(ExitStatus),
    Cancelled,
}

/// State owned by the coordinating loop while the command runs.
struct Watch {
    renew_every: Duration,
    /// Time left on the lease at each renewal point.
    renew_within: Duration,
    renew_at: Option<Instant>,
    timeout_at: Option<Instant>,
    renewals: u32,
    timed_out: bool,
    abandoned: bool,
    lease_lost: bool,
    killed_for_loss: bool,
}

impl Watch {
    fn new(request: &ExecutionRequest, started: Instant) -> Self {
        let renew_every = renewal_interval(request.mutex_ttl);
        Self {
            renew_every,
            renew_within: request.mutex_ttl.saturating_sub(renew_every),
            renew_at: Some(started + renew_every),
            timeout_at: request.task_ttl.map(|ttl| started + ttl),
            renewals: 0,
            timed_out: false,
            abandoned: false,
            lease_lost: false,
            killed_for_loss: false,
        }
    }

    fn outcome(&self, status: ExitStatus) -> Outcome {
        if self.timed_out {
            Outcome::TimedOut
        } else if self.killed_for_loss {
            Outcome::LeaseLost
        } else if status.success() {
            Outcome::Succeeded
        } else {
            Outcome::Failed {
                code: status.code(),
            }
        }
    }

    /// Whether the lease should be released at the end.
    fn owns_lease(&self) -> bool {
        !self.abandoned && !self.lease_lost
    }
}

/// One guarded run of a command.
///
/// Build it, attach output sinks and an optional cancellation token, then
/// call [`run`](Self::run). The execution holds no reference to whoever
/// created it, so it can be detached onto its own task.
pub struct LeasedExecution {
    store: Arc<dyn LeaseStore>,
    request: ExecutionRequest,
    stdout: OutputSink,
    stderr: OutputSink,
    cancel: CancellationToken,
}

impl LeasedExecution {
    pub fn new(store: Arc<dyn LeaseStore>, request: ExecutionRequest) -> Self {
        Self {
            store,
            request,
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
            cancel: CancellationToken::new(),
        }
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Stop waiting for the command once `token` is cancelled.
    ///
    /// The command itself is not killed; it normally receives the same
    /// signal from the OS because it shares our process group.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn request(&self) -> &ExecutionRequest {
        &self.request
    }

    /// Wait, acquire, run, supervise and release.
    #[tracing::instrument(name = "execution", skip_all, fields(lease = %self.request.lease_name()))]
    pub async fn run(self) -> Result<ExecutionReport, ExecutionError> {
        let Self {
            store,
            request,
            stdout,
            stderr,
            cancel,
        } = self;

        let (program, args) = request
            .command
            .split_first()
            .ok_or(ExecutionError::EmptyCommand)?;
        let name = request.lease_name();

        if request.random_wait_secs > 0 {
            let wait = random_wait(request.random_wait_secs);
            info!(wait_ms = wait.as_millis() as u64, "waiting before acquiring lease");
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(wait) => {}
            }
        }

        if cancel.is_cancelled() {
            info!("cancelled before acquiring lease, not running");
            return Ok(ExecutionReport::cancelled(name));
        }

        debug!(ttl = ?request.mutex_ttl, "acquiring lease");
        if let Some(ttl) = request.task_ttl {
            debug!(?ttl, "command will be terminated after task TTL");
        }

        let acquire = store.acquire(&name, request.mutex_ttl);
        let lease = match bounded(STORE_CALL_TIMEOUT, acquire).await {
            Ok(lease) => lease,
            Err(e @ LeaseError::Busy(_)) => {
                info!("lease is held elsewhere, not running");
                return Err(e.into());
            }
            Err(e) => {
                error!(error = %e, "failed to acquire lease");
                return Err(e.into());
            }
        };

        if cancel.is_cancelled() {
            info!("cancelled while acquiring lease, not running");
            release(store.as_ref(), &lease).await;
            return Ok(ExecutionReport::cancelled(name));
        }

        info!(command = %request.command.join(" "), "running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout.stdio())
            .stderr(stderr.stdio());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(error = %source, "failed to start command");
                release(store.as_ref(), &lease).await;
                return Err(ExecutionError::Spawn {
                    command: program.clone(),
                    source,
                });
            }
        };

        let forwarders: Vec<_> = [
            stdout.forward(child.stdout.take(), "stdout"),
            stderr.forward(child.stderr.take(), "stderr"),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut watch = Watch::new(&request, Instant::now());
        let finish = supervise(
            store.as_ref(),
            &request,
            &lease,
            &mut child,
            &cancel,
            &mut watch,
        )
        .await;

        // Timers died with the loop; only the lease remains to settle.
        let finish = match finish {
            Ok(finish) => finish,
            Err(e) => {
                error!(error = %e, "lost track of command");
                if watch.owns_lease() {
                    release(store.as_ref(), &lease).await;
                }
                return Err(ExecutionError::Wait(e));
            }
        };

        let (outcome, status) = match finish {
            Finish::Exited(status) => {
                drain(forwarders).await;
                (watch.outcome(status), Some(status))
            }
            Finish::Cancelled => (Outcome::Cancelled, None),
        };

        if watch.abandoned {
            debug!("leaving lease to expire");
        } else if watch.lease_lost {
            debug!("lease is no longer ours, not releasing");
        } else {
            release(store.as_ref(), &lease).await;
        }

        match outcome {
            Outcome::Succeeded | Outcome::Cancelled => info!(?outcome, "execution finished"),
            _ => warn!(?outcome, code = ?status.and_then(|s| s.code()), "execution finished"),
        }

        Ok(ExecutionReport {
            lease: name,
            outcome,
            status,
            renewals: watch.renewals,
            lease_abandoned: watch.abandoned,
        })
    }
}

/// The coordinating loop: the only place execution state changes while the
/// command runs.
///
/// Extend calls run inside the loop as one more event source, so a slow
/// store never delays noticing exit, cancellation or the task TTL.
async fn supervise(
    store: &dyn LeaseStore,
    request: &ExecutionRequest,
    lease: &Lease,
    child: &mut Child,
    cancel: &CancellationToken,
    watch: &mut Watch,
) -> std::io::Result<Finish> {
    let mut renewal: Option<Renewal<'_>> = None;

    loop {
        tokio::select! {
            // An exited command wins over any timer that came due at the same moment.
            biased;

            status = child.wait() => return status.map(Finish::Exited),

            _ = cancel.cancelled() => {
                info!("cancelled, no longer waiting for command");
                return Ok(Finish::Cancelled);
            }

            _ = deadline(watch.timeout_at) => {
                warn!("task TTL reached, killing command");
                watch.timeout_at = None;
                watch.timed_out = true;
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "failed to kill command");
                }
            }

            result = renewal_done(&mut renewal) => {
                renewal = None;
                match result {
                    Ok(()) => {
                        watch.renewals += 1;
                        watch.renew_at = Some(Instant::now() + watch.renew_every);
                    }
                    Err(LeaseError::NotOwner(_)) => {
                        watch.lease_lost = true;
                        match request.lease_loss {
                            LeaseLossPolicy::Continue => {
                                warn!("lease was taken over, command keeps running unprotected");
                            }
                            LeaseLossPolicy::Kill => {
                                error!("lease was taken over, killing command");
                                watch.killed_for_loss = true;
                                if let Err(e) = child.start_kill() {
                                    warn!(error = %e, "failed to kill command");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to extend lease");
                        watch.renew_at = Some(Instant::now() + watch.renew_every);
                    }
                }
            }

            _ = deadline(watch.renew_at) => {
                watch.renew_at = None;
                if request.fire_and_forget {
                    info!("lease is expiring, not renewing");
                    watch.abandoned = true;
                    continue;
                }

                debug!("extending lease");
                renewal = Some(Box::pin(bounded(watch.renew_within, store.extend(lease))));
            }
        }
    }
}

async fn release(store: &dyn LeaseStore, lease: &Lease) {
    debug!("releasing lease");
    if let Err(e) = bounded(STORE_CALL_TIMEOUT, store.release(lease)).await {
        warn!(error = %e, "failed to release lease");
    }
}

async fn drain(forwarders: Vec<JoinHandle<()>>) {
    for handle in forwarders {
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, handle).await.is_err() {
            debug!("output still open after command exit, detaching");
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn renewal_keeps_fixed_margin() {
        assert_eq!(
            renewal_interval(Duration::from_secs(10)),
            Duration::from_millis(9750)
        );
        assert_eq!(
            renewal_interval(Duration::from_secs(5)),
            Duration::from_millis(4750)
        );
    }

    #[test]
    fn short_leases_renew_at_half_ttl() {
        assert_eq!(
            renewal_interval(Duration::from_millis(400)),
            Duration::from_millis(200)
        );
    }

    #[test]
    fn no_random_wait_for_zero() {
        assert_eq!(random_wait(0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_store_call_times_out() {
        let limit = Duration::from_millis(250);
        let result: Result<(), LeaseError> = bounded(limit, std::future::pending()).await;

        assert!(matches!(result, Err(LeaseError::Timeout(d)) if d == limit));
    }

    proptest! {
        #[test]
        fn random_wait_stays_below_ceiling(secs in 1u64..3600) {
            let wait = random_wait(secs);
            prop_assert!(wait < Duration::from_secs(secs));
        }

        #[test]
        fn renewal_always_precedes_expiry(ms in 1u64..1_000_000) {
            let ttl = Duration::from_millis(ms);
            prop_assert!(renewal_interval(ttl) < ttl);
        }
    }
}
