//! Proactive renewal of the current credential before it goes stale

use std::error;

use credo_clock::{Clock, DurationSecs, System, UnixTime};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    backoff::{ErrorBackoffConfig, ErrorBackoffHandler},
    jitter::JitterSource,
    AccessToken, Session,
};

// The timer does not advance while a machine is suspended, so a long sleep
// could wake well past the stale time. Waking at least this often bounds the
// lag after a resume.
const HEARTBEAT: DurationSecs = DurationSecs(30);

// Shortest wait after a renewal that produced an already stale credential
const MIN_PAUSE: DurationSecs = DurationSecs(1);

/// A handle to a running background refresher
///
/// The refresher stops when this handle is dropped.
#[derive(Debug)]
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Stops the refresher
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the refresher has stopped
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns a task that renews the session's credential whenever it becomes
/// stale
///
/// The stale time of each credential is jittered by `jitter_source` so that
/// many clients sharing an authority do not all renew at the same moment.
/// Failed renewals are retried after a delay governed by `backoff_config`.
/// While no credential is held, the task waits for one to be stored.
pub fn spawn_refresher<J>(
    session: Session,
    jitter_source: J,
    backoff_config: ErrorBackoffConfig,
) -> RefreshTask
where
    J: JitterSource + Send + 'static,
{
    spawn_refresher_with_clock(session, jitter_source, backoff_config, System)
}

/// Spawns a background refresher using the given clock
pub fn spawn_refresher_with_clock<J, C>(
    session: Session,
    jitter_source: J,
    backoff_config: ErrorBackoffConfig,
    clock: C,
) -> RefreshTask
where
    J: JitterSource + Send + 'static,
    C: Clock + Send + 'static,
{
    let handle = tokio::spawn(refresh_forever(session, jitter_source, backoff_config, clock));
    RefreshTask { handle }
}

async fn refresh_forever<J, C>(
    session: Session,
    mut jitter_source: J,
    backoff_config: ErrorBackoffConfig,
    clock: C,
) where
    J: JitterSource,
    C: Clock,
{
    let mut changes = session.store().subscribe();
    let mut backoff = ErrorBackoffHandler::new(backoff_config);
    let mut scheduled: Option<(AccessToken, UnixTime)> = None;

    loop {
        let current = session.current().await;

        let Some(token) = current.token() else {
            scheduled = None;
            tracing::trace!("no credential held, waiting for one");
            match changes.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        };

        let renew_at = match &scheduled {
            Some((access, at)) if access.as_str() == token.access_token().as_str() => *at,
            _ => {
                let at = jitter_source.jitter(token.stale());
                tracing::debug!(
                    stale = token.stale().0,
                    renew_at = at.0,
                    "scheduled credential renewal"
                );
                scheduled = Some((token.access_token().to_owned(), at));
                at
            }
        };

        let now = clock.now();
        if now < renew_at {
            let until_stale = renew_at - now;
            let delay = until_stale.min(HEARTBEAT);
            tracing::trace!(
                delay = delay.0,
                until_stale = until_stale.0,
                "credential not yet stale, sleeping"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay.into()) => {}
                changed = changes.recv() => {
                    if let Err(RecvError::Closed) = changed {
                        return;
                    }
                }
            }
            continue;
        }

        tracing::debug!(kind = current.kind(), "credential stale, renewing");
        match backoff.observe(session.renew(&current).await) {
            Ok(renewed) => {
                tracing::debug!(kind = renewed.kind(), "proactive renewal succeeded");

                if let Some(token) = renewed.token() {
                    if token.stale() <= clock.now() {
                        let pause =
                            DurationSecs((token.lifetime().0 / 2).clamp(MIN_PAUSE.0, HEARTBEAT.0));
                        tracing::warn!(
                            lifetime = token.lifetime().0,
                            pause = pause.0,
                            "renewed credential is already stale, pausing"
                        );
                        tokio::time::sleep(pause.into()).await;
                    }
                }
            }
            Err((error, delay)) => {
                tracing::warn!(
                    error = &error as &dyn error::Error,
                    delay_ms = delay.as_millis() as u64,
                    "proactive renewal failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use credo_clock::TestClock;

    use super::*;
    use crate::{
        jitter::NullJitter, testing::MockTokenService, Credential, CredentialStore, DeviceId,
    };

    async fn wait_for_token(session: &Session, access: &str) {
        let mut changes = session.store().subscribe();
        tokio::time::timeout(Duration::from_secs(600), async {
            loop {
                if session.current().await.access_token().map(|a| a.as_str()) == Some(access) {
                    return;
                }
                let _ = changes.recv().await;
            }
        })
        .await
        .expect("credential was not renewed in time");
    }

    fn session_with(service: MockTokenService) -> (Session, Arc<MockTokenService>) {
        let service = Arc::new(service);
        let session = Session::new(
            Arc::new(CredentialStore::in_memory()),
            service.clone(),
            DeviceId::from_static("device-1"),
        );
        (session, service)
    }

    #[tokio::test(start_paused = true)]
    async fn renews_once_the_credential_is_stale() {
        let clock = TestClock::new(UnixTime(1_000));
        let (session, service) = session_with(
            MockTokenService::with_clock(clock.clone())
                .on_anonymous_grant("anon1")
                .on_anonymous_grant("anon2"),
        );
        session.ensure().await.unwrap();

        let _task = spawn_refresher_with_clock(
            session.clone(),
            NullJitter,
            ErrorBackoffConfig::default(),
            clock.clone(),
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(service.anonymous_calls(), 1);

        // Stale at 1000 + 2700
        clock.set(UnixTime(3_700));
        wait_for_token(&session, "anon2").await;
        assert_eq!(service.anonymous_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_while_nothing_is_held() {
        let clock = TestClock::new(UnixTime(1_000));
        let (session, service) =
            session_with(MockTokenService::with_clock(clock.clone()).on_anonymous_grant("anon1"));

        let _task = spawn_refresher_with_clock(
            session.clone(),
            NullJitter,
            ErrorBackoffConfig::default(),
            clock.clone(),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(service.calls().is_empty());
        assert_eq!(session.current().await, Credential::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_and_retry() {
        let clock = TestClock::new(UnixTime(1_000));
        let (session, service) = session_with(
            MockTokenService::with_clock(clock.clone())
                .on_anonymous_grant("anon1")
                .on_anonymous_failure()
                .on_anonymous_grant("anon2"),
        );
        session.ensure().await.unwrap();
        clock.set(UnixTime(5_000));

        let _task = spawn_refresher_with_clock(
            session.clone(),
            NullJitter,
            ErrorBackoffConfig::default(),
            clock.clone(),
        );

        wait_for_token(&session, "anon2").await;
        assert_eq!(service.anonymous_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn short_lived_credentials_are_not_renewed_back_to_back() {
        let clock = TestClock::new(UnixTime(1_000));
        let mut service =
            MockTokenService::with_clock(clock.clone()).with_lifetime(DurationSecs(20));
        for i in 0..50 {
            service = service.on_anonymous_grant(&format!("anon{}", i));
        }
        let (session, service) = session_with(service);
        session.ensure().await.unwrap();

        let _task = spawn_refresher_with_clock(
            session.clone(),
            NullJitter,
            ErrorBackoffConfig::default(),
            clock.clone(),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(service.anonymous_calls(), 2);

        // Half of the 20 second lifetime passes between renewals
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.anonymous_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_the_refresher() {
        let clock = TestClock::new(UnixTime(1_000));
        let (session, service) =
            session_with(MockTokenService::with_clock(clock.clone()).on_anonymous_grant("anon1"));
        session.ensure().await.unwrap();

        let task = spawn_refresher_with_clock(
            session.clone(),
            NullJitter,
            ErrorBackoffConfig::default(),
            clock.clone(),
        );
        drop(task);

        clock.set(UnixTime(5_000));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(service.anonymous_calls(), 1);
    }
}
