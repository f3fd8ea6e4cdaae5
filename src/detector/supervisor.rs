//! Supervised restarts for a detector that may crash or exit.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::DetectorProcess;

/// Bounded exponential backoff between detector restarts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed over the lifetime of the supervisor. Zero disables restarts.
    pub max_restarts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Self::default()
        }
    }

    /// Delay before restart number `attempt` (1-based): doubles each time, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Wraps a detector and restarts it after it exits, per `RestartPolicy`.
///
/// Waiting for a restart never blocks longer than the poll timeout, so the
/// loop keeps capturing and rendering while the detector is down.
pub struct SupervisedDetector<D> {
    inner: D,
    policy: RestartPolicy,
    restarts: u32,
    restart_at: Option<Instant>,
    gave_up: bool,
}

impl<D: DetectorProcess> SupervisedDetector<D> {
    pub fn new(inner: D, policy: RestartPolicy) -> Self {
        Self {
            inner,
            policy,
            restarts: 0,
            restart_at: None,
            gave_up: false,
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    fn schedule_restart(&mut self, reason: anyhow::Error) -> Result<()> {
        if let Err(err) = self.inner.stop() {
            log::warn!("detector `{}`: cleanup failed: {:#}", self.inner.name(), err);
        }
        if self.restarts >= self.policy.max_restarts {
            self.gave_up = true;
            return Err(reason.context(format!(
                "detector `{}` is down after {} restart(s)",
                self.inner.name(),
                self.restarts
            )));
        }
        self.restarts += 1;
        let backoff = self.policy.backoff_for(self.restarts);
        log::warn!(
            "detector `{}`: {:#}; restart {}/{} in {}ms",
            self.inner.name(),
            reason,
            self.restarts,
            self.policy.max_restarts,
            backoff.as_millis()
        );
        self.restart_at = Some(Instant::now() + backoff);
        Ok(())
    }
}

impl<D: DetectorProcess> DetectorProcess for SupervisedDetector<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&mut self) -> Result<()> {
        match self.inner.start() {
            Ok(()) => Ok(()),
            Err(err) => self.schedule_restart(err),
        }
    }

    fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if self.gave_up {
            return Err(anyhow!("detector `{}` gave up", self.inner.name()));
        }
        if let Some(at) = self.restart_at {
            let now = Instant::now();
            if now < at {
                std::thread::sleep(timeout.min(at - now));
                return Ok(None);
            }
            self.restart_at = None;
            if let Err(err) = self.inner.start() {
                self.schedule_restart(err)?;
                return Ok(None);
            }
            log::info!(
                "detector `{}` restarted ({}/{})",
                self.inner.name(),
                self.restarts,
                self.policy.max_restarts
            );
        }

        let line = self.inner.poll_line(timeout)?;
        if line.is_none() && self.inner.has_exited() {
            self.schedule_restart(anyhow!("detector exited"))?;
        }
        Ok(line)
    }

    fn has_exited(&mut self) -> bool {
        self.gave_up
    }

    fn stop(&mut self) -> Result<()> {
        self.restart_at = None;
        self.inner.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ScriptStep, ScriptedDetector};

    fn instant_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            max_restarts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(8));
    }

    #[test]
    fn restarts_after_exit_then_gives_up() -> Result<()> {
        let script = ScriptedDetector::new([
            ScriptStep::Line("a".into()),
            ScriptStep::Exit,
            ScriptStep::Line("b".into()),
            ScriptStep::Exit,
        ]);
        let mut detector = SupervisedDetector::new(script, instant_policy(1));
        detector.start()?;
        let timeout = Duration::from_millis(5);

        assert_eq!(detector.poll_line(timeout)?, Some("a".to_string()));
        assert_eq!(detector.poll_line(timeout)?, None);
        assert_eq!(detector.poll_line(timeout)?, Some("b".to_string()));
        assert_eq!(detector.restarts(), 1);

        let err = detector.poll_line(timeout).unwrap_err();
        assert!(format!("{:#}", err).contains("after 1 restart"));
        assert!(detector.has_exited());
        assert!(detector.poll_line(timeout).is_err());
        Ok(())
    }

    #[test]
    fn no_restarts_means_first_exit_is_fatal() -> Result<()> {
        let mut detector =
            SupervisedDetector::new(ScriptedDetector::new([ScriptStep::Exit]), RestartPolicy::never());
        detector.start()?;
        assert!(detector.poll_line(Duration::ZERO).is_err());
        Ok(())
    }

    #[test]
    fn failed_start_is_retried() -> Result<()> {
        let script = ScriptedDetector::from_lines(["[]"]).fail_starts(1);
        let mut detector = SupervisedDetector::new(script, instant_policy(2));

        detector.start()?;
        assert!(!detector.inner().is_running());

        assert_eq!(detector.poll_line(Duration::ZERO)?, Some("[]".to_string()));
        assert!(detector.inner().is_running());
        assert_eq!(detector.inner().starts(), 1);
        Ok(())
    }

    #[test]
    fn pending_restart_waits_at_most_the_timeout() -> Result<()> {
        let policy = RestartPolicy {
            max_restarts: 1,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
        };
        let mut detector = SupervisedDetector::new(ScriptedDetector::new([ScriptStep::Exit]), policy);
        detector.start()?;
        assert_eq!(detector.poll_line(Duration::ZERO)?, None);

        let started = Instant::now();
        assert_eq!(detector.poll_line(Duration::from_millis(20))?, None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(detector.inner().starts(), 1);
        Ok(())
    }
}
