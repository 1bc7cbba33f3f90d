//! Anti-automation challenge handling.
//!
//! The handler is a two-state machine (Clear/Blocked). Whenever the remote
//! session shows a challenge it asks the operator to clear it and blocks
//! until they confirm, re-probing after every confirmation. There is no
//! timeout: the only ways out are a cleared page or an operator interrupt.

use std::io::{BufRead, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use tokio_util::sync::CancellationToken;

use crate::error::ChallengeError;
use crate::remote::{RemoteBrowser, RemoteRef};

/// How often a page is reopened after a challenge moved the session away.
pub const REOPEN_ATTEMPTS: usize = 3;

const PROMPT: &str = "Anti-automation check detected.\n\
    Please solve it in the browser window, then press ENTER to continue...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Clear,
    Blocked,
}

/// A human on the other end of the run.
pub trait Operator {
    /// Show `message` and block until the operator signals they are done.
    fn wait_for_operator(&mut self, message: &str) -> Result<(), ChallengeError>;
}

/// Operator reached through the terminal. Lines typed on stdin are read on a
/// helper thread and handed over a channel, so the waiting side can keep an
/// eye on the shutdown token.
pub struct StdinOperator {
    rx: Receiver<()>,
    cancel: CancellationToken,
    poll: Duration,
}

impl StdinOperator {
    pub fn spawn(cancel: CancellationToken) -> Self {
        let (tx, rx) = unbounded::<()>();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if line.is_err() || tx.send(()).is_err() {
                    break;
                }
            }
        });
        Self { rx, cancel, poll: Duration::from_millis(500) }
    }
}

impl Operator for StdinOperator {
    fn wait_for_operator(&mut self, message: &str) -> Result<(), ChallengeError> {
        // Enter presses from before the prompt must not count.
        while self.rx.try_recv().is_ok() {}
        let bar = "=".repeat(60);
        println!("\n{}\n{}\n{}\n", bar, message, bar);
        let _ = std::io::stdout().flush();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ChallengeError::Interrupted);
            }
            match self.rx.recv_timeout(self.poll) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(ChallengeError::OperatorGone),
            }
        }
    }
}

pub struct ChallengeHandler {
    operator: Box<dyn Operator>,
    state: ChallengeState,
    recheck_every: usize,
    prompts: u64,
}

impl ChallengeHandler {
    pub fn new(operator: Box<dyn Operator>, recheck_every: usize) -> Self {
        Self { operator, state: ChallengeState::Clear, recheck_every: recheck_every.max(1), prompts: 0 }
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// How many times the operator was asked to step in.
    pub fn prompts(&self) -> u64 {
        self.prompts
    }

    fn probe(browser: &mut dyn RemoteBrowser) -> bool {
        match browser.detect_challenge_signals() {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("challenge probe failed, assuming none: {:#}", e);
                false
            }
        }
    }

    /// Return once the current page shows no challenge, prompting the
    /// operator as many times as it takes.
    pub fn ensure_clear(&mut self, browser: &mut dyn RemoteBrowser) -> Result<(), ChallengeError> {
        while Self::probe(browser) {
            if self.state == ChallengeState::Clear {
                tracing::warn!("challenge detected, waiting for the operator");
            }
            self.state = ChallengeState::Blocked;
            self.prompts += 1;
            self.operator.wait_for_operator(PROMPT)?;
            // The operator cleared it elsewhere; reload so the probe sees the
            // page as it is now.
            if let Some(loc) = browser.current_location()
                && let Err(e) = browser.navigate(&loc)
            {
                tracing::debug!("reload after challenge failed: {:#}", e);
            }
        }
        if self.state == ChallengeState::Blocked {
            tracing::info!("challenge cleared, continuing");
            self.state = ChallengeState::Clear;
        }
        Ok(())
    }

    /// `ensure_clear` for a page the caller just opened at `location`.
    /// Returns `true` when the operator had to step in and the session ended
    /// up somewhere else (sites often redirect to the challenge page); the
    /// caller then has to open `location` again.
    pub fn clear_for(
        &mut self,
        browser: &mut dyn RemoteBrowser,
        location: &RemoteRef,
    ) -> Result<bool, ChallengeError> {
        let before = self.prompts;
        self.ensure_clear(browser)?;
        Ok(self.prompts != before && browser.current_location().as_ref() != Some(location))
    }

    /// Periodic re-check during long listing scans: every `recheck_every`
    /// processed items.
    pub fn checkpoint(
        &mut self,
        browser: &mut dyn RemoteBrowser,
        processed: usize,
    ) -> Result<(), ChallengeError> {
        if processed > 0 && processed % self.recheck_every == 0 {
            self.ensure_clear(browser)?;
        }
        Ok(())
    }
}
