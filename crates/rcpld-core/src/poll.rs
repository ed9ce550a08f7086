//! Busy polling
//!
//! Erase and program operations run inside the device; the flows wait for
//! them by reading a one-bit busy/ready flag a bounded number of times. The
//! bound, the wait between reads and what "ready" looks like are per-family
//! constants expressed as a [`BusyPoll`].

use crate::error::{Error, Result};
use crate::jtag::{EndState, JtagMaster, TapState};

/// A busy poll that ran out of attempts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{step}: device still busy after {attempts} polls{}", row_suffix(.row))]
pub struct BusyTimeout {
    /// Flow step that was waiting
    pub step: &'static str,
    /// Row being programmed, if any
    pub row: Option<u32>,
    /// Number of polls made
    pub attempts: u32,
}

fn row_suffix(row: &Option<u32>) -> String {
    row.map(|row| format!(" (row {})", row)).unwrap_or_default()
}

/// What to do when a busy poll runs out of attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Log a warning, record the timeout and carry on
    #[default]
    WarnAndContinue,
    /// Abort the operation
    Fail,
}

impl BusyPolicy {
    /// Apply the policy to the outcome of a poll
    ///
    /// Returns the timeout when it was tolerated, so callers can record it.
    /// Errors other than [`Error::BusyTimeout`] always propagate.
    pub fn resolve(self, result: Result<()>) -> Result<Option<BusyTimeout>> {
        match result {
            Ok(()) => Ok(None),
            Err(Error::BusyTimeout(timeout)) if self == BusyPolicy::WarnAndContinue => {
                log::warn!("{}, continuing", timeout);
                Ok(Some(timeout))
            }
            Err(e) => Err(e),
        }
    }
}

/// Bounded retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on attempts
    pub max_attempts: u32,
    /// Wait per attempt in microseconds
    pub delay_us: u32,
    /// Stop at the first ready attempt; otherwise every attempt runs
    pub until_ready: bool,
}

impl RetryPolicy {
    /// Poll until ready, at most `max_attempts` times
    pub const fn until_ready(max_attempts: u32, delay_us: u32) -> Self {
        Self {
            max_attempts,
            delay_us,
            until_ready: true,
        }
    }

    /// Run all `max_attempts` attempts; the last one decides
    pub const fn fixed(max_attempts: u32, delay_us: u32) -> Self {
        Self {
            max_attempts,
            delay_us,
            until_ready: false,
        }
    }

    /// Run `attempt` until it reports ready or the bound is reached
    pub fn retry<F>(&self, step: &'static str, row: Option<u32>, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        let mut ready = false;
        for n in 1..=self.max_attempts {
            ready = attempt()?;
            if ready && self.until_ready {
                log::trace!("{}: ready after {} polls", step, n);
                return Ok(());
            }
        }
        if ready {
            return Ok(());
        }
        Err(BusyTimeout {
            step,
            row,
            attempts: self.max_attempts,
        }
        .into())
    }
}

/// How the TAP waits before each busy-flag read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Clock `tcks` cycles in Run-Test/Idle, then wait
    Idle {
        /// Idle clocks
        tcks: u32,
    },
    /// Move to Pause-DR, then wait
    DrPause,
    /// Wait only
    Wait,
}

/// A one-bit busy/ready flag read repeatedly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPoll {
    /// Attempt bound and delay
    pub retry: RetryPolicy,
    /// Per-attempt settle step
    pub settle: Settle,
    /// Where the TAP parks after each flag read
    pub read_end: EndState,
    /// Flag value meaning the device is ready
    pub ready: bool,
}

impl BusyPoll {
    /// Poll the flag on `jtag`
    pub fn run<J: JtagMaster + ?Sized>(
        &self,
        jtag: &mut J,
        step: &'static str,
        row: Option<u32>,
    ) -> Result<()> {
        self.retry.retry(step, row, || {
            match self.settle {
                Settle::Idle { tcks } => jtag.run_test_idle(false, TapState::Idle, tcks)?,
                Settle::DrPause => jtag.run_test_idle(false, TapState::DrPause, 0)?,
                Settle::Wait => {}
            }
            jtag.delay_us(self.retry.delay_us);
            let flag = jtag.shift_dr_out(self.read_end, 1)?.get(0) == Some(true);
            Ok(flag == self.ready)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitBuffer;

    /// Answers busy-flag reads from a script, counting calls
    struct Flags {
        script: Vec<bool>,
        reads: usize,
        waited_us: u64,
        idles: usize,
    }

    impl Flags {
        fn new(script: &[bool]) -> Self {
            Self {
                script: script.to_vec(),
                reads: 0,
                waited_us: 0,
                idles: 0,
            }
        }
    }

    impl JtagMaster for Flags {
        fn run_test_idle(&mut self, _reset: bool, _end: TapState, _tcks: u32) -> Result<()> {
            self.idles += 1;
            Ok(())
        }

        fn shift_ir(&mut self, _end: EndState, bits: u32, _tdi: &BitBuffer) -> Result<BitBuffer> {
            Ok(BitBuffer::zeroed(bits as usize))
        }

        fn shift_dr_in(&mut self, _end: EndState, _bits: u32, _tdi: &BitBuffer) -> Result<()> {
            Ok(())
        }

        fn shift_dr_out(&mut self, _end: EndState, bits: u32) -> Result<BitBuffer> {
            let flag = self.script.get(self.reads).copied().unwrap_or(false);
            self.reads += 1;
            Ok(BitBuffer::from_u32(flag as u32, bits as usize))
        }

        fn frequency(&mut self) -> Result<u32> {
            Ok(1_000_000)
        }

        fn set_frequency(&mut self, _hz: u32) -> Result<()> {
            Ok(())
        }

        fn delay_us(&mut self, us: u32) {
            self.waited_us += u64::from(us);
        }
    }

    #[test]
    fn test_until_ready_stops_early() {
        let poll = BusyPoll {
            retry: RetryPolicy::until_ready(10, 3000),
            settle: Settle::Wait,
            read_end: EndState::Idle,
            ready: false,
        };
        let mut jtag = Flags::new(&[true, true, false, true]);
        poll.run(&mut jtag, "row program", Some(4)).unwrap();
        assert_eq!(jtag.reads, 3);
        assert_eq!(jtag.waited_us, 9000);
    }

    #[test]
    fn test_fixed_runs_every_attempt() {
        let poll = BusyPoll {
            retry: RetryPolicy::fixed(100, 1000),
            settle: Settle::Idle { tcks: 5 },
            read_end: EndState::Pause,
            ready: true,
        };
        let mut jtag = Flags::new(&[true; 100]);
        poll.run(&mut jtag, "erase", None).unwrap();
        assert_eq!(jtag.reads, 100);
        assert_eq!(jtag.idles, 100);
    }

    #[test]
    fn test_timeout() {
        let poll = BusyPoll {
            retry: RetryPolicy::until_ready(10, 3000),
            settle: Settle::DrPause,
            read_end: EndState::Pause,
            ready: true,
        };
        let mut jtag = Flags::new(&[]);
        let err = poll.run(&mut jtag, "row program", Some(7)).unwrap_err();
        match err {
            Error::BusyTimeout(t) => {
                assert_eq!(t.attempts, 10);
                assert_eq!(t.row, Some(7));
                assert_eq!(t.to_string(), "row program: device still busy after 10 polls (row 7)");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(jtag.reads, 10);
    }

    #[test]
    fn test_busy_policy() {
        let timeout = || -> Result<()> {
            Err(BusyTimeout {
                step: "erase",
                row: None,
                attempts: 800,
            }
            .into())
        };

        let tolerated = BusyPolicy::WarnAndContinue.resolve(timeout()).unwrap();
        assert_eq!(tolerated.as_ref().map(|t| t.attempts), Some(800));
        assert_eq!(
            tolerated.map(|t| t.to_string()).as_deref(),
            Some("erase: device still busy after 800 polls")
        );
        assert!(matches!(
            BusyPolicy::Fail.resolve(timeout()),
            Err(Error::BusyTimeout(_))
        ));
        assert!(BusyPolicy::Fail.resolve(Ok(())).unwrap().is_none());
        assert!(matches!(
            BusyPolicy::WarnAndContinue.resolve(Err(Error::Transport("x".into()))),
            Err(Error::Transport(_))
        ));
    }
}
