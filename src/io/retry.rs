use std::io::{self, Read};
use std::thread;
use std::time::Duration;

use log::debug;

/// How long a read keeps trying when another process holds a lock on the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Added to the delay for every further retry.
    pub delay_step: Duration,
    /// Upper bound on the summed delays.
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_delay: Duration::from_millis(250),
            delay_step: Duration::from_millis(550),
            max_total_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay + self.delay_step * retry.saturating_sub(1)
    }
}

/// Whether `err` is the operating system reporting contention on a byte-range lock.
pub fn is_lock_violation(err: &io::Error) -> bool {
    #[cfg(windows)]
    {
        const ERROR_LOCK_VIOLATION: i32 = 33;
        err.raw_os_error() == Some(ERROR_LOCK_VIOLATION)
    }

    #[cfg(not(windows))]
    {
        err.kind() == io::ErrorKind::WouldBlock
    }
}

/// Perform one `read`, retrying only while the failure is a lock violation.
pub fn read_with_retry<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    policy: &RetryPolicy,
) -> io::Result<usize> {
    let mut retries = 0u32;
    let mut waited = Duration::ZERO;
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_lock_violation(&e) => {
                retries += 1;
                let delay = policy.delay_for(retries);
                if retries > policy.max_retries || waited + delay > policy.max_total_wait {
                    return Err(io::Error::new(
                        e.kind(),
                        format!("file remained locked after {} retries: {e}", retries - 1),
                    ));
                }
                debug!("read hit a lock violation, retry {retries} in {delay:?}");
                thread::sleep(delay);
                waited += delay;
            }
            Err(e) => return Err(e),
        }
    }
}
