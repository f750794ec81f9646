//! Deadline arithmetic for backend attempts.
//!
//! Every backend round trip carries an absolute deadline: the earlier of
//! its own per-attempt budget and the deadline of the whole forwarding
//! operation.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline for one attempt starting at `now`.
pub fn deadline_for_attempt(now: Instant, per_attempt: Duration, overall: Instant) -> Instant {
    (now + per_attempt).min(overall)
}

/// Time left before `deadline`, zero once it has passed.
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
