//! Decides which byte counts are worth reporting.

/// Minimum percentage advance between two progress events
pub const PERCENT_STEP: u8 = 5;

/// Whole percentage of `downloaded` over `total`, clamped to 100.
///
/// Returns `None` for an unknown or zero total.
pub fn percentage(downloaded: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let pct = (u128::from(downloaded) * 100) / u128::from(total);
    Some(pct.min(100) as u8)
}

/// Outcome of feeding a byte count to the throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// A new whole percentage worth emitting
    Percent(u8),
    /// Size is unknown, but another byte step has been crossed
    Bytes,
}

#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total: Option<u64>,
    last_percent: u8,
    reached_full: bool,
    unknown_step: u64,
    next_unknown_mark: u64,
}

impl ProgressThrottle {
    pub fn new(total: Option<u64>, unknown_step: u64) -> Self {
        let unknown_step = unknown_step.max(1);
        Self {
            total: total.filter(|t| *t > 0),
            last_percent: 0,
            reached_full: false,
            unknown_step,
            next_unknown_mark: unknown_step,
        }
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Feed the cumulative byte count, returning what should be reported, if anything.
    pub fn observe(&mut self, downloaded: u64) -> Option<Report> {
        match percentage(downloaded, self.total) {
            Some(pct) => {
                if self.reached_full {
                    return None;
                }
                let advanced = pct >= self.last_percent.saturating_add(PERCENT_STEP);
                if advanced || pct == 100 {
                    self.last_percent = pct;
                    self.reached_full = pct == 100;
                    Some(Report::Percent(pct))
                } else {
                    None
                }
            }
            None => {
                if downloaded >= self.next_unknown_mark {
                    // skip every mark a large chunk jumped over
                    let steps = downloaded / self.unknown_step + 1;
                    self.next_unknown_mark = steps.saturating_mul(self.unknown_step);
                    Some(Report::Bytes)
                } else {
                    None
                }
            }
        }
    }
}
