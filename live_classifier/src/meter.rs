//! Periodic rate logging of a running live loop.
//!
use std::time::{Duration, Instant};

use tokio::{sync::watch, task::JoinHandle, time::interval};

use crate::live::LoopReport;

/// Rates of the live loop between two reports.
#[derive(Clone, Debug, PartialEq)]
pub struct Rates {
    pub iterations_per_sec: f32,
    pub classified_per_sec: f32,
    pub missing_per_sec: f32,
    /// Share of fake labels among the real/fake decisions, `None` without any.
    pub fake_share: Option<f32>,
}

/// Rates from the difference of two cumulative reports.
pub fn rates(previous: &LoopReport, current: &LoopReport, elapsed: Duration) -> Rates {
    let secs = elapsed.as_secs_f32().max(f32::EPSILON);
    let per_sec = |now: usize, before: usize| now.saturating_sub(before) as f32 / secs;

    let real = current.real.saturating_sub(previous.real);
    let fake = current.fake.saturating_sub(previous.fake);
    let fake_share = match real + fake {
        0 => None,
        decided => Some(fake as f32 / decided as f32),
    };

    Rates {
        iterations_per_sec: per_sec(current.iterations, previous.iterations),
        classified_per_sec: per_sec(current.classified(), previous.classified()),
        missing_per_sec: per_sec(current.missing_frames, previous.missing_frames),
        fake_share,
    }
}

/// Log the loop rates every `period` until the loop drops its progress sender.
pub fn spawn_report_logger(
    mut progress: watch::Receiver<LoopReport>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        let mut previous = LoopReport::default();
        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let current = progress.borrow_and_update().clone();
            if current.iterations > previous.iterations {
                let rates = rates(&previous, &current, start.elapsed());
                log::info!(
                    "Iterations per second: {:.2}, classified: {:.2}, missing: {:.2}",
                    rates.iterations_per_sec,
                    rates.classified_per_sec,
                    rates.missing_per_sec
                );
                if let Some(share) = rates.fake_share {
                    log::info!("Fake share: {:.0}%", share * 100.0);
                }
            }
            previous = current;

            if progress.has_changed().is_err() {
                log::debug!("Live loop finished, report logger stopped");
                break;
            }
        }
    })
}
