//! Progress bar observer.

use bleota_core::{OtaEvent, OtaObserver, TracingObserver};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Renders block progress with a bar and forwards everything else to
/// tracing.
pub struct ProgressObserver {
    bar: ProgressBar,
    log: TracingObserver,
}

impl ProgressObserver {
    pub fn new(enabled: bool) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("Progress: [{elapsed_precise}] [{bar:50.cyan/blue}] {pos}/{len} blocks {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            log: TracingObserver,
        }
    }
}

impl OtaObserver for ProgressObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::ModeSelected { multi_block } => {
                self.bar.set_message(if *multi_block {
                    "(multi-block)"
                } else {
                    "(single-block)"
                });
            }
            OtaEvent::Progress { completed, total } => {
                self.bar.set_length(u64::from(*total));
                self.bar.set_position(u64::from(*completed));
            }
            OtaEvent::Installing => self.bar.set_message("installing"),
            OtaEvent::Result { success, .. } => {
                if *success {
                    self.bar.finish_with_message("done");
                } else {
                    self.bar.abandon_with_message("failed");
                }
            }
            // Packet traces are too chatty to interleave with the bar.
            OtaEvent::Packet { .. } => {}
            other => self.bar.suspend(|| self.log.on_event(other)),
        }
    }
}
