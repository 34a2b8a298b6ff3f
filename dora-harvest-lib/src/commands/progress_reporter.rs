use crate::collection::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

type ProgressCallback = Box<dyn Fn() -> (u64, u64, String) + Send + Sync>;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

const TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {msg}";
const TEMPLATE_NO_COLOR: &str = "{prefix:>12} [{bar:25}] {msg}";

/// A progress bar that stays hidden until the run outlasts a short delay.
///
/// When log output goes to the terminal, the bar never shows and `println` is silent since the
/// same messages are already logged.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    visible_after: Instant,
    visible: Arc<AtomicBool>,
    callback: Arc<Mutex<ProgressCallback>>,
    refresh_task: Arc<JoinHandle<()>>,
    use_colors: bool,
    logging: bool,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool, logging: bool) -> Self {
        let delay = if logging { Duration::from_hours(365 * 24) } else { delay };
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        let visible_after = Instant::now() + delay;
        let visible = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(Mutex::new(Box::new(|| (0u64, 0u64, String::new())) as ProgressCallback));

        Self {
            refresh_task: Arc::new(tokio::spawn(refresh_task(
                bar.clone(),
                visible_after,
                Arc::clone(&visible),
                Arc::clone(&callback),
            ))),
            bar,
            visible_after,
            visible,
            callback,
            use_colors,
            logging,
        }
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        *self.callback.lock().expect("lock poisoned") = callback;
        self.bar.set_length(0);
        self.bar.set_position(0);

        let template = if self.use_colors { TEMPLATE } else { TEMPLATE_NO_COLOR };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            self.bar.set_style(style.progress_chars("=> "));
        }
    }

    fn println(&self, msg: &str) {
        if !self.logging {
            self.bar.suspend(|| eprintln!("{msg}"));
        }
    }

    fn done(&self) {
        self.refresh_task.abort();
        if self.visible.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("visible_after", &self.visible_after)
            .field("visible", &self.visible)
            .field("callback", &"<callback>")
            .field("refresh_task", &"<task>")
            .field("use_colors", &self.use_colors)
            .field("logging", &self.logging)
            .finish()
    }
}

/// Periodically pulls (total, current, message) from the callback into the bar.
async fn refresh_task(bar: ProgressBar, visible_after: Instant, visible: Arc<AtomicBool>, callback: Arc<Mutex<ProgressCallback>>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    #[expect(clippy::infinite_loop, reason = "task runs until aborted")]
    loop {
        let _ = interval.tick().await;

        if !visible.load(Ordering::Relaxed) {
            if Instant::now() < visible_after {
                continue;
            }
            visible.store(true, Ordering::Relaxed);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        }

        let (length, position, message) = {
            let callback = callback.lock().expect("lock poisoned");
            callback()
        };

        if length > 0 {
            bar.set_length(length);
            bar.set_position(position);
        }
        bar.set_message(message);
    }
}
