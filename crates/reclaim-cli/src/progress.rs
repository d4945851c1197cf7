use std::io::{self, IsTerminal, Stderr, Write};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use reclaim_core::gc::{PrunePhase, PruneProgressEvent, ProgressSink};
use tracing_subscriber::fmt::MakeWriter;

use crate::format::{format_elapsed, percent};

const PROGRESS_REDRAW_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Shared state between the progress renderer and the tracing writer
// ---------------------------------------------------------------------------

/// True while a progress line is being displayed on stderr.
static PROGRESS_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Serializes all stderr writes between the progress renderer and tracing.
static STDERR_LOCK: Mutex<()> = Mutex::new(());

fn acquire_stderr_lock() -> MutexGuard<'static, ()> {
    STDERR_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Progress-aware tracing writer
// ---------------------------------------------------------------------------

/// A [`MakeWriter`] that clears the progress line before each tracing event,
/// preventing log messages from corrupting the `\r`-based progress display.
pub(crate) struct ProgressAwareStderr;

/// Holds the `STDERR_LOCK` guard for the entire lifetime of a single tracing
/// write, so the lock spans from the line-clear through the full log message.
pub(crate) struct ProgressWriter {
    _guard: MutexGuard<'static, ()>,
    inner: Stderr,
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressAwareStderr {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let guard = acquire_stderr_lock();
        let mut stderr = io::stderr();

        if PROGRESS_ACTIVE.load(Relaxed) && stderr.is_terminal() {
            // Clear the current progress line so the log message starts clean.
            let _ = stderr.write_all(b"\r\x1b[2K");
        }

        ProgressWriter {
            _guard: guard,
            inner: stderr,
        }
    }
}

// ---------------------------------------------------------------------------
// Prune progress renderer
// ---------------------------------------------------------------------------

/// Position within the phase currently running.
#[derive(Debug, Default)]
struct PhaseLine {
    phase: Option<PrunePhase>,
    done: u64,
    total: u64,
}

impl PhaseLine {
    /// Apply an event. Returns true when the line should be redrawn, and
    /// whether the phase just ended.
    fn apply(&mut self, event: PruneProgressEvent) -> (bool, bool) {
        match event {
            PruneProgressEvent::PhaseStarted { phase, total } => {
                self.phase = Some(phase);
                self.done = 0;
                self.total = total;
                (true, false)
            }
            PruneProgressEvent::Advanced { phase, units } => {
                if self.phase != Some(phase) {
                    return (false, false);
                }
                self.done = self.done.saturating_add(units).min(self.total);
                (true, false)
            }
            PruneProgressEvent::PhaseFinished { phase } => {
                if self.phase != Some(phase) {
                    return (false, false);
                }
                self.done = self.total;
                (true, true)
            }
        }
    }

    fn render(&self, elapsed: Duration) -> String {
        let label = self.phase.map(|p| p.label()).unwrap_or("-");
        format!(
            "[{}] {:5.1}%  {} / {} {label}",
            format_elapsed(elapsed.as_secs()),
            percent(self.done, self.total),
            self.done,
            self.total,
        )
    }
}

struct RendererState {
    line: PhaseLine,
    started: Instant,
    last_draw: Instant,
    last_line_len: usize,
    rendered_any: bool,
}

/// Draws a single `\r`-refreshed line per prune phase on stderr.
pub(crate) struct PruneProgressRenderer {
    state: Mutex<RendererState>,
}

impl PruneProgressRenderer {
    pub(crate) fn new() -> Self {
        PROGRESS_ACTIVE.store(true, Relaxed);
        let now = Instant::now();
        Self {
            state: Mutex::new(RendererState {
                line: PhaseLine::default(),
                started: now,
                last_draw: now,
                last_line_len: 0,
                rendered_any: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        if state.rendered_any {
            let _guard = acquire_stderr_lock();
            eprintln!();
        }
        state.rendered_any = false;
        state.last_line_len = 0;
        PROGRESS_ACTIVE.store(false, Relaxed);
    }
}

impl ProgressSink for PruneProgressRenderer {
    fn on_event(&self, event: PruneProgressEvent) {
        let mut state = self.lock();
        let (redraw, phase_done) = state.line.apply(event);
        if !redraw {
            return;
        }
        let throttled = state.rendered_any
            && !phase_done
            && state.last_draw.elapsed() < PROGRESS_REDRAW_INTERVAL;
        if throttled {
            return;
        }
        state.last_draw = Instant::now();

        let line = state.line.render(state.started.elapsed());
        let pad_len = state.last_line_len.saturating_sub(line.len());
        {
            let _guard = acquire_stderr_lock();
            eprint!("\r{line}{}", " ".repeat(pad_len));
            if phase_done {
                eprintln!();
            }
            let _ = io::stderr().flush();
        }
        state.last_line_len = if phase_done { 0 } else { line.len() };
        state.rendered_any = !phase_done;
    }
}
