//! Application UI: a progress bar plus log writers that stay out of its way.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Get a writer for `stdout`, for routine log output.
    pub fn get_stdout_writer(&self) -> SafeWriter {
        SafeWriter {
            ui: self.clone(),
            stream: Stream::Stdout,
        }
    }

    /// Get a writer for `stderr`, for warnings and errors.
    pub fn get_stderr_writer(&self) -> SafeWriter {
        SafeWriter {
            ui: self.clone(),
            stream: Stream::Stderr,
        }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a new progress bar with default settings.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len).with_style(default_progress_style());
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}")
        .expect("bad progress bar template")
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// A writer for `stdout` or `stderr`. It will hide and show progress bars as
/// needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeWriter {
    ui: Ui,
    stream: Stream,
}

impl SafeWriter {
    fn with_stream<R>(&self, f: impl FnOnce(&mut dyn io::Write) -> R) -> R {
        self.ui.multi_progress().suspend(|| match self.stream {
            Stream::Stdout => f(&mut io::stdout()),
            Stream::Stderr => f(&mut io::stderr()),
        })
    }
}

// The `tracing-indicatif` crate suggests that we should implement the following
// methods.
impl io::Write for SafeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_stream(|w| w.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_stream(|w| w.flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.with_stream(|w| w.write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.with_stream(|w| w.write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.with_stream(|w| w.write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeWriter {
    type Writer = SafeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
