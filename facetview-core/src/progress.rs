//! Progress reporting for long-running decodes.
//!
//! Decoders accept an optional callback receiving a fraction in `[0, 1]`
//! and a status message. The callback returns [`ProgressControl`]; returning
//! [`ProgressControl::Abort`] makes the decoder stop with
//! [`LoadError::Cancelled`].

use crate::error::{LoadError, LoadResult};

/// Answer of a progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressControl {
    #[default]
    Continue,
    Abort,
}

/// Caller-supplied progress callback.
pub type ProgressFn<'a> = &'a mut dyn FnMut(f32, &str) -> ProgressControl;

/// Throttling wrapper around an optional [`ProgressFn`].
///
/// Forwards at most one notification per integer percentage point, plus one
/// whenever the message changes.
pub struct Progress<'a> {
    sink: Option<ProgressFn<'a>>,
    last_percent: Option<u32>,
    last_message: String,
}

impl<'a> Progress<'a> {
    pub fn new(sink: Option<ProgressFn<'a>>) -> Self {
        Self {
            sink,
            last_percent: None,
            last_message: String::new(),
        }
    }

    /// Report a fraction of work done under the given message.
    pub fn report(&mut self, fraction: f32, message: &str) -> LoadResult<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };

        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let percent = (fraction * 100.0).floor() as u32;

        if self.last_percent == Some(percent) && self.last_message == message {
            return Ok(());
        }
        self.last_percent = Some(percent);
        if self.last_message != message {
            self.last_message.clear();
            self.last_message.push_str(message);
        }

        match sink(fraction, message) {
            ProgressControl::Continue => Ok(()),
            ProgressControl::Abort => Err(LoadError::Cancelled),
        }
    }

    /// Report `done` out of `total` items, mapped into `[start, end]`.
    pub fn report_span(
        &mut self,
        start: f32,
        end: f32,
        done: usize,
        total: usize,
        message: &str,
    ) -> LoadResult<()> {
        let ratio = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        self.report(start + (end - start) * ratio as f32, message)
    }
}
