//! Human readable progress stream.
//!
//! Lines are pushed to a [`Sink`] as soon as they are produced, typically a chunked HTTP body,
//! and mirrored to the log. Errors are prefixed `ERROR: `, confirmations are suffixed `: OK`.

use core::fmt::{self, Write};

use crate::Error;

/// Receiver of sequential text chunks.
///
/// Sending cannot fail from the point of view of the caller: a disconnected client does not
/// stop a running migration.
pub trait Sink {
    fn send(&mut self, chunk: &str);
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn send(&mut self, chunk: &str) {
        (**self).send(chunk)
    }
}

pub struct Transcript<S> {
    sink: S,
}

impl<S: Sink> Transcript<S> {
    pub const fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Informational line.
    pub fn line(&mut self, message: impl fmt::Display) {
        log::info!("{}", message);
        let _ = writeln!(self, "{message}");
    }

    /// Confirmation that a step succeeded.
    pub fn ok(&mut self, message: impl fmt::Display) {
        log::info!("{}: OK", message);
        let _ = writeln!(self, "{message}: OK");
    }

    pub fn error(&mut self, message: impl fmt::Display) {
        log::error!("{}", message);
        let _ = writeln!(self, "ERROR: {message}");
    }

    /// Report `error` and hand it back for returning.
    pub fn fail(&mut self, error: Error) -> Error {
        self.error(error);
        error
    }
}

impl<S: Sink> Write for Transcript<S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.send(s);
        Ok(())
    }
}
