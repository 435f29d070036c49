use std::{
    borrow::Cow,
    io::{self, Write as _},
};

/// Destination for the unhandled-exception diagnostic.
///
/// The engine writes one report block per escaping exception, immediately before it
/// terminates. Implement this trait to capture or redirect that report; the default
/// implementation [`StdErr`] writes to the process's error channel.
pub trait DiagnosticWriter {
    /// Called with a chunk of diagnostic text. The engine supplies line terminators.
    ///
    /// Writing must not fail the caller: the engine is already on its way out, so
    /// implementations swallow I/O errors.
    fn stderr_write(&mut self, output: Cow<'_, str>);

    /// Flushes any buffered text. Called once before termination.
    fn flush(&mut self) {}
}

/// Default `DiagnosticWriter` that writes to stderr.
#[derive(Debug, Default)]
pub struct StdErr;

impl DiagnosticWriter for StdErr {
    fn stderr_write(&mut self, output: Cow<'_, str>) {
        let _ = io::stderr().write_all(output.as_bytes());
    }

    fn flush(&mut self) {
        let _ = io::stderr().flush();
    }
}

/// A `DiagnosticWriter` that collects all output into a string.
///
/// Useful for testing: combine with
/// [`Termination::Panic`](crate::Termination::Panic) to observe the report without
/// the process exiting.
#[derive(Debug, Default)]
pub struct CollectStringWriter(String);

impl CollectStringWriter {
    /// Creates a new empty `CollectStringWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl DiagnosticWriter for CollectStringWriter {
    fn stderr_write(&mut self, output: Cow<'_, str>) {
        self.0.push_str(&output);
    }
}

/// `DiagnosticWriter` that ignores all output.
///
/// Useful for benchmarking, where fail-fast is never expected to run.
#[derive(Debug, Default)]
pub struct NoWriter;

impl DiagnosticWriter for NoWriter {
    fn stderr_write(&mut self, _output: Cow<'_, str>) {}
}
