use std::{fmt, process};

use serde::{Deserialize, Serialize};

use crate::{exception_public::Exception, io::DiagnosticWriter};

/// How the engine terminates after reporting an unhandled exception.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// `std::process::abort`: no destructors, no exit handlers.
    #[default]
    Abort,
    /// `std::process::exit` with the given status code.
    Exit(i32),
    /// Unwinds with an [`UnhandledPanic`] payload. Lets tests and embedders observe
    /// fail-fast with `std::panic::catch_unwind`.
    Panic,
}

/// Panic payload used by [`Termination::Panic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledPanic(pub Exception);

impl fmt::Display for UnhandledPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unhandled exception: {}", self.0)
    }
}

/// Writes the diagnostic block for `exc`, one line per exception in the chain.
pub(crate) fn write_report(writer: &mut impl DiagnosticWriter, exc: &Exception) {
    writer.stderr_write(format!("{exc}\n").into());
    writer.flush();
}

impl Termination {
    /// Ends the process (or the current unwind scope for [`Termination::Panic`]).
    pub(crate) fn terminate(self, exc: Exception) -> ! {
        match self {
            Self::Abort => process::abort(),
            Self::Exit(code) => process::exit(code),
            Self::Panic => std::panic::panic_any(UnhandledPanic(exc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exception_private::ExcType, io::CollectStringWriter};

    #[test]
    fn report_is_one_block_with_trailing_newline() {
        let exc = Exception {
            exc_type: ExcType::FileNotFoundException,
            message: Some("config.toml".to_owned()),
            file: "loader.rs".to_owned(),
            line: 12,
            inner: None,
        };
        let mut writer = CollectStringWriter::new();
        write_report(&mut writer, &exc);
        assert_eq!(writer.output(), "FileNotFoundException occurred at loader.rs:12, config.toml\n");
    }

    #[test]
    fn panic_termination_carries_the_exception() {
        let exc = Exception {
            exc_type: ExcType::Exception,
            message: None,
            file: "x.rs".to_owned(),
            line: 1,
            inner: None,
        };
        let expected = exc.clone();
        let payload = std::panic::catch_unwind::<_, ()>(move || Termination::Panic.terminate(exc)).unwrap_err();
        let unhandled = payload.downcast::<UnhandledPanic>().unwrap();
        assert_eq!(unhandled.0, expected);
    }
}
