use std::fmt;

use serde::{Deserialize, Serialize};

use crate::exception_private::ExcType;

/// Owned snapshot of an exception and its chain of causes.
///
/// Heap exceptions are only reachable through handles and die with their last owner;
/// this type copies everything out so it can outlive the heap, be compared in tests or
/// be serialized. Obtained from [`Engine::snapshot`](crate::Engine::snapshot) and handed
/// to [`ExceptionTracer::on_unhandled`](crate::ExceptionTracer::on_unhandled).
///
/// `Display` renders the unhandled-exception diagnostic:
///
/// ```text
/// InvalidOperationException occurred at src/orders.rs:41, order already shipped
///   ---> IOException occurred at src/store.rs:7, disk full
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exception {
    pub exc_type: ExcType,
    /// Message exactly as supplied at the throw site; `None` means the type's default.
    pub message: Option<String>,
    pub file: String,
    pub line: u32,
    /// The chained cause, if any.
    pub inner: Option<Box<Exception>>,
}

impl Exception {
    /// The explicit message, or the type's default message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.exc_type.default_message())
    }

    /// Iterates over the chained causes, nearest first. Does not include `self`.
    pub fn causes(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(self.inner.as_deref(), |exc| exc.inner.as_deref())
    }

    /// The innermost exception of the chain, which is `self` when there is no cause.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        self.causes().last().unwrap_or(self)
    }

    /// Single-line summary without the causes: `"<Type> occurred at <file>:<line>[, <message>]"`.
    #[must_use]
    pub fn summary(&self) -> String {
        Summary(self).to_string()
    }
}

struct Summary<'a>(&'a Exception);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exc = self.0;
        write!(f, "{} occurred at {}:{}", exc.exc_type, exc.file, exc.line)?;
        if let Some(message) = &exc.message {
            write!(f, ", {message}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Summary(self))?;
        for cause in self.causes() {
            write!(f, "\n  ---> {}", Summary(cause))?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.as_deref().map(|inner| inner as &(dyn std::error::Error + 'static))
    }
}
