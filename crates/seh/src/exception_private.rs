use std::{fmt, panic::Location};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::heap::HeapId;

/// Exception tags supported by the runtime.
///
/// The set is closed and forms a single tree rooted at [`ExcType::Exception`]; see
/// [`ExcType::parent`] for the edges. Uses strum derives for `Display`, `FromStr` and
/// `Into<&'static str>`; the string form matches the variant name exactly
/// (e.g. `ArgumentNullException` -> "ArgumentNullException").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcType {
    /// Root of the hierarchy - matches every exception in a catch test.
    Exception,
    /// Base for every exception raised by the runtime itself.
    SystemException,

    // --- ArgumentException hierarchy ---
    ArgumentException,
    /// Subclass of ArgumentException.
    ArgumentNullException,
    /// Subclass of ArgumentException.
    ArgumentOutOfRangeException,

    // --- IOException hierarchy ---
    IOException,
    /// Subclass of IOException.
    FileNotFoundException,

    // --- ArithmeticException hierarchy ---
    ArithmeticException,
    /// Subclass of ArithmeticException.
    OverflowException,
    /// Subclass of ArithmeticException.
    DivideByZeroException,

    // --- Standalone system exceptions ---
    IndexOutOfRangeException,
    NullReferenceException,
    AccessViolationException,
    InvalidOperationException,
    OutOfMemoryException,
    FormatException,
    NotImplementedException,
    NotSupportedException,
}

impl ExcType {
    /// Returns the direct parent tag, or `None` for the root.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Exception => None,
            Self::SystemException => Some(Self::Exception),
            Self::ArgumentNullException | Self::ArgumentOutOfRangeException => Some(Self::ArgumentException),
            Self::FileNotFoundException => Some(Self::IOException),
            Self::OverflowException | Self::DivideByZeroException => Some(Self::ArithmeticException),
            Self::ArgumentException
            | Self::IOException
            | Self::ArithmeticException
            | Self::IndexOutOfRangeException
            | Self::NullReferenceException
            | Self::AccessViolationException
            | Self::InvalidOperationException
            | Self::OutOfMemoryException
            | Self::FormatException
            | Self::NotImplementedException
            | Self::NotSupportedException => Some(Self::SystemException),
        }
    }

    /// Checks whether this tag is `ancestor` or descends from it.
    ///
    /// This is the catch-test relation: returns true if an exception of type `self`
    /// would be claimed by a handler for `ancestor`. The relation is reflexive and
    /// transitive, and every tag is an instance of [`ExcType::Exception`].
    #[must_use]
    pub fn is_instance_of(self, ancestor: Self) -> bool {
        self.ancestors().any(|tag| tag == ancestor)
    }

    /// Iterates from this tag up to the root, starting with `self`.
    pub fn ancestors(self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(self), |tag| tag.parent())
    }

    /// Number of edges between this tag and the root.
    #[must_use]
    pub fn depth(self) -> usize {
        self.ancestors().count() - 1
    }

    /// Display name used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Message reported for an exception of this type that was thrown without one.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            Self::Exception => "Exception of type 'Exception' was thrown.",
            Self::SystemException => "System error.",
            Self::ArgumentException => "Value does not fall within the expected range.",
            Self::ArgumentNullException => "Value cannot be null.",
            Self::ArgumentOutOfRangeException => "Specified argument was out of the range of valid values.",
            Self::IOException => "I/O error occurred.",
            Self::FileNotFoundException => "Unable to find the specified file.",
            Self::ArithmeticException => "Overflow or underflow in the arithmetic operation.",
            Self::OverflowException => "Arithmetic operation resulted in an overflow.",
            Self::DivideByZeroException => "Attempted to divide by zero.",
            Self::IndexOutOfRangeException => "Index was outside the bounds of the array.",
            Self::NullReferenceException => "Object reference not set to an instance of an object.",
            Self::AccessViolationException => "Attempted to read or write protected memory.",
            Self::InvalidOperationException => "Operation is not valid due to the current state of the object.",
            Self::OutOfMemoryException => "Insufficient memory to continue the execution of the program.",
            Self::FormatException => "One of the identified items was in an invalid format.",
            Self::NotImplementedException => "The method or operation is not implemented.",
            Self::NotSupportedException => "Specified method is not supported.",
        }
    }
}

/// Source location of a throw site.
///
/// `Copy` and allocation-free so the out-of-memory path can stamp it onto a reserved
/// exception without touching the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CodeLoc {
    pub file: &'static str,
    pub line: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the caller, resolved through `#[track_caller]`.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Heap payload of an exception.
///
/// The message and inner exception are separate heap entries owned through this value:
/// both are acquired when the value is built and handed back to the heap for release by
/// the destructor (see `HeapData::collect_refs`). Only the location of a reserved
/// out-of-memory buffer is ever rewritten after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExceptionValue {
    exc_type: ExcType,
    message: Option<HeapId>,
    loc: CodeLoc,
    inner: Option<HeapId>,
}

impl ExceptionValue {
    /// Builds the payload from handles the caller has already acquired on its behalf.
    pub fn new(exc_type: ExcType, message: Option<HeapId>, loc: CodeLoc, inner: Option<HeapId>) -> Self {
        Self {
            exc_type,
            message,
            loc,
            inner,
        }
    }

    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    pub fn message_id(&self) -> Option<HeapId> {
        self.message
    }

    pub fn loc(&self) -> CodeLoc {
        self.loc
    }

    pub fn inner(&self) -> Option<HeapId> {
        self.inner
    }

    /// Restamps the throw site of a reserved buffer that is being reused.
    pub fn set_loc(&mut self, loc: CodeLoc) {
        self.loc = loc;
    }

    /// Pushes the handles owned by this value, in release order.
    pub fn collect_refs(&self, refs: &mut Vec<HeapId>) {
        refs.extend(self.message);
        refs.extend(self.inner);
    }
}

/// Borrowed, read-only view of a live exception on the heap.
///
/// Obtained from [`Heap::exception`](crate::Heap::exception) or
/// [`Engine::exception`](crate::Engine::exception); the message handle is already
/// resolved to text so the view needs no further heap access.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionView<'h> {
    value: &'h ExceptionValue,
    message: Option<&'h str>,
}

impl<'h> ExceptionView<'h> {
    pub(crate) fn new(value: &'h ExceptionValue, message: Option<&'h str>) -> Self {
        Self { value, message }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.value.exc_type()
    }

    /// The explicit message, or the tag's default message when none was given.
    #[must_use]
    pub fn message(&self) -> &'h str {
        self.message.unwrap_or_else(|| self.value.exc_type().default_message())
    }

    /// The message exactly as supplied at the throw site.
    #[must_use]
    pub fn explicit_message(&self) -> Option<&'h str> {
        self.message
    }

    #[must_use]
    pub fn file(&self) -> &'static str {
        self.value.loc().file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.value.loc().line
    }

    #[must_use]
    pub fn loc(&self) -> CodeLoc {
        self.value.loc()
    }

    /// Handle of the chained cause. The view does not acquire it.
    #[must_use]
    pub fn inner(&self) -> Option<HeapId> {
        self.value.inner()
    }
}
