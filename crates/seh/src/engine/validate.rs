//! Precondition checks that report violations as exceptions through the engine.
//!
//! Every helper is `#[track_caller]`, so the thrown exception carries the location of
//! the public operation doing the validating.

use std::{fmt::Display, ops::RangeInclusive};

use super::{Engine, SehResult};
use crate::{
    exception_private::ExcType, heap::HeapId, io::DiagnosticWriter, resource::ResourceTracker,
    tracer::ExceptionTracer,
};

impl<T: ResourceTracker, W: DiagnosticWriter, Tr: ExceptionTracer> Engine<T, W, Tr> {
    /// Unwraps a required argument, throwing `ArgumentNullException` when it is absent.
    #[track_caller]
    pub fn require<V>(&mut self, value: Option<V>, param: &str) -> SehResult<V> {
        match value {
            Some(value) => Ok(value),
            None => {
                let message = format!("Value cannot be null. (Parameter '{param}')");
                self.throw(ExcType::ArgumentNullException, Some(&message))
            }
        }
    }

    /// Checks `value` lies in `range`, throwing `ArgumentOutOfRangeException` otherwise.
    #[track_caller]
    pub fn require_in_range<N: PartialOrd + Display>(
        &mut self,
        value: N,
        range: RangeInclusive<N>,
        param: &str,
    ) -> SehResult<N> {
        if range.contains(&value) {
            return Ok(value);
        }
        let message = format!(
            "{param} must be between {} and {}, got {value}. (Parameter '{param}')",
            range.start(),
            range.end()
        );
        self.throw(ExcType::ArgumentOutOfRangeException, Some(&message))
    }

    /// Checks `index < len`, throwing `IndexOutOfRangeException` otherwise.
    #[track_caller]
    pub fn require_index(&mut self, index: usize, len: usize) -> SehResult<usize> {
        if index < len {
            Ok(index)
        } else {
            let message = format!("Index {index} was outside the bounds of the array (length {len}).");
            self.throw(ExcType::IndexOutOfRangeException, Some(&message))
        }
    }

    /// Throws `InvalidOperationException` with `message` unless `condition` holds.
    #[track_caller]
    pub fn require_state(&mut self, condition: bool, message: &str) -> SehResult<()> {
        if condition {
            Ok(())
        } else {
            self.throw(ExcType::InvalidOperationException, Some(message))
        }
    }

    /// Checks that `id` names a live exception, throwing `ArgumentException` otherwise.
    #[track_caller]
    pub fn require_exception(&mut self, id: HeapId, param: &str) -> SehResult<HeapId> {
        if self.heap.exception(id).is_some() {
            Ok(id)
        } else {
            let message = format!("Value is not an exception. (Parameter '{param}')");
            self.throw(ExcType::ArgumentException, Some(&message))
        }
    }

    /// Integer division that throws `DivideByZeroException` for a zero divisor and
    /// `OverflowException` for `i64::MIN / -1`.
    #[track_caller]
    pub fn checked_div(&mut self, dividend: i64, divisor: i64) -> SehResult<i64> {
        if divisor == 0 {
            return self.throw(ExcType::DivideByZeroException, None);
        }
        match dividend.checked_div(divisor) {
            Some(quotient) => Ok(quotient),
            None => self.throw(ExcType::OverflowException, None),
        }
    }
}
