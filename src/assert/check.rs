//! Assertion flavors
//!
//! Each constructor computes the condition and picks the matching default
//! message. The engine itself never looks at what was compared.

use std::any::{type_name, Any};
use std::cell::Cell;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Once;

use super::messages::{MessageSpec, Template};

/// A computed condition plus the message describing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub condition: bool,
    pub message: MessageSpec,
}

impl Check {
    pub fn new(condition: bool, template: Template, args: Vec<String>) -> Self {
        Self {
            condition,
            message: MessageSpec::new(template, args),
        }
    }

    /// Replace the default message with caller text (empty text keeps the
    /// default)
    pub fn because(mut self, text: impl Into<String>) -> Self {
        self.message = self.message.with_explicit(text);
        self
    }

    pub fn passed(&self) -> bool {
        self.condition
    }
}

/// Arbitrary boolean expression; `text` is its source form
pub fn expr(condition: bool, text: &str) -> Check {
    Check::new(condition, Template::ExprFalse, vec![text.to_string()])
}

/// Unconditional failure
pub fn fail() -> Check {
    Check::new(false, Template::Fail, Vec::new())
}

fn compare<T: Debug + ?Sized>(condition: bool, actual: &T, op: &str, expected: &T) -> Check {
    expr(condition, &format!("{:?} {} {:?}", actual, op, expected))
}

pub fn eq<T: PartialEq + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual == expected, actual, "==", expected)
}

pub fn ne<T: PartialEq + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual != expected, actual, "!=", expected)
}

pub fn lt<T: PartialOrd + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual < expected, actual, "<", expected)
}

pub fn le<T: PartialOrd + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual <= expected, actual, "<=", expected)
}

pub fn gt<T: PartialOrd + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual > expected, actual, ">", expected)
}

pub fn ge<T: PartialOrd + Debug + ?Sized>(actual: &T, expected: &T) -> Check {
    compare(actual >= expected, actual, ">=", expected)
}

/// Floating-point equality within `epsilon`
pub fn float_eq(actual: f64, expected: f64, epsilon: f64) -> Check {
    let condition = expected - actual <= epsilon && actual - expected <= epsilon;
    expr(
        condition,
        &format!("|{} - {}| <= {}", actual, expected, epsilon),
    )
}

/// Floating-point inequality beyond `epsilon`
pub fn float_ne(actual: f64, expected: f64, epsilon: f64) -> Check {
    let condition = expected - actual > epsilon || actual - expected > epsilon;
    expr(condition, &format!("|{} - {}| > {}", actual, expected, epsilon))
}

fn compare_str(condition: bool, actual: &str, op: &str, expected: &str) -> Check {
    Check::new(
        condition,
        Template::ExprAsStringsFalse,
        vec![format!("{:?} {} {:?}", actual, op, expected)],
    )
}

pub fn str_eq(actual: &str, expected: &str) -> Check {
    compare_str(actual == expected, actual, "==", expected)
}

pub fn str_ne(actual: &str, expected: &str) -> Check {
    compare_str(actual != expected, actual, "!=", expected)
}

/// String must be empty; `text` names the value
pub fn is_empty(value: &str, text: &str) -> Check {
    Check::new(value.is_empty(), Template::IsNotEmpty, vec![text.to_string()])
}

/// String must not be empty
pub fn not_empty(value: &str, text: &str) -> Check {
    Check::new(!value.is_empty(), Template::IsEmpty, vec![text.to_string()])
}

/// Option must be `None` (the null flavor)
pub fn is_none<T>(value: &Option<T>, text: &str) -> Check {
    Check::new(value.is_none(), Template::IsNotNull, vec![text.to_string()])
}

/// Option must be `Some` (the not-null flavor)
pub fn is_some<T>(value: &Option<T>, text: &str) -> Check {
    Check::new(value.is_some(), Template::IsNull, vec![text.to_string()])
}

/// Element-wise slice equality
pub fn slice_eq<T: PartialEq + Debug>(actual: &[T], expected: &[T]) -> Check {
    compare(actual == expected, actual, "==", expected)
}

pub fn slice_ne<T: PartialEq + Debug>(actual: &[T], expected: &[T]) -> Check {
    compare(actual != expected, actual, "!=", expected)
}

/// File contents must equal `expected`; an unreadable file fails
pub fn file_contents_eq(path: &Path, expected: &str) -> Check {
    let condition = std::fs::read(path)
        .map(|bytes| bytes == expected.as_bytes())
        .unwrap_or(false);
    Check::new(
        condition,
        Template::FileStrMatch,
        vec![path.display().to_string(), expected.to_string()],
    )
}

/// Two files must have identical contents; an unreadable file fails
pub fn files_eq(actual: &Path, reference: &Path) -> Check {
    let condition = match (std::fs::read(actual), std::fs::read(reference)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    Check::new(
        condition,
        Template::FileMatch,
        vec![actual.display().to_string(), reference.display().to_string()],
    )
}

thread_local! {
    /// Set while this thread runs a closure whose panic is expected
    static EXPECTING_PANIC: Cell<bool> = const { Cell::new(false) };
}

static QUIET_HOOK: Once = Once::new();

/// Wrap the current panic hook so expected panics print nothing
///
/// Other threads, and panics outside a panic check, still reach the
/// previous hook.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !EXPECTING_PANIC.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

fn run_catching<F: FnOnce()>(f: F) -> Option<Box<dyn Any + Send>> {
    install_quiet_hook();
    let outer = EXPECTING_PANIC.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    EXPECTING_PANIC.with(|flag| flag.set(outer));
    result.err()
}

/// `f` must panic
pub fn panics<F: FnOnce()>(f: F, text: &str) -> Check {
    let panicked = run_catching(f).is_some();
    Check::new(panicked, Template::ExpectedPanic, vec![text.to_string()])
}

/// `f` must not panic
pub fn does_not_panic<F: FnOnce()>(f: F, text: &str) -> Check {
    let panicked = run_catching(f).is_some();
    Check::new(!panicked, Template::UnexpectedPanic, vec![text.to_string()])
}

/// `f` must panic with a payload of type `P`
pub fn panics_with<P: Any, F: FnOnce()>(f: F, text: &str) -> Check {
    let matched = run_catching(f).is_some_and(|payload| payload.is::<P>());
    Check::new(
        matched,
        Template::ExpectedPanicOfType,
        vec![text.to_string(), type_name::<P>().to_string()],
    )
}

/// `f` must not panic with a payload of type `P` (other panics pass)
pub fn does_not_panic_with<P: Any, F: FnOnce()>(f: F, text: &str) -> Check {
    let matched = run_catching(f).is_some_and(|payload| payload.is::<P>());
    Check::new(
        !matched,
        Template::UnexpectedPanicOfType,
        vec![text.to_string(), type_name::<P>().to_string()],
    )
}
