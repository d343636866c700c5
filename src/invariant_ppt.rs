//! Runtime invariants with contract-test bookkeeping
//!
//! Production code states its invariants with [`assert_invariant!`]; every
//! checked invariant is recorded in a thread-local log so a test can later
//! prove the code path that enforces it actually ran.
//!
//! ```rust,ignore
//! use crabcapture::invariant_ppt::*;
//!
//! assert_invariant!(
//!     crop.left >= 0 && crop.right <= array.width as i32,
//!     "Zoom crop must stay inside the active array",
//!     "geometry::zoom_crop"
//! );
//!
//! #[test]
//! fn contract_zoom() {
//!     // ... exercise set_zoom ...
//!     contract_test("zoom", &["Zoom crop must stay inside the active array"]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Invariant: the zoom crop rectangle lies within the active array.
pub const ZOOM_CROP_CONTAINED: &str = "Zoom crop must stay inside the active array";
/// Invariant: the zoom crop rectangle is centered on the active array.
pub const ZOOM_CROP_CENTERED: &str = "Zoom crop must be centered on the active array";
/// Invariant: a repeating request never carries a start trigger.
pub const REPEATING_TRIGGERS_IDLE: &str = "Repeating request must carry idle triggers";
/// Invariant: streaming implies a bound capture surface.
pub const STREAMING_HAS_SURFACE: &str = "Streaming session requires a bound surface";

/// Assert an invariant and log it for contract testing.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Check that the listed invariants were verified on this thread.
///
/// # Panics
/// Panics naming every invariant that was never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let log = INVARIANT_LOG.with(|log| log.borrow().clone());

    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !log.contains(*invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Clear this thread's invariant log.
pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().clear();
    });
}
