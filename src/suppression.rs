//! Recognizes the store client's spurious self-consistency assertions.
//!
//! The client library occasionally reports `INTERNAL ASSERTION FAILED` with
//! one of a handful of internal identifiers while a listener is torn down or
//! re-targeted. These carry no information for callers, so every error path
//! that leaves a subscription, and the process panic hook, asks this filter
//! first. Everything else passes through untouched.

use std::error::Error as StdError;
use std::panic;

use tracing::debug;

const ASSERTION_MARKER: &str = "INTERNAL ASSERTION FAILED";

/// Internal identifiers known to be emitted spuriously.
const KNOWN_ASSERTION_IDS: &[&str] = &["ID: ca9", "ID: b815", "ID: 9d8"];

pub fn should_suppress_message(message: &str) -> bool {
    message.contains(ASSERTION_MARKER) && KNOWN_ASSERTION_IDS.iter().any(|id| message.contains(id))
}

/// Checks the error and every error in its source chain.
pub fn should_suppress(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if should_suppress_message(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Wraps the current panic hook so suppressed assertion panics are logged at
/// debug level instead of printed. All other panics reach the previous hook.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned());
        match payload {
            Some(message) if should_suppress_message(&message) => {
                debug!(%message, "suppressed internal store assertion panic");
            }
            _ => previous(info),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, StoreErrorCode};

    #[test]
    fn suppresses_known_internal_assertions() {
        let err = StoreError::new(
            StoreErrorCode::Internal,
            "FIRESTORE (10.7.0) INTERNAL ASSERTION FAILED: Unexpected state (ID: ca9) CONTEXT: {}",
        );
        assert!(should_suppress(&err));
        assert!(should_suppress_message(
            "INTERNAL ASSERTION FAILED: Unexpected state (ID: b815)"
        ));
    }

    #[test]
    fn passes_assertions_with_unknown_ids() {
        assert!(!should_suppress_message(
            "INTERNAL ASSERTION FAILED: Unexpected state (ID: ffff)"
        ));
    }

    #[test]
    fn passes_ordinary_errors() {
        let unavailable = StoreError::new(StoreErrorCode::Unavailable, "connection reset");
        let missing_index = StoreError::new(
            StoreErrorCode::FailedPrecondition,
            "The query requires an index (ID: ca9)",
        );
        assert!(!should_suppress(&unavailable));
        assert!(!should_suppress(&missing_index));
    }

    #[test]
    fn inspects_source_chain() {
        let inner = StoreError::new(
            StoreErrorCode::Internal,
            "INTERNAL ASSERTION FAILED: Unexpected state (ID: 9d8)",
        );
        let outer = crate::Error::Store(inner);
        assert!(should_suppress(&outer));
    }
}
