//! `GIMERA_*` environment toggles.
//!
//! Centralized here rather than scattered `std::env::var` calls at each use
//! site, matching the pattern used for bare feature flags elsewhere in the
//! codebase. Every toggle is a plain presence/truthy check: unset, empty, or
//! `"0"`/`"false"` all count as off.

use std::env;

fn is_truthy(val: &str) -> bool {
    !matches!(val, "" | "0" | "false")
}

fn flag(name: &str) -> bool {
    match env::var(name) {
        Ok(val) => is_truthy(&val),
        Err(_) => false,
    }
}

/// Suppress all interactive prompts; fail instead of asking.
pub fn non_interactive() -> bool {
    flag("GIMERA_NON_INTERACTIVE")
}

/// Disable the bounded thread pool in the fetcher; fetch entries serially.
pub fn non_threaded() -> bool {
    flag("GIMERA_NON_THREADED")
}

/// Continue past fetch failures instead of aborting the whole run.
pub fn ignore_fetch_errors() -> bool {
    flag("GIMERA_IGNORE_FETCH_ERRORS")
}

/// Proceed past confirmations that would otherwise block on dirty state.
pub fn force() -> bool {
    flag("GIMERA_FORCE")
}

pub fn verbose() -> bool {
    flag("GIMERA_VERBOSE")
}

pub fn quiet() -> bool {
    flag("GIMERA_QUIET")
}

/// Skip writing resolved commit SHAs back into the manifest after apply.
pub fn no_sha_update() -> bool {
    flag("GIMERA_NO_SHA_UPDATE")
}

/// Skip invoking pre-commit even if it is installed in the host repo.
pub fn no_precommit() -> bool {
    flag("GIMERA_NO_PRECOMMIT")
}

/// Skip the patch-apply step entirely (diagnostic / repair use).
pub fn do_not_apply_patches() -> bool {
    flag("GIMERA_DO_NOT_APPLY_PATCHES")
}

/// Propagate errors as panics/unwinds for debugging instead of mapping to a
/// process exit code. Behavior under concurrent fetch workers is undefined;
/// only intended for single-threaded diagnostic runs.
pub fn exception_than_sysexit() -> bool {
    flag("GIMERA_EXCEPTION_THAN_SYSEXIT")
}

fn non_empty(val: Option<String>) -> Option<String> {
    val.filter(|s| !s.is_empty())
}

/// Fixed token to use for the next snapshot instead of generating one.
pub fn token_override() -> Option<String> {
    non_empty(env::var("GIMERA_TOKEN").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_treats_unset_empty_zero_false_as_off() {
        for off in ["", "0", "false"] {
            assert!(!is_truthy(off), "{off:?} should be falsy");
        }
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
    }

    #[test]
    fn token_override_empty_is_none() {
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(Some("abc".to_string())), Some("abc".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
