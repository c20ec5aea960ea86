//! Fills absent optional fields with documented defaults.
//!
//! This runs after parsing and before schema validation. Applying it twice
//! is a no-op the second time (every rule only fills a `None`), which is
//! the idempotence property spec.md §8 asks for.

use crate::spec::ConfigSpec;

/// Applies default-value rules to `spec` in place.
pub fn apply_defaults(spec: &mut ConfigSpec) {
    if spec.global.verify_standard_paths.is_none() {
        spec.global.verify_standard_paths = Some(true);
    }

    // `command.risk_level` is deliberately left unset here: the "low"
    // default is only materialized by the runtime expander, once it knows
    // neither the command nor its template set one (see crate::pipeline).
}
