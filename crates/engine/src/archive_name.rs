// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive-name templating and collision-avoidance — grounded on
//! `original_source/job/job.go`'s job-dispatch naming rules and
//! `original_source/backup/borg/archive.go`'s `generateName`.
//!
//! The original generator seeds an RNG it never reads back from, then
//! breaks out of its retry loop on the very first collision instead of
//! looping until a free name is found. This module retries until a name
//! is actually free.

use backup_agent_core::Clock;

/// Expands the job's raw `archive` field into a concrete archive name.
///
/// - empty field → `manual-m-{utcnow}`
/// - literal `"auto"` → `auto-{utcnow}`
/// - anything else → `{name}-m-{utcnow}`
pub fn template_name(raw: &str, clock: &dyn Clock) -> String {
    let token = clock.utcnow_token();
    match raw {
        "" => format!("manual-m-{token}"),
        "auto" => format!("auto-{token}"),
        name => format!("{name}-m-{token}"),
    }
}

/// Lower bound of the collision suffix, matching the original's
/// `rand.Intn(10000-10)+10` range (`[10, 9999]`, i.e. 2-4 digits).
const SUFFIX_MIN: u32 = 10;
const SUFFIX_MAX: u32 = 9999;

/// Returns `base`, or `base` with a numeric suffix appended, such that the
/// result is absent from `existing`. Loops until a free name is found
/// rather than giving up after one collision. The suffix is always 2-4
/// digits (`[10, 9999]`), matching the original's intended range — unlike
/// the original, this never seeds an RNG it doesn't read back from; it
/// just walks the range in order.
pub fn unique_name(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|a| a == base) {
        return base.to_string();
    }
    for suffix in SUFFIX_MIN..=SUFFIX_MAX {
        let candidate = format!("{base}-{suffix}");
        if !existing.iter().any(|a| a == &candidate) {
            return candidate;
        }
    }
    format!("{base}-{SUFFIX_MAX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_agent_core::clock::FakeClock;

    fn clock() -> FakeClock {
        FakeClock::new("2026-07-28T11:45:00Z".parse().unwrap())
    }

    #[test]
    fn empty_field_templates_to_manual_prefix() {
        assert_eq!(template_name("", &clock()), "manual-m-20260728T114500");
    }

    #[test]
    fn auto_field_templates_to_auto_prefix() {
        assert_eq!(template_name("auto", &clock()), "auto-20260728T114500");
    }

    #[test]
    fn named_field_keeps_the_name_with_manual_suffix() {
        assert_eq!(template_name("release-cut", &clock()), "release-cut-m-20260728T114500");
    }

    #[test]
    fn unique_name_is_unchanged_when_free() {
        assert_eq!(unique_name("auto-1", &[]), "auto-1");
    }

    #[test]
    fn unique_name_retries_past_multiple_collisions() {
        let existing = vec!["auto-1".to_string(), "auto-1-10".to_string(), "auto-1-11".to_string()];
        assert_eq!(unique_name("auto-1", &existing), "auto-1-12");
    }

    #[test]
    fn unique_name_suffix_is_two_to_four_digits() {
        let existing = vec!["auto-1".to_string()];
        let name = unique_name("auto-1", &existing);
        let suffix = name.strip_prefix("auto-1-").expect("suffix must be appended");
        assert!(suffix.len() >= 2 && suffix.len() <= 4, "suffix {suffix} must be 2-4 digits");
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
