//! Integer fingerprint of a caller-supplied version tag.
//!
//! The fingerprint is the sum of the Unicode scalar values of the input,
//! optionally salted with a process-wide "global" tag. It is an equality
//! check for schema versions, not a hash: `"ab"` and `"ba"` collide.

/// Separator placed between the global salt and the caller's tag.
const SALT_SEPARATOR: char = '-';

/// Compute the checksum of `input`, salted by `global` when it is non-empty.
///
/// Returns 0 when both the input and the salt are empty, which the tiers
/// read as "no checksum requested".
pub fn checksum(input: &str, global: Option<&str>) -> i64 {
    match global.filter(|salt| !salt.is_empty()) {
        None if input.is_empty() => 0,
        None => code_point_sum(input),
        Some(salt) => code_point_sum(salt)
            .wrapping_add(SALT_SEPARATOR as i64)
            .wrapping_add(code_point_sum(input)),
    }
}

fn code_point_sum(s: &str) -> i64 {
    s.chars().fold(0i64, |acc, c| acc.wrapping_add(c as i64))
}
