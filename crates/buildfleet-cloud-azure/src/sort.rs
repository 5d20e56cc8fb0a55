//! Alphanumeric ordering for hardware profile names
//!
//! Plain lexical order puts `Standard_D11` before `Standard_D2`; embedded
//! digit runs compare as numbers instead.

use std::cmp::Ordering;

/// Compares two strings segment by segment, treating each maximal digit run
/// as one number. Leading zeros do not affect the numeric value; a longer
/// digit run (after zero-stripping) is the larger number.
pub fn alphanumeric_cmp(left: &str, right: &str) -> Ordering {
    let left = left.as_bytes();
    let right = right.as_bytes();
    let mut i = 0;
    let mut j = 0;

    while i < left.len() && j < right.len() {
        if left[i].is_ascii_digit() && right[j].is_ascii_digit() {
            let (left_run, next_i) = digit_run(left, i);
            let (right_run, next_j) = digit_run(right, j);
            match compare_digit_runs(left_run, right_run) {
                Ordering::Equal => {
                    i = next_i;
                    j = next_j;
                }
                unequal => return unequal,
            }
        } else {
            match left[i].cmp(&right[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                unequal => return unequal,
            }
        }
    }

    (left.len() - i).cmp(&(right.len() - j))
}

fn digit_run(bytes: &[u8], start: usize) -> (&[u8], usize) {
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    (&bytes[start..end], end)
}

fn compare_digit_runs(left: &[u8], right: &[u8]) -> Ordering {
    let left = strip_leading_zeros(left);
    let right = strip_leading_zeros(right);
    left.len().cmp(&right.len()).then_with(|| left.cmp(right))
}

fn strip_leading_zeros(run: &[u8]) -> &[u8] {
    let nonzero = run.iter().position(|byte| *byte != b'0');
    match nonzero {
        Some(index) => &run[index..],
        None => &run[run.len().saturating_sub(1)..],
    }
}
