// Repetition groups
// Runs of consecutive anchors whose IOI stays nearly constant

use std::collections::BTreeMap;

use crate::stats;

/// Median IOI used when the sequence has no positive spacing
const FALLBACK_MEDIAN_IOI: f64 = 0.5;

/// Assign a group index to every onset in `times`
///
/// Onset `i` (i >= 1) stays in the current group when its IOI differs from the
/// previous IOI by at most `rel_tol * median_ioi`, otherwise it opens a new
/// group. Onset 0 has no IOI of its own and is group 0; onset 1 has no previous
/// IOI and therefore always opens group 1.
///
/// Onset 0 is then folded into onset 1's group when the sequence opens with a
/// repetition (`|ioi1 - ioi2| <= tol`, needs a third onset) or when there are
/// exactly two onsets.
pub fn repetition_groups(times: &[f64], rel_tol: f64) -> Vec<usize> {
    let n = times.len();
    if n < 2 {
        return vec![0; n];
    }

    // iois[k] is the interval ending at onset k + 1
    let iois = stats::diffs(times);
    let mut median_ioi = stats::median_or(&iois, FALLBACK_MEDIAN_IOI);
    if median_ioi <= 0.0 {
        median_ioi = FALLBACK_MEDIAN_IOI;
    }
    let tol = rel_tol * median_ioi;

    let mut groups = vec![0usize; n];
    let mut group = 0;
    for i in 1..n {
        let continues = i >= 2 && (iois[i - 1] - iois[i - 2]).abs() <= tol;
        if !continues {
            group += 1;
        }
        groups[i] = group;
    }

    let opens_with_repetition = n >= 3 && (iois[0] - iois[1]).abs() <= tol;
    if opens_with_repetition || n == 2 {
        groups[0] = groups[1];
    }

    groups
}

/// Member indices of every group, in onset order
pub fn group_members(groups: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &group) in groups.iter().enumerate() {
        members.entry(group).or_default().push(i);
    }
    members
}
