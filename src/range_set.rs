//! Codec for the kernel's compact integer range-list notation.
//!
//! Sysfs files such as `/sys/devices/system/cpu/online` describe sparse
//! sets of non-negative integers as `"0,2-5,7"`. Parsing tolerates and
//! silently drops malformed tokens; formatting always produces the minimal
//! number of tokens by merging contiguous runs.

use std::collections::BTreeSet;

/// Parses a comma-separated list of integers and inclusive `start-end`
/// ranges. Tokens that fail to parse, or ranges with `end < start`, are
/// skipped rather than reported.
pub fn parse_range_list(text: &str) -> BTreeSet<u32> {
    let mut set = BTreeSet::new();

    for token in text.trim().split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.split_once('-') {
            None => {
                if let Ok(nr) = token.parse::<u32>() {
                    set.insert(nr);
                }
            }
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) =
                    (start.trim().parse::<u32>(), end.trim().parse::<u32>())
                {
                    if start <= end {
                        set.extend(start..=end);
                    }
                }
            }
        }
    }

    set
}

/// Formats a set in ascending order, greedily merging consecutive runs into
/// `start-end` tokens. Singletons are rendered bare, the empty set as `""`.
pub fn format_range_list(set: &BTreeSet<u32>) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut iter = set.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while end.checked_add(1).is_some_and(|next| iter.peek() == Some(&next)) {
            end = iter.next().unwrap_or(end);
        }
        if start == end {
            tokens.push(start.to_string());
        } else {
            tokens.push(format!("{start}-{end}"));
        }
    }

    tokens.join(",")
}
