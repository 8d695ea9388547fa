//! Heuristic matchers and checksum validators.
//!
//! Person names are found by a given-name dictionary followed by capitalised
//! surname tokens, or by an honorific. The validators confirm candidates found
//! by the pattern recognizers (card numbers, IBANs, SSNs, IPv6 addresses).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static GIVEN_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    include_str!("../data/given_names.txt")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
});

static CAPITALISED_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:[-'][A-Z][a-z]+)?\b").expect("word pattern must compile")
});

static HONORIFIC_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Mr|Mrs|Ms|Miss|Dr|Prof)\.?[ ]+([A-Z][a-z]+(?:[ ][A-Z][a-z]+)?)\b")
        .expect("honorific pattern must compile")
});

/// Words that end a name run even when capitalised.
const NAME_STOPWORDS: &[&str] = &[
    "Street", "Road", "Avenue", "Lane", "Boulevard", "Inc", "Ltd", "Limited", "Corp", "The",
    "And", "Of",
];

/// Match result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicMatch {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

pub fn is_given_name(word: &str) -> bool {
    GIVEN_NAMES.contains(word)
}

/// Finds person names: a known given name followed by one or two capitalised
/// words, or any capitalised name after an honorific.
pub fn match_person_name(text: &str) -> Vec<HeuristicMatch> {
    let mut matches = Vec::new();

    let words: Vec<regex::Match> = CAPITALISED_WORD.find_iter(text).collect();
    let mut i = 0;
    while i < words.len() {
        if !is_given_name(words[i].as_str()) {
            i += 1;
            continue;
        }

        let mut last = i;
        while last + 1 < words.len() && last - i < 2 {
            let next = &words[last + 1];
            let gap = &text[words[last].end()..next.start()];
            if gap != " " || NAME_STOPWORDS.contains(&next.as_str()) {
                break;
            }
            last += 1;
        }

        if last > i {
            let start = words[i].start();
            let end = words[last].end();
            matches.push(HeuristicMatch {
                text: text[start..end].to_string(),
                start,
                end,
            });
            i = last + 1;
        } else {
            i += 1;
        }
    }

    for caps in HONORIFIC_NAME.captures_iter(text) {
        if let Some(name) = caps.get(1) {
            matches.push(HeuristicMatch {
                text: name.as_str().to_string(),
                start: name.start(),
                end: name.end(),
            });
        }
    }

    matches.sort_by_key(|m| (m.start, m.end));
    matches.dedup_by(|a, b| a.start == b.start && a.end == b.end);
    matches
}

/// Luhn checksum over the digits of `candidate`, ignoring spaces and dashes.
pub fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();

    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// ISO 13616 mod-97 check.
pub fn iban_valid(candidate: &str) -> bool {
    let compact: String = candidate.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 15 || compact.len() > 34 || !compact.is_ascii() {
        return false;
    }

    let (head, tail) = compact.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        // letters expand to two digits
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    remainder == 1
}

/// Rejects SSNs with an all-zero group or a reserved area number.
pub fn ssn_valid(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split('-').collect();
    if parts.len() != 3 {
        return false;
    }
    let (area, group, serial) = (parts[0], parts[1], parts[2]);
    area != "000"
        && area != "666"
        && !area.starts_with('9')
        && group != "00"
        && serial != "0000"
}

pub fn ipv6_valid(candidate: &str) -> bool {
    candidate.chars().any(|c| c.is_ascii_hexdigit())
        && candidate.parse::<std::net::Ipv6Addr>().is_ok()
}
