//! Randomized cross-check of the prefix set against a linear scan

use latex_math_parser::prefix_set::PrefixSet;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const UNITS: &[&str] = &[
    "kg", "km", "kmol", "m", "mm", "mol", "mg", "s", "ms", "\\mu g", "\\mu s", "cd", "ca",
];

fn random_word(rng: &mut impl Rng) -> String {
    let len = rng.gen_range(1..=6);
    (0..len)
        .map(|_| {
            // bias toward the characters the units use
            let alphabet = b"kgmols\\u c";
            alphabet[rng.gen_range(0..alphabet.len())] as char
        })
        .collect()
}

fn linear_has_prefix(members: &[&str], query: &str) -> bool {
    members.iter().any(|m| m.starts_with(query))
}

fn linear_contains(members: &[&str], query: &str) -> bool {
    members.iter().any(|m| *m == query)
}

#[test]
fn matches_linear_scan_on_random_queries() {
    let set = PrefixSet::from_iter(UNITS.iter().copied());
    let mut rng = StdRng::from_seed([7; 32]);
    for _ in 0..2000 {
        let query = random_word(&mut rng);
        assert_eq!(
            set.has_prefix(&query),
            linear_has_prefix(UNITS, &query),
            "has_prefix({query:?})"
        );
        assert_eq!(
            set.contains(&query),
            linear_contains(UNITS, &query),
            "contains({query:?})"
        );
    }
}

#[test]
fn every_member_prefix_is_viable() {
    let set = PrefixSet::from_iter(UNITS.iter().copied());
    for member in UNITS {
        for end in 1..=member.len() {
            if member.is_char_boundary(end) {
                assert!(set.has_prefix(&member[..end]), "{member:?}[..{end}]");
            }
        }
        assert!(set.contains(member));
    }
}
