use crate::{Error, Result};
use rand::rngs::SmallRng;
use rand::Rng;
use std::collections::HashSet;

/// Characters that can never appear in a class or member name
const RESERVED: &[char] = &['.', ';', '[', '/', '<', '>'];

/// Generator of fresh identifiers
///
/// Names are drawn at random from the character set, `length` characters at a time, and never
/// repeat. Once every combination of the current length has been handed out (or blacklisted),
/// the length grows by one.
#[derive(Debug)]
pub struct Dictionary {
    chars: Vec<char>,
    length: usize,
    expected_size: usize,
    used: HashSet<String>,
    blacklist: HashSet<String>,
    rng: SmallRng,
}

impl Dictionary {
    pub fn new(chars: Vec<char>, base_length: usize, rng: SmallRng) -> Result<Dictionary> {
        if chars.is_empty() {
            return Err(Error::InvalidDictionary(String::from("no characters")));
        }
        if base_length < 1 {
            return Err(Error::InvalidDictionary(format!(
                "base length must be at least 1, got {}",
                base_length
            )));
        }
        let mut seen = HashSet::new();
        for c in &chars {
            if !seen.insert(*c) {
                return Err(Error::InvalidDictionary(format!(
                    "duplicate character {:?}",
                    c
                )));
            }
            if RESERVED.contains(c) {
                return Err(Error::InvalidDictionary(format!(
                    "{:?} cannot appear in names",
                    c
                )));
            }
        }

        let mut dictionary = Dictionary {
            chars,
            length: base_length,
            expected_size: 0,
            used: HashSet::new(),
            blacklist: HashSet::new(),
            rng,
        };
        dictionary.expected_size = dictionary.combinations();
        Ok(dictionary)
    }

    fn combinations(&self) -> usize {
        u32::try_from(self.length)
            .ok()
            .and_then(|length| self.chars.len().checked_pow(length))
            .map_or(i32::MAX as usize, |size| size.min(i32::MAX as usize))
    }

    /// Never generate any of these names
    pub fn add_blacklist<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.blacklist.extend(names.into_iter().map(Into::into));
    }

    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.contains(name)
    }

    /// Current name length
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn next_name(&mut self) -> String {
        loop {
            if self.used.len() >= self.expected_size {
                self.length += 1;
                self.used.clear();
                self.expected_size = self.combinations();
                log::debug!("Dictionary exhausted, growing names to {} characters", self.length);
            }

            let candidate: String = (0..self.length)
                .map(|_| self.chars[self.rng.random_range(0..self.chars.len())])
                .collect();
            if self.used.insert(candidate.clone()) && !self.blacklist.contains(&candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    fn dictionary(chars: &str, base_length: usize) -> Result<Dictionary> {
        Dictionary::new(chars.chars().collect(), base_length, SmallRng::seed_from_u64(7))
    }

    #[test]
    fn grows_when_exhausted() {
        let mut dictionary = dictionary("ab", 1).unwrap();
        let mut names: Vec<String> = (0..6).map(|_| dictionary.next_name()).collect();
        assert_eq!(dictionary.length(), 2);

        let (short, long) = names.split_at_mut(2);
        short.sort();
        long.sort();
        assert_eq!(short, ["a", "b"]);
        assert_eq!(long, ["aa", "ab", "ba", "bb"]);
    }

    #[test]
    fn skips_blacklisted_names() {
        let mut dictionary = dictionary("xyz", 1).unwrap();
        dictionary.add_blacklist(["x", "z"]);
        assert_eq!(dictionary.next_name(), "y");
        assert_eq!(dictionary.next_name().len(), 2);
    }

    #[test]
    fn same_seed_same_names() {
        let mut first = dictionary("abcdefgh", 2).unwrap();
        let mut second = dictionary("abcdefgh", 2).unwrap();
        for _ in 0..20 {
            assert_eq!(first.next_name(), second.next_name());
        }
    }

    #[test]
    fn rejects_bad_character_sets() {
        assert!(matches!(dictionary("", 1), Err(Error::InvalidDictionary(_))));
        assert!(matches!(dictionary("aba", 1), Err(Error::InvalidDictionary(_))));
        assert!(matches!(dictionary("ab", 0), Err(Error::InvalidDictionary(_))));
        assert!(matches!(dictionary("a/", 1), Err(Error::InvalidDictionary(_))));
    }
}
