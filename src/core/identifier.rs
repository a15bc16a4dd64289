use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of synthetic catalog identifiers shaped `AAAA-XXXXXX`.
pub trait IdentifierSource {
    fn next_identifier(&mut self) -> String;

    /// Registers identifiers already in use. Sources that do not check uniqueness ignore this.
    fn reserve(&mut self, _existing: &[String]) {}
}

/// Random identifiers: four uppercase letters, a hyphen, six uppercase letters or digits.
pub struct RandomSku<R: Rng> {
    rng: R,
    unique: bool,
    taken: HashSet<String>,
}

impl RandomSku<StdRng> {
    pub fn new(unique: bool) -> Self {
        Self::with_rng(StdRng::from_entropy(), unique)
    }
}

impl<R: Rng> RandomSku<R> {
    pub fn with_rng(rng: R, unique: bool) -> Self {
        Self {
            rng,
            unique,
            taken: HashSet::new(),
        }
    }

    fn draw(&mut self) -> String {
        let mut sku = String::with_capacity(11);
        for _ in 0..4 {
            sku.push(LETTERS[self.rng.gen_range(0..LETTERS.len())] as char);
        }
        sku.push('-');
        for _ in 0..6 {
            sku.push(ALPHANUMERIC[self.rng.gen_range(0..ALPHANUMERIC.len())] as char);
        }
        sku
    }
}

impl<R: Rng> IdentifierSource for RandomSku<R> {
    fn next_identifier(&mut self) -> String {
        loop {
            let sku = self.draw();
            if !self.unique || self.taken.insert(sku.clone()) {
                return sku;
            }
            tracing::debug!("Generated SKU {} collides with an existing one, drawing again", sku);
        }
    }

    fn reserve(&mut self, existing: &[String]) {
        if self.unique {
            self.taken.extend(existing.iter().cloned());
        }
    }
}

/// Checks the `^[A-Z]{4}-[A-Z0-9]{6}$` shape downstream systems validate.
pub fn is_valid_sku(sku: &str) -> bool {
    let bytes = sku.as_bytes();
    bytes.len() == 11
        && bytes[..4].iter().all(|b| b.is_ascii_uppercase())
        && bytes[4] == b'-'
        && bytes[5..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_generated_skus_match_format() {
        let pattern = Regex::new(r"^[A-Z]{4}-[A-Z0-9]{6}$").unwrap();
        let mut source = RandomSku::with_rng(StdRng::seed_from_u64(7), false);
        for _ in 0..200 {
            let sku = source.next_identifier();
            assert!(pattern.is_match(&sku), "{}", sku);
            assert!(is_valid_sku(&sku));
        }
    }

    #[test]
    fn test_unique_mode_avoids_reserved() {
        let mut preview = RandomSku::with_rng(StdRng::seed_from_u64(42), false);
        let first = preview.next_identifier();

        let mut source = RandomSku::with_rng(StdRng::seed_from_u64(42), true);
        source.reserve(&[first.clone()]);
        let sku = source.next_identifier();
        assert_ne!(sku, first);
        assert!(is_valid_sku(&sku));
    }

    #[test]
    fn test_is_valid_sku() {
        assert!(is_valid_sku("AAAA-111111"));
        assert!(is_valid_sku("ABCD-1A2B3C"));
        assert!(!is_valid_sku("abcd-111111"));
        assert!(!is_valid_sku("AAA1-111111"));
        assert!(!is_valid_sku("AAAA111111"));
        assert!(!is_valid_sku("AAAA-11111a"));
    }
}
