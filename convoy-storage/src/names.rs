//! Generated agent names.

use rand::seq::IndexedRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "Blue", "Red", "Green", "Golden", "Silver", "Crystal", "Shadow", "Bright", "Swift", "Silent",
    "Bold", "Calm", "Wild", "Noble", "Frost", "Storm", "Dawn", "Dusk", "Iron", "Copper", "Azure",
    "Crimson", "Amber", "Jade", "Coral", "Misty", "Sunny", "Lunar", "Solar", "Cosmic", "Terra",
    "Aqua",
];

const NOUNS: &[&str] = &[
    "Lake", "Stone", "River", "Mountain", "Forest", "Valley", "Meadow", "Peak", "Canyon",
    "Desert", "Ocean", "Island", "Prairie", "Grove", "Creek", "Ridge", "Harbor", "Cliff",
    "Glacier", "Dune", "Marsh", "Brook", "Hill", "Plain", "Bay", "Cape", "Delta", "Fjord", "Mesa",
    "Plateau", "Reef", "Tundra",
];

/// Attempts before falling back to a suffixed name.
const MAX_ATTEMPTS: usize = 100;

fn adjective_noun<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Blue");
    let noun = NOUNS.choose(rng).copied().unwrap_or("Lake");
    format!("{adjective}{noun}")
}

/// Pick an `<Adjective><Noun>` name for which `taken` is false.
///
/// After [`MAX_ATTEMPTS`] collisions the name gets a short random hex
/// suffix, which is unique in practice.
pub fn unique_agent_name(taken: impl Fn(&str) -> bool) -> String {
    let mut rng = rand::rng();
    for _ in 0..MAX_ATTEMPTS {
        let name = adjective_noun(&mut rng);
        if !taken(&name) {
            return name;
        }
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", adjective_noun(&mut rng), &suffix[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_name_shape() {
        let name = unique_agent_name(|_| false);
        assert!(ADJECTIVES.iter().any(|a| name.starts_with(a)));
        assert!(NOUNS.iter().any(|n| name.ends_with(n)));
    }

    #[test]
    fn test_exhausted_space_gets_suffix() {
        let name = unique_agent_name(|_| true);
        let (base, suffix) = name.rsplit_once('_').expect("suffixed name");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(NOUNS.iter().any(|n| base.ends_with(n)));
    }
}
