//! Deterministic content corruption.
//!
//! Derived content depends only on the original text, the quantized level
//! and the configured salt, so the same inputs always render the same way
//! and lowering the level reverts the text proportionally.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use recall_schema::CorruptionTier;

use crate::config::CorruptionConfig;
use crate::hashing::fragment_seed;
use crate::levels;

const FALLBACK_GLYPHS: [char; 2] = ['#', '*'];

/// Render `original` at corruption `level`.
pub fn derive_content(original: &str, level: f64, config: &CorruptionConfig) -> String {
    let level = levels::unit(level);
    let chars: Vec<char> = original.chars().collect();
    if chars.is_empty() || level <= config.substitution_threshold() {
        return original.to_string();
    }

    // Past the threshold only the seed resolution of the level matters.
    let millis = levels::millis(level);
    let level = f64::from(millis) / 1000.0;

    let profile = config.tiers().profile(CorruptionTier::from_level(level));
    let glyphs: Vec<char> = config.glyphs().chars().collect();
    let seed = fragment_seed(chars.len(), millis, config.seed_salt());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut rendered = chars.clone();
    let substitution = levels::unit(profile.substitution() + level * profile.substitution());
    let count = substitution_count(chars.len(), substitution);
    for position in index::sample(&mut rng, chars.len(), count).iter() {
        rendered[position] = substitute_glyph(&mut rng, &glyphs, chars[position]);
    }

    if rng.gen_bool(profile.truncation()) {
        let keep = ((chars.len() as f64) * (1.0 - level / 2.0)).ceil().max(1.0) as usize;
        if keep < rendered.len() {
            rendered.truncate(keep);
            rendered.extend(config.truncation_marker().chars());
        }
    }

    if !config.markers().is_empty() && rng.gen_bool(profile.marker_insertion()) {
        let marker = &config.markers()[rng.gen_range(0..config.markers().len())];
        let at = rng.gen_range(0..=rendered.len());
        rendered.splice(at..at, marker.chars());
    }

    rendered.into_iter().collect()
}

/// Visual intensity written alongside the tier label.
pub fn tier_intensity(level: f64, config: &CorruptionConfig) -> f64 {
    let tier = CorruptionTier::from_level(level);
    levels::unit(config.tiers().profile(tier).intensity().max(levels::unit(level)))
}

fn substitution_count(len: usize, probability: f64) -> usize {
    ((len as f64) * probability).ceil().max(1.0).min(len as f64) as usize
}

fn substitute_glyph(rng: &mut ChaCha8Rng, glyphs: &[char], original: char) -> char {
    let candidates: Vec<char> = glyphs.iter().copied().filter(|g| *g != original).collect();
    if candidates.is_empty() {
        return if original == FALLBACK_GLYPHS[0] {
            FALLBACK_GLYPHS[1]
        } else {
            FALLBACK_GLYPHS[0]
        };
    }
    candidates[rng.gen_range(0..candidates.len())]
}
