//! PHOC-style word encoding
//!
//! A word is normalized, split recursively into a pyramid of halves, and every
//! segment is turned into a character histogram over a fixed alphabet. The
//! concatenated histograms form a fixed-length descriptor that the approximate
//! neighbor index compares with an angular metric.

/// Alphabet of the histograms. Position in this string is the histogram slot.
pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzñç0123456789";

/// Number of symbols in [`ALPHABET`].
pub const ALPHABET_LEN: usize = 38;

/// Default pyramid depth.
pub const DEFAULT_LEVELS: usize = 3;

/// Symbols removed before encoding.
const STRIPPED_SYMBOLS: &[char] = &[
    ',', ';', '.', ':', '¡', '!', '¿', '?', '@', '#', '$', '%', '&', '[', ']', '(', ')', '{', '}',
    '<', '>', '~', '=', '+', '-', '*', '/', '|', '\\', '_', '^', '`', '"', '\'',
];

/// Fixed-length pyramidal histogram of characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureVector(Vec<u32>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when no character of the word fell inside the alphabet.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&c| c == 0)
    }

    /// Representation consumed by the neighbor indexes.
    pub fn to_f32(&self) -> Vec<f32> {
        self.0.iter().map(|&c| c as f32).collect()
    }
}

/// Length of a feature vector for the given pyramid depth:
/// `ALPHABET_LEN * (2^0 + 2^1 + ... + 2^(levels-1))`.
pub fn feature_len(levels: usize) -> usize {
    ALPHABET_LEN * ((1usize << levels) - 1)
}

/// Strip symbols, lower-case, and fold accented vowels to their base letter.
///
/// Idempotent: normalizing a normalized word returns it unchanged.
pub fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| !STRIPPED_SYMBOLS.contains(c))
        .flat_map(char::to_lowercase)
        .map(fold_accent)
        .collect()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' => 'a',
        'é' => 'e',
        'í' | 'ï' => 'i',
        'ó' => 'o',
        'ú' | 'ü' => 'u',
        other => other,
    }
}

fn alphabet_slot(c: char) -> Option<usize> {
    match c {
        'a'..='z' => Some(c as usize - 'a' as usize),
        'ñ' => Some(26),
        'ç' => Some(27),
        '0'..='9' => Some(28 + (c as usize - '0' as usize)),
        _ => None,
    }
}

/// Split `word` into `levels` levels of segments. Level `i` holds `2^i` segments;
/// the left half of every split takes the extra character on odd lengths.
pub fn pyramid(word: &[char], levels: usize) -> Vec<Vec<&[char]>> {
    let mut out: Vec<Vec<&[char]>> = Vec::with_capacity(levels);
    if levels == 0 {
        return out;
    }
    out.push(vec![word]);
    for level in 1..levels {
        let next = out[level - 1]
            .iter()
            .flat_map(|&segment| {
                let (left, right) = segment.split_at(segment.len().div_ceil(2));
                [left, right]
            })
            .collect();
        out.push(next);
    }
    out
}

/// Encode a word into its feature vector. Total over any input: words with no
/// alphabet characters yield an all-zero vector of the usual length.
pub fn encode(word: &str, levels: usize) -> FeatureVector {
    let normalized: Vec<char> = normalize(word).chars().collect();
    let mut features = vec![0u32; feature_len(levels)];

    let mut offset = 0;
    for segments in pyramid(&normalized, levels) {
        for segment in segments {
            for &c in segment {
                if let Some(slot) = alphabet_slot(c) {
                    features[offset + slot] += 1;
                }
            }
            offset += ALPHABET_LEN;
        }
    }

    debug_assert_eq!(offset, features.len());
    FeatureVector(features)
}
