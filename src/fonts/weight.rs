//! Font weight inference from file names.
//!
//! `Roboto-BoldItalic` → 700. The name is lowercased and searched for every
//! keyword in [`FONT_WEIGHTS`]. Several keywords can match one name (`bold`
//! and `semibold` both occur in `Inter-SemiBold`), so the longest match wins;
//! equal lengths fall back to table order. A name with no keyword gets the
//! configured default.

/// Lowercase style keyword → CSS weight, in table order.
pub const FONT_WEIGHTS: [(&str, u16); 16] = [
    ("thin", 100),
    ("thinitalic", 100),
    ("light", 300),
    ("lightitalic", 300),
    ("regular", 400),
    ("regularitalic", 400),
    ("medium", 500),
    ("mediumitalic", 500),
    ("semibold", 600),
    ("semibolditalic", 600),
    ("bold", 700),
    ("bolditalic", 700),
    ("extrabold", 800),
    ("extrabolditalic", 800),
    ("black", 900),
    ("blackitalic", 900),
];

/// The keyword that decides the weight of `name`, if any.
pub fn matching_keyword(name: &str) -> Option<(&'static str, u16)> {
    let lower = name.to_lowercase();
    let mut best: Option<(&'static str, u16)> = None;
    for &(keyword, weight) in FONT_WEIGHTS.iter() {
        if lower.contains(keyword) && best.is_none_or(|(b, _)| keyword.len() > b.len()) {
            best = Some((keyword, weight));
        }
    }
    best
}

/// CSS weight for a font base name.
pub fn infer_weight(name: &str, default_weight: u16) -> u16 {
    matching_keyword(name).map_or(default_weight, |(_, weight)| weight)
}
