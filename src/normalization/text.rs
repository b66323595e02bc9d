//! Title text normalization shared by the scorer, query builders and slug generation.

use std::collections::HashSet;

/// Tokens shorter than this never count as a name match ("of", "2", "ds").
pub const MIN_SIGNIFICANT_LEN: usize = 3;

/// Replace common Latin diacritics with their ASCII base letter. Input is expected lowercase.
pub fn fold_accents(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' => out.push('a'),
            'ç' | 'č' | 'ć' => out.push('c'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' => out.push('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' => out.push('i'),
            'ñ' | 'ń' => out.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => out.push('o'),
            'ù' | 'ú' | 'û' | 'ü' | 'ū' => out.push('u'),
            'ý' | 'ÿ' => out.push('y'),
            'š' | 'ś' => out.push('s'),
            'ž' | 'ź' | 'ż' => out.push('z'),
            'ß' => out.push_str("ss"),
            'æ' => out.push_str("ae"),
            'œ' => out.push_str("oe"),
            _ => out.push(c),
        }
    }
    out
}

/// Lowercase, accent-folded, punctuation-free form with camel-case words split apart:
/// `"SuperMarioOdyssey_Box-Art.JPG"` becomes `"super mario odyssey box art jpg"`.
pub fn normalize_text(input: &str) -> String {
    let mut spaced = String::with_capacity(input.len() + 8);
    let mut prev: Option<char> = None;
    for c in input.chars() {
        if let Some(p) = prev {
            if p.is_lowercase() && c.is_uppercase() {
                spaced.push(' ');
            }
        }
        spaced.push(c);
        prev = Some(c);
    }

    let folded = fold_accents(&spaced.to_lowercase());
    let mut out = String::with_capacity(folded.len());
    let mut last_space = true;
    for c in folded.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

pub fn tokens(input: &str) -> Vec<String> {
    normalize_text(input)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn token_set(input: &str) -> HashSet<String> {
    tokens(input).into_iter().collect()
}

/// Name tokens that count towards overlap: long enough and not a stop word. Order is kept
/// and duplicates are dropped.
pub fn significant_tokens(name: &str, stop_words: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tokens(name)
        .into_iter()
        .filter(|t| t.chars().count() >= MIN_SIGNIFICANT_LEN)
        .filter(|t| !stop_words.iter().any(|s| s.eq_ignore_ascii_case(t)))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Vendor-style URL slug: `"Pokémon: Let's Go, Pikachu!"` becomes `"pokemon-lets-go-pikachu"`.
pub fn slugify(name: &str) -> String {
    let lowered = fold_accents(&name.to_lowercase());
    let mut out = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            '\'' | '’' | '`' => {}
            '&' => out.push_str(" and "),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c if c.is_whitespace() || c == '-' || c == '_' || c == '/' => out.push('-'),
            _ => {}
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    for part in out.split(|c: char| c == '-' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        if !collapsed.is_empty() {
            collapsed.push('-');
        }
        collapsed.push_str(part);
    }
    collapsed
}

/// Title as used in thumbnail file names, where reserved filesystem characters become `_`.
pub fn thumbnail_title(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '&' | '*' | '/' | ':' | '`' | '<' | '>' | '?' | '\\' | '|' | '"' => '_',
            other => other,
        })
        .collect()
}
