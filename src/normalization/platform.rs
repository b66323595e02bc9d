use strsim::jaro_winkler;

/// Minimum similarity score (Jaro-Winkler) required for two platform names
/// to be treated as equivalent.
pub const MIN_PLATFORM_SIMILARITY: f64 = 0.80;

/// Canonicalized platform key used for fuzzy comparison of catalog platforms against
/// platform words found in candidate titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformKey {
    normalized: String,
    numeric_sig: Option<String>,
}

impl PlatformKey {
    /// Build a normalized comparison key from a raw platform label.
    ///
    /// Normalization steps:
    /// - trim whitespace
    /// - lowercase and remove punctuation/whitespace
    /// - remove PAL/NTSC/JPY style region prefixes
    /// - expand PSx abbreviations to "playstationx"
    /// - record the numeric signature so PS4 ≠ PS5
    pub fn new(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        let without_prefix = strip_region_prefixes(&lowered);
        let alnum_only: String = without_prefix
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        let normalized = expand_common_abbreviations(&alnum_only);
        let digits: String = normalized.chars().filter(|c| c.is_ascii_digit()).collect();
        Self {
            normalized,
            numeric_sig: (!digits.is_empty()).then_some(digits),
        }
    }

    pub fn numeric_signature(&self) -> Option<&str> {
        self.numeric_sig.as_deref()
    }

    /// Whether the numeric signatures are compatible (both empty or equal).
    pub fn numeric_compatible(&self, other: &Self) -> bool {
        match (&self.numeric_sig, &other.numeric_sig) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn similarity(&self, other: &Self) -> f64 {
        jaro_winkler(&self.normalized, &other.normalized)
    }

    /// Same platform: compatible generation and close enough spelling.
    pub fn matches(&self, other: &Self) -> bool {
        self.numeric_compatible(other) && self.similarity(other) >= MIN_PLATFORM_SIMILARITY
    }

    /// Whether a platform word seen in candidate text refers to this platform or its
    /// family ("playstation" is admitted for "PlayStation 4", "xbox" is not).
    pub fn admits(&self, term: &Self) -> bool {
        if term.normalized.is_empty() {
            return true;
        }
        if self.normalized.starts_with(&term.normalized) && term.numeric_sig.is_none() {
            return true;
        }
        self.matches(term)
    }

    /// Whether normalized candidate text (see `normalization::text::normalize_text`)
    /// names this platform, ignoring spacing ("wii u" and "wiiu" both count).
    pub fn mentioned_in(&self, normalized_text: &str) -> bool {
        if self.normalized.len() < 3 {
            return false;
        }
        let compact: String = normalized_text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        compact.contains(&self.normalized)
    }
}

fn strip_region_prefixes(input: &str) -> &str {
    const PREFIXES: [&str; 3] = ["pal", "ntsc", "jpy"];
    for prefix in PREFIXES {
        for sep in ["-", "_", " "] {
            let candidate = format!("{prefix}{sep}");
            if input.starts_with(&candidate) {
                return input[candidate.len()..].trim();
            }
        }
    }
    input
}

fn expand_common_abbreviations(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("ps") {
        if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return format!("playstation{rest}");
        }
    }
    input.to_string()
}
