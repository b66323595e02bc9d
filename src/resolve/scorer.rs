//! Candidate ranking. Pure and deterministic: the same text, name and platform always
//! produce the same score.

use serde::{Deserialize, Serialize};

use crate::config::TitleHint;
use crate::normalization::platform::PlatformKey;
use crate::normalization::text::{normalize_text, significant_tokens, token_set};

/// Score given to anything hit by a hard gate (exclusion list, non-raster file).
pub const REJECT_SCORE: i32 = -1000;
/// Score given when too few name words overlap, regardless of bonuses.
pub const WEAK_MATCH_SCORE: i32 = -500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermMatch {
    /// A candidate token equals the term.
    Token,
    /// A candidate token starts with the term ("box" hits "boxart" but not "xbox").
    TokenPrefix,
    /// The normalized candidate text contains the term anywhere.
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub label: String,
    pub terms: Vec<String>,
    pub weight: i32,
    pub matching: TermMatch,
    /// Apply the weight once per matching term instead of once per rule.
    #[serde(default)]
    pub per_term: bool,
}

impl KeywordRule {
    fn new(label: &str, terms: &[&str], weight: i32, matching: TermMatch) -> Self {
        Self {
            label: label.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
            weight,
            matching,
            per_term: false,
        }
    }

    fn hits(&self, tokens: &std::collections::HashSet<String>, normalized: &str) -> usize {
        self.terms
            .iter()
            .filter(|term| match self.matching {
                TermMatch::Token => tokens.contains(term.as_str()),
                TermMatch::TokenPrefix => tokens.iter().any(|t| t.starts_with(term.as_str())),
                TermMatch::Substring => normalized.contains(term.as_str()),
            })
            .count()
    }

    fn contribution(&self, tokens: &std::collections::HashSet<String>, normalized: &str) -> i32 {
        match self.hits(tokens, normalized) {
            0 => 0,
            n if self.per_term => self.weight * n as i32,
            _ => self.weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    /// Case-insensitive substrings that disqualify a candidate outright.
    pub exclusions: Vec<String>,
    pub raster_extensions: Vec<String>,
    pub stop_words: Vec<String>,
    pub match_weight: i32,
    pub keyword_rules: Vec<KeywordRule>,
    pub platform_bonus: i32,
    /// Platform or vendor words that count against a candidate when they do not name the
    /// product's own platform.
    pub foreign_platform_terms: Vec<String>,
    pub foreign_platform_penalty: i32,
    pub pick_bonus: i32,
    pub avoid_penalty: i32,
    pub clean_pick_bonus: i32,
    pub accept_threshold: i32,
}

impl Default for ScoringRules {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            exclusions: strings(&[
                "star_full", "star_half", "star_empty", "commons-logo", "wikidata", "edit-clear",
                "ambox", "question_book", "text-x", "folder_hexagonal", "padlock", "crystal_clear",
                "red_pencil", "nuvola", "gnome", "disambig", "audio", "speaker", "headphones",
                "flag_of", "location", "wiki", "icon", ".svg", "wpvg", "portal", "open_access",
                "lock-", "symbol_of", "internet_archive", "logo", "olympic_rings", "pencil_icon",
                "increase", "decrease", "steady", "red_pog", "blue_pog", "green_pog",
                "circle_arrows", "information_icon", "merge-", "split-", "generic",
            ]),
            raster_extensions: strings(&["jpg", "jpeg", "png", "gif", "webp"]),
            stop_words: strings(&["the", "and", "for", "with"]),
            match_weight: 3,
            keyword_rules: vec![
                KeywordRule::new(
                    "cover",
                    &["cover", "box", "packaging"],
                    15,
                    TermMatch::TokenPrefix,
                ),
                KeywordRule::new(
                    "screenshot",
                    &["screenshot", "gameplay", "ingame", "screen"],
                    -20,
                    TermMatch::TokenPrefix,
                ),
                KeywordRule::new(
                    "event",
                    &["e3", "gdc", "pax", "booth", "expo", "convention", "conference"],
                    -20,
                    TermMatch::Token,
                ),
            ],
            platform_bonus: 5,
            foreign_platform_terms: strings(&[
                "playstation", "ps1", "ps2", "ps3", "ps4", "ps5", "psp", "xbox", "sega",
                "genesis", "dreamcast", "megadrive",
            ]),
            foreign_platform_penalty: -10,
            pick_bonus: 50,
            avoid_penalty: -30,
            clean_pick_bonus: 80,
            accept_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub score: i32,
    pub matched_words: usize,
    pub rejection: Option<String>,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        self.rejection.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Scorer {
    rules: ScoringRules,
}

impl Scorer {
    pub fn new(rules: ScoringRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    pub fn score(&self, candidate_text: &str, product_name: &str, platform: &str) -> i32 {
        self.evaluate(candidate_text, product_name, platform, None)
            .score
    }

    /// Hard gates only, for candidates whose source already ties them to the product.
    /// Exclusion terms that are part of the product's own name do not count.
    pub fn vet(&self, file_name: &str, product_name: &str) -> Verdict {
        match self.hard_reject(file_name, &product_name.to_lowercase()) {
            Some(reason) => Verdict {
                score: REJECT_SCORE,
                matched_words: 0,
                rejection: Some(reason),
            },
            None => Verdict {
                score: self.rules.accept_threshold,
                matched_words: 0,
                rejection: None,
            },
        }
    }

    pub fn evaluate(
        &self,
        candidate_text: &str,
        product_name: &str,
        platform: &str,
        hint: Option<&TitleHint>,
    ) -> Verdict {
        if let Some(reason) = self.hard_reject(candidate_text, "") {
            return Verdict {
                score: REJECT_SCORE,
                matched_words: 0,
                rejection: Some(reason),
            };
        }

        let normalized = normalize_text(candidate_text);
        let tokens = token_set(candidate_text);
        let wanted = significant_tokens(product_name, &self.rules.stop_words);
        let matched = wanted.iter().filter(|w| tokens.contains(*w)).count();
        let required = if wanted.len() <= 2 { 1 } else { 2 };
        if matched < required {
            return Verdict {
                score: WEAK_MATCH_SCORE,
                matched_words: matched,
                rejection: Some(format!(
                    "{matched} of {} name words matched, {required} required",
                    wanted.len()
                )),
            };
        }

        let mut score = self.rules.match_weight * matched as i32;
        for rule in &self.rules.keyword_rules {
            score += rule.contribution(&tokens, &normalized);
        }

        let own = PlatformKey::new(platform);
        if own.mentioned_in(&normalized) {
            score += self.rules.platform_bonus;
        }
        for term in &self.rules.foreign_platform_terms {
            if tokens.contains(term.as_str()) && !own.admits(&PlatformKey::new(term)) {
                score += self.rules.foreign_platform_penalty;
            }
        }

        if let Some(hint) = hint {
            score += self.hint_adjustment(candidate_text, &normalized, hint);
        }

        let rejection = (score < self.rules.accept_threshold).then(|| {
            format!(
                "score {score} below threshold {}",
                self.rules.accept_threshold
            )
        });
        Verdict {
            score,
            matched_words: matched,
            rejection,
        }
    }

    /// `own_name` is lowercase; exclusion terms it contains are ignored.
    fn hard_reject(&self, candidate_text: &str, own_name: &str) -> Option<String> {
        let lowered = candidate_text.to_lowercase();
        let underscored = lowered.replace(' ', "_");
        let own_underscored = own_name.replace(' ', "_");
        if let Some(term) = self.rules.exclusions.iter().find(|t| {
            let t = t.as_str();
            (lowered.contains(t) || underscored.contains(t))
                && !own_name.contains(t)
                && !own_underscored.contains(t)
        }) {
            return Some(format!("excluded term '{term}'"));
        }

        match file_extension(&lowered) {
            Some(ext) if self.rules.raster_extensions.iter().any(|r| r == &ext) => None,
            Some(ext) => Some(format!("non-raster extension '.{ext}'")),
            None => Some("no file extension".to_string()),
        }
    }

    fn hint_adjustment(&self, raw: &str, normalized: &str, hint: &TitleHint) -> i32 {
        let lowered = raw.to_lowercase();
        let hit = |term: &String| {
            let t = term.to_lowercase();
            lowered.contains(&t) || {
                let n = normalize_text(term);
                !n.is_empty() && normalized.contains(&n)
            }
        };
        let picks = hint.pick.iter().filter(|t| hit(t)).count() as i32;
        let avoids = hint.avoid.iter().filter(|t| hit(t)).count() as i32;
        let mut adjustment = picks * self.rules.pick_bonus + avoids * self.rules.avoid_penalty;
        if picks > 0 && avoids == 0 {
            adjustment += self.rules.clean_pick_bonus;
        }
        adjustment
    }
}

/// Extension of the last path segment, ignoring any query string or fragment.
fn file_extension(text: &str) -> Option<String> {
    let path = text.split(['?', '#']).next().unwrap_or(text);
    let last = path.rsplit('/').next().unwrap_or(path).trim();
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.trim();
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then(|| ext.to_string())
}
