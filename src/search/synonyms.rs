use crate::search::normalize_text;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Bilingual color equivalence classes
const COLOR_GROUPS: &[&[&str]] = &[
    &["white", "ابيض", "بيضاء", "بيضا", "اوف وايت"],
    &["black", "اسود", "سوداء", "سودا"],
    &["red", "احمر", "حمراء", "حمرا"],
    &["blue", "ازرق", "زرقاء", "زرقا"],
    &["navy", "كحلي", "نيفي"],
    &["green", "اخضر", "خضراء", "خضرا"],
    &["yellow", "اصفر", "صفراء", "صفرا"],
    &["pink", "وردي", "زهري", "بينك"],
    &["purple", "بنفسجي", "موف"],
    &["orange", "برتقالي", "اورنج"],
    &["brown", "بني", "بنيه", "كافيه"],
    &["gray", "grey", "رمادي", "سكني"],
    &["beige", "بيج"],
    &["gold", "ذهبي", "دهبي"],
    &["silver", "فضي"],
];

/// Size equivalence classes, longer buckets first so extraction prefers them
const SIZE_GROUPS: &[&[&str]] = &[
    &["xxxl", "3xl", "اكس اكس اكس لارج"],
    &["xxl", "2xl", "اكس اكس لارج", "دبل اكس لارج"],
    &["xl", "extra large", "اكس لارج", "كبير جدا", "كبيره جدا"],
    &["xs", "extra small", "اكس سمول", "صغير جدا", "صغيره جدا"],
    &["s", "small", "سمول", "صغير", "صغيره"],
    &["m", "medium", "ميديم", "وسط", "متوسط", "متوسطه"],
    &["l", "large", "لارج", "كبير", "كبيره"],
    &["36", "٣٦", "سته وثلاثين", "ست وثلاثين"],
    &["37", "٣٧", "سبعه وثلاثين", "سبع وثلاثين"],
    &["38", "٣٨", "ثمانيه وثلاثين", "ثمان وثلاثين"],
    &["39", "٣٩", "تسعه وثلاثين", "تسع وثلاثين"],
    &["40", "٤٠", "اربعين"],
    &["41", "٤١", "واحد واربعين"],
    &["42", "٤٢", "اثنين واربعين", "اتنين واربعين"],
    &["43", "٤٣", "ثلاثه واربعين", "تلاته واربعين"],
    &["44", "٤٤", "اربعه واربعين"],
    &["45", "٤٥", "خمسه واربعين"],
];

/// Normalized vocabulary with an index from term to equivalence class
struct SynonymTable {
    /// Terms in table order
    terms: Vec<String>,
    group_of: HashMap<String, usize>,
}

impl SynonymTable {
    fn build(groups: &[&[&str]]) -> Self {
        let mut terms = Vec::new();
        let mut group_of = HashMap::new();

        for (group, members) in groups.iter().enumerate() {
            for member in members.iter() {
                let term = normalize_text(member);
                if group_of.insert(term.clone(), group).is_none() {
                    terms.push(term);
                }
            }
        }

        Self { terms, group_of }
    }

    fn same_group(&self, a: &str, b: &str) -> bool {
        match (self.group_of.get(a), self.group_of.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

static COLORS: Lazy<SynonymTable> = Lazy::new(|| SynonymTable::build(COLOR_GROUPS));
static SIZES: Lazy<SynonymTable> = Lazy::new(|| SynonymTable::build(SIZE_GROUPS));
static DECIMAL_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("decimal pattern is valid"));

/// True if the normalized names are equal or share a color class
pub fn match_color(candidate: &str, filter: &str) -> bool {
    let candidate = normalize_text(candidate);
    let filter = normalize_text(filter);
    if candidate.is_empty() || filter.is_empty() {
        return false;
    }

    candidate == filter || COLORS.same_group(&candidate, &filter)
}

/// True if the normalized sizes are equal, share a size class, or one contains the other
pub fn match_size(candidate: &str, filter: &str) -> bool {
    let candidate = normalize_text(candidate);
    let filter = normalize_text(filter);
    if candidate.is_empty() || filter.is_empty() {
        return false;
    }

    candidate == filter
        || SIZES.same_group(&candidate, &filter)
        || candidate.contains(&filter)
        || filter.contains(&candidate)
}

/// First color term contained in the query
pub fn extract_color_from_query(query: &str) -> Option<String> {
    let query = normalize_text(query);
    if query.is_empty() {
        return None;
    }

    COLORS.terms.iter().find(|term| query.contains(term.as_str())).cloned()
}

/// First size term contained in the query, else the first decimal run
///
/// Terms may carry attached articles or suffixes ("الكبيرة", "XLs"). Single
/// letters and numbers must stand alone so "s" in "shoes" is not a size.
pub fn extract_size_from_query(query: &str) -> Option<String> {
    let query = normalize_text(query);
    if query.is_empty() {
        return None;
    }

    SIZES
        .terms
        .iter()
        .find(|term| contains_size_term(&query, term))
        .cloned()
        .or_else(|| DECIMAL_RUN.find(&query).map(|m| m.as_str().to_string()))
}

fn contains_size_term(query: &str, term: &str) -> bool {
    let mut chars = term.chars();
    let single_char = chars.next().is_some() && chars.next().is_none();
    if single_char || term.chars().all(char::is_numeric) {
        contains_token(query, term)
    } else {
        query.contains(term)
    }
}

/// Substring match that must start and end on a word boundary
fn contains_token(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, matched)| {
        let end = start + matched.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}
