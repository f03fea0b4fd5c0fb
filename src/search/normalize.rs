/// Arabic tatweel (kashida), a purely typographic stretch
const TATWEEL: char = '\u{0640}';
/// Superscript alif
const SUPERSCRIPT_ALIF: char = '\u{0670}';

fn is_diacritic(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}') || c == SUPERSCRIPT_ALIF || c == TATWEEL
}

fn fold_letter(c: char) -> char {
    match c {
        // hamza-above, hamza-below, madda and wasla alif
        'أ' | 'إ' | 'آ' | 'ٱ' => 'ا',
        'ى' => 'ي',
        'ة' => 'ه',
        other => other,
    }
}

/// Normalize text for lexical comparison
///
/// Lowercases, strips Arabic diacritics and tatweel, folds alif, yaa and
/// taa-marbuta variants, and collapses whitespace runs into single spaces.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .chars()
        .filter(|c| !is_diacritic(*c))
        .map(fold_letter)
        .flat_map(char::to_lowercase)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize_text`] for optional input; absent text normalizes to ""
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alif_forms_fold() {
        assert_eq!(normalize_text("أبيض"), "ابيض");
        assert_eq!(normalize_text("إسورة"), "اسوره");
        assert_eq!(normalize_text("آخر"), "اخر");
    }

    #[test]
    fn test_taa_marbuta_and_alif_maksura() {
        assert_eq!(normalize_text("كبيرة"), "كبيره");
        assert_eq!(normalize_text("مستوى"), "مستوي");
    }

    #[test]
    fn test_diacritics_and_tatweel_are_stripped() {
        assert_eq!(normalize_text("أَبْيَض"), "ابيض");
        assert_eq!(normalize_text("اســود"), "اسود");
    }

    #[test]
    fn test_case_and_whitespace() {
        assert_eq!(normalize_text("  Extra   LARGE\t"), "extra large");
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some("XL")), "xl");
    }
}
