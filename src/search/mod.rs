/// Variant match and scoring module
///
/// This module resolves free-text product queries against variant attributes:
/// - Arabic-aware text normalization
/// - Bilingual color and size synonym matching
/// - Variant scoring and product ranking
///
/// Everything here is pure: no shared state and no I/O.

mod normalize;
mod synonyms;
mod variant_matcher;


pub use normalize::{normalize_opt, normalize_text};
pub use synonyms::{extract_color_from_query, extract_size_from_query, match_color, match_size};
pub use variant_matcher::{
    calculate_variant_score, extract_filters_from_query, find_matching_variants, get_variant_summary,
    search_variants, MatchReason, MatchResult, PriceRange, ScoredProduct, VariantFilters,
    VariantTypeSummary,
};
