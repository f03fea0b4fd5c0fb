use crate::search::{
    extract_color_from_query, extract_size_from_query, match_color, match_size, normalize_text,
};
use crate::types::{Product, ProductVariant, VariantType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const FILTER_MATCH_SCORE: f64 = 50.0;
const NAME_MATCH_SCORE: f64 = 30.0;
const IN_STOCK_SCORE: f64 = 20.0;
const HAS_IMAGES_SCORE: f64 = 10.0;

const FILTER_BONUS: f64 = 30.0;
const BREADTH_BONUS: f64 = 10.0;
const BREADTH_THRESHOLD: usize = 3;

/// Hard filters applied before scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantFilters {
    pub color: Option<String>,
    pub size: Option<String>,
    #[serde(rename = "type")]
    pub variant_type: Option<VariantType>,
}

impl VariantFilters {
    /// Whether a color or size filter is set
    pub fn has_attribute_filter(&self) -> bool {
        self.color.is_some() || self.size.is_some()
    }
}

/// Why a variant scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    ColorMatch,
    SizeMatch,
    NameMatch,
    InStock,
    HasImages,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::ColorMatch => "color_match",
            MatchReason::SizeMatch => "size_match",
            MatchReason::NameMatch => "name_match",
            MatchReason::InStock => "in_stock",
            MatchReason::HasImages => "has_images",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub variant: ProductVariant,
    pub match_score: f64,
    pub match_reasons: Vec<MatchReason>,
}

/// A product ranked by its best-matching variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredProduct {
    pub product: Product,
    /// Sorted by descending match score
    pub matched_variants: Vec<MatchResult>,
    pub variant_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

/// Display summary of one variant type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantTypeSummary {
    pub count: usize,
    /// Distinct variant names, in first-seen order
    pub options: Vec<String>,
    /// Number of variants with stock
    pub in_stock: usize,
    pub price_range: PriceRange,
}

fn by_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Score every variant that survives the hard filters
///
/// A variant is kept only if it recorded at least one match reason.
/// Results are sorted by descending score; ties keep input order.
pub fn find_matching_variants(
    variants: &[ProductVariant],
    normalized_query: &str,
    filters: &VariantFilters,
) -> Vec<MatchResult> {
    let mut results = Vec::new();

    for variant in variants {
        if let Some(wanted) = filters.variant_type {
            if variant.variant_type != wanted {
                continue;
            }
        }

        let mut score = 0.0;
        let mut reasons = Vec::new();

        if let Some(color) = &filters.color {
            if variant.variant_type == VariantType::Color {
                if !match_color(&variant.name, color) {
                    continue;
                }
                score += FILTER_MATCH_SCORE;
                reasons.push(MatchReason::ColorMatch);
            }
        }

        if let Some(size) = &filters.size {
            if variant.variant_type == VariantType::Size {
                if !match_size(&variant.name, size) {
                    continue;
                }
                score += FILTER_MATCH_SCORE;
                reasons.push(MatchReason::SizeMatch);
            }
        }

        let name = normalize_text(&variant.name);
        if !name.is_empty()
            && !normalized_query.is_empty()
            && (normalized_query.contains(&name) || name.contains(normalized_query))
        {
            score += NAME_MATCH_SCORE;
            reasons.push(MatchReason::NameMatch);
        }

        if variant.stock > 0 {
            score += IN_STOCK_SCORE;
            reasons.push(MatchReason::InStock);
        }

        if !variant.images.is_empty() {
            score += HAS_IMAGES_SCORE;
            reasons.push(MatchReason::HasImages);
        }

        if reasons.is_empty() {
            continue;
        }

        results.push(MatchResult {
            variant: variant.clone(),
            match_score: score,
            match_reasons: reasons,
        });
    }

    results.sort_by(|a, b| by_score_desc(a.match_score, b.match_score));
    results
}

/// Aggregate variant matches into a product score
///
/// `0.4 * mean + 0.6 * max`, plus 30 when a color or size filter was given
/// and 10 when more than three variants matched. Empty input scores 0.
pub fn calculate_variant_score(matched: &[MatchResult], filters: &VariantFilters) -> f64 {
    if matched.is_empty() {
        return 0.0;
    }

    let total: f64 = matched.iter().map(|m| m.match_score).sum();
    let mean = total / matched.len() as f64;
    let max = matched
        .iter()
        .map(|m| m.match_score)
        .fold(f64::MIN, f64::max);

    let mut score = 0.4 * mean + 0.6 * max;
    if filters.has_attribute_filter() {
        score += FILTER_BONUS;
    }
    if matched.len() > BREADTH_THRESHOLD {
        score += BREADTH_BONUS;
    }
    score
}

/// Rank products by how well their variants match the query and filters
pub fn search_variants(products: &[Product], query: &str, filters: &VariantFilters) -> Vec<ScoredProduct> {
    let normalized_query = normalize_text(query);

    let mut scored: Vec<ScoredProduct> = products
        .iter()
        .filter(|product| !product.variants.is_empty())
        .filter_map(|product| {
            let matched = find_matching_variants(&product.variants, &normalized_query, filters);
            if matched.is_empty() {
                return None;
            }

            let variant_score = calculate_variant_score(&matched, filters);
            Some(ScoredProduct {
                product: product.clone(),
                matched_variants: matched,
                variant_score,
            })
        })
        .collect();

    scored.sort_by(|a, b| by_score_desc(a.variant_score, b.variant_score));
    scored
}

/// Color and size filters extracted from free text
pub fn extract_filters_from_query(query: &str) -> VariantFilters {
    VariantFilters {
        color: extract_color_from_query(query),
        size: extract_size_from_query(query),
        variant_type: None,
    }
}

/// Group a product's variants by type; `None` when it has no variants
pub fn get_variant_summary(product: &Product) -> Option<BTreeMap<VariantType, VariantTypeSummary>> {
    if product.variants.is_empty() {
        return None;
    }

    let mut summary: BTreeMap<VariantType, VariantTypeSummary> = BTreeMap::new();
    for variant in &product.variants {
        let entry = summary
            .entry(variant.variant_type)
            .or_insert_with(|| VariantTypeSummary {
                count: 0,
                options: Vec::new(),
                in_stock: 0,
                price_range: PriceRange {
                    min: variant.price,
                    max: variant.price,
                },
            });

        entry.count += 1;
        if !entry.options.contains(&variant.name) {
            entry.options.push(variant.name.clone());
        }
        if variant.stock > 0 {
            entry.in_stock += 1;
        }
        entry.price_range.min = entry.price_range.min.min(variant.price);
        entry.price_range.max = entry.price_range.max.max(variant.price);
    }

    Some(summary)
}
