// ==============================================================================
// recipes.rs - Recipe Suggestions
// ==============================================================================
// Description: Loads a recipe catalog and selects the recipes that use at
//              least one of a job's preferred ingredients
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Catalog format: CSV with a header row. Required column `recipe_id`;
// `ingredient_phrases` holds a JSON array of free-text ingredient lines.
// Other known columns (title, url, nutrition, timings, diet flags) are
// carried through unchanged.
// ==============================================================================

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RecipeConfig;
use crate::models::RecommendationSet;

pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Preparation words ignored when comparing ingredient names
const PREPARATION_WORDS: &[&str] = &[
    "fresh", "dried", "chopped", "sliced", "minced", "ground", "frozen", "raw", "cooked",
];

#[derive(Error, Debug)]
pub enum RecipeCatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub recipe_id: String,
    pub recipe_title: String,
    pub url: Option<String>,
    pub img_url: Option<String>,
    pub region: Option<String>,
    pub servings: Option<String>,
    pub energy_kcal: Option<String>,
    pub protein_g: Option<String>,
    pub carbohydrate_g: Option<String>,
    pub fat_g: Option<String>,
    pub cook_time_min: Option<String>,
    pub prep_time_min: Option<String>,
    pub total_time_min: Option<String>,
    pub vegan: Option<String>,
    pub pescetarian: Option<String>,
    pub ingredient_phrases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipeRow {
    recipe_id: Option<String>,
    recipe_title: Option<String>,
    url: Option<String>,
    img_url: Option<String>,
    region: Option<String>,
    servings: Option<String>,
    #[serde(alias = "calories")]
    energy_kcal: Option<String>,
    protein_g: Option<String>,
    #[serde(alias = "carbohydrate_by_difference_g")]
    carbohydrate_g: Option<String>,
    #[serde(alias = "total_lipid_fat_g")]
    fat_g: Option<String>,
    cook_time_min: Option<String>,
    prep_time_min: Option<String>,
    total_time_min: Option<String>,
    vegan: Option<String>,
    pescetarian: Option<String>,
    ingredient_phrases: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Read-only recipe catalog, loaded once and shared across jobs
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    recipes: Vec<Recipe>,
}

impl RecipeCatalog {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecipeCatalogError> {
        let file = std::fs::File::open(path.as_ref())?;
        let catalog = Self::from_reader(file)?;
        info!("Loaded {} recipes from {:?}", catalog.len(), path.as_ref());
        Ok(catalog)
    }

    /// Parse a catalog; rows without a recipe id are skipped, unreadable
    /// ingredient lists become empty
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RecipeCatalogError> {
        let mut csv_reader = ReaderBuilder::new().flexible(true).from_reader(reader);
        let mut recipes = Vec::new();

        for (idx, result) in csv_reader.deserialize::<RecipeRow>().enumerate() {
            // Header is row 1
            let row_num = idx + 2;
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping unreadable recipe row {}: {}", row_num, e);
                    continue;
                }
            };

            let Some(recipe_id) = non_empty(row.recipe_id) else {
                warn!("Recipe row {} has no recipe_id, skipping", row_num);
                continue;
            };

            let ingredient_phrases = match non_empty(row.ingredient_phrases) {
                Some(raw) => serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|e| {
                    warn!("Recipe row {} has invalid ingredient_phrases: {}", row_num, e);
                    Vec::new()
                }),
                None => Vec::new(),
            };

            recipes.push(Recipe {
                recipe_id,
                recipe_title: non_empty(row.recipe_title)
                    .unwrap_or_else(|| "Untitled Recipe".to_string()),
                url: non_empty(row.url),
                img_url: non_empty(row.img_url),
                region: non_empty(row.region),
                servings: non_empty(row.servings),
                energy_kcal: non_empty(row.energy_kcal),
                protein_g: non_empty(row.protein_g),
                carbohydrate_g: non_empty(row.carbohydrate_g),
                fat_g: non_empty(row.fat_g),
                cook_time_min: non_empty(row.cook_time_min),
                prep_time_min: non_empty(row.prep_time_min),
                total_time_min: non_empty(row.total_time_min),
                vegan: non_empty(row.vegan),
                pescetarian: non_empty(row.pescetarian),
                ingredient_phrases,
            });
        }

        Ok(Self { recipes })
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

/// Normalise a food term for recipe matching
///
/// Lowercases, drops preparation words and strips a plural `s` from names
/// longer than three characters.
pub fn normalize_food_term(term: &str) -> String {
    let lowered = term.trim().to_lowercase();
    let mut normalized = lowered
        .split_whitespace()
        .filter(|word| !PREPARATION_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ");

    if normalized.len() > 3 && normalized.ends_with('s') {
        normalized.pop();
    }
    normalized
}

/// Whether one recipe ingredient line refers to a normalised preferred ingredient
///
/// Matches when either name contains the other, or when any word of the
/// preferred ingredient longer than two characters is a word of the line.
pub fn ingredient_matches(recipe_ingredient: &str, preferred: &str) -> bool {
    let line = normalize_food_term(recipe_ingredient);
    if line.is_empty() || preferred.is_empty() {
        return false;
    }
    if line.contains(preferred) || preferred.contains(line.as_str()) {
        return true;
    }

    let line_words: Vec<&str> = line.split_whitespace().collect();
    preferred
        .split_whitespace()
        .filter(|word| word.len() > 2)
        .any(|word| line_words.contains(&word))
}

/// One suggested recipe and the preferred ingredients it uses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeMatch {
    pub recipe: Recipe,
    pub matched_ingredients: Vec<String>,
}

/// Recipes suggested for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeSelection {
    /// Normalised preferred ingredients used for matching
    pub preferred_ingredients: Vec<String>,
    pub total_recipes: usize,
    pub matched_recipes: usize,
    /// Too few recipes matched, so the whole catalog is listed
    pub showing_all: bool,
    pub recipes: Vec<RecipeMatch>,
}

/// One page of a selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipePage<'a> {
    pub recipes: &'a [RecipeMatch],
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl RecipeSelection {
    /// Page `page` (1-based, clamped to the valid range) of `per_page` recipes
    pub fn page(&self, page: usize, per_page: usize) -> RecipePage<'_> {
        let per_page = per_page.max(1);
        let total = self.recipes.len();
        let total_pages = total.div_ceil(per_page);
        let page = page.clamp(1, total_pages.max(1));

        let start = ((page - 1) * per_page).min(total);
        let end = (start + per_page).min(total);

        RecipePage {
            recipes: &self.recipes[start..end],
            total,
            page,
            per_page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

pub struct RecipeMatcher<'a> {
    config: &'a RecipeConfig,
}

impl<'a> RecipeMatcher<'a> {
    pub fn new(config: &'a RecipeConfig) -> Self {
        Self { config }
    }

    /// Select catalog recipes using the `prefer` side of `recommendations`
    pub fn select(&self, catalog: &RecipeCatalog, recommendations: &RecommendationSet) -> RecipeSelection {
        let preferred: BTreeSet<String> = recommendations
            .prefer
            .iter()
            .map(|rec| normalize_food_term(&rec.ingredient_name))
            .filter(|name| !name.is_empty())
            .collect();

        let mut selection = RecipeSelection {
            preferred_ingredients: preferred.iter().cloned().collect(),
            total_recipes: catalog.len(),
            ..RecipeSelection::default()
        };

        if preferred.is_empty() || catalog.is_empty() {
            info!(
                "No recipe suggestions: {} preferred ingredients, {} recipes",
                preferred.len(),
                catalog.len()
            );
            return selection;
        }

        let scored: Vec<RecipeMatch> = catalog
            .recipes()
            .iter()
            .map(|recipe| RecipeMatch {
                recipe: recipe.clone(),
                matched_ingredients: preferred
                    .iter()
                    .filter(|pref| {
                        recipe
                            .ingredient_phrases
                            .iter()
                            .any(|line| ingredient_matches(line, pref))
                    })
                    .cloned()
                    .collect(),
            })
            .collect();

        selection.matched_recipes = scored
            .iter()
            .filter(|m| !m.matched_ingredients.is_empty())
            .count();

        let minimum = catalog.len() as f64 * self.config.min_match_share;
        if (selection.matched_recipes as f64) < minimum {
            debug!(
                "Only {}/{} recipes matched, listing the whole catalog",
                selection.matched_recipes,
                catalog.len()
            );
            selection.showing_all = true;
            selection.recipes = scored;
        } else {
            selection.recipes = scored
                .into_iter()
                .filter(|m| !m.matched_ingredients.is_empty())
                .collect();
        }

        info!(
            "Recipe suggestions: {} of {} recipes match {} preferred ingredients",
            selection.matched_recipes,
            selection.total_recipes,
            preferred.len()
        );
        selection
    }
}
