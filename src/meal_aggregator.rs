use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::MealItem;

/// The nutrients the client knows how to present. Amounts for any other key
/// the backend sends are still carried and summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NutrientKey {
    EnergyKcal,
    Carbohydrate,
    Protein,
    Fat,
    Sugars,
}

impl NutrientKey {
    pub const ALL: [NutrientKey; 5] = [
        NutrientKey::EnergyKcal,
        NutrientKey::Carbohydrate,
        NutrientKey::Protein,
        NutrientKey::Fat,
        NutrientKey::Sugars,
    ];

    pub const MACROS: [NutrientKey; 3] = [
        NutrientKey::Carbohydrate,
        NutrientKey::Protein,
        NutrientKey::Fat,
    ];

    pub fn as_key(self) -> &'static str {
        match self {
            NutrientKey::EnergyKcal => "energy_kcal",
            NutrientKey::Carbohydrate => "carbohydrate_g",
            NutrientKey::Protein => "protein_g",
            NutrientKey::Fat => "fat_g",
            NutrientKey::Sugars => "sugars_g",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NutrientKey::EnergyKcal => "Energy (kcal)",
            NutrientKey::Carbohydrate => "Carbohydrate (g)",
            NutrientKey::Protein => "Protein (g)",
            NutrientKey::Fat => "Fat (g)",
            NutrientKey::Sugars => "Sugars (g)",
        }
    }

    /// Label used by older backends as the nutrition map key.
    pub fn legacy_label(self) -> &'static str {
        match self {
            NutrientKey::EnergyKcal => "에너지(kcal)",
            NutrientKey::Carbohydrate => "탄수화물(g)",
            NutrientKey::Protein => "단백질(g)",
            NutrientKey::Fat => "지방(g)",
            NutrientKey::Sugars => "당류(g)",
        }
    }

    /// Accepts both stable keys and legacy labels.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        NutrientKey::ALL
            .into_iter()
            .find(|nutrient| nutrient.as_key() == key || nutrient.legacy_label() == key)
    }
}

/// Normalizes a wire key to the stable identifier when it is one we know.
fn normalize_key(key: &str) -> String {
    match NutrientKey::from_key(key) {
        Some(nutrient) => nutrient.as_key().to_string(),
        None => key.trim().to_string(),
    }
}

/// Numbers and numeric strings count; null, NaN and anything else do not.
fn lenient_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    amount.is_finite().then_some(amount)
}

/// Nutrient amounts keyed by stable identifier (`energy_kcal`, `protein_g`, ...).
/// A missing key reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Nutrition(BTreeMap<String, f64>);

impl Nutrition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> f64 {
        self.0.get(&normalize_key(key)).copied().unwrap_or(0.0)
    }

    pub fn amount(&self, nutrient: NutrientKey) -> f64 {
        self.0.get(nutrient.as_key()).copied().unwrap_or(0.0)
    }

    pub fn insert(&mut self, key: &str, amount: f64) {
        if amount.is_finite() {
            self.0.insert(normalize_key(key), amount);
        }
    }

    pub fn with(mut self, nutrient: NutrientKey, amount: f64) -> Self {
        self.insert(nutrient.as_key(), amount);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(key, amount)| (key.as_str(), *amount))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn add_assign(&mut self, other: &Nutrition) {
        for (key, amount) in &other.0 {
            *self.0.entry(key.clone()).or_insert(0.0) += amount;
        }
    }
}

impl<'de> Deserialize<'de> for Nutrition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
        let mut nutrition = Nutrition::new();
        for (key, value) in raw.unwrap_or_default() {
            if let Some(amount) = lenient_amount(&value) {
                nutrition.insert(&key, amount);
            }
        }
        Ok(nutrition)
    }
}

/// Field-wise sum over every nutrient key present in any of the inputs.
pub fn sum_nutrition<'a>(parts: impl IntoIterator<Item = &'a Nutrition>) -> Nutrition {
    let mut total = Nutrition::new();
    for part in parts {
        total.add_assign(part);
    }
    total
}

pub fn meal_totals(items: &[MealItem]) -> Nutrition {
    sum_nutrition(items.iter().map(|item| &item.nutrition))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroSlice {
    pub nutrient: NutrientKey,
    pub grams: f64,
}

/// Carbohydrate, protein and fat grams in chart order.
pub fn macro_breakdown(totals: &Nutrition) -> Vec<MacroSlice> {
    NutrientKey::MACROS
        .into_iter()
        .map(|nutrient| MacroSlice {
            nutrient,
            grams: totals.amount(nutrient),
        })
        .collect()
}

/// Share of the recommended daily energy, rounded to a whole percent.
pub fn kcal_percent(totals: &Nutrition, recommended_kcal: f64) -> u32 {
    if recommended_kcal.is_nan() || recommended_kcal <= 0.0 {
        return 0;
    }
    let percent = (totals.amount(NutrientKey::EnergyKcal) / recommended_kcal * 100.0).round();
    if percent <= 0.0 {
        0
    } else {
        percent as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FoodRef, ItemId};
    use rand::Rng;
    use serde_json::json;

    fn item(id: u64, nutrition: Nutrition) -> MealItem {
        MealItem {
            id: ItemId::Local(id),
            food: FoodRef {
                id: id as i64,
                representative_name: format!("food {}", id),
                food_class: "test".to_string(),
            },
            weight_g: 100.0,
            nutrition,
        }
    }

    #[test]
    fn test_deserialize_skips_null_and_non_numeric() {
        let nutrition: Nutrition = serde_json::from_value(json!({
            "energy_kcal": 350.5,
            "protein_g": null,
            "fat_g": "12.5",
            "sugars_g": "n/a",
            "carbohydrate_g": [1, 2]
        }))
        .unwrap();
        assert_eq!(nutrition.amount(NutrientKey::EnergyKcal), 350.5);
        assert_eq!(nutrition.amount(NutrientKey::Fat), 12.5);
        assert_eq!(nutrition.len(), 2);
        assert_eq!(nutrition.amount(NutrientKey::Protein), 0.0);
    }

    #[test]
    fn test_legacy_labels_are_normalized() {
        let nutrition: Nutrition = serde_json::from_value(json!({
            "에너지(kcal)": 420.0,
            "탄수화물(g)": 60.0,
            "sodium_mg": 800.0
        }))
        .unwrap();
        assert_eq!(nutrition.amount(NutrientKey::EnergyKcal), 420.0);
        assert_eq!(nutrition.amount(NutrientKey::Carbohydrate), 60.0);
        assert_eq!(nutrition.get("sodium_mg"), 800.0);
        assert_eq!(nutrition.get("지방(g)"), 0.0);
    }

    #[test]
    fn test_null_nutrition_is_empty() {
        let nutrition: Nutrition = serde_json::from_value(Value::Null).unwrap();
        assert!(nutrition.is_empty());
    }

    #[test]
    fn test_totals_cover_union_of_keys() {
        let items = vec![
            item(1, Nutrition::new().with(NutrientKey::EnergyKcal, 100.0)),
            item(
                2,
                Nutrition::new()
                    .with(NutrientKey::EnergyKcal, 50.0)
                    .with(NutrientKey::Protein, 7.0),
            ),
        ];
        let totals = meal_totals(&items);
        assert_eq!(totals.amount(NutrientKey::EnergyKcal), 150.0);
        assert_eq!(totals.amount(NutrientKey::Protein), 7.0);
    }

    #[test]
    fn test_totals_match_per_nutrient_sums_for_random_items() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let count = rng.gen_range(1..8);
            let items: Vec<MealItem> = (0..count)
                .map(|i| {
                    let mut nutrition = Nutrition::new();
                    for nutrient in NutrientKey::ALL {
                        if rng.gen_bool(0.7) {
                            nutrition.insert(nutrient.as_key(), rng.gen_range(0.0..500.0));
                        }
                    }
                    item(i, nutrition)
                })
                .collect();

            let totals = meal_totals(&items);
            for nutrient in NutrientKey::ALL {
                let expected: f64 = items.iter().map(|i| i.nutrition.amount(nutrient)).sum();
                assert!((totals.amount(nutrient) - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_removing_an_item_drops_its_nutrients() {
        let mut items = vec![
            item(1, Nutrition::new().with(NutrientKey::Fat, 10.0)),
            item(2, Nutrition::new().with(NutrientKey::Fat, 4.0)),
        ];
        items.retain(|i| i.id != ItemId::Local(1));
        assert_eq!(meal_totals(&items).amount(NutrientKey::Fat), 4.0);
    }

    #[test]
    fn test_macro_breakdown_order_and_values() {
        let totals = Nutrition::new()
            .with(NutrientKey::Carbohydrate, 80.0)
            .with(NutrientKey::Fat, 20.0);
        let slices = macro_breakdown(&totals);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].nutrient, NutrientKey::Carbohydrate);
        assert_eq!(slices[1].grams, 0.0);
        assert_eq!(slices[2].grams, 20.0);
    }

    #[test]
    fn test_kcal_percent() {
        let totals = Nutrition::new().with(NutrientKey::EnergyKcal, 650.0);
        assert_eq!(kcal_percent(&totals, 2000.0), 33);
        assert_eq!(kcal_percent(&totals, 0.0), 0);
        assert_eq!(kcal_percent(&Nutrition::new(), 2000.0), 0);
    }
}
