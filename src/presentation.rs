//! Plain-text rendering of workflow and history state for the terminal.

use std::fmt::Write;

use crate::analyzer::{DetectionProgress, Step};
use crate::api_connection::endpoints::FoodOption;
use crate::meal_aggregator::{kcal_percent, macro_breakdown, MacroSlice, NutrientKey, Nutrition};
use crate::meal_history::{DailyBoard, DailySummary};
use crate::models::{Meal, MealItem, MealSlot};
use crate::profile::Profile;

pub fn step_header(step: Step, progress: Option<DetectionProgress>) -> String {
    let title = match step {
        Step::Upload => "Upload a photo".to_string(),
        Step::Select => match progress {
            Some(p) => format!("Choose the food ({} of {})", p.index + 1, p.total),
            None => "Choose the food".to_string(),
        },
        Step::Review => "Review the meal".to_string(),
    };
    format!("[Step {}/3] {}", step.number(), title)
}

pub fn food_options(options: &[FoodOption], selected: Option<&FoodOption>) -> String {
    let mut out = String::new();
    for (idx, option) in options.iter().enumerate() {
        let marker = if selected.map(|s| s.id) == Some(option.id) {
            '*'
        } else {
            ' '
        };
        let _ = write!(out, "{} {:>2}. {}", marker, idx + 1, option.representative_name);
        if let Some(kcal) = option.energy_kcal {
            let _ = write!(out, " ({:.0} kcal/100 g)", kcal);
        }
        out.push('\n');
    }
    out
}

pub fn items_table(items: &[MealItem]) -> String {
    if items.is_empty() {
        return "No foods added yet.\n".to_string();
    }
    let mut out = String::new();
    for (idx, item) in items.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {:<28} {:>6.0} g {:>7.1} kcal",
            idx + 1,
            item.food.representative_name,
            item.weight_g,
            item.nutrition.amount(NutrientKey::EnergyKcal)
        );
    }
    out
}

fn macro_line(slices: &[MacroSlice]) -> String {
    slices
        .iter()
        .map(|slice| format!("{} {:.1}", slice.nutrient.label(), slice.grams))
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn totals(totals: &Nutrition, recommended_kcal: f64) -> String {
    format!(
        "Total: {:.1} kcal ({}% of {:.0} kcal)\n{}\n",
        totals.amount(NutrientKey::EnergyKcal),
        kcal_percent(totals, recommended_kcal),
        recommended_kcal,
        macro_line(&macro_breakdown(totals))
    )
}

pub fn meal_line(meal: &Meal) -> String {
    let when = meal
        .created_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let title = match meal.slot() {
        Some(slot) => slot.label().to_string(),
        None if meal.title.is_empty() => "Meal".to_string(),
        None => meal.title.clone(),
    };
    format!(
        "{}  {:<10} {:>2} item(s) {:>7.1} kcal",
        when,
        title,
        meal.items.len(),
        meal.total_kcal()
    )
}

pub fn daily_board(board: &DailyBoard, summary: &DailySummary) -> String {
    let mut out = format!("{}\n", board.date);
    for slot in MealSlot::ALL {
        match board.meal(slot) {
            Some(meal) => {
                let foods: Vec<&str> = meal
                    .items
                    .iter()
                    .map(|item| item.food.representative_name.as_str())
                    .collect();
                let _ = writeln!(
                    out,
                    "  {:<10} {:>7.1} kcal  {}",
                    slot.label(),
                    meal.total_kcal(),
                    foods.join(", ")
                );
            }
            None => {
                let _ = writeln!(out, "  {:<10} (empty)", slot.label());
            }
        }
    }
    for meal in board.unslotted() {
        let _ = writeln!(out, "  {}", meal_line(meal));
    }
    let _ = writeln!(
        out,
        "Day total: {:.1} kcal ({}%)",
        summary.total_kcal, summary.kcal_percent
    );
    if !summary.macros.is_empty() {
        let _ = writeln!(out, "{}", macro_line(&summary.macros));
    }
    out
}

pub fn profile(profile: &Profile) -> String {
    let mut out = String::new();
    if let Some(user) = &profile.user {
        let _ = writeln!(out, "User: {}", user.username);
    }
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    let _ = writeln!(out, "Gender: {}", or_dash(profile.gender.map(|g| g.code().to_string())));
    let _ = writeln!(out, "Height: {}", or_dash(profile.height_cm.map(|h| format!("{} cm", h))));
    let _ = writeln!(out, "Weight: {}", or_dash(profile.weight_kg.map(|w| format!("{} kg", w))));
    let _ = writeln!(out, "Birth date: {}", or_dash(profile.birth_date.map(|d| d.to_string())));
    let _ = writeln!(out, "Activity: {}", or_dash(profile.activity_level.map(|a| a.to_string())));
    let _ = writeln!(
        out,
        "Vegetarian: {}  Vegan: {}",
        profile.is_vegetarian, profile.is_vegan
    );
    let allergies: Vec<String> = profile
        .allergies
        .iter()
        .map(|a| format!("{} (#{})", a.name, a.id))
        .collect();
    let allergies = if allergies.is_empty() {
        "-".to_string()
    } else {
        allergies.join(", ")
    };
    let _ = writeln!(out, "Allergies: {}", allergies);
    let _ = writeln!(
        out,
        "Recommended: {}",
        or_dash(profile.recommended_kcal.map(|k| format!("{:.0} kcal/day", k)))
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FoodRef, ItemId};

    #[test]
    fn test_step_header_shows_progress() {
        let header = step_header(Step::Select, Some(DetectionProgress { index: 1, total: 3 }));
        assert_eq!(header, "[Step 2/3] Choose the food (2 of 3)");
        assert_eq!(step_header(Step::Review, None), "[Step 3/3] Review the meal");
    }

    #[test]
    fn test_food_options_marks_selection() {
        let options = vec![
            FoodOption {
                id: 1,
                representative_name: "Rice".to_string(),
                food_class: "rice".to_string(),
                energy_kcal: Some(150.0),
                carbohydrate_g: None,
                protein_g: None,
                fat_g: None,
            },
            FoodOption {
                id: 2,
                representative_name: "Mixed grain rice".to_string(),
                food_class: "rice".to_string(),
                energy_kcal: None,
                carbohydrate_g: None,
                protein_g: None,
                fat_g: None,
            },
        ];
        let text = food_options(&options, options.get(1));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "   1. Rice (150 kcal/100 g)");
        assert_eq!(lines[1], "*  2. Mixed grain rice");
    }

    #[test]
    fn test_totals_include_percent_and_macros() {
        let nutrition = Nutrition::new()
            .with(NutrientKey::EnergyKcal, 500.0)
            .with(NutrientKey::Protein, 20.0);
        let text = totals(&nutrition, 2000.0);
        assert!(text.starts_with("Total: 500.0 kcal (25% of 2000 kcal)"));
        assert!(text.contains("Protein (g) 20.0"));
    }

    #[test]
    fn test_items_table() {
        assert_eq!(items_table(&[]), "No foods added yet.\n");
        let item = MealItem {
            id: ItemId::Local(1),
            food: FoodRef {
                id: 1,
                representative_name: "Rice".to_string(),
                food_class: "rice".to_string(),
            },
            weight_g: 150.0,
            nutrition: Nutrition::new().with(NutrientKey::EnergyKcal, 225.0),
        };
        let text = items_table(&[item]);
        assert!(text.starts_with(" 1. Rice"));
        assert!(text.contains("225.0 kcal"));
    }
}
