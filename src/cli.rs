use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::analyzer::DEFAULT_WEIGHT_G;
use crate::models::MealSlot;
use crate::profile::{ActivityLevel, Gender, Preference};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Track meals from food photos against a nutrition backend",
    long_about = None
)]
pub struct Cli {
    /// Backend API base URL (overrides FOOD_API_BASE)
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Where cookies and the logged-in user are kept between runs (overrides FOOD_SESSION_FILE)
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in with username and password
    Login {
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create an account and log in
    Register {
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// End the backend session and forget the stored one
    Logout,
    /// Show or update the profile
    Profile {
        #[command(subcommand)]
        action: Option<ProfileCommand>,
    },
    /// Manage the allergen catalogue
    Allergens {
        #[command(subcommand)]
        action: Option<AllergenCommand>,
    },
    /// Manage liked and disliked foods
    Prefs {
        #[command(subcommand)]
        action: Option<PreferenceCommand>,
    },
    /// Look foods up by name
    SearchFood { term: String },
    /// Analyze meal photos, pick foods and weights, then save the meal
    Analyze(AnalyzeArgs),
    /// List saved meals
    Meals {
        /// Write the history as CSV to this file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Daily board: meals by slot with the day's totals
    Today {
        /// Day to show (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Ask for a menu recommendation
    Recommend {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// One or more photos of the meal
    #[arg(required = true, num_args = 1..)]
    pub images: Vec<PathBuf>,

    /// Meal slot to file the meal under (breakfast, lunch, dinner)
    #[arg(long)]
    pub slot: Option<MealSlot>,

    /// Accept the top option of every detection at --weight and save without prompting
    #[arg(long)]
    pub auto: bool,

    /// Weight in grams used with --auto
    #[arg(long, default_value_t = DEFAULT_WEIGHT_G)]
    pub weight: u32,

    /// Analyze and review only, never save
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    Show,
    Update(ProfileArgs),
}

#[derive(Args, Debug, Default)]
pub struct ProfileArgs {
    #[arg(long)]
    pub gender: Option<Gender>,
    #[arg(long)]
    pub height_cm: Option<f64>,
    #[arg(long)]
    pub weight_kg: Option<f64>,
    #[arg(long)]
    pub birth_date: Option<NaiveDate>,
    #[arg(long)]
    pub activity_level: Option<ActivityLevel>,
    #[arg(long)]
    pub vegetarian: Option<bool>,
    #[arg(long)]
    pub vegan: Option<bool>,
    /// Allergen id to add or remove (repeatable)
    #[arg(long = "toggle-allergy")]
    pub toggle_allergy: Vec<i64>,
}

#[derive(Subcommand, Debug)]
pub enum AllergenCommand {
    List,
    Add { name: String },
    Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum PreferenceCommand {
    List,
    Set { food_id: i64, preference: Preference },
    Delete { food_id: i64 },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
