use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use meal_tracker::analyzer::{AnalyzerWorkflow, ImageUpload, Step, WorkflowError};
use meal_tracker::api_connection::connection::FoodApi;
use meal_tracker::cli::{
    parse_args, AllergenCommand, AnalyzeArgs, Command, PreferenceCommand, ProfileArgs,
    ProfileCommand,
};
use meal_tracker::config::{ClientConfig, LogFormat};
use meal_tracker::meal_history::{export_csv, fetch_meals, DailyBoard};
use meal_tracker::models::ItemId;
use meal_tracker::presentation;
use meal_tracker::profile::{
    add_allergen, delete_allergen, delete_food_preference, fetch_profile, list_allergens,
    list_food_preferences, search_foods, set_food_preference, update_profile, ProfileUpdate,
};
use meal_tracker::recommender::recommend_menu;
use meal_tracker::session::{clear_session, load_session, save_session, AppContext};

fn init_logging(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meal_tracker=warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Reads one trimmed line; end of input reads as "q".
fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok("q".to_string());
    }
    Ok(line.trim().to_string())
}

async fn load_image(path: &Path) -> Result<ImageUpload> {
    ImageUpload::from_path(path)
        .await
        .with_context(|| format!("Failed to read image '{}'", path.display()))
}

/// Workflow errors are shown and the session carries on.
fn report(result: Result<(), WorkflowError>) {
    if let Err(e) = result {
        println!("! {}", e);
    }
}

async fn run_analyze(args: AnalyzeArgs, api: &FoodApi, ctx: &AppContext) -> Result<()> {
    let mut wizard = match args.slot {
        Some(slot) => AnalyzerWorkflow::for_slot(api.clone(), slot),
        None => AnalyzerWorkflow::new(api.clone()),
    };

    if args.auto {
        for path in &args.images {
            let image = load_image(path).await?;
            let detected = wizard.submit_image(image).await?;
            println!("{}: {} food(s) detected", path.display(), detected);
            while wizard.step() == Step::Select {
                wizard.confirm_with_weight(args.weight).await?;
            }
            wizard.start_new_image();
        }
        println!("{}", presentation::items_table(wizard.items()));
        print!("{}", presentation::totals(&wizard.totals(), ctx.recommended_kcal()));
        if !args.dry_run {
            let meal = wizard.save_meal(ctx).await?;
            println!("Meal saved ({} item(s)).", meal.items.len());
        }
        return Ok(());
    }

    let mut pending: Vec<PathBuf> = args.images.into_iter().rev().collect();
    loop {
        match wizard.step() {
            Step::Upload => {
                let path = match pending.pop() {
                    Some(path) => path,
                    None => {
                        println!("{}", presentation::step_header(Step::Upload, None));
                        let answer = prompt("Image path (empty to review, q to quit): ")?;
                        if answer == "q" {
                            return Ok(());
                        }
                        if answer.is_empty() {
                            report(wizard.review());
                            continue;
                        }
                        PathBuf::from(answer)
                    }
                };
                match load_image(&path).await {
                    Ok(image) => report(wizard.submit_image(image).await.map(|_| ())),
                    Err(e) => println!("! {:#}", e),
                }
            }
            Step::Select => {
                println!(
                    "{}",
                    presentation::step_header(Step::Select, wizard.current_detection())
                );
                println!("Detected: {}", wizard.pred_class());
                print!(
                    "{}",
                    presentation::food_options(wizard.food_options(), wizard.selected_food())
                );
                let answer = prompt("Option number (enter keeps *, s skips, q quits): ")?;
                match answer.as_str() {
                    "q" => return Ok(()),
                    "s" => report(wizard.skip().map(|_| ())),
                    _ => {
                        if !answer.is_empty() {
                            match answer.parse::<usize>().ok().and_then(|n| {
                                n.checked_sub(1)
                                    .and_then(|idx| wizard.food_options().get(idx).cloned())
                            }) {
                                Some(option) => wizard.select_food(option),
                                None => {
                                    println!("! Pick a number from the list.");
                                    continue;
                                }
                            }
                        }
                        let weight = prompt(&format!(
                            "Weight in grams (10-1000) [{}]: ",
                            wizard.weight().grams()
                        ))?;
                        if !weight.is_empty() {
                            match weight.parse::<u32>() {
                                Ok(grams) => {
                                    if let Err(e) = wizard.set_weight(grams) {
                                        println!("! {}", e);
                                        continue;
                                    }
                                }
                                Err(_) => {
                                    println!("! Enter a whole number of grams.");
                                    continue;
                                }
                            }
                        }
                        report(wizard.confirm_selection().await.map(|_| ()));
                    }
                }
            }
            Step::Review => {
                println!("{}", presentation::step_header(Step::Review, None));
                print!("{}", presentation::items_table(wizard.items()));
                print!(
                    "{}",
                    presentation::totals(&wizard.totals(), ctx.recommended_kcal())
                );
                let answer =
                    prompt("[s]ave, [e]dit N, [r]emove N, [a]dd another photo, [q]uit: ")?;
                let mut parts = answer.split_whitespace();
                let item_at = |n: Option<&str>| -> Option<ItemId> {
                    let idx = n?.parse::<usize>().ok()?.checked_sub(1)?;
                    wizard.items().get(idx).map(|item| item.id)
                };
                match parts.next() {
                    Some("s") if args.dry_run => println!("Dry run: not saving."),
                    Some("s") => match wizard.save_meal(ctx).await {
                        Ok(meal) => {
                            println!("Meal saved ({} item(s)).", meal.items.len());
                            return Ok(());
                        }
                        Err(e) => println!("! {}", e),
                    },
                    Some("e") => match item_at(parts.next()) {
                        Some(id) => report(wizard.edit_item(id).await),
                        None => println!("! No such item."),
                    },
                    Some("r") => match item_at(parts.next()) {
                        Some(id) => {
                            wizard.remove_item(id);
                        }
                        None => println!("! No such item."),
                    },
                    Some("a") => wizard.start_new_image(),
                    Some("q") => return Ok(()),
                    _ => println!("! Unknown choice."),
                }
            }
        }
    }
}

async fn run_profile_update(args: ProfileArgs, api: &FoodApi, ctx: &mut AppContext) -> Result<()> {
    let current = fetch_profile(api).await?;
    let mut update = ProfileUpdate::from_profile(&current);
    if args.gender.is_some() {
        update.gender = args.gender;
    }
    if args.height_cm.is_some() {
        update.height_cm = args.height_cm;
    }
    if args.weight_kg.is_some() {
        update.weight_kg = args.weight_kg;
    }
    if args.birth_date.is_some() {
        update.birth_date = args.birth_date;
    }
    if args.activity_level.is_some() {
        update.activity_level = args.activity_level;
    }
    if let Some(vegetarian) = args.vegetarian {
        update.is_vegetarian = vegetarian;
    }
    if let Some(vegan) = args.vegan {
        update.is_vegan = vegan;
    }
    for allergen_id in args.toggle_allergy {
        update.toggle_allergy(allergen_id);
    }

    let saved = update_profile(api, &update).await?;
    ctx.apply_profile(&saved);
    println!("Profile saved.");
    print!("{}", presentation::profile(&saved));
    Ok(())
}

/// Returns false when the stored session should be discarded.
async fn run(command: Command, api: &FoodApi, ctx: &mut AppContext) -> Result<bool> {
    match command {
        Command::Login { username, password } => {
            let user = ctx.login(api, &username, &password).await?;
            println!("Logged in as {}.", user.username);
            ctx.bootstrap(api).await;
        }
        Command::Register {
            username,
            password,
            email,
        } => {
            let user = ctx
                .register(api, &username, &password, email.as_deref())
                .await?;
            println!("Welcome, {}.", user.username);
            ctx.bootstrap(api).await;
        }
        Command::Logout => {
            if let Err(e) = ctx.logout(api).await {
                warn!(error = %e, "backend logout failed, dropping local session anyway");
            }
            println!("Logged out.");
            return Ok(false);
        }
        Command::Profile { action } => match action.unwrap_or(ProfileCommand::Show) {
            ProfileCommand::Show => {
                let profile = fetch_profile(api).await?;
                ctx.apply_profile(&profile);
                print!("{}", presentation::profile(&profile));
            }
            ProfileCommand::Update(args) => run_profile_update(args, api, ctx).await?,
        },
        Command::Allergens { action } => match action.unwrap_or(AllergenCommand::List) {
            AllergenCommand::List => {
                for allergen in list_allergens(api).await? {
                    println!("#{:<4} {}", allergen.id, allergen.name);
                }
            }
            AllergenCommand::Add { name } => {
                let allergen = add_allergen(api, &name).await?;
                println!("Added allergen #{} {}.", allergen.id, allergen.name);
            }
            AllergenCommand::Delete { id } => {
                delete_allergen(api, id).await?;
                println!("Deleted allergen #{}.", id);
            }
        },
        Command::Prefs { action } => match action.unwrap_or(PreferenceCommand::List) {
            PreferenceCommand::List => {
                for pref in list_food_preferences(api).await? {
                    println!(
                        "{:?} #{:<5} {}",
                        pref.preference, pref.food.id, pref.food.representative_name
                    );
                }
            }
            PreferenceCommand::Set {
                food_id,
                preference,
            } => {
                let saved = set_food_preference(api, food_id, preference).await?;
                let verb = if saved.created == Some(true) { "Added" } else { "Updated" };
                println!("{} preference for {}.", verb, saved.food.representative_name);
            }
            PreferenceCommand::Delete { food_id } => {
                delete_food_preference(api, food_id).await?;
                println!("Removed preference for food #{}.", food_id);
            }
        },
        Command::SearchFood { term } => {
            let found = search_foods(api, &term).await?;
            if found.is_empty() {
                println!("No foods found.");
            }
            print!("{}", presentation::food_options(&found, None));
        }
        Command::Analyze(args) => run_analyze(args, api, ctx).await?,
        Command::Meals { csv } => {
            let meals = fetch_meals(api).await?;
            for meal in &meals {
                println!("{}", presentation::meal_line(meal));
            }
            if let Some(path) = csv {
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create '{}'", path.display()))?;
                let rows = export_csv(&meals, file)?;
                println!("Wrote {} row(s) to {}.", rows, path.display());
            }
        }
        Command::Today { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let meals = fetch_meals(api).await?;
            let board = DailyBoard::for_date(&meals, date);
            let summary = board.summary(ctx.recommended_kcal());
            print!("{}", presentation::daily_board(&board, &summary));
        }
        Command::Recommend { query } => {
            let recommendation = recommend_menu(api, &query.join(" ")).await?;
            println!("{}", recommendation);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = parse_args();
    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    if let Some(session_file) = cli.session_file {
        config.session_file = session_file;
    }
    init_logging(config.log_format);
    debug!(?config, "configuration loaded");

    let api = FoodApi::with_timeout(&config.api_base, config.http_timeout)
        .with_context(|| format!("Cannot use backend at '{}'", config.api_base))?;

    let mut ctx = match load_session(&config.session_file) {
        Some(stored) => AppContext::restore(stored, &api),
        None => AppContext::new(config.default_kcal),
    };
    if !matches!(
        cli.command,
        Command::Login { .. } | Command::Register { .. } | Command::Logout
    ) {
        ctx.bootstrap(&api).await;
    }

    let outcome = run(cli.command, &api, &mut ctx).await;

    match &outcome {
        Ok(false) => clear_session(&config.session_file).with_context(|| {
            format!("Failed to remove session file '{}'", config.session_file.display())
        })?,
        _ => {
            if let Err(e) = save_session(&ctx.snapshot(&api), &config.session_file) {
                warn!(error = %e, "could not store session");
            }
        }
    }
    info!(user = ?ctx.current_user().map(|u| &u.username), "done");

    outcome.map(|_| ())
}
