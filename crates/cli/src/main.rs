//! Questline CLI - turn goals into levels and level up.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use questline_core::{Category, GoalId, GoalStatus, LevelId, LevelStatus, DEFAULT_TARGET_LEVELS};
use questline_progress::{EngineConfig, NewGoal, ProgressionEngine};
use questline_storage::{IdentityProvider, JsonIdentity, JsonStorage};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "questline")]
#[command(about = "Gamified goal tracking", long_about = None)]
struct Cli {
    /// Directory holding goals, levels and progress
    #[arg(long, global = true, default_value = ".questline")]
    data_dir: PathBuf,

    /// Engine config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create your progress record
    Init {
        /// Avatar name
        avatar: String,
    },
    /// Manage goals
    #[command(subcommand)]
    Goal(GoalCommand),
    /// Manage levels
    #[command(subcommand)]
    Level(LevelCommand),
    /// Show XP and goal summary
    Status,
    /// Recompute counters from level statuses
    Reconcile {
        /// Only this goal
        #[arg(long)]
        goal: Option<GoalId>,
    },
}

#[derive(Subcommand)]
enum GoalCommand {
    /// Create a goal with its first level
    Create {
        /// Goal title
        title: String,
        /// Category (health, career, learning, relationships, finance, personal, creative)
        #[arg(long, default_value = "personal")]
        category: Category,
        /// Levels needed to finish (1-100)
        #[arg(long, default_value_t = DEFAULT_TARGET_LEVELS)]
        target: u32,
        /// Goal description
        #[arg(long)]
        description: Option<String>,
        /// Title of the first level
        #[arg(long)]
        first_level: Option<String>,
    },
    /// List goals
    List {
        /// Filter by status (active, completed)
        #[arg(long)]
        status: Option<GoalStatus>,
    },
    /// Show a goal and its levels
    Show {
        /// Goal ID
        id: GoalId,
    },
}

#[derive(Subcommand)]
enum LevelCommand {
    /// Append a level to a goal
    Add {
        /// Goal ID
        goal: GoalId,
        /// Level title
        title: String,
        /// Level description
        #[arg(long)]
        description: Option<String>,
    },
    /// Complete the active level
    Complete {
        /// Level ID
        id: LevelId,
        /// Completion notes
        #[arg(long)]
        notes: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    debug!("Opening data dir {}", cli.data_dir.display());
    let store = Arc::new(JsonStorage::new(&cli.data_dir).await?);
    let identity = Arc::new(JsonIdentity::new(&cli.data_dir).await?);
    let user = identity.current_user().await?.id;
    let engine = ProgressionEngine::new(store, identity).with_config(config);
    let query = engine.query();

    match cli.command {
        Commands::Init { avatar } => {
            let progress = engine.onboard(&avatar).await?;
            if cli.json {
                return print_json(&progress);
            }
            println!("Welcome, {}! Your journey starts at {} XP.", progress.avatar_name, progress.xp_points);
        }
        Commands::Goal(GoalCommand::Create { title, category, target, description, first_level }) => {
            let mut spec = NewGoal::new(title, category, target);
            spec.description = description;
            spec.first_level_title = first_level;
            let goal = engine.create_goal(&user, spec).await?;
            if cli.json {
                return print_json(&goal);
            }
            println!("Created goal: {} - {} ({} levels)", goal.id, goal.title, goal.target_levels);
        }
        Commands::Goal(GoalCommand::List { status }) => {
            let goals = query.goals_by_user(&user, status).await?;
            if cli.json {
                return print_json(&goals);
            }

            println!("Goals ({})", goals.len());
            for goal in goals {
                println!(
                    "  {} | {} | {:<13} | {}/{} - {}",
                    goal.id,
                    format_goal_status(goal.status),
                    goal.category.label(),
                    goal.current_level,
                    goal.target_levels,
                    goal.title,
                );
            }
        }
        Commands::Goal(GoalCommand::Show { id }) => {
            let detail = query.goal_detail(id).await?;
            if detail.goal.user_id != user {
                bail!("Goal {} belongs to another user", id);
            }
            if cli.json {
                return print_json(&detail);
            }

            let goal = &detail.goal;
            println!("Goal: {}", goal.id);
            println!("  Title: {}", goal.title);
            if !goal.description.is_empty() {
                println!("  Description: {}", goal.description);
            }
            println!("  Category: {}", goal.category.label());
            println!("  Status: {}", format_goal_status(goal.status));
            println!(
                "  Progress: {}/{} ({:.0}%)",
                goal.current_level, goal.target_levels, detail.percent_complete
            );
            if detail.is_stalled() {
                println!("  Every level is done; add a level to continue");
            }
            println!("  Levels:");
            for level in &detail.levels {
                println!(
                    "    {:>3}. [{}] {} - {}",
                    level.level_number,
                    format_level_status(level.status),
                    level.title,
                    level.id
                );
            }
        }
        Commands::Level(LevelCommand::Add { goal, title, description }) => {
            let level = engine.add_level(&user, goal, &title, description.as_deref()).await?;
            if cli.json {
                return print_json(&level);
            }
            println!(
                "Added level {}: {} - {} ({})",
                level.level_number,
                level.id,
                level.title,
                format_level_status(level.status)
            );
        }
        Commands::Level(LevelCommand::Complete { id, notes }) => {
            let result = engine.complete_level(&user, id, notes).await?;
            if cli.json {
                return print_json(&result);
            }

            if result.replayed {
                println!("Level {} was already completed", result.level.level_number);
                return Ok(());
            }
            println!("Level {} complete! +{} XP", result.level.level_number, result.xp_awarded);
            if result.goal_completed {
                println!("Goal '{}' completed!", result.goal.title);
            } else if let Some(next) = result.next_level {
                println!("Next up: level {} - {} ({})", next.level_number, next.title, next.id);
            } else {
                println!("No next level yet; add one to keep going");
            }
        }
        Commands::Status => {
            let overview = query.user_overview(&user).await.context("run `questline init <avatar>` first")?;
            if cli.json {
                return print_json(&overview);
            }

            let progress = &overview.progress;
            println!("{}", progress.avatar_name);
            println!("  XP: {}", progress.xp_points);
            println!("  Levels completed: {}", progress.total_levels_completed);
            println!("  Goals completed: {}", progress.total_goals_completed);
            println!("  Active goals: {}", overview.active_goals.len());
            for goal in &overview.active_goals {
                println!("    {} ({}/{})", goal.title, goal.current_level, goal.target_levels);
            }
        }
        Commands::Reconcile { goal: Some(goal_id) } => {
            let repair = engine.reconcile_goal(&user, goal_id).await?;
            if cli.json {
                return print_json(&repair);
            }
            if repair.changed() {
                println!(
                    "Goal {}: level {} -> {}, {} -> {}",
                    goal_id,
                    repair.current_level_before,
                    repair.current_level_after,
                    repair.status_before,
                    repair.status_after
                );
            } else {
                println!("Goal {} is consistent", goal_id);
            }
        }
        Commands::Reconcile { goal: None } => {
            let report = engine.reconcile_all(&user).await?;
            if cli.json {
                return print_json(&report);
            }
            let repaired = report.goals.iter().filter(|g| g.changed()).count();
            println!("Goals repaired: {}/{}", repaired, report.goals.len());
            let p = &report.progress;
            if p.changed() {
                println!(
                    "  Levels {} -> {}, goals {} -> {}, XP {} -> {}",
                    p.levels_before, p.levels_after, p.goals_before, p.goals_after, p.xp_before, p.xp_after
                );
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_goal_status(status: GoalStatus) -> &'static str {
    match status {
        GoalStatus::Active => "ACTIVE",
        GoalStatus::Completed => "DONE",
    }
}

fn format_level_status(status: LevelStatus) -> &'static str {
    match status {
        LevelStatus::Locked => "LOCKED",
        LevelStatus::Active => "ACTIVE",
        LevelStatus::Completed => "DONE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_goal_create() {
        let cli = Cli::parse_from(["questline", "goal", "create", "Run", "--category", "Health", "--target", "5"]);
        match cli.command {
            Commands::Goal(GoalCommand::Create { title, category, target, .. }) => {
                assert_eq!(title, "Run");
                assert_eq!(category, Category::Health);
                assert_eq!(target, 5);
            }
            _ => panic!("expected goal create"),
        }
        assert_eq!(cli.data_dir, PathBuf::from(".questline"));
    }

    #[test]
    fn test_rejects_unknown_category() {
        assert!(Cli::try_parse_from(["questline", "goal", "create", "Run", "--category", "hobby"]).is_err());
    }
}
