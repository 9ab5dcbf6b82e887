//! Gymsession CLI
//!
//! Command-line client for the gym API. The session survives between runs in
//! the OS keyring and is renewed transparently when the access token expires.
//!
//! # Usage
//!
//! ```bash
//! # Sign in once
//! gymsession sign-in rodrigo@email.com secret123
//!
//! # Browse exercises with the stored session
//! gymsession groups
//! gymsession exercises costas
//! gymsession exercise 7
//!
//! # Change the display name
//! gymsession update-profile --name "Rodrigo Gonçalves"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use gymsession_core::{
    GymApi, ProfileUpdate, SessionContext, SessionError, create_store,
    api::{EXERCISE_FALLBACK, EXERCISES_FALLBACK, GROUPS_FALLBACK, PROFILE_FALLBACK},
    GENERIC_MESSAGE,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod config;

#[derive(Parser)]
#[command(name = "gymsession")]
#[command(about = "Gym API client with a persistent session")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    SignIn {
        email: String,
        password: String,
    },

    /// Sign out and forget the stored session
    SignOut,

    /// Show the signed-in user
    Whoami,

    /// Update the signed-in user's profile
    UpdateProfile {
        /// New display name
        #[arg(short, long)]
        name: String,

        /// Current password, required to set a new one
        #[arg(long, requires = "new_password")]
        old_password: Option<String>,

        /// New password
        #[arg(long, requires = "old_password")]
        new_password: Option<String>,
    },

    /// List the muscle groups
    Groups,

    /// List the exercises of a muscle group
    Exercises {
        group: String,
    },

    /// Show one exercise
    Exercise {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.log_level, cli.verbose);
    tracing::debug!("Loaded configuration from {:?}", config.config_path);

    let store = create_store(config.prefer_keyring);
    let context = SessionContext::connect(config.session.clone(), store.into())?;
    if let Err(e) = context.restore().await {
        tracing::warn!("Starting signed out: {}", e);
    }

    let api = GymApi::new(context)?;
    match run(&api, cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err((e, fallback)) => {
            eprintln!("{}", e.user_message(fallback));
            tracing::debug!("Command failed: {:?}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

type CommandResult = std::result::Result<(), (SessionError, &'static str)>;

fn fallback(message: &'static str) -> impl FnOnce(SessionError) -> (SessionError, &'static str) {
    move |e| (e, message)
}

async fn run(api: &GymApi, command: Commands) -> CommandResult {
    let context = api.context();

    match command {
        Commands::SignIn { email, password } => {
            context
                .sign_in(&email, &password)
                .await
                .map_err(fallback(GENERIC_MESSAGE))?;
            if let Some(user) = context.user() {
                println!("Signed in as {} <{}>", user.name, user.email);
            }
        }
        Commands::SignOut => {
            context.sign_out().await;
            println!("Signed out");
        }
        Commands::Whoami => match context.user() {
            Some(user) => {
                println!("{} <{}>", user.name, user.email);
                if let Some(url) = api.avatar_url(&user) {
                    println!("  avatar: {}", url);
                }
            }
            None => println!("Not signed in"),
        },
        Commands::UpdateProfile {
            name,
            old_password,
            new_password,
        } => {
            let mut update = ProfileUpdate::name(name);
            if let (Some(old), Some(new)) = (old_password, new_password) {
                update = update.with_password(old, new);
            }
            let user = api
                .update_profile(update)
                .await
                .map_err(fallback(PROFILE_FALLBACK))?;
            println!("Profile updated: {}", user.name);
        }
        Commands::Groups => {
            let groups = api.groups().await.map_err(fallback(GROUPS_FALLBACK))?;
            for group in groups {
                println!("{}", group);
            }
        }
        Commands::Exercises { group } => {
            let exercises = api
                .exercises_by_group(&group)
                .await
                .map_err(fallback(EXERCISES_FALLBACK))?;
            if exercises.is_empty() {
                println!("No exercises in {}", group);
            }
            for exercise in exercises {
                println!(
                    "{:>4}  {}  ({} x {})",
                    exercise.id, exercise.name, exercise.series, exercise.repetitions
                );
            }
        }
        Commands::Exercise { id } => {
            let exercise = api.exercise(&id).await.map_err(fallback(EXERCISE_FALLBACK))?;
            println!("{} ({})", exercise.name, exercise.group);
            println!("  {} series of {} repetitions", exercise.series, exercise.repetitions);
            if let Some(url) = api.demo_url(&exercise) {
                println!("  demo: {}", url);
            }
        }
    }

    Ok(())
}
