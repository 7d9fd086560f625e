use clap::Parser;
use serde::Serialize;

mod animals;
mod app;
mod cli;
mod config;
mod csv_table;
mod eid;
mod embedding;
mod recommend;
mod signals;
mod storage;
#[cfg(test)]
mod tests;
mod users;
mod web;

use app::{factory, App, Providers};
use cli::{AnimalAction, Command, UserAction};
use config::Config;
use embedding::codec;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let base_path = factory::base_path()?;
    let config = Config::load_with(&base_path)?;
    // blocking clients, so this has to happen before any runtime starts
    let providers = Providers::from_config(&config)?;
    let mut app = App::open(config, providers)?;

    match args.command {
        Command::Daemon {} => {
            app.run_queue();
            web::start_daemon(app)?;
        }

        Command::Animal { action } => match action {
            AnimalAction::Import { path } => print_json(&app.import_animals(&path)?)?,
            AnimalAction::List {} => print_json(&app.list_animals()?)?,
        },

        Command::User { action } => match action {
            UserAction::Add { name } => print_json(&app.add_user(&name)?)?,
            UserAction::List {} => print_json(&app.list_users()?)?,
        },

        Command::Interest {
            user_id,
            animal_id,
            dwell,
        } => print_json(&app.record_interest(user_id, &animal_id, dwell)?)?,

        Command::Like {
            user_id,
            animal_id,
            unlike,
        } => print_json(&app.set_like(user_id, &animal_id, !unlike)?)?,

        Command::Embed { animal_id } => print_json(&app.generate_embedding(&animal_id)?)?,

        Command::EmbedAll {} => {
            let report = app.generate_all_embeddings()?;
            for (entity_id, item) in report.items.iter().filter(|(_, item)| !item.is_success()) {
                log::warn!("{entity_id}: {item:?}");
            }
            print_json(&report.counts())?;
        }

        Command::Recompute { user_id } => {
            print_json(&app.recompute_preference_vector(user_id)?)?
        }

        Command::Recommend { user_id, top } => print_json(&app.recommend(user_id, top)?)?,

        Command::Summary { user_id } => print_json(&app.summarize_preference(user_id)?)?,

        Command::Preference { user_id } => {
            let pref = app.preference_vector(user_id)?;
            println!("{}", codec::encode_text(&pref.vector)?);
        }
    }

    Ok(())
}
