//! Partner Directory - command-line entry point.
//!
//! Configures one deployment from flags and environment, runs a single
//! directory operation against it and prints the result as JSON.

use partner_directory::config::{Command, Config, DirectoryCommand};
use partner_directory::db::Pageable;
use partner_directory::{BeneficiaryForm, CredentialKey, Directory, DirectoryFactory, IdentityRecord};
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only the JSON result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn record_json(directory: &Directory, record: &IdentityRecord) -> Value {
    json!({
        "external_id": directory.external_id(record),
        "username": record.username(),
        "first_name": record.first_name(),
        "last_name": record.last_name(),
        "attributes": record.attributes(),
    })
}

fn optional_record_json(directory: &Directory, record: Option<IdentityRecord>) -> Value {
    record
        .map(|r| record_json(directory, &r))
        .unwrap_or(Value::Null)
}

async fn run(directory: &Directory, command: DirectoryCommand) -> Value {
    match command {
        DirectoryCommand::Count { search } => {
            let count = match search {
                Some(term) => directory.count_matching(&term).await,
                None => directory.count().await,
            };
            json!({ "count": count })
        }
        DirectoryCommand::FindId { id } => {
            optional_record_json(directory, directory.find_by_id(&id).await)
        }
        DirectoryCommand::FindUsername { username } => {
            optional_record_json(directory, directory.find_by_username(&username).await)
        }
        DirectoryCommand::FindEmail { email } => {
            optional_record_json(directory, directory.find_by_email(&email).await)
        }
        DirectoryCommand::Search { term, first, max } => {
            let page = Pageable::new(first, max);
            let records = directory.find_by_search_term(&term, &page).await;
            Value::Array(records.iter().map(|r| record_json(directory, r)).collect())
        }
        DirectoryCommand::Beneficiary {
            household,
            uid,
            phone,
        } => {
            let form = BeneficiaryForm::new(household, uid, phone);
            optional_record_json(directory, directory.find_by_beneficiary_form(&form).await)
        }
        DirectoryCommand::Verify {
            username,
            uid,
            password,
        } => {
            let verified = match (&uid, &username) {
                (Some(uid), _) => {
                    directory
                        .verify_credentials_by(CredentialKey::UnifiedId(uid), &password)
                        .await
                }
                (None, Some(username)) => directory.verify_credentials(username, &password).await,
                (None, None) => false,
            };
            json!({ "verified": verified })
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    init_tracing(&config);

    let factory = DirectoryFactory::new();
    let command = match &config.command {
        Command::Dialects => {
            println!("{}", serde_json::to_string_pretty(&factory.catalog().names())?);
            return Ok(());
        }
        Command::Directory(command) => command.clone(),
    };

    let deployment = config.deployment()?;
    info!(
        deployment = %deployment.id,
        dialect = %deployment.dialect,
        "Starting partner directory v{}",
        env!("CARGO_PKG_VERSION")
    );

    let directory = match factory.configure(&deployment).await {
        Ok(directory) => directory,
        Err(e) => {
            error!(error = %e, suggestion = e.suggestion().unwrap_or_default(), "Configuration failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            std::process::exit(2);
        }
    };

    let output = run(&directory, command).await;
    println!("{}", serde_json::to_string_pretty(&output)?);

    factory.shutdown().await;
    Ok(())
}
