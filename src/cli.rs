//! Key-management CLI, mirroring the original operator commands: add,
//! update, delete and list API keys, and dump usage. Operates on the
//! same SQLite file the server binds to, so it can be run against a
//! live deployment's database without going through HTTP.

use clap::Subcommand;
use uuid::Uuid;

use crate::store::Store;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new API key for `name`. Generates a random key unless
    /// `--key` is given.
    AddKey {
        name: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Replace the API key stored for `name`.
    UpdateKey {
        name: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Remove `name` and its key.
    DeleteKey { name: String },
    /// List every registered name and key.
    ListKeys,
    /// Print the most recent usage timestamp per name.
    Usage,
}

fn new_key() -> String {
    Uuid::new_v4().to_string()
}

pub async fn run(command: Command, store: &Store) -> anyhow::Result<()> {
    match command {
        Command::AddKey { name, key } => {
            let api_key = key.unwrap_or_else(new_key);
            match store.create_key(&name, &api_key).await {
                Ok(()) => println!("Added key for {name}: {api_key}"),
                Err(crate::error::StoreError::NameExists(_)) => {
                    println!("Key for {name} already exists")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::UpdateKey { name, key } => {
            let api_key = key.unwrap_or_else(new_key);
            if store.update_key(&name, &api_key).await? {
                println!("Updated key for {name}: {api_key}");
            } else {
                println!("No such key: {name}");
            }
        }
        Command::DeleteKey { name } => {
            if store.delete_key(&name).await? {
                println!("Deleted key for {name}");
            } else {
                println!("No such key: {name}");
            }
        }
        Command::ListKeys => {
            for record in store.list_keys().await? {
                println!("{}: {}", record.name, record.api_key);
            }
        }
        Command::Usage => {
            for (name, last_seen) in store.usage_summary().await? {
                println!("{name}: last used at {last_seen}");
            }
        }
    }
    Ok(())
}
