use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use modelx_client::{
    init_model, ClientError, Reference, RepoDetails, RepoManager, CONFIG_FILE_NAME,
};

#[derive(Debug, Parser)]
#[command(name = "modelx", version, about = "modelx model registry client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize a new model directory with a configuration skeleton.
    Init {
        path: Utf8PathBuf,
        #[arg(short, long)]
        force: bool,
    },
    /// List repositories of a registry, or versions of a repository.
    List {
        reference: String,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show the remote model configuration.
    Info { reference: String },
    /// Push a model directory to a registry.
    Push {
        reference: String,
        #[arg(default_value = ".")]
        directory: Utf8PathBuf,
    },
    /// Pull a model version into a directory.
    Pull {
        reference: String,
        directory: Option<Utf8PathBuf>,
        /// Remove local files the manifest does not name.
        #[arg(long)]
        force: bool,
    },
    /// Copy a model version to another repository or registry.
    Copy { from: String, to: String },
    /// Manage registry aliases.
    Repo {
        #[command(subcommand)]
        command: RepoCommand,
    },
}

#[derive(Debug, Subcommand)]
enum RepoCommand {
    /// Remember a registry under a short alias.
    Add {
        name: String,
        url: String,
        #[arg(long, default_value = "")]
        token: String,
    },
    /// Forget an alias.
    Remove { name: String },
    /// List known aliases.
    List,
}

#[tokio::main]
async fn main() {
    let filter = if std::env::var("MODELX_DEBUG").as_deref() == Ok("1") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn parse_target(raw: &str) -> Result<Reference, ClientError> {
    let reference = Reference::parse(raw)?;
    if reference.repository.is_empty() {
        return Err(ClientError::Other(format!(
            "reference {raw:?} does not name a repository"
        )));
    }
    Ok(reference)
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    match cli.command {
        Command::Init { path, force } => {
            init_model(&path, force)?;
            println!("modelx model initialized in {path}");
        }
        Command::List { reference, search } => {
            let reference = Reference::parse(&reference)?;
            let client = reference.client()?;
            let index = if reference.repository.is_empty() {
                client.get_global_index(&search).await?
            } else {
                client.get_index(&reference.repository, &search).await?
            };
            for descriptor in &index.manifests {
                match &descriptor.modified {
                    Some(modified) => {
                        println!("{}\t{}", descriptor.name, modified.format("%Y-%m-%d %H:%M:%S"))
                    }
                    None => println!("{}", descriptor.name),
                }
            }
        }
        Command::Info { reference } => {
            let reference = parse_target(&reference)?;
            let client = reference.client()?;
            let manifest = client
                .get_manifest(&reference.repository, &reference.version)
                .await?;
            let digest = manifest.config.digest.as_ref().ok_or_else(|| {
                ClientError::Other("manifest carries no configuration blob".to_string())
            })?;
            let response = client
                .remote()
                .get_blob(&reference.repository, digest)
                .await?;
            let body = response.bytes().await?;
            print!("{}", String::from_utf8_lossy(&body));
        }
        Command::Push {
            reference,
            directory,
        } => {
            let reference = parse_target(&reference)?;
            let client = reference.client()?;
            client
                .push(
                    &reference.repository,
                    &reference.version,
                    CONFIG_FILE_NAME,
                    &directory,
                )
                .await?;
            println!("Pushed {reference}");
        }
        Command::Pull {
            reference,
            directory,
            force,
        } => {
            let reference = parse_target(&reference)?;
            let directory =
                directory.unwrap_or_else(|| Utf8PathBuf::from(reference.name().to_string()));
            let client = reference.client()?;
            client
                .pull(&reference.repository, &reference.version, &directory, force)
                .await?;
            println!("Pulled {reference} into {directory}");
        }
        Command::Copy { from, to } => {
            let from = parse_target(&from)?;
            let to = parse_target(&to)?;
            let src = from.client()?;
            let dest = to.client()?;
            src.copy_to(
                &from.repository,
                &from.version,
                &dest,
                &to.repository,
                &to.version,
            )
            .await?;
            println!("Copied {from} to {to}");
        }
        Command::Repo { command } => match command {
            RepoCommand::Add { name, url, token } => {
                let mut manager = RepoManager::load_default()?;
                manager.set(RepoDetails { name, url, token })?;
            }
            RepoCommand::Remove { name } => {
                let mut manager = RepoManager::load_default()?;
                manager.remove(&name)?;
            }
            RepoCommand::List => {
                let manager = RepoManager::load_default()?;
                for details in manager.list() {
                    println!("{}\t{}", details.name, details.url);
                }
            }
        },
    }
    Ok(())
}
