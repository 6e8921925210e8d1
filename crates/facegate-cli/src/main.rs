use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod client;

use client::{FacegateClient, Verdict};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face registry CLI", version)]
struct Cli {
    /// Base URL of the facegated HTTP API
    #[arg(long, global = true, env = "FACEGATE_URL", default_value = "http://127.0.0.1:5000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new face
    Add {
        /// Display name for this face
        #[arg(short, long)]
        name: String,
        /// Image containing the face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List registered faces
    List,
    /// Show one registered face
    Show {
        /// Face ID
        id: String,
    },
    /// Replace the reference image of a registered face
    Update {
        /// Face ID
        id: String,
        /// New image containing the face
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Remove a registered face
    Delete {
        /// Face ID
        id: String,
    },
    /// Check an image against the registered faces
    Verify {
        /// Image to verify
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = FacegateClient::new(&cli.url)?;

    match cli.command {
        Commands::Add { name, image } => {
            let face = client.add(&name, &image).await?;
            println!("Registered {} ({})", face.name, face.id);
        }
        Commands::List => {
            let faces = client.list().await?;
            if faces.is_empty() {
                println!("No faces registered");
            }
            for face in faces {
                println!("{}  {}", face.id, face.name);
            }
        }
        Commands::Show { id } => {
            let face = client.get(&id).await?;
            println!("ID:       {}", face.id);
            println!("Name:     {}", face.name);
            println!("Created:  {}", face.created_at.to_rfc3339());
            println!("Updated:  {}", face.updated_at.to_rfc3339());
        }
        Commands::Update { id, image } => {
            println!("{}", client.update(&id, &image).await?);
        }
        Commands::Delete { id } => {
            println!("{}", client.delete(&id).await?);
        }
        Commands::Verify { image } => match client.verify(&image).await? {
            Verdict::Authorized { user_id, name } => {
                println!("Authorized: {name} ({user_id})");
            }
            Verdict::Unauthorized => {
                println!("Unauthorized");
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Status => {
            let status = client.status().await?;
            println!("Version:    {}", status.version);
            println!("Faces:      {}", status.faces);
            println!("Threshold:  {:.2}", status.similarity_threshold);
        }
    }

    Ok(ExitCode::SUCCESS)
}
