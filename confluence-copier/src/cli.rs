/// CLI interface for confluence-copier: argument parsing and command dispatch.
///
/// All business logic lives in `confluence-copier-core`; this module only
/// loads configuration, builds the two Confluence clients and hands them to a
/// [`Synchroniser`]. The staging directory is removed after every command,
/// whether it succeeded or not.
use crate::load_config::{load_config, load_config_from_env};
use anyhow::Result;
use clap::{Parser, Subcommand};
use confluence_copier_core::client::ConfluenceClient;
use confluence_copier_core::contract::{ContentClient, ParentRef};
use confluence_copier_core::staging::StagingArea;
use confluence_copier_core::synchronise::{DocumentReport, SpaceCopyMode, Synchroniser};
use std::path::PathBuf;

/// CLI for confluence-copier: copy pages and spaces between Confluence instances.
#[derive(Parser)]
#[clap(
    name = "confluence-copier",
    version,
    about = "Copy Confluence pages (body and attachments) and spaces from a source instance to a destination instance"
)]
pub struct Cli {
    /// Optional YAML config file; without it everything is read from the environment
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Update an existing destination page with a page from the source instance
    UpdatePage {
        /// Page id in the source instance
        #[clap(long)]
        source_id: String,
        /// Page id in the destination instance
        #[clap(long)]
        destination_id: String,
    },
    /// Copy a source page into a new destination page
    CopyPage {
        /// Page id in the source instance
        #[clap(long)]
        source_id: String,
        /// Parent page id in the destination instance; -1 creates the page at the space root
        #[clap(long, allow_hyphen_values = true)]
        parent_id: String,
        /// Space key in the destination instance
        #[clap(long)]
        destination_space_key: String,
        /// Title for the new page; defaults to the source page's title
        #[clap(long)]
        new_title: Option<String>,
    },
    /// Create an empty page in the destination instance
    CreatePage {
        /// Space key in the destination instance
        #[clap(long)]
        space_key: String,
        /// Parent page id in the destination instance; -1 creates the page at the space root
        #[clap(long, allow_hyphen_values = true)]
        parent_id: String,
        /// Title of the new page
        #[clap(long)]
        doc_name: String,
    },
    /// Copy an entire source space into a new destination space
    CopySpace {
        /// Space key in the source instance
        #[clap(long)]
        source_space_key: String,
        /// Name of the new space in the destination instance
        #[clap(long)]
        destination_space_name: String,
        /// Only build and print the source page tree
        #[clap(long)]
        preview: bool,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::UpdatePage { .. } => "update-page",
            Commands::CopyPage { .. } => "copy-page",
            Commands::CreatePage { .. } => "create-page",
            Commands::CopySpace { .. } => "copy-space",
        }
    }
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!(command = cli.command.name(), "command_started");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_from_env()?,
    };

    let source = ConfluenceClient::new(&config.source, config.request_timeout_secs)?;
    let destination = ConfluenceClient::new(&config.destination, config.request_timeout_secs)?;
    let staging = StagingArea::create_in(&config.staging_dir).await?;
    let synchroniser = Synchroniser::new(
        &source,
        &destination,
        &staging,
        config.destination.username.clone(),
    )
    .with_download_concurrency(config.download_concurrency);

    let result = execute(cli.command, &synchroniser).await;

    if let Err(e) = staging.cleanup().await {
        tracing::warn!(error = %e, "Failed to delete staging directory");
    }

    match &result {
        Ok(_) => tracing::info!("Operation completed"),
        Err(e) => tracing::error!(error = %e, "Operation failed"),
    }
    result
}

/// Dispatches one command against an already configured synchroniser.
pub async fn execute<S, D>(command: Commands, synchroniser: &Synchroniser<'_, S, D>) -> Result<()>
where
    S: ContentClient,
    D: ContentClient,
{
    match command {
        Commands::UpdatePage {
            source_id,
            destination_id,
        } => {
            let report = synchroniser
                .sync_document(&source_id, &destination_id)
                .await?;
            print_document_report(&report);
            println!("Update operation completed!");
        }
        Commands::CopyPage {
            source_id,
            parent_id,
            destination_space_key,
            new_title,
        } => {
            let report = synchroniser
                .copy_document(
                    &source_id,
                    &destination_space_key,
                    ParentRef::from_raw(&parent_id),
                    new_title.as_deref(),
                )
                .await?;
            print_document_report(&report);
            println!("Copy operation completed!");
        }
        Commands::CreatePage {
            space_key,
            parent_id,
            doc_name,
        } => {
            let id = synchroniser
                .create_document(&space_key, ParentRef::from_raw(&parent_id), &doc_name)
                .await?;
            println!("Created document {id}");
        }
        Commands::CopySpace {
            source_space_key,
            destination_space_name,
            preview,
        } => {
            let mode = if preview {
                SpaceCopyMode::Preview
            } else {
                SpaceCopyMode::Create {
                    destination_space_name,
                }
            };
            let report = synchroniser.copy_space(&source_space_key, mode).await?;
            match report.tree.render() {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => tracing::warn!(error = %e, "Cannot render space tree"),
            }
            for doc in &report.documents {
                print_document_report(doc);
            }
            if let Some(key) = &report.destination_space_key {
                println!(
                    "Copied {} pages into space {key}",
                    report.documents.len()
                );
            }
        }
    }
    Ok(())
}

fn print_document_report(report: &DocumentReport) {
    println!(
        "{} ({}) -> {} version {}: {} attachments uploaded, {} skipped, {} removed",
        report.title,
        report.source_id,
        report.destination_id,
        report.new_version,
        report.attachments_uploaded,
        report.attachments_skipped,
        report.attachments_removed
    );
}
