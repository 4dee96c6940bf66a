mod admin;
mod config;
mod pipeline;

use admin::AdminCommand;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::Config;
use phosor_store::{RepresentativeMode, TransferMode};
use pipeline::RunOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phosor", version, about = "Cluster photos by face and curate the resulting folders")]
struct Cli {
    /// Config file (default: ./phosor.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output root, overriding config and PHOSOR_OUTPUT_DIR
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Directory of photos to scan
    #[arg(short, long)]
    input_dir: Option<PathBuf>,
    /// Load a saved face store (embeddings.json) instead of running the embedder
    #[arg(long)]
    faces: Option<PathBuf>,
    /// Log every action without writing anything
    #[arg(long)]
    dry_run: bool,
    /// copy or move
    #[arg(long)]
    mode: Option<TransferMode>,
    /// dbscan or kmeans
    #[arg(long)]
    method: Option<String>,
    #[arg(long)]
    eps: Option<f32>,
    #[arg(long)]
    min_samples: Option<usize>,
    #[arg(long)]
    n_clusters: Option<usize>,
    /// Clusters with fewer faces are moved to unclustered
    #[arg(long)]
    min_faces: Option<usize>,
    /// face, bbox or bbox_label
    #[arg(long)]
    representative_mode: Option<RepresentativeMode>,
    /// Skip representative images
    #[arg(long)]
    no_representatives: bool,
    /// Concurrent file transfers
    #[arg(long)]
    workers: Option<usize>,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.input_dir {
            config.input.dir = dir.clone();
        }
        if let Some(mode) = self.mode {
            config.output.mode = mode;
        }
        if let Some(method) = &self.method {
            config.clustering.method = method.clone();
        }
        if let Some(eps) = self.eps {
            config.clustering.eps = eps;
        }
        if let Some(n) = self.min_samples {
            config.clustering.min_samples = n;
        }
        if let Some(k) = self.n_clusters {
            config.clustering.n_clusters = k;
        }
        if let Some(n) = self.min_faces {
            config.clustering.min_faces_per_cluster = n;
        }
        if let Some(mode) = self.representative_mode {
            config.output.representative_mode = mode;
        }
        if self.no_representatives {
            config.output.create_representatives = false;
        }
        if let Some(workers) = self.workers {
            config.output.workers = workers;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect, cluster and materialize one folder per person
    Run(RunArgs),
    /// List clusters
    Clusters,
    /// Show one cluster
    Cluster { id: i32 },
    /// List the images in a cluster
    Images { id: i32 },
    /// Rename a cluster and its folder
    Rename { id: i32, label: String },
    /// Merge clusters into a target cluster
    Merge {
        /// Source cluster ids
        #[arg(required = true)]
        sources: Vec<i32>,
        /// Target cluster id
        #[arg(long)]
        into: i32,
    },
    /// Create an empty cluster
    Create { label: String },
    /// Delete a cluster and its folder
    Delete { id: i32 },
    /// List unclustered images
    Unclustered,
    /// Copy an unclustered image into a cluster
    Move { filename: String, cluster: i32 },
    /// Copy an unclustered image into several clusters
    CopyMany {
        filename: String,
        /// Target cluster ids
        #[arg(long = "to", value_delimiter = ',')]
        clusters: Vec<i32>,
        /// Also create a new cluster with this label
        #[arg(long)]
        new_label: Option<String>,
    },
    /// Delete an image from a cluster
    DeleteImage { id: i32, filename: String },
    /// Print the preview image path for a cluster folder
    Representative { label: String },
    /// Print clusters_summary.json
    Summary,
}

impl Commands {
    fn into_admin(self) -> Option<AdminCommand> {
        Some(match self {
            Commands::Run(_) => return None,
            Commands::Clusters => AdminCommand::Clusters,
            Commands::Cluster { id } => AdminCommand::Cluster { id },
            Commands::Images { id } => AdminCommand::Images { id },
            Commands::Rename { id, label } => AdminCommand::Rename { id, label },
            Commands::Merge { sources, into } => AdminCommand::Merge { sources, target: into },
            Commands::Create { label } => AdminCommand::Create { label },
            Commands::Delete { id } => AdminCommand::Delete { id },
            Commands::Unclustered => AdminCommand::Unclustered,
            Commands::Move { filename, cluster } => AdminCommand::Move { filename, cluster },
            Commands::CopyMany {
                filename,
                clusters,
                new_label,
            } => AdminCommand::CopyMany {
                filename,
                clusters,
                new_label,
            },
            Commands::DeleteImage { id, filename } => AdminCommand::DeleteImage { id, filename },
            Commands::Representative { label } => AdminCommand::Representative { label },
            Commands::Summary => AdminCommand::Summary,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            let options = RunOptions {
                faces: args.faces,
                dry_run: args.dry_run,
            };
            tracing::info!(
                input = %config.input.dir.display(),
                output = %config.output.dir.display(),
                method = %config.clustering.method,
                mode = config.output.mode.as_str(),
                dry_run = options.dry_run,
                "starting run"
            );
            // Filesystem- and CPU-bound; keep it off the async workers.
            let report = tokio::task::spawn_blocking(move || pipeline::run(&config, &options)).await??;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report.clusters)?);
            } else {
                println!(
                    "{} face(s), {} cluster(s), {} noise, {} dissolved; {} image(s) transferred, {} missing, {} failed",
                    report.faces,
                    report.clusters.len(),
                    report.noise,
                    report.dropped,
                    report.materialized.transferred,
                    report.materialized.missing,
                    report.materialized.failed
                );
                for c in &report.clusters {
                    println!("{:>5}  {:<24} {:>6}", c.cluster_id, c.label, c.num_faces);
                }
            }
        }
        command => {
            let store = phosor_store::spawn_store(config.output.dir.clone())?;
            if let Some(admin) = command.into_admin() {
                admin::execute(&store, admin, cli.json).await?;
            }
        }
    }

    Ok(())
}
