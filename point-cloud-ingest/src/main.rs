/// Point cloud ingestion command line entry point
use clap::{Parser, Subcommand};
use log::error;
use point_cloud_ingest::loader::LoaderKind;
use point_cloud_ingest::store::ChunkStore;
use point_cloud_ingest::voxel_grid::VoxelId;
use point_cloud_ingest::{IngestConfig, ingest_file};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "point-cloud-ingest",
    about = "Partition point clouds into voxel chunks stored in SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one LAS/LAZ or PLY file into the chunk store
    Ingest {
        /// JSON run configuration; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite database path
        #[arg(long)]
        store: Option<PathBuf>,
        /// Source point cloud file
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long, value_enum)]
        loader: Option<LoaderKind>,
        /// Points per loader batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Voxel edge length in source units
        #[arg(long)]
        voxel_size: Option<f64>,
        /// Parent directory for scratch files
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// Drop and recreate the chunk table first
        #[arg(long)]
        recreate_schema: bool,
        /// Hide progress bars
        #[arg(long)]
        no_progress: bool,
    },
    /// List files with persisted chunks
    Files {
        #[arg(long)]
        store: PathBuf,
    },
    /// List chunk ids and point counts of one file
    Chunks {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        file: String,
    },
    /// Print chunk contents, or the points within a radius of their centroid
    Query {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        file: String,
        /// Comma separated chunk ids
        #[arg(long, value_delimiter = ',', required = true)]
        chunks: Vec<VoxelId>,
        #[arg(long)]
        radius: Option<f64>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()) {
        error!("{}", err);
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Ingest {
            config,
            store,
            source,
            loader,
            batch_size,
            voxel_size,
            scratch_dir,
            recreate_schema,
            no_progress,
        } => {
            let mut config = match config {
                Some(path) => IngestConfig::from_json_file(&path)?,
                None => IngestConfig::default(),
            };
            if let Some(store) = store {
                config.store = store;
            }
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(loader) = loader {
                config.loader = loader;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(voxel_size) = voxel_size {
                config.voxel_size = voxel_size;
            }
            if scratch_dir.is_some() {
                config.scratch_dir = scratch_dir;
            }
            config.recreate_schema |= recreate_schema;
            if no_progress {
                config.show_progress = false;
            }

            let summary = ingest_file(&config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Files { store } => {
            let store = ChunkStore::open_existing(&store)?;
            for file in store.list_files()? {
                println!("{}", file);
            }
        }
        Command::Chunks { store, file } => {
            let store = ChunkStore::open_existing(&store)?;
            println!("{}", serde_json::to_string_pretty(&store.list_chunks(&file)?)?);
        }
        Command::Query {
            store,
            file,
            chunks,
            radius,
        } => {
            let store = ChunkStore::open_existing(&store)?;
            let json = match radius {
                Some(radius) => {
                    serde_json::to_string_pretty(&store.points_within_radius(&file, &chunks, radius)?)?
                }
                None => serde_json::to_string_pretty(&store.fetch_chunks(&file, &chunks)?)?,
            };
            println!("{}", json);
        }
    }
    Ok(())
}
