mod images;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facebase_core::{Algorithm, Attributes, Identity};
use facebase_engine::{EngineConfig, FaceEngine};
use image::DynamicImage;
use images::{FileImages, FileTrainingData};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facebase", about = "Face identity database: train and recognize faces")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (overrides config and FACEBASE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Recognition algorithm: histogram, eigen, fisher or embedding
    #[arg(long, global = true)]
    algorithm: Option<Algorithm>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an identity
    Add {
        /// Attribute as key=value (repeatable)
        #[arg(long = "attr", value_parser = parse_pair)]
        attrs: Vec<(String, String)>,
    },
    /// List all identities
    List,
    /// Show one identity
    Show { id: i64 },
    /// Find an identity by attributes (uuid, then fullName, then name, then the rest)
    Find {
        #[arg(long = "attr", value_parser = parse_pair, required = true)]
        attrs: Vec<(String, String)>,
    },
    /// Append an attribute to an identity
    Attr {
        id: i64,
        /// Attribute as key=value
        #[arg(value_parser = parse_pair)]
        pair: (String, String),
    },
    /// Remove an identity and its training data
    Remove { id: i64 },
    /// Train an identity from face crops
    Train {
        id: i64,
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Training context tag
        #[arg(long, default_value = "cli")]
        context: String,
    },
    /// Recognize face crops
    Recognize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Group face crops showing the same person
    Cluster {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Clear training data
    Clear {
        /// Only this training context
        #[arg(long)]
        context: Option<String>,
        /// Only these identities, for the active algorithm (repeatable)
        #[arg(long = "id")]
        ids: Vec<i64>,
    },
    /// Check database integrity and show engine settings
    Check,
    /// Compact the database file
    Vacuum,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(algorithm) = cli.algorithm {
        config.algorithm = algorithm;
    }

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let engine = FaceEngine::from_config(&config)
        .with_context(|| format!("opening face database {}", config.db_path.display()))?;
    if !engine.is_available() {
        anyhow::bail!("face database {} is not usable", config.db_path.display());
    }

    let output = run(&engine, cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run(engine: &FaceEngine, command: Commands) -> Result<Value> {
    let output = match command {
        Commands::Add { attrs } => {
            let identity = engine
                .add_identity(attributes(attrs))
                .context("identity could not be added")?;
            serde_json::to_value(identity)?
        }
        Commands::List => serde_json::to_value(engine.all_identities())?,
        Commands::Show { id } => serde_json::to_value(known(engine, id)?)?,
        Commands::Find { attrs } => serde_json::to_value(engine.find_identity(&attributes(attrs)))?,
        Commands::Attr { id, pair: (key, value) } => {
            let identity = engine
                .add_identity_attribute(id, &key, &value)
                .with_context(|| format!("no identity {id}"))?;
            serde_json::to_value(identity)?
        }
        Commands::Remove { id } => {
            let identity = known(engine, id)?;
            json!({ "removed": engine.delete_identity(&identity), "id": id })
        }
        Commands::Train { id, images, context } => {
            let identity = known(engine, id)?;
            let mut provider = FileTrainingData::new(&identity, images);
            let report = engine.train_identity(&identity, &mut provider, &context);
            serde_json::to_value(report)?
        }
        Commands::Recognize { images } => {
            let mut files = FileImages::new(images);
            let results = engine.recognize_sequence(&mut files);
            let rows: Vec<Value> = files
                .paths()
                .iter()
                .zip(results)
                .map(|(path, identity)| json!({ "image": path, "identity": identity }))
                .collect();
            Value::Array(rows)
        }
        Commands::Cluster { images } => {
            let decoded: Vec<DynamicImage> = images.iter().map(|path| decode_or_blank(path)).collect();
            let clusters = engine.cluster_faces(&decoded);
            let rows: Vec<Value> = images
                .iter()
                .zip(clusters)
                .map(|(path, cluster)| json!({ "image": path, "cluster": cluster }))
                .collect();
            Value::Array(rows)
        }
        Commands::Clear { context, ids } => {
            if ids.is_empty() {
                engine.clear_all_training(context.as_deref());
            } else {
                let identities = ids
                    .iter()
                    .map(|&id| known(engine, id))
                    .collect::<Result<Vec<_>>>()?;
                engine.clear_training(&identities, context.as_deref());
            }
            json!({ "cleared": true, "context": context, "ids": ids })
        }
        Commands::Check => json!({
            "integrity": engine.integrity_check(),
            "algorithm": engine.backend_identifier(),
            "identities": engine.all_identities().len(),
            "parameters": engine.parameters(),
            "recommended_image_size": engine.recommended_image_size(),
            "training_cost": engine.training_cost_hint(),
        }),
        Commands::Vacuum => {
            engine.vacuum();
            json!({ "vacuumed": true })
        }
    };
    Ok(output)
}

fn known(engine: &FaceEngine, id: i64) -> Result<Identity> {
    engine.identity(id).with_context(|| format!("no identity {id}"))
}

fn attributes(pairs: Vec<(String, String)>) -> Attributes {
    pairs.into_iter().collect()
}

/// Undecodable files become a blank image so positions stay aligned.
fn decode_or_blank(path: &Path) -> DynamicImage {
    image::open(path).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "cannot decode image");
        DynamicImage::new_luma8(0, 0)
    })
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
