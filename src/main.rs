//! Place Clusters - clustered category layers for a map of places
//!
//! CLI commands:
//! - groups: List categories with their places
//! - features: Write per-category GeoJSON point collections
//! - icons: Fetch and decode category icons
//! - simulate: Run a scripted click session on the headless engine

mod camera;
mod config;
mod controller;
mod dispatch;
mod download;
mod engine;
mod epoch;
mod features;
mod grouping;
mod headless;
mod icons;
mod layers;
mod lifecycle;
mod logging;
mod memo;
mod places;
mod selection;
mod simulate;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::places::{CategoryId, CategoryIndex, Dataset};

#[derive(Parser)]
#[command(name = "place_clusters")]
#[command(about = "Clustered category layers for a map of places")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to map.yaml config
    #[arg(short, long, default_value = "map.yaml")]
    config: PathBuf,

    /// Dataset file (YAML or JSON), overrides DATASET
    #[arg(short, long)]
    data: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List categories with place counts
    Groups {
        /// Only this category
        #[arg(long)]
        category: Option<CategoryId>,
    },

    /// Write one GeoJSON FeatureCollection per category
    Features {
        /// Output directory
        #[arg(short, long, default_value = "data/features")]
        output: PathBuf,

        /// Only this category
        #[arg(long)]
        category: Option<CategoryId>,
    },

    /// Fetch and decode every category icon
    Icons,

    /// Run a scripted session against the headless map
    Simulate {
        /// Script file (YAML)
        script: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let secrets = config::Secrets::load();
    logging::init_logging(&secrets.log_dir)?;
    tracing::info!("Place Clusters starting up");

    let cli = Cli::parse();
    tracing::debug!("CLI args parsed: config={:?} data={:?}", cli.config, cli.data);

    let config = if cli.config.exists() {
        tracing::info!("Loading config from {:?}", cli.config);
        config::Config::load(&cli.config)?
    } else {
        tracing::warn!("Config file not found: {:?}, using defaults", cli.config);
        config::Config::default()
    };

    let data_path = cli.data.unwrap_or_else(|| PathBuf::from(&secrets.dataset));
    let dataset = Dataset::load(&data_path)?;
    tracing::info!(
        "Dataset loaded: {} categories, {} places",
        dataset.categories.len(),
        dataset.places.len()
    );

    match cli.command {
        Commands::Groups { category } => {
            list_groups(&config, &dataset, category);
        }

        Commands::Features { output, category } => {
            write_features(&config, &dataset, &output, category)?;
        }

        Commands::Icons => {
            check_icons(&config, &dataset).await;
        }

        Commands::Simulate { script } => {
            let script = simulate::Script::load(&script)?;
            let report = simulate::run(&config, dataset, &script).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// List categories that have places
fn list_groups(config: &config::Config, dataset: &Dataset, only: Option<CategoryId>) {
    let categories = CategoryIndex::new(dataset.categories.clone());
    let groups = grouping::group_by_category(&dataset.places);

    let shown: Vec<_> = groups
        .iter()
        .filter(|(id, _)| only.map_or(true, |c| c == **id))
        .collect();

    println!("Categories with places ({}):", shown.len());
    println!();

    for (&id, places) in shown {
        let name = categories
            .get(id)
            .and_then(|c| c.name.as_deref())
            .unwrap_or("(unknown)");
        let color = categories.color_or(id, &config.marker.default_color);
        println!("## {} [{}] {} places, {}", name, id, places.len(), color);
        for place in places {
            println!(
                "  - {} ({:.5}, {:.5})",
                place.name.as_deref().unwrap_or(&place.id),
                place.latitude,
                place.longitude
            );
        }
    }
}

/// Write `<output>/category-<id>.geojson` per category
fn write_features(
    config: &config::Config,
    dataset: &Dataset,
    output: &Path,
    only: Option<CategoryId>,
) -> anyhow::Result<()> {
    let categories = CategoryIndex::new(dataset.categories.clone());
    let groups = grouping::group_by_category(&dataset.places);
    let clusters = features::build_clusters(&groups, &categories, &config.marker.default_color);

    std::fs::create_dir_all(output)?;

    let selected: Vec<_> = clusters
        .iter()
        .filter(|c| only.map_or(true, |id| id == c.category))
        .collect();
    println!("Writing {} feature collections...", selected.len());

    for cluster in selected {
        let path = output.join(format!("category-{}.geojson", cluster.category));
        std::fs::write(&path, serde_json::to_string_pretty(cluster.collection.as_ref())?)?;
        println!(
            "  category {} -> {:?} ({} points, {})",
            cluster.category,
            path,
            cluster.collection.features.len(),
            cluster.color
        );
    }

    println!("Done!");
    Ok(())
}

/// Fetch every category icon and report the result
async fn check_icons(config: &config::Config, dataset: &Dataset) {
    let timeout = Duration::from_secs(config.icons.timeout_secs);
    let with_icons: Vec<_> = dataset
        .categories
        .iter()
        .filter_map(|c| c.icon.as_deref().filter(|i| !i.is_empty()).map(|i| (c.id, i)))
        .collect();

    println!("Fetching {} category icons...", with_icons.len());
    println!();

    for (id, url) in with_icons {
        match download::fetch_icon(url, timeout).await {
            Ok(icon) => println!(
                "  [OK] {}{} {}x{} ({})",
                config.icons.key_prefix, id, icon.width, icon.height, url
            ),
            Err(e) => println!("  [FAIL] {}{}: {}", config.icons.key_prefix, id, e),
        }
    }
}
