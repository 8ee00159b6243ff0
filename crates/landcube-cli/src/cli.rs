use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use landcube_core::config::StoreKind;
use std::path::PathBuf;

/// Landcube - Land-cover classification over satellite data cubes
#[derive(Parser, Debug)]
#[command(name = "landcube")]
#[command(about = "Tiled segmentation, feature extraction and land-cover classification", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .landcube/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Storage backend to use
    #[arg(long, global = true)]
    pub store: Option<StoreBackend>,

    /// Number of tiles processed concurrently
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Memory budget of one tile in MiB
    #[arg(long, global = true, value_name = "MB")]
    pub tile_memory_mb: Option<u64>,

    /// Root of the filesystem cube and store
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreBackend {
    /// JSON and GeoJSON files under the data directory
    Fs,
    /// PostgreSQL metadata store (DATABASE_URL or LANDCUBE_DATABASE_URL)
    Postgres,
    /// In-memory storage, lost when the command exits
    Memory,
}

impl From<StoreBackend> for StoreKind {
    fn from(backend: StoreBackend) -> Self {
        match backend {
            StoreBackend::Fs => StoreKind::Fs,
            StoreBackend::Postgres => StoreKind::Postgres,
            StoreBackend::Memory => StoreKind::Memory,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classifier on the labeled polygons of a region
    Train(TrainArgs),

    /// Classify a region with a stored model
    Predict(PredictArgs),

    /// Segment a region into polygons
    Segment(SegmentArgs),

    /// List the tiles a query would be split into
    Tiles(TilesArgs),

    /// List the registered classifiers and segmenters
    Algorithms,

    /// List stored models
    Models,

    /// Manage training labels
    Labels(LabelsArgs),
}

/// Region and time window shared by every tiled command
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Data cube product to read
    #[arg(long)]
    pub product: String,

    /// Region bounds
    #[arg(
        long,
        num_args = 4,
        required = true,
        allow_negative_numbers = true,
        value_names = ["XMIN", "YMIN", "XMAX", "YMAX"]
    )]
    pub bbox: Vec<f64>,

    /// CRS of the bounds
    #[arg(long, default_value = "EPSG:4326")]
    pub bbox_crs: String,

    /// First acquisition date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "to")]
    pub from: Option<NaiveDate>,

    /// Last acquisition date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", requires = "from")]
    pub to: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Name the model is stored under
    #[arg(long)]
    pub name: String,

    /// Training set holding the labeled polygons
    #[arg(long)]
    pub training_set: String,

    /// Classifier family (see `landcube algorithms`)
    #[arg(long, default_value = "rf")]
    pub algorithm: String,

    /// Hyperparameter assignment, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Feature extraction mode (zonal or pixel)
    #[arg(long, default_value = "zonal")]
    pub mode: String,

    /// Comma separated zonal statistics (defaults to the configured list)
    #[arg(long)]
    pub stats: Option<String>,

    /// Polygon attribute one-hot encoded as a feature, repeatable
    #[arg(long = "categorical", value_name = "ATTRIBUTE")]
    pub categorical: Vec<String>,

    /// Temporal composite applied before extraction (mean, median, first, last)
    #[arg(long)]
    pub recipe: Option<String>,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Stored model to classify with
    #[arg(long)]
    pub model: String,

    /// Classify the segments of a stored segmentation
    #[arg(long, conflicts_with_all = ["pixels", "algorithm"])]
    pub segmentation: Option<String>,

    /// Classify every pixel (models trained in pixel mode)
    #[arg(long)]
    pub pixels: bool,

    /// Segmenter used to build objects on the fly
    #[arg(long, default_value = "bis")]
    pub algorithm: String,

    /// Segmenter parameter assignment, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Bands to segment on (defaults to all)
    #[arg(long, value_delimiter = ',')]
    pub bands: Vec<String>,

    /// Name the results are saved under (defaults to the model name)
    #[arg(long)]
    pub output: Option<String>,
}

#[derive(Args, Debug)]
pub struct SegmentArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Name the segmentation is stored under
    #[arg(long)]
    pub name: String,

    /// Segmenter family (see `landcube algorithms`)
    #[arg(long, default_value = "slic")]
    pub algorithm: String,

    /// Parameter assignment, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Bands to segment on (defaults to all)
    #[arg(long, value_delimiter = ',')]
    pub bands: Vec<String>,

    /// Acquisition year recorded with the result (defaults to the --from year)
    #[arg(long)]
    pub year: Option<i32>,

    /// CRS the polygons are stored in (defaults to the grid CRS)
    #[arg(long)]
    pub crs_out: Option<String>,
}

#[derive(Args, Debug)]
pub struct TilesArgs {
    #[command(flatten)]
    pub query: QueryArgs,
}

#[derive(Args, Debug)]
pub struct LabelsArgs {
    #[command(subcommand)]
    pub command: LabelsCommand,
}

#[derive(Subcommand, Debug)]
pub enum LabelsCommand {
    /// Import labeled polygons from a GeoJSON file
    Import(ImportArgs),
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// GeoJSON FeatureCollection of polygons
    pub path: PathBuf,

    /// Training set the polygons are stored under (replaces its contents)
    #[arg(long)]
    pub training_set: String,

    /// Property holding the class code (class_code is always recognised)
    #[arg(long)]
    pub class_attribute: Option<String>,
}
