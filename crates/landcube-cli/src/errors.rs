use console::style;
use landcube_core::error::LandcubeError;
use landcube_pipeline::RunReport;
use std::fmt;

/// Exit code of a run where some tiles failed or were cancelled
pub const EXIT_INCOMPLETE: i32 = 2;

/// Error with remediation suggestions, rendered on stderr
pub struct CliError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    pub help_command: Option<String>,
    pub exit_code: i32,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            help_command: None,
            exit_code: 1,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, command: impl Into<String>) -> Self {
        self.help_command = Some(command.into());
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn display(&self) {
        eprintln!("{} {}\n", style("✗").red().bold(), style(&self.message).red().bold());

        if let Some(ref context) = self.context {
            eprintln!("{}", context);
            eprintln!();
        }

        if !self.suggestions.is_empty() {
            eprintln!("{}", style("To fix this:").yellow().bold());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, suggestion);
            }
            eprintln!();
        }

        if let Some(ref help_cmd) = self.help_command {
            eprintln!("{} {}", style("Need help?").cyan(), style(help_cmd).cyan().bold());
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Create error for an unreachable PostgreSQL store
pub fn database_connection_failed(error: &str) -> CliError {
    CliError::new("Cannot connect to PostgreSQL")
        .with_context(format!("DATABASE_URL is not set or connection failed.\n\nError: {}", error))
        .with_suggestion("Set DATABASE_URL: export DATABASE_URL=\"postgresql://localhost/landcube\"")
        .with_suggestion("Or add to .landcube/config.toml:\n  database_url = \"postgresql://localhost/landcube\"")
        .with_suggestion("Or use the filesystem store: --store fs")
}

/// Create error for a run with failed or cancelled tiles
pub fn run_incomplete(report: &RunReport) -> CliError {
    let keys: Vec<String> = report.failed_keys().iter().map(|k| k.to_string()).collect();
    let mut error = CliError::new(format!(
        "{} of {} tiles did not complete",
        keys.len(),
        report.total_tiles
    ))
    .with_context(format!("Failed tiles:\n  {}", keys.join("\n  ")))
    .with_exit_code(EXIT_INCOMPLETE);

    if let Some(reason) = &report.aborted {
        error = error.with_suggestion(format!("The run was aborted: {}", reason));
    }
    if report.failures_by_kind().contains_key("DataGapError") {
        error = error.with_suggestion("Widen the time window with --from/--to to find acquisitions for gap tiles");
    }
    if report.cancelled_count() > 0 {
        error = error.with_suggestion("Re-run the command to process the cancelled tiles");
    }
    error
}

/// Create error for an unknown product
pub fn product_not_found(product: &str) -> CliError {
    CliError::new(format!("Product '{}' not found", product))
        .with_context("The data cube has no grid registered for this product.")
        .with_suggestion("Check the product name and the --data-dir / --store settings")
        .with_help("Run: landcube tiles --help")
}

/// Convert a pipeline error into a CliError with suggestions
pub fn from_landcube(error: &LandcubeError) -> CliError {
    let message = error.to_string();
    match error {
        LandcubeError::StoreUnavailable { .. } => database_connection_failed(&message),
        LandcubeError::UnknownAlgorithm { .. } | LandcubeError::InvalidHyperparameter { .. } => {
            CliError::new(message)
                .with_suggestion("List the algorithms and their parameters: landcube algorithms")
                .with_help("Run: landcube algorithms")
        }
        LandcubeError::ModelNotFound { .. } => CliError::new(message)
            .with_suggestion("List stored models: landcube models")
            .with_suggestion("Train one first: landcube train --help"),
        LandcubeError::EmptyTrainingSet { .. } => CliError::new(message)
            .with_suggestion("Import labeled polygons: landcube labels import FILE --training-set NAME")
            .with_suggestion("Check that --bbox and --bbox-crs cover the training polygons"),
        LandcubeError::SchemaMismatch { .. } => CliError::new(message)
            .with_suggestion("Use --pixels only with models trained with --mode pixel")
            .with_suggestion("Check that the product has the bands the model was trained on"),
        LandcubeError::ConfigInvalid { .. } | LandcubeError::ConfigMissing { .. } => CliError::new(message)
            .with_suggestion("Check .landcube/config.toml and LANDCUBE_* variables"),
        LandcubeError::Crs(_) => CliError::new(message)
            .with_suggestion("Give the CRS as EPSG:<code>, a PROJ string or WKT, e.g. --bbox-crs EPSG:32633"),
        LandcubeError::Cancelled => CliError::new("Interrupted").with_exit_code(130),
        _ => CliError::new(message),
    }
}

/// Convert anyhow::Error to CliError with context
pub fn from_anyhow(error: anyhow::Error) -> CliError {
    let error = match error.downcast::<CliError>() {
        Ok(cli_error) => return cli_error,
        Err(error) => error,
    };
    if let Some(landcube) = error.downcast_ref::<LandcubeError>() {
        return from_landcube(landcube);
    }

    let message = error.to_string();
    if message.contains("No such file or directory") {
        CliError::new("File not found")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check the file path and try again")
    } else if message.contains("permission denied") {
        CliError::new("Permission denied")
            .with_context(format!("Error: {}", message))
            .with_suggestion("Check file permissions")
    } else {
        CliError::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::models::TileKey;
    use landcube_pipeline::{TileFailure, TileStage};
    use std::time::Duration;

    #[test]
    fn test_incomplete_run_lists_keys() {
        let mut report = RunReport::new();
        report.add_success(TileKey::new(0, 0));
        let gap = LandcubeError::DataGap {
            product: "s2".to_string(),
            tile: "1_1".to_string(),
            reason: "no scenes".to_string(),
        };
        report.add_failure(TileFailure::new(TileKey::new(1, 1), TileStage::Fetching, &gap));
        report.finish(Duration::ZERO);

        let error = run_incomplete(&report);
        assert_eq!(error.exit_code, EXIT_INCOMPLETE);
        assert_eq!(error.message, "1 of 2 tiles did not complete");
        assert!(error.context.unwrap().contains("1_1"));
        assert_eq!(error.suggestions.len(), 1);
    }

    #[test]
    fn test_landcube_errors_keep_their_message() {
        let error = anyhow::Error::new(LandcubeError::ModelNotFound { name: "lc".to_string() });
        let cli = from_anyhow(error);
        assert!(cli.message.contains("'lc'"));
        assert!(!cli.suggestions.is_empty());
    }

    #[test]
    fn test_cli_errors_pass_through() {
        let error = anyhow::Error::new(product_not_found("s2").with_exit_code(3));
        assert_eq!(from_anyhow(error).exit_code, 3);
    }
}
