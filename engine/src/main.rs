//! Datamap CLI - Map CSV/JSON records through declarative schema documents
//!
//! # Main Commands
//!
//! ```bash
//! datamap run input.csv --schema schema.json   # Map records to JSON objects
//! datamap inspect schema.json                  # Show the compiled rule index
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! datamap parse input.csv          # Just parse the input to JSON
//! datamap operations               # Show available value operations
//! datamap example-schema           # Show an example schema document
//! ```

use clap::{ArgAction, Parser, Subcommand};
use datamapping::{
    operations_description, parse_file, transform_file, InputFormat, Record, SchemaDocument,
    TransformOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datamap")]
#[command(about = "Map nested records into typed objects with declarative schemas", long_about = None)]
struct Cli {
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map an input file through a schema document
    Run {
        /// Input CSV or JSON file
        input: PathBuf,

        /// Schema document (default: $DATAMAP_SCHEMA)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Entry schema, overriding the document's root
        #[arg(short, long)]
        root: Option<String>,

        /// Input format
        #[arg(short, long, value_enum, default_value_t = InputFormat::Auto)]
        format: InputFormat,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,

        /// Stop at the first row that fails to map
        #[arg(long)]
        fail_fast: bool,
    },

    /// Parse an input file and output JSON
    Parse {
        /// Input CSV or JSON file
        input: PathBuf,

        #[arg(short, long, value_enum, default_value_t = InputFormat::Auto)]
        format: InputFormat,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile a schema document and show its rule index
    Inspect {
        /// Schema document
        schema: PathBuf,
    },

    /// Show available value operations
    Operations,

    /// Show an example schema document
    ExampleSchema,
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run {
            input,
            schema,
            root,
            format,
            output,
            pretty,
            fail_fast,
        } => {
            let defaults = TransformOptions::from_env();
            let options = TransformOptions {
                schema_path: schema.or(defaults.schema_path),
                root: root.or(defaults.root),
                format,
                pretty,
                fail_fast,
            };
            cmd_run(&input, &options, output.as_deref())
        }

        Commands::Parse {
            input,
            format,
            output,
        } => cmd_parse(&input, format, output.as_deref()),

        Commands::Inspect { schema } => cmd_inspect(&schema),

        Commands::Operations => cmd_operations(),

        Commands::ExampleSchema => cmd_example_schema(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over the flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_run(
    input: &Path,
    options: &TransformOptions,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = transform_file(input, options)?;
    let json = result.to_json(options.pretty)?;
    write_output(&json, output)?;

    if !result.is_ok() {
        return Err(format!("{} rows failed to map", result.errors.len()).into());
    }
    Ok(())
}

fn cmd_parse(
    input: &Path,
    format: InputFormat,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Parsing {}", input.display());
    let parsed = parse_file(input, format)?;

    if let Some(delimiter) = parsed.delimiter {
        info!("Delimiter: '{}'", delimiter.escape_default());
    }
    if !parsed.headings.is_empty() {
        info!("Columns: {}", parsed.headings.join(", "));
    }
    info!("Parsed {} records", parsed.len());

    let records: Vec<serde_json::Value> = parsed
        .records
        .into_iter()
        .map(|raw| {
            raw.into_pairs()
                .into_iter()
                .map(|(k, v)| (k, v.normalize()))
                .collect::<Record>()
                .to_json()
        })
        .collect();
    let json = serde_json::to_string_pretty(&records)?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let doc = SchemaDocument::from_path(path)?;
    let compiled = doc.compile()?;

    println!("Root: {}", compiled.root().name());
    for name in compiled.registry().names() {
        let Some(schema) = compiled.schema(&name) else {
            continue;
        };
        println!();
        println!(
            "{} -> {}{}",
            schema.name(),
            schema.target_collection().map_or("(embedded)", |t| t.name()),
            if schema.is_list() { " [list]" } else { "" }
        );
        for (heading, rules) in schema.field_index() {
            for rule in rules {
                let via = rule.get_converter().map(|c| c.name()).unwrap_or("-");
                println!(
                    "  {:<20} {:<10} {} <- {} via {}",
                    heading,
                    format!("{:?}", rule.kind()),
                    rule.name(),
                    rule.get_path(),
                    via
                );
            }
        }
    }
    Ok(())
}

fn cmd_example_schema() -> Result<(), Box<dyn std::error::Error>> {
    let doc = datamapping::example_schema();
    println!("{}", doc.to_json()?);
    Ok(())
}

fn cmd_operations() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", operations_description());
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            info!("Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
