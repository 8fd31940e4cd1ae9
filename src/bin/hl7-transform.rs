//! hl7-transform CLI - run catalogs against HL7v2 messages from the command line
//!
//! The catalog path defaults to `HL7_TRANSFORM_CONFIG`, which may also be set
//! in a `.env` file.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hl7_transform::convert::{
    EncounterCreator, Hl7ToFhirConfiguration, MessageHeaderCreator, PatientCreator,
};
use hl7_transform::{
    CatalogConfig, Catalogs, ComponentRegistry, Converter, Direction, FailurePolicy, FilterPhase,
    Message, MessageTypePattern, TransformationEngine,
};

#[derive(Parser)]
#[command(name = "hl7-transform")]
#[command(version, about = "Rule-gated HL7v2 transformation and filtering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a message and print the result
    Transform {
        /// Catalog YAML file
        #[arg(short, long, env = "HL7_TRANSFORM_CONFIG")]
        config: PathBuf,

        /// Flow direction (ingress or egress)
        #[arg(short, long, default_value = "ingress")]
        direction: Direction,

        /// Forward the original message when any step fails
        #[arg(long)]
        forward_original: bool,

        /// Message file, or stdin when omitted
        input: Option<PathBuf>,
    },

    /// Evaluate the filter for one phase and print allow or deny
    Filter {
        /// Catalog YAML file
        #[arg(short, long, env = "HL7_TRANSFORM_CONFIG")]
        config: PathBuf,

        /// Filter phase (pre or post)
        #[arg(short, long, default_value = "pre")]
        phase: FilterPhase,

        /// Message file, or stdin when omitted
        input: Option<PathBuf>,
    },

    /// Build a catalog and summarize what it registers
    Validate {
        /// Catalog YAML file
        #[arg(short, long, env = "HL7_TRANSFORM_CONFIG")]
        config: PathBuf,
    },

    /// Convert a message to a FHIR bundle with the built-in creators
    ToFhir {
        /// Message file, or stdin when omitted
        input: Option<PathBuf>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Transform {
            config,
            direction,
            forward_original,
            input,
        } => transform(&config, direction, forward_original, input.as_deref()),
        Commands::Filter { config, phase, input } => filter(&config, phase, input.as_deref()),
        Commands::Validate { config } => validate(&config),
        Commands::ToFhir { input } => to_fhir(input.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_catalogs(config: &Path) -> Result<Catalogs, String> {
    let catalog = CatalogConfig::load_from_file(config).map_err(|e| e.to_string())?;
    catalog
        .build(&ComponentRegistry::with_builtins())
        .map_err(|e| format!("Invalid catalog {}: {}", config.display(), e))
}

fn read_message(input: Option<&Path>) -> Result<Message, String> {
    let text = match input {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?,
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            text
        }
    };

    Message::parse(&text).map_err(|e| format!("Failed to parse message: {}", e))
}

fn transform(
    config: &Path,
    direction: Direction,
    forward_original: bool,
    input: Option<&Path>,
) -> Result<(), String> {
    let engine = TransformationEngine::new(load_catalogs(config)?);
    let message = read_message(input)?;

    let policy = if forward_original {
        FailurePolicy::ForwardOriginal
    } else {
        FailurePolicy::ForwardPartial
    };
    let outcome = engine.transform_with_policy(message, direction, policy);

    for report in outcome.failures() {
        if let Some(error) = report.error() {
            eprintln!("step '{}' failed: {}", report.step, error);
        }
    }

    match outcome.denied_at {
        Some(phase) => {
            eprintln!("Message suppressed by the {} filter", phase);
        }
        None => {
            // ER7 uses carriage returns; print one segment per line instead
            println!("{}", outcome.message.encode().replace('\r', "\n"));
        }
    }

    Ok(())
}

fn filter(config: &Path, phase: FilterPhase, input: Option<&Path>) -> Result<(), String> {
    let engine = TransformationEngine::new(load_catalogs(config)?);
    let message = read_message(input)?;

    if engine.filter(&message, phase) {
        println!("allow");
    } else {
        println!("deny");
    }
    Ok(())
}

fn validate(config: &Path) -> Result<(), String> {
    println!("🔍 Validating {}...", config.display());
    let catalogs = load_catalogs(config)?;

    let transformations = catalogs.transformations.catalog().entries();
    println!("  ✓ {} transformation entries", transformations.len());
    for (pattern, direction, name) in transformations {
        println!("    {pattern:<10} {direction:<8} {name}");
    }

    let filters = catalogs.filters.conditions().entries();
    println!("  ✓ {} filter entries", filters.len());
    for (pattern, phase, name) in filters {
        println!("    {pattern:<10} {phase:<8} {name}");
    }

    let to_fhir = catalogs.conversions.to_fhir_catalog().len();
    let to_hl7 = catalogs.conversions.to_hl7_catalog().len();
    println!("  ✓ {} HL7 to FHIR and {} FHIR to HL7 entries", to_fhir, to_hl7);

    println!("\n✅ Catalog is valid");
    Ok(())
}

fn to_fhir(input: Option<&Path>) -> Result<(), String> {
    let message = read_message(input)?;
    let message_type = message.message_type();
    let pattern = MessageTypePattern::parse(&message_type).map_err(|e| e.to_string())?;

    let mut builder = Converter::builder();
    builder
        .register_to_fhir(
            Hl7ToFhirConfiguration::new("builtin")
                .message_type(pattern)
                .creator(Arc::new(MessageHeaderCreator))
                .creator(Arc::new(PatientCreator))
                .creator(Arc::new(EncounterCreator)),
        )
        .map_err(|e| e.to_string())?;

    let bundle = builder.build().to_fhir(&message).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&bundle).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}
