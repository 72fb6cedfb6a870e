use std::error;
use std::fs;
use std::path;
use std::process;
use std::str::FromStr;
use std::sync;

use clap::{Parser, Subcommand};
use itertools::Itertools;

use mdedit::config;
use mdedit::logic::summary;
use mdedit::model::document;
use mdedit::model::schema;
use mdedit::serialization;

#[derive(Parser)]
#[command(name = "mdedit")]
#[command(about = "Inspect, check and normalise SAML metadata documents.", long_about = None)]
struct Cli {
    /// Log at debug level regardless of the configured level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the one in the XDG config directory.
    #[arg(long, global = true, env = "MDEDIT_CONFIG")]
    config: Option<path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate every element and report problems.
    Check {
        file: path::PathBuf,
    },

    /// Parse and print the document in normal form.
    Format {
        file: path::PathBuf,

        /// Spaces per nesting level; 0 prints a single line.
        #[arg(long)]
        indent: Option<usize>,

        /// Fail instead of printing a document with invalid elements.
        #[arg(long)]
        strict: bool,
    },

    /// Print who the entity is and how to reach it.
    Summary {
        file: path::PathBuf,
    },

    /// List the known element types, or describe one of them.
    Schema {
        tag: Option<String>,
    },
}

fn setup_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("could not install log subscriber: {}", e);
    }
}

fn main() -> process::ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mdedit: {}", e);
            process::ExitCode::from(2)
        },
    }
}

fn run(cli: Cli) -> Result<process::ExitCode, Box<dyn error::Error>> {
    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::from_str(&config.log_level).unwrap_or(tracing::Level::INFO)
    };
    setup_tracing(level);

    let registry = schema::Registry::builtin();

    match cli.command {
        Command::Check { file } => check(&registry, &file),
        Command::Format { file, indent, strict } => {
            let document = load(&registry, &file)?;

            let mut serializer = serialization::Serializer::from_config(&config);
            if let Some(indent) = indent {
                serializer.indent = indent;
            }
            serializer.strict |= strict;

            let text = serializer.to_text(&document, document.root())?;
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }

            Ok(process::ExitCode::SUCCESS)
        },
        Command::Summary { file } => {
            let document = load(&registry, &file)?;
            print_summary(&summary::Summary::of(&document)?);
            Ok(process::ExitCode::SUCCESS)
        },
        Command::Schema { tag } => {
            match tag {
                Some(tag) => describe(registry.schema_for(&tag)?),
                None => {
                    for schema in registry.schemas() {
                        println!("{:<40} {}", schema.tag, schema.display_name);
                    }
                },
            }

            Ok(process::ExitCode::SUCCESS)
        },
    }
}

fn load(registry: &sync::Arc<schema::Registry>, file: &path::Path) -> Result<document::Document, Box<dyn error::Error>> {
    let source = fs::read_to_string(file)
        .map_err(|e| format!("could not read {}: {}", file.display(), e))?;

    Ok(serialization::from_text(registry, &source)?)
}

fn check(registry: &sync::Arc<schema::Registry>, file: &path::Path) -> Result<process::ExitCode, Box<dyn error::Error>> {
    let mut document = load(registry, file)?;
    let root = document.root();

    let reports = document.validate_tree(root)?;
    let mut problems = 0;

    for (id, report) in reports.iter().filter(|(_, report)| !report.is_valid()) {
        let path = element_path(&document, *id);
        for (field, message) in report.iter() {
            println!("{}: {}: {}", path, field, message);
            problems += 1;
        }
    }

    if problems == 0 {
        println!("{}: {} elements, no problems", file.display(), reports.len());
        Ok(process::ExitCode::SUCCESS)
    } else {
        println!("{}: {} problems", file.display(), problems);
        Ok(process::ExitCode::FAILURE)
    }
}

/// `/md:EntityDescriptor/md:ContactPerson[2]`-style location of `id`.
fn element_path(document: &document::Document, id: document::NodeId) -> String {
    let mut steps = Vec::new();
    let mut current = Some(id);

    while let Some(id) = current {
        let Some(node) = document.get(id) else {
            break;
        };

        let step = match node.parent() {
            Some(parent) => {
                let siblings = document.children_tagged(parent, node.tag());
                match siblings.iter().position(|sibling| *sibling == id) {
                    Some(index) if siblings.len() > 1 => format!("{}[{}]", node.tag(), index + 1),
                    _ => node.tag().to_string(),
                }
            },
            None => node.tag().to_string(),
        };

        steps.push(step);
        current = node.parent();
    }

    steps.reverse();
    format!("/{}", steps.join("/"))
}

fn describe(schema: &schema::NodeSchema) {
    println!("{} ({})", schema.tag, schema.display_name);

    if !schema.attributes.is_empty() {
        println!("attributes:");
        for attr in &schema.attributes {
            let mut notes = Vec::new();
            if attr.required {
                notes.push("required".to_string());
            }
            if let Some(format) = attr.format {
                notes.push(format.to_string());
            }
            if let Some(choices) = &attr.allowed_values {
                notes.push(format!("one of {}", choices.iter().map(|c| &c.value).join(", ")));
            }
            if !attr.default_value.is_empty() {
                notes.push(format!("default {}", attr.default_value));
            }

            println!("  {:<32} {} [{}]", attr.name, attr.display_name, notes.join("; "));
        }
    }

    if let Some(text) = &schema.text {
        match (text.required, text.format) {
            (true, Some(format)) => println!("text: required, {}", format),
            (true, None) => println!("text: required"),
            (false, Some(format)) => println!("text: {}", format),
            (false, None) => println!("text: optional"),
        }
    }

    if !schema.child_slots.is_empty() {
        println!("children:");
        for slot in &schema.child_slots {
            println!("  {:<32} {} (at least {})", slot.tag, slot.cardinality, slot.min_occurs);
        }
    }
}

fn print_summary(summary: &summary::Summary) {
    println!("entity:       {}", summary.entity_id);
    println!("role:         {}", summary.role);

    if let Some(valid_until) = summary.valid_until {
        let expired = if summary.is_expired(chrono::Utc::now()) { " (expired)" } else { "" };
        println!("valid until:  {}{}", valid_until.format("%Y-%m-%d %H:%M:%S UTC"), expired);
    }
    if let Some(name) = summary.organization_name() {
        println!("organization: {}", name);
    }
    if let Some(name) = &summary.display_name {
        println!("display name: {}", name);
    }
    if let Some(description) = &summary.description {
        println!("description:  {}", description);
    }
    if let Some(hint) = &summary.geolocation_hint {
        println!("location:     {}, {}", hint.latitude, hint.longitude);
    }
    println!("refreshable:  {}", if summary.is_metarefreshable() { "yes" } else { "no" });

    for endpoint in &summary.endpoints {
        println!("endpoint:     {} {} ({})", endpoint.kind, endpoint.location, endpoint.binding);
    }
    for cert in &summary.certificates {
        println!("certificate:  {}, {} characters", cert.key_use, cert.text.len());
    }
    for contact in &summary.contacts {
        let name = [&contact.given_name, &contact.sur_name, &contact.company]
            .into_iter()
            .flatten()
            .join(" ");
        println!("contact:      {} {} <{}>", contact.contact_type, name, contact.emails.join(", "));
    }
    for attr in &summary.attributes {
        println!("attribute:    {} = {}", attr.name, attr.values.join(", "));
    }
}
