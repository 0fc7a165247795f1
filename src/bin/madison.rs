use clap::{Parser, ValueEnum};
use colored::Colorize;
use madison_mirror::models::PackageRecord;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BIN_NAME: &str = env!("CARGO_BIN_NAME");

#[derive(Parser, Debug)]
#[command(name = BIN_NAME)]
#[command(about = "Query a madison-mirror server for package versions", long_about = None)]
#[command(version = VERSION)]
struct Args {
    /// Binary package name(s)
    #[arg(required = true)]
    packages: Vec<String>,

    /// Server URL
    #[arg(
        short,
        long,
        env = "MADISON_URL",
        default_value = "http://localhost:8433"
    )]
    url: String,

    /// Only show these pockets (repeatable)
    #[arg(short, long)]
    suite: Vec<String>,

    /// Only show these architectures (repeatable)
    #[arg(short, long)]
    arch: Vec<String>,

    /// Output raw records as JSON
    #[arg(short = 'j', long)]
    json: bool,

    /// Color output mode (also respects NO_COLOR and FORCE_COLOR env vars)
    #[arg(long, visible_alias = "colour", value_enum, default_value = "auto")]
    color: ColorMode,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

/// One output line: every architecture of a (archive, package, version, pocket, component).
#[derive(Debug, PartialEq, Eq)]
struct Row {
    archive: String,
    package: String,
    version: String,
    pocket: String,
    component: String,
    architectures: Vec<String>,
}

impl Row {
    fn suite(&self) -> String {
        if self.component == "main" {
            self.pocket.clone()
        } else {
            format!("{}/{}", self.pocket, self.component)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    configure_colors(args.color);

    let client = reqwest::Client::new();
    let base_url = args.url.trim_end_matches('/');

    let mut records = Vec::new();
    for package in &args.packages {
        match lookup(&client, base_url, package).await {
            Ok(found) => records.extend(found),
            Err(e) => {
                tracing::error!(package, error = %e, "Lookup failed");
                process::exit(1);
            }
        }
    }

    let records = filter_records(records, &args.suite, &args.arch);

    if args.json {
        match serde_json::to_string_pretty(&records) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize records to JSON");
                process::exit(1);
            }
        }
        return;
    }

    print_rows(&group_rows(&records));
}

async fn lookup(
    client: &reqwest::Client,
    base_url: &str,
    package: &str,
) -> Result<Vec<PackageRecord>, Box<dyn std::error::Error>> {
    let mut url = reqwest::Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| format!("{base_url} cannot be a base URL"))?
        .pop_if_empty()
        .push(package);

    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("HTTP {status}: {body}").into());
    }

    Ok(response.json::<Vec<PackageRecord>>().await?)
}

fn filter_records(records: Vec<PackageRecord>, suites: &[String], archs: &[String]) -> Vec<PackageRecord> {
    records
        .into_iter()
        .filter(|r| suites.is_empty() || suites.contains(&r.pocket))
        .filter(|r| archs.is_empty() || archs.contains(&r.architecture))
        .collect()
}

/// Collapse records into rows, keeping the server's order of first appearance.
fn group_rows(records: &[PackageRecord]) -> Vec<Row> {
    let mut rows: Vec<Row> = Vec::new();
    for record in records {
        let existing = rows.iter_mut().find(|row| {
            row.archive == record.archive
                && row.package == record.package
                && row.version == record.version
                && row.pocket == record.pocket
                && row.component == record.component
        });

        match existing {
            Some(row) => {
                if !row.architectures.contains(&record.architecture) {
                    row.architectures.push(record.architecture.clone());
                }
            }
            None => rows.push(Row {
                archive: record.archive.clone(),
                package: record.package.clone(),
                version: record.version.clone(),
                pocket: record.pocket.clone(),
                component: record.component.clone(),
                architectures: vec![record.architecture.clone()],
            }),
        }
    }
    rows
}

fn print_rows(rows: &[Row]) {
    if rows.is_empty() {
        eprintln!("{}", "No packages found.".yellow());
        return;
    }

    let package_width = rows.iter().map(|r| r.package.len()).max().unwrap_or(0);
    let version_width = rows.iter().map(|r| r.version.len()).max().unwrap_or(0);
    let suite_width = rows.iter().map(|r| r.suite().len()).max().unwrap_or(0);

    for row in rows {
        // Pad before colouring so escape codes don't skew the columns
        println!(
            " {} | {} | {} | {}",
            format!("{:package_width$}", row.package).green(),
            format!("{:version_width$}", row.version).bold(),
            format!("{:suite_width$}", row.suite()).cyan(),
            row.architectures.join(", ")
        );
    }
}

fn configure_colors(mode: ColorMode) {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
        return;
    }
    if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
        return;
    }

    match mode {
        ColorMode::Auto => {}
        ColorMode::Always => colored::control::set_override(true),
        ColorMode::Never => colored::control::set_override(false),
    }
}
