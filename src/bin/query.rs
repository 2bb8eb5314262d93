//! k2gravity-query: read-only inspection tool for gravity databases.

use clap::{Parser, Subcommand};
use k2gravity::{Client, GravityConfig, GravityDb, ListCategory, RegexFilters, RegexMatcher};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "k2gravity-query")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Query a gravity database the way the resolver does", long_about = None)]
struct Cli {
    /// Gravity database file (overrides the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every list verdict for a domain and client
    Check {
        /// Domain to look up
        domain: String,

        /// Client address
        #[arg(long, default_value = "127.0.0.1")]
        client: String,
    },

    /// Count the entries of one or all lists
    Count {
        /// List to count (all lists when omitted)
        category: Option<String>,
    },

    /// Print the entries of a list
    Dump {
        /// List to print
        category: String,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => GravityConfig::from_file(path)?,
        None => GravityConfig::default(),
    };
    if let Some(database) = cli.database {
        config.database = database;
    }

    let mut db = GravityDb::new(config);
    db.open()?;

    match cli.command {
        Commands::Check { domain, client } => check(&mut db, &domain, &client, cli.json),
        Commands::Count { category } => count(&mut db, category.as_deref(), cli.json),
        Commands::Dump { category, limit } => dump(&mut db, &category, limit, cli.json),
    }
}

fn parse_category(name: &str) -> Result<ListCategory, Box<dyn std::error::Error>> {
    ListCategory::parse(name).ok_or_else(|| format!("unknown list: {}", name).into())
}

fn check(
    db: &mut GravityDb,
    domain: &str,
    ip: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(0, ip);
    let domain = domain.trim().to_lowercase();

    let groups = db.resolve_groups(&client)?;
    let mut filters = RegexFilters::load(db)?;
    filters.enable_client(db, &client)?;

    let whitelisted = db.in_whitelist(&domain, &client, &filters);
    let blacklisted = db.in_blacklist(&domain, &client);
    let gravity = db.in_gravity(&domain, &client);
    let regex_blocked = filters.match_regex(&domain, &client, ListCategory::RegexBlack);
    let audited = db.in_auditlist(&domain);

    if json {
        let groups: Vec<i64> = groups.iter().collect();
        let output = json!({
            "domain": domain,
            "client": client.ip,
            "groups": groups,
            "whitelist": whitelisted,
            "blacklist": blacklisted,
            "regex_blacklist": regex_blocked,
            "gravity": gravity,
            "audit": audited,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Domain:          {}", domain);
    println!("Client:          {} (groups {})", client.ip, groups);
    println!("Whitelist:       {}", whitelisted);
    println!("Blacklist:       {}", blacklisted);
    match regex_blocked {
        Some(id) => println!("Regex blacklist: true (filter {})", id),
        None => println!("Regex blacklist: false"),
    }
    println!("Gravity:         {}", gravity);
    println!("Audited:         {}", audited);
    Ok(())
}

fn count(
    db: &mut GravityDb,
    category: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let categories = match category {
        Some(name) => vec![parse_category(name)?],
        None => ListCategory::ALL.to_vec(),
    };

    let mut counts = serde_json::Map::new();
    for category in categories {
        let n = db.count(category);
        if json {
            counts.insert(category.as_str().to_string(), json!(n));
        } else {
            match n {
                Some(n) => println!("{:<16} {}", category, n),
                None => println!("{:<16} unavailable", category),
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    }
    Ok(())
}

fn dump(
    db: &mut GravityDb,
    category: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let category = parse_category(category)?;
    let mut scan = db.open_scan(category)?;
    let records = scan.records().take(limit.unwrap_or(usize::MAX));

    if json {
        let entries: Vec<_> = records
            .map(|r| json!({ "id": r.row_id, "domain": r.domain }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for record in records {
            println!("{}\t{}", record.row_id, record.domain);
        }
    }
    Ok(())
}
