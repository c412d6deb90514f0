use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use cfstats::{CfApi, CfStats, ClientRequest, Database, Selection, SelectionMode, SummaryReport};

#[derive(Parser)]
#[command(name = "cfstats", about = "Codeforces statistics warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.cfstats/cfstats.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Codeforces API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Problem catalog URL
    #[arg(long)]
    catalog_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the catalog and replace the local copy
    Sync,
    /// Run the sync service: scheduled refreshes plus a line-delimited
    /// JSON request channel on stdin/stdout
    Serve,
    /// Fetch a user's rating history and submissions
    User {
        /// Codeforces handle
        handle: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute per-division contest summaries for a user
    Summary {
        /// Codeforces handle
        handle: String,
        /// Selection mode: count or months
        #[arg(long, default_value = "count")]
        mode: String,
        /// Contests (or months) per division
        #[arg(long, default_value = "10")]
        k: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show warehouse status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete cache entries older than the TTL
    Sweep {
        /// Age threshold in hours
        #[arg(long, default_value = "24")]
        ttl_hours: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };
    // Catalog URL precedence: flag, then app_config, then the default.
    let catalog_url = match cli.catalog_url {
        Some(url) => url,
        None => db
            .reader()
            .call(|conn| {
                cfstats::storage::repository::get_config(conn, cfstats::CONFIG_CATALOG_URL)
            })
            .await?
            .unwrap_or_else(|| cfstats::api::DEFAULT_CATALOG_URL.to_string()),
    };
    let api = CfApi::with_urls(
        cli.api_base
            .as_deref()
            .unwrap_or(cfstats::api::DEFAULT_API_BASE),
        catalog_url,
    );
    let app = CfStats::new(db, api);

    match cli.command {
        Commands::Sync => {
            app.refresh_dataset().await?;
            println!("Catalog refreshed.");
        }
        Commands::Serve => {
            serve(&app).await?;
        }
        Commands::User { handle, json } => {
            let data = app.user_data(&handle).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("User: {handle}");
                println!("  Rated contests: {}", data.rating_history.len());
                if let Some(latest) = data.rating_history.last() {
                    if let Some(rating) = latest.new_rating {
                        println!("  Current rating: {rating}");
                    }
                }
                println!("  Submissions:    {}", data.submissions.len());
            }
        }
        Commands::Summary {
            handle,
            mode,
            k,
            json,
        } => {
            let mode = match mode.as_str() {
                "count" => SelectionMode::Count,
                "months" => SelectionMode::Months,
                other => anyhow::bail!("Unknown selection mode: {other}. Use: count, months"),
            };
            let report = app.summarize(&handle, &Selection { mode, k }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&handle, &report);
            }
        }
        Commands::Config { action } => {
            handle_config(&app, action).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Sweep { ttl_hours } => {
                let ttl = std::time::Duration::from_secs(ttl_hours * 3600);
                let removed = app.sweep_cache(ttl).await?;
                println!("Removed {removed} expired cache entries.");
            }
        },
        Commands::Status => {
            print_status(&app).await?;
        }
    }

    Ok(())
}

/// Bootstrap the service, arm the daily scheduler, and bridge stdin
/// lines (JSON requests) to stdout lines (JSON messages). Pushed state
/// broadcasts and request responses share the output stream.
async fn serve(app: &CfStats) -> anyhow::Result<()> {
    let service = app.sync_service();
    // Bootstrap first: with the data_ready marker set this promotes
    // Initial → Ready, so the connect below does not spawn a refresh.
    service.bootstrap().await?;
    let (client_id, mut rx) = service.connect();
    let scheduler = service.clone();
    tokio::spawn(scheduler.run_scheduler());

    let pusher = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("could not serialize push message: {e}"),
            }
        }
    });

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ClientRequest>(&line) {
            Ok(request) => service.handle_request(request).await,
            Err(e) => cfstats::ServerMessage::Failure {
                error: format!("bad request: {e}"),
            },
        };
        println!("{}", serde_json::to_string(&response)?);
    }

    service.disconnect(client_id);
    pusher.abort();
    Ok(())
}

async fn handle_config(app: &CfStats, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match app.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            app.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = app.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn print_status(app: &CfStats) -> anyhow::Result<()> {
    let stats = app
        .db()
        .reader()
        .call(|conn| {
            let problems: i64 =
                conn.query_row("SELECT COUNT(*) FROM problems", [], |row| row.get(0))?;
            let contests: i64 =
                conn.query_row("SELECT COUNT(*) FROM contests", [], |row| row.get(0))?;
            let sheets: i64 =
                conn.query_row("SELECT COUNT(*) FROM sheets", [], |row| row.get(0))?;
            let cached: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            Ok::<_, rusqlite::Error>((problems, contests, sheets, cached))
        })
        .await?;
    let (problems, contests, sheets, cached) = stats;

    println!("Warehouse Status");
    println!("  Problems:      {problems}");
    println!("  Contests:      {contests}");
    println!("  Sheets:        {sheets}");
    println!("  Cache entries: {cached}");
    println!(
        "  Data ready:    {}",
        app.config_get(cfstats::sync::CONFIG_DATA_READY)
            .await?
            .as_deref()
            .unwrap_or("no")
    );
    Ok(())
}

fn print_summary(handle: &str, report: &SummaryReport) {
    println!(
        "Summary for {handle} ({} contests considered)",
        report.contests_considered
    );
    if report.unknown_meta_count > 0 {
        println!(
            "  ({} contests with incomplete metadata)",
            report.unknown_meta_count
        );
    }

    for row in &report.rows {
        println!("\n{} ({} contests)", row.division, row.contests);
        println!("  Avg attempted:  {:.2}", row.avg_attempted);
        println!("  Avg solved:     {:.2}", row.avg_solved);
        println!("  Avg Δ rating:   {:+.1}", row.avg_rating_delta);
        match row.avg_rank {
            Some(rank) => println!("  Avg rank:       {rank:.0}"),
            None => println!("  Avg rank:       —"),
        }
        match row.attempt_rate_pct {
            Some(pct) => println!("  Attempt rate:   {pct:.1}%"),
            None => println!("  Attempt rate:   —"),
        }
        match row.acceptance_rate_pct {
            Some(pct) => println!("  Accept rate:    {pct:.1}%"),
            None => println!("  Accept rate:    —"),
        }

        if let Some(letters) = report.letters_by_division.get(&row.division) {
            println!("  Letter  In  Att  Acc   Avg solve   Avg cumulative");
            for l in letters {
                let fmt_time = |t: Option<f64>| match t {
                    Some(secs) => format!("{:>3}:{:02}", secs as i64 / 60, secs as i64 % 60),
                    None => "     —".to_string(),
                };
                println!(
                    "  {:>6}  {:>2}  {:>3}  {:>3}   {:>9}   {:>14}",
                    l.letter,
                    l.contests_with_letter,
                    l.attempt_count,
                    l.accept_count,
                    fmt_time(l.indiv_time_avg_secs),
                    fmt_time(l.cumul_time_avg_secs),
                );
            }
        }
    }
}
