use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use callintel::date_util::{parse_period_key, today_key};
use callintel::profile::types::AccountProfile;
use callintel::rollup::types::Ticket;
use callintel::{CallIntel, Database, FallbackStore, FileStore, ProcessOutcome, Settings, Store};

#[derive(Parser)]
#[command(name = "callintel", about = "Support-call intelligence: account health, issue tracking and tickets")]
struct Cli {
    /// Database path (default: ~/.callintel/callintel.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for the file store used when the database fails
    /// (overrides the fallback_dir setting)
    #[arg(long)]
    fallback_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess transcript files (or every *.json in a directory) and update profiles
    Process {
        /// Transcript files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Aggregate the affected periods when done
        #[arg(long)]
        aggregate: bool,
    },
    /// Poll a directory for new transcripts and process them as they arrive
    Watch {
        /// Directory to watch
        dir: PathBuf,
    },
    /// Build the period summary and tickets
    Aggregate {
        /// Period key (YYYY-MM-DD or "today")
        #[arg(long)]
        period: Option<String>,
    },
    /// Inspect account profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Inspect period summaries
    Summary {
        #[command(subcommand)]
        action: SummaryAction,
    },
    /// Show the tickets for a period
    Tickets {
        /// Period key (YYYY-MM-DD or "today")
        #[arg(long)]
        period: Option<String>,
        /// Show one ticket in full
        #[arg(long)]
        id: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show store statistics
    Status,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Show one account's profile
    Show { account_id: String },
    /// List accounts
    List {
        /// Only accounts flagged for attention
        #[arg(long)]
        attention: bool,
    },
    /// Print the context the next assessment for this account would receive
    Context { account_id: String },
}

#[derive(Subcommand)]
enum SummaryAction {
    /// Show one period's summary
    Show {
        /// Period key (YYYY-MM-DD or "today")
        #[arg(long)]
        period: Option<String>,
    },
    /// List summarized periods, newest first
    List,
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

    // Config and status talk to the database directly.
    let command = match cli.command {
        Commands::Config { action } => return handle_config(&db, action).await,
        Commands::Status => return print_status(&db).await,
        other => other,
    };

    let settings = Settings::load(&db).await?;
    let store: Arc<dyn Store> = match cli.fallback_dir.clone().or(settings.fallback_dir.clone()) {
        Some(dir) => {
            log::info!("File fallback enabled at {}", dir.display());
            Arc::new(FallbackStore::new(db.clone(), FileStore::new(dir)))
        }
        None => Arc::new(db.clone()),
    };
    let engine = CallIntel::new(store).with_threshold(settings.aggregation_threshold);

    match command {
        Commands::Process { paths, aggregate } => {
            let engine = with_assessor(engine, &settings).await?;
            process_paths(engine, &paths, aggregate).await?;
        }
        Commands::Watch { dir } => {
            let engine = with_assessor(engine, &settings).await?;
            watch(engine, &dir, &settings).await?;
        }
        Commands::Aggregate { period } => {
            let period = resolve_period(period)?;
            match engine.run_aggregation(&period).await? {
                Some(rollup) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&rollup.summary)?);
                }
                Some(rollup) => {
                    println!(
                        "{period}: {} calls, {} issues, {} tickets",
                        rollup.summary.total_calls,
                        rollup.summary.total_issues,
                        rollup.tickets.len()
                    );
                    print_ticket_table(&rollup.tickets);
                }
                None => println!("No assessments for {period}."),
            }
        }
        Commands::Profile { action } => handle_profile(&engine, action, cli.json).await?,
        Commands::Summary { action } => handle_summary(&engine, action, cli.json).await?,
        Commands::Tickets { period, id } => {
            if let Some(id) = id {
                match engine.ticket(&id).await? {
                    Some(t) if cli.json => println!("{}", serde_json::to_string_pretty(&t)?),
                    Some(t) => print_ticket(&t),
                    None => anyhow::bail!("ticket {id} not found"),
                }
            } else {
                let period = resolve_period(period)?;
                let tickets = engine.tickets(&period).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&tickets)?);
                } else if tickets.is_empty() {
                    println!("No tickets for {period}.");
                } else {
                    print_ticket_table(&tickets);
                }
            }
        }
        Commands::Config { .. } | Commands::Status => {}
    }
    Ok(())
}

fn resolve_period(period: Option<String>) -> anyhow::Result<String> {
    Ok(match period {
        Some(p) => parse_period_key(&p)?,
        None => today_key(),
    })
}

async fn with_assessor(engine: CallIntel, settings: &Settings) -> anyhow::Result<CallIntel> {
    let assessor = callintel::llm::create_assessor(settings).await?;
    Ok(engine.with_assessor(Arc::new(assessor)))
}

fn expand_paths(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(callintel::ingest::transcript_files(path)?);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

async fn process_paths(mut engine: CallIntel, paths: &[PathBuf], aggregate: bool) -> anyhow::Result<()> {
    let files = expand_paths(paths)?;
    let worker = engine.start_aggregation_worker();

    let total = files.len();
    let (mut done, mut skipped, mut failed) = (0, 0, 0);
    let mut periods = HashSet::new();
    for (i, path) in files.iter().enumerate() {
        eprintln!("[{}/{}] {}", i + 1, total, path.display());
        match engine.process_file(path).await {
            Ok(ProcessOutcome::Processed(call)) => {
                let status = &call.profile.current_status;
                eprintln!(
                    "  {} issues; {} health {} ({}){}",
                    call.assessment.issues.len(),
                    call.profile.account_id,
                    status.health_score,
                    status.health_label,
                    if call.assessment.is_degraded() { "; degraded" } else { "" }
                );
                periods.insert(callintel::date_util::period_key_for(call.assessment.timestamp));
                done += 1;
            }
            Ok(ProcessOutcome::AlreadyProcessed) => {
                eprintln!("  already processed");
                skipped += 1;
            }
            Err(e) => {
                log::error!("Failed to process {}: {e}", path.display());
                failed += 1;
            }
        }
    }

    engine.stop_aggregation_worker();
    worker.await?;

    if aggregate {
        let mut periods: Vec<_> = periods.into_iter().collect();
        periods.sort();
        for period in periods {
            if let Some(rollup) = engine.run_aggregation(&period).await? {
                eprintln!("{period}: {} tickets", rollup.tickets.len());
            }
        }
    }

    println!("Processed {done}, skipped {skipped}, failed {failed}.");
    if failed > 0 {
        anyhow::bail!("{failed} transcripts failed");
    }
    Ok(())
}

async fn watch(mut engine: CallIntel, dir: &Path, settings: &Settings) -> anyhow::Result<()> {
    let worker = engine.start_aggregation_worker();
    let interval_trigger = match engine.aggregation_queue() {
        Some(queue) => Some(callintel::rollup::worker::spawn_interval(
            queue.clone(),
            Duration::from_secs(settings.aggregation_interval_secs),
        )),
        None => None,
    };

    eprintln!(
        "Watching {} every {}s (Ctrl-C to stop)",
        dir.display(),
        settings.poll_interval_secs
    );
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut poll = tokio::time::interval(Duration::from_secs(settings.poll_interval_secs));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {}
        }

        let files = match callintel::ingest::transcript_files(dir) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Could not list {}: {e}", dir.display());
                continue;
            }
        };
        let pending: Vec<_> = files.into_iter().filter(|p| !seen.contains(p)).collect();
        for path in pending {
            match engine.process_file(&path).await {
                Ok(ProcessOutcome::Processed(call)) => {
                    log::info!(
                        "{}: call {} for {} ({} issues)",
                        path.display(),
                        call.assessment.call_id,
                        call.profile.account_id,
                        call.assessment.issues.len()
                    );
                    seen.insert(path);
                }
                Ok(ProcessOutcome::AlreadyProcessed) => {
                    seen.insert(path);
                }
                Err(e @ callintel::Error::InvalidInput(_)) => {
                    log::warn!("Skipping unreadable transcript: {e}");
                    seen.insert(path);
                }
                // Left unseen so the next poll retries it.
                Err(e) => log::error!("Failed to process {}: {e}", path.display()),
            }
        }
    }

    eprintln!("Stopping...");
    if let Some(handle) = interval_trigger {
        handle.abort();
    }
    engine.stop_aggregation_worker();
    worker.await?;
    Ok(())
}

async fn handle_profile(engine: &CallIntel, action: ProfileAction, json: bool) -> anyhow::Result<()> {
    match action {
        ProfileAction::Show { account_id } => {
            let Some(profile) = engine.profile(&account_id).await? else {
                anyhow::bail!("no profile for account {account_id}");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                print_profile(&profile);
            }
        }
        ProfileAction::List { attention } => {
            if attention {
                let profiles = engine.accounts_needing_attention().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&profiles)?);
                } else if profiles.is_empty() {
                    println!("No accounts need attention.");
                } else {
                    for p in &profiles {
                        println!(
                            "{:<20} {:>3}  {}",
                            p.account_id,
                            p.current_status.health_score,
                            p.current_status.attention_reason.as_deref().unwrap_or("")
                        );
                    }
                }
            } else {
                let ids = engine.account_ids().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&ids)?);
                } else {
                    for id in ids {
                        println!("{id}");
                    }
                }
            }
        }
        ProfileAction::Context { account_id } => {
            let context = engine.account_context(&account_id).await?;
            if context.is_empty() {
                println!("No history for account {account_id}.");
            } else {
                println!("{context}");
            }
        }
    }
    Ok(())
}

async fn handle_summary(engine: &CallIntel, action: SummaryAction, json: bool) -> anyhow::Result<()> {
    match action {
        SummaryAction::Show { period } => {
            let period = resolve_period(period)?;
            let Some(summary) = engine.summary(&period).await? else {
                anyhow::bail!("no summary for {period}; run `callintel aggregate --period {period}`");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("Period {}", summary.period_key);
            println!("  Calls:            {}", summary.total_calls);
            println!("  Issues:           {}", summary.total_issues);
            println!("  Avg satisfaction: {:.1}", summary.avg_satisfaction);
            println!("  Upsell leads:     {}", summary.upsell_opportunities);
            for (label, n) in &summary.sentiment_breakdown {
                println!("  Sentiment {label}: {n}");
            }
            for (label, n) in &summary.churn_risk_breakdown {
                println!("  Churn risk {label}: {n}");
            }
            println!();
            for c in summary.categories.values() {
                println!(
                    "  {:<36} {:>4} issues  {:>3} accounts",
                    c.category, c.total_count, c.affected_accounts
                );
            }
        }
        SummaryAction::List => {
            let periods = engine.summary_periods().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&periods)?);
            } else if periods.is_empty() {
                println!("No summaries yet.");
            } else {
                for p in periods {
                    println!("{p}");
                }
            }
        }
    }
    Ok(())
}

fn print_profile(p: &AccountProfile) {
    let s = &p.current_status;
    println!("Account {}", p.account_id);
    if let Some(city) = &p.city {
        println!("  City:        {city}");
    }
    if let Some(vertical) = &p.vertical {
        println!("  Vertical:    {vertical}");
    }
    println!("  Calls:       {}", p.total_calls);
    println!("  Health:      {} ({})", s.health_score, s.health_label);
    println!(
        "  Churn risk:  {}",
        s.churn_risk.map(|t| t.as_str()).unwrap_or("unknown")
    );
    println!("  Trend:       {}", p.trends.overall_trend);
    if let Some(reason) = &s.attention_reason {
        println!("  Attention:   {reason}");
    }
    if !p.active_issues.is_empty() {
        println!("  Open issues:");
        for i in &p.active_issues {
            println!(
                "    [{}] {} - {} (x{}){}",
                i.severity.as_str(),
                i.category,
                i.problem,
                i.mention_count,
                if i.is_recurring { " recurring" } else { "" }
            );
        }
    }
    if !p.call_history.is_empty() {
        println!("  Recent calls:");
        for c in p.recent_calls(5) {
            println!("    {} {}: {}", c.timestamp.format("%Y-%m-%d %H:%M"), c.call_id, c.summary);
        }
    }
}

fn print_ticket_table(tickets: &[Ticket]) {
    for t in tickets {
        println!(
            "  P{} [{}] {}  {}",
            t.priority,
            t.severity.as_str(),
            t.ticket_id,
            t.title
        );
    }
}

fn print_ticket(t: &Ticket) {
    println!("{} (P{}, {}, {})", t.ticket_id, t.priority, t.severity.as_str(), t.status.as_str());
    println!("{}", t.title);
    println!();
    println!("{}", t.description);
}

async fn print_status(db: &Database) -> anyhow::Result<()> {
    use callintel::storage::repository;

    let (profiles, attention, assessments, periods) = db
        .reader()
        .call(|conn| {
            let profiles = repository::list_profile_ids(conn)?.len();
            let attention = repository::list_attention_profile_ids(conn)?.len();
            let assessments = repository::count_assessments(conn)?;
            let periods = repository::list_summary_periods(conn)?;
            Ok::<_, rusqlite::Error>((profiles, attention, assessments, periods))
        })
        .await?;

    println!("Call Intelligence Status");
    println!("  Accounts:        {profiles}");
    println!("  Need attention:  {attention}");
    println!("  Assessed calls:  {assessments}");
    println!(
        "  Latest summary:  {}",
        periods.first().map(String::as_str).unwrap_or("never")
    );
    Ok(())
}

async fn handle_config(db: &Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match callintel::config::get(db, &key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            callintel::config::set(db, &key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = callintel::config::list(db).await?;
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
