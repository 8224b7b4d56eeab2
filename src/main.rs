//! groupvault - chat group archive CLI
//!
//! Main entry point for the groupvault command-line tool.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use groupvault::cli::{self, Cli, Commands, OutputFormat};
use groupvault::config::{self, Config};
use groupvault::logging::{self, OperationGuard};
use groupvault::server::{self, AppState};
use groupvault::{
    Attachment, AttachmentKind, CONTENT_DIVIDER_WIDTH, Direction, GroupMeClient, IngestOptions,
    Ingestor, MessageView, QueryEngine, Storage, VaultError, format_bytes, format_epoch,
    format_number, format_number_usize, format_span,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let serving = matches!(cli.command, Commands::Serve(_));
    logging::init_cli_logging(cli.quiet, cli.verbose, serving);

    // Runs before loading so a missing --config file can be created.
    if let Commands::Config(args) = &cli.command {
        if args.init {
            cmd_config_init(&cli)?;
            if !args.show {
                return Ok(());
            }
        }
    }

    config::load_dotenv();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }

    match &cli.command {
        Commands::Ingest(args) => cmd_ingest(&cli, &mut config, args),
        Commands::Serve(args) => cmd_serve(&mut config, args),
        Commands::Search(args) => cmd_search(&cli, &config, args),
        Commands::Show(args) => cmd_show(&cli, &config, args),
        Commands::Before(args) => cmd_page(&cli, &config, args, Direction::Before),
        Commands::After(args) => cmd_page(&cli, &config, args, Direction::After),
        Commands::Stats => cmd_stats(&cli, &config),
        Commands::Verify(args) => cmd_verify(&cli, &config, args),
        Commands::Config(_) => cmd_config(&cli, &config),
        Commands::Completions(args) => cmd_completions(args.clone()),
    }
}

/// Attach the error's fix-it hint, if it has one.
fn with_hint(err: VaultError) -> anyhow::Error {
    match err.suggestion() {
        Some(hint) => anyhow::anyhow!("{err}\nHint: {hint}"),
        None => err.into(),
    }
}

fn open_existing(config: &Config) -> Result<Storage> {
    let db_path = config.db_path();
    if !db_path.exists() {
        anyhow::bail!(
            "No archive found. Run 'groupvault ingest' first.\n\
             Expected database at: {}",
            db_path.display()
        );
    }
    Storage::open(&db_path).map_err(with_hint)
}

const fn is_json(format: OutputFormat) -> bool {
    matches!(format, OutputFormat::Json | OutputFormat::JsonPretty)
}

fn print_json<T: Serialize + ?Sized>(format: OutputFormat, value: &T) -> Result<()> {
    let json = if format == OutputFormat::JsonPretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_ingest(cli: &Cli, config: &mut Config, args: &cli::IngestArgs) -> Result<()> {
    if let Some(token) = &args.token {
        config.feed.token = Some(token.clone());
    }
    if let Some(group) = &args.group {
        config.feed.group_id = Some(group.clone());
    }
    if let Some(delay_ms) = args.delay_ms {
        config.feed.delay_ms = delay_ms;
    }
    config.validate_feed().map_err(with_hint)?;

    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating {}", parent.display()))?;
    }

    let client = GroupMeClient::new(&config.feed).map_err(with_hint)?;
    let storage = Storage::open(&db_path).map_err(with_hint)?;
    let options = IngestOptions {
        delay: config.feed.delay(),
        start_before: args.before_id.clone(),
        max_pages: args.max_pages,
    };

    let show_progress = !cli.quiet && cli.format == OutputFormat::Text;
    if show_progress {
        println!("{}", "Archiving group history...".bold().cyan());
        println!("  Feed: {}", client.endpoint());
        println!("  Database: {}", db_path.display());
        println!();
    }

    let pb = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {pos} pages {msg}")?,
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    } else {
        ProgressBar::hidden()
    };

    let guard = OperationGuard::new("ingest");
    let report = match Ingestor::new(client, &storage, options).with_progress(pb).run() {
        Ok(report) => {
            guard.complete(format_args!(
                "{} stored, {} failed, {} pages",
                report.stored, report.failed, report.pages
            ));
            report
        }
        Err(e) => {
            guard.fail(&e);
            return Err(with_hint(e));
        }
    };

    if let Err(e) = storage.optimize() {
        tracing::warn!(error = %e, "Optimize after ingest failed");
    }

    match cli.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(cli.format, &report)?,
        OutputFormat::Compact => println!(
            "pages={} stored={} failed={} last_cursor={}",
            report.pages,
            report.stored,
            report.failed,
            report.last_cursor.as_deref().unwrap_or("-")
        ),
        OutputFormat::Text => {
            println!(
                "  {} Stored {} messages from {} pages",
                "✓".green(),
                format_number_usize(report.stored).cyan(),
                format_number_usize(report.pages)
            );
            if report.failed > 0 {
                println!(
                    "  {} {} messages failed to store (see log)",
                    "!".yellow(),
                    format_number_usize(report.failed)
                );
            }
            if let (Some(cursor), Some(_)) = (&report.last_cursor, args.max_pages) {
                println!(
                    "  Continue with {}",
                    format!("groupvault ingest --before-id {cursor}").bold()
                );
            }
            println!();
            println!("Run {} to search your archive.", "groupvault search <query>".bold());
        }
    }

    Ok(())
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Resolving {host}:{port}"))?
        .next()
        .with_context(|| format!("No address for {host}:{port}"))
}

fn cmd_serve(config: &mut Config, args: &cli::ServeArgs) -> Result<()> {
    if let Some(host) = &args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = &args.static_dir {
        config.server.static_dir = Some(dir.clone());
    }

    let storage = Arc::new(open_existing(config)?);
    let addr = resolve_addr(&config.server.host, config.server.port)?;
    let static_dir = config.server.static_dir.clone();
    if let Some(dir) = &static_dir {
        info!("Serving static files from {}", dir.display());
    }

    let state = AppState::new(storage, config.query_limits());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(server::serve(state, addr, static_dir.as_deref()))
}

fn cmd_search(cli: &Cli, config: &Config, args: &cli::SearchArgs) -> Result<()> {
    let storage = open_existing(config)?;
    let limits = config.query_limits();
    let engine = QueryEngine::with_limits(&storage, limits);
    let results = engine
        .search_with_limit(&args.query, args.limit.unwrap_or(limits.search_limit))
        .map_err(with_hint)?;

    if is_json(cli.format) {
        return print_json(cli.format, &results);
    }

    if results.is_empty() {
        if cli.format == OutputFormat::Text {
            println!("{}", "No results found.".yellow());
        }
        return Ok(());
    }

    if cli.format == OutputFormat::Compact {
        print_compact(&results);
    } else {
        println!(
            "{} results for \"{}\":\n",
            results.len().to_string().cyan(),
            args.query.bold()
        );
        for (i, view) in results.iter().enumerate() {
            print_message(Some(i + 1), view);
        }
    }

    Ok(())
}

fn cmd_show(cli: &Cli, config: &Config, args: &cli::ShowArgs) -> Result<()> {
    let storage = open_existing(config)?;
    let mut limits = config.query_limits();
    if let Some(window) = args.window {
        limits.detail_window = window;
    }
    let detail = QueryEngine::with_limits(&storage, limits)
        .detail(&args.id)
        .map_err(with_hint)?;

    match cli.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(cli.format, &detail)?,
        OutputFormat::Compact => {
            // Oldest first, the way the conversation reads.
            let mut before = detail.before_messages.clone();
            before.reverse();
            print_compact(&before);
            print_compact(std::slice::from_ref(&detail.message));
            print_compact(&detail.after_messages);
        }
        OutputFormat::Text => {
            for view in detail.before_messages.iter().rev() {
                print_message(None, view);
            }
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH).cyan());
            print_message(None, &detail.message);
            println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH).cyan());
            for view in &detail.after_messages {
                print_message(None, view);
            }
        }
    }

    Ok(())
}

fn cmd_page(cli: &Cli, config: &Config, args: &cli::PageArgs, direction: Direction) -> Result<()> {
    let storage = open_existing(config)?;
    let limits = config.query_limits();
    let engine = QueryEngine::with_limits(&storage, limits);
    let limit = args.limit.unwrap_or(limits.max_page).min(limits.max_page);

    // An unknown anchor is reported rather than shown as an empty page.
    engine.message(&args.id).map_err(with_hint)?;
    let page = match direction {
        Direction::Before => engine.before(&args.id, limit),
        Direction::After => engine.after(&args.id, limit),
    }
    .map_err(with_hint)?;

    match cli.format {
        OutputFormat::Json | OutputFormat::JsonPretty => print_json(cli.format, &page)?,
        OutputFormat::Compact => print_compact(&page),
        OutputFormat::Text => {
            if page.is_empty() {
                println!(
                    "{}",
                    format!("No messages {direction} {}.", args.id).yellow()
                );
            }
            for view in &page {
                print_message(None, view);
            }
        }
    }

    Ok(())
}

fn print_compact(views: &[MessageView]) {
    for view in views {
        println!(
            "{} | {} | {} | {}",
            view.id,
            format_epoch(view.created_at),
            view.name,
            truncate(view.text.as_deref().unwrap_or(""), 100)
        );
    }
}

fn print_message(num: Option<usize>, view: &MessageView) {
    let prefix = num.map_or_else(String::new, |n| format!("{}. ", n.to_string().dimmed()));
    let name = if view.system {
        view.name.yellow()
    } else {
        view.name.bold()
    };
    let favorites = if view.favorite_count > 0 {
        format!("♥ {}", view.favorite_count).red().to_string()
    } else {
        String::new()
    };

    println!(
        "{prefix}{} {} {} {}",
        name,
        format_epoch(view.created_at).dimmed(),
        view.id.dimmed(),
        favorites
    );

    if let Some(text) = view.text.as_deref().filter(|t| !t.is_empty()) {
        for line in textwrap::wrap(text, 78) {
            println!("   {line}");
        }
    }

    for attachment in &view.attachments {
        println!("   {}", describe_attachment(attachment).blue());
    }
    for warning in &view.warnings {
        println!(
            "   {}",
            format!("warning: {} {}", warning.field, warning.reason).yellow()
        );
    }

    println!();
}

fn describe_attachment(attachment: &Attachment) -> String {
    match attachment.variant() {
        AttachmentKind::Image { url } => format!("[{}] {}", attachment.kind, url.unwrap_or("")),
        AttachmentKind::Location { lat, lng, name } => format!(
            "[location] {} ({}, {})",
            name.unwrap_or(""),
            lat.unwrap_or("?"),
            lng.unwrap_or("?")
        ),
        AttachmentKind::Emoji { charmap, .. } => format!("[emoji] {} glyphs", charmap.len()),
        AttachmentKind::Other(kind) => format!("[{kind}]"),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    let single_line = s.replace(['\n', '\r'], " ");
    if single_line.len() <= max_len {
        single_line
    } else {
        // Find a valid UTF-8 char boundary to avoid panic on multi-byte chars
        let mut end = max_len.saturating_sub(3);
        while end > 0 && !single_line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &single_line[..end])
    }
}

fn cmd_stats(cli: &Cli, config: &Config) -> Result<()> {
    let db_path = config.db_path();
    let storage = open_existing(config)?;
    let stats = storage.get_stats().map_err(with_hint)?;

    if is_json(cli.format) {
        return print_json(cli.format, &stats);
    }

    println!("{}", "Archive Statistics".bold().cyan());
    println!("{}", "─".repeat(40));
    println!("  {:<20} {:>12}", "Messages:", format_number(stats.messages_count));
    println!("  {:<20} {:>12}", "Attachments:", format_number(stats.attachments_count));
    println!("  {:<20} {:>12}", "Favorites:", format_number(stats.favorites_count));
    println!("  {:<20} {:>12}", "Indexed:", format_number(stats.fts_count));
    if let Ok(meta) = std::fs::metadata(&db_path) {
        println!("  {:<20} {:>12}", "Database size:", format_bytes(meta.len()));
    }
    println!("{}", "─".repeat(40));

    if let (Some(first), Some(last)) = (stats.first_message_at, stats.last_message_at) {
        println!(
            "  First message: {}",
            first.format("%Y-%m-%d").to_string().green()
        );
        println!(
            "  Last message:  {}",
            last.format("%Y-%m-%d").to_string().green()
        );
        println!("  History spans {}", format_span(first, last));
    }

    Ok(())
}

#[derive(Serialize)]
struct VerifyReport {
    missing: i64,
    orphaned: i64,
    consistent: bool,
    rebuilt: Option<usize>,
}

fn cmd_verify(cli: &Cli, config: &Config, args: &cli::VerifyArgs) -> Result<()> {
    let storage = open_existing(config)?;
    let before = storage.fts_consistency().map_err(with_hint)?;

    let mut report = VerifyReport {
        missing: before.missing,
        orphaned: before.orphaned,
        consistent: before.is_consistent(),
        rebuilt: None,
    };

    if !report.consistent && args.fix {
        let rebuilt = storage.rebuild_fts().map_err(with_hint)?;
        let after = storage.fts_consistency().map_err(with_hint)?;
        report.rebuilt = Some(rebuilt);
        report.consistent = after.is_consistent();
    }

    if is_json(cli.format) {
        print_json(cli.format, &report)?;
    } else {
        let mark = if before.is_consistent() {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {} {} messages missing from the index, {} orphaned index rows",
            mark,
            format_number(report.missing),
            format_number(report.orphaned)
        );
        if let Some(rebuilt) = report.rebuilt {
            println!(
                "  {} Rebuilt index with {} messages",
                "✓".green(),
                format_number_usize(rebuilt)
            );
        }
    }

    if !report.consistent {
        anyhow::bail!("Search index is out of sync. Run 'groupvault verify --fix'.");
    }
    Ok(())
}

fn cmd_config_init(cli: &Cli) -> Result<()> {
    let path: PathBuf = cli
        .config
        .clone()
        .or_else(Config::user_config_path)
        .context("Could not determine config directory")?;
    if path.exists() {
        anyhow::bail!("{} already exists; not overwriting", path.display());
    }
    Config::default().save_to(&path)?;
    println!("{} Wrote {}", "✓".green(), path.display());
    Ok(())
}

fn cmd_config(cli: &Cli, config: &Config) -> Result<()> {
    let shown = config.redacted();
    if is_json(cli.format) {
        return print_json(cli.format, &shown);
    }

    println!("{}", "Current Configuration".bold().cyan());
    println!("  Database: {}", config.db_path().display());
    if let Some(path) = cli.config.clone().or_else(Config::user_config_path) {
        println!("  Config file: {}", path.display());
    }
    println!();
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

fn cmd_completions(args: cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "groupvault", &mut io::stdout());
    Ok(())
}
