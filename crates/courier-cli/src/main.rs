use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use courier_client::reader_backend::DEFAULT_READER_URL;
use courier_client::{Stack, StandardStack};
use courier_core::config::EngineConfig;
use courier_core::models::FetchedContent;
use courier_core::throttle::ThrottleConfig;

#[derive(Parser)]
#[command(name = "courier", version, about = "Resilient content fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a batch of URLs, falling back across backends
    Resolve {
        /// URLs to resolve
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        stack: StackArgs,

        /// Fail when any URL exhausts every backend
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// URLs resolved in parallel by the generic engine
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print a JSON array instead of plain text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show which resolver and backends would handle a URL
    Route {
        /// URL to inspect
        url: String,

        #[command(flatten)]
        stack: StackArgs,
    },
}

#[derive(Args)]
struct StackArgs {
    /// JSON file with route rules and per-backend settings
    #[arg(long, env = "COURIER_ROUTES_FILE")]
    routes: Option<PathBuf>,

    /// Reader service base URL
    #[arg(long, env = "COURIER_READER_URL", default_value = DEFAULT_READER_URL)]
    reader_url: String,

    /// Reader service API key
    #[arg(long, env = "COURIER_READER_API_KEY", hide_env_values = true)]
    reader_api_key: Option<String>,

    /// Disable the reader service backend
    #[arg(long, default_value_t = false)]
    no_reader: bool,

    /// GitHub token for issue URLs
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Stack Exchange API key for Stack Overflow URLs
    #[arg(long, env = "STACKOVERFLOW_API_KEY", hide_env_values = true)]
    stackoverflow_api_key: Option<String>,

    /// Minimum delay between direct requests to the same host, in milliseconds
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Allow fetching private and loopback addresses
    #[arg(long, default_value_t = false)]
    allow_private_urls: bool,

    /// Register the headless browser backend (needs the `browser` feature)
    #[arg(long, default_value_t = false)]
    browser: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("courier=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve {
            urls,
            stack,
            strict,
            concurrency,
            json,
        } => {
            let mut config = load_config(stack.routes.as_deref())?;
            if strict {
                config.strict_mode = true;
            }
            if let Some(n) = concurrency {
                config.concurrency = n;
            }
            let stack = build_stack(config, stack).await?;
            cmd_resolve(&stack, &urls, json).await?;
        }
        Commands::Route { url, stack } => {
            let config = load_config(stack.routes.as_deref())?;
            let stack = build_stack(config, stack).await?;
            cmd_route(&stack, &url)?;
        }
    }

    Ok(())
}

/// Engine config from the environment, with `--routes` taking the place of
/// `COURIER_ROUTES_FILE`.
fn load_config(routes: Option<&Path>) -> Result<EngineConfig> {
    let routes = routes.map(|p| p.display().to_string());
    EngineConfig::from_lookup(|key| match key {
        "COURIER_ROUTES_FILE" => routes.clone(),
        _ => std::env::var(key).ok(),
    })
    .context("Invalid engine configuration")
}

async fn build_stack(config: EngineConfig, args: StackArgs) -> Result<Stack> {
    let mut builder = StandardStack::new(config)
        .with_github_token(args.github_token)
        .with_stackoverflow_key(args.stackoverflow_api_key)
        .allow_private_urls(args.allow_private_urls);

    builder = if args.no_reader {
        builder.without_reader()
    } else {
        builder.with_reader(args.reader_url, args.reader_api_key)
    };
    if let Some(ms) = args.throttle_ms {
        builder = builder.with_throttle(ThrottleConfig::new(Duration::from_millis(ms)));
    }
    #[cfg(feature = "browser")]
    {
        builder = builder.with_browser(args.browser);
    }
    #[cfg(not(feature = "browser"))]
    if args.browser {
        anyhow::bail!("--browser requires courier to be built with the `browser` feature");
    }

    builder.build().await.context("Failed to build resolver stack")
}

async fn cmd_resolve(stack: &Stack, urls: &[String], json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling outstanding fetches");
            token.cancel();
        }
    });

    tracing::info!(urls = urls.len(), "Resolving batch");
    let contents = stack.router.resolve_with_cancel(urls, &cancel).await?;

    if contents.len() < urls.len() {
        let missing: Vec<&str> = urls
            .iter()
            .filter(|u| !contents.iter().any(|c| &c.url == *u))
            .map(String::as_str)
            .collect();
        tracing::warn!(?missing, "Some URLs could not be resolved");
    }

    if json {
        let items = contents
            .iter()
            .map(content_json)
            .collect::<Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for content in &contents {
            print_content(content);
        }
    }

    tracing::info!(
        requested = urls.len(),
        resolved = contents.len(),
        "Batch complete"
    );
    Ok(())
}

fn content_json(content: &FetchedContent) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(content)?;
    value["text"] = serde_json::Value::from(content.as_text().into_owned());
    Ok(value)
}

fn print_content(content: &FetchedContent) {
    let via = content
        .backend()
        .or_else(|| content.meta.get("source").map(String::as_str))
        .unwrap_or("unknown");
    println!("==> {} (via {}, {})", content.url, via, content.content_type);
    if let Some(title) = &content.title {
        println!("# {title}");
    }
    println!("{}\n", content.as_text());
}

fn cmd_route(stack: &Stack, url: &str) -> Result<()> {
    let resolver = stack.router.resolver_for(url)?;
    println!("resolver: {resolver}");

    // Domain resolvers call their own APIs; the order below applies when the
    // URL reaches the generic engine.
    println!("backends:");
    for (i, backend) in stack.engine.candidates(url).iter().enumerate() {
        println!("  {}. {backend}", i + 1);
    }
    Ok(())
}
