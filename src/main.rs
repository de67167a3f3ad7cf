use color_eyre::Section;
use color_eyre::eyre::{Result, WrapErr};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use futmonitor::config::Config;
use futmonitor::flow::ChatFlow;
use futmonitor::ledger::{self, Platform};
use futmonitor::logging::{DailyUtcFileAppender, JsonEventFormatter};
use futmonitor::price_source::{HttpPriceSource, PriceSource};
use futmonitor::web_server;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // The core needs no credentials, so a missing .env is fine.
    dotenv::dotenv().ok();
    let config = Config::load();

    let file_appender = DailyUtcFileAppender::new("logs", "futmonitor")
        .wrap_err("Failed to create log file appender")
        .with_suggestion(|| "Make sure the logs directory is writable")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .event_format(JsonEventFormatter),
        )
        .with(
            // stdout is the chat surface, so human-readable logs go to stderr
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .compact(),
        )
        .with(EnvFilter::from_default_env().add_directive(
            "futmonitor=info"
                .parse()
                .wrap_err("Failed to parse log filter directive")?,
        ))
        .init();

    info!("⚽ futmonitor - transfer market price ledger");
    info!("📊 Config loaded:");
    info!("  - Price history: {}", config.price_history_file);
    info!("  - Position ledger: {}", config.positions_file);
    info!("  - Market fee: {:.1}%", config.market_fee_rate * 100.0);
    info!("  - Web UI Port: {}", config.web_ui_port);

    let web_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = web_server::start_web_server(&web_config).await {
            error!("❌ Web server error: {:?}", e);
        }
    });

    let price_source = HttpPriceSource::from_config(&config);
    if price_source.is_none() {
        info!("🌐 No price API key configured; /lookup is disabled");
    }

    let mut flow = ChatFlow::new(&config);
    const SESSION: &str = "terminal";

    println!("{}", flow.handle_message(SESSION, "/start"));
    println!("(also: /lookup <platform> <player>, /quit to exit)\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .wrap_err("Failed to read from stdin")?
    {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let reply = if let Some(rest) = line.strip_prefix("/lookup") {
            lookup(price_source.as_ref(), rest).await
        } else {
            flow.handle_message(SESSION, &line)
        };
        println!("\n{}\n", reply);
    }

    info!("👋 Shutting down");
    Ok(())
}

/// Driver-level convenience: ask the configured price service for a current
/// quote. Lookups never write to the ledger; only prices the user confirms by
/// going through the chat dialogue get recorded.
async fn lookup(source: Option<&HttpPriceSource>, args: &str) -> String {
    let Some(source) = source else {
        return "Price lookup is not configured. Set PRICE_API_KEY to enable it.".to_string();
    };

    let mut parts = args.trim().splitn(2, char::is_whitespace);
    let (Some(platform_raw), Some(player)) = (parts.next(), parts.next()) else {
        return "Usage: /lookup <platform> <player>".to_string();
    };
    let Ok(platform) = platform_raw.parse::<Platform>() else {
        return "Usage: /lookup <platform> <player> — platform is PS, XBOX or PC".to_string();
    };

    match source.quote(player, platform).await {
        Ok(price) => format!(
            "🌐 {} is around {} coins on {} right now.",
            ledger::normalize_subject(player),
            ledger::format_price(price),
            platform
        ),
        Err(e) => {
            error!("❌ Price lookup failed for {}: {}", player, e);
            format!("🌐 Lookup failed: {}", e)
        }
    }
}
