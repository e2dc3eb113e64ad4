use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use frame_locator::workers::{event_channel, join, shared};
use frame_locator::{BatchTestWorker, ChromeDriver, Config, LocatorEngine, LocatorItem, WorkerEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("frame-locator")
        .about("Validate element locators across nested frames")
        .arg(Arg::new("url").required(true).help("Page to open"))
        .arg(
            Arg::new("locator")
                .short('l')
                .long("locator")
                .action(ArgAction::Append)
                .help("XPath or CSS locator to test; repeatable"),
        )
        .arg(
            Arg::new("max-depth")
                .long("max-depth")
                .value_parser(value_parser!(usize))
                .help("Deepest frame level to search"),
        )
        .arg(
            Arg::new("headed")
                .long("headed")
                .action(ArgAction::SetTrue)
                .help("Show the Chrome window instead of running headless"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("JSON configuration file"),
        )
}

/// Configuration file (or defaults) with command-line overrides applied.
fn configure(matches: &ArgMatches) -> anyhow::Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    if matches.get_flag("headed") {
        config.driver.headless = false;
    }
    if let Some(depth) = matches.get_one::<usize>("max-depth") {
        config.engine.max_frame_depth = *depth;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = cli().get_matches();

    let config = configure(&matches)?;

    let url = matches
        .get_one::<String>("url")
        .context("url is required")?;

    let driver = ChromeDriver::launch(&config.driver).await?;
    let mut engine = LocatorEngine::new(driver, config.engine.clone());
    engine.navigate(url).await?;

    let frames = engine.discover_all_frames().await?;
    info!("{} frames on {}", frames.len(), url);
    for frame in &frames {
        println!("{}{}", "  ".repeat(frame.depth), frame.path);
    }

    let items: Vec<LocatorItem> = matches
        .get_many::<String>("locator")
        .unwrap_or_default()
        .enumerate()
        .map(|(i, locator)| LocatorItem::new(format!("locator {}", i + 1), locator.as_str()))
        .collect();
    if items.is_empty() {
        engine.close().await?;
        return Ok(());
    }

    let engine = shared(engine);
    let (tx, mut rx) = event_channel();
    let worker = BatchTestWorker::new(engine.clone(), items, &config.worker).with_events(tx);
    let handle = worker.spawn();

    while let Some(event) = rx.recv().await {
        if let WorkerEvent::ItemTested(row) = event {
            let place = row
                .frame_path
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let status = if row.success { "FOUND" } else { "MISSING" };
            println!("{:<8} {:<12} {}  {}", status, place, row.locator, row.message);
        }
    }

    let report = join(handle).await?;
    info!(
        "{} of {} locators found (session {})",
        report.passed(),
        report.rows.len(),
        report.session_id
    );

    if let Err(e) = engine.lock().await.close().await {
        warn!("Closing browser failed: {}", e);
    }
    Ok(())
}
