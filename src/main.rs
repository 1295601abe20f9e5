use chromiumoxide::browser::{Browser, BrowserConfig};
use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use sala_headless::{
	config::Config,
	credentials::CredentialStore,
	llm::GeminiClient,
	notify::ConsoleNotifier,
	runner::{ControlLoop, LoopHandle, PageCycle},
};

#[derive(Debug, Parser)]
#[command(name = "sala_headless")]
#[command(about = "Automated quiz answering driven by a Gemini-style inference backend", long_about = None)]
struct Args {
	/// Quiz page to attach to
	#[arg(short, long)]
	target_url: String,

	/// Run with visible browser window (non-headless mode)
	#[arg(long)]
	visible: bool,

	/// Inference API key; falls back to the stored credential, then a prompt
	#[arg(long, env = "GEMINI_API_KEY")]
	api_key: Option<String>,

	/// Model name on the inference endpoint
	#[arg(long, default_value = "gemini-2.0-flash")]
	model: String,

	/// Forget the stored API key before resolving credentials
	#[arg(long)]
	reset_credential: bool,

	/// Delay between question cycles in milliseconds
	#[arg(long, default_value_t = 2000)]
	cycle_delay_ms: u64,

	/// Consecutive failed cycles before the loop stops itself
	#[arg(long, default_value_t = 3)]
	max_errors: u32,

	/// Inference attempts per question
	#[arg(long, default_value_t = 2)]
	answer_retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();

	let store = CredentialStore::open()?;
	if args.reset_credential {
		store.remove()?;
		tracing::info!("stored API key cleared");
	}
	let credential = store.resolve(args.api_key.as_deref())?;

	let config = Config {
		cycle_delay: std::time::Duration::from_millis(args.cycle_delay_ms),
		max_consecutive_errors: args.max_errors,
		answer_retries: args.answer_retries,
		model: args.model,
		..Config::default()
	};

	// Configure browser based on visibility flag
	let browser_config = if args.visible {
		BrowserConfig::builder().with_head().build().map_err(|e| eyre!("Failed to build browser config: {}", e))?
	} else {
		BrowserConfig::builder().build().map_err(|e| eyre!("Failed to build browser config: {}", e))?
	};

	let (mut browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;

	// Drain browser events so the connection doesn't stall
	let events = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

	tracing::info!("opening {}", args.target_url);
	let page = browser.new_page(args.target_url.as_str()).await.map_err(|e| eyre!("Failed to open page: {}", e))?;

	// Give the quiz page a moment to render
	tokio::time::sleep(std::time::Duration::from_secs(2)).await;

	let handle = LoopHandle::new();
	let stopper = handle.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::info!("interrupt received, stopping at the next suspension point");
			stopper.stop();
		}
	});

	let client = GeminiClient::new(credential, config.model.clone(), config.request_timeout)?;
	let ctl_notifier = Box::new(ConsoleNotifier);
	let mut ctl = ControlLoop::new(config.clone(), handle, ctl_notifier);

	// Console panel: render loop-state snapshots as they change
	let mut state_rx = ctl.subscribe();
	let panel = tokio::spawn(async move {
		while state_rx.changed().await.is_ok() {
			let state = state_rx.borrow_and_update().clone();
			tracing::info!(target: "panel", "running={} answered={} errors={}", state.running, state.questions_answered, state.consecutive_errors);
		}
	});

	let mut cycle = PageCycle::new(&page, client, &config);
	ctl.run(&mut cycle).await;

	tracing::info!("{} question(s) answered this session", ctl.state().questions_answered);

	drop(cycle);
	drop(ctl);
	panel.await.ok();
	drop(page);
	browser.close().await.map_err(|e| eyre!("Failed to close browser: {}", e))?;
	drop(browser);
	events.abort();

	Ok(())
}
