use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use webpilot::config::{ConfigManager, FileConfigManager};
use webpilot::model::{ModelClient, OpenAiClient, UnavailableModel};
use webpilot::types::StepStatus;
use webpilot::{AgentError, ChromeBrowser, CommandOutcome, Payload, Plan, SessionController};

const HELP: &str = "\
Commands:
  go to <url> | back | forward | refresh
  click <text> | click selector \"<css>\"
  type <value> into <field>
  scroll up|down [amount]
  submit | search for <query> | go to <site> and search for <query>
  select the first result [with <filter>]
  find <text> on the page | wait <n> seconds | wait for <css>
  extract data | screenshot | analyze [question]
  plan <goal> | execute plan
  help | exit
Ctrl+C interrupts the running command.";

#[derive(Parser, Debug)]
#[command(name = "webpilot", about = "Drive a browser with plain-language commands")]
struct Cli {
    /// page to open first
    url: Option<String>,

    /// run one goal as a plan and exit
    #[arg(long)]
    task: Option<String>,

    #[arg(long)]
    headless: bool,

    #[arg(long, default_value = "webpilot.toml")]
    config: PathBuf,

    /// where screenshots and extracted data are written
    #[arg(long, default_value = "screenshots")]
    screenshots: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpilot=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_manager = FileConfigManager::new(cli.config.clone());
    let mut config = config_manager.load_config().await?;
    if cli.headless {
        config.browser.headless = true;
    }
    let config = Arc::new(config);

    std::fs::create_dir_all(&cli.screenshots)
        .with_context(|| format!("Failed to create output directory {}", cli.screenshots.display()))?;

    let model: Arc<dyn ModelClient> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Arc::new(OpenAiClient::new(&config.model, key)?),
        _ => {
            tracing::warn!("OPENAI_API_KEY not set, running with the command grammar only");
            Arc::new(UnavailableModel)
        }
    };

    tracing::info!("Starting webpilot");
    let browser = Arc::new(ChromeBrowser::launch(&config.browser, config.timing.action_timeout).await?);
    let mut controller = SessionController::new(config.clone(), browser, model)?;
    if let Err(e) = controller.observe().await {
        tracing::warn!("Initial observation failed: {}", e);
    }

    if let Some(url) = cli.url.clone().or_else(|| config.browser.start_url.clone()) {
        let outcome = run_command(&mut controller, &format!("go to {}", url)).await;
        report(outcome, &cli.screenshots);
    }

    let result = match cli.task.as_deref() {
        Some(goal) => run_task(&mut controller, goal).await,
        None => repl(&mut controller, &cli.screenshots).await,
    };

    if let Err(e) = controller.shutdown().await {
        tracing::warn!("Browser did not close cleanly: {}", e);
    }
    tracing::info!("webpilot stopped");
    result
}

async fn run_task(controller: &mut SessionController, goal: &str) -> anyhow::Result<()> {
    let plan = controller.run_task(goal).await?;
    print_plan(&plan);
    match plan.diagnostic {
        Some(reason) => anyhow::bail!("task did not complete: {}", reason),
        None => Ok(()),
    }
}

async fn repl(controller: &mut SessionController, output: &Path) -> anyhow::Result<()> {
    println!("webpilot ready. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let outcome = run_command(controller, line).await;
        if matches!(outcome, Ok(CommandOutcome::Exit)) {
            break;
        }
        report(outcome, output);
    }
    Ok(())
}

/// Handle one command while Ctrl+C cancels it.
async fn run_command(controller: &mut SessionController, text: &str) -> webpilot::Result<CommandOutcome> {
    let token = controller.cancel_token();
    let handled = controller.handle(text);
    tokio::pin!(handled);

    loop {
        tokio::select! {
            outcome = &mut handled => return outcome,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupting...");
                token.cancel();
            }
        }
    }
}

fn report(outcome: webpilot::Result<CommandOutcome>, output: &Path) {
    match outcome {
        Ok(CommandOutcome::Executed { intent, result }) => {
            println!("ok: {} ({} ms)", intent, result.duration.as_millis());
            if let Some(payload) = result.payload {
                show_payload(payload, output);
            }
        }
        Ok(CommandOutcome::Planned(plan)) => {
            print_plan(&plan);
            println!("Type 'execute plan' to run it.");
        }
        Ok(CommandOutcome::PlanFinished(plan)) => print_plan(&plan),
        Ok(CommandOutcome::Help) => println!("{}", HELP),
        Ok(CommandOutcome::Exit) => {}
        Err(e) => show_error(&e),
    }
}

fn show_error(e: &AgentError) {
    println!("error: {}", e);
    if let Some(hint) = e.hint() {
        println!("hint: {}", hint);
    }
}

fn show_payload(payload: Payload, output: &Path) {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    match payload {
        Payload::Text(text) => println!("{}", text),
        Payload::Analysis(analysis) => {
            println!("{}", analysis.summary);
            for element in analysis.ranked() {
                match &element.selector {
                    Some(selector) => println!("  - {} ({})", element.description, selector),
                    None => println!("  - {}", element.description),
                }
            }
        }
        Payload::Screenshot(bytes) => {
            let path = output.join(format!("screenshot-{}.png", stamp));
            match std::fs::write(&path, bytes) {
                Ok(()) => println!("screenshot saved to {}", path.display()),
                Err(e) => println!("error: could not save screenshot: {}", e),
            }
        }
        Payload::Data(value) => {
            let path = output.join(format!("extract-{}.json", stamp));
            let written = serde_json::to_string_pretty(&value)
                .map_err(|e| e.to_string())
                .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
            match written {
                Ok(()) => println!("data saved to {}", path.display()),
                Err(e) => println!("error: could not save data: {}", e),
            }
        }
    }
}

fn print_plan(plan: &Plan) {
    println!("plan '{}': {:?}", plan.goal, plan.status());
    for (i, step) in plan.steps.iter().enumerate() {
        let mark = match step.status {
            StepStatus::Pending => " ",
            StepStatus::Done => "x",
            StepStatus::Failed => "!",
            StepStatus::Skipped => "-",
        };
        println!("  [{}] {}. {}", mark, i + 1, step.intent);
    }
    if plan.replans > 0 {
        println!("  re-planned {} time(s)", plan.replans);
    }
    if let Some(reason) = &plan.diagnostic {
        println!("  stopped: {}", reason);
    }
}
