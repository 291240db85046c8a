use clap::Parser;
use corral_core::cancel::CancelToken;
use corral_core::config::{
    AppConfig, AppContext, Credentials, DomainsConfig, FleetConfig, RulesConfig, ServerSpec,
};
use corral_core::error::{CorralError, ErrorKind};
use corral_core::observer::{Observer, ObserverEvent};
use corral_core::session::SessionContext;
use corral_inference::{
    build_strategy, Inference, InferenceOptions, ReflectionStrategy, StrategyKind,
};
use corral_llm::{build_client, Provider};
use corral_mcp::{DomainRegistry, McpManager, McpService, RuleEngine, ServiceSettings};
use rustyline::error::ReadlineError;
use rustyline::{Completer, Editor, Helper, Highlighter, Hinter, Validator};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Rustyline helper providing tab-completion for slash commands.
#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct CorralHelper {
    #[rustyline(Completer)]
    completer: CommandCompleter,
}

#[derive(Clone)]
struct CommandCompleter;

impl rustyline::completion::Completer for CommandCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        const COMMANDS: &[&str] = &[
            "/help", "/status", "/tools", "/servers", "/strategy", "/llm", "/enable", "/disable",
            "/addserver", "/debug", "/clear", "/quit",
        ];
        let prefix = &line[..pos];
        if !prefix.starts_with('/') || prefix.contains(' ') {
            return Ok((0, vec![]));
        }
        let matches: Vec<String> = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect();
        Ok((0, matches))
    }
}

#[derive(Parser)]
#[command(name = "corral", about = "Chat agent over a fleet of MCP tool servers")]
struct Args {
    /// Directory holding the config files (servers.json, domains.json, ...)
    #[arg(long, env = "CORRAL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// App config file inside the config dir
    #[arg(long, default_value = "corral.toml")]
    config: String,

    /// Start with debug output enabled
    #[arg(long)]
    debug: bool,
}

fn init_tracing(config_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let appender = tracing_appender::rolling::daily(config_dir.join("logs"), "corral.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("corral: {}", e.user_message());
            if e.kind() == ErrorKind::Configuration {
                1
            } else {
                2
            }
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<(), CorralError> {
    let config_dir = args
        .config_dir
        .clone()
        .or_else(|| dirs::config_dir().map(|d| d.join("corral")))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&config_dir)
        .map_err(|e| CorralError::Configuration(format!("cannot create config dir: {}", e)))?;
    let _log_guard = init_tracing(&config_dir);

    let config = AppConfig::load_or_default(config_dir.join(&args.config));
    let ctx = AppContext::new(config, config_dir);

    // Configuration files; each one is optional, absence means empty.
    let fleet = if ctx.fleet_path().exists() {
        FleetConfig::load(ctx.fleet_path())
            .map_err(|e| CorralError::Configuration(e.to_string()))?
    } else {
        tracing::info!("no fleet file at {}, starting empty", ctx.fleet_path().display());
        FleetConfig::default()
    };
    let domains = if ctx.domains_path().exists() {
        DomainsConfig::load(ctx.domains_path())
            .map_err(|e| CorralError::Configuration(e.to_string()))?
    } else {
        DomainsConfig::default()
    };
    let rules = if ctx.rules_path().exists() {
        RulesConfig::load(ctx.rules_path())
            .map_err(|e| CorralError::Configuration(e.to_string()))?
    } else {
        RulesConfig::default()
    };
    let credentials = Credentials::load(ctx.credentials_path());

    let provider = Provider::from_str(&ctx.config.llm.provider)?;
    let llm = build_client(
        provider,
        &ctx.config.llm.model,
        &credentials,
        Duration::from_secs(ctx.config.timeouts.llm_request_secs),
    )?;

    let service = McpService::new(ServiceSettings::from_timeouts(&ctx.config.timeouts));
    let registry = DomainRegistry::new(domains, Some(ctx.domains_path()));
    let manager = McpManager::new(
        Arc::clone(&service),
        registry,
        RuleEngine::new(rules),
        llm,
        fleet,
        Some(ctx.fleet_path()),
    );

    println!("corral — chat agent over MCP tool servers. /help for commands.");
    let connected = manager.startup().await;
    let tool_count = manager.all_tools().await.len();
    println!(
        "{} server(s) connected, {} tool(s) available.",
        connected, tool_count
    );

    let health_monitor = service.spawn_health_monitor();

    let repl = Repl::new(manager.clone(), &ctx, provider, args.debug, credentials);
    let result = repl.run().await;

    health_monitor.abort();
    shutdown(&manager).await;
    result
}

/// Graceful shutdown with the 5-second fleet grace period.
async fn shutdown(manager: &McpManager) {
    match tokio::time::timeout(Duration::from_secs(6), manager.shutdown()).await {
        Ok(()) => tracing::info!("shutdown complete"),
        Err(_) => tracing::warn!("shutdown timed out, exiting anyway"),
    }
}

struct Repl {
    manager: Arc<McpManager>,
    strategy_kind: StrategyKind,
    strategy: Arc<dyn Inference>,
    provider: Provider,
    credentials: Credentials,
    session: SessionContext,
    debug: bool,
    query_deadline: Duration,
    react_max_iterations: u32,
    reflection_max_rounds: u32,
    reflection_quality_threshold: f32,
    llm_timeout: Duration,
    llm_model: String,
}

impl Repl {
    fn new(
        manager: Arc<McpManager>,
        ctx: &AppContext,
        provider: Provider,
        debug: bool,
        credentials: Credentials,
    ) -> Self {
        let strategy_kind =
            StrategyKind::from_str(&ctx.config.inference.strategy).unwrap_or(StrategyKind::Simple);
        let mut repl = Self {
            strategy: build_strategy(strategy_kind, manager.clone()),
            manager,
            strategy_kind,
            provider,
            credentials,
            session: SessionContext::new(ctx.config.inference.session_window),
            debug,
            query_deadline: Duration::from_secs(ctx.config.timeouts.query_deadline_secs),
            react_max_iterations: ctx.config.inference.react_max_iterations,
            reflection_max_rounds: ctx.config.inference.reflection_max_rounds,
            reflection_quality_threshold: ctx.config.inference.reflection_quality_threshold,
            llm_timeout: Duration::from_secs(ctx.config.timeouts.llm_request_secs),
            llm_model: ctx.config.llm.model.clone(),
        };
        repl.strategy = repl.make_strategy(strategy_kind);
        repl
    }

    /// Build a strategy with the configured tuning applied.
    fn make_strategy(&self, kind: StrategyKind) -> Arc<dyn Inference> {
        match kind {
            StrategyKind::Reflection => Arc::new(
                ReflectionStrategy::new(self.manager.clone())
                    .with_quality_threshold(self.reflection_quality_threshold),
            ),
            other => build_strategy(other, self.manager.clone()),
        }
    }

    async fn run(mut self) -> Result<(), CorralError> {
        let mut editor: Editor<CorralHelper, rustyline::history::DefaultHistory> =
            Editor::new().map_err(|e| CorralError::Internal(e.to_string()))?;
        editor.set_helper(Some(CorralHelper {
            completer: CommandCompleter,
        }));

        loop {
            let prompt = format!("[{}|{}] > ", self.provider, self.strategy_kind);
            match editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = editor.add_history_entry(&line);
                    if line.starts_with('/') {
                        if !self.dispatch_command(&line, &mut editor).await {
                            break;
                        }
                    } else {
                        self.handle_query(&line).await;
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!("readline error: {}", e);
                    break;
                }
            }
        }
        self.strategy.close().await;
        Ok(())
    }

    /// Returns false when the REPL should exit.
    async fn dispatch_command(
        &mut self,
        line: &str,
        editor: &mut Editor<CorralHelper, rustyline::history::DefaultHistory>,
    ) -> bool {
        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        match command {
            "/quit" => return false,
            "/help" => self.print_help(),
            "/status" => self.print_status().await,
            "/tools" => self.print_tools().await,
            "/servers" => self.print_servers().await,
            "/clear" => {
                self.session.clear();
                println!("session cleared.");
            }
            "/debug" => {
                self.debug = !self.debug;
                println!("debug {}", if self.debug { "on" } else { "off" });
            }
            "/strategy" => match StrategyKind::from_str(arg) {
                Ok(kind) => {
                    self.strategy_kind = kind;
                    self.strategy = self.make_strategy(kind);
                    println!("strategy set to {}", kind);
                }
                Err(e) => println!("{}", e.user_message()),
            },
            "/llm" => match Provider::from_str(arg) {
                Ok(provider) => {
                    match build_client(provider, &self.llm_model, &self.credentials, self.llm_timeout)
                    {
                        Ok(client) => {
                            self.provider = provider;
                            self.manager.set_llm(client).await;
                            println!("LLM provider set to {}", provider);
                        }
                        Err(e) => println!("{}", e.user_message()),
                    }
                }
                Err(e) => println!("{}", e.user_message()),
            },
            "/enable" => self.toggle_server(arg, true).await,
            "/disable" => self.toggle_server(arg, false).await,
            "/addserver" => self.add_server_wizard(editor).await,
            other => println!("unknown command {} — /help lists commands", other),
        }
        true
    }

    fn print_help(&self) {
        println!(
            "commands:\n\
             /help                     this text\n\
             /status                   provider, strategy, fleet summary\n\
             /tools                    tool catalog by domain\n\
             /servers                  server list with health\n\
             /strategy <name>          simple | react | reflection\n\
             /llm <name>               openai | claude | gemini | groq\n\
             /enable [n]               enable server n (list without n)\n\
             /disable [n]              disable server n (list without n)\n\
             /addserver                add a server interactively\n\
             /debug                    toggle debug output\n\
             /clear                    forget the conversation\n\
             /quit                     exit"
        );
    }

    async fn print_status(&self) {
        let statuses = self.manager.server_statuses().await;
        let connected = statuses.iter().filter(|s| s.connected).count();
        let healthy = statuses.iter().filter(|s| s.healthy).count();
        println!(
            "provider: {}\nstrategy: {}\nservers: {} configured, {} connected, {} healthy\n\
             tools: {}\ndomains: {}",
            self.provider,
            self.strategy_kind,
            statuses.len(),
            connected,
            healthy,
            self.manager.all_tools().await.len(),
            self.manager.available_domains().await.join(", ")
        );
    }

    async fn print_tools(&self) {
        let tools = self.manager.all_tools().await;
        if tools.is_empty() {
            println!("no tools available.");
            return;
        }
        for domain in self.manager.available_domains().await {
            let in_domain = self.manager.tools_by_domain(&domain).await;
            if in_domain.is_empty() {
                continue;
            }
            println!("{}:", domain);
            for tool in in_domain {
                println!("  {} — {}", tool.name, tool.description);
            }
        }
    }

    async fn print_servers(&self) {
        let fleet = self.manager.fleet_snapshot().await;
        let statuses = self.manager.server_statuses().await;
        if fleet.mcp_servers.is_empty() {
            println!("no servers configured; /addserver adds one.");
            return;
        }
        for (i, (id, spec)) in fleet.mcp_servers.iter().enumerate() {
            let status = statuses.iter().find(|s| &s.id == id);
            let state = match status {
                Some(s) if s.connected && s.healthy => "connected",
                Some(s) if s.connected => "unhealthy",
                _ if !spec.enabled => "disabled",
                Some(s) if s.last_error.is_some() => "failed",
                _ => "disconnected",
            };
            println!(
                "{}. {} [{}] — {} ({} tool(s))",
                i + 1,
                id,
                state,
                spec.description,
                status.map(|s| s.tool_count).unwrap_or(0)
            );
            if let Some(err) = status.and_then(|s| s.last_error.as_ref()) {
                println!("   last error: {}", err);
            }
        }
    }

    async fn toggle_server(&self, arg: &str, enable: bool) {
        let fleet = self.manager.fleet_snapshot().await;
        let ids: Vec<String> = fleet.mcp_servers.keys().cloned().collect();

        if arg.is_empty() {
            self.print_servers().await;
            return;
        }
        let Some(id) = arg
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| ids.get(i))
        else {
            println!("expected a server number 1..{}", ids.len());
            return;
        };

        let outcome = if enable {
            self.manager.enable_server(id).await.map(|connected| {
                if connected {
                    format!("server '{}' enabled and connected", id)
                } else {
                    format!("server '{}' enabled but failed to connect; see /servers", id)
                }
            })
        } else {
            self.manager
                .disable_server(id)
                .await
                .map(|_| format!("server '{}' disabled", id))
        };
        match outcome {
            Ok(msg) => println!("{}", msg),
            Err(e) => println!("{}", e.user_message()),
        }
    }

    async fn add_server_wizard(
        &self,
        editor: &mut Editor<CorralHelper, rustyline::history::DefaultHistory>,
    ) {
        let ask = |editor: &mut Editor<CorralHelper, rustyline::history::DefaultHistory>,
                   prompt: &str|
         -> Option<String> {
            match editor.readline(prompt) {
                Ok(line) => Some(line.trim().to_string()),
                Err(_) => None,
            }
        };

        let Some(id) = ask(editor, "server id: ") else { return };
        if id.is_empty() {
            println!("aborted: id must not be empty.");
            return;
        }
        let Some(description) = ask(editor, "description: ") else { return };
        let Some(command) = ask(editor, "command (executable + args): ") else { return };
        if command.is_empty() {
            println!("aborted: command must not be empty.");
            return;
        }
        let Some(domain) = ask(editor, "domain (empty for auto-discovery): ") else { return };
        let Some(priority) = ask(editor, "priority 1-5 [3]: ") else { return };

        let spec = ServerSpec {
            id,
            description,
            command,
            domain: (!domain.is_empty()).then_some(domain),
            priority: priority.parse().unwrap_or(3),
            ..Default::default()
        };

        match self.manager.upsert_server(spec).await {
            Ok(true) => println!("server added and connected."),
            Ok(false) => println!("server added; connection failed or disabled, see /servers."),
            Err(e) => println!("{}", e.user_message()),
        }
    }

    async fn handle_query(&mut self, query: &str) {
        let (observer, events) = Observer::channel(64);
        let printer = spawn_event_printer(events, self.debug);

        let cancel = CancelToken::new();
        let max_iterations = match self.strategy_kind {
            StrategyKind::React => Some(self.react_max_iterations),
            StrategyKind::Reflection => Some(self.reflection_max_rounds),
            StrategyKind::Simple => None,
        };
        let opts = InferenceOptions {
            max_iterations,
            debug: self.debug,
            observer,
            session: self.session.clone(),
            deadline: self.query_deadline,
            cancel: cancel.clone(),
        };

        let outcome =
            tokio::time::timeout(self.query_deadline, self.strategy.process_query(query, &opts))
                .await;
        // Close the observer channel so the printer can drain and exit.
        drop(opts);

        let answer = match outcome {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                println!("{}", e.user_message());
                None
            }
            Err(_) => {
                cancel.cancel();
                println!("query exceeded the {}s deadline.", self.query_deadline.as_secs());
                None
            }
        };

        // Printer drains remaining events once the observer sender drops.
        let _ = printer.await;

        if let Some(text) = answer {
            println!("\n{}\n", text);
            self.session.push_user(query);
            self.session.push_assistant(&text);
        }
    }
}

fn spawn_event_printer(
    mut events: tokio::sync::mpsc::Receiver<ObserverEvent>,
    debug: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ObserverEvent::InferenceStart { strategy } => {
                    if debug {
                        println!("· inference start ({})", strategy);
                    }
                }
                ObserverEvent::Thought { text } => {
                    if debug {
                        println!("· thought: {}", text);
                    }
                }
                ObserverEvent::ToolDiscovery { names } => {
                    if debug {
                        println!("· candidate tools: {}", names.join(", "));
                    }
                }
                ObserverEvent::ToolSelection { name, args } => {
                    println!("→ {}({})", name, compact_args(&args));
                }
                ObserverEvent::ToolExecution { name, result } => {
                    if result.success {
                        println!("✓ {} ({} chars)", name, result.content.len());
                    } else {
                        println!("✗ {}: {}", name, result.message);
                    }
                }
                ObserverEvent::PartialResponse { text } => {
                    if debug {
                        println!("· draft: {}", first_line(&text));
                    }
                }
                ObserverEvent::InferenceComplete { .. } => {}
                ObserverEvent::Error { message, .. } => println!("! {}", message),
            }
        }
    })
}

fn compact_args(args: &serde_json::Value) -> String {
    let rendered = args.to_string();
    if rendered.chars().count() > 120 {
        let cut: String = rendered.chars().take(120).collect();
        format!("{}…", cut)
    } else {
        rendered
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
