//! crn-node - Main entry point
//!
//! Runs a single CRN-25 node: bootstraps from the given peers, executes one
//! command, and optionally keeps serving requests afterwards.

use anyhow::{Context, Result};
use crn_node::{bootstrap, CliArgs, Command, Config, CrnNode};
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args).context("Invalid arguments")?;
    config.validate().context("Invalid configuration")?;

    let mut node = build_node(&config).await?;
    bootstrap(&mut node, &config.bootstrap())
        .await
        .context("Bootstrap failed")?;

    for relay in &config.relays {
        node.push_relay(relay);
    }

    if let Err(e) = run_command(&mut node, &config).await {
        error!("{} failed: {}", command_name(&config.command), e);
        return Err(e);
    }

    if !config.linger.is_zero() {
        info!("Serving requests for {:?}", config.linger);
        node.handle_incoming_messages(config.linger.as_millis() as u64).await?;
    }

    info!("crn-node finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}

/// Name, bind and seed a node from configuration
async fn build_node(config: &Config) -> Result<CrnNode> {
    let mut node = CrnNode::new(config.node.clone());
    node.set_node_name(&config.name)?;
    node.bind(config.listen_addr())
        .await
        .with_context(|| format!("Failed to open port {}", config.port))?;
    if let Some(addr) = config.advertise {
        node.set_advertised_addr(addr);
    }
    info!("{} listening on {}", config.name, node.local_addr()?);
    Ok(node)
}

/// Execute the requested command and print its result
async fn run_command(node: &mut CrnNode, config: &Config) -> Result<()> {
    match &config.command {
        Command::Serve => {
            node.handle_incoming_messages(0).await?;
        }
        Command::Get { key } => match node.read(key).await? {
            Some(value) => println!("{}", value),
            None => {
                println!("(not found)");
                info!("{} not found", key);
            }
        },
        Command::Put { key, value } => {
            let acknowledged = node.write(key, value).await?;
            println!("{}", if acknowledged { "acknowledged" } else { "stored locally only" });
        }
        Command::Cas { key, expected, new } => {
            let swapped = node.compare_and_swap(key, expected, new).await?;
            println!("{}", if swapped { "swapped" } else { "rejected" });
        }
        Command::Exists { key } => {
            println!("{}", node.exists(key).await?);
        }
        Command::Ping { name } => {
            let active = node.is_active(name).await?;
            println!("{} is {}", name, if active { "active" } else { "not responding" });
        }
        Command::Dump => {
            let json = serde_json::to_string_pretty(&node.snapshot())
                .context("Failed to serialize node state")?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Serve => "serve",
        Command::Get { .. } => "get",
        Command::Put { .. } => "put",
        Command::Cas { .. } => "cas",
        Command::Exists { .. } => "exists",
        Command::Ping { .. } => "ping",
        Command::Dump => "dump",
    }
}
