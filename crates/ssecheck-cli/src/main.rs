use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use tracing_subscriber::{fmt, EnvFilter};

use ssecheck_core::report::print_results;
use ssecheck_core::scope::{run_tests, RegexFilters, TestConfiguration};
use ssecheck_core::sse::servicedef::ALL_CAPABILITIES;
use ssecheck_core::sse::SseTestContext;
use ssecheck_core::{ConsoleTestLogger, DebugOutputPolicy, Harness, HarnessConfig};

mod suite;

#[derive(Parser)]
#[command(name = "ssecheck")]
#[command(about = "Contract tests for server-sent-events client implementations", long_about = None)]
struct Cli {
    /// Test service URL
    #[arg(long)]
    url: Option<String>,

    /// External hostname of the test harness
    #[arg(long)]
    host: Option<String>,

    /// Port that the test harness will listen on
    #[arg(long)]
    port: Option<u16>,

    /// Regex pattern(s) to select tests to run
    #[arg(long = "run", value_name = "PATTERN")]
    run: Vec<String>,

    /// Regex pattern(s) to select tests not to run
    #[arg(long = "skip", value_name = "PATTERN")]
    skip: Vec<String>,

    /// Tell the test service to exit after the test run
    #[arg(long)]
    stop_service_at_end: bool,

    /// Show debug output for failed tests
    #[arg(long)]
    debug: bool,

    /// Show debug output for all tests
    #[arg(long)]
    debug_all: bool,

    /// Configuration file to use instead of the default locations
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .wrap_err_with(|| format!("failed to load {}", path.display()))?,
            None => HarnessConfig::load()?,
        };

        if let Some(url) = &self.url {
            config.service.url = url.clone();
        }
        if let Some(host) = &self.host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if self.stop_service_at_end {
            config.service.stop_service_at_end = true;
        }
        if self.debug_all {
            config.reporting.debug_output = DebugOutputPolicy::Always;
        } else if self.debug {
            config.reporting.debug_output = DebugOutputPolicy::OnFailure;
        }

        if config.service.url.is_empty() {
            return Err(eyre!("--url is required"));
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.debug || cli.debug_all);

    let config = cli.load_config()?;
    let filters = RegexFilters::new(&cli.run, &cli.skip).wrap_err("invalid test filter")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to start async runtime")?;

    let harness = runtime
        .block_on(Harness::start(config.clone()))
        .wrap_err("unable to start test harness")?;
    let harness = Arc::new(harness);

    if let Some(description) = filters.describe() {
        println!("{}\n", description);
    }
    let missing = harness.service().missing_capabilities(ALL_CAPABILITIES);
    if !missing.is_empty() {
        println!("Some tests will be skipped because the test service does not support the following capabilities:");
        println!("  {}\n", missing.join(", "));
    }

    println!("Running test suite");
    let test_config = TestConfiguration {
        filter: filters.is_defined().then(|| filters.into_filter()),
        test_logger: Box::new(ConsoleTestLogger::stdout(config.reporting.debug_output)),
        capabilities: harness.capabilities(),
    };
    let ctx = SseTestContext::new(Arc::clone(&harness));
    let results = run_tests(test_config, |t| suite::run_all(t, &ctx));

    println!();
    print_results(&results, &mut io::stdout())?;

    if config.service.stop_service_at_end {
        println!("Stopping test service");
        if let Err(e) = runtime.block_on(harness.service().stop_service()) {
            eprintln!("Error when stopping test service: {}", e);
        }
    }
    runtime.block_on(harness.shutdown());

    if !results.ok() {
        std::process::exit(1);
    }
    Ok(())
}
