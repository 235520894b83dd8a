// IoT Middleware Testbed - Main Entry Point
//
// You can run it via Cargo:
//
// ```console
// $ cargo build --release
// $ ./target/release/iot-testbed --devices 3 --apps 1 --fault dev0@4
// ```
//
// Or with a system description and configuration file:
//
// ```console
// $ ./target/release/iot-testbed --system system.json --config testbed.json --verbose
// ```

use anyhow::Context;
use clap::Parser;
use iot_middleware_testbed::broker::InMemoryBroker;
use iot_middleware_testbed::simulation::{LoggingConfig, LoggingGuard, RunStatistics, SimulationOrchestrator};
use iot_middleware_testbed::types::config::CliArgs;
use iot_middleware_testbed::types::{DeviceModel, SimulationConfig};
use std::process;
use tracing::{error, info, Level};

fn main() {
    // Parse CLI arguments first to check for special flags
    let args = CliArgs::parse();

    if args.print_config {
        match SimulationConfig::default().print_json() {
            Ok(json) => {
                println!("{}", json);
                return;
            }
            Err(e) => {
                eprintln!("Failed to serialize default configuration: {}", e);
                process::exit(1);
            }
        }
    }

    let _logging = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    info!("Starting IoT middleware testbed");

    if let Err(e) = run(args) {
        error!("Testbed failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }

    info!("IoT middleware testbed completed successfully");
}

fn init_logging(args: &CliArgs) -> Result<LoggingGuard, Box<dyn std::error::Error + Send + Sync>> {
    let mut logging = if args.debug {
        LoggingConfig::new().with_level(Level::DEBUG).with_span_events()
    } else if args.verbose {
        LoggingConfig::new().with_level(Level::INFO)
    } else {
        // Default: warnings only
        LoggingConfig::new().with_level(Level::WARN)
    };
    if args.json_logs {
        logging = logging.with_json_format().without_ansi();
    }
    if let Some(dir) = &args.log_dir {
        logging = logging.with_file_logging(dir.clone());
    }
    logging.init()
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let dry_run = args.dry_run;
    let config = SimulationConfig::from_cli_args(args).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    info!("Configuration loaded and validated successfully");

    let orchestrator = SimulationOrchestrator::new(config).context("Failed to create orchestrator")?;
    let description = orchestrator.load_description().context("Failed to load system description")?;
    let plan = description.validate().context("Invalid system description")?;
    let faults = orchestrator.fault_plan(&plan).context("Invalid fault plan")?;

    if dry_run {
        eprintln!("Configuration validation successful!");
        eprintln!("Dry run mode - the testbed will not be executed.");
        print_configuration_summary(orchestrator.config(), plan.entities.len(), plan.permissions.len(), faults.len());
        return Ok(());
    }

    print_configuration_summary(orchestrator.config(), plan.entities.len(), plan.permissions.len(), faults.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("iot-testbed-worker")
        .build()
        .context("Failed to start async runtime")?;
    let broker = InMemoryBroker::new();

    let statistics = orchestrator
        .with_description(description)
        .execute(runtime.handle(), &broker)
        .context("Run failed")?;

    print_statistics(&statistics);
    Ok(())
}

fn print_configuration_summary(config: &SimulationConfig, entities: usize, permissions: usize, faults: usize) {
    eprintln!("\n=== IoT Middleware Testbed ===");
    match &config.system_description {
        Some(path) => eprintln!("System: {} ({} entities, {} permissions)", path, entities, permissions),
        None => eprintln!(
            "System: generated, {} devices x {} apps, {} ({} permissions)",
            config.device_count, config.app_count, config.permission_mode, permissions
        ),
    }
    eprintln!("Logical Time: {}s", config.simulation_time);
    eprintln!("Periods: device {}s, app {}s", config.device_period, config.app_period);
    if matches!(config.device_model(), Ok(DeviceModel::Streetlight)) {
        eprintln!(
            "Streetlights: {} neighbours, activity chance {}, {} ambient steps",
            config.neighbours, config.activity_probability, config.ambient_steps
        );
    }
    eprintln!("Delivery: {} (polling every {}s)", config.delivery, config.polling_interval);
    eprintln!("Realtime Factor: {}", config.realtime_factor);
    eprintln!("Planned Faults: {}", faults);
    if let Some(seed) = config.seed {
        eprintln!("Seed: {}", seed);
    }
    eprintln!();
}

fn print_statistics(statistics: &RunStatistics) {
    println!("{}", statistics);
    if !statistics.devices_in_fault().is_empty() {
        eprintln!(
            "Warning: {} device(s) ended the run in FAULT",
            statistics.devices_in_fault().len()
        );
    }
}
