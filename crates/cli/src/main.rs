use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use jumpstarter_exporter_config::{apply_mock_drivers, ConfigLocator, DriverTypes};
use jumpstarter_provision::{
    controller_ready, run_setup, ProcessRunner, ProvisionError, ProvisioningRequest, SetupError,
    SetupOutcome, SetupPlan,
};
use jumpstarter_setup_config::Settings;

#[derive(Parser)]
#[command(
    name = "jumpstarter-setup",
    version,
    about = "Jumpstarter distributed mode setup: provision an exporter with mock drivers and a client"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full setup pipeline: check service, create exporter, patch
    /// config with mock drivers, create client
    Setup {
        /// Override the Kubernetes namespace to inspect
        #[arg(long)]
        namespace: Option<String>,
        /// Override the controller endpoint (host:port)
        #[arg(long)]
        controller_endpoint: Option<String>,
        /// Override the exporter resource name
        #[arg(long)]
        exporter_name: Option<String>,
        /// Override the client resource name
        #[arg(long)]
        client_name: Option<String>,
    },
    /// Check whether the Jumpstarter controller is running
    Check {
        /// Override the Kubernetes namespace to inspect
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Inject the mock driver entries into an exporter config file
    Patch {
        /// Path to the exporter YAML config
        file: PathBuf,
        /// Override the storage driver class identifier
        #[arg(long)]
        storage_type: Option<String>,
        /// Override the power driver class identifier
        #[arg(long)]
        power_type: Option<String>,
    },
}

fn build_plan(settings: &Settings) -> SetupPlan {
    SetupPlan {
        namespace: settings.cluster.namespace.clone(),
        controller_marker: settings.cluster.controller_marker.clone(),
        exporter: ProvisioningRequest {
            name: settings.exporter.name.clone(),
            labels: settings.exporter.labels.clone(),
            controller_endpoint: settings.controller.endpoint.clone(),
            insecure_tls: settings.controller.insecure_tls,
            save: settings.exporter.save,
            unsafe_client: false,
        },
        client: ProvisioningRequest {
            name: settings.client.name.clone(),
            labels: settings.exporter.labels.clone(),
            controller_endpoint: settings.controller.endpoint.clone(),
            insecure_tls: settings.controller.insecure_tls,
            save: settings.client.save,
            unsafe_client: settings.client.allow_unsafe,
        },
        drivers: DriverTypes {
            storage: settings.drivers.storage.clone(),
            power: settings.drivers.power.clone(),
        },
    }
}

fn build_locator(settings: &Settings) -> ConfigLocator {
    if settings.paths.exporter_config_dirs.is_empty() {
        ConfigLocator::with_default_candidates()
    } else {
        ConfigLocator::new(settings.paths.exporter_config_dirs.clone())
    }
}

fn report_setup_error(error: &SetupError) {
    match error {
        SetupError::Provision(ProvisionError::CommandFailed { output, .. }) => {
            eprintln!("❌ {error}");
            if !output.stdout.trim().is_empty() {
                eprintln!("stdout: {}", output.stdout.trim_end());
            }
            if !output.stderr.trim().is_empty() {
                eprintln!("stderr: {}", output.stderr.trim_end());
            }
        }
        other => eprintln!("❌ {other}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load_from_dir(&PathBuf::from("."))?;
    let runner = ProcessRunner;

    match cli.command {
        Commands::Setup {
            namespace,
            controller_endpoint,
            exporter_name,
            client_name,
        } => {
            let mut settings = settings;
            if let Some(ns) = namespace {
                settings.cluster.namespace = ns;
            }
            if let Some(endpoint) = controller_endpoint {
                settings.controller.endpoint = endpoint;
            }
            if let Some(name) = exporter_name {
                settings.exporter.name = name;
            }
            if let Some(name) = client_name {
                settings.client.name = name;
            }

            let plan = build_plan(&settings);
            let locator = build_locator(&settings);

            match run_setup(&runner, &locator, &plan).await {
                Ok(SetupOutcome::Completed { .. }) => Ok(ExitCode::SUCCESS),
                Ok(SetupOutcome::ControllerNotReady) => {
                    eprintln!(
                        "❌ Please ensure the Jumpstarter controller is running in namespace '{}'",
                        plan.namespace
                    );
                    Ok(ExitCode::FAILURE)
                }
                Ok(SetupOutcome::ConfigNotFound { exporter }) => {
                    eprintln!("⚠️  Configuration file for exporter '{exporter}' not found in expected locations:");
                    for dir in locator.candidates() {
                        eprintln!("   {}", dir.display());
                    }
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => {
                    report_setup_error(&e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Check { namespace } => {
            let namespace = namespace.unwrap_or(settings.cluster.namespace);
            println!("🔍 Checking Jumpstarter service status...");
            if controller_ready(&runner, &namespace, &settings.cluster.controller_marker).await {
                println!("✅ Jumpstarter service is running");
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Patch {
            file,
            storage_type,
            power_type,
        } => {
            let drivers = DriverTypes {
                storage: storage_type.unwrap_or(settings.drivers.storage),
                power: power_type.unwrap_or(settings.drivers.power),
            };

            println!("📝 Updating exporter configuration at {}", file.display());
            match apply_mock_drivers(&file, &drivers) {
                Ok(applied) => {
                    for slot in &applied.report.replaced {
                        println!("⚠️  Replaced existing '{slot}' driver entry");
                    }
                    println!("✅ Configuration updated with mock drivers");
                    println!("📄 Config content:");
                    println!("{}", "=".repeat(50));
                    print!("{}", applied.contents);
                    println!("{}", "=".repeat(50));
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("❌ Failed to update configuration: {e}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
