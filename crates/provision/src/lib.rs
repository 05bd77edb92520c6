use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use jumpstarter_exporter_config::{apply_mock_drivers, ConfigError, ConfigLocator, DriverTypes};

pub mod runner;

pub use runner::{CommandError, CommandOutput, CommandRunner, ProcessRunner};

/// Cluster inspection CLI.
pub const KUBECTL_PROGRAM: &str = "kubectl";

/// Jumpstarter admin CLI.
pub const ADMIN_PROGRAM: &str = "jmp";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{resource} '{name}' creation failed with exit code {code}", code = .output.exit_code)]
    CommandFailed {
        resource: &'static str,
        name: String,
        output: CommandOutput,
    },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Failed to update exporter configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Immutable parameters for one `jmp admin create` invocation.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub name: String,
    /// Sorted so the generated argv is deterministic.
    pub labels: BTreeMap<String, String>,
    pub controller_endpoint: String,
    pub insecure_tls: bool,
    pub save: bool,
    /// Passes `--unsafe` on client creation. Ignored for exporters.
    pub unsafe_client: bool,
}

impl ProvisioningRequest {
    /// argv for `jmp admin create exporter`.
    pub fn exporter_args(&self) -> Vec<String> {
        let mut args = vec![
            "admin".to_string(),
            "create".to_string(),
            "exporter".to_string(),
            self.name.clone(),
        ];
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        self.push_common_flags(&mut args);
        args
    }

    /// argv for `jmp admin create client`.
    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            "admin".to_string(),
            "create".to_string(),
            "client".to_string(),
            self.name.clone(),
        ];
        if self.save {
            args.push("--save".to_string());
        }
        if self.unsafe_client {
            args.push("--unsafe".to_string());
        }
        if self.insecure_tls {
            args.push("--insecure-tls-config".to_string());
        }
        args.push("--controller-endpoint".to_string());
        args.push(self.controller_endpoint.clone());
        args
    }

    fn push_common_flags(&self, args: &mut Vec<String>) {
        if self.save {
            args.push("--save".to_string());
        }
        if self.insecure_tls {
            args.push("--insecure-tls-config".to_string());
        }
        args.push("--controller-endpoint".to_string());
        args.push(self.controller_endpoint.clone());
    }

    /// Kubernetes-style label selector over all labels (`k=v,k=v`).
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Everything the setup pipeline needs for one run.
#[derive(Debug, Clone)]
pub struct SetupPlan {
    pub namespace: String,
    pub controller_marker: String,
    pub exporter: ProvisioningRequest,
    pub client: ProvisioningRequest,
    pub drivers: DriverTypes,
}

/// Terminal state of the setup pipeline. Command failures and config patch
/// failures surface as `SetupError` instead.
#[derive(Debug)]
pub enum SetupOutcome {
    Completed { config_path: PathBuf },
    /// The controller pod was not found or not in `Running` state.
    ControllerNotReady,
    /// Exporter creation succeeded but no config file exists at any
    /// candidate path. A misconfiguration, not a hard failure.
    ConfigNotFound { exporter: String },
}

fn announce(program: &str, args: &[String]) {
    println!("🔧 Running: {} {}", program, args.join(" "));
}

/// Checks whether the Jumpstarter controller is running in `namespace`.
/// Execution errors are reported on the console and mapped to `false`;
/// this check alone never aborts the pipeline.
pub async fn controller_ready(
    runner: &dyn CommandRunner,
    namespace: &str,
    marker: &str,
) -> bool {
    let args = vec![
        "get".to_string(),
        "pods".to_string(),
        "-n".to_string(),
        namespace.to_string(),
    ];
    announce(KUBECTL_PROGRAM, &args);

    match runner.run(KUBECTL_PROGRAM, &args).await {
        Ok(out) if out.success() => {
            if out.stdout.contains(marker) && out.stdout.contains("Running") {
                true
            } else {
                println!("❌ Jumpstarter service not found or not running");
                false
            }
        }
        Ok(out) => {
            println!(
                "❌ Error checking service: exit code {}: {}",
                out.exit_code,
                out.stderr.trim()
            );
            false
        }
        Err(e) => {
            println!("❌ Error checking service: {e}");
            false
        }
    }
}

/// Creates the exporter resource. Non-zero exit is fatal to the pipeline.
pub async fn create_exporter(
    runner: &dyn CommandRunner,
    request: &ProvisioningRequest,
) -> Result<(), ProvisionError> {
    let args = request.exporter_args();
    announce(ADMIN_PROGRAM, &args);

    let output = runner.run(ADMIN_PROGRAM, &args).await?;
    if !output.success() {
        return Err(ProvisionError::CommandFailed {
            resource: "exporter",
            name: request.name.clone(),
            output,
        });
    }
    Ok(())
}

/// Creates the client resource. Same failure handling as exporter creation.
pub async fn create_client(
    runner: &dyn CommandRunner,
    request: &ProvisioningRequest,
) -> Result<(), ProvisionError> {
    let args = request.client_args();
    announce(ADMIN_PROGRAM, &args);

    let output = runner.run(ADMIN_PROGRAM, &args).await?;
    if !output.success() {
        return Err(ProvisionError::CommandFailed {
            resource: "client",
            name: request.name.clone(),
            output,
        });
    }
    Ok(())
}

/// Runs the full setup pipeline: service check, exporter creation, config
/// patch, client creation, usage instructions. Stages run strictly in order;
/// a later stage is never attempted after an earlier one fails.
pub async fn run_setup(
    runner: &dyn CommandRunner,
    locator: &ConfigLocator,
    plan: &SetupPlan,
) -> Result<SetupOutcome, SetupError> {
    println!("🚀 Jumpstarter Distributed Mode Setup");
    println!("{}", "=".repeat(50));

    println!("🔍 Checking Jumpstarter service status...");
    if !controller_ready(runner, &plan.namespace, &plan.controller_marker).await {
        return Ok(SetupOutcome::ControllerNotReady);
    }
    println!("✅ Jumpstarter service is running");

    println!("🚀 Creating new exporter...");
    create_exporter(runner, &plan.exporter).await?;
    println!("✅ Exporter '{}' created successfully", plan.exporter.name);

    let Some(config_path) = locator.locate(&plan.exporter.name) else {
        return Ok(SetupOutcome::ConfigNotFound {
            exporter: plan.exporter.name.clone(),
        });
    };
    println!("📄 Configuration saved to: {}", config_path.display());

    println!(
        "📝 Updating exporter configuration at {}",
        config_path.display()
    );
    let applied = apply_mock_drivers(&config_path, &plan.drivers)?;
    for slot in &applied.report.replaced {
        println!("⚠️  Replaced existing '{slot}' driver entry");
    }
    println!("✅ Configuration updated with mock drivers");
    println!("📄 Config content:");
    println!("{}", "=".repeat(50));
    print!("{}", applied.contents);
    println!("{}", "=".repeat(50));

    println!("👤 Creating client...");
    create_client(runner, &plan.client).await?;
    println!("✅ Client '{}' created successfully", plan.client.name);

    print_usage_instructions(plan);

    Ok(SetupOutcome::Completed { config_path })
}

/// Static usage text shown after a successful setup.
pub fn print_usage_instructions(plan: &SetupPlan) {
    println!();
    println!("{}", "=".repeat(60));
    println!("🎉 Exporter Setup Complete!");
    println!("{}", "=".repeat(60));
    println!();
    println!("Next steps:");
    println!("1. Run the exporter:");
    println!("   jmp run --exporter {}", plan.exporter.name);
    println!();
    println!("2. In another terminal, connect with client:");
    let selector = plan.exporter.label_selector();
    if selector.is_empty() {
        println!("   jmp shell --client {}", plan.client.name);
    } else {
        println!(
            "   jmp shell --client {} --selector {}",
            plan.client.name, selector
        );
    }
    println!();
    println!("3. Test the connection in the client shell:");
    println!("   power.get()");
    println!("   storage.list()");
    println!();
    println!("4. Exit the shell:");
    println!("   exit");
    println!("{}", "=".repeat(60));
}

// ============================================================================
// Test Utilities - exported for integration tests
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted reply for one invocation of a program.
    pub enum MockResponse {
        Output(CommandOutput),
        SpawnFailure,
    }

    /// Mock runner: records every invocation and replays scripted outputs
    /// per program, in order. Unscripted invocations succeed with empty
    /// output.
    #[derive(Default)]
    pub struct MockRunner {
        responses: Mutex<HashMap<String, VecDeque<MockResponse>>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl MockRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, program: &str, response: MockResponse) {
            self.responses
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(response);
        }

        pub fn respond_ok(&self, program: &str, stdout: &str) {
            self.respond(program, MockResponse::Output(output(stdout)));
        }

        pub fn respond_exit(&self, program: &str, exit_code: i32, stderr: &str) {
            self.respond(
                program,
                MockResponse::Output(failed_output(exit_code, stderr)),
            );
        }

        pub fn respond_spawn_failure(&self, program: &str) {
            self.respond(program, MockResponse::SpawnFailure);
        }

        /// All recorded invocations, in order.
        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }

        /// Programs invoked, in order.
        pub fn programs_run(&self) -> Vec<String> {
            self.calls().into_iter().map(|(p, _)| p).collect()
        }
    }

    pub fn output(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed_output(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[async_trait]
    impl CommandRunner for MockRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
        ) -> Result<CommandOutput, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));

            let response = self
                .responses
                .lock()
                .unwrap()
                .get_mut(program)
                .and_then(|queue| queue.pop_front());

            match response {
                Some(MockResponse::Output(out)) => Ok(out),
                Some(MockResponse::SpawnFailure) => Err(CommandError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "mock: program not found",
                    ),
                }),
                None => Ok(output("")),
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
