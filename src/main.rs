//! LAVA job client CLI
//!
//! Entry point for the `lava-ctl` command-line tool.

use clap::{Parser, Subcommand};
use lava_ctl::artifact::ArtifactStore;
use lava_ctl::config::{parse_scalar, persist_key, user_config_path, Config, StorageSettings};
use lava_ctl::document::JobDocumentBuilder;
use lava_ctl::host::{SchedulerClient, Submission, SubmissionOutcome};
use lava_ctl::monitor::WaitOutcome;
use lava_ctl::pipeline::{self, ImageFiles, PipelineError, RunTestOptions};
use lava_ctl::{ExitCode, FailureKind};
use lava_protocol::CorrelationId;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lava-ctl")]
#[command(about = "Submit and follow LAVA test jobs", version)]
struct Cli {
    /// Path to a config file layered over the user config
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override a config key (KEY=VALUE, repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Log at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job definition file as it is
    SubmitJob {
        /// YAML job definition
        file: PathBuf,

        /// Return once the job is queued
        #[arg(long)]
        no_wait: bool,
    },

    /// Build a job from a test suite file and submit it
    RunTest {
        /// Suite file with an optional image and the tests to run
        file: PathBuf,

        /// Catalog image to boot, overriding the suite
        #[arg(long, short = 'i')]
        image: Option<String>,

        /// Return once the job is queued
        #[arg(long)]
        no_wait: bool,
    },

    /// Upload boot artifacts and register them in the image catalog
    UploadImage {
        /// Device type the image boots on
        #[arg(long, short = 'd')]
        device: String,

        /// Kernel file (kernel/rootfs devices)
        #[arg(long, requires = "rootfs", conflicts_with_all = ["image", "patch"])]
        kernel: Option<PathBuf>,

        /// Root filesystem file (kernel/rootfs devices)
        #[arg(long, requires = "kernel")]
        rootfs: Option<PathBuf>,

        /// Disk image (iot2000)
        #[arg(long, requires = "patch")]
        image: Option<PathBuf>,

        /// Patch script (iot2000)
        #[arg(long, requires = "image")]
        patch: Option<PathBuf>,

        /// Catalog name (default: <device><YYYY-MM-DD>)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// List the image catalog
    ListImages {
        /// Print each image's metadata as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the status of a job
    Status {
        /// Job id (e.g. 1234 or 1234.1)
        id: String,
    },

    /// Show the test results of a job
    Results {
        /// Job id (e.g. 1234 or 1234.1)
        id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the scheduler version
    Version,

    /// Read or persist configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print one key of the merged configuration
    Get { key: String },

    /// Persist a key in the user config file (or --config file)
    Set { key: String, value: String },

    /// Print the merged configuration with secrets redacted
    Show,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config.as_deref(), &cli.overrides) {
        Ok(c) => c,
        Err(e) => fail(&e),
    };

    let code = match cli.command {
        Commands::SubmitJob { file, no_wait } => {
            let client = connect(&config);
            report_submission(&client, pipeline::submit_job(&client, &file, !no_wait))
        }
        Commands::RunTest {
            file,
            image,
            no_wait,
        } => {
            let client = connect(&config);
            let mut options = RunTestOptions::new(file)
                .with_config(&config)
                .with_wait(!no_wait);
            options.image = image;
            let builder = JobDocumentBuilder::new();
            let result = pipeline::run_test(&client, &builder, &options, || {
                Ok(ArtifactStore::connect(&StorageSettings::from_config(&config)?)?)
            });
            report_submission(&client, result)
        }
        Commands::UploadImage {
            device,
            kernel,
            rootfs,
            image,
            patch,
            prefix,
        } => run_upload_image(&config, &device, kernel, rootfs, image, patch, prefix.as_deref()),
        Commands::ListImages { json } => run_list_images(&config, json),
        Commands::Status { id } => run_status(&config, &id),
        Commands::Results { id, json } => run_results(&config, &id, json),
        Commands::Version => {
            let client = connect(&config);
            println!("{}", client.version());
            ExitCode::Success
        }
        Commands::Config { action } => run_config(&config, cli.config.as_deref(), action),
    };
    process::exit(code.as_i32());
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge the config layers, then fill unset keys from the environment
fn load_config(explicit: Option<&Path>, overrides: &[String]) -> Result<Config, PipelineError> {
    let cli_layer = if overrides.is_empty() {
        None
    } else {
        let mut layer = Config::default();
        for item in overrides {
            let (key, value) = item.split_once('=').ok_or_else(|| PipelineError::Read {
                path: "--set".to_string(),
                message: format!("expected KEY=VALUE, got '{}'", item),
            })?;
            layer.set(key.trim(), parse_scalar(value))?;
        }
        Some(layer.tree().clone())
    };

    let user = user_config_path();
    let config = Config::load(user.as_deref(), explicit, cli_layer)?;
    Ok(config.with_env(|var| std::env::var(var).ok()))
}

fn connect(config: &Config) -> SchedulerClient {
    match SchedulerClient::connect(config) {
        Ok(client) => {
            tracing::info!(version = %client.version(), "connected to scheduler");
            client
        }
        Err(e) => fail(&PipelineError::from(e)),
    }
}

fn connect_store(config: &Config) -> ArtifactStore<lava_ctl::artifact::SftpRemote> {
    let store = StorageSettings::from_config(config)
        .map_err(PipelineError::from)
        .and_then(|settings| ArtifactStore::connect(&settings).map_err(PipelineError::from));
    match store {
        Ok(store) => store,
        Err(e) => fail(&e),
    }
}

fn fail(error: &PipelineError) -> ! {
    let kind = error.failure_kind();
    eprintln!("Error: {}: {}", kind.description(), error);
    process::exit(kind.exit_code().as_i32());
}

fn report_submission(client: &SchedulerClient, result: Result<Submission, PipelineError>) -> ExitCode {
    let submission = match result {
        Ok(s) => s,
        Err(e) => fail(&e),
    };

    for id in &submission.ids {
        println!("{}", client.settings().job_url(id.correlation()));
    }

    match &submission.outcome {
        SubmissionOutcome::Accepted => {}
        SubmissionOutcome::Passed { summary, .. } => println!("{}", summary),
        SubmissionOutcome::TestsFailed { results, summary } => {
            for result in results.iter().filter(|r| !r.passed()) {
                println!("  {}/{}: {}", result.suite, result.name, result.result);
            }
            println!("{}", summary);
        }
        SubmissionOutcome::JobsFailed(WaitOutcome::JobFailed { failed, .. }) => {
            for (job, status) in failed {
                eprintln!("job {} ended {}", job, status);
            }
        }
        SubmissionOutcome::JobsFailed(_) => {}
        SubmissionOutcome::TimedOut(outcome) => {
            if let WaitOutcome::TimedOut { pending } = outcome {
                for job in pending {
                    eprintln!("job {} still running", job);
                }
            }
        }
    }

    if let Some(kind) = submission.failure_kind() {
        eprintln!("{}", kind.description());
    }
    submission.exit_code()
}

fn run_upload_image(
    config: &Config,
    device: &str,
    kernel: Option<PathBuf>,
    rootfs: Option<PathBuf>,
    image: Option<PathBuf>,
    patch: Option<PathBuf>,
    prefix: Option<&str>,
) -> ExitCode {
    let files = match (kernel, rootfs, image, patch) {
        (Some(kernel), Some(rootfs), None, None) => ImageFiles::KernelRootfs { kernel, rootfs },
        (None, None, Some(image), Some(patch)) => ImageFiles::Image { image, patch },
        _ => {
            eprintln!("Error: give either --kernel and --rootfs, or --image and --patch");
            return FailureKind::LocalValidation.exit_code();
        }
    };

    let mut store = connect_store(config);
    match pipeline::upload_image(&mut store, device, &files, prefix) {
        Ok((name, metadata)) => {
            println!("{}", name);
            for url in [&metadata.kernel, &metadata.rootfs, &metadata.image, &metadata.patch]
                .into_iter()
                .flatten()
            {
                println!("  {}", url);
            }
            ExitCode::Success
        }
        Err(e) => fail(&e),
    }
}

fn run_list_images(config: &Config, json_output: bool) -> ExitCode {
    let mut store = connect_store(config);
    let names = match store.list_catalog() {
        Ok(names) => names,
        Err(e) => fail(&e.into()),
    };

    if !json_output {
        for name in &names {
            println!("{}", name);
        }
        return ExitCode::Success;
    }

    let mut catalog = serde_json::Map::new();
    for name in names {
        match store.get_metadata(&name) {
            Ok(metadata) => {
                let value = serde_json::to_value(&metadata).unwrap_or(serde_json::Value::Null);
                catalog.insert(name, value);
            }
            Err(e) => tracing::warn!(image = %name, error = %e, "skipping unreadable metadata"),
        }
    }
    match serde_json::to_string_pretty(&catalog) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error serializing catalog: {}", e);
            return FailureKind::Storage.exit_code();
        }
    }
    ExitCode::Success
}

fn parse_job_id(id: &str) -> CorrelationId {
    match id.parse::<CorrelationId>() {
        Ok(job) => job,
        Err(e) => {
            eprintln!("Error: invalid job id '{}': {}", id, e);
            process::exit(FailureKind::LocalValidation.exit_code().as_i32());
        }
    }
}

fn run_status(config: &Config, id: &str) -> ExitCode {
    let job = parse_job_id(id);
    let client = connect(config);
    match client.status(job) {
        Ok(status) => {
            println!("{}", status);
            ExitCode::Success
        }
        Err(e) => fail(&e.into()),
    }
}

fn run_results(config: &Config, id: &str, json_output: bool) -> ExitCode {
    let job = parse_job_id(id);
    let client = connect(config);
    let results = match client.fetch_results(job) {
        Ok(results) => results,
        Err(e) => fail(&e.into()),
    };

    if json_output {
        match serde_json::to_string_pretty(&results) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error serializing results: {}", e);
                return FailureKind::Submission.exit_code();
            }
        }
    } else {
        for result in &results {
            println!("{}/{}: {}", result.suite, result.name, result.result);
        }
        println!("{}", lava_ctl::host::ResultsSummary::from_results(&results));
    }
    ExitCode::Success
}

fn run_config(config: &Config, explicit: Option<&Path>, action: ConfigCommands) -> ExitCode {
    match action {
        ConfigCommands::Get { key } => match config.get(&key) {
            Some(serde_json::Value::String(s)) => {
                println!("{}", s);
                ExitCode::Success
            }
            Some(value) => {
                println!("{}", value);
                ExitCode::Success
            }
            None => {
                eprintln!("{} is not set", key);
                FailureKind::Configuration.exit_code()
            }
        },
        ConfigCommands::Set { key, value } => {
            let path = match explicit.map(Path::to_path_buf).or_else(user_config_path) {
                Some(p) => p,
                None => {
                    eprintln!("Error: no config file path (HOME is not set)");
                    return FailureKind::Configuration.exit_code();
                }
            };
            match persist_key(&path, &key, parse_scalar(&value)) {
                Ok(()) => {
                    tracing::info!(key = %key, path = %path.display(), "configuration saved");
                    ExitCode::Success
                }
                Err(e) => fail(&e.into()),
            }
        }
        ConfigCommands::Show => {
            let (tree, redactions) = config.redacted();
            match serde_json::to_string_pretty(&tree) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error serializing config: {}", e);
                    return FailureKind::Configuration.exit_code();
                }
            }
            for key in redactions {
                tracing::debug!(key = %key, "redacted");
            }
            ExitCode::Success
        }
    }
}
