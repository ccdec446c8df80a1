use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use demo_data::aws::env;
use demo_data::config::Config;
use demo_data::dataset;
use demo_data::resource;
use demo_data::stack::etl::DEFAULT_DATASET_FILE;
use demo_data::stack::{DemoStack, Extension, StackProps};
use demo_data::synth::{self, OutputFormat};
use demo_data::VERSION;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Compose the data-analytics demo environment as a CloudFormation template
#[derive(Parser, Debug)]
#[command(name = "demo-data", version, about, long_about = None)]
struct Args {
    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize the template (default)
    Synth(SynthArgs),
    /// Print the resources in provisioning order
    Plan(ComposeArgs),
    /// List the known resource kinds
    Kinds,
}

#[derive(ClapArgs, Debug, Default)]
struct ComposeArgs {
    /// Name distinguishing this deployment
    #[arg(long)]
    demo_name: Option<String>,

    /// Target AWS account id
    #[arg(long)]
    account: Option<String>,

    /// Target AWS region
    #[arg(long)]
    region: Option<String>,

    /// Directory holding one folder per dataset
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Directory holding the Glue scripts
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Availability zones used by the VPC
    #[arg(long)]
    max_azs: Option<usize>,

    /// Add the Athena workgroup and named queries
    #[arg(long)]
    with_athena: bool,

    /// Skip the DynamoDB federated query infrastructure
    #[arg(long)]
    no_federation: bool,

    /// Add a VPC
    #[arg(long)]
    with_vpc: bool,

    /// Add the Aurora serverless cluster (implies a VPC)
    #[arg(long)]
    with_aurora: bool,

    /// Add the DynamoDB table
    #[arg(long)]
    with_dynamodb: bool,

    /// Add the CSV classifier and its crawler
    #[arg(long)]
    custom_classifier: bool,

    /// Grant the Glue role administrator access
    #[arg(long)]
    admin_privileges: bool,

    /// Add the Glue ETL job for a dataset file
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = DEFAULT_DATASET_FILE)]
    glue_job: Option<String>,

    /// Add a Glue dev endpoint reachable from this CIDR
    #[arg(long, value_name = "CIDR")]
    dev_endpoint: Option<String>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Persist the effective settings as the default configuration
    #[arg(long)]
    save_config: bool,
}

#[derive(ClapArgs, Debug, Default)]
struct SynthArgs {
    #[command(flatten)]
    compose: ComposeArgs,

    /// Template format
    #[arg(long, value_enum, default_value = "json")]
    format: Format,

    /// Where to write the asset manifest.
    /// Defaults to `<output>.assets.json` when --output is given.
    #[arg(long, value_name = "PATH")]
    asset_manifest: Option<PathBuf>,
}

impl SynthArgs {
    fn asset_manifest_path(&self) -> Option<PathBuf> {
        self.asset_manifest.clone().or_else(|| {
            self.compose
                .output
                .as_ref()
                .map(|output| output.with_extension("assets.json"))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Format {
    #[default]
    Json,
    Yaml,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Yaml => OutputFormat::Yaml,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("demo-data {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("demo-data").join("demo-data.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".demo-data").join("demo-data.log");
    }
    PathBuf::from("demo-data.log")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match args.command {
        Some(Command::Kinds) => {
            print_kinds();
            Ok(())
        }
        Some(Command::Plan(compose)) => {
            let stack = compose_stack(&compose, config)?;
            let steps = synth::plan(stack.graph())?;
            let mut out = String::new();
            for (i, step) in steps.iter().enumerate() {
                out.push_str(&format!(
                    "{:>3}. {} ({}) {}\n",
                    i + 1,
                    step.logical_id,
                    step.resource_type,
                    step.construct_id
                ));
                if !step.depends_on.is_empty() {
                    out.push_str(&format!("     after {}\n", step.depends_on.join(", ")));
                }
            }
            emit(&out, compose.output.as_ref())
        }
        Some(Command::Synth(synth_args)) => run_synth(&synth_args, config),
        None => run_synth(&SynthArgs::default(), config),
    }
}

fn run_synth(synth_args: &SynthArgs, config: Config) -> Result<()> {
    let stack = compose_stack(&synth_args.compose, config)?;
    let template = synth::synthesize(stack.graph(), &stack.stack_name())?;
    let rendered = template.render(synth_args.format.into())?;
    emit(&rendered, synth_args.compose.output.as_ref())?;

    let manifest = synth::asset_manifest(stack.graph())?;
    if manifest.is_empty() {
        return Ok(());
    }
    match synth_args.asset_manifest_path() {
        Some(path) => emit(&manifest.to_json()?, Some(&path)),
        None => {
            eprintln!(
                "The template expects {} staged asset(s); use --asset-manifest to write their manifest",
                manifest.files.len()
            );
            Ok(())
        }
    }
}

fn emit(content: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_kinds() {
    for key in resource::get_all_kind_keys() {
        if let Some(kind) = resource::get_kind(key) {
            println!("{:<40} {:<45} {}", key, kind.cfn_type, kind.display_name);
        }
    }
}

/// Merge the command line over `config` and build the stack
fn compose_stack(compose: &ComposeArgs, mut config: Config) -> Result<DemoStack> {
    if let Some(demo_name) = &compose.demo_name {
        config.demo_name = Some(demo_name.clone());
    }
    if let Some(account) = &compose.account {
        if !env::validate_account_id(account) {
            bail!("Invalid --account {}: expected a 12-digit account id", account);
        }
        config.account = Some(account.clone());
    }
    if let Some(region) = &compose.region {
        if !env::validate_region(region) {
            bail!("Invalid --region {}: expected an id like eu-central-1", region);
        }
        config.region = Some(region.clone());
    }
    if let Some(dir) = &compose.assets_dir {
        config.assets_dir = Some(dir.clone());
    }
    if let Some(dir) = &compose.scripts_dir {
        config.scripts_dir = Some(dir.clone());
    }
    if let Some(max_azs) = compose.max_azs {
        config.max_azs = Some(max_azs);
    }
    // Bad configured values fall back to the environment
    config.account = config.account.take().filter(|a| accept_account(a));
    config.region = config.region.take().filter(|r| accept_region(r));

    let cli_extensions = requested_extensions(compose);
    if !cli_extensions.is_empty() {
        config.extensions = cli_extensions;
    }
    let extensions = if config.extensions.is_empty() {
        Extension::defaults()
    } else {
        config.extensions.clone()
    };

    let account = config.effective_account().ok_or_else(|| {
        anyhow!("No AWS account configured. Set CDK_DEFAULT_ACCOUNT or use --account")
    })?;
    let region = config.effective_region().ok_or_else(|| {
        anyhow!("No AWS region configured. Set CDK_DEFAULT_REGION/AWS_REGION or use --region")
    })?;

    let assets_dir = config.effective_assets_dir();
    let datasets = dataset::list_dataset_folders(&assets_dir);

    let props = StackProps {
        demo_name: config.effective_demo_name(),
        account,
        region,
        assets_dir,
        scripts_dir: config.effective_scripts_dir(),
        datasets,
        max_azs: config.effective_max_azs(),
    };

    if compose.save_config {
        let effective = Config {
            demo_name: Some(props.demo_name.clone()),
            account: Some(props.account.clone()),
            region: Some(props.region.clone()),
            assets_dir: Some(props.assets_dir.clone()),
            scripts_dir: Some(props.scripts_dir.clone()),
            max_azs: Some(props.max_azs),
            extensions: extensions.clone(),
        };
        effective.save().context("Failed to save configuration")?;
        tracing::info!("Configuration saved");
    }

    let mut stack = DemoStack::new(props)?;
    for extension in &extensions {
        stack.apply(extension)?;
    }
    Ok(stack)
}

fn accept_account(account: &str) -> bool {
    let valid = env::validate_account_id(account);
    if !valid {
        tracing::warn!("Ignoring invalid configured account id: {}", account);
    }
    valid
}

fn accept_region(region: &str) -> bool {
    let valid = env::validate_region(region);
    if !valid {
        tracing::warn!("Ignoring invalid configured region: {}", region);
    }
    valid
}

/// Extensions named on the command line, in an order where shared
/// prerequisites come first
fn requested_extensions(compose: &ComposeArgs) -> Vec<Extension> {
    let mut extensions = Vec::new();
    if compose.with_vpc {
        extensions.push(Extension::Vpc);
    }
    if compose.with_dynamodb {
        extensions.push(Extension::Dynamodb);
    }
    if compose.with_aurora {
        extensions.push(Extension::Aurora);
    }
    if compose.with_athena || compose.no_federation {
        extensions.push(Extension::Athena {
            include_federated_query_infra: !compose.no_federation,
        });
    }
    if compose.custom_classifier {
        extensions.push(Extension::CustomClassifier);
    }
    if compose.admin_privileges {
        extensions.push(Extension::AdminPrivileges);
    }
    if let Some(path_to_file) = &compose.glue_job {
        extensions.push(Extension::GlueJob {
            path_to_file: path_to_file.clone(),
        });
    }
    if let Some(cidr) = &compose.dev_endpoint {
        extensions.push(Extension::DevEndpoint {
            ip_address_to_whitelist: cidr.clone(),
        });
    }
    extensions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_compose_flags() {
        let args = Args::parse_from([
            "demo-data",
            "synth",
            "--with-aurora",
            "--glue-job",
            "--dev-endpoint",
            "203.0.113.7/32",
            "--format",
            "yaml",
        ]);
        let Some(Command::Synth(synth_args)) = args.command else {
            panic!("expected synth");
        };
        assert!(matches!(synth_args.format, Format::Yaml));
        assert_eq!(synth_args.asset_manifest_path(), None);
        assert_eq!(
            requested_extensions(&synth_args.compose),
            vec![
                Extension::Aurora,
                Extension::GlueJob {
                    path_to_file: DEFAULT_DATASET_FILE.to_string()
                },
                Extension::DevEndpoint {
                    ip_address_to_whitelist: "203.0.113.7/32".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_plan_rejects_format() {
        assert!(Args::try_parse_from(["demo-data", "plan", "--format", "yaml"]).is_err());
        assert!(Args::try_parse_from(["demo-data", "plan", "--with-vpc"]).is_ok());
    }

    #[test]
    fn test_asset_manifest_next_to_output() {
        let args = Args::parse_from(["demo-data", "synth", "-o", "out/demo.template.json"]);
        let Some(Command::Synth(synth_args)) = args.command else {
            panic!("expected synth");
        };
        assert_eq!(
            synth_args.asset_manifest_path(),
            Some(PathBuf::from("out/demo.template.assets.json"))
        );

        let args = Args::parse_from([
            "demo-data",
            "synth",
            "-o",
            "demo.json",
            "--asset-manifest",
            "assets.json",
        ]);
        let Some(Command::Synth(synth_args)) = args.command else {
            panic!("expected synth");
        };
        assert_eq!(synth_args.asset_manifest_path(), Some(PathBuf::from("assets.json")));
    }

    #[test]
    fn test_invalid_explicit_target_is_an_error() {
        let compose = ComposeArgs {
            account: Some("1234".into()),
            region: Some("eu-central-1".into()),
            ..ComposeArgs::default()
        };
        let err = compose_stack(&compose, Config::default()).unwrap_err();
        assert!(err.to_string().contains("--account"));

        let compose = ComposeArgs {
            account: Some("111122223333".into()),
            region: Some("mars".into()),
            ..ComposeArgs::default()
        };
        let err = compose_stack(&compose, Config::default()).unwrap_err();
        assert!(err.to_string().contains("--region"));
    }

    #[test]
    fn test_invalid_configured_target_falls_back() {
        let assets = tempfile::tempdir().unwrap();
        let compose = ComposeArgs {
            region: Some("eu-central-1".into()),
            assets_dir: Some(assets.path().to_path_buf()),
            ..ComposeArgs::default()
        };
        let config = Config {
            account: Some("not-an-account".into()),
            ..Config::default()
        };
        // The bad value is dropped; the account then comes from the
        // environment, or composition fails with the missing-account hint
        match compose_stack(&compose, config) {
            Ok(stack) => assert_ne!(stack.namer().account(), "not-an-account"),
            Err(err) => assert!(err.to_string().contains("No AWS account")),
        }
    }

    #[test]
    fn test_no_federation_implies_athena() {
        let compose = ComposeArgs {
            no_federation: true,
            ..ComposeArgs::default()
        };
        assert_eq!(
            requested_extensions(&compose),
            vec![Extension::Athena {
                include_federated_query_infra: false
            }]
        );
    }

    #[test]
    fn test_nothing_requested() {
        assert!(requested_extensions(&ComposeArgs::default()).is_empty());
    }

    #[test]
    fn test_compose_with_explicit_target() {
        let assets = tempfile::tempdir().unwrap();
        std::fs::create_dir(assets.path().join("name.basics")).unwrap();
        let compose = ComposeArgs {
            account: Some("111122223333".into()),
            region: Some("eu-central-1".into()),
            assets_dir: Some(assets.path().to_path_buf()),
            ..ComposeArgs::default()
        };
        let stack = compose_stack(&compose, Config::default()).unwrap();
        assert_eq!(stack.datasets().len(), 1);
        assert!(stack.federation().is_some());
        assert_eq!(stack.stack_name(), "demo-data-workshop");
    }
}
