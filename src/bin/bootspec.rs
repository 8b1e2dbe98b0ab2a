use bootspec::{load_config, load_spec, telemetry, Bootstrap};
use bootspec_invoker::{connect, daemon_host, is_local_daemon, skip_port_probe, Invoker, RunRequest};
use bootspec_models::{parse_env_assignment, BootstrapError, Config, EnvMap, PortBinding};
use bootspec_packaging::{BuildCache, BuildContext, BuildPlan, DockerImageBackend, ImageBuilder};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "bootspec")]
#[command(about = "Build and run containerised Python services from a build spec")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Build spec descriptor
    #[arg(long, global = true, default_value = "bootspec.toml")]
    spec: PathBuf,

    /// Config file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated Dockerfile
    Render,
    /// Check the build spec and the build context without building
    Validate {
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,
    },
    /// Print the effective environment
    Env {
        /// Override, as KEY=VALUE
        #[arg(short = 'e', long = "env")]
        env: Vec<String>,
    },
    /// Build the image
    Build {
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Tag instead of the content-addressed default
        #[arg(long)]
        tag: Option<String>,
    },
    /// Start a process from a built image
    Run {
        /// Image tag
        #[arg(long)]
        image: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Build, then run
    Up {
        /// Build context directory
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Tag instead of the content-addressed default
        #[arg(long)]
        tag: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Environment override, as KEY=VALUE
    #[arg(short = 'e', long = "env")]
    env: Vec<String>,
    /// Port binding, as [IP:]HOST:CONTAINER or PORT
    #[arg(short = 'p', long = "publish")]
    publish: Vec<String>,
    /// Return once started instead of waiting for Ctrl-C
    #[arg(long)]
    detach: bool,
}

impl RunArgs {
    fn request(&self) -> Result<RunRequest, BootstrapError> {
        Ok(RunRequest {
            env_overrides: parse_overrides(&self.env)?,
            port_bindings: self
                .publish
                .iter()
                .map(|raw| raw.parse::<PortBinding>())
                .collect::<Result<_, _>>()?,
        })
    }
}

fn parse_overrides(raw: &[String]) -> Result<EnvMap, BootstrapError> {
    raw.iter().map(|entry| parse_env_assignment(entry)).collect()
}

type DockerBootstrap = Bootstrap<DockerImageBackend, Invoker>;

fn bootstrap(config: &Config, spec_path: &Path) -> Result<DockerBootstrap, BootstrapError> {
    let spec = load_spec(spec_path)?;
    let docker = connect(&config.docker)?;
    let cache = BuildCache::new(PathBuf::from(&config.data.dir))?;
    let builder = ImageBuilder::new(
        Arc::new(DockerImageBackend::new(docker.clone())),
        cache,
        config.image.repository.clone(),
    );
    let app = Bootstrap::new(
        spec,
        builder,
        Arc::new(Invoker::new(docker)),
        config.run.clone(),
    );

    let host = daemon_host(&config.docker);
    if is_local_daemon(host.as_deref()) {
        Ok(app)
    } else {
        info!("Daemon at {:?} is remote, leaving port checks to it", host);
        Ok(app.with_port_probe(skip_port_probe))
    }
}

fn render(spec_path: &Path) -> Result<String, BootstrapError> {
    let spec = load_spec(spec_path)?;
    spec.validate()?;
    Ok(BuildPlan::from_spec(&spec).render())
}

fn env_lines(spec_path: &Path, raw: &[String]) -> Result<Vec<String>, BootstrapError> {
    let spec = load_spec(spec_path)?;
    let overrides = parse_overrides(raw)?;
    Ok(bootspec_models::merge_env(spec.env_defaults(), &overrides)
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect())
}

/// The single line written to stderr when a command fails.
fn error_line(e: &BootstrapError) -> Result<String, serde_json::Error> {
    serde_json::to_string(&e.to_error_shape())
}

async fn run_and_wait(app: &DockerBootstrap, args: &RunArgs) -> Result<(), BootstrapError> {
    let instance = app.run(args.request()?).await?;
    let launcher = app.launcher();

    if let Err(e) = launcher.wait_ready(&instance).await {
        error!("{}", launcher.logs(&instance.container_id).await.unwrap_or_default());
        launcher.stop(&instance.container_id).await?;
        return Err(e);
    }

    for binding in &instance.port_bindings {
        println!("{} {}", instance.name, binding);
    }
    if args.detach {
        println!("{}", instance.container_id);
        return Ok(());
    }

    info!("Press Ctrl-C to stop {}", instance.name);
    signal::ctrl_c().await?;
    info!("Stopping {}", instance.name);
    launcher.stop(&instance.container_id).await
}

async fn execute(cli: Cli, config: Config) -> Result<(), BootstrapError> {
    match cli.command {
        Commands::Render => print!("{}", render(&cli.spec)?),
        Commands::Validate { context } => {
            let spec = load_spec(&cli.spec)?;
            spec.validate()?;
            BuildContext::new(&context).validate(&spec)?;
            BuildPlan::from_spec(&spec).verify_order()?;
            println!("ok");
        }
        Commands::Env { env } => {
            for line in env_lines(&cli.spec, &env)? {
                println!("{line}");
            }
        }
        Commands::Build { context, tag } => {
            let mut app = bootstrap(&config, &cli.spec)?;
            let image = app.build(&context, tag.as_deref()).await?;
            println!("{} {}", image.tag, image.id);
        }
        Commands::Run { image, run } => {
            let mut app = bootstrap(&config, &cli.spec)?;
            app.use_existing(&image).await?;
            run_and_wait(&app, &run).await?;
        }
        Commands::Up { context, tag, run } => {
            let mut app = bootstrap(&config, &cli.spec)?;
            let image = app.build(&context, tag.as_deref()).await?;
            println!("{} {}", image.tag, image.id);
            run_and_wait(&app, &run).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    };
    telemetry::init(&config.log)?;

    if let Err(e) = execute(cli, config).await {
        error!(error_type = e.error_type(), "{}", e);
        eprintln!("{}", error_line(&e)?);
        std::process::exit(e.exit_code());
    }
    Ok(())
}
