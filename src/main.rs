use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tunedrop::model::AudioFormat;

#[derive(Debug, Default)]
struct CliArgs {
    backend: Option<String>,
    format: Option<AudioFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    init_tracing();

    let mut config = tunedrop::config::load_config()?;
    if let Some(backend) = args.backend {
        config.backend_url = backend;
    }
    if let Some(format) = args.format {
        config.audio_format = format;
    }

    tunedrop::app::run(config).await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tunedrop=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--backend" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--backend requires a URL");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--backend cannot be empty");
                }
                out.backend = Some(value.trim().to_string());
            }
            "--format" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--format requires mp3, m4a or opus");
                };
                out.format = Some(value.parse()?);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tunedrop");
    println!("  --backend <url>   Download backend (default http://localhost:8000)");
    println!("  --format <fmt>    Audio format: mp3, m4a or opus");
    println!("  RUST_LOG          Log filter, logs go to stderr");
}
