mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use mf_convert::catalog::probe_assimp;
use mf_convert::{ConversionRequest, ConversionService, TaskOutput, AUTO_FORMAT};
use mf_core::config::Config;
use mf_core::FormatCatalog;
use tokio_util::sync::CancellationToken;

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting meshforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Storage root: {}", config.storage.root.display());

    mf_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults based on --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "meshforge=trace,mf_core=trace,mf_store=trace,mf_convert=trace,mf_server=trace,tower_http=debug".to_string()
        } else {
            "meshforge=info,mf_store=info,mf_convert=info,mf_server=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().or_else(Config::path_from_env);

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, config_path.as_deref()))
        }
        Commands::Convert {
            input,
            to,
            from,
            output,
            cache,
        } => {
            let config = Config::load_or_default(config_path.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(config, &input, from, &to, output, cache))
        }
        Commands::Formats { json } => {
            let config = Config::load_or_default(config_path.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list_formats(&config, json))
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(config_path.as_deref());
            check_tools(&config)
        }
        Commands::Validate { config } => validate_config(config.or(config_path).as_deref()),
        Commands::Version => {
            println!("meshforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn is_uri(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

async fn convert(
    mut config: Config,
    input: &str,
    from: String,
    to: &str,
    output: Option<PathBuf>,
    cache: bool,
) -> Result<()> {
    // Without --cache nothing needs to outlive this process, so work in a
    // private storage root instead of the shared one.
    let scratch = if cache { None } else { Some(tempfile::tempdir()?) };
    if let Some(dir) = &scratch {
        config.storage.root = dir.path().to_path_buf();
    }

    let service = ConversionService::open(&config, CancellationToken::new()).await?;

    let request = if is_uri(input) {
        ConversionRequest::from_uri(from, to, input)
    } else {
        let data = tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {input}"))?;
        let from = if from == AUTO_FORMAT {
            service
                .formats()
                .derive_format(input)
                .map(|(name, _)| name.to_string())
                .with_context(|| format!("Could not derive the format of {input}; pass --from"))?
        } else {
            from
        };
        ConversionRequest::from_bytes(from, to, data)
    };

    let result = service.run_direct(request.cached(cache)).await;
    service.shutdown().await;

    match result? {
        TaskOutput::Cached { hash } => {
            let stored = service.fetch_by_hash(&hash)?;
            println!("{hash}");
            tracing::info!("Cached {} at {}", stored.filename, stored.path.display());
        }
        TaskOutput::File { path, filename } => {
            let target = output.unwrap_or_else(|| {
                if is_uri(input) {
                    PathBuf::from(filename)
                } else {
                    let stem = Path::new(input)
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "output".to_string());
                    PathBuf::from(format!("{stem}{}", service.formats().extension(to)))
                }
            });
            tokio::fs::copy(&path, &target)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!("Failed to remove {}: {e}", path.display());
            }
            println!("{}", target.display());
        }
    }
    Ok(())
}

async fn list_formats(config: &Config, json: bool) -> Result<()> {
    let mut catalog = FormatCatalog::default();
    let scratch = tempfile::tempdir()?;
    if let Err(e) = probe_assimp(&config.tools, scratch.path(), &mut catalog).await {
        eprintln!("Could not probe assimp, showing built-in formats only: {e}");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    for (title, names) in [
        ("Input formats", catalog.input_formats()),
        ("Output formats", catalog.output_formats()),
    ] {
        println!("{title}:");
        for name in names {
            let description = catalog
                .get(name)
                .map(|f| f.description.as_str())
                .unwrap_or_default();
            println!("  {name:<8} {description}");
        }
        println!();
    }
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let mut all_ok = true;
    for tool in mf_convert::check_tools(&config.tools) {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };
        print!("{} {}", status, tool.name);
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    let ldraw = &config.tools.ldraw_dir;
    if ldraw.is_dir() {
        println!("✓ LDraw library - {}", ldraw.display());
    } else {
        all_ok = false;
        println!("✗ LDraw library - {} not found", ldraw.display());
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all conversions.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Storage root: {}", config.storage.root.display());
    println!("  ldrconvert: {}", config.tools.ldrconvert_path.display());
    println!("  assimp: {}", config.tools.assimp_path.display());
    println!("  LDRAWDIR: {}", config.tools.ldraw_dir.display());
    println!("  Task TTL: {}s", config.tasks.ttl_secs);

    for warning in config.validate() {
        println!("  warning: {warning}");
    }
    Ok(())
}
