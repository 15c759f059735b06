use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use vnc_driver::{DriverConfig, PngSink, PresentationSink, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "vncdriver")]
#[command(author, version, about = "Drive several VNC sessions in lockstep", long_about = None)]
struct Args {
    /// Driver configuration file (TOML)
    #[arg(short, long, env = "VNCDRIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging level (repeat for more verbosity: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of steps to run
    #[arg(long, default_value_t = 10)]
    steps: u32,

    /// Delay between steps in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Write each connection's frame to DIR/NAME.png after every step
    #[arg(long, value_name = "DIR")]
    render_dir: Option<PathBuf>,

    /// Write an operation timing profile to FILE
    #[arg(long, value_name = "FILE")]
    profile: Option<PathBuf>,

    /// Connections as NAME=ADDRESS (address is host:port or host::port)
    #[arg(value_name = "NAME=ADDRESS", required = true, value_parser = parse_target)]
    targets: Vec<(String, String)>,
}

fn parse_target(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, address)) if !name.is_empty() && !address.is_empty() => {
            Ok((name.to_string(), address.to_string()))
        }
        _ => Err(format!("expected NAME=ADDRESS, got '{}'", s)),
    }
}

fn init_logging(level: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };

    let rendering = args.render_dir.is_some();
    let sink: Box<dyn PresentationSink> = match &args.render_dir {
        Some(dir) => Box::new(PngSink::new(dir)?),
        None => Box::new(vnc_driver::NullSink),
    };
    let session = SessionManager::with_sink(config, sink);

    if let Some(path) = &args.profile {
        session.start_profile(path)?;
    }

    for (name, address) in &args.targets {
        session
            .connect(name, address, "", Vec::new())
            .await
            .with_context(|| format!("connecting {} to {}", name, address))?;
    }

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    for step in 1..=args.steps {
        interval.tick().await;

        let events: HashMap<_, _> = args
            .targets
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();
        let result = session.step(events).await;

        let mut names: Vec<_> = result.infos.keys().collect();
        names.sort();
        for name in names {
            let stats = &result.infos[name];
            info!(
                "step {} {}: updates={} rectangles={} pixels={} bytes={}",
                step, name, stats.updates, stats.rectangles, stats.pixels, stats.bytes
            );
        }
        for (name, err) in &result.errors {
            tracing::error!("step {} {}: {}", step, name, err);
        }

        if rendering {
            for name in session.names() {
                session.render(&name);
            }
        }
    }

    session.close_all().await;
    if args.profile.is_some() {
        session.end_profile()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(
            parse_target("c1=127.0.0.1:5900").unwrap(),
            ("c1".to_string(), "127.0.0.1:5900".to_string())
        );
        assert_eq!(
            parse_target("left=host::5901").unwrap(),
            ("left".to_string(), "host::5901".to_string())
        );
    }

    #[test]
    fn test_parse_target_invalid() {
        assert!(parse_target("c1").is_err());
        assert!(parse_target("=host:1").is_err());
        assert!(parse_target("c1=").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "vncdriver",
            "-vv",
            "--steps",
            "3",
            "--render-dir",
            "/tmp/frames",
            "a=h:1",
            "b=h:2",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.steps, 3);
        assert_eq!(args.targets.len(), 2);
        assert_eq!(args.render_dir, Some(PathBuf::from("/tmp/frames")));
    }

    #[test]
    fn test_args_require_a_target() {
        assert!(Args::try_parse_from(["vncdriver"]).is_err());
    }
}
