use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use flatpak_rebuilder::{preflight, rebuild, HostRunner, Installation, RebuildOptions};

fn usage() -> &'static str {
    "Usage:\n  flatpak-rebuilder <remote> <package> [options]\n\nOptions:\n  --installation=<user|system|NAME>   installation to operate on (default: user)\n  --arch=<arch>                       architecture (default: x86_64)\n  --workdir=<path>                    working directory for the rebuild\n  --stats-dir=<path>                  where the statistics file is written\n  --install                           install the rebuilt app afterwards\n  --interactive                       let the package manager prompt"
}

fn parse_options(args: &[String]) -> Result<RebuildOptions> {
    let mut positional = Vec::new();
    let mut installation = Installation::User;
    let mut arch = "x86_64".to_string();
    let mut workdir = None;
    let mut stats_dir = None;
    let mut install = false;
    let mut interactive = false;

    for arg in args {
        if let Some(value) = arg.strip_prefix("--installation=") {
            installation = Installation::parse(value);
        } else if let Some(value) = arg.strip_prefix("--arch=") {
            arch = value.to_string();
        } else if let Some(value) = arg.strip_prefix("--workdir=") {
            workdir = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--stats-dir=") {
            stats_dir = Some(PathBuf::from(value));
        } else if arg == "--install" {
            install = true;
        } else if arg == "--interactive" {
            interactive = true;
        } else if arg.starts_with("--") {
            bail!("unknown option '{}'\n\n{}", arg, usage());
        } else {
            positional.push(arg.clone());
        }
    }

    let [remote, package] = positional.as_slice() else {
        bail!(usage());
    };

    Ok(RebuildOptions {
        remote: remote.clone(),
        package: package.clone(),
        installation,
        arch,
        interactive,
        install,
        workdir,
        stats_dir,
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let opts = match parse_options(&args) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = preflight::check_host_tools() {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match rebuild(&opts, &HostRunner) {
        Ok(outcome) => {
            println!("statistics: {}", outcome.stats_path.display());
            if outcome.reproducible {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("rebuild failed: {err}");
            ExitCode::FAILURE
        }
    }
}
