use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use pip_bundler::bootstrap::{Sequencer, SubprocessPip};
use pip_bundler::bundle;
use pip_bundler::document;
use pip_bundler::locate;
use pip_bundler::manifest::{Abi, Arch, TargetOs, TargetSpec};
use pip_bundler::package::PypiIndex;

fn usage() -> &'static str {
    "Usage:\n  \
     pip-bundler build --target <Linux|Windows> --arch <32bit|64bit> --abi <cp26m|cp26mu|cp27m|cp27mu> [--dest DIR]\n  \
     pip-bundler build-all [--dest DIR] [--remote URL]\n  \
     pip-bundler bootstrap <document> [--python PATH]\n  \
     pip-bundler install [--root DIR|URL] [--python PATH]"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.split_first() {
        Some((cmd, rest)) if cmd == "build" => cmd_build(rest),
        Some((cmd, rest)) if cmd == "build-all" => cmd_build_all(rest),
        Some((cmd, rest)) if cmd == "bootstrap" => cmd_bootstrap(rest),
        Some((cmd, rest)) if cmd == "install" => cmd_install(rest),
        _ => bail!(usage()),
    }
}

/// Consume the value following a flag.
fn value<'a, I: Iterator<Item = &'a String>>(iter: &mut I, flag: &str) -> Result<String> {
    iter.next()
        .map(String::clone)
        .with_context(|| format!("'{flag}' requires a value\n{}", usage()))
}

fn cmd_build(args: &[String]) -> Result<()> {
    let mut target = None;
    let mut arch = None;
    let mut abi = None;
    let mut dest = String::from("build");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--target" => target = Some(value(&mut iter, "--target")?),
            "--arch" => arch = Some(value(&mut iter, "--arch")?),
            "--abi" => abi = Some(value(&mut iter, "--abi")?),
            "--dest" => dest = value(&mut iter, "--dest")?,
            other => bail!("unknown argument '{other}'\n{}", usage()),
        }
    }

    let target = target.with_context(|| format!("'--target' is required\n{}", usage()))?;
    let arch = arch.with_context(|| format!("'--arch' is required\n{}", usage()))?;
    let abi = abi.with_context(|| format!("'--abi' is required\n{}", usage()))?;

    let spec = TargetSpec::new(
        TargetOs::from_str(&target)?,
        Arch::from_str(&arch)?,
        Abi::from_str(&abi)?,
    );
    let index = PypiIndex::new();
    let path = bundle::generate(&spec, Path::new(&dest), &index)?;
    println!("[build] wrote {}", path.display());
    Ok(())
}

fn cmd_build_all(args: &[String]) -> Result<()> {
    let mut dest = String::from("build");
    let mut remote = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dest" => dest = value(&mut iter, "--dest")?,
            "--remote" => remote = Some(value(&mut iter, "--remote")?),
            other => bail!("unknown argument '{other}'\n{}", usage()),
        }
    }

    let index = PypiIndex::new();
    bundle::build_all(Path::new(&dest), remote.as_deref(), &index)?;
    println!("[build] wrote bundles under '{dest}'");
    Ok(())
}

fn cmd_bootstrap(args: &[String]) -> Result<()> {
    let mut document_path = None;
    let mut python = String::from("python");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--python" => python = value(&mut iter, "--python")?,
            other if !other.starts_with("--") && document_path.is_none() => {
                document_path = Some(other.to_string());
            }
            other => bail!("unknown argument '{other}'\n{}", usage()),
        }
    }
    let document_path =
        document_path.with_context(|| format!("an installer document is required\n{}", usage()))?;

    let text = std::fs::read_to_string(&document_path)
        .with_context(|| format!("reading installer document '{document_path}'"))?;
    let manifest = document::parse(&text)
        .with_context(|| format!("parsing installer document '{document_path}'"))?;

    let mut pip = SubprocessPip::new(&python)?;
    Sequencer::new(&manifest, &mut pip).run()
}

fn cmd_install(args: &[String]) -> Result<()> {
    let mut root = String::from("build");
    let mut python = String::from("python");

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--root" => root = value(&mut iter, "--root")?,
            "--python" => python = value(&mut iter, "--python")?,
            other => bail!("unknown argument '{other}'\n{}", usage()),
        }
    }

    locate::run_install(&root, &python)
}
