// src/main.rs

//! `x11-core-inspect`: interns atoms on the current display and reports what the
//! server answers, one JSON object per line.

use anyhow::Context;
use log::{info, warn};
use serde::Serialize;
use x11_core_bindings::{self as xcore, Atom, ContextGuard};

/// Core protocol error codes, `BadRequest` through `BadImplementation`.
const CORE_ERROR_CODES: std::ops::RangeInclusive<i32> = 1..=17;

#[derive(Serialize)]
struct AtomReport<'a> {
    name: &'a str,
    atom: Atom,
    resolved: Option<String>,
}

#[derive(Serialize)]
struct ErrorReport {
    code: i32,
    text: String,
}

fn print_usage() {
    println!("usage: x11-core-inspect [--errors] [ATOM_NAME...]");
    println!();
    println!("Set X11_CORE_SYNC=1 to run the connection in synchronous mode.");
}

fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let mut show_errors = false;
    let mut names: Vec<String> = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--errors" => show_errors = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            flag if flag.starts_with("--") => {
                warn!("Ignoring unknown option {}", flag);
            }
            _ => names.push(arg),
        }
    }

    // Everything below runs on this thread; make the binding enforce it.
    xcore::set_context_check(ContextGuard::thread_affinity());

    let binding = xcore::core().context("Failed to bind the X11 display")?;
    info!("Bound {}", binding);

    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    binding
        .intern_atoms(&name_refs)
        .context("Failed to intern atoms")?;

    for &name in &name_refs {
        let atom = binding
            .intern_atom(name)
            .with_context(|| format!("Failed to intern {:?}", name))?;
        let resolved = binding.get_atom_name_lossy(atom)?;
        println!(
            "{}",
            serde_json::to_string(&AtomReport {
                name,
                atom,
                resolved
            })?
        );
    }

    if show_errors {
        for code in CORE_ERROR_CODES {
            let text = binding.get_error_text(code)?;
            println!("{}", serde_json::to_string(&ErrorReport { code, text })?);
        }
    }

    println!("{}", serde_json::to_string(&binding.info())?);
    Ok(())
}
