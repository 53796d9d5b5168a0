//! Command-line interface for the diannex compiler.
//!
//! Exactly one mode is accepted per invocation:
//!
//! | Mode | Purpose |
//! |------|---------|
//! | `--project FILE` | Compile using a JSON project file |
//! | `--generate [NAME]` | Write a fresh project file |
//! | `--cli` | Compile files given on the command line |
//! | `--convert` | Convert a translation file private↔public |
//! | `--upgrade` | Upgrade a translation file by stable ids |
//! | `--to-binary` | Convert a translation file to binary |
//!
//! Exit code 0 on success, 1 on any fatal error (I/O failure, bad mode
//! combination, or accumulated lex/parse/codegen errors).

use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;

use crate::binary;
use crate::compile;
use crate::project::{self, ProjectFormat};
use crate::style::Style;
use crate::translation;

#[derive(Parser)]
#[command(name = "diannex")]
#[command(about = "Universal tool for the diannex dialogue system")]
#[command(version)]
pub struct Cli {
    /// Load project file
    #[arg(short, long, value_name = "FILE")]
    project: Option<PathBuf>,

    /// Generate new project file (defaults to the current directory name)
    #[arg(short, long, value_name = "NAME", num_args = 0..=1, default_missing_value = "")]
    generate: Option<String>,

    /// Don't use a project file and read commands from the CLI
    #[arg(short, long)]
    cli: bool,

    /// Convert a translation file from private to public, or vice versa
    #[arg(long)]
    convert: bool,

    /// Upgrade a translation file to a newer version
    #[arg(long)]
    upgrade: bool,

    /// Convert a public (or private) translation file to a binary format
    #[arg(long)]
    to_binary: bool,

    /// Path to private input file
    #[arg(long, value_name = "FILE")]
    in_private: Option<PathBuf>,

    /// Path to public input file
    #[arg(long, value_name = "FILE")]
    in_public: Option<PathBuf>,

    /// Path to matching private input file
    #[arg(long, value_name = "FILE")]
    in_match: Option<PathBuf>,

    /// Path to newer private input file
    #[arg(long, value_name = "FILE")]
    in_newer: Option<PathBuf>,

    /// Path to output file
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Directory to output binary (default: "./out")
    #[arg(short, long, value_name = "DIR")]
    binary: Option<String>,

    /// Name of output binary file (default: project name)
    #[arg(short, long, value_name = "NAME")]
    name: Option<String>,

    /// Output a public translation file
    #[arg(short = 't', long = "public")]
    public: bool,

    /// Name of output public translation file
    #[arg(short = 'N', long, value_name = "NAME")]
    pubname: Option<String>,

    /// Output private translation files
    #[arg(short = 'T', long = "private")]
    private: bool,

    /// Name of output private translation file
    #[arg(short = 'D', long, value_name = "NAME")]
    privname: Option<String>,

    /// Directory to output private translation files
    #[arg(short = 'd', long, value_name = "DIR")]
    privdir: Option<String>,

    /// Compress the binary using zlib
    #[arg(short = 'C', long)]
    compress: bool,

    /// File(s) to compile
    files: Vec<String>,
}

/// Entry point for the CLI.
pub fn run_cli() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let modes = [
        cli.project.is_some(),
        cli.generate.is_some(),
        cli.cli,
        cli.convert,
        cli.upgrade,
        cli.to_binary,
    ];
    let selected = modes.iter().filter(|&&m| m).count();
    if selected == 0 {
        return Err("No mode specified; see --help.".into());
    }
    if selected > 1 {
        return Err("Too many main commands specified!".into());
    }

    if let Some(name) = &cli.generate {
        let name = if name.is_empty() {
            env::current_dir()?
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        } else {
            name.clone()
        };
        project::generate_project(&name)?;
        return Ok(());
    }

    if cli.convert {
        return cmd_convert(&cli);
    }
    if cli.upgrade {
        return cmd_upgrade(&cli);
    }
    if cli.to_binary {
        return cmd_to_binary(&cli);
    }

    cmd_compile(&cli)
}

fn require<'a>(option: &'a Option<PathBuf>, message: &str) -> Result<&'a PathBuf, Box<dyn Error>> {
    option.as_ref().ok_or_else(|| message.to_string().into())
}

fn write_output(path: &Path, contents: &[u8]) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, contents)?;
    Ok(())
}

fn cmd_convert(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let out = require(&cli.out, "--out is required for --convert!")?;
    println!("Converting...");

    if let Some(input) = &cli.in_private {
        let text = fs::read_to_string(input)?;
        write_output(out, translation::convert_private_to_public(&text).as_bytes())?;
    } else if let Some(input) = &cli.in_public {
        let matching = require(
            &cli.in_match,
            "--in-match is required for --convert and --in-public!",
        )?;
        let public = fs::read_to_string(input)?;
        let matching = fs::read_to_string(matching)?;
        let converted = translation::convert_public_to_private(&public, &matching)?;
        write_output(out, converted.as_bytes())?;
    } else {
        return Err("--in-private or --in-public is required for --convert!".into());
    }

    println!("Completed!");
    Ok(())
}

fn cmd_upgrade(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.in_private.is_some() && cli.in_public.is_some() {
        return Err("--in-private and --in-public cannot be used simultaneously!".into());
    }
    let older_is_private = cli.in_private.is_some();
    let input = cli
        .in_private
        .as_ref()
        .or(cli.in_public.as_ref())
        .ok_or("--in-private or --in-public must be specified!")?;
    let newer = require(&cli.in_newer, "--in-newer is required for --upgrade!")?;
    let out = require(&cli.out, "--out is required for --upgrade!")?;

    println!("Upgrading...");
    let older = fs::read_to_string(input)?;
    let newer = fs::read_to_string(newer)?;
    let upgraded = translation::upgrade_file(&older, older_is_private, &newer)?;
    write_output(out, upgraded.as_bytes())?;
    println!("Completed!");
    Ok(())
}

fn cmd_to_binary(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.in_private.is_some() && cli.in_public.is_some() {
        return Err("--in-private and --in-public cannot be used simultaneously!".into());
    }
    let is_private = cli.in_private.is_some();
    let input = cli
        .in_private
        .as_ref()
        .or(cli.in_public.as_ref())
        .ok_or("--in-private or --in-public must be specified!")?;
    let out = require(&cli.out, "--out is required for --to-binary!")?;

    println!("Converting to binary format...");
    let text = fs::read_to_string(input)?;
    write_output(out, &translation::convert_to_binary(&text, is_private))?;
    println!("Completed!");
    Ok(())
}

fn cmd_compile(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let (mut project, base_dir) = if let Some(path) = &cli.project {
        let project = project::load_project(path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (project, base)
    } else {
        (ProjectFormat::named("out"), PathBuf::from("."))
    };

    // Command-line overrides.
    if !cli.files.is_empty() {
        project.options.files = cli.files.clone();
    }
    if let Some(dir) = &cli.binary {
        project.options.binary_output_dir = dir.clone();
    }
    if let Some(name) = &cli.name {
        project.options.binary_name = name.clone();
    }
    if cli.public {
        project.options.translation_public = true;
    }
    if let Some(name) = &cli.pubname {
        project.options.translation_public_name = name.clone();
    }
    if cli.private {
        project.options.translation_private = true;
    }
    if let Some(name) = &cli.privname {
        project.options.translation_private_name = name.clone();
    }
    if let Some(dir) = &cli.privdir {
        project.options.translation_private_out_dir = dir.clone();
    }
    if cli.cli {
        project.options.compression = cli.compress;
    } else if cli.compress {
        project.options.compression = true;
    }

    println!("Beginning compilation process...");
    let start = Instant::now();

    let mut ctx = match compile::compile(project, &base_dir) {
        Ok(ctx) => ctx,
        Err(errors) => {
            eprintln!("{}", Style::red(&errors.to_string()));
            return Err("Not proceeding with compilation due to fatal errors.".into());
        }
    };

    if ctx.project.options.add_string_ids {
        println!("Writing string IDs...");
        compile::write_string_ids(&ctx)?;
        return Ok(());
    }

    println!("Writing binary...");
    let out_dir = base_dir.join(&ctx.project.options.binary_output_dir);
    fs::create_dir_all(&out_dir)?;
    let binary_name = if ctx.project.options.binary_name.is_empty() {
        if ctx.project.name.is_empty() {
            "out".to_string()
        } else {
            ctx.project.name.clone()
        }
    } else {
        ctx.project.options.binary_name.clone()
    };
    let bytes = binary::write_program(&mut ctx)?;
    fs::write(out_dir.join(format!("{}.dxb", binary_name)), bytes)?;

    if ctx.project.options.translation_public {
        println!("Writing public translation file...");
        let name = if ctx.project.options.translation_public_name.is_empty() {
            binary_name.clone()
        } else {
            ctx.project.options.translation_public_name.clone()
        };
        fs::write(
            out_dir.join(format!("{}.dxt", name)),
            translation::generate_public_file(&ctx),
        )?;
    }

    if ctx.project.options.translation_private {
        println!("Writing private translation file...");
        let priv_dir = base_dir.join(&ctx.project.options.translation_private_out_dir);
        fs::create_dir_all(&priv_dir)?;
        let name = if ctx.project.options.translation_private_name.is_empty() {
            binary_name.clone()
        } else {
            ctx.project.options.translation_private_name.clone()
        };
        fs::write(
            priv_dir.join(format!("{}.dxt", name)),
            translation::generate_private_file(&ctx),
        )?;
    }

    let elapsed = start.elapsed().as_millis();
    let message = if ctx.project.options.compile_finish_message.is_empty() {
        format!("Finished! Took {} milliseconds.", elapsed)
    } else {
        format!(
            "{} Took {} milliseconds.",
            ctx.project.options.compile_finish_message, elapsed
        )
    };
    println!("{}", Style::green(&message));
    Ok(())
}
