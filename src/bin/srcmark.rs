//! srcmark CLI - translate source to markup XML and back
//!
//! A thin wrapper over the srcmark library. Inputs may be source files,
//! directories, filelists or existing markup documents; the direction is
//! inferred from the input bytes and can be forced with `--extract`.

// Exclude from coverage - CLI binary tested via integration tests
#![cfg_attr(tarpaulin, ignore)]

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use log::warn;
use serde::Deserialize;

use srcmark::core::archive::Transform;
use srcmark::io::{sniff_format, ByteSink, ByteSource, StreamFormat};
use srcmark::pipeline::{translate_inputs, UnitInput};
use srcmark::xml::emitter::Framing;
use srcmark::{decide_framing, Archive, MarkupError, Unit};

/// Translate C, C++, C# and Java source into lossless markup XML and back.
#[derive(Parser, Debug)]
#[command(name = "srcmark")]
#[command(version = srcmark::VERSION)]
#[command(about = "Lossless source <-> markup XML translation")]
#[command(after_help = "EXAMPLES:
  # Translate one file to markup XML on stdout
  srcmark main.cpp

  # Translate a tree into an archive
  srcmark src/ -o project.xml

  # Extract the original sources back out
  srcmark project.xml --extract --to-dir out/

  # Parallel translation with content hashes
  srcmark --jobs 8 a.cpp b.cpp c.java -o all.xml
")]
struct Cli {
    // ═══════════════════════════════════════════════════════════════════
    // INPUT / OUTPUT
    // ═══════════════════════════════════════════════════════════════════
    /// Source files, directories or markup documents ("-" for stdin)
    #[arg(value_name = "INPUT", help_heading = "INPUT/OUTPUT")]
    inputs: Vec<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE", help_heading = "INPUT/OUTPUT")]
    output: Option<PathBuf>,

    /// Read input paths, one per line, from a filelist
    #[arg(long = "files-from", value_name = "FILE", help_heading = "INPUT/OUTPUT")]
    files_from: Option<PathBuf>,

    /// Extract source from markup XML instead of translating to it
    #[arg(long = "extract", conflicts_with = "archive", help_heading = "INPUT/OUTPUT")]
    extract: bool,

    /// Directory extracted sources are written into
    #[arg(long = "to-dir", value_name = "DIR", help_heading = "INPUT/OUTPUT")]
    to_dir: Option<PathBuf>,

    /// Gzip-compress the output
    #[arg(long = "compress", help_heading = "INPUT/OUTPUT")]
    compress: bool,

    /// Config file path (default: .srcmark.json when present)
    #[arg(short = 'c', long = "config", value_name = "FILE", help_heading = "INPUT/OUTPUT")]
    config: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════
    // TRANSLATION
    // ═══════════════════════════════════════════════════════════════════
    /// Language for all inputs [C, C++, C#, Java]
    #[arg(short = 'l', long = "language", value_name = "LANG", help_heading = "TRANSLATION")]
    language: Option<String>,

    /// Map a file extension to a language, e.g. --register-ext h=C++
    #[arg(long = "register-ext", value_name = "EXT=LANG", help_heading = "TRANSLATION")]
    register_ext: Vec<String>,

    /// Declare a user macro, e.g. --macro MACRO1=src:macro
    #[arg(long = "macro", value_name = "TOKEN=TYPE", help_heading = "TRANSLATION")]
    macros: Vec<String>,

    /// Worker threads for parallel translation (default: 4)
    #[arg(short = 'j', long = "jobs", value_name = "N", help_heading = "TRANSLATION")]
    jobs: Option<usize>,

    /// Write units in completion order instead of input order
    #[arg(long = "unstable-order", help_heading = "TRANSLATION")]
    unstable_order: bool,

    // ═══════════════════════════════════════════════════════════════════
    // MARKUP ATTRIBUTES
    // ═══════════════════════════════════════════════════════════════════
    /// url attribute on the root element
    #[arg(long = "url", value_name = "URL", help_heading = "MARKUP ATTRIBUTES")]
    url: Option<String>,

    /// filename attribute for a single input
    #[arg(short = 'f', long = "filename", value_name = "NAME", help_heading = "MARKUP ATTRIBUTES")]
    filename: Option<String>,

    /// version attribute on the emitted units
    #[arg(short = 's', long = "src-version", value_name = "VER", help_heading = "MARKUP ATTRIBUTES")]
    src_version: Option<String>,

    /// Register a namespace, e.g. --xmlns foo=http://example.com
    #[arg(long = "xmlns", value_name = "PREFIX=URI", help_heading = "MARKUP ATTRIBUTES")]
    xmlns: Vec<String>,

    /// Tab stop recorded on the root element
    #[arg(long = "tabs", value_name = "N", help_heading = "MARKUP ATTRIBUTES")]
    tabs: Option<usize>,

    /// Record a UTC timestamp attribute on each unit
    #[arg(long = "timestamp", help_heading = "MARKUP ATTRIBUTES")]
    timestamp: bool,

    // ═══════════════════════════════════════════════════════════════════
    // MARKUP OPTIONS
    // ═══════════════════════════════════════════════════════════════════
    /// Force full-archive framing even for a single input
    #[arg(long = "archive", help_heading = "MARKUP OPTIONS")]
    archive: bool,

    /// Position markup namespace
    #[arg(long = "position", help_heading = "MARKUP OPTIONS")]
    position: bool,

    /// Declare the preprocessor namespace on the root
    #[arg(long = "cpp", help_heading = "MARKUP OPTIONS")]
    cpp: bool,

    /// Literal markup for string/char/number literals
    #[arg(long = "literal", help_heading = "MARKUP OPTIONS")]
    literal: bool,

    /// Per-unit content hash attribute (default: on)
    #[arg(long = "hash", overrides_with = "no_hash", help_heading = "MARKUP OPTIONS")]
    hash: bool,

    /// Disable the per-unit content hash
    #[arg(long = "no-hash", help_heading = "MARKUP OPTIONS")]
    no_hash: bool,

    /// Omit the XML declaration
    #[arg(long = "no-xml-decl", help_heading = "MARKUP OPTIONS")]
    no_xml_decl: bool,

    /// Apply an XPath transformation (stored; changes framing policy)
    #[arg(long = "xpath", value_name = "EXPR", help_heading = "MARKUP OPTIONS")]
    xpath: Vec<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Optional project configuration, the same knobs as the command line
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    jobs: Option<usize>,
    #[serde(default)]
    extensions: std::collections::HashMap<String, String>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::UnknownArgument => 3,
                ErrorKind::InvalidValue | ErrorKind::ValueValidation => 7,
                ErrorKind::ArgumentConflict => 15,
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = e.print();
                    return 0;
                }
                _ => 1,
            };
            let _ = e.print();
            return code;
        }
    };

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("srcmark: {e:#}");
            match e.downcast_ref::<MarkupError>() {
                Some(me) => me.exit_code(),
                None => 1,
            }
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<i32> {
    let file_config = load_config(cli.config.as_deref())?;
    let mut archive = configure_archive(&cli, &file_config)?;

    let mut inputs = cli.inputs.clone();
    let mut used_filelist = false;
    if let Some(list) = &cli.files_from {
        used_filelist = true;
        let text = std::fs::read_to_string(list)
            .with_context(|| format!("reading filelist {}", list.display()))?;
        inputs.extend(text.lines().filter(|l| !l.trim().is_empty()).map(PathBuf::from));
    }
    if inputs.is_empty() {
        anyhow::bail!("no input given");
    }

    // expand directories into their source files
    let mut any_dir = false;
    let mut files: Vec<PathBuf> = Vec::new();
    for input in &inputs {
        if input.as_os_str() == "-" {
            files.push(input.clone());
        } else if input.is_dir() {
            any_dir = true;
            collect_dir(&archive, input, &mut files)?;
        } else {
            files.push(input.clone());
        }
    }
    if files.is_empty() {
        anyhow::bail!("no translatable files found");
    }

    if cli.extract || all_markup(&files)? {
        return extract_sources(&cli, archive, &files);
    }

    let framing = decide_framing(
        files.len(),
        any_dir || used_filelist,
        archive.options(),
        archive.transforms(),
    );
    if framing == Framing::Full {
        archive.enable_full_archive()?;
    }

    // read all inputs up front; the pipeline owns translation
    let mut work: Vec<UnitInput> = Vec::with_capacity(files.len());
    for path in &files {
        let source = match read_input(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("{e:#}");
                continue;
            }
        };
        let mut unit = Unit::new();
        if let Some(lang) = &cli.language {
            unit.set_language(srcmark::Language::from_name(lang)?);
        }
        let name = match (&cli.filename, files.len()) {
            (Some(name), 1) => name.clone(),
            _ => path.to_string_lossy().into_owned(),
        };
        if path.as_os_str() != "-" || cli.filename.is_some() {
            unit.set_filename(name);
        }
        if let Some(version) = &cli.src_version {
            unit.set_version(version);
        }
        if cli.timestamp {
            let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            unit.set_timestamp(stamp.to_string());
        }
        work.push(UnitInput { unit, source });
    }
    if work.is_empty() {
        anyhow::bail!("no readable input");
    }

    open_output(&cli, &mut archive)?;
    let jobs = cli
        .jobs
        .or(file_config.jobs)
        .unwrap_or(srcmark::pipeline::ParseQueue::DEFAULT_THREADS);
    let stats = translate_inputs(&mut archive, work, jobs, cli.unstable_order)?;
    if let Some(fatal) = stats.fatal {
        return Err(fatal.into());
    }
    if stats.errors > 0 {
        warn!("{} unit(s) skipped", stats.errors);
    }
    Ok(0)
}

fn configure_archive(cli: &Cli, file_config: &FileConfig) -> anyhow::Result<Archive> {
    let mut archive = Archive::new();
    let mut options = archive.options().clone();
    options.position = cli.position;
    options.cpp = cli.cpp;
    options.literal = cli.literal;
    options.full_archive = cli.archive;
    if cli.no_hash {
        options.hash = false;
    }
    if cli.no_xml_decl {
        options.xml_decl = false;
    }
    archive.set_options(options)?;

    if let Some(language) = &cli.language {
        archive.set_language(language)?;
    }
    if let Some(url) = &cli.url {
        archive.set_url(url)?;
    }
    if let Some(version) = &cli.src_version {
        archive.set_version(version)?;
    }
    if let Some(tabs) = cli.tabs {
        archive.set_tabstop(tabs)?;
    }
    archive.set_output_compression(cli.compress)?;

    for (ext, lang) in file_config.extensions.iter() {
        archive.register_file_extension(ext, lang)?;
    }
    for pair in &cli.register_ext {
        let (ext, lang) = split_pair(pair).context("--register-ext expects EXT=LANG")?;
        archive.register_file_extension(ext, lang)?;
    }
    for pair in &cli.xmlns {
        let (prefix, uri) = split_pair(pair).context("--xmlns expects PREFIX=URI")?;
        archive.register_namespace(prefix, uri)?;
    }
    for pair in &cli.macros {
        let (token, mtype) = split_pair(pair).context("--macro expects TOKEN=TYPE")?;
        archive.register_macro(token, mtype)?;
    }
    for expr in &cli.xpath {
        archive.add_transform(Transform::XPath(expr.clone()))?;
    }
    Ok(archive)
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(".srcmark.json");
            if !default.exists() {
                return Ok(FileConfig::default());
            }
            default
        }
    };
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn collect_dir(archive: &Archive, dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if archive
            .language_for_filename(&path.to_string_lossy())
            .is_some()
        {
            files.push(path.to_path_buf());
        } else {
            warn!("skipping {} (unknown extension)", path.display());
        }
    }
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        return Ok(bytes);
    }
    let source = ByteSource::from_path(path)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(source.read_to_end()?)
}

/// True when every input is already markup XML
fn all_markup(files: &[PathBuf]) -> anyhow::Result<bool> {
    for path in files {
        if path.as_os_str() == "-" {
            return Ok(false);
        }
        let bytes = read_head(path)?;
        if sniff_format(&bytes) != StreamFormat::Xml {
            return Ok(false);
        }
    }
    Ok(true)
}

fn read_head(path: &Path) -> anyhow::Result<Vec<u8>> {
    use std::io::Read as _;
    let mut head = [0u8; 8];
    let mut file = std::fs::File::open(path)?;
    let n = file.read(&mut head)?;
    Ok(head[..n].to_vec())
}

fn open_output(cli: &Cli, archive: &mut Archive) -> anyhow::Result<()> {
    match &cli.output {
        Some(path) => archive.write_open_path(path)?,
        None => archive.write_open_sink(ByteSink::to_writer(
            Box::new(std::io::stdout()),
            cli.compress,
        ))?,
    }
    Ok(())
}

/// XML → source: write each unit's original bytes back out
fn extract_sources(cli: &Cli, _config: Archive, files: &[PathBuf]) -> anyhow::Result<i32> {
    for path in files {
        let mut input = Archive::new();
        input
            .read_open_path(path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut index = 0usize;
        let mut combined: Vec<u8> = Vec::new();
        while let Some(unit) = input.read_unit()? {
            let source = unit.source().unwrap_or(b"");
            match (&cli.to_dir, &cli.output) {
                (Some(dir), _) => {
                    let name = unit
                        .filename()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("unit{index}"));
                    let target = dir.join(&name);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&target, source)?;
                }
                (None, Some(_)) => combined.extend_from_slice(source),
                (None, None) => {
                    use std::io::Write as _;
                    std::io::stdout().write_all(source)?;
                }
            }
            index += 1;
        }
        if let (None, Some(output)) = (&cli.to_dir, &cli.output) {
            std::fs::write(output, &combined)?;
        }
        input.close()?;
    }
    Ok(0)
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    pair.split_once('=')
}
