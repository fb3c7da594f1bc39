use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use rebufr_decode::MessageStream;
use rebufr_tables::{Descriptor, Entry, Table, TableId, TableType, UnitKind};
use tracing_subscriber::{EnvFilter, prelude::*};

mod report;

#[derive(Parser)]
#[command(version, about = "WMO FM 94 BUFR decoding toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a sectioned report of every message in a file
    Dump(DumpArgs),
    /// Convert an NCEP text or WMO XML table into the canonical XML form
    ConvertTables(ConvertArgs),
    /// Compare two table versions and write the differences
    DiffTables(DiffArgs),
    /// Print an element definition and its code/flag rows
    LookupElement(LookupArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// BUFR file to read
    input: PathBuf,

    /// XML table file used to expand descriptors
    #[arg(short, long)]
    tables: Option<PathBuf>,
}

#[derive(Args)]
struct ConvertArgs {
    /// File to convert
    input: PathBuf,

    /// Input is a WMO XML export
    #[arg(short, long, conflicts_with = "ncep")]
    wmo: bool,

    /// Input is an NCEP text table (the default)
    #[arg(short, long)]
    ncep: bool,

    /// Directory the XML table is written to
    #[arg(short = 'd', long = "dir", default_value = ".")]
    output_dir: PathBuf,

    /// Table type of a WMO export (it does not name its own)
    #[arg(short = 'T', long, required_if_eq("wmo", "true"))]
    table_type: Option<TableTypeArg>,

    /// Master table of a WMO export
    #[arg(short, long, default_value_t = 0)]
    master_table: u8,

    /// Originating center of a WMO export
    #[arg(short = 'o', long)]
    originating_center: Option<u16>,

    /// Table version of a WMO export
    #[arg(short = 'v', long, default_value_t = 0)]
    table_version: u8,
}

#[derive(Args)]
struct DiffArgs {
    /// Table type to compare
    table_type: TableTypeArg,

    /// Version to compare against
    a_version: u8,

    /// Version whose differences are written
    b_version: u8,

    /// Master table the input files were written for
    #[arg(short, long, default_value_t = 0)]
    master_table: u8,

    /// Originating center the input files were written for
    #[arg(short = 'o', long)]
    originating_center: Option<u16>,

    /// Prefix of the output file
    #[arg(short, long, default_value = "diff_table")]
    prefix: String,

    /// Directory holding the input tables and receiving the output
    #[arg(short = 'd', long = "dir", default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct LookupArgs {
    /// Mnemonic (or descriptor with -i) to look up
    field: String,

    /// Look up by mnemonic (the default)
    #[arg(short = 'n', long, conflicts_with = "id")]
    name: bool,

    /// Look up by F-XX-YYY descriptor instead of mnemonic
    #[arg(short = 'i', long)]
    id: bool,

    /// XML table file to search
    #[arg(short, long, default_value = "tables.xml")]
    tables: PathBuf,

    /// Master table to search
    #[arg(short, long, default_value_t = 0)]
    master_table: u8,

    /// Originating center to search
    #[arg(short = 'o', long)]
    originating_center: Option<u16>,

    /// Table version; defaults to the newest one in the file
    #[arg(short = 'v', long)]
    table_version: Option<u8>,
}

/// Thin clap-friendly wrapper so table types parse with a usage error.
#[derive(Clone, Copy)]
struct TableTypeArg(TableType);

impl std::str::FromStr for TableTypeArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self).map_err(|_| {
            format!("unknown table type {s:?} (expected A, B, D, F or an X variant)")
        })
    }
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Decode(#[from] rebufr_decode::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Table(#[from] rebufr_tables::Error),

    #[error("No element matching {0:?}")]
    #[diagnostic(
        code(rebufr::cli::not_found),
        help("Check the mnemonic/descriptor and the -m/-o/-v table selection.")
    )]
    NotFound(String),
}

impl CliError {
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Decode(_) => 3,
            Self::Table(_) | Self::NotFound(_) => 4,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::never("target", "rebufr.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .without_time()
        .with_level(false);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .with_level(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stderr_layer)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Dump(args) => dump(&args),
        Commands::ConvertTables(args) => convert_tables(&args),
        Commands::DiffTables(args) => diff_tables(&args),
        Commands::LookupElement(args) => lookup_element(&args),
    }
}

fn dump(args: &DumpArgs) -> Result<(), CliError> {
    let collection = match &args.tables {
        Some(path) => Some(rebufr_tables::read_xml_file(path)?),
        // pick up a local table file when one is lying around
        None if Path::new("tables.xml").exists() => {
            Some(rebufr_tables::read_xml_file("tables.xml")?)
        }
        None => None,
    };

    let file = File::open(&args.input).map_err(rebufr_decode::Error::from)?;
    let stream = MessageStream::new(BufReader::new(file));
    let messages = stream.collect_messages()?;

    for (index, message) in messages.iter().enumerate() {
        println!("\n{:*^50}", "");
        println!("*{:^48}*", format!("Message {index}"));
        println!("{:*^50}", "");

        let tables = collection
            .as_ref()
            .map(|c| message.tables(c))
            .transpose()?;
        let report = report::render_message(message, tables.as_ref())?;
        println!("{report}");
    }

    Ok(())
}

fn convert_tables(args: &ConvertArgs) -> Result<(), CliError> {
    tracing::debug!(
        wmo = args.wmo,
        ncep = args.ncep || !args.wmo,
        input = %args.input.display(),
        "converting table"
    );

    let table = if args.wmo {
        // clap guarantees the type is present alongside --wmo
        let table_type = args
            .table_type
            .ok_or_else(|| CliError::NotFound("--table-type".to_owned()))?;
        let mut id = TableId::new(table_type.0)
            .with_master(args.master_table)
            .with_version(args.table_version);
        id.originating_center = args.originating_center;
        rebufr_tables::convert_wmo_file(&args.input, id)?
    } else {
        rebufr_tables::convert_ncep_file(&args.input)?
    };

    let path = args.output_dir.join(format!("table_{}.xml", table.id()));
    let out = File::create(&path).map_err(rebufr_tables::Error::from)?;
    rebufr_tables::write_xml_table(&table, out)?;
    println!("{}", path.display());
    Ok(())
}

fn diff_tables(args: &DiffArgs) -> Result<(), CliError> {
    let newest = args.a_version.max(args.b_version);
    let oldest = args.a_version.min(args.b_version);

    let id_at = |version: u8| {
        let mut id = TableId::new(args.table_type.0)
            .with_master(args.master_table)
            .with_version(version);
        id.originating_center = args.originating_center;
        id
    };

    let base = read_single_table(&args.output_dir.join(format!("table_{}.xml", id_at(newest))))?;
    let other = read_single_table(&args.output_dir.join(format!("table_{}.xml", id_at(oldest))))?;

    let diff = base.diff(&other);
    let path = args
        .output_dir
        .join(format!("{}_{}.xml", args.prefix, id_at(oldest)));
    let out = File::create(&path).map_err(rebufr_tables::Error::from)?;
    rebufr_tables::write_xml_table(&diff, out)?;
    println!("{}", path.display());
    Ok(())
}

fn read_single_table(path: &Path) -> Result<Table, CliError> {
    let collection = rebufr_tables::read_xml_file(path)?;
    collection
        .iter()
        .next()
        .cloned()
        .ok_or(CliError::Table(rebufr_tables::Error::NoTable))
}

fn lookup_element(args: &LookupArgs) -> Result<(), CliError> {
    tracing::debug!(
        by_descriptor = args.id,
        by_mnemonic = args.name || !args.id,
        field = %args.field,
        "looking up element"
    );

    let collection = rebufr_tables::read_xml_file(&args.tables)?;

    let version = match args.table_version {
        Some(v) => v,
        None => collection
            .latest_version(
                TableType::B,
                Some(args.master_table),
                args.originating_center,
            )
            .ok_or(CliError::Table(rebufr_tables::Error::NoTable))?,
    };

    let table_b = collection.construct_table_version(
        TableType::B,
        version,
        Some(args.master_table),
        args.originating_center,
    );
    let table_f = collection.construct_table_version(
        TableType::F,
        version,
        Some(args.master_table),
        args.originating_center,
    );

    let element = if args.id {
        let descriptor: Descriptor = args
            .field
            .parse()
            .map_err(|_| CliError::NotFound(args.field.clone()))?;
        table_b.element(descriptor)
    } else {
        table_b
            .entries()
            .filter_map(Entry::as_element)
            .find(|e| e.mnemonic.as_deref() == Some(args.field.as_str()))
    };
    let element = element.ok_or_else(|| CliError::NotFound(args.field.clone()))?;

    println!();
    println!(
        "{}  mnemonic={}  scale={}  reference={}  width={} bits  unit={:?}",
        element.descriptor,
        element.mnemonic.as_deref().unwrap_or("-"),
        element.scale,
        element.reference_value,
        element.bit_width,
        element.unit,
    );
    if let Some(name) = &element.name {
        println!("    {name}");
    }

    if matches!(
        element.unit_kind(),
        UnitKind::CodeTable | UnitKind::FlagTable
    ) {
        for def in table_f.code_flags_for(element.descriptor) {
            if let Some(condition) = def.condition {
                println!(
                    "  when {} = {}:",
                    condition.descriptor, condition.value
                );
            }
            for (code, meaning) in def.codes() {
                println!("    {code:>5} = {meaning}");
            }
        }
    }
    println!();

    Ok(())
}
