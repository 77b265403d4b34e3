#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capx_core::{Discretization, PreconditionerKind, RunContext, SolverConfig};
use capx_hierarchy::{build_super_hierarchy, AxisCount, LaplaceKernel};
use capx_io::{check_diagonal_dominance, check_off_diagonal_sign, parse_deck, ParsedDeck};
use capx_solve::{conductor_labels, select_preconditioner_kind};

#[derive(Parser, Debug)]
#[command(
    name = "capx",
    about = "Boundary-element capacitance extraction",
    long_about = "Boundary-element capacitance extraction.\n\nParse a FasterCap-style input deck, auto-refine its mesh, and solve for the conductors' mutual capacitance matrix.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Parse, auto-refine, and solve an input deck for its capacitance matrix.
    Solve {
        /// Input deck path.
        deck: PathBuf,

        /// Problem dimensionality.
        #[arg(long, value_enum, default_value_t = DimensionOpt::D3)]
        dimension: DimensionOpt,

        /// Discretization scheme.
        #[arg(long, value_enum, default_value_t = DiscretizationOpt::Collocation)]
        discretization: DiscretizationOpt,

        /// Preconditioner family. Ignored if `--auto-precond` is set.
        #[arg(long, value_enum, default_value_t = PreconditionerOpt::Jacobi)]
        preconditioner: PreconditionerOpt,

        /// Pick a preconditioner automatically from the initial mesh size
        /// rather than the fixed family in `--preconditioner`.
        #[arg(long, default_value_t = false)]
        auto_precond: bool,

        /// `-kc`: reuse a cached run's links instead of rebuilding them.
        #[arg(long, default_value_t = false)]
        reuse_cached_links: bool,

        /// `-km`: skip mesh refinement and solve the deck's geometry verbatim.
        #[arg(long, default_value_t = false)]
        skip_mesh_refinement: bool,

        #[arg(long, default_value_t = SolverConfig::default().gmres_tolerance)]
        gmres_tolerance: f64,

        #[arg(long, default_value_t = SolverConfig::default().gmres_max_iterations)]
        gmres_max_iterations: usize,

        #[arg(long, default_value_t = false)]
        gmres_reorthogonalize: bool,

        #[arg(long, default_value_t = SolverConfig::default().max_mesh_refinement_levels)]
        max_mesh_refinement_levels: u32,

        #[arg(long, default_value_t = SolverConfig::default().initial_mesh_eps)]
        initial_mesh_eps: f64,

        #[arg(long, default_value_t = SolverConfig::default().eps_ratio)]
        eps_ratio: f64,

        #[arg(long, default_value_t = SolverConfig::default().mesh_curv_coeff)]
        mesh_curv_coeff: f64,

        #[arg(long, default_value_t = SolverConfig::default().auto_max_error)]
        auto_max_error: f64,

        #[arg(long, default_value_t = SolverConfig::default().auto_max_iterations)]
        auto_max_iterations: u32,

        /// Abort the run once tracked allocations exceed this many MiB.
        #[arg(long)]
        memory_limit_mb: Option<u64>,

        /// Page link storage out to disk once it grows past `--ooc-ratio`
        /// times free memory.
        #[arg(long, default_value_t = false)]
        out_of_core: bool,

        #[arg(long)]
        ooc_working_dir: Option<PathBuf>,

        #[arg(long, default_value_t = SolverConfig::default().ooc_ratio)]
        ooc_ratio: f64,

        /// Output format for the capacitance matrix.
        #[arg(long, value_enum, default_value_t = MatrixFormat::Text)]
        format: MatrixFormat,

        /// Output path; prints to stdout if omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Parse a deck and print a summary without solving.
    Inspect {
        /// Input deck path.
        deck: PathBuf,

        #[arg(long, value_enum, default_value_t = DimensionOpt::D3)]
        dimension: DimensionOpt,
    },

    /// Parse a deck and dump its (unrefined) leaf panel geometry.
    DumpGeo {
        /// Input deck path.
        deck: PathBuf,

        #[arg(long, value_enum, default_value_t = DimensionOpt::D3)]
        dimension: DimensionOpt,

        /// Output path; prints to stdout if omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum DimensionOpt {
    D2,
    D3,
}

impl From<DimensionOpt> for capx_core::Dimension {
    fn from(d: DimensionOpt) -> Self {
        match d {
            DimensionOpt::D2 => capx_core::Dimension::D2,
            DimensionOpt::D3 => capx_core::Dimension::D3,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum DiscretizationOpt {
    Collocation,
    Galerkin,
}

impl From<DiscretizationOpt> for Discretization {
    fn from(d: DiscretizationOpt) -> Self {
        match d {
            DiscretizationOpt::Collocation => Discretization::Collocation,
            DiscretizationOpt::Galerkin => Discretization::Galerkin,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum PreconditionerOpt {
    None,
    Jacobi,
    Block,
    Super,
    Hierarchical,
}

impl From<PreconditionerOpt> for PreconditionerKind {
    fn from(p: PreconditionerOpt) -> Self {
        match p {
            PreconditionerOpt::None => PreconditionerKind::None,
            PreconditionerOpt::Jacobi => PreconditionerKind::Jacobi,
            PreconditionerOpt::Block => PreconditionerKind::Block,
            PreconditionerOpt::Super => PreconditionerKind::Super,
            PreconditionerOpt::Hierarchical => PreconditionerKind::Hierarchical,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum MatrixFormat {
    Text,
    Csv,
    Json,
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // `--help`/`--version` are clap errors too, but exit 0 like any
            // other requested-and-delivered output; genuine usage mistakes
            // exit 64 (EX_USAGE) to match the deck format's bad-options code.
            let code = match err.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 64,
            };
            std::process::exit(code);
        }
    };
    let result = match cli.cmd {
        Cmd::Solve {
            deck,
            dimension,
            discretization,
            preconditioner,
            auto_precond,
            reuse_cached_links,
            skip_mesh_refinement,
            gmres_tolerance,
            gmres_max_iterations,
            gmres_reorthogonalize,
            max_mesh_refinement_levels,
            initial_mesh_eps,
            eps_ratio,
            mesh_curv_coeff,
            auto_max_error,
            auto_max_iterations,
            memory_limit_mb,
            out_of_core,
            ooc_working_dir,
            ooc_ratio,
            format,
            out,
        } => solve(SolveArgs {
            deck,
            dimension,
            discretization,
            preconditioner,
            auto_precond,
            reuse_cached_links,
            skip_mesh_refinement,
            gmres_tolerance,
            gmres_max_iterations,
            gmres_reorthogonalize,
            max_mesh_refinement_levels,
            initial_mesh_eps,
            eps_ratio,
            mesh_curv_coeff,
            auto_max_error,
            auto_max_iterations,
            memory_limit_mb,
            out_of_core,
            ooc_working_dir,
            ooc_ratio,
            format,
            out,
        }),
        Cmd::Inspect { deck, dimension } => inspect(deck, dimension),
        Cmd::DumpGeo { deck, dimension, out } => dump_geo(deck, dimension, out),
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

/// Initialize tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

/// Ensure the parent directory for a file exists.
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating parent directory {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Exit code for an error, following the deck format's table: a parse-time
/// `capx_io::Error` or a solve-time `capx_core::Error` keep their own
/// mapping; anything else (bad CLI usage, I/O at the shell level) falls
/// back to the generic failure code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<capx_io::Error>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<capx_core::Error>() {
            return e.exit_code();
        }
    }
    1
}

struct SolveArgs {
    deck: PathBuf,
    dimension: DimensionOpt,
    discretization: DiscretizationOpt,
    preconditioner: PreconditionerOpt,
    auto_precond: bool,
    reuse_cached_links: bool,
    skip_mesh_refinement: bool,
    gmres_tolerance: f64,
    gmres_max_iterations: usize,
    gmres_reorthogonalize: bool,
    max_mesh_refinement_levels: u32,
    initial_mesh_eps: f64,
    eps_ratio: f64,
    mesh_curv_coeff: f64,
    auto_max_error: f64,
    auto_max_iterations: u32,
    memory_limit_mb: Option<u64>,
    out_of_core: bool,
    ooc_working_dir: Option<PathBuf>,
    ooc_ratio: f64,
    format: MatrixFormat,
    out: Option<PathBuf>,
}

fn solve(args: SolveArgs) -> Result<()> {
    let dimension = args.dimension.into();
    info!(deck=%args.deck.display(), ?dimension, "parsing input deck");
    let deck: ParsedDeck = parse_deck(&args.deck, dimension).context("parsing input deck")?;

    if deck.complex_permittivity {
        bail!(
            "deck {} uses complex permittivity, which this solver does not yet propagate through the potential kernel",
            args.deck.display()
        );
    }

    let axes = match dimension {
        capx_core::Dimension::D2 => AxisCount::Two,
        capx_core::Dimension::D3 => AxisCount::Three,
    };

    let mut tree = deck.tree;
    let mut roots = Vec::new();
    let mut dielectric_present = false;
    for conductor in deck.registry.iter() {
        if conductor.is_dielectric {
            dielectric_present = true;
            continue;
        }
        let leaves = deck
            .leaves_by_group
            .get(&conductor.group)
            .cloned()
            .unwrap_or_default();
        if leaves.is_empty() {
            bail!("conductor \"{}\" has no panels", conductor.name);
        }
        roots.push(build_super_hierarchy(&mut tree, leaves, axes));
    }
    if roots.is_empty() {
        bail!("deck {} defines no true conductors", args.deck.display());
    }

    let mut cfg = SolverConfig {
        dimension,
        discretization: args.discretization.into(),
        preconditioner: args.preconditioner.into(),
        reuse_cached_links: args.reuse_cached_links,
        skip_mesh_refinement: args.skip_mesh_refinement,
        gmres_tolerance: args.gmres_tolerance,
        gmres_max_iterations: args.gmres_max_iterations,
        gmres_reorthogonalize: args.gmres_reorthogonalize,
        complex_permittivity: false,
        max_mesh_refinement_levels: args.max_mesh_refinement_levels,
        memory_limit_bytes: args.memory_limit_mb.map_or(u64::MAX, |mb| mb * 1024 * 1024),
        out_of_core: args.out_of_core,
        ooc_working_dir: args.ooc_working_dir,
        ooc_ratio: args.ooc_ratio,
        initial_mesh_eps: args.initial_mesh_eps,
        eps_ratio: args.eps_ratio,
        mesh_curv_coeff: args.mesh_curv_coeff,
        auto_max_error: args.auto_max_error,
        auto_max_iterations: args.auto_max_iterations,
    };

    if args.auto_precond {
        // The initial (unrefined) leaf count is used as a stand-in for the
        // eventual link count, which is not known until links are built;
        // good enough to pick a family before the first solve.
        cfg.preconditioner = select_preconditioner_kind(tree.leaf_count(), roots.len());
    }

    let ctx = RunContext::with_memory_limit(cfg.memory_limit_bytes);
    if dielectric_present {
        ctx.log("deck defines dielectric interfaces; the current solver does not yet incorporate their dielectric contrast into the potential kernel, and their panels are excluded from the solve");
    }

    let kernel = LaplaceKernel;
    let outcome = capx_solve::run(&mut tree, &kernel, &roots, &cfg, &ctx).context("solving capacitance matrix")?;

    let labels = conductor_labels(&deck.registry);
    for warning in check_diagonal_dominance(&labels, &outcome.matrix) {
        ctx.log(&warning);
    }
    for warning in check_off_diagonal_sign(&labels, &outcome.matrix) {
        ctx.log(&warning);
    }

    write_matrix(&labels, &outcome.matrix, args.format, args.out.as_deref())?;
    info!(iterations = outcome.iterations, "solve complete");
    Ok(())
}

fn write_matrix(
    labels: &[String],
    matrix: &[Vec<f64>],
    format: MatrixFormat,
    out: Option<&Path>,
) -> Result<()> {
    let writer: Box<dyn Write> = match out {
        Some(path) => {
            ensure_parent_dir(path)?;
            Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            ))
        }
        None => Box::new(std::io::stdout()),
    };
    let mut writer = writer;
    match format {
        MatrixFormat::Text => capx_io::write_matrix_text(&mut writer, labels, matrix),
        MatrixFormat::Csv => capx_io::write_matrix_csv(&mut writer, labels, matrix),
        MatrixFormat::Json => capx_io::write_matrix_json(&mut writer, labels, matrix),
    }
    .context("writing capacitance matrix")?;
    Ok(())
}

fn inspect(deck: PathBuf, dimension: DimensionOpt) -> Result<()> {
    let parsed = parse_deck(&deck, dimension.into()).context("parsing input deck")?;
    let conductors = parsed.registry.iter().filter(|c| !c.is_dielectric).count();
    let dielectrics = parsed.registry.iter().filter(|c| c.is_dielectric).count();
    let panels: usize = parsed.leaves_by_group.values().map(Vec::len).sum();

    println!("deck: {}", deck.display());
    println!("dimension: {:?}", parsed.dimension);
    println!("conductors: {conductors}");
    println!("dielectric interfaces: {dielectrics}");
    println!("panels: {panels}");
    println!(
        "complex permittivity: {}",
        if parsed.complex_permittivity { "yes" } else { "no" }
    );
    for conductor in parsed.registry.iter() {
        let n = parsed.leaves_by_group.get(&conductor.group).map_or(0, Vec::len);
        println!(
            "  {} {} ({} panels, outer_perm={}, inner_perm={})",
            if conductor.is_dielectric { "D" } else { "C" },
            conductor.name,
            n,
            conductor.outer_perm,
            conductor.inner_perm,
        );
    }
    Ok(())
}

fn dump_geo(deck: PathBuf, dimension: DimensionOpt, out: Option<PathBuf>) -> Result<()> {
    let parsed = parse_deck(&deck, dimension.into()).context("parsing input deck")?;
    let writer: Box<dyn Write> = match &out {
        Some(path) => {
            ensure_parent_dir(path)?;
            Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("creating {}", path.display()))?,
            ))
        }
        None => Box::new(std::io::stdout()),
    };
    let mut writer = writer;
    capx_io::dump_geometry(&mut writer, &parsed.tree, &parsed.registry, &parsed.leaves_by_group)
        .context("dumping geometry")?;
    Ok(())
}
