use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge this host to a declared set of resources", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge the host to the manifest
    Apply(ApplyArgs),

    /// Show what apply would change, without changing anything
    Plan(ManifestArgs),

    /// Check a manifest and print the execution order
    Validate(ManifestArgs),

    /// Print the dependency graph
    Graph(GraphArgs),

    /// Print the facts gathered from this host
    Facts(FactsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared
// ============================================================================

#[derive(Args, Clone)]
pub struct ManifestArgs {
    /// Manifest file, or a directory of *.toml manifests
    pub manifest: PathBuf,

    /// Override a fact (repeatable), e.g. --fact architecture=i386
    #[arg(long = "fact", value_name = "KEY=VALUE", value_parser = parse_fact)]
    pub facts: Vec<(String, String)>,

    /// Settings file to use instead of the default
    #[arg(long, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_fact(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty fact name in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Observe and report only, change nothing
    #[arg(short, long)]
    pub noop: bool,

    /// Independent parts of the graph converged in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new resources after the first failure
    #[arg(long)]
    pub abort_on_failure: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Write the run report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Emit Graphviz DOT instead of the execution order
    #[arg(long)]
    pub dot: bool,
}

#[derive(Args)]
pub struct FactsArgs {
    /// Override a fact (repeatable)
    #[arg(long = "fact", value_name = "KEY=VALUE", value_parser = parse_fact)]
    pub facts: Vec<(String, String)>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fact() {
        assert_eq!(
            parse_fact("architecture=i386"),
            Ok(("architecture".into(), "i386".into()))
        );
        assert_eq!(parse_fact("role = web "), Ok(("role".into(), "web".into())));
        assert!(parse_fact("architecture").is_err());
        assert!(parse_fact("=x").is_err());
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::parse_from([
            "converge",
            "-vv",
            "apply",
            "site.toml",
            "--noop",
            "--jobs",
            "4",
            "--fact",
            "os_family=Debian",
            "--report",
            "out.json",
        ]);
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert!(args.noop);
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.manifest.manifest, PathBuf::from("site.toml"));
        assert_eq!(args.manifest.facts, vec![("os_family".into(), "Debian".into())]);
        assert_eq!(args.report, Some(PathBuf::from("out.json")));
    }
}
