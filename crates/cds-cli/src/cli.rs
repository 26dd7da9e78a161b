use std::path::PathBuf;

use cds_types::BackendKind;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cds",
    about = "Compound document store: pack, unpack, and inspect document containers",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML file with store settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Pack a directory tree into a new store
    Pack(PackArgs),
    /// Extract every entry of a store into a directory
    Unpack(UnpackArgs),
    /// List the entries of a store
    List(ListArgs),
    /// Print one entry to stdout
    Cat(CatArgs),
    /// Show container format and entry count
    Info(InfoArgs),
}

#[derive(Args)]
pub struct PackArgs {
    pub dir: PathBuf,
    pub out: String,
    /// zip, tar, directory, encrypted, or auto for the configured default
    #[arg(short, long, default_value = "auto")]
    pub backend: BackendKind,
    #[arg(short, long)]
    pub password: Option<String>,
    /// Application tag written into the container
    #[arg(long)]
    pub app_id: Option<String>,
}

#[derive(Args)]
pub struct UnpackArgs {
    pub store: String,
    pub dir: PathBuf,
    #[arg(short, long)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    pub store: String,
    #[arg(short, long)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct CatArgs {
    pub store: String,
    /// Logical entry name, e.g. `root` or `pictures/p.png`
    pub name: String,
    #[arg(short, long)]
    pub password: Option<String>,
    /// Treat `name` as an on-disk name, without expansion
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    pub store: String,
    #[arg(short, long)]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pack() {
        let cli = Cli::try_parse_from(["cds", "pack", "src", "out.cds"]).unwrap();
        if let Command::Pack(args) = cli.command {
            assert_eq!(args.dir, PathBuf::from("src"));
            assert_eq!(args.out, "out.cds");
            assert_eq!(args.backend, BackendKind::Auto);
            assert!(args.password.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_pack_encrypted() {
        let cli = Cli::try_parse_from([
            "cds", "pack", "src", "out.cds", "--backend", "encrypted", "-p", "pw", "--app-id",
            "application/x-test",
        ])
        .unwrap();
        if let Command::Pack(args) = cli.command {
            assert_eq!(args.backend, BackendKind::Encrypted);
            assert_eq!(args.password, Some("pw".into()));
            assert_eq!(args.app_id, Some("application/x-test".into()));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_pack_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["cds", "pack", "a", "b", "--backend", "floppy"]).is_err());
    }

    #[test]
    fn parse_cat_raw() {
        let cli = Cli::try_parse_from(["cds", "cat", "doc.cds", "part0/maindoc.xml", "--raw"]).unwrap();
        if let Command::Cat(args) = cli.command {
            assert!(args.raw);
            assert_eq!(args.name, "part0/maindoc.xml");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_globals() {
        let cli = Cli::try_parse_from([
            "cds", "list", "doc.cds", "--format", "json", "-v", "--config", "cds.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("cds.toml")));
        assert!(matches!(cli.command, Command::List(_)));
    }

    #[test]
    fn parse_unpack_and_info() {
        let cli = Cli::try_parse_from(["cds", "unpack", "doc.cds", "out"]).unwrap();
        assert!(matches!(cli.command, Command::Unpack(_)));
        let cli = Cli::try_parse_from(["cds", "info", "doc.cds"]).unwrap();
        assert!(matches!(cli.command, Command::Info(_)));
    }
}
