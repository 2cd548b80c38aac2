//! `gfapi` command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gfapi_transport::{VolfileDir, VolfileServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::ClientFacade;
use crate::config::ClientConfig;
use crate::handle::OpenMode;
use crate::memory::MemoryBackend;

#[derive(Parser)]
#[command(name = "gfapi")]
#[command(about = "gfapi-rs volume client tools", long_about = None)]
/// Parsed command line.
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// `gfapi` subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Resolve a volume and print its translator graph and bricks.
    Topology {
        /// Client config file (TOML or JSON).
        #[arg(short, long, env = "GFAPI_CONFIG", default_value = "/etc/glusterfs/gfapi.toml")]
        config: PathBuf,
    },
    /// Serve `<volume>.vol` files from a directory.
    ServeVolfiles {
        /// Directory holding the volfiles.
        #[arg(short, long)]
        dir: PathBuf,
        /// `host:port`, or `unix:<path>` for a UNIX socket.
        #[arg(short, long, default_value = "127.0.0.1:24007")]
        listen: String,
    },
    /// Copy a file through an in-memory volume and verify the result.
    Selftest {
        /// Log file for the test connection.
        #[arg(long, default_value = crate::logging::DEFAULT_LOG_FILE)]
        log_file: PathBuf,
        /// GlusterFS log level for the test connection.
        #[arg(long, default_value = "7")]
        log_level: u32,
        /// Bytes to copy.
        #[arg(long, default_value = "1024")]
        bytes: usize,
    },
}

impl Cli {
    /// Whether the command installs its own log subscriber. When false,
    /// the caller sets one up from `RUST_LOG`.
    pub fn configures_logging(&self) -> bool {
        matches!(self.command, Command::Selftest { .. })
    }

    /// Runs the parsed command.
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Topology { ref config } => topology(config),
            Command::ServeVolfiles { ref dir, ref listen } => serve_volfiles(dir, listen),
            Command::Selftest {
                ref log_file,
                log_level,
                bytes,
            } => selftest(log_file, log_level, bytes),
        }
    }
}

fn topology(path: &Path) -> Result<()> {
    let config = ClientConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let client = ClientFacade::new(Arc::new(MemoryBackend::new()));
    let conn = client.connect_volume(&config)?;
    let Some(topology) = conn.topology() else {
        bail!("volume {} resolved without a topology", config.volume);
    };
    println!("volume: {}", topology.volume_id);
    print!("{}", topology.volfile.render_tree());
    for brick in topology.bricks() {
        println!(
            "brick {}: {}:{} ({})",
            brick.translator, brick.host, brick.path, brick.transport
        );
    }
    conn.close();
    Ok(())
}

fn serve_volfiles(dir: &Path, listen: &str) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let server = VolfileServer::new(Arc::new(VolfileDir::new(dir)));
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match listen.strip_prefix("unix:") {
            Some(socket) => {
                let listener = tokio::net::UnixListener::bind(socket)
                    .with_context(|| format!("binding {}", socket))?;
                tracing::info!(socket, dir = %dir.display(), "serving volfiles");
                server.serve_unix(listener).await?;
            }
            None => {
                let listener = tokio::net::TcpListener::bind(listen)
                    .await
                    .with_context(|| format!("binding {}", listen))?;
                tracing::info!(addr = listen, dir = %dir.display(), "serving volfiles");
                server.serve_tcp(listener).await?;
            }
        }
        Ok::<(), anyhow::Error>(())
    })
}

const SELFTEST_VOLFILE: &str = "\
volume selftest-posix
    type storage/posix
    option directory /bricks/selftest
end-volume
";

fn selftest(log_file: &Path, log_level: u32, bytes: usize) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let input: Vec<u8> = (0..bytes * 2).map(|i| (i % 251) as u8).collect();
    backend
        .volume("patchy")
        .seed_file("/subdir/file-input", &input)?;

    let volfile = std::env::temp_dir().join(format!("gfapi-selftest-{}.vol", std::process::id()));
    std::fs::write(&volfile, SELFTEST_VOLFILE)?;
    let result = copy_through_volume(&backend, &volfile, log_file, log_level, bytes);
    let _ = std::fs::remove_file(&volfile);
    let copied = result?;

    let output = backend.volume("patchy").contents("/subdir/file-output")?;
    if output != input[..copied] {
        bail!("output differs from the first {} input bytes", copied);
    }
    println!("selftest ok: copied {} bytes", copied);
    Ok(())
}

fn copy_through_volume(
    backend: &Arc<MemoryBackend>,
    volfile: &Path,
    log_file: &Path,
    log_level: u32,
    bytes: usize,
) -> Result<usize> {
    let client = ClientFacade::new(backend.clone());
    let conn = client.open_volume("patchy")?;
    conn.set_logging(log_file, i32::try_from(log_level)?)?;
    conn.set_volfile(volfile)?;
    conn.connect()?;

    let mut input = client.open_file(&conn, "/subdir/file-input", OpenMode::read_only())?;
    let mut buf = vec![0u8; bytes];
    let n = client.reader(&mut input).read_buffer(&mut buf, bytes)?;

    let mut output = client.open_file(
        &conn,
        "/subdir/file-output",
        OpenMode::write_only().create(true).truncate(true),
    )?;
    client.writer(&mut output).write_buffer(&buf[..n])?;
    output.close()?;
    input.close()?;
    conn.close();
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selftest_defaults() {
        let cli = Cli::try_parse_from(["gfapi", "selftest"]).unwrap();
        match cli.command {
            Command::Selftest {
                log_file,
                log_level,
                bytes,
            } => {
                assert_eq!(log_file, PathBuf::from("/dev/stderr"));
                assert_eq!(log_level, 7);
                assert_eq!(bytes, 1024);
            }
            _ => panic!("expected selftest"),
        }
    }

    #[test]
    fn test_parse_serve_volfiles() {
        let cli =
            Cli::try_parse_from(["gfapi", "serve-volfiles", "--dir", "/var/lib/glusterd/vols"])
                .unwrap();
        match cli.command {
            Command::ServeVolfiles { dir, listen } => {
                assert_eq!(dir, PathBuf::from("/var/lib/glusterd/vols"));
                assert_eq!(listen, "127.0.0.1:24007");
            }
            _ => panic!("expected serve-volfiles"),
        }
    }

    #[test]
    fn test_selftest_runs() {
        let dir = tempfile::tempdir().unwrap();
        selftest(&dir.path().join("selftest.log"), 7, 1024).unwrap();
    }

    #[test]
    fn test_topology_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let volfile = dir.path().join("patchy.vol");
        std::fs::write(&volfile, SELFTEST_VOLFILE).unwrap();
        let config = dir.path().join("gfapi.json");
        std::fs::write(
            &config,
            format!(
                r#"{{"volume": "patchy", "volfile": {:?}}}"#,
                volfile.display().to_string()
            ),
        )
        .unwrap();
        topology(&config).unwrap();
    }

    #[test]
    fn test_serve_volfiles_requires_directory() {
        assert!(serve_volfiles(Path::new("/nonexistent/vols"), "127.0.0.1:0").is_err());
    }

    #[test]
    fn test_only_selftest_configures_logging() {
        let selftest = Cli::try_parse_from(["gfapi", "selftest", "--log-level", "9"]).unwrap();
        assert!(selftest.configures_logging());
        let serve = Cli::try_parse_from(["gfapi", "serve-volfiles", "--dir", "/tmp"]).unwrap();
        assert!(!serve.configures_logging());
    }
}
