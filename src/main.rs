use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;

use bedguard::{
    ServerInstance, Updater, UpdaterConfig,
    cache::HttpFetcher,
    config::{BackupFormat, BackupMode, PropertiesPolicy, Retention},
    instance::load_instance_list,
    logging,
    process::LocalProcessController,
    resolver::{BedrockResolver, Product},
};

/// Updates Minecraft Bedrock dedicated server instances in place.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File listing one server directory per line (`#` starts a comment)
    #[arg(short, long, conflicts_with = "server_dir")]
    instances: Option<PathBuf>,
    /// A single server directory to update
    #[arg(short, long)]
    server_dir: Option<PathBuf>,
    /// JSON settings file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where downloaded builds are cached (also holds logs and the run lock)
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Install updated servers under this directory instead of in place
    #[arg(long)]
    target_dir: Option<PathBuf>,
    /// Backup root; defaults to `server_backups` next to each server
    #[arg(long)]
    backup_dir: Option<PathBuf>,
    /// Backup archive format: zip or tar.gz
    #[arg(long)]
    backup_type: Option<BackupFormat>,
    /// Backup contents: full or preserved
    #[arg(long)]
    backup_mode: Option<BackupMode>,
    /// Cached builds to keep (-1 keeps all, 0 keeps none)
    #[arg(long, allow_negative_numbers = true)]
    keep_cache_num: Option<i64>,
    /// Backups to keep per server (-1 keeps all, 0 keeps none)
    #[arg(long, allow_negative_numbers = true)]
    keep_backup_num: Option<i64>,
    /// How server.properties is carried over: preserve or merge
    #[arg(long)]
    properties_policy: Option<PropertiesPolicy>,
    /// Do not start servers that were stopped before the update
    #[arg(long)]
    leave_stopped: bool,
    /// Update a server even when its backup failed
    #[arg(long)]
    ignore_backup_failure: bool,
}

impl Args {
    fn into_config(self) -> Result<(UpdaterConfig, Option<PathBuf>, Option<PathBuf>), String> {
        let mut cfg = match &self.config {
            Some(path) => UpdaterConfig::load(path).map_err(|e| e.to_string())?,
            None => UpdaterConfig::default(),
        };

        if let Some(dir) = self.download_dir {
            cfg.download_dir = dir;
        }
        if self.target_dir.is_some() {
            cfg.target_dir = self.target_dir;
        }
        if self.backup_dir.is_some() {
            cfg.backup_dir = self.backup_dir;
        }
        if let Some(format) = self.backup_type {
            cfg.backup_type = format;
        }
        if let Some(mode) = self.backup_mode {
            cfg.backup_mode = mode;
        }
        if let Some(n) = self.keep_cache_num {
            cfg.keep_cache_num = Retention::from(n);
        }
        if let Some(n) = self.keep_backup_num {
            cfg.keep_backup_num = Retention::from(n);
        }
        if let Some(policy) = self.properties_policy {
            cfg.properties_policy = policy;
        }
        if self.leave_stopped {
            cfg.leave_stopped = true;
        }
        if self.ignore_backup_failure {
            cfg.skip_update_on_backup_failure = false;
        }

        if self.instances.is_none() && self.server_dir.is_none() {
            return Err("either --instances or --server-dir is required".to_string());
        }
        Ok((cfg, self.instances, self.server_dir))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let (config, list_path, server_dir) = match args.into_config() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("bedguard: {}", e);
            return ExitCode::from(2);
        }
    };

    let _guard = match logging::init(&config.log_dir()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("bedguard: cannot open log directory: {}", e);
            return ExitCode::from(2);
        }
    };
    tracing::info!("bedguard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::debug!("{:?}", config);

    let instances = match (list_path, server_dir) {
        (Some(path), _) => match load_instance_list(&path).await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        (None, Some(dir)) => vec![ServerInstance::new(dir)],
        (None, None) => Vec::new(),
    };

    let resolver = match BedrockResolver::new(config.resolve_timeout()) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let fetcher = match HttpFetcher::new(config.download_timeout()) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let process = LocalProcessController::new(config.server_executable.clone(), config.stop_timeout());

    let updater = Updater::new(
        config,
        Product::BedrockLinux,
        Arc::new(resolver),
        Arc::new(fetcher),
        Arc::new(process),
    );

    match updater.run(&instances).await {
        Ok(summary) if summary.success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("Run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
