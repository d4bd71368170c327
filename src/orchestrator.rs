use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt::{self, Display},
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::Instrument;

use crate::{
    backup::{BackupStore, Snapshot},
    cache::{ArtifactFetcher, CacheStore},
    config::{UpdaterConfig, Version},
    error::{BackupError, DownloadError, RunError, UpdateError},
    instance::{AppliedMarker, ServerInstance},
    lock::RunLock,
    process::ProcessController,
    resolver::{Product, Release, VersionResolver},
    transplant::{ConfigTransplanter, PRESERVED_NAMES},
    utils,
};

const HOLDING_DIR: &str = ".holding";

#[derive(Debug)]
pub enum InstanceOutcome {
    /// Already on the resolved build; nothing was touched.
    UpToDate,
    Updated { version: Version },
    Failed(UpdateError),
}

impl InstanceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, InstanceOutcome::Failed(_))
    }
}

impl Display for InstanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceOutcome::UpToDate => write!(f, "up to date"),
            InstanceOutcome::Updated { version } => write!(f, "updated to {}", version),
            InstanceOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct InstanceReport {
    pub instance: ServerInstance,
    pub backup: Result<Snapshot, BackupError>,
    pub outcome: InstanceOutcome,
}

#[derive(Debug)]
pub struct RunSummary {
    pub release: Release,
    pub reports: Vec<InstanceReport>,
    pub sweep_errors: Vec<String>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.sweep_errors.is_empty()
            && self
                .reports
                .iter()
                .all(|r| r.backup.is_ok() && !r.outcome.is_failure())
    }

    pub fn report(&self, name: &str) -> Option<&InstanceReport> {
        self.reports.iter().find(|r| r.instance.name == name)
    }
}

/// Builds fetched during one run. A version that failed once is not
/// downloaded again for later instances.
#[derive(Debug, Default)]
struct RunContext {
    builds: HashMap<Version, PathBuf>,
    failed: HashSet<Version>,
}

/// Drives one update run across every configured instance.
pub struct Updater {
    config: UpdaterConfig,
    product: Product,
    resolver: Arc<dyn VersionResolver>,
    process: Arc<dyn ProcessController>,
    cache: CacheStore,
    backups: BackupStore,
    transplanter: ConfigTransplanter,
}

impl Updater {
    pub fn new(
        config: UpdaterConfig,
        product: Product,
        resolver: Arc<dyn VersionResolver>,
        fetcher: Arc<dyn ArtifactFetcher>,
        process: Arc<dyn ProcessController>,
    ) -> Self {
        let cache = CacheStore::new(config.download_dir.clone(), fetcher);
        let backups = BackupStore::new(config.backup_dir.clone(), config.backup_mode);
        let transplanter = ConfigTransplanter::new(
            config.download_dir.join(HOLDING_DIR),
            config.properties_policy,
        );

        Self {
            config,
            product,
            resolver,
            process,
            cache,
            backups,
            transplanter,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub async fn run(&self, instances: &[ServerInstance]) -> Result<RunSummary, RunError> {
        if instances.is_empty() {
            return Err(RunError::NoInstances);
        }
        let _lock = RunLock::acquire(&self.config.download_dir)?;
        tracing::info!("Starting update run for {} instances", instances.len());

        let mut live = Vec::with_capacity(instances.len());
        for instance in instances {
            live.push(self.live_instance(instance).await);
        }
        let instances = live.as_slice();

        let mut backups = Vec::with_capacity(instances.len());
        for instance in instances {
            let res = self.backups.snapshot(instance, self.config.backup_type).await;
            if let Err(e) = &res {
                tracing::error!("Backup of {} failed: {}", instance, e);
            }
            backups.push(res);
        }

        let release = match self.resolver.resolve(self.product).await {
            Ok(release) => release,
            Err(e) => {
                tracing::error!("Could not resolve the latest {} build: {}", self.product, e);
                return Err(e.into());
            }
        };

        let mut ctx = RunContext::default();
        let mut reports = Vec::with_capacity(instances.len());
        for (instance, backup) in instances.iter().zip(backups) {
            let span = tracing::info_span!("instance", name = %instance.name);
            let outcome = self
                .update_instance(instance, &release, backup.is_ok(), &mut ctx)
                .instrument(span)
                .await;
            match &outcome {
                InstanceOutcome::Failed(e) => tracing::error!("{}: {}", instance.name, e),
                other => tracing::info!("{}: {}", instance.name, other),
            }
            reports.push(InstanceReport {
                instance: instance.clone(),
                backup,
                outcome,
            });
        }

        let sweep_errors = self.sweep(instances).await;

        let summary = RunSummary {
            release,
            reports,
            sweep_errors,
        };
        self.log_summary(&summary);
        Ok(summary)
    }

    fn target_of(&self, instance: &ServerInstance) -> ServerInstance {
        match &self.config.target_dir {
            Some(dir) => instance.relocated(dir),
            None => instance.clone(),
        }
    }

    /// The tree that is actually in service. Once an earlier run relocated an
    /// instance into `target_dir`, the relocated copy is the one backed up,
    /// stopped and carried over; the original tree is no longer touched.
    async fn live_instance(&self, instance: &ServerInstance) -> ServerInstance {
        let target = self.target_of(instance);
        if target.root_dir != instance.root_dir && target.applied_marker().await.is_some() {
            tracing::debug!(
                "{} lives at {} since an earlier run",
                instance.name,
                target.root_dir.display()
            );
            return target;
        }
        instance.clone()
    }

    /// Whether `target` already carries `release` or something newer. Without
    /// an applied marker an in-place tree is judged by its vanilla behavior
    /// pack, and the marker is seeded when that matches.
    async fn already_current(
        &self,
        instance: &ServerInstance,
        target: &ServerInstance,
        release: &Release,
    ) -> bool {
        if let Some(marker) = target.applied_marker().await {
            return match marker.version.cmp(&release.version) {
                Ordering::Less => false,
                Ordering::Equal => {
                    tracing::info!(
                        "{} already runs {} (applied {})",
                        target.name,
                        marker.version,
                        marker.applied_at
                    );
                    true
                }
                Ordering::Greater => {
                    tracing::info!(
                        "{} runs {}, newer than {}; not downgrading",
                        target.name,
                        marker.version,
                        release.version
                    );
                    true
                }
            };
        }

        if instance.root_dir != target.root_dir {
            return false;
        }
        let Some(installed) = instance.installed_version().await else {
            return false;
        };
        match installed.cmp_common_prefix(&release.version) {
            Ordering::Less => false,
            ord => {
                tracing::info!(
                    "{} has build {} installed, {} is not newer",
                    instance.name,
                    installed,
                    release.version
                );
                if ord == Ordering::Equal {
                    if let Err(e) = instance
                        .write_applied_marker(&AppliedMarker::now(release.version.clone()))
                        .await
                    {
                        tracing::warn!(
                            "Could not record {} for {}: {}",
                            release.version,
                            instance.name,
                            e
                        );
                    }
                }
                true
            }
        }
    }

    async fn update_instance(
        &self,
        instance: &ServerInstance,
        release: &Release,
        backup_ok: bool,
        ctx: &mut RunContext,
    ) -> InstanceOutcome {
        let target = self.target_of(instance);
        if self.already_current(instance, &target, release).await {
            return InstanceOutcome::UpToDate;
        }

        if !backup_ok && self.config.skip_update_on_backup_failure {
            return InstanceOutcome::Failed(UpdateError::BackupFailed);
        }

        let was_running = match self.process.is_running(instance).await {
            Ok(running) => running,
            Err(e) => return InstanceOutcome::Failed(e.into()),
        };
        if was_running {
            if let Err(e) = self.process.stop(instance).await {
                return InstanceOutcome::Failed(e.into());
            }
        }

        let mut committed = false;
        let applied = self
            .apply_update(instance, &target, release, ctx, &mut committed)
            .await;

        if let Err(e) = applied {
            if !committed && was_running {
                tracing::warn!("Restarting {} on its old build", instance.name);
                if let Err(start_err) = self.process.start(instance).await {
                    tracing::error!("Restart of {} failed: {}", instance.name, start_err);
                }
            }
            return InstanceOutcome::Failed(e);
        }

        if was_running || !self.config.leave_stopped {
            if let Err(e) = self.process.start(&target).await {
                return InstanceOutcome::Failed(e.into());
            }
        } else {
            tracing::info!("{} was stopped before the update, leaving it stopped", target.name);
        }

        InstanceOutcome::Updated {
            version: release.version.clone(),
        }
    }

    /// Stage, hold preserved state, overwrite, restore. `committed` flips once
    /// the target tree starts being modified.
    async fn apply_update(
        &self,
        instance: &ServerInstance,
        target: &ServerInstance,
        release: &Release,
        ctx: &mut RunContext,
        committed: &mut bool,
    ) -> Result<(), UpdateError> {
        let build_dir = self.build_for(release, ctx).await?;
        let preserved = self.transplanter.extract(instance).await?;

        *committed = true;
        self.install(&build_dir, &target.root_dir).await?;
        self.transplanter
            .apply(&preserved, &target.root_dir, &build_dir)
            .await?;
        self.transplanter.discard(&preserved).await;

        target
            .write_applied_marker(&AppliedMarker::now(release.version.clone()))
            .await
            .map_err(|source| UpdateError::Marker {
                path: target.applied_marker_path(),
                source,
            })?;
        tracing::info!("{} now carries build {}", target, release.version);
        Ok(())
    }

    async fn build_for(
        &self,
        release: &Release,
        ctx: &mut RunContext,
    ) -> Result<PathBuf, DownloadError> {
        if let Some(path) = ctx.builds.get(&release.version) {
            return Ok(path.clone());
        }
        if ctx.failed.contains(&release.version) {
            return Err(DownloadError::PreviouslyFailed(release.version.clone()));
        }

        match self.cache.materialize(release).await {
            Ok(path) => {
                ctx.builds.insert(release.version.clone(), path.clone());
                Ok(path)
            }
            Err(e) => {
                ctx.failed.insert(release.version.clone());
                Err(e)
            }
        }
    }

    /// Copies every non-preserved top-level entry of the build over `target_dir`.
    async fn install(&self, build_dir: &Path, target_dir: &Path) -> Result<(), UpdateError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| UpdateError::Install { path, source }
        };

        fs::create_dir_all(target_dir)
            .await
            .map_err(io_err(target_dir))?;

        let mut names = Vec::new();
        let mut entries = fs::read_dir(build_dir).await.map_err(io_err(build_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(build_dir))? {
            names.push(entry.file_name());
        }
        names.sort();

        for name in names {
            if PRESERVED_NAMES.iter().any(|p| name == *p) {
                continue;
            }
            let from = build_dir.join(&name);
            let to = target_dir.join(&name);
            utils::copy_tree_async(&from, &to)
                .await
                .map_err(io_err(&to))?;
            tracing::debug!("copied {} to {}", from.display(), to.display());
        }

        tracing::info!("Installed {} into {}", build_dir.display(), target_dir.display());
        Ok(())
    }

    async fn sweep(&self, instances: &[ServerInstance]) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.cache.sweep(self.config.keep_cache_num).await {
            tracing::error!("Cache sweep failed: {}", e);
            errors.push(e.to_string());
        }

        for instance in instances {
            if let Err(e) = self
                .backups
                .sweep(instance, self.config.keep_backup_num)
                .await
            {
                tracing::error!("Backup sweep for {} failed: {}", instance.name, e);
                errors.push(e.to_string());
            }
        }
        errors
    }

    fn log_summary(&self, summary: &RunSummary) {
        tracing::info!("Run finished against build {}", summary.release.version);
        for report in &summary.reports {
            let backup = match &report.backup {
                Ok(s) => s.path.display().to_string(),
                Err(e) => format!("FAILED ({})", e),
            };
            tracing::info!(
                "  {}: {}; backup: {}",
                report.instance.name,
                report.outcome,
                backup
            );
        }
        if summary.success() {
            tracing::info!("Done!");
        } else {
            tracing::warn!("Done with failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs as sfs;

    use super::*;
    use crate::{
        config::Retention,
        error::ResolveError,
        testing::{FakeProcesses, FakeResolver, ZipFetcher, make_instance, release},
    };

    const V2: &str = "1.21.50.07";

    struct Harness {
        dir: tempfile::TempDir,
        fetcher: Arc<ZipFetcher>,
        processes: Arc<FakeProcesses>,
        updater: Updater,
    }

    fn build_files() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("bedrock_server", b"v2-binary".as_slice()),
            ("behavior_packs/vanilla_1.21.50/manifest.json", b"{}".as_slice()),
            ("server.properties", b"server-name=Dedicated Server\n".as_slice()),
            ("allowlist.json", b"[]".as_slice()),
            ("permissions.json", b"[]".as_slice()),
        ]
    }

    fn harness_with(
        resolver: FakeResolver,
        fetcher: ZipFetcher,
        tweak: impl FnOnce(&mut UpdaterConfig, &Path),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = UpdaterConfig {
            download_dir: dir.path().join("cache"),
            backup_dir: Some(dir.path().join("backups")),
            keep_cache_num: Retention::KeepAll,
            ..UpdaterConfig::default()
        };
        tweak(&mut config, dir.path());

        let fetcher = Arc::new(fetcher);
        let processes = Arc::new(FakeProcesses::default());
        let updater = Updater::new(
            config,
            Product::BedrockLinux,
            Arc::new(resolver),
            fetcher.clone(),
            processes.clone(),
        );
        Harness {
            dir,
            fetcher,
            processes,
            updater,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeResolver::ok(release(V2)),
            ZipFetcher::new(&build_files()),
            |_, _| {},
        )
    }

    fn preserved_bytes(inst: &ServerInstance) -> Vec<Vec<u8>> {
        [
            "allowlist.json",
            "permissions.json",
            "server.properties",
            "worlds/level/level.dat",
        ]
        .iter()
        .map(|p| sfs::read(inst.root_dir.join(p)).unwrap())
        .collect()
    }

    #[tokio::test]
    async fn end_to_end_two_instances() {
        let h = harness();
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        let b = make_instance(h.dir.path(), "beta", "v1-binary");
        h.processes.set_running(&a);
        h.processes.set_running(&b);
        let before_a = preserved_bytes(&a);
        let before_b = preserved_bytes(&b);

        let summary = h.updater.run(&[a.clone(), b.clone()]).await.unwrap();
        assert!(summary.success(), "{:?}", summary);

        for (inst, before) in [(&a, before_a), (&b, before_b)] {
            assert_eq!(sfs::read(inst.root_dir.join("bedrock_server")).unwrap(), b"v2-binary");
            assert!(inst.root_dir.join("behavior_packs/vanilla_1.21.50/manifest.json").is_file());
            assert_eq!(preserved_bytes(inst), before);
            assert!(h.processes.is_running_now(inst));
            assert_eq!(h.updater.backups().list(inst).await.unwrap().len(), 1);
            assert_eq!(
                inst.applied_marker().await.unwrap().version.to_string(),
                V2
            );
        }

        let cached = h.updater.cache().list().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].version.to_string(), V2);
        assert_eq!(h.fetcher.calls(), 1);
        assert!(matches!(
            summary.report("alpha").unwrap().outcome,
            InstanceOutcome::Updated { .. }
        ));
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let h = harness();
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        h.processes.set_running(&a);

        h.updater.run(&[a.clone()]).await.unwrap();
        let after_first = preserved_bytes(&a);
        let stops = h.processes.stops();

        let summary = h.updater.run(&[a.clone()]).await.unwrap();
        assert!(summary.success());
        assert!(matches!(
            summary.report("alpha").unwrap().outcome,
            InstanceOutcome::UpToDate
        ));
        assert_eq!(preserved_bytes(&a), after_first);
        assert_eq!(h.processes.stops(), stops);
        assert!(h.processes.is_running_now(&a));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn failed_resolve_touches_nothing_but_backups() {
        let h = harness_with(
            FakeResolver::err(ResolveError::Timeout {
                url: "https://example.invalid".to_string(),
            }),
            ZipFetcher::new(&build_files()),
            |_, _| {},
        );
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        h.processes.set_running(&a);

        let err = h.updater.run(&[a.clone()]).await.unwrap_err();
        assert!(matches!(err, RunError::Resolve(ResolveError::Timeout { .. })));
        assert_eq!(h.processes.stops(), 0);
        assert!(h.processes.is_running_now(&a));
        assert_eq!(sfs::read(a.root_dir.join("bedrock_server")).unwrap(), b"v1-binary");
        assert_eq!(h.fetcher.calls(), 0);
        assert!(h.updater.cache().list().await.unwrap().is_empty());
        assert_eq!(h.updater.backups().list(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backup_failure_only_skips_that_instance() {
        let h = harness();
        let ghost = ServerInstance::new(h.dir.path().join("ghost"));
        let b = make_instance(h.dir.path(), "beta", "v1-binary");
        h.processes.set_running(&b);

        let summary = h.updater.run(&[ghost.clone(), b.clone()]).await.unwrap();
        assert!(!summary.success());

        let ghost_report = summary.report("ghost").unwrap();
        assert!(ghost_report.backup.is_err());
        assert!(matches!(
            ghost_report.outcome,
            InstanceOutcome::Failed(UpdateError::BackupFailed)
        ));
        assert!(!ghost.root_dir.exists());

        assert!(matches!(
            summary.report("beta").unwrap().outcome,
            InstanceOutcome::Updated { .. }
        ));
        assert!(h.processes.is_running_now(&b));
    }

    #[tokio::test]
    async fn world_copy_failure_keeps_old_build_and_restarts_it() {
        let h = harness();
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        let b = make_instance(h.dir.path(), "beta", "v1-binary");
        h.processes.set_running(&a);
        h.processes.set_running(&b);

        // a dangling link inside the world cannot be copied
        #[cfg(unix)]
        std::os::unix::fs::symlink(
            h.dir.path().join("missing-target"),
            a.root_dir.join("worlds/level/broken"),
        )
        .unwrap();

        let summary = h.updater.run(&[a.clone(), b.clone()]).await.unwrap();

        assert!(matches!(
            summary.report("alpha").unwrap().outcome,
            InstanceOutcome::Failed(UpdateError::Transplant(_))
        ));
        assert_eq!(sfs::read(a.root_dir.join("bedrock_server")).unwrap(), b"v1-binary");
        assert!(a.applied_marker().await.is_none());
        assert!(h.processes.is_running_now(&a));

        assert!(matches!(
            summary.report("beta").unwrap().outcome,
            InstanceOutcome::Updated { .. }
        ));
        assert_eq!(sfs::read(b.root_dir.join("bedrock_server")).unwrap(), b"v2-binary");
        assert!(h.processes.is_running_now(&b));
    }

    #[tokio::test]
    async fn download_failure_is_not_retried_within_a_run() {
        let h = harness_with(
            FakeResolver::ok(release(V2)),
            ZipFetcher::failing(),
            |_, _| {},
        );
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        let b = make_instance(h.dir.path(), "beta", "v1-binary");
        h.processes.set_running(&a);

        let summary = h.updater.run(&[a.clone(), b.clone()]).await.unwrap();
        assert!(!summary.success());
        assert_eq!(h.fetcher.calls(), 1);
        assert!(matches!(
            summary.report("beta").unwrap().outcome,
            InstanceOutcome::Failed(UpdateError::Download(DownloadError::PreviouslyFailed(_)))
        ));
        assert!(h.processes.is_running_now(&a));
        assert!(!h.processes.is_running_now(&b));
    }

    #[tokio::test]
    async fn target_dir_relocates_and_leave_stopped_is_honoured() {
        let h = harness_with(
            FakeResolver::ok(release(V2)),
            ZipFetcher::new(&build_files()),
            |cfg, root| {
                cfg.target_dir = Some(root.join("next"));
                cfg.leave_stopped = true;
                cfg.keep_cache_num = Retention::Keep(0);
                cfg.keep_backup_num = Retention::Keep(0);
            },
        );
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        let before = preserved_bytes(&a);

        let summary = h.updater.run(&[a.clone()]).await.unwrap();
        assert!(summary.success(), "{:?}", summary);

        let moved = a.relocated(&h.dir.path().join("next"));
        assert_eq!(sfs::read(moved.root_dir.join("bedrock_server")).unwrap(), b"v2-binary");
        assert_eq!(preserved_bytes(&moved), before);
        assert_eq!(sfs::read(a.root_dir.join("bedrock_server")).unwrap(), b"v1-binary");
        assert!(!h.processes.is_running_now(&moved));

        assert!(h.updater.cache().list().await.unwrap().is_empty());
        assert!(h.updater.backups().list(&a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relocated_instance_stays_the_live_one_on_later_updates() {
        const V3: &str = "1.21.60.01";
        let h = harness_with(
            FakeResolver::ok(release(V2)),
            ZipFetcher::new(&build_files()),
            |cfg, root| cfg.target_dir = Some(root.join("next")),
        );
        let a = make_instance(h.dir.path(), "alpha", "v1-binary");
        h.processes.set_running(&a);
        h.updater.run(&[a.clone()]).await.unwrap();

        let moved = a.relocated(&h.dir.path().join("next"));
        assert!(h.processes.is_running_now(&moved));
        sfs::write(moved.root_dir.join("worlds/level/level.dat"), b"progress-after-update").unwrap();
        let stops = h.processes.stops();

        let next = Updater::new(
            h.updater.config.clone(),
            Product::BedrockLinux,
            Arc::new(FakeResolver::ok(release(V3))),
            h.fetcher.clone(),
            h.processes.clone(),
        );
        let summary = next.run(&[a.clone()]).await.unwrap();
        assert!(summary.success(), "{:?}", summary);

        let report = summary.report("alpha").unwrap();
        assert_eq!(report.instance, moved);
        assert!(matches!(report.outcome, InstanceOutcome::Updated { .. }));
        assert!(report.backup.as_ref().unwrap().path.is_file());
        assert_eq!(h.processes.stops(), stops + 1);
        assert!(h.processes.is_running_now(&moved));
        assert_eq!(
            sfs::read(moved.root_dir.join("worlds/level/level.dat")).unwrap(),
            b"progress-after-update"
        );
        assert_eq!(moved.applied_marker().await.unwrap().version.to_string(), V3);
        assert_eq!(
            sfs::read(a.root_dir.join("worlds/level/level.dat")).unwrap(),
            b"world-of-alpha"
        );
    }

    #[tokio::test]
    async fn installed_build_without_marker_is_left_alone() {
        let h = harness();
        let current = make_instance(h.dir.path(), "current", "v2-binary");
        sfs::create_dir_all(current.root_dir.join("behavior_packs/vanilla_1.21.50")).unwrap();
        let newer = make_instance(h.dir.path(), "newer", "v3-binary");
        sfs::create_dir_all(newer.root_dir.join("behavior_packs/vanilla_1.21.60")).unwrap();
        h.processes.set_running(&current);
        h.processes.set_running(&newer);

        let summary = h.updater.run(&[current.clone(), newer.clone()]).await.unwrap();
        assert!(summary.success(), "{:?}", summary);
        for name in ["current", "newer"] {
            assert!(matches!(
                summary.report(name).unwrap().outcome,
                InstanceOutcome::UpToDate
            ));
        }
        assert_eq!(h.processes.stops(), 0);
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(sfs::read(newer.root_dir.join("bedrock_server")).unwrap(), b"v3-binary");

        assert_eq!(
            current.applied_marker().await.unwrap().version.to_string(),
            V2
        );
        assert!(newer.applied_marker().await.is_none());
    }

    #[tokio::test]
    async fn newer_marker_is_not_downgraded() {
        let h = harness();
        let a = make_instance(h.dir.path(), "alpha", "v3-binary");
        a.write_applied_marker(&AppliedMarker::now("1.21.60.01".parse().unwrap()))
            .await
            .unwrap();

        let summary = h.updater.run(&[a.clone()]).await.unwrap();
        assert!(matches!(
            summary.report("alpha").unwrap().outcome,
            InstanceOutcome::UpToDate
        ));
        assert_eq!(sfs::read(a.root_dir.join("bedrock_server")).unwrap(), b"v3-binary");
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn empty_instance_list_is_fatal() {
        let h = harness();
        assert!(matches!(
            h.updater.run(&[]).await.unwrap_err(),
            RunError::NoInstances
        ));
    }
}
