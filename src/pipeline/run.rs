use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::Utc;

use super::{describe, InstanceOutcome, Orchestrator, PipelineResult, Stage, StartPhase};
use crate::engine::{EngineOps, NetworkState};
use crate::error::{AppError, Result};
use crate::paths::{container, resolve_in_project};
use crate::project::{InstanceConfig, ProjectConfiguration};
use crate::readiness::poll_until;
use crate::templates::{restore_script, write_artifact, RESTORE_SCRIPT, SQLCMD};
use crate::tooling::install_into_volume;

impl Orchestrator {
    /// Start the stack. Instances that never launched get their database
    /// restored first and join in a second engine start.
    pub async fn run(&self, edits: &ProjectConfiguration) -> PipelineResult {
        let project = match self.prepare(edits) {
            Ok(project) => project,
            Err(result) => return result,
        };
        match self.try_run(&project).await {
            Ok(result) => result,
            Err(e) => self.abort(e, Some(project)),
        }
    }

    async fn try_run(&self, project: &ProjectConfiguration) -> Result<PipelineResult> {
        let root = project.root_path.as_path();
        let ops = EngineOps::new(self.engine.as_ref(), root);
        let on_line = |line: &str| self.emit(line);

        let info = ops.ensure_available().await?;
        match &info.version {
            Some(version) => self.ok(&format!("{} {} is available", self.engine.program(), version)),
            None => self.ok(&format!("{} is available ({})", self.engine.program(), info.banner)),
        }
        let network = project.network_name();
        match ops.network_create(&network).await? {
            NetworkState::Created => self.ok(&format!("Network {network} created")),
            NetworkState::AlreadyExists => self.ok(&format!("Network {network} already exists")),
        }

        self.enter(Stage::GeneratingArtifacts);
        self.write_descriptor(project, false)?;

        self.enter(Stage::EngineStarting(StartPhase::First));
        ops.compose_up(&on_line).await?;
        tokio::time::sleep(self.settings.startup_delay()).await;

        self.enter(Stage::AwaitingReadiness);
        self.await_dependencies(project, &ops).await;

        self.enter(Stage::RestoringBackups);
        let restore = write_artifact(root, &restore_script(project))?;
        self.ok(&format!("Installed {}", restore.display()));

        let mut outcomes = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut second_run = false;
        for instance in &project.instances {
            let result = self.restore_instance(project, instance, &ops).await;
            if result.is_err() {
                failed.insert(instance.container_name.clone());
            } else if !instance.is_launched() {
                second_run = true;
            }
            if !self.record(&mut outcomes, &instance.container_name, result) {
                return Ok(self.conclude("Run finished", project.clone(), outcomes));
            }
        }

        if second_run {
            self.enter(Stage::EngineStarting(StartPhase::Second));
            let mut staged = project.clone();
            staged
                .instances
                .retain(|i| !failed.contains(&i.container_name));
            self.write_descriptor(&staged, true)?;
            ops.compose_up(&on_line).await?;
        }

        self.enter(Stage::PostStartFixups);
        let mut fixups = Vec::new();
        for instance in project
            .instances
            .iter()
            .filter(|i| !failed.contains(&i.container_name))
        {
            let result = self.finish_instance(project, instance, &ops).await;
            if !self.record(&mut fixups, &instance.container_name, result) {
                break;
            }
        }
        merge_outcomes(&mut outcomes, fixups);

        let latest = self.touch(root, &mut |doc| doc.last_run_at = Some(Utc::now()))?;
        Ok(self.conclude("Run finished", latest, outcomes))
    }

    /// Bounded waits for the database and cache. A timeout is reported and
    /// the run carries on.
    async fn await_dependencies(&self, project: &ProjectConfiguration, ops: &EngineOps<'_>) {
        let attempts = self.settings.readiness_attempts;
        let interval = self.settings.readiness_interval();
        let db = &project.database;

        let database_probe = [
            SQLCMD,
            "-S",
            "localhost",
            "-U",
            db.user.as_str(),
            "-P",
            db.password.as_str(),
            "-Q",
            "SELECT 1",
        ];
        let probe = &database_probe;
        let db_name = db.container_name.as_str();
        let database = poll_until(
            "database",
            || async move { ops.exec(db_name, probe).await.is_ok() },
            attempts,
            interval,
        )
        .await;
        match database {
            Ok(_) => self.ok("Database is ready"),
            Err(e) => self.warn(&format!("{}, continuing", describe(&e))),
        }

        let cache_name = project.cache.container_name.as_str();
        let cache = poll_until(
            "cache",
            || async move {
                ops.exec(cache_name, &["redis-cli", "ping"])
                    .await
                    .is_ok_and(|out| out.contains("PONG"))
            },
            attempts,
            interval,
        )
        .await;
        match cache {
            Ok(_) => self.ok("Cache is ready"),
            Err(e) => self.warn(&format!("{}, continuing", describe(&e))),
        }
    }

    /// Copy the instance backup into the database volume and restore it.
    async fn restore_instance(
        &self,
        project: &ProjectConfiguration,
        instance: &InstanceConfig,
        ops: &EngineOps<'_>,
    ) -> Result<String> {
        let root = &project.root_path;
        let backup = resolve_in_project(root, &instance.backup_path);
        let file_name = instance.backup_file_name().ok_or_else(|| {
            AppError::validation(format!("Invalid backup path: {}", backup.display()))
        })?;

        let backups = resolve_in_project(root, &project.database.volume_path).join("backups");
        fs::create_dir_all(&backups)?;
        let copied = backups.join(&file_name);
        if !same_file(&backup, &copied) {
            fs::copy(&backup, &copied).map_err(|e| {
                AppError::io(format!("Failed to copy {}: {}", backup.display(), e))
            })?;
        }

        let script = format!("{}/{}", container::DATABASE_BACKUPS, RESTORE_SCRIPT);
        let backup_in_container = format!("{}/{}", container::DATABASE_BACKUPS, file_name);
        let database = instance.database_name();
        let output = ops
            .exec(
                &project.database.container_name,
                &[
                    "bash",
                    script.as_str(),
                    database.as_str(),
                    backup_in_container.as_str(),
                    project.database.user.as_str(),
                ],
            )
            .await?;
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.emit(line);
        }
        Ok(format!("database {database} ready"))
    }

    /// Debugger, cache flush and restart for a running instance, then mark it
    /// launched.
    async fn finish_instance(
        &self,
        project: &ProjectConfiguration,
        instance: &InstanceConfig,
        ops: &EngineOps<'_>,
    ) -> Result<String> {
        let root = &project.root_path;
        let name = &instance.container_name;

        let volume = resolve_in_project(root, &instance.volume_path);
        if let Some(copied) = install_into_volume(root, &volume)? {
            self.emit(&format!("{name}: debugger copied to {}", copied.display()));
            let debugger = format!("{}/{}", container::INSTANCE_DATA, crate::paths::DEBUGGER_DIR);
            ops.exec(name, &["chmod", "-R", "+x", debugger.as_str()])
                .await?;
        }

        let index = instance.cache_index.unwrap_or_default().to_string();
        ops.exec(
            &project.cache.container_name,
            &["redis-cli", "-n", index.as_str(), "FLUSHDB"],
        )
        .await?;
        ops.restart(name).await?;

        let now = Utc::now();
        self.touch(root, &mut |doc| {
            if let Some(stored) = doc.instance_mut(name) {
                stored.launched_at = Some(now);
            }
        })?;
        Ok(format!("running on port {}", instance.port))
    }

    /// Bring the stack down and remove its network.
    pub async fn stop(&self, root: &Path) -> PipelineResult {
        self.enter(Stage::Stopping);
        let project = match self.store.load(root) {
            Ok(project) => project,
            Err(e) => return self.abort(e, None),
        };
        let ops = EngineOps::new(self.engine.as_ref(), root);
        let on_line = |line: &str| self.emit(line);

        let stopped = match ops.compose_down(&on_line).await {
            Ok(()) => ops.network_remove(&project.network_name()).await,
            Err(e) => Err(e),
        };
        match stopped {
            Ok(()) => {
                self.enter(Stage::Done);
                self.ok("Stack stopped");
                PipelineResult::succeeded("Stack stopped", project, Vec::new())
            }
            Err(e) => self.abort(e, Some(project)),
        }
    }
}

/// Later outcomes replace earlier ones for the same instance.
fn merge_outcomes(outcomes: &mut Vec<InstanceOutcome>, later: Vec<InstanceOutcome>) {
    for outcome in later {
        match outcomes.iter_mut().find(|o| o.instance == outcome.instance) {
            Some(existing) => *existing = outcome,
            None => outcomes.push(outcome),
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::test_support::Harness;
    use super::super::{InstanceFailurePolicy, Stage};
    use crate::error::ErrorKind;
    use crate::project::ProjectStore as _;

    const COMPOSE_UP: &str = "compose -f docker-compose.yml up --detach --wait";

    #[tokio::test]
    async fn new_instance_triggers_second_engine_start() {
        let harness = Harness::new(&["site"]);
        let result = harness.orchestrator().run(&harness.fixture.config).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(harness.engine.count(COMPOSE_UP), 2);

        let stored = harness.store.load(harness.fixture.root()).unwrap();
        assert!(stored.instances[0].launched_at.is_some());
        assert!(stored.last_run_at.is_some());
        assert!(result.configuration.unwrap().instances[0].launched_at.is_some());
    }

    #[tokio::test]
    async fn launched_instances_need_one_engine_start() {
        let mut harness = Harness::new(&["a", "b"]);
        for instance in &mut harness.fixture.config.instances {
            instance.launched_at = Some(Utc::now());
        }
        let result = harness.orchestrator().run(&harness.fixture.config).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(harness.engine.count(COMPOSE_UP), 1);
    }

    #[tokio::test]
    async fn run_issues_engine_commands_in_order() {
        let harness = Harness::new(&["site"]);
        harness.orchestrator().run(&harness.fixture.config).await;

        let calls = harness.engine.calls();
        let position = |prefix: &str| {
            calls
                .iter()
                .position(|c| c.starts_with(prefix))
                .unwrap_or(usize::MAX)
        };
        let order = [
            position("--version"),
            position("info"),
            position("network create demo_net"),
            position(COMPOSE_UP),
            position("exec demo-db /opt/mssql-tools/bin/sqlcmd"),
            position("exec demo-cache redis-cli ping"),
            position("exec demo-db bash /var/opt/mssql/backups/restore-db.sh site_db"),
            position("exec demo-cache redis-cli -n 1 FLUSHDB"),
            position("restart site"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{calls:?}");
        assert!(harness
            .fixture
            .root()
            .join("data/db/backups/site.bak")
            .is_file());
    }

    #[tokio::test]
    async fn missing_engine_aborts_before_any_start() {
        let harness = Harness::new(&["site"]);
        harness.engine.fail_when("--version", "not found");
        let orchestrator = harness.orchestrator();
        let result = orchestrator.run(&harness.fixture.config).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind(), ErrorKind::EngineMissing);
        assert_eq!(harness.engine.count("compose"), 0);
        assert_eq!(orchestrator.stage(), Stage::Failed);
    }

    #[tokio::test]
    async fn existing_network_is_not_an_error() {
        let harness = Harness::new(&["site"]);
        harness
            .engine
            .fail_when("network create", "network with name demo_net already exists");
        let result = harness.orchestrator().run(&harness.fixture.config).await;
        assert!(result.success, "{}", result.message);
    }

    #[tokio::test]
    async fn readiness_timeout_does_not_abort() {
        let harness = Harness::new(&["site"]);
        harness.engine.fail_when("redis-cli ping", "connection refused");
        let result = harness.orchestrator().run(&harness.fixture.config).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(harness.engine.count("exec demo-cache redis-cli ping"), 2);
        assert!(harness
            .lines()
            .iter()
            .any(|l| l == "✖ cache is not ready after 2 attempts, continuing"));
    }

    #[tokio::test]
    async fn failed_restore_stops_later_instances_by_default() {
        let harness = Harness::new(&["a", "b"]);
        harness.engine.fail_when("restore-db.sh a_db", "boom");
        let result = harness.orchestrator().run(&harness.fixture.config).await;

        assert!(!result.success);
        assert!(result.message.contains("boom"), "{}", result.message);
        assert_eq!(result.instances.len(), 1);
        assert_eq!(harness.engine.count("exec demo-db bash"), 1);
        assert_eq!(harness.engine.count(COMPOSE_UP), 1);
    }

    #[tokio::test]
    async fn continue_policy_starts_the_healthy_instances() {
        let harness = Harness::new(&["a", "b"]);
        harness.engine.fail_when("restore-db.sh a_db", "boom");
        let result = harness
            .orchestrator()
            .with_policy(InstanceFailurePolicy::Continue)
            .run(&harness.fixture.config)
            .await;

        assert!(!result.success);
        assert_eq!(result.instances.len(), 2);
        assert!(!result.instances[0].success);
        assert!(result.instances[1].success);
        assert_eq!(harness.engine.count(COMPOSE_UP), 2);
        assert_eq!(harness.engine.count("restart a"), 0);
        assert_eq!(harness.engine.count("restart b"), 1);

        let compose =
            std::fs::read_to_string(harness.fixture.root().join("docker-compose.yml")).unwrap();
        assert!(compose.contains("container_name: b"));
        assert!(!compose.contains("container_name: a\n"));

        let stored = harness.store.load(harness.fixture.root()).unwrap();
        assert!(stored.instances[0].launched_at.is_none());
        assert!(stored.instances[1].launched_at.is_some());
    }

    #[tokio::test]
    async fn stop_brings_down_stack_and_network() {
        let harness = Harness::new(&["site"]);
        harness.store.save(&harness.fixture.config).unwrap();
        harness
            .engine
            .fail_when("network rm", "Error: No such network: demo_net");

        let result = harness.orchestrator().stop(harness.fixture.root()).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(
            harness.engine.calls(),
            vec!["compose -f docker-compose.yml down", "network rm demo_net"]
        );
    }
}
