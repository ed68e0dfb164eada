//! Configuration validation.
//!
//! Every validator returns a [`ValidationResult`] and never an error. The only
//! side effects are read-only existence probes on the filesystem.

use std::path::{Component, Path};

use serde::Serialize;

use crate::paths::{
    apps_dir, connection_config_path, resolve_in_project, APP_DESCRIPTOR, BACKUP_EXTENSION,
    CONNECTION_STRING_HOLDERS,
};
use crate::project::{InstanceConfig, ProjectConfiguration, ServiceConfig};

/// Which part of the configuration a validation result is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "section", content = "name", rename_all = "snake_case")]
pub enum ValidationTarget {
    General,
    Database,
    AdminUi,
    Cache,
    Broker,
    Instance(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub success: bool,
    pub message: String,
    pub target: Option<ValidationTarget>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "Configuration is valid".to_string(),
            target: None,
        }
    }

    pub fn failed(target: ValidationTarget, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            target: Some(target),
        }
    }

    fn from_check(target: ValidationTarget, check: Check) -> Self {
        match check {
            Ok(()) => Self::ok(),
            Err(message) => Self::failed(target, message),
        }
    }
}

type Check = std::result::Result<(), String>;

/// A single validation stage of [`validate_all`].
pub type Stage = fn(&ProjectConfiguration) -> ValidationResult;

/// Stage order used by [`validate_all`].
pub const STAGES: [Stage; 6] = [
    validate_general,
    validate_database,
    validate_admin_ui,
    validate_cache,
    validate_broker,
    validate_instances,
];

/// Run every stage in order and return the first failure unchanged.
pub fn validate_all(project: &ProjectConfiguration) -> ValidationResult {
    run_stages(project, &STAGES)
}

/// Run `stages` in order, stopping at the first failure.
pub fn run_stages(project: &ProjectConfiguration, stages: &[Stage]) -> ValidationResult {
    for stage in stages {
        let result = stage(project);
        if !result.success {
            return result;
        }
    }
    ValidationResult::ok()
}

pub fn validate_general(project: &ProjectConfiguration) -> ValidationResult {
    ValidationResult::from_check(ValidationTarget::General, check_general(project))
}

pub fn validate_database(project: &ProjectConfiguration) -> ValidationResult {
    let db = &project.database;
    let check = check_service(db, project).and_then(|()| {
        require(&db.user, "Database user is empty")?;
        require(&db.password, "Database password is empty")
    });
    ValidationResult::from_check(ValidationTarget::Database, check)
}

pub fn validate_admin_ui(project: &ProjectConfiguration) -> ValidationResult {
    ValidationResult::from_check(
        ValidationTarget::AdminUi,
        check_service(&project.admin_ui, project),
    )
}

pub fn validate_cache(project: &ProjectConfiguration) -> ValidationResult {
    ValidationResult::from_check(
        ValidationTarget::Cache,
        check_service(&project.cache, project),
    )
}

pub fn validate_broker(project: &ProjectConfiguration) -> ValidationResult {
    let broker = &project.broker;
    let check = check_service(broker, project).and_then(|()| {
        if broker.management_port == 0 {
            return Err("Broker management port is empty".to_string());
        }
        require(&broker.user, "Broker user is empty")?;
        require(&broker.password, "Broker password is empty")
    });
    ValidationResult::from_check(ValidationTarget::Broker, check)
}

pub fn validate_instance(instance: &InstanceConfig, project: &ProjectConfiguration) -> ValidationResult {
    ValidationResult::from_check(
        ValidationTarget::Instance(instance.container_name.clone()),
        check_instance(instance, project),
    )
}

pub fn validate_instances(project: &ProjectConfiguration) -> ValidationResult {
    if project.instances.is_empty() {
        return ValidationResult::failed(
            ValidationTarget::Instance(String::new()),
            "No instance configured",
        );
    }

    for instance in &project.instances {
        let result = validate_instance(instance, project);
        if !result.success {
            return result;
        }
    }

    let names = project.container_names();
    for (index, name) in names.iter().enumerate() {
        if names[..index].contains(name) {
            return ValidationResult::failed(
                ValidationTarget::Instance((*name).to_string()),
                format!("Container name '{}' is used more than once", name),
            );
        }
    }

    for (index, instance) in project.instances.iter().enumerate() {
        let database = instance.database_name();
        if let Some(other) = project.instances[..index]
            .iter()
            .find(|o| o.database_name() == database)
        {
            return ValidationResult::failed(
                ValidationTarget::Instance(instance.container_name.clone()),
                format!(
                    "Instance '{}' database name '{}' is already used by instance '{}'",
                    instance.container_name, database, other.container_name
                ),
            );
        }
    }

    ValidationResult::ok()
}

fn require(value: &str, message: &str) -> Check {
    if value.trim().is_empty() {
        Err(message.to_string())
    } else {
        Ok(())
    }
}

fn require_path(value: &Path, message: &str) -> Check {
    if value.as_os_str().is_empty() {
        Err(message.to_string())
    } else {
        Ok(())
    }
}

fn check_general(project: &ProjectConfiguration) -> Check {
    require(&project.name, "Project name is empty")?;
    require_path(&project.root_path, "Project root path is empty")?;
    if !project.root_path.is_dir() {
        return Err(format!(
            "Project root does not exist: {}",
            project.root_path.display()
        ));
    }
    Ok(())
}

fn service_label<S: ServiceConfig>(service: &S) -> String {
    let name = service.container_name();
    if service.label() == "Instance" && !name.trim().is_empty() {
        format!("Instance '{}'", name)
    } else {
        service.label().to_string()
    }
}

/// Name, port, volume path, volume existence; in that order.
fn check_service<S: ServiceConfig>(service: &S, project: &ProjectConfiguration) -> Check {
    let label = service_label(service);
    require(
        service.container_name(),
        &format!("{} container name is empty", label),
    )?;
    if service.port() == 0 {
        return Err(format!("{} port is empty", label));
    }
    require_path(
        service.volume_path(),
        &format!("{} volume path is empty", label),
    )?;
    let volume = resolve_in_project(&project.root_path, service.volume_path());
    if !volume.exists() {
        return Err(format!(
            "{} volume path does not exist: {}",
            label,
            volume.display()
        ));
    }
    Ok(())
}

fn check_instance(instance: &InstanceConfig, project: &ProjectConfiguration) -> Check {
    check_service(instance, project)?;
    let label = service_label(instance);

    require_path(
        &instance.app_path,
        &format!("{} application path is empty", label),
    )?;
    require_path(
        &instance.backup_path,
        &format!("{} backup path is empty", label),
    )?;
    if instance.cache_index.is_none() {
        return Err(format!("{} cache index is empty", label));
    }
    require(
        &instance.db_engine_tag,
        &format!("{} database engine tag is empty", label),
    )?;
    require(
        &instance.runtime_tag,
        &format!("{} runtime tag is empty", label),
    )?;

    let apps = apps_dir(&project.root_path);
    let app_path = resolve_in_project(&project.root_path, &instance.app_path);
    let backup_path = resolve_in_project(&project.root_path, &instance.backup_path);
    if backup_path == app_path {
        return Err(format!(
            "{} backup path must differ from application path",
            label
        ));
    }
    if !is_strict_descendant(&app_path, &apps) {
        return Err(format!(
            "{} application path must be inside {}",
            label,
            apps.display()
        ));
    }
    if !app_path.is_dir() {
        return Err(format!(
            "{} application path does not exist: {}",
            label,
            app_path.display()
        ));
    }
    if !app_path.join(APP_DESCRIPTOR).is_file() {
        return Err(format!(
            "{} application path is missing {}",
            label, APP_DESCRIPTOR
        ));
    }
    if connection_config_path(&app_path).is_none() {
        return Err(format!(
            "{} application path has none of {}",
            label,
            CONNECTION_STRING_HOLDERS.join(", ")
        ));
    }

    if !backup_path.is_file() {
        return Err(format!(
            "{} backup file does not exist: {}",
            label,
            backup_path.display()
        ));
    }
    if !is_backup_filename(&backup_path) {
        return Err(format!(
            "{} backup file must end with {}",
            label, BACKUP_EXTENSION
        ));
    }

    Ok(())
}

/// `path` lies below `dir` (not equal to it) without climbing out through `..`.
fn is_strict_descendant(path: &Path, dir: &Path) -> bool {
    if path
        .components()
        .any(|part| matches!(part, Component::ParentDir))
    {
        return false;
    }
    path != dir && path.starts_with(dir)
}

fn is_backup_filename(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_ascii_lowercase().ends_with(BACKUP_EXTENSION))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::testutil::ProjectFixture;

    #[test]
    fn fixture_project_is_valid() {
        let fixture = ProjectFixture::new(&["site"]);
        let result = validate_all(&fixture.config);
        assert!(result.success, "{}", result.message);
    }

    type Fields<'a> = (&'a mut String, &'a mut u16, &'a mut PathBuf);

    fn database_fields(c: &mut ProjectConfiguration) -> Fields<'_> {
        let s = &mut c.database;
        (&mut s.container_name, &mut s.port, &mut s.volume_path)
    }

    fn admin_ui_fields(c: &mut ProjectConfiguration) -> Fields<'_> {
        let s = &mut c.admin_ui;
        (&mut s.container_name, &mut s.port, &mut s.volume_path)
    }

    fn cache_fields(c: &mut ProjectConfiguration) -> Fields<'_> {
        let s = &mut c.cache;
        (&mut s.container_name, &mut s.port, &mut s.volume_path)
    }

    fn broker_fields(c: &mut ProjectConfiguration) -> Fields<'_> {
        let s = &mut c.broker;
        (&mut s.container_name, &mut s.port, &mut s.volume_path)
    }

    fn instance_fields(c: &mut ProjectConfiguration) -> Fields<'_> {
        let s = &mut c.instances[0];
        (&mut s.container_name, &mut s.port, &mut s.volume_path)
    }

    #[test]
    fn services_reject_empty_name_port_or_volume() {
        let fixture = ProjectFixture::new(&["site"]);
        let cases: [(Stage, for<'a> fn(&'a mut ProjectConfiguration) -> Fields<'a>); 5] = [
            (validate_database, database_fields),
            (validate_admin_ui, admin_ui_fields),
            (validate_cache, cache_fields),
            (validate_broker, broker_fields),
            (validate_instances, instance_fields),
        ];

        for (validate, fields) in cases {
            assert!(validate(&fixture.config).success);

            let mut cfg = fixture.config.clone();
            fields(&mut cfg).0.clear();
            let result = validate(&cfg);
            assert!(!result.success);
            assert!(result.message.contains("container name is empty"), "{}", result.message);

            let mut cfg = fixture.config.clone();
            *fields(&mut cfg).1 = 0;
            assert!(validate(&cfg).message.contains("port is empty"));

            let mut cfg = fixture.config.clone();
            *fields(&mut cfg).2 = PathBuf::new();
            assert!(validate(&cfg).message.contains("volume path is empty"));

            let mut cfg = fixture.config.clone();
            *fields(&mut cfg).2 = fixture.root().join("missing");
            assert!(validate(&cfg).message.contains("volume path does not exist"));
        }
    }

    #[test]
    fn whitespace_name_counts_as_empty() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.cache.container_name = "   ".to_string();
        assert_eq!(validate_cache(&cfg).message, "Cache container name is empty");
    }

    #[test]
    fn empty_database_password_fails() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.database.password.clear();
        let result = validate_all(&cfg);
        assert!(!result.success);
        assert_eq!(result.message, "Database password is empty");
        assert_eq!(result.target, Some(ValidationTarget::Database));
    }

    #[test]
    fn zero_instances_fail_instance_stage() {
        let fixture = ProjectFixture::new(&[]);
        let result = validate_all(&fixture.config);
        assert!(!result.success);
        assert_eq!(result.message, "No instance configured");
    }

    #[test]
    fn validate_all_returns_first_failure() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.admin_ui.port = 0;
        cfg.instances[0].backup_path = PathBuf::new();
        let result = validate_all(&cfg);
        assert_eq!(result.message, "Admin UI port is empty");
    }

    thread_local! {
        static CALLS: Cell<u32> = const { Cell::new(0) };
    }

    fn counting_fail(_: &ProjectConfiguration) -> ValidationResult {
        CALLS.with(|c| c.set(c.get() + 1));
        ValidationResult::failed(ValidationTarget::General, "first")
    }

    fn counting_pass(_: &ProjectConfiguration) -> ValidationResult {
        CALLS.with(|c| c.set(c.get() + 1));
        ValidationResult::ok()
    }

    #[test]
    fn run_stages_short_circuits() {
        let fixture = ProjectFixture::new(&["site"]);
        CALLS.with(|c| c.set(0));
        let result = run_stages(
            &fixture.config,
            &[counting_pass, counting_fail, counting_pass, counting_fail],
        );
        assert_eq!(result.message, "first");
        assert_eq!(CALLS.with(Cell::get), 2);
    }

    #[test]
    fn instance_app_path_outside_apps_dir_fails() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        let outside = fixture.root().join("elsewhere");
        fs::create_dir_all(&outside).unwrap();
        cfg.instances[0].app_path = outside;
        let result = validate_instances(&cfg);
        assert!(result.message.contains("must be inside"), "{}", result.message);
        assert_eq!(result.target, Some(ValidationTarget::Instance("site".to_string())));
    }

    #[test]
    fn instance_app_path_climbing_out_fails() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.instances[0].app_path = fixture.root().join("apps").join("..").join("apps").join("site");
        assert!(validate_instances(&cfg).message.contains("must be inside"));
    }

    #[test]
    fn instance_requires_descriptor_and_connection_holder() {
        let fixture = ProjectFixture::new(&["site"]);
        let app = fixture.config.instances[0].app_path.clone();

        fs::remove_file(app.join("ConnectionStrings.config")).unwrap();
        let result = validate_instances(&fixture.config);
        assert!(result.message.contains("has none of"), "{}", result.message);

        fs::create_dir_all(app.join("App_Config")).unwrap();
        fs::write(app.join("App_Config/ConnectionStrings.config"), "<connectionStrings/>").unwrap();
        assert!(validate_instances(&fixture.config).success);

        fs::remove_file(app.join("Web.config")).unwrap();
        assert!(validate_instances(&fixture.config).message.contains("missing Web.config"));
    }

    #[test]
    fn instance_backup_must_exist_with_extension() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.instances[0].backup_path = fixture.root().join("backups").join("nope.bak");
        assert!(validate_instances(&cfg).message.contains("backup file does not exist"));

        let wrong = fixture.root().join("backups").join("site.zip");
        fs::write(&wrong, b"x").unwrap();
        cfg.instances[0].backup_path = wrong;
        assert!(validate_instances(&cfg).message.contains("must end with .bak"));
    }

    #[test]
    fn instance_checks_fields_in_order() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.instances[0].cache_index = None;
        cfg.instances[0].runtime_tag.clear();
        assert_eq!(
            validate_instances(&cfg).message,
            "Instance 'site' cache index is empty"
        );
    }

    #[test]
    fn duplicate_container_names_fail() {
        let fixture = ProjectFixture::new(&["site", "shop"]);
        let mut cfg = fixture.config.clone();
        cfg.instances[1].container_name = cfg.cache.container_name.clone();
        let result = validate_instances(&cfg);
        assert!(result.message.contains("used more than once"), "{}", result.message);
    }

    #[test]
    fn colliding_database_names_fail() {
        let fixture = ProjectFixture::new(&["shop-cm", "shop_cm"]);
        let result = validate_all(&fixture.config);
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Instance 'shop_cm' database name 'shop_cm_db' is already used by instance 'shop-cm'"
        );
        assert_eq!(
            result.target,
            Some(ValidationTarget::Instance("shop_cm".to_string()))
        );
    }

    #[test]
    fn backup_path_equal_to_app_path_fails_before_existence_checks() {
        let fixture = ProjectFixture::new(&["site"]);
        let mut cfg = fixture.config.clone();
        cfg.instances[0].backup_path = cfg.instances[0].app_path.clone();
        assert_eq!(
            validate_instances(&cfg).message,
            "Instance 'site' backup path must differ from application path"
        );
    }
}
